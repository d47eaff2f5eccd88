//! Core of a dynamic HTTP reverse proxy: the configuration-to-routing-table
//! compilation pipeline and the cluster runtime model.
//!
//! This crate owns validation, the pluggable filter chain, the cluster
//! runtime registry (destinations, health, HTTP transport), endpoint
//! compilation, and the orchestrating config manager. It does not forward
//! HTTP requests, parse configuration off the wire, match requests against
//! endpoints, or discover services — those are the embedding host's job.
//! See `ConfigProvider` and `PolicyRegistry` for the two contracts a host
//! must supply.

pub mod change_token;
pub mod cluster;
pub mod config_provider;
pub mod endpoint;
pub mod error;
pub mod filter;
pub mod http_client;
pub mod manager;
pub mod model;
pub mod registry;
pub mod validator;

pub use change_token::ChangeToken;
pub use cluster::{ClusterRuntimeRegistry, ClusterState, DestinationHealth, DynamicState};
pub use config_provider::{ConfigProvider, ProviderConfig, StaticConfigProvider};
pub use endpoint::{Endpoint, EndpointCompiler, EndpointConvention};
pub use error::{ConfigLoadError, CoreError, FilterError, ReloadFailure, ValidationError};
pub use filter::{CancellationToken, ConfigFilter};
pub use http_client::{HttpClientFactory, TransportFingerprint, TransportHandle};
pub use manager::{ConfigManager, ConfigManagerBuilder, Snapshot};
pub use model::*;
pub use registry::{EmptyPolicyRegistry, PolicyRegistry};
