//! Inbound config provider contract.
//!
//! The core does not dictate a storage format: whatever produces route and
//! cluster records (a file watcher, an etcd/consul watch loop, a static
//! in-memory list) implements this trait. The shape mirrors the watch-loop
//! pattern in `config/etcd.rs`/`server/bootstrap.rs::start_config_watcher`
//! in the teacher gateway, generalized away from etcd specifics: fetch the
//! current config, and hand back a token that fires when a new one is
//! available.

use crate::change_token::ChangeToken;
use crate::error::ConfigLoadError;
use crate::model::{ClusterSpec, RouteSpec};
use async_trait::async_trait;

pub struct ProviderConfig {
    pub routes: Vec<RouteSpec>,
    pub clusters: Vec<ClusterSpec>,
}

#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Fetches the current configuration. Called once at startup and once
    /// per subsequent reload trigger.
    async fn load(&self) -> Result<ProviderConfig, ConfigLoadError>;

    /// Returns a token that fires when the provider has a new config
    /// available. The manager awaits this token to learn when to call
    /// `load()` again.
    fn change_token(&self) -> ChangeToken;
}

/// A provider over a fixed, in-memory config. Its change token never
/// fires unless `push` is called — useful for tests and for embedders
/// that only ever load configuration once.
pub struct StaticConfigProvider {
    state: arc_swap::ArcSwap<(Vec<RouteSpec>, Vec<ClusterSpec>)>,
    token: arc_swap::ArcSwap<ChangeToken>,
}

impl StaticConfigProvider {
    pub fn new(routes: Vec<RouteSpec>, clusters: Vec<ClusterSpec>) -> Self {
        Self {
            state: arc_swap::ArcSwap::new(std::sync::Arc::new((routes, clusters))),
            token: arc_swap::ArcSwap::new(std::sync::Arc::new(ChangeToken::new())),
        }
    }

    /// Replaces the config and fires the current change token, as a test
    /// double for an external config change.
    pub fn push(&self, routes: Vec<RouteSpec>, clusters: Vec<ClusterSpec>) {
        self.state.store(std::sync::Arc::new((routes, clusters)));
        let old = self.token.swap(std::sync::Arc::new(ChangeToken::new()));
        old.fire();
    }
}

#[async_trait]
impl ConfigProvider for StaticConfigProvider {
    async fn load(&self) -> Result<ProviderConfig, ConfigLoadError> {
        let guard = self.state.load();
        Ok(ProviderConfig {
            routes: guard.0.clone(),
            clusters: guard.1.clone(),
        })
    }

    fn change_token(&self) -> ChangeToken {
        (**self.token.load()).clone()
    }
}
