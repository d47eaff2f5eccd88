//! Immutable config record value types.
//!
//! These mirror a declarative route/cluster configuration the same way
//! `RouteConfig`/`ClusterConfig` do in a file-backed gateway, except every
//! type here is a pure value: field-wise `PartialEq`/`Eq`/`Hash` and no
//! interior mutation. Reload diffing and the test scenarios both depend on
//! deep structural equality, so derive it rather than relying on identity.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn is_false(b: &bool) -> bool {
    !*b
}

/// A single route: a match predicate plus the cluster it forwards to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteSpec {
    pub route_id: String,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(rename = "match")]
    pub route_match: RouteMatch,
    #[serde(default)]
    pub order: Option<i32>,
    #[serde(default)]
    pub authorization_policy: Option<String>,
    #[serde(default)]
    pub cors_policy: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub transforms: Vec<BTreeMap<String, String>>,
}

impl RouteSpec {
    pub fn new(route_id: impl Into<String>, route_match: RouteMatch) -> Self {
        Self {
            route_id: route_id.into(),
            cluster_id: String::new(),
            route_match,
            order: None,
            authorization_policy: None,
            cors_policy: None,
            metadata: BTreeMap::new(),
            transforms: Vec::new(),
        }
    }

    pub fn with_cluster_id(mut self, cluster_id: impl Into<String>) -> Self {
        self.cluster_id = cluster_id.into();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteMatch {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub headers: Vec<HeaderMatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeaderMatchMode {
    ExactHeader,
    HeaderPrefix,
    Exists,
    Contains,
    NotContains,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeaderMatch {
    pub name: String,
    pub mode: HeaderMatchMode,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default, rename = "case_sensitive", skip_serializing_if = "is_false")]
    pub is_case_sensitive: bool,
}

/// A cluster: a named set of destinations plus transport/health policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub cluster_id: String,
    #[serde(default)]
    pub destinations: BTreeMap<String, DestinationSpec>,
    #[serde(default)]
    pub load_balancing_policy: Option<String>,
    #[serde(default)]
    pub session_affinity: Option<SessionAffinityOptions>,
    #[serde(default)]
    pub health_check: Option<HealthCheckOptions>,
    #[serde(default)]
    pub http_client: Option<HttpClientOptions>,
    #[serde(default)]
    pub http_request: Option<HttpRequestOptions>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ClusterSpec {
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            destinations: BTreeMap::new(),
            load_balancing_policy: None,
            session_affinity: None,
            health_check: None,
            http_client: None,
            http_request: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_destination(mut self, id: impl Into<String>, dest: DestinationSpec) -> Self {
        self.destinations.insert(id.into(), dest);
        self
    }

    /// Destination ids, normalized for case-insensitive comparison.
    pub fn destination_id_keys(&self) -> Vec<String> {
        self.destinations.keys().map(|k| k.to_lowercase()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestinationSpec {
    pub address: String,
    #[serde(default)]
    pub health: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl DestinationSpec {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            health: None,
            metadata: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionAffinityOptions {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub policy: Option<String>,
    #[serde(default)]
    pub failure_policy: Option<String>,
    #[serde(default)]
    pub affinity_key_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HealthCheckOptions {
    #[serde(default)]
    pub active: Option<ActiveHealthCheckOptions>,
    #[serde(default)]
    pub passive: Option<PassiveHealthCheckOptions>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActiveHealthCheckOptions {
    #[serde(default)]
    pub enabled: bool,
    /// Milliseconds; modeled as an integer so the type can derive `Eq`/`Hash`.
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub policy: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PassiveHealthCheckOptions {
    #[serde(default)]
    pub enabled: bool,
    pub policy: Option<String>,
    pub reactivation_period_ms: u64,
}

/// Bitset of acceptable TLS protocol versions. Structural equality over
/// this and the other fields below is what keys the transport cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SslProtocols {
    pub tls11: bool,
    pub tls12: bool,
    pub tls13: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestHeaderEncoding {
    Latin1,
    Utf8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HttpClientOptions {
    #[serde(default)]
    pub ssl_protocols: SslProtocols,
    #[serde(default)]
    pub max_connections_per_server: Option<u32>,
    /// Opaque handle: an identifier the embedder resolves to an actual
    /// certificate; the core only needs it for fingerprinting.
    #[serde(default)]
    pub client_certificate: Option<String>,
    #[serde(default)]
    pub dangerous_accept_any_server_certificate: bool,
    #[serde(default)]
    pub request_header_encoding: Option<RequestHeaderEncoding>,
}

/// An HTTP version as supplied by the config producer. Deliberately not a
/// closed enum: the validator must be able to reject versions outside the
/// supported set (see the version-check test scenario), which requires
/// representing whatever the producer sent, valid or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HttpVersionSpec {
    pub major: u32,
    pub minor: u32,
}

impl HttpVersionSpec {
    pub const HTTP_1_0: HttpVersionSpec = HttpVersionSpec { major: 1, minor: 0 };
    pub const HTTP_1_1: HttpVersionSpec = HttpVersionSpec { major: 1, minor: 1 };
    pub const HTTP_2_0: HttpVersionSpec = HttpVersionSpec { major: 2, minor: 0 };

    pub fn is_supported(self) -> bool {
        matches!(self, Self::HTTP_1_0 | Self::HTTP_1_1 | Self::HTTP_2_0)
    }
}

impl std::fmt::Display for HttpVersionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpVersionPolicy {
    RequestVersionOrLower,
    RequestVersionOrHigher,
    RequestVersionExact,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HttpRequestOptions {
    #[serde(default)]
    pub version: Option<HttpVersionSpec>,
    /// Milliseconds; `None` means no activity timeout.
    #[serde(default)]
    pub activity_timeout_ms: Option<u64>,
    #[serde(default)]
    pub version_policy: Option<HttpVersionPolicy>,
}
