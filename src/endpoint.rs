//! Endpoint compilation: turns one validated `RouteSpec` plus its resolved
//! `ClusterState` (if any) into the opaque record the external host/matcher
//! consumes.

use crate::cluster::ClusterState;
use crate::model::{HeaderMatch, RouteSpec};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const CATCH_ALL_PATTERN: &str = "/{**catchall}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsMarker {
    DefaultEnable,
    Disable,
    Named(String),
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationMarker {
    Default,
    Anonymous,
    Named(String),
    Absent,
}

fn classify_authorization(policy: &Option<String>) -> AuthorizationMarker {
    match policy.as_deref() {
        None => AuthorizationMarker::Absent,
        Some(p) if p.trim().is_empty() => AuthorizationMarker::Absent,
        Some(p) if p.eq_ignore_ascii_case("default") => AuthorizationMarker::Default,
        Some(p) if p.eq_ignore_ascii_case("anonymous") => AuthorizationMarker::Anonymous,
        Some(p) => AuthorizationMarker::Named(p.to_string()),
    }
}

fn classify_cors(policy: &Option<String>) -> CorsMarker {
    match policy.as_deref() {
        None => CorsMarker::Absent,
        Some(p) if p.trim().is_empty() => CorsMarker::Absent,
        Some(p) if p.eq_ignore_ascii_case("default") => CorsMarker::DefaultEnable,
        Some(p) if p.eq_ignore_ascii_case("disable") => CorsMarker::Disable,
        Some(p) => CorsMarker::Named(p.to_string()),
    }
}

/// Metadata attached to a compiled endpoint. `cluster_state` is `None`
/// when the route's `cluster_id` does not resolve — the endpoint is still
/// emitted (see invariant in the data model), the forwarding engine is
/// responsible for failing such a request at request time.
#[derive(Clone)]
pub struct EndpointMetadata {
    pub route_spec: RouteSpec,
    pub hosts: Option<Vec<String>>,
    pub headers: Option<Vec<HeaderMatch>>,
    pub cors: CorsMarker,
    pub methods_with_cors_preflight: Option<Vec<String>>,
    pub authorization: AuthorizationMarker,
    pub cluster_state: Option<Arc<ClusterState>>,
    pub extra: BTreeMap<String, String>,
}

#[derive(Clone)]
pub struct Endpoint {
    pub pattern: String,
    pub order: i32,
    pub display_name: String,
    pub metadata: EndpointMetadata,
}

impl Endpoint {
    /// `true` iff any CORS marker is present, including an explicit
    /// `Disable` — the preflight machinery still needs to know a policy
    /// decision was made, even if the decision is "don't allow it".
    pub fn accepts_cors_preflight(&self) -> bool {
        !matches!(self.metadata.cors, CorsMarker::Absent)
    }
}

/// A hook that runs after the base endpoint is built, in registration
/// order, and may add further metadata. Named "convention" to mirror the
/// source design's own terminology for this extension point.
pub trait EndpointConvention: Send + Sync {
    fn apply(&self, endpoint: &mut Endpoint);
}

pub struct EndpointCompiler {
    conventions: Vec<Arc<dyn EndpointConvention>>,
}

impl EndpointCompiler {
    pub fn new(conventions: Vec<Arc<dyn EndpointConvention>>) -> Self {
        Self { conventions }
    }

    pub fn compile(&self, route: RouteSpec, cluster_state: Option<Arc<ClusterState>>) -> Endpoint {
        let pattern = match &route.route_match.path {
            Some(p) if !p.trim().is_empty() => p.clone(),
            _ => CATCH_ALL_PATTERN.to_string(),
        };

        let hosts = if route.route_match.hosts.is_empty() {
            None
        } else {
            Some(route.route_match.hosts.clone())
        };

        let headers = if route.route_match.headers.is_empty() {
            None
        } else {
            Some(route.route_match.headers.clone())
        };

        let cors = classify_cors(&route.cors_policy);
        let authorization = classify_authorization(&route.authorization_policy);

        let methods_with_cors_preflight = if matches!(cors, CorsMarker::Absent) {
            None
        } else if route.route_match.methods.is_empty() {
            None
        } else {
            Some(route.route_match.methods.clone())
        };

        let mut endpoint = Endpoint {
            pattern,
            order: route.order.unwrap_or(0),
            display_name: route.route_id.clone(),
            metadata: EndpointMetadata {
                route_spec: route,
                hosts,
                headers,
                cors,
                methods_with_cors_preflight,
                authorization,
                cluster_state,
                extra: BTreeMap::new(),
            },
        };

        for convention in &self.conventions {
            convention.apply(&mut endpoint);
        }

        endpoint
    }
}

impl Default for EndpointCompiler {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RouteMatch;

    #[test]
    fn s1_happy_path_has_no_host_header_methods_metadata() {
        let route = RouteSpec::new(
            "r1",
            RouteMatch {
                path: Some("/".into()),
                ..Default::default()
            },
        )
        .with_cluster_id("c1");
        let endpoint = EndpointCompiler::default().compile(route, None);
        assert_eq!(endpoint.display_name, "r1");
        assert_eq!(endpoint.pattern, "/");
        assert!(endpoint.metadata.hosts.is_none());
        assert!(endpoint.metadata.headers.is_none());
    }

    #[test]
    fn s2_catch_all_default_with_host_metadata() {
        let route = RouteSpec::new(
            "r1",
            RouteMatch {
                hosts: vec!["example.com".into()],
                ..Default::default()
            },
        );
        let endpoint = EndpointCompiler::default().compile(route, None);
        assert_eq!(endpoint.pattern, CATCH_ALL_PATTERN);
        assert_eq!(endpoint.metadata.hosts, Some(vec!["example.com".to_string()]));
    }

    #[test]
    fn unresolved_cluster_id_still_produces_endpoint() {
        let route = RouteSpec::new("r1", RouteMatch { path: Some("/".into()), ..Default::default() })
            .with_cluster_id("missing-cluster");
        let endpoint = EndpointCompiler::default().compile(route, None);
        assert!(endpoint.metadata.cluster_state.is_none());
    }

    #[test]
    fn cors_disable_still_counts_as_present() {
        let route = RouteSpec {
            cors_policy: Some("Disable".to_string()),
            ..RouteSpec::new("r1", RouteMatch { path: Some("/".into()), ..Default::default() })
        };
        let endpoint = EndpointCompiler::default().compile(route, None);
        assert!(endpoint.accepts_cors_preflight());
        assert_eq!(endpoint.metadata.cors, CorsMarker::Disable);
    }

    #[test]
    fn absent_cors_does_not_accept_preflight() {
        let route = RouteSpec::new("r1", RouteMatch { path: Some("/".into()), ..Default::default() });
        let endpoint = EndpointCompiler::default().compile(route, None);
        assert!(!endpoint.accepts_cors_preflight());
    }
}
