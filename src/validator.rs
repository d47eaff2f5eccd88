//! Pure, synchronous, stateless config validation.
//!
//! Grounded on the shape of `config/types.rs`'s deserialize-then-sanity-check
//! helpers in the teacher gateway, generalized into accumulating validators
//! that never stop at the first failure (validation totality, see tests).

use crate::model::{ClusterSpec, HeaderMatch, HeaderMatchMode, RouteSpec};
use crate::registry::{is_reserved_authorization_policy, is_reserved_cors_policy, PolicyRegistry};
use crate::error::ValidationError;

const ALLOWED_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH", "TRACE",
];

/// Validates one route against the supplied policy registry, accumulating
/// every failure rather than stopping at the first.
pub fn validate_route(route: &RouteSpec, registry: &dyn PolicyRegistry) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let id = route.route_id.as_str();

    if route.route_id.trim().is_empty() {
        errors.push(ValidationError::new(id, "Route id must not be empty."));
    }

    let meaningful_hosts: Vec<&String> = route
        .route_match
        .hosts
        .iter()
        .filter(|h| !h.trim().is_empty())
        .collect();
    let has_path = route
        .route_match
        .path
        .as_ref()
        .map(|p| !p.trim().is_empty())
        .unwrap_or(false);

    if meaningful_hosts.is_empty() && !has_path {
        errors.push(ValidationError::new(
            id,
            format!(
                "Route '{id}' requires Hosts or Path specified. Set the Path to '/{{**catchall}}' to match all requests."
            ),
        ));
    }

    for host in &meaningful_hosts {
        validate_host(id, host, &mut errors);
    }

    if let Some(path) = &route.route_match.path {
        if !path.trim().is_empty() && !registry.is_valid_path_pattern(path) {
            errors.push(ValidationError::new(
                id,
                format!("Invalid path '{path}' for route '{id}'"),
            ));
        }
    }

    let mut seen_methods = std::collections::HashSet::new();
    for method in &route.route_match.methods {
        let upper = method.to_uppercase();
        if !ALLOWED_METHODS.contains(&upper.as_str()) {
            errors.push(ValidationError::new(
                id,
                format!("Unsupported HTTP method '{method}' on route '{id}'"),
            ));
            continue;
        }
        if !seen_methods.insert(upper.clone()) {
            errors.push(ValidationError::new(
                id,
                format!("Duplicate HTTP method '{upper}' on route '{id}'"),
            ));
        }
    }

    for header in &route.route_match.headers {
        validate_header_match(id, header, &mut errors);
    }

    if let Some(policy) = &route.authorization_policy {
        if !policy.trim().is_empty() {
            validate_named_policy(
                id,
                policy,
                is_reserved_authorization_policy(policy),
                registry.is_authorization_policy_registered(policy),
                "authorization",
                &mut errors,
            );
        }
    }

    if let Some(policy) = &route.cors_policy {
        if !policy.trim().is_empty() {
            validate_named_policy(
                id,
                policy,
                is_reserved_cors_policy(policy),
                registry.is_cors_policy_registered(policy),
                "CORS",
                &mut errors,
            );
        }
    }

    for transform in &route.transforms {
        let keys: Vec<String> = transform.keys().cloned().collect();
        if !registry.is_transform_factory_for(&keys) {
            errors.push(ValidationError::new(
                id,
                format!("No transform factory registered for keys {keys:?} on route '{id}'"),
            ));
        }
    }

    errors
}

fn validate_named_policy(
    route_id: &str,
    policy: &str,
    is_reserved: bool,
    is_registered: bool,
    kind: &str,
    errors: &mut Vec<ValidationError>,
) {
    if is_reserved {
        if is_registered {
            errors.push(ValidationError::new(
                route_id,
                format!(
                    "The {kind} policy name '{policy}' is reserved and cannot also be registered by name on route '{route_id}'."
                ),
            ));
        }
    } else if !is_registered {
        errors.push(ValidationError::new(
            route_id,
            format!("No {kind} policy '{policy}' found for route '{route_id}'."),
        ));
    }
}

fn validate_host(route_id: &str, host: &str, errors: &mut Vec<ValidationError>) {
    let (label, rest) = if let Some(stripped) = host.strip_prefix("*.") {
        (Some("*."), stripped)
    } else {
        (None, host)
    };

    if label.is_some() && rest.starts_with('.') {
        errors.push(ValidationError::new(
            route_id,
            format!("Invalid host '{host}' on route '{route_id}': wildcard prefix may not be followed by another dot."),
        ));
        return;
    }

    let (hostname_part, port_part) = match rest.rsplit_once(':') {
        Some((h, p)) => (h, Some(p)),
        None => (rest, None),
    };

    if hostname_part.is_empty() {
        errors.push(ValidationError::new(
            route_id,
            format!("Invalid host '{host}' on route '{route_id}': hostname is empty."),
        ));
        return;
    }

    if hostname_part.to_lowercase().starts_with("xn--") {
        errors.push(ValidationError::new(
            route_id,
            format!(
                "Invalid host '{host}' on route '{route_id}': IDN A-label form is not accepted, convert to U-label."
            ),
        ));
    }

    if let Some(port) = port_part {
        match port.parse::<u32>() {
            Ok(p) if (1..=65535).contains(&p) => {}
            _ => {
                errors.push(ValidationError::new(
                    route_id,
                    format!("Invalid host '{host}' on route '{route_id}': port must be in [1, 65535]."),
                ));
            }
        }
    }
}

fn validate_header_match(route_id: &str, header: &HeaderMatch, errors: &mut Vec<ValidationError>) {
    if header.name.trim().is_empty() {
        errors.push(ValidationError::new(
            route_id,
            format!("Header match on route '{route_id}' has an empty name."),
        ));
    }
    match header.mode {
        HeaderMatchMode::Exists => {
            if !header.values.is_empty() {
                errors.push(ValidationError::new(
                    route_id,
                    format!(
                        "Header match '{}' on route '{route_id}' uses mode Exists and must not specify values.",
                        header.name
                    ),
                ));
            }
        }
        _ => {
            if header.values.is_empty() {
                errors.push(ValidationError::new(
                    route_id,
                    format!(
                        "Header match '{}' on route '{route_id}' requires at least one value.",
                        header.name
                    ),
                ));
            }
        }
    }
}

/// Validates one cluster against the supplied policy registry.
pub fn validate_cluster(cluster: &ClusterSpec, registry: &dyn PolicyRegistry) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let id = cluster.cluster_id.as_str();

    if let Some(policy) = &cluster.load_balancing_policy {
        if !policy.trim().is_empty() && !registry.is_load_balancing_policy_registered(policy) {
            errors.push(ValidationError::new(
                id,
                format!("No load balancing policy '{policy}' found for cluster '{id}'."),
            ));
        }
    }

    if let Some(affinity) = &cluster.session_affinity {
        if affinity.enabled {
            if let Some(failure_policy) = &affinity.failure_policy {
                if !failure_policy.trim().is_empty()
                    && !registry.is_affinity_failure_policy_registered(failure_policy)
                {
                    errors.push(ValidationError::new(
                        id,
                        format!(
                            "No affinity failure policy '{failure_policy}' found for cluster '{id}'."
                        ),
                    ));
                }
            }
        }
    }

    if let Some(health) = &cluster.health_check {
        if let Some(active) = &health.active {
            if active.enabled {
                match &active.policy {
                    Some(policy) if !policy.trim().is_empty() => {
                        if !registry.is_active_health_policy_registered(policy) {
                            errors.push(ValidationError::new(
                                id,
                                format!("No active health policy '{policy}' found for cluster '{id}'."),
                            ));
                        }
                    }
                    _ => {}
                }
            }
        }
        if let Some(passive) = &health.passive {
            if passive.enabled {
                match &passive.policy {
                    Some(policy) if !policy.trim().is_empty() => {
                        if !registry.is_passive_health_policy_registered(policy) {
                            errors.push(ValidationError::new(
                                id,
                                format!("No passive health policy '{policy}' found for cluster '{id}'."),
                            ));
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    if let Some(request_options) = &cluster.http_request {
        if let Some(version) = request_options.version {
            if !version.is_supported() {
                errors.push(ValidationError::new(
                    id,
                    format!(
                        "Outgoing request version '{version}' is not any of supported HTTP versions (1.0, 1.1 and 2)."
                    ),
                ));
            }
        }
    }

    let mut seen = std::collections::HashSet::new();
    for key in cluster.destination_id_keys() {
        if !seen.insert(key.clone()) {
            errors.push(ValidationError::new(
                id,
                format!("Duplicate destination id '{key}' (case-insensitive) in cluster '{id}'."),
            ));
        }
    }

    for (destination_id, destination) in &cluster.destinations {
        validate_destination_address(id, destination_id, &destination.address, &mut errors);
        if let Some(health_probe) = &destination.health {
            if !health_probe.trim().is_empty() {
                validate_destination_address(id, destination_id, health_probe, &mut errors);
            }
        }
    }

    errors
}

/// A destination's address (and optional health-probe URL) must be an
/// absolute URL: the forwarding engine connects to it directly, with no
/// base to resolve a relative one against.
fn validate_destination_address(
    cluster_id: &str,
    destination_id: &str,
    address: &str,
    errors: &mut Vec<ValidationError>,
) {
    match url::Url::parse(address) {
        Ok(url) if url.cannot_be_a_base() => {
            errors.push(ValidationError::new(
                cluster_id,
                format!(
                    "Destination '{destination_id}' in cluster '{cluster_id}' has address '{address}' which is not an absolute URL."
                ),
            ));
        }
        Ok(_) => {}
        Err(_) => {
            errors.push(ValidationError::new(
                cluster_id,
                format!(
                    "Destination '{destination_id}' in cluster '{cluster_id}' has address '{address}' which is not a valid absolute URL."
                ),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DestinationSpec, HttpRequestOptions, HttpVersionSpec, RouteMatch};
    use crate::registry::EmptyPolicyRegistry;

    #[test]
    fn s4_missing_hosts_and_path() {
        let route = RouteSpec::new("route1", RouteMatch::default());
        let errors = validate_route(&route, &EmptyPolicyRegistry);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].message,
            "Route 'route1' requires Hosts or Path specified. Set the Path to '/{**catchall}' to match all requests."
        );
    }

    #[test]
    fn validation_never_panics_and_is_total() {
        // Every combination below must return zero or more errors, never panic.
        let cases = vec![
            RouteSpec::new("", RouteMatch::default()),
            RouteSpec::new("r1", RouteMatch { path: Some("/".into()), ..Default::default() }),
            RouteSpec::new(
                "r2",
                RouteMatch { hosts: vec!["xn--caf-dma.example".into()], ..Default::default() },
            ),
        ];
        for route in cases {
            let _ = validate_route(&route, &EmptyPolicyRegistry);
        }
    }

    #[test]
    fn rejects_idn_a_label_host() {
        let route = RouteSpec::new(
            "r1",
            RouteMatch {
                hosts: vec!["xn--caf-dma.example".into()],
                ..Default::default()
            },
        );
        let errors = validate_route(&route, &EmptyPolicyRegistry);
        assert!(errors.iter().any(|e| e.message.contains("IDN A-label")));
    }

    #[test]
    fn accepts_wildcard_host() {
        let route = RouteSpec::new(
            "r1",
            RouteMatch {
                hosts: vec!["*.example.com".into()],
                ..Default::default()
            },
        );
        assert!(validate_route(&route, &EmptyPolicyRegistry).is_empty());
    }

    #[test]
    fn rejects_port_out_of_range() {
        let route = RouteSpec::new(
            "r1",
            RouteMatch {
                hosts: vec!["example.com:70000".into()],
                ..Default::default()
            },
        );
        let errors = validate_route(&route, &EmptyPolicyRegistry);
        assert!(errors.iter().any(|e| e.message.contains("port")));
    }

    #[test]
    fn rejects_duplicate_methods() {
        let route = RouteSpec::new(
            "r1",
            RouteMatch {
                path: Some("/".into()),
                methods: vec!["get".into(), "GET".into()],
                ..Default::default()
            },
        );
        let errors = validate_route(&route, &EmptyPolicyRegistry);
        assert!(errors.iter().any(|e| e.message.contains("Duplicate HTTP method")));
    }

    struct RejectMalformedCatchAll;

    impl PolicyRegistry for RejectMalformedCatchAll {
        fn is_authorization_policy_registered(&self, _name: &str) -> bool {
            false
        }
        fn is_cors_policy_registered(&self, _name: &str) -> bool {
            false
        }
        fn is_load_balancing_policy_registered(&self, _name: &str) -> bool {
            false
        }
        fn is_active_health_policy_registered(&self, _name: &str) -> bool {
            false
        }
        fn is_passive_health_policy_registered(&self, _name: &str) -> bool {
            false
        }
        fn is_affinity_failure_policy_registered(&self, _name: &str) -> bool {
            false
        }
        fn is_transform_factory_for(&self, keys: &[String]) -> bool {
            keys.is_empty()
        }
        fn is_valid_path_pattern(&self, path: &str) -> bool {
            // Simulates a real matcher rejecting a malformed catch-all segment.
            !path.contains("{**}")
        }
    }

    #[test]
    fn path_validation_delegates_to_registry_matcher() {
        let route = RouteSpec::new(
            "r1",
            RouteMatch {
                path: Some("/api/{**}/extra".into()),
                ..Default::default()
            },
        );
        let errors = validate_route(&route, &RejectMalformedCatchAll);
        assert!(errors
            .iter()
            .any(|e| e.message == "Invalid path '/api/{**}/extra' for route 'r1'"));
    }

    #[test]
    fn s3_unsupported_http_version() {
        let cluster = ClusterSpec {
            http_request: Some(HttpRequestOptions {
                version: Some(HttpVersionSpec { major: 1, minor: 2 }),
                ..Default::default()
            }),
            ..ClusterSpec::new("c1")
        };
        let errors = validate_cluster(&cluster, &EmptyPolicyRegistry);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.starts_with("Outgoing request version"));
    }

    #[test]
    fn rejects_non_absolute_destination_address() {
        let cluster = ClusterSpec::new("c1").with_destination("d1", DestinationSpec::new("not-a-url"));
        let errors = validate_cluster(&cluster, &EmptyPolicyRegistry);
        assert!(errors.iter().any(|e| e.message.contains("not a valid absolute URL")));
    }

    #[test]
    fn accepts_absolute_destination_address() {
        let cluster = ClusterSpec::new("c1").with_destination("d1", DestinationSpec::new("https://host:123/"));
        assert!(validate_cluster(&cluster, &EmptyPolicyRegistry).is_empty());
    }

    #[test]
    fn rejects_duplicate_destination_ids_case_insensitive() {
        let cluster = ClusterSpec::new("c1")
            .with_destination("d1", DestinationSpec::new("https://a/"))
            .with_destination("D1", DestinationSpec::new("https://b/"));
        let errors = validate_cluster(&cluster, &EmptyPolicyRegistry);
        assert!(errors.iter().any(|e| e.message.contains("Duplicate destination id")));
    }
}
