//! Cluster runtime registry: the live, identity-stable set of `ClusterState`
//! objects, reconciled against each incoming `ClusterSpec` list.
//!
//! Grounded on `upstream/cluster.rs` (`Cluster`, `ClusterStore`) in the
//! teacher gateway — same idea of a concurrent map of long-lived per-cluster
//! objects that are mutated in place on reload rather than replaced, so that
//! anything holding an `Arc<ClusterState>` from a previous reload keeps
//! seeing live data — and on `upstream/circuit_breaker.rs` for the
//! passive-health bookkeeping style (per-entity atomics, no lock held across
//! a state check).

use crate::change_token::ChangeToken;
use crate::http_client::{HttpClientFactory, TransportHandle};
use crate::model::{ClusterSpec, DestinationSpec};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationHealth {
    Unknown,
    Healthy,
    Unhealthy,
}

const HEALTH_UNKNOWN: u8 = 0;
const HEALTH_HEALTHY: u8 = 1;
const HEALTH_UNHEALTHY: u8 = 2;

fn health_from_u8(v: u8) -> DestinationHealth {
    match v {
        HEALTH_HEALTHY => DestinationHealth::Healthy,
        HEALTH_UNHEALTHY => DestinationHealth::Unhealthy,
        _ => DestinationHealth::Unknown,
    }
}

/// Mutable per-destination runtime bookkeeping. Lives inside a cluster's
/// destination map and survives reloads as long as the destination id
/// keeps reappearing.
struct DestinationRuntime {
    spec: DestinationSpec,
    health: AtomicU8,
    unhealthy_since: Mutex<Option<Instant>>,
    last_probe_time: Mutex<Option<Instant>>,
}

impl DestinationRuntime {
    fn fresh(spec: DestinationSpec) -> Self {
        Self {
            spec,
            health: AtomicU8::new(HEALTH_UNKNOWN),
            unhealthy_since: Mutex::new(None),
            last_probe_time: Mutex::new(None),
        }
    }
}

/// An immutable, point-in-time view of one destination, handed out as part
/// of a cluster's `DynamicState`.
#[derive(Debug, Clone)]
pub struct ResolvedDestination {
    pub id: String,
    pub spec: DestinationSpec,
    pub health: DestinationHealth,
    /// When this destination was last reported on by `record_success` or
    /// `record_failure`. `None` until the first probe outcome is reported —
    /// an active health-probe scheduler uses this to decide what is due.
    pub last_probe_time: Option<Instant>,
}

/// Immutable per-cluster snapshot of destinations and their health,
/// replaced atomically whenever destination membership or health changes.
#[derive(Debug, Clone, Default)]
pub struct DynamicState {
    pub all_destinations: Vec<Arc<ResolvedDestination>>,
    pub available_destinations: Vec<Arc<ResolvedDestination>>,
}

impl DynamicState {
    fn build(destinations: &DashMap<String, DestinationRuntime>) -> Self {
        let mut all = Vec::with_capacity(destinations.len());
        let mut available = Vec::new();
        for entry in destinations.iter() {
            let health = health_from_u8(entry.value().health.load(Ordering::Acquire));
            let resolved = Arc::new(ResolvedDestination {
                id: entry.key().clone(),
                spec: entry.value().spec.clone(),
                health,
                last_probe_time: *entry.value().last_probe_time.lock().unwrap(),
            });
            if health != DestinationHealth::Unhealthy {
                available.push(resolved.clone());
            }
            all.push(resolved);
        }
        Self {
            all_destinations: all,
            available_destinations: available,
        }
    }
}

/// The live, identity-stable runtime object for one cluster.
pub struct ClusterState {
    cluster_id: String,
    spec: ArcSwap<ClusterSpec>,
    destinations: DashMap<String, DestinationRuntime>,
    dynamic_state: ArcSwap<DynamicState>,
    transport: Mutex<TransportHandle>,
    change_signal: ArcSwap<ChangeToken>,
}

impl ClusterState {
    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn spec(&self) -> Arc<ClusterSpec> {
        self.spec.load_full()
    }

    pub fn dynamic_state(&self) -> Arc<DynamicState> {
        self.dynamic_state.load_full()
    }

    pub fn transport(&self) -> TransportHandle {
        self.transport.lock().unwrap().clone()
    }

    pub fn change_token(&self) -> ChangeToken {
        (**self.change_signal.load()).clone()
    }

    pub fn record_success(&self, destination_id: &str, reactivation_period: Duration) {
        let key = destination_id.to_lowercase();
        if let Some(entry) = self.destinations.get(&key) {
            entry.health.store(HEALTH_HEALTHY, Ordering::Release);
            *entry.unhealthy_since.lock().unwrap() = None;
            *entry.last_probe_time.lock().unwrap() = Some(Instant::now());
        }
        let _ = reactivation_period;
        metrics::gauge!(
            "proxy_destination_health_status",
            "cluster" => self.cluster_id.clone(),
            "destination" => key,
        )
        .set(1.0);
        self.republish_dynamic_state();
    }

    pub fn record_failure(&self, destination_id: &str) {
        let key = destination_id.to_lowercase();
        if let Some(entry) = self.destinations.get(&key) {
            entry.health.store(HEALTH_UNHEALTHY, Ordering::Release);
            *entry.unhealthy_since.lock().unwrap() = Some(Instant::now());
            *entry.last_probe_time.lock().unwrap() = Some(Instant::now());
        }
        metrics::gauge!(
            "proxy_destination_health_status",
            "cluster" => self.cluster_id.clone(),
            "destination" => key,
        )
        .set(0.0);
        self.republish_dynamic_state();
    }

    /// Reactivates destinations that have been unhealthy for at least
    /// `reactivation_period`, per the cluster's passive health policy.
    /// The embedder drives the cadence of this call; the core does not
    /// run its own timer (no background scheduler lives in this crate).
    pub fn reactivate_eligible(&self, reactivation_period: Duration) {
        let mut changed = false;
        for entry in self.destinations.iter() {
            let is_unhealthy = entry.value().health.load(Ordering::Acquire) == HEALTH_UNHEALTHY;
            if !is_unhealthy {
                continue;
            }
            let eligible = entry
                .value()
                .unhealthy_since
                .lock()
                .unwrap()
                .map(|since| since.elapsed() >= reactivation_period)
                .unwrap_or(false);
            if eligible {
                entry.value().health.store(HEALTH_UNKNOWN, Ordering::Release);
                *entry.value().unhealthy_since.lock().unwrap() = None;
                changed = true;
            }
        }
        if changed {
            self.republish_dynamic_state();
        }
    }

    fn republish_dynamic_state(&self) {
        let fresh = DynamicState::build(&self.destinations);
        self.dynamic_state.store(Arc::new(fresh));
        let old_token = self.change_signal.swap(Arc::new(ChangeToken::new()));
        old_token.fire();
    }
}

/// Outcome of one reconciliation pass, reported for logging/testing.
#[derive(Debug, Default, Clone)]
pub struct ReconcileOutcome {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

/// Owns the live set of `ClusterState`, keyed by `cluster_id`.
pub struct ClusterRuntimeRegistry {
    clusters: DashMap<String, Arc<ClusterState>>,
    transport_factory: Arc<HttpClientFactory>,
}

impl ClusterRuntimeRegistry {
    pub fn new(transport_factory: Arc<HttpClientFactory>) -> Self {
        Self {
            clusters: DashMap::new(),
            transport_factory,
        }
    }

    pub fn get(&self, cluster_id: &str) -> Option<Arc<ClusterState>> {
        self.clusters.get(cluster_id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Diffs `new_clusters` against the live set by `cluster_id`: creates
    /// fresh state for additions, mutates existing state in place for
    /// updates (preserving identity), and retires state for removals.
    pub fn reconcile(&self, new_clusters: Vec<ClusterSpec>) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        let incoming_ids: HashSet<String> = new_clusters.iter().map(|c| c.cluster_id.clone()).collect();

        for cluster_spec in new_clusters {
            let id = cluster_spec.cluster_id.clone();
            if let Some(existing) = self.clusters.get(&id) {
                self.update_in_place(&existing, cluster_spec);
                outcome.updated.push(id);
            } else {
                let state = self.create(cluster_spec);
                self.clusters.insert(id.clone(), Arc::new(state));
                outcome.added.push(id);
            }
        }

        let stale: Vec<String> = self
            .clusters
            .iter()
            .map(|e| e.key().clone())
            .filter(|id| !incoming_ids.contains(id))
            .collect();

        for id in stale {
            if let Some((_, state)) = self.clusters.remove(&id) {
                let fingerprint = state.transport().fingerprint;
                self.transport_factory.release(fingerprint);
                outcome.removed.push(id);
            }
        }

        metrics::gauge!("proxy_clusters_total").set(self.clusters.len() as f64);
        metrics::counter!("proxy_cluster_reconcile_total", "outcome" => "added").increment(outcome.added.len() as u64);
        metrics::counter!("proxy_cluster_reconcile_total", "outcome" => "updated").increment(outcome.updated.len() as u64);
        metrics::counter!("proxy_cluster_reconcile_total", "outcome" => "removed").increment(outcome.removed.len() as u64);

        outcome
    }

    fn create(&self, spec: ClusterSpec) -> ClusterState {
        let transport_options = spec.http_client.clone().unwrap_or_default();
        let transport = self
            .transport_factory
            .acquire(&spec.cluster_id, &transport_options, None);

        let destinations: DashMap<String, DestinationRuntime> = DashMap::new();
        for (id, dest_spec) in &spec.destinations {
            destinations.insert(id.to_lowercase(), DestinationRuntime::fresh(dest_spec.clone()));
        }
        let dynamic_state = DynamicState::build(&destinations);

        ClusterState {
            cluster_id: spec.cluster_id.clone(),
            spec: ArcSwap::new(Arc::new(spec)),
            destinations,
            dynamic_state: ArcSwap::new(Arc::new(dynamic_state)),
            transport: Mutex::new(transport),
            change_signal: ArcSwap::new(Arc::new(ChangeToken::new())),
        }
    }

    fn update_in_place(&self, state: &Arc<ClusterState>, new_spec: ClusterSpec) {
        let incoming_keys: HashSet<String> = new_spec.destinations.keys().map(|k| k.to_lowercase()).collect();

        for (raw_id, dest_spec) in &new_spec.destinations {
            let key = raw_id.to_lowercase();
            match state.destinations.get(&key) {
                Some(existing) if existing.spec.address == dest_spec.address => {
                    // Same address: preserve health as-is, nothing to do.
                }
                Some(existing) => {
                    // Address changed: health resets to Unknown.
                    existing.health.store(HEALTH_UNKNOWN, Ordering::Release);
                    *existing.unhealthy_since.lock().unwrap() = None;
                    drop(existing);
                    state
                        .destinations
                        .insert(key.clone(), DestinationRuntime::fresh(dest_spec.clone()));
                }
                None => {
                    state
                        .destinations
                        .insert(key.clone(), DestinationRuntime::fresh(dest_spec.clone()));
                }
            }
        }
        state.destinations.retain(|k, _| incoming_keys.contains(k));

        let transport_options = new_spec.http_client.clone().unwrap_or_default();
        let previous_transport = state.transport.lock().unwrap().clone();
        let fresh_transport =
            self.transport_factory
                .acquire(&new_spec.cluster_id, &transport_options, Some(previous_transport));
        *state.transport.lock().unwrap() = fresh_transport;

        state.spec.store(Arc::new(new_spec));
        state.republish_dynamic_state();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DestinationSpec, HttpClientOptions};

    fn registry() -> ClusterRuntimeRegistry {
        ClusterRuntimeRegistry::new(Arc::new(HttpClientFactory::new()))
    }

    #[test]
    fn reconcile_adds_new_cluster() {
        let reg = registry();
        let spec = ClusterSpec::new("c1").with_destination("d1", DestinationSpec::new("https://host:123/"));
        let outcome = reg.reconcile(vec![spec]);
        assert_eq!(outcome.added, vec!["c1".to_string()]);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn property_identity_preservation_across_reloads() {
        let reg = registry();
        let spec = ClusterSpec::new("c1").with_destination("d1", DestinationSpec::new("https://host:123/"));
        reg.reconcile(vec![spec.clone()]);
        let first = reg.get("c1").unwrap();

        reg.reconcile(vec![spec]);
        let second = reg.get("c1").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn reconcile_removes_absent_cluster() {
        let reg = registry();
        let spec = ClusterSpec::new("c1");
        reg.reconcile(vec![spec]);
        let outcome = reg.reconcile(vec![]);
        assert_eq!(outcome.removed, vec!["c1".to_string()]);
        assert!(reg.get("c1").is_none());
    }

    #[test]
    fn destination_retains_health_when_address_unchanged() {
        let reg = registry();
        let spec = ClusterSpec::new("c1").with_destination("d1", DestinationSpec::new("https://host:1/"));
        reg.reconcile(vec![spec.clone()]);
        let state = reg.get("c1").unwrap();
        state.record_failure("d1");
        assert_eq!(
            state.dynamic_state().all_destinations[0].health,
            DestinationHealth::Unhealthy
        );

        // Same address on reload: health should survive.
        reg.reconcile(vec![spec]);
        let state = reg.get("c1").unwrap();
        assert_eq!(
            state.dynamic_state().all_destinations[0].health,
            DestinationHealth::Unhealthy
        );
    }

    #[test]
    fn destination_resets_health_when_address_changes() {
        let reg = registry();
        let spec = ClusterSpec::new("c1").with_destination("d1", DestinationSpec::new("https://host:1/"));
        reg.reconcile(vec![spec]);
        let state = reg.get("c1").unwrap();
        state.record_failure("d1");

        let new_spec = ClusterSpec::new("c1").with_destination("d1", DestinationSpec::new("https://host:2/"));
        reg.reconcile(vec![new_spec]);
        let state = reg.get("c1").unwrap();
        assert_eq!(
            state.dynamic_state().all_destinations[0].health,
            DestinationHealth::Unknown
        );
    }

    #[test]
    fn added_destination_starts_unknown() {
        let reg = registry();
        let spec = ClusterSpec::new("c1").with_destination("d1", DestinationSpec::new("https://host/"));
        reg.reconcile(vec![spec]);
        let state = reg.get("c1").unwrap();
        assert_eq!(
            state.dynamic_state().all_destinations[0].health,
            DestinationHealth::Unknown
        );
    }

    #[test]
    fn last_probe_time_is_unset_until_first_probe_outcome() {
        let reg = registry();
        let spec = ClusterSpec::new("c1").with_destination("d1", DestinationSpec::new("https://host/"));
        reg.reconcile(vec![spec]);
        let state = reg.get("c1").unwrap();
        assert!(state.dynamic_state().all_destinations[0].last_probe_time.is_none());

        state.record_success("d1", Duration::from_secs(30));
        assert!(state.dynamic_state().all_destinations[0].last_probe_time.is_some());
    }

    #[test]
    fn last_probe_time_updates_on_failure_too() {
        let reg = registry();
        let spec = ClusterSpec::new("c1").with_destination("d1", DestinationSpec::new("https://host/"));
        reg.reconcile(vec![spec]);
        let state = reg.get("c1").unwrap();
        state.record_failure("d1");
        assert!(state.dynamic_state().all_destinations[0].last_probe_time.is_some());
    }

    #[test]
    fn property_transport_reuse_same_options_same_cluster() {
        let reg = registry();
        let options = HttpClientOptions::default();
        let spec = ClusterSpec {
            http_client: Some(options.clone()),
            ..ClusterSpec::new("c1")
        };
        reg.reconcile(vec![spec.clone()]);
        let first_transport = reg.get("c1").unwrap().transport();

        reg.reconcile(vec![spec]);
        let second_transport = reg.get("c1").unwrap().transport();

        assert!(Arc::ptr_eq(&first_transport.client, &second_transport.client));
    }
}
