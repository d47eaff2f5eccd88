//! The Config Manager: orchestrates one reload from `(routes, clusters)` to
//! a published `Snapshot`, and the background loop that repeats the
//! protocol whenever the config provider signals a change.
//!
//! Grounded on `server/state.rs::GatewayState` in the teacher gateway for
//! the overall shape — an `ArcSwap`-backed snapshot guarded by a mutex that
//! serializes the *mutation* path while readers stay lock-free — and on
//! `server/bootstrap.rs::start_config_watcher`'s reconnect-and-reload loop
//! for the background watch task, generalized away from etcd specifics.

use crate::change_token::ChangeToken;
use crate::cluster::ClusterRuntimeRegistry;
use crate::config_provider::ConfigProvider;
use crate::endpoint::{Endpoint, EndpointCompiler};
use crate::error::{CoreError, ReloadFailure};
use crate::filter::{apply_cluster_chain, apply_route_chain, CancellationToken, ConfigFilter};
use crate::http_client::HttpClientFactory;
use crate::registry::PolicyRegistry;
use crate::validator::{validate_cluster, validate_route};
use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One successfully applied configuration generation.
pub struct Snapshot {
    pub endpoints: Vec<Arc<Endpoint>>,
    pub change_signal: ChangeToken,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            endpoints: Vec::new(),
            change_signal: ChangeToken::new(),
        }
    }
}

pub struct ConfigManagerBuilder {
    provider: Arc<dyn ConfigProvider>,
    registry: Arc<dyn PolicyRegistry>,
    filters: Vec<Arc<dyn ConfigFilter>>,
    conventions: Vec<Arc<dyn crate::endpoint::EndpointConvention>>,
}

impl ConfigManagerBuilder {
    pub fn new(provider: Arc<dyn ConfigProvider>, registry: Arc<dyn PolicyRegistry>) -> Self {
        Self {
            provider,
            registry,
            filters: Vec::new(),
            conventions: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: Arc<dyn ConfigFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_convention(mut self, convention: Arc<dyn crate::endpoint::EndpointConvention>) -> Self {
        self.conventions.push(convention);
        self
    }

    pub fn build(self) -> ConfigManager {
        ConfigManager {
            provider: self.provider,
            registry: self.registry,
            filters: self.filters,
            compiler: EndpointCompiler::new(self.conventions),
            cluster_registry: ClusterRuntimeRegistry::new(Arc::new(HttpClientFactory::new())),
            snapshot: ArcSwap::new(Arc::new(Snapshot::empty())),
            reload_mutex: Mutex::new(()),
            reload_failure_signal: ArcSwap::new(Arc::new(ChangeToken::new())),
            armed: std::sync::atomic::AtomicBool::new(false),
            reload_cancel: ArcSwap::new(Arc::new(CancellationToken::new())),
        }
    }
}

pub struct ConfigManager {
    provider: Arc<dyn ConfigProvider>,
    registry: Arc<dyn PolicyRegistry>,
    filters: Vec<Arc<dyn ConfigFilter>>,
    compiler: EndpointCompiler,
    cluster_registry: ClusterRuntimeRegistry,
    snapshot: ArcSwap<Snapshot>,
    reload_mutex: Mutex<()>,
    reload_failure_signal: ArcSwap<ChangeToken>,
    armed: std::sync::atomic::AtomicBool,
    /// Cancellation handle for whichever reload is currently in flight (or,
    /// between reloads, the handle the *next* reload will install). Holding
    /// it outside `reload_once` is what makes `cancel_current_reload`
    /// possible from any caller.
    reload_cancel: ArcSwap<CancellationToken>,
}

impl ConfigManager {
    /// Runs the reload protocol once at startup. On failure, returns a
    /// `CoreError` with the fixed message required by the error-handling
    /// design — there is no prior snapshot to fall back to.
    pub async fn initial_load(&self) -> Result<(), CoreError> {
        match self.reload_once().await {
            Ok(()) => Ok(()),
            Err(failure) => Err(CoreError::initial_load_failed(failure)),
        }
    }

    /// Returns the current snapshot's endpoints. The first call arms the
    /// change-propagation path (see `watch_forever`).
    pub fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.armed.store(true, std::sync::atomic::Ordering::Release);
        self.snapshot.load().endpoints.clone()
    }

    /// Returns the current snapshot's change signal.
    pub fn change_token(&self) -> ChangeToken {
        self.snapshot.load().change_signal.clone()
    }

    /// Fires when a post-startup reload fails; the previous snapshot
    /// remains in effect. Distinct from `change_token`, which only fires
    /// on success.
    pub fn reload_failure_token(&self) -> ChangeToken {
        (**self.reload_failure_signal.load()).clone()
    }

    pub fn cluster_registry(&self) -> &ClusterRuntimeRegistry {
        &self.cluster_registry
    }

    /// Cancels whichever reload is currently in flight. A no-op if no
    /// reload is running, or if the in-flight reload has already passed the
    /// point where cancellation is checked for the last time. Cancellation
    /// aborts the reload without altering the published snapshot.
    pub fn cancel_current_reload(&self) {
        self.reload_cancel.load().cancel();
    }

    fn reload_cancelled(&self) -> ReloadFailure {
        tracing::info!("config_manager: reload cancelled");
        metrics::counter!("proxy_config_reloads_total", "result" => "cancelled").increment(1);
        ReloadFailure::cancelled()
    }

    /// Awaits the provider's change notifications and repeats the reload
    /// protocol. Runs until cancelled. Reload attempts are naturally
    /// serialized by `reload_mutex`; because each iteration re-fetches the
    /// provider's *current* token and `load()` reads current state, any
    /// number of provider pushes that land while a reload is in flight
    /// collapse into exactly one follow-up reload.
    pub async fn watch_forever(self: Arc<Self>) {
        loop {
            let token = self.provider.change_token();
            token.changed().await;
            if let Err(failure) = self.reload_once().await {
                tracing::error!(
                    "config_manager: reload failed, validation_errors={}, filter_errors={}",
                    failure.validation_errors.len(),
                    failure.filter_errors.len()
                );
                let old = self.reload_failure_signal.swap(Arc::new(ChangeToken::new()));
                old.fire();
            }
        }
    }

    /// Runs one full reload attempt: filter, validate, reconcile, compile,
    /// publish. On any failure — including cancellation — the previous
    /// snapshot is left untouched and the aggregate is returned to the
    /// caller to report as it sees fit. `cancel_current_reload` may abort
    /// this attempt at any of the checkpoints between stages.
    async fn reload_once(&self) -> Result<(), ReloadFailure> {
        let _guard = self.reload_mutex.lock().await;
        tracing::info!("config_manager: reload started");

        let cancel = CancellationToken::new();
        self.reload_cancel.store(Arc::new(cancel.clone()));

        let loaded = self
            .provider
            .load()
            .await
            .map_err(|e| ReloadFailure {
                load_error: Some(e),
                ..Default::default()
            })?;

        if cancel.is_cancelled() {
            return Err(self.reload_cancelled());
        }

        let (filtered_routes, route_filter_errors) =
            apply_route_chain(&self.filters, loaded.routes, &cancel).await;
        let (filtered_clusters, cluster_filter_errors) =
            apply_cluster_chain(&self.filters, loaded.clusters, &cancel).await;

        if cancel.is_cancelled() {
            return Err(self.reload_cancelled());
        }

        let mut failure = ReloadFailure::default();
        for err in route_filter_errors {
            failure.push_filter(err);
        }
        for err in cluster_filter_errors {
            failure.push_filter(err);
        }

        let mut seen_route_ids = HashSet::new();
        for route in &filtered_routes {
            failure.push_validation(validate_route(route, self.registry.as_ref()));
            if !seen_route_ids.insert(route.route_id.clone()) {
                failure.push_validation([crate::error::ValidationError::new(
                    route.route_id.clone(),
                    format!("Duplicate route id '{}'.", route.route_id),
                )]);
            }
        }
        for cluster in &filtered_clusters {
            failure.push_validation(validate_cluster(cluster, self.registry.as_ref()));
        }

        if !failure.is_empty() {
            tracing::warn!(
                "config_manager: reload rejected, {} validation error(s), {} filter error(s)",
                failure.validation_errors.len(),
                failure.filter_errors.len()
            );
            metrics::counter!("proxy_config_reloads_total", "result" => "rejected").increment(1);
            return Err(failure);
        }

        if cancel.is_cancelled() {
            return Err(self.reload_cancelled());
        }

        let reconcile_outcome = self.cluster_registry.reconcile(filtered_clusters);
        tracing::debug!(
            "cluster_registry: reconciled, added={}, updated={}, removed={}",
            reconcile_outcome.added.len(),
            reconcile_outcome.updated.len(),
            reconcile_outcome.removed.len()
        );

        let endpoints: Vec<Arc<Endpoint>> = filtered_routes
            .into_iter()
            .map(|route| {
                let cluster_state = if route.cluster_id.is_empty() {
                    None
                } else {
                    self.cluster_registry.get(&route.cluster_id)
                };
                Arc::new(self.compiler.compile(route, cluster_state))
            })
            .collect();

        let new_snapshot = Arc::new(Snapshot {
            endpoints,
            change_signal: ChangeToken::new(),
        });

        let old_snapshot = self.snapshot.swap(new_snapshot);
        if self.armed.load(std::sync::atomic::Ordering::Acquire) {
            old_snapshot.change_signal.fire();
        }

        metrics::counter!("proxy_config_reloads_total", "result" => "succeeded").increment(1);
        metrics::gauge!("proxy_config_routes_total").set(self.snapshot.load().endpoints.len() as f64);
        tracing::info!("config_manager: reload succeeded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_provider::StaticConfigProvider;
    use crate::model::{ClusterSpec, DestinationSpec, RouteMatch, RouteSpec};
    use crate::registry::EmptyPolicyRegistry;

    fn manager(provider: StaticConfigProvider) -> Arc<ConfigManager> {
        Arc::new(
            ConfigManagerBuilder::new(Arc::new(provider), Arc::new(EmptyPolicyRegistry)).build(),
        )
    }

    #[tokio::test]
    async fn property_empty_in_empty_out() {
        let manager = manager(StaticConfigProvider::new(vec![], vec![]));
        manager.initial_load().await.unwrap();
        assert!(manager.endpoints().is_empty());
    }

    #[tokio::test]
    async fn s1_happy_path() {
        let route = RouteSpec::new(
            "r1",
            RouteMatch {
                path: Some("/".into()),
                ..Default::default()
            },
        )
        .with_cluster_id("c1");
        let cluster = ClusterSpec::new("c1").with_destination("d1", DestinationSpec::new("https://host:123/"));
        let manager = manager(StaticConfigProvider::new(vec![route], vec![cluster]));
        manager.initial_load().await.unwrap();

        let endpoints = manager.endpoints();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].display_name, "r1");
        assert_eq!(endpoints[0].pattern, "/");
        assert!(endpoints[0].metadata.hosts.is_none());
        let cluster_state = endpoints[0].metadata.cluster_state.as_ref().unwrap();
        let dynamic = cluster_state.dynamic_state();
        assert_eq!(dynamic.all_destinations.len(), 1);
        assert_eq!(dynamic.all_destinations[0].spec.address, "https://host:123/");
    }

    #[tokio::test]
    async fn s3_unsupported_version_fails_initial_load() {
        let cluster = ClusterSpec {
            http_request: Some(crate::model::HttpRequestOptions {
                version: Some(crate::model::HttpVersionSpec { major: 1, minor: 2 }),
                ..Default::default()
            }),
            ..ClusterSpec::new("c1")
        };
        let manager = manager(StaticConfigProvider::new(vec![], vec![cluster]));
        let err = manager.initial_load().await.unwrap_err();
        assert_eq!(err.to_string(), "Unable to load or apply the proxy configuration.");
        assert_eq!(err.aggregate().validation_errors.len(), 1);
        assert!(err.aggregate().validation_errors[0]
            .message
            .starts_with("Outgoing request version"));
    }

    #[tokio::test]
    async fn s4_missing_hosts_and_path_fails_load() {
        let route = RouteSpec::new("route1", RouteMatch::default());
        let manager = manager(StaticConfigProvider::new(vec![route], vec![]));
        let err = manager.initial_load().await.unwrap_err();
        assert_eq!(err.aggregate().validation_errors.len(), 1);
        assert_eq!(
            err.aggregate().validation_errors[0].message,
            "Route 'route1' requires Hosts or Path specified. Set the Path to '/{**catchall}' to match all requests."
        );
    }

    #[tokio::test]
    async fn unresolved_cluster_id_produces_null_cluster_endpoint() {
        let route = RouteSpec::new(
            "r1",
            RouteMatch {
                path: Some("/".into()),
                ..Default::default()
            },
        )
        .with_cluster_id("does-not-exist");
        let manager = manager(StaticConfigProvider::new(vec![route], vec![]));
        manager.initial_load().await.unwrap();
        let endpoints = manager.endpoints();
        assert_eq!(endpoints.len(), 1);
        assert!(endpoints[0].metadata.cluster_state.is_none());
    }

    #[tokio::test]
    async fn s6_change_signal_fires_once_per_generation() {
        let provider = StaticConfigProvider::new(vec![], vec![]);
        let manager = manager(provider);
        manager.initial_load().await.unwrap();
        manager.endpoints(); // arm

        let c1 = manager.change_token();
        assert!(!c1.has_changed());

        manager.reload_once().await.unwrap();
        c1.changed().await; // should resolve promptly, not hang
        assert!(c1.has_changed());

        let c2 = manager.change_token();
        assert!(!c2.has_changed());
    }

    struct CancelOnConfigureFilter {
        manager: std::sync::OnceLock<std::sync::Weak<ConfigManager>>,
    }

    #[async_trait::async_trait]
    impl crate::filter::ConfigFilter for CancelOnConfigureFilter {
        async fn configure_route(
            &self,
            route: RouteSpec,
            _cancel: &crate::filter::CancellationToken,
        ) -> Result<RouteSpec, crate::error::FilterError> {
            if let Some(manager) = self.manager.get().and_then(|m| m.upgrade()) {
                manager.cancel_current_reload();
            }
            Ok(route)
        }
    }

    #[tokio::test]
    async fn cancelled_reload_leaves_snapshot_untouched() {
        let route = RouteSpec::new(
            "r1",
            RouteMatch {
                path: Some("/".into()),
                ..Default::default()
            },
        );
        let provider = Arc::new(StaticConfigProvider::new(vec![], vec![]));
        let filter = Arc::new(CancelOnConfigureFilter {
            manager: std::sync::OnceLock::new(),
        });
        let manager = Arc::new(
            ConfigManagerBuilder::new(provider.clone(), Arc::new(EmptyPolicyRegistry))
                .with_filter(filter.clone())
                .build(),
        );
        filter.manager.set(Arc::downgrade(&manager)).ok().unwrap();

        manager.initial_load().await.unwrap();
        assert!(manager.endpoints().is_empty());

        provider.push(vec![route], vec![]);
        let result = manager.reload_once().await;
        let err = result.unwrap_err();
        assert!(err.cancelled);
        assert_eq!(err.to_string(), "reload cancelled");
        assert!(manager.endpoints().is_empty());
    }

    #[tokio::test]
    async fn reload_failure_keeps_previous_snapshot() {
        let route = RouteSpec::new(
            "r1",
            RouteMatch {
                path: Some("/".into()),
                ..Default::default()
            },
        );
        let provider_handle = Arc::new(StaticConfigProvider::new(vec![route], vec![]));
        let manager = Arc::new(
            ConfigManagerBuilder::new(provider_handle.clone(), Arc::new(EmptyPolicyRegistry)).build(),
        );
        manager.initial_load().await.unwrap();
        assert_eq!(manager.endpoints().len(), 1);

        let bad_cluster = ClusterSpec {
            http_request: Some(crate::model::HttpRequestOptions {
                version: Some(crate::model::HttpVersionSpec { major: 9, minor: 9 }),
                ..Default::default()
            }),
            ..ClusterSpec::new("bad")
        };
        provider_handle.push(vec![], vec![bad_cluster]);
        let result = manager.reload_once().await;
        assert!(result.is_err());
        assert_eq!(manager.endpoints().len(), 1);
    }
}
