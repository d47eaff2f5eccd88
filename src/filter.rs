//! The filter chain: an ordered pipeline of user-supplied transforms over
//! route and cluster records, applied once per reload before validation.
//!
//! Distinct from a per-request filter (which would run on the hot path for
//! every forwarded request) — this pipeline runs only when configuration
//! changes, which is why it is modeled as async trait objects registered
//! in a plain `Vec` rather than an enum dispatched inline like a per-request
//! middleware would be.

use crate::error::FilterError;
use crate::model::{ClusterSpec, RouteSpec};
use async_trait::async_trait;
use std::sync::Arc;

/// Cooperative cancellation signal passed to filter invocations.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<tokio::sync::Notify>,
    cancelled: Arc<std::sync::atomic::AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(tokio::sync::Notify::new()),
            cancelled: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, std::sync::atomic::Ordering::Release);
        self.inner.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(std::sync::atomic::Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// A single filter in the chain. Implementors may mutate or reject a
/// record; rejecting one record does not stop other records in the same
/// reload from being processed (see `apply_chain`).
#[async_trait]
pub trait ConfigFilter: Send + Sync {
    async fn configure_route(
        &self,
        route: RouteSpec,
        cancel: &CancellationToken,
    ) -> Result<RouteSpec, FilterError> {
        let _ = cancel;
        Ok(route)
    }

    async fn configure_cluster(
        &self,
        cluster: ClusterSpec,
        cancel: &CancellationToken,
    ) -> Result<ClusterSpec, FilterError> {
        let _ = cancel;
        Ok(cluster)
    }
}

/// Runs every route through every filter in registration order. Each
/// filter sees the previous filter's output. A route that fails at some
/// filter is dropped from the successful-output list but recorded as an
/// error; all other routes continue independently.
pub async fn apply_route_chain(
    filters: &[Arc<dyn ConfigFilter>],
    routes: Vec<RouteSpec>,
    cancel: &CancellationToken,
) -> (Vec<RouteSpec>, Vec<FilterError>) {
    let mut ok = Vec::with_capacity(routes.len());
    let mut errors = Vec::new();

    for route in routes {
        let mut current = route;
        let mut failed = false;
        for filter in filters {
            match filter.configure_route(current, cancel).await {
                Ok(next) => current = next,
                Err(err) => {
                    errors.push(err);
                    failed = true;
                    break;
                }
            }
        }
        if !failed {
            ok.push(current);
        }
    }

    (ok, errors)
}

pub async fn apply_cluster_chain(
    filters: &[Arc<dyn ConfigFilter>],
    clusters: Vec<ClusterSpec>,
    cancel: &CancellationToken,
) -> (Vec<ClusterSpec>, Vec<FilterError>) {
    let mut ok = Vec::with_capacity(clusters.len());
    let mut errors = Vec::new();

    for cluster in clusters {
        let mut current = cluster;
        let mut failed = false;
        for filter in filters {
            match filter.configure_cluster(current, cancel).await {
                Ok(next) => current = next,
                Err(err) => {
                    errors.push(err);
                    failed = true;
                    break;
                }
            }
        }
        if !failed {
            ok.push(current);
        }
    }

    (ok, errors)
}
