//! Error types for configuration validation and reload handling.

use std::fmt;
use thiserror::Error;

/// A single, user-fixable problem found while validating one route or
/// cluster record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Identifier of the offending record (`route_id` or `cluster_id`).
    pub record_id: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(record_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ValidationError {}

/// A filter in the filter chain failed while processing one record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("filter failed for record '{record_id}': {message}")]
pub struct FilterError {
    pub record_id: String,
    pub message: String,
}

impl FilterError {
    pub fn new(record_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            message: message.into(),
        }
    }
}

/// The upstream config provider failed to produce a config.
#[derive(Error, Debug, Clone)]
#[error("config provider failed: {0}")]
pub struct ConfigLoadError(pub String);

/// Aggregate of every failure encountered during one reload attempt.
#[derive(Debug, Clone, Default)]
pub struct ReloadFailure {
    pub validation_errors: Vec<ValidationError>,
    pub filter_errors: Vec<FilterError>,
    pub load_error: Option<ConfigLoadError>,
    /// Set when the reload was aborted by a cancellation signal rather than
    /// by a validation, filter, or load failure. The published snapshot is
    /// untouched either way.
    pub cancelled: bool,
}

impl ReloadFailure {
    pub fn is_empty(&self) -> bool {
        self.validation_errors.is_empty()
            && self.filter_errors.is_empty()
            && self.load_error.is_none()
            && !self.cancelled
    }

    pub fn push_validation(&mut self, errors: impl IntoIterator<Item = ValidationError>) {
        self.validation_errors.extend(errors);
    }

    pub fn push_filter(&mut self, error: FilterError) {
        self.filter_errors.push(error);
    }

    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Self::default()
        }
    }
}

impl fmt::Display for ReloadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cancelled {
            return write!(f, "reload cancelled");
        }
        write!(
            f,
            "{} validation error(s), {} filter error(s)",
            self.validation_errors.len(),
            self.filter_errors.len()
        )?;
        if let Some(load_err) = &self.load_error {
            write!(f, ", load error: {load_err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ReloadFailure {}

/// Top-level error surfaced to the embedder.
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// Raised by `initial_load` when the first reload cannot produce a
    /// usable snapshot. The message is fixed; callers that need detail
    /// should inspect `aggregate`.
    #[error("Unable to load or apply the proxy configuration.")]
    InitialLoadFailed { aggregate: ReloadFailure },
}

impl CoreError {
    pub fn initial_load_failed(aggregate: ReloadFailure) -> Self {
        Self::InitialLoadFailed { aggregate }
    }

    pub fn aggregate(&self) -> &ReloadFailure {
        match self {
            CoreError::InitialLoadFailed { aggregate } => aggregate,
        }
    }
}
