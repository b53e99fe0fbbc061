//! Port contracts shared by every adapter
//!
//! The billing engines talk to storage and notification backends only
//! through traits. Adapters report failures as [`PortError`] so the engines
//! can tell a retryable outage from a bad document without knowing which
//! backend is behind the port.
//!
//! ```text
//!   engines (bill, payment, batch, correction, audit)
//!                     │
//!        DocumentStore / NotificationPort
//!            │                      │
//!   remote document store    in-memory adapter
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by a storage or notification adapter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortError {
    #[error("{collection} document {id} does not exist")]
    NotFound { collection: String, id: String },

    /// The backend refused the request as malformed, e.g. an oversized bulk write
    #[error("request rejected: {message}")]
    Validation { message: String },

    #[error("connection failed: {message}")]
    Connection { message: String },

    #[error("{operation} gave up after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("{service} is unavailable")]
    Unavailable { service: String },

    /// A document did not match the shape of its domain type
    #[error("document mapping failed: {message}")]
    Transformation { message: String },

    #[error("adapter fault: {message}")]
    Internal { message: String },
}

impl PortError {
    pub fn not_found(collection: impl Into<String>, id: impl fmt::Display) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, after_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after_ms,
        }
    }

    pub fn unavailable(service: impl Into<String>) -> Self {
        Self::Unavailable {
            service: service.into(),
        }
    }

    pub fn transformation(message: impl Into<String>) -> Self {
        Self::Transformation {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether repeating the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::Unavailable { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for PortError {
    fn from(error: serde_json::Error) -> Self {
        Self::transformation(error.to_string())
    }
}

/// Implemented by every port trait so adapters can sit behind
/// `Arc<dyn ...>` and move between tokio tasks
pub trait DomainPort: Send + Sync + 'static {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Outcome of probing one adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub adapter: String,
    pub status: AdapterHealth,
    pub detail: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthCheckResult {
    pub fn new(adapter: impl Into<String>, status: AdapterHealth) -> Self {
        Self {
            adapter: adapter.into(),
            status,
            detail: None,
            checked_at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status == AdapterHealth::Healthy
    }
}

#[async_trait::async_trait]
pub trait HealthCheckable: Send + Sync {
    async fn health_check(&self) -> HealthCheckResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_names_the_document() {
        let error = PortError::not_found("bills", "BILL-123");
        assert!(error.is_not_found());
        assert!(!error.is_transient());
        assert_eq!(error.to_string(), "bills document BILL-123 does not exist");
    }

    #[test]
    fn test_outages_are_transient() {
        assert!(PortError::timeout("bulk_write", 5000).is_transient());
        assert!(PortError::unavailable("document-store").is_transient());
        assert!(!PortError::validation("too many operations").is_transient());
    }

    #[test]
    fn test_serde_error_becomes_transformation() {
        let err = serde_json::from_str::<u32>("not a number").unwrap_err();
        assert!(matches!(PortError::from(err), PortError::Transformation { .. }));
    }

    #[test]
    fn test_health_result_detail() {
        let result = HealthCheckResult::new("store", AdapterHealth::Degraded).with_detail("slow");
        assert!(!result.is_healthy());
        assert_eq!(result.detail.as_deref(), Some("slow"));
    }
}
