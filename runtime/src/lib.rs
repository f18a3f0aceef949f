//! # Holdfast Runtime
//!
//! Resilience and background-execution building blocks used by the commerce
//! services:
//!
//! - [`circuit_breaker`]: isolates a failing downstream dependency
//! - [`retry`]: exponential backoff for transient failures
//! - [`worker`]: bounded fire-and-forget job queue with retrying delivery
//! - [`metrics`]: Prometheus recorder and per-component metric recorders
//! - [`health`]: component health checks aggregated for readiness probes

/// Retry logic with exponential backoff
pub mod retry;

/// Circuit breaker pattern for preventing cascading failures
pub mod circuit_breaker;

/// Prometheus metrics for observability
pub mod metrics;

/// Background job queue
pub mod worker;

/// Health checks for readiness probes
pub mod health {
    use serde::Serialize;

    /// Health check status levels
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
    #[serde(rename_all = "lowercase")]
    pub enum HealthStatus {
        /// Component is fully operational
        Healthy,

        /// Component works with reduced functionality (e.g. an open circuit)
        Degraded,

        /// Component is not operational
        Unhealthy,
    }

    impl HealthStatus {
        /// Check if status is healthy
        #[must_use]
        pub const fn is_healthy(self) -> bool {
            matches!(self, Self::Healthy)
        }

        /// Check if status is unhealthy
        #[must_use]
        pub const fn is_unhealthy(self) -> bool {
            matches!(self, Self::Unhealthy)
        }

        /// Get the worst status between two statuses
        #[must_use]
        pub const fn worst(self, other: Self) -> Self {
            match (self, other) {
                (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
                (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
                _ => Self::Healthy,
            }
        }
    }

    impl std::fmt::Display for HealthStatus {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Healthy => write!(f, "healthy"),
                Self::Degraded => write!(f, "degraded"),
                Self::Unhealthy => write!(f, "unhealthy"),
            }
        }
    }

    /// Health check result for a component
    #[derive(Debug, Clone, Serialize)]
    pub struct HealthCheck {
        /// Name of the component being checked
        pub component: String,

        /// Current health status
        pub status: HealthStatus,

        /// Optional details
        #[serde(skip_serializing_if = "Option::is_none")]
        pub message: Option<String>,
    }

    impl HealthCheck {
        /// Create a healthy check result
        #[must_use]
        pub fn healthy(component: impl Into<String>) -> Self {
            Self {
                component: component.into(),
                status: HealthStatus::Healthy,
                message: None,
            }
        }

        /// Create a degraded check result
        #[must_use]
        pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
            Self {
                component: component.into(),
                status: HealthStatus::Degraded,
                message: Some(message.into()),
            }
        }

        /// Create an unhealthy check result
        #[must_use]
        pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
            Self {
                component: component.into(),
                status: HealthStatus::Unhealthy,
                message: Some(message.into()),
            }
        }
    }

    /// Aggregated health report; overall status is the worst of all checks.
    #[derive(Debug, Clone, Serialize)]
    pub struct HealthReport {
        /// Overall status
        pub status: HealthStatus,

        /// Individual component checks
        pub checks: Vec<HealthCheck>,
    }

    impl HealthReport {
        /// Create a report from checks
        #[must_use]
        pub fn new(checks: Vec<HealthCheck>) -> Self {
            let status = checks
                .iter()
                .map(|c| c.status)
                .fold(HealthStatus::Healthy, HealthStatus::worst);

            Self { status, checks }
        }

        /// Whether the service can take traffic (healthy or degraded)
        #[must_use]
        pub const fn is_ready(&self) -> bool {
            !self.status.is_unhealthy()
        }
    }

}

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
pub use retry::RetryPolicy;
pub use worker::{JobHandler, WorkerConfig, WorkerQueue};
