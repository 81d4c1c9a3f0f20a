//! Health check types
//!
//! Liveness only says the process is up. Readiness aggregates one
//! [`HealthCheck`] per dependency into a [`HealthReport`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Health status for a service or component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,
    /// Component answers but its circuit is not closed
    Degraded,
    /// Component is not operational
    Unhealthy,
}

/// Health check result for one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub component: String,
    pub message: Option<String>,
    /// Response time in milliseconds (if applicable)
    pub response_time_ms: Option<i64>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl HealthCheck {
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            component: component.into(),
            message: None,
            response_time_ms: None,
            metadata: None,
        }
    }

    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            component: component.into(),
            message: Some(message.into()),
            response_time_ms: None,
            metadata: None,
        }
    }

    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            component: component.into(),
            message: Some(message.into()),
            response_time_ms: None,
            metadata: None,
        }
    }

    pub fn with_response_time(mut self, ms: i64) -> Self {
        self.response_time_ms = Some(ms);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }
}

/// Aggregated readiness report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    /// Overall status is the worst of the component statuses.
    pub fn from_checks(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, |worst, s| match (worst, s) {
                (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => {
                    HealthStatus::Unhealthy
                }
                (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => {
                    HealthStatus::Degraded
                }
                _ => HealthStatus::Healthy,
            });
        Self { status, checks }
    }

    /// Ready unless some component is down.
    pub fn is_ready(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }

    pub fn check(&self, component: &str) -> Option<&HealthCheck> {
        self.checks.iter().find(|c| c.component == component)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_takes_worst_status() {
        let report = HealthReport::from_checks(vec![
            HealthCheck::healthy("storage"),
            HealthCheck::degraded("cache", "circuit half-open"),
        ]);
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(report.is_ready());

        let report = HealthReport::from_checks(vec![
            HealthCheck::unhealthy("storage", "circuit open"),
            HealthCheck::degraded("cache", "circuit half-open"),
        ]);
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(!report.is_ready());
    }

    #[test]
    fn test_empty_report_is_healthy() {
        assert_eq!(HealthReport::from_checks(vec![]).status, HealthStatus::Healthy);
    }

    #[test]
    fn test_check_lookup_and_metadata() {
        let report = HealthReport::from_checks(vec![HealthCheck::healthy("cache")
            .with_response_time(3)
            .with_metadata("circuit", serde_json::json!("CLOSED"))]);
        let cache = report.check("cache").unwrap();
        assert_eq!(cache.response_time_ms, Some(3));
        assert!(report.check("storage").is_none());
        assert_eq!(
            serde_json::to_value(report.status).unwrap(),
            serde_json::json!("healthy")
        );
    }
}
