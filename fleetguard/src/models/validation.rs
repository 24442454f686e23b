//! Health validation models

use serde::{Deserialize, Serialize};

use crate::models::environment::ExpectedStatus;

/// Default fraction of endpoints that must be healthy
pub const DEFAULT_PASS_THRESHOLD: f64 = 0.75;

/// Outcome of probing a single endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointResult {
    pub route: String,
    pub url: String,
    pub expected: ExpectedStatus,

    /// Observed status code, `None` if the probe itself failed
    pub status: Option<u16>,
    pub passed: bool,

    /// Probe error, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of the health-check phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub environment: String,
    pub endpoints: Vec<EndpointResult>,
    pub healthy_count: usize,
    pub total_count: usize,
    pub threshold: f64,
    pub healthy: bool,
}

impl ValidationResult {
    /// Compute the verdict from per-endpoint results
    pub fn from_endpoints(environment: &str, endpoints: Vec<EndpointResult>, threshold: f64) -> Self {
        let healthy_count = endpoints.iter().filter(|e| e.passed).count();
        let total_count = endpoints.len();
        let healthy = total_count > 0 && Self::ratio_of(healthy_count, total_count) >= threshold;

        Self {
            environment: environment.to_string(),
            endpoints,
            healthy_count,
            total_count,
            threshold,
            healthy,
        }
    }

    /// Fraction of healthy endpoints
    pub fn ratio(&self) -> f64 {
        Self::ratio_of(self.healthy_count, self.total_count)
    }

    fn ratio_of(healthy: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            healthy as f64 / total as f64
        }
    }

    /// One-line summary, e.g. "3/4 endpoints healthy (75%)"
    pub fn summary(&self) -> String {
        format!(
            "{}/{} endpoints healthy ({:.0}%, threshold {:.0}%)",
            self.healthy_count,
            self.total_count,
            self.ratio() * 100.0,
            self.threshold * 100.0
        )
    }
}
