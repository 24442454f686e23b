//! HTTP health validation

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::{redirect, Client};
use tracing::{debug, info, warn};
use url::Url;

use crate::errors::GuardError;
use crate::models::environment::{Endpoint, Environment};
use crate::models::validation::{EndpointResult, ValidationResult};

/// Issues a single HTTP probe and reports the status code
#[async_trait]
pub trait HttpProbe: Send + Sync {
    async fn probe(&self, url: &Url) -> Result<u16, GuardError>;
}

/// Probe backed by reqwest; redirects are not followed so 3xx is observed
pub struct ReqwestProbe {
    client: Client,
}

impl ReqwestProbe {
    pub fn new(timeout: Duration) -> Result<Self, GuardError> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn probe(&self, url: &Url) -> Result<u16, GuardError> {
        debug!("GET {}", url);
        let response = self.client.get(url.clone()).send().await?;
        Ok(response.status().as_u16())
    }
}

/// Validates a deployment by probing its endpoints
pub struct HealthValidator {
    probe: Arc<dyn HttpProbe>,
}

impl HealthValidator {
    pub fn new(probe: Arc<dyn HttpProbe>) -> Self {
        Self { probe }
    }

    /// Probe every endpoint and compute the verdict
    ///
    /// Never fails: a broken probe is recorded as that endpoint's failure.
    pub async fn validate(
        &self,
        env: &Environment,
        endpoints: &[Endpoint],
        pass_threshold: f64,
    ) -> ValidationResult {
        let probes = endpoints.iter().map(|endpoint| self.check(env, endpoint));
        let results = join_all(probes).await;

        let result = ValidationResult::from_endpoints(&env.name, results, pass_threshold);
        if result.healthy {
            info!("{}: {}", env.name, result.summary());
        } else {
            warn!("{}: {}", env.name, result.summary());
        }
        result
    }

    async fn check(&self, env: &Environment, endpoint: &Endpoint) -> EndpointResult {
        let url = match endpoint_url(env, endpoint) {
            Ok(url) => url,
            Err(e) => {
                return EndpointResult {
                    route: endpoint.route.clone(),
                    url: String::new(),
                    expected: endpoint.expect,
                    status: None,
                    passed: false,
                    error: Some(e.to_string()),
                }
            }
        };

        let (status, error) = match self.probe.probe(&url).await {
            Ok(status) => (Some(status), None),
            Err(e) => (None, Some(e.to_string())),
        };
        let passed = status.map(|s| endpoint.expect.matches(s)).unwrap_or(false);
        debug!(
            "{} -> {:?} (expected {}, {})",
            url,
            status,
            endpoint.expect,
            if passed { "pass" } else { "fail" }
        );

        EndpointResult {
            route: endpoint.route.clone(),
            url: url.to_string(),
            expected: endpoint.expect,
            status,
            passed,
            error,
        }
    }
}

/// `http://host:port/route` for an endpoint
pub fn endpoint_url(env: &Environment, endpoint: &Endpoint) -> Result<Url, GuardError> {
    let mut base = Url::parse(&format!("http://{}/", env.host))
        .map_err(|e| GuardError::ConfigError(format!("Invalid host {}: {}", env.host, e)))?;

    if let Some(port) = endpoint.port.or(env.primary_port()) {
        base.set_port(Some(port))
            .map_err(|_| GuardError::ConfigError(format!("Cannot set port {} on {}", port, env.host)))?;
    }

    base.join(&endpoint.route)
        .map_err(|e| GuardError::ConfigError(format!("Invalid route {}: {}", endpoint.route, e)))
}
