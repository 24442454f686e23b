//! Environment registry

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::GuardError;
use crate::filesys::file::File;
use crate::models::environment::Environment;

/// On-disk layout of `environments.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub environments: Vec<Environment>,
}

/// Named environments, immutable once loaded
#[derive(Debug, Clone, Default)]
pub struct EnvironmentRegistry {
    environments: BTreeMap<String, Environment>,
}

impl EnvironmentRegistry {
    /// Load and validate the registry file
    pub async fn load(file: &File) -> Result<Self, GuardError> {
        if !file.exists().await {
            return Err(GuardError::ConfigError(format!(
                "Environment registry not found: {}",
                file.path().display()
            )));
        }
        let contents: RegistryFile = file.read_json().await?;
        let registry = Self::from_environments(contents.environments)?;
        info!(
            "Loaded {} environment(s) from {}",
            registry.len(),
            file.path().display()
        );
        Ok(registry)
    }

    /// Build a registry, rejecting duplicates and incomplete entries
    pub fn from_environments(environments: Vec<Environment>) -> Result<Self, GuardError> {
        let mut map = BTreeMap::new();

        for env in environments {
            validate(&env)?;
            if map.contains_key(&env.name) {
                return Err(GuardError::ConfigError(format!(
                    "Duplicate environment name: {}",
                    env.name
                )));
            }
            map.insert(env.name.clone(), env);
        }

        Ok(Self { environments: map })
    }

    /// Look up an environment by name
    pub fn get(&self, name: &str) -> Result<&Environment, GuardError> {
        self.environments.get(name).ok_or_else(|| {
            GuardError::NotFound(format!(
                "Unknown environment '{}' (known: {})",
                name,
                self.names().join(", ")
            ))
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.environments.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.environments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }
}

fn validate(env: &Environment) -> Result<(), GuardError> {
    let required = [
        ("name", &env.name),
        ("host", &env.host),
        ("path", &env.path),
        ("process_pattern", &env.process_pattern),
        ("start_command", &env.start_command),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(GuardError::ConfigError(format!(
                "Environment '{}' has an empty {}",
                env.name, field
            )));
        }
    }

    if !env.endpoints.is_empty() && env.ports.is_empty() && env.endpoints.iter().any(|e| e.port.is_none()) {
        return Err(GuardError::ConfigError(format!(
            "Environment '{}' has endpoints without a port and no exposed ports",
            env.name
        )));
    }

    for endpoint in &env.endpoints {
        // "//host/x" would be joined as a new authority
        if !endpoint.route.starts_with('/') || endpoint.route.starts_with("//") {
            return Err(GuardError::ConfigError(format!(
                "Environment '{}': route '{}' must start with a single '/'",
                env.name, endpoint.route
            )));
        }
    }

    Ok(())
}
