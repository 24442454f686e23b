//! Environment models

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A deployable target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    /// Unique environment name (e.g. "staging")
    pub name: String,

    /// Host name or IP address
    pub host: String,

    /// SSH credentials for the host
    #[serde(default)]
    pub ssh: SshIdentity,

    /// Remote working directory holding the git checkout
    pub path: String,

    /// Branch tracked by the remote working copy
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Git remote used for fetches
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Ports exposed by the application
    #[serde(default)]
    pub ports: Vec<u16>,

    /// Health-check endpoints
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,

    /// Pattern passed to `pkill -f` to find the running instance
    pub process_pattern: String,

    /// Command that starts the application
    pub start_command: String,

    /// Log file the application output is redirected to
    #[serde(default)]
    pub log_file: Option<String>,

    /// Build/cache directories removed by `--no-cache`, relative to `path`
    #[serde(default)]
    pub cache_dirs: Vec<String>,

    /// Files whose checksums are compared after a sync, relative to the repo root
    #[serde(default)]
    pub critical_files: Vec<String>,

    /// Process names killed when a port conflict is detected
    #[serde(default)]
    pub problem_processes: Vec<String>,

    /// Seconds to wait after launching the application
    #[serde(default = "default_settle_delay_secs")]
    pub settle_delay_secs: u64,

    /// Infrastructure-level restart control
    #[serde(default)]
    pub infrastructure: Option<InfraControl>,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_settle_delay_secs() -> u64 {
    6
}

impl Environment {
    /// SSH target for the environment host
    pub fn target(&self) -> SshTarget {
        SshTarget::new(&self.host, &self.ssh)
    }

    /// Log file for the launched application
    pub fn log_file(&self) -> String {
        self.log_file
            .clone()
            .unwrap_or_else(|| format!("{}/app.log", self.path.trim_end_matches('/')))
    }

    /// Port used for probes that do not override it
    pub fn primary_port(&self) -> Option<u16> {
        self.ports.first().copied()
    }

    /// Upstream ref the working copy is reset to
    pub fn upstream_ref(&self) -> String {
        format!("{}/{}", self.remote, self.branch)
    }
}

/// SSH credential reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshIdentity {
    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Private key path, `None` uses the agent/default keys
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
}

fn default_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

impl Default for SshIdentity {
    fn default() -> Self {
        Self {
            user: default_user(),
            port: default_ssh_port(),
            identity_file: None,
        }
    }
}

/// Resolved SSH destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
}

impl SshTarget {
    pub fn new(host: &str, identity: &SshIdentity) -> Self {
        Self {
            host: host.to_string(),
            user: identity.user.clone(),
            port: identity.port,
            identity_file: identity.identity_file.clone(),
        }
    }

    /// `user@host`
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

impl std::fmt::Display for SshTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// How to restart the host or container backing an environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraControl {
    /// Host that controls the container (hypervisor, docker host, ...)
    pub host: String,

    #[serde(default)]
    pub ssh: SshIdentity,

    /// e.g. `pct stop 133` or `docker stop app`
    pub stop_command: String,

    /// e.g. `pct start 133` or `docker start app`
    pub start_command: String,
}

impl InfraControl {
    pub fn target(&self) -> SshTarget {
        SshTarget::new(&self.host, &self.ssh)
    }
}

/// A health-check endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Route, including the leading slash
    pub route: String,

    /// Expected status
    #[serde(default)]
    pub expect: ExpectedStatus,

    /// Port override, defaults to the environment's first port
    #[serde(default)]
    pub port: Option<u16>,
}

impl Endpoint {
    pub fn new(route: impl Into<String>, expect: ExpectedStatus) -> Self {
        Self {
            route: route.into(),
            expect,
            port: None,
        }
    }
}

/// Expected HTTP status for an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpectedStatus {
    /// Exactly this code
    Exact(u16),

    /// Any code in the class, e.g. `Class(2)` for 2xx
    Class(u16),

    /// Any 2xx or 3xx
    #[default]
    Healthy,
}

impl ExpectedStatus {
    pub fn matches(&self, status: u16) -> bool {
        match self {
            ExpectedStatus::Exact(code) => status == *code,
            ExpectedStatus::Class(class) => status / 100 == *class,
            ExpectedStatus::Healthy => (200..400).contains(&status),
        }
    }
}

impl std::fmt::Display for ExpectedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpectedStatus::Exact(code) => write!(f, "{}", code),
            ExpectedStatus::Class(class) => write!(f, "{}xx", class),
            ExpectedStatus::Healthy => f.write_str("healthy"),
        }
    }
}

impl std::str::FromStr for ExpectedStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s == "healthy" || s == "ok" {
            return Ok(ExpectedStatus::Healthy);
        }
        if let Some(class) = s.strip_suffix("xx") {
            return match class.parse::<u16>() {
                Ok(c) if (1..=5).contains(&c) => Ok(ExpectedStatus::Class(c)),
                _ => Err(format!("Invalid status class: {}", s)),
            };
        }
        match s.parse::<u16>() {
            Ok(code) if (100..600).contains(&code) => Ok(ExpectedStatus::Exact(code)),
            _ => Err(format!("Invalid expected status: {}", s)),
        }
    }
}

impl Serialize for ExpectedStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            ExpectedStatus::Exact(code) => serializer.serialize_u16(*code),
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for ExpectedStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Code(u16),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Code(code) => Ok(ExpectedStatus::Exact(code)),
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}
