use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Wf2RoError;
use crate::pipe;
use crate::registry::{DEFAULT_MAX_ACTIVE, DEFAULT_MAX_FINISHED, RegistryLimits};

pub const DEFAULT_CONFIG_FILE: &str = "wf2ro.json";
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";
const DEFAULT_FINISHED_TTL_SECS: u64 = 600;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Configuration file as written; every field may be omitted.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub bind: Option<String>,
    #[serde(default)]
    pub max_active_jobs: Option<usize>,
    #[serde(default)]
    pub max_finished_jobs: Option<usize>,
    #[serde(default)]
    pub finished_ttl_secs: Option<u64>,
    #[serde(default)]
    pub http_timeout_secs: Option<u64>,
    #[serde(default)]
    pub pipe_capacity: Option<usize>,
    #[serde(default)]
    pub public_base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub bind: SocketAddr,
    pub max_active_jobs: usize,
    pub max_finished_jobs: usize,
    pub finished_ttl_secs: u64,
    pub http_timeout_secs: u64,
    pub pipe_capacity: usize,
    pub public_base_url: Option<Url>,
}

impl ServiceConfig {
    pub fn registry_limits(&self) -> RegistryLimits {
        RegistryLimits {
            max_active: self.max_active_jobs,
            max_finished: self.max_finished_jobs,
            finished_ttl: Duration::from_secs(self.finished_ttl_secs),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_active_jobs: DEFAULT_MAX_ACTIVE,
            max_finished_jobs: DEFAULT_MAX_FINISHED,
            finished_ttl_secs: DEFAULT_FINISHED_TTL_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            pipe_capacity: pipe::DEFAULT_CAPACITY,
            public_base_url: None,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `wf2ro.json` when no path is given. A missing default
    /// file yields the defaults; a missing explicit file is an error.
    pub fn resolve(path: Option<&str>) -> Result<ServiceConfig, Wf2RoError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(ServiceConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| Wf2RoError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| Wf2RoError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ServiceConfig, Wf2RoError> {
        let defaults = ServiceConfig::default();

        let bind = match config.bind {
            Some(bind) => bind
                .parse()
                .map_err(|err| Wf2RoError::ConfigParse(format!("bind {bind}: {err}")))?,
            None => defaults.bind,
        };
        let public_base_url = config
            .public_base_url
            .map(|url| {
                Url::parse(&url)
                    .map_err(|err| Wf2RoError::ConfigParse(format!("public_base_url {url}: {err}")))
            })
            .transpose()?;

        let max_active_jobs = config.max_active_jobs.unwrap_or(defaults.max_active_jobs);
        if max_active_jobs == 0 {
            return Err(Wf2RoError::ConfigParse(
                "max_active_jobs must be at least 1".to_string(),
            ));
        }

        Ok(ServiceConfig {
            bind,
            max_active_jobs,
            max_finished_jobs: config.max_finished_jobs.unwrap_or(defaults.max_finished_jobs),
            finished_ttl_secs: config.finished_ttl_secs.unwrap_or(defaults.finished_ttl_secs),
            http_timeout_secs: config.http_timeout_secs.unwrap_or(defaults.http_timeout_secs),
            pipe_capacity: config.pipe_capacity.unwrap_or(defaults.pipe_capacity).max(1),
            public_base_url,
        })
    }
}
