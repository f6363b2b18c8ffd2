use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::MergeError;
use crate::fetch::{DEFAULT_RETRIES, DEFAULT_TIMEOUT};
use crate::scratch::DEFAULT_RETENTION;

pub const CONFIG_FILE_NAME: &str = "docmerge.json";
pub const BIND_ADDR_ENV: &str = "DOCMERGE_BIND_ADDR";
pub const SCRATCH_DIR_ENV: &str = "DOCMERGE_SCRATCH_DIR";

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);
const FALLBACK_SCRATCH_DIR: &str = "docmerge-scratch";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub bind_addr: Option<String>,
    #[serde(default)]
    pub scratch_dir: Option<String>,
    #[serde(default)]
    pub retention_secs: Option<u64>,
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,
    #[serde(default)]
    pub fetch_retries: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub bind_addr: SocketAddr,
    pub scratch_dir: Utf8PathBuf,
    pub retention: Duration,
    pub sweep_interval: Duration,
    pub fetch_timeout: Duration,
    pub fetch_retries: usize,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `docmerge.json` from the working directory when it
    /// exists, then applies environment overrides.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, MergeError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE_NAME),
        };

        let mut config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| MergeError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| MergeError::ConfigParse(err.to_string()))?
        };

        if let Ok(bind_addr) = std::env::var(BIND_ADDR_ENV) {
            if !bind_addr.trim().is_empty() {
                config.bind_addr = Some(bind_addr.trim().to_string());
            }
        }
        if let Ok(scratch_dir) = std::env::var(SCRATCH_DIR_ENV) {
            if !scratch_dir.trim().is_empty() {
                config.scratch_dir = Some(scratch_dir.trim().to_string());
            }
        }

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, MergeError> {
        let bind_addr = config
            .bind_addr
            .as_deref()
            .unwrap_or(DEFAULT_BIND_ADDR)
            .parse::<SocketAddr>()
            .map_err(|err| MergeError::ConfigParse(format!("bind_addr: {err}")))?;

        Ok(ResolvedConfig {
            bind_addr,
            scratch_dir: resolve_scratch_dir(config.scratch_dir.as_deref())?,
            retention: config
                .retention_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETENTION),
            sweep_interval: config
                .sweep_interval_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_SWEEP_INTERVAL),
            fetch_timeout: config
                .fetch_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
            fetch_retries: config.fetch_retries.unwrap_or(DEFAULT_RETRIES),
        })
    }
}

/// The configured scratch directory if it can be created, otherwise a
/// subdirectory of the system temp directory.
pub fn resolve_scratch_dir(configured: Option<&str>) -> Result<Utf8PathBuf, MergeError> {
    match configured.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => {
            let path = Utf8PathBuf::from(value);
            match fs::create_dir_all(path.as_std_path()) {
                Ok(()) => return Ok(path),
                Err(err) => warn!(
                    "scratch directory {path} is unusable ({err}), falling back to system temp"
                ),
            }
        }
        None => info!("scratch directory not configured, using system temp"),
    }

    let fallback = std::env::temp_dir().join(FALLBACK_SCRATCH_DIR);
    Utf8PathBuf::from_path_buf(fallback)
        .map_err(|_| MergeError::Filesystem("non-utf8 system temp directory".to_string()))
}
