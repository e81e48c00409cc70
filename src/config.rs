//! TOML configuration parsing and validation.
//!
//! ```toml
//! [db]
//! path = "./data/vault.sqlite"
//!
//! [blob]
//! backend = "local"            # or "s3"
//! root = "./data/blobs"
//!
//! [summarizer]
//! provider = "gemini"          # or "disabled"
//! model = "gemini-2.5-flash"
//!
//! [fetch]
//! proxy_url = "https://api.allorigins.win/raw"
//!
//! [devices]
//! online_threshold_secs = 150
//! heartbeat_interval_secs = 60
//!
//! [identity]
//! user_id = "uid-123"
//! display_name = "Ana"
//!
//! [server]
//! bind = "127.0.0.1:7340"
//! ```
//!
//! Secrets are never read from this file: see [`crate::blob_s3`] and
//! [`crate::summarize`] for the environment variables they use.

use anyhow::{bail, Context, Result};
use cloudvault_core::liveness::LivenessPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub blob: BlobConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub devices: DevicesConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BlobConfig {
    #[serde(default = "default_blob_backend")]
    pub backend: String,
    /// Root directory for the `local` backend.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub s3: Option<S3BlobConfig>,
}

fn default_blob_backend() -> String {
    "local".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3BlobConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Key prefix prepended to every blob path.
    #[serde(default)]
    pub prefix: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Public base URL for objects; defaults to the virtual-hosted bucket URL.
    #[serde(default)]
    pub public_base_url: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummarizerConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl SummarizerConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    /// CORS relay used when a direct fetch of a stored file fails.
    /// Set to an empty string to disable the proxy stage.
    #[serde(default = "default_proxy_url")]
    pub proxy_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            proxy_url: default_proxy_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl FetchConfig {
    pub fn proxy(&self) -> Option<&str> {
        let url = self.proxy_url.trim();
        (!url.is_empty()).then_some(url)
    }
}

fn default_proxy_url() -> String {
    "https://api.allorigins.win/raw".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DevicesConfig {
    #[serde(default = "default_online_threshold")]
    pub online_threshold_secs: i64,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: i64,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            online_threshold_secs: default_online_threshold(),
            heartbeat_interval_secs: default_heartbeat_interval(),
        }
    }
}

impl DevicesConfig {
    pub fn policy(&self) -> LivenessPolicy {
        LivenessPolicy::new(
            chrono::Duration::seconds(self.online_threshold_secs),
            chrono::Duration::seconds(self.heartbeat_interval_secs),
        )
    }
}

fn default_online_threshold() -> i64 {
    150
}
fn default_heartbeat_interval() -> i64 {
    60
}

/// The user the CLI acts as. Authentication is handled elsewhere.
#[derive(Debug, Deserialize, Clone)]
pub struct IdentityConfig {
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_display_name")]
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            display_name: default_display_name(),
            email: None,
        }
    }
}

fn default_user_id() -> String {
    "local".to_string()
}
fn default_display_name() -> String {
    "Unknown".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

impl Config {
    /// Blob root for the local backend, defaulting next to the database.
    pub fn blob_root(&self) -> PathBuf {
        self.blob.root.clone().unwrap_or_else(|| {
            self.db
                .path
                .parent()
                .map(|p| p.join("blobs"))
                .unwrap_or_else(|| PathBuf::from("blobs"))
        })
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    match config.blob.backend.as_str() {
        "local" => {}
        "s3" => {
            if config.blob.s3.is_none() {
                bail!("blob.s3 section required when blob.backend = \"s3\"");
            }
        }
        other => bail!(
            "Unknown blob backend: '{}'. Must be local or s3.",
            other
        ),
    }

    match config.summarizer.provider.as_str() {
        "disabled" | "gemini" => {}
        other => bail!(
            "Unknown summarizer provider: '{}'. Must be disabled or gemini.",
            other
        ),
    }
    if config.summarizer.is_enabled() && config.summarizer.model.trim().is_empty() {
        bail!("summarizer.model must be specified when provider is enabled");
    }

    if config.devices.heartbeat_interval_secs <= 0 {
        bail!("devices.heartbeat_interval_secs must be > 0");
    }
    if config.devices.online_threshold_secs <= config.devices.heartbeat_interval_secs {
        bail!("devices.online_threshold_secs must exceed devices.heartbeat_interval_secs");
    }

    if config.identity.user_id.trim().is_empty() {
        bail!("identity.user_id must not be empty");
    }

    Ok(())
}
