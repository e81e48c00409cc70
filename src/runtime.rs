//! Wiring from configuration to collaborators.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use cloudvault_core::liveness::LivenessPolicy;
use cloudvault_core::models::ChatUser;
use cloudvault_core::store::BlobStore;

use crate::blob_fs::FsBlobStore;
use crate::blob_s3::S3BlobStore;
use crate::config::Config;
use crate::fetch::{HttpFetcher, Retrieval};
use crate::pipeline::Vault;
use crate::session::{Identity, Session};
use crate::sqlite_store::SqliteStore;
use crate::summarize::{create_summarizer, DisabledSummarizer, Summarizer};

/// Everything a command or the server needs, built once from config.
pub struct Runtime {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub vault: Vault,
    pub policy: LivenessPolicy,
}

impl Runtime {
    pub async fn open(config: &Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(config).await?);

        let blobs: Arc<dyn BlobStore> = match config.blob.backend.as_str() {
            "s3" => {
                let s3 = config
                    .blob
                    .s3
                    .clone()
                    .context("blob.s3 section required when blob.backend = \"s3\"")?;
                Arc::new(S3BlobStore::new(s3)?)
            }
            _ => Arc::new(FsBlobStore::new(config.blob_root()).await?),
        };

        // A missing API key should not block commands that never summarize.
        let summarizer: Arc<dyn Summarizer> = match create_summarizer(&config.summarizer) {
            Ok(summarizer) => summarizer,
            Err(e) => {
                warn!(error = %e, "summarizer unavailable, analysis disabled");
                Arc::new(DisabledSummarizer)
            }
        };
        let policy = config.devices.policy();
        if policy.tolerated_missed_beats() == 0 {
            warn!(
                online_threshold_secs = config.devices.online_threshold_secs,
                heartbeat_interval_secs = config.devices.heartbeat_interval_secs,
                "online threshold tolerates no missed heartbeat"
            );
        }
        info!(
            blob_backend = %config.blob.backend,
            summarizer = summarizer.model_name(),
            tolerated_missed_beats = policy.tolerated_missed_beats(),
            "runtime ready"
        );

        let fetcher = Arc::new(HttpFetcher::new(config.fetch.timeout_secs)?);
        let vault = Vault::new(
            store.clone(),
            blobs,
            summarizer,
            fetcher,
            Retrieval::new(config.fetch.proxy()),
        );

        Ok(Self {
            config: config.clone(),
            store,
            vault,
            policy,
        })
    }

    /// A fresh session for the configured CLI identity.
    pub fn cli_session(&self) -> Session {
        let identity = &self.config.identity;
        Session::new(Identity {
            user_id: identity.user_id.clone(),
            display_name: identity.display_name.clone(),
            email: identity.email.clone(),
        })
    }
}

/// The public chat profile of a session's user.
pub fn chat_user(identity: &Identity) -> ChatUser {
    ChatUser {
        uid: identity.user_id.clone(),
        email: identity.email.clone().unwrap_or_default(),
        name: identity.display_name.clone(),
    }
}
