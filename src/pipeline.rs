//! Upload, analyze and delete.
//!
//! [`Vault`] ties the session to its collaborators. Every operation leaves
//! the session re-attemptable: failures roll back the optimistic state they
//! introduced and queue an [`Alert`](crate::session::Alert) instead of
//! aborting anything else in flight.
//!
//! # Upload
//!
//! ```text
//! files ──► optimistic records (head of uploading list)
//!        └► per file, concurrently:
//!             blob put ──► metadata insert ──► optimistic entry removed
//!             any failure ──► optimistic entry removed + blocking alert
//! ```
//!
//! # Analyze
//!
//! On demand only. An existing summary is returned as-is; otherwise the
//! content is retrieved (session cache, direct URL, proxy), summarized, and
//! the summary patched onto the stored document.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cloudvault_core::ids::{blob_path, new_file_id};
use cloudvault_core::models::{FileKind, FileRecord};
use cloudvault_core::record::{FileDocument, FilePatch};
use cloudvault_core::store::{BlobStore, MetadataStore};

use crate::errors::VaultError;
use crate::fetch::{ContentFetcher, Retrieval};
use crate::session::{CachedFile, Session, Severity};
use crate::summarize::{summarize_content, Summarizer};

pub const ANALYSIS_FAILED_ALERT: &str = "Could not analyze this file. If you just reloaded, \
     upload it again to enable immediate analysis.";

pub const DELETE_FAILED_ALERT: &str = "Error deleting file. Please try again.";

/// A file selected for upload.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Outcome of one file in a batch.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<FileRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadReport {
    pub fn is_success(&self) -> bool {
        self.record.is_some()
    }
}

pub struct Vault {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    summarizer: Arc<dyn Summarizer>,
    fetcher: Arc<dyn ContentFetcher>,
    retrieval: Retrieval,
    last_path_stamp: AtomicI64,
}

impl Vault {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        summarizer: Arc<dyn Summarizer>,
        fetcher: Arc<dyn ContentFetcher>,
        retrieval: Retrieval,
    ) -> Self {
        Self {
            metadata,
            blobs,
            summarizer,
            fetcher,
            retrieval,
            last_path_stamp: AtomicI64::new(i64::MIN),
        }
    }

    /// Millisecond stamp for a blob path, strictly increasing across this
    /// vault's uploads so files with the same name never share an object.
    fn path_stamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let now_ms = now.timestamp_millis();
        let next = |last: i64| last.max(now_ms - 1) + 1;
        let last = match self
            .last_path_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(next(last)))
        {
            Ok(last) | Err(last) => last,
        };
        DateTime::from_timestamp_millis(next(last)).unwrap_or(now)
    }

    /// Replace the session's authoritative list with a one-shot query.
    pub async fn refresh(&self, session: &Session) -> anyhow::Result<()> {
        let files = self.metadata.list_for_owner(session.owner_id()).await?;
        session.apply_snapshot(files);
        Ok(())
    }

    /// Keep the session's authoritative list in step with the owner's live
    /// feed until the store goes away.
    pub async fn sync(&self, session: Arc<Session>) -> anyhow::Result<JoinHandle<()>> {
        let mut feed = self.metadata.subscribe(session.owner_id()).await?;
        session.apply_snapshot(feed.current());

        Ok(tokio::spawn(async move {
            while let Some(snapshot) = feed.next().await {
                debug!(owner = %session.owner_id(), files = snapshot.len(), "snapshot applied");
                session.apply_snapshot(snapshot);
            }
        }))
    }

    pub async fn upload_batch(&self, session: &Session, files: Vec<NewFile>) -> Vec<UploadReport> {
        let now = Utc::now();
        let identity = session.identity();

        let mut pending = Vec::with_capacity(files.len());
        for file in files {
            let id = new_file_id(now);
            let record = FileRecord {
                id: id.clone(),
                name: file.name.clone(),
                size: file.bytes.len() as u64,
                kind: FileKind::from_mime(&file.mime_type),
                mime_type: file.mime_type.clone(),
                url: format!("session://{}", id),
                uploaded_at: now,
                uploader: identity.display_name.clone(),
                ai_summary: None,
                is_analyzing: false,
            };
            let cached = CachedFile {
                name: file.name,
                mime_type: file.mime_type,
                bytes: Arc::new(file.bytes),
            };
            session.cache_file(&id, cached.clone());
            let path = blob_path(session.owner_id(), self.path_stamp(now), &record.name);
            pending.push((record, cached, path));
        }

        let records: Vec<FileRecord> = pending.iter().map(|(r, _, _)| r.clone()).collect();
        session.begin_uploads(&records);
        info!(owner = %session.owner_id(), files = records.len(), "upload batch started");

        let uploads = pending
            .into_iter()
            .map(|(record, cached, path)| self.upload_one(session, record, cached, path));
        join_all(uploads).await
    }

    async fn upload_one(
        &self,
        session: &Session,
        record: FileRecord,
        cached: CachedFile,
        path: String,
    ) -> UploadReport {
        let result = self.persist(session.owner_id(), &record, &cached, &path).await;
        session.finish_upload(&record.id);

        match result {
            Ok(doc) => {
                info!(id = %record.id, name = %record.name, "upload stored");
                UploadReport {
                    id: record.id,
                    name: record.name,
                    record: Some(doc.record),
                    error: None,
                }
            }
            Err(e) => {
                warn!(id = %record.id, name = %record.name, error = %e, "upload failed");
                session.forget_file(&record.id);
                session.alert(
                    Severity::Blocking,
                    format!("Error uploading {}", record.name),
                );
                UploadReport {
                    id: record.id,
                    name: record.name,
                    record: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn persist(
        &self,
        owner_id: &str,
        record: &FileRecord,
        cached: &CachedFile,
        path: &str,
    ) -> Result<FileDocument, VaultError> {
        let upload_error = |message: String| VaultError::Upload {
            name: record.name.clone(),
            message,
        };

        let url = self
            .blobs
            .put(path, &cached.bytes, &cached.mime_type)
            .await
            .map_err(|e| upload_error(format!("{:#}", e)))?;

        let doc = FileDocument::new(record, owner_id, path, &url, Utc::now())?;
        if let Err(e) = self.metadata.insert(&doc).await {
            if let Err(cleanup) = self.blobs.delete(path).await {
                warn!(path = %path, error = %cleanup, "orphaned blob left behind");
            }
            return Err(upload_error(format!("{:#}", e)));
        }
        Ok(doc)
    }

    /// Summarize one of the session owner's files on demand. Idempotent: a
    /// stored summary is returned without contacting the model.
    ///
    /// The record is always read from the metadata store, so a summary
    /// written after the session's last snapshot is still found.
    pub async fn request_summary(&self, session: &Session, id: &str) -> Result<String, VaultError> {
        let record = self
            .metadata
            .find(id)
            .await
            .map_err(|e| analysis_error(id, e))?
            .filter(|doc| doc.owner_id == session.owner_id())
            .map(|doc| doc.record)
            .ok_or_else(|| VaultError::not_found("file", id))?;

        if let Some(summary) = record.ai_summary {
            debug!(id, "summary already present");
            return Ok(summary);
        }

        if !session.begin_analysis(id) {
            return Err(VaultError::InvalidInput(format!(
                "{} is already being analyzed",
                id
            )));
        }
        let result = self.analyze(session, &record).await;
        session.end_analysis(id);

        match result {
            Ok(summary) => {
                info!(id, "summary stored");
                Ok(summary)
            }
            Err(e) => {
                warn!(id, error = %e, "analysis failed");
                session.alert(Severity::NonBlocking, ANALYSIS_FAILED_ALERT);
                Err(match e {
                    VaultError::Analysis { .. } => e,
                    other => analysis_error(id, other),
                })
            }
        }
    }

    async fn analyze(&self, session: &Session, record: &FileRecord) -> Result<String, VaultError> {
        let cached = session.cached_file(&record.id);
        let mime_type = cached
            .as_ref()
            .map(|c| c.mime_type.clone())
            .unwrap_or_else(|| record.mime_type.clone());

        let bytes = self
            .retrieval
            .retrieve(
                self.fetcher.as_ref(),
                cached.as_ref().map(|c| c.bytes.as_slice()),
                &record.url,
            )
            .await?;

        let summary = summarize_content(self.summarizer.as_ref(), &bytes, &mime_type)
            .await
            .map_err(|e| analysis_error(&record.id, e))?;

        let updated = self
            .metadata
            .update(&record.id, &FilePatch::summary(summary.clone()))
            .await
            .map_err(|e| analysis_error(&record.id, e))?;
        if !updated {
            return Err(VaultError::not_found("file", &record.id));
        }
        Ok(summary)
    }

    /// Delete a file's content and metadata.
    ///
    /// The row is hidden first. A missing blob is tolerated; a metadata
    /// failure brings the row back and queues a blocking alert.
    pub async fn delete_file(&self, session: &Session, id: &str) -> Result<(), VaultError> {
        session.hide(id);

        let doc = match self.metadata.find(id).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                session.unhide(id);
                return Err(VaultError::not_found("file", id));
            }
            Err(e) => return Err(self.restore(session, id, e)),
        };
        if doc.owner_id != session.owner_id() {
            session.unhide(id);
            return Err(VaultError::not_found("file", id));
        }

        if let Err(e) = self.blobs.delete(&doc.storage_path).await {
            warn!(id, path = %doc.storage_path, error = %e, "blob already gone, continuing");
        }

        if let Err(e) = self.metadata.remove(id).await {
            return Err(self.restore(session, id, e));
        }

        session.forget_file(id);
        info!(id, "file deleted");
        Ok(())
    }

    fn restore(&self, session: &Session, id: &str, error: anyhow::Error) -> VaultError {
        warn!(id, error = %error, "delete failed, restoring row");
        session.unhide(id);
        session.alert(Severity::Blocking, DELETE_FAILED_ALERT);
        VaultError::Delete {
            file_id: id.to_string(),
            message: format!("{:#}", error),
        }
    }
}

fn analysis_error(id: &str, error: impl std::fmt::Display) -> VaultError {
    VaultError::Analysis {
        file_id: id.to_string(),
        message: error.to_string(),
    }
}
