//! Per-session state.
//!
//! A [`Session`] belongs to one signed-in user. It holds everything that is
//! local to that user's view: the handles of files uploaded in this session,
//! the optimistic list of in-flight uploads, the ids under analysis or
//! pending deletion, the latest authoritative snapshot from the metadata
//! feed, and queued alerts. Nothing here is shared between sessions.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use cloudvault_core::models::FileRecord;
use cloudvault_core::reconcile::{matches_query, merge};

/// The signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
    pub email: Option<String>,
}

/// Content of a file uploaded during this session.
#[derive(Debug, Clone)]
pub struct CachedFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Arc<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Must be acknowledged before the user continues.
    Blocking,
    NonBlocking,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub severity: Severity,
    pub message: String,
}

#[derive(Default)]
struct SessionState {
    cache: HashMap<String, CachedFile>,
    uploading: Vec<FileRecord>,
    analyzing: HashSet<String>,
    pending_deletion: HashSet<String>,
    authoritative: Vec<FileRecord>,
    alerts: Vec<Alert>,
}

pub struct Session {
    identity: Identity,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            state: Mutex::new(SessionState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn owner_id(&self) -> &str {
        &self.identity.user_id
    }

    // ============ File cache ============

    pub fn cache_file(&self, id: &str, file: CachedFile) {
        self.state().cache.insert(id.to_string(), file);
    }

    pub fn cached_file(&self, id: &str) -> Option<CachedFile> {
        self.state().cache.get(id).cloned()
    }

    pub fn forget_file(&self, id: &str) {
        self.state().cache.remove(id);
    }

    // ============ Optimistic uploads ============

    /// Put a batch at the head of the uploading list, keeping batch order.
    pub fn begin_uploads(&self, records: &[FileRecord]) {
        let mut state = self.state();
        let mut uploading = records.to_vec();
        uploading.append(&mut state.uploading);
        state.uploading = uploading;
    }

    pub fn finish_upload(&self, id: &str) {
        self.state().uploading.retain(|r| r.id != id);
    }

    pub fn uploading(&self) -> Vec<FileRecord> {
        self.state().uploading.clone()
    }

    // ============ Analysis ============

    /// Mark `id` as analyzing. Returns `false` if it already was.
    pub fn begin_analysis(&self, id: &str) -> bool {
        self.state().analyzing.insert(id.to_string())
    }

    pub fn end_analysis(&self, id: &str) {
        self.state().analyzing.remove(id);
    }

    pub fn is_analyzing(&self, id: &str) -> bool {
        self.state().analyzing.contains(id)
    }

    // ============ Deletion ============

    /// Hide `id` from the visible list. Returns `false` if already hidden.
    pub fn hide(&self, id: &str) -> bool {
        self.state().pending_deletion.insert(id.to_string())
    }

    pub fn unhide(&self, id: &str) {
        self.state().pending_deletion.remove(id);
    }

    // ============ Snapshots ============

    /// Replace the authoritative list with a fresh feed snapshot.
    pub fn apply_snapshot(&self, snapshot: Vec<FileRecord>) {
        self.state().authoritative = snapshot;
    }

    /// The list the user sees: optimistic entries over authoritative ones,
    /// without rows pending deletion, with the analyzing flag applied, and
    /// filtered by `query` over name and summary.
    pub fn visible_files(&self, query: &str) -> Vec<FileRecord> {
        let state = self.state();
        merge(&state.uploading, &state.authoritative)
            .into_iter()
            .filter(|r| !state.pending_deletion.contains(&r.id))
            .map(|mut r| {
                r.is_analyzing = state.analyzing.contains(&r.id);
                r
            })
            .filter(|r| matches_query(r, query))
            .collect()
    }

    // ============ Alerts ============

    pub fn alert(&self, severity: Severity, message: impl Into<String>) {
        self.state().alerts.push(Alert {
            severity,
            message: message.into(),
        });
    }

    pub fn drain_alerts(&self) -> Vec<Alert> {
        std::mem::take(&mut self.state().alerts)
    }

    /// Drop every cache and list, as on logout.
    pub fn clear(&self) {
        *self.state() = SessionState::default();
    }
}
