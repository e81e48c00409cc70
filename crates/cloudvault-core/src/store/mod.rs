//! Collaborator contracts for CloudVault.
//!
//! The metadata store, blob store, device registry, print queue and message
//! store are all external services. These traits describe exactly the
//! operations the application relies on, so that backends (SQLite, S3,
//! in-memory) are interchangeable.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::live::Subscription;
use crate::models::{ChatUser, Conversation, DeviceRecord, FileRecord, PrintJob, UserMessage};
use crate::record::{FileDocument, FilePatch};

/// Size of the message read window: the most recent N messages.
pub const MESSAGE_WINDOW: usize = 100;

/// Owner-scoped file metadata documents.
///
/// Documents are addressed by the application-level file id, which is
/// distinct from whatever native key the backend uses.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert`](MetadataStore::insert) | Persist a new document |
/// | [`update`](MetadataStore::update) | Apply a patch by app id |
/// | [`find`](MetadataStore::find) | Fetch one document by app id |
/// | [`remove`](MetadataStore::remove) | Delete by app id |
/// | [`list_for_owner`](MetadataStore::list_for_owner) | One-shot owner query |
/// | [`subscribe`](MetadataStore::subscribe) | Live owner query |
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn insert(&self, doc: &FileDocument) -> Result<()>;

    /// Returns `false` when no document carries `id`. Empty patches are not
    /// written.
    async fn update(&self, id: &str, patch: &FilePatch) -> Result<bool>;

    async fn find(&self, id: &str) -> Result<Option<FileDocument>>;

    /// Returns the removed document, or `None` when it was already gone.
    async fn remove(&self, id: &str) -> Result<Option<FileDocument>>;

    /// All of an owner's files, newest upload first.
    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>>;

    /// Live view of [`list_for_owner`](MetadataStore::list_for_owner).
    async fn subscribe(&self, owner_id: &str) -> Result<Subscription<FileRecord>>;
}

/// Binary object storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` at `path` and return a stable retrieval URL.
    async fn put(&self, path: &str, bytes: &[u8], mime_type: &str) -> Result<String>;

    /// Remove the object at `path`. Errors when it does not exist.
    async fn delete(&self, path: &str) -> Result<()>;
}

/// Registry of remote print agents. Agents write; we read and delete.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn list(&self) -> Result<Vec<DeviceRecord>>;
    async fn remove(&self, device_id: &str) -> Result<()>;
}

/// Work queue consumed by remote print agents. Insert-only from here.
#[async_trait]
pub trait PrintQueue: Send + Sync {
    /// Returns the queue's id for the new job.
    async fn enqueue(&self, job: &PrintJob) -> Result<String>;
}

/// Human-to-human messaging documents.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Create or refresh a user's public profile.
    async fn upsert_user(&self, user: &ChatUser) -> Result<()>;

    /// Exact email match.
    async fn find_users_by_email(&self, email: &str) -> Result<Vec<ChatUser>>;

    /// Create the conversation or merge participant details into it.
    /// Existing last-message fields are kept.
    async fn merge_conversation(&self, conversation: &Conversation) -> Result<()>;

    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>>;

    /// Append a message; the store stamps `sent_at` and assigns the id.
    async fn append_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        text: &str,
    ) -> Result<UserMessage>;

    /// Update the denormalized last-message fields used for list ordering.
    async fn set_last_message(&self, conversation_id: &str, message: &UserMessage) -> Result<()>;

    /// Conversations including `user_id`, most recent activity first.
    async fn subscribe_conversations(&self, user_id: &str) -> Result<Subscription<Conversation>>;

    /// The last [`MESSAGE_WINDOW`] messages, oldest first.
    async fn subscribe_messages(&self, conversation_id: &str) -> Result<Subscription<UserMessage>>;
}

/// Sort files for display: newest upload first.
pub fn sort_newest_first(files: &mut [FileRecord]) {
    files.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
}

/// Sort conversations by last activity, newest first.
pub fn sort_by_activity(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| b.activity_at().cmp(&a.activity_at()));
}

/// Keep the newest `MESSAGE_WINDOW` messages of an ascending list.
pub fn message_window(mut messages: Vec<UserMessage>) -> Vec<UserMessage> {
    if messages.len() > MESSAGE_WINDOW {
        messages.drain(..messages.len() - MESSAGE_WINDOW);
    }
    messages
}
