//! In-memory collaborator implementations for testing and embedding.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Live queries are
//! re-evaluated after every write and published as full snapshots.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::live::{LiveFeeds, Subscription};
use crate::models::{ChatUser, Conversation, DeviceRecord, FileRecord, PrintJob, UserMessage};
use crate::record::{FileDocument, FilePatch};

use super::{
    message_window, sort_by_activity, sort_newest_first, BlobStore, DeviceRegistry,
    MessageStore, MetadataStore, PrintQueue,
};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

// ═══════════════════════════════════════════════════════════════════════
// Metadata
// ═══════════════════════════════════════════════════════════════════════

/// In-memory metadata store. Insertion order is kept so that documents with
/// equal upload times still list deterministically.
pub struct InMemoryMetadataStore {
    docs: RwLock<Vec<FileDocument>>,
    feeds: LiveFeeds<String, FileRecord>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(Vec::new()),
            feeds: LiveFeeds::new(),
        }
    }

    /// Number of stored documents across all owners.
    pub fn len(&self) -> usize {
        read(&self.docs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self, owner_id: &str) -> Vec<FileRecord> {
        let mut files: Vec<FileRecord> = read(&self.docs)
            .iter()
            .filter(|d| d.owner_id == owner_id)
            .map(|d| d.record.clone())
            .collect();
        sort_newest_first(&mut files);
        files
    }

    fn refresh(&self, owner_id: &str) {
        self.feeds.publish(&owner_id.to_string(), self.snapshot(owner_id));
    }
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn insert(&self, doc: &FileDocument) -> Result<()> {
        doc.validate()?;
        {
            let mut docs = write(&self.docs);
            if docs.iter().any(|d| d.id() == doc.id()) {
                bail!("file {} already exists", doc.id());
            }
            docs.push(doc.clone());
        }
        self.refresh(&doc.owner_id);
        Ok(())
    }

    async fn update(&self, id: &str, patch: &FilePatch) -> Result<bool> {
        patch.validate()?;
        let owner = {
            let mut docs = write(&self.docs);
            let Some(doc) = docs.iter_mut().find(|d| d.id() == id) else {
                return Ok(false);
            };
            if patch.is_empty() {
                return Ok(true);
            }
            patch.apply_to(doc);
            doc.owner_id.clone()
        };
        self.refresh(&owner);
        Ok(true)
    }

    async fn find(&self, id: &str) -> Result<Option<FileDocument>> {
        Ok(read(&self.docs).iter().find(|d| d.id() == id).cloned())
    }

    async fn remove(&self, id: &str) -> Result<Option<FileDocument>> {
        let removed = {
            let mut docs = write(&self.docs);
            let pos = docs.iter().position(|d| d.id() == id);
            pos.map(|pos| docs.remove(pos))
        };
        if let Some(doc) = &removed {
            self.refresh(&doc.owner_id);
        }
        Ok(removed)
    }

    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>> {
        Ok(self.snapshot(owner_id))
    }

    async fn subscribe(&self, owner_id: &str) -> Result<Subscription<FileRecord>> {
        Ok(self
            .feeds
            .subscribe(&owner_id.to_string(), self.snapshot(owner_id)))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Blobs
// ═══════════════════════════════════════════════════════════════════════

/// In-memory blob store handing out `mem://` URLs.
#[derive(Default)]
pub struct InMemoryBlobStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url_for(path: &str) -> String {
        format!("mem://{}", path)
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        read(&self.objects).get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        read(&self.objects).contains_key(path)
    }

    pub fn len(&self) -> usize {
        read(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, path: &str, bytes: &[u8], _mime_type: &str) -> Result<String> {
        write(&self.objects).insert(path.to_string(), bytes.to_vec());
        Ok(Self::url_for(path))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        if write(&self.objects).remove(path).is_none() {
            bail!("object not found: {}", path);
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Devices and print queue
// ═══════════════════════════════════════════════════════════════════════

/// In-memory device registry. [`heartbeat`](Self::heartbeat) stands in for
/// the external agent.
#[derive(Default)]
pub struct InMemoryDeviceRegistry {
    devices: RwLock<Vec<DeviceRecord>>,
}

impl InMemoryDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a device record, as an agent heartbeat would.
    pub fn heartbeat(&self, record: DeviceRecord) {
        let mut devices = write(&self.devices);
        match devices.iter_mut().find(|d| d.id == record.id) {
            Some(existing) => *existing = record,
            None => devices.push(record),
        }
    }
}

#[async_trait]
impl DeviceRegistry for InMemoryDeviceRegistry {
    async fn list(&self) -> Result<Vec<DeviceRecord>> {
        Ok(read(&self.devices).clone())
    }

    async fn remove(&self, device_id: &str) -> Result<()> {
        write(&self.devices).retain(|d| d.id != device_id);
        Ok(())
    }
}

/// In-memory print queue.
#[derive(Default)]
pub struct InMemoryPrintQueue {
    jobs: RwLock<Vec<(String, PrintJob)>>,
}

impl InMemoryPrintQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<PrintJob> {
        read(&self.jobs).iter().map(|(_, j)| j.clone()).collect()
    }
}

#[async_trait]
impl PrintQueue for InMemoryPrintQueue {
    async fn enqueue(&self, job: &PrintJob) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        write(&self.jobs).push((id.clone(), job.clone()));
        Ok(id)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Messaging
// ═══════════════════════════════════════════════════════════════════════

/// In-memory message store.
pub struct InMemoryMessageStore {
    users: RwLock<HashMap<String, ChatUser>>,
    conversations: RwLock<HashMap<String, Conversation>>,
    messages: RwLock<HashMap<String, Vec<UserMessage>>>,
    conversation_feeds: LiveFeeds<String, Conversation>,
    message_feeds: LiveFeeds<String, UserMessage>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            conversations: RwLock::new(HashMap::new()),
            messages: RwLock::new(HashMap::new()),
            conversation_feeds: LiveFeeds::new(),
            message_feeds: LiveFeeds::new(),
        }
    }

    fn conversations_for(&self, user_id: &str) -> Vec<Conversation> {
        let mut list: Vec<Conversation> = read(&self.conversations)
            .values()
            .filter(|c| c.participants.iter().any(|p| p == user_id))
            .cloned()
            .collect();
        sort_by_activity(&mut list);
        list
    }

    fn messages_for(&self, conversation_id: &str) -> Vec<UserMessage> {
        let all = read(&self.messages)
            .get(conversation_id)
            .cloned()
            .unwrap_or_default();
        message_window(all)
    }

    fn refresh_participants(&self, conversation_id: &str) {
        let participants = read(&self.conversations)
            .get(conversation_id)
            .map(|c| c.participants.clone())
            .unwrap_or_default();
        for uid in participants {
            self.conversation_feeds
                .publish(&uid, self.conversations_for(&uid));
        }
    }
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn upsert_user(&self, user: &ChatUser) -> Result<()> {
        write(&self.users).insert(user.uid.clone(), user.clone());
        Ok(())
    }

    async fn find_users_by_email(&self, email: &str) -> Result<Vec<ChatUser>> {
        let mut found: Vec<ChatUser> = read(&self.users)
            .values()
            .filter(|u| u.email == email)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.uid.cmp(&b.uid));
        Ok(found)
    }

    async fn merge_conversation(&self, conversation: &Conversation) -> Result<()> {
        {
            let mut conversations = write(&self.conversations);
            match conversations.get_mut(&conversation.id) {
                Some(existing) => {
                    existing.participants = conversation.participants.clone();
                    existing
                        .participant_details
                        .extend(conversation.participant_details.clone());
                    existing.updated_at = conversation.updated_at;
                }
                None => {
                    conversations.insert(conversation.id.clone(), conversation.clone());
                }
            }
        }
        self.refresh_participants(&conversation.id);
        Ok(())
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        Ok(read(&self.conversations).get(conversation_id).cloned())
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        text: &str,
    ) -> Result<UserMessage> {
        let message = UserMessage {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            text: text.to_string(),
            sent_at: Utc::now(),
        };
        write(&self.messages)
            .entry(conversation_id.to_string())
            .or_default()
            .push(message.clone());
        self.message_feeds.publish(
            &conversation_id.to_string(),
            self.messages_for(conversation_id),
        );
        Ok(message)
    }

    async fn set_last_message(&self, conversation_id: &str, message: &UserMessage) -> Result<()> {
        {
            let mut conversations = write(&self.conversations);
            let Some(conversation) = conversations.get_mut(conversation_id) else {
                bail!("conversation not found: {}", conversation_id);
            };
            conversation.last_message = Some(message.text.clone());
            conversation.last_message_at = Some(message.sent_at);
        }
        self.refresh_participants(conversation_id);
        Ok(())
    }

    async fn subscribe_conversations(&self, user_id: &str) -> Result<Subscription<Conversation>> {
        Ok(self
            .conversation_feeds
            .subscribe(&user_id.to_string(), self.conversations_for(user_id)))
    }

    async fn subscribe_messages(&self, conversation_id: &str) -> Result<Subscription<UserMessage>> {
        Ok(self.message_feeds.subscribe(
            &conversation_id.to_string(),
            self.messages_for(conversation_id),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileKind;
    use chrono::{Duration, TimeZone};

    fn doc(id: &str, owner: &str, secs: i64) -> FileDocument {
        let record = FileRecord {
            id: id.to_string(),
            name: format!("{}.txt", id),
            size: 4,
            kind: FileKind::Document,
            mime_type: "text/plain".to_string(),
            url: "blob:preview".to_string(),
            uploaded_at: Utc.timestamp_opt(secs, 0).unwrap(),
            uploader: "Ana".to_string(),
            ai_summary: None,
            is_analyzing: false,
        };
        FileDocument::new(
            &record,
            owner,
            &format!("files/{}/{}", owner, id),
            &format!("mem://{}", id),
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_metadata_owner_scoped_newest_first() {
        let store = InMemoryMetadataStore::new();
        store.insert(&doc("old", "u1", 10)).await.unwrap();
        store.insert(&doc("new", "u1", 20)).await.unwrap();
        store.insert(&doc("other", "u2", 30)).await.unwrap();

        let files = store.list_for_owner("u1").await.unwrap();
        let ids: Vec<&str> = files.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn test_metadata_rejects_duplicate_id() {
        let store = InMemoryMetadataStore::new();
        store.insert(&doc("a", "u1", 10)).await.unwrap();
        assert!(store.insert(&doc("a", "u1", 11)).await.is_err());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_metadata_subscription_sees_writes() {
        let store = InMemoryMetadataStore::new();
        let mut sub = store.subscribe("u1").await.unwrap();
        assert!(sub.current().is_empty());

        store.insert(&doc("a", "u1", 10)).await.unwrap();
        let snapshot = sub.next().await.unwrap();
        assert_eq!(snapshot.len(), 1);

        assert!(store
            .update("a", &FilePatch::summary("four bytes"))
            .await
            .unwrap());
        let snapshot = sub.next().await.unwrap();
        assert_eq!(snapshot[0].ai_summary.as_deref(), Some("four bytes"));

        store.remove("a").await.unwrap();
        assert!(sub.next().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_returns_false() {
        let store = InMemoryMetadataStore::new();
        assert!(!store.update("nope", &FilePatch::summary("x")).await.unwrap());
    }

    #[tokio::test]
    async fn test_blob_delete_missing_errors() {
        let blobs = InMemoryBlobStore::new();
        let url = blobs.put("files/u/1_a", b"abc", "text/plain").await.unwrap();
        assert_eq!(url, "mem://files/u/1_a");
        blobs.delete("files/u/1_a").await.unwrap();
        assert!(blobs.delete("files/u/1_a").await.is_err());
    }

    #[tokio::test]
    async fn test_message_window_keeps_latest() {
        let store = InMemoryMessageStore::new();
        for i in 0..105 {
            store
                .append_message("a_b", "a", &format!("m{}", i))
                .await
                .unwrap();
        }
        let sub = store.subscribe_messages("a_b").await.unwrap();
        let msgs = sub.current();
        assert_eq!(msgs.len(), 100);
        assert_eq!(msgs[0].text, "m5");
        assert_eq!(msgs[99].text, "m104");
    }

    #[tokio::test]
    async fn test_conversations_sorted_by_activity() {
        let store = InMemoryMessageStore::new();
        let base = Utc::now();
        for (id, offset) in [("a_b", 0), ("a_c", 10)] {
            store
                .merge_conversation(&Conversation {
                    id: id.to_string(),
                    participants: id.split('_').map(String::from).collect(),
                    participant_details: Default::default(),
                    last_message: None,
                    last_message_at: None,
                    updated_at: base + Duration::seconds(offset),
                })
                .await
                .unwrap();
        }
        let sub = store.subscribe_conversations("a").await.unwrap();
        let ids: Vec<String> = sub.current().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["a_c", "a_b"]);
    }
}
