//! SQLite-backed collaborators.
//!
//! One [`SqliteStore`] implements every store contract from
//! [`cloudvault_core::store`]. Live queries are served by re-running the
//! scoped query after each write made through this handle and publishing
//! the full result set to subscribers of that scope.
//!
//! Writes made by other processes sharing the database file (print agents
//! updating `devices`, another `vault` instance) are seen by one-shot reads
//! but do not wake subscribers of this handle.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use tracing::warn;
use uuid::Uuid;

use cloudvault_core::live::{LiveFeeds, Subscription};
use cloudvault_core::models::{
    ChatUser, Conversation, DeviceRecord, FileRecord, PrintJob, UserMessage,
};
use cloudvault_core::record::{FileDocument, FilePatch};
use cloudvault_core::store::{
    DeviceRegistry, MessageStore, MetadataStore, PrintQueue, MESSAGE_WINDOW,
};

use crate::config::Config;
use crate::{db, migrate};

pub struct SqliteStore {
    pool: SqlitePool,
    file_feeds: LiveFeeds<String, FileRecord>,
    conversation_feeds: LiveFeeds<String, Conversation>,
    message_feeds: LiveFeeds<String, UserMessage>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            file_feeds: LiveFeeds::new(),
            conversation_feeds: LiveFeeds::new(),
            message_feeds: LiveFeeds::new(),
        }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool)
            .await
            .context("Failed to apply database schema")?;
        Ok(Self::new(pool))
    }

    /// Write or refresh a device heartbeat document, as a print agent does.
    pub async fn record_heartbeat(&self, device: &DeviceRecord) -> Result<()> {
        if device.id.trim().is_empty() {
            bail!("device id must not be empty");
        }
        let body = serde_json::to_string(device)?;
        sqlx::query(
            r#"
            INSERT INTO devices (id, body) VALUES (?, ?)
            ON CONFLICT(id) DO UPDATE SET body = excluded.body
            "#,
        )
        .bind(&device.id)
        .bind(&body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All queued print jobs, oldest first.
    pub async fn print_jobs(&self) -> Result<Vec<(String, PrintJob)>> {
        let rows = sqlx::query(
            r#"
            SELECT id, target_device_id, target_printer_name, file_url, status, created_at
            FROM print_jobs
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let status: String = row.get("status");
                let job = PrintJob {
                    target_device_id: row.get("target_device_id"),
                    target_printer_name: row.get("target_printer_name"),
                    file_url: row.get("file_url"),
                    status: serde_json::from_value(serde_json::Value::String(status.clone()))
                        .with_context(|| format!("Unknown print job status: {}", status))?,
                    created_at: from_millis(row.get("created_at")),
                };
                Ok((row.get("id"), job))
            })
            .collect()
    }

    async fn files_for_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query(
            "SELECT body FROM files WHERE owner_id = ? ORDER BY uploaded_at DESC, doc_key DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let doc = decode_file(row.get("body"))?;
            records.push(doc.record);
        }
        Ok(records)
    }

    /// Republish the owner's files after a committed write. A failed
    /// re-query leaves subscribers on their previous snapshot; the write
    /// itself stands.
    async fn refresh_files(&self, owner_id: &str) {
        let scope = owner_id.to_string();
        if !self.file_feeds.is_watched(&scope) {
            return;
        }
        match self.files_for_owner(owner_id).await {
            Ok(snapshot) => self.file_feeds.publish(&scope, snapshot),
            Err(e) => warn!(owner = %owner_id, error = %e, "file feed not refreshed"),
        }
    }

    async fn participants(&self, conversation_id: &str) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT user_id FROM conversation_participants WHERE conversation_id = ? ORDER BY position",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn conversations_for(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT c.id FROM conversations c
            JOIN conversation_participants p ON p.conversation_id = c.id
            WHERE p.user_id = ?
            ORDER BY COALESCE(c.last_message_at, c.updated_at) DESC, c.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut conversations = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(conversation) = self.load_conversation(&id).await? {
                conversations.push(conversation);
            }
        }
        Ok(conversations)
    }

    async fn load_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            r#"
            SELECT id, details_json, last_message, last_message_at, updated_at
            FROM conversations WHERE id = ?
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let details: String = row.get("details_json");
        let participant_details: BTreeMap<String, ChatUser> = serde_json::from_str(&details)
            .with_context(|| format!("Malformed participant details in {}", conversation_id))?;
        let last_message_at: Option<i64> = row.get("last_message_at");

        Ok(Some(Conversation {
            id: row.get("id"),
            participants: self.participants(conversation_id).await?,
            participant_details,
            last_message: row.get("last_message"),
            last_message_at: last_message_at.map(from_millis),
            updated_at: from_millis(row.get("updated_at")),
        }))
    }

    async fn messages_for(&self, conversation_id: &str) -> Result<Vec<UserMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, sender_id, text, sent_at FROM (
                SELECT seq, id, sender_id, text, sent_at FROM messages
                WHERE conversation_id = ?
                ORDER BY sent_at DESC, seq DESC
                LIMIT ?
            ) ORDER BY sent_at ASC, seq ASC
            "#,
        )
        .bind(conversation_id)
        .bind(MESSAGE_WINDOW as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| UserMessage {
                id: row.get("id"),
                sender_id: row.get("sender_id"),
                text: row.get("text"),
                sent_at: from_millis(row.get("sent_at")),
            })
            .collect())
    }

    async fn refresh_conversation(&self, conversation_id: &str) {
        let participants = match self.participants(conversation_id).await {
            Ok(participants) => participants,
            Err(e) => {
                warn!(conversation = %conversation_id, error = %e, "conversation feeds not refreshed");
                return;
            }
        };
        for uid in participants {
            if !self.conversation_feeds.is_watched(&uid) {
                continue;
            }
            match self.conversations_for(&uid).await {
                Ok(snapshot) => self.conversation_feeds.publish(&uid, snapshot),
                Err(e) => warn!(user = %uid, error = %e, "conversation feed not refreshed"),
            }
        }
    }

    async fn refresh_messages(&self, conversation_id: &str) {
        let scope = conversation_id.to_string();
        if !self.message_feeds.is_watched(&scope) {
            return;
        }
        match self.messages_for(conversation_id).await {
            Ok(snapshot) => self.message_feeds.publish(&scope, snapshot),
            Err(e) => warn!(conversation = %conversation_id, error = %e, "message feed not refreshed"),
        }
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn decode_file(body: String) -> Result<FileDocument> {
    let value: serde_json::Value = serde_json::from_str(&body)?;
    Ok(FileDocument::from_json(value)?)
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn insert(&self, doc: &FileDocument) -> Result<()> {
        let body = doc.to_json()?.to_string();
        sqlx::query("INSERT INTO files (app_id, owner_id, uploaded_at, body) VALUES (?, ?, ?, ?)")
            .bind(doc.id())
            .bind(&doc.owner_id)
            .bind(doc.record.uploaded_at.timestamp_millis())
            .bind(&body)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to insert file document {}", doc.id()))?;

        self.refresh_files(&doc.owner_id).await;
        Ok(())
    }

    async fn update(&self, id: &str, patch: &FilePatch) -> Result<bool> {
        patch.validate()?;
        let Some(mut doc) = self.find(id).await? else {
            return Ok(false);
        };
        if patch.is_empty() {
            return Ok(true);
        }
        patch.apply_to(&mut doc);
        let body = doc.to_json()?.to_string();

        sqlx::query("UPDATE files SET body = ? WHERE app_id = ?")
            .bind(&body)
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.refresh_files(&doc.owner_id).await;
        Ok(true)
    }

    async fn find(&self, id: &str) -> Result<Option<FileDocument>> {
        let body: Option<String> = sqlx::query_scalar("SELECT body FROM files WHERE app_id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        body.map(decode_file).transpose()
    }

    async fn remove(&self, id: &str) -> Result<Option<FileDocument>> {
        let Some(doc) = self.find(id).await? else {
            return Ok(None);
        };
        sqlx::query("DELETE FROM files WHERE app_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.refresh_files(&doc.owner_id).await;
        Ok(Some(doc))
    }

    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>> {
        self.files_for_owner(owner_id).await
    }

    async fn subscribe(&self, owner_id: &str) -> Result<Subscription<FileRecord>> {
        let scope = owner_id.to_string();
        let mut subscription = self.file_feeds.register(&scope);
        let initial = self.files_for_owner(owner_id).await?;
        self.file_feeds.seed(&scope, &mut subscription, initial);
        Ok(subscription)
    }
}

#[async_trait]
impl DeviceRegistry for SqliteStore {
    async fn list(&self) -> Result<Vec<DeviceRecord>> {
        let rows = sqlx::query("SELECT id, body FROM devices ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let mut devices = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let body: String = row.get("body");
            match serde_json::from_str::<DeviceRecord>(&body) {
                Ok(mut device) => {
                    // The row key is authoritative; agents may omit the id field.
                    device.id = id;
                    devices.push(device);
                }
                Err(e) => warn!(device_id = %id, error = %e, "skipping malformed device document"),
            }
        }
        Ok(devices)
    }

    async fn remove(&self, device_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM devices WHERE id = ?")
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PrintQueue for SqliteStore {
    async fn enqueue(&self, job: &PrintJob) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO print_jobs (id, target_device_id, target_printer_name, file_url, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&job.target_device_id)
        .bind(&job.target_printer_name)
        .bind(&job.file_url)
        .bind(job.status.as_str())
        .bind(job.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn upsert_user(&self, user: &ChatUser) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (uid, email, name) VALUES (?, ?, ?)
            ON CONFLICT(uid) DO UPDATE SET email = excluded.email, name = excluded.name
            "#,
        )
        .bind(&user.uid)
        .bind(&user.email)
        .bind(&user.name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_users_by_email(&self, email: &str) -> Result<Vec<ChatUser>> {
        let rows = sqlx::query("SELECT uid, email, name FROM users WHERE email = ? ORDER BY uid")
            .bind(email)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| ChatUser {
                uid: row.get("uid"),
                email: row.get("email"),
                name: row.get("name"),
            })
            .collect())
    }

    async fn merge_conversation(&self, conversation: &Conversation) -> Result<()> {
        let mut details = match self.load_conversation(&conversation.id).await? {
            Some(existing) => existing.participant_details,
            None => BTreeMap::new(),
        };
        details.extend(conversation.participant_details.clone());
        let details_json = serde_json::to_string(&details)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO conversations (id, details_json, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                details_json = excluded.details_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&conversation.id)
        .bind(&details_json)
        .bind(conversation.updated_at.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM conversation_participants WHERE conversation_id = ?")
            .bind(&conversation.id)
            .execute(&mut *tx)
            .await?;

        for (position, uid) in conversation.participants.iter().enumerate() {
            sqlx::query(
                "INSERT INTO conversation_participants (conversation_id, user_id, position) VALUES (?, ?, ?)",
            )
            .bind(&conversation.id)
            .bind(uid)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.refresh_conversation(&conversation.id).await;
        Ok(())
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        self.load_conversation(conversation_id).await
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

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender_id, text, sent_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(conversation_id)
        .bind(&message.sender_id)
        .bind(&message.text)
        .bind(message.sent_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        self.refresh_messages(conversation_id).await;
        Ok(message)
    }

    async fn set_last_message(&self, conversation_id: &str, message: &UserMessage) -> Result<()> {
        let result = sqlx::query(
            "UPDATE conversations SET last_message = ?, last_message_at = ? WHERE id = ?",
        )
        .bind(&message.text)
        .bind(message.sent_at.timestamp_millis())
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("conversation not found: {}", conversation_id);
        }
        self.refresh_conversation(conversation_id).await;
        Ok(())
    }

    async fn subscribe_conversations(&self, user_id: &str) -> Result<Subscription<Conversation>> {
        let scope = user_id.to_string();
        let mut subscription = self.conversation_feeds.register(&scope);
        let initial = self.conversations_for(user_id).await?;
        self.conversation_feeds.seed(&scope, &mut subscription, initial);
        Ok(subscription)
    }

    async fn subscribe_messages(&self, conversation_id: &str) -> Result<Subscription<UserMessage>> {
        let scope = conversation_id.to_string();
        let mut subscription = self.message_feeds.register(&scope);
        let initial = self.messages_for(conversation_id).await?;
        self.message_feeds.seed(&scope, &mut subscription, initial);
        Ok(subscription)
    }
}
