//! Human-to-human messaging.
//!
//! A conversation between two users has a deterministic id derived from
//! their sorted uids, so opening it from either side lands on the same
//! document and opening it twice is harmless.

use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{debug, info};

use cloudvault_core::ids::conversation_id;
use cloudvault_core::live::Subscription;
use cloudvault_core::models::{ChatUser, Conversation, UserMessage};
use cloudvault_core::store::MessageStore;

use crate::errors::VaultError;

/// Publish the user's profile so others can find them by email.
pub async fn sync_user(store: &dyn MessageStore, user: &ChatUser) -> anyhow::Result<()> {
    store.upsert_user(user).await?;
    debug!(uid = %user.uid, "user profile synced");
    Ok(())
}

/// Exact-email search that never returns the caller.
pub async fn search_users(
    store: &dyn MessageStore,
    email: &str,
    me: &str,
) -> anyhow::Result<Vec<ChatUser>> {
    let mut users = store.find_users_by_email(email.trim()).await?;
    users.retain(|u| u.uid != me);
    Ok(users)
}

/// Open (creating if needed) the conversation between `me` and `other`.
pub async fn get_or_create_conversation(
    store: &dyn MessageStore,
    me: &ChatUser,
    other: &ChatUser,
) -> Result<String, VaultError> {
    if me.uid == other.uid {
        return Err(VaultError::InvalidInput(
            "cannot open a conversation with yourself".to_string(),
        ));
    }

    let id = conversation_id(&me.uid, &other.uid);
    let mut participants = vec![me.uid.clone(), other.uid.clone()];
    participants.sort();

    let participant_details = BTreeMap::from([
        (me.uid.clone(), me.clone()),
        (other.uid.clone(), other.clone()),
    ]);

    let conversation = Conversation {
        id: id.clone(),
        participants,
        participant_details,
        last_message: None,
        last_message_at: None,
        updated_at: Utc::now(),
    };
    store.merge_conversation(&conversation).await?;

    info!(conversation = %id, "conversation opened");
    Ok(id)
}

/// The conversation, if `user_id` takes part in it. Conversations the user
/// is not in are reported as not found.
pub async fn participant_conversation(
    store: &dyn MessageStore,
    conversation: &str,
    user_id: &str,
) -> Result<Conversation, VaultError> {
    store
        .get_conversation(conversation)
        .await?
        .filter(|c| c.participants.iter().any(|p| p == user_id))
        .ok_or_else(|| VaultError::not_found("conversation", conversation))
}

/// Append a message and refresh the conversation's last-message fields.
pub async fn send_message(
    store: &dyn MessageStore,
    conversation: &str,
    sender_id: &str,
    text: &str,
) -> Result<UserMessage, VaultError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(VaultError::InvalidInput("message must not be empty".to_string()));
    }

    participant_conversation(store, conversation, sender_id).await?;

    let message = store.append_message(conversation, sender_id, text).await?;
    store.set_last_message(conversation, &message).await?;

    debug!(conversation, message = %message.id, "message sent");
    Ok(message)
}

/// Live list of the user's conversations, most recent activity first.
pub async fn conversations(
    store: &dyn MessageStore,
    user_id: &str,
) -> anyhow::Result<Subscription<Conversation>> {
    store.subscribe_conversations(user_id).await
}

/// Live window of the latest messages, oldest first.
pub async fn messages(
    store: &dyn MessageStore,
    conversation: &str,
) -> anyhow::Result<Subscription<UserMessage>> {
    store.subscribe_messages(conversation).await
}
