//! Core data models shared by every CloudVault component.
//!
//! Files, devices, print jobs and chat documents as they flow between the
//! session, the pipeline, and the external collaborators.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Coarse content bucket used for display and icon selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    Document,
    Other,
}

impl FileKind {
    /// Classify a MIME type.
    ///
    /// `image/*` is an image, `text/*` and `application/pdf` are documents,
    /// everything else (including an empty type) is `Other`.
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime.trim().to_ascii_lowercase();
        if mime.starts_with("image/") {
            FileKind::Image
        } else if mime.starts_with("text/") || mime == "application/pdf" {
            FileKind::Document
        } else {
            FileKind::Other
        }
    }
}

/// A file as shown to the user, either optimistic or authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub mime_type: String,
    /// Session-local preview reference until the durable storage URL replaces it.
    pub url: String,
    pub uploaded_at: DateTime<Utc>,
    pub uploader: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_analyzing: bool,
}

/// A device document as an agent wrote it into the registry.
///
/// Agents are not ours, so field naming is tolerant: either the English or
/// the Portuguese key is accepted for each field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default, alias = "nome")]
    pub name: Option<String>,
    #[serde(default, alias = "impressoras")]
    pub printers: Vec<String>,
    #[serde(
        default,
        alias = "last_heartbeat",
        alias = "ultimo_visto",
        deserialize_with = "deserialize_heartbeat"
    )]
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// Timestamp encodings agents are known to write.
#[derive(Deserialize)]
#[serde(untagged)]
enum HeartbeatStamp {
    Text(String),
    Millis(i64),
    Timestamp {
        seconds: i64,
        #[serde(default, alias = "nanos")]
        nanoseconds: u32,
    },
}

fn deserialize_heartbeat<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let stamp = Option::<HeartbeatStamp>::deserialize(deserializer)?;
    Ok(stamp.and_then(|s| match s {
        HeartbeatStamp::Text(text) => DateTime::parse_from_rfc3339(&text)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        HeartbeatStamp::Millis(ms) => Utc.timestamp_millis_opt(ms).single(),
        HeartbeatStamp::Timestamp {
            seconds,
            nanoseconds,
        } => Utc.timestamp_opt(seconds, nanoseconds).single(),
    }))
}

/// Derived liveness of a device. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

/// A registry entry with its liveness evaluated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    pub printers: Vec<String>,
    /// Epoch zero when the agent never reported.
    pub last_heartbeat: DateTime<Utc>,
    pub status: DeviceStatus,
}

impl Device {
    pub fn is_online(&self) -> bool {
        self.status == DeviceStatus::Online
    }
}

/// Execution state of a print job. Only the external agent moves a job out
/// of `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintStatus {
    Pending,
    Printed,
    Error,
}

impl PrintStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrintStatus::Pending => "pending",
            PrintStatus::Printed => "printed",
            PrintStatus::Error => "error",
        }
    }
}

/// A queued print request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintJob {
    pub target_device_id: String,
    pub target_printer_name: String,
    pub file_url: String,
    pub status: PrintStatus,
    pub created_at: DateTime<Utc>,
}

/// Public profile used by the human chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUser {
    pub uid: String,
    pub email: String,
    pub name: String,
}

/// A two-party conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub participants: Vec<String>,
    pub participant_details: BTreeMap<String, ChatUser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Timestamp used to order the conversation list, newest first.
    pub fn activity_at(&self) -> DateTime<Utc> {
        self.last_message_at.unwrap_or(self.updated_at)
    }
}

/// A chat message. `sent_at` is stamped by the store, not the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessage {
    pub id: String,
    pub sender_id: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_from_mime() {
        assert_eq!(FileKind::from_mime("image/png"), FileKind::Image);
        assert_eq!(FileKind::from_mime("text/plain"), FileKind::Document);
        assert_eq!(FileKind::from_mime("text/markdown"), FileKind::Document);
        assert_eq!(FileKind::from_mime("application/pdf"), FileKind::Document);
        assert_eq!(FileKind::from_mime("application/zip"), FileKind::Other);
        assert_eq!(FileKind::from_mime(""), FileKind::Other);
    }

    #[test]
    fn test_device_accepts_portuguese_fields() {
        let doc = json!({
            "nome": "PC do Dr. Paulo",
            "impressoras": ["HP LaserJet"],
            "ultimo_visto": "2026-10-18T12:00:00Z"
        });
        let device: DeviceRecord = serde_json::from_value(doc).unwrap();
        assert_eq!(device.name.as_deref(), Some("PC do Dr. Paulo"));
        assert_eq!(device.printers, vec!["HP LaserJet".to_string()]);
        assert_eq!(
            device.last_heartbeat,
            Some(Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_device_heartbeat_encodings() {
        let millis: DeviceRecord =
            serde_json::from_value(json!({ "name": "a", "lastHeartbeat": 1_000 })).unwrap();
        assert_eq!(millis.last_heartbeat, Utc.timestamp_millis_opt(1_000).single());

        let object: DeviceRecord = serde_json::from_value(
            json!({ "name": "b", "lastHeartbeat": { "seconds": 60, "nanoseconds": 0 } }),
        )
        .unwrap();
        assert_eq!(object.last_heartbeat, Utc.timestamp_opt(60, 0).single());

        let garbage: DeviceRecord =
            serde_json::from_value(json!({ "name": "c", "lastHeartbeat": "yesterday" })).unwrap();
        assert_eq!(garbage.last_heartbeat, None);

        let missing: DeviceRecord = serde_json::from_value(json!({ "name": "d" })).unwrap();
        assert_eq!(missing.last_heartbeat, None);
        assert!(missing.printers.is_empty());
    }

    #[test]
    fn test_file_record_omits_absent_summary() {
        let record = FileRecord {
            id: "f1".into(),
            name: "a.txt".into(),
            size: 3,
            kind: FileKind::Document,
            mime_type: "text/plain".into(),
            url: "mem://a".into(),
            uploaded_at: Utc.timestamp_opt(0, 0).unwrap(),
            uploader: "Ana".into(),
            ai_summary: None,
            is_analyzing: false,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("aiSummary").is_none());
        assert!(value.get("isAnalyzing").is_none());
        assert_eq!(value["type"], "document");
    }
}
