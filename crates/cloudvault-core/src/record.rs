//! Persisted file metadata and its write-time schema.
//!
//! Every write to a [`MetadataStore`](crate::store::MetadataStore) goes
//! through [`FileDocument`] or [`FilePatch`]. Construction validates the
//! required fields; serialization leaves absent optional fields out of the
//! document entirely instead of writing nulls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::FileRecord;

/// Schema violations detected before a write.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("field `{0}` must not be empty")]
    Empty(&'static str),
    #[error("malformed file document: {0}")]
    Malformed(String),
}

/// A file's metadata document as stored by the metadata store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDocument {
    #[serde(flatten)]
    pub record: FileRecord,
    pub owner_id: String,
    pub storage_path: String,
    pub created_at: DateTime<Utc>,
}

impl FileDocument {
    /// Build the durable document for an uploaded file.
    ///
    /// `url` replaces the session-local preview URL carried by `record`, and
    /// the transient analyzing flag is never persisted on creation.
    pub fn new(
        record: &FileRecord,
        owner_id: &str,
        storage_path: &str,
        url: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Self, RecordError> {
        let mut record = record.clone();
        record.url = url.to_string();
        record.is_analyzing = false;
        let doc = Self {
            record,
            owner_id: owner_id.to_string(),
            storage_path: storage_path.to_string(),
            created_at,
        };
        doc.validate()?;
        Ok(doc)
    }

    pub fn validate(&self) -> Result<(), RecordError> {
        let required = [
            ("id", &self.record.id),
            ("name", &self.record.name),
            ("url", &self.record.url),
            ("ownerId", &self.owner_id),
            ("storagePath", &self.storage_path),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(RecordError::Empty(field));
            }
        }
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// Serialize for the store. Absent optional fields are omitted.
    pub fn to_json(&self) -> Result<serde_json::Value, RecordError> {
        serde_json::to_value(self).map_err(|e| RecordError::Malformed(e.to_string()))
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, RecordError> {
        serde_json::from_value(value).map_err(|e| RecordError::Malformed(e.to_string()))
    }
}

/// A partial update addressed by application id.
///
/// The durable URL is deliberately not part of a patch: once an object is
/// stored, its URL only changes by re-uploading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_analyzing: Option<bool>,
}

impl FilePatch {
    pub fn summary(text: impl Into<String>) -> Self {
        Self {
            ai_summary: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.ai_summary.is_none() && self.is_analyzing.is_none()
    }

    pub fn validate(&self) -> Result<(), RecordError> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(RecordError::Empty("name"));
            }
        }
        Ok(())
    }

    pub fn apply_to(&self, doc: &mut FileDocument) {
        if let Some(name) = &self.name {
            doc.record.name = name.clone();
        }
        if let Some(summary) = &self.ai_summary {
            doc.record.ai_summary = Some(summary.clone());
        }
        if let Some(flag) = self.is_analyzing {
            doc.record.is_analyzing = flag;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileKind;
    use chrono::TimeZone;

    fn record() -> FileRecord {
        FileRecord {
            id: "abc".into(),
            name: "photo.png".into(),
            size: 10,
            kind: FileKind::Image,
            mime_type: "image/png".into(),
            url: "blob:session/abc".into(),
            uploaded_at: Utc.timestamp_opt(100, 0).unwrap(),
            uploader: "Ana".into(),
            ai_summary: None,
            is_analyzing: true,
        }
    }

    #[test]
    fn test_new_replaces_preview_url() {
        let now = Utc.timestamp_opt(200, 0).unwrap();
        let doc = FileDocument::new(&record(), "uid", "files/uid/1_photo.png", "https://x/y", now)
            .unwrap();
        assert_eq!(doc.record.url, "https://x/y");
        assert!(!doc.record.is_analyzing);
        assert_eq!(doc.created_at, now);
    }

    #[test]
    fn test_new_rejects_missing_owner() {
        let now = Utc::now();
        let err = FileDocument::new(&record(), " ", "p", "u", now).unwrap_err();
        assert_eq!(err, RecordError::Empty("ownerId"));
    }

    #[test]
    fn test_json_strips_absent_fields() {
        let doc = FileDocument::new(&record(), "uid", "p", "u", Utc::now()).unwrap();
        let json = doc.to_json().unwrap();
        let obj = json.as_object().unwrap();
        assert!(!obj.contains_key("aiSummary"));
        assert!(!obj.values().any(|v| v.is_null()));
        assert_eq!(obj["ownerId"], "uid");
        assert_eq!(FileDocument::from_json(json).unwrap(), doc);
    }

    #[test]
    fn test_patch_apply() {
        let mut doc = FileDocument::new(&record(), "uid", "p", "u", Utc::now()).unwrap();
        let patch = FilePatch::summary("A red bicycle");
        assert!(!patch.is_empty());
        patch.apply_to(&mut doc);
        assert_eq!(doc.record.ai_summary.as_deref(), Some("A red bicycle"));
        assert_eq!(doc.record.name, "photo.png");
        assert!(FilePatch::default().is_empty());
    }

    #[test]
    fn test_patch_rejects_blank_name() {
        let patch = FilePatch {
            name: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(patch.validate(), Err(RecordError::Empty("name")));
    }
}
