//! Tests for the SQLite-backed stores against a temporary database.

use chrono::{Duration, TimeZone, Utc};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use cloudvault::chat;
use cloudvault::config::{load_config, Config};
use cloudvault::db;
use cloudvault::pipeline::NewFile;
use cloudvault::printing::{self, PrintTargets};
use cloudvault::runtime::Runtime;
use cloudvault::sqlite_store::SqliteStore;
use cloudvault::summarize::UNSUPPORTED_SUMMARY;
use cloudvault_core::liveness::LivenessPolicy;
use cloudvault_core::models::{
    ChatUser, DeviceRecord, DeviceStatus, FileKind, FileRecord, PrintStatus,
};
use cloudvault_core::record::{FileDocument, FilePatch};
use cloudvault_core::store::{DeviceRegistry, MessageStore, MetadataStore, MESSAGE_WINDOW};

fn write_config(root: &Path) -> Config {
    let config_path = root.join("vault.toml");
    fs::write(
        &config_path,
        format!(
            r#"[db]
path = "{}/data/vault.sqlite"

[blob]
backend = "local"

[identity]
user_id = "alice"
display_name = "Alice"
email = "alice@example.com"
"#,
            root.display()
        ),
    )
    .unwrap();
    load_config(&config_path).unwrap()
}

/// A second connection to the store's database, as another process would
/// have.
async fn raw_pool(tmp: &TempDir) -> sqlx::SqlitePool {
    db::connect(&write_config(tmp.path())).await.unwrap()
}

async fn open_store() -> (TempDir, SqliteStore) {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());
    let store = SqliteStore::open(&config).await.unwrap();
    (tmp, store)
}

fn document(id: &str, owner: &str, uploaded_ms: i64) -> FileDocument {
    let uploaded_at = Utc.timestamp_millis_opt(uploaded_ms).unwrap();
    let record = FileRecord {
        id: id.to_string(),
        name: format!("{}.txt", id),
        size: 4,
        kind: FileKind::Document,
        mime_type: "text/plain".to_string(),
        url: format!("session://{}", id),
        uploaded_at,
        uploader: owner.to_uppercase(),
        ai_summary: None,
        is_analyzing: false,
    };
    FileDocument::new(
        &record,
        owner,
        &format!("files/{}/{}_{}.txt", owner, uploaded_ms, id),
        &format!("file:///blobs/{}", id),
        uploaded_at,
    )
    .unwrap()
}

fn user(uid: &str) -> ChatUser {
    ChatUser {
        uid: uid.to_string(),
        email: format!("{}@example.com", uid),
        name: uid.to_uppercase(),
    }
}

// ─── Metadata ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_metadata_lifecycle() {
    let (_tmp, store) = open_store().await;
    store.insert(&document("old", "alice", 1_000)).await.unwrap();
    store.insert(&document("new", "alice", 2_000)).await.unwrap();
    store.insert(&document("other", "bob", 3_000)).await.unwrap();

    let listed = store.list_for_owner("alice").await.unwrap();
    let ids: Vec<&str> = listed.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["new", "old"]);
    assert_eq!(listed[0].url, "file:///blobs/new");

    assert!(store.update("old", &FilePatch::summary("short")).await.unwrap());
    assert!(!store.update("ghost", &FilePatch::summary("x")).await.unwrap());
    let doc = store.find("old").await.unwrap().unwrap();
    assert_eq!(doc.record.ai_summary.as_deref(), Some("short"));
    assert_eq!(doc.owner_id, "alice");

    assert!(MetadataStore::remove(&store, "old").await.unwrap().is_some());
    assert!(MetadataStore::remove(&store, "old").await.unwrap().is_none());
    assert_eq!(store.list_for_owner("alice").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_duplicate_app_id_rejected() {
    let (_tmp, store) = open_store().await;
    store.insert(&document("dup", "alice", 1_000)).await.unwrap();
    assert!(store.insert(&document("dup", "alice", 2_000)).await.is_err());
}

#[tokio::test]
async fn test_subscription_receives_full_snapshots() {
    let (_tmp, store) = open_store().await;
    let mut feed = store.subscribe("alice").await.unwrap();
    assert!(feed.current().is_empty());

    store.insert(&document("a", "alice", 1_000)).await.unwrap();
    let snapshot = feed.next().await.unwrap();
    assert_eq!(snapshot.len(), 1);

    store.update("a", &FilePatch::summary("done")).await.unwrap();
    let snapshot = feed.next().await.unwrap();
    assert_eq!(snapshot[0].ai_summary.as_deref(), Some("done"));

    MetadataStore::remove(&store, "a").await.unwrap();
    assert!(feed.next().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_committed_write_succeeds_when_feed_refresh_fails() {
    let (tmp, store) = open_store().await;
    let feed = store.subscribe("alice").await.unwrap();

    // A corrupt row makes every re-query of alice's files fail.
    sqlx::query("INSERT INTO files (app_id, owner_id, uploaded_at, body) VALUES (?, ?, ?, ?)")
        .bind("corrupt")
        .bind("alice")
        .bind(0_i64)
        .bind("not json")
        .execute(&raw_pool(&tmp).await)
        .await
        .unwrap();

    store.insert(&document("a", "alice", 1_000)).await.unwrap();
    assert!(store.find("a").await.unwrap().is_some());
    assert!(store.update("a", &FilePatch::summary("done")).await.unwrap());
    assert!(MetadataStore::remove(&store, "a").await.unwrap().is_some());

    // Subscribers keep their last good snapshot.
    assert!(feed.current().is_empty());
}

#[tokio::test]
async fn test_write_before_first_subscriber_is_visible() {
    let (_tmp, store) = open_store().await;
    store.insert(&document("early", "alice", 1_000)).await.unwrap();

    let mut first = store.subscribe("alice").await.unwrap();
    assert_eq!(first.current().len(), 1);

    let second = store.subscribe("alice").await.unwrap();
    assert_eq!(second.current().len(), 1);

    store.insert(&document("late", "alice", 2_000)).await.unwrap();
    let snapshot = loop {
        let snapshot = first.next().await.unwrap();
        if snapshot.len() == 2 {
            break snapshot;
        }
    };
    assert_eq!(snapshot[0].id, "late");
}

// ─── Devices and printing ───────────────────────────────────────────

#[tokio::test]
async fn test_liveness_boundary_from_registry() {
    let (_tmp, store) = open_store().await;
    let t = Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap();
    store
        .record_heartbeat(&DeviceRecord {
            id: "pc-1".to_string(),
            name: Some("Front desk".to_string()),
            printers: vec!["HP".to_string()],
            last_heartbeat: Some(t),
        })
        .await
        .unwrap();

    let policy = LivenessPolicy::default();
    let at_two = printing::online_devices(&store, &policy, t + Duration::minutes(2))
        .await
        .unwrap();
    assert_eq!(at_two[0].status, DeviceStatus::Online);

    let at_three = printing::online_devices(&store, &policy, t + Duration::minutes(3))
        .await
        .unwrap();
    assert_eq!(at_three[0].status, DeviceStatus::Offline);
}

#[tokio::test]
async fn test_agent_documents_are_read_tolerantly() {
    let (tmp, store) = open_store().await;
    sqlx::query("INSERT INTO devices (id, body) VALUES (?, ?), (?, ?)")
        .bind("agent-7")
        .bind(r#"{"nome":"Sala 2","impressoras":["Epson"],"ultimo_visto":"2026-10-18T09:00:00Z"}"#)
        .bind("broken")
        .bind("not json")
        .execute(&raw_pool(&tmp).await)
        .await
        .unwrap();

    let devices = store.list().await.unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id, "agent-7");
    assert_eq!(devices[0].name.as_deref(), Some("Sala 2"));
    assert_eq!(devices[0].printers, vec!["Epson".to_string()]);
}

#[tokio::test]
async fn test_print_job_survives_device_removal() {
    let (_tmp, store) = open_store().await;
    store
        .record_heartbeat(&DeviceRecord {
            id: "pc-1".to_string(),
            name: None,
            printers: vec!["HP".to_string()],
            last_heartbeat: Some(Utc::now()),
        })
        .await
        .unwrap();

    let devices = printing::online_devices(&store, &LivenessPolicy::default(), Utc::now())
        .await
        .unwrap();
    let targets = PrintTargets::new(devices);
    targets.select("pc-1", "HP").unwrap();

    let job_id = printing::send_print_job(&store, "file:///blobs/a.pdf", "pc-1", "HP")
        .await
        .unwrap();
    printing::delete_device(&store, "pc-1").await.unwrap();

    assert!(store.list().await.unwrap().is_empty());
    let jobs = store.print_jobs().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].0, job_id);
    assert_eq!(jobs[0].1.status, PrintStatus::Pending);
    assert_eq!(jobs[0].1.target_printer_name, "HP");
}

// ─── Chat ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_conversation_merge_keeps_last_message() {
    let (_tmp, store) = open_store().await;
    let id = chat::get_or_create_conversation(&store, &user("bob"), &user("alice"))
        .await
        .unwrap();
    assert_eq!(id, "alice_bob");

    chat::send_message(&store, &id, "bob", "hi alice").await.unwrap();
    chat::get_or_create_conversation(&store, &user("alice"), &user("bob"))
        .await
        .unwrap();

    let conversation = store.get_conversation(&id).await.unwrap().unwrap();
    assert_eq!(conversation.participants, vec!["alice", "bob"]);
    assert_eq!(conversation.last_message.as_deref(), Some("hi alice"));
    assert_eq!(conversation.participant_details["bob"].name, "BOB");
}

#[tokio::test]
async fn test_conversation_feed_orders_by_activity() {
    let (_tmp, store) = open_store().await;
    let first = chat::get_or_create_conversation(&store, &user("alice"), &user("bob"))
        .await
        .unwrap();
    let second = chat::get_or_create_conversation(&store, &user("alice"), &user("carol"))
        .await
        .unwrap();

    let mut feed = chat::conversations(&store, "alice").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    chat::send_message(&store, &first, "alice", "ping").await.unwrap();

    let snapshot = loop {
        let snapshot = feed.next().await.unwrap();
        if snapshot[0].last_message.is_some() {
            break snapshot;
        }
    };
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].id, first);
    assert_eq!(snapshot[1].id, second);
}

#[tokio::test]
async fn test_message_window_keeps_latest() {
    let (_tmp, store) = open_store().await;
    let id = chat::get_or_create_conversation(&store, &user("alice"), &user("bob"))
        .await
        .unwrap();

    for i in 0..(MESSAGE_WINDOW + 5) {
        store
            .append_message(&id, "alice", &format!("m{}", i))
            .await
            .unwrap();
    }

    let window = chat::messages(&store, &id).await.unwrap().current();
    assert_eq!(window.len(), MESSAGE_WINDOW);
    assert_eq!(window[0].text, "m5");
    assert_eq!(window[MESSAGE_WINDOW - 1].text, format!("m{}", MESSAGE_WINDOW + 4));
}

#[tokio::test]
async fn test_user_search_by_email() {
    let (_tmp, store) = open_store().await;
    chat::sync_user(&store, &user("alice")).await.unwrap();
    chat::sync_user(&store, &user("bob")).await.unwrap();

    let found = chat::search_users(&store, " bob@example.com ", "alice")
        .await
        .unwrap();
    assert_eq!(found, vec![user("bob")]);
    assert!(chat::search_users(&store, "bob@example.com", "bob")
        .await
        .unwrap()
        .is_empty());
}

// ─── Runtime ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_runtime_round_trip_on_local_storage() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());
    let rt = Runtime::open(&config).await.unwrap();
    let session = rt.cli_session();

    let reports = rt
        .vault
        .upload_batch(
            &session,
            vec![NewFile {
                name: "bundle.zip".to_string(),
                mime_type: "application/zip".to_string(),
                bytes: vec![1, 2, 3],
            }],
        )
        .await;
    let record = reports[0].record.clone().unwrap();
    assert!(record.url.starts_with("file://"));
    assert!(tmp.path().join("data/blobs/files/alice").is_dir());

    let summary = rt.vault.request_summary(&session, &record.id).await.unwrap();
    assert_eq!(summary, UNSUPPORTED_SUMMARY);

    rt.vault.delete_file(&session, &record.id).await.unwrap();
    assert!(rt.store.list_for_owner("alice").await.unwrap().is_empty());
}
