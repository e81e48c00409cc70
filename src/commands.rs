//! CLI command implementations. Results go to stdout, alerts to stderr.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};

use cloudvault_core::models::{ChatUser, DeviceRecord, FileRecord};
use cloudvault_core::store::MetadataStore;

use crate::chat;
use crate::pipeline::NewFile;
use crate::printing::{self, PrintTargets};
use crate::runtime::{chat_user, Runtime};
use crate::session::{Session, Severity};

fn print_alerts(session: &Session) {
    for alert in session.drain_alerts() {
        let tag = match alert.severity {
            Severity::Blocking => "error",
            Severity::NonBlocking => "warning",
        };
        eprintln!("{}: {}", tag, alert.message);
    }
}

/// MIME type from a file extension.
pub fn detect_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("txt") => "text/plain",
        Some("md") => "text/markdown",
        Some("csv") => "text/csv",
        Some("html" | "htm") => "text/html",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}

fn print_file(record: &FileRecord) {
    println!(
        "{}  {:<8}  {:>10}  {}  {}",
        record.id,
        format!("{:?}", record.kind).to_lowercase(),
        record.size,
        record.uploaded_at.format("%Y-%m-%d %H:%M"),
        record.name
    );
    if let Some(ref summary) = record.ai_summary {
        println!("    {}", summary);
    }
}

pub async fn run_upload(rt: &Runtime, paths: &[PathBuf]) -> Result<()> {
    if paths.is_empty() {
        bail!("No files given");
    }

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unnamed")
            .to_string();
        files.push(NewFile {
            name,
            mime_type: detect_mime_type(path).to_string(),
            bytes,
        });
    }

    let session = rt.cli_session();
    let reports = rt.vault.upload_batch(&session, files).await;
    print_alerts(&session);

    let failed = reports.iter().filter(|r| !r.is_success()).count();
    for report in &reports {
        match report.record {
            Some(ref record) => println!("uploaded {}  {}", record.id, record.name),
            None => println!(
                "failed   {}  {}",
                report.name,
                report.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }

    if failed > 0 {
        bail!("{} of {} uploads failed", failed, reports.len());
    }
    Ok(())
}

pub async fn run_list(rt: &Runtime, query: Option<&str>) -> Result<()> {
    let session = rt.cli_session();
    rt.vault.refresh(&session).await?;

    let files = session.visible_files(query.unwrap_or(""));
    if files.is_empty() {
        println!("No files.");
        return Ok(());
    }
    for record in &files {
        print_file(record);
    }
    Ok(())
}

pub async fn run_summarize(rt: &Runtime, id: &str) -> Result<()> {
    let session = rt.cli_session();
    rt.vault.refresh(&session).await?;

    let result = rt.vault.request_summary(&session, id).await;
    print_alerts(&session);
    println!("{}", result?);
    Ok(())
}

pub async fn run_delete(rt: &Runtime, id: &str) -> Result<()> {
    let session = rt.cli_session();
    rt.vault.refresh(&session).await?;

    let result = rt.vault.delete_file(&session, id).await;
    print_alerts(&session);
    result?;
    println!("Deleted {}", id);
    Ok(())
}

pub async fn run_devices_list(rt: &Runtime) -> Result<()> {
    let devices = printing::online_devices(rt.store.as_ref(), &rt.policy, Utc::now()).await?;
    if devices.is_empty() {
        println!("No devices registered.");
        return Ok(());
    }
    for device in &devices {
        println!(
            "{}  {:<7}  {}  last seen {}",
            device.id,
            format!("{:?}", device.status).to_lowercase(),
            device.name,
            device.last_heartbeat.format("%Y-%m-%d %H:%M:%S")
        );
        for printer in &device.printers {
            println!("    - {}", printer);
        }
    }
    Ok(())
}

pub async fn run_devices_remove(rt: &Runtime, id: &str) -> Result<()> {
    printing::delete_device(rt.store.as_ref(), id).await?;
    println!("Removed device {}", id);
    Ok(())
}

/// Write a heartbeat as a print agent would.
pub async fn run_devices_heartbeat(
    rt: &Runtime,
    id: &str,
    name: Option<String>,
    printers: Vec<String>,
) -> Result<()> {
    rt.store
        .record_heartbeat(&DeviceRecord {
            id: id.to_string(),
            name,
            printers,
            last_heartbeat: Some(Utc::now()),
        })
        .await?;
    println!("Heartbeat recorded for {}", id);
    Ok(())
}

pub async fn run_print(rt: &Runtime, file_id: &str, device: &str, printer: &str) -> Result<()> {
    let doc = MetadataStore::find(rt.store.as_ref(), file_id)
        .await?
        .filter(|doc| doc.owner_id == rt.config.identity.user_id)
        .with_context(|| format!("file not found: {}", file_id))?;

    let devices = printing::online_devices(rt.store.as_ref(), &rt.policy, Utc::now()).await?;
    let targets = PrintTargets::new(devices);
    targets.select(device, printer)?;

    let job_id = printing::send_print_job(rt.store.as_ref(), &doc.record.url, device, printer).await?;
    println!("Queued print job {} on {} / {}", job_id, device, printer);
    Ok(())
}

fn me(rt: &Runtime) -> ChatUser {
    chat_user(rt.cli_session().identity())
}

pub async fn run_chat_open(
    rt: &Runtime,
    uid: &str,
    email: Option<String>,
    name: Option<String>,
) -> Result<()> {
    let me = me(rt);
    chat::sync_user(rt.store.as_ref(), &me).await?;

    let other = ChatUser {
        uid: uid.to_string(),
        email: email.unwrap_or_default(),
        name: name.unwrap_or_else(|| uid.to_string()),
    };
    let id = chat::get_or_create_conversation(rt.store.as_ref(), &me, &other).await?;
    println!("{}", id);
    Ok(())
}

pub async fn run_chat_list(rt: &Runtime) -> Result<()> {
    let me = me(rt);
    let conversations = chat::conversations(rt.store.as_ref(), &me.uid)
        .await?
        .current();
    if conversations.is_empty() {
        println!("No conversations.");
        return Ok(());
    }
    for conversation in &conversations {
        let others: Vec<&str> = conversation
            .participant_details
            .values()
            .filter(|u| u.uid != me.uid)
            .map(|u| u.name.as_str())
            .collect();
        println!(
            "{}  {}  {}",
            conversation.id,
            others.join(", "),
            conversation.last_message.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

pub async fn run_chat_send(rt: &Runtime, conversation: &str, text: &str) -> Result<()> {
    let me = me(rt);
    let message = chat::send_message(rt.store.as_ref(), conversation, &me.uid, text).await?;
    println!("{}  {}", message.id, message.sent_at.format("%Y-%m-%d %H:%M:%S"));
    Ok(())
}

pub async fn run_chat_history(rt: &Runtime, conversation: &str) -> Result<()> {
    let existing =
        chat::participant_conversation(rt.store.as_ref(), conversation, &me(rt).uid).await?;

    let messages = chat::messages(rt.store.as_ref(), conversation)
        .await?
        .current();
    for message in &messages {
        let sender = existing
            .participant_details
            .get(&message.sender_id)
            .map(|u| u.name.as_str())
            .unwrap_or(message.sender_id.as_str());
        println!(
            "[{}] {}: {}",
            message.sent_at.format("%Y-%m-%d %H:%M:%S"),
            sender,
            message.text
        );
    }
    Ok(())
}

pub async fn run_users_search(rt: &Runtime, email: &str) -> Result<()> {
    let users = chat::search_users(rt.store.as_ref(), email, &rt.config.identity.user_id).await?;
    if users.is_empty() {
        println!("No users found.");
    }
    for user in &users {
        println!("{}  {}  {}", user.uid, user.name, user.email);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_mime_type() {
        assert_eq!(detect_mime_type(Path::new("a/photo.JPG")), "image/jpeg");
        assert_eq!(detect_mime_type(Path::new("notes.txt")), "text/plain");
        assert_eq!(detect_mime_type(Path::new("archive")), "application/octet-stream");
    }
}
