//! # CloudVault
//!
//! A multi-tenant document vault. Users upload files, request AI summaries
//! on demand, message each other, and send files to printers attached to
//! remote print agents.
//!
//! Runtime-free domain logic (records, reconciliation, liveness, live
//! feeds, store traits) lives in the `cloudvault-core` crate. This crate
//! binds it to SQLite, blob backends, an HTTP summarizer, a CLI and an
//! HTTP server.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐
//! │ CLI/HTTP │──▶│   Pipeline   │──▶│ Blob backend │
//! │ (vault)  │   │ upload/summ. │   │   FS / S3    │
//! └──────────┘   └──────┬───────┘   └──────────────┘
//!       │               │
//!       ▼               ▼
//! ┌──────────┐   ┌──────────────┐
//! │ Chat and │──▶│    SQLite    │
//! │ printing │   │ + live feeds │
//! └──────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the store traits |
//! | [`blob_fs`] | Local filesystem blob backend |
//! | [`blob_s3`] | S3 blob backend with SigV4 signing |
//! | [`fetch`] | Content retrieval with cache/direct/proxy fallback |
//! | [`summarize`] | Summarizer abstraction and Gemini client |
//! | [`session`] | Per-user optimistic state and alerts |
//! | [`pipeline`] | Upload, summary and delete flows |
//! | [`printing`] | Device selection and print dispatch |
//! | [`chat`] | Human-to-human messaging |
//! | [`errors`] | Error taxonomy |
//! | [`runtime`] | Wiring from config to collaborators |
//! | [`commands`] | CLI command implementations |
//! | [`server`] | HTTP server |

pub mod blob_fs;
pub mod blob_s3;
pub mod chat;
pub mod commands;
pub mod config;
pub mod db;
pub mod errors;
pub mod fetch;
pub mod migrate;
pub mod pipeline;
pub mod printing;
pub mod runtime;
pub mod server;
pub mod session;
pub mod sqlite_store;
pub mod summarize;

pub use cloudvault_core;
