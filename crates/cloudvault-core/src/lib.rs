//! # CloudVault Core
//!
//! Runtime-free logic for CloudVault: data models, identifier derivation,
//! the persisted record schema, optimistic/authoritative reconciliation,
//! device liveness, live snapshot feeds, and the collaborator traits with
//! in-memory implementations.
//!
//! This crate contains no async runtime, sqlx, HTTP client, or filesystem
//! I/O. The only tokio dependency is its `sync` channels.

pub mod ids;
pub mod live;
pub mod liveness;
pub mod models;
pub mod reconcile;
pub mod record;
pub mod store;
