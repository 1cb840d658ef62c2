//! Conversation persistence for waypoint.
//!
//! This crate provides:
//!
//! - **Records**: Per-turn snapshots of a conversation and their lifecycle status
//! - **Session Store**: Append-only snapshot storage (SQLite and in-memory)
//! - **Session Registry**: Per-session leases that serialize concurrent turns

pub mod error;
pub mod memory;
pub mod record;
pub mod registry;
pub mod sqlite;
pub mod store;

pub use error::StoreError;
pub use memory::MemorySessionStore;
pub use record::{RecordStatus, SessionRecord, Snapshot, ai_line, human_line};
pub use registry::{RegistryConfig, SessionLease, SessionRegistry};
pub use sqlite::SqliteSessionStore;
pub use store::{DEFAULT_RETENTION_DAYS, SessionStore};
