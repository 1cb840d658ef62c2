//! Core domain types and utilities for waypoint.
//!
//! This crate provides the identifiers and error handling shared by the
//! tool, conversation, and workflow crates.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ParseIdError, RunId, SessionId, SessionRecordId};
