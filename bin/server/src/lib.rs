//! waypoint HTTP server.
//!
//! This crate wires the workflow engine to an axum router, loads
//! configuration from the environment, and owns the process lifecycle.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
