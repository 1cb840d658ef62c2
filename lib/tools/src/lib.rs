//! Remote tool support for waypoint.
//!
//! This crate provides:
//!
//! - **Descriptors**: Tool name, description, and JSON-schema-like input contract
//! - **Schema validation**: Deterministic argument checks run before any remote call
//! - **Transport**: The `list tools` / `call tool` seam, plus an MCP-over-HTTP client
//! - **Invoker**: Resolve, validate, call once under a deadline, normalize the outcome

pub mod descriptor;
pub mod error;
pub mod invoker;
pub mod mcp;
pub mod schema;
pub mod transport;

pub use descriptor::{ToolArguments, ToolDescriptor, find_tool};
pub use error::TransportError;
pub use invoker::{ToolInvoker, ToolOutcome};
pub use mcp::McpConnection;
pub use schema::{ValidationError, validate};
pub use transport::{CallToolResponse, ContentBlock, ToolTransport};
