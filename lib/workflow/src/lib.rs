//! Conversational workflow engine for waypoint.
//!
//! This crate provides:
//!
//! - **State**: The typed record threaded through a run, and the sparse patches nodes return
//! - **Graph**: Steps connected by deterministic, state-driven transitions (petgraph)
//! - **Capabilities**: Tool selection, parameter extraction, tool execution, answer generation
//! - **Engine**: One `process` call per user turn, seeded with the session's history

pub mod capabilities;
pub mod capability;
pub mod engine;
pub mod error;
pub mod graph;
pub mod state;
pub mod step;

pub use capabilities::{
    AnswerGenerator, EMPTY_ANSWER_FALLBACK, ParameterExtractor, ToolExecutor, ToolSelector,
};
pub use capability::Capability;
pub use engine::{EngineConfig, FAILURE_ANSWER, TurnOutcome, WorkflowEngine};
pub use error::{EngineError, GraphError, NodeError, RoutingError};
pub use graph::{Transition, WorkflowGraph};
pub use state::{
    ConversationState, NO_TOOL_FOUND, ParseFailure, StatePatch, ToolInputs, ToolResult,
    ToolSelection,
};
pub use step::Step;
