//! Error types for the workflow crate.
//!
//! Errors are layered with rootcause:
//! - `GraphError`: building or validating a transition graph
//! - `RoutingError`: no transition matches the state at a node exit
//! - `NodeError`: a capability node could not produce its patch
//! - `EngineError`: what `WorkflowEngine::process` reports (wraps lower errors via context)

use crate::step::Step;
use std::fmt;
use waypoint_ai::{LlmError, PromptError};
use waypoint_core::{RunId, SessionId};
use waypoint_tools::TransportError;

/// Errors from graph construction and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Step is not part of the graph.
    StepNotFound { step: Step },
    /// The entry step is missing.
    MissingEntry { entry: Step },
    /// A non-terminal step has no outgoing transition.
    DeadEnd { step: Step },
    /// Graph contains cycles.
    CycleDetected,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StepNotFound { step } => write!(f, "step not found: {step}"),
            Self::MissingEntry { entry } => write!(f, "entry step '{entry}' is not in the graph"),
            Self::DeadEnd { step } => {
                write!(f, "non-terminal step '{step}' has no outgoing transition")
            }
            Self::CycleDetected => write!(f, "graph contains cycles"),
        }
    }
}

impl std::error::Error for GraphError {}

/// No way forward from the current step.
///
/// Always an internal invariant violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// No outgoing transition matches the state.
    NoTransition { from: Step },
    /// The graph routed to a step nobody handles.
    NoCapability { step: Step },
}

impl fmt::Display for RoutingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTransition { from } => write!(f, "no transition matches state at '{from}'"),
            Self::NoCapability { step } => write!(f, "no capability registered for '{step}'"),
        }
    }
}

impl std::error::Error for RoutingError {}

/// A capability node failed to produce its patch.
///
/// The engine turns these into a fallback answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The text-generation call failed or timed out.
    Generation { step: Step, source: LlmError },
    /// A prompt could not be rendered.
    Prompt { step: Step, source: PromptError },
    /// The tool catalog could not be fetched.
    Catalog { source: TransportError },
    /// A field the node depends on was not set by an earlier step.
    MissingInput { step: Step, field: &'static str },
}

impl NodeError {
    /// The step that failed.
    #[must_use]
    pub fn step(&self) -> Step {
        match self {
            Self::Generation { step, .. }
            | Self::Prompt { step, .. }
            | Self::MissingInput { step, .. } => *step,
            Self::Catalog { .. } => Step::ToolSelecting,
        }
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generation { step, source } => write!(f, "{step}: {source}"),
            Self::Prompt { step, source } => write!(f, "{step}: {source}"),
            Self::Catalog { source } => write!(f, "failed to fetch tool catalog: {source}"),
            Self::MissingInput { step, field } => {
                write!(f, "{step}: '{field}' was not set by an earlier step")
            }
        }
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Generation { source, .. } => Some(source),
            Self::Prompt { source, .. } => Some(source),
            Self::Catalog { source } => Some(source),
            Self::MissingInput { .. } => None,
        }
    }
}

/// Hard failures of a turn.
///
/// Use these as context wrappers around store and routing errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Reading or writing session history failed.
    Storage { session_id: SessionId },
    /// The run reached a state with no way forward.
    Routing { run_id: RunId },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage { session_id } => {
                write!(f, "session storage failed for session {session_id}")
            }
            Self::Routing { run_id } => write!(f, "routing failed for run {run_id}"),
        }
    }
}

impl std::error::Error for EngineError {}
