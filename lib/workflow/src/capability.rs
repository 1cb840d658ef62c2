//! The shared interface of pipeline stages.

use crate::error::NodeError;
use crate::state::{ConversationState, StatePatch};
use crate::step::Step;
use async_trait::async_trait;

/// One pipeline stage.
///
/// A capability reads the running state and returns the fields it produced.
/// It must not rely on being called only once per run.
#[async_trait]
pub trait Capability: Send + Sync {
    /// The step this capability handles.
    fn step(&self) -> Step;

    /// Produces this stage's patch.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures the stage cannot fold into state,
    /// such as an unreachable text-generation backend.
    async fn process(&self, state: &ConversationState) -> Result<StatePatch, NodeError>;
}
