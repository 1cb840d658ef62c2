//! Shared application state.

use std::sync::Arc;
use waypoint_conversation::SessionStore;
use waypoint_workflow::WorkflowEngine;

/// Shared application state.
pub struct AppState {
    /// The turn engine; also owns the session store.
    pub engine: WorkflowEngine,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(engine: WorkflowEngine) -> Self {
        Self { engine }
    }

    /// The session store behind the engine.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        self.engine.store()
    }
}
