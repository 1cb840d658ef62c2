//! The per-turn driver.
//!
//! `process` runs one user turn end to end:
//!
//! 1. Take the session's lease so turns of one session never interleave
//! 2. Seed the state with the newest stored history plus the new human line
//! 3. Walk the graph from the entry step, merging each capability's patch
//! 4. Append a snapshot with the full history and the answer
//!
//! Node failures become a fallback answer and the turn still completes.
//! Only storage failures and unroutable states are returned as errors.

use crate::capabilities::{AnswerGenerator, ParameterExtractor, ToolExecutor, ToolSelector};
use crate::capability::Capability;
use crate::error::{EngineError, GraphError, NodeError, RoutingError};
use crate::graph::WorkflowGraph;
use crate::state::ConversationState;
use crate::step::Step;
use rootcause::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, error, info, info_span, warn};
use waypoint_ai::{LlmBackend, LlmError};
use waypoint_conversation::{
    RegistryConfig, SessionRegistry, SessionStore, Snapshot, ai_line, human_line,
};
use waypoint_core::{RunId, SessionId, SessionRecordId};
use waypoint_tools::{ToolInvoker, ToolTransport};

/// Answer recorded when a capability fails mid-run for an internal reason.
pub const FAILURE_ANSWER: &str =
    "Sorry, something went wrong while handling your request. Please try again.";

const TOOLS_UNAVAILABLE_ANSWER: &str =
    "Sorry, I can't reach my tools right now, so I can't look that up. Please try again in a moment.";

const GENERATION_TIMEOUT_ANSWER: &str =
    "Sorry, I took too long to put a reply together. Please try again.";

const GENERATION_UNAVAILABLE_ANSWER: &str =
    "Sorry, my language service is unavailable right now. Please try again shortly.";

/// Picks the answer that tells the user what kind of failure ended the run.
fn fallback_answer(error: &NodeError) -> &'static str {
    match error {
        NodeError::Catalog { .. } => TOOLS_UNAVAILABLE_ANSWER,
        NodeError::Generation {
            source: LlmError::Timeout,
            ..
        } => GENERATION_TIMEOUT_ANSWER,
        NodeError::Generation { .. } => GENERATION_UNAVAILABLE_ANSWER,
        NodeError::Prompt { .. } | NodeError::MissingInput { .. } => FAILURE_ANSWER,
    }
}

/// Engine tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Deadline for each text-generation call.
    pub generation_timeout: Duration,
    /// Deadline for each remote tool call.
    pub tool_timeout: Duration,
    /// Session registry limits.
    pub sessions: RegistryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_secs(60),
            tool_timeout: Duration::from_secs(30),
            sessions: RegistryConfig::default(),
        }
    }
}

/// Result of one completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Identifies this run in logs.
    pub run_id: RunId,
    /// The snapshot written for this turn.
    pub record_id: SessionRecordId,
    /// Text returned to the user.
    pub answer: String,
    /// Final state of the run, for diagnostics.
    pub state: ConversationState,
    /// Set when a capability failed and `answer` is the fallback.
    pub node_failure: Option<String>,
}

/// Drives conversational turns through the capability graph.
pub struct WorkflowEngine {
    graph: WorkflowGraph,
    capabilities: HashMap<Step, Arc<dyn Capability>>,
    store: Arc<dyn SessionStore>,
    sessions: SessionRegistry,
}

impl WorkflowEngine {
    /// Creates an engine with the standard graph and the four built-in capabilities.
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        backend: Arc<dyn LlmBackend>,
        transport: Arc<dyn ToolTransport>,
        config: EngineConfig,
    ) -> Self {
        let capabilities: [Arc<dyn Capability>; 4] = [
            Arc::new(ToolSelector::new(
                Arc::clone(&backend),
                Arc::clone(&transport),
                config.generation_timeout,
                config.tool_timeout,
            )),
            Arc::new(ParameterExtractor::new(
                Arc::clone(&backend),
                config.generation_timeout,
            )),
            Arc::new(ToolExecutor::new(
                ToolInvoker::new(config.tool_timeout),
                transport,
            )),
            Arc::new(AnswerGenerator::new(backend, config.generation_timeout)),
        ];

        Self {
            graph: WorkflowGraph::standard(),
            capabilities: capabilities
                .into_iter()
                .map(|capability| (capability.step(), capability))
                .collect(),
            store,
            sessions: SessionRegistry::new(config.sessions),
        }
    }

    /// Replaces the capability handling `capability.step()`.
    #[must_use]
    pub fn with_capability(mut self, capability: Arc<dyn Capability>) -> Self {
        self.capabilities.insert(capability.step(), capability);
        self
    }

    /// Replaces the transition graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph does not validate.
    pub fn with_graph(mut self, graph: WorkflowGraph) -> Result<Self, GraphError> {
        graph.validate()?;
        self.graph = graph;
        Ok(self)
    }

    /// The store snapshots are written to.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// The per-session lease registry.
    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Runs one user turn for `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] if history cannot be read or the new
    /// snapshot cannot be written, and [`EngineError::Routing`] if the graph
    /// has no transition for the state a step left behind.
    pub async fn process(
        &self,
        session_id: &SessionId,
        message: &str,
    ) -> waypoint_core::Result<TurnOutcome, EngineError> {
        let run_id = RunId::new();
        let span = info_span!("turn", %session_id, %run_id);
        self.run(run_id, session_id, message).instrument(span).await
    }

    async fn run(
        &self,
        run_id: RunId,
        session_id: &SessionId,
        message: &str,
    ) -> waypoint_core::Result<TurnOutcome, EngineError> {
        let _lease = self.sessions.acquire(session_id).await;

        let mut history = self
            .store
            .latest_history(session_id)
            .await
            .context(EngineError::Storage {
                session_id: session_id.clone(),
            })?;
        debug!(prior_lines = history.len(), "loaded history");
        history.push(human_line(message));

        let mut state = ConversationState::new(session_id.clone(), history, message);
        let mut node_failure = None;
        let mut step = WorkflowGraph::ENTRY;

        while !step.is_terminal() {
            let Some(capability) = self.capabilities.get(&step) else {
                return Err(unroutable(run_id, RoutingError::NoCapability { step }));
            };

            match capability.process(&state).await {
                Ok(patch) => state.apply(patch),
                Err(e) => {
                    warn!(%step, error = %e, "capability failed, answering with fallback");
                    state.answer = Some(fallback_answer(&e).to_string());
                    node_failure = Some(e.to_string());
                    break;
                }
            }

            step = match self.graph.next(step, &state) {
                Ok(next) => next,
                Err(e) => return Err(unroutable(run_id, e)),
            };
            debug!(%step, "advanced");
        }

        let answer = state
            .answer
            .clone()
            .unwrap_or_else(|| FAILURE_ANSWER.to_string());
        state.conversation_history.push(ai_line(&answer));

        let snapshot = Snapshot::new(state.conversation_history.clone(), Some(answer.clone()));
        let record_id = self
            .store
            .append(session_id, &snapshot)
            .await
            .context(EngineError::Storage {
                session_id: session_id.clone(),
            })?;

        info!(
            tool = state.selected_tool.as_ref().map(|t| t.name()),
            history_len = state.conversation_history.len(),
            failed = node_failure.is_some(),
            "turn completed"
        );

        Ok(TurnOutcome {
            run_id,
            record_id,
            answer,
            state,
            node_failure,
        })
    }
}

fn unroutable(run_id: RunId, e: RoutingError) -> Report<EngineError> {
    error!(error = %e, "no way forward from the current state");
    Report::<RoutingError>::from(e).context(EngineError::Routing { run_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::EMPTY_ANSWER_FALLBACK;
    use crate::capabilities::testing::{FakeTransport, ScriptedBackend, flight_tool, weather_tool};
    use crate::error::NodeError;
    use crate::graph::Transition;
    use crate::state::{StatePatch, ToolResult, ToolSelection};
    use async_trait::async_trait;
    use waypoint_ai::LlmError;
    use waypoint_conversation::{MemorySessionStore, SessionRecord, StoreError};
    use waypoint_tools::CallToolResponse;

    /// Replies like a model following each prompt's instructions.
    fn flight_backend(extraction: &'static str) -> ScriptedBackend {
        ScriptedBackend::new(move |prompt| {
            if prompt.contains("tool selection agent") {
                let request = prompt
                    .lines()
                    .find(|line| line.contains("User request:"))
                    .unwrap_or_default();
                if request.contains("flight") {
                    Ok("search_flights".to_string())
                } else {
                    Ok("no_tool_found".to_string())
                }
            } else if prompt.contains("fill JSON schemas") {
                Ok(extraction.to_string())
            } else if prompt.contains("Information is missing") {
                Ok("Where would you like to fly to?".to_string())
            } else if prompt.contains("no_suitable_tool") {
                Ok("Sorry, I can't help with that.".to_string())
            } else {
                Ok("Here are your flights.".to_string())
            }
        })
    }

    fn engine_with(
        store: Arc<dyn SessionStore>,
        backend: ScriptedBackend,
        transport: FakeTransport,
    ) -> WorkflowEngine {
        WorkflowEngine::new(
            store,
            Arc::new(backend),
            Arc::new(transport),
            EngineConfig::default(),
        )
    }

    fn transport() -> FakeTransport {
        FakeTransport::new(
            vec![flight_tool(), weather_tool()],
            CallToolResponse::from_text("TK2120 IST-ESB 09:00"),
        )
    }

    fn sid(value: &str) -> SessionId {
        SessionId::new(value).unwrap()
    }

    #[tokio::test]
    async fn full_tool_path() {
        let store = Arc::new(MemorySessionStore::new());
        let engine = engine_with(
            store.clone(),
            flight_backend(r#"{"origin": "IST", "destination": "ESB"}"#),
            transport(),
        );

        let outcome = engine.process(&sid("s"), "Find a flight IST to ESB").await.unwrap();

        assert_eq!(outcome.answer, "Here are your flights.");
        assert!(outcome.node_failure.is_none());
        assert_eq!(
            outcome.state.tool_result,
            Some(ToolResult::Success {
                result: "TK2120 IST-ESB 09:00".to_string()
            })
        );
        assert_eq!(
            store.latest_history(&sid("s")).await.unwrap(),
            vec![
                "Human: Find a flight IST to ESB".to_string(),
                "AI: Here are your flights.".to_string(),
            ]
        );
        let record = store.load(outcome.record_id).await.unwrap().unwrap();
        assert_eq!(record.payload.final_answer.as_deref(), Some("Here are your flights."));
    }

    #[tokio::test]
    async fn no_tool_short_circuits_to_answer() {
        let store = Arc::new(MemorySessionStore::new());
        let transport = Arc::new(transport());
        let engine = WorkflowEngine::new(
            store,
            Arc::new(flight_backend("{}")),
            Arc::clone(&transport) as Arc<dyn ToolTransport>,
            EngineConfig::default(),
        );

        let outcome = engine.process(&sid("s"), "Tell me a joke").await.unwrap();

        assert_eq!(outcome.state.selected_tool, Some(ToolSelection::NoToolFound));
        assert!(outcome.state.tool_result.is_none());
        assert!(outcome.state.tool_inputs.is_none());
        assert_eq!(outcome.answer, "Sorry, I can't help with that.");
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_arguments_ask_a_question() {
        let store = Arc::new(MemorySessionStore::new());
        let engine = engine_with(
            store,
            flight_backend(r#"{"origin": "IST", "destination": NaN, "passengers": NaN}"#),
            transport(),
        );

        let outcome = engine.process(&sid("s"), "Book a flight from Istanbul").await.unwrap();

        assert_eq!(
            outcome.state.tool_result.as_ref().and_then(ToolResult::error_kind),
            Some("validation_error")
        );
        assert_eq!(outcome.answer, "Where would you like to fly to?");
    }

    #[tokio::test]
    async fn history_grows_by_two_lines_per_turn() {
        let store = Arc::new(MemorySessionStore::new());
        let engine = engine_with(store.clone(), flight_backend("{}"), transport());
        let session = sid("monotonic");

        engine.process(&session, "Hello").await.unwrap();
        engine.process(&session, "Book a flight").await.unwrap();
        engine.process(&session, "Thanks").await.unwrap();

        let history = store.latest_history(&session).await.unwrap();
        assert_eq!(history.len(), 6);
        assert_eq!(history[0], "Human: Hello");
        assert_eq!(history[2], "Human: Book a flight");
        assert_eq!(history[4], "Human: Thanks");
        assert!(history[5].starts_with("AI: "));
    }

    #[tokio::test]
    async fn prior_turns_reach_the_extractor() {
        let store = Arc::new(MemorySessionStore::new());
        let backend = Arc::new(flight_backend(r#"{"origin": "IST", "destination": "ESB"}"#));
        let engine = WorkflowEngine::new(
            store,
            Arc::clone(&backend) as Arc<dyn LlmBackend>,
            Arc::new(transport()),
            EngineConfig::default(),
        );
        let session = sid("context");

        engine.process(&session, "I am in Istanbul").await.unwrap();
        engine.process(&session, "Book a flight to Ankara").await.unwrap();

        let prompts = backend.prompts.lock().unwrap();
        let extraction = prompts
            .iter()
            .find(|p| p.contains("fill JSON schemas"))
            .unwrap();
        assert!(extraction.contains("Human: I am in Istanbul\nAI: "));
        assert!(extraction.contains("Human: Book a flight to Ankara"));
    }

    #[tokio::test]
    async fn sessions_do_not_share_history() {
        let store = Arc::new(MemorySessionStore::new());
        let engine = engine_with(store.clone(), flight_backend("{}"), transport());

        engine.process(&sid("a"), "Hello from a").await.unwrap();
        engine.process(&sid("b"), "Hello from b").await.unwrap();

        assert_eq!(store.latest_history(&sid("b")).await.unwrap()[0], "Human: Hello from b");
        assert_eq!(store.latest_history(&sid("b")).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_turns_of_one_session_are_serialized() {
        let store = Arc::new(MemorySessionStore::new());
        let engine = Arc::new(engine_with(store.clone(), flight_backend("{}"), transport()));
        let session = sid("busy");

        let mut handles = Vec::new();
        for i in 0..5 {
            let engine = Arc::clone(&engine);
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                engine.process(&session, &format!("message {i}")).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.latest_history(&session).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn generation_failure_still_completes_the_turn() {
        let store = Arc::new(MemorySessionStore::new());
        let backend = ScriptedBackend::new(|_| Err(LlmError::Timeout));
        let engine = engine_with(store.clone(), backend, transport());

        let outcome = engine.process(&sid("s"), "Hello").await.unwrap();

        assert_eq!(outcome.answer, GENERATION_TIMEOUT_ANSWER);
        assert!(outcome.node_failure.unwrap().contains("timed out"));
        assert_eq!(
            store.latest_history(&sid("s")).await.unwrap(),
            vec![
                "Human: Hello".to_string(),
                format!("AI: {GENERATION_TIMEOUT_ANSWER}")
            ]
        );
    }

    #[tokio::test]
    async fn catalog_failure_still_completes_the_turn() {
        let store = Arc::new(MemorySessionStore::new());
        let engine = engine_with(store, flight_backend("{}"), FakeTransport::unreachable());

        let outcome = engine.process(&sid("s"), "Find a flight").await.unwrap();
        assert_eq!(outcome.answer, TOOLS_UNAVAILABLE_ANSWER);
        assert!(outcome.node_failure.unwrap().contains("tool catalog"));
    }

    #[tokio::test]
    async fn fallback_answer_names_the_failure() {
        let store = Arc::new(MemorySessionStore::new());
        let backend = ScriptedBackend::new(|_| {
            Err(LlmError::RequestFailed {
                reason: "503 Service Unavailable".to_string(),
            })
        });
        let engine = engine_with(store, backend, transport());

        let outcome = engine.process(&sid("s"), "Hello").await.unwrap();
        assert_eq!(outcome.answer, GENERATION_UNAVAILABLE_ANSWER);

        let answers = [
            TOOLS_UNAVAILABLE_ANSWER,
            GENERATION_TIMEOUT_ANSWER,
            GENERATION_UNAVAILABLE_ANSWER,
            FAILURE_ANSWER,
        ];
        for (i, a) in answers.iter().enumerate() {
            assert!(answers[i + 1..].iter().all(|b| a != b));
        }
        assert_eq!(
            fallback_answer(&NodeError::MissingInput {
                step: Step::Generating,
                field: "tool_result",
            }),
            FAILURE_ANSWER
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_tool_server_cannot_hang_a_turn() {
        let store = Arc::new(MemorySessionStore::new());
        let config = EngineConfig {
            generation_timeout: Duration::from_secs(1),
            tool_timeout: Duration::from_secs(1),
            ..EngineConfig::default()
        };
        let engine = WorkflowEngine::new(
            store.clone(),
            Arc::new(flight_backend("{}")),
            Arc::new(FakeTransport::stalled()),
            config,
        );

        let outcome = tokio::time::timeout(
            Duration::from_secs(3600),
            engine.process(&sid("s"), "Find a flight"),
        )
        .await
        .expect("turn finishes within the tool deadline")
        .unwrap();

        assert_eq!(outcome.answer, TOOLS_UNAVAILABLE_ANSWER);
        assert_eq!(store.latest_history(&sid("s")).await.unwrap().len(), 2);

        // The session lease was released, so the next turn runs too.
        let next = tokio::time::timeout(
            Duration::from_secs(3600),
            engine.process(&sid("s"), "Anyone there?"),
        )
        .await
        .expect("second turn is not blocked");
        assert!(next.is_ok());
    }

    #[tokio::test]
    async fn blank_answer_uses_placeholder() {
        let store = Arc::new(MemorySessionStore::new());
        let backend = ScriptedBackend::new(|prompt| {
            if prompt.contains("tool selection agent") {
                Ok("no_tool_found".to_string())
            } else {
                Ok(String::new())
            }
        });
        let engine = engine_with(store, backend, transport());

        let outcome = engine.process(&sid("s"), "Hi").await.unwrap();
        assert_eq!(outcome.answer, EMPTY_ANSWER_FALLBACK);
        assert!(outcome.node_failure.is_none());
    }

    /// A selector that never decides anything.
    struct Undecided;

    #[async_trait]
    impl Capability for Undecided {
        fn step(&self) -> Step {
            Step::ToolSelecting
        }

        async fn process(&self, _state: &ConversationState) -> Result<StatePatch, NodeError> {
            Ok(StatePatch::default())
        }
    }

    #[tokio::test]
    async fn unroutable_state_is_a_hard_error() {
        let store = Arc::new(MemorySessionStore::new());
        let engine = engine_with(store.clone(), flight_backend("{}"), transport())
            .with_capability(Arc::new(Undecided));

        let err = engine.process(&sid("s"), "Hello").await.unwrap_err();

        assert!(matches!(err.current_context(), EngineError::Routing { .. }));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn invalid_graph_is_rejected() {
        let engine = engine_with(
            Arc::new(MemorySessionStore::new()),
            flight_backend("{}"),
            transport(),
        );
        let mut graph = WorkflowGraph::new();
        graph.add_step(Step::ToolSelecting);
        graph.add_step(Step::Generating);
        graph
            .add_transition(Step::ToolSelecting, Step::Generating, Transition::Always)
            .unwrap();

        assert!(matches!(
            engine.with_graph(graph),
            Err(GraphError::DeadEnd {
                step: Step::Generating
            })
        ));
    }

    /// Reads succeed, writes fail.
    struct ReadOnlyStore;

    #[async_trait]
    impl SessionStore for ReadOnlyStore {
        async fn append(
            &self,
            _session_id: &SessionId,
            _snapshot: &Snapshot,
        ) -> waypoint_core::Result<SessionRecordId, StoreError> {
            Err(StoreError::QueryFailed {
                details: "disk I/O error".to_string(),
            }
            .into())
        }

        async fn latest_history(
            &self,
            _session_id: &SessionId,
        ) -> waypoint_core::Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }

        async fn load(
            &self,
            _id: SessionRecordId,
        ) -> waypoint_core::Result<Option<SessionRecord>, StoreError> {
            Ok(None)
        }

        async fn update(
            &self,
            _id: SessionRecordId,
            _snapshot: &Snapshot,
        ) -> waypoint_core::Result<bool, StoreError> {
            Ok(false)
        }

        async fn delete_record(
            &self,
            _id: SessionRecordId,
        ) -> waypoint_core::Result<bool, StoreError> {
            Ok(false)
        }

        async fn recent_records(
            &self,
            _session_id: &SessionId,
            _limit: u32,
        ) -> waypoint_core::Result<Vec<SessionRecord>, StoreError> {
            Ok(Vec::new())
        }

        async fn soft_delete(
            &self,
            _session_id: &SessionId,
        ) -> waypoint_core::Result<u64, StoreError> {
            Ok(0)
        }

        async fn expire_older_than(
            &self,
            _age: chrono::Duration,
        ) -> waypoint_core::Result<u64, StoreError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn storage_failure_is_propagated() {
        let engine = engine_with(Arc::new(ReadOnlyStore), flight_backend("{}"), transport());

        let err = engine.process(&sid("s"), "Hello").await.unwrap_err();

        assert!(matches!(
            err.current_context(),
            EngineError::Storage { session_id } if session_id.as_str() == "s"
        ));
    }
}
