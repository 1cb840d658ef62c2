//! Workflow graph implementation using petgraph.
//!
//! The per-turn pipeline is a directed graph where:
//! - Nodes are [`Step`]s
//! - Edges carry a [`Transition`] guard evaluated against the state
//!
//! Routing is a pure function of the state. When several outgoing guards
//! match, the transition added first wins.

use crate::error::{GraphError, RoutingError};
use crate::state::{ConversationState, ToolSelection};
use crate::step::Step;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Guard on an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// Unconditional.
    Always,
    /// A real catalog tool was selected.
    ToolSelected,
    /// The selector answered with the "no tool found" sentinel.
    NoToolSelected,
}

impl Transition {
    /// Returns true if this guard lets `state` through.
    ///
    /// A state with no selection at all matches neither tool guard.
    #[must_use]
    pub fn matches(&self, state: &ConversationState) -> bool {
        match self {
            Self::Always => true,
            Self::ToolSelected => matches!(state.selected_tool, Some(ToolSelection::Selected(_))),
            Self::NoToolSelected => matches!(state.selected_tool, Some(ToolSelection::NoToolFound)),
        }
    }
}

/// The step graph driving one turn.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    graph: DiGraph<Step, Transition>,
    /// Map from Step to petgraph's NodeIndex for O(1) lookup.
    index: HashMap<Step, NodeIndex>,
}

impl WorkflowGraph {
    /// Every run starts here.
    pub const ENTRY: Step = Step::ToolSelecting;

    /// Creates a new empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// The tool-routing pipeline.
    ///
    /// `tool_selecting` branches to `parameter_extracting` or, when no tool
    /// fits, straight to `generating`; every other step has one successor.
    #[must_use]
    pub fn standard() -> Self {
        let mut graph = Self::new();
        for step in Step::ALL {
            graph.add_step(step);
        }
        let edges = [
            (Step::ToolSelecting, Step::ParameterExtracting, Transition::ToolSelected),
            (Step::ToolSelecting, Step::Generating, Transition::NoToolSelected),
            (Step::ParameterExtracting, Step::ToolExecuting, Transition::Always),
            (Step::ToolExecuting, Step::Generating, Transition::Always),
            (Step::Generating, Step::End, Transition::Always),
        ];
        for (from, to, transition) in edges {
            let (from, to) = (graph.index[&from], graph.index[&to]);
            graph.graph.add_edge(from, to, transition);
        }
        graph
    }

    /// Adds a step. Adding an existing step is a no-op.
    pub fn add_step(&mut self, step: Step) {
        if !self.index.contains_key(&step) {
            let index = self.graph.add_node(step);
            self.index.insert(step, index);
        }
    }

    /// Adds a guarded transition between two steps.
    ///
    /// # Errors
    ///
    /// Returns an error if either step is not in the graph.
    pub fn add_transition(
        &mut self,
        from: Step,
        to: Step,
        transition: Transition,
    ) -> Result<(), GraphError> {
        let from = *self
            .index
            .get(&from)
            .ok_or(GraphError::StepNotFound { step: from })?;
        let to = *self
            .index
            .get(&to)
            .ok_or(GraphError::StepNotFound { step: to })?;
        self.graph.add_edge(from, to, transition);
        Ok(())
    }

    /// Returns true if `step` is in the graph.
    #[must_use]
    pub fn contains(&self, step: Step) -> bool {
        self.index.contains_key(&step)
    }

    /// Returns all steps in the graph.
    pub fn steps(&self) -> impl Iterator<Item = Step> + '_ {
        self.graph.node_weights().copied()
    }

    /// Returns the number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns the outgoing transitions of `step`, in insertion order.
    pub fn successors(&self, step: Step) -> Vec<(Step, Transition)> {
        let Some(&index) = self.index.get(&step) else {
            return Vec::new();
        };

        let mut edges: Vec<_> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .collect();
        edges.sort_by_key(|edge| edge.id());
        edges
            .into_iter()
            .map(|edge| (self.graph[edge.target()], *edge.weight()))
            .collect()
    }

    /// Picks the step that follows `from` given `state`.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::NoTransition`] if no outgoing guard matches.
    pub fn next(&self, from: Step, state: &ConversationState) -> Result<Step, RoutingError> {
        self.successors(from)
            .into_iter()
            .find(|(_, transition)| transition.matches(state))
            .map(|(step, _)| step)
            .ok_or(RoutingError::NoTransition { from })
    }

    /// Validates the graph.
    ///
    /// Checks:
    /// - The entry step is present
    /// - Every non-terminal step has an outgoing transition
    /// - No cycles (every run terminates)
    ///
    /// # Errors
    ///
    /// Returns an error describing the first validation failure.
    pub fn validate(&self) -> Result<(), GraphError> {
        if !self.contains(Self::ENTRY) {
            return Err(GraphError::MissingEntry { entry: Self::ENTRY });
        }

        for index in self.graph.node_indices() {
            let step = self.graph[index];
            let outgoing = self
                .graph
                .edges_directed(index, Direction::Outgoing)
                .count();
            if !step.is_terminal() && outgoing == 0 {
                return Err(GraphError::DeadEnd { step });
            }
        }

        if petgraph::algo::is_cyclic_directed(&self.graph) {
            return Err(GraphError::CycleDetected);
        }

        Ok(())
    }
}

impl Default for WorkflowGraph {
    fn default() -> Self {
        Self::new()
    }
}
