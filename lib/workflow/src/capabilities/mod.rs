//! The four pipeline stages.
//!
//! Each talks to the outside world only through the `LlmBackend` and
//! `ToolTransport` seams, bounded by a per-call deadline.

mod answer;
mod executor;
mod extractor;
mod selector;

pub use answer::{AnswerGenerator, EMPTY_ANSWER_FALLBACK};
pub use executor::ToolExecutor;
pub use extractor::ParameterExtractor;
pub use selector::ToolSelector;

use crate::error::NodeError;
use crate::step::Step;
use std::time::Duration;
use waypoint_ai::{LlmBackend, LlmRequest, PromptTemplate, PromptVariables, generate_with_timeout};

/// Renders `template` and sends it to `backend` under `timeout`.
async fn ask(
    backend: &dyn LlmBackend,
    step: Step,
    template: &PromptTemplate,
    variables: &PromptVariables<'_>,
    timeout: Duration,
) -> Result<String, NodeError> {
    let prompt = template
        .render(variables)
        .map_err(|source| NodeError::Prompt { step, source })?;
    let response = generate_with_timeout(backend, &LlmRequest::new(prompt), timeout)
        .await
        .map_err(|source| NodeError::Generation { step, source })?;
    Ok(response.content)
}
