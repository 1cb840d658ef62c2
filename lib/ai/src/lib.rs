//! Text-generation primitives for waypoint.
//!
//! The workflow treats text generation as an opaque prompt-in/text-out
//! capability. This crate owns everything on our side of that boundary:
//!
//! - **Backend**: The `LlmBackend` trait plus Gemini and OpenAI-compatible HTTP clients
//! - **Prompts**: `{{variable}}` templates for selection, extraction, and answering
//! - **Output**: Recovering a JSON object from free-form model output

pub mod backend;
pub mod error;
pub mod http;
pub mod output;
pub mod prompt;

pub use backend::{
    LlmBackend, LlmBackendConfig, LlmProvider, LlmRequest, LlmResponse, TokenUsage,
    generate_with_timeout,
};
pub use error::{LlmError, OutputParseError, PromptError};
pub use http::{GeminiBackend, OpenAiCompatibleBackend, build_backend};
pub use output::extract_json_object;
pub use prompt::{PromptTemplate, PromptVariables};
