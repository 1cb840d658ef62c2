//! Tool invocation: resolve, validate, call once, normalize.

use crate::descriptor::{ToolArguments, ToolDescriptor, find_tool};
use crate::schema::{ValidationError, validate};
use crate::transport::ToolTransport;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Normalized result of a tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToolOutcome {
    /// No tool with that name exists in the catalog.
    NotFound { tool: String },
    /// The arguments failed schema validation; the tool was not called.
    ValidationFailed { errors: Vec<ValidationError> },
    /// The transport failed, timed out, or the tool reported an error.
    ExecutionFailed { message: String },
    /// Flattened textual content of the tool response.
    Success { result: String },
}

impl ToolOutcome {
    /// Returns true for [`ToolOutcome::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Invokes remote tools with a single bounded attempt per call.
///
/// Retrying is left to the caller.
#[derive(Debug, Clone)]
pub struct ToolInvoker {
    timeout: Duration,
}

impl ToolInvoker {
    /// Creates an invoker bounding each remote call by `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Returns the per-call deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolves `tool_name` in `catalog`, validates `args`, and calls the tool.
    ///
    /// Never fails: every problem is folded into the returned outcome.
    #[instrument(skip(self, args, catalog, transport), fields(tool = %tool_name))]
    pub async fn invoke(
        &self,
        tool_name: &str,
        args: &ToolArguments,
        catalog: &[ToolDescriptor],
        transport: &dyn ToolTransport,
    ) -> ToolOutcome {
        let Some(tool) = find_tool(catalog, tool_name) else {
            debug!("tool not in catalog");
            return ToolOutcome::NotFound {
                tool: tool_name.to_string(),
            };
        };

        let errors = validate(&tool.input_schema, args);
        if !errors.is_empty() {
            debug!(error_count = errors.len(), "tool arguments failed validation");
            return ToolOutcome::ValidationFailed { errors };
        }

        let call = transport.call_tool(tool_name, args);
        match tokio::time::timeout(self.timeout, call).await {
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis(), "tool call timed out");
                ToolOutcome::ExecutionFailed {
                    message: format!(
                        "tool call timed out after {}s",
                        self.timeout.as_secs_f64()
                    ),
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "tool call failed");
                ToolOutcome::ExecutionFailed {
                    message: e.to_string(),
                }
            }
            Ok(Ok(response)) => match response.error {
                Some(message) => {
                    debug!(%message, "tool reported an error");
                    ToolOutcome::ExecutionFailed { message }
                }
                None => ToolOutcome::Success {
                    result: response.text(),
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::CallToolResponse;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every call and replies with a canned response.
    struct FakeTransport {
        reply: Result<CallToolResponse, TransportError>,
        delay: Duration,
        calls: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        fn replying(reply: Result<CallToolResponse, TransportError>) -> Self {
            Self {
                reply,
                delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ToolTransport for FakeTransport {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, TransportError> {
            Ok(catalog())
        }

        async fn call_tool(
            &self,
            name: &str,
            _arguments: &ToolArguments,
        ) -> Result<CallToolResponse, TransportError> {
            self.calls.lock().unwrap().push(name.to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.reply.clone()
        }
    }

    fn catalog() -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new("search_flights", "Search flights").with_input_schema(json!({
                "required": ["origin", "destination"],
                "properties": {
                    "origin": {"type": "string"},
                    "destination": {"type": "string"}
                }
            })),
        ]
    }

    fn valid_args() -> ToolArguments {
        let mut args = ToolArguments::new();
        args.insert("origin".into(), json!("IST"));
        args.insert("destination".into(), json!("ESB"));
        args
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let transport = FakeTransport::replying(Ok(CallToolResponse::from_text("x")));
        let outcome = ToolInvoker::new(Duration::from_secs(1))
            .invoke("book_hotel", &valid_args(), &catalog(), &transport)
            .await;
        assert_eq!(
            outcome,
            ToolOutcome::NotFound {
                tool: "book_hotel".to_string()
            }
        );
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn invalid_arguments_skip_the_remote_call() {
        let transport = FakeTransport::replying(Ok(CallToolResponse::from_text("x")));
        let mut args = ToolArguments::new();
        args.insert("origin".into(), json!("Istanbul"));

        let outcome = ToolInvoker::new(Duration::from_secs(1))
            .invoke("search_flights", &args, &catalog(), &transport)
            .await;

        let ToolOutcome::ValidationFailed { errors } = outcome else {
            panic!("expected validation failure, got {outcome:?}");
        };
        assert_eq!(errors, vec![ValidationError::missing("destination")]);
        assert_eq!(transport.call_count(), 0);

        // Re-validating the same input reproduces the same error set.
        assert_eq!(validate(&catalog()[0].input_schema, &args), errors);
    }

    #[tokio::test]
    async fn success_flattens_text_content() {
        let transport = FakeTransport::replying(Ok(CallToolResponse {
            content: vec![
                crate::transport::ContentBlock::text("TK2120 08:00"),
                crate::transport::ContentBlock::text("TK2124 12:00"),
            ],
            error: None,
        }));
        let outcome = ToolInvoker::new(Duration::from_secs(1))
            .invoke("search_flights", &valid_args(), &catalog(), &transport)
            .await;
        assert_eq!(
            outcome,
            ToolOutcome::Success {
                result: "TK2120 08:00\nTK2124 12:00".to_string()
            }
        );
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn declared_error_maps_to_execution_failed() {
        let transport = FakeTransport::replying(Ok(CallToolResponse::failed("no flights")));
        let outcome = ToolInvoker::new(Duration::from_secs(1))
            .invoke("search_flights", &valid_args(), &catalog(), &transport)
            .await;
        assert_eq!(
            outcome,
            ToolOutcome::ExecutionFailed {
                message: "no flights".to_string()
            }
        );
    }

    #[tokio::test]
    async fn transport_error_maps_to_execution_failed_without_retry() {
        let transport = FakeTransport::replying(Err(TransportError::ConnectionFailed {
            details: "refused".to_string(),
        }));
        let outcome = ToolInvoker::new(Duration::from_secs(1))
            .invoke("search_flights", &valid_args(), &catalog(), &transport)
            .await;
        let ToolOutcome::ExecutionFailed { message } = outcome else {
            panic!("expected execution failure");
        };
        assert!(message.contains("refused"));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out() {
        let mut transport = FakeTransport::replying(Ok(CallToolResponse::from_text("late")));
        transport.delay = Duration::from_secs(10);

        let outcome = ToolInvoker::new(Duration::from_millis(50))
            .invoke("search_flights", &valid_args(), &catalog(), &transport)
            .await;
        let ToolOutcome::ExecutionFailed { message } = outcome else {
            panic!("expected timeout");
        };
        assert!(message.contains("timed out"));
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let value = serde_json::to_value(ToolOutcome::NotFound {
            tool: "x".to_string(),
        })
        .unwrap();
        assert_eq!(value["outcome"], "not_found");
    }
}
