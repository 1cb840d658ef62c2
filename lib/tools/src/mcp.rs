//! MCP (Model Context Protocol) client over streamable HTTP.
//!
//! A [`McpConnection`] is an owned lifecycle object: the protocol session is
//! opened lazily by the first `tools/list` or `tools/call`, reused for every
//! later request, and released exactly once by [`McpConnection::close`].
//! After close, every request fails with [`TransportError::Closed`].
//!
//! Every HTTP exchange is bounded by the request timeout. A `404` on a
//! request that carried a session id means the server expired the session;
//! the connection reopens it and retries that request once.
//!
//! Responses may arrive as a plain JSON body or as a `text/event-stream`
//! carrying the JSON-RPC message in `data:` lines; both are accepted.

use crate::descriptor::{ToolArguments, ToolDescriptor};
use crate::error::TransportError;
use crate::transport::{CallToolResponse, ContentBlock, ToolTransport};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{Value as JsonValue, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

const PROTOCOL_VERSION: &str = "2025-03-26";
const SESSION_HEADER: &str = "Mcp-Session-Id";
const ACCEPT_BOTH: &str = "application/json, text/event-stream";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on `tools/list` pages, guarding against a server that never
/// stops returning cursors.
const MAX_LIST_PAGES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConnectionState {
    Idle,
    Ready { session_id: Option<String> },
    Closed,
}

/// Connection to one MCP server endpoint.
#[derive(Debug)]
pub struct McpConnection {
    client: reqwest::Client,
    endpoint: String,
    request_timeout: Duration,
    state: Mutex<ConnectionState>,
    next_id: AtomicU64,
}

/// Raw HTTP reply, before JSON-RPC decoding.
struct HttpReply {
    session_id: Option<String>,
    content_type: String,
    body: String,
}

impl McpConnection {
    /// Creates an unopened connection to `endpoint`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    /// Creates an unopened connection using a preconfigured HTTP client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            state: Mutex::new(ConnectionState::Idle),
            next_id: AtomicU64::new(1),
        }
    }

    /// Bounds each HTTP exchange with the server, including session setup.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Returns the endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns true once [`close`](Self::close) has run.
    pub async fn is_closed(&self) -> bool {
        *self.state.lock().await == ConnectionState::Closed
    }

    /// Releases the protocol session.
    ///
    /// Sends an HTTP `DELETE` carrying the session header when the server
    /// issued one. Calling `close` more than once is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the server could not be reached. The connection
    /// is marked closed either way.
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        let previous = std::mem::replace(&mut *state, ConnectionState::Closed);

        let ConnectionState::Ready {
            session_id: Some(session_id),
        } = previous
        else {
            debug!("no server session to release");
            return Ok(());
        };

        let release = self.client.delete(&self.endpoint).header(SESSION_HEADER, &session_id);
        let response = self
            .bounded(async move {
                release
                    .send()
                    .await
                    .map_err(|e| TransportError::ConnectionFailed {
                        details: e.to_string(),
                    })
            })
            .await?;

        // 405 means the server does not support explicit termination.
        if !response.status().is_success() {
            debug!(status = %response.status(), "server declined session release");
        }
        info!("tool server session released");
        Ok(())
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn bounded<T>(
        &self,
        exchange: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        match tokio::time::timeout(self.request_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    timeout_ms = self.request_timeout.as_millis(),
                    "tool server request timed out"
                );
                Err(TransportError::TimedOut {
                    after: self.request_timeout,
                })
            }
        }
    }

    /// Forgets `expired` so the next request opens a fresh session.
    async fn reset_session(&self, expired: Option<&str>) {
        let mut state = self.state.lock().await;
        let stale = matches!(
            &*state,
            ConnectionState::Ready { session_id } if session_id.as_deref() == expired
        );
        if stale {
            *state = ConnectionState::Idle;
        }
    }

    /// Opens the session if needed and returns the server session id.
    async fn ensure_ready(&self) -> Result<Option<String>, TransportError> {
        let mut state = self.state.lock().await;
        match &*state {
            ConnectionState::Closed => return Err(TransportError::Closed),
            ConnectionState::Ready { session_id } => return Ok(session_id.clone()),
            ConnectionState::Idle => {}
        }

        let id = self.next_request_id();
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                }
            }
        });
        let reply = self.post(None, &request).await?;
        let result = decode_reply(&reply, id)?;
        let session_id = reply.session_id;

        let initialized = json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
        });
        self.post(session_id.as_deref(), &initialized).await?;

        info!(
            server = %result.pointer("/serverInfo/name").and_then(JsonValue::as_str).unwrap_or("unknown"),
            has_session = session_id.is_some(),
            "tool server session opened"
        );
        *state = ConnectionState::Ready {
            session_id: session_id.clone(),
        };
        Ok(session_id)
    }

    async fn post(
        &self,
        session_id: Option<&str>,
        body: &JsonValue,
    ) -> Result<HttpReply, TransportError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, ACCEPT_BOTH)
            .json(body);
        if let Some(session_id) = session_id {
            request = request.header(SESSION_HEADER, session_id);
        }

        self.bounded(async move {
            let response = request
                .send()
                .await
                .map_err(|e| TransportError::ConnectionFailed {
                    details: e.to_string(),
                })?;

            let status = response.status();
            let session_id = header_string(response.headers(), SESSION_HEADER);
            let content_type =
                header_string(response.headers(), CONTENT_TYPE.as_str()).unwrap_or_default();
            let body = response
                .text()
                .await
                .map_err(|e| TransportError::Protocol {
                    details: format!("failed to read response body: {e}"),
                })?;

            if !status.is_success() {
                return Err(TransportError::HttpStatus {
                    status: status.as_u16(),
                    body,
                });
            }

            Ok(HttpReply {
                session_id,
                content_type,
                body,
            })
        })
        .await
    }

    /// Sends one JSON-RPC request and returns its `result`.
    async fn request(&self, method: &str, params: JsonValue) -> Result<JsonValue, TransportError> {
        let session_id = self.ensure_ready().await?;
        match self.send_rpc(session_id.as_deref(), method, &params).await {
            Err(TransportError::HttpStatus { status: 404, .. }) if session_id.is_some() => {
                warn!(%method, "tool server dropped the session, reopening");
                self.reset_session(session_id.as_deref()).await;
                let session_id = self.ensure_ready().await?;
                self.send_rpc(session_id.as_deref(), method, &params).await
            }
            result => result,
        }
    }

    async fn send_rpc(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: &JsonValue,
    ) -> Result<JsonValue, TransportError> {
        let id = self.next_request_id();
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let reply = self.post(session_id, &request).await?;
        decode_reply(&reply, id)
    }
}

#[async_trait]
impl ToolTransport for McpConnection {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, TransportError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let result = self.request("tools/list", params).await?;
            let (page, next) = parse_tool_list(&result)?;
            tools.extend(page);

            match next {
                Some(next) => cursor = Some(next),
                None => {
                    debug!(count = tools.len(), "fetched tool catalog");
                    return Ok(tools);
                }
            }
        }

        warn!(count = tools.len(), "tool catalog pagination did not terminate");
        Ok(tools)
    }

    #[instrument(skip(self, arguments), fields(endpoint = %self.endpoint))]
    async fn call_tool(
        &self,
        name: &str,
        arguments: &ToolArguments,
    ) -> Result<CallToolResponse, TransportError> {
        let result = self
            .request(
                "tools/call",
                json!({ "name": name, "arguments": arguments }),
            )
            .await?;
        Ok(parse_call_result(&result))
    }
}

fn header_string(headers: &reqwest::header::HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn decode_reply(reply: &HttpReply, id: u64) -> Result<JsonValue, TransportError> {
    if reply.content_type.starts_with("text/event-stream") {
        for data in sse_data(&reply.body) {
            let Ok(message) = serde_json::from_str::<JsonValue>(&data) else {
                continue;
            };
            if message.get("id").and_then(JsonValue::as_u64) == Some(id) {
                return rpc_result(message);
            }
        }
        return Err(TransportError::Protocol {
            details: format!("event stream ended without a response to request {id}"),
        });
    }

    let message: JsonValue =
        serde_json::from_str(&reply.body).map_err(|e| TransportError::Protocol {
            details: format!("invalid JSON-RPC response: {e}"),
        })?;
    rpc_result(message)
}

/// Collects the `data:` payload of each server-sent event.
///
/// Multiple `data:` lines within one event are joined with `\n`; events are
/// separated by a blank line.
fn sse_data(body: &str) -> Vec<String> {
    let mut events = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in body.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            if !current.is_empty() {
                events.push(current.join("\n"));
                current.clear();
            }
        } else if let Some(data) = line.strip_prefix("data:") {
            current.push(data.strip_prefix(' ').unwrap_or(data));
        }
    }
    if !current.is_empty() {
        events.push(current.join("\n"));
    }
    events
}

fn rpc_result(mut message: JsonValue) -> Result<JsonValue, TransportError> {
    if let Some(error) = message.get("error") {
        return Err(TransportError::Remote {
            code: error.get("code").and_then(JsonValue::as_i64).unwrap_or(0),
            message: error
                .get("message")
                .and_then(JsonValue::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        });
    }
    match message.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(TransportError::Protocol {
            details: "response has neither result nor error".to_string(),
        }),
    }
}

fn parse_tool_list(result: &JsonValue) -> Result<(Vec<ToolDescriptor>, Option<String>), TransportError> {
    let entries = result
        .get("tools")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| TransportError::Protocol {
            details: "tools/list result has no tools array".to_string(),
        })?;

    let mut tools = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(name) = entry.get("name").and_then(JsonValue::as_str) else {
            warn!("skipping tool entry without a name");
            continue;
        };
        let description = entry
            .get("description")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        let schema = entry
            .get("inputSchema")
            .cloned()
            .unwrap_or_else(|| json!({}));
        tools.push(ToolDescriptor::new(name, description).with_input_schema(schema));
    }

    let next = result
        .get("nextCursor")
        .and_then(JsonValue::as_str)
        .filter(|cursor| !cursor.is_empty())
        .map(str::to_string);
    Ok((tools, next))
}

fn parse_call_result(result: &JsonValue) -> CallToolResponse {
    let content: Vec<ContentBlock> = result
        .get("content")
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
        .map(|block| ContentBlock {
            text: block
                .get("text")
                .and_then(JsonValue::as_str)
                .map(str::to_string),
        })
        .collect();

    let is_error = result
        .get("isError")
        .and_then(JsonValue::as_bool)
        .unwrap_or(false);
    if !is_error {
        return CallToolResponse {
            content,
            error: None,
        };
    }

    let mut response = CallToolResponse {
        content,
        error: None,
    };
    let text = response.text();
    response.error = Some(if text.is_empty() {
        "tool reported an error".to_string()
    } else {
        text
    });
    response
}
