//! Tool-call bridge
//!
//! Correlates model tool requests with executor outcomes. The streaming
//! backend sends requests with ids that must be echoed back; the polling
//! backend embeds a JSON call in plain reply text.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::declarations::ToolDeclaration;
use super::executor::{ToolExecutor, ToolOutcome};
use crate::prompt;

/// Lifecycle of one tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    /// Dispatched, no outcome yet
    Pending,
    /// Outcome produced
    Resolved,
}

/// Record of one tool call
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub correlation_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub status: ToolStatus,
}

/// Tool request from the streaming backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// Reply to a streaming tool request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResponse {
    /// Echo of the request id
    pub id: String,
    pub name: String,
    /// `{ "result": <outcome> }`
    pub response: Value,
}

/// Tool call found inside a plain-text reply
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EmbeddedToolCall {
    pub tool: String,
    pub args: serde_json::Map<String, Value>,
}

/// Routes tool calls to an executor and tracks them by correlation id
pub struct ToolBridge {
    declarations: Vec<ToolDeclaration>,
    executor: Arc<dyn ToolExecutor>,
    /// In-flight calls only
    invocations: Mutex<HashMap<String, ToolInvocation>>,
}

impl ToolBridge {
    /// Create a bridge for a tool catalogue
    #[must_use]
    pub fn new(declarations: Vec<ToolDeclaration>, executor: Arc<dyn ToolExecutor>) -> Self {
        Self {
            declarations,
            executor,
            invocations: Mutex::new(HashMap::new()),
        }
    }

    /// The advertised catalogue
    #[must_use]
    pub fn declarations(&self) -> &[ToolDeclaration] {
        &self.declarations
    }

    /// Whether `name` is in the catalogue
    #[must_use]
    pub fn is_known(&self, name: &str) -> bool {
        self.declarations.iter().any(|d| d.name == name)
    }

    /// Run one tool call to an outcome
    ///
    /// Unknown names and executor failures both come back as a single
    /// error outcome; nothing is retried.
    pub async fn dispatch(&self, name: &str, args: &Value) -> ToolOutcome {
        if !self.is_known(name) {
            tracing::warn!(tool = name, "model requested an unknown tool");
            return ToolOutcome::error("Unknown tool");
        }

        tracing::debug!(tool = name, "dispatching tool call");

        match self.executor.execute(name, args).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "tool execution failed");
                ToolOutcome::error(e.to_string())
            }
        }
    }

    /// Resolve a correlated request from the streaming backend
    ///
    /// The call is tracked only while it is in flight.
    pub async fn resolve(&self, request: ToolCallRequest) -> ToolCallResponse {
        self.record(ToolInvocation {
            correlation_id: request.id.clone(),
            tool_name: request.name.clone(),
            arguments: request.args.clone(),
            status: ToolStatus::Pending,
        });

        let outcome = self.dispatch(&request.name, &request.args).await;
        if let Some(invocation) = self.finish(&request.id) {
            tracing::debug!(
                id = %invocation.correlation_id,
                tool = %invocation.tool_name,
                status = ?invocation.status,
                "tool call resolved"
            );
        }

        ToolCallResponse {
            id: request.id,
            name: request.name,
            response: json!({ "result": outcome.to_value() }),
        }
    }

    /// Look up an in-flight call by correlation id
    #[must_use]
    pub fn invocation(&self, correlation_id: &str) -> Option<ToolInvocation> {
        self.invocations
            .lock()
            .ok()
            .and_then(|m| m.get(correlation_id).cloned())
    }

    /// Number of calls still awaiting an outcome
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.invocations.lock().map(|m| m.len()).unwrap_or(0)
    }

    fn record(&self, invocation: ToolInvocation) {
        if let Ok(mut map) = self.invocations.lock() {
            map.insert(invocation.correlation_id.clone(), invocation);
        }
    }

    /// Stop tracking a call, returning its resolved record
    fn finish(&self, correlation_id: &str) -> Option<ToolInvocation> {
        let mut invocation = self.invocations.lock().ok()?.remove(correlation_id)?;
        invocation.status = ToolStatus::Resolved;
        Some(invocation)
    }
}

/// Find an embedded `{ "tool": …, "args": {…} }` call in reply text
///
/// Only the first balanced top-level `{…}` region is considered. Anything
/// that does not parse into that shape means the reply is plain text.
#[must_use]
pub fn extract_embedded_call(reply: &str) -> Option<EmbeddedToolCall> {
    let region = first_json_object(reply)?;
    match serde_json::from_str::<EmbeddedToolCall>(region) {
        Ok(call) => Some(call),
        Err(e) => {
            tracing::trace!(error = %e, "reply is not a tool call");
            None
        }
    }
}

/// The turn text carrying a tool outcome back to the polling backend
#[must_use]
pub fn follow_up_prompt(outcome: &ToolOutcome) -> String {
    prompt::tool_result_turn(&outcome.to_value())
}

/// Slice of the first balanced `{…}` region, honoring JSON strings
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }

    None
}
