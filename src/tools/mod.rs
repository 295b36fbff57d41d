//! Tool provider boundary.
//!
//! The agent never computes anything itself. Every number comes from an
//! external tool process reached through a [`ToolSession`]. Sessions are
//! short-lived: a [`ToolLauncher`] starts a fresh one for every query and the
//! caller closes it when the query is done.

pub mod mcp;

pub use mcp::{McpLauncher, McpSession};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::llm::ToolDefinition;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Failed to start tool server: {0}")]
    Spawn(String),

    #[error("Tool server protocol error: {0}")]
    Protocol(String),

    #[error("Timeout after {0} seconds waiting for tool server")]
    Timeout(u64),

    /// JSON-RPC level error returned for a call.
    #[error("[{code}] {message}")]
    Rejected { code: i64, message: String },

    /// The tool ran and reported an error result (e.g. division by zero).
    #[error("{0}")]
    Failed(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

impl ToolError {
    /// Whether the tool call itself failed, as opposed to the session or
    /// transport around it.
    pub fn is_invocation_failure(&self) -> bool {
        matches!(
            self,
            Self::Rejected { .. }
                | Self::Failed(_)
                | Self::InvalidArguments(_)
                | Self::UnknownTool(_)
        )
    }
}

/// A capability advertised by the tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// JSON schema for the tool's arguments
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: Value,
}

impl ToolInfo {
    /// Describe this capability in the shape the completion API expects.
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::function(&self.name, &self.description, self.input_schema.clone())
    }
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// A live connection to a tool process.
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Capabilities discovered when the session started.
    fn tools(&self) -> &[ToolInfo];

    /// Invoke a tool and return its textual result.
    async fn call_tool(&self, name: &str, args: Value) -> Result<String, ToolError>;

    /// Terminate the tool process. Safe to call more than once.
    async fn close(&self);
}

/// Starts tool sessions.
#[async_trait]
pub trait ToolLauncher: Send + Sync {
    async fn start(&self) -> Result<Box<dyn ToolSession>, ToolError>;
}

/// Completion-API definitions for every tool in a session.
pub fn tool_definitions(session: &dyn ToolSession) -> Vec<ToolDefinition> {
    session.tools().iter().map(ToolInfo::to_definition).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_failures_are_classified() {
        assert!(ToolError::Failed("division by zero".into()).is_invocation_failure());
        let rejected = ToolError::Rejected {
            code: -32602,
            message: "bad".into(),
        };
        assert!(rejected.is_invocation_failure());
        assert!(ToolError::InvalidArguments("eof".into()).is_invocation_failure());
        assert!(ToolError::UnknownTool("modulo".into()).is_invocation_failure());

        assert!(!ToolError::Spawn("no such file".into()).is_invocation_failure());
        assert!(!ToolError::Protocol("closed".into()).is_invocation_failure());
        assert!(!ToolError::Timeout(30).is_invocation_failure());
    }

    #[test]
    fn tool_info_defaults_missing_schema() {
        let info: ToolInfo = serde_json::from_value(serde_json::json!({"name": "sqrt"})).unwrap();
        assert_eq!(info.description, "");
        assert_eq!(info.input_schema["type"], "object");

        let def = info.to_definition();
        assert_eq!(def.tool_type, "function");
        assert_eq!(def.function.name, "sqrt");
    }
}
