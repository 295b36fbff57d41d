//! Failures of a single query and the strings they are reported as.

use thiserror::Error;

use crate::llm::LlmError;
use crate::tools::ToolError;

#[derive(Debug, Error)]
pub enum AgentError {
    /// The tool process could not be started or initialized.
    #[error("tool session failed: {0}")]
    Session(#[source] ToolError),

    /// A tool call requested by the model failed.
    #[error("tool '{name}' failed: {source}")]
    ToolCall {
        name: String,
        #[source]
        source: ToolError,
    },

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("max iterations ({0}) reached without a final answer")]
    MaxIterations(usize),
}

impl AgentError {
    /// True when the model asked for a tool call and the call itself failed.
    pub fn is_tool_failure(&self) -> bool {
        match self {
            Self::ToolCall { source, .. } => source.is_invocation_failure(),
            Self::Llm(LlmError::ToolUseFailed { .. }) => true,
            _ => false,
        }
    }

    /// The user-facing string for this failure.
    pub fn to_response(&self, query: &str) -> String {
        if self.is_tool_failure() {
            tool_failure_response(query)
        } else {
            generic_failure_response(query, self)
        }
    }
}

pub fn tool_failure_response(query: &str) -> String {
    format!(
        "Error: Failed to process query '{}'. Tool call failed. Try rephrasing.",
        query
    )
}

pub fn generic_failure_response(query: &str, details: impl std::fmt::Display) -> String {
    format!("Error: Failed to process query '{}'. Details: {}.", query, details)
}
