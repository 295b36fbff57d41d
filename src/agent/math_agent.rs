//! The math agent: one query in, one response string out.

use std::sync::Arc;

use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::llm::{LlmClient, LlmError, OpenAiCompatClient};
use crate::telemetry::{sink_from_config, AgentEvent, EventSink, TracingSink};
use crate::tools::{McpLauncher, ToolLauncher};

use super::agent_loop::{LoopOutcome, ToolLoop};
use super::prompt::PolicyContract;
use super::AgentError;

const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Answers math questions by letting the model drive a fresh tool session
/// per query.
pub struct MathAgent {
    llm: Arc<dyn LlmClient>,
    launcher: Arc<dyn ToolLauncher>,
    events: Arc<dyn EventSink>,
    policy: PolicyContract,
    model: String,
    max_iterations: usize,
}

impl MathAgent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        launcher: Arc<dyn ToolLauncher>,
        policy: PolicyContract,
        model: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            launcher,
            events: Arc::new(TracingSink),
            policy,
            model: model.into(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Wire the agent to the configured completion API, tool command and
    /// event sink.
    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        let llm = OpenAiCompatClient::new(
            config.api_key.clone(),
            &config.llm_base_url,
            config.llm_timeout,
        )?;
        let launcher = McpLauncher::new(config.tool_server.clone());

        Ok(Self::new(
            Arc::new(llm),
            Arc::new(launcher),
            PolicyContract::new(config.policy_version),
            config.default_model.clone(),
        )
        .with_event_sink(sink_from_config(&config.telemetry))
        .with_max_iterations(config.max_iterations))
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn policy(&self) -> &PolicyContract {
        &self.policy
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Answer `query`. Never fails: every error becomes a response string.
    pub async fn answer(&self, query: &str) -> String {
        let session_id = Uuid::new_v4();
        let span = tracing::info_span!("answer", %session_id);

        async {
            match self.run(query).await {
                Ok(outcome) => {
                    self.events
                        .record(&AgentEvent::processed(session_id, query, &outcome.output))
                        .await;
                    outcome.output
                }
                Err(e) => {
                    self.events
                        .record(&AgentEvent::failed(session_id, query, &e.to_string()))
                        .await;
                    e.to_response(query)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Wait for pending event exports. Call before the process exits.
    pub async fn flush_events(&self) {
        self.events.flush().await;
    }

    /// Answer `query`, keeping the structured error and the loop trace.
    ///
    /// The tool session is closed before this returns, on success and on
    /// failure.
    pub async fn run(&self, query: &str) -> Result<LoopOutcome, AgentError> {
        tracing::debug!(state = "tool_session_starting");
        let session = self.launcher.start().await.map_err(AgentError::Session)?;

        tracing::debug!(state = "model_invoking", tools = session.tools().len());
        let result = ToolLoop::new(
            self.llm.as_ref(),
            session.as_ref(),
            &self.model,
            self.max_iterations,
        )
        .run(self.policy.text(), query)
        .await;

        session.close().await;
        tracing::debug!(state = "session_closed", ok = result.is_ok());

        let mut outcome = result?;
        outcome.output = clean_output(&outcome.output);
        if outcome.output.is_empty() {
            return Err(AgentError::EmptyResponse);
        }
        Ok(outcome)
    }
}

/// Trim the final text and drop a leading `<think>` block.
fn clean_output(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("<think>") {
        if let Some(end) = trimmed.find("</think>") {
            return trimmed[end + "</think>".len()..].trim().to_string();
        }
    }
    trimmed.to_string()
}
