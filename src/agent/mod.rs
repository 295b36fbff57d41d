//! Agent module - the math agent and its policy contract.
//!
//! The agent follows a "tools in a loop" pattern:
//! 1. Start a fresh tool session for the query
//! 2. Call the LLM with the policy contract, the query and the session's tools
//! 3. If the LLM requests tool calls, execute them and feed the results back
//! 4. Repeat until the LLM produces a final answer, then close the session
//!
//! Every failure is turned into a response string at [`MathAgent::answer`].

mod agent_loop;
mod error;
#[cfg(test)]
pub(crate) mod fakes;
mod math_agent;
mod prompt;

pub use agent_loop::{LoopOutcome, ToolLoop, TraceEntry};
pub use error::{generic_failure_response, tool_failure_response, AgentError};
pub use math_agent::MathAgent;
pub use prompt::{
    build_system_prompt, NormalizationRule, PolicyContract, PolicyVersion, NORMALIZATION_RULES,
    OUT_OF_DOMAIN_RESPONSE, TOOL_FAILURE_INSTRUCTION, WORKED_EXAMPLES,
};
