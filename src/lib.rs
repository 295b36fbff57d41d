//! # Math Agent
//!
//! A conversational agent that only answers math questions and never does
//! the arithmetic itself.
//!
//! This library provides:
//! - A policy contract that gates non-math questions and fixes the output format
//! - A tool-based agent loop driven by an OpenAI-compatible LLM (Groq by default)
//! - An MCP stdio client for the external math tool process
//! - Structured query events for observability
//!
//! ## Architecture
//!
//! Each query gets its own tool session:
//! 1. Start the MCP math server and list its tools
//! 2. Send the policy, the query and the tool schemas to the LLM
//! 3. Execute the tool calls the LLM requests and feed the results back
//! 4. Return the trimmed final answer, or a fixed error string, and stop the server
//!
//! ## Example
//!
//! ```rust,ignore
//! use math_agent::{agent::MathAgent, config::Config};
//!
//! let config = Config::from_env()?;
//! let agent = MathAgent::from_config(&config)?;
//! let answer = agent.answer("divide 10 and 4").await; // "2.5"
//! ```

pub mod agent;
pub mod config;
pub mod llm;
pub mod repl;
pub mod telemetry;
pub mod tools;

pub use agent::MathAgent;
pub use config::Config;
