//! Tool-calling loop: model round-trips interleaved with tool calls until
//! the model produces a final answer.

use serde_json::Value;

use crate::llm::{ChatMessage, LlmClient, ToolCall};
use crate::tools::{tool_definitions, ToolError, ToolSession};

use super::AgentError;

/// One recorded step of a loop run.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEntry {
    /// Tool name and the arguments actually sent
    ToolCall { name: String, args: Value },
    /// Text returned by the tool
    ToolResult { name: String, output: String },
    /// Final text from the model
    Response(String),
}

/// Result of a completed loop.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub output: String,
    pub iterations: usize,
    pub trace: Vec<TraceEntry>,
}

impl LoopOutcome {
    /// Tool calls made while answering, in order.
    pub fn tool_calls(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.trace.iter().filter_map(|entry| match entry {
            TraceEntry::ToolCall { name, args } => Some((name.as_str(), args)),
            _ => None,
        })
    }
}

/// Drives one query through the model with a set of tools.
pub struct ToolLoop<'a> {
    llm: &'a dyn LlmClient,
    session: &'a dyn ToolSession,
    model: &'a str,
    max_iterations: usize,
}

impl<'a> ToolLoop<'a> {
    pub fn new(
        llm: &'a dyn LlmClient,
        session: &'a dyn ToolSession,
        model: &'a str,
        max_iterations: usize,
    ) -> Self {
        Self {
            llm,
            session,
            model,
            max_iterations,
        }
    }

    /// Run until the model answers without requesting tools.
    ///
    /// The first failing tool call ends the run.
    pub async fn run(&self, system_prompt: &str, query: &str) -> Result<LoopOutcome, AgentError> {
        let mut trace = Vec::new();
        let mut messages = vec![ChatMessage::system(system_prompt), ChatMessage::user(query)];
        let tool_schemas = tool_definitions(self.session);

        for iteration in 0..self.max_iterations {
            tracing::debug!("Agent iteration {}", iteration + 1);

            let response = self
                .llm
                .chat_completion(self.model, &messages, Some(tool_schemas.as_slice()))
                .await?;

            if let Some(tool_calls) = response.tool_calls.filter(|calls| !calls.is_empty()) {
                messages.push(ChatMessage::assistant_tool_calls(
                    response.content.clone(),
                    tool_calls.clone(),
                ));

                for tool_call in &tool_calls {
                    let output = self.execute_tool_call(tool_call, &mut trace).await?;
                    messages.push(ChatMessage::tool_result(&tool_call.id, output));
                }

                continue;
            }

            if let Some(content) = response.content.filter(|c| !c.trim().is_empty()) {
                trace.push(TraceEntry::Response(content.clone()));
                return Ok(LoopOutcome {
                    output: content,
                    iterations: iteration + 1,
                    trace,
                });
            }

            return Err(AgentError::EmptyResponse);
        }

        Err(AgentError::MaxIterations(self.max_iterations))
    }

    async fn execute_tool_call(
        &self,
        tool_call: &ToolCall,
        trace: &mut Vec<TraceEntry>,
    ) -> Result<String, AgentError> {
        let name = tool_call.function.name.as_str();
        let fail = |source: ToolError| AgentError::ToolCall {
            name: name.to_string(),
            source,
        };

        let info = self
            .session
            .tools()
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| fail(ToolError::UnknownTool(name.to_string())))?;

        let args = parse_arguments(&tool_call.function.arguments).map_err(&fail)?;
        let args = coerce_arguments(args, &info.input_schema);

        tracing::info!("Calling tool: {} with args: {}", name, args);
        trace.push(TraceEntry::ToolCall {
            name: name.to_string(),
            args: args.clone(),
        });

        let output = self.session.call_tool(name, args).await.map_err(&fail)?;

        tracing::debug!("Tool {} returned: {}", name, output);
        trace.push(TraceEntry::ToolResult {
            name: name.to_string(),
            output: output.clone(),
        });

        Ok(output)
    }
}

/// Parse the model's JSON argument text. Empty text means no arguments.
fn parse_arguments(raw: &str) -> Result<Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(ToolError::InvalidArguments(format!(
            "expected a JSON object, got {}",
            other
        ))),
        Err(e) => Err(ToolError::InvalidArguments(format!("{}", e))),
    }
}

/// Turn numeric strings into JSON numbers wherever the schema asks for a
/// number or integer. Integral values become integers.
fn coerce_arguments(args: Value, schema: &Value) -> Value {
    let mut map = match args {
        Value::Object(map) => map,
        other => return other,
    };
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Value::Object(map);
    };

    for (key, value) in map.iter_mut() {
        let wants_number = properties
            .get(key)
            .and_then(|p| p.get("type"))
            .is_some_and(|t| is_numeric_type(t));
        if !wants_number {
            continue;
        }
        if let Value::String(s) = value {
            if let Some(number) = parse_number(s) {
                *value = number;
            }
        }
    }
    Value::Object(map)
}

fn is_numeric_type(t: &Value) -> bool {
    match t {
        Value::String(s) => s == "number" || s == "integer",
        Value::Array(types) => types.iter().any(is_numeric_type),
        _ => false,
    }
}

fn parse_number(s: &str) -> Option<Value> {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::from(i));
    }
    let f = s.parse::<f64>().ok().filter(|f| f.is_finite())?;
    serde_json::Number::from_f64(f).map(Value::Number)
}
