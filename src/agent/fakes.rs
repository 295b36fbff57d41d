//! In-process stand-ins for the completion service and the math server.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::{ChatMessage, ChatResponse, LlmClient, LlmError, Role, ToolCall, ToolDefinition};
use crate::tools::{ToolError, ToolInfo, ToolLauncher, ToolSession};

use super::{MathAgent, PolicyContract, PolicyVersion, OUT_OF_DOMAIN_RESPONSE};

/// Understands a handful of phrasings and always defers to tools.
pub(crate) struct PhraseModel {
    calls: AtomicUsize,
}

impl PhraseModel {
    pub(crate) fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn tool_call(&self, name: &str, args: String) -> ChatResponse {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        ChatResponse {
            content: None,
            tool_calls: Some(vec![ToolCall::new(format!("call_{}", n), name, args)]),
            finish_reason: Some("tool_calls".to_string()),
        }
    }

    fn plan(&self, query: &str) -> ChatResponse {
        let words: Vec<&str> = query.split_whitespace().collect();
        match words.as_slice() {
            [op @ ("add" | "subtract" | "divide"), a, "and", b] => {
                self.tool_call(op, json!({"a": num(a), "b": num(b)}).to_string())
            }
            // Numbers as strings, to be coerced before the call.
            ["multiply", a, "and", b] => {
                self.tool_call("multiply", json!({"a": a, "b": b}).to_string())
            }
            [op @ ("log" | "sqrt"), a] => self.tool_call(op, json!({"a": num(a)}).to_string()),
            [expr] if expr.contains('-') => {
                let (a, b) = expr.split_once('-').unwrap();
                self.tool_call("subtract", json!({"a": num(a), "b": num(b)}).to_string())
            }
            _ => final_text(OUT_OF_DOMAIN_RESPONSE),
        }
    }
}

fn num(s: &str) -> Value {
    s.parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| json!(s.parse::<f64>().unwrap()))
}

pub(crate) fn final_text(text: &str) -> ChatResponse {
    ChatResponse {
        content: Some(text.to_string()),
        tool_calls: None,
        finish_reason: Some("stop".to_string()),
    }
}

#[async_trait]
impl LlmClient for PhraseModel {
    async fn chat_completion(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ChatResponse, LlmError> {
        assert!(tools.is_some_and(|t| !t.is_empty()), "tools must be offered");
        assert_eq!(messages[0].role, Role::System);
        let last = messages.last().unwrap();
        match last.role {
            Role::Tool => Ok(final_text(&format!("\n{}\n", last.content.clone().unwrap()))),
            _ => Ok(self.plan(last.content.as_deref().unwrap())),
        }
    }
}

/// Replays canned responses in order.
pub(crate) struct ScriptedModel {
    replies: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
}

impl ScriptedModel {
    pub(crate) fn new(replies: Vec<Result<ChatResponse, LlmError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedModel {
    async fn chat_completion(
        &self,
        _model: &str,
        _messages: &[ChatMessage],
        _tools: Option<&[ToolDefinition]>,
    ) -> Result<ChatResponse, LlmError> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(final_text("")))
    }
}

/// Python-flavoured arithmetic, standing in for the real math server.
struct FakeSession {
    tools: Vec<ToolInfo>,
    closed: Arc<AtomicUsize>,
}

fn format_float(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

#[async_trait]
impl ToolSession for FakeSession {
    fn tools(&self) -> &[ToolInfo] {
        &self.tools
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<String, ToolError> {
        let a = &args["a"];
        let b = &args["b"];
        let x = a
            .as_f64()
            .ok_or_else(|| ToolError::Failed(format!("a is not a number: {}", a)))?;
        let y = b.as_f64().unwrap_or(0.0);
        let ints = a.as_i64().zip(b.as_i64());
        match (name, ints) {
            ("add", Some((i, j))) => Ok((i + j).to_string()),
            ("subtract", Some((i, j))) => Ok((i - j).to_string()),
            ("multiply", Some((i, j))) => Ok((i * j).to_string()),
            ("add", None) => Ok(format_float(x + y)),
            ("subtract", None) => Ok(format_float(x - y)),
            ("multiply", None) => Ok(format_float(x * y)),
            ("divide", _) if y == 0.0 => {
                Err(ToolError::Failed("Cannot divide by zero".to_string()))
            }
            ("divide", _) => Ok(format_float(x / y)),
            ("log", _) => Ok(format_float(x.log10())),
            ("sqrt", _) => Ok(format_float(x.sqrt())),
            (other, _) => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Counts sessions; fails the next `fail_next` starts.
#[derive(Default)]
pub(crate) struct FakeLauncher {
    pub(crate) started: Arc<AtomicUsize>,
    pub(crate) closed: Arc<AtomicUsize>,
    pub(crate) fail_next: AtomicUsize,
}

#[async_trait]
impl ToolLauncher for FakeLauncher {
    async fn start(&self) -> Result<Box<dyn ToolSession>, ToolError> {
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ToolError::Spawn(
                "uv run main.py: No such file or directory".to_string(),
            ));
        }
        self.started.fetch_add(1, Ordering::SeqCst);
        let schema = json!({
            "type": "object",
            "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
            "required": ["a"]
        });
        let tools = ["add", "subtract", "multiply", "divide", "log", "sqrt"]
            .iter()
            .map(|name| ToolInfo {
                name: name.to_string(),
                description: format!("{} numbers", name),
                input_schema: schema.clone(),
            })
            .collect();
        Ok(Box::new(FakeSession {
            tools,
            closed: self.closed.clone(),
        }))
    }
}

pub(crate) fn agent_with(llm: Arc<dyn LlmClient>, launcher: Arc<FakeLauncher>) -> MathAgent {
    MathAgent::new(llm, launcher, PolicyContract::new(PolicyVersion::V2), "test-model")
}

pub(crate) fn phrase_agent() -> (MathAgent, Arc<FakeLauncher>) {
    let launcher = Arc::new(FakeLauncher::default());
    (agent_with(Arc::new(PhraseModel::new()), launcher.clone()), launcher)
}
