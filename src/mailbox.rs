//! # Mailbox
//!
//! The provider adapter boundary (§4.3, §6): turns a cursor's
//! [`crate::node::ProviderMessage`] sequence plus the active tool schemas into a
//! provider HTTP call, and turns the response back into the handful of primitives
//! `Bot` needs (assistant text, requested tool calls, usage). Generalizes the
//! teacher crate's single-provider `Client` into a small trait so Anthropic- and
//! OpenAI-shaped wire formats can share the same retry/call-site code.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::config::Provider;
use crate::error::{Error, Result};
use crate::node::{NodeUsage, ProviderMessage, Role, ToolCallRequest};
use crate::retry::{RetryPolicy, classify_http};
use crate::tools::ToolSchema;

/// What a provider call returned: the assistant's text, any tool calls it
/// requested, and whatever usage it reported.
#[derive(Debug, Clone, Default)]
pub struct ProviderReply {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Option<NodeUsage>,
}

/// The provider adapter boundary. One call per conversational turn; retry and
/// classification live outside the trait so every implementation shares the same
/// policy instead of reimplementing backoff.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Send `messages` (already trimmed to the active cursor's path) with
    /// `tools` attached, and return the provider's reply.
    async fn send(
        &self,
        messages: &[ProviderMessage],
        tools: &[ToolSchema],
        model: &str,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Result<ProviderReply>;
}

/// An HTTP-backed mailbox speaking the OpenAI-compatible chat-completions wire
/// format, which both OpenAI itself and most local servers (lmstudio, ollama,
/// vLLM) implement. Anthropic's native format is close enough in shape (system
/// message, user/assistant turns, tool_use/tool_result blocks) that the same
/// struct handles it via `anthropic_native: true`, translating at the
/// request/response boundary instead of duplicating the HTTP plumbing.
pub struct HttpMailbox {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    provider: Provider,
    anthropic_native: bool,
    retry: RetryPolicy,
}

impl HttpMailbox {
    pub fn new(provider: Provider, base_url: String, api_key: Option<String>) -> Self {
        let anthropic_native = provider == Provider::Anthropic;
        HttpMailbox {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            provider,
            anthropic_native,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    fn endpoint(&self) -> String {
        if self.anthropic_native {
            format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
        } else {
            format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
        }
    }

    fn build_request(
        &self,
        messages: &[ProviderMessage],
        tools: &[ToolSchema],
        model: &str,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Value {
        if self.anthropic_native {
            build_anthropic_request(messages, tools, model, temperature, max_tokens)
        } else {
            build_openai_request(messages, tools, model, temperature, max_tokens)
        }
    }

    fn parse_response(&self, body: Value) -> Result<ProviderReply> {
        if self.anthropic_native {
            parse_anthropic_response(body)
        } else {
            parse_openai_response(body)
        }
    }
}

#[async_trait]
impl Mailbox for HttpMailbox {
    async fn send(
        &self,
        messages: &[ProviderMessage],
        tools: &[ToolSchema],
        model: &str,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Result<ProviderReply> {
        let body = self.build_request(messages, tools, model, temperature, max_tokens);
        self.retry
            .run(classify_http, || async {
                let mut req = self.client.post(self.endpoint()).json(&body);
                if let Some(key) = &self.api_key {
                    req = if self.anthropic_native {
                        req.header("x-api-key", key).header("anthropic-version", "2023-06-01")
                    } else {
                        req.bearer_auth(key)
                    };
                }
                let response = req.send().await?;
                let response = response.error_for_status()?;
                let parsed: Value = response.json().await?;
                self.parse_response(parsed)
            })
            .await
    }
}

fn build_openai_request(
    messages: &[ProviderMessage],
    tools: &[ToolSchema],
    model: &str,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
) -> Value {
    let mut wire_messages = Vec::new();
    for msg in messages {
        let role = match msg.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool | Role::Empty => continue,
        };
        if !msg.tool_calls.is_empty() {
            wire_messages.push(json!({
                "role": "assistant",
                "content": msg.content,
                "tool_calls": msg.tool_calls.iter().map(|c| json!({
                    "id": c.id,
                    "type": "function",
                    "function": { "name": c.name, "arguments": serde_json::Value::Object(c.input.clone()).to_string() },
                })).collect::<Vec<_>>(),
            }));
            for result in &msg.tool_results {
                wire_messages.push(json!({
                    "role": "tool",
                    "tool_call_id": result.id,
                    "content": result.content,
                }));
            }
        } else {
            wire_messages.push(json!({ "role": role, "content": msg.content }));
        }
    }
    let mut body = json!({
        "model": model,
        "messages": wire_messages,
    });
    if let Some(t) = temperature {
        body["temperature"] = json!(t);
    }
    if let Some(m) = max_tokens {
        body["max_tokens"] = json!(m);
    }
    if !tools.is_empty() {
        body["tools"] = json!(
            tools
                .iter()
                .map(|t| json!({
                    "type": "function",
                    "function": { "name": t.name, "description": t.description, "parameters": t.input_schema },
                }))
                .collect::<Vec<_>>()
        );
    }
    body
}

fn parse_openai_response(body: Value) -> Result<ProviderReply> {
    let choice = body
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| Error::api("response had no choices"))?;
    let message = choice
        .get("message")
        .ok_or_else(|| Error::api("choice had no message"))?;
    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let id = call.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
            let function = call.get("function").ok_or_else(|| Error::api("tool_call missing function"))?;
            let name = function.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
            let args_str = function.get("arguments").and_then(Value::as_str).unwrap_or("{}");
            let input: Map<String, Value> = serde_json::from_str(args_str)
                .map_err(|e| Error::api(format!("malformed tool call arguments: {e}")))?;
            tool_calls.push(ToolCallRequest { id, name, input });
        }
    }
    let usage = body.get("usage").map(|u| NodeUsage {
        input_tokens: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
        output_tokens: u.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0),
        cached_tokens: u
            .get("prompt_tokens_details")
            .and_then(|d| d.get("cached_tokens"))
            .and_then(Value::as_u64)
            .unwrap_or(0),
    });
    Ok(ProviderReply { content, tool_calls, usage })
}

fn build_anthropic_request(
    messages: &[ProviderMessage],
    tools: &[ToolSchema],
    model: &str,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
) -> Value {
    let system: String = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let mut wire_messages = Vec::new();
    for msg in messages {
        match msg.role {
            Role::System | Role::Empty | Role::Tool => continue,
            Role::User => wire_messages.push(json!({ "role": "user", "content": msg.content })),
            Role::Assistant => {
                let mut blocks = vec![json!({ "type": "text", "text": msg.content })];
                for call in &msg.tool_calls {
                    blocks.push(json!({
                        "type": "tool_use", "id": call.id, "name": call.name,
                        "input": serde_json::Value::Object(call.input.clone()),
                    }));
                }
                wire_messages.push(json!({ "role": "assistant", "content": blocks }));
                if !msg.tool_results.is_empty() {
                    let result_blocks: Vec<_> = msg
                        .tool_results
                        .iter()
                        .map(|r| json!({ "type": "tool_result", "tool_use_id": r.id, "content": r.content }))
                        .collect();
                    wire_messages.push(json!({ "role": "user", "content": result_blocks }));
                }
            }
        }
    }
    let mut body = json!({
        "model": model,
        "max_tokens": max_tokens.unwrap_or(4096),
        "messages": wire_messages,
    });
    if !system.is_empty() {
        body["system"] = json!(system);
    }
    if let Some(t) = temperature {
        body["temperature"] = json!(t);
    }
    if !tools.is_empty() {
        body["tools"] = json!(
            tools
                .iter()
                .map(|t| json!({ "name": t.name, "description": t.description, "input_schema": t.input_schema }))
                .collect::<Vec<_>>()
        );
    }
    body
}

fn parse_anthropic_response(body: Value) -> Result<ProviderReply> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::api("response had no content blocks"))?;
    let mut content = String::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                content.push_str(block.get("text").and_then(Value::as_str).unwrap_or_default());
            }
            Some("tool_use") => {
                let id = block.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
                let name = block.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                let input = block
                    .get("input")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                tool_calls.push(ToolCallRequest { id, name, input });
            }
            _ => {}
        }
    }
    let usage = body.get("usage").map(|u| NodeUsage {
        input_tokens: u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
        output_tokens: u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
        cached_tokens: u
            .get("cache_read_input_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    });
    Ok(ProviderReply { content, tool_calls, usage })
}

/// A scripted mailbox for deterministic tests: returns queued replies in order,
/// recording what it was called with so assertions can inspect the exact
/// messages/tools a `Bot` sent.
pub struct MockMailbox {
    replies: std::sync::Mutex<Vec<ProviderReply>>,
    calls: std::sync::Mutex<Vec<MockCall>>,
}

/// One recorded call to a [`MockMailbox`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockCall {
    pub messages: Vec<ProviderMessage>,
    pub tool_names: Vec<String>,
    pub model: String,
}

impl MockMailbox {
    pub fn new(replies: Vec<ProviderReply>) -> Self {
        MockMailbox {
            replies: std::sync::Mutex::new(replies),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().expect("mock mailbox lock poisoned").clone()
    }
}

#[async_trait]
impl Mailbox for MockMailbox {
    async fn send(
        &self,
        messages: &[ProviderMessage],
        tools: &[ToolSchema],
        model: &str,
        _temperature: Option<f32>,
        _max_tokens: Option<u32>,
    ) -> Result<ProviderReply> {
        self.calls.lock().expect("mock mailbox lock poisoned").push(MockCall {
            messages: messages.to_vec(),
            tool_names: tools.iter().map(|t| t.name.clone()).collect(),
            model: model.to_string(),
        });
        let mut replies = self.replies.lock().expect("mock mailbox lock poisoned");
        if replies.is_empty() {
            return Err(Error::other("MockMailbox: no more scripted replies"));
        }
        Ok(replies.remove(0))
    }
}
