//! # Bot
//!
//! The user-facing façade (§4.4, §4.5): owns a [`ConversationTree`], a cursor into
//! it, a [`ToolHandler`], and a [`Mailbox`] adapter, and drives the respond loop
//! (user turn -> provider call -> tool execution -> provider call -> ... -> final
//! assistant turn). Modeled as a handle around `Arc<tokio::sync::Mutex<BotInner>>`
//! rather than requiring `&mut Bot` everywhere, because `branch_self` and the
//! `_bot`-injected self-tools (§4.6, §4.2) need a bot to hand a *live, shared*
//! reference to itself to tool code running inside its own respond loop — the
//! handle is what lets `fork()` be the one operation that actually deep-copies
//! state, instead of every clone doing so.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;

use crate::config::Provider;
use crate::error::{Error, Result};
use crate::mailbox::Mailbox;
use crate::metrics::Metrics;
use crate::node::{ConversationTree, NodeId, Role, ToolResultRecord};
use crate::tools::{ToolConstructors, ToolHandler};
use crate::tracing_support;

/// Construction-time options for a [`Bot`] (§4.4, §6).
#[derive(Clone)]
pub struct AgentOptions {
    pub provider: Provider,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
    pub max_tool_turns: u32,
    pub enable_tracing: bool,
}

/// Env var read by [`AgentOptionsBuilder::build`] as the default for
/// `enable_tracing` when the caller never called `.enable_tracing(...)`
/// explicitly (spec.md line 268).
const ENABLE_TRACING_ENV_VAR: &str = "BOTS_ENABLE_TRACING";

impl AgentOptions {
    pub fn builder(provider: Provider, model: impl Into<String>) -> AgentOptionsBuilder {
        AgentOptionsBuilder {
            provider,
            model: model.into(),
            base_url: None,
            api_key: None,
            temperature: None,
            max_tokens: None,
            system_prompt: None,
            max_tool_turns: 25,
            enable_tracing: None,
        }
    }
}

/// Builder for [`AgentOptions`].
pub struct AgentOptionsBuilder {
    provider: Provider,
    model: String,
    base_url: Option<String>,
    api_key: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    system_prompt: Option<String>,
    max_tool_turns: u32,
    /// `None` until the caller explicitly calls `.enable_tracing(...)`, so
    /// `build()` can tell "left at default" apart from "explicitly off".
    enable_tracing: Option<bool>,
}

impl AgentOptionsBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = Some(n);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Upper bound on provider round-trips within a single `respond` call before
    /// giving up on an assistant that keeps requesting tools (§4.4 edge cases).
    pub fn max_tool_turns(mut self, n: u32) -> Self {
        self.max_tool_turns = n;
        self
    }

    pub fn enable_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = Some(enabled);
        self
    }

    pub fn build(self) -> Result<AgentOptions> {
        if self.model.trim().is_empty() {
            return Err(Error::config("model must not be empty"));
        }
        let fallback_url = match self.provider {
            Provider::Anthropic => "https://api.anthropic.com",
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::Other(_) => "http://localhost:1234/v1",
        };
        let base_url = self
            .base_url
            .unwrap_or_else(|| self.provider.get_base_url(fallback_url));
        let enable_tracing = self.enable_tracing.unwrap_or_else(|| {
            std::env::var(ENABLE_TRACING_ENV_VAR)
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
                .unwrap_or(false)
        });
        Ok(AgentOptions {
            provider: self.provider,
            model: self.model,
            base_url,
            api_key: self.api_key,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            system_prompt: self.system_prompt,
            max_tool_turns: self.max_tool_turns,
            enable_tracing,
        })
    }
}

/// Called before/after a tool executes, regardless of whether it ran inside the
/// top-level respond loop or inside a `branch_self` branch (§C.4 of the expanded
/// spec: tool-execution callbacks fire even inside self-branches).
pub type ToolStartHook = Arc<dyn Fn(&str) + Send + Sync>;
pub type ToolEndHook = Arc<dyn Fn(&str, bool) + Send + Sync>;

pub(crate) struct BotInner {
    pub(crate) id: String,
    pub(crate) tree: ConversationTree,
    pub(crate) cursor: NodeId,
    pub(crate) tools: ToolHandler,
    pub(crate) mailbox: Arc<dyn Mailbox>,
    pub(crate) options: AgentOptions,
    pub(crate) metrics: Metrics,
    pub(crate) on_tool_start: Option<ToolStartHook>,
    pub(crate) on_tool_end: Option<ToolEndHook>,
    /// Constructors for this bot's own tools, keyed the same way as their
    /// `ToolSource` lookup key. `branch_self` (§4.6) consults this to rebuild a
    /// branch's tool registry from the save/reload round trip without requiring
    /// the caller to pass a registry through the tool-call boundary.
    pub(crate) tool_constructors: ToolConstructors,
}

/// A handle to a running agent. Cheaply `Clone`-able: all clones share the same
/// underlying state (tree, cursor, tools) via the inner `Arc<Mutex<_>>`. Use
/// [`Bot::fork`] to get an independent copy.
#[derive(Clone)]
pub struct Bot(pub(crate) Arc<Mutex<BotInner>>);

/// Alias used at the tool boundary (see [`crate::tools`]): a tool that declared
/// `wants_bot()` receives this same handle, live, not a snapshot.
pub type BotHandle = Bot;

impl Bot {
    pub fn new(id: impl Into<String>, options: AgentOptions, mailbox: Arc<dyn Mailbox>) -> Self {
        let tree = ConversationTree::new();
        let cursor = tree.root();
        Bot(Arc::new(Mutex::new(BotInner {
            id: id.into(),
            tree,
            cursor,
            tools: ToolHandler::new(),
            mailbox,
            options,
            metrics: Metrics::global(),
            on_tool_start: None,
            on_tool_end: None,
            tool_constructors: ToolConstructors::new(),
        })))
    }

    /// Register the constructor used to rebuild `name` when this bot (or a
    /// branch spawned from it) is reloaded from a snapshot.
    pub async fn register_tool_ctor(
        &self,
        name: impl Into<String>,
        ctor: std::sync::Arc<dyn Fn() -> crate::tools::Tool + Send + Sync>,
    ) {
        self.0.lock().await.tool_constructors.insert(name.into(), ctor);
    }

    /// Remove every tool from this bot's active set and registry.
    pub async fn clear_tools(&self) {
        self.0.lock().await.tools = ToolHandler::new();
    }

    /// Replace this bot's tool-constructor registry wholesale (used when
    /// `branch_self` hands a freshly-loaded branch the same constructors as its
    /// parent).
    pub async fn set_tool_constructors(&self, ctors: ToolConstructors) {
        self.0.lock().await.tool_constructors = ctors;
    }

    pub async fn tool_constructors(&self) -> ToolConstructors {
        self.0.lock().await.tool_constructors.clone()
    }

    /// Find the first node (DFS, root-first) carrying tag `label`.
    pub async fn find_tagged(&self, label: &str) -> Option<NodeId> {
        let inner = self.0.lock().await;
        inner.tree.find_by(|id, t| t.has_tag(id, label))
    }

    /// Use a private (non-global) metrics store — intended for tests so multiple
    /// bots in the same test don't share process-wide counters.
    pub async fn with_private_metrics(self) -> Self {
        self.0.lock().await.metrics = Metrics::new();
        self
    }

    pub async fn id(&self) -> String {
        self.0.lock().await.id.clone()
    }

    pub async fn set_callbacks(&self, on_start: Option<ToolStartHook>, on_end: Option<ToolEndHook>) {
        let mut inner = self.0.lock().await;
        inner.on_tool_start = on_start;
        inner.on_tool_end = on_end;
    }

    pub async fn add_tool(&self, tool: crate::tools::Tool, source: crate::tools::ToolSource) {
        self.0.lock().await.tools.add_tool(tool, source);
    }

    pub async fn add_tools(&self, tools: Vec<(crate::tools::Tool, crate::tools::ToolSource)>) {
        self.0.lock().await.tools.add_tools(tools);
    }

    pub async fn list_tools(&self, filter: Option<&str>) -> Vec<crate::tools::ToolInfo> {
        self.0.lock().await.tools.list(filter)
    }

    pub async fn activate_tool(&self, name: &str) -> bool {
        self.0.lock().await.tools.activate(name)
    }

    pub async fn deactivate_tool(&self, name: &str) -> bool {
        self.0.lock().await.tools.deactivate(name)
    }

    /// Current cursor node id.
    pub async fn cursor(&self) -> NodeId {
        self.0.lock().await.cursor
    }

    pub async fn set_cursor(&self, id: NodeId) {
        self.0.lock().await.cursor = id;
    }

    pub async fn move_up(&self) -> std::result::Result<NodeId, String> {
        let mut inner = self.0.lock().await;
        let next = inner.tree.up(inner.cursor)?;
        inner.cursor = next;
        Ok(next)
    }

    pub async fn move_down(&self, index: usize) -> std::result::Result<NodeId, String> {
        let mut inner = self.0.lock().await;
        let next = inner.tree.down(inner.cursor, index)?;
        inner.cursor = next;
        Ok(next)
    }

    pub async fn move_left(&self) -> NodeId {
        let mut inner = self.0.lock().await;
        let next = inner.tree.left(inner.cursor);
        inner.cursor = next;
        next
    }

    pub async fn move_right(&self) -> NodeId {
        let mut inner = self.0.lock().await;
        let next = inner.tree.right(inner.cursor);
        inner.cursor = next;
        next
    }

    /// Remove a node (and its excised subtree) from the tree, preserving tool
    /// results on the surviving parent (§4.1, §C.4: exposed as a convenience
    /// method on `Bot`, not just on the tree directly).
    pub async fn remove_context(&self, target: NodeId) -> std::result::Result<(), String> {
        let mut inner = self.0.lock().await;
        let cursor = inner.cursor;
        if let Some(new_cursor) = inner.tree.remove_context(target, cursor)? {
            inner.cursor = new_cursor;
        }
        Ok(())
    }

    /// Deep-copy this bot into a brand new, fully independent handle: new `Arc`,
    /// new `Mutex`, cloned tree/tools/options. No state is shared with the
    /// original afterward (§4.6, §8 "idempotent fork").
    pub async fn fork(&self) -> Bot {
        let inner = self.0.lock().await;
        Bot(Arc::new(Mutex::new(BotInner {
            id: format!("{}-fork-{}", inner.id, uuid::Uuid::new_v4().simple()),
            tree: inner.tree.clone(),
            cursor: inner.cursor,
            tools: inner.tools.clone(),
            mailbox: inner.mailbox.clone(),
            options: inner.options.clone(),
            metrics: inner.metrics.clone(),
            on_tool_start: inner.on_tool_start.clone(),
            on_tool_end: inner.on_tool_end.clone(),
            tool_constructors: inner.tool_constructors.clone(),
        })))
    }

    /// Tag the cursor (or an arbitrary node) with `label`.
    pub async fn tag(&self, id: NodeId, label: &str) {
        self.0.lock().await.tree.tag(id, label);
    }

    pub async fn untag(&self, id: NodeId, label: &str) {
        self.0.lock().await.tree.untag(id, label);
    }

    /// Run one conversational turn: append the user's prompt, call the provider,
    /// execute any requested tools, and keep looping until the assistant stops
    /// requesting tools or `max_tool_turns` is hit. Returns the final assistant
    /// text together with the node it landed on (§4.4, §4.5 — callers that need
    /// to navigate to or continue from that exact turn use the `NodeId`).
    pub async fn respond(&self, prompt: impl Into<String>) -> Result<(String, NodeId)> {
        let prompt = prompt.into();
        let bot_id = self.id().await;
        let tracing_on = tracing_support::tracing_active(self.0.lock().await.options.enable_tracing);
        let span = tracing_support::respond_span(&bot_id, tracing_on);
        let _entered = span.enter();

        // Position to roll back to on a provider error after retries (§4.4 step 3).
        let pre_respond_cursor = self.0.lock().await.cursor;

        let user_node = {
            let mut inner = self.0.lock().await;
            let cursor = inner.cursor;
            let node = inner.tree.add_reply(cursor, Role::User, prompt, vec![], vec![]);
            inner.cursor = node;
            node
        };
        let _ = user_node;

        for _turn in 0..self.max_tool_turns().await {
            let (messages, tool_schemas, model, provider_name, temperature, max_tokens) = {
                let inner = self.0.lock().await;
                let cursor = inner.cursor;
                let mut messages = inner.tree.build_messages(cursor);
                if let Some(system) = &inner.options.system_prompt {
                    messages.insert(
                        0,
                        crate::node::ProviderMessage {
                            role: Role::System,
                            content: system.clone(),
                            tool_calls: vec![],
                            tool_results: vec![],
                        },
                    );
                }
                (
                    messages,
                    inner.tools.active_schemas(),
                    inner.options.model.clone(),
                    inner.options.provider.to_string(),
                    inner.options.temperature,
                    inner.options.max_tokens,
                )
            };

            let mailbox = self.0.lock().await.mailbox.clone();
            let provider_span = tracing_support::provider_span(&provider_name, &model, tracing_on);
            let send_result = {
                let _entered = provider_span.enter();
                mailbox.send(&messages, &tool_schemas, &model, temperature, max_tokens).await
            };
            let reply = match send_result {
                Ok(reply) => reply,
                Err(err) => {
                    self.0.lock().await.cursor = pre_respond_cursor;
                    return Err(err);
                }
            };

            let mut inner = self.0.lock().await;
            if let Some(usage) = reply.usage {
                inner.metrics.record_tokens(
                    usage.input_tokens,
                    usage.output_tokens,
                    usage.cached_tokens,
                    &provider_name,
                    &model,
                    Some(&bot_id),
                    now(),
                );
            }
            let cursor = inner.cursor;
            let assistant_node =
                inner
                    .tree
                    .add_reply(cursor, Role::Assistant, reply.content.clone(), reply.tool_calls.clone(), vec![]);
            if let Some(usage) = reply.usage {
                inner.tree.set_usage(assistant_node, usage);
            }
            inner.cursor = assistant_node;

            if reply.tool_calls.is_empty() {
                return Ok((reply.content, assistant_node));
            }

            let handler = inner.tools.clone();
            let on_start = inner.on_tool_start.clone();
            let on_end = inner.on_tool_end.clone();
            drop(inner);

            let bot_for_tools = self.clone();
            let results: Vec<ToolResultRecord> = handler
                .execute(
                    &reply.tool_calls,
                    Some(bot_for_tools),
                    |req| {
                        let _span = tracing_support::tool_span(&req.name, tracing_on);
                        if let Some(hook) = &on_start {
                            hook(&req.name);
                        }
                    },
                    |req, record| {
                        if let Some(hook) = &on_end {
                            hook(&req.name, record.status == crate::node::ToolStatus::Ok);
                        }
                    },
                )
                .await;

            let mut inner = self.0.lock().await;
            let tool_node = inner.tree.add_reply(assistant_node, Role::Tool, "", vec![], results);
            inner.cursor = tool_node;
        }

        let max_turns = self.0.lock().await.options.max_tool_turns;
        log::error!("bot {bot_id} exceeded max_tool_turns ({max_turns}) without a final assistant reply");
        Err(Error::other(format!(
            "exceeded max_tool_turns ({max_turns}) without a final assistant reply"
        )))
    }

    async fn max_tool_turns(&self) -> u32 {
        self.0.lock().await.options.max_tool_turns
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
