//! # agent_tree
//!
//! A framework for stateful, tool-using LLM agents whose entire history, tool
//! inventory, and telemetry live in one persistent, navigable conversation tree.
//!
//! ## Overview
//!
//! Most agent SDKs model a conversation as a flat list of messages. This crate
//! models it as a tree: every reply is a node, branches are siblings, and a
//! cursor tracks where the conversation currently stands. That gives a host
//! application three things a flat history can't:
//!
//! - **Navigation**: move the cursor up/down/left/right, jump to the last or
//!   next fork, or excise a bad turn without losing the tool results it carried.
//! - **Branching**: fork a bot into an independent copy, or have the model
//!   branch *itself* mid-conversation via the built-in `branch_self` tool, fan
//!   prompts out over the forks, and recombine their replies.
//! - **Persistence**: the whole tree, tool registry, and cursor save to one JSON
//!   snapshot and reload byte-for-byte, tool registrations included.
//!
//! ## Example
//!
//! ```rust,no_run
//! use agent_tree::{AgentOptions, Bot, HttpMailbox, Provider};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = AgentOptions::builder(Provider::Anthropic, "claude-3-5-sonnet-latest")
//!         .system_prompt("You are a helpful assistant")
//!         .build()?;
//!     let mailbox = Arc::new(HttpMailbox::new(
//!         Provider::Anthropic,
//!         "https://api.anthropic.com".to_string(),
//!         std::env::var("ANTHROPIC_API_KEY").ok(),
//!     ));
//!     let bot = Bot::new("assistant", options, mailbox);
//!
//!     let (reply, _node) = bot.respond("What's the capital of France?").await?;
//!     println!("{reply}");
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **node**: the conversation tree itself — an arena of nodes, navigation, and
//!   the root-to-cursor walk that produces provider-ready messages.
//! - **bot**: the façade that owns a tree, a tool handler, and a mailbox, and
//!   drives the respond loop.
//! - **tools**: tool registration, schema generation, the lazy registry, and the
//!   tool-call execution boundary (truncation, pairing, `_bot` injection).
//! - **self_tools**: the built-in `get_own_info`, `modify_own_settings`, and
//!   `branch_self` tools.
//! - **functional_prompts**: `chain`, `prompt_while`/`prompt_for`,
//!   `par_branch`/`par_branch_while`, recombinators, and `dynamic_prompts::policy`.
//! - **mailbox**: the provider adapter boundary (HTTP and an in-memory mock).
//! - **persistence**: the JSON snapshot format and save/load.
//! - **config**: provider base-url/model resolution.
//! - **retry**: exponential backoff with jitter for transient provider errors.
//! - **metrics**: process-wide token/cost accounting.
//! - **tracing_support**: opt-in span emission around respond/provider/tool calls.
//! - **error**: the crate's error taxonomy.

mod bot;
mod config;
mod error;
mod functional_prompts;
mod mailbox;
mod metrics;
mod node;
mod persistence;
mod retry;
mod self_tools;
mod tools;
mod tracing_support;

pub use bot::{AgentOptions, AgentOptionsBuilder, Bot, BotHandle, ToolEndHook, ToolStartHook};
pub use config::Provider;
pub use error::{Error, Result};
pub use functional_prompts::{chain, dynamic_prompts, par_branch, par_branch_while, prompt_for, prompt_while, recombine};
pub use mailbox::{HttpMailbox, Mailbox, MockCall, MockMailbox, ProviderReply};
pub use metrics::{Metrics, TokenTotals};
pub use node::{
    ConversationTree, NodeId, NodeUsage, ProviderMessage, Role, ToolCallRequest, ToolResultRecord, ToolStatus,
};
pub use persistence::{AgentOptionsSnapshot, BotSnapshot, NodeSnapshot};
pub use retry::{Classification, RetryPolicy};
pub use self_tools::{branch_self_tool, builtin_self_tools, get_own_info_tool, modify_own_settings_tool};
pub use tools::{
    InputSchema, ParamSchema, SUCCESS_SENTINEL, Tool, ToolBuilder, ToolConstructors, ToolHandler,
    ToolHandlerSnapshot, ToolInfo, ToolRegistryEntrySnapshot, ToolSchema, ToolSource, stringify_output, tool,
    truncate_middle,
};
pub use tracing_support::init_default_subscriber;

/// Convenience re-export of the most commonly used types and functions.
/// `use agent_tree::prelude::*;` pulls in everything a typical host application
/// needs: a bot, its configuration, tool construction, and the error type.
pub mod prelude {
    pub use crate::{
        AgentOptions, Bot, Error, HttpMailbox, Mailbox, MockMailbox, Provider, Result, Tool, ToolHandler, chain,
        par_branch, prompt_for, prompt_while, recombine, tool,
    };
}
