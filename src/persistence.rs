//! # Persistence
//!
//! The JSON snapshot format (§6) and the save/load operations that turn a live
//! [`Bot`] into one and back. The tree is serialized children-from-root with no
//! parent pointers (§9 "Cyclic graphs"); parent links and the arena's `NodeId`
//! indices are both reconstructed on load, so the wire format is stable even
//! though the in-memory representation is an index-based arena.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bot::{AgentOptions, Bot, BotInner};
use crate::config::Provider;
use crate::error::{Error, Result};
use crate::mailbox::Mailbox;
use crate::metrics::Metrics;
use crate::node::{ConversationTree, NodeId, NodeUsage, Role, ToolCallRequest, ToolResultRecord};
use crate::tools::{ToolConstructors, ToolHandler, ToolHandlerSnapshot};

/// One node in the serialized tree, with children nested inline (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub uuid: String,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResultRecord>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<NodeUsage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<NodeSnapshot>,
}

/// The agent's configuration, as persisted (§6). Mirrors [`AgentOptions`] minus
/// the API key, which is never written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOptionsSnapshot {
    pub provider: Provider,
    pub model: String,
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub max_tool_turns: u32,
    pub enable_tracing: bool,
}

/// The full snapshot of a `Bot` (§6): identity, cursor (by uuid, not by arena
/// index — indices are not stable across a save/load round trip), tool registry,
/// conversation tree, and config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSnapshot {
    pub id: String,
    pub cursor_uuid: String,
    pub options: AgentOptionsSnapshot,
    pub tool_handler: ToolHandlerSnapshot,
    pub conversation: NodeSnapshot,
}

fn build_node_snapshot(tree: &ConversationTree, id: NodeId) -> NodeSnapshot {
    NodeSnapshot {
        uuid: tree.uuid(id).to_string(),
        role: tree.role(id),
        content: tree.content(id).to_string(),
        tool_calls: tree.tool_calls(id).to_vec(),
        tool_results: tree.tool_results(id).to_vec(),
        tags: tree.tags(id).clone(),
        usage: tree.usage(id),
        replies: tree.replies(id).iter().map(|&c| build_node_snapshot(tree, c)).collect(),
    }
}

fn restore_tree(snapshot: &NodeSnapshot) -> ConversationTree {
    let mut tree = ConversationTree::new();
    let root = tree.root();
    // The root sentinel's own fields (uuid/content) in the snapshot are ignored;
    // the freshly-built tree's sentinel is authoritative. Only its children matter.
    restore_children(&mut tree, root, &snapshot.replies);
    tree
}

fn restore_children(tree: &mut ConversationTree, parent: NodeId, children: &[NodeSnapshot]) {
    for child in children {
        let id = tree.add_reply(
            parent,
            child.role,
            child.content.clone(),
            child.tool_calls.clone(),
            child.tool_results.clone(),
        );
        if let Some(usage) = child.usage {
            tree.set_usage(id, usage);
        }
        for (tag, present) in &child.tags {
            if *present {
                tree.tag(id, tag);
            }
        }
        restore_children(tree, id, &child.replies);
    }
}

/// Walk `tree` looking for the node whose persisted `uuid` matches `target_uuid`.
fn find_by_uuid(tree: &ConversationTree, target_uuid: &str) -> Option<NodeId> {
    tree.find_by(|id, t| t.uuid(id) == target_uuid)
}

/// Verify the pairing invariant holds across the whole tree: every `tool_calls`
/// entry on an assistant node must be answered by a `tool_results` entry
/// somewhere in its reply subtree (§4.2 pairing guarantee, §7 "Pairing
/// violation"). Snapshots that fail this are refused, never silently repaired.
fn verify_pairing(tree: &ConversationTree, id: NodeId) -> Result<()> {
    if tree.role(id) == Role::Assistant && !tree.tool_calls(id).is_empty() {
        let calls = tree.tool_calls(id);
        let covered = tree
            .replies(id)
            .iter()
            .any(|&child| ConversationTree::covers_calls(calls, tree.tool_results(child)));
        if !covered {
            return Err(Error::pairing(format!(
                "assistant node {} has tool_calls with no matching tool_results child",
                tree.uuid(id)
            )));
        }
    }
    for &child in tree.replies(id) {
        verify_pairing(tree, child)?;
    }
    Ok(())
}

impl Bot {
    /// Serialize this bot to a [`BotSnapshot`] (§6). Does not write to disk; see
    /// [`Bot::save`] for the file-based convenience wrapper.
    pub async fn to_snapshot(&self) -> BotSnapshot {
        let inner = self.0.lock().await;
        let cursor_uuid = inner.tree.uuid(inner.cursor).to_string();
        BotSnapshot {
            id: inner.id.clone(),
            cursor_uuid,
            options: AgentOptionsSnapshot {
                provider: inner.options.provider.clone(),
                model: inner.options.model.clone(),
                base_url: inner.options.base_url.clone(),
                temperature: inner.options.temperature,
                max_tokens: inner.options.max_tokens,
                system_prompt: inner.options.system_prompt.clone(),
                max_tool_turns: inner.options.max_tool_turns,
                enable_tracing: inner.options.enable_tracing,
            },
            tool_handler: inner.tools.to_snapshot(),
            conversation: build_node_snapshot(&inner.tree, inner.tree.root()),
        }
    }

    /// Rebuild a bot from a [`BotSnapshot`]. Tools are resolved from
    /// `constructors`; a tool whose source can't be resolved stays in the
    /// registry, unloaded, with a recorded load error (never silently dropped,
    /// §4.2, §6). The cursor falls back to the tree's rightmost leaf if the
    /// persisted `cursor_uuid` can't be found (e.g. it named a node inside a
    /// subtree that was pruned before saving).
    pub fn from_snapshot(
        snapshot: &BotSnapshot,
        api_key: Option<String>,
        mailbox: std::sync::Arc<dyn Mailbox>,
        constructors: &ToolConstructors,
    ) -> Result<Bot> {
        let tree = restore_tree(&snapshot.conversation);
        verify_pairing(&tree, tree.root())?;

        let cursor = find_by_uuid(&tree, &snapshot.cursor_uuid).unwrap_or_else(|| tree.leaf(tree.root()));

        let options = AgentOptions {
            provider: snapshot.options.provider.clone(),
            model: snapshot.options.model.clone(),
            base_url: snapshot.options.base_url.clone(),
            api_key,
            temperature: snapshot.options.temperature,
            max_tokens: snapshot.options.max_tokens,
            system_prompt: snapshot.options.system_prompt.clone(),
            max_tool_turns: snapshot.options.max_tool_turns,
            enable_tracing: snapshot.options.enable_tracing,
        };

        let tools = ToolHandler::from_snapshot(&snapshot.tool_handler, constructors);

        Ok(Bot(std::sync::Arc::new(tokio::sync::Mutex::new(BotInner {
            id: snapshot.id.clone(),
            tree,
            cursor,
            tools,
            mailbox,
            options,
            metrics: Metrics::global(),
            on_tool_start: None,
            on_tool_end: None,
            tool_constructors: crate::tools::ToolConstructors::new(),
        }))))
    }

    /// Names and messages of any tools that failed to resolve during the last
    /// `from_snapshot` (empty for a freshly-constructed or fully-resolved bot).
    pub async fn tool_load_errors(&self) -> Vec<(String, String)> {
        self.0.lock().await.tools.load_errors()
    }

    /// Write this bot's snapshot to `path` as pretty JSON. Refuses to write a
    /// snapshot that would fail the pairing invariant on load (§4.2, §7) rather
    /// than letting a broken file reach disk.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let snapshot = self.to_snapshot().await;
        {
            let inner = self.0.lock().await;
            verify_pairing(&inner.tree, inner.tree.root())?;
        }
        let json = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(path, json).await.map_err(|e| Error::other(format!("failed to write snapshot: {e}")))?;
        Ok(())
    }

    /// Load a bot snapshot from `path`.
    pub async fn load(
        path: impl AsRef<Path>,
        api_key: Option<String>,
        mailbox: std::sync::Arc<dyn Mailbox>,
        constructors: &ToolConstructors,
    ) -> Result<Bot> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::other(format!("failed to read snapshot: {e}")))?;
        let snapshot: BotSnapshot = serde_json::from_str(&json).map_err(|e| Error::snapshot(e.to_string()))?;
        Bot::from_snapshot(&snapshot, api_key, mailbox, constructors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::{MockMailbox, ProviderReply};
    use std::sync::Arc;

    fn options() -> AgentOptions {
        AgentOptions::builder(Provider::Anthropic, "claude-3-5-sonnet-latest").build().unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_preserves_conversation_and_cursor() {
        let mailbox = Arc::new(MockMailbox::new(vec![ProviderReply {
            content: "hi back".to_string(),
            ..Default::default()
        }]));
        let bot = Bot::new("bot-1", options(), mailbox.clone()).with_private_metrics().await;
        bot.respond("hello").await.unwrap();

        let snapshot = bot.to_snapshot().await;
        let json = serde_json::to_string(&snapshot).unwrap();
        let reloaded: BotSnapshot = serde_json::from_str(&json).unwrap();

        let restored = Bot::from_snapshot(&reloaded, None, mailbox, &ToolConstructors::new()).unwrap();
        assert_eq!(restored.id().await, "bot-1");

        let cursor = restored.cursor().await;
        let inner = restored.0.lock().await;
        assert_eq!(inner.tree.content(cursor), "hi back");
    }

    #[tokio::test]
    async fn test_load_with_missing_tool_constructor_reports_load_error() {
        let mailbox = Arc::new(MockMailbox::new(vec![]));
        let bot = Bot::new("bot-1", options(), mailbox.clone()).with_private_metrics().await;
        let add_tool = crate::tools::tool("add", "add").build(|_i, _b| Ok("ok".to_string()));
        bot.add_tool(add_tool, crate::tools::ToolSource::Module { r#ref: "tools::add".to_string() }).await;

        let snapshot = bot.to_snapshot().await;
        let restored = Bot::from_snapshot(&snapshot, None, mailbox, &ToolConstructors::new()).unwrap();
        let errors = restored.tool_load_errors().await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "add");
    }

    #[test]
    fn test_verify_pairing_rejects_unpaired_tool_call() {
        let mut tree = ConversationTree::new();
        let root = tree.root();
        let u1 = tree.add_reply(root, Role::User, "hi", vec![], vec![]);
        let _a1 = tree.add_reply(
            u1,
            Role::Assistant,
            "",
            vec![ToolCallRequest { id: "t1".to_string(), name: "add".to_string(), input: serde_json::Map::new() }],
            vec![],
        );
        // no tool-result child added: pairing is broken
        let result = verify_pairing(&tree, root);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_save_rejects_unpaired_tool_call() {
        let mailbox = Arc::new(MockMailbox::new(vec![]));
        let bot = Bot::new("bot-1", options(), mailbox).with_private_metrics().await;
        {
            let mut inner = bot.0.lock().await;
            let cursor = inner.cursor;
            let a1 = inner.tree.add_reply(
                cursor,
                Role::Assistant,
                "",
                vec![ToolCallRequest { id: "t1".to_string(), name: "add".to_string(), input: serde_json::Map::new() }],
                vec![],
            );
            inner.cursor = a1;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        assert!(bot.save(&path).await.is_err());
    }

    #[test]
    fn test_verify_pairing_accepts_matched_call_and_result() {
        let mut tree = ConversationTree::new();
        let root = tree.root();
        let u1 = tree.add_reply(root, Role::User, "hi", vec![], vec![]);
        let a1 = tree.add_reply(
            u1,
            Role::Assistant,
            "",
            vec![ToolCallRequest { id: "t1".to_string(), name: "add".to_string(), input: serde_json::Map::new() }],
            vec![],
        );
        tree.add_reply(
            a1,
            Role::Tool,
            "",
            vec![],
            vec![ToolResultRecord { id: "t1".to_string(), name: "add".to_string(), status: crate::node::ToolStatus::Ok, content: "5".to_string() }],
        );
        assert!(verify_pairing(&tree, root).is_ok());
    }
}
