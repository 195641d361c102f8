//! # ConversationNode
//!
//! The persistent, navigable conversation tree (§3, §4.1 of the spec). Modeled as an
//! arena (`Vec<NodeData>` indexed by [`NodeId`]) rather than `Rc<RefCell<_>>` with
//! back-pointers: parent links must never participate in serialization or equality
//! (§9 "Cyclic graphs" — "Persist children-from-root only; reconstruct parent links
//! on load"), and an arena gives that for free while sidestepping borrow-checker
//! fights over shared mutable tree nodes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Role of a message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sentinel root of every tree. Never removed; never sent to a provider.
    Empty,
    System,
    User,
    Assistant,
    Tool,
}

/// A tool-call request emitted by an assistant node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub input: serde_json::Map<String, serde_json::Value>,
}

/// Status of a tool's execution, as recorded in a [`ToolResultRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Ok,
    Error,
}

/// A tool-result record, keyed by the `id` of the call it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultRecord {
    pub id: String,
    pub name: String,
    pub status: ToolStatus,
    pub content: String,
}

/// Token/cost usage captured on a node, if the provider reported any for the turn
/// that produced it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
}

/// Opaque index into a [`ConversationTree`]'s arena. Stable for the lifetime of the
/// tree in memory; never serialized itself (only the nested structure it indexes is).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone)]
pub(crate) struct NodeData {
    pub(crate) uuid: String,
    pub(crate) role: Role,
    pub(crate) content: String,
    pub(crate) tool_calls: Vec<ToolCallRequest>,
    pub(crate) tool_results: Vec<ToolResultRecord>,
    pub(crate) tags: HashMap<String, bool>,
    pub(crate) usage: Option<NodeUsage>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) replies: Vec<NodeId>,
}

impl NodeData {
    fn new(role: Role, content: String, parent: Option<NodeId>) -> Self {
        NodeData {
            uuid: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            tags: HashMap::new(),
            usage: None,
            parent,
            replies: Vec::new(),
        }
    }
}

/// A single provider-bound message produced by [`ConversationTree::build_messages`].
/// An assistant node that carried `tool_calls` is merged with its paired
/// tool-result node into one [`ProviderMessage`] pair (see the doc on
/// `build_messages` for the exact shape).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResultRecord>,
}

/// The conversation tree itself: a rooted, DAG-free arena of [`ConversationNode`]s.
///
/// The root is always an `Empty`-role sentinel (§3: "never removed; moving up from a
/// node whose parent is the sentinel is a no-op surfaced as an error string").
#[derive(Debug, Clone)]
pub struct ConversationTree {
    pub(crate) nodes: Vec<NodeData>,
}

impl Default for ConversationTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationTree {
    /// Create a fresh tree containing only the root sentinel. Returns the tree and
    /// the id of its root.
    pub fn new() -> Self {
        ConversationTree {
            nodes: vec![NodeData::new(Role::Empty, String::new(), None)],
        }
    }

    /// The id of the root sentinel. Always `NodeId(0)`.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn get(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0]
    }

    fn get_mut(&mut self, id: NodeId) -> &mut NodeData {
        &mut self.nodes[id.0]
    }

    pub fn role(&self, id: NodeId) -> Role {
        self.get(id).role
    }

    pub fn content(&self, id: NodeId) -> &str {
        &self.get(id).content
    }

    pub fn set_content(&mut self, id: NodeId, content: impl Into<String>) {
        self.get_mut(id).content = content.into();
    }

    pub fn tool_calls(&self, id: NodeId) -> &[ToolCallRequest] {
        &self.get(id).tool_calls
    }

    pub fn tool_results(&self, id: NodeId) -> &[ToolResultRecord] {
        &self.get(id).tool_results
    }

    pub fn uuid(&self, id: NodeId) -> &str {
        &self.get(id).uuid
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).parent
    }

    pub fn replies(&self, id: NodeId) -> &[NodeId] {
        &self.get(id).replies
    }

    pub fn tag(&mut self, id: NodeId, label: &str) {
        self.get_mut(id).tags.insert(label.to_string(), true);
    }

    pub fn untag(&mut self, id: NodeId, label: &str) {
        self.get_mut(id).tags.remove(label);
    }

    pub fn has_tag(&self, id: NodeId, label: &str) -> bool {
        self.get(id).tags.contains_key(label)
    }

    /// All tags set on `id`, for snapshotting (§6). Internal callers that only
    /// need membership should prefer [`Self::has_tag`].
    pub fn tags(&self, id: NodeId) -> &HashMap<String, bool> {
        &self.get(id).tags
    }

    pub fn set_usage(&mut self, id: NodeId, usage: NodeUsage) {
        self.get_mut(id).usage = Some(usage);
    }

    pub fn usage(&self, id: NodeId) -> Option<NodeUsage> {
        self.get(id).usage
    }

    /// Find the first node (DFS, root-first) for which `predicate` returns true.
    pub fn find_by(&self, predicate: impl Fn(NodeId, &ConversationTree) -> bool) -> Option<NodeId> {
        fn walk(
            tree: &ConversationTree,
            id: NodeId,
            predicate: &dyn Fn(NodeId, &ConversationTree) -> bool,
        ) -> Option<NodeId> {
            if predicate(id, tree) {
                return Some(id);
            }
            for &child in tree.replies(id) {
                if let Some(found) = walk(tree, child, predicate) {
                    return Some(found);
                }
            }
            None
        }
        walk(self, self.root(), &predicate)
    }

    /// Append a new child under `parent`. Returns the new node's id.
    ///
    /// If `tool_results` is given and `parent`'s tool_calls is non-empty, the result
    /// set must be a superset of the call ids; surplus ids are retained as pending
    /// (the caller is warned via the returned bool, but nothing is dropped).
    pub fn add_reply(
        &mut self,
        parent: NodeId,
        role: Role,
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
        tool_results: Vec<ToolResultRecord>,
    ) -> NodeId {
        let mut data = NodeData::new(role, content.into(), Some(parent));
        data.tool_calls = tool_calls;
        data.tool_results = tool_results;
        let id = NodeId(self.nodes.len());
        self.nodes.push(data);
        self.get_mut(parent).replies.push(id);
        id
    }

    /// `true` if every id in `node`'s `tool_calls` appears in `results`.
    pub fn covers_calls(tool_calls: &[ToolCallRequest], results: &[ToolResultRecord]) -> bool {
        tool_calls.iter().all(|c| results.iter().any(|r| r.id == c.id))
    }

    /// Detach `child` from `parent`'s replies list, leaving the node itself in
    /// the arena but unreachable from the root. Used for nodes that were only
    /// ever needed transiently (`branch_self`'s save-time pairing placeholder).
    pub fn detach_child(&mut self, parent: NodeId, child: NodeId) {
        self.get_mut(parent).replies.retain(|&c| c != child);
    }

    /// Copy `source` (and its whole subtree) from `other` as a new child of
    /// `dest` in `self`, preserving content/tool_calls/tool_results/tags/usage.
    /// Returns the new node's id. Used by `branch_self` to splice a branch's
    /// own turns back onto the anchor node it grew from (§4.6 "reparent").
    pub fn copy_subtree_into(&mut self, dest: NodeId, other: &ConversationTree, source: NodeId) -> NodeId {
        let data = other.get(source);
        let new_id = self.add_reply(dest, data.role, data.content.clone(), data.tool_calls.clone(), data.tool_results.clone());
        if let Some(usage) = data.usage {
            self.set_usage(new_id, usage);
        }
        for (tag, present) in &data.tags {
            if *present {
                self.tag(new_id, tag);
            }
        }
        for &child in other.replies(source) {
            self.copy_subtree_into(new_id, other, child);
        }
        new_id
    }

    // -------------------------------------------------------------------
    // Navigation
    // -------------------------------------------------------------------

    /// Parent of `id`. Moving up from a node whose parent is the root sentinel (or
    /// from the root itself) is a no-op, surfaced as `Err`.
    pub fn up(&self, id: NodeId) -> std::result::Result<NodeId, String> {
        match self.parent(id) {
            Some(p) if self.role(p) == Role::Empty => {
                Err("already at the first turn; cannot move above the root sentinel".to_string())
            }
            Some(p) => Ok(p),
            None => Err("already at the root sentinel; cannot move up".to_string()),
        }
    }

    /// Child at `index`.
    pub fn down(&self, id: NodeId, index: usize) -> std::result::Result<NodeId, String> {
        self.replies(id)
            .get(index)
            .copied()
            .ok_or_else(|| format!("no child at index {index}"))
    }

    /// The rightmost, deepest descendant of `id` (inclusive).
    pub fn leaf(&self, id: NodeId) -> NodeId {
        let mut cur = id;
        while let Some(&last) = self.replies(cur).last() {
            cur = last;
        }
        cur
    }

    /// Cycle to the next sibling (wraps around). No-op (returns `id`) if `id` is the
    /// root or has no siblings.
    pub fn right(&self, id: NodeId) -> NodeId {
        self.sibling_cycle(id, 1)
    }

    /// Cycle to the previous sibling (wraps around).
    pub fn left(&self, id: NodeId) -> NodeId {
        self.sibling_cycle(id, -1)
    }

    fn sibling_cycle(&self, id: NodeId, delta: isize) -> NodeId {
        let Some(parent) = self.parent(id) else {
            return id;
        };
        let siblings = self.replies(parent);
        let Some(pos) = siblings.iter().position(|&s| s == id) else {
            return id;
        };
        let len = siblings.len() as isize;
        let new_pos = (pos as isize + delta).rem_euclid(len);
        siblings[new_pos as usize]
    }

    /// Nearest ancestor (inclusive of `id`) with more than one child.
    pub fn last_fork(&self, id: NodeId) -> Option<NodeId> {
        let mut cur = Some(id);
        while let Some(node) = cur {
            if self.replies(node).len() > 1 {
                return Some(node);
            }
            cur = self.parent(node);
        }
        None
    }

    /// Nearest descendant (inclusive of `id`, walking the rightmost chain) with more
    /// than one child.
    pub fn next_fork(&self, id: NodeId) -> Option<NodeId> {
        let mut cur = id;
        loop {
            if self.replies(cur).len() > 1 {
                return Some(cur);
            }
            match self.replies(cur).last() {
                Some(&next) => cur = next,
                None => return None,
            }
        }
    }

    /// Path from the root to `id`, inclusive, root-first.
    pub fn path_to_root(&self, id: NodeId) -> Vec<NodeId> {
        let mut path = vec![id];
        let mut cur = id;
        while let Some(p) = self.parent(cur) {
            path.push(p);
            cur = p;
        }
        path.reverse();
        path
    }

    /// The only legal way to materialize provider input from the tree: walk
    /// root-to-cursor and emit one [`ProviderMessage`] per node, merging each
    /// assistant node with its immediately following tool-result node when present.
    /// The root sentinel and any node with `Role::Empty` are skipped.
    pub fn build_messages(&self, cursor: NodeId) -> Vec<ProviderMessage> {
        let path = self.path_to_root(cursor);
        let mut messages = Vec::new();
        let mut i = 0;
        while i < path.len() {
            let id = path[i];
            let data = self.get(id);
            if data.role == Role::Empty {
                i += 1;
                continue;
            }
            let mut msg = ProviderMessage {
                role: data.role,
                content: data.content.clone(),
                tool_calls: data.tool_calls.clone(),
                tool_results: Vec::new(),
            };
            if !msg.tool_calls.is_empty() {
                if let Some(&next_id) = path.get(i + 1) {
                    let next = self.get(next_id);
                    if !next.tool_results.is_empty() {
                        msg.tool_results = next.tool_results.clone();
                        i += 1;
                    }
                }
            }
            messages.push(msg);
            i += 1;
        }
        messages
    }

    /// Excise the node found by `predicate`, reattaching its `tool_results` to its
    /// surviving parent before unlinking it so downstream assistant nodes with
    /// `tool_calls` never become unpaired. If the excised node is itself an
    /// assistant node with outstanding `tool_calls`, its paired tool-result child is
    /// removed along with it (they excise together, §4.1 edge cases).
    ///
    /// Returns the id the cursor should move to if `cursor` was inside the excised
    /// subtree (the surviving parent), or `None` if the cursor is unaffected.
    pub fn remove_context(
        &mut self,
        target: NodeId,
        cursor: NodeId,
    ) -> std::result::Result<Option<NodeId>, String> {
        if target == self.root() {
            return Err("cannot remove the root sentinel".to_string());
        }
        let parent = self
            .parent(target)
            .expect("non-root node always has a parent");

        // Preserve tool_results carried by the excised node onto the parent.
        let carried_results = std::mem::take(&mut self.get_mut(target).tool_results);
        self.get_mut(parent).tool_results.extend(carried_results);

        // If target is an assistant node with tool_calls, its paired result child
        // (if any, distinguishable from other replies by covering the call ids)
        // excises together with it.
        let mut to_remove = vec![target];
        if self.role(target) == Role::Assistant && !self.tool_calls(target).is_empty() {
            let calls = self.tool_calls(target).to_vec();
            for &child in self.replies(target) {
                if ConversationTree::covers_calls(&calls, self.tool_results(child)) {
                    to_remove.push(child);
                }
            }
        }
        // Collect the whole excised subtree (everything rooted at `target`).
        let mut stack = to_remove.clone();
        let mut subtree = std::collections::HashSet::new();
        while let Some(id) = stack.pop() {
            if subtree.insert(id) {
                stack.extend(self.replies(id).iter().copied());
            }
        }

        // Unlink target from parent's replies.
        self.get_mut(parent).replies.retain(|&c| c != target);

        let cursor_in_subtree = subtree.contains(&cursor);

        Ok(if cursor_in_subtree { Some(parent) } else { None })
    }
}
