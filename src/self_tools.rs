//! # Self tools
//!
//! Built-in tools that act on the calling bot itself (§4.6, and §C of the
//! expanded spec, supplemented from `bots/tools/self_tools.py` in the original
//! source): `get_own_info`, `modify_own_settings`, and `branch_self`. All three
//! declare `wants_bot()` so the tool handler binds the live calling bot as `_bot`
//! (§4.2) instead of taking it as a normal, schema-visible parameter.
//!
//! `branch_self` is the interesting one: it follows the original's anchor-tag /
//! save-to-temp-file / load-fresh-copy / reparent protocol rather than just
//! calling [`Bot::fork`] directly, because the original's contract is that each
//! branch is produced by a *save/reload* round trip (catching any pairing or
//! serialization bug the same way a real persisted-and-resumed bot would) and
//! then spliced back into the parent tree by its anchor tag, not by object
//! identity.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Semaphore;

use crate::bot::{AgentOptions, Bot, BotHandle};
use crate::node::{ConversationTree, NodeId, Role, ToolResultRecord, ToolStatus};
use crate::tools::{Tool, ToolSource, tool};

const ANCHOR_TAG_PREFIX: &str = "branch_anchor_";

/// `get_own_info`: a read-only snapshot of the calling bot's identity and
/// settings, useful for an agent introspecting itself mid-conversation.
pub fn get_own_info_tool() -> Tool {
    tool("get_own_info", "Get information about your own configuration: model, provider, temperature, and active tools.")
        .wants_bot()
        .build(|_input, bot| {
            let bot = bot.ok_or_else(|| "get_own_info requires a bound bot".to_string())?;
            let handle = tokio::runtime::Handle::current();
            let info = handle.block_on(async move {
                let inner = bot.0.lock().await;
                serde_json::json!({
                    "id": inner.id,
                    "provider": inner.options.provider.to_string(),
                    "model": inner.options.model,
                    "temperature": inner.options.temperature,
                    "max_tokens": inner.options.max_tokens,
                    "active_tools": inner.tools.active_names(),
                })
            });
            serde_json::to_string_pretty(&info).map_err(|e| format!("Tool Failed: {e}"))
        })
}

/// `modify_own_settings`: change `temperature` and/or `max_tokens` for
/// subsequent provider calls made by the calling bot.
pub fn modify_own_settings_tool() -> Tool {
    tool("modify_own_settings", "Modify your own temperature and/or max_tokens for future responses.")
        .param("temperature", "number", false)
        .param("max_tokens", "integer", false)
        .wants_bot()
        .build(|input, bot| {
            let bot = bot.ok_or_else(|| "modify_own_settings requires a bound bot".to_string())?;
            let temperature = input.get("temperature").and_then(Value::as_f64).map(|v| v as f32);
            let max_tokens = input.get("max_tokens").and_then(Value::as_u64).map(|v| v as u32);
            let handle = tokio::runtime::Handle::current();
            handle.block_on(async move {
                let mut inner = bot.0.lock().await;
                if let Some(t) = temperature {
                    inner.options.temperature = Some(t);
                }
                if let Some(m) = max_tokens {
                    inner.options.max_tokens = Some(m);
                }
            });
            Ok(format!(
                "settings updated: temperature={:?}, max_tokens={:?}",
                temperature, max_tokens
            ))
        })
}

/// Registration helper bundling both info/settings tools plus `branch_self`
/// under their respective [`ToolSource`]s (§6).
pub fn builtin_self_tools() -> Vec<(Tool, ToolSource)> {
    vec![
        (get_own_info_tool(), ToolSource::Module { r#ref: "self_tools::get_own_info".to_string() }),
        (
            modify_own_settings_tool(),
            ToolSource::Module { r#ref: "self_tools::modify_own_settings".to_string() },
        ),
        (branch_self_tool(), ToolSource::Module { r#ref: "self_tools::branch_self".to_string() }),
    ]
}

/// `branch_self`: spin off one or more independent copies of the calling bot at
/// its current cursor, run `self_prompts` against each, and splice the results
/// back in as sibling replies under the anchor node (§4.6).
///
/// Input:
/// - `self_prompts` (required): one prompt string per branch to create.
/// - `allow_work` (optional, default `false`): whether branches keep their
///   parent's tools (and so may call them) or run tool-free.
/// - `parallel` (optional, default `false`): whether branches run concurrently,
///   bounded by a semaphore sized to the branch count.
/// - `recombine` (optional): if set to `"concatenate"`, the tool's return value
///   joins every branch's reply instead of returning them as a JSON array.
pub fn branch_self_tool() -> Tool {
    tool(
        "branch_self",
        "Branch yourself into one or more independent copies, run a different prompt in each, and splice the results back into your conversation tree as sibling replies.",
    )
    .param("self_prompts", "array", true)
    .param("allow_work", "boolean", false)
    .param("parallel", "boolean", false)
    .param("recombine", "string", false)
    .wants_bot()
    .build(|input, bot| {
        let bot = bot.ok_or_else(|| "branch_self requires a bound bot".to_string())?;
        let prompts = parse_prompts(&input)?;
        let allow_work = input.get("allow_work").and_then(Value::as_bool).unwrap_or(false);
        let parallel = input.get("parallel").and_then(Value::as_bool).unwrap_or(false);
        let recombine = input.get("recombine").and_then(Value::as_str).map(str::to_string);

        let handle = tokio::runtime::Handle::current();
        let replies = handle.block_on(run_branches(bot, prompts, allow_work, parallel))?;

        match recombine.as_deref() {
            Some("concatenate") => Ok(replies.join("\n\n---\n\n")),
            _ => serde_json::to_string(&replies).map_err(|e| format!("Tool Failed: {e}")),
        }
    })
}

fn parse_prompts(input: &Map<String, Value>) -> std::result::Result<Vec<String>, String> {
    let prompts = input
        .get("self_prompts")
        .and_then(Value::as_array)
        .ok_or_else(|| "Tool Failed: self_prompts must be a non-empty array of strings".to_string())?;
    if prompts.is_empty() {
        return Err("Tool Failed: self_prompts must not be empty".to_string());
    }
    prompts
        .iter()
        .map(|p| p.as_str().map(str::to_string).ok_or_else(|| "Tool Failed: self_prompts entries must be strings".to_string()))
        .collect()
}

/// One branch's outcome: its final reply text, its whole standalone
/// conversation tree, and the branch-local ids of the new children that
/// landed under its anchor node (everything the branch added beyond the
/// placeholder pairing node it loaded with).
struct BranchOutcome {
    reply: String,
    tree: ConversationTree,
    new_children: Vec<NodeId>,
}

/// Keep re-sending `branch.respond` while the turn it lands on still carries
/// outstanding `tool_calls`, so `allow_work` branches can work through a whole
/// multi-step tool exchange rather than stopping after one (§4.6 "allow_work").
/// `Bot::respond` already loops its own provider/tool round trips to
/// completion before ever returning `Ok`, so in the current architecture this
/// converges on the first iteration; it is still written as a real loop so it
/// keeps working if `respond` is ever changed to stop earlier.
async fn run_until_no_tool_calls(branch: &Bot, first_prompt: String) -> std::result::Result<(String, NodeId), String> {
    let mut prompt = first_prompt;
    loop {
        let (reply, node) = branch.respond(prompt).await.map_err(|e| format!("Tool Failed: {e}"))?;
        let still_pending = {
            let inner = branch.0.lock().await;
            !inner.tree.tool_calls(node).is_empty()
        };
        if !still_pending {
            return Ok((reply, node));
        }
        prompt = reply;
    }
}

async fn run_branches(
    bot: BotHandle,
    prompts: Vec<String>,
    allow_work: bool,
    parallel: bool,
) -> std::result::Result<Vec<String>, String> {
    // 1. Tag the current cursor so each reloaded branch can re-find its
    // attachment point after a full tree deserialization (uuids survive the
    // round trip; arena indices do not).
    let anchor = format!("{ANCHOR_TAG_PREFIX}{}", uuid::Uuid::new_v4().simple());
    let cursor = bot.cursor().await;
    bot.tag(cursor, &anchor).await;

    // 1b. If the anchor is an assistant node that just requested tools (the
    // common case: branch_self is itself invoked as a tool call from that very
    // node), it has no paired tool_results yet — saving now would fail the
    // pairing invariant. A placeholder result stands in for each outstanding
    // call so the save (and every branch's own reload of that save) passes
    // pairing; it is detached from the live tree again once the save is done,
    // since the real result the parent's tool dispatch appends after this
    // call returns is what belongs there permanently.
    let placeholder_node = {
        let mut inner = bot.0.lock().await;
        let pending = inner.tree.tool_calls(cursor).to_vec();
        if pending.is_empty() {
            None
        } else {
            let placeholders: Vec<ToolResultRecord> = pending
                .iter()
                .map(|c| ToolResultRecord {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    status: ToolStatus::Ok,
                    content: "(pending: branch_self in progress)".to_string(),
                })
                .collect();
            Some(inner.tree.add_reply(cursor, Role::Tool, "", vec![], placeholders))
        }
    };

    // 2. Save to a temp file. Each branch loads its own fresh copy from the same
    // file so branches never share tree/tool state with one another or with the
    // parent (§4.6, §8 "independent branches").
    let temp_file = tempfile::NamedTempFile::new().map_err(|e| format!("Tool Failed: {e}"))?;
    let path = temp_file.path().to_path_buf();
    bot.save(&path).await.map_err(|e| e.to_string())?;
    bot.untag(cursor, &anchor).await;
    if let Some(placeholder) = placeholder_node {
        bot.0.lock().await.tree.detach_child(cursor, placeholder);
    }

    let (mailbox, api_key, constructors) = {
        let inner = bot.0.lock().await;
        (inner.mailbox.clone(), inner.options.api_key.clone(), inner.tool_constructors.clone())
    };

    let run_one = |prompt: String| {
        let path = path.clone();
        let mailbox = mailbox.clone();
        let api_key = api_key.clone();
        let constructors = constructors.clone();
        let anchor = anchor.clone();
        async move {
            let branch = Bot::load(&path, api_key, mailbox, &constructors)
                .await
                .map_err(|e| format!("Tool Failed: branch load error: {e}"))?;
            if !allow_work {
                branch.clear_tools().await;
            } else {
                branch.set_tool_constructors(constructors).await;
            }

            let anchor_node = branch
                .find_tagged(&anchor)
                .await
                .ok_or_else(|| "Tool Failed: branch lost its anchor node on reload".to_string())?;
            branch.untag(anchor_node, &anchor).await;
            branch.set_cursor(anchor_node).await;

            let children_before = branch.0.lock().await.tree.replies(anchor_node).len();

            let (reply, _landed) = if allow_work {
                run_until_no_tool_calls(&branch, prompt).await?
            } else {
                branch.respond(prompt).await.map_err(|e| format!("Tool Failed: {e}"))?
            };

            let inner = branch.0.lock().await;
            let new_children = inner.tree.replies(anchor_node)[children_before..].to_vec();
            Ok::<_, String>(BranchOutcome { reply, tree: inner.tree.clone(), new_children })
        }
    };

    let outcomes = if parallel {
        let semaphore = Arc::new(Semaphore::new(prompts.len().max(1)));
        let mut joins = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            let semaphore = semaphore.clone();
            let fut = run_one(prompt);
            joins.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                fut.await
            }));
        }
        let mut results = Vec::with_capacity(joins.len());
        for join in joins {
            let outcome = join.await.map_err(|e| format!("Tool Failed: branch task panicked: {e}"))??;
            results.push(outcome);
        }
        results
    } else {
        let mut results = Vec::new();
        for prompt in prompts {
            results.push(run_one(prompt).await?);
        }
        results
    };

    // 3. Reparent: splice each branch's newly-grown turns back onto the
    // anchor node in the parent's own tree, as a real subtree rather than a
    // flattened summary reply (§4.6 "the branch's new context is spliced back
    // in as siblings of the anchor").
    let replies: Vec<String> = outcomes.iter().map(|o| o.reply.clone()).collect();
    {
        let mut inner = bot.0.lock().await;
        for outcome in &outcomes {
            for &child in &outcome.new_children {
                inner.tree.copy_subtree_into(cursor, &outcome.tree, child);
            }
        }
    }

    Ok(replies)
}
