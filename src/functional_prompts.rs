//! # Functional prompts
//!
//! Orchestrators built on top of [`Bot::respond`] (§4.5): `chain` runs a fixed
//! sequence of prompts, `prompt_while`/`prompt_for` loop a single prompt under a
//! stop condition or a turn budget, `par_branch`/`par_branch_while` fan a prompt
//! set out across independent forks (via [`Bot::fork`], not the save/reload
//! protocol `branch_self` uses — these run in-process rather than as a tool a
//! model invokes), and the recombinators fold branch replies back into one
//! result. `dynamic_prompts::policy` builds a next-prompt selector from runtime
//! rules instead of a fixed sequence. Each orchestrator is a free function over
//! a `Bot` handle rather than a method, mirroring how the teacher crate keeps
//! its retry/backoff logic as free functions operating on a `Client` instead of
//! methods tangled into it.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::bot::Bot;
use crate::error::Result;
use crate::node::NodeId;

/// Run each prompt in `prompts` against `bot` in order, returning every reply
/// paired with the node it landed on. Equivalent to calling
/// `bot.respond(p).await?` in a loop, spelled out as a reusable combinator
/// (§4.5 `chain`).
pub async fn chain(bot: &Bot, prompts: &[impl AsRef<str>]) -> Result<Vec<(String, NodeId)>> {
    let mut replies = Vec::with_capacity(prompts.len());
    for prompt in prompts {
        replies.push(bot.respond(prompt.as_ref()).await?);
    }
    Ok(replies)
}

/// Repeat `prompt` against `bot`, feeding each reply back as the next turn's
/// literal prompt text, until `stop` returns `true` for a reply or `max_turns` is
/// reached (§4.5 `prompt_while`). Returns every (reply, node) pair produced, in
/// order.
pub async fn prompt_while(
    bot: &Bot,
    prompt: impl Into<String>,
    stop: impl Fn(&str) -> bool,
    max_turns: u32,
) -> Result<Vec<(String, NodeId)>> {
    let mut replies = Vec::new();
    let mut next_prompt = prompt.into();
    for _ in 0..max_turns {
        let (reply, node) = bot.respond(next_prompt.clone()).await?;
        let done = stop(&reply);
        next_prompt.clone_from(&reply);
        replies.push((reply, node));
        if done {
            break;
        }
    }
    Ok(replies)
}

/// Iterate `items`, sending `dynamic_prompt(item)` for each one (§4.5
/// `prompt_for`). With `should_branch = true`, every iteration resets the
/// cursor to the node `bot` was on when `prompt_for` was called, so each
/// item's reply becomes a sibling of that shared anchor; with
/// `should_branch = false` the cursor is left to advance turn over turn, so
/// each item's reply chains off the previous one. Returns every
/// `(reply, node)` pair in `items` order.
pub async fn prompt_for<T>(
    bot: &Bot,
    items: &[T],
    dynamic_prompt: impl Fn(&T) -> String,
    should_branch: bool,
) -> Result<Vec<(String, NodeId)>> {
    let anchor = bot.cursor().await;
    let mut replies = Vec::with_capacity(items.len());
    for item in items {
        if should_branch {
            bot.set_cursor(anchor).await;
        }
        let prompt = dynamic_prompt(item);
        replies.push(bot.respond(prompt).await?);
    }
    Ok(replies)
}

/// Fan `prompts` out across independent forks of `bot` (via [`Bot::fork`]),
/// running up to `max_concurrency` at once, and return each fork's reply in the
/// same order as `prompts` (§4.5 `par_branch`). Every fork is fully independent:
/// none of their respond calls affect `bot`'s own tree.
pub async fn par_branch(bot: &Bot, prompts: Vec<String>, max_concurrency: usize) -> Result<Vec<String>> {
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut joins = Vec::with_capacity(prompts.len());
    for prompt in prompts {
        let fork = bot.fork().await;
        let semaphore = semaphore.clone();
        joins.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            fork.respond(prompt).await
        }));
    }
    let mut replies = Vec::with_capacity(joins.len());
    for join in joins {
        let (reply, _node) = join
            .await
            .map_err(|e| crate::error::Error::other(format!("par_branch task panicked: {e}")))??;
        replies.push(reply);
    }
    Ok(replies)
}

/// Like [`par_branch`], but each fork runs [`prompt_while`] instead of a single
/// `respond` call (§4.5 `par_branch_while`).
pub async fn par_branch_while(
    bot: &Bot,
    prompt: impl Into<String> + Clone,
    stop: impl Fn(&str) -> bool + Clone + Send + 'static,
    max_turns: u32,
    branch_count: usize,
    max_concurrency: usize,
) -> Result<Vec<Vec<(String, NodeId)>>> {
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let prompt = prompt.into();
    let mut joins = Vec::with_capacity(branch_count);
    for _ in 0..branch_count {
        let fork = bot.fork().await;
        let semaphore = semaphore.clone();
        let prompt = prompt.clone();
        let stop = stop.clone();
        joins.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            prompt_while(&fork, prompt, stop, max_turns).await
        }));
    }
    let mut results = Vec::with_capacity(joins.len());
    for join in joins {
        let replies = join
            .await
            .map_err(|e| crate::error::Error::other(format!("par_branch_while task panicked: {e}")))??;
        results.push(replies);
    }
    Ok(results)
}

/// Selecting the next turn's prompt from runtime conditions rather than a
/// fixed sequence (§4.5, used by auto-mode-style loops on top of
/// `prompt_while`).
pub mod dynamic_prompts {
    use std::sync::Arc;

    /// A predicate over the bot's last reply, paired with the prompt to use
    /// when it matches.
    pub type Rule = (Arc<dyn Fn(&str) -> bool + Send + Sync>, String);

    /// Build a callable that inspects the latest reply and returns the first
    /// matching rule's prompt, or `default` if none match (§4.5
    /// `dynamic_prompts.policy`). The returned closure is the `dynamic_prompt`
    /// a caller feeds into [`super::prompt_while`]'s loop by hand, or into any
    /// other orchestration that decides its next prompt from the last one.
    pub fn policy(rules: Vec<Rule>, default: impl Into<String>) -> Arc<dyn Fn(&str) -> String + Send + Sync> {
        let default = default.into();
        Arc::new(move |last_reply: &str| {
            for (predicate, prompt) in &rules {
                if predicate(last_reply) {
                    return prompt.clone();
                }
            }
            default.clone()
        })
    }
}

/// Recombination strategies for folding branch replies into one result (§4.5).
pub mod recombine {
    use super::*;

    /// Join every reply with a separator. The simplest recombinator; no
    /// additional provider call.
    pub fn concatenate(replies: &[String], separator: &str) -> String {
        replies.join(separator)
    }

    /// Ask `bot` to synthesize one answer from all the branch replies.
    pub async fn llm_merge(bot: &Bot, replies: &[String], instructions: &str) -> Result<String> {
        let joined = replies
            .iter()
            .enumerate()
            .map(|(i, r)| format!("Branch {}:\n{}", i + 1, r))
            .collect::<Vec<_>>()
            .join("\n\n");
        bot.respond(format!("{instructions}\n\n{joined}")).await.map(|(text, _node)| text)
    }

    /// Ask `bot` to pick the single best reply among the branches and return it
    /// verbatim (distinguished from [`llm_merge`] by prompting for a selection,
    /// not a synthesis — `llm_judge` below additionally asks for a rationale).
    pub async fn llm_vote(bot: &Bot, replies: &[String]) -> Result<String> {
        let joined = replies
            .iter()
            .enumerate()
            .map(|(i, r)| format!("Option {}:\n{}", i + 1, r))
            .collect::<Vec<_>>()
            .join("\n\n");
        bot.respond(format!(
            "Below are several candidate answers. Reply with the single best one, verbatim, and nothing else.\n\n{joined}"
        ))
        .await
        .map(|(text, _node)| text)
    }

    /// Like [`llm_vote`], but asks for a short rationale ahead of the winning
    /// reply rather than the bare winner — useful when the caller wants to show
    /// its reasoning, not just its pick.
    pub async fn llm_judge(bot: &Bot, replies: &[String], criteria: &str) -> Result<String> {
        let joined = replies
            .iter()
            .enumerate()
            .map(|(i, r)| format!("Option {}:\n{}", i + 1, r))
            .collect::<Vec<_>>()
            .join("\n\n");
        bot.respond(format!(
            "Judge the following candidate answers against these criteria: {criteria}.\nGive a brief rationale, then state your chosen option.\n\n{joined}"
        ))
        .await
        .map(|(text, _node)| text)
    }
}
