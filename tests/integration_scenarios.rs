//! End-to-end scenarios exercising `Bot` the way a host application would:
//! simple chat, a tool-use round trip through a save/load cycle, parallel
//! branching with recombination, recursive self-branching, concurrent metrics
//! recording, and context removal that preserves paired tool results.

use std::sync::Arc;

use agent_tree::{
    AgentOptions, Bot, Metrics, MockMailbox, Provider, ProviderReply, ToolConstructors, ToolSource, par_branch,
    recombine, tool,
};

fn options() -> AgentOptions {
    AgentOptions::builder(Provider::Anthropic, "claude-3-5-sonnet-latest")
        .system_prompt("You are a terse assistant.")
        .build()
        .unwrap()
}

fn reply(text: &str) -> ProviderReply {
    ProviderReply { content: text.to_string(), ..Default::default() }
}

#[tokio::test]
async fn scenario_simple_chat() {
    let mailbox = Arc::new(MockMailbox::new(vec![reply("Paris is the capital of France.")]));
    let bot = Bot::new("chat-bot", options(), mailbox).with_private_metrics().await;
    let (answer, _node) = bot.respond("What's the capital of France?").await.unwrap();
    assert_eq!(answer, "Paris is the capital of France.");
}

#[tokio::test]
async fn scenario_tool_use_round_trip_through_save_and_load() {
    let mailbox = Arc::new(MockMailbox::new(vec![
        ProviderReply {
            content: String::new(),
            tool_calls: vec![agent_tree::ToolCallRequest {
                id: "call_1".to_string(),
                name: "weather".to_string(),
                input: {
                    let mut m = serde_json::Map::new();
                    m.insert("city".to_string(), serde_json::Value::from("Paris"));
                    m
                },
            }],
            usage: None,
        },
        reply("It's 18C and cloudy in Paris."),
    ]));
    let bot = Bot::new("weather-bot", options(), mailbox).with_private_metrics().await;

    let weather_tool = tool("weather", "Look up the current weather for a city")
        .param("city", "string", true)
        .build(|input, _bot| {
            let city = input.get("city").and_then(serde_json::Value::as_str).unwrap_or("?");
            Ok(format!("18C and cloudy in {city}"))
        });
    bot.add_tool(weather_tool, ToolSource::Module { r#ref: "tools::weather".to_string() }).await;

    let (answer, _node) = bot.respond("What's the weather in Paris?").await.unwrap();
    assert_eq!(answer, "It's 18C and cloudy in Paris.");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bot.json");
    bot.save(&path).await.unwrap();

    let mailbox2 = Arc::new(MockMailbox::new(vec![]));
    let reloaded = Bot::load(&path, None, mailbox2, &ToolConstructors::new()).await.unwrap();
    assert_eq!(reloaded.id().await, "weather-bot");
    // the tool's closure wasn't registered with a constructor on reload, so it
    // is reported as a load error rather than silently vanishing
    let errors = reloaded.tool_load_errors().await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "weather");
}

#[tokio::test]
async fn scenario_parallel_branch_and_recombine() {
    let mailbox = Arc::new(MockMailbox::new(vec![
        reply("Branch A: focus on cost."),
        reply("Branch B: focus on speed."),
        reply("Final: balance cost and speed."),
    ]));
    let bot = Bot::new("planner", options(), mailbox).with_private_metrics().await;

    let replies = par_branch(
        &bot,
        vec!["Optimize for cost.".to_string(), "Optimize for speed.".to_string()],
        2,
    )
    .await
    .unwrap();
    assert_eq!(replies.len(), 2);

    let merged = recombine::llm_merge(&bot, &replies, "Synthesize one recommendation from these branches:")
        .await
        .unwrap();
    assert_eq!(merged, "Final: balance cost and speed.");
}

#[tokio::test]
async fn scenario_recursive_branch_self() {
    let mailbox = Arc::new(MockMailbox::new(vec![
        reply("outer turn"),
        reply("inner branch reply one"),
        reply("inner branch reply two"),
    ]));
    let bot = Bot::new("recursive-bot", options(), mailbox).with_private_metrics().await;
    bot.respond("start").await.unwrap();

    let branch_tool = agent_tree::branch_self_tool();
    let mut input = serde_json::Map::new();
    input.insert(
        "self_prompts".to_string(),
        serde_json::Value::Array(vec![
            serde_json::Value::from("sub task one"),
            serde_json::Value::from("sub task two"),
        ]),
    );
    input.insert("recombine".to_string(), serde_json::Value::from("concatenate"));

    let bot_for_tool = bot.clone();
    let handle = tokio::runtime::Handle::current();
    let output = tokio::task::spawn_blocking(move || {
        let _enter = handle.enter();
        branch_tool.call(input, Some(bot_for_tool))
    })
    .await
    .unwrap()
    .unwrap();
    assert!(output.contains("inner branch reply one"));
    assert!(output.contains("inner branch reply two"));
}

#[tokio::test]
async fn scenario_branch_self_through_real_tool_dispatch() {
    // Unlike `scenario_recursive_branch_self` above (which calls the tool's
    // `.call(...)` directly), this drives `branch_self` the way a live
    // conversation actually would: as a tool the provider asked for, dispatched
    // by `Bot::respond`'s own tool-execution loop.
    let mailbox = Arc::new(MockMailbox::new(vec![
        ProviderReply {
            content: String::new(),
            tool_calls: vec![agent_tree::ToolCallRequest {
                id: "call_branch".to_string(),
                name: "branch_self".to_string(),
                input: {
                    let mut m = serde_json::Map::new();
                    m.insert(
                        "self_prompts".to_string(),
                        serde_json::Value::Array(vec![
                            serde_json::Value::from("sub task one"),
                            serde_json::Value::from("sub task two"),
                        ]),
                    );
                    m.insert("recombine".to_string(), serde_json::Value::from("concatenate"));
                    m
                },
            }],
            usage: None,
        },
        reply("inner branch reply one"),
        reply("inner branch reply two"),
        reply("synthesized after branching"),
    ]));
    let bot = Bot::new("dispatch-bot", options(), mailbox).with_private_metrics().await;
    bot.add_tool(
        agent_tree::branch_self_tool(),
        ToolSource::Module { r#ref: "self_tools::branch_self".to_string() },
    )
    .await;

    // the mailbox only has exactly enough replies for: the branch_self call,
    // each of its two branches, and one final turn — so reaching this answer
    // proves both branches were actually dispatched through the tool handler.
    let (answer, _node) = bot.respond("kick off some branches").await.unwrap();
    assert_eq!(answer, "synthesized after branching");
}

#[tokio::test]
async fn scenario_concurrent_metrics_recording_is_isolated_per_bot() {
    let metrics = Metrics::new();
    let bot_ids: Vec<String> = (0..8).map(|i| format!("worker-{i}")).collect();
    let handles: Vec<_> = bot_ids
        .iter()
        .cloned()
        .map(|bot_id| {
            let metrics = metrics.clone();
            tokio::spawn(async move {
                for i in 0..20u64 {
                    metrics.record_tokens(
                        i,
                        i,
                        0,
                        "anthropic",
                        "claude-3-5-sonnet-latest",
                        Some(&bot_id),
                        1000 + i as i64,
                    );
                }
            })
        })
        .collect();
    for h in handles {
        h.await.unwrap();
    }
    for bot_id in &bot_ids {
        let totals = metrics.get_bot_tokens(bot_id, None);
        assert_eq!(totals.input, (0..20u64).sum::<u64>());
    }
    let grand_total: u64 = metrics.get_total_tokens(None).input;
    assert_eq!(grand_total, (0..20u64).sum::<u64>() * bot_ids.len() as u64);
}

#[tokio::test]
async fn scenario_remove_context_preserves_tool_results_and_moves_cursor() {
    let mailbox = Arc::new(MockMailbox::new(vec![
        ProviderReply {
            content: String::new(),
            tool_calls: vec![agent_tree::ToolCallRequest {
                id: "t1".to_string(),
                name: "add".to_string(),
                input: {
                    let mut m = serde_json::Map::new();
                    m.insert("x".to_string(), serde_json::Value::from(2));
                    m.insert("y".to_string(), serde_json::Value::from(2));
                    m
                },
            }],
            usage: None,
        },
        reply("2 + 2 is 4."),
        reply("still on track after the excision"),
    ]));
    let bot = Bot::new("math-bot", options(), mailbox).with_private_metrics().await;
    let add_tool = tool("add", "add two integers")
        .param("x", "integer", true)
        .param("y", "integer", true)
        .build(|input, _bot| {
            let x = input.get("x").and_then(serde_json::Value::as_i64).unwrap_or(0);
            let y = input.get("y").and_then(serde_json::Value::as_i64).unwrap_or(0);
            Ok((x + y).to_string())
        });
    bot.add_tool(add_tool, ToolSource::Module { r#ref: "tools::add".to_string() }).await;

    // U1 -> A1{tool_call} -> T1{tool_result} -> A2("2 + 2 is 4.")
    let _ = bot.respond("what is 2 + 2?").await.unwrap();
    let final_cursor = bot.cursor().await; // A2
    let tool_node = bot.move_up().await.unwrap(); // T1
    let assistant_with_tool_call = bot.move_up().await.unwrap(); // A1
    let user_node = bot.move_up().await.unwrap(); // U1
    let _ = tool_node;

    // put the cursor back where it was (inside A1's subtree) before excising A1,
    // so remove_context has to relocate it
    bot.set_cursor(final_cursor).await;
    bot.remove_context(assistant_with_tool_call).await.unwrap();
    assert_eq!(bot.cursor().await, user_node);

    // the remaining history (just U1) is still coherent enough to keep chatting
    let (answer, _node) = bot.respond("are we still okay?").await.unwrap();
    assert_eq!(answer, "still on track after the excision");
}
