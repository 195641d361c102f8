//! # Tool Handler
//!
//! Ingests host-language callables, generates provider-agnostic JSON schemas,
//! maintains a lazy-load registry, executes tool-call requests with per-call
//! instrumentation, and preserves the pairing invariant across save/load/fork
//! (§4.2 of the spec).
//!
//! Rust has no runtime `exec`/signature introspection, so per §9 ("Dynamic tool
//! loading and `exec` of inline source" / "Runtime introspection of function
//! signatures") the registrar requires a small declarative schema alongside the
//! function rather than deriving one automatically: [`ToolBuilder`] plays the role
//! the original's decorator-based introspection played, and [`ToolSource`] plus a
//! caller-supplied [`ToolConstructors`] registry plays the role of "recompile a
//! synthetic module namespace" for tools that can't be re-imported by path.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::bot::BotHandle;
use crate::error::{Error, Result};
use crate::node::{ToolCallRequest, ToolResultRecord, ToolStatus};

/// Soft character budget before a tool's output is truncated from the middle.
pub const TRUNCATION_THRESHOLD: usize = 5000;
/// Characters preserved from the head and tail of a truncated output.
pub const TRUNCATION_KEEP: usize = 2000;
const TRUNCATION_MARKER: &str =
    "... (tool result truncated from middle to save you from context overload) ...";
/// Returned in place of a `None`/unit tool return value.
pub const SUCCESS_SENTINEL: &str = "Tool execution completed without errors";

/// JSON-Schema-shaped description of a tool's parameters (§6, canonical tool schema).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSchema {
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// The canonical, provider-agnostic tool schema (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub properties: HashMap<String, ParamSchema>,
    pub required: Vec<String>,
}

impl InputSchema {
    fn object() -> Self {
        InputSchema {
            schema_type: "object".to_string(),
            properties: HashMap::new(),
            required: Vec::new(),
        }
    }
}

/// The function signature every tool handler is wrapped to. Inputs arrive coerced
/// from the call's JSON map; the `_bot` handle is bound only when the tool declared
/// it (§4.2 "Per-tool parameter injection").
pub type ToolFn =
    dyn Fn(Map<String, Value>, Option<BotHandle>) -> std::result::Result<String, String>
        + Send
        + Sync;

/// A single registered tool: schema plus its executable body.
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub schema: ToolSchema,
    pub wants_bot: bool,
    handler: Arc<ToolFn>,
}

impl Tool {
    /// Invoke this tool's body directly, bypassing the registry and the
    /// async/truncation machinery in [`ToolHandler::execute`]. Useful for unit
    /// tests and for tools (like `branch_self`) that need to call another tool
    /// inline rather than through a provider round trip.
    pub fn call(&self, input: Map<String, Value>, bot: Option<BotHandle>) -> std::result::Result<String, String> {
        (self.handler)(input, bot)
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("wants_bot", &self.wants_bot)
            .finish_non_exhaustive()
    }
}

/// Fluent builder for a [`Tool`], the Rust stand-in for the original's signature
/// introspection: since Rust erases parameter names/types by the time a closure is
/// passed in, the schema is declared explicitly instead of derived.
pub struct ToolBuilder {
    name: String,
    description: String,
    schema: InputSchema,
    wants_bot: bool,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        ToolBuilder {
            name: name.into(),
            description: description.into(),
            schema: InputSchema::object(),
            wants_bot: false,
        }
    }

    /// Declare a parameter. Parameters without an explicit type default to
    /// `"string"` per §4.2.
    pub fn param(mut self, name: impl Into<String>, param_type: impl Into<String>, required: bool) -> Self {
        let name = name.into();
        self.schema.properties.insert(
            name.clone(),
            ParamSchema {
                param_type: param_type.into(),
                description: None,
                default: None,
            },
        );
        if required {
            self.schema.required.push(name);
        }
        self
    }

    /// Mark this tool as wanting the calling bot bound as `_bot` at invocation time
    /// (§4.2). `_bot` is never exposed in the schema.
    pub fn wants_bot(mut self) -> Self {
        self.wants_bot = true;
        self
    }

    /// Finalize the tool with its executable body. The handler receives coerced
    /// string-keyed JSON inputs and, if `wants_bot()` was declared, a handle to the
    /// calling bot. Any panic inside `handler` is caught at this boundary and
    /// converted to an error string — no tool may unwind across the boundary
    /// (§4.2, §7, §8 property 5).
    pub fn build<F>(self, handler: F) -> Tool
    where
        F: Fn(Map<String, Value>, Option<BotHandle>) -> std::result::Result<String, String>
            + Send
            + Sync
            + 'static,
    {
        let wrapped = move |input: Map<String, Value>, bot: Option<BotHandle>| {
            let result = panic::catch_unwind(AssertUnwindSafe(|| handler(input, bot)));
            match result {
                Ok(r) => r,
                Err(payload) => {
                    let msg = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    Err(format!("Tool Failed: {msg}"))
                }
            }
        };
        Tool {
            schema: ToolSchema {
                name: self.name.clone(),
                description: self.description.clone(),
                input_schema: self.schema,
            },
            name: self.name,
            description: self.description,
            wants_bot: self.wants_bot,
            handler: Arc::new(wrapped),
        }
    }
}

/// Convenience entry point: `tool("name", "description")` starts a [`ToolBuilder`].
pub fn tool(name: impl Into<String>, description: impl Into<String>) -> ToolBuilder {
    ToolBuilder::new(name, description)
}

/// Where a registry entry's executable body comes from, recorded for persistence
/// (§4.2, §6). Rust has no `exec`; `Module`/`File` entries are re-resolved from a
/// caller-supplied [`ToolConstructors`] registry by their `ref` string on load, and
/// `Inline` entries (closures built in-process, not importable by path) are resolved
/// from the same registry keyed by tool name — the practical equivalent of
/// "recompile in a fresh synthetic module namespace."
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ToolSource {
    Module { r#ref: String },
    File { r#ref: String },
    Inline {
        r#ref: String,
        source_text: String,
    },
}

impl ToolSource {
    fn lookup_key(&self) -> &str {
        match self {
            ToolSource::Module { r#ref } => r#ref,
            ToolSource::File { r#ref } => r#ref,
            ToolSource::Inline { r#ref, .. } => r#ref,
        }
    }
}

/// A caller-supplied map from a [`ToolSource`]'s lookup key to a constructor that
/// rebuilds the [`Tool`]. Playing the role of "re-import the module" / "recompile
/// the inline source": on `load`, tools are never executed, only looked up and (if
/// found) rebuilt from this registry.
pub type ToolConstructors = HashMap<String, Arc<dyn Fn() -> Tool + Send + Sync>>;

/// A registry entry: descriptor for a tool the handler knows about, whether or not
/// it is currently active.
#[derive(Clone)]
pub struct ToolRegistryEntry {
    pub schema: ToolSchema,
    pub loaded: bool,
    pub source: ToolSource,
    pub load_error: Option<String>,
    pub(crate) tool: Option<Tool>,
}

impl std::fmt::Debug for ToolRegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistryEntry")
            .field("name", &self.schema.name)
            .field("loaded", &self.loaded)
            .field("load_error", &self.load_error)
            .finish_non_exhaustive()
    }
}

/// A row returned by [`ToolHandler::list`].
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub loaded: bool,
    pub description: String,
    pub required_params: Vec<String>,
}

/// Owns the full set of tools a bot knows about (the registry) and the active
/// subset whose schemas are sent to the provider.
#[derive(Default, Clone)]
pub struct ToolHandler {
    registry: HashMap<String, ToolRegistryEntry>,
    /// Preserves registration/activation order; active tools are serialized into
    /// provider calls in this order.
    order: Vec<String>,
    active: Vec<String>,
}

impl std::fmt::Debug for ToolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolHandler")
            .field("registered", &self.order.len())
            .field("active", &self.active)
            .finish()
    }
}

impl ToolHandler {
    pub fn new() -> Self {
        ToolHandler::default()
    }

    /// Register a tool and immediately activate it (`add_tool`, §4.2).
    pub fn add_tool(&mut self, tool: Tool, source: ToolSource) {
        self.register(tool, source);
        let name = self.order.last().unwrap().clone();
        if !self.active.contains(&name) {
            self.active.push(name);
        }
        self.registry.get_mut(self.order.last().unwrap()).unwrap().loaded = true;
    }

    /// Register several tools at once (`add_tools`, §4.2), e.g. every public tool
    /// a "module" exposes. Each is activated immediately like [`Self::add_tool`].
    pub fn add_tools(&mut self, tools: Vec<(Tool, ToolSource)>) {
        for (tool, source) in tools {
            self.add_tool(tool, source);
        }
    }

    /// Put a tool in the registry without activating it (lazy registry, §4.2).
    pub fn register(&mut self, tool: Tool, source: ToolSource) {
        let name = tool.name.clone();
        let entry = ToolRegistryEntry {
            schema: tool.schema.clone(),
            loaded: false,
            source,
            load_error: None,
            tool: Some(tool),
        };
        if !self.registry.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.registry.insert(name, entry);
    }

    /// Activate a registered tool, adding it to the active set sent to the
    /// provider.
    pub fn activate(&mut self, name: &str) -> bool {
        let Some(entry) = self.registry.get_mut(name) else {
            return false;
        };
        if entry.tool.is_none() {
            return false;
        }
        entry.loaded = true;
        if !self.active.contains(&name.to_string()) {
            self.active.push(name.to_string());
        }
        true
    }

    /// Deactivate a tool: it remains in the registry, but its schema is no longer
    /// sent to the provider.
    pub fn deactivate(&mut self, name: &str) -> bool {
        let Some(entry) = self.registry.get_mut(name) else {
            return false;
        };
        entry.loaded = false;
        self.active.retain(|n| n != name);
        true
    }

    /// Registry rows, optionally filtered by name substring.
    pub fn list(&self, filter: Option<&str>) -> Vec<ToolInfo> {
        self.order
            .iter()
            .filter_map(|name| self.registry.get(name))
            .filter(|e| filter.is_none_or(|f| e.schema.name.contains(f)))
            .map(|e| ToolInfo {
                name: e.schema.name.clone(),
                loaded: e.loaded,
                description: e.schema.description.clone(),
                required_params: e.schema.input_schema.required.clone(),
            })
            .collect()
    }

    /// Schemas of the currently-active tools, in activation order — exactly what a
    /// [`crate::mailbox::Mailbox`] attaches to a provider request.
    pub fn active_schemas(&self) -> Vec<ToolSchema> {
        self.active
            .iter()
            .filter_map(|name| self.registry.get(name))
            .map(|e| e.schema.clone())
            .collect()
    }

    pub fn active_names(&self) -> &[String] {
        &self.active
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Execute a batch of tool-call requests in declared order, producing one
    /// [`ToolResultRecord`] per request — including for unknown tools and failing
    /// calls — so that every request id has a matching result id (§4.2 pairing
    /// guarantee, §8 property 1).
    pub async fn execute(
        &self,
        requests: &[ToolCallRequest],
        bot: Option<BotHandle>,
        mut on_start: impl FnMut(&ToolCallRequest),
        mut on_end: impl FnMut(&ToolCallRequest, &ToolResultRecord),
    ) -> Vec<ToolResultRecord> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            on_start(request);
            let record = self.execute_one(request, bot.clone()).await;
            on_end(request, &record);
            results.push(record);
        }
        results
    }

    async fn execute_one(&self, request: &ToolCallRequest, bot: Option<BotHandle>) -> ToolResultRecord {
        let Some(entry) = self.registry.get(&request.name) else {
            return ToolResultRecord {
                id: request.id.clone(),
                name: request.name.clone(),
                status: ToolStatus::Error,
                content: format!("Tool Failed: unknown tool '{}'", request.name),
            };
        };
        let Some(tool) = entry.tool.clone() else {
            return ToolResultRecord {
                id: request.id.clone(),
                name: request.name.clone(),
                status: ToolStatus::Error,
                content: format!(
                    "Tool Failed: '{}' is registered but not loaded",
                    request.name
                ),
            };
        };
        let input = coerce_input(&tool, &request.input);
        let bot_arg = if tool.wants_bot { bot } else { None };
        let handler = tool.handler.clone();
        // Tool bodies are plain sync closures; spawn_blocking keeps a slow or
        // CPU-bound tool from stalling the async executor without adopting a
        // second concurrency primitive for the rest of the crate.
        let outcome = tokio::task::spawn_blocking(move || handler(input, bot_arg))
            .await
            .unwrap_or_else(|join_err| Err(format!("Tool Failed: {join_err}")));
        match outcome {
            Ok(output) => ToolResultRecord {
                id: request.id.clone(),
                name: request.name.clone(),
                status: ToolStatus::Ok,
                content: truncate_middle(&output),
            },
            Err(output) => ToolResultRecord {
                id: request.id.clone(),
                name: request.name.clone(),
                status: ToolStatus::Error,
                content: truncate_middle(&output),
            },
        }
    }

    // -------------------------------------------------------------------
    // Persistence (§4.2, §6)
    // -------------------------------------------------------------------

    /// Snapshot the registry for §6's `tool_handler` section.
    pub fn to_snapshot(&self) -> ToolHandlerSnapshot {
        ToolHandlerSnapshot {
            active: self.active.clone(),
            registry: self
                .order
                .iter()
                .filter_map(|name| self.registry.get(name))
                .map(|e| ToolRegistryEntrySnapshot {
                    name: e.schema.name.clone(),
                    schema: e.schema.clone(),
                    loaded: e.loaded,
                    source: e.source.clone(),
                })
                .collect(),
        }
    }

    /// Rebuild a handler from a snapshot, resolving `Module`/`File`/`Inline` tools
    /// from `constructors`. Never executes tool code — only looks up and invokes
    /// the *constructor* closure the caller registered ahead of time. A tool whose
    /// source isn't found in `constructors` is retained unloaded with a
    /// `load_error`, never silently dropped (§4.2, §6).
    pub fn from_snapshot(snapshot: &ToolHandlerSnapshot, constructors: &ToolConstructors) -> Self {
        let mut handler = ToolHandler::new();
        for entry in &snapshot.registry {
            let ctor = constructors.get(entry.source.lookup_key());
            match ctor {
                Some(ctor) => {
                    let tool = ctor();
                    handler.order.push(entry.name.clone());
                    handler.registry.insert(
                        entry.name.clone(),
                        ToolRegistryEntry {
                            schema: entry.schema.clone(),
                            loaded: entry.loaded,
                            source: entry.source.clone(),
                            load_error: None,
                            tool: Some(tool),
                        },
                    );
                }
                None => {
                    log::warn!(
                        "no constructor registered for tool source '{}'; '{}' stays unloaded",
                        entry.source.lookup_key(),
                        entry.name
                    );
                    handler.order.push(entry.name.clone());
                    handler.registry.insert(
                        entry.name.clone(),
                        ToolRegistryEntry {
                            schema: entry.schema.clone(),
                            loaded: false,
                            source: entry.source.clone(),
                            load_error: Some(format!(
                                "no constructor registered for '{}'",
                                entry.source.lookup_key()
                            )),
                            tool: None,
                        },
                    );
                }
            }
        }
        handler.active = snapshot
            .active
            .iter()
            .filter(|name| {
                handler
                    .registry
                    .get(*name)
                    .is_some_and(|e| e.loaded && e.tool.is_some())
            })
            .cloned()
            .collect();
        handler
    }

    /// Names of tools whose load failed during `from_snapshot`, with their errors.
    pub fn load_errors(&self) -> Vec<(String, String)> {
        self.order
            .iter()
            .filter_map(|name| self.registry.get(name))
            .filter_map(|e| e.load_error.clone().map(|err| (e.schema.name.clone(), err)))
            .collect()
    }
}

/// Serializable form of a [`ToolRegistryEntry`] (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRegistryEntrySnapshot {
    pub name: String,
    pub schema: ToolSchema,
    pub loaded: bool,
    pub source: ToolSource,
}

/// Serializable form of a [`ToolHandler`] (§6's `tool_handler` object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolHandlerSnapshot {
    pub active: Vec<String>,
    pub registry: Vec<ToolRegistryEntrySnapshot>,
}

/// Coerce a raw JSON input map to the types declared in the tool's schema.
/// Booleans accept a canonical truthy/falsy vocabulary; everything else round-trips
/// through serde_json's native typing when it already matches, or is parsed from
/// its string form when the provider sent a string for a non-string parameter.
fn coerce_input(tool: &Tool, raw: &Map<String, Value>) -> Map<String, Value> {
    let mut coerced = Map::new();
    for (key, value) in raw {
        let declared_type = tool
            .schema
            .input_schema
            .properties
            .get(key)
            .map(|p| p.param_type.as_str())
            .unwrap_or("string");
        coerced.insert(key.clone(), coerce_value(value, declared_type));
    }
    coerced
}

fn coerce_value(value: &Value, declared_type: &str) -> Value {
    match (declared_type, value) {
        ("boolean", Value::String(s)) => Value::Bool(is_truthy(s)),
        ("integer", Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| value.clone()),
        ("number", Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Value::from)
            .unwrap_or_else(|_| value.clone()),
        ("array" | "object", Value::String(s)) => {
            serde_json::from_str(s).unwrap_or_else(|_| value.clone())
        }
        _ => value.clone(),
    }
}

/// Canonical truthy/falsy vocabulary for string-to-bool coercion at the tool
/// boundary (§4.2).
fn is_truthy(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "y" | "on"
    )
}

/// Truncate `text` from the middle if it exceeds [`TRUNCATION_THRESHOLD`],
/// preserving [`TRUNCATION_KEEP`] characters from the head and tail verbatim
/// (§4.2, §8 boundary behavior).
pub fn truncate_middle(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= TRUNCATION_THRESHOLD {
        return text.to_string();
    }
    let head: String = chars[..TRUNCATION_KEEP].iter().collect();
    let tail: String = chars[chars.len() - TRUNCATION_KEEP..].iter().collect();
    format!("{head}{TRUNCATION_MARKER}{tail}")
}

/// Stringify a tool's raw return value for the boundary contract: outputs are
/// always strings, complex values are serialized, and a `null`/absent value
/// becomes [`SUCCESS_SENTINEL`] (§4.2, §8 boundary behavior).
pub fn stringify_output(value: Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => SUCCESS_SENTINEL.to_string(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    }
}

/// Build a request-validation error for a call whose input is missing a required
/// parameter the schema declares, or whose parameter kind cannot be represented
/// (var-args, keyword-only without a primitive default) — registration-time
/// failures surface as `Error::Tool`, never as a tool-result string (§4.2).
pub fn validate_registration(tool: &ToolSchema) -> Result<()> {
    for required in &tool.input_schema.required {
        if !tool.input_schema.properties.contains_key(required) {
            return Err(Error::tool(format!(
                "tool '{}' declares required parameter '{}' with no type",
                tool.name, required
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, name: &str, input: Map<String, Value>) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            name: name.to_string(),
            input,
        }
    }

    fn add_tool() -> Tool {
        tool("add", "Add two integers")
            .param("x", "integer", true)
            .param("y", "integer", true)
            .build(|input, _bot| {
                let x = input.get("x").and_then(Value::as_i64).unwrap_or(0);
                let y = input.get("y").and_then(Value::as_i64).unwrap_or(0);
                Ok((x + y).to_string())
            })
    }

    #[tokio::test]
    async fn test_execute_pairs_result_with_call() {
        let mut handler = ToolHandler::new();
        handler.add_tool(add_tool(), ToolSource::Module { r#ref: "tools::add".to_string() });

        let mut input = Map::new();
        input.insert("x".to_string(), Value::from(2));
        input.insert("y".to_string(), Value::from(3));
        let requests = vec![call("t1", "add", input)];

        let results = handler.execute(&requests, None, |_| {}, |_, _| {}).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "t1");
        assert_eq!(results[0].content, "5");
        assert_eq!(results[0].status, ToolStatus::Ok);
    }

    #[tokio::test]
    async fn test_execute_unknown_tool_still_produces_paired_error_result() {
        let handler = ToolHandler::new();
        let requests = vec![call("t1", "missing", Map::new())];
        let results = handler.execute(&requests, None, |_| {}, |_, _| {}).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ToolStatus::Error);
        assert!(results[0].content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn test_execute_preserves_declared_order_for_parallel_calls() {
        let mut handler = ToolHandler::new();
        handler.add_tool(add_tool(), ToolSource::Module { r#ref: "tools::add".to_string() });

        let mut i1 = Map::new();
        i1.insert("x".to_string(), Value::from(1));
        i1.insert("y".to_string(), Value::from(1));
        let mut i2 = Map::new();
        i2.insert("x".to_string(), Value::from(10));
        i2.insert("y".to_string(), Value::from(10));

        let requests = vec![call("a", "add", i1), call("b", "add", i2)];
        let results = handler.execute(&requests, None, |_| {}, |_, _| {}).await;
        assert_eq!(results[0].id, "a");
        assert_eq!(results[0].content, "2");
        assert_eq!(results[1].id, "b");
        assert_eq!(results[1].content, "20");
    }

    #[tokio::test]
    async fn test_panicking_tool_never_escapes_boundary() {
        let panics = tool("boom", "always panics").build(|_input, _bot| {
            panic!("kaboom");
        });
        let mut handler = ToolHandler::new();
        handler.add_tool(panics, ToolSource::Module { r#ref: "tools::boom".to_string() });
        let requests = vec![call("t1", "boom", Map::new())];
        let results = handler.execute(&requests, None, |_| {}, |_, _| {}).await;
        assert_eq!(results[0].status, ToolStatus::Error);
        assert!(results[0].content.starts_with("Tool Failed"));
    }

    #[test]
    fn test_lazy_registry_activate_deactivate() {
        let mut handler = ToolHandler::new();
        handler.register(add_tool(), ToolSource::Module { r#ref: "tools::add".to_string() });
        assert!(handler.active_schemas().is_empty());
        assert!(handler.activate("add"));
        assert_eq!(handler.active_schemas().len(), 1);
        assert!(handler.deactivate("add"));
        assert!(handler.active_schemas().is_empty());
        // still present in the registry (just inactive)
        assert_eq!(handler.list(None).len(), 1);
    }

    #[test]
    fn test_truncate_middle_preserves_head_and_tail() {
        let long = format!("START{}END", "X".repeat(6000));
        let truncated = truncate_middle(&long);
        assert!(truncated.len() < long.len());
        assert!(truncated.starts_with("START"));
        assert!(truncated.ends_with("END"));
        assert!(truncated.contains("truncated from middle"));
    }

    #[test]
    fn test_truncate_middle_noop_under_threshold() {
        let short = "hello world";
        assert_eq!(truncate_middle(short), short);
    }

    #[test]
    fn test_stringify_output_none_is_success_sentinel() {
        assert_eq!(stringify_output(None), SUCCESS_SENTINEL);
        assert_eq!(stringify_output(Some(Value::Null)), SUCCESS_SENTINEL);
    }

    #[test]
    fn test_coerce_boolean_truthy_vocabulary() {
        for truthy in ["true", "1", "yes", "Y", "ON"] {
            assert!(is_truthy(truthy), "{truthy} should be truthy");
        }
        for falsy in ["false", "0", "no", "", "off"] {
            assert!(!is_truthy(falsy), "{falsy} should be falsy");
        }
    }

    #[test]
    fn test_snapshot_round_trip_with_missing_constructor_keeps_unloaded() {
        let mut handler = ToolHandler::new();
        handler.add_tool(add_tool(), ToolSource::Module { r#ref: "tools::add".to_string() });
        let snapshot = handler.to_snapshot();
        let restored = ToolHandler::from_snapshot(&snapshot, &ToolConstructors::new());
        assert_eq!(restored.list(None).len(), 1);
        assert!(!restored.list(None)[0].loaded);
        assert_eq!(restored.load_errors().len(), 1);
    }

    #[test]
    fn test_snapshot_round_trip_with_constructor_restores_active_set() {
        let mut handler = ToolHandler::new();
        handler.add_tool(add_tool(), ToolSource::Module { r#ref: "tools::add".to_string() });
        let snapshot = handler.to_snapshot();

        let mut ctors: ToolConstructors = HashMap::new();
        ctors.insert("tools::add".to_string(), Arc::new(add_tool));
        let restored = ToolHandler::from_snapshot(&snapshot, &ctors);
        assert_eq!(restored.active_names(), &["add".to_string()]);
    }
}
