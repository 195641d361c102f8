//! # Metrics
//!
//! Process-wide token and cost accounting, keyed globally and per bot id (§4.8,
//! supplemented from `tests/integration/test_concurrent_observability.py` in the
//! original source, since the distilled spec only gestures at "the core emits
//! counters" — it does not pin the exact read/write API). Every write is an
//! append to a `Mutex`-guarded event log plus an update to running totals, so
//! concurrent access from many bots never cross-contaminates counts (§8 property,
//! mirrored from the Python test's 5-threads-x-10-calls assertion).

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

/// Aggregate token counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenTotals {
    pub input: u64,
    pub output: u64,
    pub cached: u64,
    pub total: u64,
}

#[derive(Debug, Clone)]
struct TokenEvent {
    input: u64,
    output: u64,
    cached: u64,
    provider: String,
    model: String,
    /// `None` for an untagged/global-only event (§4.7): it folds into the
    /// process-wide totals but never into a per-bot query.
    bot_id: Option<String>,
    timestamp: i64,
}

#[derive(Debug, Clone)]
struct CostEvent {
    cost: f64,
    provider: String,
    model: String,
    bot_id: Option<String>,
    timestamp: i64,
}

#[derive(Default)]
struct MetricsState {
    token_events: Vec<TokenEvent>,
    cost_events: Vec<CostEvent>,
}

/// Process-wide metrics store. Cloning is cheap (an `Arc` around the same lock);
/// every `Bot` shares a handle to the process-wide default unless constructed with
/// its own via [`Metrics::new`] (used in tests to avoid cross-test contamination).
#[derive(Clone)]
pub struct Metrics {
    state: std::sync::Arc<Mutex<MetricsState>>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            state: std::sync::Arc::new(Mutex::new(MetricsState::default())),
        }
    }
}

impl Metrics {
    pub fn new() -> Self {
        Metrics::default()
    }

    /// The process-wide shared instance, lazily initialized once per process.
    pub fn global() -> Metrics {
        static GLOBAL: OnceLock<Metrics> = OnceLock::new();
        GLOBAL.get_or_init(Metrics::default).clone()
    }

    /// Record input/output/cached token counts for a completed provider call.
    /// `bot_id` of `None` records a global-only event (§4.7): it is folded into
    /// [`Self::get_total_tokens`] but never attributed to any per-bot query.
    pub fn record_tokens(
        &self,
        input_tokens: u64,
        output_tokens: u64,
        cached_tokens: u64,
        provider: &str,
        model: &str,
        bot_id: Option<&str>,
        timestamp: i64,
    ) {
        let mut state = self.state.lock().expect("metrics lock poisoned");
        state.token_events.push(TokenEvent {
            input: input_tokens,
            output: output_tokens,
            cached: cached_tokens,
            provider: provider.to_string(),
            model: model.to_string(),
            bot_id: bot_id.map(str::to_string),
            timestamp,
        });
    }

    /// Record a cost (in whatever currency unit the caller uses, typically USD)
    /// for a completed provider call. `bot_id` of `None` is global-only, as in
    /// [`Self::record_tokens`].
    pub fn record_cost(&self, cost: f64, provider: &str, model: &str, bot_id: Option<&str>, timestamp: i64) {
        let mut state = self.state.lock().expect("metrics lock poisoned");
        state.cost_events.push(CostEvent {
            cost,
            provider: provider.to_string(),
            model: model.to_string(),
            bot_id: bot_id.map(str::to_string),
            timestamp,
        });
    }

    /// Token totals across all bots, optionally only events strictly after `since`.
    pub fn get_total_tokens(&self, since: Option<i64>) -> TokenTotals {
        let state = self.state.lock().expect("metrics lock poisoned");
        Self::sum_tokens(state.token_events.iter().filter(|e| Self::after(since, e.timestamp)))
    }

    /// Token totals for one bot, optionally filtered to events strictly after
    /// `since`.
    pub fn get_bot_tokens(&self, bot_id: &str, since: Option<i64>) -> TokenTotals {
        let state = self.state.lock().expect("metrics lock poisoned");
        Self::sum_tokens(
            state
                .token_events
                .iter()
                .filter(|e| e.bot_id.as_deref() == Some(bot_id) && Self::after(since, e.timestamp)),
        )
    }

    /// Return this scope's current token totals, then clear those events so
    /// the next call starts a fresh accounting window (§4.7). `bot_id = None`
    /// clears every event (bot-tagged and global-only alike); `Some(id)`
    /// clears only that bot's events.
    pub fn get_and_clear_last_metrics(&self, bot_id: Option<&str>) -> TokenTotals {
        let mut state = self.state.lock().expect("metrics lock poisoned");
        match bot_id {
            Some(id) => {
                let totals = Self::sum_tokens(state.token_events.iter().filter(|e| e.bot_id.as_deref() == Some(id)));
                state.token_events.retain(|e| e.bot_id.as_deref() != Some(id));
                totals
            }
            None => {
                let totals = Self::sum_tokens(state.token_events.iter());
                state.token_events.clear();
                totals
            }
        }
    }

    /// Total cost across all bots, optionally only events strictly after `since`.
    pub fn get_total_cost(&self, since: Option<i64>) -> f64 {
        let state = self.state.lock().expect("metrics lock poisoned");
        state
            .cost_events
            .iter()
            .filter(|e| Self::after(since, e.timestamp))
            .map(|e| e.cost)
            .sum()
    }

    /// Total cost for one bot, optionally only events strictly after `since`.
    pub fn get_bot_cost(&self, bot_id: &str, since: Option<i64>) -> f64 {
        let state = self.state.lock().expect("metrics lock poisoned");
        state
            .cost_events
            .iter()
            .filter(|e| e.bot_id.as_deref() == Some(bot_id) && Self::after(since, e.timestamp))
            .map(|e| e.cost)
            .sum()
    }

    /// Token totals broken down per (provider, model).
    pub fn get_tokens_by_model(&self, bot_id: Option<&str>) -> HashMap<(String, String), TokenTotals> {
        let state = self.state.lock().expect("metrics lock poisoned");
        let mut out: HashMap<(String, String), TokenTotals> = HashMap::new();
        for e in &state.token_events {
            if bot_id.is_some_and(|id| Some(id) != e.bot_id.as_deref()) {
                continue;
            }
            let entry = out.entry((e.provider.clone(), e.model.clone())).or_default();
            entry.input += e.input;
            entry.output += e.output;
            entry.cached += e.cached;
            entry.total += e.input + e.output;
        }
        out
    }

    /// Every bot id that has ever recorded a token or cost event. Global-only
    /// (untagged) events never contribute an id here.
    pub fn get_all_bot_ids(&self) -> Vec<String> {
        let state = self.state.lock().expect("metrics lock poisoned");
        let mut ids: Vec<String> = state
            .token_events
            .iter()
            .filter_map(|e| e.bot_id.clone())
            .chain(state.cost_events.iter().filter_map(|e| e.bot_id.clone()))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Remove every event belonging to `bot_id`.
    pub fn clear_bot_metrics(&self, bot_id: &str) {
        let mut state = self.state.lock().expect("metrics lock poisoned");
        state.token_events.retain(|e| e.bot_id.as_deref() != Some(bot_id));
        state.cost_events.retain(|e| e.bot_id.as_deref() != Some(bot_id));
    }

    /// Drop every recorded event, process-wide. Intended for test isolation.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("metrics lock poisoned");
        state.token_events.clear();
        state.cost_events.clear();
    }

    fn after(since: Option<i64>, timestamp: i64) -> bool {
        since.is_none_or(|s| timestamp > s)
    }

    fn sum_tokens<'a>(events: impl Iterator<Item = &'a TokenEvent>) -> TokenTotals {
        let mut totals = TokenTotals::default();
        for e in events {
            totals.input += e.input;
            totals.output += e.output;
            totals.cached += e.cached;
            totals.total += e.input + e.output;
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_record_and_get_bot_tokens() {
        let metrics = Metrics::new();
        metrics.record_tokens(100, 50, 0, "anthropic", "claude-3-5-sonnet", Some("bot-1"), 1000);
        metrics.record_tokens(20, 10, 0, "anthropic", "claude-3-5-sonnet", Some("bot-1"), 1001);
        let totals = metrics.get_bot_tokens("bot-1", None);
        assert_eq!(totals.input, 120);
        assert_eq!(totals.output, 60);
        assert_eq!(totals.total, 180);
    }

    #[test]
    fn test_since_filter_is_strictly_greater_than() {
        let metrics = Metrics::new();
        metrics.record_tokens(10, 10, 0, "anthropic", "m", Some("bot-1"), 1000);
        metrics.record_tokens(10, 10, 0, "anthropic", "m", Some("bot-1"), 2000);
        let totals = metrics.get_bot_tokens("bot-1", Some(1000));
        assert_eq!(totals.total, 20); // only the ts=2000 event; ts=1000 is not included
    }

    #[test]
    fn test_cost_accumulates_and_total_matches_sum() {
        let metrics = Metrics::new();
        metrics.record_cost(0.01, "anthropic", "m", Some("bot-1"), 1000);
        metrics.record_cost(0.02, "anthropic", "m", Some("bot-1"), 1001);
        metrics.record_cost(0.5, "openai", "m2", Some("bot-2"), 1002);
        assert!((metrics.get_bot_cost("bot-1", None) - 0.03).abs() < 1e-9);
        assert!((metrics.get_total_cost(None) - 0.53).abs() < 1e-9);
    }

    #[test]
    fn test_clear_bot_metrics_is_scoped_to_one_bot() {
        let metrics = Metrics::new();
        metrics.record_tokens(5, 5, 0, "anthropic", "m", Some("bot-1"), 1000);
        metrics.record_tokens(5, 5, 0, "anthropic", "m", Some("bot-2"), 1000);
        metrics.clear_bot_metrics("bot-1");
        assert_eq!(metrics.get_bot_tokens("bot-1", None).total, 0);
        assert_eq!(metrics.get_bot_tokens("bot-2", None).total, 10);
    }

    #[test]
    fn test_concurrent_recording_does_not_cross_contaminate() {
        let metrics = Metrics::new();
        let bot_ids: Vec<String> = (0..5).map(|i| format!("bot-{i}")).collect();
        let handles: Vec<_> = bot_ids
            .iter()
            .cloned()
            .map(|bot_id| {
                let metrics = metrics.clone();
                thread::spawn(move || {
                    for i in 0..10 {
                        metrics.record_tokens(1, 1, 0, "anthropic", "m", Some(&bot_id), 1000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        for bot_id in &bot_ids {
            assert_eq!(metrics.get_bot_tokens(bot_id, None).total, 20);
        }
        assert_eq!(metrics.get_total_tokens(None).total, 100);
    }

    #[test]
    fn test_global_instance_is_shared_across_clones() {
        let a = Metrics::global();
        a.reset();
        a.record_tokens(1, 1, 0, "anthropic", "m", Some("shared-bot"), 1000);
        let b = Metrics::global();
        assert_eq!(b.get_bot_tokens("shared-bot", None).total, 2);
        let _keep_alive: Arc<()> = Arc::new(());
    }

    #[test]
    fn test_record_tokens_without_bot_id_is_global_only() {
        let metrics = Metrics::new();
        metrics.record_tokens(7, 3, 0, "anthropic", "m", None, 1000);
        assert_eq!(metrics.get_total_tokens(None).total, 10);
        assert!(metrics.get_all_bot_ids().is_empty());
    }

    #[test]
    fn test_cached_tokens_are_threaded_through_and_summed() {
        let metrics = Metrics::new();
        metrics.record_tokens(10, 5, 4, "anthropic", "m", Some("bot-1"), 1000);
        metrics.record_tokens(10, 5, 6, "anthropic", "m", Some("bot-1"), 1001);
        assert_eq!(metrics.get_bot_tokens("bot-1", None).cached, 10);
    }

    #[test]
    fn test_get_and_clear_last_metrics_resets_the_scope() {
        let metrics = Metrics::new();
        metrics.record_tokens(10, 10, 0, "anthropic", "m", Some("bot-1"), 1000);
        metrics.record_tokens(10, 10, 0, "anthropic", "m", Some("bot-2"), 1000);
        let cleared = metrics.get_and_clear_last_metrics(Some("bot-1"));
        assert_eq!(cleared.total, 20);
        assert_eq!(metrics.get_bot_tokens("bot-1", None).total, 0);
        assert_eq!(metrics.get_bot_tokens("bot-2", None).total, 20);

        let cleared_global = metrics.get_and_clear_last_metrics(None);
        assert_eq!(cleared_global.total, 20);
        assert_eq!(metrics.get_total_tokens(None).total, 0);
    }
}
