//! # Tracing
//!
//! Span emission around a bot's respond loop, provider calls, and tool execution
//! (§4.8), supplemented from `tests/test_observability/test_bot_tracing_unit.py` in
//! the original source: tracing is opt-in per bot, globally disable-able via an
//! environment variable, and never changes control flow when disabled or when the
//! environment has no subscriber installed — emitting a span with nobody listening
//! is a no-op.

use tracing::{Span, field};

/// Honored the same way the original source honors `OTEL_SDK_DISABLED`: if set to
/// a truthy value, tracing is suppressed regardless of a bot's own
/// `enable_tracing` setting.
const DISABLE_ENV_VAR: &str = "OTEL_SDK_DISABLED";

/// Whether tracing should be active for a bot that requested it with
/// `enable_tracing`.
pub fn tracing_active(bot_requested: bool) -> bool {
    if !bot_requested {
        return false;
    }
    !std::env::var(DISABLE_ENV_VAR)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// Open a span for one `bot.respond` call. A no-op span (disabled) costs nothing
/// once entered and exited — callers can always create one and `.enter()` it
/// unconditionally.
pub fn respond_span(bot_id: &str, active: bool) -> Span {
    if active {
        tracing::info_span!("bot.respond", bot_id = %bot_id, turns = field::Empty, tool_calls = field::Empty)
    } else {
        Span::none()
    }
}

/// Open a span for a single tool invocation.
pub fn tool_span(tool_name: &str, active: bool) -> Span {
    if active {
        tracing::info_span!("bot.tool", tool = %tool_name, status = field::Empty)
    } else {
        Span::none()
    }
}

/// Open a span for one provider round-trip.
pub fn provider_span(provider: &str, model: &str, active: bool) -> Span {
    if active {
        tracing::info_span!("bot.provider_call", provider = %provider, model = %model, attempt = field::Empty)
    } else {
        Span::none()
    }
}

/// Install a process-wide `tracing_subscriber` that writes to stderr, honoring
/// `RUST_LOG`. Intended for host applications (and integration tests) that want
/// visible spans; the crate itself never installs a subscriber implicitly.
pub fn init_default_subscriber() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_inactive_when_bot_did_not_request_it() {
        assert!(!tracing_active(false));
    }

    #[test]
    fn test_tracing_active_when_requested_and_env_unset() {
        std::env::remove_var(DISABLE_ENV_VAR);
        assert!(tracing_active(true));
    }

    #[test]
    fn test_tracing_disabled_by_env_var_even_if_requested() {
        std::env::set_var(DISABLE_ENV_VAR, "true");
        assert!(!tracing_active(true));
        std::env::remove_var(DISABLE_ENV_VAR);
    }

    #[test]
    fn test_respond_span_disabled_is_none_span() {
        let span = respond_span("bot-1", false);
        assert!(span.is_none());
    }
}
