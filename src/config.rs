//! # Provider Configuration
//!
//! Small helpers for resolving a provider's base URL and default model, with
//! environment-variable overrides. This mirrors the original SDK's local-server
//! provider helpers, generalized from a fixed set of local servers to the open
//! vendor-string space the Bot snapshot format uses (§6 of the spec: `"anthropic"`,
//! `"openai"`, or any other string the host application recognizes).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// The LLM vendor a `Bot` talks to. Stored verbatim in snapshots (§6) as a plain
/// string; adapters are selected from this value by [`crate::mailbox`]'s factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    OpenAi,
    /// Any other OpenAI-compatible provider, identified by its snapshot string
    /// (e.g. a local server name like `"lmstudio"` or `"ollama"`).
    Other(String),
}

impl Serialize for Provider {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Provider {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Provider::parse(&s))
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Anthropic => write!(f, "anthropic"),
            Provider::OpenAi => write!(f, "openai"),
            Provider::Other(name) => write!(f, "{name}"),
        }
    }
}

impl Provider {
    /// Parse a provider string from a snapshot or user input.
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "anthropic" => Provider::Anthropic,
            "openai" => Provider::OpenAi,
            other => Provider::Other(other.to_string()),
        }
    }

    /// The environment variable consulted for this provider's base URL override.
    fn base_url_env_var(&self) -> String {
        format!("{}_BASE_URL", self.to_string().to_uppercase())
    }

    /// The environment variable consulted for this provider's default model override.
    fn model_env_var(&self) -> String {
        format!("{}_MODEL", self.to_string().to_uppercase())
    }

    /// Get the base URL for API requests.
    ///
    /// Priority: environment variable override > `fallback` parameter.
    pub fn get_base_url(&self, fallback: &str) -> String {
        std::env::var(self.base_url_env_var()).unwrap_or_else(|_| fallback.to_string())
    }

    /// Get the model name for requests.
    ///
    /// Priority: environment variable (if `prefer_env`) > `fallback` parameter.
    pub fn get_model(&self, fallback: &str, prefer_env: bool) -> String {
        if prefer_env {
            if let Ok(model) = std::env::var(self.model_env_var()) {
                return model;
            }
        }
        fallback.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_providers() {
        assert_eq!(Provider::parse("anthropic"), Provider::Anthropic);
        assert_eq!(Provider::parse("OpenAI"), Provider::OpenAi);
    }

    #[test]
    fn test_parse_unknown_provider_is_other() {
        assert_eq!(
            Provider::parse("lmstudio"),
            Provider::Other("lmstudio".to_string())
        );
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for p in [
            Provider::Anthropic,
            Provider::OpenAi,
            Provider::Other("ollama".to_string()),
        ] {
            let s = p.to_string();
            assert_eq!(Provider::parse(&s), p);
        }
    }

    #[test]
    fn test_base_url_fallback_without_env() {
        let p = Provider::Other("unittestprovider".to_string());
        assert_eq!(p.get_base_url("http://localhost:1234/v1"), "http://localhost:1234/v1");
    }

    #[test]
    fn test_model_fallback_without_prefer_env() {
        let p = Provider::Anthropic;
        assert_eq!(p.get_model("claude-3-5-sonnet-latest", false), "claude-3-5-sonnet-latest");
    }
}
