//! # Error Types
//!
//! This module defines all error types used throughout the crate, following the
//! taxonomy of failure *kinds* (not type names) laid out for the core:
//!
//! - **User-input error**: bad arguments to a public API, raised immediately.
//! - **Provider transient/terminal error**: surfaced from the mailbox after retry.
//! - **Tool execution error**: never raised here — it is captured at the tool
//!   boundary and turned into an `error`-status `ToolResult` string (see
//!   [`crate::tools`]). Only registration-time tool failures surface as `Error::Tool`.
//! - **Pairing violation**: refused at save/load time.
//! - **Snapshot error**: invalid JSON, unknown required field, or a refused load.
//!
//! ## Usage
//!
//! ```
//! use agent_tree::{Error, Result};
//!
//! fn example() -> Result<()> {
//!     if false {
//!         return Err(Error::config("Invalid model name"));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Type alias for `Result<T, Error>` used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type covering all failure modes in the crate.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request to the provider failed (network, TLS, non-2xx).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration provided when building `AgentOptions` or a `Bot`.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The provider's API returned an error response (request succeeded at the
    /// transport level, but the server rejected it).
    #[error("API error: {0}")]
    Api(String),

    /// Tool registration or lookup failed. Execution-time tool failures never
    /// reach this variant — they are captured at the tool boundary instead.
    #[error("Tool error: {0}")]
    Tool(String),

    /// A tool_call/tool_result pairing invariant was violated. Snapshots are
    /// refused rather than silently repaired when this is detected at save/load.
    #[error("Pairing violation: {0}")]
    Pairing(String),

    /// A snapshot was malformed: invalid JSON shape, missing a required field,
    /// or an invalid provider/model combination.
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Invalid input provided by the caller (e.g. empty `self_prompts`).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The mailbox exhausted its retry budget on a transient error.
    #[error("Request timeout")]
    Timeout,

    /// Miscellaneous error that doesn't fit the other categories.
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new configuration error with a descriptive message.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new API error with the server's error message.
    pub fn api(msg: impl Into<String>) -> Self {
        Error::Api(msg.into())
    }

    /// Create a new tool registration/lookup error.
    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    /// Create a new pairing-violation error.
    pub fn pairing(msg: impl Into<String>) -> Self {
        Error::Pairing(msg.into())
    }

    /// Create a new snapshot error.
    pub fn snapshot(msg: impl Into<String>) -> Self {
        Error::Snapshot(msg.into())
    }

    /// Create a new invalid-input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a new miscellaneous error.
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Create a timeout error.
    pub fn timeout() -> Self {
        Error::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_config() {
        let err = Error::config("Invalid model");
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.to_string(), "Invalid configuration: Invalid model");
    }

    #[test]
    fn test_error_api() {
        let err = Error::api("500 Internal Server Error");
        assert!(matches!(err, Error::Api(_)));
        assert_eq!(err.to_string(), "API error: 500 Internal Server Error");
    }

    #[test]
    fn test_error_tool() {
        let err = Error::tool("Tool not found");
        assert!(matches!(err, Error::Tool(_)));
        assert_eq!(err.to_string(), "Tool error: Tool not found");
    }

    #[test]
    fn test_error_pairing() {
        let err = Error::pairing("tool_call t1 has no matching result");
        assert!(matches!(err, Error::Pairing(_)));
        assert_eq!(
            err.to_string(),
            "Pairing violation: tool_call t1 has no matching result"
        );
    }

    #[test]
    fn test_error_snapshot() {
        let err = Error::snapshot("missing field: conversation");
        assert!(matches!(err, Error::Snapshot(_)));
    }

    #[test]
    fn test_error_invalid_input() {
        let err = Error::invalid_input("Missing parameter");
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(err.to_string(), "Invalid input: Missing parameter");
    }

    #[test]
    fn test_error_timeout() {
        let err = Error::timeout();
        assert!(matches!(err, Error::Timeout));
        assert_eq!(err.to_string(), "Request timeout");
    }

    #[test]
    fn test_error_other() {
        let err = Error::other("Something went wrong");
        assert!(matches!(err, Error::Other(_)));
        assert_eq!(err.to_string(), "Error: Something went wrong");
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn _returns_result() -> Result<i32> {
            Ok(42)
        }

        fn _returns_error() -> Result<i32> {
            Err(Error::timeout())
        }
    }
}
