//! Error types for the prep pipeline.
//!
//! Errors are classified by how the pipeline reacts to them:
//! - Degradable: an external service failed or timed out; drop to the next tier
//! - Input: the meeting or tool arguments were unusable; synthesize defaults
//! - Internal: local store or tool-loop failures; logged, never surfaced

use thiserror::Error;

use crate::db::DbError;

/// Error types for resolution, aggregation and generation.
#[derive(Debug, Error)]
pub enum PrepError {
    // Degradable errors
    #[error("{service} unavailable: {message}")]
    ServiceUnavailable {
        service: &'static str,
        message: String,
    },

    #[error("{service} call timed out after {secs} seconds")]
    Timeout { service: &'static str, secs: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    // Input errors
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Invalid arguments for tool '{tool}': {message}")]
    InvalidToolArguments { tool: String, message: String },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    // Internal errors
    #[error("Generation still requested tools after {0} rounds")]
    ToolLoopExhausted(usize),

    #[error("Store error: {0}")]
    Store(#[from] DbError),
}

impl PrepError {
    /// Shorthand for a collaborator that could not be reached.
    pub fn unavailable(service: &'static str, message: impl Into<String>) -> Self {
        PrepError::ServiceUnavailable {
            service,
            message: message.into(),
        }
    }

    /// Returns true if the pipeline should fall to a lower tier rather than
    /// treat the failure as a bug.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            PrepError::ServiceUnavailable { .. }
                | PrepError::Timeout { .. }
                | PrepError::NotFound(_)
                | PrepError::ToolLoopExhausted(_)
        )
    }

    /// Stable label used in logs and match details.
    pub fn kind(&self) -> &'static str {
        match self {
            PrepError::ServiceUnavailable { .. } => "external_service_unavailable",
            PrepError::Timeout { .. } => "timeout",
            PrepError::NotFound(_) => "not_found",
            PrepError::MalformedInput(_) => "malformed_input",
            PrepError::InvalidToolArguments { .. } => "invalid_tool_arguments",
            PrepError::UnknownTool(_) => "unknown_tool",
            PrepError::ToolLoopExhausted(_) => "tool_loop_exhausted",
            PrepError::Store(_) => "store",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degradable_classification() {
        assert!(PrepError::unavailable("calendar", "down").is_degradable());
        assert!(PrepError::Timeout {
            service: "generation",
            secs: 60
        }
        .is_degradable());
        assert!(!PrepError::MalformedInput("bad".into()).is_degradable());
        assert!(!PrepError::UnknownTool("nope".into()).is_degradable());
    }

    #[test]
    fn test_display_messages() {
        let err = PrepError::Timeout {
            service: "crm",
            secs: 15,
        };
        assert_eq!(err.to_string(), "crm call timed out after 15 seconds");
        assert_eq!(err.kind(), "timeout");
    }
}
