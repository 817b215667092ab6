//! Error types for KaRL.
//!
//! Only two failure classes are hard-reported to callers: malformed expression
//! text ([`CompileError`]) and misuse of a [`VariableReference`] against the wrong
//! or a cleared context. Everything that goes wrong *while evaluating* an
//! expression is absorbed into an UNCREATED record and logged instead, so a
//! long-running agent never dies from one bad expression.
//!
//! [`VariableReference`]: crate::context::VariableReference

use thiserror::Error;

/// A malformed KaRL expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Compile error at offset {position}: {message}")]
pub struct CompileError {
    /// Human readable description of what the parser expected.
    pub message: String,
    /// Byte offset of the offending token in the source text.
    pub position: usize,
}

impl CompileError {
    /// Creates a compile error at `position`.
    #[must_use]
    pub fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

/// Top-level error type for KaRL.
#[derive(Debug, Error)]
pub enum KarlError {
    /// Expression text failed to compile.
    #[error("{0}")]
    Compile(#[from] CompileError),

    /// A reference was used against a context that does not own it.
    #[error("Invalid reference to '{name}': {reason}")]
    InvalidReference {
        /// Variable the reference names.
        name: String,
        /// Why the reference was rejected.
        reason: String,
    },

    /// An array write past the configured maximum size.
    #[error("Index {index} of '{name}' exceeds the array limit of {limit}")]
    IndexOutOfRange {
        /// Variable being written.
        name: String,
        /// Requested element index.
        index: usize,
        /// Largest array length the context accepts.
        limit: usize,
    },

    /// A transport could not deliver or receive a batch.
    #[error("Transport '{transport}' failed: {message}")]
    Transport {
        /// Transport identifier.
        transport: String,
        /// Failure detail.
        message: String,
    },

    /// Settings or configuration could not be parsed.
    #[error("Config error: {message}")]
    Config {
        /// Parser detail.
        message: String,
    },

    /// An invariant of the store was violated.
    #[error("Internal error: {message}")]
    Internal {
        /// Failure detail.
        message: String,
    },
}

impl KarlError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an invalid reference error.
    #[must_use]
    pub fn invalid_reference(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this is a compile error.
    #[must_use]
    pub const fn is_compile(&self) -> bool {
        matches!(self, Self::Compile(_))
    }

    /// Returns true if this is an invalid reference error.
    #[must_use]
    pub const fn is_invalid_reference(&self) -> bool {
        matches!(self, Self::InvalidReference { .. })
    }

    /// Returns true if an array write was refused for its size.
    #[must_use]
    pub const fn is_index_out_of_range(&self) -> bool {
        matches!(self, Self::IndexOutOfRange { .. })
    }

    /// Returns true if this is a transport error.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Returns the compile error position, if this is a compile error.
    #[must_use]
    pub const fn position(&self) -> Option<usize> {
        match self {
            Self::Compile(err) => Some(err.position),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for KarlError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config {
            message: err.to_string(),
        }
    }
}

/// Result type alias for KaRL operations.
pub type KarlResult<T> = Result<T, KarlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_display() {
        let err = CompileError::new("expected ')'", 7);
        let msg = format!("{err}");
        assert!(msg.contains("offset 7"));
        assert!(msg.contains("expected ')'"));
    }

    #[test]
    fn test_karl_error_from_compile() {
        let err: KarlError = CompileError::new("unexpected token", 3).into();
        assert!(err.is_compile());
        assert!(!err.is_invalid_reference());
        assert_eq!(err.position(), Some(3));
    }

    #[test]
    fn test_invalid_reference() {
        let err = KarlError::invalid_reference("x", "variable was deleted");
        assert!(err.is_invalid_reference());
        assert_eq!(err.position(), None);
        let msg = format!("{err}");
        assert!(msg.contains("'x'"));
        assert!(msg.contains("deleted"));
    }

    #[test]
    fn test_transport_error() {
        let err = KarlError::Transport {
            transport: "udp".to_string(),
            message: "refused".to_string(),
        };
        assert!(err.is_transport());
        assert!(format!("{err}").contains("refused"));
    }

    #[test]
    fn test_config_error_from_json() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: KarlError = json_err.into();
        assert!(err.is_config());
    }

    #[test]
    fn test_internal() {
        let err = KarlError::internal("unexpected state");
        assert!(format!("{err}").contains("unexpected state"));
    }
}
