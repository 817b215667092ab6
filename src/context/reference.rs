//! Resolved handles to variable slots.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a context instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Create a new random context id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A resolved handle to one variable slot of one context.
///
/// References are cheap to clone and skip the name lookup on every access.
/// They are bound to the context that issued them: using one against another
/// context, or after the variable was deleted or the context erased, is
/// reported as [`KarlError::InvalidReference`](crate::KarlError::InvalidReference).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariableReference {
    pub(crate) context: ContextId,
    pub(crate) slot: usize,
    pub(crate) generation: u64,
    pub(crate) name: Arc<str>,
}

impl VariableReference {
    /// The variable name this reference resolves.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The context that issued this reference.
    #[must_use]
    pub const fn context_id(&self) -> ContextId {
        self.context
    }

    /// Returns true for `.`-prefixed names, which never propagate by default.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.name.starts_with('.')
    }
}

impl fmt::Display for VariableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_id_unique() {
        assert_ne!(ContextId::new(), ContextId::new());
    }

    #[test]
    fn test_reference_locality() {
        let reference = VariableReference {
            context: ContextId::new(),
            slot: 0,
            generation: 0,
            name: Arc::from(".tmp"),
        };
        assert!(reference.is_local());
        assert_eq!(reference.to_string(), ".tmp");
    }
}
