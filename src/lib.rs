//! # KaRL - Replicated Knowledge for Multi-Agent Processes
//!
//! KaRL is a shared knowledge store for cooperating agents, mutated through a
//! small expression language evaluated directly against live variables.
//!
//! ## Core Concepts
//!
//! - **Record**: A typed value with the logical clock and quality used to
//!   arbitrate concurrent updates
//! - **Context**: The thread-safe variable store, with modification tracking
//!   and change notification
//! - **CompiledExpression**: KaRL text parsed, bound to a context and pruned of
//!   constant subtrees
//! - **KnowledgeBase**: The facade tying a context to the transports that
//!   replicate it, including the blocking `wait` protocol
//!
//! ## Usage
//!
//! ```rust
//! use karl::{EvalSettings, KnowledgeBase, WaitSettings};
//!
//! let kb = KnowledgeBase::new();
//! kb.evaluate("agent.0.ready = 1 ;> round += 1", &EvalSettings::default())?;
//!
//! // returns at once: the predicate already holds
//! let ready = kb.wait("agent.0.ready && round == 1", &WaitSettings::default())?;
//! assert!(ready.is_true());
//! # Ok::<(), karl::KarlError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod context;
pub mod error;
pub mod expression;
pub mod knowledge_base;
pub mod record;
pub mod settings;

// Re-export primary types at crate root for convenience
pub use context::{
    ChangeEvent, ChangeKind, ChangeStream, Context, ContextGuard, ContextId, Function, NativeFunction,
    VariableReference,
};
pub use error::{CompileError, KarlError, KarlResult};
pub use expression::{CompiledExpression, Node, SystemCall, Visitor};
pub use knowledge_base::{ChannelTransport, KnowledgeBase, ModifiedBatch, Transport};
pub use record::{Record, RecordKind, RecordStatus, Value};
pub use settings::{
    EvalSettings, KnowledgeBaseConfig, KnowledgeReferenceSettings, KnowledgeUpdateSettings, RemoteStamp,
    WaitSettings,
};
