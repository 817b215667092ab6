//! The KaRL expression engine.
//!
//! Text is tokenized, parsed by precedence climbing into an owned [`Node`]
//! tree, bound to a context's variable slots, and pruned of constant
//! subtrees. The result is a [`CompiledExpression`] that evaluates directly
//! against a locked context.
//!
//! Evaluation never fails half way: runtime problems (undefined functions,
//! bad system call arguments, stale references) produce UNCREATED records
//! and the rest of the expression still runs, left to right.

mod compiled;
mod lexer;
mod node;
mod parser;
mod prune;
mod system_call;
mod visitor;

pub use compiled::CompiledExpression;
pub use node::{AssignOp, BinaryOp, Node, UnaryOp, VariableNode};
pub use system_call::SystemCall;
pub use visitor::{NodeCounter, SourcePrinter, VariableCollector, Visitor};

/// Returns true if `name` is a plain KaRL identifier (no `{…}` segments).
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut bytes = name.bytes();
    bytes
        .next()
        .is_some_and(|b| b.is_ascii_alphabetic() || b == b'_' || b == b'.')
        && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.')
}
