//! Read-only traversal of expression trees.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::record::Record;

use super::node::{AssignOp, BinaryOp, Node, UnaryOp, VariableNode};
use super::system_call::SystemCall;

/// A read-only walk over a [`Node`] tree.
///
/// [`Node::accept`] calls [`Visitor::enter`] for every node and then the
/// method for the node's kind. The default methods visit children left to
/// right, so a visitor only overrides the kinds it cares about.
pub trait Visitor {
    /// Called for every node before its kind-specific method.
    fn enter(&mut self, _node: &Node) {}

    /// A constant.
    fn visit_leaf(&mut self, _record: &Record) {}

    /// A variable read or assignment target.
    fn visit_variable(&mut self, _variable: &VariableNode) {}

    /// `variable[index]`.
    fn visit_index(&mut self, variable: &VariableNode, index: &Node) {
        self.visit_variable(variable);
        index.accept(self);
    }

    /// A prefix operator.
    fn visit_unary(&mut self, _op: UnaryOp, operand: &Node) {
        operand.accept(self);
    }

    /// An infix operator.
    fn visit_binary(&mut self, _op: BinaryOp, left: &Node, right: &Node) {
        left.accept(self);
        right.accept(self);
    }

    /// An assignment; `target` is visited before `value`.
    fn visit_assign(&mut self, _op: AssignOp, target: &Node, value: &Node) {
        target.accept(self);
        value.accept(self);
    }

    /// A `#name(...)` call.
    fn visit_system_call(&mut self, _call: SystemCall, args: &[Node]) {
        for arg in args {
            arg.accept(self);
        }
    }

    /// A call of a registered function.
    fn visit_function_call(&mut self, _name: &str, args: &[Node]) {
        for arg in args {
            arg.accept(self);
        }
    }
}

/// Counts nodes.
#[derive(Debug, Default)]
pub struct NodeCounter {
    /// Nodes visited so far.
    pub count: usize,
}

impl Visitor for NodeCounter {
    fn enter(&mut self, _node: &Node) {
        self.count += 1;
    }
}

/// Renders a tree back to KaRL text. Binary operations and assignments are
/// fully parenthesized, so the output parses back to the same tree.
#[derive(Debug, Default)]
pub struct SourcePrinter {
    out: String,
}

impl SourcePrinter {
    /// Returns the rendered text.
    #[must_use]
    pub fn finish(self) -> String {
        self.out
    }

    fn list(&mut self, args: &[Node]) {
        self.out.push('(');
        for (idx, arg) in args.iter().enumerate() {
            if idx > 0 {
                self.out.push_str(", ");
            }
            arg.accept(self);
        }
        self.out.push(')');
    }
}

impl Visitor for SourcePrinter {
    fn visit_leaf(&mut self, record: &Record) {
        self.out.push_str(&record.to_karl_source());
    }

    fn visit_variable(&mut self, variable: &VariableNode) {
        self.out.push_str(variable.name());
    }

    fn visit_index(&mut self, variable: &VariableNode, index: &Node) {
        self.out.push_str(variable.name());
        self.out.push('[');
        index.accept(self);
        self.out.push(']');
    }

    fn visit_unary(&mut self, op: UnaryOp, operand: &Node) {
        self.out.push_str(op.symbol());
        if op == UnaryOp::Negate {
            self.out.push('(');
            operand.accept(self);
            self.out.push(')');
        } else {
            operand.accept(self);
        }
    }

    fn visit_binary(&mut self, op: BinaryOp, left: &Node, right: &Node) {
        self.out.push('(');
        left.accept(self);
        let _ = write!(self.out, " {} ", op.symbol());
        right.accept(self);
        self.out.push(')');
    }

    fn visit_assign(&mut self, op: AssignOp, target: &Node, value: &Node) {
        self.out.push('(');
        target.accept(self);
        let _ = write!(self.out, " {} ", op.symbol());
        value.accept(self);
        self.out.push(')');
    }

    fn visit_system_call(&mut self, call: SystemCall, args: &[Node]) {
        self.out.push('#');
        self.out.push_str(call.name());
        self.list(args);
    }

    fn visit_function_call(&mut self, name: &str, args: &[Node]) {
        self.out.push_str(name);
        self.list(args);
    }
}

/// Collects the names an expression reads and writes.
#[derive(Debug, Default)]
pub struct VariableCollector {
    /// Variables read.
    pub reads: BTreeSet<String>,
    /// Variables assigned.
    pub writes: BTreeSet<String>,
    /// Functions called.
    pub functions: BTreeSet<String>,
}

impl VariableCollector {
    fn target(&mut self, target: &Node, read_too: bool) {
        match target {
            Node::Variable(variable) => {
                self.writes.insert(variable.name().to_string());
                if read_too {
                    self.reads.insert(variable.name().to_string());
                }
            }
            Node::Index { variable, index } => {
                self.writes.insert(variable.name().to_string());
                if read_too {
                    self.reads.insert(variable.name().to_string());
                }
                index.accept(self);
            }
            other => other.accept(self),
        }
    }
}

impl Visitor for VariableCollector {
    fn visit_variable(&mut self, variable: &VariableNode) {
        self.reads.insert(variable.name().to_string());
    }

    fn visit_unary(&mut self, op: UnaryOp, operand: &Node) {
        match op {
            UnaryOp::Increment | UnaryOp::Decrement => self.target(operand, true),
            UnaryOp::Negate | UnaryOp::Not => operand.accept(self),
        }
    }

    fn visit_assign(&mut self, op: AssignOp, target: &Node, value: &Node) {
        self.target(target, op != AssignOp::Assign);
        value.accept(self);
    }

    fn visit_function_call(&mut self, name: &str, args: &[Node]) {
        self.functions.insert(name.to_string());
        for arg in args {
            arg.accept(self);
        }
    }
}
