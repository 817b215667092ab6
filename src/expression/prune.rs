//! Constant folding.
//!
//! `prune` returns the node's value together with `can_change`. A subtree
//! that cannot change (no variables, assignments, function calls or impure
//! system calls below it) is replaced by a leaf holding its value.

use crate::context::ContextGuard;
use crate::record::Record;
use crate::settings::KnowledgeUpdateSettings;

use super::node::{BinaryOp, Node, UnaryOp};

impl Node {
    /// Folds constant subtrees and reports whether this node can change
    /// between evaluations. Variables report their current value.
    pub fn prune(&mut self, ctx: &mut ContextGuard<'_>) -> (Record, bool) {
        let can_change = match self {
            Self::Leaf(record) => return (record.clone(), false),
            Self::Variable(variable) => return (variable.read(ctx), true),
            Self::Index { index, .. } => {
                prune_child(index, ctx);
                true
            }
            Self::Unary { op, operand } => {
                let operand_changes = prune_child(operand, ctx);
                matches!(op, UnaryOp::Increment | UnaryOp::Decrement) || operand_changes
            }
            Self::Binary { op, left, right } => {
                let (left_value, left_changes) = left.prune(ctx);
                if !left_changes {
                    fold(left, left_value.clone());
                }
                let right_changes = prune_child(right, ctx);
                if !left_changes {
                    let short_circuit = match op {
                        BinaryOp::And | BinaryOp::Implies if left_value.is_false() => Some(0),
                        BinaryOp::Or if left_value.is_true() => Some(1),
                        _ => None,
                    };
                    if let Some(result) = short_circuit {
                        return (Record::integer(result), false);
                    }
                }
                left_changes || right_changes
            }
            Self::Assign { target, value, .. } => {
                if let Self::Index { index, .. } = target.as_mut() {
                    prune_child(index, ctx);
                }
                prune_child(value, ctx);
                true
            }
            Self::SystemCall { call, args } => {
                let mut changes = !call.is_pure();
                for arg in args.iter_mut() {
                    changes |= prune_arg(arg, ctx);
                }
                changes
            }
            Self::FunctionCall { args, .. } => {
                for arg in args.iter_mut() {
                    prune_arg(arg, ctx);
                }
                true
            }
        };

        if can_change {
            (Record::default(), true)
        } else {
            (self.evaluate(ctx, &KnowledgeUpdateSettings::default()), false)
        }
    }
}

fn fold(node: &mut Node, value: Record) {
    if !matches!(node, Node::Leaf(_)) {
        *node = Node::Leaf(value);
    }
}

fn prune_arg(node: &mut Node, ctx: &mut ContextGuard<'_>) -> bool {
    let (value, can_change) = node.prune(ctx);
    if !can_change {
        fold(node, value);
    }
    can_change
}

fn prune_child(node: &mut Box<Node>, ctx: &mut ContextGuard<'_>) -> bool {
    prune_arg(node.as_mut(), ctx)
}
