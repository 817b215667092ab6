//! KaRL syntax tree and its evaluation.

use std::cmp::Ordering;

use tracing::{debug, warn};

use crate::context::{ContextGuard, VariableReference};
use crate::record::{Record, RecordKind};
use crate::settings::KnowledgeUpdateSettings;

use super::system_call::SystemCall;
use super::visitor::Visitor;

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `-x`
    Negate,
    /// `!x`
    Not,
    /// `++x`: adds one to the variable and yields the new value.
    Increment,
    /// `--x`
    Decrement,
}

impl UnaryOp {
    /// Operator text as written in KaRL.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Negate => "-",
            Self::Not => "!",
            Self::Increment => "++",
            Self::Decrement => "--",
        }
    }
}

/// Infix operators other than assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`; integer division by zero yields 0.
    Divide,
    /// `%`
    Modulus,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    Less,
    /// `<=`
    LessOrEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterOrEqual,
    /// `&&`, short-circuiting.
    And,
    /// `||`, short-circuiting.
    Or,
    /// `a => b`: evaluates `b` only when `a` is true.
    Implies,
    /// `a ;> b`: evaluates both, yields `b`.
    Sequence,
    /// `a ; b`: evaluates both, yields the greater.
    Both,
}

impl BinaryOp {
    /// Operator text as written in KaRL.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulus => "%",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::And => "&&",
            Self::Or => "||",
            Self::Implies => "=>",
            Self::Sequence => ";>",
            Self::Both => ";",
        }
    }
}

/// Assignment operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignOp {
    /// `=`
    Assign,
    /// `+=`; concatenates when the target holds text.
    Add,
    /// `-=`
    Subtract,
    /// `*=`
    Multiply,
    /// `/=`
    Divide,
}

impl AssignOp {
    /// Operator text as written in KaRL.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Assign => "=",
            Self::Add => "+=",
            Self::Subtract => "-=",
            Self::Multiply => "*=",
            Self::Divide => "/=",
        }
    }
}

/// A variable occurrence in an expression.
///
/// Plain names are bound to a [`VariableReference`] when the expression is
/// compiled. Names containing `{…}` are expanded on every evaluation and
/// looked up by name.
#[derive(Debug, Clone)]
pub struct VariableNode {
    name: String,
    reference: Option<VariableReference>,
}

impl VariableNode {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            reference: None,
        }
    }

    /// The name as written in the source.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true when the name contains `{…}` segments.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.name.contains('{')
    }

    fn bind(&mut self, ctx: &mut ContextGuard<'_>) {
        if !self.is_dynamic() {
            self.reference = Some(ctx.get_ref(&self.name));
        }
    }

    fn resolve(&self, ctx: &mut ContextGuard<'_>) -> VariableReference {
        match &self.reference {
            Some(reference) => ctx.refresh(reference),
            None => {
                let name = ctx.expand_statement(&self.name);
                ctx.get_ref(&name)
            }
        }
    }

    pub(crate) fn read(&self, ctx: &mut ContextGuard<'_>) -> Record {
        let reference = self.resolve(ctx);
        ctx.get_by_ref(&reference).unwrap_or_default()
    }

    fn write(&self, value: Record, ctx: &mut ContextGuard<'_>, settings: &KnowledgeUpdateSettings) -> Record {
        let reference = self.resolve(ctx);
        match ctx.set_by_ref(&reference, value.clone(), settings) {
            Ok(()) => value,
            Err(err) => {
                warn!(variable = %self.name, error = %err, "assignment dropped");
                Record::default()
            }
        }
    }
}

/// A node of a compiled KaRL expression.
///
/// Every composite node owns its children.
#[derive(Debug, Clone)]
pub enum Node {
    /// A constant, including folded subtrees.
    Leaf(Record),
    /// A variable read.
    Variable(VariableNode),
    /// `var[index]`
    Index {
        /// The array variable.
        variable: VariableNode,
        /// Element index expression.
        index: Box<Node>,
    },
    /// A prefix operator.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Node>,
    },
    /// An infix operator.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Node>,
        /// Right operand.
        right: Box<Node>,
    },
    /// `target op value`; `target` is a `Variable` or `Index` node.
    Assign {
        /// Operator.
        op: AssignOp,
        /// Place written.
        target: Box<Node>,
        /// Value expression, evaluated before `target`'s index.
        value: Box<Node>,
    },
    /// `#name(args)`
    SystemCall {
        /// Which built-in.
        call: SystemCall,
        /// Arguments in call order.
        args: Vec<Node>,
    },
    /// Call of a function registered on the context.
    FunctionCall {
        /// Function name, looked up at call time.
        name: String,
        /// Arguments in call order.
        args: Vec<Node>,
    },
}

impl Node {
    /// Returns true for nodes that can be assigned to.
    #[must_use]
    pub fn is_lvalue(&self) -> bool {
        matches!(self, Self::Variable(_) | Self::Index { .. })
    }

    /// Walks the tree with `visitor`.
    pub fn accept<V: Visitor + ?Sized>(&self, visitor: &mut V) {
        visitor.enter(self);
        match self {
            Self::Leaf(record) => visitor.visit_leaf(record),
            Self::Variable(variable) => visitor.visit_variable(variable),
            Self::Index { variable, index } => visitor.visit_index(variable, index),
            Self::Unary { op, operand } => visitor.visit_unary(*op, operand),
            Self::Binary { op, left, right } => visitor.visit_binary(*op, left, right),
            Self::Assign { op, target, value } => visitor.visit_assign(*op, target, value),
            Self::SystemCall { call, args } => visitor.visit_system_call(*call, args),
            Self::FunctionCall { name, args } => visitor.visit_function_call(name, args),
        }
    }

    /// Binds every plain variable name to a reference in `ctx`.
    pub(crate) fn bind(&mut self, ctx: &mut ContextGuard<'_>) {
        match self {
            Self::Leaf(_) => {}
            Self::Variable(variable) => variable.bind(ctx),
            Self::Index { variable, index } => {
                variable.bind(ctx);
                index.bind(ctx);
            }
            Self::Unary { operand, .. } => operand.bind(ctx),
            Self::Binary { left, right, .. } => {
                left.bind(ctx);
                right.bind(ctx);
            }
            Self::Assign { target, value, .. } => {
                target.bind(ctx);
                value.bind(ctx);
            }
            Self::SystemCall { args, .. } | Self::FunctionCall { args, .. } => {
                for arg in args {
                    arg.bind(ctx);
                }
            }
        }
    }

    /// Evaluates the node against a locked context.
    ///
    /// Operands are evaluated left to right. Failures such as undefined
    /// functions yield an UNCREATED record and evaluation continues.
    pub fn evaluate(&self, ctx: &mut ContextGuard<'_>, settings: &KnowledgeUpdateSettings) -> Record {
        match self {
            Self::Leaf(record) => record.clone(),
            Self::Variable(variable) => variable.read(ctx),
            Self::Index { variable, index } => {
                let index = index.evaluate(ctx, settings);
                let array = variable.read(ctx);
                usize::try_from(index.to_integer())
                    .map_or_else(|_| Record::default(), |i| array.retrieve_index(i))
            }
            Self::Unary { op, operand } => match op {
                UnaryOp::Negate => -&operand.evaluate(ctx, settings),
                UnaryOp::Not => Record::from_bool(operand.evaluate(ctx, settings).is_false()),
                UnaryOp::Increment => step(operand, 1, ctx, settings),
                UnaryOp::Decrement => step(operand, -1, ctx, settings),
            },
            Self::Binary { op, left, right } => binary(*op, left, right, ctx, settings),
            Self::Assign { op, target, value } => {
                let value = value.evaluate(ctx, settings);
                let place = Place::locate(target, ctx, settings);
                let result = match op {
                    AssignOp::Assign => value,
                    compound => {
                        let current = place.load(ctx, settings);
                        match compound {
                            AssignOp::Add if current.kind() == RecordKind::String => current.concat(&value),
                            AssignOp::Add => &current + &value,
                            AssignOp::Subtract => &current - &value,
                            AssignOp::Multiply => &current * &value,
                            AssignOp::Divide => &current / &value,
                            AssignOp::Assign => value,
                        }
                    }
                };
                place.store(result, ctx, settings)
            }
            Self::SystemCall { call, args } => {
                let args: Vec<Record> = args.iter().map(|arg| arg.evaluate(ctx, settings)).collect();
                call.evaluate(&args, ctx, settings)
            }
            Self::FunctionCall { name, args } => {
                let args: Vec<Record> = args.iter().map(|arg| arg.evaluate(ctx, settings)).collect();
                ctx.call_function(name, &args, settings)
            }
        }
    }
}

fn binary(
    op: BinaryOp,
    left: &Node,
    right: &Node,
    ctx: &mut ContextGuard<'_>,
    settings: &KnowledgeUpdateSettings,
) -> Record {
    let lhs = left.evaluate(ctx, settings);
    match op {
        BinaryOp::And => {
            Record::from_bool(lhs.is_true() && right.evaluate(ctx, settings).is_true())
        }
        BinaryOp::Or => Record::from_bool(lhs.is_true() || right.evaluate(ctx, settings).is_true()),
        BinaryOp::Implies => {
            if lhs.is_true() {
                right.evaluate(ctx, settings)
            } else {
                Record::integer(0)
            }
        }
        BinaryOp::Sequence => right.evaluate(ctx, settings),
        BinaryOp::Both => {
            let rhs = right.evaluate(ctx, settings);
            if lhs.compare(&rhs) == Some(Ordering::Greater) {
                lhs
            } else {
                rhs
            }
        }
        arithmetic_or_comparison => {
            let rhs = right.evaluate(ctx, settings);
            let order = lhs.compare(&rhs);
            match arithmetic_or_comparison {
                BinaryOp::Add => &lhs + &rhs,
                BinaryOp::Subtract => &lhs - &rhs,
                BinaryOp::Multiply => &lhs * &rhs,
                BinaryOp::Divide => &lhs / &rhs,
                BinaryOp::Modulus => &lhs % &rhs,
                BinaryOp::Equal => Record::from_bool(order == Some(Ordering::Equal)),
                BinaryOp::NotEqual => Record::from_bool(order != Some(Ordering::Equal)),
                BinaryOp::Less => Record::from_bool(order == Some(Ordering::Less)),
                BinaryOp::LessOrEqual => {
                    Record::from_bool(matches!(order, Some(Ordering::Less | Ordering::Equal)))
                }
                BinaryOp::Greater => Record::from_bool(order == Some(Ordering::Greater)),
                BinaryOp::GreaterOrEqual => {
                    Record::from_bool(matches!(order, Some(Ordering::Greater | Ordering::Equal)))
                }
                BinaryOp::And | BinaryOp::Or | BinaryOp::Implies | BinaryOp::Sequence | BinaryOp::Both => {
                    Record::default()
                }
            }
        }
    }
}

fn step(target: &Node, delta: i64, ctx: &mut ContextGuard<'_>, settings: &KnowledgeUpdateSettings) -> Record {
    let place = Place::locate(target, ctx, settings);
    let current = place.load(ctx, settings);
    place.store(&current + &Record::integer(delta), ctx, settings)
}

/// An assignment target whose index, if any, has been evaluated exactly once.
enum Place<'n> {
    Variable(&'n VariableNode),
    /// `None` when the index was negative.
    Element(&'n VariableNode, Option<usize>),
    Other(&'n Node),
}

impl<'n> Place<'n> {
    fn locate(target: &'n Node, ctx: &mut ContextGuard<'_>, settings: &KnowledgeUpdateSettings) -> Self {
        match target {
            Node::Variable(variable) => Self::Variable(variable),
            Node::Index { variable, index } => {
                let index = index.evaluate(ctx, settings).to_integer();
                Self::Element(variable, usize::try_from(index).ok())
            }
            other => Self::Other(other),
        }
    }

    fn load(&self, ctx: &mut ContextGuard<'_>, settings: &KnowledgeUpdateSettings) -> Record {
        match self {
            Self::Variable(variable) => variable.read(ctx),
            Self::Element(variable, Some(index)) => variable.read(ctx).retrieve_index(*index),
            Self::Element(_, None) => Record::default(),
            Self::Other(node) => node.evaluate(ctx, settings),
        }
    }

    fn store(&self, value: Record, ctx: &mut ContextGuard<'_>, settings: &KnowledgeUpdateSettings) -> Record {
        match self {
            Self::Variable(variable) => variable.write(value, ctx, settings),
            Self::Element(variable, None) => {
                debug!(variable = %variable.name(), "negative index assignment ignored");
                Record::default()
            }
            Self::Element(variable, Some(index)) => {
                let reference = variable.resolve(ctx);
                match ctx.set_index_by_ref(&reference, *index, value.clone(), settings) {
                    Ok(()) => value,
                    Err(err) => {
                        warn!(variable = %variable.name(), error = %err, "indexed assignment dropped");
                        Record::default()
                    }
                }
            }
            Self::Other(_) => value,
        }
    }
}
