use std::fmt;

use tracing::debug;

use crate::context::{ContextGuard, ContextId};
use crate::error::{KarlError, KarlResult};
use crate::record::Record;
use crate::settings::KnowledgeUpdateSettings;

use super::node::Node;
use super::parser::parse;
use super::visitor::{NodeCounter, SourcePrinter, VariableCollector, Visitor};

/// A parsed and pruned KaRL expression bound to one context.
///
/// Compile once, evaluate as often as needed. Evaluation needs a
/// [`ContextGuard`] of the context the expression was compiled against.
///
/// # Examples
///
/// ```
/// use karl::{Context, KnowledgeUpdateSettings};
///
/// let ctx = Context::new();
/// let expr = ctx.compile("(x = 1) ;> (y = 2) ;> x").unwrap();
/// let result = ctx.evaluate(&expr, &KnowledgeUpdateSettings::default()).unwrap();
/// assert_eq!(result.to_integer(), 1);
/// assert_eq!(ctx.get("y").to_integer(), 2);
/// ```
#[derive(Clone)]
pub struct CompiledExpression {
    root: Node,
    source: String,
    context: ContextId,
}

impl CompiledExpression {
    pub(crate) fn compile(source: &str, ctx: &mut ContextGuard<'_>) -> KarlResult<Self> {
        let mut root = parse(source)?;
        root.bind(ctx);
        let mut compiled = Self {
            root,
            source: source.to_string(),
            context: ctx.context_id(),
        };
        compiled.prune(ctx);
        debug!(expression = %source, nodes = compiled.node_count(), "compiled expression");
        Ok(compiled)
    }

    /// Evaluates the expression. Fails only when `ctx` belongs to a
    /// different context than the one the expression was compiled against.
    pub fn evaluate(&self, ctx: &mut ContextGuard<'_>, settings: &KnowledgeUpdateSettings) -> KarlResult<Record> {
        if ctx.context_id() != self.context {
            return Err(KarlError::invalid_reference(
                self.source.clone(),
                format!("expression compiled for context {}, evaluated on {}", self.context, ctx.context_id()),
            ));
        }
        Ok(self.root.evaluate(ctx, settings))
    }

    /// Folds constant subtrees. Returns whether the result can still change
    /// between evaluations.
    pub fn prune(&mut self, ctx: &mut ContextGuard<'_>) -> bool {
        let (value, can_change) = self.root.prune(ctx);
        if !can_change {
            self.root = Node::Leaf(value);
        }
        can_change
    }

    /// The text the expression was compiled from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Renders the pruned tree as KaRL text.
    #[must_use]
    pub fn to_source(&self) -> String {
        let mut printer = SourcePrinter::default();
        self.root.accept(&mut printer);
        printer.finish()
    }

    /// Number of nodes left after pruning.
    #[must_use]
    pub fn node_count(&self) -> usize {
        let mut counter = NodeCounter::default();
        self.root.accept(&mut counter);
        counter.count
    }

    /// Names read, written and called by the expression.
    #[must_use]
    pub fn variables(&self) -> VariableCollector {
        let mut collector = VariableCollector::default();
        self.root.accept(&mut collector);
        collector
    }

    /// Root of the pruned tree.
    #[must_use]
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Identifier of the context this was built against.
    #[must_use]
    pub fn context_id(&self) -> ContextId {
        self.context
    }

    /// Walks the tree with `visitor`.
    pub fn accept<V: Visitor + ?Sized>(&self, visitor: &mut V) {
        self.root.accept(visitor);
    }
}

impl fmt::Debug for CompiledExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledExpression")
            .field("source", &self.source)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
