//! Functions callable from KaRL expressions.

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::expression::CompiledExpression;
use crate::record::Record;
use crate::settings::KnowledgeUpdateSettings;

use super::ContextGuard;

/// Host function signature: evaluated arguments plus the locked context.
pub type NativeFunction = Arc<dyn Fn(&[Record], &mut ContextGuard<'_>) -> Record + Send + Sync>;

/// A function registered under a name in a context.
#[derive(Clone)]
pub enum Function {
    /// Host-language logic.
    Native(NativeFunction),
    /// A KaRL body; arguments arrive as the locals `.0`, `.1`, …
    Karl(Arc<CompiledExpression>),
}

impl Function {
    /// Wraps a host closure.
    pub fn native<F>(f: F) -> Self
    where
        F: Fn(&[Record], &mut ContextGuard<'_>) -> Record + Send + Sync + 'static,
    {
        Self::Native(Arc::new(f))
    }

    /// Invokes the function. A KaRL body compiled against another context
    /// yields an UNCREATED record.
    pub fn call(
        &self,
        name: &str,
        args: &[Record],
        ctx: &mut ContextGuard<'_>,
        settings: &KnowledgeUpdateSettings,
    ) -> Record {
        match self {
            Self::Native(f) => f(args, ctx),
            Self::Karl(body) => {
                let local = KnowledgeUpdateSettings::local();
                for (idx, arg) in args.iter().enumerate() {
                    let _ = ctx.set(&format!(".{idx}"), arg.clone(), &local);
                }
                match body.evaluate(ctx, settings) {
                    Ok(result) => result,
                    Err(err) => {
                        warn!(function = %name, error = %err, "function body is bound to another context");
                        Record::default()
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native(_) => f.write_str("Function::Native"),
            Self::Karl(body) => f.debug_tuple("Function::Karl").field(&body.source()).finish(),
        }
    }
}
