//! The knowledge base facade.
//!
//! A [`KnowledgeBase`] is either an owning handle (its own context plus the
//! transports that replicate it) or a borrowing handle over a context owned
//! elsewhere, used to share one store between components of a process
//! without networking. The mode is fixed at construction.

mod transport;
mod wait;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, error, info};

use crate::context::{ChangeStream, Context, ContextGuard, Function, VariableReference};
use crate::error::{KarlError, KarlResult};
use crate::expression::CompiledExpression;
use crate::record::Record;
use crate::settings::{EvalSettings, KnowledgeBaseConfig, KnowledgeUpdateSettings};

pub use transport::{ChannelTransport, ModifiedBatch, Transport};

struct KnowledgeBaseImpl {
    id: String,
    context: Context,
    transports: RwLock<Vec<Arc<dyn Transport>>>,
    config: KnowledgeBaseConfig,
}

impl Drop for KnowledgeBaseImpl {
    fn drop(&mut self) {
        let transports = self.transports.get_mut().unwrap_or_else(PoisonError::into_inner);
        for transport in transports.drain(..) {
            transport.close();
        }
    }
}

#[derive(Clone)]
enum Backing {
    Owned(Arc<KnowledgeBaseImpl>),
    Borrowed(Context),
}

/// Handle to a knowledge base. Clones share the same store.
///
/// # Examples
///
/// ```
/// use karl::{EvalSettings, KnowledgeBase};
///
/// let kb = KnowledgeBase::new();
/// let result = kb.evaluate("x = 3 ;> y = x * 2", &EvalSettings::default()).unwrap();
/// assert_eq!(result.to_integer(), 6);
///
/// let view = KnowledgeBase::facade_for(kb.context());
/// assert_eq!(view.get("y").to_integer(), 6);
/// ```
#[derive(Clone)]
pub struct KnowledgeBase {
    backing: Backing,
}

impl KnowledgeBase {
    /// Creates an owning knowledge base with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(KnowledgeBaseConfig::default())
    }

    /// Creates an owning knowledge base from `config`.
    #[must_use]
    pub fn with_config(config: KnowledgeBaseConfig) -> Self {
        let context = Context::with_config(&config);
        let id = config.id.clone().unwrap_or_else(|| context.id().to_string());
        debug!(kb = %id, "knowledge base created");
        Self {
            backing: Backing::Owned(Arc::new(KnowledgeBaseImpl {
                id,
                context,
                transports: RwLock::new(Vec::new()),
                config,
            })),
        }
    }

    /// Creates a borrowing facade over `context`. The facade has no
    /// transports, so its modifications stay queued for the owner to send.
    #[must_use]
    pub fn facade_for(context: &Context) -> Self {
        Self {
            backing: Backing::Borrowed(context.clone()),
        }
    }

    /// The id stamped on outgoing batches.
    #[must_use]
    pub fn id(&self) -> String {
        match &self.backing {
            Backing::Owned(inner) => inner.id.clone(),
            Backing::Borrowed(context) => context.id().to_string(),
        }
    }

    /// The store behind this knowledge base.
    #[must_use]
    pub fn context(&self) -> &Context {
        match &self.backing {
            Backing::Owned(inner) => &inner.context,
            Backing::Borrowed(context) => context,
        }
    }

    /// Returns true for a facade over another knowledge base's store.
    #[must_use]
    pub fn is_borrowed(&self) -> bool {
        matches!(self.backing, Backing::Borrowed(_))
    }

    /// Configuration of an owning knowledge base.
    #[must_use]
    pub fn config(&self) -> Option<&KnowledgeBaseConfig> {
        match &self.backing {
            Backing::Owned(inner) => Some(&inner.config),
            Backing::Borrowed(_) => None,
        }
    }

    /// Acquires the context lock; see [`Context::lock`].
    pub fn lock(&self) -> ContextGuard<'_> {
        self.context().lock()
    }

    fn transports(&self) -> Vec<Arc<dyn Transport>> {
        match &self.backing {
            Backing::Owned(inner) => inner
                .transports
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            Backing::Borrowed(_) => Vec::new(),
        }
    }

    /// Attaches a transport. Borrowing facades cannot own transports.
    pub fn attach_transport(&self, transport: Arc<dyn Transport>) -> KarlResult<()> {
        let Backing::Owned(inner) = &self.backing else {
            return Err(KarlError::Config {
                message: "a borrowing knowledge base cannot attach transports".to_string(),
            });
        };
        info!(kb = %inner.id, transport = %transport.id(), "transport attached");
        inner
            .transports
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(transport);
        Ok(())
    }

    /// Detaches and closes the transport with `id`.
    pub fn remove_transport(&self, id: &str) -> bool {
        let Backing::Owned(inner) = &self.backing else {
            return false;
        };
        let mut transports = inner.transports.write().unwrap_or_else(PoisonError::into_inner);
        let Some(pos) = transports.iter().position(|t| t.id() == id) else {
            return false;
        };
        transports.remove(pos).close();
        true
    }

    /// Number of attached transports.
    #[must_use]
    pub fn transport_count(&self) -> usize {
        self.transports().len()
    }

    /// Closes and detaches every transport.
    pub fn close_transports(&self) {
        if let Backing::Owned(inner) = &self.backing {
            let mut transports = inner.transports.write().unwrap_or_else(PoisonError::into_inner);
            for transport in transports.drain(..) {
                transport.close();
            }
        }
    }

    /// Sends all pending modifications. Locks the context for the duration.
    pub fn send_modifieds(&self) -> KarlResult<usize> {
        let mut guard = self.lock();
        self.send_locked(&mut guard)
    }

    /// Drains the modified set into one batch and hands it to every
    /// transport. Without transports, or when every transport fails, the
    /// modifications stay queued.
    pub fn send_locked(&self, guard: &mut ContextGuard<'_>) -> KarlResult<usize> {
        let transports = self.transports();
        if transports.is_empty() {
            return Ok(0);
        }
        let updates = guard.modified_records();
        if updates.is_empty() {
            return Ok(0);
        }
        let batch = ModifiedBatch {
            origin: self.id(),
            clock: guard.clock(),
            updates,
        };

        let mut sent = 0;
        let mut delivered = false;
        let mut failure = None;
        for transport in &transports {
            match transport.send(&batch) {
                Ok(count) => {
                    sent += count;
                    delivered = true;
                }
                Err(err) => {
                    error!(transport = %transport.id(), error = %err, "send failed");
                    failure.get_or_insert(err);
                }
            }
        }

        match failure {
            Some(err) if !delivered => Err(err),
            _ => {
                guard.clear_modified();
                debug!(kb = %batch.origin, updates = batch.len(), clock = batch.clock, "modifications sent");
                Ok(sent)
            }
        }
    }

    fn flush(&self, guard: &mut ContextGuard<'_>, settings: &EvalSettings) {
        if settings.delay_sending_modifieds {
            return;
        }
        // failures are logged by send_locked and the modifications stay queued
        let _ = self.send_locked(guard);
    }

    /// Applies a batch received from another knowledge base.
    ///
    /// Each update is written with its sender's stamp when it supersedes the
    /// local record (higher quality, or equal quality and a clock at least as
    /// new). Returns the number of updates accepted.
    pub fn apply_batch(&self, batch: &ModifiedBatch) -> usize {
        if batch.origin == self.id() {
            return 0;
        }
        let mut guard = self.lock();
        let mut accepted = 0;
        for (name, record) in &batch.updates {
            let current = guard.get(name);
            if current.is_created() && !record.supersedes(&current) {
                continue;
            }
            let settings = KnowledgeUpdateSettings::remote(record.clock(), record.quality());
            if guard.set(name, record.clone(), &settings).is_ok() {
                accepted += 1;
            }
        }
        debug!(origin = %batch.origin, accepted, offered = batch.len(), "batch applied");
        accepted
    }

    /// Compiles KaRL text against this store.
    pub fn compile(&self, text: &str) -> KarlResult<CompiledExpression> {
        self.context().compile(text)
    }

    /// Compiles and evaluates `text`.
    pub fn evaluate(&self, text: &str, settings: &EvalSettings) -> KarlResult<Record> {
        let compiled = self.compile(text)?;
        self.evaluate_compiled(&compiled, settings)
    }

    /// Evaluates under the context lock and, unless sending is delayed, sends
    /// the resulting modifications before the lock is released.
    pub fn evaluate_compiled(&self, expression: &CompiledExpression, settings: &EvalSettings) -> KarlResult<Record> {
        self.pre_print(settings);
        let result = {
            let mut guard = self.lock();
            let result = guard.evaluate(expression, &settings.update)?;
            self.flush(&mut guard, settings);
            result
        };
        self.post_print(settings);
        Ok(result)
    }

    fn pre_print(&self, settings: &EvalSettings) {
        if !settings.pre_print_statement.is_empty() {
            self.context().print(&settings.pre_print_statement);
        }
    }

    fn post_print(&self, settings: &EvalSettings) {
        if !settings.post_print_statement.is_empty() {
            self.context().print(&settings.post_print_statement);
        }
    }

    /// Reads a variable without creating it.
    pub fn get(&self, name: &str) -> Record {
        self.context().get(name)
    }

    /// Resolves a variable, creating an UNCREATED slot on first use.
    pub fn get_ref(&self, name: &str) -> VariableReference {
        self.context().get_ref(name)
    }

    /// Returns true if the variable holds a value.
    pub fn exists(&self, name: &str) -> bool {
        self.context().exists(name)
    }

    /// Sets a variable and sends the modification.
    pub fn set(&self, name: &str, value: impl Into<Record>) -> KarlResult<()> {
        self.set_with(name, value, &EvalSettings::default())
    }

    /// Sets a variable under explicit settings and sends the modification.
    pub fn set_with(&self, name: &str, value: impl Into<Record>, settings: &EvalSettings) -> KarlResult<()> {
        let mut guard = self.lock();
        guard.set(name, value, &settings.update)?;
        self.flush(&mut guard, settings);
        Ok(())
    }

    /// Writes one array element, growing the array with zeros.
    pub fn set_index(&self, name: &str, index: usize, element: impl Into<Record>) -> KarlResult<()> {
        let settings = EvalSettings::default();
        let mut guard = self.lock();
        guard.set_index(name, index, element, &settings.update)?;
        self.flush(&mut guard, &settings);
        Ok(())
    }

    /// Sets the quality stamped on future writes to `name`.
    pub fn set_quality(&self, name: &str, quality: u32) {
        self.context().set_quality(name, quality);
    }

    /// Flags a variable for the next send without changing it.
    pub fn mark_modified(&self, variable: &VariableReference) -> KarlResult<()> {
        self.context().mark_modified(variable)
    }

    /// Removes a variable; outstanding references become stale.
    pub fn delete_variable(&self, name: &str) -> bool {
        self.context().delete_variable(name)
    }

    /// Resets values, or erases every variable when `erase_all` is set.
    pub fn clear(&self, erase_all: bool) {
        self.context().clear(erase_all);
    }

    /// Registers a function, replacing any previous definition.
    pub fn define_function(&self, name: &str, function: Function) {
        self.context().define_function(name, function);
    }

    /// Registers a Rust closure as a KaRL function.
    pub fn define_native<F>(&self, name: &str, f: F)
    where
        F: Fn(&[Record], &mut ContextGuard<'_>) -> Record + Send + Sync + 'static,
    {
        self.context().define_native(name, f);
    }

    /// Compiles `body` and registers it as a KaRL function.
    pub fn define_function_karl(&self, name: &str, body: &str) -> KarlResult<()> {
        self.context().define_function_karl(name, body)
    }

    /// Replaces every `{name}` with the variable's current value.
    pub fn expand_statement(&self, statement: &str) -> String {
        self.context().expand_statement(statement)
    }

    /// Expands `statement`, logs it, and returns the text.
    pub fn print(&self, statement: &str) -> String {
        self.context().print(statement)
    }

    /// Variables whose names match a `*` wildcard pattern.
    pub fn to_map(&self, pattern: &str) -> KarlResult<BTreeMap<String, Record>> {
        self.context().to_map(pattern)
    }

    /// Renders the store as KaRL assignments that rebuild it.
    pub fn to_karl(&self) -> String {
        self.context().to_karl()
    }

    /// Names of every created variable, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.context().keys()
    }

    /// Copies variables from another knowledge base; see [`Context::copy_from`].
    pub fn copy_from(&self, source: &KnowledgeBase, names: &[String], clean_copy: bool) {
        self.context().copy_from(source.context(), names, clean_copy);
    }

    /// References to every variable awaiting a send.
    pub fn get_modified(&self) -> Vec<VariableReference> {
        self.context().get_modified()
    }

    /// Forgets pending modifications without sending them.
    pub fn clear_modifieds(&self) {
        self.context().clear_modified();
    }

    /// One line per pending modification, for logging.
    pub fn debug_modifieds(&self) -> String {
        self.context().debug_modifieds()
    }

    /// Flags every global variable modified so the next send carries the
    /// whole knowledge base.
    pub fn apply_modified(&self) {
        self.context().apply_modified();
    }

    /// Wakes every waiter without changing data.
    pub fn signal(&self) {
        self.context().signal();
    }

    /// Opens a change feed subscription.
    pub fn subscribe(&self) -> ChangeStream {
        self.context().subscribe()
    }
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("id", &self.id())
            .field("borrowed", &self.is_borrowed())
            .field("transports", &self.transport_count())
            .finish()
    }
}
