//! The knowledge context: a thread-safe variable store.
//!
//! A [`Context`] maps variable names to [`Record`]s. All access is serialized
//! by one mutex. Single-shot methods on [`Context`] lock internally; callers
//! that need several steps to be atomic (evaluate, drain modifications, send)
//! take the lock once with [`Context::lock`] and work through the returned
//! [`ContextGuard`], which releases the lock when dropped.
//!
//! Every mutation bumps a change sequence, wakes threads blocked in
//! [`ContextGuard::wait_for_change`] and publishes a [`ChangeEvent`] to feed
//! subscribers.

mod expand;
mod feed;
mod function;
mod reference;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};
use std::time::Instant;

use regex::Regex;
use tracing::{debug, info, trace, warn};

use crate::error::{KarlError, KarlResult};
use crate::expression::{is_identifier, CompiledExpression};
use crate::record::{Record, RecordStatus};
use crate::settings::{KnowledgeBaseConfig, KnowledgeReferenceSettings, KnowledgeUpdateSettings};

pub(crate) use expand::expand_with;
pub use feed::{ChangeEvent, ChangeKind, ChangeStream};
pub use function::{Function, NativeFunction};
pub use reference::{ContextId, VariableReference};

use feed::ChangeFeed;

const REGEX_CACHE_MAX: usize = 256;

static REGEX_CACHE: OnceLock<RwLock<HashMap<String, Regex>>> = OnceLock::new();

fn cached_regex(pattern: &str) -> KarlResult<Regex> {
    let cache = REGEX_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    {
        let guard = cache
            .read()
            .map_err(|_| KarlError::internal("regex cache lock poisoned"))?;
        if let Some(re) = guard.get(pattern) {
            return Ok(re.clone());
        }
    }

    let compiled = Regex::new(pattern)
        .map_err(|e| KarlError::internal(format!("invalid key pattern '{pattern}': {e}")))?;

    let mut guard = cache
        .write()
        .map_err(|_| KarlError::internal("regex cache lock poisoned"))?;

    if guard.len() >= REGEX_CACHE_MAX {
        guard.clear();
    }

    guard
        .entry(pattern.to_string())
        .or_insert_with(|| compiled.clone());
    Ok(compiled)
}

/// Translates a `*` wildcard pattern into an anchored regex.
fn wildcard_regex(pattern: &str) -> String {
    let parts: Vec<String> = pattern.split('*').map(regex::escape).collect();
    format!("^{}$", parts.join(".*"))
}

#[derive(Debug)]
struct Slot {
    name: Arc<str>,
    record: Record,
    generation: u64,
    live: bool,
    write_quality: u32,
    modified: bool,
}

impl Slot {
    fn is_local(&self) -> bool {
        self.name.starts_with('.')
    }
}

#[derive(Debug, Default)]
pub(crate) struct ContextState {
    slots: Vec<Slot>,
    index: HashMap<String, usize>,
    free: Vec<usize>,
    modified: Vec<usize>,
    clock: u64,
    change_seq: u64,
    functions: HashMap<String, Function>,
    call_depth: usize,
}

impl ContextState {
    fn lookup(&self, name: &str) -> Option<&Record> {
        self.index.get(name).map(|slot| &self.slots[*slot].record)
    }

    fn resolve_or_create(&mut self, name: &str) -> usize {
        if let Some(slot) = self.index.get(name) {
            return *slot;
        }
        let name: Arc<str> = Arc::from(name);
        let slot = if let Some(slot) = self.free.pop() {
            let reused = &mut self.slots[slot];
            reused.name = Arc::clone(&name);
            reused.live = true;
            slot
        } else {
            self.slots.push(Slot {
                name: Arc::clone(&name),
                record: Record::default(),
                generation: 0,
                live: true,
                write_quality: 0,
                modified: false,
            });
            self.slots.len() - 1
        };
        self.index.insert(name.to_string(), slot);
        slot
    }

    fn flag_modified(&mut self, slot: usize) {
        let entry = &mut self.slots[slot];
        if !entry.modified {
            entry.modified = true;
            self.modified.push(slot);
        }
    }

    fn reference(&self, context: ContextId, slot: usize) -> VariableReference {
        let entry = &self.slots[slot];
        VariableReference {
            context,
            slot,
            generation: entry.generation,
            name: Arc::clone(&entry.name),
        }
    }

    fn release_slot(&mut self, slot: usize) {
        let entry = &mut self.slots[slot];
        entry.live = false;
        entry.generation += 1;
        entry.record = Record::default();
        entry.write_quality = 0;
        entry.modified = false;
        self.free.push(slot);
    }

    fn created(&self) -> impl Iterator<Item = &Slot> {
        self.slots
            .iter()
            .filter(|slot| slot.live && slot.record.is_created())
    }
}

struct ContextInner {
    id: ContextId,
    state: Mutex<ContextState>,
    changed: Condvar,
    feed: ChangeFeed,
    max_call_depth: usize,
    max_array_size: usize,
}

/// A shared, thread-safe variable store.
///
/// `Context` is a cheap handle: clones refer to the same store.
///
/// # Examples
///
/// ```
/// use karl::{Context, KnowledgeUpdateSettings};
///
/// let ctx = Context::new();
/// ctx.set("x", 5, &KnowledgeUpdateSettings::default()).unwrap();
/// assert_eq!(ctx.get("x").to_integer(), 5);
/// assert_eq!(ctx.get_modified().len(), 1);
/// ```
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Creates an empty context with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&KnowledgeBaseConfig::default())
    }

    /// Creates an empty context.
    #[must_use]
    pub fn with_config(config: &KnowledgeBaseConfig) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: ContextId::new(),
                state: Mutex::new(ContextState::default()),
                changed: Condvar::new(),
                feed: ChangeFeed::new(config.change_feed_capacity),
                max_call_depth: config.max_call_depth,
                max_array_size: config.max_array_size,
            }),
        }
    }

    /// Identifier of this context, shared by every reference it issues.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// Returns true if both handles refer to the same store.
    #[must_use]
    pub fn same_as(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Acquires the context lock until the guard is dropped.
    pub fn lock(&self) -> ContextGuard<'_> {
        ContextGuard {
            inner: &self.inner,
            state: self
                .inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Reads a variable without creating it. Missing variables read as an
    /// UNCREATED record.
    pub fn get(&self, name: &str) -> Record {
        self.lock().get(name)
    }

    /// Reads a variable, expanding `{name}` segments first when asked to.
    pub fn get_with(&self, name: &str, settings: &KnowledgeReferenceSettings) -> Record {
        self.lock().get_with(name, settings)
    }

    /// Resolves a variable, creating an UNCREATED slot on first use.
    pub fn get_ref(&self, name: &str) -> VariableReference {
        self.lock().get_ref(name)
    }

    /// Reads through a reference, failing if it is stale.
    pub fn get_by_ref(&self, variable: &VariableReference) -> KarlResult<Record> {
        self.lock().get_by_ref(variable)
    }

    /// Returns true if the variable holds a value.
    pub fn exists(&self, name: &str) -> bool {
        self.lock().exists(name)
    }

    /// Writes a variable, creating it if needed.
    pub fn set(
        &self,
        name: &str,
        value: impl Into<Record>,
        settings: &KnowledgeUpdateSettings,
    ) -> KarlResult<()> {
        self.lock().set(name, value, settings)
    }

    /// Writes through a reference, failing if it is stale.
    pub fn set_by_ref(
        &self,
        variable: &VariableReference,
        value: impl Into<Record>,
        settings: &KnowledgeUpdateSettings,
    ) -> KarlResult<()> {
        self.lock().set_by_ref(variable, value, settings)
    }

    /// Writes one array element, growing the array with zeros.
    pub fn set_index(
        &self,
        name: &str,
        index: usize,
        element: impl Into<Record>,
        settings: &KnowledgeUpdateSettings,
    ) -> KarlResult<()> {
        self.lock().set_index(name, index, element, settings)
    }

    /// Reads one array element; UNCREATED when out of range.
    pub fn retrieve_index(&self, name: &str, index: usize) -> Record {
        self.lock().retrieve_index(name, index)
    }

    /// Sets the quality stamped on future writes to `name`.
    pub fn set_quality(&self, name: &str, quality: u32) {
        self.lock().set_quality(name, quality);
    }

    /// Write quality of `name`, 0 if never set.
    pub fn get_quality(&self, name: &str) -> u32 {
        self.lock().get_quality(name)
    }

    /// Flags a variable for the next send without changing it.
    pub fn mark_modified(&self, variable: &VariableReference) -> KarlResult<()> {
        self.lock().mark_modified(variable)
    }

    /// References to every variable awaiting a send.
    pub fn get_modified(&self) -> Vec<VariableReference> {
        self.lock().get_modified()
    }

    /// Forgets pending modifications without sending them.
    pub fn clear_modified(&self) {
        self.lock().clear_modified();
    }

    /// One line per pending modification, for logging.
    pub fn debug_modifieds(&self) -> String {
        self.lock().debug_modifieds()
    }

    /// Flags every global variable modified.
    pub fn apply_modified(&self) {
        self.lock().apply_modified();
    }

    /// Removes a variable; outstanding references become stale.
    pub fn delete_variable(&self, name: &str) -> bool {
        self.lock().delete_variable(name)
    }

    /// Resets values, or erases every variable when `erase_all` is set.
    pub fn clear(&self, erase_all: bool) {
        self.lock().clear(erase_all);
    }

    /// The context's Lamport clock.
    pub fn clock(&self) -> u64 {
        self.lock().clock()
    }

    /// Clock of one variable, 0 if it was never written.
    pub fn variable_clock(&self, name: &str) -> u64 {
        self.lock().variable_clock(name)
    }

    /// Resets one variable to UNCREATED, keeping its slot.
    pub fn clear_variable(&self, name: &str) -> bool {
        self.lock().clear_variable(name)
    }

    /// Overwrites the context clock.
    pub fn set_clock(&self, clock: u64) {
        self.lock().set_clock(clock);
    }

    /// Registers a function; a previous definition under `name` is replaced.
    pub fn define_function(&self, name: &str, function: Function) {
        self.lock().define_function(name, function);
    }

    /// Registers a host closure as a function.
    pub fn define_native<F>(&self, name: &str, f: F)
    where
        F: Fn(&[Record], &mut ContextGuard<'_>) -> Record + Send + Sync + 'static,
    {
        self.define_function(name, Function::native(f));
    }

    /// Compiles `body` and registers it as a KaRL function.
    pub fn define_function_karl(&self, name: &str, body: &str) -> KarlResult<()> {
        let mut guard = self.lock();
        let compiled = guard.compile(body)?;
        guard.define_function(name, Function::Karl(Arc::new(compiled)));
        Ok(())
    }

    /// Replaces every `{name}` with the variable's current value.
    pub fn expand_statement(&self, statement: &str) -> String {
        self.lock().expand_statement(statement)
    }

    /// Values of `subject{i}` for `i` in `start..=end`.
    pub fn to_vector(&self, subject: &str, start: usize, end: usize) -> Vec<Record> {
        self.lock().to_vector(subject, start, end)
    }

    /// Variables whose names match a `*` wildcard pattern.
    pub fn to_map(&self, pattern: &str) -> KarlResult<BTreeMap<String, Record>> {
        self.lock().to_map(pattern)
    }

    /// Variables whose names start with `prefix`.
    pub fn to_map_prefix(&self, prefix: &str) -> BTreeMap<String, Record> {
        self.lock().to_map_prefix(prefix)
    }

    /// Names of every created variable, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys()
    }

    /// Number of created variables.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no variable holds a value.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Renders the store as KaRL assignments that rebuild it.
    pub fn to_karl(&self) -> String {
        self.lock().to_karl()
    }

    /// Expands `statement`, logs it, and returns the text.
    pub fn print(&self, statement: &str) -> String {
        self.lock().print(statement)
    }

    /// Compiles KaRL text against this store.
    pub fn compile(&self, text: &str) -> KarlResult<CompiledExpression> {
        self.lock().compile(text)
    }

    /// Evaluates a compiled expression under one lock.
    pub fn evaluate(
        &self,
        expression: &CompiledExpression,
        settings: &KnowledgeUpdateSettings,
    ) -> KarlResult<Record> {
        self.lock().evaluate(expression, settings)
    }

    /// Copies variables from `source` (all of them when `names` is empty).
    /// Copies keep the source clock and quality and are not flagged modified.
    /// With `clean_copy` the destination is erased first.
    pub fn copy_from(&self, source: &Context, names: &[String], clean_copy: bool) {
        if self.same_as(source) {
            return;
        }
        let entries: Vec<(String, Record)> = {
            let src = source.lock();
            if names.is_empty() {
                src.state
                    .created()
                    .map(|slot| (slot.name.to_string(), slot.record.deep_copy()))
                    .collect()
            } else {
                names
                    .iter()
                    .filter_map(|name| {
                        src.state
                            .lookup(name)
                            .filter(|record| record.is_created())
                            .map(|record| (name.clone(), record.deep_copy()))
                    })
                    .collect()
            }
        };

        let mut dest = self.lock();
        if clean_copy {
            dest.clear(true);
        }
        for (name, record) in entries {
            let settings = KnowledgeUpdateSettings::remote(record.clock(), record.quality());
            let _ = dest.set(&name, record, &settings);
        }
    }

    /// Wakes every thread blocked on a change notification.
    pub fn signal(&self) {
        self.lock().signal();
    }

    /// Blocks until another thread changes the context or calls
    /// [`Context::signal`]. Without `blocking` this only checks and returns
    /// `false` immediately.
    pub fn wait_for_change(&self, blocking: bool) -> bool {
        let guard = self.lock();
        if !blocking {
            return false;
        }
        let seen = guard.change_sequence();
        let guard = guard.wait_for_change(None);
        guard.change_sequence() != seen
    }

    /// Subscribes to the change feed.
    pub fn subscribe(&self) -> ChangeStream {
        self.inner.feed.subscribe()
    }

    /// Events lost because a subscriber's buffer was full.
    pub fn dropped_change_events(&self) -> u64 {
        self.inner.feed.dropped()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("id", &self.inner.id).finish_non_exhaustive()
    }
}

/// Exclusive access to a locked [`Context`].
///
/// Every operation performed through one guard is atomic with respect to
/// other threads. Dropping the guard releases the lock.
pub struct ContextGuard<'a> {
    inner: &'a ContextInner,
    state: MutexGuard<'a, ContextState>,
}

impl ContextGuard<'_> {
    /// Identifier of the context this was built against.
    #[must_use]
    pub fn context_id(&self) -> ContextId {
        self.inner.id
    }

    /// The context's Lamport clock.
    #[must_use]
    pub fn clock(&self) -> u64 {
        self.state.clock
    }

    /// Explicitly resets the context clock.
    pub fn set_clock(&mut self, clock: u64) {
        self.state.clock = clock;
    }

    /// Monotonic counter bumped by every change and signal.
    #[must_use]
    pub fn change_sequence(&self) -> u64 {
        self.state.change_seq
    }

    fn resolve_name(&self, name: &str, expand: bool) -> String {
        if expand && name.contains('{') {
            self.expand_statement(name)
        } else {
            name.to_string()
        }
    }

    fn validate(&self, variable: &VariableReference) -> KarlResult<usize> {
        if variable.context != self.inner.id {
            return Err(KarlError::invalid_reference(
                variable.name(),
                format!("issued by context {}, used on {}", variable.context, self.inner.id),
            ));
        }
        match self.state.slots.get(variable.slot) {
            Some(slot) if slot.live && slot.generation == variable.generation => Ok(variable.slot),
            _ => Err(KarlError::invalid_reference(
                variable.name(),
                "variable was deleted or the context was erased",
            )),
        }
    }

    /// Reads a variable without creating it.
    pub fn get(&self, name: &str) -> Record {
        self.state.lookup(name).cloned().unwrap_or_default()
    }

    /// Reads a variable, expanding `{name}` segments first when asked to.
    pub fn get_with(&self, name: &str, settings: &KnowledgeReferenceSettings) -> Record {
        let name = self.resolve_name(name, settings.expand_variables);
        self.get(&name)
    }

    /// Resolves a variable, creating an UNCREATED slot on first use.
    pub fn get_ref(&mut self, name: &str) -> VariableReference {
        let slot = self.state.resolve_or_create(name);
        self.state.reference(self.inner.id, slot)
    }

    /// Resolves a variable, expanding `{name}` segments first when asked to.
    pub fn get_ref_with(
        &mut self,
        name: &str,
        settings: &KnowledgeReferenceSettings,
    ) -> VariableReference {
        let name = self.resolve_name(name, settings.expand_variables);
        self.get_ref(&name)
    }

    /// Reads through a reference, failing if it is stale.
    pub fn get_by_ref(&self, variable: &VariableReference) -> KarlResult<Record> {
        let slot = self.validate(variable)?;
        Ok(self.state.slots[slot].record.clone())
    }

    /// Returns `variable` if it is still valid, otherwise a fresh reference
    /// to the same name.
    pub fn refresh(&mut self, variable: &VariableReference) -> VariableReference {
        match self.validate(variable) {
            Ok(_) => variable.clone(),
            Err(_) => {
                debug!(variable = %variable.name(), "stale reference re-bound by name");
                self.get_ref(variable.name())
            }
        }
    }

    /// Returns true if the variable holds a value.
    pub fn exists(&self, name: &str) -> bool {
        self.state.lookup(name).is_some_and(Record::is_created)
    }

    /// Writes a variable, creating it if needed.
    pub fn set(
        &mut self,
        name: &str,
        value: impl Into<Record>,
        settings: &KnowledgeUpdateSettings,
    ) -> KarlResult<()> {
        let name = self.resolve_name(name, settings.expand_variables);
        if name.is_empty() {
            return Err(KarlError::invalid_reference("", "empty variable name"));
        }
        let slot = self.state.resolve_or_create(&name);
        self.write(slot, value.into(), settings);
        Ok(())
    }

    /// Overwrites the variable, advances its clock and, unless the settings or
    /// the name make it local, flags it modified.
    pub fn set_by_ref(
        &mut self,
        variable: &VariableReference,
        value: impl Into<Record>,
        settings: &KnowledgeUpdateSettings,
    ) -> KarlResult<()> {
        let slot = self.validate(variable)?;
        self.write(slot, value.into(), settings);
        Ok(())
    }

    /// Writes one array element, growing the array with zeros.
    pub fn set_index(
        &mut self,
        name: &str,
        index: usize,
        element: impl Into<Record>,
        settings: &KnowledgeUpdateSettings,
    ) -> KarlResult<()> {
        let variable = self.get_ref_with(name, &settings.reference());
        self.set_index_by_ref(&variable, index, element, settings)
    }

    /// Writes one array element through a reference.
    pub fn set_index_by_ref(
        &mut self,
        variable: &VariableReference,
        index: usize,
        element: impl Into<Record>,
        settings: &KnowledgeUpdateSettings,
    ) -> KarlResult<()> {
        let slot = self.validate(variable)?;
        let limit = self.inner.max_array_size;
        let out_of_range = || KarlError::IndexOutOfRange {
            name: variable.name().to_string(),
            index,
            limit,
        };
        if index >= limit {
            return Err(out_of_range());
        }
        let mut record = std::mem::take(&mut self.state.slots[slot].record);
        if !record.set_index(index, &element.into()) {
            self.state.slots[slot].record = record;
            return Err(out_of_range());
        }
        self.write(slot, record, settings);
        Ok(())
    }

    /// Reads one array element; UNCREATED when out of range.
    pub fn retrieve_index(&self, name: &str, index: usize) -> Record {
        self.state
            .lookup(name)
            .map_or_else(Record::default, |record| record.retrieve_index(index))
    }

    /// Clock of one variable, 0 if it was never written.
    pub fn variable_clock(&self, name: &str) -> u64 {
        self.state.lookup(name).map_or(0, Record::clock)
    }

    /// Explicitly resets the clock of an existing variable.
    pub fn set_variable_clock(&mut self, name: &str, clock: u64) -> bool {
        let Some(slot) = self.state.index.get(name).copied() else {
            return false;
        };
        let record = &mut self.state.slots[slot].record;
        if !record.is_created() {
            return false;
        }
        record.set_clock(clock);
        true
    }

    /// Resets a variable to UNCREATED while keeping its slot, so references
    /// to it stay valid.
    pub fn clear_variable(&mut self, name: &str) -> bool {
        let Some(slot) = self.state.index.get(name).copied() else {
            return false;
        };
        self.state.modified.retain(|s| *s != slot);
        let entry = &mut self.state.slots[slot];
        entry.modified = false;
        entry.record = Record::default();
        self.notify(ChangeKind::Updated, name.to_string(), 0);
        true
    }

    /// Sets the quality stamped on this process's future writes to `name`.
    pub fn set_quality(&mut self, name: &str, quality: u32) {
        let slot = self.state.resolve_or_create(name);
        let entry = &mut self.state.slots[slot];
        entry.write_quality = quality;
        if entry.record.quality() < quality {
            entry.record.set_quality(quality);
        }
    }

    /// Write quality of `name`, 0 if never set.
    pub fn get_quality(&self, name: &str) -> u32 {
        self.state
            .index
            .get(name)
            .map_or(0, |slot| self.state.slots[*slot].write_quality)
    }

    fn write(&mut self, slot: usize, mut record: Record, settings: &KnowledgeUpdateSettings) {
        let state = &mut *self.state;
        let propagate = settings.remote.is_none()
            && !settings.treat_as_local
            && (!state.slots[slot].is_local() || settings.treat_locals_as_globals);

        if let Some(stamp) = settings.remote {
            record.set_clock(stamp.clock);
            record.set_quality(stamp.quality);
            state.clock = state.clock.max(stamp.clock);
        } else {
            state.clock = state.clock.saturating_add(settings.clock_increment);
            record.set_clock(state.clock);
            record.set_quality(state.slots[slot].write_quality);
        }

        if propagate {
            state.flag_modified(slot);
        }

        let entry = &mut state.slots[slot];
        record.set_status(if entry.modified {
            RecordStatus::Modified
        } else {
            RecordStatus::Unmodified
        });
        entry.record = record;
        let name = entry.name.to_string();
        let clock = entry.record.clock();
        self.notify(ChangeKind::Updated, name, clock);
    }

    fn notify(&mut self, kind: ChangeKind, name: String, clock: u64) {
        self.state.change_seq += 1;
        let event = ChangeEvent {
            sequence: self.state.change_seq,
            kind,
            name,
            clock,
        };
        trace!(variable = %event.name, kind = ?event.kind, sequence = event.sequence, "context changed");
        self.inner.changed.notify_all();
        self.inner.feed.publish(&event);
    }

    /// Wakes every thread blocked on a change notification.
    pub fn signal(&mut self) {
        self.notify(ChangeKind::Signaled, String::new(), 0);
    }

    /// Flags a variable modified without changing its value, e.g. after an
    /// in-place container mutation.
    pub fn mark_modified(&mut self, variable: &VariableReference) -> KarlResult<()> {
        let slot = self.validate(variable)?;
        self.state.flag_modified(slot);
        self.state.slots[slot].record.set_status(RecordStatus::Modified);
        Ok(())
    }

    /// Variables flagged modified since the last [`ContextGuard::clear_modified`],
    /// in the order they were first flagged.
    pub fn get_modified(&self) -> Vec<VariableReference> {
        self.state
            .modified
            .iter()
            .map(|slot| self.state.reference(self.inner.id, *slot))
            .collect()
    }

    /// Names and records of every modified variable.
    pub fn modified_records(&self) -> Vec<(String, Record)> {
        self.state
            .modified
            .iter()
            .map(|slot| {
                let entry = &self.state.slots[*slot];
                (entry.name.to_string(), entry.record.clone())
            })
            .collect()
    }

    /// Forgets pending modifications without sending them.
    pub fn clear_modified(&mut self) {
        let state = &mut *self.state;
        for slot in state.modified.drain(..) {
            let entry = &mut state.slots[slot];
            entry.modified = false;
            if entry.record.is_created() {
                entry.record.set_status(RecordStatus::Unmodified);
            }
        }
    }

    /// One line per pending modification, for logging.
    pub fn debug_modifieds(&self) -> String {
        self.modified_records()
            .iter()
            .map(|(name, record)| format!("{name}={record}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Re-stamps every global variable with a fresh clock and flags it
    /// modified, so the next send transmits the whole knowledge base.
    pub fn apply_modified(&mut self) {
        let state = &mut *self.state;
        state.clock = state.clock.saturating_add(1);
        let clock = state.clock;
        let slots: Vec<usize> = state
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.live && slot.record.is_created() && !slot.is_local())
            .map(|(idx, _)| idx)
            .collect();
        for slot in slots {
            state.flag_modified(slot);
            let record = &mut state.slots[slot].record;
            record.set_clock(clock);
            record.set_status(RecordStatus::Modified);
        }
    }

    /// Removes a variable. Outstanding references to it become invalid.
    pub fn delete_variable(&mut self, name: &str) -> bool {
        let Some(slot) = self.state.index.remove(name) else {
            return false;
        };
        self.state.modified.retain(|s| *s != slot);
        self.state.release_slot(slot);
        self.notify(ChangeKind::Deleted, name.to_string(), 0);
        true
    }

    /// With `erase_all`, removes every variable and invalidates all
    /// references. Otherwise resets every value to UNCREATED while keeping the
    /// names, so references stay valid.
    pub fn clear(&mut self, erase_all: bool) {
        let state = &mut *self.state;
        state.modified.clear();
        if erase_all {
            state.index.clear();
            let live: Vec<usize> = (0..state.slots.len()).filter(|s| state.slots[*s].live).collect();
            for slot in live {
                state.release_slot(slot);
            }
        } else {
            for slot in &mut state.slots {
                slot.record = Record::default();
                slot.modified = false;
            }
        }
        self.notify(ChangeKind::Cleared, String::new(), 0);
    }

    /// Registers a function; a previous definition under `name` is replaced.
    pub fn define_function(&mut self, name: &str, function: Function) {
        self.state.functions.insert(name.to_string(), function);
    }

    /// Looks up a registered function.
    pub fn function(&self, name: &str) -> Option<Function> {
        self.state.functions.get(name).cloned()
    }

    /// Calls a registered function. Undefined functions and calls nested
    /// deeper than the configured limit yield an UNCREATED record.
    pub(crate) fn call_function(
        &mut self,
        name: &str,
        args: &[Record],
        settings: &KnowledgeUpdateSettings,
    ) -> Record {
        let Some(function) = self.function(name) else {
            warn!(function = %name, "call to undefined function");
            return Record::default();
        };
        if !self.enter_call() {
            warn!(function = %name, depth = self.state.call_depth, "function call depth exceeded");
            return Record::default();
        }
        let result = function.call(name, args, self, settings);
        self.exit_call();
        result
    }

    /// Counts one level of nested evaluation. Returns false when the
    /// configured depth limit is reached.
    pub(crate) fn enter_call(&mut self) -> bool {
        if self.state.call_depth >= self.inner.max_call_depth {
            return false;
        }
        self.state.call_depth += 1;
        true
    }

    pub(crate) fn exit_call(&mut self) {
        self.state.call_depth = self.state.call_depth.saturating_sub(1);
    }

    /// Replaces `{name}` segments with the current values of those variables.
    pub fn expand_statement(&self, statement: &str) -> String {
        let state = &*self.state;
        expand_with(statement, &mut |name| {
            state.lookup(name).map(Record::to_string).unwrap_or_default()
        })
    }

    /// Reads `subject{start}` through `subject{end}` inclusive.
    pub fn to_vector(&self, subject: &str, start: usize, end: usize) -> Vec<Record> {
        if start > end {
            return Vec::new();
        }
        (start..=end)
            .map(|idx| self.get(&format!("{subject}{idx}")))
            .collect()
    }

    /// Every variable whose name matches a `*` wildcard pattern.
    pub fn to_map(&self, pattern: &str) -> KarlResult<BTreeMap<String, Record>> {
        let re = cached_regex(&wildcard_regex(pattern))?;
        Ok(self
            .state
            .created()
            .filter(|slot| re.is_match(&slot.name))
            .map(|slot| (slot.name.to_string(), slot.record.clone()))
            .collect())
    }

    /// Variables whose names start with `prefix`.
    pub fn to_map_prefix(&self, prefix: &str) -> BTreeMap<String, Record> {
        self.state
            .created()
            .filter(|slot| slot.name.starts_with(prefix))
            .map(|slot| (slot.name.to_string(), slot.record.clone()))
            .collect()
    }

    /// Sorted names of every variable holding a value.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.created().map(|slot| slot.name.to_string()).collect();
        keys.sort();
        keys
    }

    /// Number of created variables.
    pub fn len(&self) -> usize {
        self.state.created().count()
    }

    /// Returns true if no variable holds a value.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Renders the knowledge base as KaRL assignments that rebuild it when
    /// evaluated. Binary values and names that are not identifiers are skipped.
    pub fn to_karl(&self) -> String {
        let mut out = String::new();
        for name in self.keys() {
            let record = self.get(&name);
            if record.is_binary() || !is_identifier(&name) {
                warn!(variable = %name, "variable has no KaRL form, skipped");
                continue;
            }
            out.push_str(&format!("{name} = {};\n", record.to_karl_source()));
        }
        out
    }

    /// Expands `statement` and logs it.
    pub fn print(&self, statement: &str) -> String {
        let expanded = self.expand_statement(statement);
        info!(target: "karl::print", "{expanded}");
        expanded
    }

    /// Atomically releases the lock and blocks until the context changes or
    /// is signaled, or until `deadline` passes. Returns with the lock held.
    #[must_use]
    pub fn wait_for_change(self, deadline: Option<Instant>) -> Self {
        let seen = self.state.change_seq;
        let ContextGuard { inner, state } = self;
        let state = match deadline {
            None => inner
                .changed
                .wait_while(state, |s| s.change_seq == seen)
                .unwrap_or_else(PoisonError::into_inner),
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                inner
                    .changed
                    .wait_timeout_while(state, timeout, |s| s.change_seq == seen)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
        };
        ContextGuard { inner, state }
    }

    /// Compiles KaRL text against this store.
    pub fn compile(&mut self, text: &str) -> KarlResult<CompiledExpression> {
        CompiledExpression::compile(text, self)
    }

    /// Evaluates a compiled expression under one lock.
    pub fn evaluate(
        &mut self,
        expression: &CompiledExpression,
        settings: &KnowledgeUpdateSettings,
    ) -> KarlResult<Record> {
        expression.evaluate(self, settings)
    }
}

impl fmt::Debug for ContextGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextGuard")
            .field("id", &self.inner.id)
            .field("clock", &self.state.clock)
            .field("variables", &self.state.index.len())
            .finish()
    }
}
