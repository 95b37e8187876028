//! The trigger engine.
//!
//! [`TriggerEngine`] owns every process-wide structure of the trigger
//! manager (object cache, name table, schema/user caches, deferred
//! contexts and transaction bookkeeping) behind one registry lock, plus the
//! shared recursion-depth counter. Firing never holds the lock while an
//! activity runs, so activities may re-enter the engine.

mod admin;
mod deferred;
mod firing;
mod state;
mod transaction;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, Loader, NameTable, ObjectCache, SchemaCache, Triglist};
use crate::config::TriggerConfig;
use crate::error::{ConsistencyError, DefinitionError, TriggerError, TriggerResult};
use crate::host::{ObjectStore, Privilege, Services};
use crate::ids::{ChangeNumber, ClassId, ObjectHandle};
use crate::trigger::{Trigger, TriggerEvent, TriggerRecord, TriggerStatus};

use deferred::DeferredQueue;

pub use state::{StatePhase, TriggerState};

/// Descriptive snapshot of one trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerInfo {
    /// Handle of the described trigger.
    pub handle: ObjectHandle,
    /// Change number of the record the snapshot was taken from.
    pub chn: ChangeNumber,
    /// Stored definition.
    #[serde(flatten)]
    pub record: TriggerRecord,
}

/// Sizes of the engine's in-memory structures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries in the name table.
    pub names: usize,
    /// Triggers held by the object cache.
    pub objects: usize,
    /// Schema and user caches.
    pub caches: usize,
    /// Queued deferred activities.
    pub deferred: usize,
    /// Triggers created in the running transaction.
    pub uncommitted: usize,
}

/// Everything guarded by the registry lock.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    pub objects: ObjectCache,
    pub names: NameTable,
    pub caches: HashMap<CacheKey, SchemaCache>,
    pub deferred: DeferredQueue,
    /// Trigger identities of the statement triggers currently executing.
    pub statement_stack: Vec<ObjectHandle>,
    /// Triggers created in the running transaction.
    pub uncommitted: Vec<ObjectHandle>,
    /// Name of the trigger whose INVALIDATE action doomed the transaction.
    pub invalidated_by: Option<String>,
    pub initialized: bool,
}

/// Return the cache for `key`, creating it from the store's handle list on
/// first use.
pub(crate) fn ensure_cache<'c>(
    caches: &'c mut HashMap<CacheKey, SchemaCache>,
    key: &CacheKey,
    store: &dyn ObjectStore,
) -> TriggerResult<&'c mut SchemaCache> {
    if !caches.contains_key(key) {
        let handles = match key {
            CacheKey::Class(class) => store.handles_for_target(*class, None)?,
            CacheKey::Attribute(class, attribute) => store.handles_for_target(*class, Some(attribute))?,
            CacheKey::User(user) => store.handles_for_owner(*user)?,
        };
        debug!(key = ?key, triggers = handles.len(), "Created trigger cache");
        caches.insert(key.clone(), SchemaCache::with_handles(key.scope(), handles));
    }
    caches.get_mut(key).ok_or_else(|| {
        ConsistencyError::CorruptCache {
            reason: format!("cache {key:?} vanished after insertion"),
        }
        .into()
    })
}

/// Map a trigger from the cache, keeping it available when it failed to
/// compile. Never consults the store for a newer version; callers that need
/// coherency go through [`Registry::revalidate`].
pub(crate) fn resolve<'o>(
    objects: &'o mut ObjectCache,
    handle: ObjectHandle,
    loader: Loader<'_>,
) -> TriggerResult<&'o mut Trigger> {
    map_tolerant(objects, handle, false, loader)?;
    mapped(objects, handle)
}

fn map_tolerant(objects: &mut ObjectCache, handle: ObjectHandle, fetch: bool, loader: Loader<'_>) -> TriggerResult<()> {
    match objects.map(handle, fetch, loader) {
        Ok(_) => Ok(()),
        Err(e) if e.is_compile() => Ok(()),
        Err(e) => Err(e),
    }
}

fn mapped(objects: &mut ObjectCache, handle: ObjectHandle) -> TriggerResult<&mut Trigger> {
    objects.get_mut(&handle).ok_or_else(|| {
        ConsistencyError::CorruptCache {
            reason: format!("trigger {handle} missing right after mapping"),
        }
        .into()
    })
}

impl Registry {
    /// Active triggers of `key` for `event`, in firing order.
    pub fn triglist_for(&mut self, key: &CacheKey, event: TriggerEvent, loader: Loader<'_>) -> TriggerResult<Triglist> {
        let Self { objects, caches, .. } = self;
        let cache = ensure_cache(caches, key, loader.store)?;
        if !cache.may_have_active() {
            return Ok(Triglist::new());
        }
        let (_, for_event) = cache.active(event, objects, loader)?;
        if !for_event {
            return Ok(Triglist::new());
        }
        let mut list = cache.triglist(event).cloned().unwrap_or_default();
        list.retain(|n| objects.get(&n.trigger).is_some_and(Trigger::is_active));
        Ok(list)
    }

    /// Map a trigger, refreshing it from the store when another session
    /// changed it. A refresh that moves the priority re-sorts every compiled
    /// triglist; one that moves the status invalidates the active flags.
    pub fn revalidate(&mut self, handle: ObjectHandle, loader: Loader<'_>) -> TriggerResult<&mut Trigger> {
        let before = self.objects.get(&handle).map(|t| (t.priority(), t.status()));
        map_tolerant(&mut self.objects, handle, true, loader)?;
        let after = self.objects.get(&handle).map(|t| (t.priority(), t.status()));

        if let (Some((old_priority, old_status)), Some((priority, status))) = (before, after) {
            if old_priority.to_bits() != priority.to_bits() {
                let moved = self.reinsert(handle, priority);
                debug!(%handle, old_priority, priority, moved, "refreshed trigger priority");
            }
            if old_status != status {
                debug!(%handle, ?old_status, ?status, "refreshed trigger status");
                self.status_changed();
            }
        }
        mapped(&mut self.objects, handle)
    }

    /// Move a trigger to its new priority slot in every compiled triglist.
    /// Returns the number of caches that held it.
    pub fn reinsert(&mut self, handle: ObjectHandle, priority: f64) -> usize {
        self.caches
            .values_mut()
            .filter(|c| c.is_compiled())
            .map(|c| usize::from(c.reinsert(handle, priority)))
            .sum()
    }

    /// A trigger's status changed: every memoized active flag is stale.
    pub fn status_changed(&mut self) {
        for cache in self.caches.values_mut() {
            cache.invalidate_active();
        }
    }

    /// Unlink a trigger from every cache.
    pub fn unlink(&mut self, handle: ObjectHandle) {
        for cache in self.caches.values_mut() {
            cache.remove(handle);
        }
    }

    /// Trigger name for diagnostics, falling back to the handle.
    pub fn trigger_name(&self, handle: ObjectHandle) -> String {
        self.objects
            .get(&handle)
            .map_or_else(|| handle.to_string(), |t| t.name().to_string())
    }
}

/// Trigger manager context.
///
/// Holds the host services, the configuration and all trigger caches. One
/// engine serves one database; share it behind an `Arc`.
pub struct TriggerEngine {
    services: Services,
    config: TriggerConfig,
    max_depth: AtomicUsize,
    firing_enabled: AtomicBool,
    depth: Arc<AtomicUsize>,
    registry: Mutex<Registry>,
}

impl TriggerEngine {
    /// Create an engine over the given host services.
    #[must_use]
    pub fn new(services: Services, config: TriggerConfig) -> Self {
        let config = config.validated();
        Self {
            max_depth: AtomicUsize::new(config.max_depth),
            firing_enabled: AtomicBool::new(config.firing_enabled),
            depth: Arc::new(AtomicUsize::new(0)),
            registry: Mutex::new(Registry::default()),
            services,
            config,
        }
    }

    /// Host collaborators.
    #[must_use]
    pub const fn services(&self) -> &Services {
        &self.services
    }

    /// Configuration the engine was created with.
    #[must_use]
    pub const fn config(&self) -> &TriggerConfig {
        &self.config
    }

    pub(crate) fn registry(&self) -> TriggerResult<MutexGuard<'_, Registry>> {
        self.registry
            .lock()
            .map_err(|_| TriggerError::internal("trigger registry lock poisoned"))
    }

    /// Lock for cleanup paths that must make progress even after a panic.
    pub(crate) fn registry_for_cleanup(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn loader(&self) -> Loader<'_> {
        Loader {
            store: self.services.store.as_ref(),
            compiler: self.services.compiler.as_ref(),
            style: self.config.correlation_style,
        }
    }

    /// Force a transaction abort for errors that may have decoupled memory
    /// from the store, then hand the error back.
    pub(crate) fn escalate(&self, err: TriggerError) -> TriggerError {
        if err.is_severe() {
            warn!(error = %err, "Forcing transaction abort");
            self.services.transactions.force_abort(&err.to_string());
        }
        err
    }

    /// Recursion-limit error naming the first trigger that could not run.
    /// Must not be called with the registry locked.
    pub(crate) fn recursion_error(&self, first: Option<ObjectHandle>) -> TriggerError {
        let first_trigger = match first {
            Some(handle) => self.registry_for_cleanup().trigger_name(handle),
            None => String::new(),
        };
        let limit = self.max_depth();
        warn!(limit, trigger = %first_trigger, "Trigger recursion limit exceeded");
        ConsistencyError::RecursionLimit { limit, first_trigger }.into()
    }

    // ----- lifecycle -----

    /// Load the name table from the store. Returns the number of triggers
    /// registered. Triggers themselves load lazily on first use.
    ///
    /// # Errors
    /// Store failures.
    pub fn initialize(&self) -> TriggerResult<usize> {
        let store = self.services.store.as_ref();
        let mut reg = self.registry()?;
        reg.names.clear();
        for handle in store.all_handles()? {
            let fetched = match store.fetch(handle) {
                Ok(f) => f,
                Err(e) => {
                    warn!(trigger = %handle, error = %e, "Skipping unreadable trigger record");
                    continue;
                }
            };
            if let Err(e) = reg.names.insert(&fetched.record.name, handle) {
                warn!(trigger = %handle, error = %e, "Skipping trigger with conflicting name");
            }
        }
        reg.initialized = true;
        let count = reg.names.len();
        info!(triggers = count, "Trigger manager initialized");
        Ok(count)
    }

    /// Drop every cache, deferred context and piece of transaction
    /// bookkeeping.
    pub fn finalize(&self) {
        let mut reg = self.registry_for_cleanup();
        *reg = Registry::default();
        info!("Trigger manager finalized");
    }

    /// Whether the engine has loaded its startup state.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.registry_for_cleanup().initialized
    }

    // ----- knobs -----

    /// Recursion limit in effect.
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth.load(Ordering::SeqCst)
    }

    /// Set the recursion limit, clamped to `1..=MAX_RECURSION_CEILING`.
    /// Returns the value in effect.
    pub fn set_max_depth(&self, depth: usize) -> usize {
        let depth = TriggerConfig::clamp_depth(depth);
        self.max_depth.store(depth, Ordering::SeqCst);
        depth
    }

    /// Current nesting level of trigger states (0 when idle).
    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Whether firing is globally enabled.
    #[must_use]
    pub fn firing_enabled(&self) -> bool {
        self.firing_enabled.load(Ordering::SeqCst)
    }

    /// Globally enable or disable firing. While disabled, prepare calls return `None`.
    pub fn set_firing_enabled(&self, enabled: bool) {
        self.firing_enabled.store(enabled, Ordering::SeqCst);
        debug!(enabled, "Trigger firing switched");
    }

    /// Name of the trigger that invalidated the running transaction.
    #[must_use]
    pub fn is_transaction_invalidated(&self) -> Option<String> {
        self.registry_for_cleanup().invalidated_by.clone()
    }

    /// Current sizes of the in-memory structures.
    ///
    /// # Errors
    /// Only on a poisoned registry.
    pub fn cache_stats(&self) -> TriggerResult<CacheStats> {
        let reg = self.registry()?;
        Ok(CacheStats {
            names: reg.names.len(),
            objects: reg.objects.len(),
            caches: reg.caches.len(),
            deferred: reg.deferred.len(),
            uncommitted: reg.uncommitted.len(),
        })
    }

    // ----- queries -----

    /// Handle of the trigger called `name` (case-insensitive).
    ///
    /// # Errors
    /// Only on a poisoned registry.
    pub fn find_by_name(&self, name: &str) -> TriggerResult<Option<ObjectHandle>> {
        Ok(self.registry()?.names.lookup(name))
    }

    /// Triggers registered for `event` on a class, an attribute of a class,
    /// or (without a class) on the current user. [`TriggerEvent::All`]
    /// selects every event of the target.
    ///
    /// # Errors
    /// `InvalidTarget` for a class event without a class; cache validation
    /// failures.
    pub fn find_for_event(
        &self,
        event: TriggerEvent,
        class: Option<ClassId>,
        attribute: Option<&str>,
        active_only: bool,
    ) -> TriggerResult<Vec<ObjectHandle>> {
        let key = match (class, attribute) {
            (Some(class), Some(attr)) => CacheKey::attribute(class, attr),
            (Some(class), None) => CacheKey::Class(class),
            (None, _) if event.is_class_event() => {
                return Err(DefinitionError::InvalidTarget {
                    event,
                    reason: "class events need a target class".to_string(),
                }
                .into())
            }
            (None, _) => CacheKey::User(self.services.auth.current_user()),
        };
        let loader = self.loader();
        let mut reg = self.registry()?;
        let Registry { objects, caches, .. } = &mut *reg;
        let cache = ensure_cache(caches, &key, loader.store)?;
        cache.validate(objects, loader).map_err(|e| self.escalate(e))?;
        let handles = cache
            .handles(event)
            .into_iter()
            .filter(|h| !active_only || objects.get(h).is_some_and(Trigger::is_active))
            .collect();
        Ok(handles)
    }

    /// Persistent state of one trigger, revalidated against the store.
    ///
    /// # Errors
    /// `TriggerNotFound` for unknown handles.
    pub fn describe(&self, handle: ObjectHandle) -> TriggerResult<TriggerInfo> {
        let loader = self.loader();
        let mut reg = self.registry()?;
        let trigger = reg.revalidate(handle, loader)?;
        Ok(TriggerInfo {
            handle,
            chn: trigger.chn(),
            record: trigger.to_record(),
        })
    }

    /// Names of the triggers the current user may see, sorted: their own,
    /// every trigger for a DBA, and triggers on classes they can SELECT.
    ///
    /// # Errors
    /// Store failures other than vanished records.
    pub fn list_triggers(&self) -> TriggerResult<Vec<String>> {
        let auth = self.services.auth.as_ref();
        let user = auth.current_user();
        let dba = auth.is_dba(user);
        let loader = self.loader();
        let mut reg = self.registry()?;
        let Registry { objects, names, .. } = &mut *reg;
        let mut visible = Vec::new();
        for handle in names.handles() {
            let trigger = match resolve(objects, handle, loader) {
                Ok(t) => t,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            let readable = dba
                || trigger.owner() == user
                || trigger
                    .class()
                    .is_some_and(|c| auth.has_privilege(user, c, Privilege::Select));
            if readable {
                visible.push(trigger.name().to_string());
            }
        }
        visible.sort_unstable_by_key(|n| n.to_lowercase());
        Ok(visible)
    }

    /// A class was deleted: drop its class and attribute caches and mark
    /// every trigger targeting it INVALID. Returns the invalidated handles.
    ///
    /// # Errors
    /// Store failures while enumerating triggers.
    pub fn on_class_deleted(&self, class: ClassId) -> TriggerResult<Vec<ObjectHandle>> {
        let loader = self.loader();
        let mut reg = self.registry()?;
        let Registry { objects, caches, .. } = &mut *reg;
        ensure_cache(caches, &CacheKey::Class(class), loader.store)?;

        let keys: Vec<CacheKey> = caches.keys().filter(|k| k.class() == Some(class)).cloned().collect();
        let mut invalidated = Vec::new();
        for key in keys {
            if let Some(cache) = caches.remove(&key) {
                invalidated.extend(cache.delete(class, objects, loader));
            }
        }

        // Attribute triggers whose cache was never built.
        for handle in loader.store.all_handles()? {
            if invalidated.contains(&handle) {
                continue;
            }
            let Ok(fetched) = loader.store.fetch(handle) else {
                continue;
            };
            if fetched.record.class != Some(class) || fetched.record.status == TriggerStatus::Invalid {
                continue;
            }
            if let Err(e) = resolve(objects, handle, loader) {
                warn!(trigger = %handle, error = %e, "Cannot load trigger of deleted class");
                continue;
            }
            objects.invalidate(handle, loader.store);
            invalidated.push(handle);
        }

        reg.status_changed();
        invalidated.sort_unstable();
        invalidated.dedup();
        info!(class = %class, invalidated = invalidated.len(), "Class deleted; triggers invalidated");
        Ok(invalidated)
    }
}

impl std::fmt::Debug for TriggerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerEngine")
            .field("config", &self.config)
            .field("max_depth", &self.max_depth())
            .field("depth", &self.current_depth())
            .field("firing_enabled", &self.firing_enabled())
            .finish_non_exhaustive()
    }
}
