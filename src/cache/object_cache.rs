//! Handle -> trigger cache with change-number revalidation.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use tracing::{debug, warn};

use crate::compile::CorrelationStyle;
use crate::error::{ExecutionError, TriggerError, TriggerResult};
use crate::host::{ExpressionCompiler, ObjectStore, StorageError};
use crate::ids::ObjectHandle;
use crate::trigger::{Trigger, TriggerStatus};

/// What the caches need to bring a trigger into memory.
#[derive(Clone, Copy)]
pub(crate) struct Loader<'a> {
    pub store: &'a dyn ObjectStore,
    pub compiler: &'a dyn ExpressionCompiler,
    pub style: CorrelationStyle,
}

fn not_found(handle: ObjectHandle, err: StorageError) -> TriggerError {
    match err {
        StorageError::UnknownObject(_) => ExecutionError::TriggerNotFound {
            name: handle.to_string(),
        }
        .into(),
        other => other.into(),
    }
}

/// At most one in-memory [`Trigger`] per persistent handle.
#[derive(Debug, Default)]
pub struct ObjectCache {
    triggers: HashMap<ObjectHandle, Trigger>,
}

impl ObjectCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached trigger, without consulting the store.
    #[must_use]
    pub fn get(&self, handle: &ObjectHandle) -> Option<&Trigger> {
        self.triggers.get(handle)
    }

    pub(crate) fn get_mut(&mut self, handle: &ObjectHandle) -> Option<&mut Trigger> {
        self.triggers.get_mut(handle)
    }

    /// Whether present.
    #[must_use]
    pub fn contains(&self, handle: &ObjectHandle) -> bool {
        self.triggers.contains_key(handle)
    }

    /// Number of cached triggers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    /// Whether empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Cached triggers in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Trigger> {
        self.triggers.values()
    }

    /// Add a freshly created trigger.
    pub(crate) fn insert(&mut self, trigger: Trigger) {
        self.triggers.insert(trigger.handle(), trigger);
    }

    /// Return the cached trigger, loading it on a miss.
    ///
    /// With `fetch` set a cached trigger is revalidated against the store
    /// and rebuilt when its change number moved. Compile failures leave the
    /// trigger cached as INVALID and are returned.
    pub(crate) fn map(
        &mut self,
        handle: ObjectHandle,
        fetch: bool,
        loader: Loader<'_>,
    ) -> TriggerResult<&mut Trigger> {
        match self.triggers.entry(handle) {
            Entry::Occupied(slot) => {
                let trigger = slot.into_mut();
                if fetch {
                    let fetched = loader.store.fetch(handle).map_err(|e| not_found(handle, e))?;
                    match trigger.refresh_if_stale(fetched, loader.compiler, loader.style) {
                        Ok(true) => debug!(trigger = %trigger.name(), chn = trigger.chn(), "Trigger refreshed"),
                        Ok(false) => {}
                        Err(e) => {
                            warn!(trigger = %trigger.name(), error = %e, "Trigger invalidated on refresh");
                            return Err(e.into());
                        }
                    }
                }
                Ok(trigger)
            }
            Entry::Vacant(slot) => {
                let fetched = loader.store.fetch(handle).map_err(|e| not_found(handle, e))?;
                let trigger = slot.insert(Trigger::from_fetched(handle, fetched));
                if trigger.status() != TriggerStatus::Invalid {
                    if let Err(e) = trigger.compile(loader.compiler, loader.style) {
                        trigger.status = TriggerStatus::Invalid;
                        warn!(trigger = %trigger.name(), error = %e, "Trigger failed to compile on load");
                        return Err(e.into());
                    }
                }
                Ok(trigger)
            }
        }
    }

    /// Forget a trigger.
    pub(crate) fn unmap(&mut self, handle: &ObjectHandle) -> Option<Trigger> {
        self.triggers.remove(handle)
    }

    /// Write a cached trigger back to the store and adopt the new change
    /// number.
    pub(crate) fn persist(&mut self, handle: ObjectHandle, store: &dyn ObjectStore) -> TriggerResult<()> {
        let trigger = self
            .triggers
            .get_mut(&handle)
            .ok_or_else(|| ExecutionError::TriggerNotFound {
                name: handle.to_string(),
            })?;
        trigger.chn = store.update(handle, &trigger.to_record())?;
        Ok(())
    }

    /// Mark a trigger INVALID and persist it, logging instead of failing.
    pub(crate) fn invalidate(&mut self, handle: ObjectHandle, store: &dyn ObjectStore) {
        let Some(trigger) = self.triggers.get_mut(&handle) else {
            return;
        };
        trigger.status = TriggerStatus::Invalid;
        let name = trigger.name().to_string();
        if let Err(e) = self.persist(handle, store) {
            warn!(trigger = %name, error = %e, "Failed to persist INVALID status");
        }
    }

    /// Drop every cached trigger.
    pub fn clear(&mut self) {
        self.triggers.clear();
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::expr::ReferenceCompiler;
    use crate::host::memory::InMemoryObjectStore;
    use crate::ids::{ClassId, UserId};
    use crate::trigger::{ActionTime, ActivityKind, ActivityRecord, TriggerEvent, TriggerRecord};

    fn record(cond: &str) -> TriggerRecord {
        TriggerRecord {
            name: "audit".into(),
            owner: UserId::from_name("dba"),
            status: TriggerStatus::Active,
            priority: 1.0,
            event: TriggerEvent::Update,
            class: Some(ClassId::new()),
            attribute: None,
            condition: Some(ActivityRecord {
                kind: ActivityKind::Expression,
                time: ActionTime::Before,
                source: Some(cond.into()),
            }),
            action: Some(ActivityRecord {
                kind: ActivityKind::Print,
                time: ActionTime::After,
                source: Some("hello".into()),
            }),
            created_at: Utc::now(),
        }
    }

    fn loader<'a>(store: &'a InMemoryObjectStore, compiler: &'a ReferenceCompiler) -> Loader<'a> {
        Loader {
            store,
            compiler,
            style: CorrelationStyle::Paired,
        }
    }

    #[test]
    fn map_loads_once_and_refreshes_on_chn_change() {
        let store = InMemoryObjectStore::new();
        let compiler = ReferenceCompiler::new();
        let h = store.create(&record("new.qty > 1")).unwrap();
        let mut cache = ObjectCache::new();

        let t = cache.map(h, false, loader(&store, &compiler)).unwrap();
        assert!(t.condition().unwrap().is_compiled());
        let chn = t.chn();

        let mut changed = record("new.qty > 2");
        changed.priority = 9.0;
        store.update(h, &changed).unwrap();

        // Without fetch the stale copy is served.
        assert_eq!(cache.map(h, false, loader(&store, &compiler)).unwrap().chn(), chn);
        let t = cache.map(h, true, loader(&store, &compiler)).unwrap();
        assert!(t.chn() > chn);
        assert!((t.priority() - 9.0).abs() < f64::EPSILON);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn missing_handle_is_not_found() {
        let store = InMemoryObjectStore::new();
        let compiler = ReferenceCompiler::new();
        let mut cache = ObjectCache::new();
        let err = cache.map(ObjectHandle::new(), true, loader(&store, &compiler)).unwrap_err();
        assert!(err.is_not_found());
        assert!(cache.is_empty());
    }

    #[test]
    fn compile_failure_leaves_invalid_trigger_cached() {
        let store = InMemoryObjectStore::new();
        let compiler = ReferenceCompiler::new();
        let h = store.create(&record("new.qty >")).unwrap();
        let mut cache = ObjectCache::new();
        let err = cache.map(h, true, loader(&store, &compiler)).unwrap_err();
        assert!(err.is_compile());
        assert_eq!(cache.get(&h).unwrap().status(), TriggerStatus::Invalid);
    }

    #[test]
    fn invalidate_persists_status() {
        let store = InMemoryObjectStore::new();
        let compiler = ReferenceCompiler::new();
        let h = store.create(&record("true")).unwrap();
        let mut cache = ObjectCache::new();
        cache.map(h, false, loader(&store, &compiler)).unwrap();
        cache.invalidate(h, &store);
        assert_eq!(store.fetch(h).unwrap().record.status, TriggerStatus::Invalid);
        // The cached copy adopted the new change number, so a fetch is a no-op.
        let t = cache.map(h, true, loader(&store, &compiler)).unwrap();
        assert_eq!(t.status(), TriggerStatus::Invalid);
    }
}
