//! Per-class, per-attribute and per-user trigger caches.
//!
//! A cache starts out holding only the raw handles the store reported for
//! its root. Validation maps every handle through the object cache, drops
//! the ones that no longer exist and sorts the rest into one triglist per
//! event. Until then none of its triglists are visible.

use tracing::{debug, warn};

use crate::error::{ConsistencyError, TriggerError, TriggerResult};
use crate::ids::{ClassId, ObjectHandle, UserId};
use crate::trigger::TriggerEvent;

use super::object_cache::{Loader, ObjectCache};
use super::triglist::Triglist;

const CLASS_EVENTS: [TriggerEvent; 8] = [
    TriggerEvent::Update,
    TriggerEvent::StatementUpdate,
    TriggerEvent::Delete,
    TriggerEvent::StatementDelete,
    TriggerEvent::Insert,
    TriggerEvent::StatementInsert,
    TriggerEvent::Alter,
    TriggerEvent::Drop,
];

const ATTRIBUTE_EVENTS: [TriggerEvent; 2] = [TriggerEvent::Update, TriggerEvent::StatementUpdate];

const USER_EVENTS: [TriggerEvent; 4] = [
    TriggerEvent::Commit,
    TriggerEvent::Rollback,
    TriggerEvent::Abort,
    TriggerEvent::Timeout,
];

/// What a cache is rooted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheScope {
    /// Rooted on a class.
    Class,
    /// Rooted on one attribute of a class.
    Attribute,
    /// Rooted on a user; holds COMMIT, ROLLBACK, ABORT and TIMEOUT triggers.
    User,
}

impl CacheScope {
    /// Events with a slot in caches of this scope, in slot order.
    #[must_use]
    pub const fn events(self) -> &'static [TriggerEvent] {
        match self {
            Self::Class => &CLASS_EVENTS,
            Self::Attribute => &ATTRIBUTE_EVENTS,
            Self::User => &USER_EVENTS,
        }
    }

    /// Slot of `event` in caches of this scope.
    #[must_use]
    pub fn slot(self, event: TriggerEvent) -> Option<usize> {
        self.events().iter().position(|e| *e == event)
    }
}

/// Registry key of a schema or user cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Class-level triggers of a class.
    Class(ClassId),
    /// Attribute names are stored lowercased.
    Attribute(ClassId, String),
    /// User triggers owned by a user.
    User(UserId),
}

impl CacheKey {
    /// Key of an attribute cache, lowercasing the attribute.
    #[must_use]
    pub fn attribute(class: ClassId, attribute: &str) -> Self {
        Self::Attribute(class, attribute.to_lowercase())
    }

    /// Scope this key selects.
    #[must_use]
    pub const fn scope(&self) -> CacheScope {
        match self {
            Self::Class(_) => CacheScope::Class,
            Self::Attribute(..) => CacheScope::Attribute,
            Self::User(_) => CacheScope::User,
        }
    }

    /// Target class, if any.
    #[must_use]
    pub const fn class(&self) -> Option<ClassId> {
        match self {
            Self::Class(c) | Self::Attribute(c, _) => Some(*c),
            Self::User(_) => None,
        }
    }
}

/// Triggers of one class, attribute or user, grouped by event.
#[derive(Debug, Clone)]
pub struct SchemaCache {
    scope: CacheScope,
    slots: Vec<Triglist>,
    raw: Vec<ObjectHandle>,
    compiled: bool,
    has_active: Option<bool>,
}

impl SchemaCache {
    /// Empty, uncompiled cache.
    #[must_use]
    pub fn new(scope: CacheScope) -> Self {
        Self::with_handles(scope, Vec::new())
    }

    /// An unvalidated cache over the given handles.
    #[must_use]
    pub fn with_handles(scope: CacheScope, raw: Vec<ObjectHandle>) -> Self {
        Self {
            scope,
            slots: vec![Triglist::new(); scope.events().len()],
            raw,
            compiled: false,
            has_active: None,
        }
    }

    /// Scope of this cache.
    #[must_use]
    pub const fn scope(&self) -> CacheScope {
        self.scope
    }

    /// Whether the triglists have been built from the raw handles.
    #[must_use]
    pub const fn is_compiled(&self) -> bool {
        self.compiled
    }

    /// Handles of every trigger targeting this cache, compiled or not.
    #[must_use]
    pub fn raw_handles(&self) -> &[ObjectHandle] {
        &self.raw
    }

    /// Whether `handle` targets this cache.
    #[must_use]
    pub fn contains(&self, handle: ObjectHandle) -> bool {
        self.raw.contains(&handle)
    }

    /// `false` only when a previous scan found no active trigger and nothing
    /// has changed since.
    #[must_use]
    pub fn may_have_active(&self) -> bool {
        self.has_active != Some(false)
    }

    /// Triglist for one event, once validated.
    #[must_use]
    pub fn triglist(&self, event: TriggerEvent) -> Option<&Triglist> {
        if !self.compiled {
            return None;
        }
        self.scope.slot(event).map(|i| &self.slots[i])
    }

    /// Handles for `event` (or every event for [`TriggerEvent::All`]).
    ///
    /// Before validation this is the unfiltered raw list.
    #[must_use]
    pub fn handles(&self, event: TriggerEvent) -> Vec<ObjectHandle> {
        if !self.compiled {
            return self.raw.clone();
        }
        if event == TriggerEvent::All {
            return self.slots.iter().flat_map(Triglist::handles).collect();
        }
        self.triglist(event)
            .map(|l| l.handles().collect())
            .unwrap_or_default()
    }

    /// Forget the memoized active flag.
    pub(crate) fn invalidate_active(&mut self) {
        self.has_active = None;
    }

    fn slot_for(&self, event: TriggerEvent) -> TriggerResult<usize> {
        self.scope.slot(event).ok_or_else(|| {
            ConsistencyError::CorruptCache {
                reason: format!("{event} trigger in a {:?} cache", self.scope),
            }
            .into()
        })
    }

    /// Register a trigger. Compiled caches also slot it right away.
    pub(crate) fn add(&mut self, handle: ObjectHandle, event: TriggerEvent, priority: f64) -> TriggerResult<()> {
        let slot = self.slot_for(event)?;
        if !self.raw.contains(&handle) {
            self.raw.push(handle);
        }
        if self.compiled && !self.slots[slot].contains(handle) {
            self.slots[slot].insert(handle, priority);
        }
        self.has_active = None;
        Ok(())
    }

    /// Unregister a trigger from every slot.
    pub(crate) fn remove(&mut self, handle: ObjectHandle) -> bool {
        let before = self.raw.len();
        self.raw.retain(|h| *h != handle);
        for slot in &mut self.slots {
            slot.remove(handle);
        }
        self.has_active = None;
        self.raw.len() != before
    }

    /// Re-sort a trigger after a priority change.
    pub(crate) fn reinsert(&mut self, handle: ObjectHandle, priority: f64) -> bool {
        self.slots
            .iter_mut()
            .fold(false, |found, slot| slot.reinsert(handle, priority) || found)
    }

    /// Bring the cache into its compiled form. Idempotent.
    pub(crate) fn validate(&mut self, objects: &mut ObjectCache, loader: Loader<'_>) -> TriggerResult<()> {
        if self.compiled {
            return Ok(());
        }
        let mut slots = vec![Triglist::new(); self.scope.events().len()];
        let mut kept = Vec::with_capacity(self.raw.len());
        for handle in &self.raw {
            match objects.map(*handle, true, loader) {
                Ok(_) | Err(TriggerError::Compile(_)) => {}
                Err(e) if e.is_not_found() => {
                    debug!(trigger = %handle, "Dropping deleted trigger from cache");
                    continue;
                }
                Err(e) => return Err(e),
            }
            let Some(trigger) = objects.get(handle) else {
                continue;
            };
            let slot = self.slot_for(trigger.event())?;
            slots[slot].insert(*handle, trigger.priority());
            kept.push(*handle);
        }
        self.slots = slots;
        self.raw = kept;
        self.compiled = true;
        self.has_active = None;
        Ok(())
    }

    /// Validate, then report `(any active trigger, any active trigger for
    /// event)`.
    pub(crate) fn active(
        &mut self,
        event: TriggerEvent,
        objects: &mut ObjectCache,
        loader: Loader<'_>,
    ) -> TriggerResult<(bool, bool)> {
        self.validate(objects, loader)?;
        let is_active = |h: ObjectHandle| objects.get(&h).is_some_and(|t| t.is_active());
        let any = self.slots.iter().any(|s| s.handles().any(is_active));
        let for_event = if event == TriggerEvent::All {
            any
        } else {
            self.scope
                .slot(event)
                .is_some_and(|i| self.slots[i].handles().any(is_active))
        };
        self.has_active = Some(any);
        Ok((any, for_event))
    }

    /// Invalidate every cached trigger targeting `class` (persisting the
    /// INVALID status where possible) and consume the cache.
    pub(crate) fn delete(
        self,
        class: ClassId,
        objects: &mut ObjectCache,
        loader: Loader<'_>,
    ) -> Vec<ObjectHandle> {
        let mut invalidated = Vec::new();
        for handle in self.raw {
            let targets_class = match objects.map(handle, false, loader) {
                Ok(t) => t.class() == Some(class),
                Err(e) if e.is_compile() => objects.get(&handle).is_some_and(|t| t.class() == Some(class)),
                Err(e) => {
                    warn!(trigger = %handle, error = %e, "Skipping trigger while deleting class cache");
                    false
                }
            };
            if targets_class {
                objects.invalidate(handle, loader.store);
                invalidated.push(handle);
            }
        }
        invalidated
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::compile::CorrelationStyle;
    use crate::expr::ReferenceCompiler;
    use crate::host::memory::InMemoryObjectStore;
    use crate::host::ObjectStore;
    use crate::trigger::{ActionTime, ActivityKind, ActivityRecord, TriggerRecord, TriggerStatus};

    fn record(name: &str, event: TriggerEvent, class: ClassId, priority: f64, status: TriggerStatus) -> TriggerRecord {
        TriggerRecord {
            name: name.into(),
            owner: UserId::from_name("dba"),
            status,
            priority,
            event,
            class: Some(class),
            attribute: None,
            condition: None,
            action: Some(ActivityRecord {
                kind: ActivityKind::Print,
                time: ActionTime::After,
                source: Some(name.into()),
            }),
            created_at: Utc::now(),
        }
    }

    struct Fixture {
        store: InMemoryObjectStore,
        compiler: ReferenceCompiler,
        objects: ObjectCache,
        class: ClassId,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: InMemoryObjectStore::new(),
                compiler: ReferenceCompiler::new(),
                objects: ObjectCache::new(),
                class: ClassId::new(),
            }
        }

        fn create(&self, name: &str, event: TriggerEvent, priority: f64, status: TriggerStatus) -> ObjectHandle {
            self.store
                .create(&record(name, event, self.class, priority, status))
                .unwrap()
        }
    }

    #[test]
    fn validate_sorts_triggers_into_event_slots() {
        let mut fx = Fixture::new();
        let a = fx.create("a", TriggerEvent::Update, 1.0, TriggerStatus::Active);
        let b = fx.create("b", TriggerEvent::Update, 5.0, TriggerStatus::Active);
        let c = fx.create("c", TriggerEvent::Insert, 0.0, TriggerStatus::Active);
        let mut cache = SchemaCache::with_handles(CacheScope::Class, vec![a, b, c]);
        assert!(cache.triglist(TriggerEvent::Update).is_none());

        let loader = Loader { store: &fx.store, compiler: &fx.compiler, style: CorrelationStyle::Paired };
        cache.validate(&mut fx.objects, loader).unwrap();
        assert!(cache.is_compiled());
        let update: Vec<_> = cache.triglist(TriggerEvent::Update).unwrap().handles().collect();
        assert_eq!(update, vec![b, a]);
        assert_eq!(cache.handles(TriggerEvent::Insert), vec![c]);
        assert_eq!(cache.handles(TriggerEvent::All).len(), 3);
        // Idempotent.
        cache.validate(&mut fx.objects, loader).unwrap();
        assert_eq!(cache.handles(TriggerEvent::All).len(), 3);
    }

    #[test]
    fn validate_drops_deleted_handles() {
        let mut fx = Fixture::new();
        let a = fx.create("a", TriggerEvent::Delete, 1.0, TriggerStatus::Active);
        let gone = fx.create("gone", TriggerEvent::Delete, 1.0, TriggerStatus::Active);
        fx.store.delete(gone).unwrap();
        let mut cache = SchemaCache::with_handles(CacheScope::Class, vec![a, gone]);
        let loader = Loader { store: &fx.store, compiler: &fx.compiler, style: CorrelationStyle::Paired };
        cache.validate(&mut fx.objects, loader).unwrap();
        assert_eq!(cache.raw_handles(), &[a]);
    }

    #[test]
    fn active_reports_any_and_per_event() {
        let mut fx = Fixture::new();
        let a = fx.create("a", TriggerEvent::Update, 1.0, TriggerStatus::Inactive);
        let b = fx.create("b", TriggerEvent::Delete, 1.0, TriggerStatus::Active);
        let mut cache = SchemaCache::with_handles(CacheScope::Class, vec![a, b]);
        let loader = Loader { store: &fx.store, compiler: &fx.compiler, style: CorrelationStyle::Paired };
        assert_eq!(cache.active(TriggerEvent::Update, &mut fx.objects, loader).unwrap(), (true, false));
        assert_eq!(cache.active(TriggerEvent::Delete, &mut fx.objects, loader).unwrap(), (true, true));
        assert_eq!(cache.active(TriggerEvent::All, &mut fx.objects, loader).unwrap(), (true, true));
        assert!(cache.may_have_active());
    }

    #[test]
    fn user_event_in_class_cache_is_corruption() {
        let mut fx = Fixture::new();
        let mut rec = record("u", TriggerEvent::Commit, fx.class, 0.0, TriggerStatus::Active);
        rec.class = None;
        let h = fx.store.create(&rec).unwrap();
        let mut cache = SchemaCache::with_handles(CacheScope::Class, vec![h]);
        let loader = Loader { store: &fx.store, compiler: &fx.compiler, style: CorrelationStyle::Paired };
        let err = cache.validate(&mut fx.objects, loader).unwrap_err();
        assert!(err.is_severe());
    }

    #[test]
    fn add_remove_and_reinsert_keep_order() {
        let mut fx = Fixture::new();
        let a = fx.create("a", TriggerEvent::Update, 1.0, TriggerStatus::Active);
        let mut cache = SchemaCache::with_handles(CacheScope::Class, vec![a]);
        let loader = Loader { store: &fx.store, compiler: &fx.compiler, style: CorrelationStyle::Paired };
        cache.validate(&mut fx.objects, loader).unwrap();

        let b = ObjectHandle::new();
        cache.add(b, TriggerEvent::Update, 3.0).unwrap();
        assert_eq!(cache.handles(TriggerEvent::Update), vec![b, a]);
        assert!(cache.reinsert(a, 7.0));
        assert_eq!(cache.handles(TriggerEvent::Update), vec![a, b]);
        assert!(cache.remove(b));
        assert!(!cache.contains(b));
        assert!(cache.add(b, TriggerEvent::Commit, 0.0).is_err());
    }

    #[test]
    fn delete_invalidates_class_triggers() {
        let mut fx = Fixture::new();
        let a = fx.create("a", TriggerEvent::Update, 1.0, TriggerStatus::Active);
        let cache = SchemaCache::with_handles(CacheScope::Class, vec![a]);
        let loader = Loader { store: &fx.store, compiler: &fx.compiler, style: CorrelationStyle::Paired };
        let invalidated = cache.delete(fx.class, &mut fx.objects, loader);
        assert_eq!(invalidated, vec![a]);
        assert_eq!(fx.store.fetch(a).unwrap().record.status, TriggerStatus::Invalid);
    }
}
