//! Administrative operations: create, drop, rename, status and priority.
//!
//! Each operation either completes fully or leaves the caches and the
//! store as they were.

use chrono::Utc;
use tracing::{info, warn};

use crate::cache::{CacheKey, Loader};
use crate::error::{DefinitionError, TriggerResult};
use crate::host::{FetchedRecord, Privilege, StorageError};
use crate::ids::ObjectHandle;
use crate::trigger::{
    validate_priority, Trigger, TriggerDefinition, TriggerRecord, TriggerStatus, MAX_TRIGGER_NAME_LEN,
};

use super::{resolve, Registry, TriggerEngine};

/// Cache key a trigger with these targets belongs to.
fn home_key(trigger: &Trigger) -> CacheKey {
    match (trigger.class(), trigger.attribute()) {
        (Some(class), Some(attr)) => CacheKey::attribute(class, attr),
        (Some(class), None) => CacheKey::Class(class),
        (None, _) => CacheKey::User(trigger.owner()),
    }
}

impl TriggerEngine {
    /// DBA, or ALTER on the trigger's class, or ownership of a user/INVALID
    /// trigger.
    fn authorize(&self, trigger: &Trigger, operation: &str) -> TriggerResult<()> {
        let auth = self.services.auth.as_ref();
        let user = auth.current_user();
        if auth.is_dba(user) {
            return Ok(());
        }
        let owner_may = trigger.owner() == user && (trigger.class().is_none() || trigger.status() == TriggerStatus::Invalid);
        let alter_may = trigger
            .class()
            .is_some_and(|c| auth.has_privilege(user, c, Privilege::Alter));
        if owner_may || alter_may {
            Ok(())
        } else {
            Err(DefinitionError::Unauthorized {
                operation: operation.to_string(),
                trigger: trigger.name().to_string(),
            }
            .into())
        }
    }

    /// Create and register a trigger. The current user becomes its owner.
    ///
    /// The activities are compiled before anything is persisted. When a
    /// later registration step fails every earlier one is undone.
    ///
    /// # Errors
    /// Definition errors (invalid definition, unknown class or attribute,
    /// missing ALTER privilege, duplicate name), compile errors and store
    /// failures.
    pub fn create_trigger(&self, def: TriggerDefinition) -> TriggerResult<ObjectHandle> {
        def.validate()?;
        let auth = self.services.auth.as_ref();
        let user = auth.current_user();

        if let Some(class) = def.class {
            let Some(class_name) = self.services.catalog.class_name(class) else {
                return Err(DefinitionError::UnknownClass {
                    class: class.to_string(),
                }
                .into());
            };
            if let Some(attribute) = &def.attribute {
                if !self.services.catalog.has_attribute(class, attribute) {
                    return Err(DefinitionError::UnknownAttribute {
                        class: class_name,
                        attribute: attribute.clone(),
                    }
                    .into());
                }
            }
            if !auth.is_dba(user) && !auth.has_privilege(user, class, Privilege::Alter) {
                return Err(DefinitionError::ClassAccessDenied { class: class_name }.into());
            }
        }

        let name = def.name.trim().to_string();
        if self.registry()?.names.contains(&name) {
            return Err(DefinitionError::DuplicateName { name }.into());
        }

        let record = TriggerRecord {
            name,
            owner: user,
            status: def.status,
            priority: def.priority,
            event: def.event,
            class: def.class,
            attribute: def.attribute,
            condition: def.condition,
            action: def.action,
            created_at: Utc::now(),
        };

        // Compile against a detached copy so syntax errors surface before
        // anything is persisted.
        let loader = self.loader();
        let mut probe = Trigger::from_fetched(ObjectHandle::new(), FetchedRecord { record: record.clone(), chn: 0 });
        probe.compile(loader.compiler, loader.style)?;

        let handle = loader.store.create(&record)?;
        let mut reg = self.registry()?;
        if let Err(e) = Self::register(&mut reg, handle, probe, loader) {
            Self::unregister(&mut reg, handle);
            drop(reg);
            if let Err(del) = loader.store.delete(handle) {
                warn!(trigger = %handle, error = %del, "Failed to delete half-created trigger");
            }
            return Err(self.escalate(e));
        }
        info!(trigger = %record.name, handle = %handle, event = %record.event, "Trigger created");
        Ok(handle)
    }

    fn register(reg: &mut Registry, handle: ObjectHandle, probe: Trigger, loader: Loader<'_>) -> TriggerResult<()> {
        let fetched = loader.store.fetch(handle)?;
        let mut trigger = Trigger::from_fetched(handle, fetched);
        // Keep the compiled forms built for the probe.
        trigger.condition = probe.condition;
        trigger.action = probe.action;

        reg.names.insert(trigger.name(), handle)?;
        let key = home_key(&trigger);
        let (event, priority) = (trigger.event(), trigger.priority());
        reg.objects.insert(trigger);
        if let Some(cache) = reg.caches.get_mut(&key) {
            cache.add(handle, event, priority)?;
        }
        reg.uncommitted.push(handle);
        Ok(())
    }

    fn unregister(reg: &mut Registry, handle: ObjectHandle) {
        reg.unlink(handle);
        reg.uncommitted.retain(|h| *h != handle);
        if let Some(trigger) = reg.objects.unmap(&handle) {
            reg.names.remove(trigger.name(), handle);
        }
    }

    /// Drop a trigger. Pending deferred activity of the trigger is purged
    /// first. A trigger that no longer exists counts as dropped.
    ///
    /// # Errors
    /// `Unauthorized`, store failures other than a vanished record.
    pub fn drop_trigger(&self, handle: ObjectHandle) -> TriggerResult<()> {
        let loader = self.loader();
        let mut reg = self.registry()?;
        let trigger = match resolve(&mut reg.objects, handle, loader) {
            Ok(t) => t,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        self.authorize(trigger, "drop")?;
        let name = trigger.name().to_string();

        let purged = reg.deferred.take_matching(Some(handle), None).len();
        Self::unregister(&mut reg, handle);
        match loader.store.delete(handle) {
            Ok(()) | Err(StorageError::UnknownObject(_)) => {}
            Err(e) => return Err(e.into()),
        }
        info!(trigger = %name, handle = %handle, purged_deferred = purged, "Trigger dropped");
        Ok(())
    }

    /// Rename a trigger.
    ///
    /// # Errors
    /// `EmptyName`, `NameTooLong`, `DuplicateName`, `Unauthorized`, store
    /// failures (the rename is reverted).
    pub fn rename_trigger(&self, handle: ObjectHandle, new_name: &str) -> TriggerResult<()> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(DefinitionError::EmptyName.into());
        }
        if new_name.len() > MAX_TRIGGER_NAME_LEN {
            return Err(DefinitionError::NameTooLong {
                name: new_name.to_string(),
                max_length: MAX_TRIGGER_NAME_LEN,
            }
            .into());
        }

        let loader = self.loader();
        let mut reg = self.registry()?;
        let trigger = reg.revalidate(handle, loader)?;
        self.authorize(trigger, "rename")?;
        let old_name = trigger.name().to_string();

        reg.names.rename(&old_name, new_name, handle)?;
        if let Some(t) = reg.objects.get_mut(&handle) {
            t.name = new_name.to_string();
        }
        if let Err(e) = reg.objects.persist(handle, loader.store) {
            if let Some(t) = reg.objects.get_mut(&handle) {
                t.name.clone_from(&old_name);
            }
            if let Err(revert) = reg.names.rename(new_name, &old_name, handle) {
                warn!(trigger = %handle, error = %revert, "Failed to restore trigger name");
            }
            return Err(e);
        }
        info!(trigger = %new_name, old_name = %old_name, "Trigger renamed");
        Ok(())
    }

    /// Switch a trigger between ACTIVE and INACTIVE.
    ///
    /// # Errors
    /// `InvalidStatus` for INVALID, `Unauthorized`, store failures.
    pub fn set_status(&self, handle: ObjectHandle, status: TriggerStatus) -> TriggerResult<()> {
        if status == TriggerStatus::Invalid {
            return Err(DefinitionError::InvalidStatus { status }.into());
        }
        let loader = self.loader();
        let mut reg = self.registry()?;
        let trigger = reg.revalidate(handle, loader)?;
        self.authorize(trigger, "alter")?;
        let previous = trigger.status();
        if previous == status {
            return Ok(());
        }
        trigger.status = status;
        let name = trigger.name().to_string();
        if let Err(e) = reg.objects.persist(handle, loader.store) {
            if let Some(t) = reg.objects.get_mut(&handle) {
                t.status = previous;
            }
            return Err(e);
        }
        reg.status_changed();
        info!(trigger = %name, from = %previous, to = %status, "Trigger status changed");
        Ok(())
    }

    /// Change a trigger's priority and re-sort every compiled cache.
    ///
    /// # Errors
    /// `InvalidPriority`, `Unauthorized`, store failures.
    pub fn set_priority(&self, handle: ObjectHandle, priority: f64) -> TriggerResult<()> {
        validate_priority(priority)?;
        let loader = self.loader();
        let mut reg = self.registry()?;
        let trigger = reg.revalidate(handle, loader)?;
        self.authorize(trigger, "alter")?;
        let previous = trigger.priority();
        trigger.priority = priority;
        let name = trigger.name().to_string();
        if let Err(e) = reg.objects.persist(handle, loader.store) {
            if let Some(t) = reg.objects.get_mut(&handle) {
                t.priority = previous;
            }
            return Err(e);
        }
        let resorted = reg.reinsert(handle, priority);
        info!(trigger = %name, from = previous, to = priority, caches = resorted, "Trigger priority changed");
        Ok(())
    }
}
