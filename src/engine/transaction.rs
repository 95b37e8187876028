//! Transaction boundary hooks.
//!
//! The host calls these at commit, rollback, unilateral abort, lock
//! timeout and partial rollback. They drain or discard deferred activity,
//! fire the user's transaction triggers and reconcile the in-memory caches
//! with what the transaction leaves behind.

use tracing::{debug, info, warn};

use crate::error::{ExecutionError, TriggerResult};
use crate::host::StorageError;
use crate::trigger::TriggerEvent;

use super::TriggerEngine;

impl TriggerEngine {
    /// Drain deferred activity and fire COMMIT triggers.
    ///
    /// Fails without side effects when an INVALIDATE action already doomed
    /// the transaction. The invalidated flag is only reported here; it is
    /// cleared by [`Self::on_rollback`].
    ///
    /// # Errors
    /// `TransactionInvalidated`, or the first deferred/COMMIT activity
    /// failure. Either must make the host abort the commit.
    pub fn on_before_commit(&self) -> TriggerResult<()> {
        self.check_invalidated()?;
        let pending = self.pending_deferred()?;
        if pending > 0 {
            debug!(pending, "Draining deferred activity before commit");
        }
        self.drain_deferred().map_err(|e| self.escalate(e))?;
        self.fire_user_event(TriggerEvent::Commit)?;
        self.check_invalidated()
    }

    /// Forget the transaction's bookkeeping once the commit is durable.
    pub fn on_after_commit(&self) {
        let mut reg = self.registry_for_cleanup();
        reg.uncommitted.clear();
        reg.deferred.clear();
        reg.statement_stack.clear();
    }

    /// Fire ROLLBACK triggers, then discard triggers created in the
    /// transaction, every deferred activity and the invalidated flag.
    pub fn on_rollback(&self) {
        if let Err(e) = self.fire_user_event(TriggerEvent::Rollback) {
            warn!(error = %e, "ROLLBACK trigger failed");
        }
        self.discard_transaction("rollback");
    }

    /// A transaction was aborted from outside (deadlock victim, forced
    /// abort): fire ABORT triggers, then clean up as for a rollback.
    pub fn on_unilateral_abort(&self) {
        if let Err(e) = self.fire_user_event(TriggerEvent::Abort) {
            warn!(error = %e, "ABORT trigger failed");
        }
        self.discard_transaction("abort");
    }

    /// Fire TIMEOUT triggers after a lock wait timed out.
    ///
    /// # Errors
    /// The first TIMEOUT activity failure.
    pub fn on_lock_timeout(&self) -> TriggerResult<()> {
        self.fire_user_event(TriggerEvent::Timeout)
    }

    /// Discard deferred activity scheduled since savepoint `name`. Returns
    /// how many activities were dropped.
    ///
    /// # Errors
    /// Only on a poisoned registry.
    pub fn on_rollback_to_savepoint(&self, name: &str) -> TriggerResult<usize> {
        let dropped = self.registry()?.deferred.rollback_to(name);
        debug!(savepoint = name, dropped, "Rolled deferred activity back to savepoint");
        Ok(dropped)
    }

    fn check_invalidated(&self) -> TriggerResult<()> {
        match self.registry()?.invalidated_by.clone() {
            Some(trigger) => Err(ExecutionError::TransactionInvalidated { trigger }.into()),
            None => Ok(()),
        }
    }

    /// Fire a transaction event's BEFORE and AFTER phases back to back.
    fn fire_user_event(&self, event: TriggerEvent) -> TriggerResult<()> {
        let Some(mut state) = self.prepare_for_user_event(event)? else {
            return Ok(());
        };
        self.fire_before(&mut state, None, None)?;
        self.fire_after(&mut state, None, None)
    }

    fn discard_transaction(&self, reason: &str) {
        let store = self.services.store.as_ref();
        let mut reg = self.registry_for_cleanup();
        let created = std::mem::take(&mut reg.uncommitted);
        for handle in &created {
            reg.unlink(*handle);
            if let Some(trigger) = reg.objects.unmap(handle) {
                reg.names.remove(trigger.name(), *handle);
            }
            match store.delete(*handle) {
                Ok(()) | Err(StorageError::UnknownObject(_)) => {}
                Err(e) => warn!(trigger = %handle, error = %e, "Failed to delete rolled-back trigger"),
            }
        }
        let dropped = reg.deferred.len();
        reg.deferred.clear();
        reg.statement_stack.clear();
        reg.invalidated_by = None;
        info!(
            reason,
            txn = self.services.transactions.transaction_id(),
            discarded_triggers = created.len(),
            dropped_deferred = dropped,
            "Transaction discarded"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TriggerConfig;
    use crate::host::memory::InMemoryHost;
    use crate::host::Authorizer;
    use crate::ids::{ClassId, UserId};
    use crate::trigger::{ActionTime, ActivityKind, TriggerDefinition};

    fn setup() -> (InMemoryHost, TriggerEngine, ClassId) {
        let dba = UserId::from_name("dba");
        let host = InMemoryHost::new(dba);
        host.auth.add_dba(dba);
        let class = host.catalog.define_class("accounts", &["balance"]);
        let engine = TriggerEngine::new(host.services(), TriggerConfig::default());
        (host, engine, class)
    }

    fn user_trigger(name: &str, event: TriggerEvent) -> TriggerDefinition {
        TriggerDefinition::builder(name)
            .event(event)
            .action(ActivityKind::Print, ActionTime::After, name)
            .build()
            .unwrap()
    }

    #[test]
    fn commit_fires_commit_triggers() {
        let (host, engine, _) = setup();
        engine.create_trigger(user_trigger("on_commit", TriggerEvent::Commit)).unwrap();
        engine.create_trigger(user_trigger("on_rollback", TriggerEvent::Rollback)).unwrap();
        engine.on_before_commit().unwrap();
        engine.on_after_commit();
        assert_eq!(host.output.take(), vec!["on_commit"]);
        assert_eq!(engine.cache_stats().unwrap().uncommitted, 0);
    }

    #[test]
    fn rollback_discards_created_triggers() {
        let (host, engine, class) = setup();
        engine.create_trigger(user_trigger("on_rollback", TriggerEvent::Rollback)).unwrap();
        engine.on_after_commit();

        let h = engine
            .create_trigger(
                TriggerDefinition::builder("temp")
                    .event(TriggerEvent::Insert)
                    .class(class)
                    .action(ActivityKind::Print, ActionTime::After, "x")
                    .build()
                    .unwrap(),
            )
            .unwrap();
        assert!(engine.find_for_event(TriggerEvent::Insert, Some(class), None, false).unwrap().contains(&h));

        engine.on_rollback();
        assert_eq!(host.output.take(), vec!["on_rollback"]);
        assert_eq!(engine.find_by_name("temp").unwrap(), None);
        assert!(engine.find_for_event(TriggerEvent::Insert, Some(class), None, false).unwrap().is_empty());
        assert!(engine.describe(h).is_err());
        // The committed trigger survives.
        assert!(engine.find_by_name("on_rollback").unwrap().is_some());
    }

    #[test]
    fn unilateral_abort_fires_abort_triggers() {
        let (host, engine, _) = setup();
        engine.create_trigger(user_trigger("on_abort", TriggerEvent::Abort)).unwrap();
        engine.on_after_commit();
        engine.on_unilateral_abort();
        assert_eq!(host.output.take(), vec!["on_abort"]);
    }

    #[test]
    fn lock_timeout_fires_timeout_triggers() {
        let (host, engine, _) = setup();
        engine.create_trigger(user_trigger("on_timeout", TriggerEvent::Timeout)).unwrap();
        engine.on_lock_timeout().unwrap();
        assert_eq!(host.output.take(), vec!["on_timeout"]);
    }

    #[test]
    fn user_triggers_belong_to_their_owner() {
        let (host, engine, _) = setup();
        engine.create_trigger(user_trigger("on_commit", TriggerEvent::Commit)).unwrap();
        engine.on_after_commit();
        host.auth.set_current_user(UserId::from_name("someone_else"));
        engine.on_before_commit().unwrap();
        assert!(host.output.take().is_empty());
    }
}
