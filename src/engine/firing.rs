//! The firing protocol: prepare, BEFORE, AFTER, abort.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::{CacheKey, Triglist};
use crate::compile::correlation_names;
use crate::error::{ConsistencyError, DefinitionError, ExecutionError, TriggerResult};
use crate::host::{ActivationFrame, Authorizer, CompiledExpression};
use crate::ids::{ClassId, ObjectHandle, UserId};
use crate::trigger::{ActionTime, Activity, ActivityKind, Trigger, TriggerEvent};
use crate::value::{DbObject, DbValue};

use super::state::{DepthGuard, StatePhase, TriggerState};
use super::TriggerEngine;

/// What firing one entry at one time left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryOutcome {
    /// Nothing more to do for this trigger in this firing.
    Done,
    /// Work remains at a later time.
    Pending,
}

/// Copy of one activity taken under the registry lock.
struct ActivitySnapshot {
    kind: ActivityKind,
    time: ActionTime,
    source: Option<String>,
    compiled: Option<Arc<dyn CompiledExpression>>,
}

impl ActivitySnapshot {
    fn of(activity: &Activity) -> Self {
        Self {
            kind: activity.kind(),
            time: activity.time(),
            source: activity.source().map(str::to_string),
            compiled: activity.compiled(),
        }
    }
}

/// Everything needed to run a trigger without holding the lock.
struct TriggerSnapshot {
    name: String,
    owner: UserId,
    event: TriggerEvent,
    condition: Option<ActivitySnapshot>,
    action: Option<ActivitySnapshot>,
}

impl TriggerSnapshot {
    fn of(trigger: &Trigger) -> Self {
        Self {
            name: trigger.name().to_string(),
            owner: trigger.owner(),
            event: trigger.event(),
            condition: trigger.condition().map(ActivitySnapshot::of),
            action: trigger.action().map(ActivitySnapshot::of),
        }
    }
}

/// Runs an activity as the trigger's owner and switches back on drop.
struct OwnerGuard<'a> {
    auth: &'a dyn Authorizer,
    previous: UserId,
}

impl<'a> OwnerGuard<'a> {
    fn switch(auth: &'a dyn Authorizer, owner: UserId) -> Self {
        let previous = auth.set_current_user(owner);
        Self { auth, previous }
    }
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        self.auth.set_current_user(self.previous);
    }
}

/// Keeps a statement trigger on the recursion stack while it runs.
struct StatementFrame<'a> {
    engine: &'a TriggerEngine,
    handle: ObjectHandle,
}

impl Drop for StatementFrame<'_> {
    fn drop(&mut self) {
        let mut reg = self.engine.registry_for_cleanup();
        if let Some(i) = reg.statement_stack.iter().rposition(|h| *h == self.handle) {
            reg.statement_stack.remove(i);
        }
    }
}

impl TriggerEngine {
    /// Collect the triggers that fire for a class event and open a state at
    /// the next recursion level.
    ///
    /// Class-level triggers are merged first, then each listed attribute's
    /// triggers (UPDATE events only), so ties on priority fire in that
    /// order. Returns `None` when firing is disabled or nothing applies.
    ///
    /// # Errors
    /// `InvalidTarget` for non-class events, `RecursionLimit` when the
    /// nesting limit is reached, cache validation failures.
    pub fn prepare_for_class_event(
        &self,
        event: TriggerEvent,
        class: ClassId,
        attributes: &[&str],
    ) -> TriggerResult<Option<TriggerState>> {
        if !event.is_class_event() {
            return Err(DefinitionError::InvalidTarget {
                event,
                reason: "not a class event".to_string(),
            }
            .into());
        }
        if !self.firing_enabled() {
            return Ok(None);
        }
        let list = self
            .collect_class_triggers(event, class, attributes, None)
            .map_err(|e| self.escalate(e))?;
        self.open_state(event, list)
    }

    /// Open a state for a transaction event of the current user.
    ///
    /// # Errors
    /// `InvalidTarget` for non-user events, plus everything
    /// [`Self::prepare_for_class_event`] reports.
    pub fn prepare_for_user_event(&self, event: TriggerEvent) -> TriggerResult<Option<TriggerState>> {
        if !event.is_user_event() {
            return Err(DefinitionError::InvalidTarget {
                event,
                reason: "not a transaction event".to_string(),
            }
            .into());
        }
        if !self.firing_enabled() {
            return Ok(None);
        }
        let key = CacheKey::User(self.services.auth.current_user());
        let loader = self.loader();
        let list = self
            .registry()?
            .triglist_for(&key, event, loader)
            .map_err(|e| self.escalate(e))?;
        self.open_state(event, list)
    }

    /// Merge the triggers of another class into a prepared state without
    /// opening a new recursion level.
    ///
    /// # Errors
    /// `InvalidPhase` once BEFORE has fired.
    pub fn extend_state(&self, state: &mut TriggerState, class: ClassId, attributes: &[&str]) -> TriggerResult<()> {
        if state.phase != StatePhase::Prepared {
            return Err(ConsistencyError::InvalidPhase {
                phase: state.phase.as_str(),
                operation: "extend",
            }
            .into());
        }
        let more = self
            .collect_class_triggers(state.event, class, attributes, Some(&state.list))
            .map_err(|e| self.escalate(e))?;
        debug!(event = %state.event, added = more.len(), "Extended trigger state");
        state.list.merge(more);
        Ok(())
    }

    fn collect_class_triggers(
        &self,
        event: TriggerEvent,
        class: ClassId,
        attributes: &[&str],
        existing: Option<&Triglist>,
    ) -> TriggerResult<Triglist> {
        let loader = self.loader();
        let mut reg = self.registry()?;
        let mut merged = reg.triglist_for(&CacheKey::Class(class), event, loader)?;
        if event.allows_attribute() {
            for attribute in attributes {
                let mut list = reg.triglist_for(&CacheKey::attribute(class, attribute), event, loader)?;
                list.retain(|n| !merged.contains(n.trigger));
                merged.merge(list);
            }
        }
        if let Some(existing) = existing {
            merged.retain(|n| !existing.contains(n.trigger));
        }
        Ok(merged)
    }

    fn open_state(&self, event: TriggerEvent, list: Triglist) -> TriggerResult<Option<TriggerState>> {
        if list.is_empty() {
            return Ok(None);
        }
        let Some(guard) = DepthGuard::try_enter(&self.depth, self.max_depth()) else {
            return Err(self.recursion_error(list.get(0).map(|n| n.trigger)));
        };
        debug!(event = %event, level = guard.level(), pending = list.len(), "Prepared trigger state");
        Ok(Some(TriggerState::new(event, list, guard)))
    }

    /// Run everything due at BEFORE time.
    ///
    /// Entries with nothing left to do leave the state. On error the state
    /// is aborted and the error returned.
    ///
    /// # Errors
    /// `InvalidPhase` unless the state is freshly prepared; the first
    /// activity failure, including rejections.
    pub fn fire_before(
        &self,
        state: &mut TriggerState,
        current: Option<&DbObject>,
        temp: Option<&DbObject>,
    ) -> TriggerResult<()> {
        if state.phase != StatePhase::Prepared {
            return Err(ConsistencyError::InvalidPhase {
                phase: state.phase.as_str(),
                operation: "fire BEFORE",
            }
            .into());
        }
        if let Err(e) = self.run_phase(state, ActionTime::Before, current, temp) {
            state.abort();
            return Err(self.escalate(e));
        }
        state.phase = StatePhase::BeforeFired;
        Ok(())
    }

    /// Run everything due at AFTER time, queue what is left for DEFERRED
    /// execution and finish the state.
    ///
    /// # Errors
    /// `InvalidPhase` unless BEFORE has fired; the first activity failure.
    pub fn fire_after(
        &self,
        state: &mut TriggerState,
        current: Option<&DbObject>,
        temp: Option<&DbObject>,
    ) -> TriggerResult<()> {
        if state.phase != StatePhase::BeforeFired {
            return Err(ConsistencyError::InvalidPhase {
                phase: state.phase.as_str(),
                operation: "fire AFTER",
            }
            .into());
        }
        if let Err(e) = self.run_phase(state, ActionTime::After, current, temp) {
            state.abort();
            return Err(self.escalate(e));
        }

        let mut remaining = std::mem::take(&mut state.list);
        if !remaining.is_empty() {
            let target = current.or(temp).cloned();
            for node in remaining.iter_mut() {
                node.target.clone_from(&target);
                node.depth = state.level;
            }
            let savepoints = self.services.transactions.savepoints();
            debug!(
                event = %state.event,
                deferred = remaining.len(),
                savepoint = savepoints.last().map_or("", String::as_str),
                "Scheduled deferred activity"
            );
            match self.registry() {
                Ok(mut reg) => reg.deferred.schedule(remaining, savepoints),
                Err(e) => {
                    state.abort();
                    return Err(e);
                }
            }
        }
        state.finish();
        Ok(())
    }

    /// Discard the state's pending work and release its recursion level.
    pub fn abort_state(&self, state: &mut TriggerState) {
        if state.phase != StatePhase::Finished {
            debug!(event = %state.event, pending = state.pending(), "Aborted trigger state");
        }
        state.abort();
    }

    fn run_phase(
        &self,
        state: &mut TriggerState,
        time: ActionTime,
        current: Option<&DbObject>,
        temp: Option<&DbObject>,
    ) -> TriggerResult<()> {
        let mut i = 0;
        while let Some(node) = state.list.get(i) {
            let handle = node.trigger;
            match self.fire_entry(handle, time, current, temp, state.level)? {
                EntryOutcome::Done => {
                    state.list.remove_at(i);
                }
                EntryOutcome::Pending => i += 1,
            }
        }
        Ok(())
    }

    /// Run whatever part of one trigger is due at `time`.
    pub(crate) fn fire_entry(
        &self,
        handle: ObjectHandle,
        time: ActionTime,
        current: Option<&DbObject>,
        temp: Option<&DbObject>,
        level: usize,
    ) -> TriggerResult<EntryOutcome> {
        let Some(snapshot) = self.snapshot(handle)? else {
            return Ok(EntryOutcome::Done);
        };

        let _frame = if snapshot.event.is_statement_event() {
            let mut reg = self.registry()?;
            if reg.statement_stack.contains(&handle) {
                debug!(trigger = %snapshot.name, "Absorbed recursive statement trigger");
                return Ok(EntryOutcome::Done);
            }
            if reg.statement_stack.len() >= self.max_depth() {
                drop(reg);
                return Err(self.recursion_error(Some(handle)));
            }
            reg.statement_stack.push(handle);
            Some(StatementFrame { engine: self, handle })
        } else {
            None
        };

        if let Some(condition) = &snapshot.condition {
            if condition.time > time {
                return Ok(EntryOutcome::Pending);
            }
            if condition.time == time {
                let value = self.run_expression(&snapshot, condition, current, temp)?;
                self.record_execution(handle, true, level);
                if !value.coerce_to_bool() {
                    debug!(trigger = %snapshot.name, time = %time, "Condition false");
                    return Ok(EntryOutcome::Done);
                }
            }
        }

        match &snapshot.action {
            Some(action) if action.time == time => {
                self.run_action(handle, &snapshot, action, current, temp, level)?;
                Ok(EntryOutcome::Done)
            }
            Some(action) if action.time > time => Ok(EntryOutcome::Pending),
            _ => Ok(EntryOutcome::Done),
        }
    }

    /// Load and compile a trigger, returning `None` when it should not run.
    fn snapshot(&self, handle: ObjectHandle) -> TriggerResult<Option<TriggerSnapshot>> {
        let loader = self.loader();
        let mut reg = self.registry()?;
        let trigger = match reg.revalidate(handle, loader) {
            Ok(t) => t,
            Err(e) if e.is_not_found() => {
                debug!(trigger = %handle, "Skipping deleted trigger");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if !trigger.is_active() {
            return Ok(None);
        }
        if let Err(e) = trigger.compile(loader.compiler, loader.style) {
            warn!(trigger = %trigger.name(), error = %e, "Trigger invalidated: activity failed to compile");
            reg.objects.invalidate(handle, loader.store);
            reg.status_changed();
            return Ok(None);
        }
        Ok(Some(TriggerSnapshot::of(trigger)))
    }

    fn run_expression(
        &self,
        snapshot: &TriggerSnapshot,
        activity: &ActivitySnapshot,
        current: Option<&DbObject>,
        temp: Option<&DbObject>,
    ) -> TriggerResult<DbValue> {
        let Some(compiled) = activity.compiled.as_ref() else {
            return Err(ConsistencyError::Decoupled {
                trigger: snapshot.name.clone(),
                reason: format!("{} activity is not compiled", activity.time),
            }
            .into());
        };
        let names = correlation_names(snapshot.event, activity.time, self.config.correlation_style);
        let frame = ActivationFrame::new(self, &snapshot.name, names, current, temp);
        let _owner = OwnerGuard::switch(self.services.auth.as_ref(), snapshot.owner);
        compiled.execute(&frame).map_err(|e| e.in_trigger(&snapshot.name))
    }

    fn run_action(
        &self,
        handle: ObjectHandle,
        snapshot: &TriggerSnapshot,
        action: &ActivitySnapshot,
        current: Option<&DbObject>,
        temp: Option<&DbObject>,
        level: usize,
    ) -> TriggerResult<()> {
        match action.kind {
            ActivityKind::Reject => {
                info!(trigger = %snapshot.name, "Operation rejected by trigger");
                Err(ExecutionError::Rejected {
                    trigger: snapshot.name.clone(),
                }
                .into())
            }
            ActivityKind::Invalidate => {
                let mut reg = self.registry()?;
                if reg.invalidated_by.is_none() {
                    warn!(trigger = %snapshot.name, "Transaction invalidated by trigger");
                    reg.invalidated_by = Some(snapshot.name.clone());
                }
                Ok(())
            }
            ActivityKind::Print => {
                self.services.output.write_line(action.source.as_deref().unwrap_or_default());
                Ok(())
            }
            ActivityKind::Expression => {
                self.run_expression(snapshot, action, current, temp)?;
                self.record_execution(handle, false, level);
                Ok(())
            }
        }
    }

    /// Count an execution and recycle the compiled form at the threshold.
    fn record_execution(&self, handle: ObjectHandle, condition: bool, level: usize) {
        let mut reg = self.registry_for_cleanup();
        let Some(trigger) = reg.objects.get_mut(&handle) else {
            return;
        };
        let name = trigger.name().to_string();
        let activity = if condition {
            trigger.condition.as_mut()
        } else {
            trigger.action.as_mut()
        };
        let recycled = activity.is_some_and(|a| a.record_execution(self.config.recompile_threshold, level == 1));
        if recycled {
            debug!(trigger = %name, "Recycled compiled activity");
        }
    }
}
