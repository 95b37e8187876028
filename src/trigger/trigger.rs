//! In-memory trigger.

use chrono::{DateTime, Utc};

use crate::compile::{compile_activity, CorrelationStyle};
use crate::error::CompileError;
use crate::host::{ExpressionCompiler, FetchedRecord};
use crate::ids::{ChangeNumber, ClassId, ObjectHandle, UserId};

use super::activity::Activity;
use super::event::{TriggerEvent, TriggerStatus};
use super::record::TriggerRecord;

/// The cached, in-memory form of a persisted trigger definition.
///
/// Owns its condition and action. Triglists and caches refer to it by
/// handle only.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub(crate) handle: ObjectHandle,
    pub(crate) chn: ChangeNumber,
    pub(crate) name: String,
    pub(crate) owner: UserId,
    pub(crate) status: TriggerStatus,
    pub(crate) priority: f64,
    pub(crate) event: TriggerEvent,
    pub(crate) class: Option<ClassId>,
    pub(crate) attribute: Option<String>,
    pub(crate) condition: Option<Activity>,
    pub(crate) action: Option<Activity>,
    pub(crate) created_at: DateTime<Utc>,
}

impl Trigger {
    /// Build from a fetched record. Activities are compiled lazily.
    #[must_use]
    pub fn from_fetched(handle: ObjectHandle, fetched: FetchedRecord) -> Self {
        let FetchedRecord { record, chn } = fetched;
        Self {
            handle,
            chn,
            name: record.name,
            owner: record.owner,
            status: record.status,
            priority: record.priority,
            event: record.event,
            class: record.class,
            attribute: record.attribute,
            condition: record.condition.as_ref().map(Activity::from_record),
            action: record.action.as_ref().map(Activity::from_record),
            created_at: record.created_at,
        }
    }

    /// Persistent form of the current state.
    #[must_use]
    pub fn to_record(&self) -> TriggerRecord {
        TriggerRecord {
            name: self.name.clone(),
            owner: self.owner,
            status: self.status,
            priority: self.priority,
            event: self.event,
            class: self.class,
            attribute: self.attribute.clone(),
            condition: self.condition.as_ref().map(Activity::to_record),
            action: self.action.as_ref().map(Activity::to_record),
            created_at: self.created_at,
        }
    }

    /// Handle.
    #[must_use]
    pub const fn handle(&self) -> ObjectHandle {
        self.handle
    }

    /// Change number of the record this copy was built from.
    #[must_use]
    pub const fn chn(&self) -> ChangeNumber {
        self.chn
    }

    /// Name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owner.
    #[must_use]
    pub const fn owner(&self) -> UserId {
        self.owner
    }

    /// Status.
    #[must_use]
    pub const fn status(&self) -> TriggerStatus {
        self.status
    }

    /// Priority.
    #[must_use]
    pub const fn priority(&self) -> f64 {
        self.priority
    }

    /// Event.
    #[must_use]
    pub const fn event(&self) -> TriggerEvent {
        self.event
    }

    /// Target class, `None` for user triggers.
    #[must_use]
    pub const fn class(&self) -> Option<ClassId> {
        self.class
    }

    /// Target attribute, lowercased.
    #[must_use]
    pub fn attribute(&self) -> Option<&str> {
        self.attribute.as_deref()
    }

    /// Condition.
    #[must_use]
    pub const fn condition(&self) -> Option<&Activity> {
        self.condition.as_ref()
    }

    /// Action.
    #[must_use]
    pub const fn action(&self) -> Option<&Activity> {
        self.action.as_ref()
    }

    /// ACTIVE status.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == TriggerStatus::Active
    }

    /// Compile whichever activities are not compiled yet.
    ///
    /// # Errors
    /// The first compile error. The caller decides whether that invalidates
    /// the trigger.
    pub fn compile(
        &mut self,
        compiler: &dyn ExpressionCompiler,
        style: CorrelationStyle,
    ) -> Result<(), CompileError> {
        let event = self.event;
        if let Some(cond) = self.condition.as_mut() {
            if !cond.is_compiled() {
                let compiled = compile_activity(event, cond, true, compiler, style)?;
                cond.set_compiled(compiled);
            }
        }
        if let Some(action) = self.action.as_mut() {
            if action.kind().is_compiled() && !action.is_compiled() {
                let compiled = compile_activity(event, action, false, compiler, style)?;
                action.set_compiled(compiled);
            }
        }
        Ok(())
    }

    /// Revalidate against a freshly fetched record.
    ///
    /// When the record's change number differs from the cached one, every
    /// persistent field is re-read and both activities are recompiled; a
    /// compile failure marks the trigger INVALID and is returned. Returns
    /// `Ok(true)` when a refresh happened.
    ///
    /// # Errors
    /// The compile error that invalidated the trigger.
    pub fn refresh_if_stale(
        &mut self,
        fetched: FetchedRecord,
        compiler: &dyn ExpressionCompiler,
        style: CorrelationStyle,
    ) -> Result<bool, CompileError> {
        if fetched.chn == self.chn {
            return Ok(false);
        }
        *self = Self::from_fetched(self.handle, fetched);
        if let Err(e) = self.compile(compiler, style) {
            self.status = TriggerStatus::Invalid;
            return Err(e);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::compile::CorrelationNames;
    use crate::error::TriggerResult;
    use crate::host::{ActivationFrame, CompiledExpression, NameReference};
    use crate::trigger::{ActionTime, ActivityKind, ActivityRecord};
    use crate::value::DbValue;

    #[derive(Debug)]
    struct Nothing;

    impl CompiledExpression for Nothing {
        fn references(&self) -> Vec<NameReference> {
            Vec::new()
        }

        fn execute(&self, _frame: &ActivationFrame<'_>) -> TriggerResult<DbValue> {
            Ok(DbValue::Null)
        }
    }

    /// Fails on any source containing "bad".
    struct PickyCompiler;

    impl ExpressionCompiler for PickyCompiler {
        fn compile(
            &self,
            source: &str,
            _names: &CorrelationNames,
        ) -> Result<Arc<dyn CompiledExpression>, CompileError> {
            if source.contains("bad") {
                return Err(CompileError::Syntax {
                    line: 1,
                    column: 1,
                    message: "bad token".into(),
                });
            }
            Ok(Arc::new(Nothing))
        }
    }

    fn record(condition: &str) -> TriggerRecord {
        TriggerRecord {
            name: "t".into(),
            owner: UserId::from_name("u"),
            status: TriggerStatus::Active,
            priority: 0.0,
            event: TriggerEvent::Update,
            class: Some(ClassId::new()),
            attribute: None,
            condition: Some(ActivityRecord {
                kind: ActivityKind::Expression,
                time: ActionTime::Before,
                source: Some(condition.into()),
            }),
            action: Some(ActivityRecord {
                kind: ActivityKind::Print,
                time: ActionTime::After,
                source: Some("changed".into()),
            }),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn unchanged_chn_is_not_refreshed() {
        let h = ObjectHandle::new();
        let mut t = Trigger::from_fetched(h, FetchedRecord { record: record("x"), chn: 3 });
        let refreshed = t
            .refresh_if_stale(FetchedRecord { record: record("bad"), chn: 3 }, &PickyCompiler, CorrelationStyle::Paired)
            .unwrap();
        assert!(!refreshed);
        assert_eq!(t.condition().unwrap().source(), Some("x"));
    }

    #[test]
    fn stale_refresh_recompiles_and_invalidates_on_error() {
        let h = ObjectHandle::new();
        let mut t = Trigger::from_fetched(h, FetchedRecord { record: record("x"), chn: 1 });
        assert!(t
            .refresh_if_stale(FetchedRecord { record: record("y"), chn: 2 }, &PickyCompiler, CorrelationStyle::Paired)
            .unwrap());
        assert!(t.condition().unwrap().is_compiled());
        // PRINT actions are never compiled.
        assert!(!t.action().unwrap().is_compiled());

        let err = t
            .refresh_if_stale(FetchedRecord { record: record("bad"), chn: 3 }, &PickyCompiler, CorrelationStyle::Paired)
            .unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }));
        assert_eq!(t.status(), TriggerStatus::Invalid);
        assert_eq!(t.chn(), 3);
    }

    #[test]
    fn to_record_round_trips() {
        let rec = record("x");
        let t = Trigger::from_fetched(ObjectHandle::new(), FetchedRecord { record: rec.clone(), chn: 0 });
        assert_eq!(t.to_record(), rec);
    }
}
