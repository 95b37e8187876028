//! Conditions and actions.

use std::sync::Arc;

use crate::host::CompiledExpression;

use super::event::{ActionTime, ActivityKind};
use super::record::ActivityRecord;

/// A condition or action owned by exactly one trigger.
///
/// The compiled form is built lazily and discarded after a configurable
/// number of executions so a long-lived compiled tree cannot grow without
/// bound inside the expression evaluator.
#[derive(Debug, Clone)]
pub struct Activity {
    kind: ActivityKind,
    time: ActionTime,
    source: Option<String>,
    compiled: Option<Arc<dyn CompiledExpression>>,
    exec_count: u32,
}

impl Activity {
    /// New, uncompiled activity.
    #[must_use]
    pub fn new(kind: ActivityKind, time: ActionTime, source: Option<String>) -> Self {
        Self {
            kind,
            time,
            source,
            compiled: None,
            exec_count: 0,
        }
    }

    /// Kind.
    #[must_use]
    pub const fn kind(&self) -> ActivityKind {
        self.kind
    }

    /// Time.
    #[must_use]
    pub const fn time(&self) -> ActionTime {
        self.time
    }

    /// Source text, if any.
    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Times this activity has executed.
    #[must_use]
    pub const fn exec_count(&self) -> u32 {
        self.exec_count
    }

    /// Whether a compiled form is held.
    #[must_use]
    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    /// Shared handle to the compiled form, if built.
    #[must_use]
    pub fn compiled(&self) -> Option<Arc<dyn CompiledExpression>> {
        self.compiled.clone()
    }

    pub(crate) fn set_compiled(&mut self, compiled: Arc<dyn CompiledExpression>) {
        self.compiled = Some(compiled);
        self.exec_count = 0;
    }

    pub(crate) fn discard_compiled(&mut self) {
        self.compiled = None;
        self.exec_count = 0;
    }

    /// Count one execution. Returns true when the compiled form was
    /// discarded because `threshold` executions were reached; `threshold`
    /// of zero never discards. Only the outermost firing level recycles.
    pub(crate) fn record_execution(&mut self, threshold: u32, outermost: bool) -> bool {
        self.exec_count = self.exec_count.saturating_add(1);
        if threshold > 0 && outermost && self.exec_count >= threshold && self.compiled.is_some() {
            self.discard_compiled();
            return true;
        }
        false
    }

    /// Persistent form.
    #[must_use]
    pub fn to_record(&self) -> ActivityRecord {
        ActivityRecord {
            kind: self.kind,
            time: self.time,
            source: self.source.clone(),
        }
    }

    /// Rebuild from the persistent form; compiles lazily.
    #[must_use]
    pub fn from_record(record: &ActivityRecord) -> Self {
        Self::new(record.kind, record.time, record.source.clone())
    }
}
