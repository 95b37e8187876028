//! Contracts the trigger core requires from its host.
//!
//! The trigger manager does not store objects, check privileges, parse SQL
//! or run transactions itself. These traits are the seams to the systems
//! that do. All of them are object-safe and `Send + Sync` so the engine can
//! hold them behind `Arc<dyn ...>`.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compile::CorrelationNames;
use crate::engine::TriggerEngine;
use crate::error::{CompileError, TriggerResult};
use crate::ids::{ChangeNumber, ClassId, ObjectHandle, UserId};
use crate::trigger::TriggerRecord;
use crate::value::{DbObject, DbValue};

/// Errors reported by the object store and the transaction manager.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The object does not exist (never created, or already deleted).
    #[error("Object unknown: {0}")]
    UnknownObject(ObjectHandle),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// A record as fetched, with its current coherency token.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedRecord {
    /// The stored definition.
    pub record: TriggerRecord,
    /// Change number of the fetched version.
    pub chn: ChangeNumber,
}

/// Persistent store for trigger records.
///
/// # Coherency
/// Every successful `update` must bump the record's change number so cached
/// triggers can detect that they are stale.
pub trait ObjectStore: Send + Sync {
    /// Persist a new record and return its handle.
    fn create(&self, record: &TriggerRecord) -> Result<ObjectHandle, StorageError>;

    /// Fetch a record. Returns `UnknownObject` if it does not exist.
    fn fetch(&self, handle: ObjectHandle) -> Result<FetchedRecord, StorageError>;

    /// Overwrite a record, returning the new change number.
    fn update(&self, handle: ObjectHandle, record: &TriggerRecord) -> Result<ChangeNumber, StorageError>;

    /// Delete a record. Returns `UnknownObject` if it does not exist.
    fn delete(&self, handle: ObjectHandle) -> Result<(), StorageError>;

    /// Records whose class target is `class` and whose attribute target
    /// equals `attribute` (`None` selects class-level triggers only).
    fn handles_for_target(
        &self,
        class: ClassId,
        attribute: Option<&str>,
    ) -> Result<Vec<ObjectHandle>, StorageError>;

    /// User-event records owned by `owner`.
    fn handles_for_owner(&self, owner: UserId) -> Result<Vec<ObjectHandle>, StorageError>;

    /// Every trigger record.
    fn all_handles(&self) -> Result<Vec<ObjectHandle>, StorageError>;
}

/// Privileges the trigger core checks on target classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
    /// Read access.
    Select,
    /// Schema change access; required to create class triggers.
    Alter,
}

/// Authentication and authorization context.
pub trait Authorizer: Send + Sync {
    /// The effective principal.
    fn current_user(&self) -> UserId;

    /// Switch the effective principal, returning the previous one.
    fn set_current_user(&self, user: UserId) -> UserId;

    /// Check a privilege on a class.
    fn has_privilege(&self, user: UserId, class: ClassId, privilege: Privilege) -> bool;

    /// Whether the principal is a privileged administrator.
    fn is_dba(&self, user: UserId) -> bool;
}

/// Class/schema metadata the core needs to validate targets.
pub trait SchemaCatalog: Send + Sync {
    /// Resolve a class name.
    fn resolve_class(&self, name: &str) -> Option<ClassId>;

    /// Name of an existing class.
    fn class_name(&self, class: ClassId) -> Option<String>;

    /// Whether the class still exists.
    fn class_exists(&self, class: ClassId) -> bool {
        self.class_name(class).is_some()
    }

    /// Whether `attribute` is defined in `class`.
    fn has_attribute(&self, class: ClassId, attribute: &str) -> bool;
}

/// Transaction services.
pub trait TransactionManager: Send + Sync {
    /// Establish a named savepoint in the current transaction.
    fn establish_savepoint(&self, name: &str) -> Result<(), StorageError>;

    /// Roll the store back to a named savepoint.
    fn abort_to_savepoint(&self, name: &str) -> Result<(), StorageError>;

    /// Savepoints currently established, outermost first.
    fn savepoints(&self) -> Vec<String>;

    /// Innermost savepoint currently established, if any.
    fn current_savepoint(&self) -> Option<String> {
        self.savepoints().pop()
    }

    /// Identity of the running transaction, for diagnostics.
    fn transaction_id(&self) -> u64;

    /// Request an unconditional abort of the running transaction.
    fn force_abort(&self, reason: &str);
}

/// Destination for PRINT actions.
pub trait OutputSink: Send + Sync {
    /// Emit one line.
    fn write_line(&self, line: &str);
}

/// A correlation-name reference found in compiled source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameReference {
    /// Correlation name as written.
    pub name: String,
    /// `Some` for `name.attribute`, `None` for a bare `name`.
    pub attribute: Option<String>,
}

/// Executable form of a condition or action.
pub trait CompiledExpression: Send + Sync + fmt::Debug {
    /// Every correlation-name reference in the compiled tree.
    fn references(&self) -> Vec<NameReference>;

    /// Evaluate against the bound objects.
    ///
    /// Implementations that run statements may re-enter the engine through
    /// [`ActivationFrame::engine`]; nested firing is bounded by the engine's
    /// recursion limit.
    fn execute(&self, frame: &ActivationFrame<'_>) -> TriggerResult<DbValue>;
}

/// Compiles source text into an executable form.
pub trait ExpressionCompiler: Send + Sync {
    /// Compile `source` with `names` bound.
    fn compile(
        &self,
        source: &str,
        names: &CorrelationNames,
    ) -> Result<Arc<dyn CompiledExpression>, CompileError>;
}

/// Objects bound to correlation names while one activity runs.
pub struct ActivationFrame<'a> {
    engine: &'a TriggerEngine,
    trigger: &'a str,
    current: Option<(&'static str, &'a DbObject)>,
    temp: Option<(&'static str, &'a DbObject)>,
}

impl<'a> ActivationFrame<'a> {
    pub(crate) fn new(
        engine: &'a TriggerEngine,
        trigger: &'a str,
        names: CorrelationNames,
        current: Option<&'a DbObject>,
        temp: Option<&'a DbObject>,
    ) -> Self {
        // With no current object, the first name binds the temporary one.
        let current_obj = current.or(temp);
        Self {
            engine,
            trigger,
            current: names.current.zip(current_obj),
            temp: names.temp.zip(temp),
        }
    }

    /// Object bound to a correlation name (case-insensitive).
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&'a DbObject> {
        [self.current, self.temp]
            .into_iter()
            .flatten()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, obj)| obj)
    }

    /// The engine firing this activity.
    #[must_use]
    pub fn engine(&self) -> &'a TriggerEngine {
        self.engine
    }

    /// Name of the trigger that owns the running activity.
    #[must_use]
    pub fn trigger_name(&self) -> &'a str {
        self.trigger
    }
}

impl fmt::Debug for ActivationFrame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivationFrame")
            .field("trigger", &self.trigger)
            .field("current", &self.current.map(|(n, _)| n))
            .field("temp", &self.temp.map(|(n, _)| n))
            .finish_non_exhaustive()
    }
}
