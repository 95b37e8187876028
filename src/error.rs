//! Error types for the trigger manager.
//!
//! Errors are strongly typed using thiserror, one enum per error kind:
//! definition errors are raised synchronously by administrative operations,
//! compile errors degrade a trigger to INVALID, execution errors abort the
//! current firing, and consistency errors are fatal to the operation.

use thiserror::Error;

use crate::host::StorageError;
use crate::trigger::{ActionTime, ActivityKind, TriggerEvent, TriggerStatus};

/// Errors in a trigger definition or an administrative change to one.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// Empty trigger name.
    #[error("Trigger name cannot be empty")]
    EmptyName,

    /// Name longer than the catalog allows.
    #[error("Trigger name '{name}' exceeds maximum length of {max_length}")]
    NameTooLong {
        /// The rejected name.
        name: String,
        /// Longest accepted name, in bytes.
        max_length: usize,
    },

    /// Trigger names are unique per database.
    #[error("Trigger '{name}' already exists")]
    DuplicateName {
        /// The name already taken.
        name: String,
    },

    /// Priority is NaN, infinite or negative.
    #[error("Invalid trigger priority {value}: must be a finite, non-negative number")]
    InvalidPriority {
        /// The rejected priority.
        value: f64,
    },

    /// Class or attribute target does not suit the event.
    #[error("Invalid target for {event} trigger: {reason}")]
    InvalidTarget {
        /// Event of the rejected definition.
        event: TriggerEvent,
        /// What is wrong with the target.
        reason: String,
    },

    /// Class not found in the catalog.
    #[error("Class '{class}' does not exist")]
    UnknownClass {
        /// Class name or id as given.
        class: String,
    },

    /// Attribute not defined in its class.
    #[error("Attribute '{attribute}' does not exist in class '{class}'")]
    UnknownAttribute {
        /// Class searched.
        class: String,
        /// Missing attribute.
        attribute: String,
    },

    /// Creating a class trigger requires ALTER on the class.
    #[error("Not authorized to alter class '{class}'")]
    ClassAccessDenied {
        /// Target class name.
        class: String,
    },

    /// Caller may not change this trigger.
    #[error("Not authorized to {operation} trigger '{trigger}'")]
    Unauthorized {
        /// Refused operation, e.g. `drop`.
        operation: String,
        /// Trigger name.
        trigger: String,
    },

    /// REJECT used where nothing can be rejected.
    #[error("REJECT action not allowed: {reason}")]
    RejectNotAllowed {
        /// Why the combination is refused.
        reason: String,
    },

    /// INVALIDATE TRANSACTION on an event outside a transaction.
    #[error("INVALIDATE action not allowed for {event} triggers")]
    InvalidateNotAllowed {
        /// Offending event.
        event: TriggerEvent,
    },

    /// Action time the event does not support.
    #[error("{time} time not allowed for {event} triggers")]
    InvalidTime {
        /// Trigger event.
        event: TriggerEvent,
        /// Rejected time.
        time: ActionTime,
    },

    /// The action would run before its condition.
    #[error("Action time {action} precedes condition time {condition}")]
    TimeOrder {
        /// Condition time.
        condition: ActionTime,
        /// Action time.
        action: ActionTime,
    },

    /// Conditions are always expressions.
    #[error("Condition must be an expression, not {kind}")]
    ConditionNotExpression {
        /// Kind given for the condition.
        kind: ActivityKind,
    },

    /// Expression or PRINT without source text.
    #[error("{activity} requires source text")]
    MissingSource {
        /// `condition` or `action`.
        activity: String,
    },

    /// INVALID is only ever set by the engine.
    #[error("Status {status} cannot be set explicitly")]
    InvalidStatus {
        /// Requested status.
        status: TriggerStatus,
    },
}

/// Errors compiling condition or action source text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// Source text does not parse.
    #[error("Syntax error at line {line}, column {column}: {message}")]
    Syntax {
        /// 1-based line.
        line: usize,
        /// 1-based column.
        column: usize,
        /// Parser diagnostic.
        message: String,
    },

    /// Correlation name not available for the event or time.
    #[error("Invalid use of correlation name '{name}': {reason}")]
    Correlation {
        /// Name as written.
        name: String,
        /// Why it is unavailable.
        reason: String,
    },

    /// Parses, but cannot run.
    #[error("Semantic error: {message}")]
    Semantic {
        /// Diagnostic.
        message: String,
    },
}

/// Errors raised while firing triggers.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A REJECT action ran.
    #[error("Operation rejected by trigger {trigger}")]
    Rejected {
        /// Rejecting trigger.
        trigger: String,
    },

    /// An INVALIDATE TRANSACTION action ran.
    #[error("Transaction invalidated by trigger {trigger}")]
    TransactionInvalidated {
        /// Invalidating trigger.
        trigger: String,
    },

    /// A condition or action failed.
    #[error("Error in trigger {trigger}: {source}")]
    Activity {
        /// Trigger whose activity failed.
        trigger: String,
        /// Underlying failure.
        source: Box<TriggerError>,
    },

    /// Evaluation failed, e.g. division by zero or a type mismatch.
    #[error("Expression evaluation failed: {message}")]
    Expression {
        /// Evaluator diagnostic.
        message: String,
    },

    /// No trigger with this name or handle.
    #[error("Trigger not found: {name}")]
    TriggerNotFound {
        /// Name or handle looked up.
        name: String,
    },
}

/// Structural failures in the trigger core itself.
#[derive(Debug, Error)]
pub enum ConsistencyError {
    /// Nested firing went past the configured depth.
    #[error("Recursion limit {limit} exceeded, first trigger {first_trigger}")]
    RecursionLimit {
        /// Configured maximum depth.
        limit: usize,
        /// First trigger that could not run; empty when unknown.
        first_trigger: String,
    },

    /// Cache contents contradict each other.
    #[error("Corrupted trigger cache: {reason}")]
    CorruptCache {
        /// What was found inconsistent.
        reason: String,
    },

    /// A firing-state operation was called out of order.
    #[error("Trigger state is {phase}; cannot {operation}")]
    InvalidPhase {
        /// Current phase.
        phase: &'static str,
        /// Attempted operation.
        operation: &'static str,
    },

    /// Cached trigger no longer matches its record.
    #[error("Trigger '{trigger}' is out of sync with its persistent record: {reason}")]
    Decoupled {
        /// Trigger name.
        trigger: String,
        /// Detected mismatch.
        reason: String,
    },
}

/// Top-level error type for the trigger manager.
#[derive(Debug, Error)]
pub enum TriggerError {
    /// Bad definition or administrative change.
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// Source text failed to compile.
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    /// Failure while firing.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Trigger core inconsistency.
    #[error("Consistency error: {0}")]
    Consistency(#[from] ConsistencyError),

    /// Host store or transaction failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// What is wrong.
        message: String,
    },

    /// Unexpected internal failure, e.g. a poisoned lock.
    #[error("Internal error: {message}")]
    Internal {
        /// Diagnostic.
        message: String,
    },
}

impl TriggerError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Definition error?
    #[must_use]
    pub const fn is_definition(&self) -> bool {
        matches!(self, Self::Definition(_))
    }

    /// Compile error?
    #[must_use]
    pub const fn is_compile(&self) -> bool {
        matches!(self, Self::Compile(_))
    }

    /// Execution error?
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Consistency error?
    #[must_use]
    pub const fn is_consistency(&self) -> bool {
        matches!(self, Self::Consistency(_))
    }

    /// True for a REJECT raised by any trigger.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        match self {
            Self::Execution(ExecutionError::Rejected { .. }) => true,
            Self::Execution(ExecutionError::Activity { source, .. }) => source.is_rejection(),
            _ => false,
        }
    }

    /// Errors that leave memory possibly decoupled from the persisted
    /// records; the engine forces a transaction abort when it raises one.
    #[must_use]
    pub const fn is_severe(&self) -> bool {
        matches!(
            self,
            Self::Consistency(ConsistencyError::CorruptCache { .. } | ConsistencyError::Decoupled { .. })
        )
    }

    /// Whether the object store reported the object as gone.
    #[must_use]
    pub const fn is_unknown_object(&self) -> bool {
        matches!(self, Self::Storage(StorageError::UnknownObject(_)))
    }

    /// Whether a trigger lookup found nothing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Execution(ExecutionError::TriggerNotFound { .. })
                | Self::Storage(StorageError::UnknownObject(_))
        )
    }

    /// Wrap an execution failure with the name of the trigger that raised it.
    ///
    /// Rejections, recursion-limit failures and errors already carrying a
    /// trigger name pass through unchanged.
    #[must_use]
    pub fn in_trigger(self, trigger: &str) -> Self {
        match self {
            Self::Execution(
                ExecutionError::Activity { .. }
                | ExecutionError::Rejected { .. }
                | ExecutionError::TransactionInvalidated { .. },
            )
            | Self::Consistency(ConsistencyError::RecursionLimit { .. }) => self,
            other => Self::Execution(ExecutionError::Activity {
                trigger: trigger.to_string(),
                source: Box::new(other),
            }),
        }
    }
}

/// Result type alias for trigger operations.
pub type TriggerResult<T> = Result<T, TriggerError>;
