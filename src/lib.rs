//! # KyroTrig - Trigger Manager for Object Databases
//!
//! KyroTrig is the trigger core of an object database: it stores trigger
//! definitions, decides which triggers apply to a data or transaction
//! event, and runs their conditions and actions in priority order around
//! the statement that raised the event.
//!
//! ## Core Concepts
//!
//! - **Trigger**: a named rule bound to an event on a class, an attribute
//!   of a class, or (for COMMIT/ROLLBACK/ABORT/TIMEOUT) the creating user
//! - **Activity**: a condition or action, run at BEFORE, AFTER or DEFERRED
//!   time relative to the event
//! - **TriggerState**: the priority-ordered work list of one firing, driven
//!   through `fire_before` and `fire_after`
//! - **Deferred activity**: work queued past AFTER and drained at commit
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kyrotrig::host::memory::InMemoryHost;
//! use kyrotrig::{ActionTime, ActivityKind, TriggerConfig, TriggerDefinition, TriggerEngine, TriggerEvent, UserId};
//!
//! let host = InMemoryHost::new(UserId::from_name("dba"));
//! let orders = host.catalog.define_class("orders", &["status"]);
//! let engine = TriggerEngine::new(host.services(), TriggerConfig::default());
//!
//! engine.create_trigger(
//!     TriggerDefinition::builder("status_audit")
//!         .event(TriggerEvent::Update)
//!         .class(orders)
//!         .attribute("status")
//!         .condition(ActionTime::Before, "new.status <> old.status")
//!         .action(ActivityKind::Print, ActionTime::After, "status changed")
//!         .build()?,
//! )?;
//!
//! if let Some(mut state) = engine.prepare_for_class_event(TriggerEvent::Update, orders, &["status"])? {
//!     engine.fire_before(&mut state, Some(&old_row), Some(&new_row))?;
//!     engine.fire_after(&mut state, Some(&new_row), Some(&old_row))?;
//! }
//! engine.on_before_commit()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod ids;
pub mod value;

// Configuration and compilation
pub mod compile;
pub mod config;

// Trigger model, caches and host seams
pub mod cache;
pub mod host;
pub mod trigger;

// Built-in expression language
pub mod expr;

// The engine
pub mod engine;

// Re-export primary types at crate root for convenience
pub use compile::{CorrelationNames, CorrelationStyle};
pub use config::{TriggerConfig, MAX_RECURSION_CEILING};
pub use engine::{CacheStats, StatePhase, TriggerEngine, TriggerInfo, TriggerState};
pub use error::{
    CompileError, ConsistencyError, DefinitionError, ExecutionError, TriggerError, TriggerResult,
};
pub use expr::ReferenceCompiler;
pub use host::{
    ActivationFrame, Authorizer, CompiledExpression, ExpressionCompiler, ObjectStore, OutputSink, Privilege,
    SchemaCatalog, Services, StorageError, TransactionManager,
};
pub use ids::{ChangeNumber, ClassId, ObjectHandle, UserId};
pub use trigger::{
    ActionTime, ActivityKind, Trigger, TriggerBuilder, TriggerDefinition, TriggerEvent, TriggerRecord,
    TriggerStatus,
};
pub use value::{DbObject, DbValue};
