//! Host collaborators: the traits the trigger core is written against and
//! in-memory implementations of them.

pub mod memory;
mod traits;

use std::fmt;
use std::sync::Arc;

pub use traits::{
    ActivationFrame, Authorizer, CompiledExpression, ExpressionCompiler, FetchedRecord, NameReference,
    ObjectStore, OutputSink, Privilege, SchemaCatalog, StorageError, TransactionManager,
};

/// Every collaborator a [`crate::TriggerEngine`] talks to.
#[derive(Clone)]
pub struct Services {
    /// Persistent trigger records.
    pub store: Arc<dyn ObjectStore>,
    /// Principal and privilege checks.
    pub auth: Arc<dyn Authorizer>,
    /// Class and attribute metadata.
    pub catalog: Arc<dyn SchemaCatalog>,
    /// Savepoints and forced aborts.
    pub transactions: Arc<dyn TransactionManager>,
    /// Condition/action compiler.
    pub compiler: Arc<dyn ExpressionCompiler>,
    /// PRINT destination.
    pub output: Arc<dyn OutputSink>,
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}
