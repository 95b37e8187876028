//! In-memory host collaborators.
//!
//! Thread-safe implementations of every host trait. They back embedded
//! usage and tests, and double as reference implementations of the
//! contracts in [`crate::host`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::expr::ReferenceCompiler;
use crate::host::traits::{
    Authorizer, ExpressionCompiler, FetchedRecord, ObjectStore, OutputSink, Privilege, SchemaCatalog,
    StorageError, TransactionManager,
};
use crate::host::Services;
use crate::ids::{ChangeNumber, ClassId, ObjectHandle, UserId};
use crate::trigger::TriggerRecord;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

fn normalize_key(s: &str) -> String {
    s.trim().to_ascii_lowercase()
}

fn encode(record: &TriggerRecord) -> Result<serde_json::Value, StorageError> {
    serde_json::to_value(record).map_err(|e| StorageError::SerializationError(e.to_string()))
}

fn decode(value: &serde_json::Value) -> Result<TriggerRecord, StorageError> {
    serde_json::from_value(value.clone()).map_err(|e| StorageError::SerializationError(e.to_string()))
}

#[derive(Debug)]
struct StoredRecord {
    body: serde_json::Value,
    chn: ChangeNumber,
}

#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<ObjectHandle, StoredRecord>,
    /// Creation order, so scans are deterministic.
    order: Vec<ObjectHandle>,
    next_chn: ChangeNumber,
}

impl StoreState {
    fn bump(&mut self) -> ChangeNumber {
        self.next_chn += 1;
        self.next_chn
    }

    fn scan(&self, mut keep: impl FnMut(&TriggerRecord) -> bool) -> Result<Vec<ObjectHandle>, StorageError> {
        let mut out = Vec::new();
        for handle in &self.order {
            if let Some(stored) = self.records.get(handle) {
                if keep(&decode(&stored.body)?) {
                    out.push(*handle);
                }
            }
        }
        Ok(out)
    }
}

/// Trigger records kept as JSON documents.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    state: RwLock<StoreState>,
}

impl InMemoryObjectStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().unwrap_or_else(PoisonError::into_inner).records.len()
    }

    /// Whether empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bump a record's change number without changing its contents, as an
    /// unrelated writer would.
    ///
    /// # Errors
    /// `UnknownObject` if the record does not exist.
    pub fn touch(&self, handle: ObjectHandle) -> Result<ChangeNumber, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("store.touch"))?;
        if !state.records.contains_key(&handle) {
            return Err(StorageError::UnknownObject(handle));
        }
        let chn = state.bump();
        if let Some(stored) = state.records.get_mut(&handle) {
            stored.chn = chn;
        }
        Ok(chn)
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn create(&self, record: &TriggerRecord) -> Result<ObjectHandle, StorageError> {
        let body = encode(record)?;
        let mut state = self.state.write().map_err(|_| lock_err("store.create"))?;
        let handle = ObjectHandle::new();
        let chn = state.bump();
        state.records.insert(handle, StoredRecord { body, chn });
        state.order.push(handle);
        Ok(handle)
    }

    fn fetch(&self, handle: ObjectHandle) -> Result<FetchedRecord, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("store.fetch"))?;
        let stored = state
            .records
            .get(&handle)
            .ok_or(StorageError::UnknownObject(handle))?;
        Ok(FetchedRecord {
            record: decode(&stored.body)?,
            chn: stored.chn,
        })
    }

    fn update(&self, handle: ObjectHandle, record: &TriggerRecord) -> Result<ChangeNumber, StorageError> {
        let body = encode(record)?;
        let mut state = self.state.write().map_err(|_| lock_err("store.update"))?;
        if !state.records.contains_key(&handle) {
            return Err(StorageError::UnknownObject(handle));
        }
        let chn = state.bump();
        state.records.insert(handle, StoredRecord { body, chn });
        Ok(chn)
    }

    fn delete(&self, handle: ObjectHandle) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("store.delete"))?;
        if state.records.remove(&handle).is_none() {
            return Err(StorageError::UnknownObject(handle));
        }
        state.order.retain(|h| *h != handle);
        Ok(())
    }

    fn handles_for_target(
        &self,
        class: ClassId,
        attribute: Option<&str>,
    ) -> Result<Vec<ObjectHandle>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("store.handles_for_target"))?;
        state.scan(|r| r.targets(class, attribute))
    }

    fn handles_for_owner(&self, owner: UserId) -> Result<Vec<ObjectHandle>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("store.handles_for_owner"))?;
        state.scan(|r| r.owner == owner && r.event.is_user_event())
    }

    fn all_handles(&self) -> Result<Vec<ObjectHandle>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("store.all_handles"))?;
        Ok(state.order.clone())
    }
}

#[derive(Debug)]
struct ClassDef {
    name: String,
    attributes: HashSet<String>,
}

#[derive(Debug, Default)]
struct CatalogState {
    classes: HashMap<ClassId, ClassDef>,
    by_name: HashMap<String, ClassId>,
}

/// Schema catalog with classes defined at runtime.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
}

impl InMemoryCatalog {
    /// Empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Define (or redefine) a class and its attributes.
    pub fn define_class(&self, name: &str, attributes: &[&str]) -> ClassId {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let key = normalize_key(name);
        let id = state.by_name.get(&key).copied().unwrap_or_default();
        state.by_name.insert(key, id);
        state.classes.insert(
            id,
            ClassDef {
                name: name.trim().to_string(),
                attributes: attributes.iter().map(|a| normalize_key(a)).collect(),
            },
        );
        id
    }

    /// Remove a class. Returns whether it existed.
    pub fn drop_class(&self, class: ClassId) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match state.classes.remove(&class) {
            Some(def) => {
                state.by_name.remove(&normalize_key(&def.name));
                true
            }
            None => false,
        }
    }
}

impl SchemaCatalog for InMemoryCatalog {
    fn resolve_class(&self, name: &str) -> Option<ClassId> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.by_name.get(&normalize_key(name)).copied()
    }

    fn class_name(&self, class: ClassId) -> Option<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.classes.get(&class).map(|c| c.name.clone())
    }

    fn has_attribute(&self, class: ClassId, attribute: &str) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .classes
            .get(&class)
            .is_some_and(|c| c.attributes.contains(&normalize_key(attribute)))
    }
}

#[derive(Debug)]
struct AuthState {
    current: UserId,
    dbas: HashSet<UserId>,
    grants: HashSet<(UserId, ClassId, Privilege)>,
    owners: HashMap<ClassId, UserId>,
}

/// Grant table with a switchable current user.
#[derive(Debug)]
pub struct InMemoryAuthorizer {
    state: RwLock<AuthState>,
}

impl InMemoryAuthorizer {
    /// Start a session as `user`.
    #[must_use]
    pub fn new(user: UserId) -> Self {
        Self {
            state: RwLock::new(AuthState {
                current: user,
                dbas: HashSet::new(),
                grants: HashSet::new(),
                owners: HashMap::new(),
            }),
        }
    }

    /// Grant `user` DBA rights.
    pub fn add_dba(&self, user: UserId) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).dbas.insert(user);
    }

    /// Grant `privilege` on `class`.
    pub fn grant(&self, user: UserId, class: ClassId, privilege: Privilege) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .grants
            .insert((user, class, privilege));
    }

    /// Revoke `privilege` on `class`.
    pub fn revoke(&self, user: UserId, class: ClassId, privilege: Privilege) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .grants
            .remove(&(user, class, privilege));
    }

    /// Class owners hold every privilege on their class.
    pub fn set_owner(&self, class: ClassId, user: UserId) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .owners
            .insert(class, user);
    }
}

impl Authorizer for InMemoryAuthorizer {
    fn current_user(&self) -> UserId {
        self.state.read().unwrap_or_else(PoisonError::into_inner).current
    }

    fn set_current_user(&self, user: UserId) -> UserId {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut state.current, user)
    }

    fn has_privilege(&self, user: UserId, class: ClassId, privilege: Privilege) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.owners.get(&class) == Some(&user) || state.grants.contains(&(user, class, privilege))
    }

    fn is_dba(&self, user: UserId) -> bool {
        self.state.read().unwrap_or_else(PoisonError::into_inner).dbas.contains(&user)
    }
}

#[derive(Debug, Default)]
struct TxnState {
    id: u64,
    savepoints: Vec<String>,
    rollbacks: Vec<String>,
    forced_abort: Option<String>,
}

/// Savepoint bookkeeping for a single session.
#[derive(Debug, Default)]
pub struct InMemoryTransactions {
    state: Mutex<TxnState>,
}

impl InMemoryTransactions {
    /// No transaction running.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new transaction, discarding savepoints and abort requests.
    pub fn begin(&self) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.id += 1;
        state.savepoints.clear();
        state.rollbacks.clear();
        state.forced_abort = None;
        state.id
    }

    /// Release a savepoint (and every savepoint after it).
    pub fn release_savepoint(&self, name: &str) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.savepoints.iter().rposition(|s| s == name) {
            Some(i) => {
                state.savepoints.truncate(i);
                true
            }
            None => false,
        }
    }

    /// Savepoints rolled back to so far, oldest first.
    #[must_use]
    pub fn rollbacks(&self) -> Vec<String> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).rollbacks.clone()
    }

    /// Reason of a pending forced abort.
    #[must_use]
    pub fn forced_abort(&self) -> Option<String> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .forced_abort
            .clone()
    }
}

impl TransactionManager for InMemoryTransactions {
    fn establish_savepoint(&self, name: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock().map_err(|_| lock_err("txn.savepoint"))?;
        state.savepoints.push(name.to_string());
        Ok(())
    }

    fn abort_to_savepoint(&self, name: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock().map_err(|_| lock_err("txn.abort_to_savepoint"))?;
        let Some(i) = state.savepoints.iter().rposition(|s| s == name) else {
            return Err(StorageError::BackendError(format!("unknown savepoint: {name}")));
        };
        // The savepoint itself survives a partial rollback.
        state.savepoints.truncate(i + 1);
        state.rollbacks.push(name.to_string());
        Ok(())
    }

    fn savepoints(&self) -> Vec<String> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).savepoints.clone()
    }

    fn transaction_id(&self) -> u64 {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).id
    }

    fn force_abort(&self, reason: &str) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).forced_abort = Some(reason.to_string());
    }
}

/// Collects PRINT output.
#[derive(Debug, Default)]
pub struct BufferedOutput {
    lines: Mutex<Vec<String>>,
}

impl BufferedOutput {
    /// Empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Drain the buffer.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl OutputSink for BufferedOutput {
    fn write_line(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
    }
}

/// Writes PRINT output to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutOutput;

impl OutputSink for StdoutOutput {
    fn write_line(&self, line: &str) {
        println!("{line}");
    }
}

/// Bundle of in-memory collaborators.
#[derive(Debug, Clone)]
pub struct InMemoryHost {
    /// Trigger records.
    pub store: Arc<InMemoryObjectStore>,
    /// Classes and attributes.
    pub catalog: Arc<InMemoryCatalog>,
    /// Users and privileges.
    pub auth: Arc<InMemoryAuthorizer>,
    /// Savepoints and abort requests.
    pub transactions: Arc<InMemoryTransactions>,
    /// PRINT output.
    pub output: Arc<BufferedOutput>,
}

impl InMemoryHost {
    /// Empty host with a session running as `user`.
    #[must_use]
    pub fn new(user: UserId) -> Self {
        Self {
            store: Arc::new(InMemoryObjectStore::new()),
            catalog: Arc::new(InMemoryCatalog::new()),
            auth: Arc::new(InMemoryAuthorizer::new(user)),
            transactions: Arc::new(InMemoryTransactions::new()),
            output: Arc::new(BufferedOutput::new()),
        }
    }

    /// Services using the built-in expression compiler.
    #[must_use]
    pub fn services(&self) -> Services {
        self.services_with_compiler(Arc::new(ReferenceCompiler::new()))
    }

    /// Services using a caller-supplied compiler.
    #[must_use]
    pub fn services_with_compiler(&self, compiler: Arc<dyn ExpressionCompiler>) -> Services {
        Services {
            store: self.store.clone(),
            auth: self.auth.clone(),
            catalog: self.catalog.clone(),
            transactions: self.transactions.clone(),
            compiler,
            output: self.output.clone(),
        }
    }
}
