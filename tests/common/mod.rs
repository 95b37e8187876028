//! Shared fixtures for the end-to-end tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use kyrotrig::host::memory::InMemoryHost;
use kyrotrig::host::NameReference;
use kyrotrig::{
    ActionTime, ActivationFrame, ActivityKind, ClassId, CompileError, CompiledExpression, CorrelationNames, DbObject,
    DbValue, ExpressionCompiler, ObjectHandle, ReferenceCompiler, TriggerConfig, TriggerDefinition, TriggerEngine,
    TriggerEvent, TriggerResult, UserId,
};

pub type Script = Arc<dyn Fn(&ActivationFrame<'_>) -> TriggerResult<DbValue> + Send + Sync>;

/// Compiler that runs Rust closures for registered source texts and falls
/// back to the built-in language for everything else.
#[derive(Default, Clone)]
pub struct ScriptedCompiler {
    scripts: Arc<Mutex<HashMap<String, Script>>>,
    fallback: ReferenceCompiler,
}

impl ScriptedCompiler {
    pub fn register(
        &self,
        source: &str,
        script: impl Fn(&ActivationFrame<'_>) -> TriggerResult<DbValue> + Send + Sync + 'static,
    ) {
        self.scripts.lock().unwrap().insert(source.to_string(), Arc::new(script));
    }
}

struct ScriptedExpression {
    source: String,
    script: Script,
}

impl fmt::Debug for ScriptedExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedExpression").field("source", &self.source).finish()
    }
}

impl CompiledExpression for ScriptedExpression {
    fn references(&self) -> Vec<NameReference> {
        Vec::new()
    }

    fn execute(&self, frame: &ActivationFrame<'_>) -> TriggerResult<DbValue> {
        (self.script)(frame)
    }
}

impl ExpressionCompiler for ScriptedCompiler {
    fn compile(&self, source: &str, names: &CorrelationNames) -> Result<Arc<dyn CompiledExpression>, CompileError> {
        // Conditions arrive wrapped as `evaluate (<source>)`.
        let key = source
            .strip_prefix("evaluate (")
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(source);
        let script = self.scripts.lock().unwrap().get(key).cloned();
        match script {
            Some(script) => Ok(Arc::new(ScriptedExpression {
                source: key.to_string(),
                script,
            })),
            None => self.fallback.compile(source, names),
        }
    }
}

pub struct Harness {
    pub host: InMemoryHost,
    pub engine: Arc<TriggerEngine>,
    pub compiler: ScriptedCompiler,
    pub orders: ClassId,
    pub audit: ClassId,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(TriggerConfig::default())
    }

    pub fn with_config(config: TriggerConfig) -> Self {
        let dba = UserId::from_name("dba");
        let host = InMemoryHost::new(dba);
        host.auth.add_dba(dba);
        host.transactions.begin();
        let orders = host.catalog.define_class("orders", &["status", "qty", "total"]);
        let audit = host.catalog.define_class("audit", &["note"]);
        let compiler = ScriptedCompiler::default();
        let engine = Arc::new(TriggerEngine::new(
            host.services_with_compiler(Arc::new(compiler.clone())),
            config,
        ));
        Self {
            host,
            engine,
            compiler,
            orders,
            audit,
        }
    }

    pub fn create(&self, def: TriggerDefinition) -> ObjectHandle {
        self.engine.create_trigger(def).unwrap()
    }

    pub fn order(&self, status: &str, qty: i64) -> DbObject {
        DbObject::new(ObjectHandle::new(), self.orders)
            .with("status", status)
            .with("qty", qty)
    }

    pub fn output(&self) -> Vec<String> {
        self.host.output.take()
    }
}

/// Definition printing `text` at `time` for `event` on `class`.
pub fn printer(name: &str, event: TriggerEvent, class: ClassId, time: ActionTime, text: &str) -> TriggerDefinition {
    TriggerDefinition::builder(name)
        .event(event)
        .class(class)
        .action(ActivityKind::Print, time, text)
        .build()
        .unwrap()
}

/// Run a whole class event the way a statement executor would: BEFORE with
/// the old/new pair bound, then AFTER.
pub fn fire_class_event(
    engine: &TriggerEngine,
    event: TriggerEvent,
    class: ClassId,
    attributes: &[&str],
    old: Option<&DbObject>,
    new: Option<&DbObject>,
) -> TriggerResult<()> {
    let Some(mut state) = engine.prepare_for_class_event(event, class, attributes)? else {
        return Ok(());
    };
    let (before_current, before_temp, after_current, after_temp) = match event {
        TriggerEvent::Insert => (None, new, new, None),
        TriggerEvent::Delete => (old, None, None, None),
        _ => (old, new, new, old),
    };
    engine.fire_before(&mut state, before_current, before_temp)?;
    engine.fire_after(&mut state, after_current, after_temp)
}
