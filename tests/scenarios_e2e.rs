mod common;

use std::sync::{Arc, Mutex};

use common::{fire_class_event, printer, Harness};
use kyrotrig::{
    ActionTime, ActivityKind, DbValue, DefinitionError, ExecutionError, ObjectHandle, ObjectStore, StatePhase,
    TriggerDefinition, TriggerError, TriggerEvent, TriggerRecord, TriggerStatus,
};

fn status_watch(h: &Harness, name: &str, priority: f64) -> TriggerDefinition {
    TriggerDefinition::builder(name)
        .event(TriggerEvent::Update)
        .class(h.orders)
        .attribute("status")
        .priority(priority)
        .condition(ActionTime::Before, "new.status <> old.status")
        .action(ActivityKind::Print, ActionTime::After, name)
        .build()
        .unwrap()
}

fn update_status(h: &Harness, from: &str, to: &str) -> Result<(), TriggerError> {
    let old = h.order(from, 1);
    let new = old.clone().with("status", to);
    fire_class_event(&h.engine, TriggerEvent::Update, h.orders, &["status"], Some(&old), Some(&new))
}

#[test]
fn higher_priority_fires_first() {
    let h = Harness::new();
    h.create(status_watch(&h, "t2", 5.0));
    h.create(status_watch(&h, "t1", 10.0));

    update_status(&h, "open", "shipped").unwrap();
    assert_eq!(h.output(), vec!["t1", "t2"]);

    // Same status: both conditions are false, neither action runs.
    update_status(&h, "open", "open").unwrap();
    assert!(h.output().is_empty());
    assert_eq!(h.engine.current_depth(), 0);
}

#[test]
fn conditions_evaluate_in_priority_order() {
    let h = Harness::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for (name, priority) in [("low", 1.0), ("high", 9.0), ("mid", 5.0)] {
        let log = seen.clone();
        let source = format!("log_{name}");
        h.compiler.register(&source, move |frame| {
            log.lock().unwrap().push(frame.trigger_name().to_string());
            Ok(DbValue::Bool(false))
        });
        h.create(
            TriggerDefinition::builder(name)
                .event(TriggerEvent::Update)
                .class(h.orders)
                .priority(priority)
                .condition(ActionTime::Before, &source)
                .action(ActivityKind::Print, ActionTime::After, name)
                .build()
                .unwrap(),
        );
    }

    update_status(&h, "a", "b").unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["high", "mid", "low"]);
    assert!(h.output().is_empty());
}

#[test]
fn reject_fails_the_statement_and_discards_later_work() {
    let h = Harness::new();
    h.create(
        TriggerDefinition::builder("no_negative_qty")
            .event(TriggerEvent::Insert)
            .class(h.orders)
            .priority(10.0)
            .condition(ActionTime::Before, "new.qty < 0")
            .reject(ActionTime::Before)
            .build()
            .unwrap(),
    );
    h.create(printer("audit_insert", TriggerEvent::Insert, h.orders, ActionTime::After, "inserted"));
    h.create(printer("later", TriggerEvent::Insert, h.orders, ActionTime::Deferred, "deferred"));

    let new = h.order("open", -1);
    let mut state = h
        .engine
        .prepare_for_class_event(TriggerEvent::Insert, h.orders, &[])
        .unwrap()
        .unwrap();
    let err = h.engine.fire_before(&mut state, None, Some(&new)).unwrap_err();

    assert!(err.is_rejection());
    assert!(matches!(
        err,
        TriggerError::Execution(ExecutionError::Rejected { ref trigger }) if trigger == "no_negative_qty"
    ));
    assert_eq!(state.phase(), StatePhase::Aborted);
    assert_eq!(state.pending(), 0);
    assert_eq!(h.engine.pending_deferred().unwrap(), 0);
    assert_eq!(h.engine.current_depth(), 0);
    assert!(h.output().is_empty());

    // A valid row passes through.
    let new = h.order("open", 3);
    fire_class_event(&h.engine, TriggerEvent::Insert, h.orders, &[], None, Some(&new)).unwrap();
    assert_eq!(h.output(), vec!["inserted"]);
    assert_eq!(h.engine.pending_deferred().unwrap(), 1);
}

#[test]
fn invalidate_dooms_the_commit_until_rollback() {
    let h = Harness::new();
    h.create(
        TriggerDefinition::builder("freeze")
            .event(TriggerEvent::Update)
            .class(h.orders)
            .condition(ActionTime::After, "new.total > 1000")
            .invalidate(ActionTime::After)
            .build()
            .unwrap(),
    );
    h.engine.on_after_commit();

    let old = h.order("open", 1).with("total", 10);
    let new = old.clone().with("total", 5000);
    fire_class_event(&h.engine, TriggerEvent::Update, h.orders, &[], Some(&old), Some(&new)).unwrap();
    assert_eq!(h.engine.is_transaction_invalidated().as_deref(), Some("freeze"));

    for _ in 0..2 {
        let err = h.engine.on_before_commit().unwrap_err();
        assert!(matches!(
            err,
            TriggerError::Execution(ExecutionError::TransactionInvalidated { ref trigger }) if trigger == "freeze"
        ));
    }

    h.engine.on_rollback();
    assert_eq!(h.engine.is_transaction_invalidated(), None);
    h.engine.on_before_commit().unwrap();
}

#[test]
fn rollback_drops_deferred_activity() {
    let h = Harness::new();
    h.create(printer("t3", TriggerEvent::Insert, h.orders, ActionTime::Deferred, "t3 ran"));
    h.engine.on_after_commit();

    let new = h.order("open", 1);
    fire_class_event(&h.engine, TriggerEvent::Insert, h.orders, &[], None, Some(&new)).unwrap();
    assert_eq!(h.engine.pending_deferred().unwrap(), 1);

    h.engine.on_rollback();
    assert_eq!(h.engine.pending_deferred().unwrap(), 0);
    h.engine.on_before_commit().unwrap();
    assert!(h.output().is_empty());
}

#[test]
fn priority_change_reorders_compiled_cache() {
    let h = Harness::new();
    let t1 = h.create(status_watch(&h, "t1", 10.0));
    h.create(status_watch(&h, "t2", 5.0));

    update_status(&h, "a", "b").unwrap();
    assert_eq!(h.output(), vec!["t1", "t2"]);

    h.engine.set_priority(t1, 1.0).unwrap();
    update_status(&h, "a", "b").unwrap();
    assert_eq!(h.output(), vec!["t2", "t1"]);
    assert_eq!(h.engine.describe(t1).unwrap().record.priority, 1.0);
}

#[test]
fn invalid_priority_is_refused() {
    let h = Harness::new();
    let t1 = h.create(status_watch(&h, "t1", 10.0));
    for bad in [-1.0, f64::NAN, f64::INFINITY] {
        let err = h.engine.set_priority(t1, bad).unwrap_err();
        assert!(err.is_definition());
    }
    assert_eq!(h.engine.describe(t1).unwrap().record.priority, 10.0);
}

#[test]
fn duplicate_name_leaves_caches_untouched() {
    let h = Harness::new();
    let first = h.create(status_watch(&h, "t1", 10.0));
    let registered = h
        .engine
        .find_for_event(TriggerEvent::Update, Some(h.orders), Some("status"), false)
        .unwrap();
    let before = h.engine.cache_stats().unwrap();

    let err = h.engine.create_trigger(status_watch(&h, "T1", 3.0)).unwrap_err();
    assert!(matches!(
        err,
        TriggerError::Definition(DefinitionError::DuplicateName { ref name }) if name.eq_ignore_ascii_case("t1")
    ));

    assert_eq!(h.engine.cache_stats().unwrap(), before);
    assert_eq!(
        h.engine
            .find_for_event(TriggerEvent::Update, Some(h.orders), Some("status"), false)
            .unwrap(),
        registered
    );
    assert_eq!(h.engine.find_by_name("t1").unwrap(), Some(first));
    assert_eq!(h.host.store.len(), 1);
}

#[test]
fn create_then_drop_restores_caches() {
    let h = Harness::new();
    h.create(printer("keep", TriggerEvent::Insert, h.orders, ActionTime::After, "keep"));
    h.engine.on_after_commit();
    // Build the class cache so the new trigger lands in it.
    let before_list = h
        .engine
        .find_for_event(TriggerEvent::Insert, Some(h.orders), None, false)
        .unwrap();
    let before = h.engine.cache_stats().unwrap();

    let handle = h.create(printer("temp", TriggerEvent::Insert, h.orders, ActionTime::After, "temp"));
    assert_eq!(h.engine.find_by_name("TEMP").unwrap(), Some(handle));
    assert_eq!(
        h.engine
            .find_for_event(TriggerEvent::Insert, Some(h.orders), None, false)
            .unwrap()
            .len(),
        2
    );

    h.engine.drop_trigger(handle).unwrap();
    assert_eq!(h.engine.find_by_name("temp").unwrap(), None);
    assert_eq!(h.engine.cache_stats().unwrap(), before);
    assert_eq!(
        h.engine
            .find_for_event(TriggerEvent::Insert, Some(h.orders), None, false)
            .unwrap(),
        before_list
    );

    let new = h.order("open", 1);
    fire_class_event(&h.engine, TriggerEvent::Insert, h.orders, &[], None, Some(&new)).unwrap();
    assert_eq!(h.output(), vec!["keep"]);
}

#[test]
fn attribute_triggers_fire_only_for_their_attribute() {
    let h = Harness::new();
    h.create(status_watch(&h, "status_watch", 1.0));
    h.create(printer("any_update", TriggerEvent::Update, h.orders, ActionTime::After, "any"));

    let old = h.order("open", 1);
    let new = old.clone().with("qty", 2);
    fire_class_event(&h.engine, TriggerEvent::Update, h.orders, &["qty"], Some(&old), Some(&new)).unwrap();
    assert_eq!(h.output(), vec!["any"]);

    // Class and attribute triggers merge by priority.
    update_status(&h, "open", "closed").unwrap();
    assert_eq!(h.output(), vec!["status_watch", "any"]);
}

#[test]
fn statement_triggers_fire_without_objects() {
    let h = Harness::new();
    h.create(printer("bulk", TriggerEvent::StatementDelete, h.orders, ActionTime::After, "bulk delete"));
    fire_class_event(&h.engine, TriggerEvent::StatementDelete, h.orders, &[], None, None).unwrap();
    assert_eq!(h.output(), vec!["bulk delete"]);
}

#[test]
fn rename_keeps_firing_and_frees_the_old_name() {
    let h = Harness::new();
    let handle = h.create(printer("old_name", TriggerEvent::Insert, h.orders, ActionTime::After, "fired"));
    h.engine.rename_trigger(handle, "new_name").unwrap();
    assert_eq!(h.engine.find_by_name("old_name").unwrap(), None);
    assert_eq!(h.engine.find_by_name("new_name").unwrap(), Some(handle));

    let new = h.order("open", 1);
    fire_class_event(&h.engine, TriggerEvent::Insert, h.orders, &[], None, Some(&new)).unwrap();
    assert_eq!(h.output(), vec!["fired"]);

    h.create(printer("old_name", TriggerEvent::Insert, h.orders, ActionTime::After, "again"));
}

/// Rewrite a stored record behind the engine's back, as another session would.
fn update_record(h: &Harness, handle: ObjectHandle, edit: impl FnOnce(&mut TriggerRecord)) {
    let mut record = h.host.store.fetch(handle).unwrap().record;
    edit(&mut record);
    h.host.store.update(handle, &record).unwrap();
}

#[test]
fn refreshed_priority_reorders_compiled_triglists() {
    let h = Harness::new();
    let t1 = h.create(status_watch(&h, "t1", 10.0));
    h.create(status_watch(&h, "t2", 5.0));
    update_status(&h, "open", "shipped").unwrap();
    assert_eq!(h.output(), vec!["t1", "t2"]);

    update_record(&h, t1, |r| r.priority = 1.0);
    let info = h.engine.describe(t1).unwrap();
    assert_eq!(info.record.priority, 1.0);

    update_status(&h, "open", "shipped").unwrap();
    assert_eq!(h.output(), vec!["t2", "t1"]);
}

#[test]
fn refreshed_status_is_seen_by_the_next_firing() {
    let h = Harness::new();
    let t1 = h.create(status_watch(&h, "t1", 10.0));
    h.create(status_watch(&h, "t2", 5.0));
    update_status(&h, "open", "shipped").unwrap();
    assert_eq!(h.output(), vec!["t1", "t2"]);

    update_record(&h, t1, |r| r.status = TriggerStatus::Inactive);
    update_status(&h, "open", "shipped").unwrap();
    assert_eq!(h.output(), vec!["t2"]);

    update_record(&h, t1, |r| r.status = TriggerStatus::Active);
    h.engine.describe(t1).unwrap();
    update_status(&h, "open", "shipped").unwrap();
    assert_eq!(h.output(), vec!["t1", "t2"]);
}
