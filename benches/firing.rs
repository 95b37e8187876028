use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use kyrotrig::host::memory::InMemoryHost;
use kyrotrig::{
    ActionTime, ActivityKind, ClassId, DbObject, ObjectHandle, TriggerConfig, TriggerDefinition, TriggerEngine,
    TriggerEvent, UserId,
};

fn make_engine(triggers: usize) -> (InMemoryHost, TriggerEngine, ClassId) {
    let dba = UserId::from_name("bench");
    let host = InMemoryHost::new(dba);
    host.auth.add_dba(dba);
    let class = host.catalog.define_class("orders", &["status", "qty"]);
    let engine = TriggerEngine::new(host.services(), TriggerConfig::default());

    // Half the triggers pass their condition so both branches are measured.
    for i in 0..triggers {
        let threshold = if i % 2 == 0 { 0 } else { 1_000_000 };
        engine
            .create_trigger(
                TriggerDefinition::builder(format!("bench_{i}"))
                    .event(TriggerEvent::Update)
                    .class(class)
                    .priority(f64::from(u32::try_from(i).unwrap_or(u32::MAX)))
                    .condition(ActionTime::Before, format!("new.qty > {threshold}"))
                    .action(ActivityKind::Expression, ActionTime::After, "new.qty + old.qty")
                    .build()
                    .unwrap(),
            )
            .unwrap();
    }
    engine.on_after_commit();
    (host, engine, class)
}

fn bench_fire_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("firing");
    for triggers in [1usize, 8, 32] {
        let (_host, engine, class) = make_engine(triggers);
        let old = DbObject::new(ObjectHandle::new(), class).with("status", "open").with("qty", 1);
        let new = old.clone().with("qty", 2);

        group.throughput(Throughput::Elements(1));
        group.bench_function(format!("update/{triggers}_triggers"), |b| {
            b.iter_custom(|iters| {
                let start = Instant::now();
                for _ in 0..iters {
                    let mut state = engine
                        .prepare_for_class_event(TriggerEvent::Update, class, &["qty"])
                        .unwrap()
                        .unwrap();
                    engine.fire_before(&mut state, Some(&old), Some(&new)).unwrap();
                    engine.fire_after(&mut state, Some(&new), Some(&old)).unwrap();
                }
                start.elapsed()
            });
        });
    }
    group.finish();
}

fn bench_prepare_only(c: &mut Criterion) {
    let (_host, engine, class) = make_engine(32);
    c.bench_function("firing/prepare_abort_32", |b| {
        b.iter(|| {
            let mut state = engine
                .prepare_for_class_event(TriggerEvent::Update, class, &[])
                .unwrap()
                .unwrap();
            engine.abort_state(&mut state);
        });
    });
}

fn bench_deferred_drain(c: &mut Criterion) {
    c.bench_function("firing/deferred_commit_64", |b| {
        b.iter_custom(|iters| {
            let dba = UserId::from_name("bench");
            let host = InMemoryHost::new(dba);
            host.auth.add_dba(dba);
            let class = host.catalog.define_class("orders", &["qty"]);
            let engine = TriggerEngine::new(host.services(), TriggerConfig::default());
            engine
                .create_trigger(
                    TriggerDefinition::builder("later")
                        .event(TriggerEvent::Insert)
                        .class(class)
                        .condition(ActionTime::Deferred, "new.qty > 0")
                        .action(ActivityKind::Expression, ActionTime::Deferred, "new.qty * 2")
                        .build()
                        .unwrap(),
                )
                .unwrap();
            engine.on_after_commit();

            let start = Instant::now();
            for _ in 0..iters {
                for qty in 0..64 {
                    let row = DbObject::new(ObjectHandle::new(), class).with("qty", qty);
                    let mut state = engine
                        .prepare_for_class_event(TriggerEvent::Insert, class, &[])
                        .unwrap()
                        .unwrap();
                    engine.fire_before(&mut state, None, Some(&row)).unwrap();
                    engine.fire_after(&mut state, Some(&row), None).unwrap();
                }
                engine.on_before_commit().unwrap();
                engine.on_after_commit();
            }
            start.elapsed()
        });
    });
}

criterion_group!(benches, bench_fire_update, bench_prepare_only, bench_deferred_drain);
criterion_main!(benches);
