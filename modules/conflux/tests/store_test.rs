//! Store pipeline tests: handlers, reducers, hooks, wait_for and set_state.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use conflux::{
    ActionDef, DispatchError, Flux, FluxError, Lifecycle, LifecycleEvent, StateStrategy, Store,
    StoreModel,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

type Log = Rc<RefCell<Vec<String>>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Counter {
    count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Location {
    country: String,
    city: String,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn count_changes<S: Clone + 'static>(store: &Store<S>) -> Rc<Cell<usize>> {
    let changes = Rc::new(Cell::new(0));
    let counter = Rc::clone(&changes);
    store.listen(move |_| counter.set(counter.get() + 1));
    changes
}

fn push(log: &Log, entry: impl Into<String>) {
    log.borrow_mut().push(entry.into());
}

// =========================================================================
// Reducer pipeline
// =========================================================================

#[test]
fn reducer_counts_every_increment_and_notifies_each_time() {
    init_tracing();
    let flux = Flux::default();
    let actions = flux.generate_actions(&["increment"]);
    let increment = actions.get("increment").unwrap().clone();
    let increment_id = increment.id().clone();

    let store = flux
        .create_store(
            "CounterStore",
            StoreModel::new("CounterStore", Counter::default()).reduce(move |state, payload| {
                if payload.action == increment_id {
                    Ok(Some(Counter {
                        count: state.count + 1,
                    }))
                } else {
                    Ok(None)
                }
            }),
        )
        .unwrap();
    let changes = count_changes(&store);

    for _ in 0..3 {
        increment.invoke(Value::Null).unwrap();
    }

    assert_eq!(store.get_state().count, 3);
    assert_eq!(changes.get(), 3);
}

#[test]
fn copy_strategy_hands_out_detached_state() {
    let flux = Flux::default();
    let copied = flux.create_unsaved_store(StoreModel::new("Copied", Counter { count: 1 }));
    let shared = flux.create_unsaved_store(
        StoreModel::new("Shared", Counter { count: 1 }).strategy(StateStrategy::Replace),
    );

    let (a, b) = (copied.get_state(), copied.get_state());
    assert_eq!(a, b);
    assert!(!Rc::ptr_eq(&a, &b));

    assert!(Rc::ptr_eq(&shared.get_state(), &shared.get_state()));
}

// =========================================================================
// Handlers
// =========================================================================

#[test]
fn bound_handlers_run_in_order_and_otherwise_catches_the_rest() {
    let flux = Flux::default();
    let log: Log = Rc::default();
    let (first, second, fallback) = (Rc::clone(&log), Rc::clone(&log), Rc::clone(&log));

    let store = flux
        .create_store(
            "CounterStore",
            StoreModel::new("CounterStore", Counter::default())
                .handler("bump", move |ctx, data| {
                    push(&first, "bump");
                    let by = data.as_u64().unwrap_or(1);
                    ctx.update(|s| s.count += by);
                    Ok(())
                })
                .handler("audit", move |ctx, _| {
                    push(&second, format!("audit:{}", ctx.state().count));
                    Ok(())
                })
                .bind_listeners([("bump", ["counter.add"]), ("audit", ["counter.add"])])
                .unwrap()
                .otherwise(move |ctx, _| {
                    push(&fallback, format!("otherwise:{}", ctx.action()));
                    Ok(())
                }),
        )
        .unwrap();
    let changes = count_changes(&store);

    flux.dispatch("counter.add", json!(5)).unwrap();
    flux.dispatch("counter.unknown", Value::Null).unwrap();

    assert_eq!(
        *log.borrow(),
        vec!["bump", "audit:5", "otherwise:counter.unknown"]
    );
    assert_eq!(store.get_state().count, 5);
    assert_eq!(changes.get(), 2);
}

#[test]
fn prevent_default_suppresses_the_notification_but_keeps_the_state() {
    let flux = Flux::default();
    let store = flux
        .create_store(
            "CounterStore",
            StoreModel::new("CounterStore", Counter::default()).on_action(
                "counter.silent",
                |ctx, _| {
                    ctx.update(|s| s.count += 1);
                    ctx.prevent_default();
                    Ok(())
                },
            ),
        )
        .unwrap();
    let changes = count_changes(&store);

    flux.dispatch("counter.silent", Value::Null).unwrap();

    assert_eq!(store.get_state().count, 1);
    assert_eq!(changes.get(), 0);
}

#[test]
fn bind_actions_accepts_plain_and_prefixed_names() {
    let flux = Flux::default();
    let actions = flux.create_actions(
        "counter",
        [ActionDef::identity("increment"), ActionDef::identity("reset")],
    );
    let store = flux
        .create_store(
            "CounterStore",
            StoreModel::new("CounterStore", Counter::default())
                .handler("on_increment", |ctx, _| {
                    ctx.update(|s| s.count += 1);
                    Ok(())
                })
                .handler("reset", |ctx, _| {
                    ctx.set_state(Counter::default());
                    Ok(())
                })
                .bind_actions(&actions)
                .unwrap(),
        )
        .unwrap();

    let increment = actions.get("increment").unwrap();
    increment.invoke(Value::Null).unwrap();
    increment.invoke(Value::Null).unwrap();
    assert_eq!(store.get_state().count, 2);

    actions.get("reset").unwrap().invoke(Value::Null).unwrap();
    assert_eq!(store.get_state().count, 0);
}

#[test]
fn bind_actions_rejects_both_plain_and_prefixed_handlers() {
    let flux = Flux::default();
    let actions = flux.create_actions("counter", [ActionDef::identity("increment")]);

    let err = StoreModel::new("CounterStore", Counter::default())
        .handler("increment", |_, _| Ok(()))
        .handler("on_increment", |_, _| Ok(()))
        .bind_actions(&actions)
        .err()
        .unwrap();

    assert!(matches!(
        err,
        FluxError::DuplicateBinding { ref first, ref second, .. }
            if first == "increment" && second == "on_increment"
    ));
}

// =========================================================================
// Errors
// =========================================================================

#[test]
fn handler_error_aborts_the_dispatch_and_the_next_one_starts_clean() {
    let flux = Flux::default();
    let after_each = Rc::new(Cell::new(0));
    let hook_calls = Rc::clone(&after_each);

    let store = flux
        .create_store(
            "CounterStore",
            StoreModel::new("CounterStore", Counter::default())
                .on_action("counter.fail", |_, _| anyhow::bail!("rejected"))
                .on_action("counter.inc", |ctx, _| {
                    ctx.update(|s| s.count += 1);
                    Ok(())
                })
                .on(Lifecycle::AfterEach, move |_| hook_calls.set(hook_calls.get() + 1)),
        )
        .unwrap();

    let err = flux.dispatch("counter.fail", Value::Null).unwrap_err();
    assert!(matches!(err, FluxError::Handler(_)));
    assert_eq!(err.to_string(), "rejected");
    assert_eq!(after_each.get(), 0);
    assert!(!flux.is_dispatching());

    flux.dispatch("counter.inc", Value::Null).unwrap();
    assert_eq!(store.get_state().count, 1);
    assert_eq!(after_each.get(), 1);
}

#[test]
fn store_with_error_hook_absorbs_handler_errors() {
    let flux = Flux::default();
    let seen: Log = Rc::default();
    let errors = Rc::clone(&seen);

    let store = flux
        .create_store(
            "CounterStore",
            StoreModel::new("CounterStore", Counter { count: 7 })
                .on_action("counter.fail", |_, _| anyhow::bail!("bad input"))
                .on(Lifecycle::Error, move |event| {
                    if let LifecycleEvent::Error {
                        error,
                        payload,
                        state,
                    } = event
                    {
                        push(&errors, format!("{}:{}:{}", payload.action, error, state.count));
                    }
                }),
        )
        .unwrap();
    let changes = count_changes(&store);

    flux.dispatch("counter.fail", Value::Null).unwrap();

    assert_eq!(*seen.borrow(), vec!["counter.fail:bad input:7"]);
    assert_eq!(changes.get(), 0);
}

#[test]
fn absorbed_reducer_error_does_not_stop_other_stores() {
    let flux = Flux::default();
    let errors = Rc::new(Cell::new(0));
    let error_calls = Rc::clone(&errors);

    let failing = flux
        .create_store(
            "FailingStore",
            StoreModel::new("FailingStore", Counter::default())
                .reduce(|_, _| anyhow::bail!("cannot reduce"))
                .on(Lifecycle::Error, move |_| error_calls.set(error_calls.get() + 1)),
        )
        .unwrap();
    let healthy = flux
        .create_store(
            "HealthyStore",
            StoreModel::new("HealthyStore", Counter::default()).reduce(|state, _| {
                Ok(Some(Counter {
                    count: state.count + 1,
                }))
            }),
        )
        .unwrap();
    let failing_changes = count_changes(&failing);

    assert!(flux.dispatch("counter.tick", Value::Null).is_ok());

    assert_eq!(errors.get(), 1);
    assert_eq!(failing_changes.get(), 0);
    assert_eq!(failing.get_state().count, 0);
    assert_eq!(healthy.get_state().count, 1);
}

#[test]
fn output_shapes_what_listeners_receive() {
    let flux = Flux::default();
    let store = flux
        .create_store(
            "CounterStore",
            StoreModel::new("CounterStore", Counter::default())
                .on_action("counter.inc", |ctx, _| {
                    ctx.update(|s| s.count += 1);
                    Ok(())
                })
                .output(|state| Counter {
                    count: state.count * 10,
                }),
        )
        .unwrap();
    let heard = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&heard);
    store.listen(move |state| log.borrow_mut().push(state.count));

    flux.dispatch("counter.inc", Value::Null).unwrap();
    flux.dispatch("counter.inc", Value::Null).unwrap();

    assert_eq!(*heard.borrow(), vec![10, 20]);
    assert_eq!(store.get_state().count, 2);
}

// =========================================================================
// Hooks and listeners
// =========================================================================

#[test]
fn before_and_after_each_see_the_payload_and_state() {
    let flux = Flux::default();
    let log: Log = Rc::default();
    let (before, after) = (Rc::clone(&log), Rc::clone(&log));

    flux.create_store(
        "CounterStore",
        StoreModel::new("CounterStore", Counter::default())
            .on_action("counter.inc", |ctx, _| {
                ctx.update(|s| s.count += 1);
                Ok(())
            })
            .on(Lifecycle::BeforeEach, move |event| {
                if let LifecycleEvent::BeforeEach { payload, state } = event {
                    push(&before, format!("before:{}:{}", payload.action, state.count));
                }
            })
            .on(Lifecycle::AfterEach, move |event| {
                if let LifecycleEvent::AfterEach { payload, state } = event {
                    push(&after, format!("after:{}:{}", payload.action, state.count));
                }
            }),
    )
    .unwrap();

    flux.dispatch("counter.inc", Value::Null).unwrap();

    assert_eq!(
        *log.borrow(),
        vec!["before:counter.inc:0", "after:counter.inc:1"]
    );
}

#[test]
fn removing_a_listener_fires_the_unlisten_hook() {
    let flux = Flux::default();
    let store = flux.create_unsaved_store(StoreModel::new("CounterStore", Counter::default()));
    let unlistened = Rc::new(Cell::new(0));
    let hook_calls = Rc::clone(&unlistened);
    store.on(Lifecycle::Unlisten, move |_| hook_calls.set(hook_calls.get() + 1));

    let first = store.listen(|_| {});
    let second = store.listen(|_| {});
    assert_eq!(store.listener_count(), 2);

    assert!(first.dispose());
    assert!(store.unlisten(second.id()));
    assert!(!store.unlisten(second.id()));

    assert_eq!(unlistened.get(), 2);
    assert_eq!(store.listener_count(), 0);
}

// =========================================================================
// wait_for between stores
// =========================================================================

#[test]
fn stores_wait_for_stores_registered_after_them() {
    init_tracing();
    let flux = Flux::default();
    let log: Log = Rc::default();
    let country_token: Rc<Cell<Option<conflux::Token>>> = Rc::default();

    let city_log = Rc::clone(&log);
    let waits_on = Rc::clone(&country_token);
    let city = flux
        .create_store(
            "CityStore",
            StoreModel::new("CityStore", Location::default()).on_action(
                "location.update_country",
                move |ctx, _| {
                    let token = waits_on.get().ok_or_else(|| anyhow::anyhow!("no token"))?;
                    ctx.wait_for(&[&token])?;
                    push(&city_log, "city");
                    ctx.update(|s| s.city = "paris".into());
                    Ok(())
                },
            ),
        )
        .unwrap();

    let country_log = Rc::clone(&log);
    let country = flux
        .create_store(
            "CountryStore",
            StoreModel::new("CountryStore", Location::default()).on_action(
                "location.update_country",
                move |ctx, data| {
                    push(&country_log, "country");
                    let name = data.as_str().unwrap_or_default().to_string();
                    ctx.update(|s| s.country = name);
                    Ok(())
                },
            ),
        )
        .unwrap();
    country_token.set(Some(conflux::DispatchSource::dispatch_token(&country)));

    flux.dispatch("location.update_country", json!("france")).unwrap();

    assert_eq!(*log.borrow(), vec!["country", "city"]);
    assert_eq!(country.get_state().country, "france");
    assert_eq!(city.get_state().city, "paris");
}

#[test]
fn waiting_on_nothing_is_rejected() {
    let flux = Flux::default();
    let _store = flux.create_unsaved_store(
        StoreModel::new("CounterStore", Counter::default())
            .on_action("counter.inc", |ctx, _| Ok(ctx.wait_for(&[])?)),
    );

    let err = flux.dispatch("counter.inc", Value::Null).unwrap_err();
    assert!(matches!(err, FluxError::MissingDependencies));
}

#[test]
fn stores_waiting_on_each_other_fail_with_a_circular_dependency() {
    let flux = Flux::default();
    let tokens: Rc<RefCell<Vec<conflux::Token>>> = Rc::default();

    let mut stores = Vec::new();
    for (name, other) in [("A", 1usize), ("B", 0usize)] {
        let tokens = Rc::clone(&tokens);
        stores.push(flux.create_unsaved_store(
            StoreModel::new(name, Counter::default()).on_action("tick", move |ctx, _| {
                let token = tokens.borrow()[other];
                ctx.wait_for(&[&token])?;
                Ok(())
            }),
        ));
    }
    tokens.borrow_mut().extend(
        stores
            .iter()
            .map(conflux::DispatchSource::dispatch_token),
    );

    let err = flux.dispatch("tick", Value::Null).unwrap_err();
    assert!(matches!(
        err,
        FluxError::Dispatch(DispatchError::CircularDependency(_))
    ));
    assert!(!flux.is_dispatching());
}

// =========================================================================
// set_state
// =========================================================================

#[test]
fn set_state_outside_a_dispatch_applies_and_emits() {
    let flux = Flux::default();
    let store = flux.create_unsaved_store(StoreModel::new("CounterStore", Counter::default()));
    let changes = count_changes(&store);

    store.set_state(Counter { count: 4 }).unwrap();
    store.update(|s| s.count *= 2).unwrap();

    assert_eq!(store.get_state().count, 8);
    assert_eq!(changes.get(), 2);
}

#[test]
fn set_state_during_another_stores_dispatch_is_rejected() {
    let flux = Flux::default();
    let target = flux.create_unsaved_store(StoreModel::new("Target", Counter::default()));
    let outcome: Rc<RefCell<Option<Result<(), FluxError>>>> = Rc::default();

    let handle = target.clone();
    let result = Rc::clone(&outcome);
    let _meddler = flux.create_unsaved_store(StoreModel::new("Meddler", Counter::default()).on_action(
        "meddle",
        move |_, _| {
            *result.borrow_mut() = Some(handle.set_state(Counter { count: 99 }));
            Ok(())
        },
    ));

    flux.dispatch("meddle", Value::Null).unwrap();

    assert!(matches!(
        outcome.borrow_mut().take(),
        Some(Err(FluxError::SetStateDuringDispatch { ref store })) if store == "Target"
    ));
    assert_eq!(target.get_state().count, 0);
}
