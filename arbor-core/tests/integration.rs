//! Integration Tests for Scope Trees
//!
//! These tests drive the public API end to end: watchers and the digest
//! loop, the task queues, the event bus and scope lifecycle.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use arbor_core::{
    Deregistration, Event, ManualScheduler, Object, Probe, RecordingErrorSink, Scope, ScopeError,
    TokioScheduler, Value, DESTROY_EVENT,
};

/// A root wired to a manual scheduler and a recording sink.
fn tree() -> (Scope, Rc<ManualScheduler>, Rc<RecordingErrorSink>) {
    let scheduler = Rc::new(ManualScheduler::new());
    let sink = Rc::new(RecordingErrorSink::new());
    let root = Scope::builder()
        .scheduler(scheduler.clone())
        .error_sink(sink.clone())
        .build()
        .unwrap();
    (root, scheduler, sink)
}

type Log = Rc<RefCell<Vec<String>>>;

fn log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.borrow().clone()
}

// ---- Watchers and digest ----

/// The first reaction call gets the same reference as new and old.
#[test]
fn first_fire_passes_identical_values() {
    let (root, _, _) = tree();
    let list = Value::array([1, 2]);
    root.set("list", list.clone());
    root.set("nan", f64::NAN);

    let same = Rc::new(RefCell::new(Vec::new()));
    for key in ["list", "nan"] {
        let same = Rc::clone(&same);
        root.watch(key, move |new: &Value, old: &Value, _: &Scope| {
            same.borrow_mut().push(std::ptr::eq(new, old));
        });
    }

    root.digest().unwrap();
    assert_eq!(*same.borrow(), vec![true, true]);

    // NaN stays NaN, so nothing fires again.
    root.digest().unwrap();
    assert_eq!(same.borrow().len(), 2);
}

/// Watchers on one scope fire in registration order.
#[test]
fn watchers_fire_in_registration_order() {
    let (root, _, _) = tree();
    let order = log();
    for key in ["a", "b", "c"] {
        let order = Rc::clone(&order);
        root.watch(key, move |_: &Value, _: &Value, _: &Scope| {
            order.borrow_mut().push(key.to_string());
        });
    }

    root.digest().unwrap();
    assert_eq!(entries(&order), vec!["a", "b", "c"]);
}

/// A change made by one reaction is seen by a later watcher in the same
/// digest call.
#[test]
fn changes_propagate_within_one_digest() {
    let (root, _, _) = tree();
    root.watch("a", |new: &Value, _: &Value, scope: &Scope| {
        if let Some(a) = new.as_f64() {
            scope.set("b", a * 10.0);
        }
    });
    let seen = Rc::new(RefCell::new(Value::Undefined));
    {
        let seen = Rc::clone(&seen);
        root.watch("b", move |new: &Value, _: &Value, _: &Scope| {
            *seen.borrow_mut() = new.clone();
        });
    }

    root.set("a", 4);
    root.digest().unwrap();
    assert_eq!(*seen.borrow(), Value::from(40));

    root.set("a", 5);
    root.digest().unwrap();
    assert_eq!(*seen.borrow(), Value::from(50));
}

/// Parents are checked before children, children in creation order.
#[test]
fn digest_walks_depth_first() {
    let (root, _, _) = tree();
    let first = root.new_child();
    let nested = first.new_child();
    let second = root.new_child();
    let order = log();

    for (scope, tag) in [(&second, "second"), (&nested, "nested"), (&root, "root"), (&first, "first")] {
        let order = Rc::clone(&order);
        scope.watch("x", move |_: &Value, _: &Value, _: &Scope| {
            order.borrow_mut().push(tag.to_string());
        });
    }

    root.digest().unwrap();
    assert_eq!(entries(&order), vec!["root", "first", "nested", "second"]);
}

/// Digesting a child leaves the rest of the tree alone.
#[test]
fn digest_from_child_covers_only_its_subtree() {
    let (root, _, _) = tree();
    let child = root.new_child();
    let hits = Rc::new(Cell::new(0));
    {
        let hits = Rc::clone(&hits);
        root.watch("x", move |_: &Value, _: &Value, _: &Scope| hits.set(hits.get() + 1));
    }
    {
        let hits = Rc::clone(&hits);
        child.watch("x", move |_: &Value, _: &Value, _: &Scope| hits.set(hits.get() + 10));
    }

    child.digest().unwrap();
    assert_eq!(hits.get(), 10);
}

/// Two watchers feeding each other hit the iteration limit, and the tree is
/// usable afterwards.
#[test]
fn runaway_watchers_abort_with_diagnostics() {
    let root = Scope::builder().ttl(2).build().unwrap();
    root.set("a", 0);
    root.set("b", 0);

    let ping = root.watch("a", |new: &Value, _: &Value, scope: &Scope| {
        scope.set("b", new.as_f64().unwrap_or(0.0) + 1.0);
    });
    let pong = root.watch("b", |new: &Value, _: &Value, scope: &Scope| {
        scope.set("a", new.as_f64().unwrap_or(0.0) + 1.0);
    });

    let err = root.digest().unwrap_err();
    let ScopeError::IterationLimit { ttl, laps } = &err else {
        panic!("expected iteration limit, got {err}");
    };
    assert_eq!(*ttl, 2);
    assert!(!laps.is_empty() && laps.len() <= 5);
    assert_eq!(laps[0][0].expression, "a");

    let message = err.to_string();
    assert!(message.starts_with("2 digest() iterations reached. Aborting!"));
    assert!(message.contains(r#""msg":"b""#));
    assert_eq!(root.phase(), None);

    // Break the loop; the next digest settles.
    ping.deregister();
    pong.deregister();
    root.watch("a", |_: &Value, _: &Value, _: &Scope| {});
    assert!(root.digest().is_ok());
}

/// Watchers added mid-digest run in the same digest; removing a later one
/// stops it from firing; removing the current one does not skip the next.
#[test]
fn registry_changes_during_digest() {
    let (root, _, _) = tree();
    let order = log();

    // Deregistering a later watcher from an earlier reaction.
    let victim_slot: Rc<RefCell<Option<Deregistration>>> = Rc::new(RefCell::new(None));
    {
        let victim_slot = Rc::clone(&victim_slot);
        let order = Rc::clone(&order);
        root.watch("x", move |_: &Value, _: &Value, _: &Scope| {
            order.borrow_mut().push("killer".to_string());
            if let Some(victim) = victim_slot.borrow().as_ref() {
                victim.deregister();
            }
        });
    }
    {
        let order = Rc::clone(&order);
        let victim = root.watch("x", move |_: &Value, _: &Value, _: &Scope| {
            order.borrow_mut().push("victim".to_string());
        });
        *victim_slot.borrow_mut() = Some(victim);
    }

    // Deregistering itself, then the next watcher must still run.
    let own: Rc<RefCell<Option<Deregistration>>> = Rc::new(RefCell::new(None));
    {
        let own_slot = Rc::clone(&own);
        let order = Rc::clone(&order);
        let handle = root.watch("x", move |_: &Value, _: &Value, _: &Scope| {
            order.borrow_mut().push("self-removing".to_string());
            if let Some(handle) = own_slot.borrow().as_ref() {
                handle.deregister();
            }
        });
        *own.borrow_mut() = Some(handle);
    }

    // Registering a new watcher from a reaction.
    {
        let order = Rc::clone(&order);
        root.watch("x", move |_: &Value, _: &Value, scope: &Scope| {
            order.borrow_mut().push("next".to_string());
            let order = Rc::clone(&order);
            scope.watch("y", move |_: &Value, _: &Value, _: &Scope| {
                order.borrow_mut().push("added".to_string());
            });
        });
    }

    root.digest().unwrap();
    assert_eq!(
        entries(&order),
        vec!["killer", "self-removing", "next", "added"]
    );
    assert_eq!(root.count_watchers(), 3);
}

/// Constant probes fire once and leave the registry.
#[test]
fn constant_watchers_remove_themselves() {
    let (root, _, _) = tree();
    let calls = Rc::new(Cell::new(0));
    {
        let calls = Rc::clone(&calls);
        root.watch("[1, 2, 3]", move |new: &Value, _: &Value, _: &Scope| {
            assert_eq!(new.as_array().map(|a| a.len()), Some(3));
            calls.set(calls.get() + 1);
        });
    }
    assert_eq!(root.count_watchers(), 1);

    root.digest().unwrap();
    root.digest().unwrap();
    assert_eq!(calls.get(), 1);
    assert_eq!(root.count_watchers(), 0);
}

/// Deep watchers see nested changes, keep NaN stable and survive cycles.
#[test]
fn deep_watchers() {
    let (root, _, _) = tree();
    let object = Object::new();
    object.insert("items", Value::array([1, 2]));
    object.insert("nan", f64::NAN);
    // A cycle through the object itself.
    object.insert("me", Value::Object(object.clone()));
    root.set("model", Value::Object(object.clone()));

    let deep_calls = Rc::new(Cell::new(0));
    let shallow_calls = Rc::new(Cell::new(0));
    {
        let deep_calls = Rc::clone(&deep_calls);
        root.watch_deep("model", move |_: &Value, _: &Value, _: &Scope| {
            deep_calls.set(deep_calls.get() + 1);
        });
    }
    {
        let shallow_calls = Rc::clone(&shallow_calls);
        root.watch("model", move |_: &Value, _: &Value, _: &Scope| {
            shallow_calls.set(shallow_calls.get() + 1);
        });
    }

    root.digest().unwrap();
    root.digest().unwrap();
    assert_eq!((deep_calls.get(), shallow_calls.get()), (1, 1));

    if let Some(items) = object.get("items").and_then(|v| v.as_array().cloned()) {
        items.push(3);
    }
    root.digest().unwrap();
    assert_eq!((deep_calls.get(), shallow_calls.get()), (2, 1));
}

/// Errors from probes and reactions are reported and the digest carries on.
#[test]
fn watcher_errors_are_reported_not_fatal() {
    let (root, _, sink) = tree();
    root.watch(
        Probe::func(|_: &Scope| Err::<Value, _>("probe broke")),
        |_: &Value, _: &Value, _: &Scope| {},
    );
    root.watch("a", |_: &Value, _: &Value, _: &Scope| Err::<(), _>("reaction broke"));
    let reached = Rc::new(Cell::new(false));
    {
        let reached = Rc::clone(&reached);
        root.watch("b", move |_: &Value, _: &Value, _: &Scope| reached.set(true));
    }

    root.digest().unwrap();
    assert!(reached.get());
    // The broken probe is evaluated, and reported, on both laps.
    assert_eq!(
        sink.messages(),
        vec!["probe broke", "reaction broke", "probe broke"]
    );
    assert!(sink
        .entries()
        .iter()
        .all(|entry| entry.cause.as_deref() == Some("watcher")));
}

/// Re-entering the tree from a reaction fails without corrupting it.
#[test]
fn reentrant_digest_and_apply_fail() {
    let (root, _, _) = tree();
    let errors = Rc::new(RefCell::new(Vec::new()));
    {
        let errors = Rc::clone(&errors);
        root.watch("x", move |_: &Value, _: &Value, scope: &Scope| {
            errors.borrow_mut().push(scope.digest().unwrap_err().to_string());
            errors
                .borrow_mut()
                .push(scope.apply(|_: &Scope| {}).unwrap_err().to_string());
        });
    }

    root.digest().unwrap();
    assert_eq!(
        *errors.borrow(),
        vec![
            "$digest already in progress".to_string(),
            "$digest already in progress".to_string()
        ]
    );
    assert_eq!(root.phase(), None);
    assert!(root.apply(|_: &Scope| {}).is_ok());
}

// ---- Watch groups and collections ----

#[test]
fn watch_group_fires_once_per_digest() {
    let (root, _, _) = tree();
    root.set("a", 1);
    root.set("b", 2);
    let calls = Rc::new(RefCell::new(Vec::new()));
    {
        let calls = Rc::clone(&calls);
        root.watch_group(["a", "b"], move |new: &[Value], old: &[Value], _: &Scope| {
            calls.borrow_mut().push((new.to_vec(), old.to_vec()));
        });
    }

    root.digest().unwrap();
    {
        let calls = calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, vec![Value::from(1), Value::from(2)]);
        assert_eq!(calls[0].0, calls[0].1);
    }

    root.set("a", 10);
    root.set("b", 20);
    root.digest().unwrap();
    let calls = calls.borrow();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].0, vec![Value::from(10), Value::from(20)]);
    assert_eq!(calls[1].1, vec![Value::from(1), Value::from(2)]);
}

#[test]
fn empty_watch_group_fires_once_and_can_be_cancelled() {
    let (root, _, _) = tree();
    let calls = Rc::new(Cell::new(0));
    {
        let calls = Rc::clone(&calls);
        root.watch_group(Vec::<Probe>::new(), move |new: &[Value], old: &[Value], _: &Scope| {
            assert!(new.is_empty() && old.is_empty());
            calls.set(calls.get() + 1);
        });
    }
    root.digest().unwrap();
    root.digest().unwrap();
    assert_eq!(calls.get(), 1);

    let cancelled = {
        let calls = Rc::clone(&calls);
        root.watch_group(Vec::<Probe>::new(), move |_: &[Value], _: &[Value], _: &Scope| {
            calls.set(calls.get() + 100);
        })
    };
    cancelled.deregister();
    root.digest().unwrap();
    assert_eq!(calls.get(), 1);
}

#[test]
fn collection_watch_tracks_membership_only() {
    let (root, _, _) = tree();
    let inner = Object::new();
    let list = Value::array([Value::Object(inner.clone()), Value::from(2)]);
    root.set("coll", list.clone());

    let calls = Rc::new(RefCell::new(Vec::new()));
    {
        let calls = Rc::clone(&calls);
        root.watch_collection("coll", move |new: &Value, old: &Value, _: &Scope| {
            calls.borrow_mut().push((new.clone(), old.clone(), std::ptr::eq(new, old)));
        });
    }

    root.digest().unwrap();
    assert_eq!(calls.borrow().len(), 1);
    assert!(calls.borrow()[0].2);

    // Nested mutation inside an element is invisible.
    inner.insert("deep", true);
    root.digest().unwrap();
    assert_eq!(calls.borrow().len(), 1);

    // Adding an element is a change; old is the previous membership.
    list.as_array().unwrap().push(3);
    root.digest().unwrap();
    {
        let calls = calls.borrow();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1.as_array().map(|a| a.len()), Some(2));
        assert_eq!(calls[1].0.as_array().map(|a| a.len()), Some(3));
    }

    // Switching to an object and back both fire with the right shapes.
    root.set("coll", Value::object([("a", 1)]));
    root.digest().unwrap();
    root.set("coll", Value::array([1]));
    root.digest().unwrap();
    let calls = calls.borrow();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[2].1.type_name(), "array");
    assert_eq!(calls[2].0.type_name(), "object");
    assert_eq!(calls[3].1.type_name(), "object");
    assert_eq!(calls[3].0.type_name(), "array");
}

// ---- Suspension ----

#[test]
fn suspended_subtree_is_skipped() {
    let (root, _, _) = tree();
    let child = root.new_child();
    let grandchild = child.new_child();
    let hits = Rc::new(Cell::new(0));
    {
        let hits = Rc::clone(&hits);
        grandchild.watch("x", move |_: &Value, _: &Value, _: &Scope| hits.set(hits.get() + 1));
    }

    child.suspend();
    root.digest().unwrap();
    assert_eq!(hits.get(), 0);
    assert!(!grandchild.is_suspended());

    child.resume();
    root.digest().unwrap();
    assert_eq!(hits.get(), 1);
}

/// Resuming a descendant from an ancestor's reaction checks it in the same
/// lap.
#[test]
fn resume_from_ancestor_reaction_is_immediate() {
    let (root, _, _) = tree();
    let child = root.new_child();
    child.suspend();

    let laps_seen = Rc::new(RefCell::new(Vec::new()));
    {
        let child = child.downgrade();
        root.watch("go", move |_: &Value, _: &Value, _: &Scope| {
            if let Some(child) = child.upgrade() {
                child.resume();
            }
        });
    }
    {
        let laps_seen = Rc::clone(&laps_seen);
        // Evaluated once per lap, so it doubles as a lap counter.
        let counter = Rc::new(Cell::new(0));
        let lap = Rc::clone(&counter);
        root.watch(
            Probe::func(move |_: &Scope| {
                lap.set(lap.get() + 1);
                Value::Null
            }),
            |_: &Value, _: &Value, _: &Scope| {},
        );
        child.watch("x", move |_: &Value, _: &Value, _: &Scope| {
            laps_seen.borrow_mut().push(counter.get());
        });
    }

    root.digest().unwrap();
    // The child watcher ran during the first lap, right after the root's.
    assert_eq!(*laps_seen.borrow(), vec![1]);
}

// ---- Queues ----

#[test]
fn apply_async_calls_coalesce() {
    let (root, scheduler, _) = tree();
    let digests = Rc::new(Cell::new(0));
    {
        let digests = Rc::clone(&digests);
        root.watch(
            Probe::func(move |_: &Scope| {
                digests.set(digests.get() + 1);
                Value::Null
            }),
            |_: &Value, _: &Value, _: &Scope| {},
        );
    }

    root.apply_async(|scope: &Scope| scope.set("a", 1));
    root.apply_async(|scope: &Scope| scope.set("b", 2));
    assert_eq!(scheduler.pending(), 1);
    assert!(root.get("a").is_undefined());

    scheduler.flush();
    assert_eq!(root.get("a"), Value::from(1));
    assert_eq!(root.get("b"), Value::from(2));
    // One digest: a first lap that fires and a confirming lap.
    assert_eq!(digests.get(), 2);
}

#[test]
fn root_digest_cancels_scheduled_apply_async() {
    let (root, scheduler, _) = tree();
    root.apply_async(|scope: &Scope| scope.set("a", 1));
    assert_eq!(scheduler.pending(), 1);

    root.digest().unwrap();
    assert_eq!(root.get("a"), Value::from(1));
    assert_eq!(scheduler.pending(), 0);
}

#[test]
fn post_digest_runs_once_in_order_and_may_digest() {
    let (root, _, _) = tree();
    let order = log();
    {
        let order = Rc::clone(&order);
        root.post_digest(move |scope: &Scope| {
            order.borrow_mut().push("first".to_string());
            scope.set("late", 1);
            scope.digest()
        });
    }
    {
        let order = Rc::clone(&order);
        root.post_digest(move |_: &Scope| order.borrow_mut().push("second".to_string()));
    }
    let late = Rc::new(RefCell::new(Value::Undefined));
    {
        let late = Rc::clone(&late);
        root.watch("late", move |new: &Value, _: &Value, _: &Scope| {
            *late.borrow_mut() = new.clone();
        });
    }

    root.digest().unwrap();
    root.digest().unwrap();
    assert_eq!(entries(&order), vec!["first", "second"]);
    assert_eq!(*late.borrow(), Value::from(1));
}

#[test]
fn eval_async_from_reaction_runs_in_same_digest() {
    let (root, _, _) = tree();
    let child = root.new_child();
    child.watch("x", |_: &Value, _: &Value, scope: &Scope| {
        scope.eval_async(|scope: &Scope| scope.set("async", true));
    });

    child.digest().unwrap();
    assert_eq!(child.get("async"), Value::from(true));
    assert_eq!(child.phase(), None);
}

#[tokio::test]
async fn tokio_scheduler_flushes_eval_async() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let root = Scope::builder()
                .scheduler(Rc::new(TokioScheduler::new()))
                .build()
                .unwrap();
            let seen = Rc::new(Cell::new(false));
            {
                let seen = Rc::clone(&seen);
                root.watch("ready", move |new: &Value, _: &Value, _: &Scope| {
                    if new.as_bool() == Some(true) {
                        seen.set(true);
                    }
                });
            }

            root.eval_async(|scope: &Scope| scope.set("ready", true));
            assert!(!seen.get());

            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            assert!(seen.get());
        })
        .await;
}

// ---- Events ----

#[test]
fn emit_stops_and_broadcast_does_not() {
    let (root, _, _) = tree();
    let child = root.new_child();
    let grandchild = child.new_child();
    let order = log();

    for (scope, tag) in [(&root, "root"), (&child, "child"), (&grandchild, "grandchild")] {
        let order = Rc::clone(&order);
        scope.on("ping", move |event: &mut Event, _: &[Value]| {
            order.borrow_mut().push(tag.to_string());
            event.stop_propagation();
            event.prevent_default();
        });
    }

    let emitted = grandchild.emit("ping", &[]);
    assert_eq!(entries(&order), vec!["grandchild"]);
    assert!(emitted.default_prevented());
    assert!(emitted.current_scope().is_none());

    order.borrow_mut().clear();
    let broadcast = root.broadcast("ping", &[]);
    assert_eq!(entries(&order), vec!["root", "child", "grandchild"]);
    assert!(broadcast.current_scope().is_none());
    assert_eq!(broadcast.target_scope(), &root);
}

#[test]
fn listener_errors_are_reported_and_dispatch_continues() {
    let (root, _, sink) = tree();
    let child = root.new_child();
    let args_seen = Rc::new(RefCell::new(Vec::new()));
    child.on("save", |_: &mut Event, _: &[Value]| Err::<(), _>("listener broke"));
    {
        let args_seen = Rc::clone(&args_seen);
        root.on("save", move |event: &mut Event, args: &[Value]| {
            assert_eq!(event.name(), "save");
            args_seen.borrow_mut().extend(args.iter().cloned());
        });
    }

    child.emit("save", &[Value::from("doc"), Value::from(3)]);
    assert_eq!(*args_seen.borrow(), vec![Value::from("doc"), Value::from(3)]);
    assert_eq!(sink.messages(), vec!["listener broke".to_string()]);
    assert_eq!(sink.entries()[0].cause.as_deref(), Some("listener"));
}

#[test]
fn listener_counts_roll_back() {
    let (root, _, _) = tree();
    let child = root.new_child();
    let hits = Rc::new(Cell::new(0));

    let make = |scope: &Scope| {
        let hits = Rc::clone(&hits);
        scope.on("ping", move |_: &mut Event, _: &[Value]| hits.set(hits.get() + 1))
    };
    let first = make(&child);
    let _second = make(&child);
    root.broadcast("ping", &[]);
    assert_eq!(hits.get(), 2);

    first.deregister();
    first.deregister();
    root.broadcast("ping", &[]);
    assert_eq!(hits.get(), 3);

    // Destroying the child takes its last listener out of the root's count.
    child.destroy();
    let other = root.new_child();
    let _hidden = make(&other);
    root.broadcast("ping", &[]);
    assert_eq!(hits.get(), 4);
}

// ---- Lifecycle ----

#[test]
fn destroy_is_idempotent_and_leaves_inert_handles() {
    let (root, scheduler, sink) = tree();
    let child = root.new_child();
    let grandchild = child.new_child();
    grandchild.watch("x", |_: &Value, _: &Value, _: &Scope| {});
    child.watch("x", |_: &Value, _: &Value, _: &Scope| {});
    child.on("ping", |_: &mut Event, _: &[Value]| {});
    assert_eq!(root.count_watchers(), 2);
    assert_eq!(root.count_child_scopes(), 2);

    // Work scheduled before the destroy, firing after it.
    let late = child.clone();
    child.apply_async(move |_: &Scope| {
        late.set("after", true);
        late.eval_async(|_: &Scope| {});
    });

    let destroyed = Rc::new(Cell::new(0));
    {
        let destroyed = Rc::clone(&destroyed);
        grandchild.on(DESTROY_EVENT, move |_: &mut Event, _: &[Value]| {
            destroyed.set(destroyed.get() + 1);
        });
    }

    child.destroy();
    child.destroy();
    assert_eq!(destroyed.get(), 1);
    assert_eq!(root.count_watchers(), 0);
    assert_eq!(root.count_child_scopes(), 0);

    scheduler.flush();
    assert!(sink.is_empty());

    assert!(child.watch("x", |_: &Value, _: &Value, _: &Scope| {}).is_inert());
    assert!(child.on("ping", |_: &mut Event, _: &[Value]| {}).is_inert());
    assert!(child.apply(|_: &Scope| {}).is_ok());
    assert!(child.digest().is_ok());
}

#[test]
fn destroying_a_scope_mid_digest_keeps_the_walk_going() {
    let (root, _, _) = tree();
    let doomed = root.new_child();
    let _doomed_child = doomed.new_child();
    let survivor = root.new_child();
    let hits = Rc::new(Cell::new(0));

    {
        let doomed = doomed.clone();
        root.watch("x", move |_: &Value, _: &Value, _: &Scope| doomed.destroy());
    }
    doomed.watch("x", |_: &Value, _: &Value, _: &Scope| {});
    {
        let hits = Rc::clone(&hits);
        survivor.watch("x", move |_: &Value, _: &Value, _: &Scope| hits.set(hits.get() + 1));
    }

    root.digest().unwrap();
    assert_eq!(hits.get(), 1);
    assert!(doomed.is_destroyed());
    assert_eq!(root.count_child_scopes(), 1);
}

/// A `$destroy` listener that destroys an ancestor does not make the event
/// reach its own scope a second time.
#[test]
fn destroy_from_destroy_listener_reaches_each_scope_once() {
    let (root, _, _) = tree();
    let parent = root.new_child();
    let child = parent.new_child();
    child.watch("x", |_: &Value, _: &Value, _: &Scope| {});
    let child_fired = Rc::new(Cell::new(0));
    let parent_fired = Rc::new(Cell::new(0));

    {
        let child_fired = Rc::clone(&child_fired);
        let parent = parent.clone();
        child.on(DESTROY_EVENT, move |_: &mut Event, _: &[Value]| {
            child_fired.set(child_fired.get() + 1);
            parent.destroy();
        });
    }
    {
        let parent_fired = Rc::clone(&parent_fired);
        parent.on(DESTROY_EVENT, move |_: &mut Event, _: &[Value]| {
            parent_fired.set(parent_fired.get() + 1);
        });
    }

    child.destroy();
    assert_eq!(child_fired.get(), 1);
    assert_eq!(parent_fired.get(), 1);
    assert!(parent.is_destroyed() && child.is_destroyed());
    assert_eq!(root.count_child_scopes(), 0);
    assert_eq!(root.count_watchers(), 0);

    // The tree is still usable and its counts are not skewed.
    let fresh = root.new_child();
    fresh.watch("x", |_: &Value, _: &Value, _: &Scope| {});
    assert_eq!(root.count_watchers(), 1);
}

/// Scopes on their way out take no new children, so nothing created by a
/// `$destroy` listener outlives the teardown.
#[test]
fn scopes_created_during_destroy_are_inert() {
    let (root, _, _) = tree();
    let parent = root.new_child();
    let child = parent.new_child();
    let spawned: Rc<RefCell<Vec<Scope>>> = Rc::new(RefCell::new(Vec::new()));

    {
        let spawned = Rc::clone(&spawned);
        let root = root.clone();
        child.on(DESTROY_EVENT, move |event: &mut Event, _: &[Value]| {
            if let Some(current) = event.current_scope() {
                let grandchild = current.new_child();
                grandchild.watch("x", |_: &Value, _: &Value, _: &Scope| {});
                spawned.borrow_mut().push(grandchild);
                // Attaching under a dying scope from elsewhere fails too.
                let attached = root.new_child_with(false, Some(current));
                attached.watch("x", |_: &Value, _: &Value, _: &Scope| {});
                spawned.borrow_mut().push(attached);
            }
        });
    }

    parent.destroy();
    for scope in spawned.borrow().iter() {
        assert!(scope.is_destroyed());
        assert_eq!(scope.count_watchers(), 0);
    }
    assert_eq!(root.count_watchers(), 0);
    assert_eq!(root.count_child_scopes(), 0);
}

#[test]
fn destroying_root_clears_queues() {
    let (root, scheduler, sink) = tree();
    let ran = Rc::new(Cell::new(false));
    {
        let ran = Rc::clone(&ran);
        root.apply_async(move |_: &Scope| ran.set(true));
    }
    root.eval_async(|_: &Scope| Err::<(), _>("never"));

    root.destroy();
    scheduler.flush();
    assert!(!ran.get());
    assert!(sink.is_empty());
    assert!(root.is_destroyed());
}

#[test]
fn counts_track_creation_and_destruction() {
    let (root, _, _) = tree();
    let a = root.new_child();
    let b = a.new_child();
    let _c = root.new_isolated_child();
    b.watch("x", |_: &Value, _: &Value, _: &Scope| {});
    b.watch("y", |_: &Value, _: &Value, _: &Scope| {});

    assert_eq!(root.count_child_scopes(), 3);
    assert_eq!(a.count_child_scopes(), 1);
    assert_eq!(a.count_watchers(), 2);

    b.destroy();
    assert_eq!(root.count_child_scopes(), 2);
    assert_eq!(root.count_watchers(), 0);
}

#[test]
fn inherited_and_isolated_state() {
    let (root, _, _) = tree();
    root.set("theme", "dark");
    let child = root.new_child();
    let isolated = root.new_isolated_child();
    let nested = isolated.new_child();

    assert_eq!(child.get("theme"), Value::from("dark"));
    assert!(isolated.get("theme").is_undefined());

    isolated.set("theme", "light");
    assert_eq!(nested.get("theme"), Value::from("light"));

    child.set("theme", "blue");
    assert_eq!(root.get("theme"), Value::from("dark"));
}
