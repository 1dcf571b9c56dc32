//! Event pipeline: classification, enrichment, ordering and filtering.

mod fixtures;

use std::thread;

use crossbeam::channel::{unbounded, Receiver};
use convoy::{Event, EventSource, EventType, Store, TrafficControl};

use fixtures::{expect_event, expect_no_event, registered_app, registered_proc, registered_revision, store};

/// Spawn a watcher on the store's current revision.
fn watch(s: &Store, filter: &[EventType]) -> Receiver<Event> {
    let (tx, rx) = unbounded();
    let s = s.clone();
    let filter = filter.to_vec();
    thread::spawn(move || {
        let _ = s.watch_event(&tx, &filter);
    });
    rx
}

#[test]
fn app_registration_emits_enriched_event() {
    let s = store("/ev-app");
    let rx = watch(&s, &[]);

    let app = s
        .new_app("regcat", "git://regcat", "regcatstack")
        .register()
        .expect("register");

    let ev = expect_event(&rx, EventType::AppReg);
    assert_eq!(ev.path.app.as_deref(), Some("regcat"));
    match ev.source {
        Some(EventSource::App(source)) => {
            assert_eq!(source.name, app.name);
            assert_eq!(source.repo_url, "git://regcat");
        }
        other => panic!("expected app source, got {other:?}"),
    }
}

#[test]
fn app_unregistration_has_no_source() {
    let s = store("/ev-app-unreg");
    let app = registered_app(&s, "unregcat");

    let rx = watch(&s.fast_forward().unwrap(), &[]);
    app.unregister().expect("unregister");

    let ev = expect_event(&rx, EventType::AppUnreg);
    assert_eq!(ev.path.app.as_deref(), Some("unregcat"));
    assert!(ev.source.is_none());
}

#[test]
fn revision_and_proc_registration_events() {
    let s = store("/ev-rev-proc");
    let app = registered_app(&s, "regdog");

    let rx = watch(&s.fast_forward().unwrap(), &[]);

    registered_revision(&s, &app, "stable");
    let ev = expect_event(&rx, EventType::RevReg);
    assert_eq!(ev.path.app.as_deref(), Some("regdog"));
    assert_eq!(ev.path.revision.as_deref(), Some("stable"));
    assert!(matches!(ev.source, Some(EventSource::Revision(_))));

    registered_proc(&s, &app, "all");
    let ev = expect_event(&rx, EventType::ProcReg);
    assert_eq!(ev.path.proc.as_deref(), Some("all"));
    match ev.source {
        Some(EventSource::Proc(p)) => assert_eq!(p.name, "all"),
        other => panic!("expected proc source, got {other:?}"),
    }
}

#[test]
fn proc_attrs_event_carries_stored_attrs() {
    let s = store("/ev-proc-attrs");
    let app = registered_app(&s, "attrsapp");
    let mut proc = registered_proc(&s, &app, "mightymouse");

    let rx = watch(&s.fast_forward().unwrap(), &[]);

    proc.attrs.traffic_control = Some(TrafficControl { share: 80 });
    proc.store_attrs().expect("store attrs");

    let ev = expect_event(&rx, EventType::ProcAttrs);
    assert_eq!(ev.path.proc.as_deref(), Some("mightymouse"));
    match ev.source {
        Some(EventSource::Proc(p)) => {
            assert_eq!(p.attrs.traffic_control, Some(TrafficControl { share: 80 }));
        }
        other => panic!("expected proc source, got {other:?}"),
    }
}

#[test]
fn instance_registration_event_sees_complete_instance() {
    let s = store("/ev-ins-reg");
    let rx = watch(&s, &[]);

    let ins = s
        .register_instance("regmouse", "stable", "web", "default")
        .expect("register instance");

    let ev = expect_event(&rx, EventType::InsReg);
    assert_eq!(ev.path.instance, Some(ins.id));
    match ev.source {
        Some(EventSource::Instance(source)) => {
            assert_eq!(source.id, ins.id);
            assert_eq!(source.app_name, "regmouse");
            assert_eq!(source.env, "default");
        }
        other => panic!("expected instance source, got {other:?}"),
    }

    // The empty start write of the registration stream emits no unclaim.
    expect_no_event(&rx);
}

#[test]
fn lifecycle_produces_ordered_event_sequence() {
    let s = store("/ev-lifecycle");
    let ins = s
        .register_instance("statemouse", "stable", "web", "default")
        .expect("register instance");

    let rx = watch(&s.fast_forward().unwrap(), &[]);

    let ins = ins.claim("0.0.0.0").unwrap();
    let ins = ins.unclaim("0.0.0.0").unwrap();
    let ins = ins.claim("10.0.0.1").unwrap();
    let ins = ins.started("10.0.0.1", "mouse.org", 9999, 10000).unwrap();
    ins.stop().unwrap();
    let ins = ins.failed("10.0.0.1", "no reason").unwrap();
    let ins = ins.exited("10.0.0.1").unwrap();
    ins.unregister("common-host", "exited").unwrap();

    let ev = expect_event(&rx, EventType::InsUnclaim);
    assert_eq!(ev.path.instance, Some(ins.id));

    let ev = expect_event(&rx, EventType::InsStart);
    match ev.source {
        Some(EventSource::Instance(source)) => {
            assert_eq!(source.ip, "10.0.0.1");
            assert_eq!(source.host, "mouse.org");
            assert_eq!(source.port, 9999);
        }
        other => panic!("expected instance source, got {other:?}"),
    }

    expect_event(&rx, EventType::InsStop);
    expect_event(&rx, EventType::InsFail);
    expect_event(&rx, EventType::InsExit);
    let ev = expect_event(&rx, EventType::InsUnreg);
    assert!(ev.source.is_none());
    expect_no_event(&rx);
}

#[test]
fn filter_limits_delivery_to_listed_types() {
    let s = store("/ev-filter");
    let ins = s
        .register_instance("foo", "bar", "baz", "qux")
        .expect("register instance");

    let rx = watch(
        &s.fast_forward().unwrap(),
        &[EventType::InsStart, EventType::InsUnreg],
    );

    let claimed = ins.claim("1.2.3.4").unwrap();
    let pending = claimed.unclaim("1.2.3.4").unwrap();
    let claimed = pending.claim("1.2.8.9").unwrap();
    let running = claimed.started("1.2.8.9", "host.com", 9090, 9095).unwrap();
    running.unregister("common-host", "exited").unwrap();

    expect_event(&rx, EventType::InsStart);
    expect_event(&rx, EventType::InsUnreg);
    expect_no_event(&rx);
}

#[test]
fn app_scoped_watch_ignores_other_apps() {
    let s = store("/ev-app-scope");
    let mine = registered_app(&s, "mine");
    registered_app(&s, "other");

    let (tx, rx) = unbounded();
    let app = s.get_app("mine").unwrap();
    thread::spawn(move || {
        let _ = app.watch_event(&tx);
    });

    // Other app's revision is invisible; mine is delivered.
    registered_revision(&s, &s.get_app("other").unwrap(), "o1");
    registered_revision(&s, &mine, "m1");

    let ev = expect_event(&rx, EventType::RevReg);
    assert_eq!(ev.path.app.as_deref(), Some("mine"));
    expect_no_event(&rx);

    // Instance events are matched through their enriched source.
    let ins = s.register_instance("mine", "m1", "web", "default").unwrap();
    let ev = expect_event(&rx, EventType::InsReg);
    assert_eq!(ev.path.instance, Some(ins.id));

    s.register_instance("other", "o1", "web", "default").unwrap();
    expect_no_event(&rx);
}

#[test]
fn events_arrive_in_global_revision_order() {
    let s = store("/ev-order");
    let rx = watch(&s, &[]);

    registered_app(&s, "one");
    registered_app(&s, "two");
    registered_app(&s, "three");

    let mut revs = Vec::new();
    for _ in 0..3 {
        let ev = expect_event(&rx, EventType::AppReg);
        revs.push(ev.rev);
    }
    let mut sorted = revs.clone();
    sorted.sort_unstable();
    assert_eq!(revs, sorted);
}
