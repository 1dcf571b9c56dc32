//! Target-vs-actual reconciliation via Store::scale.

mod fixtures;

use convoy::{InsStatus, Store};

use fixtures::{registered_app, registered_proc, registered_revision, store};

fn scaling_setup(root: &str) -> Store {
    let s = store(root);
    let app = registered_app(&s, "scaled");
    registered_revision(&s, &app, "r1");
    registered_proc(&s, &app, "web");
    // Scale verifies the env exists as an env var of the app.
    app.set_environment_var("default", "1").expect("set env");
    s
}

#[test]
fn scale_up_returns_pending_tickets() {
    let s = scaling_setup("/scale-up");

    let (tickets, current) = s.scale("scaled", "r1", "web", "default", 3).expect("scale");
    assert_eq!(current, 0);
    assert_eq!(tickets.len(), 3);
    assert!(tickets.iter().all(|t| t.status == InsStatus::Pending));

    let (scale, _) = s.get_scale("scaled", "r1", "web").unwrap();
    assert_eq!(scale, 3);

    // Reconciling to the same factor is a no-op.
    let (tickets, current) = s.scale("scaled", "r1", "web", "default", 3).expect("scale");
    assert_eq!(current, 3);
    assert!(tickets.is_empty());
}

#[test]
fn scale_down_marks_excess_for_stopping() {
    let s = scaling_setup("/scale-down");

    let (tickets, _) = s.scale("scaled", "r1", "web", "default", 3).expect("scale up");
    for (i, ticket) in tickets.iter().enumerate() {
        let host = format!("10.0.0.{i}");
        let claimed = ticket.claim(&host).expect("claim");
        claimed
            .started(&host, &format!("h{i}"), 9000 + i as u16, 10000 + i as u16)
            .expect("start");
    }

    let (stopped, current) = s.scale("scaled", "r1", "web", "default", 1).expect("scale down");
    assert_eq!(current, 3);
    assert_eq!(stopped.len(), 2);
    for ticket in &stopped {
        assert_eq!(
            s.get_instance(ticket.id).unwrap().status,
            InsStatus::Stopping
        );
    }

    // Once the process manager reaps the stopping instances, enumeration
    // converges on the target.
    for ticket in &stopped {
        let ins = s.get_instance(ticket.id).unwrap();
        ins.exited(&ins.ip).expect("exit");
    }
    let app = s.get_app("scaled").unwrap();
    let survivors = app.get_proc("web").unwrap().get_instances().unwrap();
    assert_eq!(survivors.len(), 1);
    assert_eq!(survivors[0].status, InsStatus::Running);

    let (scale, _) = s.get_scale("scaled", "r1", "web").unwrap();
    assert_eq!(scale, 1);
}

#[test]
fn scale_down_of_pending_instances_is_invalid_state() {
    let s = scaling_setup("/scale-pending");
    s.scale("scaled", "r1", "web", "default", 2).expect("scale up");

    // Nothing is running yet, so stopping the excess must fail.
    let err = s.scale("scaled", "r1", "web", "default", 0).unwrap_err();
    assert!(err.is_invalid_state());
}

#[test]
fn scale_filters_by_env() {
    let s = scaling_setup("/scale-env");
    let app = s.get_app("scaled").unwrap();
    app.set_environment_var("canary", "1").unwrap();

    s.scale("scaled", "r1", "web", "default", 2).expect("default env");
    let (_, current) = s.scale("scaled", "r1", "web", "canary", 1).expect("canary env");
    // Instances of the other env are invisible to this tuple.
    assert_eq!(current, 0);

    let (_, current) = s.scale("scaled", "r1", "web", "default", 2).unwrap();
    assert_eq!(current, 2);
}

#[test]
fn scale_validates_inputs_and_existence() {
    let s = scaling_setup("/scale-validate");

    assert!(s
        .scale("bad name", "r1", "web", "default", 1)
        .unwrap_err()
        .is_invalid_argument());
    assert!(s
        .scale("scaled", "nope", "web", "default", 1)
        .unwrap_err()
        .is_not_found());
    assert!(s
        .scale("scaled", "r1", "nope", "default", 1)
        .unwrap_err()
        .is_not_found());
    assert!(s
        .scale("scaled", "r1", "web", "nope", 1)
        .unwrap_err()
        .is_not_found());
}

#[test]
fn get_scale_of_unknown_tuple_is_zero() {
    let s = scaling_setup("/scale-zero");
    let (scale, rev) = s.get_scale("scaled", "r1", "web").unwrap();
    assert_eq!(scale, 0);
    assert!(rev > 0);
}
