//! Proc registration, the port-claim protocol and proc attrs.

mod fixtures;

use std::thread;

use convoy::{ProcAttrs, ResourceLimits, SrvInfo, TrafficControl};

use fixtures::{registered_app, registered_proc, registered_revision, store};

#[test]
fn ports_are_monotone_and_never_reissued() {
    let s = store("/proc-ports");
    let app = registered_app(&s, "porter");
    registered_revision(&s, &app, "r1");

    let p1 = registered_proc(&s, &app, "p1");
    let p2 = registered_proc(&s, &app, "p2");
    let p3 = registered_proc(&s, &app, "p3");

    // Each registration claims the service port, then the control port.
    assert_eq!((p1.port, p1.control_port), (8000, Some(8001)));
    assert_eq!((p2.port, p2.control_port), (8002, Some(8003)));
    assert_eq!((p3.port, p3.control_port), (8004, Some(8005)));

    let mut all = vec![
        p1.port,
        p1.control_port.unwrap(),
        p2.port,
        p2.control_port.unwrap(),
        p3.port,
        p3.control_port.unwrap(),
    ];
    let sorted = all.clone();
    all.dedup();
    assert_eq!(all, sorted, "ports must be pairwise distinct and monotone");

    let next = s
        .fast_forward()
        .unwrap()
        .snapshot()
        .get_int("/next-port")
        .unwrap();
    assert_eq!(next, 8006);
}

#[test]
fn concurrent_registrations_get_distinct_ports() {
    let s = store("/proc-ports-race");
    let app = registered_app(&s, "racer");

    let mut handles = Vec::new();
    for i in 0..4 {
        let s = s.clone();
        let app = app.clone();
        handles.push(thread::spawn(move || {
            let proc = s.new_proc(&app, &format!("w{i}")).register().unwrap();
            (proc.port, proc.control_port.unwrap())
        }));
    }

    let mut ports = Vec::new();
    for handle in handles {
        let (port, control) = handle.join().unwrap();
        ports.push(port);
        ports.push(control);
    }
    ports.sort_unstable();
    ports.dedup();
    assert_eq!(ports.len(), 8, "every claim must win a unique port");
}

#[test]
fn proc_name_must_be_alphanumeric() {
    let s = store("/proc-name");
    let app = registered_app(&s, "named");
    for bad in ["who-op", "who_op", "who.op"] {
        let err = s.new_proc(&app, bad).register().unwrap_err();
        assert!(err.is_bad_proc_name(), "{bad}: got {err}");
    }
}

#[test]
fn proc_register_twice_is_conflict() {
    let s = store("/proc-conflict");
    let app = registered_app(&s, "conf");
    registered_proc(&s, &app, "web");
    let err = s.new_proc(&app, "web").register().unwrap_err();
    assert!(err.is_conflict());
}

#[test]
fn proc_round_trip_with_attrs() {
    let s = store("/proc-attrs");
    let app = registered_app(&s, "attrd");
    let mut proc = registered_proc(&s, &app, "web");

    // Attrs default until stored.
    let fetched = app.get_proc("web").unwrap();
    assert_eq!(fetched.attrs, ProcAttrs::default());
    assert_eq!(fetched.port, proc.port);
    assert_eq!(fetched.control_port, proc.control_port);
    assert_eq!(fetched.registered, proc.registered);

    proc.attrs = ProcAttrs {
        limits: ResourceLimits {
            memory_limit_mb: Some(512),
        },
        log_persistence: true,
        traffic_control: Some(TrafficControl { share: 80 }),
        srv_info: Some(SrvInfo {
            env: "production".to_string(),
            job: "web".to_string(),
            product: "rocket".to_string(),
            service: "http".to_string(),
        }),
    };
    let proc = proc.store_attrs().expect("store attrs");

    let fetched = app.get_proc("web").unwrap();
    assert_eq!(fetched.attrs, proc.attrs);
    assert_eq!(fetched.attrs.limits.memory_limit_mb, Some(512));
    assert_eq!(fetched.attrs.traffic_control, Some(TrafficControl { share: 80 }));
}

#[test]
fn traffic_share_outside_range_is_rejected() {
    let s = store("/proc-share");
    let app = registered_app(&s, "sharer");
    let mut proc = registered_proc(&s, &app, "web");
    proc.attrs.traffic_control = Some(TrafficControl { share: 101 });
    let err = proc.store_attrs().unwrap_err();
    assert!(err.is_invalid_share());
}

#[test]
fn srv_info_fields_are_validated() {
    let s = store("/proc-srv");
    let app = registered_app(&s, "srv");
    let mut proc = registered_proc(&s, &app, "web");

    proc.attrs.srv_info = Some(SrvInfo {
        env: String::new(),
        job: "web".to_string(),
        product: "rocket".to_string(),
        service: "http".to_string(),
    });
    assert!(proc.store_attrs().unwrap_err().is_invalid_argument());

    proc.attrs.srv_info = Some(SrvInfo {
        env: "prod".to_string(),
        job: "we b".to_string(),
        product: "rocket".to_string(),
        service: "http".to_string(),
    });
    assert!(proc.store_attrs().unwrap_err().is_invalid_argument());

    proc.attrs.srv_info = Some(SrvInfo {
        env: "prod".to_string(),
        job: "web-1".to_string(),
        product: "rocket".to_string(),
        service: "http".to_string(),
    });
    assert!(proc.store_attrs().is_ok());
}

#[test]
fn proc_instance_listings() {
    let s = store("/proc-instances");
    let app = registered_app(&s, "lister");
    registered_revision(&s, &app, "r1");
    let proc = registered_proc(&s, &app, "web");

    for i in 0..3u16 {
        let ins = s
            .register_instance("lister", "r1", "web", "default")
            .unwrap();
        let ins = ins.claim("10.0.0.1").unwrap();
        ins.started("10.0.0.1", &format!("h{i}"), 9000 + i, 10000 + i)
            .unwrap();
    }

    assert_eq!(proc.num_instances().unwrap(), 3);
    let live = proc.get_instances().unwrap();
    assert_eq!(live.len(), 3);
    assert!(live.iter().all(|i| i.app_name == "lister"));
    assert_eq!(proc.get_running_revs().unwrap(), vec!["r1"]);
}

#[test]
fn terminal_instance_listings() {
    let s = store("/proc-terminal");
    let app = registered_app(&s, "term");
    registered_revision(&s, &app, "r1");
    let proc = registered_proc(&s, &app, "worker");
    let host = "10.0.2.12";

    // One failed, one lost, one done.
    let failing = s.register_instance("term", "r1", "worker", "default").unwrap();
    let failing = failing.claim(host).unwrap();
    failing.failed(host, "boom").unwrap();

    let lost = s.register_instance("term", "r1", "worker", "default").unwrap();
    lost.lost("watchdog", "no heartbeat").unwrap();

    let done = s.register_instance("term", "r1", "worker", "default").unwrap();
    done.unregister("operator", "retired").unwrap();

    let failed = proc.get_failed_instances().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, failing.id);
    assert_eq!(
        failed[0].termination.as_ref().unwrap().reason,
        "boom"
    );

    let lost_list = proc.get_lost_instances().unwrap();
    assert_eq!(lost_list.len(), 1);
    assert_eq!(lost_list[0].termination.as_ref().unwrap().client, "watchdog");

    let done_list = proc.get_done_instances().unwrap();
    assert_eq!(done_list.len(), 1);
    assert_eq!(done_list[0].id, done.id);

    // Live enumeration no longer sees any of them.
    assert!(proc.get_instances().unwrap().is_empty());
}

#[test]
fn proc_unregister_removes_tree() {
    let s = store("/proc-unreg");
    let app = registered_app(&s, "bye");
    let proc = registered_proc(&s, &app, "web");
    proc.unregister().unwrap();
    assert!(app.get_proc("web").unwrap_err().is_not_found());
}
