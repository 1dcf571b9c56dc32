//! Runner registration and the runner watches.

mod fixtures;

use std::thread;
use std::time::Duration;

use crossbeam::channel::unbounded;

use fixtures::store;

#[test]
fn runner_register_and_get() {
    let s = store("/runner-basic");
    let addr = "127.0.0.1:9999";

    let runner = s.new_runner(addr, 787878).unwrap().register().expect("register");
    assert_eq!(runner.addr, addr);
    assert_eq!(runner.instance_id, 787878);

    let fetched = s.get_runner(addr).expect("get runner");
    assert_eq!(fetched.addr, addr);
    assert_eq!(fetched.instance_id, 787878);

    assert!(s
        .new_runner(addr, 1)
        .unwrap()
        .register()
        .unwrap_err()
        .is_conflict());

    fetched.unregister().expect("unregister");
    assert!(s.get_runner(addr).unwrap_err().is_not_found());
}

#[test]
fn bad_runner_addr_is_rejected() {
    let s = store("/runner-addr");
    assert!(s.new_runner("nocolon", 1).unwrap_err().is_invalid_argument());
    assert!(s.get_runner(":9999").unwrap_err().is_invalid_argument());
}

#[test]
fn runners_by_host_enumerates_ports() {
    let s = store("/runner-hosts");
    s.new_runner("10.0.1.1:7777", 9).unwrap().register().unwrap();
    s.new_runner("10.0.1.2:7777", 7).unwrap().register().unwrap();
    s.new_runner("10.0.1.2:7778", 8).unwrap().register().unwrap();

    let rs = s.runners_by_host("10.0.1.2").expect("runners by host");
    assert_eq!(rs.len(), 2);
    assert!(rs.iter().any(|r| r.addr == "10.0.1.2:7777"));
    assert!(rs.iter().any(|r| r.addr == "10.0.1.2:7778"));

    let all = s.runners().expect("all runners");
    assert_eq!(all.len(), 3);
}

#[test]
fn watch_runner_start_delivers_registered_runner() {
    let s = store("/runner-watch-start");
    let (tx, rx) = unbounded();
    {
        let s = s.clone();
        thread::spawn(move || {
            let _ = s.watch_runner_start(&tx);
        });
    }

    let addr = "127.0.0.1:9898";
    let registered = s.new_runner(addr, 797979).unwrap().register().unwrap();

    let observed = rx
        .recv_timeout(Duration::from_secs(2))
        .expect("runner event");
    assert_eq!(observed.addr, registered.addr);
    assert_eq!(observed.instance_id, registered.instance_id);
}

#[test]
fn watch_runner_stop_delivers_address() {
    let s = store("/runner-watch-stop");
    let (tx, rx) = unbounded();
    {
        let s = s.clone();
        thread::spawn(move || {
            let _ = s.watch_runner_stop(&tx);
        });
    }

    let addr = "127.0.0.1:9898";
    let runner = s.new_runner(addr, 797979).unwrap().register().unwrap();
    runner.unregister().unwrap();

    let observed = rx
        .recv_timeout(Duration::from_secs(2))
        .expect("stop event");
    assert_eq!(observed, addr);
}
