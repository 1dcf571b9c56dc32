#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::Receiver;

use convoy::{App, Event, EventType, MemBackend, Proc, Revision, Store};

/// A fresh initialized store on its own in-memory tree.
pub fn store(root: &str) -> Store {
    Store::with_backend(Arc::new(MemBackend::new()), root)
        .expect("dial mem backend")
        .init()
        .expect("init store")
}

pub fn registered_app(store: &Store, name: &str) -> App {
    store
        .new_app(name, &format!("git://{name}.git"), "HEAD")
        .register()
        .expect("register app")
}

pub fn registered_revision(store: &Store, app: &App, reference: &str) -> Revision {
    store
        .new_revision(app, reference, &format!("http://artifacts/{reference}.img"))
        .register()
        .expect("register revision")
}

pub fn registered_proc(store: &Store, app: &App, name: &str) -> Proc {
    store.new_proc(app, name).register().expect("register proc")
}

/// Receive the next event and assert its type.
pub fn expect_event(rx: &Receiver<Event>, kind: EventType) -> Event {
    match rx.recv_timeout(Duration::from_secs(2)) {
        Ok(event) => {
            assert_eq!(event.kind, kind, "expected {kind}, got {}", event.kind);
            event
        }
        Err(_) => panic!("expected event {kind}, got timeout"),
    }
}

/// Assert that no further event arrives within a short grace period.
pub fn expect_no_event(rx: &Receiver<Event>) {
    if let Ok(event) = rx.recv_timeout(Duration::from_millis(150)) {
        panic!("expected silence, got {}", event.kind);
    }
}
