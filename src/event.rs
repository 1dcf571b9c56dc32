//! Event pipeline: one wildcard watch, typed domain events out.
//!
//! A single long-poll on `/**` yields every change in global revision
//! order. Each raw change is classified against a fixed set of path
//! patterns, filtered, and enriched with the domain object loaded at the
//! event's revision. Paths that match no pattern are dropped silently;
//! enrichment failures are fatal to the watcher.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crossbeam::channel::Sender;
use regex::Regex;

use crate::app::{self, App};
use crate::coordinator::{RawEvent, Snapshot};
use crate::error::{errorf, Error};
use crate::instance::{self, InsStatus, Instance};
use crate::proc::{self, Proc};
use crate::revision::{self, Revision};
use crate::store::Store;
use crate::Result;

/// The kinds of domain events the pipeline emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    AppReg,
    AppUnreg,
    RevReg,
    RevUnreg,
    ProcReg,
    ProcUnreg,
    ProcAttrs,
    InsReg,
    InsUnclaim,
    InsUnreg,
    InsStart,
    InsStop,
    InsFail,
    InsExit,
    InsLost,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::AppReg => "app-register",
            EventType::AppUnreg => "app-unregister",
            EventType::RevReg => "rev-register",
            EventType::RevUnreg => "rev-unregister",
            EventType::ProcReg => "proc-register",
            EventType::ProcUnreg => "proc-unregister",
            EventType::ProcAttrs => "proc-attrs",
            EventType::InsReg => "instance-register",
            EventType::InsUnclaim => "instance-unclaim",
            EventType::InsUnreg => "instance-unregister",
            EventType::InsStart => "instance-start",
            EventType::InsStop => "instance-stop",
            EventType::InsFail => "instance-fail",
            EventType::InsExit => "instance-exit",
            EventType::InsLost => "instance-lost",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity information decoded from the event path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventData {
    pub app: Option<String>,
    pub revision: Option<String>,
    pub proc: Option<String>,
    pub instance: Option<i64>,
}

/// Domain object loaded at the event's revision. Delete events carry no
/// source; consumers fall back to [`EventData`] for identity.
#[derive(Debug, Clone)]
pub enum EventSource {
    App(App),
    Revision(Revision),
    Proc(Proc),
    Instance(Box<Instance>),
}

/// A change to a file in the registry, classified and enriched.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventType,
    pub path: EventData,
    pub rev: i64,
    pub source: Option<EventSource>,
    raw: RawEvent,
}

impl Event {
    /// The underlying coordinator change.
    pub fn raw(&self) -> &RawEvent {
        &self.raw
    }
}

#[derive(Debug, Clone, Copy)]
enum PathKind {
    App,
    Rev,
    Proc,
    ProcAttrs,
    InsRegistered,
    InsStatus,
    InsStart,
    InsStop,
}

static PATTERNS: OnceLock<Vec<(Regex, PathKind)>> = OnceLock::new();

fn patterns() -> &'static [(Regex, PathKind)] {
    PATTERNS.get_or_init(|| {
        const CHAR: &str = "[-.[:alnum:]]";
        let table = [
            (format!("^/apps/({CHAR}+)/registered$"), PathKind::App),
            (
                format!("^/apps/({CHAR}+)/revs/({CHAR}+)/registered$"),
                PathKind::Rev,
            ),
            (
                format!("^/apps/({CHAR}+)/procs/({CHAR}+)/registered$"),
                PathKind::Proc,
            ),
            (
                format!("^/apps/({CHAR}+)/procs/({CHAR}+)/attrs$"),
                PathKind::ProcAttrs,
            ),
            ("^/instances/([0-9]+)/registered$".to_string(), PathKind::InsRegistered),
            ("^/instances/([0-9]+)/status$".to_string(), PathKind::InsStatus),
            ("^/instances/([0-9]+)/start$".to_string(), PathKind::InsStart),
            ("^/instances/([0-9]+)/stop$".to_string(), PathKind::InsStop),
        ];
        table
            .into_iter()
            .map(|(pat, kind)| (Regex::new(&pat).expect("valid event pattern"), kind))
            .collect()
    })
}

impl Store {
    /// Watch the whole tree and deliver classified, enriched events.
    ///
    /// With a non-empty `filter`, only the listed event types are
    /// delivered. The loop runs until the receiver disconnects or the
    /// store connection closes; classification and enrichment failures
    /// terminate it with the error.
    pub fn watch_event(&self, tx: &Sender<Event>, filter: &[EventType]) -> Result<()> {
        self.watch_event_inner(filter, |event| tx.send(event).is_ok())
    }

    pub(crate) fn watch_event_inner(
        &self,
        filter: &[EventType],
        mut deliver: impl FnMut(Event) -> bool,
    ) -> Result<()> {
        let mut sp = self.snapshot().clone();
        loop {
            let raw = sp.wait("/**")?;
            sp = sp.at(raw.rev);

            let Some((kind, data)) = classify(&raw, &sp)? else {
                continue;
            };
            if !filter.is_empty() && !filter.contains(&kind) {
                continue;
            }
            let source = if raw.is_set() {
                enrich(kind, &data, &sp)?
            } else {
                None
            };

            tracing::trace!(kind = %kind, rev = raw.rev, path = %raw.path, "event");
            let event = Event {
                kind,
                path: data,
                rev: raw.rev,
                source,
                raw,
            };
            if !deliver(event) {
                return Ok(());
            }
        }
    }
}

impl App {
    /// Watch events related to this app: anything whose path names it,
    /// plus instance events whose instance belongs to it.
    pub fn watch_event(&self, tx: &Sender<Event>) -> Result<()> {
        let store = Store::at(self.snapshot().clone());
        let name = self.name.clone();
        store.watch_event_inner(&[], |event| {
            let by_path = event.path.app.as_deref() == Some(name.as_str());
            let by_source = matches!(
                &event.source,
                Some(EventSource::Instance(i)) if i.app_name == name
            );
            if by_path || by_source {
                tx.send(event).is_ok()
            } else {
                true
            }
        })
    }
}

/// Classify a raw change into an event type plus path identity. Returns
/// `None` for paths and transitions that carry no domain meaning.
fn classify(raw: &RawEvent, sp: &Snapshot) -> Result<Option<(EventType, EventData)>> {
    for (re, kind) in patterns() {
        let Some(caps) = re.captures(&raw.path) else {
            continue;
        };
        let kind = match kind {
            PathKind::App => {
                let data = EventData {
                    app: Some(caps[1].to_string()),
                    ..Default::default()
                };
                let kind = if raw.is_set() {
                    EventType::AppReg
                } else {
                    EventType::AppUnreg
                };
                return Ok(Some((kind, data)));
            }
            PathKind::Rev => {
                let data = EventData {
                    app: Some(caps[1].to_string()),
                    revision: Some(caps[2].to_string()),
                    ..Default::default()
                };
                let kind = if raw.is_set() {
                    EventType::RevReg
                } else {
                    EventType::RevUnreg
                };
                return Ok(Some((kind, data)));
            }
            PathKind::Proc => {
                let data = EventData {
                    app: Some(caps[1].to_string()),
                    proc: Some(caps[2].to_string()),
                    ..Default::default()
                };
                let kind = if raw.is_set() {
                    EventType::ProcReg
                } else {
                    EventType::ProcUnreg
                };
                return Ok(Some((kind, data)));
            }
            PathKind::ProcAttrs => {
                if !raw.is_set() {
                    return Ok(None);
                }
                let data = EventData {
                    app: Some(caps[1].to_string()),
                    proc: Some(caps[2].to_string()),
                    ..Default::default()
                };
                return Ok(Some((EventType::ProcAttrs, data)));
            }
            PathKind::InsRegistered => {
                if raw.is_set() {
                    EventType::InsReg
                } else {
                    EventType::InsUnreg
                }
            }
            PathKind::InsStart => {
                if !raw.is_set() {
                    return Ok(None);
                }
                // The start file encodes three states:
                //   ""                        registered or unclaimed
                //   "<ip>"                    claimed
                //   "<ip> <port> <host> <tp>" started
                let field_count = raw.body.split(u8::is_ascii_whitespace).filter(|f| !f.is_empty()).count();
                if field_count > 1 {
                    EventType::InsStart
                } else if raw.body.is_empty() {
                    // Distinguish registration from unclaim by whether the
                    // path existed at the previous revision.
                    if path_existed_before(raw, sp)? {
                        EventType::InsUnclaim
                    } else {
                        return Ok(None);
                    }
                } else {
                    return Ok(None);
                }
            }
            PathKind::InsStop => {
                if !raw.is_set() {
                    return Ok(None);
                }
                EventType::InsStop
            }
            PathKind::InsStatus => {
                if !raw.is_set() {
                    return Ok(None);
                }
                let body = String::from_utf8_lossy(&raw.body);
                match InsStatus::from_str(&body) {
                    Ok(InsStatus::Running) => EventType::InsStart,
                    Ok(InsStatus::Exited) => EventType::InsExit,
                    Ok(InsStatus::Failed) => EventType::InsFail,
                    Ok(InsStatus::Lost) => EventType::InsLost,
                    _ => return Ok(None),
                }
            }
        };

        let id: i64 = caps[1]
            .parse()
            .map_err(|e| errorf!(crate::ErrorKind::InvalidFile, "instance id in `{}`: {e}", raw.path))?;
        let data = EventData {
            instance: Some(id),
            ..Default::default()
        };
        return Ok(Some((kind, data)));
    }
    Ok(None)
}

/// Whether the event's path already existed at the revision before it.
fn path_existed_before(raw: &RawEvent, sp: &Snapshot) -> Result<bool> {
    if raw.rev <= 1 {
        return Ok(false);
    }
    Ok(sp.at(raw.rev - 1).exists(&raw.path)?)
}

/// Load the domain object behind a set event at the event's revision.
fn enrich(kind: EventType, data: &EventData, sp: &Snapshot) -> Result<Option<EventSource>> {
    let result = enrich_source(kind, data, sp);
    result.map_err(|err| {
        Error::new(
            err.kind(),
            format!("error enriching {kind} event: {err}"),
        )
    })
}

fn enrich_source(kind: EventType, data: &EventData, sp: &Snapshot) -> Result<Option<EventSource>> {
    let app = match &data.app {
        Some(name) => Some(app::get_app(name, sp)?),
        None => None,
    };

    match kind {
        EventType::AppReg => Ok(app.map(EventSource::App)),
        EventType::RevReg => {
            let app = app.expect("rev event carries app");
            let reference = data.revision.as_deref().expect("rev event carries ref");
            Ok(Some(EventSource::Revision(revision::get_revision(
                &app, reference, sp,
            )?)))
        }
        EventType::ProcReg | EventType::ProcAttrs => {
            let app = app.expect("proc event carries app");
            let name = data.proc.as_deref().expect("proc event carries name");
            Ok(Some(EventSource::Proc(proc::get_proc(&app, name, sp)?)))
        }
        EventType::InsReg
        | EventType::InsUnclaim
        | EventType::InsStart
        | EventType::InsStop
        | EventType::InsFail
        | EventType::InsExit
        | EventType::InsLost => {
            let id = data.instance.expect("instance event carries id");
            Ok(Some(EventSource::Instance(Box::new(instance::get_instance(
                id, sp,
            )?))))
        }
        EventType::AppUnreg
        | EventType::RevUnreg
        | EventType::ProcUnreg
        | EventType::InsUnreg => Ok(None),
    }
}
