//! Process types and the fleet-wide port-claim protocol.
//!
//! Every proc registration claims two ports from the shared `/next-port`
//! counter: the service port and the control port. The counter is advanced
//! by compare-and-set; contention is resolved by retrying from a fresh
//! snapshot after a short backoff, so issued ports are strictly monotone
//! and never reused within a store's lifetime.

use std::fmt;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::app::App;
use crate::coordinator::{fanout, Dir, Snapshot};
use crate::error::{errorf, Error, ErrorKind};
use crate::instance::{self, Instance};
use crate::paths;
use crate::store::{self, dir_names, Store};
use crate::Result;

/// Base delay between CAS retries on the port counter.
const CLAIM_RETRY_DELAY: Duration = Duration::from_millis(100);

static PROC_NAME: OnceLock<Regex> = OnceLock::new();
static SRV_INFO_FIELD: OnceLock<Regex> = OnceLock::new();

/// A process type within an app, e.g. `web` or `worker`.
#[derive(Debug, Clone)]
pub struct Proc {
    dir: Dir,
    pub name: String,
    pub app: App,
    pub port: u16,
    pub control_port: Option<u16>,
    pub attrs: ProcAttrs,
    pub registered: Option<OffsetDateTime>,
}

/// Optional per-proc information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcAttrs {
    #[serde(default)]
    pub limits: ResourceLimits,
    #[serde(default)]
    pub log_persistence: bool,
    #[serde(rename = "trafficControl", default, skip_serializing_if = "Option::is_none")]
    pub traffic_control: Option<TrafficControl>,
    #[serde(rename = "srv_info", default, skip_serializing_if = "Option::is_none")]
    pub srv_info: Option<SrvInfo>,
}

/// Per-proc resource declarations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Maximum memory allowance in MB for an instance of this proc.
    #[serde(rename = "memory-limit-mb", default, skip_serializing_if = "Option::is_none")]
    pub memory_limit_mb: Option<i64>,
}

/// Share of traffic this proc should receive, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficControl {
    pub share: u8,
}

impl TrafficControl {
    pub fn validate(&self) -> Result<()> {
        if self.share > 100 {
            return Err(errorf!(
                ErrorKind::InvalidShare,
                "traffic share {} outside 0..=100",
                self.share
            ));
        }
        Ok(())
    }
}

/// Information needed for service discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrvInfo {
    pub env: String,
    pub job: String,
    pub product: String,
    pub service: String,
}

impl SrvInfo {
    /// Check completeness and validity of all four fields.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("env", &self.env),
            ("job", &self.job),
            ("product", &self.product),
            ("service", &self.service),
        ] {
            if value.is_empty() {
                return Err(errorf!(
                    ErrorKind::InvalidArgument,
                    "srv info {field} can't be empty"
                ));
            }
            let re = SRV_INFO_FIELD
                .get_or_init(|| Regex::new(r"^[[:alnum:]\-]+$").expect("valid regex"));
            if !re.is_match(value) {
                return Err(errorf!(
                    ErrorKind::InvalidArgument,
                    "only alphanumeric characters and '-' are allowed for srv info {field}"
                ));
            }
        }
        Ok(())
    }
}

impl Store {
    /// A new proc handle for `app`. Persisted by [`Proc::register`].
    pub fn new_proc(&self, app: &App, name: &str) -> Proc {
        Proc {
            dir: Dir::new(paths::proc_path(&app.name, name), self.snapshot().clone()),
            name: name.to_string(),
            app: app.clone(),
            port: 0,
            control_port: None,
            attrs: ProcAttrs::default(),
            registered: None,
        }
    }
}

impl App {
    /// The proc of this app with the given name.
    pub fn get_proc(&self, name: &str) -> Result<Proc> {
        let sp = self.snapshot().fast_forward()?;
        get_proc(self, name, &sp)
    }
}

impl Proc {
    pub fn snapshot(&self) -> &Snapshot {
        self.dir.snapshot()
    }

    /// Register the proc, claiming its service and control ports.
    pub fn register(&self) -> Result<Proc> {
        let sp = self.snapshot().fast_forward()?;

        if sp.exists(self.dir.name())? {
            return Err(errorf!(
                ErrorKind::Conflict,
                "proc \"{}\" already exists for app \"{}\"",
                self.name,
                self.app.name
            ));
        }

        let re = PROC_NAME.get_or_init(|| Regex::new("^[[:alnum:]]+$").expect("valid regex"));
        if !re.is_match(&self.name) {
            return Err(errorf!(
                ErrorKind::BadProcName,
                "invalid proc type name \"{}\": only alphanumeric chars allowed",
                self.name
            ));
        }

        let port = claim_next_port(&sp)
            .map_err(|e| errorf!(e.kind(), "couldn't claim port: {e}"))?;
        let sp = sp
            .fast_forward()?
            .set_int(&self.dir.prefix(paths::PORT_FILE), i64::from(port))?;

        let control_port = claim_next_port(&sp)
            .map_err(|e| errorf!(e.kind(), "couldn't claim control port: {e}"))?;
        let sp = sp
            .fast_forward()?
            .set_int(&self.dir.prefix(paths::PORT_CONTROL_FILE), i64::from(control_port))?;

        let registered = store::now();
        let sp = sp.set_string(
            &self.dir.prefix(paths::REGISTERED_FILE),
            &store::format_time(registered),
        )?;

        Ok(Proc {
            dir: self.dir.with(sp),
            port,
            control_port: Some(control_port),
            registered: Some(registered),
            ..self.clone()
        })
    }

    /// Remove the proc and its lookup index.
    pub fn unregister(&self) -> Result<()> {
        let sp = self.snapshot().fast_forward()?;
        self.dir.with(sp).del_tree()?;
        Ok(())
    }

    /// Persist the proc attrs. Last write wins on the attrs file.
    pub fn store_attrs(&self) -> Result<Proc> {
        if let Some(tc) = &self.attrs.traffic_control {
            tc.validate()?;
        }
        if let Some(srv) = &self.attrs.srv_info {
            srv.validate()?;
        }
        let sp = self.snapshot().fast_forward()?;
        let sp = sp.set_json(&self.dir.prefix(paths::ATTRS_FILE), &self.attrs)?;
        Ok(Proc {
            dir: self.dir.with(sp),
            ..self.clone()
        })
    }

    /// Count of live instances across all revisions.
    pub fn num_instances(&self) -> Result<usize> {
        let sp = self.snapshot().fast_forward()?;
        let revs = dir_names(&sp, &self.dir.prefix(paths::INSTANCES_SUBDIR))?;
        let mut total = 0;
        for rev in revs {
            let (count, _) =
                sp.stat(&paths::proc_instances_path(&self.app.name, &rev, &self.name))?;
            total += count;
        }
        Ok(total)
    }

    /// All instances in pending/claimed/running state.
    pub fn get_instances(&self) -> Result<Vec<Instance>> {
        let sp = self.snapshot().fast_forward()?;
        let ids = proc_instance_ids(self, &sp)?;
        fanout::fan_out(&ids, |id| instance::get_instance(*id, &sp))
    }

    /// All instances that were unregistered for this proc, reconstructed
    /// from their serialized state. Avoid operating on these.
    pub fn get_done_instances(&self) -> Result<Vec<Instance>> {
        self.serialized_instances(instance::InsStatus::Done)
    }

    /// All instances in failed state.
    pub fn get_failed_instances(&self) -> Result<Vec<Instance>> {
        self.serialized_instances(instance::InsStatus::Failed)
    }

    /// All instances in lost state.
    pub fn get_lost_instances(&self) -> Result<Vec<Instance>> {
        self.serialized_instances(instance::InsStatus::Lost)
    }

    /// All revs of this proc that currently carry live instances.
    pub fn get_running_revs(&self) -> Result<Vec<String>> {
        let sp = self.snapshot().fast_forward()?;
        dir_names(&sp, &self.dir.prefix(paths::INSTANCES_SUBDIR))
    }

    /// Where done instances are stored for this proc.
    pub fn done_instances_path(&self) -> String {
        self.dir.prefix(paths::DONE_DIR)
    }

    fn serialized_instances(&self, status: instance::InsStatus) -> Result<Vec<Instance>> {
        let sp = self.snapshot().fast_forward()?;
        let dir = match status {
            instance::InsStatus::Done => paths::DONE_DIR,
            instance::InsStatus::Failed => paths::FAILED_DIR,
            instance::InsStatus::Lost => paths::LOST_DIR,
            _ => unreachable!("only terminal lookup directories are serialized"),
        };
        let ids = dir_names(&sp, &self.dir.prefix(dir))?;
        let ids = parse_ids(&ids)?;
        fanout::fan_out(&ids, |id| {
            instance::get_serialized_instance(&self.app.name, &self.name, *id, status, &sp)
        })
    }
}

impl fmt::Display for Proc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Proc<{}:{}>", self.app.name, self.name)
    }
}

/// Materialize a proc from the tree at `sp`.
pub(crate) fn get_proc(app: &App, name: &str, sp: &Snapshot) -> Result<Proc> {
    let dir = Dir::new(paths::proc_path(&app.name, name), sp.clone());

    let port = match sp.get_int(&dir.prefix(paths::PORT_FILE)) {
        Ok(port) => u16::try_from(port)
            .map_err(|_| errorf!(ErrorKind::InvalidPort, "invalid port: {port}"))?,
        Err(err) if err.is_noent() => {
            return Err(errorf!(
                ErrorKind::NotFound,
                "port not found for {}-{name}",
                app.name
            ))
        }
        Err(err) => return Err(err.into()),
    };

    let control_port = match sp.get_int(&dir.prefix(paths::PORT_CONTROL_FILE)) {
        Ok(port) => Some(
            u16::try_from(port)
                .map_err(|_| errorf!(ErrorKind::InvalidPort, "invalid control port: {port}"))?,
        ),
        Err(err) if err.is_noent() => None,
        Err(err) => return Err(err.into()),
    };

    let attrs = match sp.get_json(&dir.prefix(paths::ATTRS_FILE)) {
        Ok(attrs) => attrs,
        Err(err) if err.is_noent() => ProcAttrs::default(),
        Err(err) => return Err(err.into()),
    };

    let registered = sp
        .get_string(&dir.prefix(paths::REGISTERED_FILE))
        .map_err(|err| {
            if err.is_noent() {
                errorf!(
                    ErrorKind::NotFound,
                    "registered not found for {}:{name}",
                    app.name
                )
            } else {
                err.into()
            }
        })?;
    let registered = store::parse_time_lenient(&registered)?;

    Ok(Proc {
        dir,
        name: name.to_string(),
        app: app.clone(),
        port,
        control_port,
        attrs,
        registered: Some(registered),
    })
}

/// Live instance ids of a proc across all its revisions, ascending.
pub(crate) fn proc_instance_ids(proc: &Proc, sp: &Snapshot) -> Result<Vec<i64>> {
    let revs = dir_names(sp, &proc.dir.prefix(paths::INSTANCES_SUBDIR))?;
    let mut ids = Vec::new();
    for rev in revs {
        ids.extend(instance::instance_ids(&proc.app.name, &rev, &proc.name, sp)?);
    }
    ids.sort_unstable();
    Ok(ids)
}

pub(crate) fn parse_ids(names: &[String]) -> Result<Vec<i64>> {
    names
        .iter()
        .map(|n| {
            n.parse::<i64>()
                .map_err(|e| errorf!(ErrorKind::InvalidFile, "invalid instance id `{n}`: {e}"))
        })
        .collect()
}

/// Claim the next free port from the shared counter.
///
/// Reads the counter, then compare-and-sets it to the successor. A CAS loss
/// means another claimer won that port; back off briefly and retry from the
/// latest revision. The value read by the winning CAS is the claimed port.
pub(crate) fn claim_next_port(sp: &Snapshot) -> Result<u16> {
    let mut sp = sp.clone();
    loop {
        sp = sp.fast_forward()?;
        let (body, file_rev) = sp.get_raw(paths::NEXT_PORT_PATH)?;
        let port = crate::coordinator::codec::decode_int(paths::NEXT_PORT_PATH, &body)?;

        match sp.set_raw_at(
            paths::NEXT_PORT_PATH,
            &crate::coordinator::codec::encode_int(port + 1),
            file_rev,
        ) {
            Ok(_) => {
                return u16::try_from(port)
                    .map_err(|_| errorf!(ErrorKind::InvalidPort, "port counter at {port}"))
            }
            Err(err) if err.is_rev_mismatch() => {
                let jitter = rand::thread_rng().gen_range(0..50);
                tracing::debug!(port, "lost port claim race, retrying");
                thread::sleep(CLAIM_RETRY_DELAY + Duration::from_millis(jitter));
            }
            Err(err) => return Err(Error::from(err)),
        }
    }
}
