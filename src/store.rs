//! The root store handle and snapshot discipline.
//!
//! A [`Store`] wraps a [`Snapshot`] of the coordination tree. Every public
//! mutator first fast-forwards to the latest revision, performs its writes
//! against that revision, and returns a handle pinned to the result. Readers
//! never advance implicitly.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::coordinator::{self, Backend, Snapshot};
use crate::error::{errorf, ErrorKind};
use crate::instance::{self, Instance};
use crate::paths;
use crate::Result;

/// Encodes the expected tree layout and MUST be increased whenever breaking
/// changes are introduced.
pub const SCHEMA_VERSION: i64 = 5;

/// Default coordinator URI: a fresh in-memory tree.
pub const DEFAULT_URI: &str = "mem:";

/// Default root the registry tree is pinned under.
pub const DEFAULT_ROOT: &str = "/convoy";

/// First port handed out by the port-claim counter.
pub(crate) const START_PORT: i64 = 8000;

/// The representation of the coordinator tree.
#[derive(Debug, Clone)]
pub struct Store {
    snapshot: Snapshot,
}

impl Store {
    /// Connect to a coordinator and pin the registry under `root`.
    pub fn dial(uri: &str, root: &str) -> Result<Store> {
        Ok(Store {
            snapshot: Snapshot::dial(uri, root)?,
        })
    }

    /// Wrap an already-connected backend (custom transports, shared trees).
    pub fn with_backend(backend: Arc<dyn Backend>, root: &str) -> Result<Store> {
        Ok(Store {
            snapshot: Snapshot::with_backend(backend, root)?,
        })
    }

    /// Connect using a [`crate::config::Config`].
    pub fn from_config(config: &crate::config::Config) -> Result<Store> {
        Store::dial(&config.uri, &config.root)
    }

    pub(crate) fn at(snapshot: Snapshot) -> Store {
        Store { snapshot }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn rev(&self) -> i64 {
        self.snapshot.rev()
    }

    /// Advance the store to the latest revision.
    pub fn fast_forward(&self) -> Result<Store> {
        Ok(Store::at(self.snapshot.fast_forward()?))
    }

    /// Set up expected paths. Idempotent: creates the port counter if absent
    /// and writes the schema version on first initialization.
    pub fn init(&self) -> Result<Store> {
        let mut sp = self.snapshot.fast_forward()?;

        if !sp.exists(paths::NEXT_PORT_PATH)? {
            sp = sp.set_int(paths::NEXT_PORT_PATH, START_PORT)?;
        }

        match coordinator::verify_schema(SCHEMA_VERSION, &sp) {
            Ok(_) => {}
            Err(err) if err.is_noent() => {
                sp = coordinator::set_schema_version(SCHEMA_VERSION, &sp)?;
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(rev = sp.rev(), "registry tree initialized");
        Ok(Store::at(sp))
    }

    /// Error if the stored schema differs from [`SCHEMA_VERSION`].
    pub fn verify_schema(&self) -> Result<i64> {
        let sp = self.snapshot.fast_forward()?;
        Ok(coordinator::verify_schema(SCHEMA_VERSION, &sp)?)
    }

    /// Overwrite the stored schema version marker.
    pub fn set_schema_version(&self, version: i64) -> Result<()> {
        coordinator::set_schema_version(version, &self.snapshot)?;
        Ok(())
    }

    /// Create tickets for either new or existing instances until exactly
    /// `factor` instances of `(app, rev, proc)` exist in `env`.
    ///
    /// Returns the tickets (instances registered or stop-marked by this
    /// call) and the count observed before reconciliation.
    pub fn scale(
        &self,
        app: &str,
        rev: &str,
        proc: &str,
        env: &str,
        factor: usize,
    ) -> Result<(Vec<Instance>, usize)> {
        validate_input(app).map_err(|e| errorf!(e.kind(), "given app not valid: {app} ({e})"))?;
        validate_input(rev).map_err(|e| errorf!(e.kind(), "given rev not valid: {rev} ({e})"))?;
        validate_input(proc).map_err(|e| errorf!(e.kind(), "given proc not valid: {proc} ({e})"))?;
        validate_input(env).map_err(|e| errorf!(e.kind(), "given env not valid: {env} ({e})"))?;

        let sp = self.snapshot.fast_forward()?;

        if !sp.exists(&paths::revision_path(app, rev))? {
            return Err(errorf!(
                ErrorKind::NotFound,
                "rev '{rev}' not found for app '{app}'"
            ));
        }
        if !sp.exists(&paths::proc_path(app, proc))? {
            return Err(errorf!(ErrorKind::NotFound, "proc '{proc}' not found"));
        }
        if !sp.exists(&paths::env_var_path(app, env))? {
            return Err(errorf!(ErrorKind::NotFound, "env '{env}' not found"));
        }

        let ids = instance::instance_ids(app, rev, proc, &sp)?;
        let mut current_set = Vec::new();
        for id in ids {
            let ins = instance::get_instance(id, &sp)?;
            if ins.env == env {
                current_set.push(ins);
            }
        }
        let current = current_set.len();

        let mut tickets = Vec::new();
        if factor > current {
            tracing::debug!(app, rev, proc, env, current, factor, "scaling up");
            let mut cursor = sp;
            for _ in 0..factor - current {
                let ticket = instance::register_instance(&cursor, app, rev, proc, env)?;
                cursor = ticket.snapshot().clone();
                tickets.push(ticket);
            }
        } else if factor < current {
            tracing::debug!(app, rev, proc, env, current, factor, "scaling down");
            for ins in current_set.into_iter().take(current - factor) {
                ins.stop().map_err(|err| {
                    if err.is_invalid_state() {
                        errorf!(ErrorKind::InvalidState, "instance '{}' isn't running", ins.id)
                    } else {
                        err
                    }
                })?;
                tickets.push(ins);
            }
        }

        Ok((tickets, current))
    }

    /// The scale of an `app:proc@rev` tuple plus the revision it was
    /// observed at. A missing lookup directory reads as scale 0.
    pub fn get_scale(&self, app: &str, rev: &str, proc: &str) -> Result<(usize, i64)> {
        let sp = self.snapshot.fast_forward()?;
        match sp.stat(&paths::proc_instances_path(app, rev, proc)) {
            Ok((count, _)) => Ok((count, sp.rev())),
            Err(err) if err.is_noent() => Ok((0, sp.rev())),
            Err(err) => Err(err.into()),
        }
    }

    /// Registered log-collector endpoints as `host:port` strings.
    pub fn get_loggers(&self) -> Result<Vec<String>> {
        let sp = self.snapshot.fast_forward()?;
        let names = dir_names(&sp, paths::LOGGERS_DIR)?;
        Ok(names.iter().map(|n| n.replacen('-', ":", 1)).collect())
    }

    /// Register a log-collector endpoint.
    pub fn register_logger(&self, addr: &str, version: &str) -> Result<Store> {
        let (host, port) = split_addr(addr)?;
        let sp = self.snapshot.fast_forward()?;
        let sp = sp.set_string(
            &format!("{}/{host}-{port}", paths::LOGGERS_DIR),
            &format!("{} {version}", timestamp()),
        )?;
        Ok(Store::at(sp))
    }

    pub fn unregister_logger(&self, addr: &str) -> Result<()> {
        let (host, port) = split_addr(addr)?;
        let sp = self.snapshot.fast_forward()?;
        sp.del(&format!("{}/{host}-{port}", paths::LOGGERS_DIR))?;
        Ok(())
    }

    /// Registered proxy hosts.
    pub fn get_proxies(&self) -> Result<Vec<String>> {
        let sp = self.snapshot.fast_forward()?;
        dir_names(&sp, paths::PROXIES_DIR)
    }

    pub fn register_proxy(&self, host: &str) -> Result<Store> {
        let sp = self.snapshot.fast_forward()?;
        let sp = sp.set_string(&format!("{}/{host}", paths::PROXIES_DIR), &timestamp())?;
        Ok(Store::at(sp))
    }

    pub fn unregister_proxy(&self, host: &str) -> Result<()> {
        let sp = self.snapshot.fast_forward()?;
        sp.del(&format!("{}/{host}", paths::PROXIES_DIR))?;
        Ok(())
    }

    /// Registered process-manager hosts.
    pub fn get_pms(&self) -> Result<Vec<String>> {
        let sp = self.snapshot.fast_forward()?;
        dir_names(&sp, paths::PMS_DIR)
    }

    pub fn register_pm(&self, host: &str, version: &str) -> Result<Store> {
        let sp = self.snapshot.fast_forward()?;
        let sp = sp.set_string(
            &format!("{}/{host}", paths::PMS_DIR),
            &format!("{} {version}", timestamp()),
        )?;
        Ok(Store::at(sp))
    }

    pub fn unregister_pm(&self, host: &str) -> Result<()> {
        let sp = self.snapshot.fast_forward()?;
        sp.del(&format!("{}/{host}", paths::PMS_DIR))?;
        Ok(())
    }
}

/// Directory listing with a missing directory reading as empty.
pub(crate) fn dir_names(sp: &Snapshot, path: &str) -> Result<Vec<String>> {
    match sp.getdir(path) {
        Ok(names) => Ok(names),
        Err(err) if err.is_noent() => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn split_addr(addr: &str) -> Result<(&str, &str)> {
    addr.rsplit_once(':')
        .filter(|(host, port)| !host.is_empty() && !port.is_empty())
        .ok_or_else(|| errorf!(ErrorKind::InvalidArgument, "invalid address `{addr}`"))
}

/// Current UTC time as the wire timestamp format.
pub(crate) fn timestamp() -> String {
    format_time(now())
}

pub(crate) fn now() -> OffsetDateTime {
    // Wire timestamps carry whole seconds.
    OffsetDateTime::now_utc()
        .replace_nanosecond(0)
        .expect("zero nanosecond is valid")
}

pub(crate) fn format_time(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).expect("rfc3339 formatting")
}

pub(crate) fn parse_time(val: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(val, &Rfc3339)
        .map_err(|e| errorf!(ErrorKind::InvalidFile, "invalid timestamp `{val}`: {e}"))
}

/// Parse a timestamp, falling back to the historical
/// `2006-01-02 15:04:05 -0700 MST` layout still found on old proc records.
pub(crate) fn parse_time_lenient(val: &str) -> Result<OffsetDateTime> {
    if let Ok(t) = OffsetDateTime::parse(val, &Rfc3339) {
        return Ok(t);
    }
    let legacy = format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
    );
    let trimmed = match val.rsplit_once(' ') {
        Some((head, zone)) if zone.chars().all(|c| c.is_ascii_alphabetic()) => head,
        _ => val,
    };
    OffsetDateTime::parse(trimmed, &legacy)
        .map_err(|e| errorf!(ErrorKind::InvalidFile, "invalid timestamp `{val}`: {e}"))
}

static VALID_INPUT: OnceLock<Regex> = OnceLock::new();

/// Validate a user-supplied name: non-empty, alphanumerics plus `-` and `.`.
pub(crate) fn validate_input(s: &str) -> Result<()> {
    if s.is_empty() {
        return Err(errorf!(
            ErrorKind::InvalidArgument,
            "input can't be zero length"
        ));
    }
    let re = VALID_INPUT.get_or_init(|| Regex::new(r"^[[:alnum:]\-.]+$").expect("valid regex"));
    if !re.is_match(s) {
        return Err(errorf!(
            ErrorKind::InvalidArgument,
            "input only allows alphanumeric characters, '-' and '.'"
        ));
    }
    Ok(())
}
