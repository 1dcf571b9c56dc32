//! Instances: the lifecycle state machine at the heart of the registry.
//!
//! Canonical state lives under `/instances/<id>/`; a lookup index under
//! `/apps/<app>/procs/<proc>/` lets agents enumerate instances by status
//! without scanning the canonical tree. The two are kept consistent by
//! writing the new index entry before deleting the old one, so observers
//! may see brief dual-presence but never absence.
//!
//! Ownership of claimed and running instances is anchored in the `start`
//! file: its first field is the claimer, and transitions that require
//! authority verify it. Contended transitions (claim, fail-from-pending)
//! are resolved by the coordinator's per-file compare-and-set.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::coordinator::{codec, fanout, Dir, Snapshot};
use crate::error::{errorf, Error, ErrorKind};
use crate::paths;
use crate::store::{self, dir_names, Store};
use crate::Result;

/// Current state of the instance state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsStatus {
    Pending,
    Claimed,
    Running,
    Stopping,
    Failed,
    Exited,
    Lost,
    Done,
}

impl InsStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InsStatus::Pending => "pending",
            InsStatus::Claimed => "claimed",
            InsStatus::Running => "running",
            InsStatus::Stopping => "stopping",
            InsStatus::Failed => "failed",
            InsStatus::Exited => "exited",
            InsStatus::Lost => "lost",
            InsStatus::Done => "done",
        }
    }
}

impl fmt::Display for InsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InsStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(InsStatus::Pending),
            "claimed" => Ok(InsStatus::Claimed),
            "running" => Ok(InsStatus::Running),
            "stopping" => Ok(InsStatus::Stopping),
            "failed" => Ok(InsStatus::Failed),
            "exited" => Ok(InsStatus::Exited),
            "lost" => Ok(InsStatus::Lost),
            "done" => Ok(InsStatus::Done),
            other => Err(errorf!(
                ErrorKind::InvalidFile,
                "unknown instance status `{other}`"
            )),
        }
    }
}

/// Restart counters: general failures and OOM kills.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsRestarts {
    #[serde(default)]
    pub fail: i64,
    #[serde(default)]
    pub oom: i64,
}

impl InsRestarts {
    /// Wire order of the restarts list.
    pub fn fields(self) -> [i64; 2] {
        [self.fail, self.oom]
    }
}

/// Who ended an instance, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Termination {
    pub client: String,
    pub reason: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub time: Option<OffsetDateTime>,
}

/// A service instance.
#[derive(Debug, Clone)]
pub struct Instance {
    dir: Dir,
    pub id: i64,
    pub app_name: String,
    pub revision_name: String,
    pub process_name: String,
    pub env: String,
    pub ip: String,
    pub port: u16,
    pub tele_port: u16,
    pub host: String,
    pub status: InsStatus,
    pub restarts: InsRestarts,
    pub registered: Option<OffsetDateTime>,
    pub claimed: Option<OffsetDateTime>,
    pub termination: Option<Termination>,
}

/// JSON shape persisted under the failed/lost/done lookup directories.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireInstance {
    id: i64,
    app: String,
    rev: String,
    proc: String,
    env: String,
    ip: String,
    port: u16,
    #[serde(rename = "telePort")]
    tele_port: u16,
    host: String,
    status: InsStatus,
    restarts: InsRestarts,
    #[serde(default, with = "time::serde::rfc3339::option")]
    registered: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    claimed: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    termination: Option<Termination>,
}

impl Store {
    /// Allocate an id and store a new pending instance.
    ///
    /// Writes, in order: the `object` record, the empty `start` file, the
    /// per-proc lookup entry, and finally `registered` so event consumers
    /// see a fully-formed instance when the registration event fires.
    pub fn register_instance(
        &self,
        app: &str,
        rev: &str,
        proc: &str,
        env: &str,
    ) -> Result<Instance> {
        let sp = self.snapshot().fast_forward()?;
        register_instance(&sp, app, rev, proc, env)
    }

    /// The instance with the given id at the latest revision.
    pub fn get_instance(&self, id: i64) -> Result<Instance> {
        let sp = self.snapshot().fast_forward()?;
        get_instance(id, &sp)
    }

    /// An instance reconstructed from its serialized lookup entry.
    pub fn get_serialized_instance(
        &self,
        app: &str,
        proc: &str,
        id: i64,
        status: InsStatus,
    ) -> Result<Instance> {
        let sp = self.snapshot().fast_forward()?;
        get_serialized_instance(app, proc, id, status, &sp)
    }

    /// All existing instances.
    pub fn get_instances(&self) -> Result<Vec<Instance>> {
        let sp = self.snapshot().fast_forward()?;
        let names = dir_names(&sp, paths::INSTANCES_DIR)?;
        let ids = crate::proc::parse_ids(&names)?;
        fanout::fan_out(&ids, |id| get_instance(*id, &sp))
    }

    /// All existing instances in lost state.
    pub fn get_lost_instances(&self) -> Result<Vec<Instance>> {
        Ok(self
            .get_instances()?
            .into_iter()
            .filter(|i| i.status == InsStatus::Lost)
            .collect())
    }
}

impl Instance {
    pub fn snapshot(&self) -> &Snapshot {
        self.dir.snapshot()
    }

    fn rebased(&self, sp: Snapshot) -> Instance {
        Instance {
            dir: self.dir.with(sp),
            ..self.clone()
        }
    }

    fn start_path(&self) -> String {
        self.dir.prefix(paths::START_FILE)
    }

    fn lookup_path(&self, status: InsStatus) -> String {
        paths::proc_status_path(
            &self.app_name,
            &self.revision_name,
            &self.process_name,
            self.id,
            status,
        )
    }

    /// Lock the instance to `host`.
    ///
    /// The claim is a compare-and-set on the empty `start` file; losing the
    /// race surfaces as `InsClaimed`. Claiming a done instance is
    /// `Unauthorized`.
    pub fn claim(&self, host: &str) -> Result<Instance> {
        if self.is_done()? {
            return Err(errorf!(ErrorKind::Unauthorized, "{self} is done"));
        }

        let sp = self.snapshot();
        let (body, file_rev) = sp.get_raw(&self.start_path())?;
        let fields = codec::decode_list(&self.start_path(), &body)?;
        if !fields.is_empty() {
            return Err(errorf!(ErrorKind::InsClaimed, "{self} already claimed"));
        }

        let sp = sp
            .set_raw_at(&self.start_path(), host.as_bytes(), file_rev)
            .map_err(|err| {
                if err.is_rev_mismatch() {
                    errorf!(ErrorKind::InsClaimed, "{self} already claimed")
                } else {
                    err.into()
                }
            })?;

        let claimed = store::now();
        let sp = sp.set_string(
            &self.dir.prefix(&format!("{}/{host}", paths::CLAIMS_DIR)),
            &store::format_time(claimed),
        )?;

        let mut ins = self.rebased(sp);
        ins.ip = host.to_string();
        ins.status = InsStatus::Claimed;
        ins.claimed = Some(claimed);
        Ok(ins)
    }

    /// The list of claimers that ever claimed this instance.
    pub fn claims(&self) -> Result<Vec<String>> {
        let sp = self.snapshot().fast_forward()?;
        dir_names(&sp, &self.dir.prefix(paths::CLAIMS_DIR))
    }

    /// Release the claim held by `host`, returning the instance to pending.
    pub fn unclaim(&self, host: &str) -> Result<Instance> {
        let sp = self.verify_claimer(host)?;
        let sp = sp.set_string(&self.start_path(), "")?;

        let mut ins = self.rebased(sp);
        ins.ip = String::new();
        ins.status = InsStatus::Pending;
        Ok(ins)
    }

    /// Transition the instance to running at the given address.
    ///
    /// Only the claimer may start; starting an already-running instance is
    /// a no-op.
    pub fn started(&self, host: &str, hostname: &str, port: u16, tele_port: u16) -> Result<Instance> {
        if self.status == InsStatus::Running {
            return Ok(self.clone());
        }
        let sp = self.verify_claimer(host)?;

        let fields = vec![
            host.to_string(),
            port.to_string(),
            hostname.to_string(),
            tele_port.to_string(),
        ];
        let sp = sp.set_list(&self.start_path(), &fields)?;

        let mut ins = self.rebased(sp);
        ins.ip = host.to_string();
        ins.port = port;
        ins.host = hostname.to_string();
        ins.tele_port = tele_port;
        ins.status = InsStatus::Running;
        Ok(ins)
    }

    /// Record new restart counters. A no-op unless the instance is still
    /// running at the latest revision.
    pub fn restarted(&self, restarts: InsRestarts) -> Result<Instance> {
        let sp = self.snapshot().fast_forward()?;
        let ins = get_instance(self.id, &sp)?;
        if ins.status != InsStatus::Running {
            return Ok(ins);
        }

        let sp = sp.set_int_list(&self.dir.prefix(paths::RESTARTS_FILE), &restarts.fields())?;
        let mut ins = ins.rebased(sp);
        ins.restarts = restarts;
        Ok(ins)
    }

    /// Communicate the intent that the instance should be stopped.
    pub fn stop(&self) -> Result<()> {
        let sp = self.snapshot().fast_forward()?;
        let ins = get_instance(self.id, &sp)?;
        if ins.status != InsStatus::Running {
            return Err(errorf!(
                ErrorKind::InvalidState,
                "instance {} is not running",
                self.id
            ));
        }
        sp.set_string(&self.dir.prefix(paths::STOP_FILE), "")?;
        Ok(())
    }

    /// Transition the instance to failed.
    ///
    /// Requires claimer authority unless the instance is still pending; a
    /// pending-fail race is decided by the compare-and-set on `status`, and
    /// the loser receives the raw revision-mismatch error.
    pub fn failed(&self, host: &str, reason: &str) -> Result<Instance> {
        let from = self.status;
        if from != InsStatus::Pending {
            self.verify_claimer(host)?;
        }
        let ins = self.update_status(InsStatus::Failed)?;
        ins.update_lookup(from, InsStatus::Failed, host, reason)
    }

    /// Transition the instance to lost, recording client and reason.
    pub fn lost(&self, client: &str, reason: &str) -> Result<Instance> {
        let from = self.status;
        let ins = self.update_status(InsStatus::Lost)?;
        ins.update_lookup(from, InsStatus::Lost, client, reason)
    }

    /// Tell the registry that the instance has exited. The lookup entry is
    /// removed; the canonical record stays for inspection.
    pub fn exited(&self, host: &str) -> Result<Instance> {
        self.verify_claimer(host)?;
        let ins = self.update_status(InsStatus::Exited)?;
        del_lookup_entry(ins.snapshot(), &ins.lookup_path(InsStatus::Exited))?;
        Ok(ins)
    }

    /// Move the instance to done and remove its canonical record. The
    /// original termination of a failed or lost instance is preserved.
    pub fn unregister(&self, client: &str, reason: &str) -> Result<()> {
        let ins = self.update_lookup(self.status, InsStatus::Done, client, reason)?;
        ins.dir.del_tree()?;
        Ok(())
    }

    /// Advisory lock. Fails with `Unauthorized` when already locked.
    pub fn lock(&self, client: &str, reason: &str) -> Result<Instance> {
        if self.is_locked()? {
            return Err(errorf!(
                ErrorKind::Unauthorized,
                "instance {} is already locked",
                self.id
            ));
        }
        let sp = self.snapshot().set_string(
            &self.dir.prefix(paths::LOCK_FILE),
            &format!("{} {client} {reason}", store::timestamp()),
        )?;
        Ok(self.rebased(sp))
    }

    /// Remove the advisory lock.
    pub fn unlock(&self) -> Result<Instance> {
        let sp = self.snapshot().del(&self.dir.prefix(paths::LOCK_FILE))?;
        Ok(self.rebased(sp))
    }

    pub fn is_locked(&self) -> Result<bool> {
        let sp = self.snapshot().fast_forward()?;
        Ok(sp.exists(&self.dir.prefix(paths::LOCK_FILE))?)
    }

    /// Whether the instance reached done state.
    pub fn is_done(&self) -> Result<bool> {
        let sp = self.snapshot().fast_forward()?;
        Ok(sp.exists(&self.lookup_path(InsStatus::Done))?)
    }

    /// The raw body of the current lookup entry.
    pub fn get_status_info(&self) -> Result<String> {
        Ok(self.snapshot().get_string(&self.lookup_path(self.status))?)
    }

    /// Block until the `status` file changes and return the rebased
    /// instance.
    pub fn wait_status(&self) -> Result<Instance> {
        let ev = self
            .snapshot()
            .wait(&paths::instance_file(self.id, paths::STATUS_FILE))?;
        let body = codec::decode_string(&ev.path, &ev.body)?;
        let mut ins = self.rebased(self.snapshot().at(ev.rev));
        ins.status = InsStatus::from_str(&body)?;
        Ok(ins)
    }

    /// Block until the instance is claimed.
    pub fn wait_claimed(&self) -> Result<Instance> {
        self.wait_start_status(InsStatus::Claimed)
    }

    /// Block until the instance is started.
    pub fn wait_started(&self) -> Result<Instance> {
        self.wait_start_status(InsStatus::Running)
    }

    /// Block until a stop is requested.
    pub fn wait_stop(&self) -> Result<Instance> {
        let ev = self
            .snapshot()
            .wait(&paths::instance_file(self.id, paths::STOP_FILE))?;
        let mut ins = self.rebased(self.snapshot().at(ev.rev));
        ins.status = InsStatus::Stopping;
        Ok(ins)
    }

    /// Block until the instance exited.
    pub fn wait_exited(&self) -> Result<Instance> {
        let mut ins = self.clone();
        loop {
            ins = ins.wait_status()?;
            if ins.status == InsStatus::Exited {
                return Ok(ins);
            }
        }
    }

    /// Block until the instance failed, decoding the recorded termination
    /// from the failed-lookup entry. This outlives the cleanup of the
    /// canonical record.
    pub fn wait_failed(&self) -> Result<Instance> {
        let ev = self.snapshot().wait(&self.lookup_path(InsStatus::Failed))?;
        let wire: WireInstance = codec::decode_json(&ev.path, &ev.body)?;
        let mut ins = self.rebased(self.snapshot().at(ev.rev));
        ins.status = wire.status;
        ins.termination = wire.termination;
        Ok(ins)
    }

    /// Block until the instance is lost.
    pub fn wait_lost(&self) -> Result<Instance> {
        let mut ins = self.clone();
        loop {
            ins = ins.wait_status()?;
            if ins.status == InsStatus::Lost {
                return Ok(ins);
            }
        }
    }

    /// Block until the instance is unregistered. Any event other than the
    /// deletion of the canonical record is a hard error.
    pub fn wait_unregister(&self) -> Result<()> {
        let ev = self
            .snapshot()
            .wait(&paths::instance_file(self.id, paths::OBJECT_FILE))?;
        if ev.is_del() {
            return Ok(());
        }
        Err(errorf!(
            ErrorKind::Coordinator,
            "unexpected event at {} waiting for unregister",
            ev.path
        ))
    }

    /// `app:proc#env`
    pub fn env_string(&self) -> String {
        format!("{}:{}#{}", self.app_name, self.process_name, self.env)
    }

    /// `app:proc@rev`
    pub fn rev_string(&self) -> String {
        format!(
            "{}:{}@{}",
            self.app_name, self.process_name, self.revision_name
        )
    }

    /// `app:proc@rev#env`
    pub fn ref_string(&self) -> String {
        format!(
            "{}:{}@{}#{}",
            self.app_name, self.process_name, self.revision_name, self.env
        )
    }

    /// `app:proc`
    pub fn service_name(&self) -> String {
        format!("{}:{}", self.app_name, self.process_name)
    }

    /// `app-proc-rev-port`
    pub fn worker_id(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.app_name, self.process_name, self.revision_name, self.port
        )
    }

    /// Space-separated field listing for line-oriented consumers.
    pub fn fields_line(&self) -> String {
        format!(
            "{} {} {} {} {} {} {}",
            self.id,
            self.app_name,
            self.revision_name,
            self.process_name,
            self.ip,
            self.port,
            self.tele_port
        )
    }

    /// `INSTANCE[id]`
    pub fn id_string(&self) -> String {
        format!("INSTANCE[{}]", self.id)
    }

    fn update_status(&self, status: InsStatus) -> Result<Instance> {
        let sp = self
            .snapshot()
            .set_string(&self.dir.prefix(paths::STATUS_FILE), status.as_str())?;
        let mut ins = self.rebased(sp);
        ins.status = status;
        Ok(ins)
    }

    /// Move the lookup entry from the `from` status directory to `to`,
    /// writing the serialized instance at the destination before deleting
    /// the source.
    fn update_lookup(
        &self,
        from: InsStatus,
        to: InsStatus,
        client: &str,
        reason: &str,
    ) -> Result<Instance> {
        let mut termination = Termination {
            client: client.to_string(),
            reason: reason.to_string(),
            time: Some(store::now()),
        };

        let sp = self.snapshot().fast_forward()?;

        // Leaving failed/lost keeps the termination that put us there.
        if matches!(from, InsStatus::Failed | InsStatus::Lost) {
            let prev =
                get_serialized_instance(&self.app_name, &self.process_name, self.id, from, &sp)?;
            if let Some(t) = prev.termination {
                termination = t;
            }
        }

        let mut ins = self.clone();
        ins.termination = Some(termination);

        let sp = sp.set_json(&ins.lookup_path(to), &ins.to_wire())?;
        let sp = del_lookup_entry(&sp, &ins.lookup_path(from))?;

        Ok(ins.rebased(sp))
    }

    /// The host currently holding the claim, read at the latest revision.
    fn claimer(&self) -> Result<(Option<String>, Snapshot)> {
        let sp = self.snapshot().fast_forward()?;
        let fields = sp.get_list(&self.start_path())?;
        Ok((fields.into_iter().next(), sp))
    }

    fn verify_claimer(&self, host: &str) -> Result<Snapshot> {
        let (claimer, sp) = self.claimer()?;
        match claimer {
            None => Err(errorf!(
                ErrorKind::Unauthorized,
                "instance {} is not claimed",
                self.id
            )),
            Some(claimer) if claimer != host => Err(errorf!(
                ErrorKind::Unauthorized,
                "instance {} has different claimer: {claimer} != {host}",
                self.id
            )),
            Some(_) => Ok(sp),
        }
    }

    fn wait_start_status(&self, wanted: InsStatus) -> Result<Instance> {
        let mut ins = self.clone();
        loop {
            ins = ins.wait_start()?;
            if ins.status == wanted {
                return Ok(ins);
            }
        }
    }

    /// Wait for the next change of the `start` file and decode the state it
    /// encodes: empty is pending, one field is claimed, four fields is
    /// running.
    fn wait_start(&self) -> Result<Instance> {
        let path = paths::instance_file(self.id, paths::START_FILE);
        let ev = self.snapshot().wait(&path)?;
        let fields = codec::decode_list(&path, &ev.body)?;

        let mut ins = self.rebased(self.snapshot().at(ev.rev));
        if fields.len() >= 4 {
            ins.ip = fields[0].clone();
            ins.port = parse_port(&fields[1])?;
            ins.host = fields[2].clone();
            ins.tele_port = parse_port(&fields[3])?;
            ins.status = InsStatus::Running;
        } else if !fields.is_empty() {
            ins.ip = fields[0].clone();
            ins.status = InsStatus::Claimed;
        } else {
            ins.ip = String::new();
            ins.status = InsStatus::Pending;
        }
        Ok(ins)
    }

    pub(crate) fn to_wire(&self) -> WireInstance {
        WireInstance {
            id: self.id,
            app: self.app_name.clone(),
            rev: self.revision_name.clone(),
            proc: self.process_name.clone(),
            env: self.env.clone(),
            ip: self.ip.clone(),
            port: self.port,
            tele_port: self.tele_port,
            host: self.host.clone(),
            status: self.status,
            restarts: self.restarts,
            registered: self.registered,
            claimed: self.claimed,
            termination: self.termination.clone(),
        }
    }

    fn from_wire(wire: WireInstance, dir: Dir) -> Instance {
        Instance {
            dir,
            id: wire.id,
            app_name: wire.app,
            revision_name: wire.rev,
            process_name: wire.proc,
            env: wire.env,
            ip: wire.ip,
            port: wire.port,
            tele_port: wire.tele_port,
            host: wire.host,
            status: wire.status,
            restarts: wire.restarts,
            registered: wire.registered,
            claimed: wire.claimed,
            termination: wire.termination,
        }
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Instance{{id={}, app={}, rev={}, proc={}, env={}, addr={}:{}}}",
            self.id,
            self.app_name,
            self.revision_name,
            self.process_name,
            self.env,
            self.ip,
            self.port
        )
    }
}

/// Delete a lookup-index entry, tolerating its absence: an earlier
/// transition may already have moved or removed it.
fn del_lookup_entry(sp: &Snapshot, path: &str) -> Result<Snapshot> {
    match sp.del(path) {
        Ok(sp) => Ok(sp),
        Err(err) if err.is_noent() => Ok(sp.clone()),
        Err(err) => Err(err.into()),
    }
}

fn parse_port(field: &str) -> Result<u16> {
    field
        .parse()
        .map_err(|_| errorf!(ErrorKind::InvalidPort, "invalid port: {field}"))
}

/// Store a new pending instance against `sp`.
pub(crate) fn register_instance(
    sp: &Snapshot,
    app: &str,
    rev: &str,
    proc: &str,
    env: &str,
) -> Result<Instance> {
    let id = sp.getuid()?;
    let registered = store::now();
    let dir = Dir::new(paths::instance_path(id), sp.clone());

    let object = vec![
        app.to_string(),
        rev.to_string(),
        proc.to_string(),
        env.to_string(),
    ];
    let sp1 = sp.set_list(&dir.prefix(paths::OBJECT_FILE), &object)?;
    let sp2 = sp1.set_string(&dir.prefix(paths::START_FILE), "")?;

    // Lookup entry for enumerating live instances per proc.
    let sp3 = sp2.set_string(
        &paths::proc_status_path(app, rev, proc, id, InsStatus::Pending),
        &store::format_time(registered),
    )?;

    // Must be the last write so the event system sees a complete instance.
    let sp4 = sp3.set_string(
        &dir.prefix(paths::REGISTERED_FILE),
        &store::format_time(registered),
    )?;

    tracing::debug!(id, app, rev, proc, env, "instance registered");

    Ok(Instance {
        dir: dir.with(sp4),
        id,
        app_name: app.to_string(),
        revision_name: rev.to_string(),
        process_name: proc.to_string(),
        env: env.to_string(),
        ip: String::new(),
        port: 0,
        tele_port: 0,
        host: String::new(),
        status: InsStatus::Pending,
        restarts: InsRestarts::default(),
        registered: Some(registered),
        claimed: None,
        termination: None,
    })
}

/// Rebuild an instance from its canonical record at `sp`.
///
/// Status is derived by inspection: the arity of `start` selects
/// pending/claimed/running, an explicit `status` file overrides it, and a
/// `stop` marker turns running into stopping.
pub(crate) fn get_instance(id: i64, sp: &Snapshot) -> Result<Instance> {
    let dir = Dir::new(paths::instance_path(id), sp.clone());

    if !sp.exists(dir.name())? {
        return Err(errorf!(ErrorKind::NotFound, "instance '{id}' not found"));
    }

    let mut ins = Instance {
        dir: dir.clone(),
        id,
        app_name: String::new(),
        revision_name: String::new(),
        process_name: String::new(),
        env: String::new(),
        ip: String::new(),
        port: 0,
        tele_port: 0,
        host: String::new(),
        status: InsStatus::Pending,
        restarts: InsRestarts::default(),
        registered: None,
        claimed: None,
        termination: None,
    };

    match sp.get_list(&dir.prefix(paths::START_FILE)) {
        Ok(fields) => {
            if let Some(ip) = fields.first() {
                ins.status = InsStatus::Claimed;
                ins.ip = ip.clone();
            }
            if fields.len() > 1 {
                ins.status = InsStatus::Running;
                ins.port = parse_port(&fields[1])?;
            }
            if fields.len() > 2 {
                ins.host = fields[2].clone();
            }
            if fields.len() > 3 {
                ins.tele_port = parse_port(&fields[3])?;
            }
        }
        Err(err) if err.is_noent() => {}
        Err(err) => return Err(err.into()),
    }

    match sp.get_string(&dir.prefix(paths::STATUS_FILE)) {
        Ok(status) => ins.status = InsStatus::from_str(&status)?,
        Err(err) if err.is_noent() => {}
        Err(err) => return Err(err.into()),
    }

    if ins.status == InsStatus::Running && sp.exists(&dir.prefix(paths::STOP_FILE))? {
        ins.status = InsStatus::Stopping;
    }

    let object = sp
        .get_list(&dir.prefix(paths::OBJECT_FILE))
        .map_err(|_| errorf!(ErrorKind::NotFound, "object file not found for instance {id}"))?;
    if object.len() < 4 {
        return Err(errorf!(
            ErrorKind::InvalidFile,
            "object file for {id} has {} instead of 4 fields",
            object.len()
        ));
    }
    ins.app_name = object[0].clone();
    ins.revision_name = object[1].clone();
    ins.process_name = object[2].clone();
    ins.env = object[3].clone();

    match sp.get_int_list(&dir.prefix(paths::RESTARTS_FILE)) {
        Ok(fields) => {
            if fields.len() < 2 {
                return Err(errorf!(
                    ErrorKind::InvalidFile,
                    "restarts file for {id} has {} instead of 2 fields",
                    fields.len()
                ));
            }
            ins.restarts = InsRestarts {
                fail: fields[0],
                oom: fields[1],
            };
        }
        Err(err) if err.is_noent() => {}
        Err(err) => return Err(err.into()),
    }

    let registered = sp.get_string(&dir.prefix(paths::REGISTERED_FILE))?;
    ins.registered = Some(store::parse_time(&registered)?);

    match sp.get_string(&dir.prefix(&format!("{}/{}", paths::CLAIMS_DIR, ins.ip))) {
        Ok(claimed) => ins.claimed = Some(store::parse_time(&claimed)?),
        Err(err) if err.is_noent() => {}
        Err(err) => return Err(err.into()),
    }

    Ok(ins)
}

/// An instance reconstructed from the JSON persisted under a terminal
/// lookup directory.
pub(crate) fn get_serialized_instance(
    app: &str,
    proc: &str,
    id: i64,
    status: InsStatus,
    sp: &Snapshot,
) -> Result<Instance> {
    let path = paths::proc_status_path(app, "", proc, id, status);
    let wire: WireInstance = sp.get_json(&path).map_err(|err| {
        let err = Error::from(err);
        Error::new(err.kind(), format!("fetching instance {id}: {err}"))
    })?;
    Ok(Instance::from_wire(
        wire,
        Dir::new(paths::instance_path(id), sp.clone()),
    ))
}

/// Live instance ids of `(app, rev, proc)`, ascending. Missing lookup
/// directories read as empty.
pub(crate) fn instance_ids(app: &str, rev: &str, proc: &str, sp: &Snapshot) -> Result<Vec<i64>> {
    let path = paths::proc_instances_path(app, rev, proc);
    if !sp.exists(&path)? {
        return Ok(Vec::new());
    }
    let names = sp.getdir(&path)?;
    let mut ids = crate::proc::parse_ids(&names)?;
    ids.sort_unstable();
    Ok(ids)
}
