//! Runners: host-local agents driving one instance each.
//!
//! A runner is keyed by `host:port` under `/runners/<host>/<port>` and its
//! body is the single-element list holding the instance id it drives.

use crossbeam::channel::Sender;

use crate::coordinator::{fanout, Dir, Snapshot};
use crate::error::{errorf, ErrorKind};
use crate::paths;
use crate::store::{split_addr, Store};
use crate::Result;

/// A host-local agent process bound to one instance.
#[derive(Debug, Clone)]
pub struct Runner {
    dir: Dir,
    pub addr: String,
    pub instance_id: i64,
}

impl Store {
    /// A new runner handle for the given instance. Persisted by
    /// [`Runner::register`].
    pub fn new_runner(&self, addr: &str, instance_id: i64) -> Result<Runner> {
        Ok(Runner {
            dir: Dir::new(runner_path(addr)?, self.snapshot().clone()),
            addr: addr.to_string(),
            instance_id,
        })
    }

    /// The runner at the given address.
    pub fn get_runner(&self, addr: &str) -> Result<Runner> {
        let sp = self.snapshot().fast_forward()?;
        get_runner(addr, &sp)
    }

    /// All runners across every host.
    pub fn runners(&self) -> Result<Vec<Runner>> {
        let sp = self.snapshot().fast_forward()?;
        let hosts = match sp.getdir(paths::RUNNERS_DIR) {
            Ok(hosts) => hosts,
            Err(err) if err.is_noent() => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut runners = Vec::new();
        for host in hosts {
            runners.extend(self.runners_by_host(&host)?);
        }
        Ok(runners)
    }

    /// All runners of a single host.
    pub fn runners_by_host(&self, host: &str) -> Result<Vec<Runner>> {
        let sp = self.snapshot().fast_forward()?;
        let ports = sp.getdir(&format!("{}/{host}", paths::RUNNERS_DIR))?;
        fanout::fan_out(&ports, |port| get_runner(&format!("{host}:{port}"), &sp))
    }

    /// Deliver every runner that registers, until the receiver disconnects
    /// or the store closes.
    pub fn watch_runner_start(&self, tx: &Sender<Runner>) -> Result<()> {
        let mut sp = self.snapshot().clone();
        loop {
            let ev = sp.wait(&format!("{}/*/*", paths::RUNNERS_DIR))?;
            sp = sp.at(ev.rev);
            if !ev.is_set() {
                continue;
            }
            let runner = get_runner(&addr_from_path(&ev.path)?, &sp)?;
            if tx.send(runner).is_err() {
                return Ok(());
            }
        }
    }

    /// Deliver the address of every runner that unregisters.
    pub fn watch_runner_stop(&self, tx: &Sender<String>) -> Result<()> {
        let mut sp = self.snapshot().clone();
        loop {
            let ev = sp.wait(&format!("{}/*/*", paths::RUNNERS_DIR))?;
            sp = sp.at(ev.rev);
            if !ev.is_del() {
                continue;
            }
            if tx.send(addr_from_path(&ev.path)?).is_err() {
                return Ok(());
            }
        }
    }
}

impl Runner {
    pub fn snapshot(&self) -> &Snapshot {
        self.dir.snapshot()
    }

    /// Save the runner in the registry.
    pub fn register(&self) -> Result<Runner> {
        let sp = self.snapshot().fast_forward()?;

        if sp.exists(self.dir.name())? {
            return Err(errorf!(
                ErrorKind::Conflict,
                "runner '{}' already registered",
                self.addr
            ));
        }

        let sp = sp.set_list(self.dir.name(), &[self.instance_id.to_string()])?;
        Ok(Runner {
            dir: self.dir.with(sp),
            ..self.clone()
        })
    }

    /// Remove the runner from the registry.
    pub fn unregister(&self) -> Result<()> {
        let sp = self.snapshot().fast_forward()?;
        sp.del(self.dir.name())?;
        Ok(())
    }
}

fn runner_path(addr: &str) -> Result<String> {
    let (host, port) = split_addr(addr)?;
    Ok(paths::runner_path(host, port))
}

/// `/runners/<host>/<port>` back to `host:port`.
fn addr_from_path(path: &str) -> Result<String> {
    let mut parts = path.split('/').filter(|s| !s.is_empty());
    match (parts.next(), parts.next(), parts.next()) {
        (Some("runners"), Some(host), Some(port)) => Ok(format!("{host}:{port}")),
        _ => Err(errorf!(
            ErrorKind::Coordinator,
            "unexpected runner path `{path}`"
        )),
    }
}

/// Materialize a runner from the tree at `sp`.
pub(crate) fn get_runner(addr: &str, sp: &Snapshot) -> Result<Runner> {
    let path = runner_path(addr)?;
    let fields = sp.get_list(&path).map_err(|err| {
        if err.is_noent() {
            errorf!(ErrorKind::NotFound, "runner '{addr}' not found")
        } else {
            err.into()
        }
    })?;
    let id = fields
        .first()
        .ok_or_else(|| errorf!(ErrorKind::InvalidFile, "runner '{addr}' body is empty"))?;
    let instance_id = id
        .parse()
        .map_err(|e| errorf!(ErrorKind::InvalidFile, "runner '{addr}' instance id: {e}"))?;

    Ok(Runner {
        dir: Dir::new(path, sp.clone()),
        addr: addr.to_string(),
        instance_id,
    })
}

#[cfg(test)]
mod tests {
    use super::addr_from_path;

    #[test]
    fn addr_round_trips_through_path() {
        assert_eq!(
            addr_from_path("/runners/10.0.1.2/7777").unwrap(),
            "10.0.1.2:7777"
        );
        assert!(addr_from_path("/other/10.0.1.2/7777").is_err());
    }
}
