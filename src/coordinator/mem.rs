//! In-memory coordinator backend.
//!
//! A fully linearizable, multi-version tree: every mutation allocates the
//! next global revision, every path keeps its full version history, and
//! watchers replay the mutation log in revision order. This is the `mem:`
//! transport behind [`crate::Store::dial`] and the backend the test suite
//! runs against.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex};

use super::glob;
use super::{Backend, CoordError, RawEvent};

#[derive(Debug, Clone)]
struct Version {
    rev: i64,
    body: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
struct LogEntry {
    rev: i64,
    path: String,
    body: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Inner {
    rev: i64,
    uid: i64,
    files: HashMap<String, Vec<Version>>,
    log: Vec<LogEntry>,
    closed: bool,
}

/// Shared in-memory tree. Cheap to clone behind an `Arc` via
/// [`crate::Store::dial`]; all handles observe the same linearizable history.
#[derive(Debug, Default)]
pub struct MemBackend {
    inner: Mutex<Inner>,
    wakeup: Condvar,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    /// Latest version of `path` visible at `rev`, if any.
    fn version_at(&self, path: &str, rev: i64) -> Option<&Version> {
        self.files
            .get(path)?
            .iter()
            .rev()
            .find(|v| v.rev <= rev)
    }

    fn live_at(&self, path: &str, rev: i64) -> Option<&Version> {
        self.version_at(path, rev).filter(|v| v.body.is_some())
    }

    /// Revision of the newest version of `path`, live or deleted.
    fn last_touched(&self, path: &str) -> Option<i64> {
        self.files.get(path).and_then(|vs| vs.last()).map(|v| v.rev)
    }

    fn has_child_at(&self, dir: &str, rev: i64) -> bool {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        self.files
            .keys()
            .any(|p| p.starts_with(&prefix) && self.live_at(p, rev).is_some())
    }

    fn record(&mut self, path: String, body: Option<Vec<u8>>) -> i64 {
        self.rev += 1;
        let rev = self.rev;
        self.files
            .entry(path.clone())
            .or_default()
            .push(Version {
                rev,
                body: body.clone(),
            });
        self.log.push(LogEntry { rev, path, body });
        rev
    }
}

impl Backend for MemBackend {
    fn head(&self) -> Result<i64, CoordError> {
        Ok(self.inner.lock().unwrap_or_else(|e| e.into_inner()).rev)
    }

    fn get(&self, path: &str, rev: i64) -> Result<(Vec<u8>, i64), CoordError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.live_at(path, rev) {
            Some(v) => Ok((v.body.clone().unwrap_or_default(), v.rev)),
            None => Err(CoordError::NoEnt {
                path: path.to_string(),
            }),
        }
    }

    fn set(&self, path: &str, body: &[u8], cas: i64) -> Result<i64, CoordError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(last) = inner.last_touched(path) {
            if last > cas {
                return Err(CoordError::RevMismatch {
                    path: path.to_string(),
                });
            }
        }
        let rev = inner.record(path.to_string(), Some(body.to_vec()));
        self.wakeup.notify_all();
        Ok(rev)
    }

    fn del(&self, path: &str, cas: i64) -> Result<i64, CoordError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let head = inner.rev;
        if inner.live_at(path, head).is_none() {
            return Err(CoordError::NoEnt {
                path: path.to_string(),
            });
        }
        if let Some(last) = inner.last_touched(path) {
            if last > cas {
                return Err(CoordError::RevMismatch {
                    path: path.to_string(),
                });
            }
        }
        let rev = inner.record(path.to_string(), None);
        self.wakeup.notify_all();
        Ok(rev)
    }

    fn del_tree(&self, path: &str) -> Result<i64, CoordError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let head = inner.rev;
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut doomed: Vec<String> = inner
            .files
            .keys()
            .filter(|p| (p.as_str() == path || p.starts_with(&prefix)))
            .filter(|p| inner.live_at(p, head).is_some())
            .cloned()
            .collect();
        doomed.sort();
        let mut rev = head;
        for p in doomed {
            rev = inner.record(p, None);
        }
        self.wakeup.notify_all();
        Ok(rev)
    }

    fn exists(&self, path: &str, rev: i64) -> Result<(bool, i64), CoordError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let found = inner.live_at(path, rev).is_some() || inner.has_child_at(path, rev);
        Ok((found, rev))
    }

    fn stat(&self, path: &str, rev: i64) -> Result<(usize, i64), CoordError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(v) = inner.live_at(path, rev) {
            let len = v.body.as_ref().map(Vec::len).unwrap_or(0);
            return Ok((len, v.rev));
        }
        let children = children_at(&inner, path, rev);
        if children.is_empty() {
            return Err(CoordError::NoEnt {
                path: path.to_string(),
            });
        }
        Ok((children.len(), rev))
    }

    fn getdir(&self, path: &str, rev: i64) -> Result<Vec<String>, CoordError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let children = children_at(&inner, path, rev);
        if children.is_empty() {
            return Err(CoordError::NoEnt {
                path: path.to_string(),
            });
        }
        Ok(children)
    }

    fn getuid(&self) -> Result<i64, CoordError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.uid += 1;
        Ok(inner.uid)
    }

    fn wait(&self, pattern: &str, from: i64) -> Result<RawEvent, CoordError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            let start = inner.log.partition_point(|e| e.rev < from);
            for entry in &inner.log[start..] {
                if glob::matches(pattern, &entry.path) {
                    return Ok(RawEvent {
                        path: entry.path.clone(),
                        body: entry.body.clone().unwrap_or_default(),
                        rev: entry.rev,
                        deleted: entry.body.is_none(),
                    });
                }
            }
            if inner.closed {
                return Err(CoordError::Closed);
            }
            inner = self
                .wakeup
                .wait(inner)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    fn close(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.closed = true;
        self.wakeup.notify_all();
    }
}

/// Distinct child names (files or subdirectories) of `path` at `rev`, sorted.
fn children_at(inner: &Inner, path: &str, rev: i64) -> Vec<String> {
    let prefix = format!("{}/", path.trim_end_matches('/'));
    let mut names: Vec<String> = inner
        .files
        .keys()
        .filter(|p| p.starts_with(&prefix) && inner.live_at(p, rev).is_some())
        .filter_map(|p| p[prefix.len()..].split('/').next())
        .map(str::to_string)
        .collect();
    names.sort();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn set_advances_revision_and_get_reads_back() {
        let be = MemBackend::new();
        let r1 = be.set("/a/b", b"one", 0).unwrap();
        let r2 = be.set("/a/c", b"two", r1).unwrap();
        assert!(r2 > r1);
        let (body, rev) = be.get("/a/b", r2).unwrap();
        assert_eq!(body, b"one");
        assert_eq!(rev, r1);
    }

    #[test]
    fn cas_rejects_stale_writer() {
        let be = MemBackend::new();
        let r1 = be.set("/k", b"v1", 0).unwrap();
        be.set("/k", b"v2", r1).unwrap();
        let err = be.set("/k", b"v3", r1).unwrap_err();
        assert!(matches!(err, CoordError::RevMismatch { .. }));
    }

    #[test]
    fn deleted_then_recreated_needs_fresh_rev() {
        let be = MemBackend::new();
        let r1 = be.set("/k", b"v1", 0).unwrap();
        let r2 = be.del("/k", r1).unwrap();
        assert!(matches!(
            be.set("/k", b"v2", r1),
            Err(CoordError::RevMismatch { .. })
        ));
        be.set("/k", b"v2", r2).unwrap();
    }

    #[test]
    fn historical_reads_see_old_values() {
        let be = MemBackend::new();
        let r1 = be.set("/k", b"v1", 0).unwrap();
        let r2 = be.set("/k", b"v2", r1).unwrap();
        assert_eq!(be.get("/k", r1).unwrap().0, b"v1");
        assert_eq!(be.get("/k", r2).unwrap().0, b"v2");
        let r3 = be.del("/k", r2).unwrap();
        assert_eq!(be.get("/k", r2).unwrap().0, b"v2");
        assert!(be.get("/k", r3).is_err());
        assert!(!be.exists("/k", r3).unwrap().0);
        assert!(be.exists("/k", r2).unwrap().0);
    }

    #[test]
    fn getdir_lists_immediate_children() {
        let be = MemBackend::new();
        be.set("/apps/a/attrs", b"{}", 0).unwrap();
        be.set("/apps/a/registered", b"t", 1).unwrap();
        let rev = be.set("/apps/b/attrs", b"{}", 2).unwrap();
        assert_eq!(be.getdir("/apps", rev).unwrap(), vec!["a", "b"]);
        assert_eq!(
            be.getdir("/apps/a", rev).unwrap(),
            vec!["attrs", "registered"]
        );
        assert!(matches!(
            be.getdir("/nope", rev),
            Err(CoordError::NoEnt { .. })
        ));
    }

    #[test]
    fn stat_counts_directory_children() {
        let be = MemBackend::new();
        be.set("/dir/one", b"1", 0).unwrap();
        let rev = be.set("/dir/two", b"22", 1).unwrap();
        assert_eq!(be.stat("/dir", rev).unwrap().0, 2);
        assert_eq!(be.stat("/dir/two", rev).unwrap().0, 2);
    }

    #[test]
    fn del_tree_removes_whole_subtree() {
        let be = MemBackend::new();
        be.set("/apps/a/attrs", b"{}", 0).unwrap();
        be.set("/apps/a/env/k", b"v", 1).unwrap();
        let keep = be.set("/apps/b/attrs", b"{}", 2).unwrap();
        let rev = be.del_tree("/apps/a").unwrap();
        assert!(!be.exists("/apps/a", rev).unwrap().0);
        assert!(be.exists("/apps/b", rev).unwrap().0);
        let _ = keep;
    }

    #[test]
    fn wait_returns_matching_events_in_order() {
        let be = Arc::new(MemBackend::new());
        let waiter = {
            let be = Arc::clone(&be);
            thread::spawn(move || be.wait("/watched/**", 1))
        };
        thread::sleep(Duration::from_millis(20));
        be.set("/other/x", b"no", 0).unwrap();
        be.set("/watched/y", b"yes", 1).unwrap();
        let ev = waiter.join().unwrap().unwrap();
        assert_eq!(ev.path, "/watched/y");
        assert!(!ev.deleted);

        // Replaying from an old cursor returns the same event again.
        let replay = be.wait("/watched/**", 1).unwrap();
        assert_eq!(replay.rev, ev.rev);
    }

    #[test]
    fn close_unblocks_waiters() {
        let be = Arc::new(MemBackend::new());
        let waiter = {
            let be = Arc::clone(&be);
            thread::spawn(move || be.wait("/**", 1))
        };
        thread::sleep(Duration::from_millis(20));
        be.close();
        assert!(matches!(waiter.join().unwrap(), Err(CoordError::Closed)));
    }

    #[test]
    fn getuid_is_unique_and_monotone() {
        let be = MemBackend::new();
        let a = be.getuid().unwrap();
        let b = be.getuid().unwrap();
        assert!(b > a);
    }
}
