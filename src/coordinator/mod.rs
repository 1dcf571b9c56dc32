//! Coordination-store client layer.
//!
//! The registry consumes a hierarchical, revisioned KV with per-file
//! compare-and-set and glob watches. [`Backend`] is that consumed interface;
//! [`MemBackend`] is the in-process transport shipped with the crate.
//!
//! [`Snapshot`] pins a backend at an explicit revision: reads observe the
//! tree exactly as of that revision, and every mutator returns a new
//! `Snapshot` at the post-mutation revision. Nothing ever advances a
//! snapshot implicitly; callers opt into the present with
//! [`Snapshot::fast_forward`].

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub mod codec;
pub mod fanout;
mod glob;
mod mem;

pub use mem::MemBackend;

/// Errors surfaced by the coordinator client layer.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum CoordError {
    #[error("no entity at `{path}`")]
    NoEnt { path: String },

    #[error("revision mismatch writing `{path}`")]
    RevMismatch { path: String },

    #[error("malformed path `{path}`")]
    BadPath { path: String },

    #[error("coordinator connection closed")]
    Closed,

    #[error("codec error at `{path}`: {reason}")]
    Codec { path: String, reason: String },

    #[error("schema mismatch: store has {stored}, library expects {expected}")]
    SchemaMismatch { stored: i64, expected: i64 },

    #[error("unsupported coordinator uri `{uri}`")]
    UnsupportedUri { uri: String },
}

impl CoordError {
    pub fn is_noent(&self) -> bool {
        matches!(self, CoordError::NoEnt { .. })
    }

    pub fn is_rev_mismatch(&self) -> bool {
        matches!(self, CoordError::RevMismatch { .. })
    }
}

/// A single change observed through a watch.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub path: String,
    pub body: Vec<u8>,
    pub rev: i64,
    pub deleted: bool,
}

impl RawEvent {
    pub fn is_set(&self) -> bool {
        !self.deleted
    }

    pub fn is_del(&self) -> bool {
        self.deleted
    }
}

/// The consumed coordination-store interface.
///
/// All paths are absolute and `/`-separated. `rev` parameters select the
/// tree state the operation observes; `cas` parameters are per-file
/// compare-and-set guards: the write fails with [`CoordError::RevMismatch`]
/// if the file was touched after that revision.
pub trait Backend: Send + Sync {
    /// Latest committed revision.
    fn head(&self) -> Result<i64, CoordError>;
    /// Body and last-modified revision of `path` as of `rev`.
    fn get(&self, path: &str, rev: i64) -> Result<(Vec<u8>, i64), CoordError>;
    fn set(&self, path: &str, body: &[u8], cas: i64) -> Result<i64, CoordError>;
    fn del(&self, path: &str, cas: i64) -> Result<i64, CoordError>;
    /// Unconditionally delete every file under `path` (and `path` itself).
    fn del_tree(&self, path: &str) -> Result<i64, CoordError>;
    fn exists(&self, path: &str, rev: i64) -> Result<(bool, i64), CoordError>;
    /// File byte length, or child count for a directory.
    fn stat(&self, path: &str, rev: i64) -> Result<(usize, i64), CoordError>;
    fn getdir(&self, path: &str, rev: i64) -> Result<Vec<String>, CoordError>;
    /// Allocate a store-unique monotonic id.
    fn getuid(&self) -> Result<i64, CoordError>;
    /// Block until a change at or after revision `from` matches `pattern`.
    fn wait(&self, pattern: &str, from: i64) -> Result<RawEvent, CoordError>;
    /// Wake all blocked waiters with [`CoordError::Closed`].
    fn close(&self);
}

/// Root-scoping adapter: prefixes every path with the pinned root so
/// independent registries can share one backend.
struct Scoped {
    inner: Arc<dyn Backend>,
    root: String,
}

impl Scoped {
    fn new(inner: Arc<dyn Backend>, root: &str) -> Arc<dyn Backend> {
        let root = normalize(root);
        if root == "/" {
            return inner;
        }
        Arc::new(Scoped { inner, root })
    }

    fn scope(&self, path: &str) -> String {
        if path == "/" {
            self.root.clone()
        } else {
            format!("{}{}", self.root, path)
        }
    }

    fn unscope(&self, path: &str) -> String {
        path.strip_prefix(&self.root).unwrap_or(path).to_string()
    }
}

impl Backend for Scoped {
    fn head(&self) -> Result<i64, CoordError> {
        self.inner.head()
    }

    fn get(&self, path: &str, rev: i64) -> Result<(Vec<u8>, i64), CoordError> {
        self.inner.get(&self.scope(path), rev)
    }

    fn set(&self, path: &str, body: &[u8], cas: i64) -> Result<i64, CoordError> {
        self.inner.set(&self.scope(path), body, cas)
    }

    fn del(&self, path: &str, cas: i64) -> Result<i64, CoordError> {
        self.inner.del(&self.scope(path), cas)
    }

    fn del_tree(&self, path: &str) -> Result<i64, CoordError> {
        self.inner.del_tree(&self.scope(path))
    }

    fn exists(&self, path: &str, rev: i64) -> Result<(bool, i64), CoordError> {
        self.inner.exists(&self.scope(path), rev)
    }

    fn stat(&self, path: &str, rev: i64) -> Result<(usize, i64), CoordError> {
        self.inner.stat(&self.scope(path), rev)
    }

    fn getdir(&self, path: &str, rev: i64) -> Result<Vec<String>, CoordError> {
        self.inner.getdir(&self.scope(path), rev)
    }

    fn getuid(&self) -> Result<i64, CoordError> {
        self.inner.getuid()
    }

    fn wait(&self, pattern: &str, from: i64) -> Result<RawEvent, CoordError> {
        let mut ev = self.inner.wait(&self.scope(pattern), from)?;
        ev.path = self.unscope(&ev.path);
        Ok(ev)
    }

    fn close(&self) {
        self.inner.close();
    }
}

/// Collapse duplicate slashes and guarantee a leading `/`.
fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    out.push('/');
    for seg in path.split('/').filter(|s| !s.is_empty()) {
        if !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(seg);
    }
    out
}

/// A pinned view of the tree at one revision.
#[derive(Clone)]
pub struct Snapshot {
    rev: i64,
    backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot").field("rev", &self.rev).finish()
    }
}

impl Snapshot {
    /// Pin `backend` under `root` at its current head revision.
    pub fn with_backend(backend: Arc<dyn Backend>, root: &str) -> Result<Self, CoordError> {
        let backend = Scoped::new(backend, root);
        let rev = backend.head()?;
        Ok(Self { rev, backend })
    }

    /// Connect by URI. The `mem:` scheme creates a fresh in-memory tree.
    pub fn dial(uri: &str, root: &str) -> Result<Self, CoordError> {
        if uri == "mem:" || uri.starts_with("mem://") {
            return Self::with_backend(Arc::new(MemBackend::new()), root);
        }
        Err(CoordError::UnsupportedUri {
            uri: uri.to_string(),
        })
    }

    pub fn rev(&self) -> i64 {
        self.rev
    }

    /// The same backend pinned at a different revision.
    pub fn at(&self, rev: i64) -> Snapshot {
        Snapshot {
            rev,
            backend: Arc::clone(&self.backend),
        }
    }

    pub fn fast_forward(&self) -> Result<Snapshot, CoordError> {
        Ok(self.at(self.backend.head()?))
    }

    pub fn exists(&self, path: &str) -> Result<bool, CoordError> {
        Ok(self.backend.exists(path, self.rev)?.0)
    }

    pub fn stat(&self, path: &str) -> Result<(usize, i64), CoordError> {
        self.backend.stat(path, self.rev)
    }

    pub fn getdir(&self, path: &str) -> Result<Vec<String>, CoordError> {
        self.backend.getdir(path, self.rev)
    }

    pub fn getuid(&self) -> Result<i64, CoordError> {
        self.backend.getuid()
    }

    /// Body and last-modified revision of `path` as of this snapshot.
    pub fn get_raw(&self, path: &str) -> Result<(Vec<u8>, i64), CoordError> {
        self.backend.get(path, self.rev)
    }

    /// Write guarded against any modification after this snapshot.
    pub fn set_raw(&self, path: &str, body: &[u8]) -> Result<Snapshot, CoordError> {
        self.set_raw_at(path, body, self.rev)
    }

    /// Write guarded against any modification after `cas`.
    pub fn set_raw_at(&self, path: &str, body: &[u8], cas: i64) -> Result<Snapshot, CoordError> {
        let rev = self.backend.set(path, body, cas)?;
        Ok(self.at(rev))
    }

    pub fn del(&self, path: &str) -> Result<Snapshot, CoordError> {
        let rev = self.backend.del(path, self.rev)?;
        Ok(self.at(rev))
    }

    pub fn del_tree(&self, path: &str) -> Result<Snapshot, CoordError> {
        let rev = self.backend.del_tree(path)?;
        Ok(self.at(rev))
    }

    /// Block until the next change after this snapshot matching `pattern`.
    pub fn wait(&self, pattern: &str) -> Result<RawEvent, CoordError> {
        self.backend.wait(pattern, self.rev + 1)
    }

    pub fn close(&self) {
        self.backend.close();
    }

    pub fn get_string(&self, path: &str) -> Result<String, CoordError> {
        let (body, _) = self.get_raw(path)?;
        codec::decode_string(path, &body)
    }

    pub fn set_string(&self, path: &str, value: &str) -> Result<Snapshot, CoordError> {
        self.set_raw(path, value.as_bytes())
    }

    pub fn get_int(&self, path: &str) -> Result<i64, CoordError> {
        let (body, _) = self.get_raw(path)?;
        codec::decode_int(path, &body)
    }

    pub fn set_int(&self, path: &str, value: i64) -> Result<Snapshot, CoordError> {
        self.set_raw(path, &codec::encode_int(value))
    }

    pub fn get_list(&self, path: &str) -> Result<Vec<String>, CoordError> {
        let (body, _) = self.get_raw(path)?;
        codec::decode_list(path, &body)
    }

    pub fn set_list(&self, path: &str, fields: &[String]) -> Result<Snapshot, CoordError> {
        self.set_raw(path, &codec::encode_list(fields))
    }

    pub fn get_int_list(&self, path: &str) -> Result<Vec<i64>, CoordError> {
        let (body, _) = self.get_raw(path)?;
        codec::decode_int_list(path, &body)
    }

    pub fn set_int_list(&self, path: &str, fields: &[i64]) -> Result<Snapshot, CoordError> {
        self.set_raw(path, &codec::encode_int_list(fields))
    }

    pub fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, CoordError> {
        let (body, _) = self.get_raw(path)?;
        codec::decode_json(path, &body)
    }

    pub fn set_json<T: Serialize>(&self, path: &str, value: &T) -> Result<Snapshot, CoordError> {
        self.set_raw(path, &codec::encode_json(path, value)?)
    }
}

/// A directory handle: a path plus the snapshot it was resolved against.
///
/// Entities own one of these; rebasing after a mutation means swapping in
/// the snapshot the mutation returned.
#[derive(Debug, Clone)]
pub struct Dir {
    name: String,
    snapshot: Snapshot,
}

impl Dir {
    pub fn new(name: impl AsRef<str>, snapshot: Snapshot) -> Self {
        Self {
            name: normalize(name.as_ref()),
            snapshot,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn rev(&self) -> i64 {
        self.snapshot.rev()
    }

    /// Child path under this directory; `tail` may contain multiple segments.
    pub fn prefix(&self, tail: &str) -> String {
        normalize(&format!("{}/{}", self.name, tail))
    }

    /// The same directory rebased to a different snapshot.
    pub fn with(&self, snapshot: Snapshot) -> Dir {
        Dir {
            name: self.name.clone(),
            snapshot,
        }
    }

    pub fn at(&self, rev: i64) -> Dir {
        self.with(self.snapshot.at(rev))
    }

    pub fn set(&self, file: &str, value: &str) -> Result<Dir, CoordError> {
        let sp = self.snapshot.set_string(&self.prefix(file), value)?;
        Ok(self.with(sp))
    }

    pub fn get_string(&self, file: &str) -> Result<String, CoordError> {
        self.snapshot.get_string(&self.prefix(file))
    }

    pub fn del(&self, file: &str) -> Result<Dir, CoordError> {
        let sp = self.snapshot.del(&self.prefix(file))?;
        Ok(self.with(sp))
    }

    /// Remove this directory and everything below it.
    pub fn del_tree(&self) -> Result<(), CoordError> {
        self.snapshot.del_tree(&self.name)?;
        Ok(())
    }
}

/// Path of the schema-version marker.
pub const SCHEMA_PATH: &str = "/schema";

/// Read the stored schema version and compare it to `expected`.
pub fn verify_schema(expected: i64, sp: &Snapshot) -> Result<i64, CoordError> {
    let stored = sp.get_int(SCHEMA_PATH)?;
    if stored != expected {
        return Err(CoordError::SchemaMismatch { stored, expected });
    }
    Ok(stored)
}

/// Write the schema version marker.
pub fn set_schema_version(version: i64, sp: &Snapshot) -> Result<Snapshot, CoordError> {
    let sp = sp.fast_forward()?;
    sp.set_int(SCHEMA_PATH, version)
}
