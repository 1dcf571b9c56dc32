#![forbid(unsafe_code)]

//! convoy — a registry for coordinating fleets of application processes.
//!
//! The library models the desired and observed state of applications,
//! revisions, process types and running instances on top of a revisioned,
//! tree-shaped coordination store. Every handle pins an explicit snapshot
//! of that tree: reads observe it, mutations return a handle rebased to
//! the resulting revision.
//!
//! ```
//! use convoy::Store;
//!
//! let store = Store::dial("mem:", "/convoy").unwrap().init().unwrap();
//! let app = store.new_app("rocket", "git://rocket.git", "HEAD");
//! let app = app.register().unwrap();
//!
//! let rev = store.new_revision(&app, "f84e19", "http://artifacts/f84e19.img");
//! rev.register().unwrap();
//! ```

pub mod app;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod hook;
pub mod instance;
mod paths;
pub mod proc;
pub mod revision;
pub mod runner;
pub mod store;
pub mod tag;
pub mod telemetry;

pub use error::{Error, ErrorKind};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the domain surface at the crate root for convenience.
pub use crate::app::{App, DEPLOY_LXC};
pub use crate::config::Config;
pub use crate::coordinator::{Backend, CoordError, MemBackend, RawEvent, Snapshot};
pub use crate::event::{Event, EventData, EventSource, EventType};
pub use crate::hook::Hook;
pub use crate::instance::{InsRestarts, InsStatus, Instance, Termination};
pub use crate::proc::{Proc, ProcAttrs, ResourceLimits, SrvInfo, TrafficControl};
pub use crate::revision::Revision;
pub use crate::runner::Runner;
pub use crate::store::{Store, DEFAULT_ROOT, DEFAULT_URI, SCHEMA_VERSION};
pub use crate::tag::Tag;
