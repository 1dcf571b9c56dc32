//! Tags: mutable, human-readable aliases for revisions.
//!
//! A tag is analogous to a git branch referencing a specific commit; several
//! tags may reference the same revision, and re-registering a tag retargets
//! it atomically. A tag may never share its name with a revision ref of the
//! same app, otherwise ref resolution would shadow one of the two.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::app::App;
use crate::coordinator::{fanout, Snapshot};
use crate::error::{errorf, ErrorKind};
use crate::paths;
use crate::revision::{self, Revision};
use crate::store;
use crate::Result;

/// A named alias for a revision ref.
#[derive(Debug, Clone)]
pub struct Tag {
    path: String,
    snapshot: Snapshot,
    pub app: App,
    pub name: String,
    pub reference: String,
    pub registered: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireTag {
    name: String,
    #[serde(rename = "ref")]
    reference: String,
    #[serde(with = "time::serde::rfc3339")]
    registered: OffsetDateTime,
}

impl App {
    /// A new tag handle referencing `reference`. Persisted by
    /// [`Tag::register`].
    pub fn new_tag(&self, name: &str, reference: &str) -> Tag {
        Tag {
            path: self.dir().prefix(&format!("{}/{name}", paths::TAGS_DIR)),
            snapshot: self.snapshot().clone(),
            app: self.clone(),
            name: name.to_string(),
            reference: reference.to_string(),
            registered: None,
        }
    }

    /// The tag with the given name.
    pub fn get_tag(&self, name: &str) -> Result<Tag> {
        let sp = self.snapshot().fast_forward()?;
        get_tag(self, name, &sp)
    }

    /// All tags of the app.
    pub fn get_tags(&self) -> Result<Vec<Tag>> {
        let sp = self.snapshot().fast_forward()?;
        let names = sp.getdir(&self.dir().prefix(paths::TAGS_DIR))?;
        fanout::fan_out(&names, |name| get_tag(self, name, &sp))
    }

    /// Resolve `reference` to a revision: by ref first, then by tag.
    ///
    /// When neither resolves, the original revision lookup error is
    /// returned.
    pub fn lookup_revision(&self, reference: &str) -> Result<Revision> {
        let sp = self.snapshot().fast_forward()?;

        let rev_err = match revision::get_revision(self, reference, &sp) {
            Ok(rev) => return Ok(rev),
            Err(err) if err.is_not_found() => err,
            Err(err) => return Err(err),
        };
        let tag = match get_tag(self, reference, &sp) {
            Ok(tag) => tag,
            Err(err) if err.is_not_found() => return Err(rev_err),
            Err(err) => return Err(err),
        };
        revision::get_revision(self, &tag.reference, &sp)
    }
}

impl Tag {
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Store the tag, overwriting any previous tag of the same name.
    ///
    /// Fails with `TagShadowing` when a revision of the app carries the tag
    /// name as its ref, and with `NotFound` when the target ref does not
    /// exist.
    pub fn register(&self) -> Result<Tag> {
        store::validate_input(&self.name)?;
        let revisions = self.app.get_revisions()?;

        let mut found = false;
        for rev in &revisions {
            if rev.reference == self.name {
                return Err(errorf!(
                    ErrorKind::TagShadowing,
                    "revision already exists with tag name \"{}\"",
                    self.name
                ));
            }
            if rev.reference == self.reference {
                found = true;
            }
        }
        if !found {
            return Err(errorf!(
                ErrorKind::NotFound,
                "revision \"{}\" not found for app \"{}\"",
                self.reference,
                self.app.name
            ));
        }

        let registered = store::now();
        let wire = WireTag {
            name: self.name.clone(),
            reference: self.reference.clone(),
            registered,
        };
        let sp = self.snapshot.fast_forward()?;
        let sp = sp.set_json(&self.path, &wire)?;

        Ok(Tag {
            snapshot: sp,
            registered: Some(registered),
            ..self.clone()
        })
    }

    /// Remove the stored tag.
    pub fn unregister(&self) -> Result<()> {
        let sp = self.snapshot.fast_forward()?;
        if !sp.exists(&self.path)? {
            return Err(errorf!(ErrorKind::NotFound, "tag \"{}\" not found", self.name));
        }
        sp.del(&self.path)?;
        Ok(())
    }
}

/// Materialize a tag from the tree at `sp`.
pub(crate) fn get_tag(app: &App, name: &str, sp: &Snapshot) -> Result<Tag> {
    let path = app.dir().prefix(&format!("{}/{name}", paths::TAGS_DIR));
    let wire: WireTag = sp.get_json(&path).map_err(|err| {
        if err.is_noent() {
            errorf!(ErrorKind::NotFound, "tag \"{name}\" not found")
        } else {
            err.into()
        }
    })?;

    Ok(Tag {
        path,
        snapshot: sp.clone(),
        app: app.clone(),
        name: wire.name,
        reference: wire.reference,
        registered: Some(wire.registered),
    })
}
