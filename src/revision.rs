//! Revisions: immutable build references under an app.

use std::fmt;

use time::OffsetDateTime;

use crate::app::App;
use crate::coordinator::{Dir, Snapshot};
use crate::error::{errorf, ErrorKind};
use crate::paths;
use crate::store::{self, Store};
use crate::tag::Tag;
use crate::Result;

/// An application revision, identifiable by its `ref`.
#[derive(Debug, Clone)]
pub struct Revision {
    dir: Dir,
    pub app: App,
    pub reference: String,
    pub archive_url: String,
    pub registered: Option<OffsetDateTime>,
}

impl Store {
    /// A new revision handle for `app`. Persisted by [`Revision::register`].
    pub fn new_revision(&self, app: &App, reference: &str, archive_url: &str) -> Revision {
        Revision {
            dir: Dir::new(
                paths::revision_path(&app.name, reference),
                self.snapshot().clone(),
            ),
            app: app.clone(),
            reference: reference.to_string(),
            archive_url: archive_url.to_string(),
            registered: None,
        }
    }
}

impl Revision {
    pub fn snapshot(&self) -> &Snapshot {
        self.dir.snapshot()
    }

    /// Register the revision. Writes `archive-url` first and `registered`
    /// last; the record is immutable afterwards.
    pub fn register(&self) -> Result<Revision> {
        store::validate_input(&self.reference)?;
        let sp = self.snapshot().fast_forward()?;

        if sp.exists(self.dir.name())? {
            return Err(errorf!(
                ErrorKind::Conflict,
                "revision \"{}\" already exists for app \"{}\"",
                self.reference,
                self.app.name
            ));
        }

        let sp = sp.set_string(&self.dir.prefix(paths::ARCHIVE_URL_FILE), &self.archive_url)?;
        let registered = store::now();
        let sp = sp.set_string(
            &self.dir.prefix(paths::REGISTERED_FILE),
            &store::format_time(registered),
        )?;

        Ok(Revision {
            dir: self.dir.with(sp),
            registered: Some(registered),
            ..self.clone()
        })
    }

    /// Remove the revision from the registry.
    pub fn unregister(&self) -> Result<()> {
        let sp = self.snapshot().fast_forward()?;
        self.dir.with(sp).del_tree()?;
        Ok(())
    }

    /// All tags currently pointing at this revision.
    pub fn get_tags(&self) -> Result<Vec<Tag>> {
        let tags = self.app.get_tags()?;
        Ok(tags
            .into_iter()
            .filter(|t| t.reference == self.reference)
            .collect())
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Revision<{}:{}>", self.app.name, self.reference)
    }
}

impl App {
    /// The revision of this app with the given ref.
    pub fn get_revision(&self, reference: &str) -> Result<Revision> {
        let sp = self.snapshot().fast_forward()?;
        get_revision(self, reference, &sp)
    }
}

/// Materialize a revision from the tree at `sp`.
pub(crate) fn get_revision(app: &App, reference: &str, sp: &Snapshot) -> Result<Revision> {
    let dir = Dir::new(paths::revision_path(&app.name, reference), sp.clone());

    let archive_url = match sp.get_string(&dir.prefix(paths::ARCHIVE_URL_FILE)) {
        Ok(url) => url,
        Err(err) if err.is_noent() => {
            if !sp.exists(dir.name())? {
                return Err(errorf!(
                    ErrorKind::NotFound,
                    "revision \"{reference}\" not found for app {}",
                    app.name
                ));
            }
            return Err(errorf!(
                ErrorKind::NotFound,
                "archive-url not found for {}:{reference}",
                app.name
            ));
        }
        Err(err) => return Err(err.into()),
    };

    let registered = sp
        .get_string(&dir.prefix(paths::REGISTERED_FILE))
        .map_err(|err| {
            if err.is_noent() {
                errorf!(
                    ErrorKind::NotFound,
                    "registered not found for {}:{reference}",
                    app.name
                )
            } else {
                err.into()
            }
        })?;
    let registered = store::parse_time(&registered)?;

    Ok(Revision {
        dir,
        app: app.clone(),
        reference: reference.to_string(),
        archive_url,
        registered: Some(registered),
    })
}
