//! Hooks: named executable scripts attached to an app.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::app::App;
use crate::coordinator::{fanout, Snapshot};
use crate::error::{errorf, ErrorKind};
use crate::paths;
use crate::store;
use crate::Result;

/// A named executable script stored with an app.
#[derive(Debug, Clone)]
pub struct Hook {
    path: String,
    snapshot: Snapshot,
    pub app: App,
    pub name: String,
    pub script: String,
    pub registered: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireHook {
    name: String,
    script: String,
    #[serde(with = "time::serde::rfc3339")]
    registered: OffsetDateTime,
}

static HOOK_NAME: OnceLock<Regex> = OnceLock::new();

fn validate_hook_name(name: &str) -> Result<()> {
    let re = HOOK_NAME.get_or_init(|| Regex::new("^[[:alnum:]]+$").expect("valid regex"));
    if !re.is_match(name) {
        return Err(errorf!(
            ErrorKind::InvalidArgument,
            "invalid hook name `{name}`: only alphanumeric characters allowed"
        ));
    }
    Ok(())
}

impl App {
    /// A new hook handle. Persisted by [`Hook::register`].
    pub fn new_hook(&self, name: &str, script: &str) -> Hook {
        Hook {
            path: self.dir().prefix(&format!("{}/{name}", paths::HOOKS_DIR)),
            snapshot: self.snapshot().clone(),
            app: self.clone(),
            name: name.to_string(),
            script: script.to_string(),
            registered: None,
        }
    }

    /// The hook with the given name.
    pub fn get_hook(&self, name: &str) -> Result<Hook> {
        let sp = self.snapshot().fast_forward()?;
        get_hook(self, name, &sp)
    }

    /// All hooks of the app.
    pub fn get_hooks(&self) -> Result<Vec<Hook>> {
        let sp = self.snapshot().fast_forward()?;
        let names = sp.getdir(&self.dir().prefix(paths::HOOKS_DIR))?;
        fanout::fan_out(&names, |name| get_hook(self, name, &sp))
    }
}

impl Hook {
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Store the hook with the app, overwriting any previous version.
    pub fn register(&self) -> Result<Hook> {
        validate_hook_name(&self.name)?;
        let registered = store::now();
        let wire = WireHook {
            name: self.name.clone(),
            script: self.script.clone(),
            registered,
        };
        let sp = self.snapshot.fast_forward()?;
        let sp = sp.set_json(&self.path, &wire)?;

        Ok(Hook {
            snapshot: sp,
            registered: Some(registered),
            ..self.clone()
        })
    }

    /// Remove the stored hook.
    pub fn unregister(&self) -> Result<()> {
        let sp = self.snapshot.fast_forward()?;
        if !sp.exists(&self.path)? {
            return Err(errorf!(
                ErrorKind::NotFound,
                "hook \"{}\" not found",
                self.name
            ));
        }
        sp.del(&self.path)?;
        Ok(())
    }
}

/// Materialize a hook from the tree at `sp`.
pub(crate) fn get_hook(app: &App, name: &str, sp: &Snapshot) -> Result<Hook> {
    let path = app.dir().prefix(&format!("{}/{name}", paths::HOOKS_DIR));
    let wire: WireHook = sp.get_json(&path).map_err(|err| {
        if err.is_noent() {
            errorf!(ErrorKind::NotFound, "hook not found for \"{name}\"")
        } else {
            err.into()
        }
    })?;

    Ok(Hook {
        path,
        snapshot: sp.clone(),
        app: app.clone(),
        name: wire.name,
        script: wire.script,
        registered: Some(wire.registered),
    })
}
