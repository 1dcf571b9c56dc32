//! Applications: the root of the domain tree.
//!
//! An app owns env vars, hooks, revisions, tags and procs. Registration
//! writes the `registered` timestamp last so event consumers observe a
//! fully-formed app when the registration event fires.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::coordinator::{fanout, Dir, Snapshot};
use crate::error::{errorf, ErrorKind};
use crate::instance::Instance;
use crate::paths;
use crate::proc::Proc;
use crate::revision::{self, Revision};
use crate::store::{self, dir_names, Store};
use crate::Result;

/// Canonical name for the lxc deploy type, the default for new apps.
pub const DEPLOY_LXC: &str = "lxc";

/// An application: a repository of coherent changes.
#[derive(Debug, Clone)]
pub struct App {
    dir: Dir,
    pub name: String,
    pub repo_url: String,
    pub stack: String,
    pub env: BTreeMap<String, String>,
    pub deploy_type: String,
    pub registered: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AppAttrs {
    #[serde(rename = "repo-url")]
    repo_url: String,
    stack: String,
    #[serde(rename = "deploy-type")]
    deploy_type: String,
}

impl Store {
    /// A new app handle at this store's revision. Nothing is persisted
    /// until [`App::register`].
    pub fn new_app(&self, name: &str, repo_url: &str, stack: &str) -> App {
        App {
            dir: Dir::new(paths::app_path(name), self.snapshot().clone()),
            name: name.to_string(),
            repo_url: repo_url.to_string(),
            stack: stack.to_string(),
            env: BTreeMap::new(),
            deploy_type: DEPLOY_LXC.to_string(),
            registered: None,
        }
    }

    /// Fetch an app by name at the latest revision.
    pub fn get_app(&self, name: &str) -> Result<App> {
        let sp = self.snapshot().fast_forward()?;
        get_app(name, &sp)
    }

    /// All registered apps.
    pub fn get_apps(&self) -> Result<Vec<App>> {
        let sp = self.snapshot().fast_forward()?;
        if !sp.exists(paths::APPS_DIR)? {
            return Ok(Vec::new());
        }
        let names = sp.getdir(paths::APPS_DIR)?;
        fanout::fan_out(&names, |name| get_app(name, &sp))
    }

    /// Names of all registered apps.
    pub fn get_app_names(&self) -> Result<Vec<String>> {
        let sp = self.snapshot().fast_forward()?;
        dir_names(&sp, paths::APPS_DIR)
    }

    /// All revisions across every registered app.
    pub fn get_revisions(&self) -> Result<Vec<Revision>> {
        let mut revisions = Vec::new();
        for app in self.get_apps()? {
            revisions.extend(app.get_revisions()?);
        }
        Ok(revisions)
    }
}

impl App {
    pub(crate) fn dir(&self) -> &Dir {
        &self.dir
    }

    pub fn snapshot(&self) -> &Snapshot {
        self.dir.snapshot()
    }

    pub(crate) fn rebased(&self, snapshot: Snapshot) -> App {
        App {
            dir: self.dir.with(snapshot),
            ..self.clone()
        }
    }

    /// Add the app to the global registry state.
    pub fn register(&self) -> Result<App> {
        store::validate_input(&self.name)?;
        let sp = self.snapshot().fast_forward()?;

        if sp.exists(self.dir.name())? {
            return Err(errorf!(
                ErrorKind::Conflict,
                "app \"{}\" already exists",
                self.name
            ));
        }

        let deploy_type = if self.deploy_type.is_empty() {
            DEPLOY_LXC.to_string()
        } else {
            self.deploy_type.clone()
        };

        let attrs = AppAttrs {
            repo_url: self.repo_url.clone(),
            stack: self.stack.clone(),
            deploy_type: deploy_type.clone(),
        };
        let mut sp = sp.set_json(&self.dir.prefix(paths::ATTRS_FILE), &attrs)?;

        for (key, value) in &self.env {
            sp = sp.set_string(&paths::env_var_path(&self.name, &env_key(key)), value)?;
        }

        let registered = store::now();
        let sp = sp.set_string(
            &self.dir.prefix(paths::REGISTERED_FILE),
            &store::format_time(registered),
        )?;

        let mut app = self.rebased(sp);
        app.deploy_type = deploy_type;
        app.registered = Some(registered);
        Ok(app)
    }

    /// Remove the app and everything beneath it.
    pub fn unregister(&self) -> Result<()> {
        let sp = self.snapshot().fast_forward()?;
        if !sp.exists(self.dir.name())? {
            return Err(errorf!(ErrorKind::NotFound, "app \"{}\" not found", self.name));
        }
        self.dir.with(sp).del_tree()?;
        Ok(())
    }

    /// Persist the current attrs (repo url, stack, deploy type).
    pub fn store_attrs(&self) -> Result<App> {
        let path = self.dir.prefix(paths::ATTRS_FILE);
        let sp = self.snapshot();
        let (_, file_rev) = sp.get_raw(&path)?;
        let attrs = AppAttrs {
            repo_url: self.repo_url.clone(),
            stack: self.stack.clone(),
            deploy_type: self.deploy_type.clone(),
        };
        let body = crate::coordinator::codec::encode_json(&path, &attrs)?;
        let sp = sp.set_raw_at(&path, &body, file_rev)?;
        Ok(self.rebased(sp))
    }

    /// Update the runtime stack and persist attrs.
    pub fn set_stack(&self, stack: &str) -> Result<App> {
        let mut app = self.clone();
        app.stack = stack.to_string();
        app.store_attrs()
    }

    /// All env vars for this app, keys reported with underscores.
    pub fn environment_vars(&self) -> Result<BTreeMap<String, String>> {
        let sp = self.snapshot().fast_forward()?;
        let names = dir_names(&sp, &self.dir.prefix(paths::ENV_DIR))?;
        let values = fanout::fan_out(&names, |name| {
            sp.get_string(&paths::env_var_path(&self.name, name))
                .map_err(crate::Error::from)
        })?;
        Ok(names
            .into_iter()
            .map(|n| n.replace('-', "_"))
            .zip(values)
            .collect())
    }

    /// The value stored for `key`. Underscores and hyphens in the key are
    /// interchangeable.
    pub fn get_environment_var(&self, key: &str) -> Result<String> {
        let wire_key = env_key(key);
        self.snapshot()
            .get_string(&paths::env_var_path(&self.name, &wire_key))
            .map_err(|err| {
                if err.is_noent() {
                    errorf!(
                        ErrorKind::NotFound,
                        "\"{wire_key}\" not found in {}'s environment",
                        self.name
                    )
                } else {
                    err.into()
                }
            })
    }

    /// Store `value` under `key`.
    pub fn set_environment_var(&self, key: &str, value: &str) -> Result<App> {
        validate_env_key(key)?;
        let sp = self
            .snapshot()
            .set_string(&paths::env_var_path(&self.name, &env_key(key)), value)?;
        let mut app = self.rebased(sp);
        app.env.entry(key.to_string()).or_insert_with(|| value.to_string());
        Ok(app)
    }

    /// Remove the env var for `key`.
    pub fn del_environment_var(&self, key: &str) -> Result<App> {
        let sp = self
            .snapshot()
            .del(&paths::env_var_path(&self.name, &env_key(key)))?;
        let sp = sp.fast_forward()?;
        let mut app = self.rebased(sp);
        app.env.remove(key);
        Ok(app)
    }

    /// All registered revisions for the app.
    pub fn get_revisions(&self) -> Result<Vec<Revision>> {
        let sp = self.snapshot().fast_forward()?;
        let refs = sp.getdir(&self.dir.prefix(paths::REVS_DIR))?;
        fanout::fan_out(&refs, |r| revision::get_revision(self, r, &sp))
    }

    /// All registered procs for the app.
    pub fn get_procs(&self) -> Result<Vec<Proc>> {
        let sp = self.snapshot().fast_forward()?;
        let names = dir_names(&sp, &self.dir.prefix(paths::PROCS_DIR))?;
        fanout::fan_out(&names, |name| crate::proc::get_proc(self, name, &sp))
    }

    /// All live instances for the app: the union across its procs.
    pub fn get_instances(&self) -> Result<Vec<Instance>> {
        let mut result = Vec::new();
        for proc in self.get_procs()? {
            result.extend(proc.get_instances()?);
        }
        Ok(result)
    }
}

impl fmt::Display for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "App<{}>{{stack: {}, type: {}}}",
            self.name, self.stack, self.deploy_type
        )
    }
}

/// Env keys are stored with hyphens and surfaced with underscores.
fn env_key(key: &str) -> String {
    key.replace('_', "-")
}

fn validate_env_key(key: &str) -> Result<()> {
    let ok = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !ok {
        return Err(errorf!(ErrorKind::InvalidKey, "invalid env key `{key}`"));
    }
    Ok(())
}

/// Materialize an app from the tree at `sp`.
pub(crate) fn get_app(name: &str, sp: &Snapshot) -> Result<App> {
    let dir = Dir::new(paths::app_path(name), sp.clone());

    let attrs: AppAttrs = sp.get_json(&dir.prefix(paths::ATTRS_FILE)).map_err(|err| {
        if err.is_noent() {
            errorf!(ErrorKind::NotFound, "app \"{name}\" not found")
        } else {
            err.into()
        }
    })?;

    let registered = sp
        .get_string(&dir.prefix(paths::REGISTERED_FILE))
        .map_err(|err| {
            if err.is_noent() {
                errorf!(ErrorKind::NotFound, "registered not found for {name}")
            } else {
                err.into()
            }
        })?;
    let registered = store::parse_time(&registered)?;

    Ok(App {
        dir,
        name: name.to_string(),
        repo_url: attrs.repo_url,
        stack: attrs.stack,
        env: BTreeMap::new(),
        deploy_type: attrs.deploy_type,
        registered: Some(registered),
    })
}
