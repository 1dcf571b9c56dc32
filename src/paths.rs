//! Tree layout: every persisted path in one place.

use crate::instance::InsStatus;

pub(crate) const NEXT_PORT_PATH: &str = "/next-port";
pub(crate) const APPS_DIR: &str = "/apps";
pub(crate) const INSTANCES_DIR: &str = "/instances";
pub(crate) const RUNNERS_DIR: &str = "/runners";
pub(crate) const LOGGERS_DIR: &str = "/loggers";
pub(crate) const PROXIES_DIR: &str = "/proxies";
pub(crate) const PMS_DIR: &str = "/pms";

pub(crate) const REGISTERED_FILE: &str = "registered";
pub(crate) const ATTRS_FILE: &str = "attrs";
pub(crate) const ARCHIVE_URL_FILE: &str = "archive-url";
pub(crate) const PORT_FILE: &str = "port";
pub(crate) const PORT_CONTROL_FILE: &str = "port-control";
pub(crate) const OBJECT_FILE: &str = "object";
pub(crate) const START_FILE: &str = "start";
pub(crate) const STATUS_FILE: &str = "status";
pub(crate) const STOP_FILE: &str = "stop";
pub(crate) const RESTARTS_FILE: &str = "restarts";
pub(crate) const LOCK_FILE: &str = "lock";
pub(crate) const CLAIMS_DIR: &str = "claims";
pub(crate) const ENV_DIR: &str = "env";
pub(crate) const REVS_DIR: &str = "revs";
pub(crate) const PROCS_DIR: &str = "procs";
pub(crate) const TAGS_DIR: &str = "tags";
pub(crate) const HOOKS_DIR: &str = "hooks";
pub(crate) const DONE_DIR: &str = "done";
pub(crate) const FAILED_DIR: &str = "failed";
pub(crate) const LOST_DIR: &str = "lost";
pub(crate) const INSTANCES_SUBDIR: &str = "instances";

pub(crate) fn app_path(app: &str) -> String {
    format!("{APPS_DIR}/{app}")
}

pub(crate) fn proc_path(app: &str, proc: &str) -> String {
    format!("{APPS_DIR}/{app}/{PROCS_DIR}/{proc}")
}

pub(crate) fn revision_path(app: &str, rev: &str) -> String {
    format!("{APPS_DIR}/{app}/{REVS_DIR}/{rev}")
}

pub(crate) fn instance_path(id: i64) -> String {
    format!("{INSTANCES_DIR}/{id}")
}

pub(crate) fn instance_file(id: i64, file: &str) -> String {
    format!("{INSTANCES_DIR}/{id}/{file}")
}

/// Per-revision lookup directory for live instances of a proc.
pub(crate) fn proc_instances_path(app: &str, rev: &str, proc: &str) -> String {
    format!("{}/{INSTANCES_SUBDIR}/{rev}", proc_path(app, proc))
}

/// Lookup-index entry for one instance, selected by status.
pub(crate) fn proc_status_path(
    app: &str,
    rev: &str,
    proc: &str,
    id: i64,
    status: InsStatus,
) -> String {
    let base = proc_path(app, proc);
    match status {
        InsStatus::Done => format!("{base}/{DONE_DIR}/{id}"),
        InsStatus::Failed => format!("{base}/{FAILED_DIR}/{id}"),
        InsStatus::Lost => format!("{base}/{LOST_DIR}/{id}"),
        _ => format!("{base}/{INSTANCES_SUBDIR}/{rev}/{id}"),
    }
}

pub(crate) fn runner_path(host: &str, port: &str) -> String {
    format!("{RUNNERS_DIR}/{host}/{port}")
}

pub(crate) fn env_var_path(app: &str, key: &str) -> String {
    format!("{}/{ENV_DIR}/{key}", app_path(app))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_entry_follows_status() {
        assert_eq!(
            proc_status_path("cat", "v1", "web", 7, InsStatus::Running),
            "/apps/cat/procs/web/instances/v1/7"
        );
        assert_eq!(
            proc_status_path("cat", "v1", "web", 7, InsStatus::Failed),
            "/apps/cat/procs/web/failed/7"
        );
        assert_eq!(
            proc_status_path("cat", "v1", "web", 7, InsStatus::Done),
            "/apps/cat/procs/web/done/7"
        );
        assert_eq!(
            proc_status_path("cat", "v1", "web", 7, InsStatus::Lost),
            "/apps/cat/procs/web/lost/7"
        );
    }

    #[test]
    fn env_keys_are_embedded_verbatim() {
        assert_eq!(env_var_path("cat", "db-url"), "/apps/cat/env/db-url");
    }
}
