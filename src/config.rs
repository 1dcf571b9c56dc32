//! Connection configuration with environment overrides.

use crate::store::{DEFAULT_ROOT, DEFAULT_URI};

/// Where the registry lives: a coordinator URI plus the tree root all paths
/// are pinned under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub uri: String,
    pub root: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_string(),
            root: DEFAULT_ROOT.to_string(),
        }
    }
}

impl Config {
    /// Defaults overridden by `CONVOY_URI` and `CONVOY_ROOT` when set and
    /// non-empty.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(uri) = env_nonempty("CONVOY_URI") {
            config.uri = uri;
        }
        if let Some(root) = env_nonempty("CONVOY_ROOT") {
            config.root = root;
        }
        config
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_mem_backend() {
        let config = Config::default();
        assert_eq!(config.uri, "mem:");
        assert_eq!(config.root, "/convoy");
    }
}
