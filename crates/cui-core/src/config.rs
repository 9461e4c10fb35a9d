use crate::error::Result;
use crate::{io, paths};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Server configuration, read from `~/.cui/config.yaml`.
///
/// Every field has a default so a missing or partial file is fine; the file
/// is written with defaults on first load so users have something to edit.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Interface the HTTP server binds.
    pub host: String,
    pub port: u16,
    /// Explicit path to the `claude` binary; when unset the spawn path is
    /// resolved from `$PATH`.
    pub claude_binary: Option<PathBuf>,
    /// Override for the CLI's log root (default `~/.claude/projects`).
    pub projects_dir: Option<PathBuf>,
    /// Override for this server's data dir (default `~/.cui`).
    pub data_dir: Option<PathBuf>,
    /// How long `start` waits for the child's init message.
    pub init_timeout_secs: u64,
    /// How long a pending permission request may wait for a decision.
    pub permission_timeout_secs: u64,
    /// Grace period between the soft and hard kill signals on stop.
    pub stop_grace_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3001,
            claude_binary: None,
            projects_dir: None,
            data_dir: None,
            init_timeout_secs: 30,
            permission_timeout_secs: 3600,
            stop_grace_secs: 5,
        }
    }
}

impl Config {
    /// Load the config from `<data_dir>/config.yaml`, writing the defaults
    /// there when the file does not exist yet.
    pub fn load_or_init(data_dir: &Path) -> Result<Self> {
        let path = paths::config_path(data_dir);
        if !path.exists() {
            let cfg = Config::default();
            io::atomic_write(&path, serde_yaml::to_string(&cfg)?.as_bytes())?;
            return Ok(cfg);
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    /// Resolved root of the CLI's conversation logs.
    pub fn projects_dir(&self) -> Result<PathBuf> {
        match &self.projects_dir {
            Some(p) => Ok(p.clone()),
            None => paths::claude_projects_dir(),
        }
    }

    /// Resolved data directory for the stores.
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(p) => Ok(p.clone()),
            None => paths::cui_data_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_or_init_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load_or_init(dir.path()).unwrap();
        assert_eq!(cfg.port, 3001);
        assert!(paths::config_path(dir.path()).exists());
    }

    #[test]
    fn load_or_init_reads_existing_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            paths::config_path(dir.path()),
            "port: 4000\ninit_timeout_secs: 5\n",
        )
        .unwrap();
        let cfg = Config::load_or_init(dir.path()).unwrap();
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.init_timeout_secs, 5);
        // Unspecified fields fall back to defaults.
        assert_eq!(cfg.stop_grace_secs, 5);
    }

    #[test]
    fn overrides_take_precedence() {
        let dir = TempDir::new().unwrap();
        let cfg = Config {
            projects_dir: Some(dir.path().join("logs")),
            data_dir: Some(dir.path().join("data")),
            ..Default::default()
        };
        assert_eq!(cfg.projects_dir().unwrap(), dir.path().join("logs"));
        assert_eq!(cfg.data_dir().unwrap(), dir.path().join("data"));
    }
}
