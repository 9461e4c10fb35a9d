use crate::error::{CuiError, Result};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

/// Root of the CLI's per-project conversation logs, under `$HOME`.
pub const CLAUDE_PROJECTS_DIR: &str = ".claude/projects";

/// Root of this server's own data directory, under `$HOME`.
pub const CUI_DIR: &str = ".cui";

pub const SESSION_INFO_FILE: &str = "session-info.json";
pub const PREFERENCES_FILE: &str = "preferences.json";
pub const CONFIG_FILE: &str = "config.yaml";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

fn home_dir() -> Result<PathBuf> {
    home::home_dir().ok_or(CuiError::HomeNotFound)
}

/// `~/.claude/projects` — where the CLI appends its JSONL conversation logs.
pub fn claude_projects_dir() -> Result<PathBuf> {
    Ok(home_dir()?.join(CLAUDE_PROJECTS_DIR))
}

/// `~/.cui` — session-info DB, preferences and server config live here.
pub fn cui_data_dir() -> Result<PathBuf> {
    Ok(home_dir()?.join(CUI_DIR))
}

pub fn session_info_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SESSION_INFO_FILE)
}

pub fn preferences_path(data_dir: &Path) -> PathBuf {
    data_dir.join(PREFERENCES_FILE)
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}

// ---------------------------------------------------------------------------
// Project-path encoding
// ---------------------------------------------------------------------------

/// Encode an absolute project path the way the CLI names its log
/// directories: every `/` becomes `-`.
pub fn encode_project_path(path: &str) -> String {
    path.replace('/', "-")
}

/// Best-effort inverse of [`encode_project_path`].
///
/// The scheme is lossy for paths that themselves contain `-`, so callers
/// must prefer the `cwd` field carried inside each persisted message and
/// treat this value as a display fallback only.
pub fn decode_project_path(encoded: &str) -> String {
    encoded.replace('-', "/")
}
