//! Versioned JSON store of per-session user metadata.
//!
//! A single document at `~/.cui/session-info.json` holds every entry; all
//! access goes through one mutex so concurrent updates serialize and never
//! corrupt the file. Writes are atomic tempfile renames.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{CuiError, Result};
use crate::io::atomic_write;
use crate::types::{
    SessionInfo, SessionInfoDocument, SessionInfoPatch, PermissionMode,
    SESSION_INFO_SCHEMA_VERSION,
};

// ─── Store ────────────────────────────────────────────────────────────────

pub struct SessionInfoStore {
    path: PathBuf,
    inner: Mutex<SessionInfoDocument>,
}

/// Aggregate numbers for `GET /api/system/status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub session_count: usize,
    pub db_size: u64,
    pub last_updated: DateTime<Utc>,
}

impl SessionInfoStore {
    /// Open the store at `<data_dir>/session-info.json` and run pending
    /// schema migrations.
    ///
    /// A missing file yields an empty in-memory document; the file and its
    /// directory are created lazily on first write. An unreadable file is
    /// logged and treated as empty. A failed migration *write* fails
    /// initialization so readers never observe mixed-version entries.
    pub fn initialize(data_dir: &Path) -> Result<Self> {
        let path = crate::paths::session_info_path(data_dir);
        let mut doc = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<SessionInfoDocument>(&text) {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e,
                        "session-info document unreadable, starting empty");
                    SessionInfoDocument::empty_at(Utc::now())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                SessionInfoDocument::empty_at(Utc::now())
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e,
                    "session-info document unreadable, starting empty");
                SessionInfoDocument::empty_at(Utc::now())
            }
        };

        if doc.metadata.schema_version < SESSION_INFO_SCHEMA_VERSION {
            migrate(&mut doc);
            // Single write; on failure no store is returned at all.
            persist(&path, &doc)?;
        }

        Ok(Self {
            path,
            inner: Mutex::new(doc),
        })
    }

    /// Fetch the entry for `session_id`, synthesizing and persisting a
    /// default one when absent so later reads observe a stable
    /// `created_at`. If the persist fails the defaults are still returned,
    /// but not retained.
    pub fn get(&self, session_id: &str) -> SessionInfo {
        let mut doc = self.inner.lock().unwrap();
        if let Some(info) = doc.sessions.get(session_id) {
            return info.clone();
        }

        let info = SessionInfo::new_at(Utc::now());
        doc.sessions.insert(session_id.to_owned(), info.clone());
        doc.metadata.last_updated = Utc::now();
        if let Err(e) = persist(&self.path, &doc) {
            tracing::warn!(session_id, error = %e,
                "failed to persist default session info");
            doc.sessions.remove(session_id);
        }
        info
    }

    /// Merge `patch` over the existing (or default) entry and refresh
    /// `updated_at`; `created_at` is never touched.
    pub fn update(&self, session_id: &str, patch: SessionInfoPatch) -> Result<SessionInfo> {
        let mut doc = self.inner.lock().unwrap();
        let mut info = doc
            .sessions
            .get(session_id)
            .cloned()
            .unwrap_or_else(|| SessionInfo::new_at(Utc::now()));

        if let Some(name) = patch.custom_name {
            info.custom_name = name;
        }
        if let Some(pinned) = patch.pinned {
            info.pinned = pinned;
        }
        if let Some(archived) = patch.archived {
            info.archived = archived;
        }
        if let Some(id) = patch.continuation_session_id {
            info.continuation_session_id = id;
        }
        if let Some(head) = patch.initial_commit_head {
            info.initial_commit_head = head;
        }
        if let Some(mode) = patch.permission_mode {
            info.permission_mode = mode;
        }
        info.updated_at = later_than(info.updated_at);

        doc.sessions.insert(session_id.to_owned(), info.clone());
        doc.metadata.last_updated = info.updated_at;
        persist(&self.path, &doc)?;
        Ok(info)
    }

    /// Shorthand for `update(id, { custom_name })`.
    pub fn update_custom_name(&self, session_id: &str, name: &str) -> Result<SessionInfo> {
        self.update(
            session_id,
            SessionInfoPatch {
                custom_name: Some(name.to_owned()),
                ..Default::default()
            },
        )
    }

    /// Remove the entry; a missing entry is a no-op.
    pub fn delete(&self, session_id: &str) -> Result<()> {
        let mut doc = self.inner.lock().unwrap();
        if doc.sessions.remove(session_id).is_none() {
            return Ok(());
        }
        doc.metadata.last_updated = Utc::now();
        persist(&self.path, &doc)
    }

    pub fn list_all(&self) -> Vec<(String, SessionInfo)> {
        let doc = self.inner.lock().unwrap();
        doc.sessions
            .iter()
            .map(|(id, info)| (id.clone(), info.clone()))
            .collect()
    }

    /// Archive every non-archived entry; returns how many changed.
    pub fn archive_all(&self) -> Result<usize> {
        let mut doc = self.inner.lock().unwrap();
        let now = Utc::now();
        let mut count = 0;
        for info in doc.sessions.values_mut() {
            if !info.archived {
                info.archived = true;
                info.updated_at = now;
                count += 1;
            }
        }
        if count > 0 {
            doc.metadata.last_updated = now;
            persist(&self.path, &doc)?;
        }
        Ok(count)
    }

    pub fn stats(&self) -> StoreStats {
        let doc = self.inner.lock().unwrap();
        let db_size = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        StoreStats {
            session_count: doc.sessions.len(),
            db_size,
            last_updated: doc.metadata.last_updated,
        }
    }
}

// ─── Internals ────────────────────────────────────────────────────────────

fn persist(path: &Path, doc: &SessionInfoDocument) -> Result<()> {
    let json = serde_json::to_vec_pretty(doc).map_err(CuiError::Json)?;
    atomic_write(path, &json)
}

/// `updated_at` must be strictly greater after every update, even when the
/// clock has not advanced between calls.
fn later_than(prev: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > prev {
        now
    } else {
        prev + Duration::milliseconds(1)
    }
}

/// Rewrite every entry forward to the current schema.
fn migrate(doc: &mut SessionInfoDocument) {
    for info in doc.sessions.values_mut() {
        let mut version = info.version;
        while version < SESSION_INFO_SCHEMA_VERSION {
            match version {
                1 => {
                    info.pinned = false;
                    info.archived = false;
                    info.continuation_session_id = String::new();
                    info.initial_commit_head = String::new();
                }
                2 => {
                    info.permission_mode = PermissionMode::Default;
                }
                _ => {}
            }
            version += 1;
        }
        info.version = SESSION_INFO_SCHEMA_VERSION;
    }
    doc.metadata.schema_version = SESSION_INFO_SCHEMA_VERSION;
    doc.metadata.last_updated = Utc::now();
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (SessionInfoStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SessionInfoStore::initialize(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn get_synthesizes_and_persists_default_entry() {
        let (store, dir) = store();
        let first = store.get("sess-1");
        assert_eq!(first.version, SESSION_INFO_SCHEMA_VERSION);
        assert!(!first.pinned);

        // A later read observes the same created_at.
        let second = store.get("sess-1");
        assert_eq!(first.created_at, second.created_at);

        let on_disk =
            std::fs::read_to_string(crate::paths::session_info_path(dir.path())).unwrap();
        assert!(on_disk.contains("sess-1"));
    }

    #[test]
    fn update_merges_patch_and_bumps_updated_at() {
        let (store, _dir) = store();
        let before = store.get("sess-1");
        let after = store
            .update(
                "sess-1",
                SessionInfoPatch {
                    custom_name: Some("My refactor".into()),
                    pinned: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(after.custom_name, "My refactor");
        assert!(after.pinned);
        // Unpatched fields carry over; created_at untouched.
        assert!(!after.archived);
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at > before.updated_at);
    }

    #[test]
    fn update_custom_name_is_equivalent_to_update() {
        let (store, _dir) = store();
        let via_shorthand = store.update_custom_name("a", "Name A").unwrap();
        let via_patch = store
            .update(
                "b",
                SessionInfoPatch {
                    custom_name: Some("Name A".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(via_shorthand.custom_name, via_patch.custom_name);
    }

    #[test]
    fn delete_is_noop_for_missing_entry() {
        let (store, _dir) = store();
        store.delete("never-existed").unwrap();
        store.get("sess-1");
        store.delete("sess-1").unwrap();
        assert!(store.list_all().is_empty());
    }

    #[test]
    fn archive_all_counts_only_changes() {
        let (store, _dir) = store();
        store.get("a");
        store.get("b");
        store
            .update(
                "c",
                SessionInfoPatch {
                    archived: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(store.archive_all().unwrap(), 2);
        assert_eq!(store.archive_all().unwrap(), 0);
        assert!(store.list_all().iter().all(|(_, i)| i.archived));
    }

    #[test]
    fn stats_reports_counts_and_size() {
        let (store, _dir) = store();
        store.get("a");
        let stats = store.stats();
        assert_eq!(stats.session_count, 1);
        assert!(stats.db_size > 0);
    }

    #[test]
    fn migrates_v1_document_to_current_schema() {
        let dir = TempDir::new().unwrap();
        let v1 = r#"{
            "sessions": {
                "s1": {"custom_name":"one","created_at":"2024-01-01T00:00:00Z","updated_at":"2024-01-01T00:00:00Z","version":1},
                "s2": {"custom_name":"two","created_at":"2024-01-02T00:00:00Z","updated_at":"2024-01-02T00:00:00Z","version":1}
            },
            "metadata": {"schema_version":1,"created_at":"2024-01-01T00:00:00Z","last_updated":"2024-01-02T00:00:00Z"}
        }"#;
        std::fs::write(crate::paths::session_info_path(dir.path()), v1).unwrap();

        let store = SessionInfoStore::initialize(dir.path()).unwrap();
        for (_, info) in store.list_all() {
            assert_eq!(info.version, SESSION_INFO_SCHEMA_VERSION);
            assert!(!info.pinned);
            assert!(!info.archived);
            assert_eq!(info.continuation_session_id, "");
            assert_eq!(info.initial_commit_head, "");
            assert_eq!(info.permission_mode, PermissionMode::Default);
        }

        // The migrated document is rewritten on disk in the same step.
        let on_disk =
            std::fs::read_to_string(crate::paths::session_info_path(dir.path())).unwrap();
        let doc: SessionInfoDocument = serde_json::from_str(&on_disk).unwrap();
        assert_eq!(doc.metadata.schema_version, SESSION_INFO_SCHEMA_VERSION);
        assert!(doc.sessions.values().all(|i| i.version == SESSION_INFO_SCHEMA_VERSION));
    }

    #[test]
    fn migrates_v2_document_adding_permission_mode() {
        let dir = TempDir::new().unwrap();
        let v2 = r#"{
            "sessions": {
                "s1": {"custom_name":"one","pinned":true,"archived":false,"continuation_session_id":"","initial_commit_head":"abc","created_at":"2024-01-01T00:00:00Z","updated_at":"2024-01-01T00:00:00Z","version":2}
            },
            "metadata": {"schema_version":2,"created_at":"2024-01-01T00:00:00Z","last_updated":"2024-01-01T00:00:00Z"}
        }"#;
        std::fs::write(crate::paths::session_info_path(dir.path()), v2).unwrap();

        let store = SessionInfoStore::initialize(dir.path()).unwrap();
        let (_, info) = store
            .list_all()
            .into_iter()
            .find(|(id, _)| id == "s1")
            .unwrap();
        assert_eq!(info.permission_mode, PermissionMode::Default);
        // v2 fields survive the migration.
        assert!(info.pinned);
        assert_eq!(info.initial_commit_head, "abc");
    }

    #[test]
    fn corrupt_document_starts_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(crate::paths::session_info_path(dir.path()), "{not json").unwrap();
        let store = SessionInfoStore::initialize(dir.path()).unwrap();
        assert!(store.list_all().is_empty());
    }

    #[test]
    fn missing_file_yields_empty_store() {
        let (store, _dir) = store();
        assert!(store.list_all().is_empty());
        assert_eq!(store.stats().session_count, 0);
    }
}
