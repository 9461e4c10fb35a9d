//! Conversation index over the CLI's on-disk logs.
//!
//! Projects live as subdirectories of `~/.claude/projects`, one `.jsonl`
//! file per append stream. A file interleaves summary records with
//! persisted messages and may span multiple session ids; sessions are not
//! file-scoped. The semantic project path always comes from a message's
//! `cwd` field, never from the (lossy) encoded directory name.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{CuiError, Result};
use crate::ndjson::LineBuffer;
use crate::session_info::SessionInfoStore;
use crate::status::StatusTracker;
use crate::types::{
    ConversationPage, ConversationSummary, ListQuery, PersistedMessage, SessionStatus, SortBy,
    SortOrder, SummaryRecord, DEFAULT_LIST_LIMIT,
};

// ─── Reader ───────────────────────────────────────────────────────────────

pub struct HistoryReader {
    root: PathBuf,
    session_info: Arc<SessionInfoStore>,
    tracker: Arc<StatusTracker>,
    /// Process-lifetime cache of which file a session id was found in.
    file_cache: Mutex<HashMap<String, PathBuf>>,
}

/// Per-session fold over every message seen for it.
#[derive(Debug, Default)]
struct SessionDigest {
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    message_count: u64,
    total_duration_ms: u64,
    model: Option<(DateTime<Utc>, String)>,
    cwd: Option<(DateTime<Utc>, String)>,
    /// Assistant message uuids in file order, for summary resolution.
    assistant_uuids: Vec<(DateTime<Utc>, String)>,
}

/// One entry of `GET /api/working-directories`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingDirectory {
    pub path: String,
    pub last_used: DateTime<Utc>,
    pub conversation_count: usize,
}

impl HistoryReader {
    pub fn new(
        root: PathBuf,
        session_info: Arc<SessionInfoStore>,
        tracker: Arc<StatusTracker>,
    ) -> Self {
        Self {
            root,
            session_info,
            tracker,
            file_cache: Mutex::new(HashMap::new()),
        }
    }

    // ─── Listing ──────────────────────────────────────────────────────

    pub fn list_conversations(&self, query: &ListQuery) -> Result<ConversationPage> {
        let (digests, summaries) = self.scan_all();

        let mut conversations: Vec<ConversationSummary> = digests
            .into_iter()
            .filter_map(|(session_id, digest)| self.digest_to_summary(session_id, digest, &summaries))
            .collect();

        // Filter order: project path, archived, pinned, hasContinuation.
        if let Some(project) = &query.project_path {
            let wanted = normalize_path(project);
            conversations.retain(|c| {
                let path = normalize_path(&c.project_path);
                path == wanted || path.starts_with(&format!("{wanted}/"))
            });
        }
        if let Some(archived) = query.archived {
            conversations.retain(|c| c.session_info.archived == archived);
        }
        if let Some(pinned) = query.pinned {
            conversations.retain(|c| c.session_info.pinned == pinned);
        }
        if let Some(has_continuation) = query.has_continuation {
            conversations
                .retain(|c| !c.session_info.continuation_session_id.is_empty() == has_continuation);
        }

        let sort_by = query.sort_by.unwrap_or_default();
        let order = query.order.unwrap_or_default();
        conversations.sort_by(|a, b| {
            let (ka, kb) = match sort_by {
                SortBy::Created => (a.created_at, b.created_at),
                SortBy::Updated => (a.updated_at, b.updated_at),
            };
            match order {
                SortOrder::Asc => ka.cmp(&kb),
                SortOrder::Desc => kb.cmp(&ka),
            }
        });

        let total = conversations.len();
        let offset = query.offset.unwrap_or(0).min(total);
        let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
        let end = offset.saturating_add(limit).min(total);
        conversations = conversations[offset..end].to_vec();

        Ok(ConversationPage {
            conversations,
            total,
        })
    }

    /// The listing digest for a single session id.
    pub fn get_conversation_metadata(&self, session_id: &str) -> Result<ConversationSummary> {
        let (mut digests, summaries) = self.scan_all();
        let digest = digests
            .remove(session_id)
            .ok_or_else(|| CuiError::ConversationNotFound(session_id.to_owned()))?;
        self.digest_to_summary(session_id.to_owned(), digest, &summaries)
            .ok_or_else(|| CuiError::ConversationNotFound(session_id.to_owned()))
    }

    // ─── Single-conversation fetch ────────────────────────────────────

    /// All messages of one session in file order; summary records dropped.
    pub fn fetch_conversation(&self, session_id: &str) -> Result<Vec<PersistedMessage>> {
        let path = self.find_session_file(session_id)?;
        let mut messages = Vec::new();
        for_each_record(&path, |record| {
            if let LogRecord::Message(msg) = record {
                if msg.session_id == session_id {
                    messages.push(msg);
                }
            }
        });
        if messages.is_empty() {
            // The cached file may have been rewritten; fall through to 404.
            return Err(CuiError::ConversationNotFound(session_id.to_owned()));
        }
        Ok(messages)
    }

    /// Distinct working directories across all persisted conversations.
    pub fn working_directories(&self) -> Vec<WorkingDirectory> {
        let (digests, _) = self.scan_all();
        let mut dirs: HashMap<String, (DateTime<Utc>, usize)> = HashMap::new();
        for digest in digests.values() {
            let (Some((_, cwd)), Some(updated)) = (&digest.cwd, digest.updated_at) else {
                continue;
            };
            let entry = dirs.entry(cwd.clone()).or_insert((updated, 0));
            entry.0 = entry.0.max(updated);
            entry.1 += 1;
        }
        let mut out: Vec<WorkingDirectory> = dirs
            .into_iter()
            .map(|(path, (last_used, conversation_count))| WorkingDirectory {
                path,
                last_used,
                conversation_count,
            })
            .collect();
        out.sort_by(|a, b| b.last_used.cmp(&a.last_used));
        out
    }

    // ─── Internals ────────────────────────────────────────────────────

    fn digest_to_summary(
        &self,
        session_id: String,
        digest: SessionDigest,
        summaries: &HashMap<String, String>,
    ) -> Option<ConversationSummary> {
        let created_at = digest.created_at?;
        let updated_at = digest.updated_at?;

        // Most recent assistant uuid that a summary record points at.
        let summary = digest
            .assistant_uuids
            .iter()
            .rev()
            .find_map(|(_, uuid)| summaries.get(uuid))
            .cloned()
            .unwrap_or_default();

        let status = self.tracker.get_status(&session_id);
        let streaming_id = match status {
            SessionStatus::Ongoing => self.tracker.get_streaming_id(&session_id),
            SessionStatus::Completed => None,
        };

        Some(ConversationSummary {
            session_info: self.session_info.get(&session_id),
            project_path: digest.cwd.map(|(_, cwd)| cwd).unwrap_or_default(),
            summary,
            created_at,
            updated_at,
            message_count: digest.message_count,
            total_duration_ms: digest.total_duration_ms,
            model: digest.model.map(|(_, m)| m).unwrap_or_default(),
            status,
            streaming_id,
            session_id,
        })
    }

    /// One pass over every project file: per-session digests plus the
    /// leaf-uuid → summary map (latest record wins per leaf).
    fn scan_all(&self) -> (HashMap<String, SessionDigest>, HashMap<String, String>) {
        let mut digests: HashMap<String, SessionDigest> = HashMap::new();
        let mut summaries: HashMap<String, String> = HashMap::new();

        for path in self.log_files() {
            for_each_record(&path, |record| match record {
                LogRecord::Summary(rec) => {
                    // Later records overwrite: latest summary wins.
                    summaries.insert(rec.leaf_uuid, rec.summary);
                }
                LogRecord::Message(msg) => {
                    let digest = digests.entry(msg.session_id.clone()).or_default();
                    digest.fold(&msg);
                }
            });
        }

        (digests, summaries)
    }

    /// Every `.jsonl` under every project directory. A missing root or an
    /// unreadable directory yields nothing.
    fn log_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let Ok(projects) = std::fs::read_dir(&self.root) else {
            return files;
        };
        for project in projects.flatten() {
            let dir = project.path();
            if !dir.is_dir() {
                continue;
            }
            let Ok(entries) = std::fs::read_dir(&dir) else {
                tracing::warn!(dir = %dir.display(), "unreadable project directory, skipping");
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == "jsonl") {
                    files.push(path);
                }
            }
        }
        files.sort();
        files
    }

    fn find_session_file(&self, session_id: &str) -> Result<PathBuf> {
        if let Some(path) = self.file_cache.lock().unwrap().get(session_id) {
            return Ok(path.clone());
        }

        for path in self.log_files() {
            let mut found = false;
            for_each_record(&path, |record| {
                if let LogRecord::Message(msg) = record {
                    if msg.session_id == session_id {
                        found = true;
                    }
                }
            });
            if found {
                self.file_cache
                    .lock()
                    .unwrap()
                    .insert(session_id.to_owned(), path.clone());
                return Ok(path);
            }
        }
        Err(CuiError::ConversationNotFound(session_id.to_owned()))
    }
}

impl SessionDigest {
    fn fold(&mut self, msg: &PersistedMessage) {
        let ts = msg.timestamp;
        self.created_at = Some(self.created_at.map_or(ts, |c| c.min(ts)));
        self.updated_at = Some(self.updated_at.map_or(ts, |u| u.max(ts)));
        self.message_count += 1;
        self.total_duration_ms += msg.duration_ms.unwrap_or(0);
        if let Some(model) = msg.model() {
            if self.model.as_ref().is_none_or(|(t, _)| ts >= *t) {
                self.model = Some((ts, model.to_owned()));
            }
        }
        if let Some(cwd) = &msg.cwd {
            if self.cwd.as_ref().is_none_or(|(t, _)| ts >= *t) {
                self.cwd = Some((ts, cwd.clone()));
            }
        }
        if msg.is_assistant() {
            self.assistant_uuids.push((ts, msg.uuid.clone()));
        }
    }
}

// ─── File parsing ─────────────────────────────────────────────────────────

enum LogRecord {
    Summary(SummaryRecord),
    Message(PersistedMessage),
}

/// Stream-parse one `.jsonl` file through the shared line splitter.
/// Malformed lines are logged and skipped; parsing never aborts the file.
fn for_each_record(path: &Path, mut f: impl FnMut(LogRecord)) {
    let mut file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable log file, skipping");
            return;
        }
    };

    let mut buf = LineBuffer::new();
    let mut chunk = [0u8; 64 * 1024];
    loop {
        let read = match file.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "read error, truncating file scan");
                break;
            }
        };
        for line in buf.push(&chunk[..read]) {
            decode_record(path, &line, &mut f);
        }
    }
    if let Some(line) = buf.finish() {
        decode_record(path, &line, &mut f);
    }
}

fn decode_record(path: &Path, line: &str, f: &mut impl FnMut(LogRecord)) {
    let value: serde_json::Value = match crate::ndjson::parse_line(line) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(path = %path.display(), "skipping malformed log line: {e}");
            return;
        }
    };

    if value.get("type").and_then(|t| t.as_str()) == Some("summary") {
        match serde_json::from_value::<SummaryRecord>(value) {
            Ok(rec) => f(LogRecord::Summary(rec)),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping malformed summary record"),
        }
        return;
    }

    match serde_json::from_value::<PersistedMessage>(value) {
        Ok(msg) => f(LogRecord::Message(msg)),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping malformed message record"),
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_owned()
    } else {
        trimmed.to_owned()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
