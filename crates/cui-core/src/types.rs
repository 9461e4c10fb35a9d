use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─── Persisted log records ────────────────────────────────────────────────

/// One message line from the CLI's append-only per-project `.jsonl` logs.
///
/// The envelope fields are owned by the CLI; everything this server does
/// not model is kept verbatim in `extra` so a record can be returned to
/// clients without losing fields.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedMessage {
    pub uuid: String,
    #[serde(default)]
    pub parent_uuid: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_sidechain: Option<bool>,
    /// `"user"`, `"assistant"`, `"system"`, …
    #[serde(rename = "type")]
    pub message_type: String,
    /// The message body as written by the CLI (role + content blocks).
    #[serde(default)]
    pub message: serde_json::Value,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PersistedMessage {
    /// Model name for assistant messages, when present.
    pub fn model(&self) -> Option<&str> {
        self.message.get("model").and_then(|m| m.as_str())
    }

    pub fn is_assistant(&self) -> bool {
        self.message_type == "assistant"
    }
}

/// `type = "summary"` lines interleaved with messages in the logs.
///
/// `leaf_uuid` points at the most recent assistant message the summary
/// describes; the history reader walks it back to a session.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRecord {
    pub summary: String,
    pub leaf_uuid: String,
}

// ─── Conversation digests ─────────────────────────────────────────────────

/// Live status of a session, derived from the status tracker — never from
/// the on-disk logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Ongoing,
    Completed,
}

/// History-level digest of one conversation, as returned by listing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub session_id: String,
    pub project_path: String,
    /// Resolved via the latest summary record for the session's most recent
    /// assistant uuid; empty when none exists.
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: u64,
    pub total_duration_ms: u64,
    pub model: String,
    pub status: SessionStatus,
    /// Present only while the session is ongoing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming_id: Option<String>,
    pub session_info: SessionInfo,
}

// ─── Listing queries ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    Created,
    #[default]
    Updated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

pub const DEFAULT_LIST_LIMIT: usize = 20;

/// Query parameters for `listConversations`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub project_path: Option<String>,
    pub sort_by: Option<SortBy>,
    pub order: Option<SortOrder>,
    pub archived: Option<bool>,
    pub pinned: Option<bool>,
    pub has_continuation: Option<bool>,
}

/// Result page for `listConversations`.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationPage {
    pub conversations: Vec<ConversationSummary>,
    /// Total matching conversations before the limit/offset window.
    pub total: usize,
}

// ─── Session info ─────────────────────────────────────────────────────────

/// Permission mode for tool execution, as passed to the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    #[default]
    Default,
    #[serde(alias = "accept-edits")]
    AcceptEdits,
    #[serde(alias = "bypass")]
    BypassPermissions,
    Plan,
}

impl PermissionMode {
    /// The value the `claude` binary expects for `--permission-mode`.
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::BypassPermissions => "bypassPermissions",
            PermissionMode::Plan => "plan",
        }
    }
}

/// Current schema version of the session-info store.
pub const SESSION_INFO_SCHEMA_VERSION: u32 = 3;

/// Per-session user-editable metadata, persisted forever.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub custom_name: String,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub continuation_session_id: String,
    #[serde(default)]
    pub initial_commit_head: String,
    #[serde(default)]
    pub permission_mode: PermissionMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Entry schema version; entries older than
    /// [`SESSION_INFO_SCHEMA_VERSION`] are migrated forward on open.
    #[serde(default = "default_entry_version")]
    pub version: u32,
}

fn default_entry_version() -> u32 {
    1
}

impl SessionInfo {
    pub fn new_at(now: DateTime<Utc>) -> Self {
        Self {
            custom_name: String::new(),
            pinned: false,
            archived: false,
            continuation_session_id: String::new(),
            initial_commit_head: String::new(),
            permission_mode: PermissionMode::Default,
            created_at: now,
            updated_at: now,
            version: SESSION_INFO_SCHEMA_VERSION,
        }
    }
}

/// Partial patch applied over a [`SessionInfo`] by `update`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionInfoPatch {
    pub custom_name: Option<String>,
    pub pinned: Option<bool>,
    pub archived: Option<bool>,
    pub continuation_session_id: Option<String>,
    pub initial_commit_head: Option<String>,
    pub permission_mode: Option<PermissionMode>,
}

impl SessionInfoPatch {
    pub fn is_empty(&self) -> bool {
        self.custom_name.is_none()
            && self.pinned.is_none()
            && self.archived.is_none()
            && self.continuation_session_id.is_none()
            && self.initial_commit_head.is_none()
            && self.permission_mode.is_none()
    }
}

/// The single JSON document held by the session-info store.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionInfoDocument {
    #[serde(default)]
    pub sessions: HashMap<String, SessionInfo>,
    pub metadata: SessionInfoMetadata,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionInfoMetadata {
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl SessionInfoDocument {
    pub fn empty_at(now: DateTime<Utc>) -> Self {
        Self {
            sessions: HashMap::new(),
            metadata: SessionInfoMetadata {
                schema_version: SESSION_INFO_SCHEMA_VERSION,
                created_at: now,
                last_updated: now,
            },
        }
    }
}
