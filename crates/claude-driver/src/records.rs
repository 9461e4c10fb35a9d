//! Typed stream records.
//!
//! Everything the CLI emits on stdout is one JSON object per line,
//! discriminated by the `"type"` field. The server interleaves its own
//! synthesized `connected`, `closed`, `error` and `permission_request`
//! records into the same stream. Known variants keep unmodeled fields in a
//! flattened map so a record re-serializes without losing anything; shapes
//! this server does not know at all pass through verbatim as [`StreamRecord::Other`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Outer record enum ────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamRecord {
    System(SystemRecord),
    Assistant(AssistantRecord),
    User(UserRecord),
    Result(ResultRecord),
    /// Synthesized: first line every subscriber receives.
    Connected {
        streaming_id: String,
        timestamp: DateTime<Utc>,
    },
    /// Synthesized: last line before the stream ends.
    Closed {
        #[serde(rename = "streamingId")]
        streaming_id: String,
    },
    /// Synthesized: stderr output and recovered parse failures.
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
    /// Synthesized: a pending tool-use approval pushed to the user.
    PermissionRequest(crate::permissions::PermissionRequest),
    /// Anything else the CLI emits, preserved verbatim.
    #[serde(untagged)]
    Other(serde_json::Value),
}

impl StreamRecord {
    pub fn connected(streaming_id: &str) -> Self {
        StreamRecord::Connected {
            streaming_id: streaming_id.to_owned(),
            timestamp: Utc::now(),
        }
    }

    pub fn closed(streaming_id: &str) -> Self {
        StreamRecord::Closed {
            streaming_id: streaming_id.to_owned(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamRecord::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Session id carried by CLI-emitted records, when present.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            StreamRecord::System(r) => r.session_id.as_deref(),
            StreamRecord::Assistant(r) => Some(&r.session_id),
            StreamRecord::User(r) => Some(&r.session_id),
            StreamRecord::Result(r) => r.session_id.as_deref(),
            _ => None,
        }
    }

    pub fn is_result(&self) -> bool {
        matches!(self, StreamRecord::Result(_))
    }
}

// ─── System records ───────────────────────────────────────────────────────

/// `type = "system"` — further distinguished by `subtype`. Only `init`
/// matters here; everything else flows through untouched.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemRecord {
    pub subtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SystemRecord {
    pub fn is_init(&self) -> bool {
        self.subtype == "init"
    }

    /// Decode the typed init payload out of an `init` system record.
    pub fn as_init(&self) -> Option<SystemInit> {
        if !self.is_init() {
            return None;
        }
        let mut value = serde_json::Map::new();
        if let Some(sid) = &self.session_id {
            value.insert("session_id".into(), serde_json::Value::String(sid.clone()));
        }
        value.extend(self.extra.clone());
        serde_json::from_value(serde_json::Value::Object(value)).ok()
    }
}

/// The first record of every stream: the CLI announces its session id,
/// environment and tool surface.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemInit {
    pub session_id: String,
    pub cwd: String,
    pub model: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerStatus>,
    /// CLI sends camelCase (`permissionMode`)
    #[serde(default, alias = "permissionMode")]
    pub permission_mode: String,
    #[serde(default, alias = "apiKeySource", skip_serializing_if = "Option::is_none")]
    pub api_key_source: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpServerStatus {
    pub name: String,
    pub status: String,
}

// ─── Assistant records ────────────────────────────────────────────────────

/// `type = "assistant"` — the model's response, including content blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantRecord {
    pub session_id: String,
    pub message: AssistantContent,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantContent {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Content blocks within an assistant message.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        /// Tool inputs are schema-polymorphic, so Value is correct here.
        input: serde_json::Value,
    },
    Thinking {
        thinking: String,
    },
    #[serde(untagged)]
    Other(serde_json::Value),
}

// ─── User records ─────────────────────────────────────────────────────────

/// `type = "user"` — a user turn, or tool results fed back to the model.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserRecord {
    pub session_id: String,
    pub message: UserContent,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserContent {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: serde_json::Value,
}

impl UserRecord {
    /// Tool-result blocks keyed by their tool-use id, when this user record
    /// carries any.
    pub fn tool_result_ids(&self) -> Vec<&str> {
        let Some(blocks) = self.message.content.as_array() else {
            return Vec::new();
        };
        blocks
            .iter()
            .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("tool_result"))
            .filter_map(|b| b.get("tool_use_id").and_then(|id| id.as_str()))
            .collect()
    }
}

// ─── Result records ───────────────────────────────────────────────────────

/// `type = "result"` — the terminal record before EOF.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResultRecord {
    #[serde(default)]
    pub subtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ResultRecord {
    /// Terminal summary synthesized when a child exits without ever
    /// emitting its own result record.
    pub fn synthesized(session_id: Option<String>, duration_ms: u64) -> Self {
        Self {
            subtype: "error_during_execution".into(),
            session_id,
            is_error: true,
            duration_ms,
            result: None,
            usage: None,
            extra: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,
}

// ─── Tests ────────────────────────────────────────────────────────────────
