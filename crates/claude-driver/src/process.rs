//! Invocation building for the `claude` child process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use cui_core::types::PermissionMode;
use tokio::process::Command;

// ─── SessionConfig ────────────────────────────────────────────────────────

/// What a single conversation start (or resume) asks of the CLI.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Directory the conversation operates in; must exist for a fresh start.
    pub working_directory: Option<PathBuf>,
    /// Initial prompt for a fresh start, or the new user message on resume.
    pub prompt: String,
    pub model: Option<String>,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub system_prompt: Option<String>,
    pub permission_mode: Option<PermissionMode>,
    /// Prior CLI session id to resume; each resume is a new child.
    pub resume_session_id: Option<String>,
    /// Extra environment for the child.
    pub env: HashMap<String, String>,
}

// ─── ManagerConfig ────────────────────────────────────────────────────────

/// Process-manager knobs, fed from the server config.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub claude_binary: PathBuf,
    /// Base URL the control-plane helper calls back on.
    pub server_url: String,
    /// How long `start` waits for the child's init record.
    pub init_timeout: Duration,
    /// Grace period between SIGTERM and the hard kill.
    pub stop_grace: Duration,
    /// MCP config handed to the CLI so tool approvals route through the
    /// helper; omitted entirely when unset.
    pub mcp_config_path: Option<PathBuf>,
    pub permission_prompt_tool: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            claude_binary: PathBuf::from("claude"),
            server_url: "http://localhost:3001".into(),
            init_timeout: Duration::from_secs(30),
            stop_grace: Duration::from_secs(5),
            mcp_config_path: None,
            permission_prompt_tool: "mcp__cui-permissions__approval_prompt".into(),
        }
    }
}

// ─── Command builder ──────────────────────────────────────────────────────

/// The argument vector for one invocation, in the order the CLI expects:
/// flags first, the prompt (or resume id + message) last.
pub(crate) fn build_args(config: &SessionConfig, manager: &ManagerConfig) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--print".into(),
        "--output-format".into(),
        "stream-json".into(),
        "--verbose".into(),
    ];

    if let Some(wd) = &config.working_directory {
        args.push("--add-dir".into());
        args.push(wd.to_string_lossy().into_owned());
    }
    if let Some(model) = &config.model {
        args.push("--model".into());
        args.push(model.clone());
    }
    if !config.allowed_tools.is_empty() {
        args.push("--allowedTools".into());
        args.push(config.allowed_tools.join(","));
    }
    if !config.disallowed_tools.is_empty() {
        args.push("--disallowedTools".into());
        args.push(config.disallowed_tools.join(","));
    }
    if let Some(sp) = &config.system_prompt {
        args.push("--system-prompt".into());
        args.push(sp.clone());
    }
    if let Some(mode) = &config.permission_mode {
        args.push("--permission-mode".into());
        args.push(mode.as_str().into());
    }
    if let Some(mcp) = &manager.mcp_config_path {
        args.push("--mcp-config".into());
        args.push(mcp.to_string_lossy().into_owned());
        args.push("--permission-prompt-tool".into());
        args.push(manager.permission_prompt_tool.clone());
    }

    match &config.resume_session_id {
        Some(session_id) => {
            args.push("--resume".into());
            args.push(session_id.clone());
            args.push(config.prompt.clone());
        }
        None => args.push(config.prompt.clone()),
    }

    args
}

/// Assemble the ready-to-spawn command: argument vector, working directory,
/// piped stdio, and the environment the helper needs to call back
/// (`CUI_STREAMING_ID`, `CUI_SERVER_URL`).
///
/// `CLAUDECODE` is removed so spawning works from inside a running Claude
/// session as well as from a terminal.
pub(crate) fn build_command(
    config: &SessionConfig,
    manager: &ManagerConfig,
    streaming_id: &str,
) -> Command {
    let mut cmd = Command::new(&manager.claude_binary);
    cmd.args(build_args(config, manager));

    if let Some(wd) = &config.working_directory {
        cmd.current_dir(wd);
    }

    cmd.env("CUI_STREAMING_ID", streaming_id)
        .env("CUI_SERVER_URL", &manager.server_url)
        .env_remove("CLAUDECODE");
    for (k, v) in &config.env {
        cmd.env(k, v);
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    cmd
}

// ─── Tests ────────────────────────────────────────────────────────────────
