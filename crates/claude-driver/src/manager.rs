//! Lifecycle of Claude CLI children.
//!
//! `start` mints a streaming id, opens its fan-out entry, spawns the child
//! and resolves once the init record arrives. One task drains stdout
//! through the shared line splitter into typed records; a second drains
//! stderr into `error` records; a supervisor waits for exit, synthesizes a
//! terminal summary when the child died without one, closes the stream and
//! unregisters the session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::{mpsc, oneshot};

use cui_core::ndjson::LineBuffer;
use cui_core::status::{SessionContext, StatusTracker};

use crate::error::{DriverError, Result};
use crate::fanout::StreamFanout;
use crate::process::{build_command, ManagerConfig, SessionConfig};
use crate::records::{ResultRecord, StreamRecord, SystemInit};

// ─── Manager ──────────────────────────────────────────────────────────────

pub struct ProcessManager {
    config: ManagerConfig,
    fanout: Arc<StreamFanout>,
    tracker: Arc<StatusTracker>,
    children: Arc<Mutex<HashMap<String, LiveChild>>>,
}

struct LiveChild {
    pid: Option<u32>,
    hard_kill: mpsc::UnboundedSender<()>,
}

/// What `start` resolves with once the child announces itself.
#[derive(Debug, Clone)]
pub struct StartedSession {
    pub streaming_id: String,
    pub system_init: SystemInit,
}

impl ProcessManager {
    pub fn new(
        config: ManagerConfig,
        fanout: Arc<StreamFanout>,
        tracker: Arc<StatusTracker>,
    ) -> Self {
        Self {
            config,
            fanout,
            tracker,
            children: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawn a CLI child for `config` and wait for its init record.
    ///
    /// On failure nothing is left behind: the streaming id is retracted,
    /// the fan-out entry removed and the status tracker untouched.
    pub async fn start(&self, config: SessionConfig) -> Result<StartedSession> {
        if let Some(wd) = &config.working_directory {
            if !wd.is_dir() {
                return Err(DriverError::Spawn(format!(
                    "working directory does not exist: {}",
                    wd.display()
                )));
            }
        }

        let streaming_id = uuid::Uuid::new_v4().to_string();
        self.fanout.open(&streaming_id);

        let mut cmd = build_command(&config, &self.config, &streaming_id);
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.fanout.close(&streaming_id);
                return Err(DriverError::Spawn(e.to_string()));
            }
        };

        let Some(stdout) = child.stdout.take() else {
            let _ = child.start_kill();
            self.fanout.close(&streaming_id);
            return Err(DriverError::Spawn("stdout not captured".into()));
        };
        let Some(stderr) = child.stderr.take() else {
            let _ = child.start_kill();
            self.fanout.close(&streaming_id);
            return Err(DriverError::Spawn("stderr not captured".into()));
        };

        let pid = child.id();
        let (init_tx, init_rx) = oneshot::channel::<SystemInit>();
        let (kill_tx, kill_rx) = mpsc::unbounded_channel::<()>();
        self.children.lock().unwrap().insert(
            streaming_id.clone(),
            LiveChild {
                pid,
                hard_kill: kill_tx,
            },
        );

        let started = Instant::now();
        let waiter = tokio::spawn(wait_with_kill(child, kill_rx));
        let stdout_task = tokio::spawn(drain_stdout(
            stdout,
            self.fanout.clone(),
            self.tracker.clone(),
            streaming_id.clone(),
            config.prompt.clone(),
            init_tx,
        ));
        let stderr_task = tokio::spawn(drain_stderr(
            stderr,
            self.fanout.clone(),
            streaming_id.clone(),
        ));

        // Supervisor: stream closure is driven by child exit, never by stop.
        {
            let fanout = self.fanout.clone();
            let tracker = self.tracker.clone();
            let children = self.children.clone();
            let streaming_id = streaming_id.clone();
            tokio::spawn(async move {
                let (saw_result, session_id) =
                    stdout_task.await.unwrap_or((false, None));
                let _ = stderr_task.await;
                let status = waiter.await.ok().flatten();

                if !saw_result {
                    let summary = ResultRecord::synthesized(
                        session_id.clone(),
                        started.elapsed().as_millis() as u64,
                    );
                    fanout.publish(&streaming_id, StreamRecord::Result(summary));
                }
                // Completed-status and table removal must be observable by
                // the time a subscriber sees the closed record.
                children.lock().unwrap().remove(&streaming_id);
                if tracker.get_session_id(&streaming_id).is_some() {
                    tracker.unregister(&streaming_id);
                }
                fanout.close(&streaming_id);

                tracing::info!(
                    streaming_id,
                    session_id = session_id.as_deref().unwrap_or(""),
                    exit_code = status.and_then(|s| s.code()).unwrap_or(-1),
                    "claude process exited"
                );
            });
        }

        match tokio::time::timeout(self.config.init_timeout, init_rx).await {
            Ok(Ok(system_init)) => Ok(StartedSession {
                streaming_id,
                system_init,
            }),
            Ok(Err(_)) => Err(DriverError::Spawn(
                "claude exited before announcing a session".into(),
            )),
            Err(_) => {
                if let Some(child) = self.children.lock().unwrap().get(&streaming_id) {
                    let _ = child.hard_kill.send(());
                }
                Err(DriverError::InitTimeout(self.config.init_timeout.as_secs()))
            }
        }
    }

    /// Soft-kill the child, escalating to a hard kill after the grace
    /// period. Returns `false` when no such live process exists.
    pub fn stop(&self, streaming_id: &str) -> bool {
        let (pid, hard_kill) = {
            let children = self.children.lock().unwrap();
            match children.get(streaming_id) {
                Some(child) => (child.pid, child.hard_kill.clone()),
                None => return false,
            }
        };

        soft_kill(pid);
        let grace = self.config.stop_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            // No-op if the child already exited and the waiter is gone.
            let _ = hard_kill.send(());
        });
        true
    }

    pub fn is_live(&self, streaming_id: &str) -> bool {
        self.children.lock().unwrap().contains_key(streaming_id)
    }

    pub fn active_count(&self) -> usize {
        self.children.lock().unwrap().len()
    }

    pub fn list_active(&self) -> Vec<String> {
        self.children.lock().unwrap().keys().cloned().collect()
    }

    /// Stop every live child in parallel, wait (bounded) for the exit
    /// handlers to finish, then drop all subscribers.
    pub async fn shutdown(&self) {
        let ids = self.list_active();
        for id in &ids {
            self.stop(id);
        }

        let deadline =
            tokio::time::Instant::now() + self.config.stop_grace + std::time::Duration::from_secs(2);
        while tokio::time::Instant::now() < deadline {
            if self.children.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }

        self.fanout.disconnect_all();
    }
}

// ─── Child plumbing ───────────────────────────────────────────────────────

/// Owns the child handle: waits for exit while honoring hard-kill requests.
async fn wait_with_kill(
    mut child: Child,
    mut kill_rx: mpsc::UnboundedReceiver<()>,
) -> Option<std::process::ExitStatus> {
    loop {
        tokio::select! {
            status = child.wait() => return status.ok(),
            req = kill_rx.recv() => match req {
                Some(()) => {
                    let _ = child.start_kill();
                }
                None => return child.wait().await.ok(),
            },
        }
    }
}

/// Drain stdout through the shared line splitter, publishing each decoded
/// record. Returns whether a result record was seen, plus the session id.
async fn drain_stdout(
    mut stdout: ChildStdout,
    fanout: Arc<StreamFanout>,
    tracker: Arc<StatusTracker>,
    streaming_id: String,
    initial_prompt: String,
    init_tx: oneshot::Sender<SystemInit>,
) -> (bool, Option<String>) {
    let mut buf = LineBuffer::new();
    let mut chunk = [0u8; 8192];
    let mut saw_result = false;
    let mut session_id: Option<String> = None;
    let mut init_tx = Some(init_tx);

    loop {
        match stdout.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for line in buf.push(&chunk[..n]) {
                    handle_line(
                        &line,
                        &fanout,
                        &tracker,
                        &streaming_id,
                        &initial_prompt,
                        &mut init_tx,
                        &mut saw_result,
                        &mut session_id,
                    );
                }
            }
            Err(e) => {
                tracing::warn!(streaming_id, error = %e, "stdout read failed");
                fanout.publish(&streaming_id, StreamRecord::error(e.to_string()));
                break;
            }
        }
    }
    if let Some(line) = buf.finish() {
        handle_line(
            &line,
            &fanout,
            &tracker,
            &streaming_id,
            &initial_prompt,
            &mut init_tx,
            &mut saw_result,
            &mut session_id,
        );
    }

    (saw_result, session_id)
}

#[allow(clippy::too_many_arguments)]
fn handle_line(
    line: &str,
    fanout: &StreamFanout,
    tracker: &StatusTracker,
    streaming_id: &str,
    initial_prompt: &str,
    init_tx: &mut Option<oneshot::Sender<SystemInit>>,
    saw_result: &mut bool,
    session_id: &mut Option<String>,
) {
    let record: StreamRecord = match serde_json::from_str(line) {
        Ok(record) => record,
        Err(e) => {
            // A bad line becomes an error record; the stream keeps going.
            tracing::warn!(streaming_id, error = %e, "unparseable CLI output line");
            fanout.publish(
                streaming_id,
                StreamRecord::error(format!("failed to parse CLI output: {e}")),
            );
            return;
        }
    };

    if let Some(sid) = record.session_id() {
        session_id.get_or_insert_with(|| sid.to_owned());
    }
    if record.is_result() {
        *saw_result = true;
    }

    if let StreamRecord::System(sys) = &record {
        if let Some(init) = sys.as_init() {
            tracker.register(
                streaming_id,
                &init.session_id,
                SessionContext {
                    initial_prompt: initial_prompt.to_owned(),
                    working_directory: init.cwd.clone(),
                    model: Some(init.model.clone()),
                    timestamp: chrono::Utc::now(),
                },
            );
            if let Some(tx) = init_tx.take() {
                let _ = tx.send(init);
            }
        }
    }

    fanout.publish(streaming_id, record);
}

/// Stderr is free-form diagnostics: log every line and surface it to
/// subscribers as an `error` record.
async fn drain_stderr(stderr: ChildStderr, fanout: Arc<StreamFanout>, streaming_id: String) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        tracing::warn!(streaming_id, "claude stderr: {line}");
        fanout.publish(&streaming_id, StreamRecord::error(line));
    }
}

#[cfg(unix)]
fn soft_kill(pid: Option<u32>) {
    if let Some(pid) = pid {
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn soft_kill(_pid: Option<u32>) {}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    const INIT_LINE: &str = r#"{"type":"system","subtype":"init","session_id":"s1","model":"claude-sonnet-4-6","tools":[],"mcp_servers":[],"permissionMode":"default","cwd":"/tmp","apiKeySource":"env"}"#;
    const ASSISTANT_LINE: &str = r#"{"type":"assistant","session_id":"s1","message":{"role":"assistant","content":[{"type":"text","text":"hi"}]}}"#;
    const RESULT_LINE: &str = r#"{"type":"result","subtype":"success","session_id":"s1","is_error":false,"duration_ms":5,"result":"done","usage":{"input_tokens":1,"output_tokens":1}}"#;

    /// Write a shell script that stands in for the `claude` binary.
    fn fake_claude(dir: &TempDir, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.path().join("claude");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn manager(binary: PathBuf, init_timeout_ms: u64) -> ProcessManager {
        let fanout = Arc::new(StreamFanout::new());
        let tracker = Arc::new(StatusTracker::new());
        ProcessManager::new(
            ManagerConfig {
                claude_binary: binary,
                init_timeout: Duration::from_millis(init_timeout_ms),
                stop_grace: Duration::from_millis(200),
                ..Default::default()
            },
            fanout,
            tracker,
        )
    }

    fn record_types(records: &[StreamRecord]) -> Vec<String> {
        records
            .iter()
            .map(|r| {
                serde_json::to_value(r).unwrap()["type"]
                    .as_str()
                    .unwrap()
                    .to_owned()
            })
            .collect()
    }

    async fn collect_until_closed(
        rx: &mut mpsc::UnboundedReceiver<StreamRecord>,
    ) -> Vec<StreamRecord> {
        let mut records = Vec::new();
        loop {
            match tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
                Ok(Some(record)) => {
                    let is_closed = matches!(record, StreamRecord::Closed { .. });
                    records.push(record);
                    if is_closed {
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => panic!("timed out waiting for stream records"),
            }
        }
        records
    }

    #[tokio::test]
    async fn start_resolves_on_init_and_streams_to_close() {
        let dir = TempDir::new().unwrap();
        let binary = fake_claude(
            &dir,
            &format!(
                "echo '{INIT_LINE}'\nsleep 0.5\necho '{ASSISTANT_LINE}'\necho '{RESULT_LINE}'"
            ),
        );
        let manager = manager(binary, 5000);

        let started = manager
            .start(SessionConfig {
                working_directory: Some(dir.path().to_path_buf()),
                prompt: "Hello".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(started.system_init.session_id, "s1");
        assert_eq!(started.system_init.model, "claude-sonnet-4-6");

        // The pairing is registered as soon as init was seen.
        assert_eq!(
            manager.tracker.get_session_id(&started.streaming_id).as_deref(),
            Some("s1")
        );
        let context = manager.tracker.get_context(&started.streaming_id).unwrap();
        assert_eq!(context.initial_prompt, "Hello");

        let mut rx = manager.fanout.subscribe(&started.streaming_id).unwrap();
        let records = collect_until_closed(&mut rx).await;
        assert_eq!(
            record_types(&records),
            vec!["connected", "system", "assistant", "result", "closed"]
        );

        // Exit handler completed the session and reaped the child.
        assert!(!manager.is_live(&started.streaming_id));
        assert_eq!(
            manager.tracker.get_status("s1"),
            cui_core::types::SessionStatus::Completed
        );
    }

    #[tokio::test]
    async fn exit_without_result_synthesizes_terminal_summary() {
        let dir = TempDir::new().unwrap();
        let binary = fake_claude(&dir, &format!("echo '{INIT_LINE}'\nsleep 0.5"));
        let manager = manager(binary, 5000);

        let started = manager
            .start(SessionConfig {
                prompt: "go".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let mut rx = manager.fanout.subscribe(&started.streaming_id).unwrap();
        let records = collect_until_closed(&mut rx).await;
        assert_eq!(
            record_types(&records),
            vec!["connected", "system", "result", "closed"]
        );
        let synthesized = serde_json::to_value(&records[2]).unwrap();
        assert_eq!(synthesized["subtype"], "error_during_execution");
        assert_eq!(synthesized["is_error"], true);
        assert_eq!(synthesized["session_id"], "s1");
    }

    #[tokio::test]
    async fn stderr_lines_surface_as_error_records() {
        let dir = TempDir::new().unwrap();
        let binary = fake_claude(
            &dir,
            &format!("echo '{INIT_LINE}'\necho 'boom' >&2\nsleep 0.5\necho '{RESULT_LINE}'"),
        );
        let manager = manager(binary, 5000);

        let started = manager
            .start(SessionConfig {
                prompt: "go".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let mut rx = manager.fanout.subscribe(&started.streaming_id).unwrap();
        let records = collect_until_closed(&mut rx).await;

        let error = records
            .iter()
            .find_map(|r| match r {
                StreamRecord::Error { message, .. } => Some(message.clone()),
                _ => None,
            })
            .expect("expected an error record from stderr");
        assert_eq!(error, "boom");
    }

    #[tokio::test]
    async fn unparseable_stdout_becomes_error_record_and_stream_continues() {
        let dir = TempDir::new().unwrap();
        let binary = fake_claude(
            &dir,
            &format!("echo '{INIT_LINE}'\necho '{{broken'\nsleep 0.5\necho '{RESULT_LINE}'"),
        );
        let manager = manager(binary, 5000);

        let started = manager
            .start(SessionConfig {
                prompt: "go".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let mut rx = manager.fanout.subscribe(&started.streaming_id).unwrap();
        let records = collect_until_closed(&mut rx).await;
        let types = record_types(&records);
        assert!(types.contains(&"error".to_owned()));
        // The real result still arrived after the bad line.
        assert!(types.contains(&"result".to_owned()));
    }

    #[tokio::test]
    async fn stop_kills_a_long_running_child() {
        let dir = TempDir::new().unwrap();
        let binary = fake_claude(&dir, &format!("echo '{INIT_LINE}'\nsleep 30"));
        let manager = manager(binary, 5000);

        let started = manager
            .start(SessionConfig {
                prompt: "go".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let mut rx = manager.fanout.subscribe(&started.streaming_id).unwrap();

        assert!(manager.stop(&started.streaming_id));

        // Stream closure is driven by the exit handler.
        let records = collect_until_closed(&mut rx).await;
        assert!(record_types(&records).contains(&"closed".to_owned()));
        assert!(!manager.is_live(&started.streaming_id));
    }

    #[tokio::test]
    async fn stop_unknown_streaming_id_returns_false() {
        let dir = TempDir::new().unwrap();
        let binary = fake_claude(&dir, "sleep 1");
        let manager = manager(binary, 5000);
        assert!(!manager.stop("non-existent"));
    }

    #[tokio::test]
    async fn start_times_out_without_init_and_leaves_no_residue() {
        let dir = TempDir::new().unwrap();
        let binary = fake_claude(&dir, "sleep 30");
        let manager = manager(binary, 200);

        let err = manager
            .start(SessionConfig {
                prompt: "go".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::InitTimeout(_)));

        // Give the exit handler a moment to reap the killed child.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(manager.active_count(), 0);
        assert!(manager.tracker.list_ongoing().is_empty());
    }

    #[tokio::test]
    async fn start_rejects_missing_working_directory() {
        let dir = TempDir::new().unwrap();
        let binary = fake_claude(&dir, "sleep 1");
        let manager = manager(binary, 5000);

        let err = manager
            .start(SessionConfig {
                working_directory: Some(dir.path().join("does-not-exist")),
                prompt: "go".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Spawn(_)));
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn start_spawn_failure_retracts_the_stream() {
        let manager = manager(PathBuf::from("/nonexistent/claude-binary"), 5000);
        let err = manager
            .start(SessionConfig {
                prompt: "go".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Spawn(_)));
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_stops_all_children_and_disconnects() {
        let dir = TempDir::new().unwrap();
        let binary = fake_claude(&dir, &format!("echo '{INIT_LINE}'\nsleep 30"));
        let manager = manager(binary, 5000);

        let a = manager
            .start(SessionConfig {
                prompt: "one".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let b = manager
            .start(SessionConfig {
                prompt: "two".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(manager.active_count(), 2);

        manager.shutdown().await;
        assert_eq!(manager.active_count(), 0);
        assert!(!manager.fanout.is_live(&a.streaming_id));
        assert!(!manager.fanout.is_live(&b.streaming_id));
    }

    #[test]
    fn concurrent_children_get_unique_streaming_ids() {
        // Streaming ids are v4 uuids minted per start; simple sanity check
        // that the generator does not repeat over a realistic burst.
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(uuid::Uuid::new_v4().to_string()));
        }
    }
}
