use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use claude_driver::{ManagerConfig, PermissionMediator, ProcessManager, StreamFanout};
use cui_core::config::Config;
use cui_core::history::HistoryReader;
use cui_core::preferences::PreferencesStore;
use cui_core::session_info::SessionInfoStore;
use cui_core::status::StatusTracker;

/// Shared application state passed to all route handlers.
///
/// Every service is an explicit injected dependency constructed once here;
/// nothing is process-global, so tests wire their own instances against
/// temp directories.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub session_info: Arc<SessionInfoStore>,
    pub preferences: Arc<PreferencesStore>,
    pub tracker: Arc<StatusTracker>,
    pub history: Arc<HistoryReader>,
    pub fanout: Arc<StreamFanout>,
    pub permissions: Arc<PermissionMediator>,
    pub manager: Arc<ProcessManager>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Wire the full service graph from a loaded [`Config`].
    pub fn build(config: Config) -> cui_core::Result<Self> {
        let data_dir = config.data_dir()?;
        let projects_dir = config.projects_dir()?;

        let session_info = Arc::new(SessionInfoStore::initialize(&data_dir)?);
        let preferences = Arc::new(PreferencesStore::open(&data_dir));
        let tracker = Arc::new(StatusTracker::new());
        let history = Arc::new(HistoryReader::new(
            projects_dir,
            session_info.clone(),
            tracker.clone(),
        ));
        let fanout = Arc::new(StreamFanout::new());
        let permissions = Arc::new(PermissionMediator::new(fanout.clone()));

        let manager = Arc::new(ProcessManager::new(
            ManagerConfig {
                claude_binary: resolve_claude_binary(&config),
                server_url: format!("http://{}:{}", config.host, config.port),
                init_timeout: Duration::from_secs(config.init_timeout_secs),
                stop_grace: Duration::from_secs(config.stop_grace_secs),
                ..Default::default()
            },
            fanout.clone(),
            tracker.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            session_info,
            preferences,
            tracker,
            history,
            fanout,
            permissions,
            manager,
            started_at: Utc::now(),
        })
    }

    /// Stop all children (bounded) and drop every subscriber.
    pub async fn shutdown(&self) {
        tracing::info!("shutting down: stopping all conversations");
        self.manager.shutdown().await;
    }

    pub fn permission_timeout(&self) -> Duration {
        Duration::from_secs(self.config.permission_timeout_secs)
    }
}

/// Explicit config path wins; otherwise `$PATH` lookup with a plain
/// `claude` fallback so the error surfaces at spawn time, not startup.
fn resolve_claude_binary(config: &Config) -> PathBuf {
    if let Some(path) = &config.claude_binary {
        return path.clone();
    }
    which::which("claude").unwrap_or_else(|_| PathBuf::from("claude"))
}
