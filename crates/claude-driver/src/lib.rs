//! `claude-driver` — native Rust driver for Claude CLI child processes.
//!
//! Each conversation spawns one `claude --print --output-format stream-json`
//! child. This crate owns the child's lifecycle and everything that hangs
//! off its stdout:
//!
//! ```text
//! SessionConfig
//!     │
//!     ▼
//! ProcessManager  ← spawns the child, drains stdout/stderr,
//!     │             resolves start() when the init record arrives
//!     ▼
//! StreamRecord    ← typed stream-json records; unknown shapes pass through
//!     │
//!     ▼
//! StreamFanout    ← per-streaming-id broadcast with full-history replay
//!     │
//!     ▼
//! subscribers     ← long-poll HTTP clients, one unbounded channel each
//! ```
//!
//! The [`PermissionMediator`] runs beside the fan-out: the control-plane
//! helper posts tool-use approval requests, the user's decision releases
//! the helper's blocked call with an allow/deny verdict.

pub mod error;
pub mod fanout;
pub mod manager;
pub mod permissions;
pub mod process;
pub mod records;

pub use error::{DriverError, Result};
pub use fanout::StreamFanout;
pub use manager::{ProcessManager, StartedSession};
pub use permissions::{Decision, PermissionMediator, PermissionRequest, PermissionStatus};
pub use process::{ManagerConfig, SessionConfig};
pub use records::{StreamRecord, SystemInit};
