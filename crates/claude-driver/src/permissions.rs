//! Tool-use approval mediation.
//!
//! The control-plane helper posts a request, the user sees it as a
//! `permission_request` record on the conversation stream, and the helper
//! learns the verdict either by polling `get_pending` (wire-compatible
//! path) or by blocking on [`PermissionMediator::wait_for_decision`].
//! Requests transition exactly once from pending to a terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::error::{DriverError, Result};
use crate::fanout::StreamFanout;
use crate::records::StreamRecord;

// ─── Types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    Pending,
    Approved,
    Denied,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    pub id: String,
    pub streaming_id: String,
    pub tool_name: String,
    pub tool_input: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub status: PermissionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_input: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deny_reason: Option<String>,
}

impl PermissionRequest {
    /// The verdict string returned to the CLI by the helper.
    ///
    /// Approved: `{"behavior":"allow","updatedInput":…}` (the modified
    /// input when the user edited it, the original otherwise).
    /// Denied: `{"behavior":"deny","message":…}`.
    pub fn verdict(&self) -> Option<String> {
        match self.status {
            PermissionStatus::Pending => None,
            PermissionStatus::Approved => {
                let input = self.modified_input.as_ref().unwrap_or(&self.tool_input);
                Some(
                    serde_json::json!({ "behavior": "allow", "updatedInput": input }).to_string(),
                )
            }
            PermissionStatus::Denied => {
                let message = self.deny_reason.as_deref().unwrap_or("Permission denied");
                Some(serde_json::json!({ "behavior": "deny", "message": message }).to_string())
            }
        }
    }
}

/// The user's answer to a pending request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub approved: bool,
    #[serde(default)]
    pub modified_input: Option<serde_json::Value>,
    #[serde(default)]
    pub deny_reason: Option<String>,
}

// ─── Mediator ─────────────────────────────────────────────────────────────

pub struct PermissionMediator {
    fanout: Arc<StreamFanout>,
    state: Mutex<MediatorState>,
    decisions: broadcast::Sender<PermissionRequest>,
}

#[derive(Default)]
struct MediatorState {
    requests: HashMap<String, PermissionRequest>,
    /// Insertion order, so listings are stable.
    order: Vec<String>,
}

impl PermissionMediator {
    pub fn new(fanout: Arc<StreamFanout>) -> Self {
        let (decisions, _) = broadcast::channel(64);
        Self {
            fanout,
            state: Mutex::new(MediatorState::default()),
            decisions,
        }
    }

    /// Record a fresh pending request and push it to the conversation
    /// stream so the user sees it. Returns the stored request (with its
    /// minted id).
    pub fn notify(
        &self,
        streaming_id: &str,
        tool_name: &str,
        tool_input: serde_json::Value,
    ) -> PermissionRequest {
        let request = PermissionRequest {
            id: uuid::Uuid::new_v4().to_string(),
            streaming_id: streaming_id.to_owned(),
            tool_name: tool_name.to_owned(),
            tool_input,
            timestamp: Utc::now(),
            status: PermissionStatus::Pending,
            modified_input: None,
            deny_reason: None,
        };

        {
            let mut state = self.state.lock().unwrap();
            state.order.push(request.id.clone());
            state.requests.insert(request.id.clone(), request.clone());
        }

        if !self
            .fanout
            .publish(streaming_id, StreamRecord::PermissionRequest(request.clone()))
        {
            tracing::warn!(streaming_id, id = %request.id,
                "permission request for a stream with no live fan-out entry");
        }
        request
    }

    pub fn get(&self, id: &str) -> Option<PermissionRequest> {
        self.state.lock().unwrap().requests.get(id).cloned()
    }

    /// Pending requests, optionally narrowed to one streaming id.
    pub fn get_pending(&self, streaming_id: Option<&str>) -> Vec<PermissionRequest> {
        self.filtered(streaming_id, Some(PermissionStatus::Pending))
    }

    /// All requests (completed ones stay for audit), optionally filtered.
    pub fn get_all(
        &self,
        streaming_id: Option<&str>,
        status: Option<PermissionStatus>,
    ) -> Vec<PermissionRequest> {
        self.filtered(streaming_id, status)
    }

    /// Apply the user's decision.
    ///
    /// Exactly one terminal transition per request: a second call with the
    /// identical outcome returns the stored request unchanged, a differing
    /// one is rejected with [`DriverError::AlreadyDecided`].
    pub fn decide(&self, id: &str, decision: &Decision) -> Result<PermissionRequest> {
        let decided = {
            let mut state = self.state.lock().unwrap();
            let request = state
                .requests
                .get_mut(id)
                .ok_or_else(|| DriverError::PermissionNotFound(id.to_owned()))?;

            let target = if decision.approved {
                PermissionStatus::Approved
            } else {
                PermissionStatus::Denied
            };

            if request.status != PermissionStatus::Pending {
                let identical = request.status == target
                    && request.modified_input == decision.modified_input
                    && request.deny_reason == decision.deny_reason;
                if identical {
                    return Ok(request.clone());
                }
                return Err(DriverError::AlreadyDecided(id.to_owned()));
            }

            request.status = target;
            request.modified_input = decision.modified_input.clone();
            request.deny_reason = decision.deny_reason.clone();
            request.clone()
        };

        let _ = self.decisions.send(decided.clone());
        Ok(decided)
    }

    /// Block until the request is decided or `timeout` elapses.
    ///
    /// On timeout a synthetic timed-out denial is returned without
    /// touching the stored request, which remains pending for audit.
    pub async fn wait_for_decision(&self, id: &str, timeout: Duration) -> Result<PermissionRequest> {
        let mut rx = self.decisions.subscribe();

        // Check after subscribing so a decision racing this call is not lost.
        let current = self
            .get(id)
            .ok_or_else(|| DriverError::PermissionNotFound(id.to_owned()))?;
        if current.status != PermissionStatus::Pending {
            return Ok(current);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let decided = match tokio::time::timeout_at(deadline, rx.recv()).await {
                Err(_) => {
                    let mut timed_out = current.clone();
                    timed_out.status = PermissionStatus::Denied;
                    timed_out.deny_reason = Some("Permission request timed out".into());
                    return Ok(timed_out);
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(DriverError::Process("mediator shut down".into()));
                }
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => {
                    // Missed events; re-read the store instead of the channel.
                    match self.get(id) {
                        Some(r) if r.status != PermissionStatus::Pending => return Ok(r),
                        _ => continue,
                    }
                }
                Ok(Ok(decided)) => decided,
            };
            if decided.id == id {
                return Ok(decided);
            }
        }
    }

    fn filtered(
        &self,
        streaming_id: Option<&str>,
        status: Option<PermissionStatus>,
    ) -> Vec<PermissionRequest> {
        let state = self.state.lock().unwrap();
        state
            .order
            .iter()
            .filter_map(|id| state.requests.get(id))
            .filter(|r| streaming_id.is_none_or(|s| r.streaming_id == s))
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn mediator_with_stream(streaming_id: &str) -> (PermissionMediator, Arc<StreamFanout>) {
        let fanout = Arc::new(StreamFanout::new());
        fanout.open(streaming_id);
        (PermissionMediator::new(fanout.clone()), fanout)
    }

    #[tokio::test]
    async fn notify_stores_pending_and_publishes_to_stream() {
        let (mediator, fanout) = mediator_with_stream("st-1");
        let mut rx = fanout.subscribe("st-1").unwrap();

        let request =
            mediator.notify("st-1", "Bash", serde_json::json!({ "command": "ls" }));
        assert_eq!(request.status, PermissionStatus::Pending);
        assert_eq!(mediator.get_pending(Some("st-1")).len(), 1);

        // connected, then the permission_request record.
        rx.recv().await.unwrap();
        let record = rx.recv().await.unwrap();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "permission_request");
        assert_eq!(value["toolName"], "Bash");
        assert_eq!(value["id"], request.id.as_str());
    }

    #[tokio::test]
    async fn approve_with_modified_input_yields_allow_verdict() {
        let (mediator, _fanout) = mediator_with_stream("st-1");
        let request =
            mediator.notify("st-1", "Bash", serde_json::json!({ "command": "ls" }));

        let decided = mediator
            .decide(
                &request.id,
                &Decision {
                    approved: true,
                    modified_input: Some(serde_json::json!({ "command": "ls -l" })),
                    deny_reason: None,
                },
            )
            .unwrap();

        assert_eq!(decided.status, PermissionStatus::Approved);
        assert!(mediator.get_pending(Some("st-1")).is_empty());
        assert_eq!(
            decided.verdict().unwrap(),
            r#"{"behavior":"allow","updatedInput":{"command":"ls -l"}}"#
        );
    }

    #[tokio::test]
    async fn deny_yields_deny_verdict_with_reason() {
        let (mediator, _fanout) = mediator_with_stream("st-1");
        let request = mediator.notify("st-1", "Bash", serde_json::json!({ "command": "ls" }));

        let decided = mediator
            .decide(
                &request.id,
                &Decision {
                    approved: false,
                    modified_input: None,
                    deny_reason: Some("nope".into()),
                },
            )
            .unwrap();

        assert_eq!(decided.status, PermissionStatus::Denied);
        assert_eq!(
            decided.verdict().unwrap(),
            r#"{"behavior":"deny","message":"nope"}"#
        );
    }

    #[tokio::test]
    async fn approved_without_modification_allows_original_input() {
        let (mediator, _fanout) = mediator_with_stream("st-1");
        let request = mediator.notify("st-1", "Read", serde_json::json!({ "path": "/etc/hosts" }));
        let decided = mediator
            .decide(
                &request.id,
                &Decision {
                    approved: true,
                    modified_input: None,
                    deny_reason: None,
                },
            )
            .unwrap();
        assert_eq!(
            decided.verdict().unwrap(),
            r#"{"behavior":"allow","updatedInput":{"path":"/etc/hosts"}}"#
        );
    }

    #[tokio::test]
    async fn second_differing_decision_is_rejected() {
        let (mediator, _fanout) = mediator_with_stream("st-1");
        let request = mediator.notify("st-1", "Bash", serde_json::json!({}));
        let approve = Decision {
            approved: true,
            modified_input: None,
            deny_reason: None,
        };
        mediator.decide(&request.id, &approve).unwrap();

        // Identical transition is idempotent.
        assert!(mediator.decide(&request.id, &approve).is_ok());

        // A differing one observes the terminal state and is rejected.
        let deny = Decision {
            approved: false,
            modified_input: None,
            deny_reason: Some("changed my mind".into()),
        };
        assert!(matches!(
            mediator.decide(&request.id, &deny).unwrap_err(),
            DriverError::AlreadyDecided(_)
        ));
    }

    #[tokio::test]
    async fn decide_unknown_id_is_not_found() {
        let (mediator, _fanout) = mediator_with_stream("st-1");
        let err = mediator
            .decide(
                "missing",
                &Decision {
                    approved: true,
                    modified_input: None,
                    deny_reason: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, DriverError::PermissionNotFound(_)));
    }

    #[tokio::test]
    async fn wait_for_decision_unblocks_on_decide() {
        let (mediator, _fanout) = mediator_with_stream("st-1");
        let mediator = Arc::new(mediator);
        let request = mediator.notify("st-1", "Bash", serde_json::json!({}));

        let waiter = {
            let mediator = mediator.clone();
            let id = request.id.clone();
            tokio::spawn(async move {
                mediator
                    .wait_for_decision(&id, Duration::from_secs(5))
                    .await
            })
        };

        tokio::task::yield_now().await;
        mediator
            .decide(
                &request.id,
                &Decision {
                    approved: true,
                    modified_input: None,
                    deny_reason: None,
                },
            )
            .unwrap();

        let decided = waiter.await.unwrap().unwrap();
        assert_eq!(decided.status, PermissionStatus::Approved);
    }

    #[tokio::test]
    async fn wait_for_decision_times_out_with_synthetic_denial() {
        let (mediator, _fanout) = mediator_with_stream("st-1");
        let request = mediator.notify("st-1", "Bash", serde_json::json!({}));

        let result = mediator
            .wait_for_decision(&request.id, Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(result.status, PermissionStatus::Denied);
        assert_eq!(result.deny_reason.as_deref(), Some("Permission request timed out"));

        // The stored request is untouched and still pending.
        assert_eq!(
            mediator.get(&request.id).unwrap().status,
            PermissionStatus::Pending
        );
    }

    #[tokio::test]
    async fn listings_filter_by_stream_and_status() {
        let fanout = Arc::new(StreamFanout::new());
        fanout.open("st-1");
        fanout.open("st-2");
        let mediator = PermissionMediator::new(fanout);

        let a = mediator.notify("st-1", "Bash", serde_json::json!({}));
        let _b = mediator.notify("st-2", "Edit", serde_json::json!({}));
        mediator
            .decide(
                &a.id,
                &Decision {
                    approved: true,
                    modified_input: None,
                    deny_reason: None,
                },
            )
            .unwrap();

        assert_eq!(mediator.get_pending(None).len(), 1);
        assert_eq!(mediator.get_pending(Some("st-1")).len(), 0);
        assert_eq!(mediator.get_all(Some("st-1"), None).len(), 1);
        assert_eq!(
            mediator
                .get_all(None, Some(PermissionStatus::Approved))
                .len(),
            1
        );
        assert_eq!(mediator.get_all(None, None).len(), 2);
    }
}
