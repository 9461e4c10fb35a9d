//! Per-stream broadcast of CLI records to any number of subscribers.
//!
//! Each live streaming id owns a history buffer and a set of subscriber
//! sinks. A late joiner replays the full history before tailing live
//! records, so every subscriber observes the same sequence. The publisher
//! never blocks: a sink whose send fails is detached and the publish
//! continues.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::records::StreamRecord;

// ─── Fan-out ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct StreamFanout {
    /// Directory of live streams; insert/remove under this lock, per-stream
    /// state under the entry's own lock.
    streams: Mutex<HashMap<String, Arc<StreamEntry>>>,
}

struct StreamEntry {
    streaming_id: String,
    state: Mutex<StreamState>,
}

struct StreamState {
    history: Vec<StreamRecord>,
    subscribers: Vec<mpsc::UnboundedSender<StreamRecord>>,
    closed: bool,
}

impl StreamFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the broadcast entry for a freshly minted streaming id.
    pub fn open(&self, streaming_id: &str) {
        let entry = Arc::new(StreamEntry {
            streaming_id: streaming_id.to_owned(),
            state: Mutex::new(StreamState {
                history: Vec::new(),
                subscribers: Vec::new(),
                closed: false,
            }),
        });
        self.streams
            .lock()
            .unwrap()
            .insert(streaming_id.to_owned(), entry);
    }

    pub fn is_live(&self, streaming_id: &str) -> bool {
        self.streams.lock().unwrap().contains_key(streaming_id)
    }

    /// Append `record` to the stream's history and deliver it to every
    /// subscriber. Failed sinks are detached; the publish itself never
    /// fails. Returns `false` when the stream does not exist.
    pub fn publish(&self, streaming_id: &str, record: StreamRecord) -> bool {
        let Some(entry) = self.entry(streaming_id) else {
            return false;
        };
        let mut state = entry.state.lock().unwrap();
        if state.closed {
            return false;
        }
        state.history.push(record.clone());
        state.subscribers.retain(|tx| tx.send(record.clone()).is_ok());
        true
    }

    /// Attach a subscriber: it immediately receives a synthetic `connected`
    /// record, then the entire history in order, then live records until
    /// the stream closes (terminal `closed` record) or the receiver is
    /// dropped. Returns `None` for an unknown streaming id.
    pub fn subscribe(&self, streaming_id: &str) -> Option<mpsc::UnboundedReceiver<StreamRecord>> {
        let entry = self.entry(streaming_id)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = entry.state.lock().unwrap();

        let _ = tx.send(StreamRecord::connected(&entry.streaming_id));
        for record in &state.history {
            if tx.send(record.clone()).is_err() {
                return Some(rx);
            }
        }

        if state.closed {
            // Replay-then-closed for a subscriber racing the close; the
            // sender is dropped here so the receiver ends after the replay.
            let _ = tx.send(StreamRecord::closed(&entry.streaming_id));
        } else {
            state.subscribers.push(tx);
        }
        Some(rx)
    }

    /// Set the terminal sentinel, deliver `closed` to every subscriber,
    /// detach them all and drop the entry.
    pub fn close(&self, streaming_id: &str) {
        let entry = self.streams.lock().unwrap().remove(streaming_id);
        let Some(entry) = entry else {
            return;
        };
        let mut state = entry.state.lock().unwrap();
        state.closed = true;
        let closed = StreamRecord::closed(&entry.streaming_id);
        for tx in state.subscribers.drain(..) {
            let _ = tx.send(closed.clone());
        }
    }

    /// Close every live stream; used on server shutdown.
    pub fn disconnect_all(&self) {
        let ids: Vec<String> = self.streams.lock().unwrap().keys().cloned().collect();
        for id in ids {
            self.close(&id);
        }
    }

    fn entry(&self, streaming_id: &str) -> Option<Arc<StreamEntry>> {
        self.streams.lock().unwrap().get(streaming_id).cloned()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
