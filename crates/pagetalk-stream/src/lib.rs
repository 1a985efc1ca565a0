//! Per-generation streaming broker.
//!
//! Each in-flight assistant generation owns one stream, keyed by the
//! assistant message id. The producer publishes text deltas; any number of
//! subscribers observe the same stream. A subscriber that joins late replays
//! the full buffered history before receiving live chunks, so reconnecting
//! clients never lose output. Streams end with a terminal chunk (`Done` or
//! `Error`); the broker drops its registry entry on close and sweeps
//! abandoned entries after an idle timeout as a backstop.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use uuid::Uuid;

/// One unit of stream output. `Done` and `Error` are terminal: subscribers
/// stop iterating when they observe either.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    Delta { content: String },
    Done,
    Error { message: String },
}

impl StreamChunk {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

struct StreamState {
    chunks: Vec<StreamChunk>,
    closed: bool,
}

struct StreamEntry {
    state: Mutex<StreamState>,
    notify: Notify,
    last_activity: Mutex<Instant>,
}

impl StreamEntry {
    fn new() -> Self {
        Self {
            state: Mutex::new(StreamState {
                chunks: Vec::new(),
                closed: false,
            }),
            notify: Notify::new(),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_activity.lock().expect("activity lock poisoned") = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .expect("activity lock poisoned")
            .elapsed()
    }

    fn push(&self, chunk: StreamChunk, close: bool) -> bool {
        let mut state = self.state.lock().expect("stream lock poisoned");
        if state.closed {
            return false;
        }
        state.chunks.push(chunk);
        if close {
            state.closed = true;
        }
        drop(state);
        self.touch();
        self.notify.notify_waiters();
        true
    }
}

/// Registry of per-generation replay buffers.
///
/// Buffers are created lazily by whichever of `publish`/`subscribe` runs
/// first and share the same entry thereafter. A subscriber disconnecting
/// early only drops its own stream; the buffer and other subscribers are
/// unaffected.
#[derive(Default)]
pub struct StreamBroker {
    entries: DashMap<Uuid, Arc<StreamEntry>>,
}

impl StreamBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, stream_id: Uuid) -> Arc<StreamEntry> {
        self.entries
            .entry(stream_id)
            .or_insert_with(|| Arc::new(StreamEntry::new()))
            .clone()
    }

    /// Append a text delta. Chunks published before any subscriber exists
    /// are buffered, not lost. Publishing to a closed stream is a no-op.
    pub fn publish(&self, stream_id: Uuid, content: impl Into<String>) {
        let entry = self.entry(stream_id);
        if !entry.push(
            StreamChunk::Delta {
                content: content.into(),
            },
            false,
        ) {
            log::warn!("[{}] publish after close ignored", stream_id);
        }
    }

    /// Enqueue the terminal sentinel and release the registry entry.
    /// Subscribers already attached keep the buffer alive until they drain it.
    pub fn close(&self, stream_id: Uuid) {
        let entry = self.entry(stream_id);
        entry.push(StreamChunk::Done, true);
        self.entries.remove(&stream_id);
        log::debug!("[{}] stream closed", stream_id);
    }

    /// Terminate the stream with an error. Still a terminal signal: no
    /// subscriber is left hanging on a failed generation.
    pub fn fail(&self, stream_id: Uuid, message: impl Into<String>) {
        let entry = self.entry(stream_id);
        let message = message.into();
        entry.push(StreamChunk::Error { message }, true);
        self.entries.remove(&stream_id);
        log::debug!("[{}] stream failed", stream_id);
    }

    /// Subscribe to a stream. Replays all buffered chunks from the start,
    /// then yields live chunks in publish order, ending after the terminal
    /// chunk. Multiple subscribers each see the full sequence (broadcast,
    /// not competing consumers).
    pub fn subscribe(&self, stream_id: Uuid) -> impl Stream<Item = StreamChunk> + Send {
        let entry = self.entry(stream_id);
        entry.touch();

        async_stream::stream! {
            let mut cursor = 0usize;
            'live: loop {
                let notified = entry.notify.notified();
                let batch: Vec<StreamChunk> = {
                    let state = entry.state.lock().expect("stream lock poisoned");
                    state.chunks[cursor..].to_vec()
                };
                cursor += batch.len();
                for chunk in batch {
                    let terminal = chunk.is_terminal();
                    yield chunk;
                    if terminal {
                        break 'live;
                    }
                }
                notified.await;
            }
        }
    }

    /// Number of live (not yet closed) streams.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries idle longer than `max_idle`. Backstop for producers that
    /// died without closing; `close`/`fail` are the primary cleanup path.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.idle_for() < max_idle);
        let removed = before - self.entries.len();
        if removed > 0 {
            log::info!("swept {} idle stream buffer(s)", removed);
        }
        removed
    }

    /// Periodic sweep task; the server spawns one at startup.
    pub fn spawn_gc(
        self: &Arc<Self>,
        interval: Duration,
        max_idle: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let broker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                broker.sweep_idle(max_idle);
            }
        })
    }
}
