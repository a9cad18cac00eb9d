//! Queue Engine
//!
//! Ordered playback queue with a current-item cursor and bounded history.
//! Every mutation locks the whole state once, so two completing admissions
//! can never interleave inside a single operation.

use log::{info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::models::QueueItem;
use crate::services::events::{
    emit_event, EventSink, EVENT_NOW_PLAYING, EVENT_PLAYER_ERROR, EVENT_QUEUE_CHANGED,
};

struct QueueState {
    queue: Vec<QueueItem>,
    current: Option<QueueItem>,
    /// Previously-current items, most-recent first, capped at `history_limit`
    history: VecDeque<QueueItem>,
    playing: bool,
}

/// Serializable projection of the full queue state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub queue: Vec<QueueItem>,
    pub current: Option<QueueItem>,
    pub history: Vec<QueueItem>,
    pub playing: bool,
}

pub struct QueueEngine {
    state: Mutex<QueueState>,
    history_limit: usize,
    event_sink: Arc<dyn EventSink>,
}

impl QueueEngine {
    pub fn new(history_limit: usize, event_sink: Arc<dyn EventSink>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: Vec::new(),
                current: None,
                history: VecDeque::new(),
                playing: false,
            }),
            history_limit,
            event_sink,
        }
    }

    /// Append an item to the queue tail. When nothing is queued or playing,
    /// the item bypasses the queue and playback starts immediately.
    pub fn enqueue(&self, item: QueueItem) {
        let started;
        {
            let mut state = self.lock();
            if state.current.is_none() && state.queue.is_empty() {
                info!("Queue idle, playing '{}' immediately", item.video.title);
                state.current = Some(item);
                state.playing = true;
                started = true;
            } else {
                state.queue.push(item);
                started = false;
            }
        }
        if started {
            self.emit_now_playing();
        }
        self.emit_queue_changed();
    }

    /// Remove a queued item by its queue-local id. Does not touch the
    /// current item or history; unknown ids are a no-op.
    pub fn remove(&self, queue_local_id: &str) {
        let removed;
        {
            let mut state = self.lock();
            let before = state.queue.len();
            state.queue.retain(|item| item.id != queue_local_id);
            removed = state.queue.len() != before;
        }
        if removed {
            self.emit_queue_changed();
        }
    }

    /// Move to the next item: the current one (if any) goes into history,
    /// the queue head becomes current. An empty queue stops playback.
    pub fn advance(&self) {
        {
            let mut state = self.lock();
            if let Some(finished) = state.current.take() {
                state.history.push_front(finished);
                state.history.truncate(self.history_limit);
            }
            if state.queue.is_empty() {
                state.playing = false;
            } else {
                state.current = Some(state.queue.remove(0));
                state.playing = true;
            }
        }
        self.emit_now_playing();
        self.emit_queue_changed();
    }

    /// Return to the most recent history entry. The current item (if any)
    /// goes back to the queue head. No-op when history is empty.
    pub fn rewind(&self) {
        {
            let mut state = self.lock();
            let Some(previous) = state.history.pop_front() else {
                return;
            };
            if let Some(current) = state.current.take() {
                state.queue.insert(0, current);
            }
            state.current = Some(previous);
            state.playing = true;
        }
        self.emit_now_playing();
        self.emit_queue_changed();
    }

    /// Move one queue entry from `from` to `to`. Out-of-range indices leave
    /// the queue untouched.
    pub fn reorder(&self, from: usize, to: usize) {
        {
            let mut state = self.lock();
            if from >= state.queue.len() || to >= state.queue.len() {
                return;
            }
            let item = state.queue.remove(from);
            state.queue.insert(to, item);
        }
        self.emit_queue_changed();
    }

    /// Empty the queue. Current item and history are untouched.
    pub fn clear(&self) {
        {
            let mut state = self.lock();
            state.queue.clear();
        }
        self.emit_queue_changed();
    }

    /// Player finished the current item
    pub fn on_player_ended(&self) {
        self.advance();
    }

    /// Player failed on the current item; report and move on so the queue
    /// never stalls.
    pub fn on_player_error(&self, message: &str) {
        let title = self
            .lock()
            .current
            .as_ref()
            .map(|item| item.video.title.clone())
            .unwrap_or_default();
        warn!("Player error on '{}': {}", title, message);
        emit_event(
            self.event_sink.as_ref(),
            EVENT_PLAYER_ERROR,
            &serde_json::json!({ "title": title, "error": message }),
        );
        self.advance();
    }

    pub fn current(&self) -> Option<QueueItem> {
        self.lock().current.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.lock();
        QueueSnapshot {
            queue: state.queue.clone(),
            current: state.current.clone(),
            history: state.history.iter().cloned().collect(),
            playing: state.playing,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit_queue_changed(&self) {
        emit_event(self.event_sink.as_ref(), EVENT_QUEUE_CHANGED, &self.snapshot());
    }

    fn emit_now_playing(&self) {
        emit_event(self.event_sink.as_ref(), EVENT_NOW_PLAYING, &self.current());
    }
}
