use serde::Serialize;
use serde_json::Value;

/// Sink for lifecycle and admission events.
///
/// The host application (UI, tests) implements this to render status lights
/// and notifications; the core never talks to a frontend directly.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, payload: Value);
}

pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: &str, _payload: Value) {}
}

pub fn emit_event<T: Serialize>(sink: &dyn EventSink, event: &str, payload: &T) {
    if let Ok(value) = serde_json::to_value(payload) {
        sink.emit(event, value);
    }
}

// Event names emitted by the core services
pub const EVENT_CONNECTION_STATUS: &str = "connection_status";
pub const EVENT_DONATION_RECEIVED: &str = "donation_received";
pub const EVENT_CHANNEL_PUBLICATION: &str = "channel_publication";
pub const EVENT_VIDEO_ADMITTED: &str = "video_admitted";
pub const EVENT_VIDEO_REJECTED: &str = "video_rejected";
pub const EVENT_QUEUE_CHANGED: &str = "queue_changed";
pub const EVENT_NOW_PLAYING: &str = "now_playing";
pub const EVENT_PLAYER_ERROR: &str = "player_error";
