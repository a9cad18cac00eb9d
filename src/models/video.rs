use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata fetched from the video platform for one candidate video.
///
/// Fetched once per admission attempt; repeated links are re-fetched rather
/// than cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    /// Platform video id (11 characters for YouTube)
    pub video_id: String,
    /// Canonical watch URL
    pub url: String,
    pub title: String,
    pub thumbnail: String,
    /// Provider duration encoding (ISO 8601), stored verbatim
    pub duration: String,
    pub view_count: u64,
    pub like_count: u64,
}

/// A video admitted into the playback queue.
///
/// Carries its own queue-local id distinct from the video id, so the same
/// video can be queued twice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    /// Queue-local unique identifier
    pub id: String,
    pub video: VideoMetadata,
    /// Display name of whoever requested the video
    pub requester: String,
    /// Amount contributed with the request
    pub amount: f64,
    /// Enqueue timestamp in milliseconds since Unix epoch
    pub added_at: i64,
}

impl QueueItem {
    pub fn new(video: VideoMetadata, requester: String, amount: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            video,
            requester,
            amount,
            added_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}
