//! YouTube Data API v3 client for video metadata and playlist expansion

use log::{error, warn};
use std::time::Duration;

use crate::models::VideoMetadata;

const YOUTUBE_API_BASE: &str = "https://www.googleapis.com/youtube/v3";

/// Page size for playlist expansion (the API maximum)
pub const PLAYLIST_PAGE_SIZE: u32 = 50;

/// Errors from the metadata endpoints. Both variants are per-candidate and
/// never abort sibling candidates.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("Video not found")]
    NotFound,

    #[error("Metadata fetch failed: {0}")]
    FetchFailed(String),
}

pub struct YouTubeClient {
    http_client: reqwest::Client,
    api_key: String,
}

impl YouTubeClient {
    pub fn new(api_key: String) -> Result<Self, MetadataError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| MetadataError::FetchFailed(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            api_key,
        })
    }

    /// Fetch metadata for one video id.
    ///
    /// Counts arrive as strings; unparsable or missing values become 0 so
    /// threshold filters fail predictably. The duration is stored verbatim.
    pub async fn fetch_video(&self, video_id: &str) -> Result<VideoMetadata, MetadataError> {
        let response = self
            .http_client
            .get(format!("{}/videos", YOUTUBE_API_BASE))
            .query(&[
                ("part", "snippet,statistics,contentDetails"),
                ("id", video_id),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| MetadataError::FetchFailed(format!("Video request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("YouTube video fetch failed ({}): {}", status, body);
            return Err(MetadataError::FetchFailed(format!("HTTP {status}")));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MetadataError::FetchFailed(format!("Failed to parse video response: {e}")))?;

        let item = data["items"]
            .as_array()
            .and_then(|items| items.first())
            .ok_or(MetadataError::NotFound)?;

        Ok(parse_video_item(video_id, item))
    }

    /// Expand a playlist into its video ids, in playlist order.
    /// Bounded to the first page (50 entries).
    pub async fn fetch_playlist_video_ids(
        &self,
        playlist_id: &str,
    ) -> Result<Vec<String>, MetadataError> {
        let max_results = PLAYLIST_PAGE_SIZE.to_string();
        let response = self
            .http_client
            .get(format!("{}/playlistItems", YOUTUBE_API_BASE))
            .query(&[
                ("part", "contentDetails"),
                ("maxResults", max_results.as_str()),
                ("playlistId", playlist_id),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| MetadataError::FetchFailed(format!("Playlist request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("YouTube playlist fetch failed ({}): {}", status, body);
            return Err(MetadataError::FetchFailed(format!("HTTP {status}")));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| {
                MetadataError::FetchFailed(format!("Failed to parse playlist response: {e}"))
            })?;

        let ids = data["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item["contentDetails"]["videoId"].as_str())
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        if ids.is_empty() {
            warn!("Playlist {} expanded to no video ids", playlist_id);
        }
        Ok(ids)
    }

    /// Probe whether the configured API key works at all
    pub async fn check_key(&self) -> bool {
        if self.api_key.is_empty() {
            return false;
        }

        let result = self
            .http_client
            .get(format!("{}/videos", YOUTUBE_API_BASE))
            .query(&[
                ("part", "id"),
                ("chart", "mostPopular"),
                ("maxResults", "1"),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await;

        matches!(result, Ok(resp) if resp.status().is_success())
    }
}

fn parse_video_item(video_id: &str, item: &serde_json::Value) -> VideoMetadata {
    let snippet = &item["snippet"];
    let stats = &item["statistics"];

    let parse_count = |value: &serde_json::Value| -> u64 {
        value
            .as_str()
            .and_then(|s| s.parse::<u64>().ok())
            .or_else(|| value.as_u64())
            .unwrap_or(0)
    };

    let thumbnail = snippet["thumbnails"]["high"]["url"]
        .as_str()
        .or_else(|| snippet["thumbnails"]["default"]["url"].as_str())
        .unwrap_or("")
        .to_string();

    VideoMetadata {
        video_id: video_id.to_string(),
        url: format!("https://www.youtube.com/watch?v={video_id}"),
        title: snippet["title"].as_str().unwrap_or("").to_string(),
        thumbnail,
        duration: item["contentDetails"]["duration"]
            .as_str()
            .unwrap_or("")
            .to_string(),
        view_count: parse_count(&stats["viewCount"]),
        like_count: parse_count(&stats["likeCount"]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_counts_duration_and_thumbnail_fallback() {
        let item = json!({
            "snippet": {
                "title": "Some Video",
                "thumbnails": { "default": { "url": "https://i.ytimg.com/d.jpg" } }
            },
            "statistics": { "viewCount": "5000", "likeCount": "200" },
            "contentDetails": { "duration": "PT3M33S" }
        });

        let meta = parse_video_item("dQw4w9WgXcQ", &item);
        assert_eq!(meta.view_count, 5000);
        assert_eq!(meta.like_count, 200);
        assert_eq!(meta.duration, "PT3M33S");
        assert_eq!(meta.thumbnail, "https://i.ytimg.com/d.jpg");
        assert_eq!(meta.url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[test]
    fn missing_counts_default_to_zero() {
        let item = json!({
            "snippet": { "title": "No Stats" },
            "statistics": { "viewCount": "garbage" },
            "contentDetails": {}
        });

        let meta = parse_video_item("abc12345678", &item);
        assert_eq!(meta.view_count, 0);
        assert_eq!(meta.like_count, 0);
        assert_eq!(meta.duration, "");
    }
}
