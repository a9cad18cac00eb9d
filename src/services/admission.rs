//! Admission pipeline
//!
//! Turns an incoming donation into zero or more queue items: extract video
//! links from the message, expand playlists, fetch metadata, and apply the
//! configured filters in order.

use async_trait::async_trait;
use log::{debug, info, warn};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;

use crate::models::{DonationEvent, QueueItem, Settings, VideoMetadata};
use crate::services::events::{
    emit_event, EventSink, EVENT_VIDEO_ADMITTED, EVENT_VIDEO_REJECTED,
};
use crate::services::queue::QueueEngine;
use crate::services::youtube::{MetadataError, YouTubeClient};
use crate::services::SettingsManager;

static URL_REGEX: OnceLock<Regex> = OnceLock::new();
static VIDEO_ID_REGEX: OnceLock<Regex> = OnceLock::new();
static PLAYLIST_ID_REGEX: OnceLock<Regex> = OnceLock::new();

/// Requester name used for streamer-initiated manual adds
pub const MANUAL_REQUESTER: &str = "Streamer";

/// Which filter rejected a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterRejection {
    Amount,
    Views,
    Likes,
    Blacklist,
}

impl FilterRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterRejection::Amount => "amount",
            FilterRejection::Views => "views",
            FilterRejection::Likes => "likes",
            FilterRejection::Blacklist => "blacklist",
        }
    }
}

/// Video reference parsed out of a donation message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoRef {
    Video(String),
    Playlist(String),
}

/// Extract all URLs from a free-text message
pub fn extract_urls(message: &str) -> Vec<&str> {
    let re = URL_REGEX.get_or_init(|| Regex::new(r"https?://\S+").unwrap());
    re.find_iter(message).map(|m| m.as_str()).collect()
}

/// Resolve one URL to a video or playlist reference. A URL carrying both a
/// video id and a `list` parameter counts as a playlist.
pub fn parse_video_ref(url: &str) -> Option<VideoRef> {
    let playlist_re =
        PLAYLIST_ID_REGEX.get_or_init(|| Regex::new(r"[?&]list=([^#&?\s]+)").unwrap());
    if let Some(caps) = playlist_re.captures(url) {
        return Some(VideoRef::Playlist(caps[1].to_string()));
    }

    let video_re = VIDEO_ID_REGEX.get_or_init(|| {
        Regex::new(
            r#"(?:youtube\.com/(?:[^/]+/.+/|(?:v|e(?:mbed)?)/|shorts/|live/|.*[?&]v=)|youtu\.be/)([^"&?/\s]{11})"#,
        )
        .unwrap()
    });
    video_re
        .captures(url)
        .map(|caps| VideoRef::Video(caps[1].to_string()))
}

/// Apply the metadata filters in order: views, then likes, then blacklist.
/// Title matching is case-insensitive substring.
pub fn apply_metadata_filters(
    video: &VideoMetadata,
    settings: &Settings,
) -> Result<(), FilterRejection> {
    if video.view_count < settings.min_view_count {
        return Err(FilterRejection::Views);
    }
    if video.like_count < settings.min_like_count {
        return Err(FilterRejection::Likes);
    }

    let title = video.title.to_lowercase();
    for keyword in &settings.blacklisted_keywords {
        let keyword = keyword.trim();
        if !keyword.is_empty() && title.contains(&keyword.to_lowercase()) {
            return Err(FilterRejection::Blacklist);
        }
    }
    Ok(())
}

/// Metadata provider seam, so the pipeline is not tied to one platform client
#[async_trait]
pub trait VideoSource: Send + Sync {
    async fn fetch_video(&self, video_id: &str) -> Result<VideoMetadata, MetadataError>;
    async fn fetch_playlist_video_ids(&self, playlist_id: &str)
        -> Result<Vec<String>, MetadataError>;
}

#[async_trait]
impl VideoSource for YouTubeClient {
    async fn fetch_video(&self, video_id: &str) -> Result<VideoMetadata, MetadataError> {
        YouTubeClient::fetch_video(self, video_id).await
    }

    async fn fetch_playlist_video_ids(
        &self,
        playlist_id: &str,
    ) -> Result<Vec<String>, MetadataError> {
        YouTubeClient::fetch_playlist_video_ids(self, playlist_id).await
    }
}

pub struct AdmissionPipeline {
    settings: Arc<SettingsManager>,
    source: Arc<dyn VideoSource>,
    queue: Arc<QueueEngine>,
    event_sink: Arc<dyn EventSink>,
}

impl AdmissionPipeline {
    pub fn new(
        settings: Arc<SettingsManager>,
        source: Arc<dyn VideoSource>,
        queue: Arc<QueueEngine>,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            settings,
            source,
            queue,
            event_sink,
        }
    }

    /// Run a donation through the pipeline, enqueueing every surviving video.
    ///
    /// The amount threshold is checked before any metadata fetch; a donation
    /// below it never costs an API call. Only the first URL in the message is
    /// considered.
    pub async fn admit(&self, donation: &DonationEvent) -> Vec<QueueItem> {
        let settings = match self.settings.load() {
            Ok(s) => s,
            Err(e) => {
                warn!("Admission skipped, settings unavailable: {}", e);
                return Vec::new();
            }
        };

        if donation.amount < settings.min_donation_amount {
            debug!(
                "Donation from {} below threshold ({} < {})",
                donation.username, donation.amount, settings.min_donation_amount
            );
            emit_event(
                self.event_sink.as_ref(),
                EVENT_VIDEO_REJECTED,
                &serde_json::json!({
                    "reason": FilterRejection::Amount.as_str(),
                    "requester": donation.username,
                    "amount": donation.amount,
                }),
            );
            return Vec::new();
        }

        let Some(url) = extract_urls(&donation.message).into_iter().next() else {
            debug!("Donation from {} carries no URL", donation.username);
            return Vec::new();
        };

        self.admit_url(url, &donation.username, donation.amount, &settings)
            .await
    }

    /// Streamer-initiated add. Runs the same pipeline minus the amount filter.
    pub async fn admit_manual(&self, url: &str) -> Vec<QueueItem> {
        let settings = match self.settings.load() {
            Ok(s) => s,
            Err(e) => {
                warn!("Manual add skipped, settings unavailable: {}", e);
                return Vec::new();
            }
        };
        self.admit_url(url, MANUAL_REQUESTER, 0.0, &settings).await
    }

    async fn admit_url(
        &self,
        url: &str,
        requester: &str,
        amount: f64,
        settings: &Settings,
    ) -> Vec<QueueItem> {
        let candidate_ids = match parse_video_ref(url) {
            Some(VideoRef::Playlist(playlist_id)) => {
                match self.source.fetch_playlist_video_ids(&playlist_id).await {
                    Ok(ids) => ids,
                    Err(e) => {
                        warn!("Playlist {} expansion failed: {}", playlist_id, e);
                        return Vec::new();
                    }
                }
            }
            Some(VideoRef::Video(video_id)) => vec![video_id],
            None => {
                debug!("URL is not a recognized video link: {}", url);
                return Vec::new();
            }
        };

        let mut admitted = Vec::new();
        for video_id in candidate_ids {
            let video = match self.source.fetch_video(&video_id).await {
                Ok(video) => video,
                Err(e) => {
                    // One bad candidate never aborts its playlist siblings
                    warn!("Metadata fetch for {} failed: {}", video_id, e);
                    continue;
                }
            };

            match apply_metadata_filters(&video, settings) {
                Ok(()) => {
                    info!("Admitted '{}' requested by {}", video.title, requester);
                    let item = QueueItem::new(video, requester.to_string(), amount);
                    emit_event(self.event_sink.as_ref(), EVENT_VIDEO_ADMITTED, &item);
                    self.queue.enqueue(item.clone());
                    admitted.push(item);
                }
                Err(rejection) => {
                    info!(
                        "Rejected '{}' ({}) requested by {}",
                        video.title,
                        rejection.as_str(),
                        requester
                    );
                    emit_event(
                        self.event_sink.as_ref(),
                        EVENT_VIDEO_REJECTED,
                        &serde_json::json!({
                            "reason": rejection.as_str(),
                            "requester": requester,
                            "videoId": video.video_id,
                            "title": video.title,
                        }),
                    );
                }
            }
        }
        admitted
    }
}

/// Drain the listener's donation channel into the pipeline, in arrival
/// order. Stops when the sending side is dropped.
pub fn spawn_donation_worker(
    pipeline: Arc<AdmissionPipeline>,
    mut donation_rx: mpsc::UnboundedReceiver<DonationEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(donation) = donation_rx.recv().await {
            pipeline.admit(&donation).await;
        }
        debug!("Donation worker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::events::test_support::CollectingSink;
    use crate::services::events::NoopEventSink;
    use std::collections::HashMap;
    use std::path::PathBuf;

    struct StubSource {
        videos: HashMap<String, VideoMetadata>,
        playlists: HashMap<String, Vec<String>>,
    }

    #[async_trait]
    impl VideoSource for StubSource {
        async fn fetch_video(&self, video_id: &str) -> Result<VideoMetadata, MetadataError> {
            self.videos
                .get(video_id)
                .cloned()
                .ok_or(MetadataError::NotFound)
        }

        async fn fetch_playlist_video_ids(
            &self,
            playlist_id: &str,
        ) -> Result<Vec<String>, MetadataError> {
            self.playlists
                .get(playlist_id)
                .cloned()
                .ok_or(MetadataError::NotFound)
        }
    }

    fn video(id: &str, title: &str, views: u64, likes: u64) -> VideoMetadata {
        VideoMetadata {
            video_id: id.to_string(),
            url: format!("https://www.youtube.com/watch?v={id}"),
            title: title.to_string(),
            thumbnail: String::new(),
            duration: "PT3M33S".to_string(),
            view_count: views,
            like_count: likes,
        }
    }

    fn pipeline(
        source: StubSource,
        sink: Arc<dyn EventSink>,
    ) -> (AdmissionPipeline, Arc<QueueEngine>, PathBuf) {
        let dir = std::env::temp_dir().join(format!("jukebox-admit-{}", uuid::Uuid::new_v4()));
        let settings = Arc::new(SettingsManager::new(dir.clone()));
        let mut s = settings.load().unwrap();
        s.min_donation_amount = 100.0;
        s.min_view_count = 1000;
        s.min_like_count = 100;
        s.blacklisted_keywords = vec!["nightcore".to_string()];
        settings.save(&s).unwrap();

        let queue = Arc::new(QueueEngine::new(50, sink.clone()));
        let pipeline = AdmissionPipeline::new(settings, Arc::new(source), queue.clone(), sink);
        (pipeline, queue, dir)
    }

    #[test]
    fn extracts_video_and_playlist_refs() {
        assert_eq!(
            parse_video_ref("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
            Some(VideoRef::Video("dQw4w9WgXcQ".to_string()))
        );
        assert_eq!(
            parse_video_ref("https://youtu.be/dQw4w9WgXcQ?t=42"),
            Some(VideoRef::Video("dQw4w9WgXcQ".to_string()))
        );
        assert_eq!(
            parse_video_ref("https://www.youtube.com/shorts/abcDEF12345"),
            Some(VideoRef::Video("abcDEF12345".to_string()))
        );
        // A watch URL with a list parameter is a playlist
        assert_eq!(
            parse_video_ref("https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PLxyz"),
            Some(VideoRef::Playlist("PLxyz".to_string()))
        );
        assert_eq!(parse_video_ref("https://example.com/not-a-video"), None);
    }

    #[test]
    fn finds_first_url_in_message() {
        let urls = extract_urls("play this https://youtu.be/dQw4w9WgXcQ please");
        assert_eq!(urls, ["https://youtu.be/dQw4w9WgXcQ"]);
        assert!(extract_urls("no links here").is_empty());
    }

    #[test]
    fn metadata_filters_run_in_order() {
        let settings = Settings {
            min_view_count: 1000,
            min_like_count: 100,
            blacklisted_keywords: vec!["Nightcore".to_string()],
            ..Settings::default()
        };

        let ok = video("a", "Fine Video", 5000, 500);
        assert!(apply_metadata_filters(&ok, &settings).is_ok());

        let low_views = video("b", "Nightcore Mix", 10, 5);
        assert_eq!(
            apply_metadata_filters(&low_views, &settings),
            Err(FilterRejection::Views)
        );

        let low_likes = video("c", "Quiet Video", 5000, 5);
        assert_eq!(
            apply_metadata_filters(&low_likes, &settings),
            Err(FilterRejection::Likes)
        );

        // Case-insensitive title match
        let blacklisted = video("d", "Best NIGHTCORE ever", 5000, 500);
        assert_eq!(
            apply_metadata_filters(&blacklisted, &settings),
            Err(FilterRejection::Blacklist)
        );
    }

    #[tokio::test]
    async fn admits_a_qualifying_donation() {
        let mut videos = HashMap::new();
        videos.insert(
            "dQw4w9WgXcQ".to_string(),
            video("dQw4w9WgXcQ", "Never Gonna Give You Up", 1_000_000, 50_000),
        );
        let sink = Arc::new(CollectingSink::default());
        let (pipeline, queue, dir) = pipeline(
            StubSource {
                videos,
                playlists: HashMap::new(),
            },
            sink.clone(),
        );

        let donation = DonationEvent::test(
            "viewer",
            150.0,
            "take this https://www.youtube.com/watch?v=dQw4w9WgXcQ",
        );
        let admitted = pipeline.admit(&donation).await;

        assert_eq!(admitted.len(), 1);
        assert_eq!(admitted[0].requester, "viewer");
        assert_eq!(admitted[0].amount, 150.0);
        // Empty queue, so it went straight to playback
        assert_eq!(queue.current().unwrap().video.video_id, "dQw4w9WgXcQ");
        assert!(sink.names().contains(&EVENT_VIDEO_ADMITTED.to_string()));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn below_threshold_donation_never_fetches() {
        let sink = Arc::new(CollectingSink::default());
        // Empty source: any fetch attempt would reject with NotFound, but the
        // amount gate must return before that
        let (pipeline, queue, dir) = pipeline(
            StubSource {
                videos: HashMap::new(),
                playlists: HashMap::new(),
            },
            sink.clone(),
        );

        let donation =
            DonationEvent::test("viewer", 50.0, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        let admitted = pipeline.admit(&donation).await;

        assert!(admitted.is_empty());
        assert!(queue.current().is_none());
        assert!(sink.names().contains(&EVENT_VIDEO_REJECTED.to_string()));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn playlist_expands_in_order_and_drops_failing_members() {
        let mut videos = HashMap::new();
        videos.insert("aaaaaaaaaaa".to_string(), video("aaaaaaaaaaa", "First", 5000, 500));
        videos.insert("bbbbbbbbbbb".to_string(), video("bbbbbbbbbbb", "Second", 10, 5));
        videos.insert("ccccccccccc".to_string(), video("ccccccccccc", "Third", 5000, 500));
        let mut playlists = HashMap::new();
        playlists.insert(
            "PLtest".to_string(),
            vec![
                "aaaaaaaaaaa".to_string(),
                "bbbbbbbbbbb".to_string(),
                "ccccccccccc".to_string(),
            ],
        );
        let (pipeline, queue, dir) = pipeline(
            StubSource { videos, playlists },
            Arc::new(NoopEventSink),
        );

        let donation = DonationEvent::test(
            "viewer",
            200.0,
            "https://www.youtube.com/playlist?list=PLtest",
        );
        let admitted = pipeline.admit(&donation).await;

        // Middle video fails the view filter; the rest keep playlist order
        assert_eq!(admitted.len(), 2);
        assert_eq!(admitted[0].video.title, "First");
        assert_eq!(admitted[1].video.title, "Third");
        assert_eq!(queue.current().unwrap().video.title, "First");
        assert_eq!(queue.len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn message_without_url_admits_nothing() {
        let (pipeline, queue, dir) = pipeline(
            StubSource {
                videos: HashMap::new(),
                playlists: HashMap::new(),
            },
            Arc::new(NoopEventSink),
        );

        let donation = DonationEvent::test("viewer", 500.0, "thanks for the stream!");
        assert!(pipeline.admit(&donation).await.is_empty());
        assert!(queue.current().is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn worker_admits_donations_in_arrival_order() {
        let mut videos = HashMap::new();
        videos.insert("aaaaaaaaaaa".to_string(), video("aaaaaaaaaaa", "First", 5000, 500));
        videos.insert("bbbbbbbbbbb".to_string(), video("bbbbbbbbbbb", "Second", 5000, 500));
        let (pipeline, queue, dir) = pipeline(
            StubSource {
                videos,
                playlists: HashMap::new(),
            },
            Arc::new(NoopEventSink),
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_donation_worker(Arc::new(pipeline), rx);
        tx.send(DonationEvent::test(
            "a",
            200.0,
            "https://youtu.be/aaaaaaaaaaa",
        ))
        .unwrap();
        tx.send(DonationEvent::test(
            "b",
            200.0,
            "https://youtu.be/bbbbbbbbbbb",
        ))
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(queue.current().unwrap().video.title, "First");
        assert_eq!(queue.snapshot().queue[0].video.title, "Second");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn manual_add_skips_amount_filter_but_not_metadata() {
        let mut videos = HashMap::new();
        videos.insert(
            "dQw4w9WgXcQ".to_string(),
            video("dQw4w9WgXcQ", "Never Gonna Give You Up", 1_000_000, 50_000),
        );
        videos.insert("bbbbbbbbbbb".to_string(), video("bbbbbbbbbbb", "Obscure", 10, 5));
        let (pipeline, _, dir) = pipeline(
            StubSource {
                videos,
                playlists: HashMap::new(),
            },
            Arc::new(NoopEventSink),
        );

        let admitted = pipeline
            .admit_manual("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
            .await;
        assert_eq!(admitted.len(), 1);
        assert_eq!(admitted[0].requester, MANUAL_REQUESTER);
        assert_eq!(admitted[0].amount, 0.0);

        let rejected = pipeline
            .admit_manual("https://www.youtube.com/watch?v=bbbbbbbbbbb")
            .await;
        assert!(rejected.is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }
}
