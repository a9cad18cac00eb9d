//! Donation listener
//!
//! Orchestrates one realtime session: fresh access token, user resolution,
//! transport connect, channel-token subscription, then a reader task that
//! forwards donation events until disconnect or connection loss. There is no
//! automatic reconnect; the host decides when to try again.

use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::mpsc;

use crate::models::{ConnectionStatus, DonationEvent};
use crate::services::auth::DonationAlertsAuth;
use crate::services::events::{
    emit_event, EventSink, EVENT_CHANNEL_PUBLICATION, EVENT_CONNECTION_STATUS,
    EVENT_DONATION_RECEIVED,
};

use super::centrifugo::CentrifugoTransport;
use super::transport::RealtimeTransport;

const CENTRIFUGO_URL: &str = "wss://centrifugo.donationalerts.com/connection/websocket";

const STATUS_DISCONNECTED: u8 = 0;
const STATUS_CONNECTING: u8 = 1;
const STATUS_CONNECTED: u8 = 2;

fn status_from_u8(value: u8) -> ConnectionStatus {
    match value {
        STATUS_CONNECTING => ConnectionStatus::Connecting,
        STATUS_CONNECTED => ConnectionStatus::Connected,
        _ => ConnectionStatus::Disconnected,
    }
}

/// Channels carrying realtime events for one account
fn channels_for_user(user_id: &str) -> Vec<String> {
    vec![
        format!("$alerts:donation_{user_id}"),
        format!("$goals:goal_{user_id}"),
        format!("$polls:poll_{user_id}"),
    ]
}

fn is_donation_channel(channel: &str) -> bool {
    channel.starts_with("$alerts:donation_")
}

/// Everything the listener needs from the auth side to open one session
pub struct RealtimeSession {
    pub user_id: String,
    /// Short-lived credential for the websocket connect frame
    pub socket_token: String,
    pub access_token: String,
}

/// Auth seam for the listener: token/user resolution and channel-token
/// minting, backed by `DonationAlertsAuth` in production.
#[async_trait]
pub trait SessionAuth: Send + Sync {
    async fn resolve_session(&self) -> Result<RealtimeSession, String>;

    async fn channel_tokens(
        &self,
        access_token: &str,
        channels: &[String],
        client_id: &str,
    ) -> Result<Vec<(String, String)>, String>;
}

#[async_trait]
impl SessionAuth for DonationAlertsAuth {
    async fn resolve_session(&self) -> Result<RealtimeSession, String> {
        let access_token = self.ensure_fresh_token().await.map_err(|e| e.to_string())?;
        let user = self
            .fetch_user(&access_token)
            .await
            .map_err(|e| e.to_string())?;
        Ok(RealtimeSession {
            user_id: user.id,
            socket_token: user.socket_connection_token,
            access_token,
        })
    }

    async fn channel_tokens(
        &self,
        access_token: &str,
        channels: &[String],
        client_id: &str,
    ) -> Result<Vec<(String, String)>, String> {
        self.subscribe_channels(access_token, channels, client_id)
            .await
            .map_err(|e| e.to_string())
    }
}

type TransportFactory = Box<dyn Fn() -> Box<dyn RealtimeTransport> + Send + Sync>;
type DisconnectSlot = Arc<StdMutex<Option<mpsc::Sender<()>>>>;

/// Realtime donation listener with an idempotent connect/disconnect surface
pub struct DonationListener {
    auth: Arc<dyn SessionAuth>,
    event_sink: Arc<dyn EventSink>,
    donation_tx: mpsc::UnboundedSender<DonationEvent>,
    status: Arc<AtomicU8>,
    /// Bumped on every connect and disconnect; a task whose generation no
    /// longer matches must not touch shared state
    generation: Arc<AtomicU64>,
    /// Session handoff slot. Generation check, tx store, and the status flip
    /// all happen under this lock so a disconnect cannot slip in between.
    disconnect_tx: DisconnectSlot,
    transport_factory: TransportFactory,
}

impl DonationListener {
    pub fn new(
        auth: Arc<DonationAlertsAuth>,
        event_sink: Arc<dyn EventSink>,
        donation_tx: mpsc::UnboundedSender<DonationEvent>,
    ) -> Self {
        Self::with_transport(auth, event_sink, donation_tx, || {
            Box::new(CentrifugoTransport::new())
        })
    }

    /// Construct with a custom auth seam and transport, used for alternative
    /// backends and tests.
    pub fn with_transport<F>(
        auth: Arc<dyn SessionAuth>,
        event_sink: Arc<dyn EventSink>,
        donation_tx: mpsc::UnboundedSender<DonationEvent>,
        transport_factory: F,
    ) -> Self
    where
        F: Fn() -> Box<dyn RealtimeTransport> + Send + Sync + 'static,
    {
        Self {
            auth,
            event_sink,
            donation_tx,
            status: Arc::new(AtomicU8::new(STATUS_DISCONNECTED)),
            generation: Arc::new(AtomicU64::new(0)),
            disconnect_tx: Arc::new(StdMutex::new(None)),
            transport_factory: Box::new(transport_factory),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        status_from_u8(self.status.load(Ordering::Relaxed))
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Establish the realtime session. A call while connecting or connected
    /// is a no-op; only the transition out of disconnected starts work.
    pub async fn connect(&self) -> Result<(), String> {
        if self
            .status
            .compare_exchange(
                STATUS_DISCONNECTED,
                STATUS_CONNECTING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            debug!("Donation listener already connecting or connected");
            return Ok(());
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.emit_status(ConnectionStatus::Connecting);

        match self.establish(generation).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Donation listener connect failed: {}", e);
                if self.generation.load(Ordering::SeqCst) == generation {
                    self.status.store(STATUS_DISCONNECTED, Ordering::SeqCst);
                    self.emit_status(ConnectionStatus::Disconnected);
                }
                Err(e)
            }
        }
    }

    async fn establish(&self, generation: u64) -> Result<(), String> {
        let session = self.auth.resolve_session().await?;

        let mut transport = (self.transport_factory)();
        let client_id = transport
            .connect(CENTRIFUGO_URL, &session.socket_token)
            .await
            .map_err(|e| e.to_string())?;

        let channels = channels_for_user(&session.user_id);
        let channel_tokens = self
            .auth
            .channel_tokens(&session.access_token, &channels, &client_id)
            .await?;

        let mut donation_subscribed = false;
        for (channel, token) in &channel_tokens {
            match transport.subscribe(channel, token).await {
                Ok(()) => {
                    if is_donation_channel(channel) {
                        donation_subscribed = true;
                    }
                }
                Err(e) if is_donation_channel(channel) => {
                    transport.disconnect().await;
                    return Err(format!("Donation channel subscribe failed: {e}"));
                }
                Err(e) => {
                    // Auxiliary channels are best-effort
                    warn!("Subscribe to {} failed: {}", channel, e);
                }
            }
        }
        if !donation_subscribed {
            transport.disconnect().await;
            return Err("No donation channel available for this account".to_string());
        }

        let (disconnect_tx, disconnect_rx) = mpsc::channel::<()>(1);
        if !self.commit_session(generation, disconnect_tx) {
            // A disconnect raced the handshake; this session is already stale
            transport.disconnect().await;
            return Ok(());
        }
        self.emit_status(ConnectionStatus::Connected);
        info!("Donation listener connected for user {}", session.user_id);

        self.spawn_reader(transport, disconnect_rx, generation);
        Ok(())
    }

    /// Hand the finished handshake over to the connected state, unless a
    /// disconnect already invalidated this generation. Runs entirely under
    /// the disconnect slot lock.
    fn commit_session(&self, generation: u64, disconnect_tx: mpsc::Sender<()>) -> bool {
        let mut guard = self
            .disconnect_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        *guard = Some(disconnect_tx);
        self.status.store(STATUS_CONNECTED, Ordering::SeqCst);
        true
    }

    fn spawn_reader(
        &self,
        mut transport: Box<dyn RealtimeTransport>,
        mut disconnect_rx: mpsc::Receiver<()>,
        generation: u64,
    ) {
        let donation_tx = self.donation_tx.clone();
        let event_sink = self.event_sink.clone();
        let status = self.status.clone();
        let current_generation = self.generation.clone();
        let disconnect_slot = self.disconnect_tx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = disconnect_rx.recv() => {
                        transport.disconnect().await;
                        break;
                    }
                    publication = transport.next_publication() => {
                        let Some((channel, payload)) = publication else {
                            warn!("Donation stream ended");
                            break;
                        };

                        if !is_donation_channel(&channel) {
                            debug!("Publication on {}", channel);
                            emit_event(
                                event_sink.as_ref(),
                                EVENT_CHANNEL_PUBLICATION,
                                &serde_json::json!({
                                    "channel": channel,
                                    "payload": payload,
                                }),
                            );
                            continue;
                        }

                        let donation = DonationEvent::from_payload(&payload);
                        info!(
                            "Donation from {}: {} {}",
                            donation.username, donation.amount, donation.currency
                        );
                        emit_event(event_sink.as_ref(), EVENT_DONATION_RECEIVED, &donation);
                        if donation_tx.send(donation).is_err() {
                            warn!("Donation receiver dropped, stopping listener");
                            break;
                        }
                    }
                }
            }

            let report = {
                let mut guard = disconnect_slot
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if current_generation.load(Ordering::SeqCst) == generation {
                    guard.take();
                    status.store(STATUS_DISCONNECTED, Ordering::SeqCst);
                    true
                } else {
                    false
                }
            };
            if report {
                emit_event(
                    event_sink.as_ref(),
                    EVENT_CONNECTION_STATUS,
                    &serde_json::json!({ "status": ConnectionStatus::Disconnected.as_str() }),
                );
            }
            info!("Donation listener task stopped");
        });
    }

    /// Tear down the session. Safe to call in any state, including mid-connect.
    pub async fn disconnect(&self) {
        let (tx, was_active) = {
            let mut guard = self
                .disconnect_tx
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            self.generation.fetch_add(1, Ordering::SeqCst);
            let tx = guard.take();
            let previous = self.status.swap(STATUS_DISCONNECTED, Ordering::SeqCst);
            (tx, previous != STATUS_DISCONNECTED)
        };

        if let Some(tx) = tx {
            let _ = tx.send(()).await;
        }
        if was_active {
            self.emit_status(ConnectionStatus::Disconnected);
            info!("Donation listener disconnected");
        }
    }

    fn emit_status(&self, status: ConnectionStatus) {
        emit_event(
            self.event_sink.as_ref(),
            EVENT_CONNECTION_STATUS,
            &serde_json::json!({ "status": status.as_str() }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::events::test_support::CollectingSink;
    use crate::services::realtime::transport::{TransportError, TransportResult};
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct FailingAuth;

    #[async_trait]
    impl SessionAuth for FailingAuth {
        async fn resolve_session(&self) -> Result<RealtimeSession, String> {
            Err("DonationAlerts client credentials are not configured".to_string())
        }

        async fn channel_tokens(
            &self,
            _access_token: &str,
            _channels: &[String],
            _client_id: &str,
        ) -> Result<Vec<(String, String)>, String> {
            Err("unreachable".to_string())
        }
    }

    struct StubAuth;

    #[async_trait]
    impl SessionAuth for StubAuth {
        async fn resolve_session(&self) -> Result<RealtimeSession, String> {
            Ok(RealtimeSession {
                user_id: "42".to_string(),
                socket_token: "socket-token".to_string(),
                access_token: "access-token".to_string(),
            })
        }

        async fn channel_tokens(
            &self,
            _access_token: &str,
            channels: &[String],
            _client_id: &str,
        ) -> Result<Vec<(String, String)>, String> {
            Ok(channels
                .iter()
                .map(|c| (c.clone(), format!("token-{c}")))
                .collect())
        }
    }

    /// Holds the handshake open until released, then streams the scripted
    /// publications and pends forever.
    struct GatedTransport {
        release: Arc<Notify>,
        frames: Vec<(String, Value)>,
    }

    #[async_trait]
    impl RealtimeTransport for GatedTransport {
        async fn connect(&mut self, _url: &str, _session_token: &str) -> TransportResult<String> {
            self.release.notified().await;
            Ok("client-1".to_string())
        }

        async fn subscribe(&mut self, _channel: &str, _token: &str) -> TransportResult<()> {
            Ok(())
        }

        async fn next_publication(&mut self) -> Option<(String, Value)> {
            if self.frames.is_empty() {
                futures_util::future::pending::<()>().await;
            }
            Some(self.frames.remove(0))
        }

        async fn disconnect(&mut self) {}
    }

    struct FailingTransport;

    #[async_trait]
    impl RealtimeTransport for FailingTransport {
        async fn connect(&mut self, _url: &str, _session_token: &str) -> TransportResult<String> {
            Err(TransportError::ConnectFailed("unreachable".to_string()))
        }

        async fn subscribe(&mut self, _channel: &str, _token: &str) -> TransportResult<()> {
            Ok(())
        }

        async fn next_publication(&mut self) -> Option<(String, Value)> {
            None
        }

        async fn disconnect(&mut self) {}
    }

    fn failing_listener(sink: Arc<CollectingSink>) -> DonationListener {
        let (donation_tx, _donation_rx) = mpsc::unbounded_channel();
        DonationListener::with_transport(Arc::new(FailingAuth), sink, donation_tx, || {
            Box::new(FailingTransport)
        })
    }

    #[test]
    fn donation_channels_follow_account_id() {
        assert_eq!(
            channels_for_user("42"),
            [
                "$alerts:donation_42",
                "$goals:goal_42",
                "$polls:poll_42"
            ]
        );
        assert!(is_donation_channel("$alerts:donation_42"));
        assert!(!is_donation_channel("$goals:goal_42"));
    }

    #[tokio::test]
    async fn failed_connect_returns_to_disconnected() {
        let sink = Arc::new(CollectingSink::default());
        let listener = failing_listener(sink.clone());
        assert_eq!(listener.status(), ConnectionStatus::Disconnected);

        let result = listener.connect().await;
        assert!(result.is_err());
        assert_eq!(listener.status(), ConnectionStatus::Disconnected);

        // Both transitions were reported
        let names = sink.names();
        assert_eq!(
            names
                .iter()
                .filter(|n| *n == EVENT_CONNECTION_STATUS)
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn disconnect_when_idle_is_a_noop() {
        let sink = Arc::new(CollectingSink::default());
        let listener = failing_listener(sink.clone());

        listener.disconnect().await;
        listener.disconnect().await;

        assert_eq!(listener.status(), ConnectionStatus::Disconnected);
        assert!(sink.names().is_empty());
    }

    #[tokio::test]
    async fn double_connect_opens_exactly_one_session() {
        let sink = Arc::new(CollectingSink::default());
        let (donation_tx, _donation_rx) = mpsc::unbounded_channel();
        let release = Arc::new(Notify::new());
        let opened = Arc::new(AtomicUsize::new(0));

        let listener = {
            let release = release.clone();
            let opened = opened.clone();
            Arc::new(DonationListener::with_transport(
                Arc::new(StubAuth),
                sink.clone(),
                donation_tx,
                move || {
                    opened.fetch_add(1, Ordering::SeqCst);
                    Box::new(GatedTransport {
                        release: release.clone(),
                        frames: Vec::new(),
                    })
                },
            ))
        };

        // First attempt parks inside the transport handshake
        let first = tokio::spawn({
            let listener = listener.clone();
            async move { listener.connect().await }
        });
        while opened.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(listener.status(), ConnectionStatus::Connecting);

        // Second call while the first is pending is a silent no-op
        assert!(listener.connect().await.is_ok());
        assert_eq!(opened.load(Ordering::SeqCst), 1);

        release.notify_one();
        first.await.unwrap().unwrap();

        assert_eq!(listener.status(), ConnectionStatus::Connected);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        // One connecting + one connected transition, nothing from the no-op
        assert_eq!(
            sink.names()
                .iter()
                .filter(|n| *n == EVENT_CONNECTION_STATUS)
                .count(),
            2
        );
        listener.disconnect().await;
    }

    #[tokio::test]
    async fn disconnect_during_handshake_discards_the_late_session() {
        let sink = Arc::new(CollectingSink::default());
        let listener = failing_listener(sink);

        // The handshake read this generation before disconnect() ran
        listener.status.store(STATUS_CONNECTING, Ordering::SeqCst);
        let generation = listener.generation.fetch_add(1, Ordering::SeqCst) + 1;

        listener.disconnect().await;

        // The late commit must be refused and leave the state torn down
        let (disconnect_tx, _disconnect_rx) = mpsc::channel::<()>(1);
        assert!(!listener.commit_session(generation, disconnect_tx));
        assert_eq!(listener.status(), ConnectionStatus::Disconnected);
        assert!(listener
            .disconnect_tx
            .lock()
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn forwards_donations_and_reemits_auxiliary_publications() {
        let sink = Arc::new(CollectingSink::default());
        let (donation_tx, mut donation_rx) = mpsc::unbounded_channel();
        let release = Arc::new(Notify::new());
        release.notify_one();

        let listener = {
            let release = release.clone();
            DonationListener::with_transport(
                Arc::new(StubAuth),
                sink.clone(),
                donation_tx,
                move || {
                    Box::new(GatedTransport {
                        release: release.clone(),
                        frames: vec![
                            (
                                "$goals:goal_42".to_string(),
                                serde_json::json!({ "progress": 10 }),
                            ),
                            (
                                "$alerts:donation_42".to_string(),
                                serde_json::json!({
                                    "username": "viewer",
                                    "amount": 150,
                                    "currency": "RUB",
                                    "message": "hi",
                                }),
                            ),
                        ],
                    })
                },
            )
        };

        listener.connect().await.unwrap();
        assert_eq!(listener.status(), ConnectionStatus::Connected);

        // The goal frame precedes the donation, so once the donation arrives
        // the auxiliary publication has been re-emitted
        let donation = donation_rx.recv().await.unwrap();
        assert_eq!(donation.username, "viewer");
        assert_eq!(donation.amount, 150.0);

        let names = sink.names();
        assert!(names.contains(&EVENT_CHANNEL_PUBLICATION.to_string()));
        assert!(names.contains(&EVENT_DONATION_RECEIVED.to_string()));
        listener.disconnect().await;
    }
}
