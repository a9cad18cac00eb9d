//! Centrifugo websocket transport
//!
//! Speaks the Centrifugo client protocol used by the donation platform:
//! a connect frame authenticated by the session token, one subscribe frame
//! per channel, `{}` ping frames, and publication frames carrying donation
//! payloads.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::transport::{RealtimeTransport, TransportError, TransportResult};

const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Server-level ping frame; answered with the same bytes
const PING_FRAME: &str = "{}";

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Extract the server-assigned client id from a connect reply
fn parse_client_id(frame: &Value) -> Option<String> {
    frame["result"]["client"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Decode a publication frame into `(channel, payload)`.
///
/// Replies (frames with an id) and presence frames (join/leave info) return
/// `None`. The donation payload normally sits at `result.data.data`; older
/// frames put it directly under `result.data`.
fn extract_publication(frame: &Value) -> Option<(String, Value)> {
    if !frame["id"].is_null() {
        return None;
    }

    let result = &frame["result"];
    let channel = result["channel"].as_str()?.to_string();
    let data = &result["data"];

    if !data["info"]["user"].is_null() {
        return None;
    }

    if data["data"].is_object() {
        return Some((channel, data["data"].clone()));
    }
    if data.is_object() {
        return Some((channel, data.clone()));
    }
    None
}

pub struct CentrifugoTransport {
    write: Option<WsSink>,
    read: Option<WsSource>,
    next_id: u64,
}

impl CentrifugoTransport {
    pub fn new() -> Self {
        Self {
            write: None,
            read: None,
            next_id: 1,
        }
    }

    /// Read frames until the reply with the given id arrives, answering pings
    /// along the way.
    async fn await_reply(&mut self, id: u64) -> TransportResult<Value> {
        let reply = tokio::time::timeout(REPLY_TIMEOUT, async {
            loop {
                let read = self.read.as_mut().ok_or(TransportError::Disconnected)?;
                let frame = match read.next().await {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        warn!("Centrifugo read error during handshake: {}", e);
                        return Err(TransportError::Disconnected);
                    }
                    None => return Err(TransportError::Disconnected),
                };

                match frame {
                    Message::Text(text) => {
                        if text == PING_FRAME {
                            self.send_text(PING_FRAME.to_string()).await?;
                            continue;
                        }
                        let value: Value = match serde_json::from_str(&text) {
                            Ok(v) => v,
                            Err(e) => {
                                warn!("Invalid Centrifugo frame: {}", e);
                                continue;
                            }
                        };
                        if value["id"].as_u64() == Some(id) {
                            return Ok(value);
                        }
                    }
                    Message::Ping(data) => {
                        if let Some(write) = self.write.as_mut() {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                    }
                    Message::Close(_) => return Err(TransportError::Disconnected),
                    _ => {}
                }
            }
        })
        .await
        .map_err(|_| TransportError::Timeout)??;

        if !reply["error"].is_null() {
            return Err(TransportError::SubscribeFailed(reply["error"].to_string()));
        }
        Ok(reply)
    }

    async fn send_text(&mut self, text: String) -> TransportResult<()> {
        let write = self.write.as_mut().ok_or(TransportError::Disconnected)?;
        write
            .send(Message::Text(text))
            .await
            .map_err(|_| TransportError::Disconnected)
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl Default for CentrifugoTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RealtimeTransport for CentrifugoTransport {
    async fn connect(&mut self, url: &str, session_token: &str) -> TransportResult<String> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectFailed(format!("Websocket connect failed: {e}")))?;

        let (write, read) = ws_stream.split();
        self.write = Some(write);
        self.read = Some(read);
        self.next_id = 1;

        let id = self.take_id();
        let connect_frame = serde_json::json!({
            "params": { "token": session_token },
            "id": id,
        });
        self.send_text(connect_frame.to_string())
            .await
            .map_err(|_| TransportError::ConnectFailed("Failed to send connect frame".to_string()))?;

        let reply = self.await_reply(id).await.map_err(|e| match e {
            TransportError::Timeout => TransportError::Timeout,
            other => TransportError::ConnectFailed(other.to_string()),
        })?;

        parse_client_id(&reply).ok_or_else(|| {
            TransportError::ConnectFailed("Connect reply carries no client id".to_string())
        })
    }

    async fn subscribe(&mut self, channel: &str, token: &str) -> TransportResult<()> {
        let id = self.take_id();
        let subscribe_frame = serde_json::json!({
            "params": { "channel": channel, "token": token },
            "method": 1,
            "id": id,
        });
        self.send_text(subscribe_frame.to_string())
            .await
            .map_err(|_| TransportError::SubscribeFailed(format!("Failed to send subscribe for {channel}")))?;

        self.await_reply(id).await.map_err(|e| match e {
            TransportError::Timeout => TransportError::Timeout,
            TransportError::SubscribeFailed(msg) => TransportError::SubscribeFailed(msg),
            other => TransportError::SubscribeFailed(other.to_string()),
        })?;

        debug!("Subscribed to {}", channel);
        Ok(())
    }

    async fn next_publication(&mut self) -> Option<(String, Value)> {
        loop {
            let read = self.read.as_mut()?;
            let frame = match read.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    warn!("Centrifugo read error: {}", e);
                    return None;
                }
                None => return None,
            };

            match frame {
                Message::Text(text) => {
                    if text == PING_FRAME {
                        if self.send_text(PING_FRAME.to_string()).await.is_err() {
                            return None;
                        }
                        continue;
                    }
                    let value: Value = match serde_json::from_str(&text) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("Invalid Centrifugo frame: {}", e);
                            continue;
                        }
                    };
                    if let Some(publication) = extract_publication(&value) {
                        return Some(publication);
                    }
                }
                Message::Ping(data) => {
                    if let Some(write) = self.write.as_mut() {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                }
                Message::Close(_) => return None,
                _ => {}
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut write) = self.write.take() {
            let _ = write.send(Message::Close(None)).await;
        }
        self.read = None;
    }
}
