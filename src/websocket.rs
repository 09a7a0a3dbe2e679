//! # WebSocket Transport Session
//!
//! Owns the duplex message channel to the interview peer. Audio and control
//! signals travel as single-line JSON records:
//!
//! ## Message Format:
//! - **Client → Server**: `{"audio": "<base64>"}` for one transport frame of
//!   PCM16 audio; `{"audio": "<base64>", "end_of_turn": true}` for the
//!   synthetic silence marker.
//! - **Server → Client**: `{"error": "..."}`, `{"success": "..."}`,
//!   `{"turn_complete": true}`, `{"audio": "<base64>"}`.
//!
//! The connection target carries the session parameters (`name`, `gain`) as
//! query-string values. Inbound messages are dispatched by shape, in the
//! precedence order the peer defines: error, success, turn_complete, audio.
//! Anything unrecognized is a protocol anomaly and is ignored without any
//! state change.

use crate::audio::codec;
use crate::config::ConnectionConfig;
use crate::error::{AppError, AppResult};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use url::Url;

/// The exact `success` payload the peer sends when interview preparation is
/// complete. Other success strings are logged and ignored.
pub const READY_MARKER: &str = "Interview prepared successfully";

/// Outbound message: one frame of base64-encoded PCM16 audio, optionally
/// tagged as the end-of-turn silence marker.
#[derive(Debug, Serialize)]
pub struct ClientMessage {
    pub audio: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_of_turn: Option<bool>,
}

impl ClientMessage {
    /// A normal audio frame.
    pub fn audio(payload: String) -> Self {
        Self {
            audio: payload,
            end_of_turn: None,
        }
    }

    /// The synthetic silence frame that signals local turn completion.
    pub fn end_of_turn(payload: String) -> Self {
        Self {
            audio: payload,
            end_of_turn: Some(true),
        }
    }
}

/// Inbound message shape. All fields optional; dispatch picks the first
/// recognized field in the peer's precedence order.
#[derive(Debug, Deserialize)]
struct ServerMessage {
    #[serde(default)]
    error: Option<String>,

    #[serde(default)]
    success: Option<String>,

    #[serde(default)]
    turn_complete: Option<bool>,

    #[serde(default)]
    audio: Option<String>,
}

/// Transport-level events delivered to the session event loop.
#[derive(Debug)]
pub enum TransportEvent {
    /// Interview preparation complete; the session is live
    Ready,
    /// The peer finished its turn
    TurnComplete,
    /// One decoded PCM chunk of peer speech
    Audio(Vec<u8>),
    /// Explicit `{error}` message from the peer (fatal)
    PeerError(String),
    /// The channel closed or failed at the websocket level
    Closed { error: Option<String> },
}

/// Classify one inbound text frame.
///
/// Returns `None` for protocol anomalies: non-JSON text, unknown shapes,
/// unexpected success strings, falsy `turn_complete`, and audio payloads
/// that fail base64 decoding. None of these change session state.
fn classify_message(text: &str) -> Option<TransportEvent> {
    let msg: ServerMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(_) => {
            warn!("Ignoring non-JSON inbound message");
            return None;
        }
    };

    if let Some(error) = msg.error {
        return Some(TransportEvent::PeerError(error));
    }

    if let Some(success) = msg.success {
        if success == READY_MARKER {
            return Some(TransportEvent::Ready);
        }
        debug!("Ignoring unexpected success payload: {}", success);
        return None;
    }

    if msg.turn_complete == Some(true) {
        return Some(TransportEvent::TurnComplete);
    }

    if let Some(payload) = msg.audio {
        return match codec::decode_payload(&payload) {
            Ok(bytes) => Some(TransportEvent::Audio(bytes)),
            Err(e) => {
                warn!("Ignoring audio message with malformed payload: {}", e);
                None
            }
        };
    }

    debug!("Ignoring inbound message with no recognized field");
    None
}

/// A live transport session: the outbound sender, the inbound event stream,
/// and the pump/reader tasks behind them.
pub struct TransportSession {
    outbound_tx: mpsc::UnboundedSender<ClientMessage>,
    event_rx: mpsc::UnboundedReceiver<TransportEvent>,
    /// Tells the outbound pump to flush a close frame and stop
    close_tx: Option<oneshot::Sender<()>>,
    reader_task: JoinHandle<()>,
}

impl TransportSession {
    /// Open the channel with the session parameters encoded in the
    /// connection target (`?name=...&gain=...`).
    ///
    /// The socket is split into an outbound pump (messages are sent as
    /// produced, fire-and-forget, backpressure ignored) and an inbound
    /// reader that classifies each frame and forwards the event.
    pub async fn connect(connection: &ConnectionConfig) -> AppResult<Self> {
        let mut url = Url::parse(&connection.url)
            .map_err(|e| AppError::ConfigError(format!("invalid connection URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("name", &connection.participant_name)
            .append_pair("gain", &connection.gain.to_string());

        info!("Connecting to interview peer at {}", url);
        let (socket, _response) = connect_async(url.as_str()).await?;
        info!("WebSocket connection established");

        let (mut ws_tx, mut ws_rx) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();
        let (close_tx, mut close_rx) = oneshot::channel::<()>();

        // Outbound pump: serialize and send until the close signal arrives
        // or every sender is dropped, then close the socket politely.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = outbound_rx.recv() => {
                        let Some(message) = message else { break };
                        let text = match serde_json::to_string(&message) {
                            Ok(text) => text,
                            Err(e) => {
                                error!("Failed to serialize outbound message: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = ws_tx.send(Message::Text(text)).await {
                            warn!("Outbound send failed: {}", e);
                            break;
                        }
                    }
                    _ = &mut close_rx => break,
                }
            }
            let _ = ws_tx.send(Message::Close(None)).await;
            debug!("Outbound pump finished");
        });

        // Inbound reader: dispatch by message shape until close or error.
        let reader_task = tokio::spawn(async move {
            while let Some(incoming) = ws_rx.next().await {
                match incoming {
                    Ok(Message::Text(text)) => {
                        if let Some(event) = classify_message(&text) {
                            if event_tx.send(event).is_err() {
                                break;  // Session loop is gone
                            }
                        }
                    }
                    Ok(Message::Close(reason)) => {
                        info!("WebSocket closed by peer: {:?}", reason);
                        let _ = event_tx.send(TransportEvent::Closed { error: None });
                        return;
                    }
                    // Pings are answered by the protocol layer; binary frames
                    // are not part of this protocol.
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                    Ok(Message::Binary(_)) => {
                        warn!("Ignoring unexpected binary frame");
                    }
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        let _ = event_tx.send(TransportEvent::Closed {
                            error: Some(e.to_string()),
                        });
                        return;
                    }
                }
            }
            let _ = event_tx.send(TransportEvent::Closed { error: None });
        });

        Ok(Self {
            outbound_tx,
            event_rx,
            close_tx: Some(close_tx),
            reader_task,
        })
    }

    /// A clonable sender for outbound messages (used by the audio send path
    /// and the end-of-turn debouncer).
    pub fn outbound(&self) -> mpsc::UnboundedSender<ClientMessage> {
        self.outbound_tx.clone()
    }

    /// Receive the next transport event. `None` once the reader task has
    /// finished and all events are drained.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.event_rx.recv().await
    }

    /// Tear the transport down in bounded time: the pump flushes a close
    /// frame and stops; the reader is aborted outright. Safe to call twice.
    pub fn shutdown(&mut self) {
        if let Some(close) = self.close_tx.take() {
            let _ = close.send(());
        }
        self.reader_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_message_serialization() {
        let msg = ClientMessage::audio("QUJD".to_string());
        let json = serde_json::to_string(&msg).unwrap();
        // No end_of_turn key on ordinary frames
        assert_eq!(json, r#"{"audio":"QUJD"}"#);
    }

    #[test]
    fn test_end_of_turn_serialization() {
        let msg = ClientMessage::end_of_turn("QUJD".to_string());
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"audio":"QUJD","end_of_turn":true}"#);
    }

    #[test]
    fn test_classify_error_takes_precedence() {
        let event = classify_message(r#"{"error": "interview failed", "audio": "QUJD"}"#);
        assert!(matches!(event, Some(TransportEvent::PeerError(msg)) if msg == "interview failed"));
    }

    #[test]
    fn test_classify_ready_marker() {
        let text = format!(r#"{{"success": "{}"}}"#, READY_MARKER);
        assert!(matches!(classify_message(&text), Some(TransportEvent::Ready)));

        // Other success strings are anomalies
        assert!(classify_message(r#"{"success": "something else"}"#).is_none());
    }

    #[test]
    fn test_classify_turn_complete() {
        assert!(matches!(
            classify_message(r#"{"turn_complete": true}"#),
            Some(TransportEvent::TurnComplete)
        ));
        // Falsy turn_complete is ignored, as the peer treats it
        assert!(classify_message(r#"{"turn_complete": false}"#).is_none());
    }

    #[test]
    fn test_classify_audio_decodes_payload() {
        let payload = codec::encode_payload(&[1u8, 2, 3]);
        let text = format!(r#"{{"audio": "{}"}}"#, payload);
        match classify_message(&text) {
            Some(TransportEvent::Audio(bytes)) => assert_eq!(bytes, vec![1, 2, 3]),
            other => panic!("expected audio event, got {:?}", other),
        }
    }

    #[test]
    fn test_anomalies_are_ignored() {
        assert!(classify_message("not json at all").is_none());
        assert!(classify_message(r#"{"unknown": 42}"#).is_none());
        assert!(classify_message(r#"{"audio": "!!! not base64 !!!"}"#).is_none());
        assert!(classify_message(r#"{}"#).is_none());
    }
}
