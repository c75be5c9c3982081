//! Duplex audio protocol (§6): the connection handler that creates a
//! session in the Audio Session Registry (§4.B), starts the Audio
//! Persistence Worker (§4.C) and Live Transcription Worker (§4.D) against
//! the Stream Bus (§4.A), and enqueues the Speech-Detection Controller
//! (§4.F).
//!
//! `WebSocketUpgrade` → `on_upgrade` → split sender/receiver event loop,
//! matching on `Message` variants to parse this protocol's
//! header-frame-plus-binary-payload wire format.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use domain::{AudioChunkEnvelope, AudioMode, CompletionReason, JobMeta, Queue, Session};
use futures::{SinkExt, StreamExt};
use scheduler::EnqueueRequest;
use serde::{Deserialize, Serialize};
use services::audio_persistence::AudioPersistenceWorker;
use services::jobs;
use services::live_transcription::LiveTranscriptionWorker;
use services::Runtime;
use streambus::StreamName;
use tracing::{info, warn};
use uuid::Uuid;

use crate::middleware::Principal;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListenQuery {
    pub client_id: Option<String>,
    #[serde(default)]
    pub diarize: bool,
}

/// Header frames (sent as WebSocket `Text` messages) framing the protocol
/// (§6). `audio-chunk` always precedes exactly one `Binary` message
/// carrying the raw PCM payload described by the header.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum ClientHeader {
    AudioStart {
        rate: u32,
        width: u8,
        channels: u8,
        mode: AudioMode,
    },
    AudioChunk {
        rate: u32,
        width: u8,
        channels: u8,
    },
    AudioStop {},
    Ping {},
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum ServerHeader<'a> {
    Ready { session_id: Uuid },
    Error { message: &'a str },
}

pub async fn listen_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<ListenQuery>,
    principal: Principal,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_duplex_socket(socket, state.runtime, query, principal))
}

async fn handle_duplex_socket(socket: WebSocket, runtime: Runtime, query: ListenQuery, principal: Principal) {
    let session_id = Uuid::new_v4();
    let client_id = query.client_id.unwrap_or_else(|| principal.user_id.to_string());

    let session = Session::new(session_id, client_id.clone(), principal.user_id);
    if let Err(e) = runtime.session_registry.create(session).await {
        warn!(%session_id, error = %e, "duplex: failed to create session, dropping connection");
        return;
    }

    let (mut sender, mut receiver) = socket.split();
    if send_header(&mut sender, &ServerHeader::Ready { session_id }).await.is_err() {
        return;
    }

    if let Err(e) = enqueue_speech_detection(&runtime, session_id, &client_id).await {
        warn!(%session_id, error = %e, "duplex: failed to enqueue speech detection");
    }

    let mut persistence_task = None;
    let mut transcription_task = None;
    let mut pending_chunk: Option<(u32, u8, u8)> = None;
    let stream = StreamName::AudioBytes(session_id.to_string());

    while let Some(message) = receiver.next().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                info!(%session_id, error = %e, "duplex: socket read failed");
                break;
            }
        };

        match message {
            Message::Text(text) => match serde_json::from_str::<ClientHeader>(&text) {
                Ok(ClientHeader::AudioStart { rate, width, channels, mode: _ }) => {
                    pending_chunk = None;
                    if persistence_task.is_none() {
                        let worker = AudioPersistenceWorker::new(&runtime);
                        persistence_task = Some(tokio::spawn(async move {
                            worker.run(session_id).await;
                        }));
                        let live_worker = LiveTranscriptionWorker::new(&runtime);
                        let client_id = client_id.clone();
                        let diarize = query.diarize;
                        transcription_task = Some(tokio::spawn(async move {
                            live_worker.run(session_id, client_id, rate, diarize).await;
                        }));
                    }
                    let _ = (width, channels);
                }
                Ok(ClientHeader::AudioChunk { rate, width, channels }) => {
                    pending_chunk = Some((rate, width, channels));
                }
                Ok(ClientHeader::AudioStop {}) => {
                    let _ = runtime
                        .session_registry
                        .finalize(session_id, CompletionReason::UserStopped)
                        .await;
                    break;
                }
                Ok(ClientHeader::Ping {}) => {}
                Err(e) => {
                    warn!(%session_id, error = %e, "duplex: malformed header frame");
                    let _ = send_header(&mut sender, &ServerHeader::Error { message: "malformed header" }).await;
                }
            },
            Message::Binary(payload) => {
                let Some((rate, width, channels)) = pending_chunk.take() else {
                    warn!(%session_id, "duplex: binary frame with no preceding audio-chunk header, dropping");
                    continue;
                };
                let envelope = AudioChunkEnvelope {
                    sample_rate: rate,
                    width,
                    channels,
                    payload: payload.into(),
                };
                match serde_json::to_vec(&envelope) {
                    Ok(bytes) => {
                        if let Err(e) = runtime.stream_bus.append(&stream, bytes).await {
                            warn!(%session_id, error = %e, "duplex: failed to append audio chunk");
                        }
                    }
                    Err(e) => warn!(%session_id, error = %e, "duplex: failed to serialize audio chunk"),
                }
            }
            Message::Close(_) => {
                break;
            }
            Message::Ping(data) => {
                if sender.send(Message::Pong(data)).await.is_err() {
                    break;
                }
            }
            Message::Pong(_) => {}
        }
    }

    finalize_session(&runtime, session_id).await;

    if let Some(task) = persistence_task {
        let _ = task.await;
    }
    if let Some(task) = transcription_task {
        let _ = task.await;
    }

    let _ = runtime.session_registry.complete(session_id).await;
    let _ = runtime.session_registry.expire_after(session_id, 3600).await;
}

/// A clean `audio-stop` already finalized the session above; anything else
/// that ends the read loop (socket error, `Close`, EOF) is a lost peer.
async fn finalize_session(runtime: &Runtime, session_id: Uuid) {
    match runtime.session_registry.get(session_id).await {
        Ok(Some(session)) if session.is_active() => {
            let _ = runtime
                .session_registry
                .finalize(session_id, CompletionReason::WebsocketDisconnect)
                .await;
        }
        _ => {}
    }
}

async fn enqueue_speech_detection(runtime: &Runtime, session_id: Uuid, client_id: &str) -> anyhow::Result<()> {
    let meta = JobMeta {
        audio_uuid: Some(session_id),
        client_id: Some(client_id.to_string()),
        ..Default::default()
    };
    let request = EnqueueRequest {
        queue: Queue::Default,
        function: jobs::SPEECH_DETECTION.to_string(),
        args: serde_json::json!({"session_id": session_id}),
        timeout_secs: runtime.config.jobs.speech_detection_secs,
        result_ttl_secs: runtime.config.jobs.result_ttl_secs,
        meta,
        ..Default::default()
    };
    runtime.scheduler.enqueue(request).await?;
    Ok(())
}

async fn send_header(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    header: &ServerHeader<'_>,
) -> Result<(), ()> {
    let json = serde_json::to_string(header).map_err(|_| ())?;
    sender.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_audio_start_header() {
        let header: ClientHeader =
            serde_json::from_str(r#"{"type":"audio-start","rate":16000,"width":2,"channels":1,"mode":"streaming"}"#)
                .unwrap();
        match header {
            ClientHeader::AudioStart { rate, width, channels, .. } => {
                assert_eq!(rate, 16000);
                assert_eq!(width, 2);
                assert_eq!(channels, 1);
            }
            other => panic!("expected AudioStart, got {other:?}"),
        }
    }

    #[test]
    fn parses_audio_chunk_and_stop_and_ping() {
        let chunk: ClientHeader = serde_json::from_str(r#"{"type":"audio-chunk","rate":16000,"width":2,"channels":1}"#).unwrap();
        assert!(matches!(chunk, ClientHeader::AudioChunk { rate: 16000, width: 2, channels: 1 }));

        let stop: ClientHeader = serde_json::from_str(r#"{"type":"audio-stop"}"#).unwrap();
        assert!(matches!(stop, ClientHeader::AudioStop {}));

        let ping: ClientHeader = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(ping, ClientHeader::Ping {}));
    }

    #[test]
    fn rejects_unknown_header_type() {
        let result: Result<ClientHeader, _> = serde_json::from_str(r#"{"type":"not-a-real-header"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn server_ready_header_serializes_with_tagged_type() {
        let session_id = Uuid::new_v4();
        let json = serde_json::to_string(&ServerHeader::Ready { session_id }).unwrap();
        assert!(json.contains(r#""type":"ready""#));
        assert!(json.contains(&session_id.to_string()));
    }
}
