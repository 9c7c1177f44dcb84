//! WebSocket handler
//!
//! One socket per device. The reader loop never blocks on the pipeline:
//! binary frames go through the pipe's drop-on-full queue, text frames are
//! parsed and dispatched, and unparseable messages are dropped with a log
//! line rather than closing the session.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use uuid::Uuid;

use voicelink_core::AudioFormat;

use crate::protocol::{AudioParams, ClientMessage, ListenState, ServerMessage};
use crate::session::Session;
use crate::state::AppState;
use crate::transport::{Outbound, WsLink};

/// How long a fresh connection may take to say hello.
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/voicelink/v1/", get(ws_handler))
        .with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

async fn handle_socket(socket: WebSocket, state: AppState, addr: SocketAddr) {
    let (mut sink, mut stream) = socket.split();
    let (link, mut outbound_rx) = WsLink::channel();
    let link = Arc::new(link);

    // Single writer task owns the sink.
    let writer = tokio::spawn(async move {
        while let Some(out) = outbound_rx.recv().await {
            let msg = match out {
                Outbound::Text(text) => Message::Text(text),
                Outbound::Binary(data) => Message::Binary(data),
            };
            if sink.send(msg).await.is_err() {
                return;
            }
        }
    });

    let Some((device_id, input_format)) = await_hello(&mut stream).await else {
        tracing::warn!(peer = %addr, "No hello received, closing");
        writer.abort();
        return;
    };

    let session = match state
        .sessions
        .open(
            &state,
            device_id.clone(),
            input_format,
            link.clone(),
            addr.ip().to_string(),
        )
        .await
    {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(device_id = %device_id, error = %e, "Session open failed");
            writer.abort();
            return;
        }
    };

    let hello = ServerMessage::Hello {
        session_id: session.session_id.clone(),
        transport: "websocket".into(),
        audio_params: AudioParams::from(session.output_format()),
    };
    if link.send_message(&hello).await.is_err() {
        state.sessions.close(&session.session_id).await;
        writer.abort();
        return;
    }

    loop {
        tokio::select! {
            _ = session.cancelled() => break,

            msg = stream.next() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Binary(frame) => session.push_audio(frame),
                    Message::Text(text) => handle_text(&session, &link, &text).await,
                    Message::Close(_) => break,
                    // Ping/pong handled by axum.
                    _ => {}
                }
            }
        }
    }

    tracing::info!(session_id = %session.session_id, "Transport closed");
    state.sessions.close(&session.session_id).await;
    writer.abort();
}

/// Read frames until a valid hello arrives (or the timeout trips).
async fn await_hello(
    stream: &mut (impl futures::Stream<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<(String, AudioFormat)> {
    let deadline = tokio::time::sleep(HELLO_TIMEOUT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => return None,
            msg = stream.next() => {
                let text = match msg? {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => return None,
                    Ok(_) => continue,
                    Err(_) => return None,
                };
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Hello { device_id, audio_params }) => {
                        let device_id = device_id
                            .unwrap_or_else(|| format!("anon-{}", Uuid::new_v4()));
                        let format = audio_params
                            .map(AudioFormat::from)
                            .unwrap_or_default();
                        return Some((device_id, format));
                    }
                    Ok(other) => {
                        tracing::debug!(?other, "Ignoring pre-hello message");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Unparseable pre-hello frame dropped");
                    }
                }
            }
        }
    }
}

async fn handle_text(session: &Arc<Session>, link: &Arc<WsLink>, text: &str) {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            // Protocol errors drop the message, never the session.
            tracing::warn!(error = %e, "Unparseable message dropped");
            return;
        }
    };

    match msg {
        ClientMessage::Listen { state, mode, text } => {
            if state == ListenState::Detect {
                session.handle_detect(text.as_deref().unwrap_or_default()).await;
            } else {
                session.handle_listen(state, mode);
            }
        }
        ClientMessage::Abort => session.abort().await,
        ClientMessage::Iot { payload } => {
            let _ = link.send_message(&ServerMessage::Iot { payload }).await;
        }
        ClientMessage::Hello { .. } => {
            tracing::debug!("Duplicate hello ignored");
        }
    }
}

/// Serve until shutdown. Uses connect-info so sessions know their peer IP.
pub async fn serve(state: AppState, port: u16) -> Result<(), std::io::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = create_router(state);
    tracing::info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Ctrl+C handler install failed");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler install failed")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
