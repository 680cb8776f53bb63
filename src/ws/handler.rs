//! WebSocket upgrade handler and per-connection message loop

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::SessionCommand;
use crate::http::middleware::verify_jwt;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT token for authentication
    pub token: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    // Verify JWT token before upgrading
    match verify_jwt(&query.token, &state.config.jwt_secret) {
        Ok(claims) => {
            info!(player_id = %claims.sub, "WebSocket upgrade for authenticated player");
            ws.on_upgrade(move |socket| handle_socket(socket, claims.sub, state))
        }
        Err(e) => {
            warn!(error = %e, "WebSocket auth failed");
            Response::builder()
                .status(401)
                .body("Unauthorized".into())
                .unwrap()
        }
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, player_id: Uuid, state: AppState) {
    let connection_id = Uuid::new_v4();
    info!(player_id = %player_id, connection_id = %connection_id, "new WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();

    // Register the outbound channel before anything can broadcast to us
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    state.registry.insert(connection_id, out_tx);
    if let Err(e) = state.registry.register(connection_id, player_id) {
        error!(connection_id = %connection_id, error = %e, "connection registration failed");
        state.registry.remove(connection_id);
        return;
    }

    state.registry.send_to_connection(
        connection_id,
        ServerMsg::Welcome {
            player_id,
            server_time: unix_millis(),
        },
    );

    // Writer task: registry channel -> WebSocket
    let writer_handle = tokio::spawn(write_loop(ws_sink, out_rx, connection_id));

    read_loop(ws_stream, connection_id, player_id, &state).await;

    // Cleanup on disconnect; `remove` is safe to race with a second call
    state.registry.remove(connection_id);
    writer_handle.abort();

    info!(player_id = %player_id, connection_id = %connection_id, "WebSocket connection closed");
}

async fn write_loop(
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::UnboundedReceiver<ServerMsg>,
    connection_id: Uuid,
) {
    while let Some(msg) = out_rx.recv().await {
        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(connection_id = %connection_id, error = %e, "WebSocket send failed");
            break;
        }
    }
}

/// Reader loop: WebSocket -> services
async fn read_loop(
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    connection_id: Uuid,
    player_id: Uuid,
    state: &AppState,
) {
    let rate_limiter = ConnectionRateLimiter::new();

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_message() {
                    warn!(player_id = %player_id, "rate limited inbound message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => {
                        dispatch(client_msg, connection_id, player_id, state).await;
                    }
                    Err(e) => {
                        debug!(player_id = %player_id, error = %e, "unparseable client message");
                        state.registry.send_to_connection(
                            connection_id,
                            ServerMsg::Error {
                                code: "unknown_message".to_string(),
                                message: "unrecognized or malformed message".to_string(),
                            },
                        );
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(player_id = %player_id, "received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(player_id = %player_id, "client initiated close");
                break;
            }
            Err(e) => {
                debug!(player_id = %player_id, error = %e, "WebSocket error");
                break;
            }
        }
    }
}

/// Route one decoded message to the owning service
async fn dispatch(msg: ClientMsg, connection_id: Uuid, player_id: Uuid, state: &AppState) {
    match msg {
        ClientMsg::QueueJoin { mode, console_id } => {
            match state.matchmaking.join(player_id, &mode, console_id).await {
                Ok(estimated_wait_seconds) => {
                    state.registry.send_to_connection(
                        connection_id,
                        ServerMsg::QueueAck {
                            mode,
                            estimated_wait_seconds,
                        },
                    );
                }
                Err(e) => send_error(state, connection_id, e.code(), &e.to_string()),
            }
        }
        ClientMsg::QueueLeave { mode } => match state.matchmaking.leave(player_id, &mode).await {
            Ok(()) => {
                state
                    .registry
                    .send_to_connection(connection_id, ServerMsg::QueueLeft { mode });
            }
            Err(e) => send_error(state, connection_id, e.code(), &e.to_string()),
        },
        ClientMsg::MatchReady { match_id } => {
            route_to_session(
                state,
                match_id,
                connection_id,
                SessionCommand::Ready {
                    connection_id,
                    player_id,
                },
            )
            .await;
        }
        ClientMsg::StateUpdate { match_id, delta } => {
            route_to_session(
                state,
                match_id,
                connection_id,
                SessionCommand::Apply {
                    connection_id,
                    player_id,
                    delta,
                },
            )
            .await;
        }
        ClientMsg::SyncRequest { match_id } => {
            route_to_session(
                state,
                match_id,
                connection_id,
                SessionCommand::Sync {
                    connection_id,
                    player_id,
                },
            )
            .await;
        }
    }
}

async fn route_to_session(
    state: &AppState,
    match_id: Uuid,
    connection_id: Uuid,
    cmd: SessionCommand,
) {
    let Some(handle) = state.engine.session(match_id) else {
        send_error(state, connection_id, "match_not_found", "no such match");
        return;
    };
    // A terminated session may still hold its registry slot briefly
    if !handle.send(cmd).await {
        send_error(state, connection_id, "match_not_found", "match has ended");
    }
}

fn send_error(state: &AppState, connection_id: Uuid, code: &str, message: &str) {
    state.registry.send_to_connection(
        connection_id,
        ServerMsg::Error {
            code: code.to_string(),
            message: message.to_string(),
        },
    );
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
