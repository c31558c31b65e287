//! WebSocket gateway.
//!
//! Translates client JSON frames into [`PresenceService`] calls and drains
//! the per-connection outbound channel back to the socket. The gateway is
//! the error boundary: any operation failure becomes an `operation-error`
//! event delivered to the originating connection only, and never tears the
//! socket down.
//!
//! Identity is connection-scoped. A socket authenticates its presence by
//! joining; the gateway remembers the resulting session context locally and
//! stamps it onto subsequent chat and typing frames.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::actors::ConnectionActorHandle;
use crate::errors::PcError;
use crate::events::Event;
use crate::service::PresenceService;

/// Buffer between the connection actor and the socket send task. Matches
/// the connection actor's own mailbox depth so a stalled client saturates
/// both before deliveries start dropping.
const OUTBOUND_CHANNEL_BUFFER: usize = 200;

/// Inbound client frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    Join {
        meeting_id: String,
        user_id: String,
        #[serde(default)]
        display_name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Leave { meeting_id: String },
    #[serde(rename_all = "camelCase")]
    ChatMessage { meeting_id: String, text: String },
    #[serde(rename_all = "camelCase")]
    TypingStart { meeting_id: String },
    #[serde(rename_all = "camelCase")]
    TypingStop { meeting_id: String },
}

/// Identity established by a successful join, held per socket.
#[derive(Debug, Clone)]
struct SessionContext {
    meeting_id: String,
    user_id: String,
    display_name: Option<String>,
}

/// Build the WebSocket router.
pub fn router(service: PresenceService) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(service)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(service): State<PresenceService>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, service))
}

async fn handle_socket(socket: WebSocket, service: PresenceService) {
    let connection_id = Uuid::new_v4().to_string();

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Event>(OUTBOUND_CHANNEL_BUFFER);

    let connection = match service
        .on_connect(connection_id.clone(), outbound_tx)
        .await
    {
        Ok(handle) => handle,
        Err(e) => {
            warn!(
                target: "pc.gateway",
                connection_id = %connection_id,
                error = %e,
                "Failed to register connection, closing socket"
            );
            return;
        }
    };

    info!(
        target: "pc.gateway",
        connection_id = %connection_id,
        "WebSocket connection opened"
    );

    let (mut sink, mut stream) = socket.split();

    // Drain events toward the client
    let send_task = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sink.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(target: "pc.gateway", error = %e, "Failed to serialize event");
                }
            }
        }
    });

    // Identity established by join, cleared by leave
    let mut session: Option<SessionContext> = None;

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => {
                    dispatch_frame(&service, &connection, &connection_id, &mut session, frame)
                        .await;
                }
                Err(e) => {
                    debug!(
                        target: "pc.gateway",
                        connection_id = %connection_id,
                        error = %e,
                        "Malformed client frame"
                    );
                    connection.deliver(Event::OperationError {
                        message: "Malformed message".to_string(),
                    });
                }
            },
            Message::Close(_) => break,
            // Pings are answered by axum; binary frames are not part of
            // the protocol
            _ => {}
        }
    }

    if let Err(e) = service.on_disconnect(&connection_id).await {
        warn!(
            target: "pc.gateway",
            connection_id = %connection_id,
            error = %e,
            "Disconnect cleanup failed"
        );
    }

    send_task.abort();

    info!(
        target: "pc.gateway",
        connection_id = %connection_id,
        "WebSocket connection closed"
    );
}

/// Route one parsed frame to the service, reporting failures back to the
/// originating connection as `operation-error` events.
async fn dispatch_frame(
    service: &PresenceService,
    connection: &ConnectionActorHandle,
    connection_id: &str,
    session: &mut Option<SessionContext>,
    frame: ClientFrame,
) {
    let result = match frame {
        ClientFrame::Join {
            meeting_id,
            user_id,
            display_name,
        } => {
            match service
                .handle_join(connection_id, &meeting_id, &user_id, display_name.clone())
                .await
            {
                Ok(_) => {
                    *session = Some(SessionContext {
                        meeting_id,
                        user_id,
                        display_name,
                    });
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }

        ClientFrame::Leave { meeting_id } => {
            let result = service.handle_leave(connection_id, &meeting_id).await;
            if result.is_ok() {
                if let Some(ctx) = session.as_ref() {
                    if ctx.meeting_id == meeting_id {
                        *session = None;
                    }
                }
            }
            result
        }

        ClientFrame::ChatMessage { meeting_id, text } => match session.as_ref() {
            Some(ctx) if ctx.meeting_id == meeting_id => {
                service
                    .handle_message(
                        connection_id,
                        &meeting_id,
                        &ctx.user_id,
                        ctx.display_name.clone(),
                        text,
                    )
                    .await
            }
            _ => Err(PcError::Validation(
                "Join the meeting before sending messages".to_string(),
            )),
        },

        ClientFrame::TypingStart { meeting_id } => match session.as_ref() {
            Some(ctx) if ctx.meeting_id == meeting_id => {
                service
                    .handle_typing_start(
                        connection_id,
                        &meeting_id,
                        &ctx.user_id,
                        ctx.display_name.clone(),
                    )
                    .await
            }
            _ => Ok(()),
        },

        ClientFrame::TypingStop { meeting_id } => match session.as_ref() {
            Some(ctx) if ctx.meeting_id == meeting_id => {
                service
                    .handle_typing_stop(
                        connection_id,
                        &meeting_id,
                        &ctx.user_id,
                        ctx.display_name.clone(),
                    )
                    .await
            }
            _ => Ok(()),
        },
    };

    if let Err(e) = result {
        debug!(
            target: "pc.gateway",
            connection_id = %connection_id,
            error = %e,
            "Operation failed"
        );
        connection.deliver(Event::OperationError {
            message: e.client_message(),
        });
    }
}
