//! WebSocket transport: one task per connection.
//!
//! The socket is split. A writer task drains the connection's outbox into
//! the sink; the reader loop feeds text frames to the dispatcher in arrival
//! order. Whichever side ends first ends the connection, and the
//! dispatcher's disconnect cascade runs on the way out.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use axum::{
    extract::{
        Path, Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::dispatch::{Connection, DispatchError, Dispatcher, ServerMessage};
use crate::domain::Participant;
use crate::registry::ConnectionId;

use super::identity::ConnectQuery;
use super::routes::AppError;
use super::state::AppState;

/// Close code sent to a connection superseded by a newer one.
const CLOSE_SESSION_REPLACED: u16 = 4000;

/// GET /ws/{user_id}?role=rider|driver
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let participant = state.identity.admit(&user_id, &query).map_err(|e| {
        warn!(user_id = %user_id, error = %e, "connection refused");
        AppError::from(e)
    })?;

    let dispatcher = Arc::clone(&state.dispatcher);
    Ok(ws.on_upgrade(move |socket| run_connection(socket, dispatcher, participant)))
}

/// Serve one admitted connection until either side closes it.
pub async fn run_connection(
    socket: WebSocket,
    dispatcher: Arc<Dispatcher>,
    participant: Participant,
) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = dispatcher.connect(participant, tx);
    let mut writer = tokio::spawn(write_loop(sink, rx, conn.id()));

    loop {
        tokio::select! {
            _ = &mut writer => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_frame(&dispatcher, &conn, &text),
                Some(Ok(Message::Binary(_))) => {
                    let err =
                        DispatchError::Malformed("binary frames are not supported".to_string());
                    let _ = conn.send(ServerMessage::error(&err));
                }
                Some(Ok(Message::Close(_))) | None => break,
                // Pings are answered by the transport.
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Err(e)) => {
                    debug!(connection = %conn.id(), error = %e, "receive failed");
                    break;
                }
            },
        }
    }

    writer.abort();
    dispatcher.disconnect(&conn);
}

/// Hand one frame to the dispatcher, containing any panic to this message.
fn handle_frame(dispatcher: &Dispatcher, conn: &Connection, text: &str) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| dispatcher.handle_text(conn, text)));
    if outcome.is_err() {
        error!(
            participant = %conn.participant_id(),
            connection = %conn.id(),
            "panic while handling message"
        );
        let _ = conn.send(ServerMessage::error(&DispatchError::Internal));
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbox: mpsc::UnboundedReceiver<ServerMessage>,
    connection: ConnectionId,
) {
    while let Some(message) = outbox.recv().await {
        if message == ServerMessage::SessionReplaced {
            let text = message.to_json().unwrap_or_default();
            let _ = sink.send(Message::Text(text)).await;
            let _ = sink
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_SESSION_REPLACED,
                    reason: "session replaced".into(),
                })))
                .await;
            debug!(connection = %connection, "closed replaced session");
            return;
        }

        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!(
                    connection = %connection,
                    kind = message.kind(),
                    error = %e,
                    "failed to encode message"
                );
                continue;
            }
        };
        if sink.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}
