use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{
        ConnectInfo, Path, Query, State, WebSocketUpgrade,
        ws::{Message as WsFrame, WebSocket},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::{
    AppState,
    error::{ApiResult, Error},
    rooms::{
        self, RoomPath,
        events::{Event, Inbound},
    },
};

#[derive(Deserialize)]
pub(crate) struct JoinQuery {
    #[serde(rename = "userName")]
    user_name: String,
}

#[axum::debug_handler(state = crate::AppState)]
pub(crate) async fn room_ws(
    Path(room): Path<String>,
    Query(JoinQuery { user_name }): Query<JoinQuery>,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let room = RoomPath::parse(&room)?;
    upgrade(ws, state, room, user_name, addr)
}

#[axum::debug_handler(state = crate::AppState)]
pub(crate) async fn root_ws(
    Query(JoinQuery { user_name }): Query<JoinQuery>,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    upgrade(ws, state, RoomPath::root(), user_name, addr)
}

fn upgrade(
    ws: WebSocketUpgrade,
    state: AppState,
    room: RoomPath,
    user_name: String,
    addr: SocketAddr,
) -> ApiResult<Response> {
    if user_name.is_empty() {
        return Err(Error::Malformed("empty userName".to_owned()).into());
    }
    Ok(ws.on_upgrade(move |socket| serve(socket, state, room, user_name, Some(addr.ip()))))
}

/// Runs one joined connection until its stream ends, it errors, or a rejoin
/// under the same name evicts it.
async fn serve(
    socket: WebSocket,
    state: AppState,
    room: RoomPath,
    user_name: String,
    remote_ip: Option<IpAddr>,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

    // Queue the snapshot before the hub can deliver anything else. A failed
    // fetch degrades to an empty room rather than refusing the join.
    let snapshot = match state.namespace.get_snapshot(&room).await {
        Ok((messages, topic)) => Event::Snapshot { messages, topic },
        Err(err) => {
            tracing::warn!(room = %room, %err, "snapshot failed, joining with empty history");
            Event::Snapshot {
                messages: Vec::new(),
                topic: String::new(),
            }
        }
    };
    let _ = tx.send(snapshot);

    // The hub's connection now holds the only sender; eviction or broadcast
    // failure closes the channel and ends the send task below.
    let (hub, conn_id) = state.hubs.join(&room, &user_name, tx, remote_ip);
    tracing::debug!(room = %room, user = %user_name, "joined");

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(frame) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(WsFrame::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut send_task => break,
            frame = stream.next() => {
                let Some(Ok(frame)) = frame else { break };
                let WsFrame::Text(raw) = frame else { continue };
                // Malformed frames are skipped, not fatal.
                let Ok(Inbound { text }) = serde_json::from_str::<Inbound>(&raw) else {
                    continue;
                };
                if text.is_empty() {
                    continue;
                }
                if let Err(err) = rooms::publish(&state, &room, &user_name, &text).await {
                    tracing::warn!(room = %room, user = %user_name, %err, "message rejected");
                    hub.send_to(&user_name, conn_id, Event::Error {
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    send_task.abort();
    state.hubs.leave(&room, &user_name, conn_id);
    tracing::debug!(room = %room, user = %user_name, "left");
}
