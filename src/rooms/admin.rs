use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use crate::{
    AppState,
    error::ApiResult,
    rooms::{
        self, RoomPath,
        events::{Event, Message},
        ranking::RankedRoom,
    },
};

#[derive(Deserialize)]
pub(crate) struct NewRoomBody {
    #[serde(rename = "userName")]
    user_name: String,
    text: String,
    topic: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct NewRoomReply {
    created: bool,
    message: Message,
}

/// Creates a room (or just posts to it) without an open connection: the
/// caller's text becomes the room's first message, then the optional topic
/// is applied.
#[axum::debug_handler(state = crate::AppState)]
pub(crate) async fn new_room(
    Path(room): Path<String>,
    State(state): State<AppState>,
    Json(NewRoomBody { user_name, text, topic }): Json<NewRoomBody>,
) -> ApiResult<(StatusCode, Json<NewRoomReply>)> {
    let room = RoomPath::parse(&room)?;
    let (created, message) = rooms::publish(&state, &room, &user_name, &text).await?;

    if let Some(topic) = topic {
        state.namespace.set_topic(&room, &topic).await?;
        broadcast_topic(&state, &room, topic);
    }

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(NewRoomReply { created, message })))
}

#[derive(Deserialize)]
pub(crate) struct TopicBody {
    topic: String,
}

#[axum::debug_handler(state = crate::AppState)]
pub(crate) async fn set_topic(
    Path(room): Path<String>,
    State(state): State<AppState>,
    Json(TopicBody { topic }): Json<TopicBody>,
) -> ApiResult<StatusCode> {
    let room = RoomPath::parse(&room)?;
    state.namespace.set_topic(&room, &topic).await?;
    broadcast_topic(&state, &room, topic);
    Ok(StatusCode::NO_CONTENT)
}

fn broadcast_topic(state: &AppState, room: &RoomPath, topic: String) {
    if let Some(hub) = state.hubs.get(room) {
        rooms::log_dropped(room, hub.broadcast(&Event::Topic(topic), &[]));
    }
}

#[axum::debug_handler(state = crate::AppState)]
pub(crate) async fn active_users(
    Path(room): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<String>>> {
    let room = RoomPath::parse(&room)?;
    Ok(Json(state.presence.active_users(&room).await?))
}

#[axum::debug_handler(state = crate::AppState)]
pub(crate) async fn root_active_users(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.presence.active_users(&RoomPath::root()).await?))
}

#[derive(Deserialize)]
pub(crate) struct SubroomsQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    10
}

#[axum::debug_handler(state = crate::AppState)]
pub(crate) async fn top_subrooms(
    Path(room): Path<String>,
    Query(SubroomsQuery { limit }): Query<SubroomsQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<RankedRoom>>> {
    let room = RoomPath::parse(&room)?;
    Ok(Json(state.ranking.refresh_and_rank(&room, limit).await?))
}

#[axum::debug_handler(state = crate::AppState)]
pub(crate) async fn root_top_subrooms(
    Query(SubroomsQuery { limit }): Query<SubroomsQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<RankedRoom>>> {
    Ok(Json(state.ranking.refresh_and_rank(&RoomPath::root(), limit).await?))
}
