use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use application::{Command, CommandContext, CommandResult};
use domain::{OutboxEvent, OutboxEventId};

use crate::{error::ApiError, state::AppState, ws_connection::WebSocketConnection};

const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_FAILED_PAGE: i64 = 500;

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FailedQuery {
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    clients: usize,
    channels: usize,
    subscriptions: usize,
}

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/commands", post(execute_command))
        .route("/admin/outbox/failed", get(list_failed_events))
        .route("/admin/outbox/{event_id}/requeue", post(requeue_event));

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_handler))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.hub.stats().await;
    Json(HealthResponse {
        status: "ok",
        clients: stats.clients,
        channels: stats.channels,
        subscriptions: stats.subscriptions,
    })
}

/// 握手阶段校验令牌，失败时直接返回 401，不升级连接
async fn websocket_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let token = query
        .token
        .ok_or_else(|| ApiError::unauthorized("Missing token"))?;
    let user_id = state.jwt_service.verify_token(&token)?;
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    Ok(ws.on_upgrade(move |socket| async move {
        WebSocketConnection::new(socket, state, user_id).run().await;
    }))
}

async fn execute_command(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(command): Json<Command>,
) -> Result<Json<CommandResult>, ApiError> {
    let principal = state.jwt_service.extract_user_from_headers(&headers)?;
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let ctx = CommandContext::new(principal).with_request_id(request_id);
    let result = state.bus.execute(&ctx, &command).await?;
    Ok(Json(result))
}

async fn list_failed_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FailedQuery>,
) -> Result<Json<Vec<OutboxEvent>>, ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;
    let limit = query.limit.unwrap_or(100).clamp(1, MAX_FAILED_PAGE);

    let events = state
        .outbox
        .list_failed(limit)
        .await
        .map_err(application::ApplicationError::from)?;
    Ok(Json(events))
}

async fn requeue_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(event_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let operator = state.jwt_service.extract_user_from_headers(&headers)?;
    let event_id = OutboxEventId::from(event_id);

    let requeued = state
        .outbox
        .requeue_failed(event_id, state.clock.now())
        .await
        .map_err(application::ApplicationError::from)?;
    if !requeued {
        return Err(ApiError::not_found("event is not in FAILED state"));
    }

    tracing::info!(event_id = %event_id, operator = %operator, "死信事件已重新入队");
    Ok(StatusCode::NO_CONTENT)
}
