//! Web API 层。
//!
//! 提供 Axum 路由：命令入口、Outbox 死信管理以及 WebSocket 实时连接，
//! 将请求委托给应用层的命令总线、订阅服务和信令转发器。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{Claims, JwtService};
pub use config::JwtConfig;
pub use error::{ApiError, ErrorBody};
pub use routes::router;
pub use state::{AppState, PresenceGate, WsSettings};
pub use ws_connection::WebSocketConnection;
