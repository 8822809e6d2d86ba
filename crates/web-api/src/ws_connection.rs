use std::time::Duration;

use application::commands::SetPresenceCommand;
use application::realtime::{ClientHandle, ClientId, Delivery, OutboundFrame};
use application::{
    ApplicationResult, ClientFrame, Command, CommandContext, ServerFrame, Signal,
};
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{Channel, PresenceStatus, UserId};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// WebSocket 连接
///
/// 一个连接对应 Hub 中的一个客户端：
/// - 写任务独占 socket 的发送端，消费出站队列并定时发送 Ping
/// - 读任务解析客户端帧，执行订阅、信令等操作
/// - 任一任务结束后注销客户端，最后一个连接断开时标记离线
pub struct WebSocketConnection {
    socket: WebSocket,
    state: AppState,
    user_id: UserId,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, state: AppState, user_id: UserId) -> Self {
        Self {
            socket,
            state,
            user_id,
        }
    }

    pub async fn run(self) {
        let Self {
            socket,
            state,
            user_id,
        } = self;

        let (handle, outbound) = ClientHandle::new(user_id, state.ws.queue_capacity);
        let client_id = handle.id;
        let replies = handle.clone();

        let presence = state.presence.lock(user_id).await;
        let connections = match state.hub.register(handle).await {
            Ok(connections) => connections,
            Err(err) => {
                drop(presence);
                tracing::warn!(user_id = %user_id, error = %err, "注册客户端失败，关闭连接");
                let (mut sender, _) = socket.split();
                let _ = sender.send(WsMessage::Close(None)).await;
                return;
            }
        };
        if connections == 1 {
            set_presence(&state, user_id, PresenceStatus::Online).await;
        }
        drop(presence);
        tracing::info!(user_id = %user_id, client_id = %client_id, connections, "WebSocket 连接已建立");

        // 每个连接自动订阅自己的 user 频道
        let own_channel = Channel::User(user_id).to_string();
        if let Err(err) = state
            .subscriptions
            .subscribe(client_id, user_id, &own_channel)
            .await
        {
            tracing::warn!(user_id = %user_id, error = %err, "订阅用户频道失败");
        }

        let (sender, incoming) = socket.split();

        let mut send_task = tokio::spawn(write_loop(
            sender,
            outbound,
            state.hub.shutdown_token(),
            state.ws.ping_interval,
        ));
        let mut recv_task = tokio::spawn(read_loop(
            incoming,
            state.clone(),
            client_id,
            user_id,
            replies,
        ));

        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        }

        let presence = state.presence.lock(user_id).await;
        let last_connection = match state.hub.unregister(client_id).await {
            Some(departure) => departure.remaining == 0,
            // 关闭时 Hub 已清空全部客户端
            None => state.hub.shutdown_token().is_cancelled(),
        };
        if last_connection {
            set_presence(&state, user_id, PresenceStatus::Offline).await;
        }
        drop(presence);
        tracing::info!(user_id = %user_id, client_id = %client_id, "WebSocket 连接已断开");
    }
}

/// 写循环：出站队列、心跳与 Hub 关闭信号
async fn write_loop(
    mut sender: SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    shutdown: CancellationToken,
    ping_interval: Duration,
) {
    let mut ping = tokio::time::interval(ping_interval);
    // interval 的第一次 tick 立即完成
    ping.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                let _ = sender.send(WsMessage::Close(None)).await;
                break;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if sender.send(WsMessage::Text(frame.to_string().into())).await.is_err() {
                    tracing::debug!("发送文本帧失败");
                    break;
                }
            }
            _ = ping.tick() => {
                if sender.send(WsMessage::Ping(Bytes::new())).await.is_err() {
                    tracing::debug!("发送 Ping 失败");
                    break;
                }
            }
        }
    }
}

async fn read_loop(
    mut incoming: SplitStream<WebSocket>,
    state: AppState,
    client_id: ClientId,
    user_id: UserId,
    replies: ClientHandle,
) {
    while let Some(message) = incoming.next().await {
        let text = match message {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            // Pong 由协议层处理
            Ok(_) => continue,
            Err(err) => {
                tracing::debug!(client_id = %client_id, error = %err, "读取 WebSocket 消息失败");
                break;
            }
        };

        let reply = match serde_json::from_str::<ClientFrame>(text.as_str()) {
            Ok(frame) => match handle_frame(&state, client_id, user_id, frame).await {
                Ok(reply) => reply,
                Err(err) => Some(ServerFrame::from_error(&err)),
            },
            Err(err) => Some(ServerFrame::error(
                "invalid_frame",
                format!("无法解析的消息: {err}"),
            )),
        };

        if let Some(reply) = reply {
            if !send_reply(&replies, &reply) {
                break;
            }
        }
    }
}

async fn handle_frame(
    state: &AppState,
    client_id: ClientId,
    user_id: UserId,
    frame: ClientFrame,
) -> ApplicationResult<Option<ServerFrame>> {
    match frame {
        ClientFrame::Subscribe { channel } => {
            let channel = state
                .subscriptions
                .subscribe(client_id, user_id, &channel)
                .await?;
            Ok(Some(ServerFrame::Subscribed {
                channel: channel.to_string(),
            }))
        }
        ClientFrame::Unsubscribe { channel } => {
            let channel = state.subscriptions.unsubscribe(client_id, &channel).await?;
            Ok(Some(ServerFrame::Unsubscribed {
                channel: channel.to_string(),
            }))
        }
        ClientFrame::Signal {
            kind,
            call_id,
            to,
            data,
        } => {
            state
                .relay
                .relay(Signal {
                    kind,
                    call_id,
                    from: user_id,
                    to,
                    data,
                })
                .await?;
            Ok(None)
        }
        ClientFrame::EndCall { call_id } => {
            state.relay.end(call_id, user_id).await?;
            Ok(None)
        }
        ClientFrame::DeclineCall { call_id } => {
            state.relay.decline(call_id, user_id).await?;
            Ok(None)
        }
        ClientFrame::Ping => Ok(Some(ServerFrame::Pong)),
    }
}

/// 直接回复当前客户端，返回 false 表示写循环已退出
fn send_reply(replies: &ClientHandle, frame: &ServerFrame) -> bool {
    let encoded = match frame.encode() {
        Ok(encoded) => encoded,
        Err(err) => {
            tracing::error!(error = %err, "编码回复帧失败");
            return true;
        }
    };
    match replies.try_send(encoded) {
        Delivery::Delivered => true,
        Delivery::Full => {
            tracing::warn!(client_id = %replies.id, "出站队列已满，丢弃回复");
            true
        }
        Delivery::Closed => false,
    }
}

/// 在线状态走命令总线，与 HTTP 命令共用 Outbox
async fn set_presence(state: &AppState, user_id: UserId, status: PresenceStatus) {
    let command = Command::SetPresence(SetPresenceCommand {
        actor_id: user_id,
        status,
    });
    let ctx = CommandContext::new(user_id);
    if let Err(err) = state.bus.execute(&ctx, &command).await {
        tracing::warn!(user_id = %user_id, status = status.as_str(), error = %err, "更新在线状态失败");
    }
}
