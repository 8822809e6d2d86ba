//! WebSocket Hub
//!
//! 进程内的连接注册表：`频道 → {客户端 → 句柄}`，全部状态放在同一把锁后面。
//! 每个客户端持有一个有界发送队列，广播只做 `try_send`，队列满的客户端
//! 丢弃本条帧，不影响其他客户端。

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use domain::{Channel, UserId};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ApplicationError, ApplicationResult};

/// 已编码的出站帧，多个客户端共享同一份字节
pub type OutboundFrame = Arc<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 客户端句柄：身份加上出站队列的发送端
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub id: ClientId,
    pub user_id: UserId,
    sender: mpsc::Sender<OutboundFrame>,
}

/// 单个客户端的投递结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// 队列已满，本帧被丢弃
    Full,
    /// 写循环已退出
    Closed,
}

impl ClientHandle {
    /// 创建句柄以及对应的出站队列接收端
    pub fn new(user_id: UserId, capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: ClientId::new(),
                user_id,
                sender,
            },
            receiver,
        )
    }

    /// 非阻塞投递
    pub fn try_send(&self, frame: OutboundFrame) -> Delivery {
        match self.sender.try_send(frame) {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    pub clients: usize,
    pub channels: usize,
    pub subscriptions: usize,
}

struct ClientEntry {
    handle: ClientHandle,
    channels: HashSet<Channel>,
}

/// 注销结果：被移除的句柄以及该用户剩余的连接数
#[derive(Debug)]
pub struct Departure {
    pub handle: ClientHandle,
    pub remaining: usize,
}

#[derive(Default)]
struct HubState {
    clients: HashMap<ClientId, ClientEntry>,
    channels: HashMap<Channel, HashMap<ClientId, ClientHandle>>,
}

impl HubState {
    fn connections_of(&self, user_id: UserId) -> usize {
        self.clients
            .values()
            .filter(|entry| entry.handle.user_id == user_id)
            .count()
    }

    fn detach(&mut self, client_id: ClientId, channel: &Channel) -> bool {
        let Some(subscribers) = self.channels.get_mut(channel) else {
            return false;
        };
        let removed = subscribers.remove(&client_id).is_some();
        if subscribers.is_empty() {
            self.channels.remove(channel);
        }
        removed
    }
}

pub struct Hub {
    state: RwLock<HubState>,
    shutdown: CancellationToken,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HubState::default()),
            shutdown: CancellationToken::new(),
        }
    }

    /// 关闭时被取消，写循环据此退出
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// 注册客户端，返回该用户在本节点上的连接数（含本次）。
    /// 计数与插入在同一把写锁内完成，返回 1 的调用方就是该用户的首个连接。
    pub async fn register(&self, handle: ClientHandle) -> ApplicationResult<usize> {
        if self.shutdown.is_cancelled() {
            return Err(ApplicationError::infrastructure("hub 已关闭"));
        }

        let mut state = self.state.write().await;
        // 等锁期间可能已经关闭，shutdown 清空之后不能再插入
        if self.shutdown.is_cancelled() {
            return Err(ApplicationError::infrastructure("hub 已关闭"));
        }
        let client_id = handle.id;
        let user_id = handle.user_id;
        state.clients.insert(
            client_id,
            ClientEntry {
                handle,
                channels: HashSet::new(),
            },
        );
        let connections = state.connections_of(user_id);
        debug!(client_id = %client_id, user_id = %user_id, connections, "客户端已注册");
        Ok(connections)
    }

    /// 注销客户端并从所有频道移除，同时返回该用户剩余的连接数
    pub async fn unregister(&self, client_id: ClientId) -> Option<Departure> {
        let mut state = self.state.write().await;
        let entry = state.clients.remove(&client_id)?;
        for channel in &entry.channels {
            state.detach(client_id, channel);
        }
        let remaining = state.connections_of(entry.handle.user_id);
        debug!(
            client_id = %client_id,
            channels = entry.channels.len(),
            remaining,
            "客户端已注销"
        );
        Some(Departure {
            handle: entry.handle,
            remaining,
        })
    }

    /// 订阅频道，返回是否为新订阅
    pub async fn subscribe(&self, client_id: ClientId, channel: Channel) -> ApplicationResult<bool> {
        let mut state = self.state.write().await;
        let entry = state
            .clients
            .get_mut(&client_id)
            .ok_or_else(|| ApplicationError::not_found(format!("客户端未注册: {client_id}")))?;

        if !entry.channels.insert(channel.clone()) {
            return Ok(false);
        }
        let handle = entry.handle.clone();
        state
            .channels
            .entry(channel)
            .or_default()
            .insert(client_id, handle);
        Ok(true)
    }

    /// 取消订阅，返回之前是否已订阅
    pub async fn unsubscribe(&self, client_id: ClientId, channel: &Channel) -> bool {
        let mut state = self.state.write().await;
        let Some(entry) = state.clients.get_mut(&client_id) else {
            return false;
        };
        if !entry.channels.remove(channel) {
            return false;
        }
        state.detach(client_id, channel)
    }

    /// 向频道内所有订阅者投递同一帧
    pub async fn broadcast(&self, channel: &Channel, frame: OutboundFrame) -> BroadcastOutcome {
        let state = self.state.read().await;
        let mut outcome = BroadcastOutcome::default();
        let Some(subscribers) = state.channels.get(channel) else {
            return outcome;
        };

        for handle in subscribers.values() {
            match handle.try_send(frame.clone()) {
                Delivery::Delivered => outcome.delivered += 1,
                Delivery::Full => {
                    outcome.dropped += 1;
                    warn!(client_id = %handle.id, channel = %channel, "客户端发送队列已满，丢弃消息");
                }
                Delivery::Closed => {
                    outcome.dropped += 1;
                    debug!(client_id = %handle.id, channel = %channel, "客户端已断开");
                }
            }
        }
        outcome
    }

    /// 撤销某用户在频道上的全部订阅，返回被撤销的客户端
    pub async fn revoke(&self, channel: &Channel, user_id: UserId) -> Vec<ClientHandle> {
        let mut state = self.state.write().await;
        let targets: Vec<ClientHandle> = state
            .channels
            .get(channel)
            .map(|subscribers| {
                subscribers
                    .values()
                    .filter(|handle| handle.user_id == user_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        for handle in &targets {
            if let Some(entry) = state.clients.get_mut(&handle.id) {
                entry.channels.remove(channel);
            }
            state.detach(handle.id, channel);
        }

        if !targets.is_empty() {
            info!(
                channel = %channel,
                user_id = %user_id,
                clients = targets.len(),
                "撤销频道订阅"
            );
        }
        targets
    }

    /// 丢弃全部句柄并通知写循环退出
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut state = self.state.write().await;
        let clients = state.clients.len();
        state.clients.clear();
        state.channels.clear();
        info!(clients, "hub 已关闭");
    }

    pub async fn stats(&self) -> HubStats {
        let state = self.state.read().await;
        HubStats {
            clients: state.clients.len(),
            channels: state.channels.len(),
            subscriptions: state.channels.values().map(HashMap::len).sum(),
        }
    }

    pub async fn user_connection_count(&self, user_id: UserId) -> usize {
        self.state.read().await.connections_of(user_id)
    }

    pub async fn is_subscribed(&self, client_id: ClientId, channel: &Channel) -> bool {
        let state = self.state.read().await;
        state
            .clients
            .get(&client_id)
            .map(|entry| entry.channels.contains(channel))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::ConversationId;

    fn frame(text: &str) -> OutboundFrame {
        Arc::from(text)
    }

    #[tokio::test]
    async fn test_broadcast_delivers_identical_bytes() {
        let hub = Hub::new();
        let channel = Channel::Conversation(ConversationId::new());
        let mut receivers = Vec::new();
        for _ in 0..5 {
            let (handle, rx) = ClientHandle::new(UserId::new(), 8);
            let id = handle.id;
            hub.register(handle).await.unwrap();
            hub.subscribe(id, channel.clone()).await.unwrap();
            receivers.push(rx);
        }

        let payload = frame("{\"type\":\"event\"}");
        let outcome = hub.broadcast(&channel, payload.clone()).await;
        assert_eq!(outcome, BroadcastOutcome { delivered: 5, dropped: 0 });

        for rx in receivers.iter_mut() {
            let received = rx.recv().await.unwrap();
            assert_eq!(received.as_bytes(), payload.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_saturated_client_does_not_block_others() {
        let hub = Hub::new();
        let channel = Channel::Conversation(ConversationId::new());

        let (slow, _slow_rx) = ClientHandle::new(UserId::new(), 1);
        let (fast, mut fast_rx) = ClientHandle::new(UserId::new(), 16);
        let (slow_id, fast_id) = (slow.id, fast.id);
        hub.register(slow).await.unwrap();
        hub.register(fast).await.unwrap();
        hub.subscribe(slow_id, channel.clone()).await.unwrap();
        hub.subscribe(fast_id, channel.clone()).await.unwrap();

        let mut dropped = 0;
        for i in 0..10 {
            let outcome = hub.broadcast(&channel, frame(&format!("m{i}"))).await;
            dropped += outcome.dropped;
        }

        assert_eq!(dropped, 9);
        for i in 0..10 {
            assert_eq!(&*fast_rx.recv().await.unwrap(), format!("m{i}"));
        }
    }

    #[tokio::test]
    async fn test_closed_queue_counts_as_dropped() {
        let hub = Hub::new();
        let channel = Channel::User(UserId::new());
        let (handle, rx) = ClientHandle::new(UserId::new(), 4);
        let id = handle.id;
        hub.register(handle).await.unwrap();
        hub.subscribe(id, channel.clone()).await.unwrap();
        drop(rx);

        let outcome = hub.broadcast(&channel, frame("x")).await;
        assert_eq!(outcome, BroadcastOutcome { delivered: 0, dropped: 1 });
    }

    #[tokio::test]
    async fn test_unregister_removes_from_every_channel() {
        let hub = Hub::new();
        let user = UserId::new();
        let (handle, _rx) = ClientHandle::new(user, 4);
        let id = handle.id;
        hub.register(handle).await.unwrap();
        hub.subscribe(id, Channel::User(user)).await.unwrap();
        hub.subscribe(id, Channel::Presence(user)).await.unwrap();
        assert_eq!(hub.stats().await.subscriptions, 2);

        let departure = hub.unregister(id).await.unwrap();
        assert_eq!(departure.remaining, 0);
        assert!(hub.unregister(id).await.is_none());
        assert_eq!(hub.stats().await, HubStats::default());
        assert_eq!(hub.user_connection_count(user).await, 0);
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent_and_requires_registration() {
        let hub = Hub::new();
        let channel = Channel::User(UserId::new());
        let (handle, _rx) = ClientHandle::new(UserId::new(), 4);
        let id = handle.id;

        assert!(hub.subscribe(id, channel.clone()).await.is_err());
        hub.register(handle).await.unwrap();
        assert!(hub.subscribe(id, channel.clone()).await.unwrap());
        assert!(!hub.subscribe(id, channel.clone()).await.unwrap());
        assert!(hub.unsubscribe(id, &channel).await);
        assert!(!hub.unsubscribe(id, &channel).await);
    }

    #[tokio::test]
    async fn test_revoke_only_affects_target_user() {
        let hub = Hub::new();
        let channel = Channel::Conversation(ConversationId::new());
        let removed = UserId::new();
        let stays = UserId::new();

        let (a, _a_rx) = ClientHandle::new(removed, 4);
        let (b, _b_rx) = ClientHandle::new(removed, 4);
        let (c, _c_rx) = ClientHandle::new(stays, 4);
        let ids = [a.id, b.id, c.id];
        for handle in [a, b, c] {
            hub.register(handle).await.unwrap();
        }
        for id in ids {
            hub.subscribe(id, channel.clone()).await.unwrap();
        }

        let revoked = hub.revoke(&channel, removed).await;
        assert_eq!(revoked.len(), 2);
        assert!(!hub.is_subscribed(ids[0], &channel).await);
        assert!(!hub.is_subscribed(ids[1], &channel).await);
        assert!(hub.is_subscribed(ids[2], &channel).await);
        assert_eq!(hub.broadcast(&channel, frame("x")).await.delivered, 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_queues() {
        let hub = Hub::new();
        let (handle, mut rx) = ClientHandle::new(UserId::new(), 4);
        hub.register(handle).await.unwrap();

        hub.shutdown().await;
        assert!(rx.recv().await.is_none());
        assert!(hub.shutdown_token().is_cancelled());

        let (late, _late_rx) = ClientHandle::new(UserId::new(), 4);
        assert!(hub.register(late).await.is_err());
    }

    #[tokio::test]
    async fn test_user_connection_count() {
        let hub = Hub::new();
        let user = UserId::new();
        let (first, _r1) = ClientHandle::new(user, 4);
        let (second, _r2) = ClientHandle::new(user, 4);
        let first_id = first.id;
        assert_eq!(hub.register(first).await.unwrap(), 1);
        assert_eq!(hub.register(second).await.unwrap(), 2);
        assert_eq!(hub.user_connection_count(user).await, 2);

        let departure = hub.unregister(first_id).await.unwrap();
        assert_eq!(departure.remaining, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_connections_see_distinct_counts() {
        let hub = Arc::new(Hub::new());
        let user = UserId::new();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                let (handle, rx) = ClientHandle::new(user, 4);
                let id = handle.id;
                let count = hub.register(handle).await.unwrap();
                (id, count, rx)
            }));
        }
        let mut joined = Vec::new();
        for task in tasks {
            joined.push(task.await.unwrap());
        }

        let mut counts: Vec<usize> = joined.iter().map(|(_, count, _)| *count).collect();
        counts.sort_unstable();
        assert_eq!(counts, (1..=16).collect::<Vec<_>>());

        let mut tasks = Vec::new();
        for (id, _, _) in &joined {
            let hub = hub.clone();
            let id = *id;
            tasks.push(tokio::spawn(async move {
                hub.unregister(id).await.map(|departure| departure.remaining)
            }));
        }
        let mut remaining = Vec::new();
        for task in tasks {
            remaining.push(task.await.unwrap().unwrap());
        }
        remaining.sort_unstable();
        assert_eq!(remaining, (0..16).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_register_racing_shutdown_leaves_no_client() {
        for _ in 0..20 {
            let hub = Arc::new(Hub::new());
            let mut tasks = Vec::new();
            for _ in 0..8 {
                let hub = hub.clone();
                tasks.push(tokio::spawn(async move {
                    let (handle, rx) = ClientHandle::new(UserId::new(), 4);
                    let registered = hub.register(handle).await.is_ok();
                    (registered, rx)
                }));
            }
            let closer = {
                let hub = hub.clone();
                tokio::spawn(async move { hub.shutdown().await })
            };

            let mut outcomes = Vec::new();
            for task in tasks {
                outcomes.push(task.await.unwrap());
            }
            closer.await.unwrap();

            assert_eq!(hub.stats().await.clients, 0);
            for (registered, mut rx) in outcomes {
                // 成功注册的客户端也必须随关闭收到队列结束
                if registered {
                    assert!(rx.recv().await.is_none());
                }
            }
            let (late, _late_rx) = ClientHandle::new(UserId::new(), 4);
            assert!(hub.register(late).await.is_err());
        }
    }
}
