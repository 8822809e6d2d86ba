use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use application::calls::CallSignalingRelay;
use application::{Clock, CommandBus, Hub, OutboxRepository, SubscriptionService};
use domain::UserId;
use tokio::sync::OwnedMutexGuard;

use crate::JwtService;

/// WebSocket 连接参数
#[derive(Debug, Clone)]
pub struct WsSettings {
    /// 每个连接出站队列的容量
    pub queue_capacity: usize,
    pub ping_interval: Duration,
}

impl Default for WsSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            ping_interval: Duration::from_secs(30),
        }
    }
}

/// 按用户串行化上线/离线判定
///
/// 同一用户的注册加上线、注销加离线各自在该用户的锁内完成，
/// 保证在线状态命令按连接计数变化的顺序执行。
#[derive(Default)]
pub struct PresenceGate {
    users: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
}

impl PresenceGate {
    pub async fn lock(&self, user_id: UserId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut users = self.users.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // 没有其他持有者的槽位可以回收
            users.retain(|_, slot| Arc::strong_count(slot) > 1);
            users.entry(user_id).or_default().clone()
        };
        slot.lock_owned().await
    }
}

#[derive(Clone)]
pub struct AppState {
    pub bus: Arc<CommandBus>,
    pub hub: Arc<Hub>,
    pub subscriptions: Arc<SubscriptionService>,
    pub relay: Arc<CallSignalingRelay>,
    pub outbox: Arc<dyn OutboxRepository>,
    pub jwt_service: Arc<JwtService>,
    pub clock: Arc<dyn Clock>,
    pub presence: Arc<PresenceGate>,
    pub ws: WsSettings,
}
