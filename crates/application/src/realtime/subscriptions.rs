use std::sync::Arc;

use domain::{Channel, UserId};
use tracing::{debug, info};

use crate::error::{ApplicationError, ApplicationResult};
use crate::realtime::authorizer::ChannelAuthorizer;
use crate::realtime::hub::{ClientId, Hub};

/// 授权后再写入 Hub 的订阅入口。被拒绝的订阅不会产生任何 Hub 状态。
pub struct SubscriptionService {
    hub: Arc<Hub>,
    authorizer: Arc<dyn ChannelAuthorizer>,
}

impl SubscriptionService {
    pub fn new(hub: Arc<Hub>, authorizer: Arc<dyn ChannelAuthorizer>) -> Self {
        Self { hub, authorizer }
    }

    pub async fn subscribe(
        &self,
        client_id: ClientId,
        user_id: UserId,
        channel: &str,
    ) -> ApplicationResult<Channel> {
        if !self.authorizer.can_subscribe(user_id, channel).await? {
            debug!(client_id = %client_id, user_id = %user_id, channel, "订阅被拒绝");
            return Err(ApplicationError::authorization(format!(
                "无权订阅频道: {channel}"
            )));
        }

        let parsed: Channel = channel
            .parse()
            .map_err(|_| ApplicationError::authorization(format!("无权订阅频道: {channel}")))?;
        if self.hub.subscribe(client_id, parsed.clone()).await? {
            info!(client_id = %client_id, user_id = %user_id, channel, "订阅频道");
        }
        Ok(parsed)
    }

    pub async fn unsubscribe(&self, client_id: ClientId, channel: &str) -> ApplicationResult<Channel> {
        let parsed: Channel = channel.parse()?;
        self.hub.unsubscribe(client_id, &parsed).await;
        Ok(parsed)
    }
}
