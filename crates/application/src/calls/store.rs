use std::time::Duration;

use async_trait::async_trait;
use domain::{CallId, CallState};

use crate::error::ApplicationResult;

/// 临时通话状态存储，条目带过期时间
#[async_trait]
pub trait CallStateStore: Send + Sync {
    async fn get(&self, call_id: CallId) -> ApplicationResult<Option<CallState>>;
    async fn put(&self, state: &CallState, ttl: Duration) -> ApplicationResult<()>;
    async fn delete(&self, call_id: CallId) -> ApplicationResult<()>;
}
