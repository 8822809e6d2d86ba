use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use domain::{CallId, CallState};
use tokio::sync::RwLock;

use crate::calls::CallStateStore;
use crate::error::ApplicationResult;

/// 带过期时间的内存通话状态存储
#[derive(Clone, Default)]
pub struct InMemoryCallStateStore {
    entries: Arc<RwLock<HashMap<CallId, (CallState, Instant)>>>,
}

impl InMemoryCallStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }
}

#[async_trait]
impl CallStateStore for InMemoryCallStateStore {
    async fn get(&self, call_id: CallId) -> ApplicationResult<Option<CallState>> {
        let mut entries = self.entries.write().await;
        match entries.get(&call_id) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(&call_id);
                Ok(None)
            }
            Some((state, _)) => Ok(Some(state.clone())),
            None => Ok(None),
        }
    }

    async fn put(&self, state: &CallState, ttl: Duration) -> ApplicationResult<()> {
        self.entries
            .write()
            .await
            .insert(state.call_id, (state.clone(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, call_id: CallId) -> ApplicationResult<()> {
        self.entries.write().await.remove(&call_id);
        Ok(())
    }
}
