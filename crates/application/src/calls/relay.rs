//! 通话信令转发
//!
//! 信令不经过 Outbox：校验通话状态后直接发布到接收方的 `user:` 频道。

use std::sync::Arc;
use std::time::Duration;

use domain::{
    CallDeclined, CallEnded, CallId, CallSignal, CallState, DomainError, RealtimeEvent, UserId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::calls::store::CallStateStore;
use crate::clock::Clock;
use crate::error::{ApplicationError, ApplicationResult};
use crate::transport::EventPublisher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

/// 一条 WebRTC 信令
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub kind: SignalKind,
    pub call_id: CallId,
    pub from: UserId,
    pub to: UserId,
    pub data: Value,
}

pub struct CallSignalingRelay {
    store: Arc<dyn CallStateStore>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl CallSignalingRelay {
    pub fn new(
        store: Arc<dyn CallStateStore>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
            ttl,
        }
    }

    /// 保存振铃状态
    pub async fn begin(&self, state: &CallState) -> ApplicationResult<()> {
        self.store.put(state, self.ttl).await?;
        info!(call_id = %state.call_id, participants = state.participants.len(), "通话开始振铃");
        Ok(())
    }

    pub async fn relay(&self, signal: Signal) -> ApplicationResult<()> {
        if signal.from == signal.to {
            return Err(ApplicationError::validation("不能向自己发送信令"));
        }

        let mut state = self.load(signal.call_id).await?;
        if !state.is_participant(signal.from) || !state.is_participant(signal.to) {
            return Err(ApplicationError::authorization("信令双方必须都是通话参与者"));
        }

        let answered = signal.kind == SignalKind::Answer;
        if answered {
            state
                .accept(signal.from, self.clock.now())
                .map_err(map_call_error)?;
        }

        let payload = CallSignal {
            call_id: signal.call_id,
            from: signal.from,
            to: signal.to,
            data: signal.data,
        };
        let event = match signal.kind {
            SignalKind::Offer => RealtimeEvent::CallOffer(payload),
            SignalKind::Answer => RealtimeEvent::CallAnswer(payload),
            SignalKind::IceCandidate => RealtimeEvent::CallIce(payload),
        };
        // 先发布再保存：发布失败时状态保持振铃。读取-修改-写入不是原子的，
        // 同一通话并发的信令以最后一次写入为准。
        self.publish(&event).await?;
        if answered {
            self.store.put(&state, self.ttl).await?;
        }
        debug!(call_id = %signal.call_id, kind = ?signal.kind, "信令已转发");
        Ok(())
    }

    /// 结束通话并删除临时状态
    pub async fn end(&self, call_id: CallId, user_id: UserId) -> ApplicationResult<()> {
        let mut state = self.load(call_id).await?;
        if !state.participants.contains_key(&user_id) {
            return Err(ApplicationError::authorization("只有通话参与者可以结束通话"));
        }
        self.finish(&mut state, user_id).await
    }

    /// 拒接；没有其他活跃受邀者时通话随之结束
    pub async fn decline(&self, call_id: CallId, user_id: UserId) -> ApplicationResult<()> {
        let mut state = self.load(call_id).await?;
        let should_end = state.decline(user_id).map_err(map_call_error)?;
        if should_end {
            return self.finish(&mut state, user_id).await;
        }

        self.store.put(&state, self.ttl).await?;
        self.publish(&RealtimeEvent::CallDeclined(CallDeclined {
            call_id,
            user_id,
            initiator_id: state.initiator_id,
        }))
        .await
    }

    async fn finish(&self, state: &mut CallState, ended_by: UserId) -> ApplicationResult<()> {
        state.end();
        let event = RealtimeEvent::CallEnded(CallEnded {
            call_id: state.call_id,
            ended_by,
            participant_ids: state.participant_ids(),
        });
        self.store.delete(state.call_id).await?;
        self.publish(&event).await?;
        info!(call_id = %state.call_id, ended_by = %ended_by, "通话已结束");
        Ok(())
    }

    async fn load(&self, call_id: CallId) -> ApplicationResult<CallState> {
        self.store
            .get(call_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found(format!("通话不存在或已结束: {call_id}")))
    }

    async fn publish(&self, event: &RealtimeEvent) -> ApplicationResult<()> {
        let payload = event.envelope(self.clock.now())?.to_json()?;
        for channel in event.channels() {
            self.publisher
                .publish(&channel.to_string(), &payload)
                .await?;
        }
        Ok(())
    }
}

fn map_call_error(err: DomainError) -> ApplicationError {
    match err {
        DomainError::NotParticipant(user) => {
            ApplicationError::authorization(format!("用户不是通话参与者: {user}"))
        }
        DomainError::InvalidTransition { .. } => ApplicationError::Conflict(err.to_string()),
        other => other.into(),
    }
}
