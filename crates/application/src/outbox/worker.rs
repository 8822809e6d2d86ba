//! Outbox Worker
//!
//! 周期性拉取到期的 PENDING 行，逐行条件认领、按事件类型解码、发布到目标频道。
//! 发布失败累加重试次数，超过上限进入 FAILED；解码失败直接 FAILED。
//! 同一循环里定期回收认领超时的 PROCESSING 行。

use std::sync::Arc;
use std::time::Duration;

use domain::{
    Channel, EventEnvelope, OutboxDeadLettered, OutboxEvent, OutboxStatus, RealtimeEvent,
    Timestamp,
};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::{ApplicationError, ApplicationResult};
use crate::lifecycle::BackgroundTask;
use crate::repository::OutboxRepository;
use crate::retry::Backoff;
use crate::transport::EventPublisher;

#[derive(Debug, Clone)]
pub struct OutboxWorkerConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    /// 失败次数超过该值后置为 FAILED
    pub max_retries: i32,
    /// PROCESSING 行的认领租约
    pub lease_timeout: Duration,
    pub sweep_interval: Duration,
    /// 为 None 时失败行立即可被再次拉取
    pub retry_backoff: Option<Backoff>,
}

impl Default for OutboxWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            batch_size: 50,
            max_retries: 9,
            lease_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            retry_backoff: None,
        }
    }
}

/// 单个批次的处理统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub fetched: usize,
    pub claimed: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
    /// 认领失败（被其他 Worker 抢走）
    pub skipped: usize,
}

pub struct OutboxWorker {
    outbox: Arc<dyn OutboxRepository>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    config: OutboxWorkerConfig,
}

impl OutboxWorker {
    pub fn new(
        outbox: Arc<dyn OutboxRepository>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        config: OutboxWorkerConfig,
    ) -> Self {
        Self {
            outbox,
            publisher,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &OutboxWorkerConfig {
        &self.config
    }

    /// 处理一个批次
    pub async fn run_once(&self) -> ApplicationResult<BatchReport> {
        let now = self.clock.now();
        let events = self
            .outbox
            .fetch_pending(self.config.batch_size, now)
            .await?;

        let mut report = BatchReport {
            fetched: events.len(),
            ..BatchReport::default()
        };
        for event in events {
            self.process(event, &mut report).await;
        }

        if report.fetched > 0 {
            debug!(
                fetched = report.fetched,
                completed = report.completed,
                retried = report.retried,
                failed = report.failed,
                skipped = report.skipped,
                "outbox 批次处理完成"
            );
        }
        Ok(report)
    }

    async fn process(&self, event: OutboxEvent, report: &mut BatchReport) {
        match self.outbox.claim(event.id, self.clock.now()).await {
            Ok(true) => report.claimed += 1,
            Ok(false) => {
                report.skipped += 1;
                return;
            }
            Err(err) => {
                warn!(event_id = %event.id, error = %err, "认领 outbox 事件失败");
                report.skipped += 1;
                return;
            }
        }

        let realtime = match RealtimeEvent::decode(&event.event_type, &event.payload) {
            Ok(realtime) => realtime,
            Err(err) => {
                let reason = ApplicationError::permanent(err.to_string()).to_string();
                error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %reason,
                    "outbox 事件无法解码，直接标记为失败"
                );
                match self
                    .outbox
                    .mark_failed(event.id, &reason, self.clock.now())
                    .await
                {
                    Ok(()) => {
                        report.failed += 1;
                        self.notify_dead_letter(&event, Some(reason)).await;
                    }
                    Err(err) => warn!(event_id = %event.id, error = %err, "标记失败状态出错"),
                }
                return;
            }
        };

        match self.publish(&event, &realtime).await {
            Ok(()) => match self.outbox.mark_completed(event.id, self.clock.now()).await {
                Ok(()) => report.completed += 1,
                Err(err) => warn!(event_id = %event.id, error = %err, "标记完成状态出错"),
            },
            Err(err) => self.handle_publish_failure(&event, err, report).await,
        }
    }

    async fn publish(&self, row: &OutboxEvent, event: &RealtimeEvent) -> ApplicationResult<()> {
        let envelope = EventEnvelope {
            event_type: row.event_type.clone(),
            aggregate_type: row.aggregate_type.clone(),
            aggregate_id: row.aggregate_id,
            occurred_at: row.created_at,
            payload: event.payload()?,
        };
        let payload = envelope.to_json()?;

        for channel in event.channels() {
            self.publisher
                .publish(&channel.to_string(), &payload)
                .await?;
        }
        Ok(())
    }

    async fn handle_publish_failure(
        &self,
        event: &OutboxEvent,
        err: ApplicationError,
        report: &mut BatchReport,
    ) {
        let now = self.clock.now();
        let attempt = u32::try_from(event.retry_count.saturating_add(1)).unwrap_or(1);
        let next_retry_at = self.next_retry_at(attempt, now);
        let reason = err.to_string();

        match self
            .outbox
            .record_failure(
                event.id,
                &reason,
                self.config.max_retries,
                next_retry_at,
                now,
            )
            .await
        {
            Ok(OutboxStatus::Failed) => {
                report.failed += 1;
                error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    attempts = attempt,
                    error = %reason,
                    "outbox 事件超过重试上限，标记为失败"
                );
                let mut failed = event.clone();
                failed.retry_count = event.retry_count.saturating_add(1);
                self.notify_dead_letter(&failed, Some(reason)).await;
            }
            Ok(_) => {
                report.retried += 1;
                warn!(
                    event_id = %event.id,
                    attempts = attempt,
                    error = %reason,
                    "outbox 事件发布失败，等待重试"
                );
            }
            Err(repo_err) => {
                warn!(event_id = %event.id, error = %repo_err, "记录发布失败出错");
            }
        }
    }

    fn next_retry_at(&self, attempt: u32, now: Timestamp) -> Option<Timestamp> {
        let backoff = self.config.retry_backoff.as_ref()?;
        let delay = chrono::Duration::from_std(backoff.delay_at(attempt)).ok()?;
        Some(now + delay)
    }

    /// 尽力发布死信通知，失败只记日志
    async fn notify_dead_letter(&self, event: &OutboxEvent, reason: Option<String>) {
        let notice = RealtimeEvent::OutboxDeadLettered(OutboxDeadLettered {
            event_id: event.id.as_uuid(),
            event_type: event.event_type.clone(),
            aggregate_type: event.aggregate_type.clone(),
            aggregate_id: event.aggregate_id,
            retry_count: event.retry_count,
            error: reason,
        });

        let payload = match notice
            .envelope(self.clock.now())
            .and_then(|envelope| envelope.to_json())
        {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "构建死信通知失败");
                return;
            }
        };

        if let Err(err) = self
            .publisher
            .publish(Channel::SYSTEM_OUTBOX, &payload)
            .await
        {
            warn!(event_id = %event.id, error = %err, "发布死信通知失败");
        }
    }

    /// 回收超时的认领
    pub async fn sweep_stale_claims(&self) -> ApplicationResult<u64> {
        let now = self.clock.now();
        let lease = chrono::Duration::from_std(self.config.lease_timeout)
            .map_err(|e| ApplicationError::validation(e.to_string()))?;
        let reset = self.outbox.reset_stale_claims(now - lease, now).await?;
        if reset > 0 {
            warn!(count = reset, "回收认领超时的 outbox 事件");
        }
        Ok(reset)
    }

    /// 启动轮询循环
    pub fn start(self: Arc<Self>) -> BackgroundTask {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            max_retries = self.config.max_retries,
            "启动 outbox worker"
        );

        BackgroundTask::spawn("outbox-worker", move |token| async move {
            let mut ticker = tokio::time::interval(self.config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut sweeper = tokio::time::interval(self.config.sweep_interval);
            sweeper.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.run_once().await {
                            warn!(error = %err, "outbox 批次处理失败");
                        }
                    }
                    _ = sweeper.tick() => {
                        if let Err(err) = self.sweep_stale_claims().await {
                            warn!(error = %err, "回收超时认领失败");
                        }
                    }
                }
            }
            info!("outbox worker 已停止");
        })
    }
}
