//! 主应用程序入口
//!
//! 装配 PostgreSQL、Redis、命令总线、Outbox Worker、Pub/Sub 桥接与 Hub，
//! 然后启动 Axum Web API 服务。收到 Ctrl+C 后按顺序停止各组件。

use std::sync::Arc;

use application::calls::CallSignalingRelay;
use application::{
    register_default_handlers, Backoff, Clock, CommandBus, ConversationAccessProxy,
    HandlerDependencies, Hub, OutboxEmitter, OutboxWorker, OutboxWorkerConfig, PrincipalProxy,
    PubSubBridge, RepositoryChannelAuthorizer, SubscriptionService, SystemClock,
};
use config::AppConfig;
use infrastructure::{
    create_pg_pool, PgOutboxRepository, PgStore, RedisCallStateStore, RedisEventPublisher,
    RedisEventSubscriber, SubscriberSettings, MIGRATOR,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService, PresenceGate, WsSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    config.validate()?;

    tracing::info!(
        "连接数据库: {}",
        config.database.url.split('@').last().unwrap_or("unknown")
    );
    let pg_pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;
    MIGRATOR.run(&pg_pool).await?;

    let store = PgStore::new(pg_pool.clone());
    let outbox = Arc::new(PgOutboxRepository::new(pg_pool));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Redis：发布者与通话状态共用一个连接管理器，订阅者单独维护连接
    let redis_connection = redis::Client::open(config.redis.url.as_str())?
        .get_connection_manager()
        .await?;
    let publisher = Arc::new(RedisEventPublisher::from_connection(redis_connection.clone()));
    let call_states = Arc::new(RedisCallStateStore::new(redis_connection));
    let subscriber = Arc::new(RedisEventSubscriber::new(
        &config.redis.url,
        SubscriberSettings {
            channel_capacity: config.redis.channel_capacity,
            reconnect: Backoff::exponential(
                Duration::from_millis(config.redis.reconnect_base_ms),
                Duration::from_millis(config.redis.reconnect_max_ms),
            ),
            max_reconnect_attempts: None,
        },
    )?);

    // 命令总线
    let emitter = Arc::new(OutboxEmitter::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        clock.clone(),
    ));
    let relay = Arc::new(CallSignalingRelay::new(
        call_states,
        publisher.clone(),
        clock.clone(),
        config.calls.state_ttl(),
    ));
    let mut bus = CommandBus::new();
    register_default_handlers(
        &mut bus,
        HandlerDependencies {
            emitter,
            conversations: Arc::new(store.clone()),
            relay: relay.clone(),
        },
    )?;
    bus.add_proxy(Arc::new(PrincipalProxy));
    bus.add_proxy(Arc::new(ConversationAccessProxy::new(Arc::new(store.clone()))));

    // 实时推送
    let hub = Arc::new(Hub::new());
    let authorizer = Arc::new(RepositoryChannelAuthorizer::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store),
    ));
    let subscriptions = Arc::new(SubscriptionService::new(hub.clone(), authorizer));

    let bridge = Arc::new(PubSubBridge::new(subscriber.clone(), hub.clone()))
        .start()
        .await?;

    let worker_config = OutboxWorkerConfig {
        poll_interval: config.outbox.poll_interval(),
        batch_size: config.outbox.batch_size,
        max_retries: config.outbox.max_retries,
        lease_timeout: config.outbox.lease_timeout(),
        sweep_interval: config.outbox.sweep_interval(),
        retry_backoff: config.outbox.retry_backoff_base_ms.map(|base_ms| {
            Backoff::exponential(
                Duration::from_millis(base_ms),
                Duration::from_millis(config.outbox.retry_backoff_max_ms),
            )
        }),
    };
    let worker = Arc::new(OutboxWorker::new(
        outbox.clone(),
        publisher,
        clock.clone(),
        worker_config,
    ))
    .start();

    let state = AppState {
        bus: Arc::new(bus),
        hub: hub.clone(),
        subscriptions,
        relay,
        outbox,
        jwt_service: Arc::new(JwtService::new(config.jwt.clone())),
        clock,
        presence: Arc::new(PresenceGate::default()),
        ws: WsSettings {
            queue_capacity: config.hub.client_queue_capacity,
            ping_interval: config.hub.ping_interval(),
        },
    };

    // 启动 Web 服务器
    let app = router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("实时消息服务启动在 http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub.clone()))
        .await?;

    worker.stop().await;
    bridge.stop().await;
    subscriber.shutdown();
    tracing::info!("服务已停止");

    Ok(())
}

/// 等待 Ctrl+C；先关闭 Hub，让 WebSocket 写循环发送 Close 后退出
async fn shutdown_signal(hub: Arc<Hub>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "监听关闭信号失败");
    }
    tracing::info!("收到关闭信号，开始停止服务");
    hub.shutdown().await;
}
