#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use application::calls::CallSignalingRelay;
use application::memory::{InMemoryCallStateStore, InMemoryPubSub, InMemoryStore};
use application::{
    register_default_handlers, BackgroundTask, Clock, CommandBus, ConversationAccessProxy,
    HandlerDependencies, Hub, OutboxEmitter, OutboxWorker, OutboxWorkerConfig, PrincipalProxy,
    PubSubBridge, RepositoryChannelAuthorizer, SubscriptionService, SystemClock,
};
use chrono::Utc;
use domain::{Conversation, ConversationId, UserId};
use tokio::{net::TcpListener, sync::oneshot};
use web_api::{router, AppState, JwtConfig, JwtService, PresenceGate, WsSettings};

/// 内存装配的完整服务：Outbox Worker 与 Pub/Sub 桥接都在后台运行
pub struct TestServer {
    pub addr: SocketAddr,
    pub store: InMemoryStore,
    pub pubsub: InMemoryPubSub,
    pub hub: Arc<Hub>,
    pub jwt: Arc<JwtService>,
    worker: BackgroundTask,
    bridge: BackgroundTask,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let store = InMemoryStore::new();
        let pubsub = InMemoryPubSub::new();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let hub = Arc::new(Hub::new());

        let emitter = Arc::new(OutboxEmitter::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            clock.clone(),
        ));
        let relay = Arc::new(CallSignalingRelay::new(
            Arc::new(InMemoryCallStateStore::new()),
            Arc::new(pubsub.clone()),
            clock.clone(),
            Duration::from_secs(120),
        ));

        let mut bus = CommandBus::new();
        register_default_handlers(
            &mut bus,
            HandlerDependencies {
                emitter,
                conversations: Arc::new(store.clone()),
                relay: relay.clone(),
            },
        )
        .expect("register handlers");
        bus.add_proxy(Arc::new(PrincipalProxy));
        bus.add_proxy(Arc::new(ConversationAccessProxy::new(Arc::new(store.clone()))));

        let authorizer = Arc::new(RepositoryChannelAuthorizer::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
        ));
        let subscriptions = Arc::new(SubscriptionService::new(hub.clone(), authorizer));

        let jwt = Arc::new(JwtService::new(JwtConfig {
            secret: "integration-test-secret-key-0123456789".to_string(),
            expiration_hours: 1,
        }));

        let worker = Arc::new(OutboxWorker::new(
            Arc::new(store.clone()),
            Arc::new(pubsub.clone()),
            clock.clone(),
            OutboxWorkerConfig {
                poll_interval: Duration::from_millis(20),
                ..OutboxWorkerConfig::default()
            },
        ))
        .start();
        let bridge = Arc::new(PubSubBridge::new(Arc::new(pubsub.clone()), hub.clone()))
            .start()
            .await
            .expect("start bridge");

        let state = AppState {
            bus: Arc::new(bus),
            hub: hub.clone(),
            subscriptions,
            relay,
            outbox: Arc::new(store.clone()),
            jwt_service: jwt.clone(),
            clock,
            presence: Arc::new(PresenceGate::default()),
            ws: WsSettings::default(),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(state);
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            store,
            pubsub,
            hub,
            jwt,
            worker,
            bridge,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/ws?token={}", self.addr, token)
    }

    pub fn token(&self, user: UserId) -> String {
        self.jwt.generate_token(user).expect("token")
    }

    pub async fn conversation(&self, creator: UserId, members: &[UserId]) -> Conversation {
        let conversation =
            Conversation::new(ConversationId::new(), None, creator, members, Utc::now())
                .expect("valid conversation");
        self.store.seed_conversation(conversation.clone()).await;
        conversation
    }

    pub async fn stop(mut self) {
        self.hub.shutdown().await;
        self.worker.stop().await;
        self.bridge.stop().await;
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
