#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use application::calls::CallSignalingRelay;
use application::memory::{InMemoryCallStateStore, InMemoryPubSub, InMemoryStore};
use application::{
    register_default_handlers, ApplicationResult, Clock, Command, CommandBus, CommandContext,
    CommandResult, ConversationAccessProxy, HandlerDependencies, Hub, ManualClock, OutboxEmitter,
    OutboxWorker, OutboxWorkerConfig, PrincipalProxy,
};
use application::commands::SendMessageCommand;
use chrono::Utc;
use domain::{Conversation, ConversationId, MessageType, UserId};

/// 测试用的完整内存装配
pub struct Harness {
    pub store: InMemoryStore,
    pub pubsub: InMemoryPubSub,
    pub call_states: InMemoryCallStateStore,
    pub clock: Arc<ManualClock>,
    pub bus: Arc<CommandBus>,
    pub relay: Arc<CallSignalingRelay>,
    pub hub: Arc<Hub>,
}

impl Harness {
    pub fn new() -> Self {
        let store = InMemoryStore::new();
        let pubsub = InMemoryPubSub::new();
        let call_states = InMemoryCallStateStore::new();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let dyn_clock: Arc<dyn Clock> = clock.clone();

        let emitter = Arc::new(OutboxEmitter::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            dyn_clock.clone(),
        ));
        let relay = Arc::new(CallSignalingRelay::new(
            Arc::new(call_states.clone()),
            Arc::new(pubsub.clone()),
            dyn_clock,
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

        Self {
            store,
            pubsub,
            call_states,
            clock,
            bus: Arc::new(bus),
            relay,
            hub: Arc::new(Hub::new()),
        }
    }

    pub fn worker(&self, config: OutboxWorkerConfig) -> OutboxWorker {
        OutboxWorker::new(
            Arc::new(self.store.clone()),
            Arc::new(self.pubsub.clone()),
            self.clock.clone(),
            config,
        )
    }

    pub async fn conversation(&self, creator: UserId, members: &[UserId]) -> Conversation {
        let conversation = Conversation::new(
            ConversationId::new(),
            None,
            creator,
            members,
            self.clock.now(),
        )
        .expect("valid conversation");
        self.store.seed_conversation(conversation.clone()).await;
        conversation
    }

    pub async fn execute(&self, command: Command) -> ApplicationResult<CommandResult> {
        let ctx = CommandContext::new(command.actor_id());
        self.bus.execute(&ctx, &command).await
    }
}

pub fn send_message(
    actor: UserId,
    conversation_id: ConversationId,
    content: &str,
    idempotency_key: Option<&str>,
) -> Command {
    Command::SendMessage(SendMessageCommand {
        actor_id: actor,
        conversation_id,
        content: content.to_string(),
        message_type: MessageType::Text,
        idempotency_key: idempotency_key.map(str::to_string),
    })
}
