pub mod authorizer;
pub mod bridge;
pub mod frames;
pub mod hub;
pub mod subscriptions;

pub use authorizer::{ChannelAuthorizer, RepositoryChannelAuthorizer};
pub use bridge::{channel_patterns, PubSubBridge};
pub use frames::{ClientFrame, ServerFrame};
pub use hub::{
    BroadcastOutcome, ClientHandle, ClientId, Delivery, Departure, Hub, HubStats, OutboundFrame,
};
pub use subscriptions::SubscriptionService;
