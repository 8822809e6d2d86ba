//! 内存实现
//!
//! 与生产实现遵循同样的契约，供测试和本地开发使用。

mod call_state;
mod pubsub;
mod store;

pub use call_state::InMemoryCallStateStore;
pub use pubsub::{pattern_matches, InMemoryPubSub};
pub use store::{InMemoryStore, MemoryTransaction};
