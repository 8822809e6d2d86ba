pub mod relay;
pub mod store;

pub use relay::{CallSignalingRelay, Signal, SignalKind};
pub use store::CallStateStore;
