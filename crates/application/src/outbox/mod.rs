pub mod emitter;
pub mod worker;

pub use emitter::{Emission, OutboxEmitter};
pub use worker::{BatchReport, OutboxWorker, OutboxWorkerConfig};
