//! Activity-to-heartbeat pipeline: classify, buffer, dispatch.

pub mod classifier;
pub mod dispatcher;
pub mod queue;

pub use classifier::{ClassifierState, HeartbeatClassifier, DEFAULT_DEBOUNCE};
pub use dispatcher::{Dispatcher, TickOutcome, DEFAULT_INTERVAL};
pub use queue::HeartbeatQueue;
