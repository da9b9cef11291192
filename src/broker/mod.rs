//! The `broker` module holds the subscriber registry, the fan-out and the
//! lifecycle of the per-subscriber delivery tasks.

mod dispatcher;
pub mod engine;
pub mod registry;

pub use engine::{Broker, BrokerOptions};
pub use registry::SubscriberId;
