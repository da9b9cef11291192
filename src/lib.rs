//! # PubSub
//!
//! `pubsub` is an in-process publish/subscribe broker. Publishers submit opaque
//! byte payloads and every registered subscriber receives every payload, in
//! publish order, over its own queue. Delivery is best-effort and in-memory:
//! nothing is persisted, replayed or acknowledged.
//!
//! ## Core Modules
//!
//! - `broker`: the subscriber registry, the fan-out and the start/stop
//!   lifecycle of per-subscriber delivery tasks.
//! - `client`: the two halves of a subscription, one for the broker and one
//!   for the transport.
//! - `config`: loading server, broker and logging settings.
//! - `transport`: a thin WebSocket front end where each connection is a
//!   subscriber and each frame it sends is published.
//! - `utils`: error types and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod transport;
pub mod utils;

pub use broker::{Broker, BrokerOptions};
pub use client::{Client, Connection};
