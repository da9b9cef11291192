//! The `client` module defines the two halves of a subscription.
//!
//! A [`Client`] is handed to the broker on registration; the matching
//! [`Connection`] stays with the transport, which drains fanned-out payloads
//! from it and optionally submits payloads for broadcast through it.

pub mod pubsub_client;
pub use pubsub_client::{Client, Connection, DEFAULT_QUEUE_CAPACITY};

#[cfg(test)]
mod tests;
