//! The `transport` module exposes the broker over the network.
//!
//! Each WebSocket connection is one subscriber: everything published is
//! written to it, and everything it sends is published.

pub mod websocket;

pub use websocket::{serve, serve_listener, start_websocket_server};

#[cfg(test)]
mod tests;
