//! The `error` module defines the error types used within the `pubsub` crate.
//!
//! Broker operations themselves are infallible from the caller's point of view;
//! [`DeliveryError`] only describes why a single subscriber was dropped during a
//! fan-out. [`Error`] covers the fallible edges: configuration and sockets.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by configuration loading and the network transport.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reason a payload could not be handed to a subscriber.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The transport dropped its side of the outbound queue.
    #[error("outbound queue closed")]
    Closed,

    /// The subscriber did not accept the payload within the publish timeout.
    #[error("subscriber did not accept payload within {0:?}")]
    TimedOut(Duration),
}

pub type Result<T> = std::result::Result<T, Error>;
