//! The `utils` module provides shared definitions used across the `pubsub`
//! crate: the error types and logging setup.

pub mod error;
pub mod logging;

pub use error::{DeliveryError, Error, Result};

#[cfg(test)]
mod tests {
    use super::error::DeliveryError;
    use super::logging;
    use std::time::Duration;

    #[test]
    fn logging_init_accepts_levels() {
        // Should not panic
        logging::init("info");
        logging::init("debug");
        logging::init("WARNING");
        logging::init("nonsense");
    }

    #[test]
    fn delivery_error_messages() {
        assert_eq!(DeliveryError::Closed.to_string(), "outbound queue closed");
        assert_eq!(
            DeliveryError::TimedOut(Duration::from_millis(50)).to_string(),
            "subscriber did not accept payload within 50ms"
        );
    }
}
