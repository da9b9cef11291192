//! Delivery task
//!
//! One task runs per registered client while the broker is running. It
//! forwards every payload the transport submits on the client's inbound
//! queue to [`Broker::publish`](crate::broker::Broker::publish), so a
//! subscriber connection can double as a publish channel.
//!
//! The task exits when its cancellation token fires, when the inbound queue
//! is closed by the transport, or when the broker itself has been dropped.
//! A publish already in progress is allowed to finish before cancellation is
//! observed.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::broker::engine::WeakBroker;
use crate::broker::registry::SubscriberId;

pub(crate) async fn run(
    key: SubscriberId,
    inbound: Arc<Mutex<mpsc::Receiver<Bytes>>>,
    token: CancellationToken,
    broker: WeakBroker,
) {
    let mut inbound = tokio::select! {
        _ = token.cancelled() => return,
        guard = inbound.lock_owned() => guard,
    };

    debug!(key = %key, "delivery task started");

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            msg = inbound.recv() => {
                let Some(payload) = msg else {
                    warn!(key = %key, "inbound queue closed prematurely");
                    break;
                };
                let Some(broker) = broker.upgrade() else {
                    break;
                };
                broker.publish(payload).await;
            }
        }
    }

    debug!(key = %key, "delivery task exited");
}
