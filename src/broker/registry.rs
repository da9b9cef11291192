//! Registry entries
//!
//! A `Subscriber` is what the broker keeps per key: the write side of the
//! client's outbound queue, the read side of its inbound queue, and the
//! handle of the delivery task currently bound to it, if any.
//!
//! The inbound receiver sits behind an async mutex so that it outlives any
//! single delivery task: stopping the broker ends the task, and the next
//! `start` binds a fresh task to the same queue. At most one task holds the
//! lock at a time.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::client::Client;

pub type SubscriberId = String;

#[derive(Debug)]
pub struct Subscriber {
    pub outbound: mpsc::Sender<Bytes>,
    pub inbound: Arc<Mutex<mpsc::Receiver<Bytes>>>,
    pub task: Option<DeliveryTask>,
}

impl Subscriber {
    pub fn new(client: Client) -> Self {
        Self {
            outbound: client.outbound,
            inbound: Arc::new(Mutex::new(client.inbound)),
            task: None,
        }
    }

    /// Signal the bound delivery task, if any, to exit. Does not wait for it.
    pub fn cancel(&self) {
        if let Some(task) = &self.task {
            task.cancel();
        }
    }
}

/// A spawned delivery task and the token that stops it.
#[derive(Debug)]
pub struct DeliveryTask {
    pub token: CancellationToken,
    pub handle: JoinHandle<()>,
}

impl DeliveryTask {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the task to run to completion. A panicked task is reported
    /// and otherwise ignored.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                error!("delivery task panicked: {e}");
            }
        }
    }
}
