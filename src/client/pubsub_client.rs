//! Client representation
//!
//! A subscription is a pair of bounded queues. The broker holds the [`Client`]
//! half: it reads `inbound` and writes `outbound`. The transport holds the
//! [`Connection`] half: it writes `inbound` and reads `outbound`. Each side can
//! only close its own ends, so "going away" is signalled by dropping a half,
//! never by closing the peer's queue.

use bytes::Bytes;
use tokio::sync::mpsc;

/// Default queue depth. One slot is the closest a tokio channel gets to a
/// synchronous handoff.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1;

/// Broker-owned half of a subscription.
#[derive(Debug)]
pub struct Client {
    /// Payloads submitted by the transport on behalf of this subscriber.
    pub inbound: mpsc::Receiver<Bytes>,

    /// Payloads fanned out by the broker to this subscriber.
    pub outbound: mpsc::Sender<Bytes>,
}

/// Transport-owned half of a subscription.
#[derive(Debug)]
pub struct Connection {
    pub inbound: mpsc::Sender<Bytes>,
    pub outbound: mpsc::Receiver<Bytes>,
}

impl Client {
    /// Create both halves of a subscription with `capacity` slots per queue.
    ///
    /// A capacity of zero is bumped to one since tokio channels cannot be
    /// unbuffered.
    pub fn pair(capacity: usize) -> (Client, Connection) {
        let capacity = capacity.max(1);
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let (out_tx, out_rx) = mpsc::channel(capacity);

        let client = Client {
            inbound: in_rx,
            outbound: out_tx,
        };
        let connection = Connection {
            inbound: in_tx,
            outbound: out_rx,
        };
        (client, connection)
    }
}

impl Connection {
    /// Submit a payload for broadcast through this subscriber's delivery task.
    ///
    /// Returns the payload back if the broker side has gone away.
    pub async fn submit(&self, payload: Bytes) -> Result<(), Bytes> {
        self.inbound.send(payload).await.map_err(|e| e.0)
    }

    /// Wait for the next payload fanned out to this subscriber. `None` once the
    /// broker has dropped its half.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.outbound.recv().await
    }
}
