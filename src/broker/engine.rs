//! Broker engine
//!
//! This module contains the in-memory broker responsible for:
//! - keeping the registry of subscribers keyed by a caller-chosen id
//! - fanning every published payload out to every registered subscriber
//! - the start/stop lifecycle of the per-subscriber delivery tasks
//!
//! Concurrency and usage notes:
//! - `Broker` is a cheap clonable handle; all clones share one registry.
//! - Registry mutation (`register`, `unregister`, `start`, `stop`) takes the
//!   registry lock exclusively. `publish` takes it shared for the whole
//!   fan-out, so a publish observes a fixed subscriber set and returns only
//!   once every subscriber has accepted the payload (or been dropped).
//! - Every delivery task gets its own child token of the lifecycle token
//!   minted by `start`. `stop` cancels the lifecycle token, which reaches
//!   exactly the tasks spawned since that `start`; `unregister` and a
//!   superseding `register` cancel the one task bound to the key.
//! - `publish` works whether or not the broker is running. Only the
//!   forwarding of inbound payloads depends on the lifecycle.
//! - `stop_within`/`shutdown_within` abort delivery tasks that outlive the
//!   grace period, which also frees a registry lock held by a stuck publish.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::dispatcher;
use crate::broker::registry::{DeliveryTask, Subscriber, SubscriberId};
use crate::client::Client;
use crate::utils::error::DeliveryError;

/// Tunables for delivery behaviour.
#[derive(Debug, Clone, Default)]
pub struct BrokerOptions {
    /// How long a single subscriber may take to accept a payload before it is
    /// disconnected. `None` waits indefinitely, so one stalled subscriber
    /// stalls every publisher.
    pub publish_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct Broker {
    inner: Arc<Inner>,
}

/// Non-owning handle held by delivery tasks so they never keep a dropped
/// broker alive.
#[derive(Debug, Clone)]
pub(crate) struct WeakBroker(Weak<Inner>);

impl WeakBroker {
    pub(crate) fn upgrade(&self) -> Option<Broker> {
        self.0.upgrade().map(|inner| Broker { inner })
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: RwLock<State>,
    options: BrokerOptions,
    // Serializes `start`/`stop` so a stop that is still draining tasks cannot
    // interleave with a new start.
    lifecycle_gate: Mutex<()>,
    // Every delivery task still alive, whether or not the registry points at
    // it. Kept outside `state` so tasks can be aborted while a stuck publish
    // holds the registry lock.
    tasks: StdMutex<Vec<AbortHandle>>,
}

#[derive(Debug, Default)]
struct State {
    registry: HashMap<SubscriberId, Subscriber>,
    running: bool,
    lifecycle: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.state.get_mut().lifecycle.cancel();
    }
}

// Payloads that could not be delivered, keyed by the subscriber and the exact
// outbound queue they were offered to.
type Undelivered = Vec<(SubscriberId, mpsc::Sender<Bytes>)>;

/// Acquire mutex guard, ignoring poisoning
fn lock_ignore_poison<T>(m: &StdMutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Broker {
    /// Create an idle broker: stopped, with an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: BrokerOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State::default()),
                options,
                lifecycle_gate: Mutex::new(()),
                tasks: StdMutex::new(Vec::new()),
            }),
        }
    }

    pub fn options(&self) -> &BrokerOptions {
        &self.inner.options
    }

    pub(crate) fn downgrade(&self) -> WeakBroker {
        WeakBroker(Arc::downgrade(&self.inner))
    }

    /// Register `client` under `key`. If the broker is running a delivery
    /// task is bound to it immediately.
    ///
    /// Registering over an existing key replaces that subscriber: its
    /// delivery task is cancelled and the broker drops its queue halves, so
    /// the old transport sees its outbound queue close.
    pub async fn register(&self, key: impl Into<SubscriberId>, client: Client) {
        let key = key.into();
        let mut state = self.inner.state.write().await;

        let mut subscriber = Subscriber::new(client);
        if state.running {
            let task = self.spawn_delivery(&key, &subscriber.inbound, &state.lifecycle);
            subscriber.task = Some(task);
        }

        match state.registry.insert(key.clone(), subscriber) {
            Some(previous) => {
                previous.cancel();
                info!(key = %key, "replaced client");
            }
            None => info!(key = %key, "registered client"),
        }
    }

    /// Remove the subscriber registered under `key` and cancel its delivery
    /// task. Unknown keys are ignored.
    pub async fn unregister(&self, key: &str) {
        let mut state = self.inner.state.write().await;
        match state.registry.remove(key) {
            Some(subscriber) => {
                subscriber.cancel();
                info!(key = %key, "unregistered client");
            }
            None => debug!(key = %key, "unregister for unknown client"),
        }
    }

    /// Broadcast `payload` to every registered subscriber.
    ///
    /// Returns once every subscriber has accepted the payload. Subscribers
    /// whose outbound queue is closed, or that exceed the configured publish
    /// timeout, are dropped from the registry; the rest still receive it.
    pub async fn publish(&self, payload: impl Into<Bytes>) {
        let payload = payload.into();

        let undelivered: Undelivered = {
            let state = self.inner.state.read().await;
            if state.registry.is_empty() {
                return;
            }

            let sends = state.registry.iter().map(|(key, subscriber)| {
                let payload = payload.clone();
                async move {
                    match self.offer(&subscriber.outbound, payload).await {
                        Ok(()) => None,
                        Err(e) => {
                            warn!(key = %key, "dropping client: {e}");
                            Some((key.clone(), subscriber.outbound.clone()))
                        }
                    }
                }
            });

            join_all(sends).await.into_iter().flatten().collect()
        };

        if !undelivered.is_empty() {
            self.evict(undelivered).await;
        }
    }

    /// Spawn one delivery task per registered client. Does nothing if the
    /// broker is already running.
    pub async fn start(&self) {
        let _gate = self.inner.lifecycle_gate.lock().await;
        let mut state = self.inner.state.write().await;
        if state.running {
            debug!("broker already running");
            return;
        }

        state.running = true;
        state.lifecycle = CancellationToken::new();

        let State {
            registry,
            lifecycle,
            ..
        } = &mut *state;
        for (key, subscriber) in registry.iter_mut() {
            subscriber.task = Some(self.spawn_delivery(key, &subscriber.inbound, lifecycle));
        }

        info!(clients = registry.len(), "broker started");
    }

    /// Cancel every delivery task spawned since the last `start` and wait for
    /// them to exit. Registrations are kept, so a stopped broker can be
    /// restarted. Does nothing if the broker is not running.
    ///
    /// Publishes already in flight inside a delivery task are allowed to
    /// finish, however long a stalled subscriber makes them take.
    pub async fn stop(&self) {
        self.halt(None).await;
    }

    /// Like [`stop`](Self::stop), but tasks still running after `grace` are
    /// aborted, dropping whatever publish they were blocked in.
    pub async fn stop_within(&self, grace: Duration) {
        self.halt(Some(grace)).await;
    }

    /// Stop the broker and drop every registration. Transports observe their
    /// outbound queues closing.
    pub async fn shutdown(&self) {
        self.halt(None).await;
        self.release_all().await;
    }

    /// Shutdown with a bounded drain: see [`stop_within`](Self::stop_within).
    ///
    /// Only delivery tasks are aborted. A publish issued directly by some
    /// other caller against a stalled subscriber still holds up the final
    /// release of the registry.
    pub async fn shutdown_within(&self, grace: Duration) {
        self.halt(Some(grace)).await;
        self.release_all().await;
    }

    pub async fn is_running(&self) -> bool {
        self.inner.state.read().await.running
    }

    /// Number of registered subscribers.
    pub async fn len(&self) -> usize {
        self.inner.state.read().await.registry.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.state.read().await.registry.is_empty()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.state.read().await.registry.contains_key(key)
    }

    /// Number of delivery tasks currently alive, including cancelled tasks
    /// that have not exited yet.
    pub fn delivery_tasks(&self) -> usize {
        lock_ignore_poison(&self.inner.tasks)
            .iter()
            .filter(|task| !task.is_finished())
            .count()
    }

    // The grace period covers taking the registry lock as well: a delivery
    // task blocked in publish holds it shared until it is aborted.
    async fn halt(&self, grace: Option<Duration>) {
        let _gate = self.inner.lifecycle_gate.lock().await;
        let Some(grace) = grace else {
            self.drain().await;
            return;
        };

        if tokio::time::timeout(grace, self.drain()).await.is_err() {
            let stuck = self.abort_delivery();
            warn!(tasks = stuck, "delivery tasks did not drain in {grace:?}, aborted");
            self.drain().await;
        }
    }

    async fn drain(&self) {
        let tasks: Vec<DeliveryTask> = {
            let mut state = self.inner.state.write().await;
            if !state.running {
                debug!("broker not running");
                return;
            }

            state.running = false;
            state.lifecycle.cancel();
            state
                .registry
                .values_mut()
                .filter_map(|subscriber| subscriber.task.take())
                .collect()
        };

        let count = tasks.len();
        join_all(tasks.into_iter().map(DeliveryTask::join)).await;
        info!(tasks = count, "broker stopped");
    }

    // Returns how many tasks were still alive.
    fn abort_delivery(&self) -> usize {
        let mut tasks = lock_ignore_poison(&self.inner.tasks);
        let alive = tasks.iter().filter(|task| !task.is_finished()).count();
        for task in tasks.drain(..) {
            task.abort();
        }
        alive
    }

    async fn release_all(&self) {
        let mut state = self.inner.state.write().await;
        let clients = state.registry.len();
        for (_, subscriber) in state.registry.drain() {
            subscriber.cancel();
        }
        info!(clients, "broker shut down");
    }

    fn spawn_delivery(
        &self,
        key: &SubscriberId,
        inbound: &Arc<Mutex<mpsc::Receiver<Bytes>>>,
        lifecycle: &CancellationToken,
    ) -> DeliveryTask {
        let token = lifecycle.child_token();
        let handle = tokio::spawn(dispatcher::run(
            key.clone(),
            inbound.clone(),
            token.clone(),
            self.downgrade(),
        ));

        let mut tasks = lock_ignore_poison(&self.inner.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle.abort_handle());

        DeliveryTask { token, handle }
    }

    async fn offer(
        &self,
        outbound: &mpsc::Sender<Bytes>,
        payload: Bytes,
    ) -> Result<(), DeliveryError> {
        match self.inner.options.publish_timeout {
            Some(limit) => match tokio::time::timeout(limit, outbound.send(payload)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(DeliveryError::Closed),
                Err(_) => Err(DeliveryError::TimedOut(limit)),
            },
            None => outbound
                .send(payload)
                .await
                .map_err(|_| DeliveryError::Closed),
        }
    }

    // Only removes an entry if it still holds the queue the payload was
    // offered to; the key may have been re-registered in the meantime.
    async fn evict(&self, undelivered: Undelivered) {
        let mut state = self.inner.state.write().await;
        for (key, outbound) in undelivered {
            let current = state
                .registry
                .get(&key)
                .is_some_and(|subscriber| subscriber.outbound.same_channel(&outbound));
            if !current {
                continue;
            }
            if let Some(subscriber) = state.registry.remove(&key) {
                subscriber.cancel();
                warn!(key = %key, "removed unreachable client");
            }
        }
    }
}
