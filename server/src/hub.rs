//! Connection registry and broadcaster.
//!
//! The hub owns the set of live connections behind a single lock. Membership
//! changes, direct sends and broadcast scans all serialize on that lock, so a
//! connection can never be added or removed halfway through a broadcast.
//!
//! Enqueueing never waits. A connection whose queue is full when a message must
//! be delivered is treated as stuck: it is removed from the registry and its
//! send loop is told to close the channel with [`CloseReason::SlowConsumer`].
//! Everyone else still gets the message.

use crate::connection::{self, ConnectionId, EnqueueError, Outbound, Registration};
use crate::transport::{CloseReason, FrameSink};
use gather_shared::{Envelope, DEFAULT_QUEUE_CAPACITY};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

pub struct Hub {
    connections: Mutex<HashMap<ConnectionId, Outbound>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl Hub {
    /// Creates an empty hub; every connection gets `queue_capacity` outbound slots.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Adds a connection and starts its send loop.
    ///
    /// The caller registers each physical channel once and keeps the returned
    /// [`Registration`] for its read loop.
    pub async fn register<S: FrameSink>(&self, sink: S) -> Registration {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let mut connections = self.connections.lock().await;
        let (outbound, registration) = connection::open(id, sink, self.queue_capacity);
        connections.insert(id, outbound);
        info!("Connection {} registered ({} live)", id, connections.len());

        registration
    }

    /// Removes a connection and closes its channel normally.
    ///
    /// Returns false if it was already gone (evicted or unregistered before).
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.lock().await;
        match connections.remove(&id) {
            Some(outbound) => {
                outbound.shut(CloseReason::Normal);
                info!("Connection {} unregistered ({} live)", id, connections.len());
                true
            }
            None => false,
        }
    }

    /// Delivers `envelope` to every registered connection, evicting stuck ones.
    ///
    /// Returns how many connections accepted it.
    pub async fn broadcast(&self, envelope: Envelope) -> usize {
        let mut connections = self.connections.lock().await;
        let mut delivered = 0;
        let mut failed = Vec::new();

        for (id, outbound) in connections.iter() {
            match outbound.try_enqueue(envelope.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => failed.push((*id, e)),
            }
        }

        for (id, error) in failed {
            if let Some(outbound) = connections.remove(&id) {
                Self::drop_connection(id, outbound, error);
            }
        }

        debug!("Broadcast {} to {} connections", envelope.kind, delivered);
        delivered
    }

    /// Delivers `envelope` to one connection under the same eviction policy.
    ///
    /// Returns false if the connection is unknown or was just evicted.
    pub async fn send_to(&self, id: ConnectionId, envelope: Envelope) -> bool {
        let mut connections = self.connections.lock().await;
        let error = match connections.get(&id) {
            Some(outbound) => match outbound.try_enqueue(envelope) {
                Ok(()) => return true,
                Err(e) => e,
            },
            None => return false,
        };

        if let Some(outbound) = connections.remove(&id) {
            Self::drop_connection(id, outbound, error);
        }
        false
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.lock().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    /// Closes every connection with a going-away code and waits for the send loops.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.connections.lock().await.drain().collect();
        info!("Closing {} connections", drained.len());

        let tasks: Vec<_> = drained
            .into_iter()
            .map(|(_, outbound)| outbound.shut(CloseReason::GoingAway))
            .collect();
        for task in tasks {
            let _ = task.await;
        }
    }

    fn drop_connection(id: ConnectionId, outbound: Outbound, error: EnqueueError) {
        match error {
            EnqueueError::Full => {
                warn!("Connection {} evicted: outbound queue full", id);
                outbound.shut(CloseReason::SlowConsumer);
            }
            // send loop already gone; the read loop will notice shortly
            EnqueueError::Closed => {
                debug!("Connection {} removed: send loop stopped", id);
                outbound.shut(CloseReason::Error);
            }
        }
    }
}
