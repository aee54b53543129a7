//! One client connection: its identity, outbound queue and send loop.
//!
//! The send loop is the only writer to a connection's channel. Everything else
//! (direct replies, broadcasts) reaches the client by enqueueing onto the
//! bounded queue through the [`Hub`](crate::hub::Hub), which keeps per
//! connection writes ordered and stops one client's slowness from leaking
//! into anyone else's.

use crate::transport::{CloseReason, FrameSink};
use gather_shared::Envelope;
use log::{debug, error, warn};
use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Upper bound on how long a closing handshake may take before the channel is dropped.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The hub's side of a connection: a way to enqueue and a way to hang up.
pub(crate) struct Outbound {
    queue: mpsc::Sender<Envelope>,
    close: Option<oneshot::Sender<CloseReason>>,
    task: JoinHandle<()>,
}

/// Why an envelope could not be enqueued.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum EnqueueError {
    Full,
    Closed,
}

impl Outbound {
    pub(crate) fn try_enqueue(&self, envelope: Envelope) -> Result<(), EnqueueError> {
        self.queue.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Tells the send loop to close the channel. Returns the send loop's handle.
    pub(crate) fn shut(mut self, reason: CloseReason) -> JoinHandle<()> {
        if let Some(close) = self.close.take() {
            let _ = close.send(reason);
        }
        self.task
    }
}

/// The read loop's side of a connection.
pub struct Registration {
    id: ConnectionId,
    closed: watch::Receiver<bool>,
    greeting: Option<oneshot::Sender<Vec<Envelope>>>,
}

impl Registration {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Hands the send loop the envelopes it must write before anything queued.
    ///
    /// Envelopes enqueued before the greeting are held aside and written right
    /// after it. Only the first call has an effect. Dropping the registration without
    /// greeting lets the send loop start on the queue right away.
    pub fn greet(&mut self, envelopes: Vec<Envelope>) {
        if let Some(greeting) = self.greeting.take() {
            let _ = greeting.send(envelopes);
        }
    }

    /// Resolves once the send loop has stopped (eviction, unregistration or write failure).
    pub async fn closed(&mut self) {
        while !*self.closed.borrow() {
            if self.closed.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Creates the queue for a new connection and spawns its send loop.
pub(crate) fn open<S: FrameSink>(
    id: ConnectionId,
    sink: S,
    capacity: usize,
) -> (Outbound, Registration) {
    let (queue_tx, queue_rx) = mpsc::channel(capacity.max(1));
    let (close_tx, close_rx) = oneshot::channel();
    let (greeting_tx, greeting_rx) = oneshot::channel();
    let (closed_tx, closed_rx) = watch::channel(false);

    let task = tokio::spawn(send_loop(id, sink, queue_rx, close_rx, greeting_rx, closed_tx));

    (
        Outbound {
            queue: queue_tx,
            close: Some(close_tx),
            task,
        },
        Registration {
            id,
            closed: closed_rx,
            greeting: Some(greeting_tx),
        },
    )
}

async fn send_loop<S: FrameSink>(
    id: ConnectionId,
    mut sink: S,
    queue: mpsc::Receiver<Envelope>,
    mut close: oneshot::Receiver<CloseReason>,
    greeting: oneshot::Receiver<Vec<Envelope>>,
    closed: watch::Sender<bool>,
) {
    let reason = drain(id, &mut sink, queue, &mut close, greeting).await;
    debug!("Connection {} send loop stopping ({:?})", id, reason);

    match timeout(CLOSE_TIMEOUT, sink.close(reason)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Connection {} close failed: {}", id, e),
        Err(_) => warn!("Connection {} did not close within {:?}", id, CLOSE_TIMEOUT),
    }
    let _ = closed.send(true);
}

// Writes the greeting, then the queue in FIFO order, until told to stop.
//
// Until the greeting arrives, queued envelopes are moved into a local buffer
// so a connection still loading its snapshot never looks full to the hub.
async fn drain<S: FrameSink>(
    id: ConnectionId,
    sink: &mut S,
    mut queue: mpsc::Receiver<Envelope>,
    close: &mut oneshot::Receiver<CloseReason>,
    mut greeting: oneshot::Receiver<Vec<Envelope>>,
) -> CloseReason {
    let mut held = Vec::new();
    let greeting = loop {
        tokio::select! {
            biased;
            reason = &mut *close => return reason.unwrap_or(CloseReason::Normal),
            snapshot = &mut greeting => break snapshot.unwrap_or_default(),
            next = queue.recv() => match next {
                Some(envelope) => held.push(envelope),
                None => return CloseReason::Normal,
            },
        }
    };
    if !held.is_empty() {
        debug!("Connection {} held {} envelopes behind its greeting", id, held.len());
    }

    for envelope in greeting.iter().chain(held.iter()) {
        if let Err(reason) = write(id, sink, envelope, close).await {
            return reason;
        }
    }

    loop {
        let envelope = tokio::select! {
            biased;
            reason = &mut *close => return reason.unwrap_or(CloseReason::Normal),
            next = queue.recv() => match next {
                Some(envelope) => envelope,
                None => return CloseReason::Normal,
            },
        };
        if let Err(reason) = write(id, sink, &envelope, close).await {
            return reason;
        }
    }
}

// A write can be interrupted by a close signal; a stuck peer must not pin the loop.
async fn write<S: FrameSink>(
    id: ConnectionId,
    sink: &mut S,
    envelope: &Envelope,
    close: &mut oneshot::Receiver<CloseReason>,
) -> Result<(), CloseReason> {
    let text = match serde_json::to_string(envelope) {
        Ok(text) => text,
        Err(e) => {
            error!("Connection {} failed to encode {}: {}", id, envelope.kind, e);
            return Ok(());
        }
    };

    tokio::select! {
        biased;
        reason = &mut *close => Err(reason.unwrap_or(CloseReason::Normal)),
        result = sink.send(text) => result.map_err(|e| {
            warn!("Connection {} write failed: {}", id, e);
            CloseReason::Error
        }),
    }
}
