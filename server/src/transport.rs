//! Physical channel abstraction.
//!
//! A connection's channel is split in two halves: the send loop owns the
//! [`FrameSink`], the read loop owns the [`FrameStream`]. The WebSocket halves
//! come from [`split`]; [`memory::pair`] builds an in-process channel for tests.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("channel closed")]
    Closed,
}

/// Why the server is closing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Regular unregistration.
    Normal,
    /// Outbound queue was full when a message had to be enqueued.
    SlowConsumer,
    /// The server is shutting down.
    GoingAway,
    /// Writing to the channel failed.
    Error,
}

impl CloseReason {
    pub fn code(self) -> u16 {
        match self {
            CloseReason::Normal => 1000,
            CloseReason::GoingAway => 1001,
            CloseReason::SlowConsumer => 1008,
            CloseReason::Error => 1011,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            CloseReason::Normal => "",
            CloseReason::GoingAway => "server shutting down",
            CloseReason::SlowConsumer => "slow consumer",
            CloseReason::Error => "write failed",
        }
    }
}

#[async_trait]
pub trait FrameSink: Send + 'static {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    async fn close(&mut self, reason: CloseReason) -> Result<(), TransportError>;
}

#[async_trait]
pub trait FrameStream: Send + 'static {
    /// Next data frame, or `None` once the peer has closed the channel.
    async fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

pub struct WsSink<S> {
    inner: SplitSink<WebSocketStream<S>, Message>,
}

pub struct WsStream<S> {
    inner: SplitStream<WebSocketStream<S>>,
}

pub fn split<S>(socket: WebSocketStream<S>) -> (WsSink<S>, WsStream<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = socket.split();
    (WsSink { inner: sink }, WsStream { inner: stream })
}

#[async_trait]
impl<S> FrameSink for WsSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.inner.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self, reason: CloseReason) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(reason.code()),
            reason: reason.description().into(),
        };
        match self.inner.send(Message::Close(Some(frame))).await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl<S> FrameStream for WsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.into_bytes())),
                Some(Ok(Message::Binary(bytes))) => return Ok(Some(bytes)),
                Some(Ok(Message::Close(frame))) => {
                    match frame.as_ref().map(|f| f.code) {
                        Some(CloseCode::Normal) | Some(CloseCode::Away) | None => {
                            info!("Peer closed the channel: {:?}", frame)
                        }
                        Some(code) => warn!("Peer closed the channel with {}", code),
                    }
                    return Ok(None);
                }
                // tungstenite answers pings on its own
                Some(Ok(_)) => continue,
                Some(Err(tungstenite::Error::ConnectionClosed)) | None => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

pub mod memory {
    //! Channel-backed transport for driving connections without sockets.

    use super::{CloseReason, FrameSink, FrameStream, TransportError};
    use async_trait::async_trait;
    use gather_shared::Envelope;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// What the server did to the channel, as seen from the peer.
    #[derive(Debug, Clone, PartialEq)]
    pub enum SinkEvent {
        Frame(String),
        Closed(CloseReason),
    }

    pub struct MemorySink {
        events: mpsc::UnboundedSender<SinkEvent>,
        stalled: bool,
    }

    pub struct MemoryStream {
        frames: mpsc::UnboundedReceiver<Vec<u8>>,
    }

    /// The client's end of an in-memory channel.
    pub struct MemoryPeer {
        events: mpsc::UnboundedReceiver<SinkEvent>,
        frames: mpsc::UnboundedSender<Vec<u8>>,
    }

    pub fn pair() -> (MemorySink, MemoryStream, MemoryPeer) {
        build(false)
    }

    /// A channel whose writes never complete, like a client that stopped reading.
    pub fn stalled_pair() -> (MemorySink, MemoryStream, MemoryPeer) {
        build(true)
    }

    fn build(stalled: bool) -> (MemorySink, MemoryStream, MemoryPeer) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        (
            MemorySink {
                events: events_tx,
                stalled,
            },
            MemoryStream { frames: frames_rx },
            MemoryPeer {
                events: events_rx,
                frames: frames_tx,
            },
        )
    }

    #[async_trait]
    impl FrameSink for MemorySink {
        async fn send(&mut self, text: String) -> Result<(), TransportError> {
            if self.stalled {
                std::future::pending::<()>().await;
            }
            self.events
                .send(SinkEvent::Frame(text))
                .map_err(|_| TransportError::Closed)
        }

        async fn close(&mut self, reason: CloseReason) -> Result<(), TransportError> {
            self.events
                .send(SinkEvent::Closed(reason))
                .map_err(|_| TransportError::Closed)
        }
    }

    #[async_trait]
    impl FrameStream for MemoryStream {
        async fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
            Ok(self.frames.recv().await)
        }
    }

    impl MemoryPeer {
        pub fn send_text(&self, text: &str) -> bool {
            self.frames.send(text.as_bytes().to_vec()).is_ok()
        }

        pub fn send_envelope(&self, envelope: &Envelope) -> bool {
            match serde_json::to_string(envelope) {
                Ok(text) => self.send_text(&text),
                Err(_) => false,
            }
        }

        /// Next event, or `None` if nothing arrives within `wait`.
        pub async fn next_event(&mut self, wait: Duration) -> Option<SinkEvent> {
            tokio::time::timeout(wait, self.events.recv())
                .await
                .ok()
                .flatten()
        }

        /// Next frame decoded as an envelope; `None` on timeout, close or garbage.
        pub async fn next_envelope(&mut self, wait: Duration) -> Option<Envelope> {
            match self.next_event(wait).await? {
                SinkEvent::Frame(text) => serde_json::from_str(&text).ok(),
                SinkEvent::Closed(_) => None,
            }
        }

        /// Hangs up the client's sending side, ending the server's read loop.
        pub fn hang_up(&mut self) {
            let (closed, _) = mpsc::unbounded_channel();
            self.frames = closed;
        }
    }
}
