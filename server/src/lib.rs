//! # Gather Server Library
//!
//! Real-time state synchronization for a small shared world. Clients hold a
//! WebSocket open, send typed action messages (moves, player creation, name
//! changes, drawings, combat effects) and receive the resulting state changes
//! fanned out to everyone connected, while authoritative state is persisted
//! through a narrow storage gateway.
//!
//! ## Core Responsibilities
//!
//! ### Connection Registry
//! The [`hub::Hub`] tracks every live connection and is the only way to reach
//! one. Broadcasts never wait on a client: each connection has a bounded
//! outbound queue, and a connection whose queue is full is evicted with a
//! policy-violation close instead of slowing everyone down.
//!
//! ### Ordered Delivery
//! Every connection has exactly one writer, its send loop. Messages for one
//! client leave in the order they were enqueued; there is no ordering across
//! clients.
//!
//! ### Message Dispatch
//! The [`router::Router`] reads each connection strictly in arrival order and
//! decides per message type whether to broadcast first and persist later, or
//! persist first and then respond.
//!
//! ## Module Organization
//!
//! ### Codec (`codec`)
//! Turns raw frames into the closed [`codec::Request`] enum and wraps outbound
//! payloads in envelopes.
//!
//! ### Transport (`transport`)
//! The physical channel as two halves, a frame sink and a frame stream, with a
//! WebSocket implementation and an in-memory one for tests.
//!
//! ### Connection and Hub (`connection`, `hub`)
//! Per-connection queue and send loop; the registry and broadcaster on top.
//!
//! ### Router (`router`)
//! The read loop, the dispatch table and spawn-point selection.
//!
//! ### Store (`store`)
//! The persistence gateway trait with in-memory and SQLite backends.
//!
//! ### Network (`network`)
//! TCP accept loop and WebSocket handshake.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use gather_server::hub::Hub;
//! use gather_server::network::Server;
//! use gather_server::router::Router;
//! use gather_server::store::MemoryStore;
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = Arc::new(Hub::new(16));
//!     let router = Arc::new(Router::new(
//!         hub,
//!         Arc::new(MemoryStore::new()),
//!         StdRng::from_entropy(),
//!     ));
//!
//!     let server = Server::bind("127.0.0.1:8080", router).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod hub;
pub mod network;
pub mod router;
pub mod store;
pub mod transport;
