//! Server network layer: TCP accept loop and WebSocket handshake.

use crate::router::Router;
use crate::transport;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

/// Accepts WebSocket clients and hands each one to the router.
pub struct Server {
    listener: TcpListener,
    router: Arc<Router>,
}

impl Server {
    pub async fn bind(addr: &str, router: Arc<Router>) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);
        Ok(Server { listener, router })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop until the task is dropped.
    ///
    /// Every accepted socket gets its own task, so a slow handshake or a
    /// misbehaving client never stalls the loop.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Server started successfully");

        loop {
            match self.listener.accept().await {
                Ok((socket, addr)) => {
                    let router = Arc::clone(&self.router);
                    tokio::spawn(async move {
                        handle_socket(router, socket, addr).await;
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

async fn handle_socket(router: Arc<Router>, socket: TcpStream, addr: SocketAddr) {
    if let Err(e) = socket.set_nodelay(true) {
        warn!("Failed to disable Nagle for {}: {}", addr, e);
    }

    let websocket = match tokio_tungstenite::accept_async(socket).await {
        Ok(websocket) => websocket,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
    };
    info!("Client connected from {}", addr);

    let (sink, stream) = transport::split(websocket);
    router.serve_connection(sink, stream).await;
    info!("Client {} disconnected", addr);
}
