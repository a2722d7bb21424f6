use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};

use crate::dispatch::Dispatcher;
use crate::websocket::{Connection, ConnectionPool};

/// Accepts duplex clients on a dedicated port.
pub struct WebSocketServer {
    dispatcher: Arc<Dispatcher>,
    pool: ConnectionPool,
    send_queue_size: usize,
}

impl WebSocketServer {
    pub fn new(dispatcher: Arc<Dispatcher>, pool: ConnectionPool, send_queue_size: usize) -> Self {
        Self {
            dispatcher,
            pool,
            send_queue_size,
        }
    }

    /// Accept loop. Each client gets its own task.
    pub async fn run(self: Arc<Self>, listener: TcpListener) {
        match listener.local_addr() {
            Ok(addr) => info!("WebSocket server listening on {}", addr),
            Err(e) => error!("WebSocket listener has no local address: {}", e),
        }

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    tokio::spawn(self.clone().handle_connection(stream, addr));
                }
                Err(e) => {
                    error!("Failed to accept WebSocket connection: {}", e);
                }
            }
        }
    }

    pub async fn handle_connection(self: Arc<Self>, raw_stream: TcpStream, addr: SocketAddr) {
        info!("New WebSocket connection from: {}", addr);

        let ws_stream = match tokio_tungstenite::accept_async(raw_stream).await {
            Ok(ws) => ws,
            Err(e) => {
                error!("Error during WebSocket handshake: {}", e);
                return;
            }
        };

        let (ws_sink, ws_stream) = ws_stream.split();
        let connection = Connection::new(
            self.dispatcher.clone(),
            addr.to_string(),
            self.send_queue_size,
        );
        let connection_id = connection.id();

        self.pool.add(connection.handle()).await;
        connection.run(ws_stream, ws_sink).await;
        self.pool.remove(&connection_id).await;
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}
