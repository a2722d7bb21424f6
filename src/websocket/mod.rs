//! WebSocket module for the BBS server
//!
//! The duplex transport: each client is a [`Connection`] with its own
//! session, replies and realtime pushes sharing one bounded send queue.

mod connection;
mod pool;
mod server;

pub use connection::{Connection, ConnectionHandle, ConnectionState, DEFAULT_SEND_QUEUE_SIZE};
pub use pool::ConnectionPool;
pub use server::WebSocketServer;
