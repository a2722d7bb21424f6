pub mod backend;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod memory;
pub mod protocol;
pub mod session;
pub mod websocket;

use std::sync::Arc;
use tracing::info;

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;

pub use backend::{Backend, BackendFactory, Capabilities};
pub use dispatch::{Caller, Dispatcher, Reply, ReplyStatus};
pub use http::health_check;
pub use session::{Session, SessionRegistry};
pub use websocket::{ConnectionPool, WebSocketServer};

/// Application state shared across all components
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub registry: Arc<SessionRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub connections: ConnectionPool,
}

impl AppState {
    /// Builds the server context around `factory`.
    ///
    /// One throwaway backend is created to read the board's description; its
    /// probed capabilities fill in the listing types if it declared none.
    pub fn new(config: Settings, factory: BackendFactory) -> Self {
        let mut sample = factory();
        let mut hello = sample.hello();
        if hello.lists.is_empty() {
            hello.lists = Capabilities::probe(sample.as_mut()).lists();
        }
        info!(
            "Serving board {} (guest: {:?}, user: {:?})",
            hello.name, hello.access.guest_commands, hello.access.user_commands
        );

        let registry = Arc::new(SessionRegistry::new(factory));
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), hello));

        Self {
            config: Arc::new(config),
            registry,
            dispatcher,
            connections: ConnectionPool::new(),
        }
    }

    pub fn websocket_server(&self) -> Arc<WebSocketServer> {
        Arc::new(WebSocketServer::new(
            self.dispatcher.clone(),
            self.connections.clone(),
            self.config.websocket.send_queue_size,
        ))
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.connections.close_all().await;
        info!("Shutdown complete with {} sessions", self.registry.len().await);
        Ok(())
    }
}
