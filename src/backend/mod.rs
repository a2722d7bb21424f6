//! Backend module for the BBS server
//!
//! The contract a pluggable board implementation fulfils. [`Backend`] is the
//! mandatory core; boards, bookmarks, realtime push and unknown-command
//! handling are optional capabilities reached through accessor methods that
//! default to `None`.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{BackendError, WebSocketError};
use crate::protocol::{
    BoardList, BookmarkList, GetCommand, HelloMessage, ListCommand, LoginCommand, LogoutCommand,
    OkMessage, PostCommand, RegisterCommand, ReplyCommand, Response, ThreadList, ThreadMessage,
};

#[cfg(test)]
use mockall::automock;

/// Builds a fresh, anonymous backend instance.
pub type BackendFactory = Arc<dyn Fn() -> Box<dyn Backend> + Send + Sync>;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Static description of this board, including its command lists.
    fn hello(&self) -> HelloMessage;

    async fn register(&mut self, _cmd: &RegisterCommand) -> Result<OkMessage, BackendError> {
        Err(BackendError::new("Registration is not supported."))
    }

    async fn log_in(&mut self, cmd: &LoginCommand) -> bool;

    async fn log_out(&mut self, cmd: &LogoutCommand) -> OkMessage;

    fn is_logged_in(&self) -> bool;

    async fn get(&mut self, cmd: &GetCommand) -> Result<ThreadMessage, BackendError>;

    async fn list(&mut self, cmd: &ListCommand) -> Result<ThreadList, BackendError>;

    async fn reply(&mut self, cmd: &ReplyCommand) -> Result<OkMessage, BackendError>;

    async fn post(&mut self, cmd: &PostCommand) -> Result<OkMessage, BackendError>;

    fn boards(&mut self) -> Option<&mut dyn Boards> {
        None
    }

    fn bookmarks(&mut self) -> Option<&mut dyn Bookmarks> {
        None
    }

    fn realtime(&mut self) -> Option<&mut dyn Realtime> {
        None
    }

    fn unknown_handler(&mut self) -> Option<&mut dyn UnknownHandler> {
        None
    }
}

#[async_trait]
pub trait Boards: Send {
    async fn board_list(&mut self, cmd: &ListCommand) -> Result<BoardList, BackendError>;
}

#[async_trait]
pub trait Bookmarks: Send {
    async fn bookmark_list(&mut self, cmd: &ListCommand) -> Result<BookmarkList, BackendError>;
}

/// Backends that push unsolicited messages to a duplex connection.
#[async_trait]
pub trait Realtime: Send {
    async fn connect(&mut self, listener: Arc<dyn Listener>);

    /// The connection is gone; drop the listener handed to `connect`.
    async fn bye(&mut self);
}

/// Fallback for command names the dispatcher does not know.
#[async_trait]
pub trait UnknownHandler: Send {
    async fn unknown(&mut self, cmd: &str, raw: &serde_json::Value) -> Option<Response>;
}

/// Receiving end of realtime pushes, one per duplex connection.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Listener: Send + Sync {
    /// Queues `msg` for delivery. Waits while the connection's send queue is full.
    async fn send(&self, msg: Response) -> Result<(), WebSocketError>;
}

/// Which optional capabilities a backend instance offers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub boards: bool,
    pub bookmarks: bool,
    pub realtime: bool,
    pub unknown_handler: bool,
}

impl Capabilities {
    pub fn probe(backend: &mut dyn Backend) -> Self {
        Self {
            boards: backend.boards().is_some(),
            bookmarks: backend.bookmarks().is_some(),
            realtime: backend.realtime().is_some(),
            unknown_handler: backend.unknown_handler().is_some(),
        }
    }

    /// Listing types a `list` command may ask for.
    pub fn lists(&self) -> Vec<String> {
        let mut lists = vec![crate::protocol::LIST_THREAD.to_string()];
        if self.boards {
            lists.push(crate::protocol::LIST_BOARD.to_string());
        }
        if self.bookmarks {
            lists.push(crate::protocol::LIST_BOOKMARK.to_string());
        }
        lists
    }
}
