//! Protocol module for the BBS server
//!
//! Wire shapes exchanged over both transports. Every message is a JSON
//! object carrying a `cmd` tag; commands flow client to server, responses
//! flow server to client.

mod commands;
mod responses;

pub use commands::{
    CommandEnvelope, GetCommand, ListCommand, LoginCommand, LogoutCommand, PostCommand,
    Range, RegisterCommand, ReplyCommand,
};
pub use responses::{
    AccessInfo, BoardList, BoardListing, BookmarkList, BookmarkListing, ErrorMessage,
    HelloMessage, ListMessage, Message, OkMessage, Response, ThreadList, ThreadListing,
    ThreadMessage, WelcomeMessage,
};

/// Protocol revision spoken by this server.
pub const PROTOCOL_VERSION: u32 = 0;

/// Reply-to tag used by every session error.
pub const SESSION_WRT: &str = "session";

/// Listing types accepted by the `list` command.
pub const LIST_THREAD: &str = "thread";
pub const LIST_BOARD: &str = "board";
pub const LIST_BOOKMARK: &str = "bookmark";
