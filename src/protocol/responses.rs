use serde::{Deserialize, Serialize};

use super::{Range, SESSION_WRT};

/// Every server to client message, discriminated by its `cmd` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Response {
    #[serde(rename = "hello")]
    Hello(HelloMessage),
    #[serde(rename = "welcome")]
    Welcome(WelcomeMessage),
    #[serde(rename = "ok")]
    Ok(OkMessage),
    #[serde(rename = "error")]
    Error(ErrorMessage),
    #[serde(rename = "msg")]
    Thread(ThreadMessage),
    #[serde(rename = "list")]
    List(ListMessage),
    /// Anything a backend produces outside the standard vocabulary.
    #[serde(untagged)]
    Custom(serde_json::Value),
}

impl Response {
    /// The `cmd` tag this response is sent with, if it is a standard one.
    pub fn tag(&self) -> Option<&'static str> {
        match self {
            Response::Hello(_) => Some("hello"),
            Response::Welcome(_) => Some("welcome"),
            Response::Ok(_) => Some("ok"),
            Response::Error(_) => Some("error"),
            Response::Thread(_) => Some("msg"),
            Response::List(_) => Some("list"),
            Response::Custom(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }
}

impl From<HelloMessage> for Response {
    fn from(msg: HelloMessage) -> Self {
        Response::Hello(msg)
    }
}

impl From<WelcomeMessage> for Response {
    fn from(msg: WelcomeMessage) -> Self {
        Response::Welcome(msg)
    }
}

impl From<OkMessage> for Response {
    fn from(msg: OkMessage) -> Self {
        Response::Ok(msg)
    }
}

impl From<ErrorMessage> for Response {
    fn from(msg: ErrorMessage) -> Self {
        Response::Error(msg)
    }
}

impl From<ThreadMessage> for Response {
    fn from(msg: ThreadMessage) -> Self {
        Response::Thread(msg)
    }
}

impl From<ListMessage> for Response {
    fn from(msg: ListMessage) -> Self {
        Response::List(msg)
    }
}

/// Which commands guests and logged in users may send.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessInfo {
    #[serde(rename = "guest", skip_serializing_if = "Vec::is_empty")]
    pub guest_commands: Vec<String>,
    #[serde(rename = "user", skip_serializing_if = "Vec::is_empty")]
    pub user_commands: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelloMessage {
    pub name: String,
    pub version: u32,
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    pub access: AccessInfo,
    #[serde(rename = "format", skip_serializing_if = "Vec::is_empty")]
    pub formats: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lists: Vec<String>,
    pub server: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WelcomeMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub session: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OkMessage {
    pub wrt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl OkMessage {
    pub fn new(wrt: impl Into<String>) -> Self {
        Self {
            wrt: wrt.into(),
            msg: None,
        }
    }

    pub fn with_message(wrt: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            wrt: wrt.into(),
            msg: Some(msg.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub wrt: String,
    pub error: String,
}

impl ErrorMessage {
    pub fn new(wrt: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            wrt: wrt.into(),
            error: error.into(),
        }
    }

    /// The fixed reply for a missing, invalid or expired session.
    pub fn session() -> Self {
        Self::new(SESSION_WRT, "Invalid session.")
    }
}

/// One post inside a thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    pub id: String,
    #[serde(rename = "user")]
    pub author: String,
    #[serde(rename = "user_id")]
    pub author_id: String,
    pub date: String,
    pub body: String,
    #[serde(rename = "user_title", skip_serializing_if = "Option::is_none")]
    pub author_title: Option<String>,
    #[serde(rename = "avatar", skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(rename = "img", skip_serializing_if = "Option::is_none")]
    pub picture_url: Option<String>,
    #[serde(rename = "thumb", skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

/// Reply to `get`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadMessage {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
    pub closed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub board: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub more: bool,
    #[serde(rename = "next", skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

impl ThreadMessage {
    pub fn size(&self) -> usize {
        self.messages.len()
    }
}

/// Reply to `list`, discriminated by the listing `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ListMessage {
    #[serde(rename = "thread")]
    Threads(ThreadList),
    #[serde(rename = "board")]
    Boards(BoardList),
    #[serde(rename = "bookmark")]
    Bookmarks(BookmarkList),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadList {
    pub query: String,
    pub threads: Vec<ThreadListing>,
    #[serde(rename = "next", skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadListing {
    pub id: String,
    pub title: String,
    #[serde(rename = "user")]
    pub author: String,
    #[serde(rename = "user_id")]
    pub author_id: String,
    pub date: String,
    #[serde(rename = "posts")]
    pub post_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub board: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub closed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardList {
    pub query: String,
    pub boards: Vec<BoardListing>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardListing {
    pub id: String,
    pub name: String,
    #[serde(rename = "desc")]
    pub description: String,
    #[serde(rename = "threads")]
    pub thread_count: u32,
    #[serde(rename = "posts")]
    pub post_count: u32,
    pub date: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookmarkList {
    pub query: String,
    pub bookmarks: Vec<BookmarkListing>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookmarkListing {
    pub name: String,
    pub query: String,
}
