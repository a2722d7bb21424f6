//! In-memory reference backend
//!
//! A small but complete board kept in process memory: accounts, boards,
//! tagged threads, per-user bookmarks and realtime reply notifications.
//! Every backend built by one factory shares the same [`BoardStore`].

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64, Engine};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::{
    Backend, BackendFactory, Boards, Bookmarks, Capabilities, Listener, Realtime, UnknownHandler,
};
use crate::error::BackendError;
use crate::protocol::{
    AccessInfo, BoardList, BoardListing, BookmarkList, BookmarkListing, GetCommand, HelloMessage,
    ListCommand, LoginCommand, LogoutCommand, Message, OkMessage, PostCommand, Range,
    RegisterCommand, ReplyCommand, Response, ThreadList, ThreadListing, ThreadMessage,
    PROTOCOL_VERSION,
};

/// Messages per `get` page and threads per `list` page.
pub const PAGE_SIZE: u32 = 50;

const GUEST_COMMANDS: [&str; 6] = ["hello", "login", "register", "logout", "get", "list"];
const USER_COMMANDS: [&str; 2] = ["reply", "post"];

struct Account {
    password_hash: String,
}

struct Board {
    id: String,
    name: String,
    description: String,
    created: String,
}

struct Thread {
    id: String,
    title: String,
    author: String,
    board: Option<String>,
    tags: Vec<String>,
    closed: bool,
    created: String,
    messages: Vec<Message>,
}

#[derive(Default)]
struct StoreData {
    accounts: HashMap<String, Account>,
    boards: Vec<Board>,
    threads: Vec<Thread>,
    bookmarks: HashMap<String, Vec<BookmarkListing>>,
    listeners: HashMap<Uuid, Arc<dyn Listener>>,
    next_thread: u64,
}

/// Shared state behind every [`MemoryBoard`].
pub struct BoardStore {
    name: String,
    description: String,
    data: RwLock<StoreData>,
}

impl BoardStore {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            description: description.into(),
            data: RwLock::new(StoreData::default()),
        })
    }

    pub async fn add_board(&self, id: &str, name: &str, description: &str) {
        self.data.write().await.boards.push(Board {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            created: Utc::now().to_rfc3339(),
        });
    }

    pub async fn add_bookmark(&self, user: &str, name: &str, query: &str) {
        self.data
            .write()
            .await
            .bookmarks
            .entry(user.to_string())
            .or_default()
            .push(BookmarkListing {
                name: name.to_string(),
                query: query.to_string(),
            });
    }

    pub async fn close_thread(&self, id: &str) -> bool {
        let mut data = self.data.write().await;
        match data.threads.iter_mut().find(|t| t.id == id) {
            Some(thread) => {
                thread.closed = true;
                true
            }
            None => false,
        }
    }

    pub async fn listener_count(&self) -> usize {
        self.data.read().await.listeners.len()
    }

    /// A factory producing anonymous backends over this store.
    pub fn factory(self: &Arc<Self>) -> BackendFactory {
        let store = self.clone();
        Arc::new(move || Box::new(MemoryBoard::new(store.clone())) as Box<dyn Backend>)
    }
}

/// One client's view of a [`BoardStore`].
pub struct MemoryBoard {
    store: Arc<BoardStore>,
    user: Option<String>,
    listener: Option<Uuid>,
}

impl MemoryBoard {
    pub fn new(store: Arc<BoardStore>) -> Self {
        Self {
            store,
            user: None,
            listener: None,
        }
    }

    fn require_user(&self) -> Result<&str, BackendError> {
        self.user
            .as_deref()
            .ok_or_else(|| BackendError::new("You must be logged in."))
    }

    /// Hands `msg` to every connected listener except our own.
    async fn notify(&self, msg: Response) {
        let listeners: Vec<Arc<dyn Listener>> = self
            .store
            .data
            .read()
            .await
            .listeners
            .iter()
            .filter(|(id, _)| Some(**id) != self.listener)
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            let msg = msg.clone();
            tokio::spawn(async move {
                if let Err(e) = listener.send(msg).await {
                    debug!("Dropping realtime push: {}", e);
                }
            });
        }
    }
}

#[async_trait]
impl Backend for MemoryBoard {
    fn hello(&self) -> HelloMessage {
        let capabilities = Capabilities {
            boards: true,
            bookmarks: true,
            realtime: true,
            unknown_handler: true,
        };
        HelloMessage {
            name: self.store.name.clone(),
            version: PROTOCOL_VERSION,
            description: self.store.description.clone(),
            options: vec!["tags".to_string(), "range".to_string(), "filter".to_string()],
            access: AccessInfo {
                guest_commands: GUEST_COMMANDS.iter().map(|c| c.to_string()).collect(),
                user_commands: USER_COMMANDS.iter().map(|c| c.to_string()).collect(),
            },
            formats: vec!["text".to_string()],
            lists: capabilities.lists(),
            server: format!("bbs-server/memory {}", env!("CARGO_PKG_VERSION")),
        }
    }

    async fn register(&mut self, cmd: &RegisterCommand) -> Result<OkMessage, BackendError> {
        if cmd.username.trim().is_empty() || cmd.password.is_empty() {
            return Err(BackendError::new("Username and password are required."));
        }
        let mut data = self.store.data.write().await;
        if data.accounts.contains_key(&cmd.username) {
            return Err(BackendError::new("Username is taken."));
        }
        data.accounts.insert(
            cmd.username.clone(),
            Account {
                password_hash: hash_password(&cmd.password),
            },
        );
        info!("Registered user {}", cmd.username);
        Ok(OkMessage::with_message("register", "Registered."))
    }

    async fn log_in(&mut self, cmd: &LoginCommand) -> bool {
        let data = self.store.data.read().await;
        let valid = data
            .accounts
            .get(&cmd.username)
            .is_some_and(|account| account.password_hash == hash_password(&cmd.password));
        if valid {
            self.user = Some(cmd.username.clone());
        }
        valid
    }

    async fn log_out(&mut self, _cmd: &LogoutCommand) -> OkMessage {
        self.user = None;
        OkMessage::new("logout")
    }

    fn is_logged_in(&self) -> bool {
        self.user.is_some()
    }

    async fn get(&mut self, cmd: &GetCommand) -> Result<ThreadMessage, BackendError> {
        let data = self.store.data.read().await;
        let thread = data
            .threads
            .iter()
            .find(|t| t.id == cmd.id)
            .ok_or_else(|| BackendError::new(format!("No such thread: {}", cmd.id)))?;

        let start = match &cmd.token {
            Some(token) => decode_token(token)?,
            None => cmd.range.map_or(1, |r| r.start.max(1)),
        };
        let total = thread.messages.len() as u32;
        if cmd.token.is_some() && (start == 0 || start > total) {
            return Err(BackendError::new("Invalid pagination token."));
        }
        let end = cmd
            .range
            .filter(|_| cmd.token.is_none())
            .map_or(start.saturating_add(PAGE_SIZE - 1), |r| r.end);
        if start > total && total > 0 {
            return Err(BackendError::new(format!("Range out of bounds: {}", Range::new(start, end))));
        }

        let last = end.min(total);
        let messages: Vec<Message> = thread
            .messages
            .iter()
            .skip(start.saturating_sub(1) as usize)
            .take(last.saturating_sub(start.saturating_sub(1)) as usize)
            .filter(|m| cmd.filter.as_ref().map_or(true, |f| &m.author_id == f))
            .cloned()
            .collect();
        let more = last < total;

        Ok(ThreadMessage {
            id: thread.id.clone(),
            title: thread.title.clone(),
            range: Some(Range::new(start, last)),
            closed: thread.closed,
            filter: cmd.filter.clone(),
            board: thread.board.clone(),
            tags: thread.tags.clone(),
            messages,
            more,
            next_token: more.then(|| encode_token(last + 1)),
        })
    }

    async fn list(&mut self, cmd: &ListCommand) -> Result<ThreadList, BackendError> {
        let offset = match &cmd.token {
            Some(token) => decode_token(token)? as usize,
            None => 0,
        };
        let wanted: Vec<&str> = cmd
            .query
            .split_whitespace()
            .filter_map(|word| word.strip_prefix('#'))
            .collect();

        let data = self.store.data.read().await;
        let matching: Vec<&Thread> = data
            .threads
            .iter()
            .rev()
            .filter(|t| wanted.iter().all(|tag| t.tags.iter().any(|have| have == tag)))
            .collect();
        if offset > matching.len() {
            return Err(BackendError::new("Invalid pagination token."));
        }

        let threads: Vec<ThreadListing> = matching
            .iter()
            .skip(offset)
            .take(PAGE_SIZE as usize)
            .map(|t| ThreadListing {
                id: t.id.clone(),
                title: t.title.clone(),
                author: t.author.clone(),
                author_id: t.author.clone(),
                date: t.created.clone(),
                post_count: t.messages.len() as u32,
                board: t.board.clone(),
                tags: t.tags.clone(),
                closed: t.closed,
            })
            .collect();
        let next = offset + threads.len();

        Ok(ThreadList {
            query: cmd.query.clone(),
            threads,
            next_token: (next < matching.len()).then(|| encode_token(next as u32)),
        })
    }

    async fn reply(&mut self, cmd: &ReplyCommand) -> Result<OkMessage, BackendError> {
        let user = self.require_user()?.to_string();
        if cmd.body.trim().is_empty() {
            return Err(BackendError::new("Empty reply."));
        }

        let push = {
            let mut data = self.store.data.write().await;
            let thread = data
                .threads
                .iter_mut()
                .find(|t| t.id == cmd.id)
                .ok_or_else(|| BackendError::new(format!("No such thread: {}", cmd.id)))?;
            if thread.closed {
                return Err(BackendError::new("Thread is closed."));
            }
            let number = thread.messages.len() as u32 + 1;
            let message = new_message(number, &user, &cmd.body);
            thread.messages.push(message.clone());
            ThreadMessage {
                id: thread.id.clone(),
                title: thread.title.clone(),
                range: Some(Range::new(number, number)),
                closed: false,
                board: thread.board.clone(),
                messages: vec![message],
                ..Default::default()
            }
        };

        self.notify(push.into()).await;
        Ok(OkMessage::new("reply"))
    }

    async fn post(&mut self, cmd: &PostCommand) -> Result<OkMessage, BackendError> {
        let user = self.require_user()?.to_string();
        if cmd.title.trim().is_empty() || cmd.body.trim().is_empty() {
            return Err(BackendError::new("Title and body are required."));
        }

        let mut data = self.store.data.write().await;
        if let Some(board) = &cmd.board {
            if !data.boards.iter().any(|b| &b.id == board) {
                return Err(BackendError::new(format!("No such board: {}", board)));
            }
        }
        data.next_thread += 1;
        let id = data.next_thread.to_string();
        data.threads.push(Thread {
            id: id.clone(),
            title: cmd.title.clone(),
            author: user.clone(),
            board: cmd.board.clone(),
            tags: cmd.tags.clone(),
            closed: false,
            created: Utc::now().to_rfc3339(),
            messages: vec![new_message(1, &user, &cmd.body)],
        });
        info!("User {} started thread {}", user, id);
        Ok(OkMessage::with_message("post", id))
    }

    fn boards(&mut self) -> Option<&mut dyn Boards> {
        Some(self)
    }

    fn bookmarks(&mut self) -> Option<&mut dyn Bookmarks> {
        Some(self)
    }

    fn realtime(&mut self) -> Option<&mut dyn Realtime> {
        Some(self)
    }

    fn unknown_handler(&mut self) -> Option<&mut dyn UnknownHandler> {
        Some(self)
    }
}

#[async_trait]
impl Boards for MemoryBoard {
    async fn board_list(&mut self, cmd: &ListCommand) -> Result<BoardList, BackendError> {
        let data = self.store.data.read().await;
        let boards = data
            .boards
            .iter()
            .filter(|b| cmd.query.is_empty() || b.name.contains(cmd.query.as_str()))
            .map(|b| {
                let threads: Vec<&Thread> = data
                    .threads
                    .iter()
                    .filter(|t| t.board.as_deref() == Some(b.id.as_str()))
                    .collect();
                BoardListing {
                    id: b.id.clone(),
                    name: b.name.clone(),
                    description: b.description.clone(),
                    thread_count: threads.len() as u32,
                    post_count: threads.iter().map(|t| t.messages.len() as u32).sum(),
                    date: b.created.clone(),
                }
            })
            .collect();
        Ok(BoardList {
            query: cmd.query.clone(),
            boards,
        })
    }
}

#[async_trait]
impl Bookmarks for MemoryBoard {
    async fn bookmark_list(&mut self, cmd: &ListCommand) -> Result<BookmarkList, BackendError> {
        let user = self.require_user()?;
        let data = self.store.data.read().await;
        Ok(BookmarkList {
            query: cmd.query.clone(),
            bookmarks: data.bookmarks.get(user).cloned().unwrap_or_default(),
        })
    }
}

#[async_trait]
impl Realtime for MemoryBoard {
    async fn connect(&mut self, listener: Arc<dyn Listener>) {
        let id = Uuid::new_v4();
        self.store.data.write().await.listeners.insert(id, listener);
        self.listener = Some(id);
    }

    async fn bye(&mut self) {
        if let Some(id) = self.listener.take() {
            self.store.data.write().await.listeners.remove(&id);
        }
    }
}

#[async_trait]
impl UnknownHandler for MemoryBoard {
    async fn unknown(&mut self, cmd: &str, _raw: &serde_json::Value) -> Option<Response> {
        match cmd {
            "ping" => Some(OkMessage::with_message("ping", "pong").into()),
            _ => None,
        }
    }
}

fn new_message(number: u32, user: &str, body: &str) -> Message {
    Message {
        id: number.to_string(),
        author: user.to_string(),
        author_id: user.to_string(),
        date: Utc::now().to_rfc3339(),
        body: body.to_string(),
        ..Default::default()
    }
}

fn hash_password(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn encode_token(position: u32) -> String {
    BASE64.encode(position.to_string())
}

fn decode_token(token: &str) -> Result<u32, BackendError> {
    BASE64
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| BackendError::new("Invalid pagination token."))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_user() -> Arc<BoardStore> {
        let store = BoardStore::new("test", "test board");
        store.add_board("general", "General", "Anything goes").await;
        let mut board = MemoryBoard::new(store.clone());
        tokio_test::assert_ok!(
            board
                .register(&RegisterCommand {
                    username: "alice".into(),
                    password: "secret".into(),
                    email: None,
                })
                .await
        );
        store
    }

    async fn logged_in(store: &Arc<BoardStore>) -> MemoryBoard {
        let mut board = MemoryBoard::new(store.clone());
        assert!(
            board
                .log_in(&LoginCommand {
                    username: "alice".into(),
                    password: "secret".into(),
                    ..Default::default()
                })
                .await
        );
        board
    }

    async fn post(board: &mut MemoryBoard, title: &str, tags: &[&str]) -> String {
        board
            .post(&PostCommand {
                title: title.into(),
                body: "first".into(),
                board: Some("general".into()),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                ..Default::default()
            })
            .await
            .unwrap()
            .msg
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_and_login() {
        let store = store_with_user().await;
        let mut board = MemoryBoard::new(store.clone());
        let duplicate = board
            .register(&RegisterCommand {
                username: "alice".into(),
                password: "other".into(),
                email: None,
            })
            .await;
        assert_eq!(duplicate.unwrap_err().message(), "Username is taken.");

        assert!(
            !board
                .log_in(&LoginCommand {
                    username: "alice".into(),
                    password: "wrong".into(),
                    ..Default::default()
                })
                .await
        );
        assert!(!board.is_logged_in());
        assert!(logged_in(&store).await.is_logged_in());
    }

    #[tokio::test]
    async fn test_guest_cannot_post() {
        let store = store_with_user().await;
        let mut board = MemoryBoard::new(store);
        let err = board
            .post(&PostCommand {
                title: "Hi".into(),
                body: "hello".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.message(), "You must be logged in.");
    }

    #[tokio::test]
    async fn test_thread_pagination() {
        let store = store_with_user().await;
        let mut board = logged_in(&store).await;
        let id = post(&mut board, "Long", &[]).await;
        for i in 0..(PAGE_SIZE + 9) {
            board
                .reply(&ReplyCommand {
                    id: id.clone(),
                    body: format!("reply {}", i),
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let first = board
            .get(&GetCommand {
                id: id.clone(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(first.size(), PAGE_SIZE as usize);
        assert!(first.more);

        let second = board
            .get(&GetCommand {
                id: id.clone(),
                token: first.next_token.clone(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(second.size(), 10);
        assert!(!second.more);
        assert_eq!(second.range, Some(Range::new(PAGE_SIZE + 1, PAGE_SIZE + 10)));

        let ranged = board
            .get(&GetCommand {
                id,
                range: Some(Range::new(2, 3)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(ranged.messages[0].body, "reply 0");
        assert_eq!(ranged.size(), 2);
    }

    #[tokio::test]
    async fn test_missing_thread() {
        let store = store_with_user().await;
        let mut board = MemoryBoard::new(store);
        let err = board
            .get(&GetCommand {
                id: "404".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.message(), "No such thread: 404");
    }

    #[tokio::test]
    async fn test_list_by_tag() {
        let store = store_with_user().await;
        let mut board = logged_in(&store).await;
        post(&mut board, "News", &["news"]).await;
        post(&mut board, "Chat", &["chat"]).await;
        post(&mut board, "More news", &["news", "chat"]).await;

        let all = board.list(&ListCommand::default()).await.unwrap();
        assert_eq!(all.threads.len(), 3);
        assert_eq!(all.threads[0].title, "More news");

        let news = board
            .list(&ListCommand {
                query: "#news".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let titles: Vec<&str> = news.threads.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["More news", "News"]);
        assert!(news.next_token.is_none());
    }

    #[tokio::test]
    async fn test_closed_thread_rejects_reply() {
        let store = store_with_user().await;
        let mut board = logged_in(&store).await;
        let id = post(&mut board, "Locked", &[]).await;
        assert!(store.close_thread(&id).await);

        let err = board
            .reply(&ReplyCommand {
                id,
                body: "let me in".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.message(), "Thread is closed.");
    }

    #[tokio::test]
    async fn test_boards_and_bookmarks() {
        let store = store_with_user().await;
        store.add_bookmark("alice", "news", "#news").await;
        let mut board = logged_in(&store).await;
        post(&mut board, "Hello", &[]).await;

        let boards = board.board_list(&ListCommand::default()).await.unwrap();
        assert_eq!(boards.boards.len(), 1);
        assert_eq!(boards.boards[0].thread_count, 1);

        let bookmarks = board.bookmark_list(&ListCommand::default()).await.unwrap();
        assert_eq!(bookmarks.bookmarks[0].query, "#news");

        let mut guest = MemoryBoard::new(store);
        assert!(guest.bookmark_list(&ListCommand::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_realtime_registration() {
        let store = store_with_user().await;
        let mut board = MemoryBoard::new(store.clone());
        let listener = crate::backend::MockListener::new();
        board.connect(Arc::new(listener)).await;
        assert_eq!(store.listener_count().await, 1);

        board.bye().await;
        board.bye().await;
        assert_eq!(store.listener_count().await, 0);
    }

    #[tokio::test]
    async fn test_reply_pushes_to_other_listeners() {
        let store = store_with_user().await;
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let mut listener = crate::backend::MockListener::new();
        listener.expect_send().returning(move |msg| {
            tx.try_send(msg).unwrap();
            Ok(())
        });
        let mut watcher = MemoryBoard::new(store.clone());
        watcher.connect(Arc::new(listener)).await;

        let mut author = logged_in(&store).await;
        let id = post(&mut author, "Live", &[]).await;
        author
            .reply(&ReplyCommand {
                id: id.clone(),
                body: "breaking".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        match rx.recv().await {
            Some(Response::Thread(thread)) => {
                assert_eq!(thread.id, id);
                assert_eq!(thread.messages[0].body, "breaking");
            }
            other => panic!("unexpected push: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pagination_token_round_trip() {
        assert_eq!(decode_token(&encode_token(51)).unwrap(), 51);
        assert!(decode_token("!!!").is_err());
    }

    #[tokio::test]
    async fn test_pagination_token_past_the_end() {
        let store = store_with_user().await;
        let mut board = logged_in(&store).await;
        let id = post(&mut board, "Short", &[]).await;

        // "4294967295", the largest position a token can carry.
        let result = board
            .get(&GetCommand {
                id: id.clone(),
                token: Some("NDI5NDk2NzI5NQ".into()),
                ..Default::default()
            })
            .await;
        assert_eq!(
            result.unwrap_err().message(),
            "Invalid pagination token."
        );

        let result = board
            .get(&GetCommand {
                id,
                range: Some(Range::new(u32::MAX, u32::MAX)),
                ..Default::default()
            })
            .await;
        assert!(result.is_err());

        let result = board
            .list(&ListCommand {
                token: Some(encode_token(u32::MAX)),
                ..Default::default()
            })
            .await;
        assert!(result.is_err());
    }
}
