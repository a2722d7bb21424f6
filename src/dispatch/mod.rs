//! Dispatch module for the BBS server
//!
//! Routes one decoded command to the backend method that answers it,
//! enforcing guest versus user access and normalizing every outcome into a
//! [`Response`]. Both transports go through [`Dispatcher::dispatch`].

use actix_web::http::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::CommandError;
use crate::protocol::{
    CommandEnvelope, GetCommand, HelloMessage, ListCommand, ListMessage, LoginCommand,
    LogoutCommand, PostCommand, RegisterCommand, ReplyCommand, Response, WelcomeMessage,
    LIST_BOARD, LIST_BOOKMARK, LIST_THREAD,
};
use crate::session::{Session, SessionRegistry};

/// Commands a guest may always send, whatever the backend's lists say.
const ALWAYS_ALLOWED: [&str; 2] = ["hello", "login"];

/// Outcome class of a dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Ok,
    Unauthorized,
    NotFound,
    BadRequest,
    ServerError,
}

impl ReplyStatus {
    pub fn http_status(&self) -> StatusCode {
        match self {
            ReplyStatus::Ok => StatusCode::OK,
            ReplyStatus::Unauthorized => StatusCode::UNAUTHORIZED,
            ReplyStatus::NotFound => StatusCode::NOT_FOUND,
            ReplyStatus::BadRequest => StatusCode::BAD_REQUEST,
            ReplyStatus::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: ReplyStatus,
    pub response: Response,
}

impl Reply {
    pub fn ok(response: impl Into<Response>) -> Self {
        Self {
            status: ReplyStatus::Ok,
            response: response.into(),
        }
    }

    pub fn error(wrt: &str, err: CommandError) -> Self {
        Self {
            status: err.status(),
            response: Response::Error(err.to_message(wrt)),
        }
    }

    fn from_result<T: Into<Response>>(wrt: &str, result: Result<T, CommandError>) -> Self {
        match result {
            Ok(response) => Self::ok(response),
            Err(err) => Self::error(wrt, err),
        }
    }
}

/// Who a command came from.
#[derive(Clone, Copy)]
pub enum Caller<'a> {
    /// A one-shot request, with the session its token resolved to, if any.
    Stateless(Option<&'a Session>),
    /// A duplex connection's own session. A `login` re-authenticates it in
    /// place instead of opening another session.
    Connection(&'a Session),
}

impl<'a> Caller<'a> {
    fn session(&self) -> Option<&'a Session> {
        match *self {
            Caller::Stateless(session) => session,
            Caller::Connection(session) => Some(session),
        }
    }
}

pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    hello: HelloMessage,
}

impl Dispatcher {
    /// `hello` is the description every `hello` command is answered with; its
    /// access lists decide which commands need a session.
    pub fn new(registry: Arc<SessionRegistry>, hello: HelloMessage) -> Self {
        Self { registry, hello }
    }

    pub fn hello(&self) -> &HelloMessage {
        &self.hello
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Whether `cmd` needs an authenticated session.
    pub fn requires_session(&self, cmd: &str) -> bool {
        !ALWAYS_ALLOWED.contains(&cmd)
            && self.hello.access.user_commands.iter().any(|c| c == cmd)
    }

    /// Answers one command.
    ///
    /// An unauthenticated session (a duplex connection before login) counts
    /// as a guest but its backend is still the one commands run against.
    /// Without a session, a fresh anonymous backend answers.
    pub async fn dispatch(
        &self,
        envelope: &CommandEnvelope,
        raw: &serde_json::Value,
        caller: Caller<'_>,
    ) -> Reply {
        let cmd = envelope.cmd.as_str();
        let session = match caller.session() {
            Some(session) => session.clone(),
            None => self.registry.anonymous(),
        };
        let authenticated = session.is_authenticated().await;
        if authenticated {
            session.touch();
        }

        if !authenticated && self.requires_session(cmd) {
            debug!("Guest attempted user command {}", cmd);
            return Reply::error(cmd, CommandError::Session);
        }

        match cmd {
            "hello" => Reply::ok(self.hello.clone()),
            "login" => {
                let login: LoginCommand = decode_payload(cmd, raw);
                let upgrade = matches!(caller, Caller::Connection(_)).then_some(&session);
                Reply::from_result(cmd, self.login(upgrade, &login).await)
            }
            "register" => {
                let register: RegisterCommand = decode_payload(cmd, raw);
                let result = session.backend().lock().await.register(&register).await;
                Reply::from_result(cmd, result.map_err(|e| CommandError::backend(cmd, e)))
            }
            "get" => {
                let get: GetCommand = decode_payload(cmd, raw);
                if get.range.is_some_and(|range| !range.validate()) {
                    return Reply::error(cmd, CommandError::InvalidRange);
                }
                let result = session.backend().lock().await.get(&get).await;
                Reply::from_result(cmd, result.map_err(|e| CommandError::backend(cmd, e)))
            }
            "list" => {
                let list: ListCommand = decode_payload(cmd, raw);
                Reply::from_result(cmd, self.list(&session, &list).await)
            }
            "reply" => {
                let reply: ReplyCommand = decode_payload(cmd, raw);
                let result = session.backend().lock().await.reply(&reply).await;
                Reply::from_result(cmd, result.map_err(|e| CommandError::backend(cmd, e)))
            }
            "post" => {
                let post: PostCommand = decode_payload(cmd, raw);
                let result = session.backend().lock().await.post(&post).await;
                Reply::from_result(cmd, result.map_err(|e| CommandError::backend(cmd, e)))
            }
            "logout" => {
                let mut logout: LogoutCommand = decode_payload(cmd, raw);
                if authenticated {
                    let token = session.token().await;
                    self.registry.logout(&token).await;
                    info!("User {} logged out", session.user_id().await);
                    if logout.session.is_empty() {
                        logout.session = token;
                    }
                }
                let ok = session.backend().lock().await.log_out(&logout).await;
                session.reset().await;
                Reply::ok(ok)
            }
            _ => self.unknown(&session, cmd, raw).await,
        }
    }

    /// Logs a connection's session in place, keeping its backend, or opens a
    /// new session. A logged-in connection that logs in again is rekeyed.
    async fn login(
        &self,
        upgrade: Option<&Session>,
        cmd: &LoginCommand,
    ) -> Result<WelcomeMessage, CommandError> {
        let session = match upgrade {
            Some(session) => self
                .registry
                .upgrade(session, cmd)
                .await
                .then(|| session.clone()),
            None => self.registry.try_login(cmd).await,
        };
        let session = session.ok_or(CommandError::LoginFailed)?;

        let username = session.user_id().await;
        Ok(WelcomeMessage {
            username: (!username.is_empty()).then_some(username),
            session: session.token().await,
        })
    }

    async fn list(&self, session: &Session, cmd: &ListCommand) -> Result<ListMessage, CommandError> {
        let capabilities = session.capabilities();
        let mut backend = session.backend().lock().await;
        match cmd.kind.as_str() {
            "" | LIST_THREAD => backend
                .list(cmd)
                .await
                .map(ListMessage::Threads)
                .map_err(|e| CommandError::backend("list", e)),
            LIST_BOARD => {
                let boards = match backend.boards() {
                    Some(boards) if capabilities.boards => boards,
                    _ => return Err(CommandError::Unsupported(cmd.kind.clone())),
                };
                boards
                    .board_list(cmd)
                    .await
                    .map(ListMessage::Boards)
                    .map_err(|e| CommandError::backend("list", e))
            }
            LIST_BOOKMARK => {
                let bookmarks = match backend.bookmarks() {
                    Some(bookmarks) if capabilities.bookmarks => bookmarks,
                    _ => return Err(CommandError::Unsupported(cmd.kind.clone())),
                };
                bookmarks
                    .bookmark_list(cmd)
                    .await
                    .map(ListMessage::Bookmarks)
                    .map_err(|e| CommandError::backend("list", e))
            }
            other => Err(CommandError::Unsupported(other.to_string())),
        }
    }

    async fn unknown(&self, session: &Session, cmd: &str, raw: &serde_json::Value) -> Reply {
        if session.capabilities().unknown_handler {
            let mut backend = session.backend().lock().await;
            if let Some(handler) = backend.unknown_handler() {
                if let Some(response) = handler.unknown(cmd, raw).await {
                    let status = if response.is_error() {
                        ReplyStatus::BadRequest
                    } else {
                        ReplyStatus::Ok
                    };
                    return Reply { status, response };
                }
            }
        }
        debug!("Unknown command {}", cmd);
        Reply::error(cmd, CommandError::UnknownCommand(cmd.to_string()))
    }
}

/// Decodes a command-specific payload, falling back to zero values when the
/// fields do not fit.
fn decode_payload<T: DeserializeOwned + Default>(cmd: &str, raw: &serde_json::Value) -> T {
    match T::deserialize(raw) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Malformed {} payload, using defaults: {}", cmd, e);
            T::default()
        }
    }
}
