use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendFactory, Capabilities};
use crate::protocol::LoginCommand;

const TOKEN_BYTES: usize = 16;

#[derive(Debug, Clone, Default)]
struct Identity {
    token: String,
    user_id: String,
    authenticated: bool,
}

struct SessionInner {
    identity: RwLock<Identity>,
    backend: Mutex<Box<dyn Backend>>,
    capabilities: Capabilities,
    last_active: AtomicI64,
}

/// One backend instance bound to a token.
///
/// Cloning is cheap; every clone refers to the same session. The backend sits
/// behind an async mutex, so calls made with one session run one at a time.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    fn new(token: String, user_id: String, authenticated: bool, mut backend: Box<dyn Backend>) -> Self {
        let capabilities = Capabilities::probe(backend.as_mut());
        Self {
            inner: Arc::new(SessionInner {
                identity: RwLock::new(Identity {
                    token,
                    user_id,
                    authenticated,
                }),
                backend: Mutex::new(backend),
                capabilities,
                last_active: AtomicI64::new(Utc::now().timestamp_millis()),
            }),
        }
    }

    pub async fn token(&self) -> String {
        self.inner.identity.read().await.token.clone()
    }

    pub async fn user_id(&self) -> String {
        self.inner.identity.read().await.user_id.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.identity.read().await.authenticated
    }

    pub fn capabilities(&self) -> Capabilities {
        self.inner.capabilities
    }

    pub fn backend(&self) -> &Mutex<Box<dyn Backend>> {
        &self.inner.backend
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        let millis = self.inner.last_active.load(Ordering::Relaxed);
        Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
    }

    pub fn idle_for(&self) -> Duration {
        Utc::now() - self.last_active()
    }

    pub fn touch(&self) {
        self.inner
            .last_active
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn same_as(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Drops back to an anonymous identity, keeping the backend.
    pub async fn reset(&self) {
        let mut identity = self.inner.identity.write().await;
        identity.user_id.clear();
        identity.authenticated = false;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("capabilities", &self.inner.capabilities)
            .field("last_active", &self.last_active())
            .finish_non_exhaustive()
    }
}

/// Concurrency-safe token to session map.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    factory: BackendFactory,
}

impl SessionRegistry {
    pub fn new(factory: BackendFactory) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            factory,
        }
    }

    /// A fresh anonymous backend straight from the factory.
    pub fn new_backend(&self) -> Box<dyn Backend> {
        (self.factory)()
    }

    /// An unregistered anonymous session around a fresh backend.
    pub fn anonymous(&self) -> Session {
        Session::new(generate_token(), String::new(), false, self.new_backend())
    }

    /// Logs a fresh backend in and registers the resulting session.
    pub async fn try_login(&self, cmd: &LoginCommand) -> Option<Session> {
        let mut backend = self.new_backend();
        if !backend.log_in(cmd).await {
            debug!("Login rejected for user {}", cmd.username);
            return None;
        }

        let session = Session::new(String::new(), cmd.username.clone(), true, backend);
        let token = self.insert_unique(&session).await;
        info!("User {} logged in", cmd.username);
        debug!("Session {} registered", token);
        Some(session)
    }

    /// Logs an existing session's own backend in and rekeys it under a new token.
    pub async fn upgrade(&self, session: &Session, cmd: &LoginCommand) -> bool {
        let logged_in = session.backend().lock().await.log_in(cmd).await;
        if !logged_in {
            debug!("Upgrade rejected for user {}", cmd.username);
            return false;
        }

        let old_token = session.token().await;
        {
            let mut sessions = self.sessions.write().await;
            if sessions
                .get(&old_token)
                .is_some_and(|existing| existing.same_as(session))
            {
                sessions.remove(&old_token);
            }
        }

        {
            let mut identity = session.inner.identity.write().await;
            identity.user_id = cmd.username.clone();
            identity.authenticated = true;
        }
        session.touch();
        self.insert_unique(session).await;
        info!("Session upgraded for user {}", cmd.username);
        true
    }

    /// Looks a token up. The activity timestamp is refreshed in the background.
    pub async fn get(&self, token: &str) -> Option<Session> {
        let session = self.sessions.read().await.get(token).cloned()?;
        let touched = session.clone();
        tokio::spawn(async move {
            touched.touch();
        });
        Some(session)
    }

    /// Registers `session` under its current token, replacing any previous entry.
    pub async fn add(&self, session: Session) {
        let token = session.token().await;
        let previous = self.sessions.write().await.insert(token.clone(), session.clone());
        if let Some(previous) = previous {
            if !previous.same_as(&session) {
                warn!("Session token conflict on {}, previous session replaced", token);
            }
        }
    }

    /// Removes a session. Unknown tokens are ignored.
    pub async fn logout(&self, token: &str) {
        if self.sessions.write().await.remove(token).is_some() {
            debug!("Session {} removed", token);
        }
    }

    /// Drops every session idle for longer than `max_idle`.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.idle_for() <= max_idle);
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!("Evicted {} idle sessions", evicted);
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Draws tokens until one is free, then assigns and registers it.
    async fn insert_unique(&self, session: &Session) -> String {
        loop {
            let token = generate_token();
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(&token) {
                warn!("Session token collision, drawing a new one");
                continue;
            }
            session.inner.identity.write().await.token = token.clone();
            sessions.insert(token.clone(), session.clone());
            return token;
        }
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::error::BackendError;
    use crate::protocol::{
        GetCommand, HelloMessage, ListCommand, LogoutCommand, OkMessage, PostCommand,
        ReplyCommand, ThreadList, ThreadMessage,
    };

    /// Accepts any non-empty password.
    struct Permissive {
        user: Option<String>,
    }

    #[async_trait]
    impl Backend for Permissive {
        fn hello(&self) -> HelloMessage {
            HelloMessage::default()
        }

        async fn log_in(&mut self, cmd: &LoginCommand) -> bool {
            if cmd.password.is_empty() {
                return false;
            }
            self.user = Some(cmd.username.clone());
            true
        }

        async fn log_out(&mut self, _cmd: &LogoutCommand) -> OkMessage {
            self.user = None;
            OkMessage::new("logout")
        }

        fn is_logged_in(&self) -> bool {
            self.user.is_some()
        }

        async fn get(&mut self, _cmd: &GetCommand) -> Result<ThreadMessage, BackendError> {
            Ok(ThreadMessage::default())
        }

        async fn list(&mut self, _cmd: &ListCommand) -> Result<ThreadList, BackendError> {
            Ok(ThreadList::default())
        }

        async fn reply(&mut self, _cmd: &ReplyCommand) -> Result<OkMessage, BackendError> {
            Ok(OkMessage::new("reply"))
        }

        async fn post(&mut self, _cmd: &PostCommand) -> Result<OkMessage, BackendError> {
            Ok(OkMessage::new("post"))
        }
    }

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(|| Box::new(Permissive { user: None }) as Box<dyn Backend>))
    }

    fn login(username: &str, password: &str) -> LoginCommand {
        LoginCommand {
            username: username.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[tokio::test]
    async fn test_login_registers_session() {
        let registry = registry();
        let session = registry.try_login(&login("alice", "secret")).await.unwrap();
        let token = session.token().await;

        let found = registry.get(&token).await.unwrap();
        assert!(found.same_as(&session));
        assert_eq!(found.user_id().await, "alice");
        assert!(found.is_authenticated().await);
        assert!(found.backend().lock().await.is_logged_in());
    }

    #[tokio::test]
    async fn test_failed_login_registers_nothing() {
        let registry = registry();
        assert!(registry.try_login(&login("alice", "")).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_upgrade_rekeys_anonymous_session() {
        let registry = registry();
        let session = registry.anonymous();
        let anonymous_token = session.token().await;
        assert!(!session.is_authenticated().await);
        assert!(registry.get(&anonymous_token).await.is_none());

        assert!(registry.upgrade(&session, &login("bob", "hunter2")).await);
        let token = session.token().await;
        assert_ne!(token, anonymous_token);
        assert_eq!(session.user_id().await, "bob");
        assert!(registry.get(&token).await.unwrap().same_as(&session));
        assert_eq!(registry.len().await, 1);

        // Logging in again replaces the previous registration.
        assert!(registry.upgrade(&session, &login("bob", "hunter2")).await);
        assert!(registry.get(&token).await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_upgrade_keeps_identity() {
        let registry = registry();
        let session = registry.anonymous();
        let token = session.token().await;
        assert!(!registry.upgrade(&session, &login("bob", "")).await);
        assert_eq!(session.token().await, token);
        assert!(!session.is_authenticated().await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_add_replaces_entry() {
        let registry = registry();
        let first = registry.anonymous();
        registry.add(first.clone()).await;
        registry.add(first.clone()).await;
        assert_eq!(registry.len().await, 1);

        let token = first.token().await;
        let found = registry.get(&token).await.unwrap();
        assert!(found.same_as(&first));
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let registry = registry();
        let session = registry.try_login(&login("alice", "secret")).await.unwrap();
        let token = session.token().await;

        registry.logout(&token).await;
        assert!(registry.get(&token).await.is_none());
        registry.logout(&token).await;
        assert!(registry.get(&token).await.is_none());
        registry.logout("never-issued").await;
    }

    #[tokio::test]
    async fn test_evict_idle() {
        let registry = registry();
        let stale = registry.try_login(&login("alice", "secret")).await.unwrap();
        let fresh = registry.try_login(&login("bob", "secret")).await.unwrap();
        stale
            .inner
            .last_active
            .store((Utc::now() - Duration::hours(2)).timestamp_millis(), Ordering::Relaxed);

        assert_eq!(registry.evict_idle(Duration::minutes(30)).await, 1);
        assert!(registry.get(&stale.token().await).await.is_none());
        assert!(registry.get(&fresh.token().await).await.is_some());
    }

    #[tokio::test]
    async fn test_reset_keeps_backend() {
        let registry = registry();
        let session = registry.anonymous();
        assert!(registry.upgrade(&session, &login("carol", "pw")).await);
        session.reset().await;
        assert!(!session.is_authenticated().await);
        assert!(session.user_id().await.is_empty());
        assert!(session.backend().lock().await.is_logged_in());
    }
}
