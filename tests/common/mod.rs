#![allow(dead_code)]

use async_trait::async_trait;
use bbs_server::backend::{Backend, BackendFactory, Listener, Realtime};
use bbs_server::error::BackendError;
use bbs_server::protocol::{
    AccessInfo, GetCommand, HelloMessage, ListCommand, LoginCommand, LogoutCommand, Message,
    OkMessage, PostCommand, ReplyCommand, ThreadList, ThreadMessage,
};
use bbs_server::{AppState, Settings};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Calls observed across every stub built by one factory.
#[derive(Default)]
pub struct Counters {
    pub posts: AtomicUsize,
    pub gets: AtomicUsize,
    pub byes: AtomicUsize,
}

impl Counters {
    pub fn posts(&self) -> usize {
        self.posts.load(Ordering::SeqCst)
    }

    pub fn byes(&self) -> usize {
        self.byes.load(Ordering::SeqCst)
    }
}

/// Accepts `alice`/`secret` and answers `get` with a canned thread.
pub struct StubBackend {
    counters: Arc<Counters>,
    get_delay: Duration,
    user: Option<String>,
}

#[async_trait]
impl Backend for StubBackend {
    fn hello(&self) -> HelloMessage {
        HelloMessage {
            name: "stub".to_string(),
            description: "canned answers".to_string(),
            access: AccessInfo {
                guest_commands: vec!["hello".into(), "login".into(), "get".into(), "list".into()],
                user_commands: vec!["reply".into(), "post".into(), "logout".into()],
            },
            server: "stub/1".to_string(),
            ..Default::default()
        }
    }

    async fn log_in(&mut self, cmd: &LoginCommand) -> bool {
        let accepted = cmd.username == "alice" && cmd.password == "secret";
        if accepted {
            self.user = Some(cmd.username.clone());
        }
        accepted
    }

    async fn log_out(&mut self, _cmd: &LogoutCommand) -> OkMessage {
        self.user = None;
        OkMessage::new("logout")
    }

    fn is_logged_in(&self) -> bool {
        self.user.is_some()
    }

    async fn get(&mut self, cmd: &GetCommand) -> Result<ThreadMessage, BackendError> {
        self.counters.gets.fetch_add(1, Ordering::SeqCst);
        if !self.get_delay.is_zero() {
            tokio::time::sleep(self.get_delay).await;
        }
        Ok(ThreadMessage {
            id: cmd.id.clone(),
            title: "Canned".to_string(),
            range: cmd.range,
            messages: vec![Message {
                id: "1".to_string(),
                author: "bob".to_string(),
                body: "hello there".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        })
    }

    async fn list(&mut self, cmd: &ListCommand) -> Result<ThreadList, BackendError> {
        Ok(ThreadList {
            query: cmd.query.clone(),
            ..Default::default()
        })
    }

    async fn reply(&mut self, _cmd: &ReplyCommand) -> Result<OkMessage, BackendError> {
        Ok(OkMessage::new("reply"))
    }

    async fn post(&mut self, _cmd: &PostCommand) -> Result<OkMessage, BackendError> {
        self.counters.posts.fetch_add(1, Ordering::SeqCst);
        Ok(OkMessage::new("post"))
    }

    fn realtime(&mut self) -> Option<&mut dyn Realtime> {
        Some(self)
    }
}

#[async_trait]
impl Realtime for StubBackend {
    async fn connect(&mut self, _listener: Arc<dyn Listener>) {}

    async fn bye(&mut self) {
        self.counters.byes.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn stub_factory(counters: Arc<Counters>, get_delay: Duration) -> BackendFactory {
    Arc::new(move || {
        Box::new(StubBackend {
            counters: counters.clone(),
            get_delay,
            user: None,
        }) as Box<dyn Backend>
    })
}

pub fn stub_state(counters: Arc<Counters>) -> AppState {
    let config = Settings::new_for_test().expect("Failed to load test config");
    AppState::new(config, stub_factory(counters, Duration::ZERO))
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..40 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
