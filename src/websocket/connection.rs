use async_trait::async_trait;
use futures::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::Listener;
use crate::dispatch::{Caller, Dispatcher};
use crate::error::WebSocketError;
use crate::protocol::{CommandEnvelope, Response};
use crate::session::Session;

pub const DEFAULT_SEND_QUEUE_SIZE: usize = 10;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Active,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Cloneable handle to a connection's send queue.
///
/// This is what a realtime backend holds on to. Sending waits while the
/// queue is full and fails once the connection is closing.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::Sender<Response>,
    closing: Arc<watch::Sender<bool>>,
}

impl ConnectionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Asks the connection to shut down.
    pub fn close(&self) {
        self.closing.send_replace(true);
    }

    pub fn is_closing(&self) -> bool {
        *self.closing.borrow()
    }
}

#[async_trait]
impl Listener for ConnectionHandle {
    async fn send(&self, msg: Response) -> Result<(), WebSocketError> {
        if self.is_closing() {
            return Err(WebSocketError::Closed);
        }
        self.tx.send(msg).await.map_err(|_| WebSocketError::Closed)
    }
}

enum Frame {
    Data(Vec<u8>),
    Skip,
    Closed,
}

/// One duplex client.
///
/// A receive loop decodes and dispatches frames in arrival order while a
/// separate send loop drains the bounded queue onto the transport.
pub struct Connection {
    id: Uuid,
    peer: String,
    dispatcher: Arc<Dispatcher>,
    session: Session,
    handle: ConnectionHandle,
    outbound: Mutex<Option<mpsc::Receiver<Response>>>,
    closing: watch::Receiver<bool>,
    /// Frames read ahead while a command is in flight.
    backlog_limit: usize,
    state: AtomicU8,
    torn_down: AtomicBool,
}

impl Connection {
    pub fn new(dispatcher: Arc<Dispatcher>, peer: impl Into<String>, queue_size: usize) -> Self {
        let id = Uuid::new_v4();
        let queue_size = queue_size.max(1);
        let (tx, rx) = mpsc::channel(queue_size);
        let (closing_tx, closing_rx) = watch::channel(false);
        let session = dispatcher.registry().anonymous();

        Self {
            id,
            peer: peer.into(),
            dispatcher,
            session,
            handle: ConnectionHandle {
                id,
                tx,
                closing: Arc::new(closing_tx),
            },
            outbound: Mutex::new(Some(rx)),
            closing: closing_rx,
            backlog_limit: queue_size,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Queues one message for the client.
    pub async fn send(&self, msg: Response) -> Result<(), WebSocketError> {
        self.handle.send(msg).await
    }

    /// Drives the connection until either side goes away, then tears it down.
    pub async fn run<R, W>(&self, mut reader: R, writer: W)
    where
        R: Stream<Item = Result<Message, WsError>> + Unpin + Send,
        W: Sink<Message, Error = WsError> + Unpin + Send + 'static,
    {
        let Some(outbound) = self.outbound.lock().await.take() else {
            debug!("Connection {} closed before it started", self.id);
            return;
        };
        self.set_state(ConnectionState::Active);
        info!("Connection {} active for {}", self.id, self.peer);

        if self.session.capabilities().realtime {
            let mut backend = self.session.backend().lock().await;
            if let Some(realtime) = backend.realtime() {
                realtime.connect(Arc::new(self.handle.clone())).await;
            }
        }

        let send_task = tokio::spawn(send_loop(
            self.id,
            outbound,
            writer,
            self.closing.clone(),
        ));

        let received = AssertUnwindSafe(self.receive_loop(&mut reader))
            .catch_unwind()
            .await;
        if received.is_err() {
            error!("Receive loop for connection {} panicked", self.id);
        }
        self.teardown().await;

        if let Err(e) = send_task.await {
            error!("Send loop for connection {} panicked: {}", self.id, e);
        }
    }

    /// Closes the connection. Runs once; later calls return immediately.
    pub async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.set_state(ConnectionState::Closing);
        self.handle.close();

        // Never started: nobody else will close the queue.
        if let Some(mut outbound) = self.outbound.lock().await.take() {
            outbound.close();
        }

        if self.session.capabilities().realtime {
            let mut backend = self.session.backend().lock().await;
            if let Some(realtime) = backend.realtime() {
                realtime.bye().await;
            }
        }

        self.set_state(ConnectionState::Closed);
        info!("Connection {} closed", self.id);
    }

    async fn receive_loop<R>(&self, reader: &mut R)
    where
        R: Stream<Item = Result<Message, WsError>> + Unpin + Send,
    {
        let mut closing = self.closing.clone();
        let mut backlog: VecDeque<Vec<u8>> = VecDeque::new();

        loop {
            if *closing.borrow_and_update() {
                break;
            }

            let data = match backlog.pop_front() {
                Some(data) => data,
                None => {
                    tokio::select! {
                        _ = closing.changed() => break,
                        next = reader.next() => match self.classify(next) {
                            Frame::Data(data) => data,
                            Frame::Skip => continue,
                            Frame::Closed => break,
                        },
                    }
                }
            };

            let (envelope, raw) = match CommandEnvelope::decode(&data) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!("Dropping malformed frame on connection {}: {}", self.id, e);
                    continue;
                }
            };
            debug!("Connection {} received {}", self.id, envelope.cmd);

            // Keep reading while the command runs so a disconnect is noticed
            // without waiting for the backend. A full backlog stops reading
            // until the command returns.
            let dispatch = self
                .dispatcher
                .dispatch(&envelope, &raw, Caller::Connection(&self.session));
            tokio::pin!(dispatch);
            let mut disconnected = false;
            let reply = loop {
                let reading = !disconnected && backlog.len() < self.backlog_limit;
                tokio::select! {
                    reply = &mut dispatch => break reply,
                    next = reader.next(), if reading => match self.classify(next) {
                        Frame::Data(data) => backlog.push_back(data),
                        Frame::Skip => {}
                        Frame::Closed => {
                            disconnected = true;
                            self.handle.close();
                        }
                    },
                }
            };

            if disconnected {
                debug!("Discarding {} reply for closed connection {}", envelope.cmd, self.id);
                break;
            }
            if self.send(reply.response).await.is_err() {
                break;
            }
        }
    }

    fn classify(&self, next: Option<Result<Message, WsError>>) -> Frame {
        match next {
            Some(Ok(Message::Text(text))) => Frame::Data(text.into_bytes()),
            Some(Ok(Message::Binary(data))) => Frame::Data(data),
            Some(Ok(Message::Close(_))) | None => Frame::Closed,
            Some(Ok(_)) => Frame::Skip,
            Some(Err(e)) => {
                debug!("Read error on connection {}: {}", self.id, e);
                Frame::Closed
            }
        }
    }
}

async fn send_loop<W>(
    id: Uuid,
    mut outbound: mpsc::Receiver<Response>,
    mut writer: W,
    mut closing: watch::Receiver<bool>,
) where
    W: Sink<Message, Error = WsError> + Unpin,
{
    let mut heartbeat = interval_at(Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);

    loop {
        if *closing.borrow_and_update() {
            break;
        }
        tokio::select! {
            biased;
            _ = closing.changed() => break,
            msg = outbound.recv() => {
                let Some(msg) = msg else { break };
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to serialize message for connection {}: {}", id, e);
                        continue;
                    }
                };
                if let Err(e) = writer.send(Message::Text(text)).await {
                    debug!("Write failed on connection {}: {}", id, e);
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if let Err(e) = writer.send(Message::Ping(Vec::new())).await {
                    debug!("Heartbeat failed on connection {}: {}", id, e);
                    break;
                }
            }
        }
    }

    outbound.close();
    if let Err(e) = writer.close().await {
        debug!("Error closing connection {}: {}", id, e);
    }
    debug!("Send loop for connection {} finished", id);
}
