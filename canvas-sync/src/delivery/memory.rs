//! In-process server and connector with scripted replies.
//!
//! Used by tests and the CLI's dry-run mode to exercise the delivery client
//! without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::lock;
use super::transport::{ConnectTarget, Connection, Connector, TransportError};

/// What the server does with the next update frame it receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ack,
    /// Acknowledge once the delay has passed, if the connection is still open.
    AckAfter(Duration),
    /// Swallow the frame; the client waits until its timeout.
    Ignore,
    /// Drop the connection without answering.
    Close,
}

#[derive(Default)]
struct ServerState {
    script: VecDeque<Reply>,
    fallback: Option<Reply>,
    refuse: usize,
    connect_delay: Duration,
    next_link: u64,
    links: HashMap<u64, mpsc::Sender<String>>,
    connects: Vec<ConnectTarget>,
    received: Vec<Value>,
}

#[derive(Clone, Default)]
pub struct MemoryServer {
    inner: Arc<Mutex<ServerState>>,
}

impl MemoryServer {
    /// A server that acknowledges everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues replies, consumed one per received frame.
    pub fn script(&self, replies: impl IntoIterator<Item = Reply>) -> &Self {
        lock(&self.inner).script.extend(replies);
        self
    }

    /// Reply used once the script runs out (default: `Ack`).
    pub fn otherwise(&self, reply: Reply) -> &Self {
        lock(&self.inner).fallback = Some(reply);
        self
    }

    /// Fails the next `n` connection attempts.
    pub fn refuse_connects(&self, n: usize) -> &Self {
        lock(&self.inner).refuse = n;
        self
    }

    /// Every connection handshake takes `delay` before it completes.
    pub fn delay_connects(&self, delay: Duration) -> &Self {
        lock(&self.inner).connect_delay = delay;
        self
    }

    pub fn connector(&self, capacity: usize) -> MemoryConnector {
        MemoryConnector { server: self.clone(), capacity: capacity.max(1) }
    }

    /// Every connection attempt, refused ones included.
    pub fn connects(&self) -> Vec<ConnectTarget> {
        lock(&self.inner).connects.clone()
    }

    /// Every frame received, in arrival order.
    pub fn received(&self) -> Vec<Value> {
        lock(&self.inner).received.clone()
    }

    pub fn open_links(&self) -> usize {
        lock(&self.inner).links.len()
    }

    /// Pushes a frame to every open connection.
    pub fn broadcast(&self, frame: &Value) {
        let text = frame.to_string();
        for link in lock(&self.inner).links.values() {
            let _ = link.try_send(text.clone());
        }
    }

    async fn deliver(&self, link: u64, text: String) {
        let tx = lock(&self.inner).links.get(&link).cloned();
        if let Some(tx) = tx {
            let _ = tx.send(text).await;
        }
    }
}

pub struct MemoryConnector {
    server: MemoryServer,
    capacity: usize,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, target: &ConnectTarget) -> Result<Arc<dyn Connection>, TransportError> {
        let delay = lock(&self.server.inner).connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = lock(&self.server.inner);
        state.connects.push(target.clone());
        if state.refuse > 0 {
            state.refuse -= 1;
            return Err(TransportError::Io("connection refused".into()));
        }
        let (tx, rx) = mpsc::channel(self.capacity);
        state.next_link += 1;
        let link = state.next_link;
        state.links.insert(link, tx);

        Ok(Arc::new(MemoryConnection {
            server: self.server.clone(),
            link,
            closed: AtomicBool::new(false),
            rx_once: Mutex::new(Some(rx)),
        }))
    }
}

struct MemoryConnection {
    server: MemoryServer,
    link: u64,
    closed: AtomicBool,
    rx_once: Mutex<Option<mpsc::Receiver<String>>>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        let frame: Value =
            serde_json::from_str(&text).map_err(|e| TransportError::Io(format!("bad frame: {e}")))?;
        let reply = {
            let mut state = lock(&self.server.inner);
            if !state.links.contains_key(&self.link) {
                return Err(TransportError::ConnectionClosed);
            }
            state.received.push(frame.clone());
            let fallback = state.fallback.unwrap_or(Reply::Ack);
            let reply = state.script.pop_front().unwrap_or(fallback);
            if reply == Reply::Close {
                state.links.remove(&self.link);
            }
            reply
        };
        let ack = json!({ "type": "update", "requestId": frame.get("requestId").cloned().unwrap_or(Value::Null) })
            .to_string();
        match reply {
            Reply::Ack => self.server.deliver(self.link, ack).await,
            Reply::AckAfter(delay) => {
                let (server, link) = (self.server.clone(), self.link);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    server.deliver(link, ack).await;
                });
            }
            Reply::Ignore | Reply::Close => {}
        }
        Ok(())
    }

    fn recv(&self) -> mpsc::Receiver<String> {
        lock(&self.rx_once).take().unwrap_or_else(|| mpsc::channel(1).1)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.server.inner).links.remove(&self.link);
    }
}
