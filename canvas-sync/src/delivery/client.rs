use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::envelope::{encode_update, Inbound};
use super::lock;
use super::transport::{ConnectTarget, Connection, Connector};
use crate::config::DeliveryConfig;
use crate::error::{Error, Result};
use crate::patch::Patch;

/// First attempt plus one retry over a fresh connection.
pub const MAX_ATTEMPTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub session_id: String,
    pub request_id: String,
}

struct Pending {
    generation: u64,
    tx: oneshot::Sender<Result<()>>,
}

struct Active {
    target: ConnectTarget,
    generation: u64,
    conn: Arc<dyn Connection>,
    closed: Arc<AtomicBool>,
}

/// State shared with connection reader tasks.
struct Shared {
    pending: Mutex<HashMap<String, Pending>>,
    inbound: broadcast::Sender<Inbound>,
}

impl Shared {
    fn register(&self, request_id: &str, generation: u64) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(request_id.to_string(), Pending { generation, tx });
        rx
    }

    fn forget(&self, request_id: &str) {
        lock(&self.pending).remove(request_id);
    }

    fn acknowledge(&self, request_id: &str) {
        if let Some(p) = lock(&self.pending).remove(request_id) {
            let _ = p.tx.send(Ok(()));
        }
    }

    /// Rejects everything still waiting on connection `generation`.
    fn reject_generation(&self, generation: u64, cause: fn() -> Error) {
        let mut pending = lock(&self.pending);
        let doomed: Vec<String> = pending
            .iter()
            .filter(|(_, p)| p.generation == generation)
            .map(|(id, _)| id.clone())
            .collect();
        for id in doomed {
            if let Some(p) = pending.remove(&id) {
                let _ = p.tx.send(Err(cause()));
            }
        }
    }
}

pub struct DeliveryClient {
    cfg: DeliveryConfig,
    connector: Arc<dyn Connector>,
    active: tokio::sync::Mutex<Option<Active>>,
    shared: Arc<Shared>,
    last_session: Mutex<Option<String>>,
    next_generation: AtomicU64,
}

impl DeliveryClient {
    pub fn new(cfg: DeliveryConfig, connector: Arc<dyn Connector>) -> Self {
        let (inbound, _) = broadcast::channel(cfg.channel_capacity.max(1));
        Self {
            cfg,
            connector,
            active: tokio::sync::Mutex::new(None),
            shared: Arc::new(Shared { pending: Mutex::new(HashMap::new()), inbound }),
            last_session: Mutex::new(None),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.cfg.client_id
    }

    /// Session used when `send` is not given one.
    pub fn set_session(&self, session_id: &str) {
        *lock(&self.last_session) = Some(session_id.to_string());
    }

    pub fn last_session(&self) -> Option<String> {
        lock(&self.last_session).clone()
    }

    /// Every decoded inbound frame, acknowledgements included.
    pub fn subscribe(&self) -> broadcast::Receiver<Inbound> {
        self.shared.inbound.subscribe()
    }

    /// Delivers `patch` and waits for its acknowledgement.
    ///
    /// A failed attempt (timeout, transport error, connection loss) is retried
    /// once over a fresh connection with the same request id. The second
    /// failure is returned to the caller. A [`close`](Self::close) while the
    /// acknowledgement is outstanding ends the send with `Cancelled`.
    pub async fn send(&self, session_id: Option<&str>, patch: &Patch, credential: Option<&str>) -> Result<Receipt> {
        let session_id = self.resolve_session(session_id)?;
        let target = ConnectTarget {
            session_id: session_id.clone(),
            client_id: self.cfg.client_id.clone(),
            credential: credential.map(str::to_string),
        };
        let request_id = Uuid::new_v4().to_string();
        let frame = encode_update(&self.cfg.client_id, &request_id, patch)?;

        let mut failure = Error::ConnectionClosed;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.attempt(&target, &request_id, &frame).await {
                Ok(()) => {
                    info!(session = %session_id, %request_id, attempt, "patch acknowledged");
                    return Ok(Receipt { session_id, request_id });
                }
                Err(Error::Cancelled) => {
                    info!(session = %session_id, %request_id, attempt, "delivery cancelled");
                    return Err(Error::Cancelled);
                }
                Err(e) => {
                    warn!(session = %session_id, %request_id, attempt, error = %e, "delivery attempt failed");
                    failure = e;
                }
            }
        }
        Err(failure)
    }

    /// Closes the active connection. Its pending sends fail with `Cancelled`
    /// and are not retried; later sends connect again.
    pub async fn close(&self) {
        let active = self.active.lock().await.take();
        if let Some(active) = active {
            self.shut(active, || Error::Cancelled).await;
        }
    }

    fn resolve_session(&self, explicit: Option<&str>) -> Result<String> {
        let mut last = lock(&self.last_session);
        match explicit.filter(|s| !s.is_empty()) {
            Some(id) => {
                *last = Some(id.to_string());
                Ok(id.to_string())
            }
            None => last.clone().ok_or(Error::SessionRequired),
        }
    }

    /// One connect-send-await cycle, bounded by the ack timeout from its start.
    async fn attempt(&self, target: &ConnectTarget, request_id: &str, frame: &str) -> Result<()> {
        let deadline = Instant::now() + self.cfg.ack_timeout();
        let mut generation = None;
        let result = match timeout_at(deadline, self.deliver(target, request_id, frame, &mut generation)).await {
            Ok(result) => result,
            Err(_) => Err(Error::AckTimeout { request_id: request_id.to_string() }),
        };
        if result.is_err() {
            self.shared.forget(request_id);
            if let Some(g) = generation {
                self.invalidate(g).await;
            }
        }
        result
    }

    async fn deliver(
        &self,
        target: &ConnectTarget,
        request_id: &str,
        frame: &str,
        generation: &mut Option<u64>,
    ) -> Result<()> {
        let (g, conn) = self.connection(target).await?;
        *generation = Some(g);
        let ack = self.shared.register(request_id, g);
        conn.send_text(frame.to_string()).await?;
        debug!(request_id, generation = g, bytes = frame.len(), "update sent");
        ack.await.unwrap_or(Err(Error::ConnectionClosed))
    }

    /// The open connection for `target`, connecting if needed.
    ///
    /// Holding the slot lock across the connect coalesces concurrent callers
    /// for the same key onto one attempt.
    async fn connection(&self, target: &ConnectTarget) -> Result<(u64, Arc<dyn Connection>)> {
        let mut slot = self.active.lock().await;
        if let Some(active) = slot.as_ref() {
            if active.target.same_key(target) && !active.closed.load(Ordering::SeqCst) {
                return Ok((active.generation, active.conn.clone()));
            }
        }
        if let Some(stale) = slot.take() {
            debug!(session = %stale.target.session_id, generation = stale.generation, "replacing connection");
            self.shut(stale, || Error::ConnectionClosed).await;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(session = %target.session_id, generation, "connecting");
        let conn = self
            .connector
            .connect(target)
            .await
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        let closed = Arc::new(AtomicBool::new(false));
        tokio::spawn(read_loop(conn.recv(), self.shared.clone(), generation, closed.clone()));

        *slot = Some(Active { target: target.clone(), generation, conn: conn.clone(), closed });
        info!(session = %target.session_id, generation, "connected");
        Ok((generation, conn))
    }

    /// Drops connection `generation` if it is still the active one.
    async fn invalidate(&self, generation: u64) {
        let stale = {
            let mut slot = self.active.lock().await;
            match slot.as_ref() {
                Some(active) if active.generation == generation => slot.take(),
                _ => None,
            }
        };
        if let Some(stale) = stale {
            self.shut(stale, || Error::ConnectionClosed).await;
        }
    }

    /// Pendings are rejected before the transport closes, so the reader task
    /// never sees them.
    async fn shut(&self, active: Active, cause: fn() -> Error) {
        active.closed.store(true, Ordering::SeqCst);
        self.shared.reject_generation(active.generation, cause);
        active.conn.close().await;
    }
}

async fn read_loop(mut rx: mpsc::Receiver<String>, shared: Arc<Shared>, generation: u64, closed: Arc<AtomicBool>) {
    while let Some(text) = rx.recv().await {
        let Some(inbound) = Inbound::parse(&text) else {
            debug!(generation, "ignoring undecodable frame");
            continue;
        };
        if let Some(request_id) = inbound.ack_id() {
            shared.acknowledge(request_id);
        }
        let _ = shared.inbound.send(inbound);
    }
    debug!(generation, "connection closed");
    closed.store(true, Ordering::SeqCst);
    shared.reject_generation(generation, || Error::ConnectionClosed);
}
