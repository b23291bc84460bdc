//! Session registry: owns every live session, one transport per id.
//!
//! Creation is serialized per id. Each session gets a worker task that feeds its transport
//! events through the state machine in order and applies the resulting effects. Deletion
//! marks the id for a grace window so a reconnect scheduled just before cannot bring it back.

use super::config_store::{resolve_endpoint, SessionConfig, SessionConfigStore};
use super::credentials::CredentialStore;
use super::state::{transition, ConnectionState, Effect};
use super::{validate_session_id, EngineError};
use crate::config::RelaySettings;
use crate::relay::{MediaStore, RelayContext, RelayPipeline, UnclassifiedLog, WebhookDispatcher};
use crate::transport::{
    normalize_recipient, CloseReason, Connection, Connector, Transport, TransportEvent,
};
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc::UnboundedReceiver, Mutex, RwLock};
use tokio::task::JoinHandle;

/// One connection attempt for a session id.
pub struct Session {
    id: String,
    generation: u64,
    endpoint: String,
    transport: Arc<dyn Transport>,
    state: RwLock<ConnectionState>,
}

pub type SessionHandle = Arc<Session>;

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Webhook endpoint resolved when this connection was created.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn status(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Send a text message; bare numbers are normalized to direct-chat ids.
    pub async fn send_text(&self, to: &str, body: &str) -> Result<(), EngineError> {
        let to = normalize_recipient(to)
            .ok_or_else(|| EngineError::InvalidRecipient(to.to_string()))?;
        self.transport
            .send_text(&to, body)
            .await
            .map_err(EngineError::from)
    }
}

/// Registry of sessions. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    settings: RelaySettings,
    connector: Arc<dyn Connector>,
    configs: SessionConfigStore,
    credentials: CredentialStore,
    pipeline: RelayPipeline,
    sessions: RwLock<HashMap<String, SessionHandle>>,
    /// Pairing payload per id, present only while awaiting a scan.
    pairing: RwLock<HashMap<String, String>>,
    /// Ids being deleted -> mark token (a later delete re-arms the window).
    pending_deletion: RwLock<HashMap<String, u64>>,
    creating: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    reconnects: Mutex<HashMap<String, JoinHandle<()>>>,
    next_generation: AtomicU64,
    shutting_down: AtomicBool,
}

impl SessionRegistry {
    pub fn new(settings: RelaySettings, connector: Arc<dyn Connector>) -> Self {
        let pipeline = RelayPipeline::new(
            MediaStore::new(&settings.media_dir),
            UnclassifiedLog::new(&settings.unclassified_log),
            WebhookDispatcher::new(),
        );
        Self {
            inner: Arc::new(Inner {
                configs: SessionConfigStore::new(&settings.session_config_dir),
                credentials: CredentialStore::new(&settings.credentials_dir),
                settings,
                connector,
                pipeline,
                sessions: RwLock::new(HashMap::new()),
                pairing: RwLock::new(HashMap::new()),
                pending_deletion: RwLock::new(HashMap::new()),
                creating: Mutex::new(HashMap::new()),
                reconnects: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Store `config` (when given) and create the session. The config is read on every
    /// connection attempt, so a new config for a live session applies from its next reconnect.
    pub async fn create_session(
        &self,
        id: &str,
        config: Option<SessionConfig>,
    ) -> Result<SessionHandle, EngineError> {
        validate_session_id(id)?;
        self.ensure_not_pending(id).await?;
        if let Some(config) = config {
            self.inner.configs.put(id, &config).await?;
        }
        self.create(id).await
    }

    /// Return the live session for `id`, or open a new connection for it. A dropped connection
    /// waiting for its reconnect is replaced right away.
    /// Rejected with `DeletionPending` while a deletion grace window is running.
    pub async fn create(&self, id: &str) -> Result<SessionHandle, EngineError> {
        validate_session_id(id)?;
        self.ensure_not_pending(id).await?;
        if let Some(session) = self.live(id).await {
            return Ok(session);
        }

        let lock = self.creation_lock(id).await;
        let guard = lock.lock().await;
        let result = async {
            self.ensure_not_pending(id).await?;
            if let Some(session) = self.live(id).await {
                return Ok(session);
            }
            if let Some(handle) = self.inner.reconnects.lock().await.remove(id) {
                handle.abort();
            }
            self.open(id).await
        }
        .await;
        drop(guard);
        self.release_creation_lock(id, lock).await;
        result
    }

    pub async fn get(&self, id: &str) -> Option<SessionHandle> {
        self.inner.sessions.read().await.get(id).cloned()
    }

    /// The registered session for `id` unless its connection has closed.
    async fn live(&self, id: &str) -> Option<SessionHandle> {
        let session = self.get(id).await?;
        if session.status().await.is_closed() {
            return None;
        }
        Some(session)
    }

    /// Session ids in the order their current connection was registered.
    pub async fn list(&self) -> Vec<String> {
        let sessions = self.inner.sessions.read().await;
        let mut entries: Vec<(u64, String)> = sessions
            .values()
            .map(|s| (s.generation, s.id.clone()))
            .collect();
        entries.sort_unstable();
        entries.into_iter().map(|(_, id)| id).collect()
    }

    /// Pairing payload for `id` while it is waiting for a scan.
    pub async fn pairing_code(&self, id: &str) -> Option<String> {
        self.inner.pairing.read().await.get(id).cloned()
    }

    pub async fn send_text(&self, id: &str, to: &str, body: &str) -> Result<(), EngineError> {
        let session = self
            .get(id)
            .await
            .ok_or_else(|| EngineError::SessionNotFound(id.to_string()))?;
        session.send_text(to, body).await
    }

    pub async fn is_deletion_pending(&self, id: &str) -> bool {
        self.inner.pending_deletion.read().await.contains_key(id)
    }

    /// Tear down `id` completely: live transport, pairing code, credentials and config.
    /// Returns whether anything was removed.
    pub async fn delete(&self, id: &str) -> Result<bool, EngineError> {
        validate_session_id(id)?;
        let token = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        self.inner
            .pending_deletion
            .write()
            .await
            .insert(id.to_string(), token);

        if let Some(handle) = self.inner.reconnects.lock().await.remove(id) {
            handle.abort();
        }

        // Wait for any in-flight creation so it cannot register after the purge.
        let lock = self.creation_lock(id).await;
        let guard = lock.lock().await;
        let removed = self.purge(id).await;
        drop(guard);
        self.release_creation_lock(id, lock).await;

        self.schedule_unmark(id, token);
        log::info!("session {}: deleted (removed state: {})", id, removed);
        Ok(removed)
    }

    async fn purge(&self, id: &str) -> bool {
        let mut removed = false;

        let session = self.inner.sessions.write().await.remove(id);
        if let Some(session) = session {
            removed = true;
            *session.state.write().await = ConnectionState::Deleted;
            if let Err(e) = session.transport.close().await {
                log::warn!("session {}: closing connection failed: {}", id, e);
            }
        }

        self.inner.pairing.write().await.remove(id);

        match self.inner.credentials.remove(id).await {
            Ok(existed) => removed |= existed,
            Err(e) => log::warn!("session {}: removing credentials failed: {}", id, e),
        }
        match self.inner.configs.remove(id).await {
            Ok(existed) => removed |= existed,
            Err(e) => log::warn!("session {}: removing config failed: {}", id, e),
        }
        removed
    }

    /// Close every transport without deleting any state.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        for (_, handle) in self.inner.reconnects.lock().await.drain() {
            handle.abort();
        }
        let sessions: Vec<SessionHandle> = self
            .inner
            .sessions
            .write()
            .await
            .drain()
            .map(|(_, s)| s)
            .collect();
        for session in sessions {
            if let Err(e) = session.transport.close().await {
                log::debug!("session {}: close on shutdown: {}", session.id, e);
            }
        }
        log::info!("session registry shut down");
    }

    async fn ensure_not_pending(&self, id: &str) -> Result<(), EngineError> {
        if self.is_deletion_pending(id).await {
            return Err(EngineError::DeletionPending(id.to_string()));
        }
        Ok(())
    }

    async fn creation_lock(&self, id: &str) -> Arc<Mutex<()>> {
        self.inner
            .creating
            .lock()
            .await
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the per-id lock entry unless another caller holds or waits on it.
    async fn release_creation_lock(&self, id: &str, lock: Arc<Mutex<()>>) {
        let mut creating = self.inner.creating.lock().await;
        if Arc::strong_count(&lock) == 2 {
            creating.remove(id);
        }
    }

    /// Connect and register a new session. Caller holds the creation lock for `id`.
    async fn open(&self, id: &str) -> Result<SessionHandle, EngineError> {
        let config = self.inner.configs.get(id).await?;
        let endpoint = resolve_endpoint(config.as_ref(), &self.inner.settings.default_endpoint);
        let credential_dir = self.inner.credentials.dir(id);
        tokio::fs::create_dir_all(&credential_dir).await?;

        let Connection { transport, events } =
            self.inner.connector.connect(id, &credential_dir).await?;
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(Session {
            id: id.to_string(),
            generation,
            endpoint,
            transport,
            state: RwLock::new(ConnectionState::Connecting),
        });
        self.inner
            .sessions
            .write()
            .await
            .insert(id.to_string(), session.clone());

        let registry = self.clone();
        let worker = session.clone();
        tokio::spawn(async move { registry.run_session(worker, events).await });

        log::info!("session {}: connecting, relaying to {}", id, session.endpoint);
        Ok(session)
    }

    async fn run_session(
        &self,
        session: SessionHandle,
        mut events: UnboundedReceiver<TransportEvent>,
    ) {
        while let Some(event) = events.recv().await {
            if self.step(&session, event).await.is_closed() {
                return;
            }
        }
        if !session.status().await.is_closed() {
            log::info!("session {}: event stream ended without close", session.id);
            self.step(&session, TransportEvent::ConnectionClosed(CloseReason::default()))
                .await;
        }
    }

    /// Run one event through the state machine and apply its effects in order.
    async fn step(&self, session: &SessionHandle, event: TransportEvent) -> ConnectionState {
        let stopping = self.is_deletion_pending(&session.id).await
            || self.inner.shutting_down.load(Ordering::SeqCst);
        let (from, step) = {
            let mut state = session.state.write().await;
            let from = *state;
            let step = transition(from, event, stopping);
            *state = step.state;
            (from, step)
        };
        if step.state != from {
            log::info!("session {}: {} -> {}", session.id, from, step.state);
        }
        for effect in step.effects {
            self.apply(session, effect).await;
        }
        step.state
    }

    async fn apply(&self, session: &SessionHandle, effect: Effect) {
        let id = session.id.as_str();
        match effect {
            Effect::CachePairing(qr) => {
                self.inner.pairing.write().await.insert(id.to_string(), qr);
                log::info!("session {}: pairing code issued, waiting for scan", id);
            }
            Effect::ClearPairing => {
                self.inner.pairing.write().await.remove(id);
            }
            Effect::PersistCredentials(update) => {
                if self.is_deletion_pending(id).await {
                    return;
                }
                if let Err(e) = self.inner.credentials.persist(id, &update) {
                    log::error!("session {}: persisting credentials failed: {}", id, e);
                }
            }
            Effect::Relay(batch) => {
                let ctx = RelayContext {
                    session_id: id,
                    endpoint: &session.endpoint,
                    transport: session.transport.as_ref(),
                };
                let outcomes = self.inner.pipeline.handle_batch(&ctx, &batch).await;
                log::debug!("session {}: batch handled: {:?}", id, outcomes);
            }
            Effect::ScheduleReconnect => {
                log::info!(
                    "session {}: connection dropped, reconnecting in {:?}",
                    id,
                    self.inner.settings.reconnect_delay
                );
                self.schedule_reconnect(id, Some(session.generation)).await;
            }
            Effect::Unregister => {
                self.unregister(session).await;
                if !self.is_deletion_pending(id).await {
                    log::warn!("session {}: credentials rejected, pair again to reconnect", id);
                }
            }
        }
    }

    async fn unregister(&self, session: &SessionHandle) {
        let mut sessions = self.inner.sessions.write().await;
        if sessions
            .get(&session.id)
            .is_some_and(|s| s.generation == session.generation)
        {
            sessions.remove(&session.id);
        }
    }

    /// Re-create `id` after the reconnect delay. `replacing` is the generation of the dropped
    /// connection still registered under `id`; None when nothing should be registered.
    async fn schedule_reconnect(&self, id: &str, replacing: Option<u64>) {
        // Delete and shutdown mark the id before draining `reconnects`, so checking under
        // this lock never leaves a timer behind them.
        let mut reconnects = self.inner.reconnects.lock().await;
        if self.inner.shutting_down.load(Ordering::SeqCst) || self.is_deletion_pending(id).await {
            log::info!("session {}: reconnect not scheduled, session is stopping", id);
            return;
        }
        let registry = self.clone();
        let sid = id.to_string();
        let delay = self.inner.settings.reconnect_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            registry.reconnect(sid, replacing).await;
        });
        if let Some(old) = reconnects.insert(id.to_string(), handle) {
            old.abort();
        }
    }

    /// Boxed: a reconnect re-enters `open`, whose worker is what schedules reconnects.
    fn reconnect(self, id: String, replacing: Option<u64>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let id = id.as_str();
            self.inner.reconnects.lock().await.remove(id);
            if self.inner.shutting_down.load(Ordering::SeqCst) {
                return;
            }

            let lock = self.creation_lock(id).await;
            let guard = lock.lock().await;
            let outcome = async {
                if self.is_deletion_pending(id).await {
                    log::info!("session {}: reconnect skipped, deletion pending", id);
                    return None;
                }
                {
                    let mut sessions = self.inner.sessions.write().await;
                    match (sessions.get(id).map(|s| s.generation), replacing) {
                        (Some(current), Some(old)) if current == old => {
                            sessions.remove(id);
                        }
                        (Some(_), _) => {
                            log::debug!("session {}: reconnect skipped, newer connection exists", id);
                            return None;
                        }
                        (None, _) => {}
                    }
                }
                Some(self.open(id).await)
            }
            .await;
            drop(guard);
            self.release_creation_lock(id, lock).await;

            match outcome {
                Some(Ok(_)) => log::info!("session {}: reconnected", id),
                Some(Err(e)) => {
                    log::warn!("session {}: reconnect failed: {}", id, e);
                    self.schedule_reconnect(id, None).await;
                }
                None => {}
            }
        })
    }

    fn schedule_unmark(&self, id: &str, token: u64) {
        let registry = self.clone();
        let sid = id.to_string();
        let grace = self.inner.settings.deletion_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let mut pending = registry.inner.pending_deletion.write().await;
            if pending.get(&sid) == Some(&token) {
                pending.remove(&sid);
            }
        });
    }
}
