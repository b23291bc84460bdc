//! Shared test fixtures: a scriptable in-process transport and a webhook receiver.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, http::Uri, routing::post, Json, Router};
use lib::config::RelaySettings;
use lib::sessions::SessionRegistry;
use lib::transport::{
    BatchKind, CloseReason, Connection, Connector, InboundEvent, MessageBatch, Transport,
    TransportError, TransportEvent,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

pub const RECONNECT_DELAY: Duration = Duration::from_millis(50);
pub const GRACE: Duration = Duration::from_millis(300);

#[derive(Default)]
struct FakeState {
    connects: HashMap<String, usize>,
    /// Live event sender per session id, tagged with its connection number.
    senders: HashMap<String, (usize, mpsc::UnboundedSender<TransportEvent>)>,
    sent: Vec<(String, String, String)>,
    media: Option<Vec<u8>>,
    download_delay: Duration,
    /// Event id and start time of every media download, in call order.
    downloads: Vec<(String, Instant)>,
}

/// Connector whose transports are driven by the test through [`FakeConnector::emit`].
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<FakeState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes returned by `download_media`; None makes downloads fail.
    pub fn set_media(&self, bytes: Option<Vec<u8>>) {
        self.state.lock().unwrap().media = bytes;
    }

    /// Make every `download_media` call take `delay`.
    pub fn set_download_delay(&self, delay: Duration) {
        self.state.lock().unwrap().download_delay = delay;
    }

    pub fn downloads(&self) -> Vec<(String, Instant)> {
        self.state.lock().unwrap().downloads.clone()
    }

    pub fn connects(&self, id: &str) -> usize {
        self.state.lock().unwrap().connects.get(id).copied().unwrap_or(0)
    }

    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn is_live(&self, id: &str) -> bool {
        self.state.lock().unwrap().senders.contains_key(id)
    }

    /// Push an event into the newest connection of `id`. False when it is closed.
    pub async fn emit(&self, id: &str, event: TransportEvent) -> bool {
        let sender = self
            .state
            .lock()
            .unwrap()
            .senders
            .get(id)
            .map(|(_, tx)| tx.clone());
        match sender {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        session_id: &str,
        _credential_dir: &Path,
    ) -> Result<Connection, TransportError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let (tx, rx) = mpsc::unbounded_channel();
        let number = {
            let mut state = self.state.lock().unwrap();
            let n = state.connects.entry(session_id.to_string()).or_insert(0);
            *n += 1;
            let number = *n;
            state.senders.insert(session_id.to_string(), (number, tx));
            number
        };
        Ok(Connection {
            transport: Arc::new(FakeTransport {
                session_id: session_id.to_string(),
                number,
                state: self.state.clone(),
            }),
            events: rx,
        })
    }
}

struct FakeTransport {
    session_id: String,
    number: usize,
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), TransportError> {
        self.state.lock().unwrap().sent.push((
            self.session_id.clone(),
            to.to_string(),
            body.to_string(),
        ));
        Ok(())
    }

    async fn download_media(&self, event: &InboundEvent) -> Result<Vec<u8>, TransportError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.downloads.push((event.id.clone(), Instant::now()));
            state.download_delay
        };
        tokio::time::sleep(delay).await;
        self.state
            .lock()
            .unwrap()
            .media
            .clone()
            .ok_or_else(|| TransportError::Rejected("media unavailable".into()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if state
            .senders
            .get(&self.session_id)
            .is_some_and(|(n, _)| *n == self.number)
        {
            state.senders.remove(&self.session_id);
        }
        Ok(())
    }
}

/// Captured webhook posts: (request path, JSON body).
pub type Posts = Arc<Mutex<Vec<(String, Value)>>>;

#[derive(Clone)]
struct Captured {
    posts: Posts,
    /// Relayed message id and the time its response was sent.
    answered: Arc<Mutex<Vec<(String, Instant)>>>,
    delay: Duration,
}

pub struct WebhookReceiver {
    pub base: String,
    pub posts: Posts,
    answered: Arc<Mutex<Vec<(String, Instant)>>>,
}

impl WebhookReceiver {
    /// Serve a receiver on a free loopback port that accepts every POST.
    pub async fn start() -> Self {
        Self::start_with_delay(Duration::ZERO).await
    }

    /// Like [`WebhookReceiver::start`], holding each response for `delay`.
    pub async fn start_with_delay(delay: Duration) -> Self {
        let captured = Captured {
            posts: Arc::new(Mutex::new(Vec::new())),
            answered: Arc::new(Mutex::new(Vec::new())),
            delay,
        };
        let posts = captured.posts.clone();
        let answered = captured.answered.clone();
        let app = Router::new()
            .route("/*path", post(capture))
            .with_state(captured);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind webhook receiver");
        let addr = listener.local_addr().expect("local_addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            base: format!("http://{}", addr),
            posts,
            answered,
        }
    }

    pub fn answered(&self) -> Vec<(String, Instant)> {
        self.answered.lock().unwrap().clone()
    }

    pub fn endpoint(&self) -> String {
        format!("{}/whatsapp/webhook", self.base)
    }

    pub fn posts(&self) -> Vec<(String, Value)> {
        self.posts.lock().unwrap().clone()
    }

    /// Wait until at least `n` posts arrived; returns what was captured.
    pub async fn wait_for(&self, n: usize) -> Vec<(String, Value)> {
        let posts = self.posts.clone();
        eventually(|| {
            let posts = posts.clone();
            async move { posts.lock().unwrap().len() >= n }
        })
        .await;
        self.posts()
    }
}

async fn capture(State(captured): State<Captured>, uri: Uri, Json(body): Json<Value>) -> StatusCode {
    let id = message_of(&body)["id"].as_str().unwrap_or_default().to_string();
    captured.posts.lock().unwrap().push((uri.path().to_string(), body));
    tokio::time::sleep(captured.delay).await;
    captured.answered.lock().unwrap().push((id, Instant::now()));
    StatusCode::OK
}

/// Poll `check` for up to 5s.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

pub fn temp_data_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp data dir");
    dir
}

pub fn settings(data_dir: &Path, endpoint: &str) -> RelaySettings {
    let mut settings = RelaySettings::with_data_dir(data_dir.to_path_buf());
    settings.default_endpoint = endpoint.to_string();
    settings.reconnect_delay = RECONNECT_DELAY;
    settings.deletion_grace = GRACE;
    settings
}

pub fn registry(data_dir: &Path, endpoint: &str) -> (SessionRegistry, FakeConnector) {
    let connector = FakeConnector::new();
    let registry = SessionRegistry::new(settings(data_dir, endpoint), Arc::new(connector.clone()));
    (registry, connector)
}

pub fn notify(events: Vec<Value>) -> TransportEvent {
    TransportEvent::MessagesReceived(MessageBatch {
        kind: BatchKind::Notify,
        events: events
            .into_iter()
            .filter_map(InboundEvent::from_wire)
            .collect(),
    })
}

pub fn append(events: Vec<Value>) -> TransportEvent {
    TransportEvent::MessagesReceived(MessageBatch {
        kind: BatchKind::Append,
        events: events
            .into_iter()
            .filter_map(InboundEvent::from_wire)
            .collect(),
    })
}

pub fn closed(status_code: u16, message: &str) -> TransportEvent {
    TransportEvent::ConnectionClosed(CloseReason {
        status_code: Some(status_code),
        message: Some(message.to_string()),
    })
}

pub fn text_event(id: &str, chat: &str, text: &str) -> Value {
    json!({
        "key": { "remoteJid": chat, "fromMe": false, "id": id },
        "pushName": "Alice",
        "messageTimestamp": 1700000000,
        "message": { "conversation": text }
    })
}

/// An event whose `message` is `{ kind: fields }`.
pub fn media_event(id: &str, chat: &str, kind: &str, fields: Value) -> Value {
    json!({
        "key": { "remoteJid": chat, "fromMe": false, "id": id },
        "pushName": "Alice",
        "messageTimestamp": 1700000000,
        "message": { kind: fields }
    })
}

pub fn image_event(id: &str, chat: &str, caption: Option<&str>) -> Value {
    let mut image = json!({ "mimetype": "image/jpeg", "fileSha256": "c2hhLWltYWdl" });
    if let Some(c) = caption {
        image["caption"] = json!(c);
    }
    json!({
        "key": { "remoteJid": chat, "fromMe": false, "id": id },
        "pushName": "Alice",
        "messageTimestamp": 1700000000,
        "message": { "imageMessage": image }
    })
}

/// The relayed message inside a captured envelope.
pub fn message_of(body: &Value) -> &Value {
    &body["entry"][0]["changes"][0]["value"]["messages"][0]
}
