//! Bridge transport: one WebSocket per session to a protocol sidecar that owns the account
//! connection. Frames use the req/res/event shape:
//! `{ "type": "req", "id", "method", "params" }`, `{ "type": "res", "id", "ok", "payload" | "error" }`,
//! `{ "type": "event", "event", "payload" }`.

use super::{
    BatchKind, CloseReason, Connection, Connector, CredentialUpdate, InboundEvent, MessageBatch,
    Transport, TransportError, TransportEvent,
};
use async_trait::async_trait;
use base64::Engine;
use futures_util::{SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::{self, Message};

const OUTBOUND_BUFFER: usize = 32;

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value, String>>>>>;

#[derive(Debug, Serialize)]
struct BridgeRequest<'a> {
    #[serde(rename = "type")]
    typ: &'static str,
    id: &'a str,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum BridgeFrame {
    Res {
        id: String,
        ok: bool,
        #[serde(default)]
        payload: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
    Event {
        event: String,
        #[serde(default)]
        payload: Value,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClosePayload {
    #[serde(default)]
    status_code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
}

/// Connects sessions to the bridge at `{url}/sessions/{id}`.
pub struct BridgeConnector {
    url: String,
    token: Option<String>,
}

impl BridgeConnector {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            token,
        }
    }
}

#[async_trait]
impl Connector for BridgeConnector {
    async fn connect(
        &self,
        session_id: &str,
        credential_dir: &Path,
    ) -> Result<Connection, TransportError> {
        let url = format!("{}/sessions/{}", self.url, session_id);
        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut sink, stream) = ws.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let sid = session_id.to_string();
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    log::debug!("bridge {}: write failed: {}", sid, e);
                    break;
                }
            }
            let _ = sink.close().await;
        });
        tokio::spawn(read_frames(
            session_id.to_string(),
            stream,
            event_tx,
            pending.clone(),
            closed.clone(),
        ));

        let transport = Arc::new(BridgeTransport {
            session_id: session_id.to_string(),
            outbound: outbound_tx,
            pending,
            closed,
        });
        let mut params = json!({
            "sessionId": session_id,
            "credentialDir": credential_dir.display().to_string(),
        });
        if let Some(ref t) = self.token {
            params["auth"] = json!({ "token": t });
        }
        transport.request("connect", params).await.map_err(|e| match e {
            TransportError::Rejected(msg) => TransportError::Connect(msg),
            other => other,
        })?;
        log::debug!("bridge {}: connected to {}", session_id, url);

        Ok(Connection {
            transport,
            events: event_rx,
        })
    }
}

struct BridgeTransport {
    session_id: String,
    outbound: mpsc::Sender<Message>,
    pending: Pending,
    closed: Arc<AtomicBool>,
}

impl BridgeTransport {
    /// Send a request frame and wait for the matching response.
    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);
        // Reader sets `closed` before draining `pending`; checking after insert avoids a lost wakeup.
        if self.closed.load(Ordering::SeqCst) {
            self.pending.lock().await.remove(&id);
            return Err(TransportError::Disconnected);
        }
        let frame = serde_json::to_string(&BridgeRequest {
            typ: "req",
            id: &id,
            method,
            params,
        })
        .map_err(|e| TransportError::Protocol(e.to_string()))?;
        if self.outbound.send(Message::Text(frame)).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(TransportError::Disconnected);
        }
        match rx.await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(e)) => Err(TransportError::Rejected(e)),
            Err(_) => Err(TransportError::Disconnected),
        }
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), TransportError> {
        self.request("send", json!({ "to": to, "text": body })).await?;
        Ok(())
    }

    async fn download_media(&self, event: &InboundEvent) -> Result<Vec<u8>, TransportError> {
        let payload = self
            .request("downloadMedia", json!({ "message": event.raw }))
            .await?;
        let data = payload
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::Protocol("downloadMedia: missing data".to_string()))?;
        base64::engine::general_purpose::STANDARD
            .decode(data.as_bytes())
            .map_err(|e| TransportError::Protocol(format!("downloadMedia: {}", e)))
    }

    async fn close(&self) -> Result<(), TransportError> {
        log::debug!("bridge {}: closing", self.session_id);
        self.outbound
            .send(Message::Close(None))
            .await
            .map_err(|_| TransportError::Disconnected)
    }
}

async fn read_frames<S>(
    session_id: String,
    mut stream: S,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    pending: Pending,
    closed: Arc<AtomicBool>,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                log::debug!("bridge {}: read failed: {}", session_id, e);
                break;
            }
        };
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };
        let frame: BridgeFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                log::debug!("bridge {}: unparseable frame: {}", session_id, e);
                continue;
            }
        };
        match frame {
            BridgeFrame::Res {
                id,
                ok,
                payload,
                error,
            } => {
                if let Some(tx) = pending.lock().await.remove(&id) {
                    let result = if ok {
                        Ok(payload.unwrap_or(Value::Null))
                    } else {
                        Err(error.unwrap_or_else(|| "request failed".to_string()))
                    };
                    let _ = tx.send(result);
                }
            }
            BridgeFrame::Event { event, payload } => match parse_event(&event, payload) {
                Some(ev) => {
                    if event_tx.send(ev).is_err() {
                        log::debug!("bridge {}: event receiver dropped", session_id);
                        break;
                    }
                }
                None => log::debug!("bridge {}: ignoring event {}", session_id, event),
            },
        }
    }
    closed.store(true, Ordering::SeqCst);
    pending.lock().await.clear();
    log::debug!("bridge {}: stream ended", session_id);
}

/// Map a bridge event frame to a transport event. Unknown or malformed events yield None.
fn parse_event(event: &str, payload: Value) -> Option<TransportEvent> {
    match event {
        "creds.update" => {
            let file = payload.get("file")?.as_str()?.to_string();
            let data = payload.get("data")?.as_str()?;
            let data = base64::engine::general_purpose::STANDARD
                .decode(data.as_bytes())
                .ok()?;
            Some(TransportEvent::CredentialsChanged(CredentialUpdate { file, data }))
        }
        "qr" => {
            let qr = payload.get("qr")?.as_str()?.to_string();
            Some(TransportEvent::QrIssued(qr))
        }
        "connection.open" => Some(TransportEvent::ConnectionOpened),
        "connection.close" => {
            let close: ClosePayload = serde_json::from_value(payload).unwrap_or(ClosePayload {
                status_code: None,
                message: None,
            });
            Some(TransportEvent::ConnectionClosed(CloseReason {
                status_code: close.status_code,
                message: close.message,
            }))
        }
        "messages.upsert" => {
            let kind = match payload.get("type").and_then(Value::as_str) {
                Some("notify") => BatchKind::Notify,
                _ => BatchKind::Append,
            };
            let events = payload
                .get("messages")
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .cloned()
                        .filter_map(InboundEvent::from_wire)
                        .collect()
                })
                .unwrap_or_default();
            Some(TransportEvent::MessagesReceived(MessageBatch { kind, events }))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Serve one bridge connection: answer every request, preceded by `burst` qr events when
    /// the method is `send`.
    async fn serve_bridge(burst: usize) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                let Message::Text(text) = msg else { continue };
                let req: Value = serde_json::from_str(&text).unwrap();
                if req["method"] == "send" {
                    for i in 0..burst {
                        let ev = json!({ "type": "event", "event": "qr", "payload": { "qr": format!("qr-{}", i) } });
                        ws.send(Message::Text(ev.to_string())).await.unwrap();
                    }
                }
                let res = json!({ "type": "res", "id": req["id"], "ok": true, "payload": {} });
                ws.send(Message::Text(res.to_string())).await.unwrap();
            }
        });
        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn responses_arrive_while_events_are_unread() {
        let url = serve_bridge(200).await;
        let connector = BridgeConnector::new(url, None);
        let Connection { transport, mut events } = connector
            .connect("s1", &std::env::temp_dir())
            .await
            .unwrap();

        let sent = tokio::time::timeout(
            Duration::from_secs(5),
            transport.send_text("5511@s.whatsapp.net", "hi"),
        )
        .await;
        assert!(matches!(sent, Ok(Ok(()))), "{:?}", sent);

        let mut codes = Vec::new();
        while let Ok(ev) = events.try_recv() {
            if let TransportEvent::QrIssued(qr) = ev {
                codes.push(qr);
            }
        }
        assert_eq!(codes.len(), 200);
        assert_eq!(codes[0], "qr-0");
        assert_eq!(codes[199], "qr-199");
    }

    #[test]
    fn parses_close_with_status() {
        let ev = parse_event(
            "connection.close",
            json!({ "statusCode": 401, "message": "logged out" }),
        );
        match ev {
            Some(TransportEvent::ConnectionClosed(reason)) => {
                assert_eq!(reason.status_code, Some(401));
                assert!(reason.is_terminal());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn close_without_payload_is_transient() {
        match parse_event("connection.close", Value::Null) {
            Some(TransportEvent::ConnectionClosed(reason)) => assert!(!reason.is_terminal()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_credentials_update() {
        let ev = parse_event("creds.update", json!({ "file": "creds.json", "data": "e30=" }));
        match ev {
            Some(TransportEvent::CredentialsChanged(u)) => {
                assert_eq!(u.file, "creds.json");
                assert_eq!(u.data, b"{}".to_vec());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn messages_upsert_keeps_order_and_drops_keyless_records() {
        let ev = parse_event(
            "messages.upsert",
            json!({
                "type": "notify",
                "messages": [
                    { "key": { "remoteJid": "1@s.whatsapp.net", "id": "a" }, "message": { "conversation": "one" } },
                    { "nokey": true },
                    { "key": { "remoteJid": "1@s.whatsapp.net", "id": "b" }, "message": { "conversation": "two" } }
                ]
            }),
        );
        match ev {
            Some(TransportEvent::MessagesReceived(batch)) => {
                assert_eq!(batch.kind, BatchKind::Notify);
                let ids: Vec<_> = batch.events.iter().map(|e| e.id.as_str()).collect();
                assert_eq!(ids, vec!["a", "b"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_event_is_ignored() {
        assert!(parse_event("presence.update", json!({})).is_none());
    }

    #[test]
    fn response_frame_deserializes() {
        let frame: BridgeFrame =
            serde_json::from_str(r#"{"type":"res","id":"7","ok":false,"error":"nope"}"#).unwrap();
        match frame {
            BridgeFrame::Res { id, ok, error, .. } => {
                assert_eq!(id, "7");
                assert!(!ok);
                assert_eq!(error.as_deref(), Some("nope"));
            }
            BridgeFrame::Event { .. } => panic!("expected res"),
        }
    }
}
