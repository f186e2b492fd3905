//! Conn — multiplexed WebSocket JSON-RPC connection to the base station
//! (§4.1, §4.1.1, §5.1). Grounded on `main.rs`'s `Arc<RwLock<..>>` shared
//! state idiom and `audit.rs`'s SHA-256 use of the `sha2` crate, extended
//! here with `hmac` for the challenge-response handshake.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::ConnError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsStream, Message>;

struct Shared {
    sink: Mutex<WsSink>,
    waiters: Mutex<HashMap<u64, (String, oneshot::Sender<Result<Value, ConnError>>)>>,
    next_id: AtomicU64,
    down: std::sync::atomic::AtomicBool,
}

/// The welcome frame received at connect time, kept for server-time
/// extrapolation by `meta.sync` (§4.2).
#[derive(Debug, Clone)]
pub struct Welcome {
    pub srv_time: f64,
    pub srv_utc: Option<f64>,
    pub received_at_unix: f64,
}

pub struct Conn {
    shared: Arc<Shared>,
    pub welcome: Welcome,
    recv_task: tokio::task::JoinHandle<()>,
}

fn now_unix() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

impl Conn {
    pub async fn connect(uri: &str, password: Option<&str>) -> Result<Conn, ConnError> {
        let (stream, _resp) = tokio_tungstenite::connect_async(uri)
            .await
            .map_err(|e| ConnError::Handshake(e.to_string()))?;
        let (mut sink, mut source) = stream.split();

        let welcome_frame = read_json_frame(&mut source)
            .await
            .ok_or_else(|| ConnError::Handshake("stream closed before welcome frame".into()))?
            .map_err(|e| ConnError::Handshake(e))?;
        let received_at_unix = now_unix();

        let message = welcome_frame.get("message").and_then(Value::as_str).unwrap_or("");
        match message {
            "ready" => {}
            "authenticate" => {
                let challenge = welcome_frame
                    .get("challenge")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ConnError::Handshake("missing challenge".into()))?;
                let password = password.ok_or_else(|| ConnError::Handshake("password required".into()))?;
                let typ = welcome_frame.get("type").and_then(Value::as_str).unwrap_or("");
                let name = welcome_frame.get("name").and_then(Value::as_str).unwrap_or("");
                let key = format!("{typ}:{password}:{name}");

                let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
                    .map_err(|e| ConnError::Handshake(e.to_string()))?;
                mac.update(challenge.as_bytes());
                let res = hex::encode(mac.finalize().into_bytes());

                let frame = json!({"message": "authenticate", "res": res});
                send_json_frame(&mut sink, &frame).await.map_err(ConnError::ConnIO)?;

                let reply = read_json_frame(&mut source)
                    .await
                    .ok_or_else(|| ConnError::Handshake("stream closed during auth".into()))?
                    .map_err(ConnError::Handshake)?;
                if reply.get("ready").and_then(Value::as_bool) != Some(true) {
                    let cause = reply.get("error").and_then(Value::as_str).unwrap_or("authentication failed");
                    return Err(ConnError::Handshake(cause.to_string()));
                }
            }
            other => return Err(ConnError::Handshake(format!("unexpected welcome message {other:?}"))),
        }

        let srv_time = welcome_frame.get("time").and_then(Value::as_f64).unwrap_or(0.0);
        let srv_utc = welcome_frame.get("utc").and_then(Value::as_f64);

        let shared = Arc::new(Shared {
            sink: Mutex::new(sink),
            waiters: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            down: std::sync::atomic::AtomicBool::new(false),
        });

        let recv_shared = shared.clone();
        let recv_task = tokio::spawn(async move {
            recv_loop(recv_shared, source).await;
        });

        Ok(Conn {
            shared,
            welcome: Welcome { srv_time, srv_utc, received_at_unix },
            recv_task,
        })
    }

    /// Send `{message:query, message_id:ID, ...options}` and await the
    /// matching reply, or a per-request timeout.
    pub async fn req(&self, query: &str, options: Value, timeout: Duration) -> Result<Value, ConnError> {
        if self.shared.down.load(Ordering::SeqCst) {
            return Err(ConnError::ConnClosed);
        }
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);

        let mut frame = json!({"message": query, "message_id": id});
        if let Value::Object(opts) = options {
            if let Value::Object(frame_obj) = &mut frame {
                frame_obj.extend(opts);
            }
        }

        let (tx, rx) = oneshot::channel();
        self.shared.waiters.lock().await.insert(id, (query.to_string(), tx));

        {
            let mut sink = self.shared.sink.lock().await;
            if let Err(e) = send_json_frame(&mut sink, &frame).await {
                self.shared.waiters.lock().await.remove(&id);
                return Err(ConnError::ConnIO(e));
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ConnError::ConnClosed),
            Err(_) => {
                self.shared.waiters.lock().await.remove(&id);
                Err(ConnError::ConnIO("request timed out".into()))
            }
        }
    }

    /// Idempotent shutdown: marks down, wakes every waiter with
    /// `ConnClosed`, aborts the receive task.
    pub async fn close(&self) {
        if self.shared.down.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut waiters = self.shared.waiters.lock().await;
        for (_, (_, tx)) in waiters.drain() {
            let _ = tx.send(Err(ConnError::ConnClosed));
        }
        drop(waiters);
        self.recv_task.abort();
    }
}

async fn recv_loop(shared: Arc<Shared>, mut source: futures_util::stream::SplitStream<WsStream>) {
    loop {
        match read_json_frame(&mut source).await {
            Some(Ok(frame)) => {
                let id = frame.get("message_id").and_then(Value::as_u64);
                let Some(id) = id else {
                    debug!("Conn: frame without message_id, dropping: {frame}");
                    continue;
                };
                let waiter = shared.waiters.lock().await.remove(&id);
                match waiter {
                    Some((expected, tx)) => {
                        let got = frame.get("message").and_then(Value::as_str).unwrap_or("").to_string();
                        if got == expected {
                            let _ = tx.send(Ok(frame));
                        } else {
                            warn!("Conn: reply name mismatch, shutting down: expected {expected}, got {got}");
                            let _ = tx.send(Err(ConnError::ReplyMismatch { expected, got }));
                            shutdown_all(&shared).await;
                            return;
                        }
                    }
                    None => {
                        warn!("Conn: reply for unknown message_id {id}, shutting down");
                        shutdown_all(&shared).await;
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                warn!("Conn: receive error, shutting down: {e}");
                shutdown_all(&shared).await;
                return;
            }
            None => {
                shutdown_all(&shared).await;
                return;
            }
        }
    }
}

async fn shutdown_all(shared: &Arc<Shared>) {
    if shared.down.swap(true, Ordering::SeqCst) {
        return;
    }
    let mut waiters = shared.waiters.lock().await;
    for (_, (_, tx)) in waiters.drain() {
        let _ = tx.send(Err(ConnError::ConnClosed));
    }
}

async fn send_json_frame(sink: &mut WsSink, value: &Value) -> Result<(), String> {
    let text = serde_json::to_string(value).map_err(|e| e.to_string())?;
    sink.send(Message::Text(text)).await.map_err(|e| e.to_string())
}

async fn read_json_frame(
    source: &mut futures_util::stream::SplitStream<WsStream>,
) -> Option<Result<Value, String>> {
    loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => return Some(serde_json::from_str(&text).map_err(|e| e.to_string())),
            Some(Ok(Message::Close(_))) | None => return None,
            Some(Ok(_other)) => continue,
            Some(Err(e)) => return Some(Err(e.to_string())),
        }
    }
}
