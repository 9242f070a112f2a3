//! WebSocket adapter (component G).
//!
//! One persistent connection per unique `(target, subprotocol)` pair,
//! multiplexing every topic any field of any ingester subscribes to over
//! that connection. `target` carries an optional `|`-separated subprotocol
//! suffix (`wss://host/ws|trades-v1`); a field's `selector` carries its
//! topic and extractor as `topic:$.json.pointer` (no `:` means "apply the
//! pointer to every message on the connection's default topic").
//!
//! Field values track the most recent message per topic in a shared map;
//! the ingester's own tick just snapshots that map, per §4.G: "`post_ingest`
//! fires on the ingester's own tick, snapshotting current-topic values."
//! Connections reconnect with exponential backoff and resubscribe every
//! topic on reconnect, matching `fleet_core`'s circuit-breaker-style
//! backoff used elsewhere in this fleet for RPC endpoints ([`crate::evm_pool`],
//! `chomp_core::rpc::RpcPool`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chomp_core::scheduler::IngesterBody;
use chomp_core::{FieldValue, IngesterDef, Result};
use futures::{FutureExt, SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::ingest::{self, StorageSink};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const PING_INTERVAL: Duration = Duration::from_secs(20);

/// Most recently observed value per topic on one connection.
type TopicMap = Arc<RwLock<HashMap<String, Value>>>;

/// A live (or reconnecting) WebSocket connection shared by every field
/// whose `target` resolves to it.
struct Connection {
    topics: TopicMap,
}

/// Keeps at most one [`Connection`] per unique `(url, subprotocol)` pair
/// alive for the process's lifetime, spawning its background read/reconnect
/// task lazily on first use.
#[derive(Default)]
struct ConnectionRegistry {
    connections: Mutex<HashMap<String, Arc<Connection>>>,
}

impl ConnectionRegistry {
    fn get_or_spawn(&self, target: &str, subscribe_topics: Vec<String>) -> TopicMap {
        let mut connections = self.connections.lock();
        if let Some(existing) = connections.get(target) {
            return Arc::clone(&existing.topics);
        }

        let topics: TopicMap = Arc::new(RwLock::new(HashMap::new()));
        let connection = Arc::new(Connection {
            topics: Arc::clone(&topics),
        });
        connections.insert(target.to_string(), Arc::clone(&connection));

        let (url, subprotocol) = split_target(target);
        tokio::spawn(run_connection(url, subprotocol, subscribe_topics, Arc::clone(&topics)));

        topics
    }
}

fn split_target(target: &str) -> (String, Option<String>) {
    match target.split_once('|') {
        Some((url, subprotocol)) => (url.to_string(), Some(subprotocol.to_string())),
        None => (target.to_string(), None),
    }
}

/// Parse a field selector as `topic:jsonpointer`, defaulting the topic to
/// the empty string (the connection's sole/default topic) when no `:` is
/// present.
fn parse_selector(selector: &str) -> (String, String) {
    match selector.split_once(':') {
        Some((topic, pointer)) => (topic.to_string(), pointer.to_string()),
        None => (String::new(), selector.to_string()),
    }
}

async fn run_connection(url: String, subprotocol: Option<String>, topics_to_subscribe: Vec<String>, topics: TopicMap) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        match connect_and_serve(&url, subprotocol.as_deref(), &topics_to_subscribe, &topics).await {
            Ok(()) => {
                debug!(url = %url, "websocket connection closed cleanly");
            }
            Err(err) => {
                warn!(url = %url, error = %err, "websocket connection failed, reconnecting");
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

async fn connect_and_serve(
    url: &str,
    subprotocol: Option<&str>,
    subscribe_topics: &[String],
    topics: &TopicMap,
) -> Result<()> {
    let mut request = url
        .into_client_request()
        .map_err(|err| chomp_core::ChompError::decode_error(url, err.to_string()))?;
    if let Some(subprotocol) = subprotocol {
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            subprotocol
                .parse()
                .map_err(|_| chomp_core::ChompError::decode_error(url, "invalid subprotocol header value"))?,
        );
    }

    let (mut stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|err| chomp_core::ChompError::decode_error(url, err.to_string()))?;

    for topic in subscribe_topics {
        subscribe(&mut stream, topic).await?;
    }

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if stream.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return Ok(());
                }
            }
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        handle_message(&text.to_string(), topics);
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        return Err(chomp_core::ChompError::decode_error(url, err.to_string()));
                    }
                }
            }
        }
    }
}

async fn subscribe(
    stream: &mut WebSocketStream<MaybeTlsStream<TcpStream>>,
    topic: &str,
) -> Result<()> {
    if topic.is_empty() {
        return Ok(());
    }
    let payload = serde_json::json!({"type": "subscribe", "topic": topic}).to_string();
    stream
        .send(Message::Text(payload.into()))
        .await
        .map_err(|err| chomp_core::ChompError::decode_error(topic, err.to_string()))
}

fn handle_message(text: &str, topics: &TopicMap) {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return;
    };
    let topic = value
        .get("topic")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    topics.write().insert(topic, value);
}

/// Construct the WebSocket ingester body atop a process-wide connection
/// registry, so every registered ingester that shares a `(url,
/// subprotocol)` target reuses the same socket.
#[must_use]
pub fn body(storage: Arc<StorageSink>) -> IngesterBody {
    let registry = Arc::new(ConnectionRegistry::default());
    Arc::new(move |context, def| {
        let storage = Arc::clone(&storage);
        let registry = Arc::clone(&registry);
        run_tick(context, def, storage, registry).boxed()
    })
}

async fn run_tick(
    context: Arc<chomp_core::scheduler::RuntimeContext>,
    def: Arc<IngesterDef>,
    storage: Arc<StorageSink>,
    registry: Arc<ConnectionRegistry>,
) -> Result<()> {
    let interval_sec = chomp_core::interval::parse(&def.interval)?;
    let mut fields = ingest::pre_ingest(&def);

    let mut topics_by_target: HashMap<String, Vec<String>> = HashMap::new();
    for field in &fields {
        if field.def.target.is_empty() {
            continue;
        }
        let (topic, _) = parse_selector(&field.def.selector);
        topics_by_target.entry(field.def.target.clone()).or_default().push(topic);
    }

    let mut maps: HashMap<String, TopicMap> = HashMap::new();
    for (target, topics) in topics_by_target {
        let map = registry.get_or_spawn(&target, topics);
        maps.insert(target, map);
    }

    for field in &mut fields {
        if field.def.target.is_empty() {
            continue;
        }
        let Some(map) = maps.get(&field.def.target) else {
            continue;
        };
        let (topic, pointer) = parse_selector(&field.def.selector);
        let snapshot = map.read();
        if let Some(message) = snapshot.get(&topic) {
            if let Some(value) = crate::selector::extract(message, &pointer) {
                field.value = FieldValue::from(value);
            }
        }
    }

    ingest::post_ingest(&def, fields, &storage, context.clock.as_ref(), interval_sec).await
}
