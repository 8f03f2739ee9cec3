use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Row-level change pushed by the realtime database.
#[derive(Debug, Clone)]
pub struct RowEvent {
    pub kind: RowEventKind,
    pub record: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowEventKind {
    Insert,
    Update,
}

/// Everything a channel subscriber can observe.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The server acknowledged the subscription ("SUBSCRIBED").
    Joined,
    Row(RowEvent),
}

#[derive(Serialize)]
struct ClientFrame<'a> {
    action: &'a str,
    topic: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    table: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<&'a str>,
}

#[derive(Deserialize)]
struct ServerFrame {
    #[serde(default)]
    topic: String,
    #[serde(default)]
    event: String,
    #[serde(default)]
    record: serde_json::Value,
}

struct Sub {
    table: String,
    filter: Option<String>,
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

enum Cmd {
    Subscribe {
        topic: String,
        table: String,
        filter: Option<String>,
        tx: mpsc::UnboundedSender<ChannelEvent>,
    },
    Unsubscribe {
        topic: String,
    },
}

/// Client for the realtime pub/sub service.
///
/// One websocket connection is shared by all channel subscriptions. The
/// connection task reconnects on its own after transport failures and
/// re-joins every registered topic, so subscribers only ever see an event
/// gap, never an error.
pub struct RealtimeClient {
    cmd_tx: mpsc::UnboundedSender<Cmd>,
}

impl RealtimeClient {
    /// Spawn the connection task. Connecting is lazy and retried forever;
    /// this never fails.
    pub fn connect(url: impl Into<String>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_loop(url.into(), cmd_rx));
        Self { cmd_tx }
    }

    /// Subscribe to insert/update events for `table`, optionally filtered
    /// (e.g. `call_id=eq.<id>`). The returned guard releases the server-side
    /// subscription on `release()` or drop, whichever comes first.
    pub fn subscribe(
        &self,
        topic: &str,
        table: &str,
        filter: Option<String>,
    ) -> (ChannelGuard, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.cmd_tx.send(Cmd::Subscribe {
            topic: topic.to_string(),
            table: table.to_string(),
            filter,
            tx,
        });
        let guard = ChannelGuard {
            topic: topic.to_string(),
            cmd_tx: self.cmd_tx.clone(),
            released: false,
        };
        (guard, rx)
    }
}

/// Scoped handle to one channel subscription.
pub struct ChannelGuard {
    topic: String,
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    released: bool,
}

impl ChannelGuard {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Release the subscription now. Idempotent.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            let _ = self.cmd_tx.send(Cmd::Unsubscribe {
                topic: self.topic.clone(),
            });
        }
    }
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        self.release();
    }
}

fn join_frame(topic: &str, table: &str, filter: Option<&str>) -> String {
    serde_json::to_string(&ClientFrame {
        action: "subscribe",
        topic,
        table: Some(table),
        filter,
    })
    .expect("frame serialization cannot fail")
}

fn leave_frame(topic: &str) -> String {
    serde_json::to_string(&ClientFrame {
        action: "unsubscribe",
        topic,
        table: None,
        filter: None,
    })
    .expect("frame serialization cannot fail")
}

fn dispatch(raw: &str, subs: &mut HashMap<String, Sub>) {
    let frame: ServerFrame = match serde_json::from_str(raw) {
        Ok(f) => f,
        Err(e) => {
            debug!("[Realtime] Ignoring unparsable frame: {}", e);
            return;
        }
    };

    let Some(sub) = subs.get(&frame.topic) else {
        return;
    };

    let event = match frame.event.as_str() {
        "SUBSCRIBED" => ChannelEvent::Joined,
        "INSERT" => ChannelEvent::Row(RowEvent {
            kind: RowEventKind::Insert,
            record: frame.record,
        }),
        "UPDATE" => ChannelEvent::Row(RowEvent {
            kind: RowEventKind::Update,
            record: frame.record,
        }),
        other => {
            debug!("[Realtime] Ignoring event type {:?}", other);
            return;
        }
    };

    if sub.tx.send(event).is_err() {
        // Receiver gone without releasing its guard; drop the registration.
        subs.remove(&frame.topic);
    }
}

/// Apply a command while no socket is up; the join happens on reconnect.
fn apply_offline(cmd: Cmd, subs: &mut HashMap<String, Sub>) {
    match cmd {
        Cmd::Subscribe {
            topic,
            table,
            filter,
            tx,
        } => {
            subs.insert(topic, Sub { table, filter, tx });
        }
        Cmd::Unsubscribe { topic } => {
            subs.remove(&topic);
        }
    }
}

async fn run_loop(url: String, mut cmd_rx: mpsc::UnboundedReceiver<Cmd>) {
    let mut subs: HashMap<String, Sub> = HashMap::new();

    loop {
        let mut ws = match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                info!("[Realtime] Connected to {}", url);
                ws
            }
            Err(e) => {
                warn!("[Realtime] Connect failed: {}; retrying", e);
                // Keep honoring subscribe/unsubscribe while offline.
                let deadline = tokio::time::Instant::now() + RECONNECT_DELAY;
                loop {
                    match tokio::time::timeout_at(deadline, cmd_rx.recv()).await {
                        Ok(Some(cmd)) => apply_offline(cmd, &mut subs),
                        Ok(None) => return,
                        Err(_) => break,
                    }
                }
                continue;
            }
        };

        // Re-join every registered topic on (re)connect.
        let mut send_failed = false;
        for (topic, sub) in &subs {
            let frame = join_frame(topic, &sub.table, sub.filter.as_deref());
            if ws.send(Message::text(frame)).await.is_err() {
                send_failed = true;
                break;
            }
        }
        if send_failed {
            tokio::time::sleep(RECONNECT_DELAY).await;
            continue;
        }

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Cmd::Subscribe { topic, table, filter, tx }) => {
                        let frame = join_frame(&topic, &table, filter.as_deref());
                        subs.insert(topic, Sub { table, filter, tx });
                        if ws.send(Message::text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Some(Cmd::Unsubscribe { topic }) => {
                        subs.remove(&topic);
                        if ws.send(Message::text(leave_frame(&topic))).await.is_err() {
                            break;
                        }
                    }
                    None => return,
                },
                msg = ws.next() => match msg {
                    Some(Ok(Message::Text(txt))) => dispatch(&txt, &mut subs),
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        warn!("[Realtime] Connection closed; reconnecting");
                        break;
                    }
                    Some(Err(e)) => {
                        error!("[Realtime] Read error: {}; reconnecting", e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }

        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}
