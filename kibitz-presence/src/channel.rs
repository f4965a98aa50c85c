//! Publish/subscribe channel seam and the WebSocket transport.
//!
//! Every transport satisfies [`PresenceChannel`]: fire-and-forget
//! `publish`, handler registration via `subscribe`, and a `close` that
//! finishes any in-flight receive work before returning. The receive path
//! — decode defensively, skip our own snapshots, merge into the table,
//! invoke handlers — is shared between transports.

use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{MalformedSnapshot, PresenceSnapshot, PRESENCE_CHANNEL};
use crate::table::PresenceTable;

/// Receive handler invoked once per inbound decoded snapshot.
pub type SnapshotHandler = Box<dyn Fn(&PresenceSnapshot) + Send + Sync>;

/// Transport-level failures, isolated to the failing call.
#[derive(Debug)]
pub enum ChannelError {
    /// Connection establishment failed.
    Connect(String),
    /// The transport rejected a send.
    Transport(String),
    /// The channel was closed before or during the call.
    Closed,
    /// The local snapshot could not be encoded.
    Codec(MalformedSnapshot),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "presence channel connect failed: {e}"),
            Self::Transport(e) => write!(f, "presence channel transport error: {e}"),
            Self::Closed => write!(f, "presence channel is closed"),
            Self::Codec(e) => write!(f, "presence channel codec error: {e}"),
        }
    }
}

impl std::error::Error for ChannelError {}

/// A named logical channel shared by all participants in a session.
///
/// `publish` is fire-and-forget: no acknowledgment, no delivery guarantee.
/// No cross-participant ordering is assumed — snapshots are full-state
/// replacements, so reordering only risks staleness until the next
/// broadcast. `close` is the one synchronization point: after it returns,
/// no handler runs and the shared table is no longer touched.
#[async_trait]
pub trait PresenceChannel: Send + Sync {
    /// Encode and send a snapshot to all peers on the channel.
    async fn publish(&self, snapshot: &PresenceSnapshot) -> Result<(), ChannelError>;

    /// Register a handler invoked once per inbound decoded snapshot.
    fn subscribe(&self, handler: SnapshotHandler);

    /// Tear the channel down, completing in-flight receive work first.
    async fn close(&self) -> Result<(), ChannelError>;
}

/// Shared receive path: one inbound frame in, table + handlers out.
#[derive(Clone)]
pub(crate) struct ReceivePath {
    table: Arc<PresenceTable>,
    handlers: Arc<RwLock<Vec<SnapshotHandler>>>,
}

impl ReceivePath {
    pub(crate) fn new(table: Arc<PresenceTable>) -> Self {
        Self {
            table,
            handlers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub(crate) fn register(&self, handler: SnapshotHandler) {
        let mut handlers = match self.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers.push(handler);
    }

    /// Process one inbound frame. A frame that does not decode is logged
    /// and dropped; it never terminates the subscription.
    pub(crate) fn accept(&self, bytes: &[u8]) {
        let snapshot = match PresenceSnapshot::decode(bytes) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                log::warn!("dropping malformed presence snapshot: {err}");
                return;
            }
        };
        // Our own broadcasts come back through the fan-out.
        if snapshot.participant == self.table.local_participant() {
            return;
        }

        self.table.merge(&snapshot);
        let handlers = match self.handlers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for handler in handlers.iter() {
            handler(&snapshot);
        }
    }
}

/// Where and under what name to join a session.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Relay endpoint, e.g. `ws://127.0.0.1:9098`.
    pub url: String,
    /// Logical channel name, appended to the URL path.
    pub channel: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9098".to_string(),
            channel: PRESENCE_CHANNEL.to_string(),
        }
    }
}

/// WebSocket transport to a relay.
///
/// `connect` spawns a writer task (an mpsc queue drained into the socket)
/// and a reader task (frames through the shared receive path). Both stop
/// on `close`, which awaits them so no handler outlives the call.
pub struct WebSocketChannel {
    receive: ReceivePath,
    outgoing: mpsc::Sender<Vec<u8>>,
    shutdown: watch::Sender<bool>,
    reader: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketChannel {
    /// Connect to the relay and join `config.channel`.
    ///
    /// The connection must be established before `publish`/`subscribe` are
    /// ready, so this suspends until the handshake completes.
    pub async fn connect(
        config: ChannelConfig,
        table: Arc<PresenceTable>,
    ) -> Result<Self, ChannelError> {
        let url = format!("{}/{}", config.url.trim_end_matches('/'), config.channel);
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        log::info!(
            "presence channel {} joined as {}",
            config.channel,
            table.local_participant()
        );
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (outgoing, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let mut writer_shutdown = shutdown_rx.clone();
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_shutdown.changed() => break,
                    data = out_rx.recv() => match data {
                        Some(data) => {
                            if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
            let _ = ws_writer.send(Message::Close(None)).await;
        });

        let receive = ReceivePath::new(table);
        let reader_path = receive.clone();
        let reader = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    frame = ws_reader.next() => match frame {
                        Some(Ok(Message::Binary(data))) => reader_path.accept(&data),
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            log::warn!("presence channel socket error: {e}");
                            break;
                        }
                        _ => {}
                    }
                }
            }
        });

        Ok(Self {
            receive,
            outgoing,
            shutdown,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
        })
    }
}

#[async_trait]
impl PresenceChannel for WebSocketChannel {
    async fn publish(&self, snapshot: &PresenceSnapshot) -> Result<(), ChannelError> {
        let bytes = snapshot.encode().map_err(ChannelError::Codec)?;
        self.outgoing
            .send(bytes)
            .await
            .map_err(|_| ChannelError::Closed)
    }

    fn subscribe(&self, handler: SnapshotHandler) {
        self.receive.register(handler);
    }

    async fn close(&self) -> Result<(), ChannelError> {
        let _ = self.shutdown.send(true);
        for slot in [&self.reader, &self.writer] {
            let handle = {
                let mut guard = match slot.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                guard.take()
            };
            if let Some(handle) = handle {
                if let Err(e) = handle.await {
                    log::debug!("presence channel task ended abnormally: {e}");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OpenFile;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn encoded(participant: &str, hashes: &[i64]) -> Vec<u8> {
        PresenceSnapshot::with_files(
            participant,
            vec![OpenFile::with_carets("x.rs", hashes.to_vec())],
        )
        .encode()
        .unwrap()
    }

    #[test]
    fn test_receive_path_merges_and_notifies() {
        let table = Arc::new(PresenceTable::new("me"));
        let path = ReceivePath::new(table.clone());

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        path.register(Box::new(move |snapshot| {
            assert_eq!(snapshot.participant, "alice");
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        path.accept(&encoded("alice", &[4]));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(table.lookup(4), vec!["alice"]);
    }

    #[test]
    fn test_receive_path_skips_own_snapshots() {
        let table = Arc::new(PresenceTable::new("me"));
        let path = ReceivePath::new(table.clone());

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        path.register(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        path.accept(&encoded("me", &[4]));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert!(table.lookup(4).is_empty());
    }

    #[test]
    fn test_receive_path_survives_garbage() {
        let table = Arc::new(PresenceTable::new("me"));
        let path = ReceivePath::new(table.clone());

        path.accept(&[0xFF, 0xFE, 0xFD]);
        path.accept(&[]);
        // A later good frame still lands.
        path.accept(&encoded("alice", &[1]));
        assert_eq!(table.lookup(1), vec!["alice"]);
    }

    #[test]
    fn test_channel_config_default() {
        let config = ChannelConfig::default();
        assert_eq!(config.url, "ws://127.0.0.1:9098");
        assert_eq!(config.channel, PRESENCE_CHANNEL);
    }

    #[test]
    fn test_channel_error_display() {
        let err = ChannelError::Codec(MalformedSnapshot::Truncated);
        assert!(err.to_string().contains("codec"));
        assert!(ChannelError::Closed.to_string().contains("closed"));
    }
}
