//! WebSocket relay: the concrete broker behind the channel seam.
//!
//! ```text
//! participant A ──┐
//!                 ├── channel "kibitz.presence" ── fan-out (broadcast)
//! participant B ──┘                                    │
//!                                         ┌────────────┼────────────┐
//!                                         ▼            ▼            ▼
//!                                   participant A  participant B  part. C
//! ```
//!
//! The request path of each connection names the logical channel. Every
//! binary frame received on a channel is fanned out to every connection on
//! it — including the sender, whose own endpoint filters the echo by
//! identity. The relay never interprets frame contents; snapshots stay
//! opaque bytes end to end.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::PRESENCE_CHANNEL;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to.
    pub bind_addr: String,
    /// Frames buffered per connection before a lagging one drops.
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9098".to_string(),
            channel_capacity: 256,
        }
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub frames_relayed: u64,
    pub total_bytes: u64,
    pub active_channels: usize,
}

type ChannelMap = Arc<RwLock<HashMap<String, broadcast::Sender<Arc<Vec<u8>>>>>>;

/// The presence relay server.
pub struct RelayServer {
    config: RelayConfig,
    channels: ChannelMap,
    stats: Arc<RwLock<RelayStats>>,
}

impl RelayServer {
    /// Relay with the given configuration.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            channels: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(RelayStats::default())),
        }
    }

    /// Relay with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Accept connections forever. Call from an async runtime.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("presence relay listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("new TCP connection from {addr}");

            let channels = self.channels.clone();
            let stats = self.stats.clone();
            let capacity = self.config.channel_capacity;

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, channels, stats, capacity).await {
                    log::error!("relay connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Current statistics snapshot.
    pub async fn stats(&self) -> RelayStats {
        self.stats.read().await.clone()
    }

    /// The configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    channels: ChannelMap,
    stats: Arc<RwLock<RelayStats>>,
    capacity: usize,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // The request path names the channel: ws://relay/<channel>.
    let mut requested = String::new();
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        requested = req.uri().path().trim_start_matches('/').to_string();
        Ok(resp)
    })
    .await?;

    let channel_name = if requested.is_empty() {
        PRESENCE_CHANNEL.to_string()
    } else {
        requested
    };
    log::info!("relay: {addr} joined channel {channel_name}");

    let sender = get_or_create(&channels, &channel_name, capacity).await;
    let mut rx = sender.subscribe();

    {
        // Channel count is read before the stats lock; the two locks are
        // never held together.
        let channel_count = channels.read().await.len();
        let mut s = stats.write().await;
        s.total_connections += 1;
        s.active_connections += 1;
        s.active_channels = channel_count;
    }

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Binary(data))) => {
                    let bytes: Vec<u8> = data.into();
                    {
                        let mut s = stats.write().await;
                        s.frames_relayed += 1;
                        s.total_bytes += bytes.len() as u64;
                    }
                    log::trace!("relay: {} bytes on {channel_name}", bytes.len());
                    // Fan out to every connection on the channel. The
                    // sender's own receiver gets it too; endpoints filter
                    // the echo by identity.
                    let _ = sender.send(Arc::new(bytes));
                }
                Some(Ok(Message::Ping(data))) => {
                    ws_sender.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Close(_))) | None => {
                    log::debug!("relay: connection closed from {addr}");
                    break;
                }
                Some(Err(e)) => {
                    log::warn!("relay: socket error from {addr}: {e}");
                    break;
                }
                _ => {}
            },
            relayed = rx.recv() => match relayed {
                Ok(bytes) => {
                    ws_sender.send(Message::Binary(bytes.to_vec().into())).await?;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("relay: {addr} lagged by {n} frames on {channel_name}");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    // Drop our receiver before deciding whether the channel is dead.
    drop(rx);
    let remaining = {
        let mut map = channels.write().await;
        if let Some(s) = map.get(&channel_name) {
            if s.receiver_count() == 0 {
                map.remove(&channel_name);
                log::info!("relay: channel {channel_name} removed (empty)");
            }
        }
        map.len()
    };
    {
        let mut s = stats.write().await;
        s.active_connections -= 1;
        s.active_channels = remaining;
    }

    Ok(())
}

async fn get_or_create(
    channels: &ChannelMap,
    name: &str,
    capacity: usize,
) -> broadcast::Sender<Arc<Vec<u8>>> {
    // Fast path: read lock.
    {
        let map = channels.read().await;
        if let Some(sender) = map.get(name) {
            return sender.clone();
        }
    }

    // Slow path: write lock, double-checked.
    let mut map = channels.write().await;
    if let Some(sender) = map.get(name) {
        return sender.clone();
    }
    let (sender, _) = broadcast::channel(capacity);
    map.insert(name.to_string(), sender.clone());
    sender
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_config_default() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9098");
        assert_eq!(config.channel_capacity, 256);
    }

    #[test]
    fn test_relay_creation() {
        let relay = RelayServer::with_defaults();
        assert_eq!(relay.bind_addr(), "127.0.0.1:9098");
    }

    #[tokio::test]
    async fn test_relay_stats_initial() {
        let relay = RelayServer::with_defaults();
        let stats = relay.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.frames_relayed, 0);
        assert_eq!(stats.total_bytes, 0);
        assert_eq!(stats.active_channels, 0);
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_channels() {
        let channels: ChannelMap = Arc::new(RwLock::new(HashMap::new()));
        let one = get_or_create(&channels, "a", 16).await;
        let two = get_or_create(&channels, "a", 16).await;
        let other = get_or_create(&channels, "b", 16).await;

        // Same name resolves to the same underlying channel.
        let mut rx = one.subscribe();
        two.send(Arc::new(vec![1, 2, 3])).unwrap();
        assert_eq!(*rx.recv().await.unwrap(), vec![1, 2, 3]);
        // A different name does not.
        assert_eq!(other.receiver_count(), 0);
        assert_eq!(channels.read().await.len(), 2);
    }
}
