//! In-process fan-out bus.
//!
//! Every endpoint of a [`LoopbackBus`] is a full [`PresenceChannel`]:
//! publishing encodes through the wire codec and receiving decodes through
//! the shared receive path, so single-machine sessions and transport-free
//! tests exercise exactly what the network transport does. Built on
//! `tokio::sync::broadcast`; a lagging endpoint drops messages and keeps
//! running.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::channel::{ChannelError, PresenceChannel, ReceivePath, SnapshotHandler};
use crate::protocol::PresenceSnapshot;
use crate::table::PresenceTable;

/// Fan-out bus shared by all in-process endpoints of one logical channel.
pub struct LoopbackBus {
    sender: broadcast::Sender<Arc<Vec<u8>>>,
    capacity: usize,
}

impl LoopbackBus {
    /// Bus with `capacity` frames buffered per endpoint before a slow
    /// endpoint starts dropping.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    /// Attach an endpoint that reconciles into `table`.
    ///
    /// Spawns the endpoint's receive task, so this must run inside a tokio
    /// runtime.
    pub fn endpoint(&self, table: Arc<PresenceTable>) -> LoopbackChannel {
        let mut rx = self.sender.subscribe();
        let receive = ReceivePath::new(table);
        let reader_path = receive.clone();
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let reader = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    frame = rx.recv() => match frame {
                        Ok(bytes) => reader_path.accept(&bytes),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("loopback endpoint lagged by {n} snapshots");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });

        LoopbackChannel {
            sender: self.sender.clone(),
            receive,
            shutdown,
            reader: Mutex::new(Some(reader)),
        }
    }

    /// Push pre-encoded bytes onto the bus, bypassing the codec. Returns
    /// the number of endpoints that received the frame.
    pub fn send_raw(&self, bytes: Arc<Vec<u8>>) -> usize {
        self.sender.send(bytes).unwrap_or(0)
    }

    /// Endpoints currently attached.
    pub fn endpoint_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Per-endpoint buffer capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// One participant's endpoint on a [`LoopbackBus`].
pub struct LoopbackChannel {
    sender: broadcast::Sender<Arc<Vec<u8>>>,
    receive: ReceivePath,
    shutdown: watch::Sender<bool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl PresenceChannel for LoopbackChannel {
    async fn publish(&self, snapshot: &PresenceSnapshot) -> Result<(), ChannelError> {
        let bytes = snapshot.encode().map_err(ChannelError::Codec)?;
        // Fire-and-forget: a bus with no attached endpoints is not an
        // error, the snapshot just goes nowhere.
        let _ = self.sender.send(Arc::new(bytes));
        Ok(())
    }

    fn subscribe(&self, handler: SnapshotHandler) {
        self.receive.register(handler);
    }

    async fn close(&self) -> Result<(), ChannelError> {
        let _ = self.shutdown.send(true);
        let handle = {
            let mut guard = match self.reader.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take()
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::debug!("loopback endpoint task ended abnormally: {e}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OpenFile;
    use std::time::Duration;

    fn snapshot(participant: &str, hashes: &[i64]) -> PresenceSnapshot {
        PresenceSnapshot::with_files(
            participant,
            vec![OpenFile::with_carets("x.rs", hashes.to_vec())],
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_publish_reaches_other_endpoints() {
        let bus = LoopbackBus::new(16);
        let alice_table = Arc::new(PresenceTable::new("alice"));
        let bob_table = Arc::new(PresenceTable::new("bob"));
        let alice = bus.endpoint(alice_table.clone());
        let _bob = bus.endpoint(bob_table.clone());

        alice.publish(&snapshot("alice", &[10, 20])).await.unwrap();
        settle().await;

        assert_eq!(bob_table.lookup(10), vec!["alice"]);
        assert_eq!(bob_table.lookup(20), vec!["alice"]);
        // Alice's own table skipped the echoed frame.
        assert!(alice_table.is_empty());
    }

    #[tokio::test]
    async fn test_endpoint_count() {
        let bus = LoopbackBus::new(16);
        assert_eq!(bus.endpoint_count(), 0);
        let table = Arc::new(PresenceTable::new("a"));
        let _one = bus.endpoint(table.clone());
        let _two = bus.endpoint(table);
        assert_eq!(bus.endpoint_count(), 2);
        assert_eq!(bus.capacity(), 16);
    }

    #[tokio::test]
    async fn test_garbage_frame_does_not_kill_subscription() {
        let bus = LoopbackBus::new(16);
        let table = Arc::new(PresenceTable::new("bob"));
        let _bob = bus.endpoint(table.clone());

        bus.send_raw(Arc::new(vec![0xDE, 0xAD, 0xBE, 0xEF]));
        settle().await;

        // The endpoint is still alive and processes the next good frame.
        bus.send_raw(Arc::new(snapshot("alice", &[5]).encode().unwrap()));
        settle().await;
        assert_eq!(table.lookup(5), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_no_handler_after_close() {
        let bus = LoopbackBus::new(16);
        let table = Arc::new(PresenceTable::new("bob"));
        let bob = bus.endpoint(table.clone());

        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = seen.clone();
        bob.subscribe(Box::new(move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }));

        bus.send_raw(Arc::new(snapshot("alice", &[1]).encode().unwrap()));
        settle().await;
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 1);

        bob.close().await.unwrap();
        bus.send_raw(Arc::new(snapshot("alice", &[2]).encode().unwrap()));
        settle().await;

        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(table.lookup(2).is_empty());
    }

    #[tokio::test]
    async fn test_close_twice_is_harmless() {
        let bus = LoopbackBus::new(16);
        let table = Arc::new(PresenceTable::new("bob"));
        let bob = bus.endpoint(table);
        bob.close().await.unwrap();
        bob.close().await.unwrap();
    }
}
