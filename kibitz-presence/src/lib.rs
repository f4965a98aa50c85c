//! # kibitz-presence — Who is editing what, live
//!
//! Distributes each participant's open-file/caret state over a
//! publish/subscribe channel and reconciles received state into a shared
//! presence table, so a consumer can ask "which of my syntax nodes have a
//! teammate sitting on them?".
//!
//! ## Architecture
//!
//! ```text
//! local edits (LocalPresence)
//!       │ full-state PresenceSnapshot
//!       ▼
//! protocol::encode ──► PresenceChannel::publish ──► relay / loopback bus
//!                                                        │ fan-out
//!                                                        ▼
//!                                        peer receive path: decode,
//!                                        skip self, PresenceTable::merge,
//!                                        subscribed handlers
//!                                                        │
//!                                                        ▼
//!                              CorrelationEngine ──► {node, participants}
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — versioned binary snapshot codec
//! - [`local`] — local participant state and snapshot production
//! - [`table`] — reconciled hash → participants mapping
//! - [`channel`] — the publish/subscribe seam and the WebSocket transport
//! - [`broadcast`] — in-process loopback bus behind the same seam
//! - [`relay`] — the WebSocket fan-out server
//! - [`correlate`] — matching local nodes against remote presence
//!
//! There is no service registry: a host builds a [`PresenceTable`],
//! connects a channel against it, and hands the table to a
//! [`CorrelationEngine`] — explicit construction at the composition root.
//! Snapshots are full-state replacements, so the protocol needs no
//! ordering guarantees; the worst a lost or reordered message can do is
//! leave presence briefly stale.

pub mod broadcast;
pub mod channel;
pub mod correlate;
pub mod local;
pub mod protocol;
pub mod relay;
pub mod table;

pub use broadcast::{LoopbackBus, LoopbackChannel};
pub use channel::{ChannelConfig, ChannelError, PresenceChannel, SnapshotHandler, WebSocketChannel};
pub use correlate::{CorrelationEngine, NodePresence, StructuralHashProvider};
pub use local::LocalPresence;
pub use protocol::{
    MalformedSnapshot, OpenFile, PresenceSnapshot, PRESENCE_CHANNEL, WIRE_VERSION,
};
pub use relay::{RelayConfig, RelayServer, RelayStats};
pub use table::PresenceTable;
