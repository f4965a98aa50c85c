//! Matching local syntax nodes against remote presence.
//!
//! The engine is deliberately dumb: given `{node, structural hash}` pairs,
//! it reports the nodes whose hash has a non-empty presence entry together
//! with the participants there. What a "node" is — and how it gets its
//! hash — belongs to the host's syntax layer; a renderer decides what to
//! do with the result. Nothing here mutates the table.

use std::sync::Arc;

use crate::table::PresenceTable;

/// Maps a syntax location to the stable integer that identifies its
/// structure, unchanged by edits that don't alter that structure.
///
/// Implemented by the host's syntax layer; consumed here and by the
/// snapshot producer.
pub trait StructuralHashProvider<N> {
    /// Stable structural hash for `node`.
    fn structural_hash(&self, node: &N) -> i64;
}

/// One local node with remote participants at its structural location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePresence<N> {
    /// The local syntax node.
    pub node: N,
    /// Sorted identities positioned at the node's structural hash.
    pub participants: Vec<String>,
}

/// Read-only correlation over the presence table.
pub struct CorrelationEngine {
    table: Arc<PresenceTable>,
}

impl CorrelationEngine {
    /// Engine reading from `table`.
    pub fn new(table: Arc<PresenceTable>) -> Self {
        Self { table }
    }

    /// Nodes with a non-empty presence at their hash, with the
    /// contributing participants. Pure function of the table's state at
    /// call time.
    pub fn correlate<N>(
        &self,
        nodes: impl IntoIterator<Item = (N, i64)>,
    ) -> Vec<NodePresence<N>> {
        nodes
            .into_iter()
            .filter_map(|(node, hash)| {
                let participants = self.table.lookup(hash);
                if participants.is_empty() {
                    None
                } else {
                    Some(NodePresence { node, participants })
                }
            })
            .collect()
    }

    /// Like [`correlate`](Self::correlate), hashing each node through
    /// `provider` first.
    pub fn correlate_with<N, P: StructuralHashProvider<N>>(
        &self,
        provider: &P,
        nodes: impl IntoIterator<Item = N>,
    ) -> Vec<NodePresence<N>> {
        self.correlate(nodes.into_iter().map(|node| {
            let hash = provider.structural_hash(&node);
            (node, hash)
        }))
    }
}
