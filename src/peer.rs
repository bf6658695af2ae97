//! # Peer Interface
//!
//! The downloader never speaks to the network itself: peer discovery, wire
//! framing and timeouts belong to the peer layer. This module defines the
//! two traits that layer implements, plus the error kinds the scheduler
//! needs to tell apart.
//!
//! All calls are blocking; the engine issues them from worker threads and
//! only ever observes completion or failure.

use std::io::Read;
use std::sync::Arc;

use thiserror::Error;

use crate::entry::{Entries, Entry};
use crate::hash::Hash;

/// Failure kinds surfaced by the peer layer.
///
/// The downloader maps these onto download statuses: `EntryNotFound` is
/// fatal for the download, `Unreachable` drops the peer from the candidate
/// set until its next advertisement, `Transfer` makes the chunk re-eligible.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("entry not found on peer")]
    EntryNotFound,
    #[error("peer unreachable")]
    Unreachable,
    #[error("transfer failed: {0}")]
    Transfer(String),
}

pub type PeerResult<T> = Result<T, PeerError>;

/// A remote peer on the local network.
pub trait Peer: Send + Sync {
    /// Stable identifier advertised by the peer.
    fn id(&self) -> Hash;

    /// Whether the peer is currently present on the network.
    fn is_connected(&self) -> bool;

    /// Ask the peer for all chunk hashes of a file it advertises.
    fn get_hashes(&self, entry: &Entry) -> PeerResult<Vec<Hash>>;

    /// Ask the peer for the children of a directory it advertises.
    fn get_entries(&self, dir: &Entry) -> PeerResult<Entries>;

    /// Open a byte stream over one chunk, starting at `offset` within the chunk.
    fn get_chunk_stream(&self, hash: &Hash, offset: u32) -> PeerResult<Box<dyn Read + Send>>;
}

/// The set of known peers, maintained by the presence layer.
pub trait PeerManager: Send + Sync {
    /// Look a peer up by identifier. `None` if it was never seen.
    fn get_peer(&self, id: &Hash) -> Option<Arc<dyn Peer>>;

    /// Peers currently advertising the given entry in their shared tree.
    fn peers_with_entry(&self, entry: &Entry) -> Vec<Arc<dyn Peer>>;
}
