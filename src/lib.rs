//! # Lanshare Download Core
//!
//! The download engine of a decentralized LAN file-sharing system. Peers on
//! the local network advertise shared directory trees; files transfer in
//! fixed-size chunks identified by SHA-224 content hashes.
//!
//! ## Features
//!
//! - FIFO download queue accepting files and whole directories
//! - Two-stage pipeline: chunk hashes are fetched first, then chunk bytes
//! - Bounded concurrency: a configurable number of simultaneous chunk
//!   transfers, one hash request per peer at a time
//! - Content-addressed local cache with per-chunk resume
//! - Queue and hash index persisted across restarts
//!
//! ## Architecture
//!
//! The engine is multi-threaded with channel-based coordination:
//!
//! - **Owner thread**: drives the [`manager::DownloadManager`], which owns
//!   the queue and all scheduling decisions
//! - **Worker threads**: one per outstanding hash request, directory
//!   listing or chunk transfer
//! - **Event channel**: workers report completions back to the manager,
//!   which reacts and reschedules
//!
//! Peer discovery, wire framing and directory watching are not part of this
//! crate; they plug in through the [`peer::Peer`] and [`peer::PeerManager`]
//! traits.

#[macro_use]
extern crate log;

pub mod cache;
pub mod chunk_download;
pub mod dir_download;
pub mod download;
pub mod entry;
pub mod file_cache;
pub mod file_download;
pub mod hash;
pub mod manager;
pub mod occupied;
pub mod peer;
pub mod persist;
pub mod queue;
pub mod settings;

pub use cache::Cache;
pub use download::{DownloadId, DownloadSnapshot, Status};
pub use entry::{Entries, Entry, EntryType};
pub use hash::Hash;
pub use manager::DownloadManager;
pub use peer::{Peer, PeerError, PeerManager};
pub use settings::Settings;
