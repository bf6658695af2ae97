//! # Chunk Transfer Worker
//!
//! A [`ChunkDownload`] moves one chunk from one peer onto disk. The transfer
//! runs in its own thread and reports back to the manager through the event
//! channel:
//!
//! 1. The peer is marked busy in the chunk-downloading occupied set
//! 2. Bytes stream from the peer into the cache, resuming after the bytes
//!    already known, with the digest rolling along
//! 3. On the final byte the digest is checked against the announced hash
//! 4. The finished event is sent, then the peer is released
//!
//! Step 4's order matters: the manager must see the transfer slot freed
//! before it sees the peer freed, so the global transfer counter is already
//! decremented when the next scheduling pass runs.
//!
//! A failed transfer keeps the bytes written so far; only a hash mismatch
//! throws the chunk's progress away, and the offending peer is banned from
//! that chunk for the rest of the file download.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::Sender;

use crate::cache::CacheFile;
use crate::download::DownloadId;
use crate::file_download::RateCounter;
use crate::hash::Hash;
use crate::manager::Event;
use crate::occupied::OccupiedPeers;
use crate::peer::Peer;
use crate::settings::Settings;

// Bytes pulled from the peer stream per read
const READ_BLOCK_SIZE: usize = 16384;

/// Outcome of one chunk transfer attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkResult {
    /// Every byte written and the digest matched.
    Verified,
    /// The digest did not match: the peer served bad data.
    HashMismatch,
    /// The transfer stopped early; the chunk keeps its progress.
    Failed,
    /// Interrupted by a pause or a cancellation.
    Cancelled,
}

/// One in-flight chunk transfer.
pub struct ChunkDownload {
    pub download_id: DownloadId,
    pub chunk_index: usize,
    pub chunk_hash: Hash,
    pub file: Arc<CacheFile>,
    pub peer: Arc<dyn Peer>,
    pub occupied: Arc<OccupiedPeers>,
    pub events: Sender<Event>,
    pub cancel: Arc<AtomicBool>,
    pub rate: Arc<RateCounter>,
    pub settings: Settings,
}

impl ChunkDownload {
    /// Occupy the peer and start the transfer thread.
    ///
    /// Returns `false` when the peer is already busy with another chunk, in
    /// which case nothing was started.
    pub fn start(self) -> bool {
        if !self.occupied.occupy(self.peer.id()) {
            return false;
        }

        debug!(
            "Starting chunk {} of download {} from peer {:?}",
            self.chunk_index,
            self.download_id,
            self.peer.id()
        );

        thread::spawn(move || self.run());
        true
    }

    fn run(self) {
        let result = self.transfer();
        let peer_id = self.peer.id();

        info!(
            "Chunk {} of download {}: {:?}",
            self.chunk_index, self.download_id, result
        );

        // Finished first, peer freed second
        let _ = self.events.send(Event::ChunkFinished {
            download_id: self.download_id,
            chunk_index: self.chunk_index,
            peer: peer_id,
            result,
        });
        self.occupied.release(peer_id);
    }

    fn transfer(&self) -> ChunkResult {
        let mut writer = match self.file.open_chunk_writer(self.chunk_index, &self.settings) {
            Ok(writer) => writer,
            Err(err) => {
                warn!("Could not open chunk {}: {}", self.chunk_index, err);
                return ChunkResult::Failed;
            }
        };

        let mut stream = match self.peer.get_chunk_stream(&self.chunk_hash, writer.offset()) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(
                    "Peer {:?} refused chunk {:?}: {}",
                    self.peer.id(),
                    self.chunk_hash,
                    err
                );
                return ChunkResult::Failed;
            }
        };

        let mut buf = [0u8; READ_BLOCK_SIZE];
        while writer.remaining() > 0 {
            if self.cancel.load(Ordering::SeqCst) {
                return ChunkResult::Cancelled;
            }

            let want = (writer.remaining() as usize).min(buf.len());
            match stream.read(&mut buf[..want]) {
                Ok(0) => {
                    warn!(
                        "Peer {:?} closed the stream {} bytes early",
                        self.peer.id(),
                        writer.remaining()
                    );
                    return ChunkResult::Failed;
                }
                Ok(read) => {
                    if writer.write(&buf[..read]).is_err() {
                        return ChunkResult::Failed;
                    }
                    self.rate.add(read as u64);
                }
                Err(err) => {
                    warn!("Read from peer {:?} failed: {}", self.peer.id(), err);
                    return ChunkResult::Failed;
                }
            }
        }

        match writer.finish() {
            Ok(true) => ChunkResult::Verified,
            Ok(false) => ChunkResult::HashMismatch,
            Err(err) => {
                warn!("Chunk {} could not be verified: {}", self.chunk_index, err);
                ChunkResult::Failed
            }
        }
    }
}
