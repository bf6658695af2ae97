//! # File Download State Machine
//!
//! A [`FileDownload`] drives one file from `Queued` to `Complete`:
//!
//! ```text
//! Queued ──start──▶ GettingHashes ──hashes received──▶ Downloading
//!    │                    │                                 │
//!    │                    └── no source / entry gone ──▶ error status
//!    │                                                      │
//!    └── pause ──▶ Paused ◀──────── pause/resume ───────────┘
//!                                                           │
//!                                                  every chunk verified
//!                                                           ▼
//!                                                       Complete
//! ```
//!
//! The manager owns every `FileDownload` and calls in from its scheduling
//! passes: `retrieve_hashes` when a hash-asker slot frees up,
//! `get_a_chunk_to_download` while transfer slots are available. Hash
//! requests and chunk transfers run in worker threads and report back over
//! the manager's event channel.
//!
//! The candidate peers of a file are its original source plus every peer
//! currently advertising the entry. An empty candidate set is an error
//! status, which arms the manager's rescan timer.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use crate::cache::{Cache, CacheFile, CreateFileError};
use crate::chunk_download::{ChunkDownload, ChunkResult};
use crate::download::{DownloadId, Status};
use crate::entry::Entry;
use crate::hash::Hash;
use crate::manager::Event;
use crate::occupied::OccupiedPeers;
use crate::peer::{Peer, PeerError, PeerManager, PeerResult};
use crate::settings::Settings;

/// A not-yet-complete chunk, surfaced to the upload side and the UI.
#[derive(Clone, Debug)]
pub struct UnfinishedChunk {
    pub entry: Entry,
    pub chunk_index: usize,
    pub hash: Option<Hash>,
    pub known_bytes: u32,
}

/// Download-side bookkeeping for one chunk slot.
#[derive(Default)]
struct ChunkState {
    downloading: bool,
    /// Peers that served a corrupt copy of this chunk.
    banned_peers: HashSet<Hash>,
    /// Cancel flag of the in-flight transfer, if any.
    cancel: Option<Arc<AtomicBool>>,
}

pub struct FileDownload {
    id: DownloadId,
    entry: Entry,
    peer_source: Hash,
    status: Status,
    paused: bool,
    cache_file: Option<Arc<CacheFile>>,
    chunks: Vec<ChunkState>,
    hash_request_in_flight: bool,
    rate: Arc<RateCounter>,
    /// Rotates over the candidate list so equally loaded peers alternate.
    next_peer: usize,
}

impl FileDownload {
    pub fn new(
        id: DownloadId,
        entry: Entry,
        peer_source: Hash,
        complete: bool,
        settings: &Settings,
    ) -> FileDownload {
        let chunk_count = settings.chunk_count(entry.size);
        FileDownload {
            id,
            entry,
            peer_source,
            status: if complete {
                Status::Complete
            } else {
                Status::Queued
            },
            paused: false,
            cache_file: None,
            chunks: (0..chunk_count).map(|_| ChunkState::default()).collect(),
            hash_request_in_flight: false,
            rate: Arc::new(RateCounter::new()),
            next_peer: 0,
        }
    }

    pub fn id(&self) -> DownloadId {
        self.id
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn peer_source(&self) -> Hash {
        self.peer_source
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Link up with the cache and leave `Queued`-adjacent state behind.
    ///
    /// An unfinished file left by a previous run is adopted together with
    /// its hashes and partial chunks, so the transfer resumes instead of
    /// restarting. Empty files never hit the network at all.
    pub fn start(&mut self, cache: &Arc<Cache>) {
        if self.status == Status::Complete {
            return;
        }

        if self.entry.size == 0 {
            match cache.create_file_for_download(&self.entry) {
                Ok(file) => {
                    if file.finalize(cache.settings()).is_ok() {
                        self.cache_file = Some(file);
                        self.status = Status::Complete;
                    }
                }
                Err(err) => self.set_create_error(err),
            }
            return;
        }

        if let Some(file) = cache.find_unfinished_file(&self.entry) {
            debug!("Resuming unfinished file: {}", file.full_path().display());
            self.cache_file = Some(file);
            self.finish_if_complete(cache.settings());
        }
    }

    /// Whether at least one chunk still lacks its hash.
    fn needs_hashes(&self) -> bool {
        match &self.cache_file {
            Some(file) => !file.has_all_hashes(),
            None => !self.chunks.is_empty(),
        }
    }

    /// Offered the idle hash-asker slot; returns `true` if it was consumed
    /// by issuing a request to one of the candidate peers.
    pub fn retrieve_hashes(
        &mut self,
        cache: &Arc<Cache>,
        peer_manager: &Arc<dyn PeerManager>,
        occupied: &Arc<OccupiedPeers>,
        events: &Sender<Event>,
    ) -> bool {
        if self.paused
            || self.status == Status::Complete
            || self.hash_request_in_flight
            || !self.needs_hashes()
        {
            return false;
        }

        // Resuming with every hash already in the cache skips the network
        if self.cache_file.is_none() {
            if let Some(file) = cache.find_unfinished_file(&self.entry) {
                self.cache_file = Some(file);
                if !self.needs_hashes() {
                    self.status = Status::Downloading;
                    return false;
                }
            }
        }

        let candidates = self.candidate_peers(peer_manager);
        if candidates.is_empty() {
            self.set_no_source(peer_manager);
            return false;
        }

        let Some(peer) = candidates
            .into_iter()
            .find(|peer| !occupied.is_occupied(&peer.id()))
        else {
            return false;
        };

        occupied.occupy(peer.id());
        self.status = Status::GettingHashes;
        self.hash_request_in_flight = true;

        debug!(
            "Asking peer {:?} for the hashes of {}",
            peer.id(),
            self.entry.name
        );

        let id = self.id;
        let entry = self.entry.clone();
        let events = events.clone();
        let occupied = Arc::clone(occupied);
        thread::spawn(move || {
            let result = peer.get_hashes(&entry);
            let peer_id = peer.id();
            let _ = events.send(Event::HashesReceived { download_id: id, result });
            occupied.release(peer_id);
        });

        true
    }

    /// Outcome of the hash request issued by [`Self::retrieve_hashes`].
    pub fn on_hashes_received(&mut self, result: PeerResult<Vec<Hash>>, cache: &Arc<Cache>) {
        self.hash_request_in_flight = false;

        let hashes = match result {
            Ok(hashes) => hashes,
            Err(PeerError::EntryNotFound) => {
                warn!("Entry {} not found on its peer", self.entry.name);
                self.status = Status::EntryNotFound;
                return;
            }
            Err(err) => {
                warn!("Hash request for {} failed: {}", self.entry.name, err);
                self.status = Status::UnknownPeer;
                return;
            }
        };

        if hashes.len() != self.chunks.len() {
            warn!(
                "Peer sent {} hashes for {} chunks of {}",
                hashes.len(),
                self.chunks.len(),
                self.entry.name
            );
            self.status = Status::EntryNotFound;
            return;
        }

        if self.cache_file.is_none() {
            match cache.create_file_for_download(&self.entry) {
                Ok(file) => self.cache_file = Some(file),
                Err(err) => {
                    self.set_create_error(err);
                    return;
                }
            }
        }

        if let Some(file) = &self.cache_file {
            file.set_hashes(&hashes);
        }

        if !self.finish_if_complete(cache.settings()) && !self.paused {
            self.status = Status::Downloading;
        }
    }

    /// Hand the scheduler the first chunk it can start right now.
    ///
    /// Walks the chunk slots in order and picks the first one that has a
    /// hash, is not complete, is not already being transferred and has a
    /// candidate peer that is neither busy nor banned for it. Among eligible
    /// peers the one serving the fewest chunks wins, ties broken by rotating
    /// through the candidate list in insertion order. May instead park the
    /// download in an error status (no candidate at all, every remaining
    /// hash missing), telling the caller to arm the rescan timer.
    pub fn get_a_chunk_to_download(
        &mut self,
        peer_manager: &Arc<dyn PeerManager>,
        occupied: &Arc<OccupiedPeers>,
        events: &Sender<Event>,
        settings: &Settings,
    ) -> Option<ChunkDownload> {
        if self.paused || self.status == Status::Complete {
            return None;
        }
        let file = Arc::clone(self.cache_file.as_ref()?);

        let candidates = self.candidate_peers(peer_manager);
        if candidates.is_empty() {
            self.set_no_source(peer_manager);
            return None;
        }

        let slots = file.chunks();
        let mut hash_missing = false;
        for (index, slot) in slots.iter().enumerate() {
            if slot.complete || self.chunks[index].downloading {
                continue;
            }
            let Some(hash) = slot.hash else {
                hash_missing = true;
                continue;
            };

            let banned = &self.chunks[index].banned_peers;
            // Fewest outstanding chunks first, then round-robin over the
            // candidate list for ties
            let start = self.next_peer % candidates.len();
            let mut picked: Option<(usize, usize)> = None;
            for offset in 0..candidates.len() {
                let candidate = (start + offset) % candidates.len();
                let peer_id = candidates[candidate].id();
                if occupied.is_occupied(&peer_id) || banned.contains(&peer_id) {
                    continue;
                }
                let outstanding = occupied.holders(&peer_id);
                if picked.map_or(true, |(best, _)| outstanding < best) {
                    picked = Some((outstanding, candidate));
                }
            }
            let Some((_, candidate)) = picked else {
                continue;
            };
            self.next_peer = candidate + 1;

            let cancel = Arc::new(AtomicBool::new(false));
            self.chunks[index].downloading = true;
            self.chunks[index].cancel = Some(Arc::clone(&cancel));
            self.status = Status::Downloading;

            return Some(ChunkDownload {
                download_id: self.id,
                chunk_index: index,
                chunk_hash: hash,
                file,
                peer: Arc::clone(&candidates[candidate]),
                occupied: Arc::clone(occupied),
                events: events.clone(),
                cancel,
                rate: Arc::clone(&self.rate),
                settings: settings.clone(),
            });
        }

        if hash_missing && !self.hash_request_in_flight {
            self.status = Status::HashMissing;
        }
        None
    }

    /// Outcome of a chunk transfer started by
    /// [`Self::get_a_chunk_to_download`].
    pub fn on_chunk_finished(
        &mut self,
        chunk_index: usize,
        peer: Hash,
        result: ChunkResult,
        settings: &Settings,
    ) {
        if let Some(state) = self.chunks.get_mut(chunk_index) {
            state.downloading = false;
            state.cancel = None;
            if result == ChunkResult::HashMismatch {
                warn!(
                    "Peer {:?} banned from chunk {} of {}",
                    peer, chunk_index, self.entry.name
                );
                state.banned_peers.insert(peer);
            }
        }

        if result == ChunkResult::Verified {
            self.finish_if_complete(settings);
        }
    }

    /// Rename to the final name once every chunk verified.
    fn finish_if_complete(&mut self, settings: &Settings) -> bool {
        let Some(file) = &self.cache_file else {
            return false;
        };
        if !file.is_complete() {
            return false;
        }
        if let Err(err) = file.finalize(settings) {
            error!("Could not finalize {}: {}", self.entry.name, err);
        }
        self.status = Status::Complete;
        true
    }

    pub fn set_paused(&mut self, paused: bool) {
        if self.paused == paused || self.status == Status::Complete {
            return;
        }
        self.paused = paused;
        if paused {
            self.interrupt();
            self.status = Status::Paused;
        } else {
            self.status = Status::Queued;
        }
    }

    /// Stop every in-flight transfer at its next read.
    pub fn interrupt(&self) {
        for state in &self.chunks {
            if let Some(cancel) = &state.cancel {
                cancel.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Append up to `max - out.len()` not-yet-complete chunks to `out`.
    pub fn get_unfinished_chunks(&self, out: &mut Vec<UnfinishedChunk>, max: usize) {
        let slots = self.cache_file.as_ref().map(|f| f.chunks());
        for index in 0..self.chunks.len() {
            if out.len() >= max {
                return;
            }
            let slot = slots.as_ref().and_then(|s| s.get(index));
            if slot.map(|s| s.complete).unwrap_or(false) {
                continue;
            }
            out.push(UnfinishedChunk {
                entry: self.entry.clone(),
                chunk_index: index,
                hash: slot.and_then(|s| s.hash),
                known_bytes: slot.map(|s| s.known_bytes).unwrap_or(0),
            });
        }
    }

    /// Bytes safely on disk.
    pub fn downloaded_bytes(&self) -> u64 {
        if self.status == Status::Complete {
            return self.entry.size;
        }
        match &self.cache_file {
            Some(file) => file
                .chunks()
                .iter()
                .map(|c| c.known_bytes as u64)
                .sum(),
            None => 0,
        }
    }

    /// Current transfer rate in bytes per second.
    pub fn download_rate(&self) -> u64 {
        if self.status == Status::Downloading {
            self.rate.rate()
        } else {
            0
        }
    }

    fn candidate_peers(&self, peer_manager: &Arc<dyn PeerManager>) -> Vec<Arc<dyn Peer>> {
        let mut peers: Vec<Arc<dyn Peer>> = Vec::new();
        let mut seen: HashSet<Hash> = HashSet::new();

        if let Some(source) = peer_manager.get_peer(&self.peer_source) {
            if source.is_connected() {
                seen.insert(source.id());
                peers.push(source);
            }
        }
        for peer in peer_manager.peers_with_entry(&self.entry) {
            if peer.is_connected() && seen.insert(peer.id()) {
                peers.push(peer);
            }
        }
        peers
    }

    fn set_no_source(&mut self, peer_manager: &Arc<dyn PeerManager>) {
        self.status = if peer_manager.get_peer(&self.peer_source).is_none() {
            Status::UnknownPeer
        } else {
            Status::NoSource
        };
    }

    fn set_create_error(&mut self, err: CreateFileError) {
        warn!("Cannot create the target of {}: {}", self.entry.name, err);
        self.status = match err {
            CreateFileError::NoSharedDirectoryToWrite => Status::NoSharedDirectoryToWrite,
            CreateFileError::NoEnoughFreeSpace => Status::NoEnoughFreeSpace,
            CreateFileError::Other(inner) => {
                error!("Unexpected cache failure: {}", inner);
                Status::NoSharedDirectoryToWrite
            }
        };
    }
}

/// Sliding-window byte counter for transfer rates.
pub struct RateCounter {
    window: Mutex<Vec<(Instant, u64)>>,
}

const RATE_WINDOW: Duration = Duration::from_secs(5);

impl RateCounter {
    pub fn new() -> RateCounter {
        RateCounter {
            window: Mutex::new(Vec::new()),
        }
    }

    /// Record transferred bytes.
    pub fn add(&self, bytes: u64) {
        let mut window = self.window.lock().unwrap();
        let now = Instant::now();
        window.retain(|(at, _)| now.duration_since(*at) < RATE_WINDOW);
        window.push((now, bytes));
    }

    /// Bytes per second over the recent window.
    pub fn rate(&self) -> u64 {
        let mut window = self.window.lock().unwrap();
        let now = Instant::now();
        window.retain(|(at, _)| now.duration_since(*at) < RATE_WINDOW);
        let total: u64 = window.iter().map(|(_, bytes)| bytes).sum();
        total / RATE_WINDOW.as_secs()
    }
}

impl Default for RateCounter {
    fn default() -> Self {
        RateCounter::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_counter_sums_recent_bytes() {
        let rate = RateCounter::new();
        assert_eq!(rate.rate(), 0);
        rate.add(1000);
        rate.add(4000);
        assert_eq!(rate.rate(), 1000);
    }
}
