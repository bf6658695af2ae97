//! # Download Manager
//!
//! The manager owns the download queue and everything that drives it:
//!
//! - **The queue**: an ordered list of [`Download`] records, scanned FIFO on
//!   every pass. Earlier entries drain first; an entry whose work is blocked
//!   is skipped and later entries progress.
//! - **Scheduling**: one idle hash request at a time per peer, at most
//!   `number_of_downloader` chunk transfers across the whole queue.
//! - **Directory expansion**: a queued directory is replaced in place by the
//!   children its peer lists, keeping the queue order. A single listing is
//!   outstanding at any time.
//! - **Persistence**: the queue is written on demand (typically at shutdown)
//!   and replayed on startup once the hash index has loaded.
//!
//! ## Threading
//!
//! The manager is driven from its owner's thread. Hash requests, directory
//! listings and chunk transfers run in worker threads and report back on one
//! event channel; [`DownloadManager::pump`] drains it, reacts, and fires the
//! single-shot rescan timer armed whenever a download parks in an error
//! status. Because a finishing transfer sends its result before freeing its
//! peer, the transfer counter is always decremented before the freed peer
//! triggers the next scheduling pass.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::cache::Cache;
use crate::chunk_download::ChunkResult;
use crate::dir_download::DirDownload;
use crate::download::{Download, DownloadId, DownloadSnapshot, Status};
use crate::entry::{Entries, Entry, EntryType};
use crate::file_download::{FileDownload, UnfinishedChunk};
use crate::hash::Hash;
use crate::occupied::OccupiedPeers;
use crate::peer::{PeerManager, PeerResult};
use crate::queue::{self, QueueEntryRecord};
use crate::settings::Settings;

/// Everything the worker threads report back to the manager.
///
/// A chunk worker always sends `ChunkFinished` before its peer's
/// `FreeChunkPeer`; both travel on the same channel so the order is
/// preserved end to end.
#[derive(Debug)]
pub enum Event {
    ChunkFinished {
        download_id: DownloadId,
        chunk_index: usize,
        peer: Hash,
        result: ChunkResult,
    },
    FreeChunkPeer(Hash),
    FreeHashPeer(Hash),
    HashesReceived {
        download_id: DownloadId,
        result: PeerResult<Vec<Hash>>,
    },
    NewEntries {
        download_id: DownloadId,
        result: PeerResult<Entries>,
    },
}

pub struct DownloadManager {
    settings: Settings,
    cache: Arc<Cache>,
    peer_manager: Arc<dyn PeerManager>,
    data_dir: PathBuf,

    downloads: Vec<Download>,
    next_id: DownloadId,

    /// Chunk transfers currently in flight, bounded by `number_of_downloader`.
    number_of_download: usize,
    /// A directory listing is outstanding.
    retrieving_entries: bool,

    occupied_hash_peers: Arc<OccupiedPeers>,
    occupied_chunk_peers: Arc<OccupiedPeers>,

    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,

    /// Single-shot deadline for the next error-driven rescan.
    rescan_deadline: Option<Instant>,
}

impl DownloadManager {
    pub fn new(
        settings: Settings,
        cache: Arc<Cache>,
        peer_manager: Arc<dyn PeerManager>,
        data_dir: &Path,
    ) -> DownloadManager {
        let (events_tx, events_rx) = unbounded();
        DownloadManager {
            occupied_hash_peers: Arc::new(OccupiedPeers::new(
                "asking for hashes",
                events_tx.clone(),
                Event::FreeHashPeer,
            )),
            occupied_chunk_peers: Arc::new(OccupiedPeers::new(
                "downloading a chunk",
                events_tx.clone(),
                Event::FreeChunkPeer,
            )),
            settings,
            cache,
            peer_manager,
            data_dir: data_dir.to_path_buf(),
            downloads: Vec::new(),
            next_id: 1,
            number_of_download: 0,
            retrieving_entries: false,
            events_tx,
            events_rx,
            rescan_deadline: None,
        }
    }

    /// Append a download to the queue and run a scheduling pass.
    pub fn add_download(&mut self, entry: Entry, peer_source: Hash) {
        if self.insert_download(self.downloads.len(), entry, peer_source, false) {
            self.schedule();
        }
    }

    /// Replay the persisted queue. Call once the hash index has loaded, so
    /// resumed files find their chunks in the cache.
    pub fn load_queue(&mut self) -> Result<()> {
        for record in queue::load(&self.data_dir)? {
            self.insert_download(
                self.downloads.len(),
                record.entry,
                record.peer_id,
                record.complete,
            );
        }
        self.schedule();
        Ok(())
    }

    /// Persist the queue in order, with each entry's source and completion.
    pub fn save_queue(&self) -> Result<()> {
        let records: Vec<QueueEntryRecord> = self
            .downloads
            .iter()
            .map(|download| QueueEntryRecord {
                entry: download.entry().clone(),
                peer_id: download.peer_source(),
                complete: download.status() == Status::Complete,
            })
            .collect();
        queue::save(records, &self.data_dir)
    }

    /// Read-only snapshot of the queue, in order.
    pub fn get_downloads(&self) -> Vec<DownloadSnapshot> {
        self.downloads.iter().map(Download::snapshot).collect()
    }

    /// Up to `max` not-yet-complete chunks, in queue order.
    pub fn get_unfinished_chunks(&self, max: usize) -> Vec<UnfinishedChunk> {
        let mut out = Vec::new();
        for download in &self.downloads {
            if out.len() >= max {
                break;
            }
            if let Download::File(file) = download {
                file.get_unfinished_chunks(&mut out, max);
            }
        }
        out
    }

    /// Aggregate transfer rate of the files currently downloading, bytes/s.
    pub fn get_download_rate(&self) -> u64 {
        self.downloads
            .iter()
            .filter_map(Download::as_file)
            .map(FileDownload::download_rate)
            .sum()
    }

    /// Bytes acquired and bytes wanted, over the whole queue.
    pub fn get_global_progress(&self) -> (u64, u64) {
        let mut downloaded = 0;
        let mut total = 0;
        for download in self.downloads.iter().filter_map(Download::as_file) {
            downloaded += download.downloaded_bytes();
            total += download.entry().size;
        }
        (downloaded, total)
    }

    /// Chunk transfers currently in flight.
    pub fn in_flight_chunks(&self) -> usize {
        self.number_of_download
    }

    /// Pause or resume the given downloads.
    pub fn pause_downloads(&mut self, ids: &[DownloadId], paused: bool) {
        for download in &mut self.downloads {
            if ids.contains(&download.id()) {
                if let Download::File(file) = download {
                    file.set_paused(paused);
                }
            }
        }
        if !paused {
            self.schedule();
        }
    }

    /// Remove downloads from the queue, interrupting transfers in flight.
    ///
    /// With `remove_completed_only`, only completed entries go away; an
    /// empty `ids` slice then means "every completed entry".
    pub fn cancel_downloads(&mut self, ids: &[DownloadId], remove_completed_only: bool) {
        if ids.is_empty() && !remove_completed_only {
            return;
        }
        self.downloads.retain(|download| {
            if !ids.is_empty() && !ids.contains(&download.id()) {
                return true;
            }
            if remove_completed_only && download.status() != Status::Complete {
                return true;
            }
            if let Download::File(file) = download {
                file.interrupt();
            }
            info!("Download removed from the queue: {}", download.entry().name);
            false
        });
    }

    /// Drop every completed file from the queue.
    pub fn remove_completed(&mut self) {
        self.cancel_downloads(&[], true);
    }

    /// Wait up to `timeout` for work, process it, run the scheduler.
    ///
    /// Returns whether anything happened. Safe to call in a loop from the
    /// owning thread; the rescan timer fires from here too.
    pub fn pump(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut processed = false;

        loop {
            if self.fire_rescan_if_due() {
                processed = true;
            }

            while let Ok(event) = self.events_rx.try_recv() {
                self.handle_event(event);
                self.schedule();
                processed = true;
            }
            if processed {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let mut wait = deadline - now;
            if let Some(rescan) = self.rescan_deadline {
                wait = wait.min(rescan.saturating_duration_since(now));
            }

            match self.events_rx.recv_timeout(wait) {
                Ok(event) => {
                    self.handle_event(event);
                    self.schedule();
                    processed = true;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return processed,
            }
        }
    }

    /// One full scheduling pass. Idempotent; runs after every event.
    pub fn schedule(&mut self) {
        self.scan_the_queue_to_retrieve_entries();
        self.scan_the_queue_to_retrieve_hashes();
        self.scan_the_queue();
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::ChunkFinished {
                download_id,
                chunk_index,
                peer,
                result,
            } => {
                self.number_of_download = self.number_of_download.saturating_sub(1);
                let settings = self.settings.clone();
                if let Some(file) = self.find_file_mut(download_id) {
                    file.on_chunk_finished(chunk_index, peer, result, &settings);
                }
            }

            // The scheduling pass after this event picks the work up
            Event::FreeChunkPeer(_) | Event::FreeHashPeer(_) => {}

            Event::HashesReceived {
                download_id,
                result,
            } => {
                let cache = Arc::clone(&self.cache);
                let mut error = false;
                if let Some(file) = self.find_file_mut(download_id) {
                    file.on_hashes_received(result, &cache);
                    error = file.status().is_error();
                }
                if error {
                    self.arm_rescan_timer();
                }
            }

            Event::NewEntries {
                download_id,
                result,
            } => self.on_new_entries(download_id, result),
        }
    }

    /// Replace an expanded directory by its children, in place.
    fn on_new_entries(&mut self, download_id: DownloadId, result: PeerResult<Entries>) {
        self.retrieving_entries = false;

        // Cancelled while the listing was in flight
        let Some(position) = self.downloads.iter().position(|d| d.id() == download_id) else {
            return;
        };

        match result {
            Ok(entries) => {
                let removed = self.downloads.remove(position);
                let peer_source = removed.peer_source();
                info!(
                    "Directory {} expanded into {} entries",
                    removed.entry().name,
                    entries.len()
                );

                let mut insert_at = position;
                for entry in entries {
                    if self.insert_download(insert_at, entry, peer_source, false) {
                        insert_at += 1;
                    }
                }
            }
            Err(err) => {
                warn!("Directory listing failed: {}", err);
                if let Download::Dir(dir) = &mut self.downloads[position] {
                    dir.reset();
                }
                self.arm_rescan_timer();
            }
        }
    }

    /// Insert a download at `position` unless the entry is already queued.
    fn insert_download(
        &mut self,
        position: usize,
        entry: Entry,
        peer_source: Hash,
        complete: bool,
    ) -> bool {
        if self.is_entry_already_queued(&entry) {
            warn!(
                "Entry already queued, it will not be added to the queue: {}",
                entry.name
            );
            return false;
        }

        let id = self.next_id;
        self.next_id += 1;

        let download = match entry.kind {
            EntryType::Dir => Download::Dir(DirDownload::new(id, entry, peer_source)),
            EntryType::File => {
                let mut file = FileDownload::new(id, entry, peer_source, complete, &self.settings);
                file.start(&self.cache);
                Download::File(file)
            }
        };

        let position = position.min(self.downloads.len());
        self.downloads.insert(position, download);
        true
    }

    fn is_entry_already_queued(&self, entry: &Entry) -> bool {
        self.downloads
            .iter()
            .any(|download| download.entry().same_identity(entry))
    }

    /// Ask the first non-expanded directory download for its listing.
    fn scan_the_queue_to_retrieve_entries(&mut self) {
        if self.retrieving_entries {
            return;
        }

        let Some(position) = self
            .downloads
            .iter()
            .position(|d| matches!(d, Download::Dir(_)))
        else {
            return;
        };

        let Download::Dir(dir) = &mut self.downloads[position] else {
            return;
        };
        if dir.retrieve_entries(&self.peer_manager, &self.events_tx) {
            self.retrieving_entries = true;
        } else {
            // Its peer is away; the timer drives the retry
            self.arm_rescan_timer();
        }
    }

    /// Hand the idle hash-asker slot to the first file that wants it.
    fn scan_the_queue_to_retrieve_hashes(&mut self) {
        let mut arm_timer = false;
        for download in &mut self.downloads {
            let Download::File(file) = download else {
                continue;
            };
            let consumed = file.retrieve_hashes(
                &self.cache,
                &self.peer_manager,
                &self.occupied_hash_peers,
                &self.events_tx,
            );
            if file.status().is_error() {
                arm_timer = true;
            }
            if consumed {
                break;
            }
        }
        if arm_timer {
            self.arm_rescan_timer();
        }
    }

    /// Start chunk transfers FIFO until the global cap is reached.
    fn scan_the_queue(&mut self) {
        debug!(
            "Scanning the queue ({} downloads, {} transfers in flight)",
            self.downloads.len(),
            self.number_of_download
        );

        // One chunk per file per pass; later passes deepen the head entry
        let mut arm_timer = false;
        let mut started = 0;
        for download in &mut self.downloads {
            if self.number_of_download + started >= self.settings.number_of_downloader {
                break;
            }
            let Download::File(file) = download else {
                continue;
            };

            if let Some(chunk_download) = file.get_a_chunk_to_download(
                &self.peer_manager,
                &self.occupied_chunk_peers,
                &self.events_tx,
                &self.settings,
            ) {
                let chunk_index = chunk_download.chunk_index;
                let peer = chunk_download.peer.id();
                if chunk_download.start() {
                    started += 1;
                } else {
                    // The peer was grabbed between selection and start
                    file.on_chunk_finished(chunk_index, peer, ChunkResult::Cancelled, &self.settings);
                }
            }

            if file.status().is_error() {
                arm_timer = true;
            }
        }

        self.number_of_download += started;
        if arm_timer {
            self.arm_rescan_timer();
        }
    }

    /// Arm the single-shot rescan timer; an already armed timer stands.
    fn arm_rescan_timer(&mut self) {
        if self.rescan_deadline.is_none() {
            debug!("Arming the rescan timer");
            self.rescan_deadline = Some(Instant::now() + self.settings.rescan_period);
        }
    }

    fn fire_rescan_if_due(&mut self) -> bool {
        match self.rescan_deadline {
            Some(deadline) if Instant::now() >= deadline => {
                debug!("Rescan timer fired");
                self.rescan_deadline = None;
                self.schedule();
                true
            }
            _ => false,
        }
    }

    fn find_file_mut(&mut self, id: DownloadId) -> Option<&mut FileDownload> {
        self.downloads
            .iter_mut()
            .find(|d| d.id() == id)
            .and_then(Download::as_file_mut)
    }
}

impl Drop for DownloadManager {
    fn drop(&mut self) {
        if let Err(err) = self.save_queue() {
            error!("Could not save the download queue: {}", err);
        }
    }
}
