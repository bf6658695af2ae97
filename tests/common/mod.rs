//! In-memory peers for exercising the engine without a network.

use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use lanshare::entry::{Entries, Entry};
use lanshare::hash::Hash;
use lanshare::manager::DownloadManager;
use lanshare::peer::{Peer, PeerError, PeerManager, PeerResult};

/// A peer serving file contents and directory listings from memory.
pub struct FakePeer {
    id: Hash,
    chunk_size: u32,
    connected: AtomicBool,
    /// Serve deliberately corrupted chunk bytes.
    corrupt: AtomicBool,
    /// Artificial latency per stream read, to keep transfers observable.
    delay: Mutex<Duration>,
    /// Contents by `path + name`.
    files: Mutex<HashMap<String, Vec<u8>>>,
    listings: Mutex<HashMap<String, Entries>>,
    /// Every `(chunk hash, offset)` chunk request received.
    requests: Mutex<Vec<(Hash, u32)>>,
}

fn key(entry: &Entry) -> String {
    format!("{}{}", entry.path, entry.name)
}

impl FakePeer {
    pub fn new(name: &str, chunk_size: u32) -> Arc<FakePeer> {
        Arc::new(FakePeer {
            id: Hash::of(name.as_bytes()),
            chunk_size,
            connected: AtomicBool::new(true),
            corrupt: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
            files: Mutex::new(HashMap::new()),
            listings: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn serve_file(&self, entry: &Entry, content: &[u8]) {
        assert_eq!(entry.size, content.len() as u64);
        self.files.lock().unwrap().insert(key(entry), content.to_vec());
    }

    pub fn serve_listing(&self, dir: &Entry, entries: Entries) {
        self.listings.lock().unwrap().insert(key(dir), entries);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_corrupt(&self, corrupt: bool) {
        self.corrupt.store(corrupt, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn chunk_requests(&self) -> Vec<(Hash, u32)> {
        self.requests.lock().unwrap().clone()
    }

    fn check_connected(&self) -> PeerResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PeerError::Unreachable)
        }
    }
}

impl Peer for FakePeer {
    fn id(&self) -> Hash {
        self.id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn get_hashes(&self, entry: &Entry) -> PeerResult<Vec<Hash>> {
        self.check_connected()?;
        let files = self.files.lock().unwrap();
        let content = files.get(&key(entry)).ok_or(PeerError::EntryNotFound)?;
        Ok(content
            .chunks(self.chunk_size as usize)
            .map(Hash::of)
            .collect())
    }

    fn get_entries(&self, dir: &Entry) -> PeerResult<Entries> {
        self.check_connected()?;
        self.listings
            .lock()
            .unwrap()
            .get(&key(dir))
            .cloned()
            .ok_or(PeerError::EntryNotFound)
    }

    fn get_chunk_stream(&self, hash: &Hash, offset: u32) -> PeerResult<Box<dyn Read + Send>> {
        self.check_connected()?;
        self.requests.lock().unwrap().push((*hash, offset));

        let files = self.files.lock().unwrap();
        for content in files.values() {
            for chunk in content.chunks(self.chunk_size as usize) {
                if Hash::of(chunk) == *hash {
                    let mut data = chunk[offset as usize..].to_vec();
                    if self.corrupt.load(Ordering::SeqCst) {
                        for byte in &mut data {
                            *byte = !*byte;
                        }
                    }
                    return Ok(Box::new(SlowReader {
                        data,
                        pos: 0,
                        delay: *self.delay.lock().unwrap(),
                    }));
                }
            }
        }
        Err(PeerError::EntryNotFound)
    }
}

struct SlowReader {
    data: Vec<u8>,
    pos: usize,
    delay: Duration,
}

impl Read for SlowReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.data.len() {
            return Ok(0);
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let step = buf.len().min(self.data.len() - self.pos);
        buf[..step].copy_from_slice(&self.data[self.pos..self.pos + step]);
        self.pos += step;
        Ok(step)
    }
}

#[derive(Default)]
pub struct FakePeerManager {
    peers: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakePeerManager {
    pub fn new() -> Arc<FakePeerManager> {
        Arc::new(FakePeerManager::default())
    }

    pub fn add(&self, peer: Arc<FakePeer>) {
        self.peers.lock().unwrap().push(peer);
    }
}

impl PeerManager for FakePeerManager {
    fn get_peer(&self, id: &Hash) -> Option<Arc<dyn Peer>> {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == *id)
            .map(|p| Arc::clone(p) as Arc<dyn Peer>)
    }

    fn peers_with_entry(&self, entry: &Entry) -> Vec<Arc<dyn Peer>> {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.is_connected() && p.files.lock().unwrap().contains_key(&key(entry)))
            .map(|p| Arc::clone(p) as Arc<dyn Peer>)
            .collect()
    }
}

/// Pump the manager until `cond` holds or `timeout` elapses.
pub fn pump_until<F>(manager: &mut DownloadManager, timeout: Duration, cond: F) -> bool
where
    F: Fn(&DownloadManager) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if cond(manager) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        manager.pump(Duration::from_millis(20));
    }
}
