//! # Local Cache Tree
//!
//! The cache mirrors the shared directories on disk: a forest of
//! [`SharedDirectory`] roots, each owning a tree of [`Directory`] nodes and
//! [`CacheFile`] leaves. Every file carries one chunk slot per chunk with the
//! bytes known so far, the expected content hash and a completion flag.
//!
//! ## Concurrency
//!
//! Children are owned through `Arc`, parents referenced through `Weak`, so
//! the tree is acyclic by construction. Each directory guards its own child
//! vectors with its own mutex; operations touching several directories lock
//! parent first. There is no tree-wide lock. Directory sizes are atomic
//! counters updated by delta as descendants change, so reading a size never
//! takes a lock.
//!
//! ## Downloads
//!
//! Files being downloaded carry a configurable suffix until their last chunk
//! verifies, then they are renamed to their final name. Disk space is
//! reserved up front by preallocating the file to its full size.

use std::collections::VecDeque;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use thiserror::Error;

use crate::entry::Entry;
use crate::hash::{Hash, Hasher};
use crate::settings::Settings;

/// Why a download target could not be created.
#[derive(Debug, Error)]
pub enum CreateFileError {
    #[error("no shared directory to write to")]
    NoSharedDirectoryToWrite,
    #[error("not enough free space")]
    NoEnoughFreeSpace,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// State of one chunk slot of a cached file.
#[derive(Clone, Debug, Default)]
pub struct Chunk {
    /// Bytes written and still trusted, from the start of the chunk.
    pub known_bytes: u32,
    /// Expected content hash, once retrieved.
    pub hash: Option<Hash>,
    /// Whether every byte is written and the digest matched.
    pub complete: bool,
}

/// The forest of shared directory roots.
pub struct Cache {
    settings: Settings,
    roots: Mutex<Vec<Arc<SharedDirectory>>>,
}

/// A root of the cache: one directory shared by the local user.
pub struct SharedDirectory {
    id: Hash,
    path: PathBuf,
    read_only: bool,
    root: Arc<Directory>,
}

/// A directory node of the cache tree.
pub struct Directory {
    /// The root's name is the absolute path of its share.
    name: String,
    parent: Mutex<Weak<Directory>>,
    /// Aggregate size of all descendants, kept by delta propagation.
    size: AtomicI64,
    children: Mutex<DirChildren>,
}

#[derive(Default)]
struct DirChildren {
    dirs: Vec<Arc<Directory>>,
    files: Vec<Arc<CacheFile>>,
}

/// A file leaf of the cache tree.
pub struct CacheFile {
    parent: Mutex<Weak<Directory>>,
    state: Mutex<FileState>,
}

struct FileState {
    name: String,
    size: u64,
    mtime_ms: u64,
    chunks: Vec<Chunk>,
}

impl Cache {
    pub fn new(settings: Settings) -> Arc<Cache> {
        Arc::new(Cache {
            settings,
            roots: Mutex::new(Vec::new()),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Share a directory, scanning its current content into the tree.
    ///
    /// # Arguments
    ///
    /// * `path` - Absolute path of the directory on disk.
    /// * `read_only` - Whether downloads may be written under this root.
    ///
    pub fn add_shared_directory(
        self: &Arc<Self>,
        path: &Path,
        read_only: bool,
    ) -> Result<Arc<SharedDirectory>> {
        let path = path.to_path_buf();
        if !path.is_dir() {
            return Err(anyhow!("not a directory: {}", path.display()));
        }

        let root = Arc::new(Directory {
            name: path.to_string_lossy().into_owned(),
            parent: Mutex::new(Weak::new()),
            size: AtomicI64::new(0),
            children: Mutex::new(DirChildren::default()),
        });

        scan_directory(&root, &path, &self.settings)?;

        let shared = Arc::new(SharedDirectory {
            id: Hash::of(path.to_string_lossy().as_bytes()),
            path,
            read_only,
            root,
        });

        info!(
            "Directory shared: {} ({} bytes)",
            shared.path.display(),
            shared.root.size()
        );

        self.roots.lock().unwrap().push(Arc::clone(&shared));
        Ok(shared)
    }

    /// Snapshot of the shared roots.
    pub fn shared_directories(&self) -> Vec<Arc<SharedDirectory>> {
        self.roots.lock().unwrap().clone()
    }

    /// Find an entry by its full path on disk.
    ///
    /// The path must start with the path of one of the shared roots.
    pub fn get_entry(&self, path: &str) -> Option<CacheEntry> {
        let roots = self.roots.lock().unwrap().clone();
        for shared in roots {
            let root_path = shared.path.to_string_lossy().into_owned();
            let Some(rest) = path.strip_prefix(&root_path) else {
                continue;
            };
            let components: Vec<&str> = rest.split('/').filter(|c| !c.is_empty()).collect();
            if components.is_empty() {
                return Some(CacheEntry::Dir(Arc::clone(&shared.root)));
            }

            let mut dir = Arc::clone(&shared.root);
            for (i, component) in components.iter().enumerate() {
                let last = i == components.len() - 1;
                if last {
                    if let Some(file) = dir.get_file(component) {
                        return Some(CacheEntry::File(file));
                    }
                }
                match dir.get_sub_dir(component) {
                    Some(sub) if last => return Some(CacheEntry::Dir(sub)),
                    Some(sub) => dir = sub,
                    None => break,
                }
            }
        }
        None
    }

    /// Look for a previous, unfinished download of `entry` under a writable
    /// root. Used to resume across restarts.
    pub fn find_unfinished_file(&self, entry: &Entry) -> Option<Arc<CacheFile>> {
        let unfinished_name = format!("{}{}", entry.name, self.settings.unfinished_suffix);
        let roots = self.roots.lock().unwrap().clone();
        for shared in roots.iter().filter(|s| !s.read_only) {
            let Some(dir) = shared.find_directory(&entry.path) else {
                continue;
            };
            if let Some(file) = dir.get_file(&unfinished_name) {
                if file.size() == entry.size {
                    return Some(file);
                }
            }
        }
        None
    }

    /// Create the on-disk target for a download: directories along the
    /// entry's path, then the file itself, preallocated to its full size and
    /// named with the unfinished suffix.
    pub fn create_file_for_download(
        &self,
        entry: &Entry,
    ) -> std::result::Result<Arc<CacheFile>, CreateFileError> {
        let shared = self
            .roots
            .lock()
            .unwrap()
            .iter()
            .find(|s| !s.read_only)
            .cloned()
            .ok_or(CreateFileError::NoSharedDirectoryToWrite)?;

        if fs2::available_space(&shared.path).map_err(|err| anyhow!(err))? < entry.size {
            return Err(CreateFileError::NoEnoughFreeSpace);
        }

        // Directories along the entry path, created physically as needed
        let mut dir = Arc::clone(&shared.root);
        for component in entry.path.split('/').filter(|c| !c.is_empty()) {
            dir = dir
                .create_sub_directory(component, true)
                .map_err(CreateFileError::Other)?;
        }

        let name = format!("{}{}", entry.name, self.settings.unfinished_suffix);
        if let Some(existing) = dir.get_file(&name) {
            if existing.size() == entry.size {
                return Ok(existing);
            }
        }

        let file_path = dir.full_path().join(&name);
        let handle = fs::File::create(&file_path)
            .with_context(|| format!("could not create {}", file_path.display()))?;
        if handle.set_len(entry.size).is_err() {
            // Reservation failed, leave no stray file behind
            drop(handle);
            let _ = fs::remove_file(&file_path);
            return Err(CreateFileError::NoEnoughFreeSpace);
        }

        let file = dir.create_file(&name, entry.size, now_ms(), &self.settings);
        info!("Download target created: {}", file_path.display());
        Ok(file)
    }

    /// Remove, physically and from the tree, every unfinished file that is
    /// neither complete nor fully hashed.
    pub fn remove_incomplete_files(&self) {
        let roots = self.roots.lock().unwrap().clone();
        for shared in roots {
            shared.root.remove_incomplete_files(&self.settings.unfinished_suffix);
        }
    }
}

/// A node found by [`Cache::get_entry`].
#[derive(Clone)]
pub enum CacheEntry {
    Dir(Arc<Directory>),
    File(Arc<CacheFile>),
}

impl SharedDirectory {
    pub fn id(&self) -> Hash {
        self.id
    }

    /// Absolute path of the share, always ending with a separator.
    pub fn path_string(&self) -> String {
        let mut path = self.path.to_string_lossy().into_owned();
        if !path.ends_with('/') {
            path.push('/');
        }
        path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn root(&self) -> &Arc<Directory> {
        &self.root
    }

    /// Walk a `/`-separated path below the root. `"/"` is the root itself.
    pub fn find_directory(&self, path: &str) -> Option<Arc<Directory>> {
        let mut dir = Arc::clone(&self.root);
        for component in path.split('/').filter(|c| !c.is_empty()) {
            dir = dir.get_sub_dir(component)?;
        }
        Some(dir)
    }
}

impl Directory {
    pub fn name(&self) -> String {
        self.name.clone()
    }

    pub fn size(&self) -> u64 {
        self.size.load(Ordering::SeqCst).max(0) as u64
    }

    pub fn parent(&self) -> Option<Arc<Directory>> {
        self.parent.lock().unwrap().upgrade()
    }

    pub fn sub_dirs(&self) -> Vec<Arc<Directory>> {
        self.children.lock().unwrap().dirs.clone()
    }

    pub fn files(&self) -> Vec<Arc<CacheFile>> {
        self.children.lock().unwrap().files.clone()
    }

    pub fn get_sub_dir(&self, name: &str) -> Option<Arc<Directory>> {
        self.children
            .lock()
            .unwrap()
            .dirs
            .iter()
            .find(|d| d.name == name)
            .cloned()
    }

    pub fn get_file(&self, name: &str) -> Option<Arc<CacheFile>> {
        self.children
            .lock()
            .unwrap()
            .files
            .iter()
            .find(|f| f.name() == name)
            .cloned()
    }

    /// Path leading to this directory inside its share, `/` separated and
    /// ending with `/`. The share root itself is not part of the path.
    pub fn path(&self) -> String {
        let mut path = String::from("/");
        let mut dir = self.parent();
        while let Some(current) = dir {
            if current.parent().is_some() {
                path.insert_str(0, &current.name);
                path.insert(0, '/');
            }
            dir = current.parent();
        }
        path
    }

    /// Absolute path of this directory on disk.
    pub fn full_path(&self) -> PathBuf {
        match self.parent() {
            Some(parent) => parent.full_path().join(&self.name),
            None => PathBuf::from(&self.name),
        }
    }

    /// Whether `self` is a descendant of `other`.
    pub fn is_a_child_of(&self, other: &Arc<Directory>) -> bool {
        let mut current = self.parent();
        while let Some(dir) = current {
            if Arc::ptr_eq(&dir, other) {
                return true;
            }
            current = dir.parent();
        }
        false
    }

    /// Get or create a sub-directory.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the sub-directory.
    /// * `create_physically` - Also create the directory on disk.
    ///
    pub fn create_sub_directory(
        self: &Arc<Self>,
        name: &str,
        create_physically: bool,
    ) -> Result<Arc<Directory>> {
        if let Some(existing) = self.get_sub_dir(name) {
            return Ok(existing);
        }

        if create_physically {
            let path = self.full_path().join(name);
            fs::create_dir_all(&path)
                .with_context(|| format!("could not create directory {}", path.display()))?;
        }

        let dir = Arc::new(Directory {
            name: name.to_string(),
            parent: Mutex::new(Arc::downgrade(self)),
            size: AtomicI64::new(0),
            children: Mutex::new(DirChildren::default()),
        });
        debug!("New directory: {}", dir.full_path().display());

        self.children.lock().unwrap().dirs.push(Arc::clone(&dir));
        Ok(dir)
    }

    /// Create a file leaf under this directory.
    pub fn create_file(
        self: &Arc<Self>,
        name: &str,
        size: u64,
        mtime_ms: u64,
        settings: &Settings,
    ) -> Arc<CacheFile> {
        let file = Arc::new(CacheFile {
            parent: Mutex::new(Arc::downgrade(self)),
            state: Mutex::new(FileState {
                name: name.to_string(),
                size,
                mtime_ms,
                chunks: vec![Chunk::default(); settings.chunk_count(size)],
            }),
        });

        self.children.lock().unwrap().files.push(Arc::clone(&file));
        self.add_size(size as i64);
        file
    }

    /// Move every child of `src` into this directory.
    ///
    /// Used when a finished directory is renamed over an existing one. `src`
    /// must not be an ancestor of `self`; locks are taken destination first.
    pub fn steal_content(self: &Arc<Self>, src: &Arc<Directory>) {
        if Arc::ptr_eq(self, src) {
            error!("steal_content: src == dst ({})", self.full_path().display());
            return;
        }

        let mut moved_size: i64 = 0;
        {
            let mut dst_children = self.children.lock().unwrap();
            let mut src_children = src.children.lock().unwrap();

            for dir in src_children.dirs.drain(..) {
                moved_size += dir.size.load(Ordering::SeqCst);
                *dir.parent.lock().unwrap() = Arc::downgrade(self);
                dst_children.dirs.push(dir);
            }
            for file in src_children.files.drain(..) {
                moved_size += file.size() as i64;
                *file.parent.lock().unwrap() = Arc::downgrade(self);
                dst_children.files.push(file);
            }
        }

        self.add_size(moved_size);
        src.add_size(-moved_size);
    }

    fn remove_incomplete_files(&self, unfinished_suffix: &str) {
        let files = self.files();
        for file in files {
            let name = file.name();
            if name.ends_with(unfinished_suffix) && !file.is_complete() && !file.has_all_hashes() {
                info!("Removing incomplete file: {}", file.full_path().display());
                self.remove_file(&file);
                let _ = fs::remove_file(file.full_path());
            }
        }
        for dir in self.sub_dirs() {
            dir.remove_incomplete_files(unfinished_suffix);
        }
    }

    /// Detach a file from the tree and subtract its size.
    pub fn remove_file(&self, file: &Arc<CacheFile>) {
        let removed = {
            let mut children = self.children.lock().unwrap();
            let before = children.files.len();
            children.files.retain(|f| !Arc::ptr_eq(f, file));
            before != children.files.len()
        };
        if removed {
            self.add_size(-(file.size() as i64));
        }
    }

    /// Apply a size delta here and to every ancestor.
    fn add_size(&self, delta: i64) {
        self.size.fetch_add(delta, Ordering::SeqCst);
        let mut current = self.parent();
        while let Some(dir) = current {
            dir.size.fetch_add(delta, Ordering::SeqCst);
            current = dir.parent();
        }
    }
}

/// Breadth-first iterator over the descendants of a directory.
pub struct DirIterator {
    to_visit: VecDeque<Arc<Directory>>,
}

impl DirIterator {
    pub fn new(dir: &Arc<Directory>) -> DirIterator {
        DirIterator {
            to_visit: dir.sub_dirs().into(),
        }
    }
}

impl Iterator for DirIterator {
    type Item = Arc<Directory>;

    fn next(&mut self) -> Option<Arc<Directory>> {
        let dir = self.to_visit.pop_front()?;
        self.to_visit.extend(dir.sub_dirs());
        Some(dir)
    }
}

impl CacheFile {
    pub fn name(&self) -> String {
        self.state.lock().unwrap().name.clone()
    }

    pub fn size(&self) -> u64 {
        self.state.lock().unwrap().size
    }

    pub fn mtime_ms(&self) -> u64 {
        self.state.lock().unwrap().mtime_ms
    }

    pub fn parent(&self) -> Option<Arc<Directory>> {
        self.parent.lock().unwrap().upgrade()
    }

    pub fn full_path(&self) -> PathBuf {
        match self.parent() {
            Some(dir) => dir.full_path().join(self.name()),
            None => PathBuf::from(self.name()),
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.state.lock().unwrap().chunks.len()
    }

    /// Snapshot of every chunk slot.
    pub fn chunks(&self) -> Vec<Chunk> {
        self.state.lock().unwrap().chunks.clone()
    }

    pub fn chunk(&self, index: usize) -> Option<Chunk> {
        self.state.lock().unwrap().chunks.get(index).cloned()
    }

    /// Whether every chunk slot has a populated hash.
    pub fn has_all_hashes(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.chunks.iter().all(|c| c.hash.is_some())
    }

    /// Whether at least one chunk slot has a hash.
    pub fn has_any_hash(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .chunks
            .iter()
            .any(|c| c.hash.is_some())
    }

    /// Whether every chunk is written in full and verified.
    pub fn is_complete(&self) -> bool {
        self.state.lock().unwrap().chunks.iter().all(|c| c.complete)
    }

    /// Store the hashes retrieved from a peer.
    ///
    /// A slot whose stored hash disagrees with the new one loses its
    /// progress: the file changed on the remote side.
    pub fn set_hashes(&self, hashes: &[Hash]) {
        let mut state = self.state.lock().unwrap();
        for (slot, hash) in state.chunks.iter_mut().zip(hashes) {
            match slot.hash {
                Some(existing) if existing == *hash => {}
                Some(_) => {
                    *slot = Chunk {
                        known_bytes: 0,
                        hash: Some(*hash),
                        complete: false,
                    };
                }
                None => slot.hash = Some(*hash),
            }
        }
    }

    /// Adopt persisted chunk state, used by the hash index restore.
    pub fn restore_chunks(&self, chunks: Vec<Chunk>) {
        let mut state = self.state.lock().unwrap();
        let len = state.chunks.len();
        for (slot, restored) in state.chunks.iter_mut().zip(chunks.into_iter().take(len)) {
            *slot = restored;
        }
    }

    /// Re-read the modification time from disk, keeping the recorded value
    /// when the file cannot be inspected.
    pub fn refresh_mtime_from_disk(&self) -> u64 {
        let from_disk = fs::metadata(self.full_path())
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64);

        let mut state = self.state.lock().unwrap();
        if let Some(mtime_ms) = from_disk {
            state.mtime_ms = mtime_ms;
        }
        state.mtime_ms
    }

    /// Matches persisted metadata; a mismatch means the file changed on disk.
    pub fn matches(&self, size: u64, mtime_ms: u64) -> bool {
        let state = self.state.lock().unwrap();
        state.size == size && state.mtime_ms == mtime_ms
    }

    /// Open a writer over one chunk, resuming after its known bytes.
    ///
    /// The bytes already on disk are fed back into the rolling digest so the
    /// final verification covers the whole chunk.
    pub fn open_chunk_writer(
        self: &Arc<Self>,
        index: usize,
        settings: &Settings,
    ) -> Result<ChunkWriter> {
        let (known_bytes, size) = {
            let state = self.state.lock().unwrap();
            let chunk = state
                .chunks
                .get(index)
                .ok_or_else(|| anyhow!("chunk index {} out of bounds", index))?;
            (chunk.known_bytes, state.size)
        };

        let chunk_len = settings.chunk_len(size, index);
        let path = self.full_path();
        let mut handle = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("could not open {}", path.display()))?;

        let chunk_start = index as u64 * settings.chunk_size as u64;
        let mut hasher = Hasher::new();

        if known_bytes > 0 {
            handle.seek(SeekFrom::Start(chunk_start))?;
            let mut remaining = known_bytes as usize;
            let mut buf = [0u8; 8192];
            while remaining > 0 {
                let step = remaining.min(buf.len());
                handle.read_exact(&mut buf[..step])?;
                hasher.update(&buf[..step]);
                remaining -= step;
            }
        }

        handle.seek(SeekFrom::Start(chunk_start + known_bytes as u64))?;

        Ok(ChunkWriter {
            file: Arc::clone(self),
            index,
            chunk_len,
            handle,
            hasher,
            written: known_bytes,
        })
    }

    /// Rename the file to its final name once complete, refreshing the
    /// recorded modification time. Returns whether a rename happened.
    pub fn finalize(&self, settings: &Settings) -> Result<bool> {
        if !self.is_complete() {
            return Ok(false);
        }

        let name = self.name();
        let Some(final_name) = name.strip_suffix(&settings.unfinished_suffix) else {
            return Ok(false);
        };

        let old_path = self.full_path();
        let new_path = old_path.with_file_name(final_name);
        fs::rename(&old_path, &new_path)
            .with_context(|| format!("could not rename {}", old_path.display()))?;

        let mtime_ms = fs::metadata(&new_path)
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or_else(now_ms);

        let mut state = self.state.lock().unwrap();
        state.name = final_name.to_string();
        state.mtime_ms = mtime_ms;
        info!("Download complete: {}", new_path.display());
        Ok(true)
    }

    fn update_chunk<F: FnOnce(&mut Chunk)>(&self, index: usize, update: F) {
        let mut state = self.state.lock().unwrap();
        if let Some(chunk) = state.chunks.get_mut(index) {
            update(chunk);
        }
    }
}

/// Incremental writer over one chunk of a cached file.
///
/// Bytes are written straight to disk and into the rolling digest; the slot's
/// `known_bytes` follows every write so an interrupted transfer resumes where
/// it stopped.
pub struct ChunkWriter {
    file: Arc<CacheFile>,
    index: usize,
    chunk_len: u32,
    handle: fs::File,
    hasher: Hasher,
    written: u32,
}

impl ChunkWriter {
    /// Offset inside the chunk where the next byte lands.
    pub fn offset(&self) -> u32 {
        self.written
    }

    /// Bytes still missing from the chunk.
    pub fn remaining(&self) -> u32 {
        self.chunk_len - self.written
    }

    /// Append bytes to the chunk.
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        if buf.len() as u32 > self.remaining() {
            return Err(anyhow!("chunk overrun: {} extra bytes", buf.len()));
        }
        self.handle.write_all(buf)?;
        self.hasher.update(buf);
        self.written += buf.len() as u32;

        let written = self.written;
        self.file
            .update_chunk(self.index, |chunk| chunk.known_bytes = written);
        Ok(())
    }

    /// Verify the completed chunk against its stored hash.
    ///
    /// Returns `true` when the digest matches; on a mismatch the slot's
    /// progress is reset so the chunk is downloaded again from scratch.
    pub fn finish(self) -> Result<bool> {
        if self.written != self.chunk_len {
            return Err(anyhow!(
                "chunk is short: {} of {} bytes",
                self.written,
                self.chunk_len
            ));
        }

        let digest = self.hasher.finish();
        let expected = self
            .file
            .chunk(self.index)
            .and_then(|c| c.hash)
            .ok_or_else(|| anyhow!("chunk has no hash to verify against"))?;

        if digest != expected {
            warn!(
                "Chunk {} of {} failed verification",
                self.index,
                self.file.name()
            );
            self.file.update_chunk(self.index, |chunk| {
                chunk.known_bytes = 0;
                chunk.complete = false;
            });
            return Ok(false);
        }

        self.handle.sync_data().ok();
        self.file
            .update_chunk(self.index, |chunk| chunk.complete = true);
        Ok(true)
    }
}

/// One-shot recursive scan of a freshly shared directory.
fn scan_directory(dir: &Arc<Directory>, path: &Path, settings: &Settings) -> Result<()> {
    for dir_entry in fs::read_dir(path)? {
        let dir_entry = dir_entry?;
        let metadata = dir_entry.metadata()?;
        let name = dir_entry.file_name().to_string_lossy().into_owned();

        if metadata.is_dir() {
            let sub = dir.create_sub_directory(&name, false)?;
            scan_directory(&sub, &dir_entry.path(), settings)?;
        } else if metadata.is_file() {
            let mtime_ms = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            dir.create_file(&name, metadata.len(), mtime_ms, settings);
        }
    }
    Ok(())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
