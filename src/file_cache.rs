//! # Hash Index Persistence
//!
//! Saves and restores the chunk hashes of the cache tree, so known chunks
//! survive a restart without rehashing every shared file.
//!
//! The persisted record mirrors the tree shape: shared roots, directories by
//! name, files with their size and modification time, one record per chunk.
//! Only files carrying at least one hash are emitted. On restore the record
//! is walked in parallel with the live tree; a file whose size or
//! modification time no longer matches has changed on disk and loses its
//! persisted state.
//!
//! A version or chunk-size mismatch invalidates the whole index: hashes
//! computed over different chunk boundaries are useless.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::cache::{Cache, CacheFile, Chunk, Directory};
use crate::hash::Hash;
use crate::persist;

pub const FILE_CACHE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct HashesRecord {
    pub version: u32,
    pub chunk_size: u32,
    #[serde(default, rename = "shared_dir")]
    pub shared_dirs: Vec<SharedDirRecord>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct SharedDirRecord {
    pub id: Hash,
    pub path: String,
    pub root: DirRecord,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct DirRecord {
    pub name: String,
    #[serde(default, rename = "file")]
    pub files: Vec<FileRecord>,
    #[serde(default, rename = "dir")]
    pub dirs: Vec<DirRecord>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct FileRecord {
    pub filename: String,
    pub size: u64,
    pub date_last_modified: u64,
    #[serde(default, rename = "chunk")]
    pub chunks: Vec<ChunkRecord>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct ChunkRecord {
    pub known_bytes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<Hash>,
}

/// Persist the hash index of the whole cache.
pub fn save(cache: &Cache, data_dir: &Path) -> Result<()> {
    let record = build_record(cache);
    let payload = serde_bencode::to_bytes(&record)?;
    persist::save_value(data_dir, persist::FILE_CACHE, &payload)?;
    debug!(
        "Hash index saved ({} shared directories)",
        record.shared_dirs.len()
    );
    Ok(())
}

/// Load the persisted hash index into the cache, then drop unfinished files
/// the index does not vouch for.
///
/// A missing index is not an error. A stale one (version or chunk size
/// mismatch) is discarded entirely.
pub fn load(cache: &Cache, data_dir: &Path) -> Result<()> {
    match persist::load_value(data_dir, persist::FILE_CACHE)? {
        Some(payload) => {
            let record: HashesRecord = match serde_bencode::from_bytes(&payload) {
                Ok(record) => record,
                Err(err) => {
                    error!("Hash index is unreadable, discarding it: {}", err);
                    persist::remove_value(data_dir, persist::FILE_CACHE)?;
                    cache.remove_incomplete_files();
                    return Ok(());
                }
            };

            if record.version != FILE_CACHE_VERSION
                || record.chunk_size != cache.settings().chunk_size
            {
                error!(
                    "Hash index is stale (version {}, chunk size {}), discarding it",
                    record.version, record.chunk_size
                );
                persist::remove_value(data_dir, persist::FILE_CACHE)?;
            } else {
                restore(cache, &record);
            }
        }
        None => warn!("No hash index to load"),
    }

    cache.remove_incomplete_files();
    Ok(())
}

/// Build the persisted record from the live tree.
pub fn build_record(cache: &Cache) -> HashesRecord {
    HashesRecord {
        version: FILE_CACHE_VERSION,
        chunk_size: cache.settings().chunk_size,
        shared_dirs: cache
            .shared_directories()
            .iter()
            .map(|shared| SharedDirRecord {
                id: shared.id(),
                path: shared.path_string(),
                root: dir_record(shared.root()),
            })
            .collect(),
    }
}

fn dir_record(dir: &Arc<Directory>) -> DirRecord {
    DirRecord {
        name: dir.name(),
        files: dir.files().iter().filter_map(|f| file_record(f)).collect(),
        dirs: dir.sub_dirs().iter().map(dir_record).collect(),
    }
}

fn file_record(file: &Arc<CacheFile>) -> Option<FileRecord> {
    if !file.has_any_hash() {
        return None;
    }
    Some(FileRecord {
        filename: file.name(),
        size: file.size(),
        date_last_modified: file.refresh_mtime_from_disk(),
        chunks: file
            .chunks()
            .into_iter()
            .map(|chunk| ChunkRecord {
                known_bytes: chunk.known_bytes,
                hash: chunk.hash,
            })
            .collect(),
    })
}

/// Adopt the persisted chunk state into the live tree.
pub fn restore(cache: &Cache, record: &HashesRecord) {
    for shared_record in &record.shared_dirs {
        let Some(shared) = cache
            .shared_directories()
            .into_iter()
            .find(|s| s.path_string() == shared_record.path || s.id() == shared_record.id)
        else {
            warn!(
                "Persisted shared directory is gone: {}",
                shared_record.path
            );
            continue;
        };
        restore_dir(cache, shared.root(), &shared_record.root);
    }
}

fn restore_dir(cache: &Cache, dir: &Arc<Directory>, record: &DirRecord) {
    for file_record in &record.files {
        let Some(file) = dir.get_file(&file_record.filename) else {
            continue;
        };
        if !file.matches(file_record.size, file_record.date_last_modified) {
            debug!(
                "File changed since the index was saved, dropping its hashes: {}",
                file_record.filename
            );
            continue;
        }

        let settings = cache.settings();
        let chunks: Vec<Chunk> = file_record
            .chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| Chunk {
                known_bytes: chunk.known_bytes,
                hash: chunk.hash,
                complete: chunk.hash.is_some()
                    && chunk.known_bytes == settings.chunk_len(file_record.size, index),
            })
            .collect();
        file.restore_chunks(chunks);
    }

    for dir_record in &record.dirs {
        if let Some(sub) = dir.get_sub_dir(&dir_record.name) {
            restore_dir(cache, &sub, dir_record);
        }
    }
}
