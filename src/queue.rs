//! # Queue Persistence
//!
//! The download queue survives restarts: on shutdown every record is written
//! out with its entry, its source peer and whether it already completed; on
//! startup, once the hash index has loaded, the records are replayed through
//! the manager in order. A queue file from another version is deleted and
//! the engine starts empty.

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::entry::{int_bool, Entry};
use crate::hash::Hash;
use crate::persist;

pub const FILE_QUEUE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct QueueRecord {
    pub version: u32,
    #[serde(default, rename = "entry")]
    pub entries: Vec<QueueEntryRecord>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct QueueEntryRecord {
    pub entry: Entry,
    pub peer_id: Hash,
    #[serde(default, with = "int_bool")]
    pub complete: bool,
}

/// Persist the queue records.
pub fn save(entries: Vec<QueueEntryRecord>, data_dir: &Path) -> Result<()> {
    let record = QueueRecord {
        version: FILE_QUEUE_VERSION,
        entries,
    };
    let payload = serde_bencode::to_bytes(&record)?;
    persist::save_value(data_dir, persist::FILE_QUEUE, &payload)?;
    debug!("Queue saved ({} entries)", record.entries.len());
    Ok(())
}

/// Read the persisted queue back, in order.
///
/// A missing file yields an empty queue; a stale or unreadable one is
/// deleted and also yields an empty queue.
pub fn load(data_dir: &Path) -> Result<Vec<QueueEntryRecord>> {
    let Some(payload) = persist::load_value(data_dir, persist::FILE_QUEUE)? else {
        warn!("No download queue to load");
        return Ok(Vec::new());
    };

    let record: QueueRecord = match serde_bencode::from_bytes(&payload) {
        Ok(record) => record,
        Err(err) => {
            error!("The queue file is unreadable, discarding it: {}", err);
            persist::remove_value(data_dir, persist::FILE_QUEUE)?;
            return Ok(Vec::new());
        }
    };

    if record.version != FILE_QUEUE_VERSION {
        error!(
            "The queue file version ({}) doesn't match the current version ({})",
            record.version, FILE_QUEUE_VERSION
        );
        persist::remove_value(data_dir, persist::FILE_QUEUE)?;
        return Ok(Vec::new());
    }

    Ok(record.entries)
}
