//! # Queue Entries
//!
//! A [`Download`] is one record of the manager's queue, either a file being
//! acquired or a directory waiting to be expanded into its children. The two
//! kinds are a tagged variant so every scheduling loop pattern-matches
//! instead of guessing at runtime types.

use crate::dir_download::DirDownload;
use crate::entry::Entry;
use crate::file_download::FileDownload;
use crate::hash::Hash;

pub type DownloadId = u64;

/// State of a file download.
///
/// The discriminants are laid out so that everything from `NoSource` up is
/// an error: those statuses park the download and arm the manager's rescan
/// timer instead of failing the queue.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    Queued = 0x01,
    GettingHashes = 0x02,
    Downloading = 0x03,
    Complete = 0x04,
    Paused = 0x05,
    NoSource = 0x20,
    UnknownPeer = 0x21,
    EntryNotFound = 0x22,
    NoSharedDirectoryToWrite = 0x23,
    NoEnoughFreeSpace = 0x24,
    HashMissing = 0x25,
}

impl Status {
    pub fn is_error(self) -> bool {
        self as u8 >= 0x20
    }
}

/// One record of the download queue.
pub enum Download {
    File(FileDownload),
    Dir(DirDownload),
}

impl Download {
    pub fn id(&self) -> DownloadId {
        match self {
            Download::File(file) => file.id(),
            Download::Dir(dir) => dir.id(),
        }
    }

    pub fn entry(&self) -> &Entry {
        match self {
            Download::File(file) => file.entry(),
            Download::Dir(dir) => dir.entry(),
        }
    }

    pub fn peer_source(&self) -> Hash {
        match self {
            Download::File(file) => file.peer_source(),
            Download::Dir(dir) => dir.peer_source(),
        }
    }

    /// Directories sit in the queue as `Queued` until they expand.
    pub fn status(&self) -> Status {
        match self {
            Download::File(file) => file.status(),
            Download::Dir(_) => Status::Queued,
        }
    }

    pub fn as_file(&self) -> Option<&FileDownload> {
        match self {
            Download::File(file) => Some(file),
            Download::Dir(_) => None,
        }
    }

    pub fn as_file_mut(&mut self) -> Option<&mut FileDownload> {
        match self {
            Download::File(file) => Some(file),
            Download::Dir(_) => None,
        }
    }

    pub fn snapshot(&self) -> DownloadSnapshot {
        DownloadSnapshot {
            id: self.id(),
            entry: self.entry().clone(),
            peer_source: self.peer_source(),
            status: self.status(),
            downloaded_bytes: match self {
                Download::File(file) => file.downloaded_bytes(),
                Download::Dir(_) => 0,
            },
            paused: match self {
                Download::File(file) => file.is_paused(),
                Download::Dir(_) => false,
            },
        }
    }
}

/// Read-only view of a queue entry, cloned out for the UI.
#[derive(Clone, Debug)]
pub struct DownloadSnapshot {
    pub id: DownloadId,
    pub entry: Entry,
    pub peer_source: Hash,
    pub status: Status,
    pub downloaded_bytes: u64,
    pub paused: bool,
}
