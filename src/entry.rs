//! # Remote Entry Descriptors
//!
//! An [`Entry`] describes a file or directory advertised by a peer: the kind,
//! the path inside the peer's share, the name and the size. Entries travel
//! over the wire, sit in the download queue and are persisted with it, so
//! they round-trip through bencode without loss.
//!
//! Bencode has no boolean type; flags are encoded as integers.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::hash::Hash;

/// Kind of a remote entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryType {
    Dir,
    File,
}

impl Serialize for EntryType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(match self {
            EntryType::Dir => 0,
            EntryType::File => 1,
        })
    }
}

impl<'de> Deserialize<'de> for EntryType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<EntryType, D::Error> {
        match u64::deserialize(deserializer)? {
            0 => Ok(EntryType::Dir),
            1 => Ok(EntryType::File),
            other => Err(serde::de::Error::custom(format!(
                "invalid entry type: {}",
                other
            ))),
        }
    }
}

/// A file or directory advertised by a peer.
///
/// `path` is the directory part inside the share, always starting and ending
/// with `/` (the root being `"/"`), and `name` the entry's own name. `size`
/// is 0 for directories.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(rename = "type")]
    pub kind: EntryType,
    pub path: String,
    pub name: String,
    pub size: u64,
    /// Identifier of the shared directory the entry belongs to on the remote side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_dir: Option<Hash>,
    /// For directories, whether the remote directory has no children.
    #[serde(
        default,
        with = "int_bool",
        skip_serializing_if = "core::ops::Not::not"
    )]
    pub is_empty: bool,
}

/// A directory listing returned by a peer.
pub type Entries = Vec<Entry>;

impl Entry {
    /// Build a file entry.
    pub fn file(path: &str, name: &str, size: u64) -> Entry {
        Entry {
            kind: EntryType::File,
            path: path.to_string(),
            name: name.to_string(),
            size,
            shared_dir: None,
            is_empty: false,
        }
    }

    /// Build a directory entry.
    pub fn dir(path: &str, name: &str) -> Entry {
        Entry {
            kind: EntryType::Dir,
            path: path.to_string(),
            name: name.to_string(),
            size: 0,
            shared_dir: None,
            is_empty: false,
        }
    }

    /// Whether two entries designate the same queued item.
    ///
    /// Peer identity deliberately does not participate: re-adding the same
    /// file from another source is a duplicate.
    pub fn same_identity(&self, other: &Entry) -> bool {
        self.kind == other.kind
            && self.path == other.path
            && self.name == other.name
            && self.size == other.size
    }
}

/// Booleans persisted as bencode integers.
pub(crate) mod int_bool {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(*value as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        Ok(u64::deserialize(deserializer)? != 0)
    }
}
