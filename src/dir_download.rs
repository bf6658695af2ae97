//! # Directory Download
//!
//! A queued directory is only a placeholder: it asks its source peer for a
//! listing, and the manager replaces it in place with the children that come
//! back. Directory requests are serialized globally, one outstanding listing
//! at a time, so expanding a deep tree never bursts a peer.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::Sender;

use crate::download::DownloadId;
use crate::entry::Entry;
use crate::hash::Hash;
use crate::manager::Event;
use crate::peer::PeerManager;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpansionState {
    Idle,
    Requesting,
}

pub struct DirDownload {
    id: DownloadId,
    entry: Entry,
    peer_source: Hash,
    state: ExpansionState,
}

impl DirDownload {
    pub fn new(id: DownloadId, entry: Entry, peer_source: Hash) -> DirDownload {
        DirDownload {
            id,
            entry,
            peer_source,
            state: ExpansionState::Idle,
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

    pub fn state(&self) -> ExpansionState {
        self.state
    }

    /// Issue the directory-listing request to the source peer.
    ///
    /// Returns `true` if a request is now outstanding. When the peer is
    /// unknown or away the download stays idle in the queue; a later pass
    /// retries.
    pub fn retrieve_entries(
        &mut self,
        peer_manager: &Arc<dyn PeerManager>,
        events: &Sender<Event>,
    ) -> bool {
        if self.state != ExpansionState::Idle {
            return false;
        }

        let Some(peer) = peer_manager.get_peer(&self.peer_source) else {
            return false;
        };
        if !peer.is_connected() {
            return false;
        }

        self.state = ExpansionState::Requesting;
        debug!(
            "Asking peer {:?} for the content of {}",
            peer.id(),
            self.entry.name
        );

        let id = self.id;
        let entry = self.entry.clone();
        let events = events.clone();
        thread::spawn(move || {
            let result = peer.get_entries(&entry);
            let _ = events.send(Event::NewEntries {
                download_id: id,
                result,
            });
        });

        true
    }

    /// The listing failed; become eligible for a retry.
    pub fn reset(&mut self) {
        self.state = ExpansionState::Idle;
    }
}
