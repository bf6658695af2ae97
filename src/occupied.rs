//! # Occupied Peer Sets
//!
//! Two of these sets bound the engine's use of each peer: one for peers
//! currently answering a hash request, one for peers currently serving a
//! chunk. Schedulers consult them before issuing work; releasing the last
//! holder of a peer emits a free event on the manager channel so a new
//! scheduling pass runs.
//!
//! Only peer identifiers are stored, never the peers themselves.

use std::collections::HashMap;
use std::sync::Mutex;

use crossbeam_channel::Sender;

use crate::hash::Hash;
use crate::manager::Event;

/// Set of peers busy with one kind of work, counted by holder.
pub struct OccupiedPeers {
    /// Human name of the activity, for the logs.
    name: &'static str,
    holders: Mutex<HashMap<Hash, usize>>,
    events: Sender<Event>,
    free_event: fn(Hash) -> Event,
}

impl OccupiedPeers {
    pub fn new(name: &'static str, events: Sender<Event>, free_event: fn(Hash) -> Event) -> Self {
        OccupiedPeers {
            name,
            holders: Mutex::new(HashMap::new()),
            events,
            free_event,
        }
    }

    /// Try to mark a peer as busy. Returns `false` if it already is.
    pub fn occupy(&self, peer: Hash) -> bool {
        let mut holders = self.holders.lock().unwrap();
        if holders.contains_key(&peer) {
            return false;
        }
        holders.insert(peer, 1);
        debug!("Peer {:?} now occupied {}", peer, self.name);
        true
    }

    pub fn is_occupied(&self, peer: &Hash) -> bool {
        self.holders.lock().unwrap().contains_key(peer)
    }

    /// Number of holders currently occupying `peer`.
    pub fn holders(&self, peer: &Hash) -> usize {
        self.holders.lock().unwrap().get(peer).copied().unwrap_or(0)
    }

    /// Release one holder of `peer`, emitting a free event when the last
    /// holder is gone.
    pub fn release(&self, peer: Hash) {
        let last = {
            let mut holders = self.holders.lock().unwrap();
            match holders.get_mut(&peer) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    holders.remove(&peer);
                    true
                }
                None => {
                    warn!("Released peer {:?} was not occupied {}", peer, self.name);
                    return;
                }
            }
        };

        if last {
            debug!("Peer {:?} no longer occupied {}", peer, self.name);
            // The receiver may be gone during shutdown
            let _ = self.events.send((self.free_event)(peer));
        }
    }

    /// Number of peers currently held.
    pub fn len(&self) -> usize {
        self.holders.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn set() -> (OccupiedPeers, crossbeam_channel::Receiver<Event>) {
        let (tx, rx) = unbounded();
        (
            OccupiedPeers::new("downloading a chunk", tx, Event::FreeChunkPeer),
            rx,
        )
    }

    #[test]
    fn occupy_is_exclusive() {
        let (occupied, _rx) = set();
        let peer = Hash::of(b"peer");
        assert!(occupied.occupy(peer));
        assert!(!occupied.occupy(peer));
        assert!(occupied.is_occupied(&peer));
        assert_eq!(occupied.len(), 1);
    }

    #[test]
    fn last_release_emits_free_event() {
        let (occupied, rx) = set();
        let peer = Hash::of(b"peer");
        occupied.occupy(peer);
        occupied.release(peer);
        match rx.try_recv() {
            Ok(Event::FreeChunkPeer(id)) => assert_eq!(id, peer),
            other => panic!("expected a free event, got {:?}", other),
        }
        assert!(occupied.is_empty());
    }

    #[test]
    fn releasing_unknown_peer_is_harmless() {
        let (occupied, rx) = set();
        occupied.release(Hash::of(b"stranger"));
        assert!(rx.try_recv().is_err());
    }
}
