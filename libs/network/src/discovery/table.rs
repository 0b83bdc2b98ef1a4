//! Peer table keyed by peer ID

use super::peer::Peer;
use std::collections::HashMap;

/// Where a table entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerSource {
    /// Peers this process advertises; never expire
    Local,
    /// Registered by the application; never expire
    Manual,
    /// Heard over discovery; expire without refresh
    Discovered,
}

/// What an upsert did to the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Added,
    Changed,
    HeartBeat,
}

#[derive(Debug)]
struct Entry {
    peer: Peer,
    source: PeerSource,
    last_seen_ms: u64,
}

#[derive(Debug, Default)]
pub struct PeerTable {
    entries: HashMap<String, Entry>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a peer.
    ///
    /// A discovered report never overrides a local or manual entry's
    /// source; it only refreshes its attributes.
    pub fn upsert(&mut self, peer: Peer, source: PeerSource, now_ms: u64) -> Upsert {
        match self.entries.get_mut(peer.id()) {
            Some(entry) => {
                entry.last_seen_ms = now_ms;
                if source != PeerSource::Discovered {
                    entry.source = source;
                }
                if entry.peer == peer {
                    Upsert::HeartBeat
                } else {
                    entry.peer = peer;
                    Upsert::Changed
                }
            }
            None => {
                self.entries.insert(
                    peer.id().to_string(),
                    Entry {
                        peer,
                        source,
                        last_seen_ms: now_ms,
                    },
                );
                Upsert::Added
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Peer> {
        self.entries.remove(id).map(|e| e.peer)
    }

    pub fn get(&self, id: &str) -> Option<&Peer> {
        self.entries.get(id).map(|e| &e.peer)
    }

    pub fn source(&self, id: &str) -> Option<PeerSource> {
        self.entries.get(id).map(|e| e.source)
    }

    /// All peers, ordered by ID
    pub fn peers(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.entries.values().map(|e| e.peer.clone()).collect();
        peers.sort_by(|a, b| a.id().cmp(b.id()));
        peers
    }

    pub fn local_peers(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self
            .entries
            .values()
            .filter(|e| e.source == PeerSource::Local)
            .map(|e| e.peer.clone())
            .collect();
        peers.sort_by(|a, b| a.id().cmp(b.id()));
        peers
    }

    /// Remove discovered peers not refreshed within `retention_ms`
    pub fn prune(&mut self, now_ms: u64, retention_ms: u64) -> Vec<Peer> {
        let mut expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| {
                e.source == PeerSource::Discovered
                    && now_ms.saturating_sub(e.last_seen_ms) >= retention_ms
            })
            .map(|(id, _)| id.clone())
            .collect();
        expired.sort();
        expired.into_iter().filter_map(|id| self.remove(&id)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
