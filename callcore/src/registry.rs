use crate::types::PeerId;
use log::trace;

/// Snapshot of peers the relay reports as reachable, minus ourselves.
///
/// Every peer-list update replaces the whole set; there is no diffing.
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    local_id: PeerId,
    peers: Vec<PeerId>,
}

impl PeerRegistry {
    pub fn new(local_id: PeerId) -> Self {
        Self {
            local_id,
            peers: Vec::new(),
        }
    }

    /// Overwrites the known peers. The local id and duplicates are dropped;
    /// first-seen order is kept.
    pub fn replace<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = PeerId>,
    {
        let mut peers: Vec<PeerId> = Vec::new();
        for id in ids {
            if id == self.local_id || id.is_empty() || peers.contains(&id) {
                trace!(target: "Call/Registry", "Skipping peer-list entry {id:?}");
                continue;
            }
            peers.push(id);
        }
        self.peers = peers;
    }

    pub fn list(&self) -> &[PeerId] {
        &self.peers
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<PeerId> {
        raw.iter().map(|s| PeerId::from(*s)).collect()
    }

    #[test]
    fn test_replace_excludes_self() {
        let mut registry = PeerRegistry::new("A".into());
        registry.replace(ids(&["A", "B", "C"]));
        assert_eq!(registry.list(), ids(&["B", "C"]).as_slice());
    }

    #[test]
    fn test_latest_snapshot_wins() {
        let mut registry = PeerRegistry::new("A".into());
        registry.replace(ids(&["B", "C"]));
        registry.replace(ids(&["D"]));
        assert_eq!(registry.list(), ids(&["D"]).as_slice());
        assert!(!registry.contains(&"B".into()));
    }

    #[test]
    fn test_duplicates_and_empty_ids_collapse() {
        let mut registry = PeerRegistry::new("A".into());
        registry.replace(ids(&["B", "", "B", "C"]));
        assert_eq!(registry.list(), ids(&["B", "C"]).as_slice());
    }
}
