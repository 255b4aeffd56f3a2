use std::sync::OnceLock;

use super::ballot::NodeId;
use crate::common::{crypto::Pubkey, ConfigError};

/// Fixed membership: one public key slot per node id, filled once when the
/// node joins the network.
#[derive(Debug)]
pub struct Peers {
    members: Vec<OnceLock<Pubkey>>,
}

impl Peers {
    pub fn new(total_nodes: usize) -> Self {
        Peers {
            members: (0..total_nodes).map(|_| OnceLock::new()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn register(&self, id: NodeId, pubkey: Pubkey) -> Result<(), ConfigError> {
        let slot = self.members.get(id).ok_or(ConfigError::NodeOutOfRange {
            id,
            total: self.members.len(),
        })?;
        slot.set(pubkey).map_err(|_| ConfigError::AlreadyRegistered(id))
    }

    pub fn pubkey(&self, id: NodeId) -> Option<&Pubkey> {
        self.members.get(id).and_then(OnceLock::get)
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        0..self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::crypto::Keypair;

    #[test]
    fn test_register_once_per_slot() {
        let peers = Peers::new(2);
        let a = Keypair::new_pair();
        let b = Keypair::new_pair();

        assert_eq!(peers.register(0, a.pubkey()), Ok(()));
        assert_eq!(peers.register(0, b.pubkey()), Err(ConfigError::AlreadyRegistered(0)));
        assert_eq!(
            peers.register(2, b.pubkey()),
            Err(ConfigError::NodeOutOfRange { id: 2, total: 2 })
        );
        assert_eq!(peers.pubkey(0), Some(&a.pubkey()));
        assert_eq!(peers.pubkey(1), None);
        assert_eq!(peers.ids().collect::<Vec<_>>(), vec![0, 1]);
    }
}
