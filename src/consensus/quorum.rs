use std::collections::BTreeSet;

use super::ballot::{Ballot, NodeId};

/*
    Any two majorities of the same membership intersect, which is what lets
    a proposer trust a quorum of promises to have seen every chosen value.
*/

pub fn quorum_size(total_nodes: usize) -> usize {
    total_nodes / 2 + 1
}

/// Distinct votes for a single ballot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuorumTracker {
    ballot: Ballot,
    quorum: usize,
    voters: BTreeSet<NodeId>,
}

impl QuorumTracker {
    pub fn new(ballot: Ballot, quorum: usize) -> Self {
        QuorumTracker {
            ballot,
            quorum,
            voters: BTreeSet::new(),
        }
    }

    pub fn ballot(&self) -> Ballot {
        self.ballot
    }

    /// Records a vote. Repeat votes from the same node are ignored.
    pub fn add_vote(&mut self, voter: NodeId) {
        self.voters.insert(voter);
    }

    pub fn vote_count(&self) -> usize {
        self.voters.len()
    }

    pub fn is_complete(&self) -> bool {
        self.voters.len() >= self.quorum
    }
}
