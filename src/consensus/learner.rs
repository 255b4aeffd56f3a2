use std::collections::{BTreeMap, BTreeSet};

use tracing::{error, info, warn};

use super::{
    ballot::{Ballot, NodeId},
    message::{Proposal, Value},
    quorum::{quorum_size, QuorumTracker},
};

/// Learns the chosen value from `Accepted` broadcasts or a peer's decision,
/// then tracks which peers still have to hear about it.
pub struct Learner<V> {
    id: NodeId,
    total_nodes: usize,
    quorum: usize,
    votes: BTreeMap<Ballot, (V, QuorumTracker)>,
    learned: Option<Proposal<V>>,
    informed: BTreeSet<NodeId>,
}

impl<V: Value> Learner<V> {
    pub fn new(id: NodeId, total_nodes: usize) -> Self {
        Learner {
            id,
            total_nodes,
            quorum: quorum_size(total_nodes),
            votes: BTreeMap::new(),
            learned: None,
            informed: BTreeSet::new(),
        }
    }

    pub fn learned(&self) -> Option<&Proposal<V>> {
        self.learned.as_ref()
    }

    /// Counts an acceptor's `Accepted`. Returns the proposal if this vote
    /// completed a quorum and nothing was learned before.
    pub fn on_accepted(&mut self, from: NodeId, ballot: Ballot, value: V) -> Option<Proposal<V>> {
        if self.learned.is_some() {
            return None;
        }

        let quorum = self.quorum;
        let (tracked, votes) = self
            .votes
            .entry(ballot)
            .or_insert_with(|| (value.clone(), QuorumTracker::new(ballot, quorum)));
        if *tracked != value {
            warn!(node = self.id, %ballot, from, "conflicting values for one ballot");
            return None;
        }

        votes.add_vote(from);
        if !votes.is_complete() {
            return None;
        }

        let proposal = Proposal::new(ballot, value);
        self.learn(proposal.clone()).then_some(proposal)
    }

    /// Records `proposal` as chosen. Only the first value sticks; a later
    /// different value is logged and dropped.
    pub fn learn(&mut self, proposal: Proposal<V>) -> bool {
        match &self.learned {
            None => {
                info!(node = self.id, ballot = %proposal.ballot, value = ?proposal.value, "learned value");
                self.votes.clear();
                self.informed.insert(self.id);
                self.learned = Some(proposal);
                true
            }
            Some(existing) => {
                if existing.value != proposal.value {
                    error!(
                        node = self.id,
                        learned = ?existing.value,
                        conflicting = ?proposal.value,
                        "refusing to overwrite learned value"
                    );
                }
                false
            }
        }
    }

    pub fn mark_informed(&mut self, node: NodeId) {
        if node < self.total_nodes {
            self.informed.insert(node);
        }
    }

    /// Peers that have not confirmed the decision yet. Empty until learned.
    pub fn uninformed(&self) -> Vec<NodeId> {
        if self.learned.is_none() {
            return Vec::new();
        }
        (0..self.total_nodes)
            .filter(|node| !self.informed.contains(node))
            .collect()
    }
}
