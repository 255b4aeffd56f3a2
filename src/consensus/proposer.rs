use std::time::Duration;

use rand::rngs::StdRng;
use tracing::{debug, warn};

use super::{
    ballot::{Ballot, BallotGenerator, NodeId},
    message::{Message, Proposal, Value},
    quorum::{quorum_size, QuorumTracker},
};
use crate::config::BackoffConfig;

/// Side effects the node loop carries out on the proposer's behalf.
#[derive(Clone, Debug, PartialEq)]
pub enum Action<V> {
    Broadcast(Message<V>),
    /// Replaces whatever timer is armed.
    StartTimer(Duration),
    Decide(Proposal<V>),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProposerState {
    Idle,
    Preparing,
    Accepting,
    Backoff,
    Decided,
}

enum Phase<V> {
    Idle,
    Preparing {
        promises: QuorumTracker,
        highest_accepted: Option<Proposal<V>>,
    },
    Accepting {
        value: V,
        accepted: QuorumTracker,
    },
    Backoff,
    Decided(Proposal<V>),
}

pub struct Proposer<V> {
    id: NodeId,
    quorum: usize,
    backoff: BackoffConfig,
    ballots: BallotGenerator,
    value: Option<V>,
    phase: Phase<V>,
    retries: u32,
    rng: StdRng,
}

impl<V: Value> Proposer<V> {
    pub fn new(id: NodeId, total_nodes: usize, election_timeout: Duration, rng: StdRng) -> Self {
        Proposer {
            id,
            quorum: quorum_size(total_nodes),
            backoff: BackoffConfig::for_timeout(election_timeout),
            ballots: BallotGenerator::new(id),
            value: None,
            phase: Phase::Idle,
            retries: 0,
            rng,
        }
    }

    pub fn state(&self) -> ProposerState {
        match self.phase {
            Phase::Idle => ProposerState::Idle,
            Phase::Preparing { .. } => ProposerState::Preparing,
            Phase::Accepting { .. } => ProposerState::Accepting,
            Phase::Backoff => ProposerState::Backoff,
            Phase::Decided(_) => ProposerState::Decided,
        }
    }

    /// Ballot of the round currently waiting on replies, if any.
    pub fn in_flight(&self) -> Option<Ballot> {
        match &self.phase {
            Phase::Preparing { promises, .. } => Some(promises.ballot()),
            Phase::Accepting { accepted, .. } => Some(accepted.ballot()),
            _ => None,
        }
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Starts a round for `value` unless one is already running. Once decided
    /// this does nothing.
    pub fn propose(&mut self, value: V) -> Vec<Action<V>> {
        match self.phase {
            Phase::Decided(_) => {
                debug!(node = self.id, "already decided, ignoring proposal");
                vec![]
            }
            Phase::Idle => {
                self.value.get_or_insert(value);
                self.start_round()
            }
            _ => {
                if self.value.is_none() {
                    self.value = Some(value);
                }
                vec![]
            }
        }
    }

    /// Records a requested value without starting a round.
    pub fn hold(&mut self, value: V) {
        if !matches!(self.phase, Phase::Decided(_)) && self.value.is_none() {
            self.value = Some(value);
        }
    }

    /// Drops the in-flight round. The requested value is kept for `resume`.
    pub fn suspend(&mut self) {
        if !matches!(self.phase, Phase::Decided(_)) {
            self.phase = Phase::Idle;
        }
    }

    pub fn resume(&mut self) -> Vec<Action<V>> {
        if matches!(self.phase, Phase::Idle) && self.value.is_some() {
            self.start_round()
        } else {
            vec![]
        }
    }

    pub fn on_promise(
        &mut self,
        from: NodeId,
        ballot: Ballot,
        accepted: Option<Proposal<V>>,
    ) -> Vec<Action<V>> {
        let Phase::Preparing { promises, highest_accepted } = &mut self.phase else {
            return vec![];
        };
        if promises.ballot() != ballot {
            return vec![];
        }

        promises.add_vote(from);
        if let Some(proposal) = accepted {
            let is_higher = highest_accepted
                .as_ref()
                .map_or(true, |highest| proposal.ballot > highest.ballot);
            if is_higher {
                *highest_accepted = Some(proposal);
            }
        }

        if !promises.is_complete() {
            return vec![];
        }

        let value = match highest_accepted.take() {
            Some(adopted) => {
                debug!(node = self.id, %ballot, from_ballot = %adopted.ballot, value = ?adopted.value, "adopting previously accepted value");
                adopted.value
            }
            None => match self.value.clone() {
                Some(value) => value,
                None => {
                    self.phase = Phase::Idle;
                    return vec![];
                }
            },
        };

        debug!(node = self.id, %ballot, ?value, "promise quorum reached, sending accept");
        self.phase = Phase::Accepting {
            value: value.clone(),
            accepted: QuorumTracker::new(ballot, self.quorum),
        };
        vec![
            Action::Broadcast(Message::Accept(ballot, value)),
            Action::StartTimer(self.round_timeout()),
        ]
    }

    pub fn on_accepted(&mut self, from: NodeId, ballot: Ballot, value: &V) -> Vec<Action<V>> {
        let Phase::Accepting { value: ours, accepted } = &mut self.phase else {
            return vec![];
        };
        if accepted.ballot() != ballot {
            return vec![];
        }
        if *ours != *value {
            warn!(node = self.id, %ballot, from, "accepted reply carries a different value");
            return vec![];
        }

        accepted.add_vote(from);
        if !accepted.is_complete() {
            return vec![];
        }

        let proposal = Proposal::new(ballot, ours.clone());
        self.on_decided(proposal.clone());
        vec![Action::Decide(proposal)]
    }

    /// Notes a ballot seen in another proposer's request so this node's next
    /// round starts above it.
    pub fn observe(&mut self, ballot: Ballot) {
        self.ballots.observe(ballot);
    }

    /// Handles both `Reject` and `RejectAccept`.
    pub fn on_reject(&mut self, ballot: Ballot) -> Vec<Action<V>> {
        self.ballots.observe(ballot);
        match self.in_flight() {
            Some(current) if ballot > current => {
                let delay = self.backoff.duration(self.retries, &mut self.rng);
                self.retries += 1;
                debug!(node = self.id, %current, competing = %ballot, ?delay, "outbid, backing off");
                self.phase = Phase::Backoff;
                vec![Action::StartTimer(delay)]
            }
            _ => vec![],
        }
    }

    pub fn on_timeout(&mut self) -> Vec<Action<V>> {
        match self.phase {
            Phase::Preparing { .. } | Phase::Accepting { .. } => {
                self.retries += 1;
                debug!(node = self.id, retries = self.retries, "round timed out");
                self.start_round()
            }
            Phase::Backoff => self.start_round(),
            Phase::Idle | Phase::Decided(_) => vec![],
        }
    }

    /// The cluster chose `proposal`, through this proposer or any other.
    pub fn on_decided(&mut self, proposal: Proposal<V>) {
        self.retries = 0;
        self.phase = Phase::Decided(proposal);
    }

    fn start_round(&mut self) -> Vec<Action<V>> {
        let ballot = self.ballots.next();
        debug!(node = self.id, %ballot, "preparing");
        self.phase = Phase::Preparing {
            promises: QuorumTracker::new(ballot, self.quorum),
            highest_accepted: None,
        };
        vec![
            Action::Broadcast(Message::Prepare(ballot)),
            Action::StartTimer(self.round_timeout()),
        ]
    }

    /// Grows with every failed round so replies slower than the election
    /// timeout still arrive before the next ballot supersedes them.
    fn round_timeout(&self) -> Duration {
        self.backoff.round_timeout(self.retries)
    }
}
