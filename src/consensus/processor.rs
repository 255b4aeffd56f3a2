use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    sync::{
        mpsc::{Receiver, UnboundedReceiver},
        watch,
    },
    time::{sleep_until, Instant},
};
use tracing::{debug, info, trace, warn};

use super::{
    acceptor::AcceptorRecord,
    ballot::NodeId,
    learner::Learner,
    message::{Envelope, Message, Proposal, Value},
    proposer::{Action, Proposer},
};
use crate::{common::crypto::Keypair, network::Network};

/*
    One loop per node. Inbound envelopes, control commands and the node's
    single timer are handled one at a time, so the acceptor record shared by
    the proposer and acceptor roles never needs a lock. The crash flag is
    read once per dequeued envelope or timer, never in the middle of one.
*/

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NodeStatus {
    Alive,
    Crashed,
}

/// Status shared between a node's handle and its processor.
#[derive(Clone, Debug)]
pub struct StatusCell(Arc<AtomicBool>);

impl StatusCell {
    pub fn new() -> Self {
        StatusCell(Arc::new(AtomicBool::new(true)))
    }

    pub fn get(&self) -> NodeStatus {
        if self.0.load(Ordering::SeqCst) {
            NodeStatus::Alive
        } else {
            NodeStatus::Crashed
        }
    }

    pub fn set(&self, status: NodeStatus) {
        self.0.store(status == NodeStatus::Alive, Ordering::SeqCst);
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub enum Control<V> {
    Propose(V),
    Crash,
    Recover,
}

pub struct ConsensusProcessor<V> {
    pub state: NodeState<V>,
    pub msg_rx: Receiver<Envelope<V>>,
    pub control_rx: UnboundedReceiver<Control<V>>,
}

pub struct NodeState<V> {
    pub id: NodeId,
    pub keypair: Keypair,
    pub network: Network<V>,
    pub status: StatusCell,
    pub acceptor: AcceptorRecord<V>,
    pub proposer: Proposer<V>,
    pub learner: Learner<V>,
    pub learned_tx: watch::Sender<Option<V>>,
    pub election_timeout: Duration,
    pub deadline: Option<Instant>,
}

/// Stand-in deadline while no timer is armed; that select branch is disabled.
const IDLE_TICK: Duration = Duration::from_secs(3600);

impl<V: Value> ConsensusProcessor<V> {
    pub async fn run(self) {
        let ConsensusProcessor {
            mut state,
            mut msg_rx,
            mut control_rx,
        } = self;
        info!(node = state.id, "running consensus processor");

        loop {
            let deadline = state
                .deadline
                .unwrap_or_else(|| Instant::now() + IDLE_TICK);

            tokio::select! {
                biased;
                control = control_rx.recv() => match control {
                    Some(control) => state.handle_control(control),
                    None => break,
                },
                envelope = msg_rx.recv() => match envelope {
                    Some(envelope) => state.handle_envelope(envelope),
                    None => break,
                },
                _ = sleep_until(deadline), if state.deadline.is_some() => state.handle_timer(),
            }
        }
        debug!(node = state.id, "consensus processor stopped");
    }
}

impl<V: Value> NodeState<V> {
    fn is_crashed(&self) -> bool {
        self.status.get() == NodeStatus::Crashed
    }

    fn handle_control(&mut self, control: Control<V>) {
        match control {
            Control::Propose(value) => {
                if self.learner.learned().is_some() {
                    debug!(node = self.id, "already decided, ignoring proposal");
                } else if self.is_crashed() {
                    debug!(node = self.id, ?value, "crashed, holding proposal until recovery");
                    self.proposer.hold(value);
                } else {
                    let actions = self.proposer.propose(value);
                    self.apply(actions);
                }
            }
            Control::Crash => {
                info!(node = self.id, "crashed");
                self.deadline = None;
                self.proposer.suspend();
            }
            Control::Recover => {
                if self.is_crashed() {
                    return;
                }
                info!(
                    node = self.id,
                    promised = %self.acceptor.promised(),
                    proposer = ?self.proposer.state(),
                    "recovered"
                );
                if self.learner.learned().is_some() {
                    self.disseminate();
                } else {
                    let actions = self.proposer.resume();
                    self.apply(actions);
                }
            }
        }
    }

    fn handle_envelope(&mut self, envelope: Envelope<V>) {
        if self.is_crashed() {
            trace!(node = self.id, from = envelope.from, kind = envelope.message.kind(), "crashed, dropping");
            return;
        }

        let from = envelope.from;
        let authentic = envelope.to == self.id
            && self
                .network
                .peers()
                .pubkey(from)
                .is_some_and(|pubkey| envelope.verify(pubkey));
        if !authentic {
            warn!(node = self.id, from, kind = envelope.message.kind(), "dropping unauthenticated envelope");
            return;
        }

        trace!(node = self.id, from, kind = envelope.message.kind(), "handling message");
        match envelope.message {
            Message::Prepare(ballot) => {
                self.proposer.observe(ballot);
                let reply = self.acceptor.on_prepare(ballot);
                self.send(from, reply);
                if let Some(decided) = self.learner.learned().cloned() {
                    self.send(from, Message::Decided(decided));
                }
            }
            Message::Accept(ballot, value) => {
                self.proposer.observe(ballot);
                match self.acceptor.on_accept(ballot, value) {
                    accepted @ Message::Accepted(..) => {
                        self.network.broadcast(self.id, accepted, &self.keypair)
                    }
                    reject => self.send(from, reject),
                }
            }
            Message::Promise { ballot, accepted } => {
                let actions = self.proposer.on_promise(from, ballot, accepted);
                self.apply(actions);
            }
            Message::Reject(ballot) | Message::RejectAccept(ballot) => {
                let actions = self.proposer.on_reject(ballot);
                self.apply(actions);
            }
            Message::Accepted(ballot, value) => {
                let actions = self.proposer.on_accepted(from, ballot, &value);
                self.apply(actions);
                if let Some(proposal) = self.learner.on_accepted(from, ballot, value) {
                    self.on_learned(proposal);
                }
            }
            Message::Decided(proposal) => {
                let ballot = proposal.ballot;
                self.learner.mark_informed(from);
                self.decide(proposal);
                self.send(from, Message::DecidedAck(ballot));
            }
            Message::DecidedAck(_) => self.learner.mark_informed(from),
        }
    }

    fn handle_timer(&mut self) {
        self.deadline = None;
        if self.is_crashed() {
            return;
        }
        if self.learner.learned().is_some() {
            self.disseminate();
        } else {
            trace!(node = self.id, retries = self.proposer.retries(), "timer fired");
            let actions = self.proposer.on_timeout();
            self.apply(actions);
        }
    }

    fn apply(&mut self, actions: Vec<Action<V>>) {
        for action in actions {
            match action {
                Action::Broadcast(message) => self.network.broadcast(self.id, message, &self.keypair),
                Action::StartTimer(delay) => self.deadline = Some(Instant::now() + delay),
                Action::Decide(proposal) => self.decide(proposal),
            }
        }
    }

    fn decide(&mut self, proposal: Proposal<V>) {
        if self.learner.learn(proposal.clone()) {
            self.on_learned(proposal);
        }
    }

    fn on_learned(&mut self, proposal: Proposal<V>) {
        self.learned_tx.send_replace(Some(proposal.value.clone()));
        self.proposer.on_decided(proposal);
        self.disseminate();
    }

    /// Resends the decision to every peer that has not confirmed it and
    /// re-arms the timer while any remain.
    fn disseminate(&mut self) {
        let Some(decided) = self.learner.learned().cloned() else {
            return;
        };
        let pending = self.learner.uninformed();
        if pending.is_empty() {
            self.deadline = None;
            return;
        }
        trace!(node = self.id, ?pending, "broadcasting decision");
        for to in pending {
            self.send(to, Message::Decided(decided.clone()));
        }
        self.deadline = Some(Instant::now() + self.election_timeout);
    }

    fn send(&self, to: NodeId, message: Message<V>) {
        self.network
            .send(Envelope::seal(self.id, to, message, &self.keypair));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::{
        config::NetworkConfig,
        consensus::Ballot,
        network::node::Node,
    };

    const WAIT: Duration = Duration::from_millis(500);
    const QUIET: Duration = Duration::from_millis(100);

    struct Harness {
        node: Node<u64>,
        keypairs: Vec<Keypair>,
        inboxes: Vec<Receiver<Envelope<u64>>>,
        network: Network<u64>,
    }

    /// Node 0 is real; nodes 1 and 2 are driven by hand through their inboxes.
    fn harness() -> Harness {
        let network = Network::new(
            3,
            NetworkConfig {
                max_delay: Duration::ZERO,
                seed: Some(1),
                ..NetworkConfig::default()
            },
        )
        .unwrap();
        let node = Node::new(0, 3, Duration::from_secs(10), &network).unwrap();
        let keypairs: Vec<_> = (0..2).map(|_| Keypair::new_pair()).collect();
        let inboxes = keypairs
            .iter()
            .enumerate()
            .map(|(i, keypair)| network.register(i + 1, keypair.pubkey()).unwrap())
            .collect();
        node.run().unwrap();
        Harness { node, keypairs, inboxes, network }
    }

    impl Harness {
        fn send_from(&self, peer: NodeId, message: Message<u64>) {
            let keypair = &self.keypairs[peer - 1];
            self.network.send(Envelope::seal(peer, 0, message, keypair));
        }

        async fn recv(&mut self, peer: NodeId) -> Message<u64> {
            let envelope = timeout(WAIT, self.inboxes[peer - 1].recv())
                .await
                .expect("no message arrived")
                .expect("inbox closed");
            assert_eq!(envelope.from, 0);
            envelope.message
        }

        async fn assert_silent(&mut self, peer: NodeId) {
            assert!(timeout(QUIET, self.inboxes[peer - 1].recv()).await.is_err());
        }
    }

    #[tokio::test]
    async fn test_prepare_gets_promise_then_reject() {
        let mut h = harness();

        h.send_from(1, Message::Prepare(Ballot::new(3, 1)));
        assert_eq!(h.recv(1).await, Message::Promise { ballot: Ballot::new(3, 1), accepted: None });

        h.send_from(2, Message::Prepare(Ballot::new(2, 2)));
        assert_eq!(h.recv(2).await, Message::Reject(Ballot::new(3, 1)));
    }

    #[tokio::test]
    async fn test_accept_is_broadcast_as_accepted() {
        let mut h = harness();

        h.send_from(1, Message::Accept(Ballot::new(1, 1), 42));

        assert_eq!(h.recv(1).await, Message::Accepted(Ballot::new(1, 1), 42));
        assert_eq!(h.recv(2).await, Message::Accepted(Ballot::new(1, 1), 42));
    }

    #[tokio::test]
    async fn test_stale_accept_is_rejected_to_sender_only() {
        let mut h = harness();

        h.send_from(1, Message::Prepare(Ballot::new(5, 1)));
        h.recv(1).await;
        h.send_from(2, Message::Accept(Ballot::new(4, 2), 7));

        assert_eq!(h.recv(2).await, Message::RejectAccept(Ballot::new(5, 1)));
        h.assert_silent(1).await;
    }

    #[tokio::test]
    async fn test_forged_sender_is_dropped() {
        let mut h = harness();
        let forged = Envelope::seal(1, 0, Message::Prepare(Ballot::new(1, 1)), &h.keypairs[1]);

        h.network.send(forged);

        h.assert_silent(1).await;
    }

    #[tokio::test]
    async fn test_crashed_node_drops_and_recovers_with_state() {
        let mut h = harness();
        h.send_from(1, Message::Prepare(Ballot::new(2, 1)));
        h.recv(1).await;

        h.node.crash();
        assert_eq!(h.node.status(), NodeStatus::Crashed);
        h.send_from(2, Message::Prepare(Ballot::new(9, 2)));
        h.assert_silent(2).await;

        h.node.recover();
        h.send_from(2, Message::Prepare(Ballot::new(1, 2)));
        assert_eq!(h.recv(2).await, Message::Reject(Ballot::new(2, 1)));
    }

    #[tokio::test]
    async fn test_decision_is_learned_acked_and_forwarded() {
        let mut h = harness();
        let decided = Proposal::new(Ballot::new(4, 1), 42);

        h.send_from(1, Message::Decided(decided.clone()));

        assert_eq!(h.recv(1).await, Message::DecidedAck(Ballot::new(4, 1)));
        assert_eq!(h.recv(2).await, Message::Decided(decided));
        assert_eq!(h.node.learned_value(), Some(42));
    }

    #[tokio::test]
    async fn test_learns_from_quorum_of_accepted() {
        let mut h = harness();

        h.send_from(1, Message::Accepted(Ballot::new(1, 1), 24));
        h.send_from(2, Message::Accepted(Ballot::new(1, 1), 24));

        assert_eq!(timeout(WAIT, h.node.wait_for_value()).await.unwrap(), Ok(24));
        assert_eq!(h.recv(1).await, Message::Decided(Proposal::new(Ballot::new(1, 1), 24)));
    }

    #[tokio::test]
    async fn test_propose_drives_prepare_to_every_node() {
        let mut h = harness();

        h.node.propose(42).unwrap();

        assert_eq!(h.recv(1).await, Message::Prepare(Ballot::new(1, 0)));
        assert_eq!(h.recv(2).await, Message::Prepare(Ballot::new(1, 0)));

        h.send_from(1, Message::Promise { ballot: Ballot::new(1, 0), accepted: None });
        assert_eq!(h.recv(1).await, Message::Accept(Ballot::new(1, 0), 42));
    }

    #[tokio::test]
    async fn test_proposal_adopts_value_this_acceptor_already_accepted() {
        let mut h = harness();
        h.send_from(1, Message::Accept(Ballot::new(2, 1), 7));
        assert_eq!(h.recv(1).await, Message::Accepted(Ballot::new(2, 1), 7));
        assert_eq!(h.recv(2).await, Message::Accepted(Ballot::new(2, 1), 7));

        h.node.propose(42).unwrap();
        assert_eq!(h.recv(1).await, Message::Prepare(Ballot::new(3, 0)));
        assert_eq!(h.recv(2).await, Message::Prepare(Ballot::new(3, 0)));

        // The node's own promise reports (2.1, 7); one more promise makes a quorum.
        h.send_from(1, Message::Promise { ballot: Ballot::new(3, 0), accepted: None });
        assert_eq!(h.recv(1).await, Message::Accept(Ballot::new(3, 0), 7));
        assert_eq!(h.node.learned_value(), None);
    }
}
