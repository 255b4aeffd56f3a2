use std::{sync::Mutex, time::Duration};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::info;

use super::{lock, Network};
use crate::{
    common::{crypto::Keypair, ConfigError, NodeError},
    config::validate_election_timeout,
    consensus::{
        AcceptorRecord, ConsensusProcessor, Control, Learner, NodeId, NodeState,
        NodeStatus, Proposer, StatusCell, Value,
    },
};

/// Handle to one simulated node. Every method is safe to call from any
/// task; the protocol itself runs in the task started by [`Node::run`].
pub struct Node<V> {
    id: NodeId,
    network: Network<V>,
    status: StatusCell,
    control_tx: mpsc::UnboundedSender<Control<V>>,
    learned_rx: watch::Receiver<Option<V>>,
    processor: Mutex<Option<ConsensusProcessor<V>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<V: Value> Node<V> {
    /// Builds a node with an empty acceptor record, alive, and joins it to
    /// `network`. Nothing is processed until [`Node::run`].
    pub fn new(
        id: NodeId,
        total_nodes: usize,
        election_timeout: Duration,
        network: &Network<V>,
    ) -> Result<Self, ConfigError> {
        if total_nodes == 0 {
            return Err(ConfigError::NoNodes);
        }
        if id >= total_nodes {
            return Err(ConfigError::NodeOutOfRange { id, total: total_nodes });
        }
        if network.size() != total_nodes {
            return Err(ConfigError::ClusterSizeMismatch {
                expected: total_nodes,
                actual: network.size(),
            });
        }
        validate_election_timeout(election_timeout)?;

        let keypair = Keypair::new_pair();
        let msg_rx = network.register(id, keypair.pubkey())?;
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (learned_tx, learned_rx) = watch::channel(None);
        let status = StatusCell::new();

        let state = NodeState {
            id,
            keypair,
            network: network.clone(),
            status: status.clone(),
            acceptor: AcceptorRecord::new(),
            proposer: Proposer::new(id, total_nodes, election_timeout, network.rng_for(id)),
            learner: Learner::new(id, total_nodes),
            learned_tx,
            election_timeout,
            deadline: None,
        };

        Ok(Node {
            id,
            network: network.clone(),
            status,
            control_tx,
            learned_rx,
            processor: Mutex::new(Some(ConsensusProcessor {
                state,
                msg_rx,
                control_rx,
            })),
            task: Mutex::new(None),
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Spawns the processing loop on the current tokio runtime.
    pub fn run(&self) -> Result<(), NodeError> {
        let processor = lock(&self.processor)
            .take()
            .ok_or(NodeError::AlreadyRunning(self.id))?;
        let handle = tokio::spawn(processor.run());
        *lock(&self.task) = Some(handle);
        Ok(())
    }

    /// Asks this node to get `value` chosen. Returns immediately; watch
    /// [`Node::learned_value`] for the outcome.
    pub fn propose(&self, value: V) -> Result<(), NodeError> {
        self.control_tx
            .send(Control::Propose(value))
            .map_err(|_| NodeError::Stopped(self.id))
    }

    pub fn learned_value(&self) -> Option<V> {
        self.learned_rx.borrow().clone()
    }

    /// Resolves once this node has learned a value.
    pub async fn wait_for_value(&self) -> Result<V, NodeError> {
        let mut learned_rx = self.learned_rx.clone();
        let learned = learned_rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| NodeError::Stopped(self.id))?;
        (*learned).clone().ok_or(NodeError::Stopped(self.id))
    }

    pub fn status(&self) -> NodeStatus {
        self.status.get()
    }

    /// Stops processing before the next message or timer. Acceptor state is kept.
    pub fn crash(&self) {
        info!(node = self.id, "crash requested");
        self.status.set(NodeStatus::Crashed);
        let _ = self.control_tx.send(Control::Crash);
    }

    pub fn recover(&self) {
        info!(node = self.id, "recover requested");
        self.status.set(NodeStatus::Alive);
        let _ = self.control_tx.send(Control::Recover);
    }

    /// Drop rate for every message sent by or to this node.
    pub fn set_message_loss_probability(&self, p: f64) -> Result<(), ConfigError> {
        self.network.set_loss_probability(self.id, p)
    }

    pub fn shutdown(&self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
    }
}

impl<V> Drop for Node<V> {
    fn drop(&mut self) {
        let task = self
            .task
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(handle) = task.take() {
            handle.abort();
        }
    }
}
