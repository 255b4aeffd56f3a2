pub mod node;

use std::{
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
    time::Duration,
};

use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing::trace;

use crate::{
    common::{crypto::{Keypair, Pubkey}, ConfigError},
    config::{validate_loss_probability, NetworkConfig},
    consensus::{Envelope, Message, NodeId, Peers, Value},
};

/*
    Simulated network: point-to-point, lossy and unordered. Every send is
    dropped with the larger of the sender's and the receiver's loss
    probability; survivors are delivered after an independent random delay,
    so two messages between the same pair may overtake each other. A
    broadcast is a send to every node, the sender included.
*/

pub const INBOX_CAPACITY: usize = 1024;

pub struct Network<V> {
    inner: Arc<NetworkInner<V>>,
}

struct NetworkInner<V> {
    peers: Peers,
    inboxes: Vec<OnceLock<Sender<Envelope<V>>>>,
    loss: Mutex<Vec<f64>>,
    rng: Mutex<StdRng>,
    min_delay: Duration,
    max_delay: Duration,
    seed: Option<u64>,
}

impl<V> Clone for Network<V> {
    fn clone(&self) -> Self {
        Network {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<V: Value> Network<V> {
    pub fn new(total_nodes: usize, config: NetworkConfig) -> Result<Self, ConfigError> {
        if total_nodes == 0 {
            return Err(ConfigError::NoNodes);
        }
        config.validate()?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Network {
            inner: Arc::new(NetworkInner {
                peers: Peers::new(total_nodes),
                inboxes: (0..total_nodes).map(|_| OnceLock::new()).collect(),
                loss: Mutex::new(vec![config.loss_probability; total_nodes]),
                rng: Mutex::new(rng),
                min_delay: config.min_delay,
                max_delay: config.max_delay,
                seed: config.seed,
            }),
        })
    }

    pub fn size(&self) -> usize {
        self.inner.peers.len()
    }

    pub fn peers(&self) -> &Peers {
        &self.inner.peers
    }

    /// Joins node `id` and hands back its inbox. Each id joins once.
    pub fn register(&self, id: NodeId, pubkey: Pubkey) -> Result<Receiver<Envelope<V>>, ConfigError> {
        self.inner.peers.register(id, pubkey)?;
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.inner.inboxes[id]
            .set(tx)
            .map_err(|_| ConfigError::AlreadyRegistered(id))?;
        Ok(rx)
    }

    pub fn set_loss_probability(&self, id: NodeId, p: f64) -> Result<(), ConfigError> {
        validate_loss_probability(p)?;
        let mut loss = lock(&self.inner.loss);
        let total = loss.len();
        let slot = loss
            .get_mut(id)
            .ok_or(ConfigError::NodeOutOfRange { id, total })?;
        *slot = p;
        Ok(())
    }

    pub fn set_all_loss_probability(&self, p: f64) -> Result<(), ConfigError> {
        validate_loss_probability(p)?;
        lock(&self.inner.loss).iter_mut().for_each(|slot| *slot = p);
        Ok(())
    }

    pub fn loss_probability(&self, id: NodeId) -> f64 {
        lock(&self.inner.loss).get(id).copied().unwrap_or(0.0)
    }

    /// Independent RNG stream for node `id`, reproducible when the network is seeded.
    pub fn rng_for(&self, id: NodeId) -> StdRng {
        match self.inner.seed {
            Some(seed) => {
                StdRng::seed_from_u64(seed ^ (id as u64 + 1).wrapping_mul(0x9e37_79b9_7f4a_7c15))
            }
            None => StdRng::from_entropy(),
        }
    }

    /// Either drops the envelope or schedules its delivery. Must be called
    /// from within a tokio runtime.
    pub fn send(&self, envelope: Envelope<V>) {
        let (from, to) = (envelope.from, envelope.to);
        let Some(inbox) = self.inner.inboxes.get(to).and_then(OnceLock::get).cloned() else {
            trace!(from, to, "no such destination, dropping");
            return;
        };

        let p = self.loss_probability(from).max(self.loss_probability(to));

        let delay = {
            let mut rng = lock(&self.inner.rng);
            if rng.gen::<f64>() < p {
                trace!(from, to, kind = envelope.message.kind(), "message lost");
                return;
            }
            rng.gen_range(self.inner.min_delay..=self.inner.max_delay)
        };

        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if inbox.send(envelope).await.is_err() {
                trace!(from, to, "destination stopped, dropping");
            }
        });
    }

    pub fn broadcast(&self, from: NodeId, message: Message<V>, keypair: &Keypair) {
        for to in self.inner.peers.ids() {
            self.send(Envelope::seal(from, to, message.clone(), keypair));
        }
    }
}
