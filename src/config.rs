/*
    Simulation configuration. Everything is validated when a cluster, network
    or node is built; nothing is re-checked once the protocol is running.
*/

use std::time::Duration;

use rand::Rng;

use crate::common::ConfigError;

pub const DEFAULT_ELECTION_TIMEOUT: Duration = Duration::from_millis(50);

/// Exponential backoff with jitter, used after a proposer is outbid. The same
/// multiplier stretches the round timer after each unanswered round.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Longest a single Prepare or Accept round waits for replies.
    pub max_round_timeout: Duration,
}

impl BackoffConfig {
    /// Backoff scaled to an election timeout: starts at one timeout and is
    /// capped at four.
    pub fn for_timeout(election_timeout: Duration) -> Self {
        BackoffConfig {
            initial: election_timeout,
            max: election_timeout * 4,
            multiplier: 2.0,
            max_round_timeout: election_timeout * 16,
        }
    }

    /// How long round number `retries` waits before giving up. Starts at one
    /// election timeout and never shrinks until the proposer decides.
    pub fn round_timeout(&self, retries: u32) -> Duration {
        let exponent = retries.min(30) as i32;
        let grown = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(grown.min(self.max_round_timeout.as_secs_f64())).max(self.initial)
    }

    /// Delay before retry number `retries`, jittered to 50%..150%.
    pub fn duration(&self, retries: u32, rng: &mut impl Rng) -> Duration {
        let exponent = retries.min(30) as i32;
        let base = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max.as_secs_f64());
        let jitter_factor = rng.gen_range(0.5..1.5);
        Duration::from_secs_f64(capped * jitter_factor)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::for_timeout(DEFAULT_ELECTION_TIMEOUT)
    }
}

/// Transport behaviour shared by every node.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Initial drop probability applied to every node.
    pub loss_probability: f64,
    /// Seeds the loss/delay RNG and the proposers' jitter. `None` draws from the OS.
    pub seed: Option<u64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            min_delay: Duration::ZERO,
            max_delay: Duration::from_millis(5),
            loss_probability: 0.0,
            seed: None,
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_delay > self.max_delay {
            return Err(ConfigError::InvalidDeliveryDelay {
                min: self.min_delay,
                max: self.max_delay,
            });
        }
        validate_loss_probability(self.loss_probability)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    pub nodes: usize,
    pub election_timeout: Duration,
    pub network: NetworkConfig,
}

impl ClusterConfig {
    pub fn new(nodes: usize) -> Self {
        ClusterConfig {
            nodes,
            election_timeout: DEFAULT_ELECTION_TIMEOUT,
            network: NetworkConfig::default(),
        }
    }

    pub fn with_election_timeout(mut self, election_timeout: Duration) -> Self {
        self.election_timeout = election_timeout;
        self
    }

    pub fn with_loss_probability(mut self, p: f64) -> Self {
        self.network.loss_probability = p;
        self
    }

    pub fn with_delivery_delay(mut self, min: Duration, max: Duration) -> Self {
        self.network.min_delay = min;
        self.network.max_delay = max;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.network.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes == 0 {
            return Err(ConfigError::NoNodes);
        }
        validate_election_timeout(self.election_timeout)?;
        self.network.validate()
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

pub fn validate_loss_probability(p: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&p) {
        Ok(())
    } else {
        Err(ConfigError::InvalidLossProbability(p))
    }
}

pub fn validate_election_timeout(timeout: Duration) -> Result<(), ConfigError> {
    if timeout.is_zero() {
        Err(ConfigError::ZeroElectionTimeout)
    } else {
        Ok(())
    }
}
