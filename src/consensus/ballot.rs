use std::fmt;

pub type NodeId = usize;

/// Proposal round identifier. Field order gives the lexicographic
/// `(round, node)` ordering, so two proposers never share a ballot.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Ballot {
    pub round: u64,
    pub node: NodeId,
}

impl Ballot {
    /// Below every ballot a generator hands out.
    pub const ZERO: Ballot = Ballot { round: 0, node: 0 };

    pub fn new(round: u64, node: NodeId) -> Self {
        Ballot { round, node }
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.round.to_be_bytes());
        bytes[8..].copy_from_slice(&(self.node as u64).to_be_bytes());
        bytes
    }
}

impl fmt::Display for Ballot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.round, self.node)
    }
}

/// Per-node round counter.
#[derive(Debug, Clone)]
pub struct BallotGenerator {
    node: NodeId,
    round: u64,
}

impl BallotGenerator {
    pub fn new(node: NodeId) -> Self {
        BallotGenerator { node, round: 0 }
    }

    pub fn next(&mut self) -> Ballot {
        self.round += 1;
        Ballot::new(self.round, self.node)
    }

    /// Fast-forwards past a competing ballot so the next one outranks it.
    pub fn observe(&mut self, ballot: Ballot) {
        self.round = self.round.max(ballot.round);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_breaks_ties_by_node() {
        assert!(Ballot::new(2, 0) > Ballot::new(1, 9));
        assert!(Ballot::new(3, 2) > Ballot::new(3, 1));
        assert_ne!(Ballot::new(3, 1), Ballot::new(3, 2));
    }

    #[test]
    fn test_generator_strictly_increases() {
        let mut ballots = BallotGenerator::new(4);
        let first = ballots.next();
        let second = ballots.next();

        assert!(first > Ballot::ZERO);
        assert!(second > first);
        assert_eq!(second, Ballot::new(2, 4));
    }

    #[test]
    fn test_observe_jumps_past_competitor() {
        let mut ballots = BallotGenerator::new(0);
        ballots.next();
        let competitor = Ballot::new(7, 2);
        ballots.observe(competitor);

        assert!(ballots.next() > competitor);
    }

    #[test]
    fn test_observe_never_moves_backwards() {
        let mut ballots = BallotGenerator::new(1);
        for _ in 0..5 {
            ballots.next();
        }
        ballots.observe(Ballot::new(2, 3));

        assert_eq!(ballots.next(), Ballot::new(6, 1));
    }
}
