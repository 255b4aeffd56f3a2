pub mod acceptor;
pub mod ballot;
pub mod learner;
pub mod message;
pub mod peers;
pub mod processor;
pub mod proposer;
pub mod quorum;

pub use acceptor::*;
pub use ballot::*;
pub use learner::*;
pub use message::*;
pub use peers::*;
pub use processor::*;
pub use proposer::*;
pub use quorum::*;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use crate::{
        config::NetworkConfig,
        network::{node::Node, Network},
    };

    #[tokio::test]
    async fn test_end_to_end() {
        // Arrange: three nodes on a reliable network
        let network = Network::new(3, NetworkConfig::default()).unwrap();
        let nodes: Vec<Node<u64>> = (0..3)
            .map(|id| Node::new(id, 3, Duration::from_millis(50), &network).unwrap())
            .collect();
        for node in &nodes {
            node.run().unwrap();
        }

        // Act: a single proposal from node 0
        nodes[0].propose(42).unwrap();

        // Assert: every node learns it
        for node in &nodes {
            let learned = timeout(Duration::from_secs(5), node.wait_for_value()).await;
            assert_eq!(learned.unwrap(), Ok(42));
        }

        // Act: later proposals cannot change the outcome
        nodes[0].propose(7).unwrap();
        nodes[2].propose(9).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Assert
        for node in &nodes {
            assert_eq!(node.learned_value(), Some(42));
        }
    }

    #[tokio::test]
    async fn test_recovered_proposer_cannot_change_chosen_value() {
        let network = Network::new(3, NetworkConfig::default()).unwrap();
        let nodes: Vec<Node<String>> = (0..3)
            .map(|id| Node::new(id, 3, Duration::from_millis(50), &network).unwrap())
            .collect();
        for node in &nodes {
            node.run().unwrap();
        }
        nodes[2].crash();

        nodes[0].propose(String::from("first")).unwrap();
        for node in &nodes[..2] {
            let learned = timeout(Duration::from_secs(5), node.wait_for_value()).await;
            assert_eq!(learned.unwrap(), Ok(String::from("first")));
        }

        // Node 2 comes back with a competing request. Whether it hears the
        // decision first or runs its own round, it ends up with the same value.
        nodes[2].recover();
        nodes[2].propose(String::from("second")).unwrap();

        let learned = timeout(Duration::from_secs(5), nodes[2].wait_for_value()).await;
        assert_eq!(learned.unwrap(), Ok(String::from("first")));
    }
}
