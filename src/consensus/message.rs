use std::fmt::Debug;

use super::ballot::{Ballot, NodeId};
use crate::common::crypto::{digest_of, Digest, Keypair, Pubkey, Signature};

/*
    Messages never cross a real network boundary, so they stay structured
    values. The digest is only used to sign envelopes so receivers can
    attribute every Promise and Accepted to a distinct acceptor.
*/

pub trait Hashable {
    fn hash(&self) -> Digest;
}

/// A value the cluster can agree on.
pub trait Value: Clone + PartialEq + Debug + Send + Sync + 'static {
    /// Canonical byte form, fed into message digests.
    fn encode(&self) -> Vec<u8>;
}

macro_rules! impl_value_for_int {
    ($($ty:ty),*) => {
        $(impl Value for $ty {
            fn encode(&self) -> Vec<u8> {
                self.to_be_bytes().to_vec()
            }
        })*
    };
}

impl_value_for_int!(u8, u16, u32, u64, i8, i16, i32, i64, usize, isize);

impl Value for String {
    fn encode(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl Value for Vec<u8> {
    fn encode(&self) -> Vec<u8> {
        self.clone()
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct Proposal<V> {
    pub ballot: Ballot,
    pub value: V,
}

impl<V> Proposal<V> {
    pub fn new(ballot: Ballot, value: V) -> Self {
        Proposal { ballot, value }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub enum Message<V> {
    Prepare(Ballot),
    Promise {
        ballot: Ballot,
        accepted: Option<Proposal<V>>,
    },
    Reject(Ballot),
    Accept(Ballot, V),
    Accepted(Ballot, V),
    RejectAccept(Ballot),
    /// A value some node has seen chosen by a quorum.
    Decided(Proposal<V>),
    DecidedAck(Ballot),
}

impl<V> Message<V> {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Prepare(_) => "prepare",
            Message::Promise { .. } => "promise",
            Message::Reject(_) => "reject",
            Message::Accept(..) => "accept",
            Message::Accepted(..) => "accepted",
            Message::RejectAccept(_) => "reject-accept",
            Message::Decided(_) => "decided",
            Message::DecidedAck(_) => "decided-ack",
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Message::Prepare(_) => 1,
            Message::Promise { .. } => 2,
            Message::Reject(_) => 3,
            Message::Accept(..) => 4,
            Message::Accepted(..) => 5,
            Message::RejectAccept(_) => 6,
            Message::Decided(_) => 7,
            Message::DecidedAck(_) => 8,
        }
    }
}

impl<V: Value> Hashable for Message<V> {
    fn hash(&self) -> Digest {
        let tag = [self.tag()];
        let digest = match self {
            Message::Prepare(ballot)
            | Message::Reject(ballot)
            | Message::RejectAccept(ballot)
            | Message::DecidedAck(ballot) => digest_of([&tag[..], &ballot.to_bytes()[..]]),
            Message::Promise { ballot, accepted: None } => {
                digest_of([&tag[..], &ballot.to_bytes()[..]])
            }
            Message::Promise { ballot, accepted: Some(proposal) } => digest_of([
                &tag[..],
                &ballot.to_bytes()[..],
                &proposal.ballot.to_bytes()[..],
                &proposal.value.encode()[..],
            ]),
            Message::Accept(ballot, value) | Message::Accepted(ballot, value) => {
                digest_of([&tag[..], &ballot.to_bytes()[..], &value.encode()[..]])
            }
            Message::Decided(proposal) => digest_of([
                &tag[..],
                &proposal.ballot.to_bytes()[..],
                &proposal.value.encode()[..],
            ]),
        };
        digest
    }
}

/// A message in flight, stamped with both endpoints and signed by the sender.
#[derive(Clone, Debug)]
pub struct Envelope<V> {
    pub from: NodeId,
    pub to: NodeId,
    pub message: Message<V>,
    pub sig: Signature,
}

impl<V: Value> Envelope<V> {
    pub fn seal(from: NodeId, to: NodeId, message: Message<V>, keypair: &Keypair) -> Self {
        let sig = keypair.sign(&Self::digest(from, to, &message));
        Envelope { from, to, message, sig }
    }

    /// True when `sender` signed exactly this `(from, to, message)`.
    pub fn verify(&self, sender: &Pubkey) -> bool {
        self.sig.signer == *sender
            && self.sig.verify(&Self::digest(self.from, self.to, &self.message))
    }

    fn digest(from: NodeId, to: NodeId, message: &Message<V>) -> Digest {
        digest_of([
            &(from as u64).to_be_bytes()[..],
            &(to as u64).to_be_bytes()[..],
            &message.hash()[..],
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_distinguishes_kind_and_value() {
        let ballot = Ballot::new(1, 0);
        let accept: Message<u64> = Message::Accept(ballot, 42);
        let accepted: Message<u64> = Message::Accepted(ballot, 42);
        let other: Message<u64> = Message::Accept(ballot, 24);

        assert_ne!(accept.hash(), accepted.hash());
        assert_ne!(accept.hash(), other.hash());
        assert_eq!(accept.hash(), Message::Accept(ballot, 42u64).hash());
    }

    #[test]
    fn test_sealed_envelope_verifies_for_sender_only() {
        let sender = Keypair::new_pair();
        let stranger = Keypair::new_pair();
        let envelope = Envelope::seal(0, 2, Message::<u64>::Prepare(Ballot::new(1, 0)), &sender);

        assert!(envelope.verify(&sender.pubkey()));
        assert!(!envelope.verify(&stranger.pubkey()));
    }

    #[test]
    fn test_readdressed_envelope_fails_verification() {
        let sender = Keypair::new_pair();
        let mut envelope =
            Envelope::seal(0, 1, Message::Accepted(Ballot::new(3, 0), 7u64), &sender);
        envelope.to = 2;

        assert!(!envelope.verify(&sender.pubkey()));
    }

    #[test]
    fn test_tampered_value_fails_verification() {
        let sender = Keypair::new_pair();
        let mut envelope = Envelope::seal(
            1,
            0,
            Message::Promise {
                ballot: Ballot::new(2, 0),
                accepted: Some(Proposal::new(Ballot::new(1, 1), String::from("a"))),
            },
            &sender,
        );
        envelope.message = Message::Promise {
            ballot: Ballot::new(2, 0),
            accepted: Some(Proposal::new(Ballot::new(1, 1), String::from("b"))),
        };

        assert!(!envelope.verify(&sender.pubkey()));
    }
}
