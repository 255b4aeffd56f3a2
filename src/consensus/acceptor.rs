use super::{
    ballot::Ballot,
    message::{Message, Proposal},
};

/// Acceptor memory. Survives crashes; only Prepare and Accept mutate it.
#[derive(Clone, Debug, PartialEq)]
pub struct AcceptorRecord<V> {
    promised: Ballot,
    accepted: Option<Proposal<V>>,
}

impl<V> Default for AcceptorRecord<V> {
    fn default() -> Self {
        AcceptorRecord {
            promised: Ballot::ZERO,
            accepted: None,
        }
    }
}

impl<V: Clone> AcceptorRecord<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn promised(&self) -> Ballot {
        self.promised
    }

    pub fn accepted(&self) -> Option<&Proposal<V>> {
        self.accepted.as_ref()
    }

    /// Phase 1b. Replies `Promise` with any previously accepted proposal, or
    /// `Reject` with the ballot that blocks this one.
    pub fn on_prepare(&mut self, ballot: Ballot) -> Message<V> {
        if ballot > self.promised {
            self.promised = ballot;
            Message::Promise {
                ballot,
                accepted: self.accepted.clone(),
            }
        } else {
            Message::Reject(self.promised)
        }
    }

    /// Phase 2b.
    pub fn on_accept(&mut self, ballot: Ballot, value: V) -> Message<V> {
        if ballot >= self.promised {
            self.promised = ballot;
            self.accepted = Some(Proposal::new(ballot, value.clone()));
            Message::Accepted(ballot, value)
        } else {
            Message::RejectAccept(self.promised)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepted_below_promise<V: Clone>(record: &AcceptorRecord<V>) -> bool {
        record
            .accepted()
            .map_or(true, |proposal| proposal.ballot <= record.promised())
    }

    #[test]
    fn test_prepare_promises_higher_ballot() {
        let mut record = AcceptorRecord::<u64>::new();
        let reply = record.on_prepare(Ballot::new(1, 0));

        assert_eq!(reply, Message::Promise { ballot: Ballot::new(1, 0), accepted: None });
        assert_eq!(record.promised(), Ballot::new(1, 0));
    }

    #[test]
    fn test_prepare_rejects_equal_or_lower_ballot() {
        let mut record = AcceptorRecord::<u64>::new();
        record.on_prepare(Ballot::new(2, 1));

        assert_eq!(record.on_prepare(Ballot::new(2, 1)), Message::Reject(Ballot::new(2, 1)));
        assert_eq!(record.on_prepare(Ballot::new(2, 0)), Message::Reject(Ballot::new(2, 1)));
        assert_eq!(record.promised(), Ballot::new(2, 1));
    }

    #[test]
    fn test_promise_reports_previously_accepted_proposal() {
        let mut record = AcceptorRecord::new();
        record.on_prepare(Ballot::new(1, 0));
        record.on_accept(Ballot::new(1, 0), 42u64);

        let reply = record.on_prepare(Ballot::new(2, 1));

        assert_eq!(
            reply,
            Message::Promise {
                ballot: Ballot::new(2, 1),
                accepted: Some(Proposal::new(Ballot::new(1, 0), 42)),
            }
        );
        assert!(accepted_below_promise(&record));
    }

    #[test]
    fn test_accept_at_promised_ballot() {
        let mut record = AcceptorRecord::new();
        record.on_prepare(Ballot::new(3, 2));

        assert_eq!(record.on_accept(Ballot::new(3, 2), 7u64), Message::Accepted(Ballot::new(3, 2), 7));
        assert_eq!(record.accepted(), Some(&Proposal::new(Ballot::new(3, 2), 7)));
    }

    #[test]
    fn test_accept_without_prepare_raises_promise() {
        let mut record = AcceptorRecord::new();

        assert_eq!(record.on_accept(Ballot::new(4, 1), 9u64), Message::Accepted(Ballot::new(4, 1), 9));
        assert_eq!(record.promised(), Ballot::new(4, 1));
        assert!(accepted_below_promise(&record));
    }

    #[test]
    fn test_accept_below_promise_is_rejected() {
        let mut record = AcceptorRecord::new();
        record.on_prepare(Ballot::new(5, 0));

        assert_eq!(record.on_accept(Ballot::new(4, 2), 1u64), Message::RejectAccept(Ballot::new(5, 0)));
        assert_eq!(record.accepted(), None);
    }

    #[test]
    fn test_later_accept_replaces_earlier() {
        let mut record = AcceptorRecord::new();
        record.on_accept(Ballot::new(1, 0), 1u64);
        record.on_accept(Ballot::new(2, 1), 2u64);

        assert_eq!(record.accepted(), Some(&Proposal::new(Ballot::new(2, 1), 2)));
        assert_eq!(record.on_accept(Ballot::new(1, 0), 1u64), Message::RejectAccept(Ballot::new(2, 1)));
    }
}
