//! Search cycle state machine
//!
//! A [`SearchCycle`] holds everything the coordinator knows about one pass
//! through the lobby: which peers are present, which proposals it has sent,
//! and whether the cycle has committed to a match. It performs no I/O; every
//! handler returns the message (if any) the caller must send.
//!
//! Commit is guarded by a [`MatchLatch`]. The first proposal or acceptance to
//! win the latch decides the outcome; everything after is ignored.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::transport::PeerId;

use super::message::{MatchMessage, SessionChannelId};

/// Coordinator lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchState {
    /// Not searching
    Idle,
    /// In the lobby, waiting for a match
    Searching,
    /// Paired with a remote peer
    Matched,
    /// Lobby setup failed; caller must restart
    Error,
}

/// One-shot commit flag for a search cycle
#[derive(Debug, Default)]
pub struct MatchLatch(AtomicBool);

impl MatchLatch {
    /// Create an unset latch
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the latch; returns true only for the caller that set it
    pub fn try_commit(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether the latch has been set
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Result of a committed match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    /// Private session channel shared with the peer
    pub session: SessionChannelId,
    /// Remote transport id
    pub remote_peer: PeerId,
    /// Whether the local side proposed
    pub is_initiator: bool,
}

/// A message the caller must unicast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    /// Target peer
    pub to: PeerId,
    /// Message to send
    pub message: MatchMessage,
}

/// Outcome of handling an incoming match message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    /// Message had no effect
    Ignored(&'static str),
    /// Cycle committed; send `reply` if present
    Matched {
        /// Acceptance to send back, for the responder side
        reply: Option<Outgoing>,
    },
}

/// Proposals offered to one peer this cycle
///
/// Every session name sent stays valid until the cycle ends, so an accept
/// for a slow first proposal still commits after a retry.
#[derive(Debug)]
struct PendingProposal {
    sessions: Vec<SessionChannelId>,
    sent_at: Instant,
}

/// State for one search cycle
#[derive(Debug)]
pub struct SearchCycle {
    /// Local transport id
    self_id: PeerId,

    /// One-shot commit flag
    latch: MatchLatch,

    /// Committed match, once the latch is set
    outcome: Option<MatchOutcome>,

    /// Peers currently in the lobby
    lobby_peers: BTreeSet<PeerId>,

    /// Proposals sent and not yet answered, by target
    pending: HashMap<PeerId, PendingProposal>,

    /// Retry unanswered proposals after this long
    proposal_timeout: Option<Duration>,

    /// Messages dropped this cycle
    ignored: u64,
}

impl SearchCycle {
    /// Start a cycle for the given local transport id
    pub fn new(self_id: PeerId, proposal_timeout: Option<Duration>) -> Self {
        Self {
            self_id,
            latch: MatchLatch::new(),
            outcome: None,
            lobby_peers: BTreeSet::new(),
            pending: HashMap::new(),
            proposal_timeout: proposal_timeout.filter(|timeout| !timeout.is_zero()),
            ignored: 0,
        }
    }

    /// Local transport id
    pub fn self_id(&self) -> &PeerId {
        &self.self_id
    }

    /// The lower id initiates
    pub fn is_initiator_for(&self, peer: &PeerId) -> bool {
        self.self_id < *peer
    }

    /// Whether the cycle has committed
    pub fn is_matched(&self) -> bool {
        self.latch.is_set()
    }

    /// Committed outcome
    pub fn outcome(&self) -> Option<&MatchOutcome> {
        self.outcome.as_ref()
    }

    /// Peers currently known in the lobby
    pub fn lobby_peers(&self) -> impl Iterator<Item = &PeerId> {
        self.lobby_peers.iter()
    }

    /// Number of unanswered proposals
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of messages ignored this cycle
    pub fn ignored_count(&self) -> u64 {
        self.ignored
    }

    /// A peer appeared in the lobby
    ///
    /// Returns a proposal to send when the local side is the initiator.
    pub fn on_peer_joined(&mut self, peer: &PeerId, now: Instant, timestamp_ms: u64) -> Option<Outgoing> {
        if *peer == self.self_id {
            return None;
        }
        self.lobby_peers.insert(peer.clone());

        if self.is_matched() || !self.is_initiator_for(peer) || self.pending.contains_key(peer) {
            return None;
        }

        Some(self.propose(peer, now, timestamp_ms))
    }

    /// A peer left the lobby; any proposal to it is abandoned
    pub fn on_peer_left(&mut self, peer: &PeerId) {
        self.lobby_peers.remove(peer);
        self.pending.remove(peer);
    }

    /// Handle a match message received from `from`
    pub fn on_message(&mut self, from: &PeerId, message: MatchMessage) -> Handled {
        if message.sender() != from {
            return self.ignore("sender mismatch");
        }
        if *from == self.self_id {
            return self.ignore("own message");
        }
        if self.is_matched() {
            return self.ignore("already matched");
        }

        match message {
            MatchMessage::Propose { session, .. } => {
                if !self.latch.try_commit() {
                    return self.ignore("already matched");
                }
                self.pending.clear();
                self.outcome = Some(MatchOutcome {
                    session: session.clone(),
                    remote_peer: from.clone(),
                    is_initiator: false,
                });

                Handled::Matched {
                    reply: Some(Outgoing {
                        to: from.clone(),
                        message: MatchMessage::Accept {
                            session,
                            sender: self.self_id.clone(),
                        },
                    }),
                }
            }
            MatchMessage::Accept { session, .. } => {
                let proposed = self
                    .pending
                    .get(from)
                    .is_some_and(|pending| pending.sessions.contains(&session));
                if !proposed {
                    return self.ignore("accept for unknown proposal");
                }
                if !self.latch.try_commit() {
                    return self.ignore("already matched");
                }
                self.pending.clear();
                self.outcome = Some(MatchOutcome {
                    session,
                    remote_peer: from.clone(),
                    is_initiator: true,
                });

                Handled::Matched { reply: None }
            }
        }
    }

    /// Earliest proposal expiry, when a timeout is configured
    pub fn next_deadline(&self) -> Option<Instant> {
        let timeout = self.proposal_timeout?;
        if self.is_matched() {
            return None;
        }
        self.pending
            .values()
            .map(|pending| pending.sent_at + timeout)
            .min()
    }

    /// Re-propose to peers whose proposals expired and who are still present
    pub fn expire_proposals(&mut self, now: Instant, timestamp_ms: u64) -> Vec<Outgoing> {
        let Some(timeout) = self.proposal_timeout else {
            return Vec::new();
        };
        if self.is_matched() {
            return Vec::new();
        }

        let expired: Vec<PeerId> = self
            .pending
            .iter()
            .filter(|(_, pending)| now.duration_since(pending.sent_at) >= timeout)
            .map(|(peer, _)| peer.clone())
            .collect();

        let mut retries = Vec::with_capacity(expired.len());
        for peer in expired {
            if self.lobby_peers.contains(&peer) {
                retries.push(self.propose(&peer, now, timestamp_ms));
            } else {
                self.pending.remove(&peer);
            }
        }
        retries
    }

    fn propose(&mut self, peer: &PeerId, now: Instant, timestamp_ms: u64) -> Outgoing {
        let session = SessionChannelId::derive(&self.self_id, peer, timestamp_ms);
        let pending = self
            .pending
            .entry(peer.clone())
            .or_insert_with(|| PendingProposal {
                sessions: Vec::new(),
                sent_at: now,
            });
        if !pending.sessions.contains(&session) {
            pending.sessions.push(session.clone());
        }
        pending.sent_at = now;

        Outgoing {
            to: peer.clone(),
            message: MatchMessage::Propose {
                session,
                sender: self.self_id.clone(),
            },
        }
    }

    fn ignore(&mut self, reason: &'static str) -> Handled {
        self.ignored += 1;
        Handled::Ignored(reason)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    fn peer(id: &str) -> PeerId {
        PeerId::from(id)
    }

    #[test]
    fn test_latch_commits_once() {
        let latch = MatchLatch::new();
        assert!(!latch.is_set());
        assert!(latch.try_commit());
        assert!(!latch.try_commit());
        assert!(latch.is_set());
    }

    #[test]
    fn test_lower_id_proposes() {
        let now = Instant::now();
        let mut a = SearchCycle::new(peer("aaa"), None);
        let mut b = SearchCycle::new(peer("bbb"), None);

        let proposal = a.on_peer_joined(&peer("bbb"), now, 1000).unwrap();
        assert_eq!(proposal.to, peer("bbb"));
        assert_eq!(proposal.message.session().as_str(), "devgle_aaa_bbb_1000");
        assert_eq!(a.pending_count(), 1);

        assert!(b.on_peer_joined(&peer("aaa"), now, 1000).is_none());
    }

    #[test]
    fn test_two_peer_handshake() {
        let now = Instant::now();
        let mut a = SearchCycle::new(peer("aaa"), None);
        let mut b = SearchCycle::new(peer("bbb"), None);

        let proposal = a.on_peer_joined(&peer("bbb"), now, 1).unwrap();
        b.on_peer_joined(&peer("aaa"), now, 1);

        let reply = match b.on_message(&peer("aaa"), proposal.message) {
            Handled::Matched { reply: Some(reply) } => reply,
            other => panic!("unexpected: {:?}", other),
        };
        assert_eq!(reply.to, peer("aaa"));

        assert_eq!(
            a.on_message(&peer("bbb"), reply.message),
            Handled::Matched { reply: None }
        );

        let a_outcome = a.outcome().unwrap();
        let b_outcome = b.outcome().unwrap();
        assert!(a_outcome.is_initiator);
        assert!(!b_outcome.is_initiator);
        assert_eq!(a_outcome.session, b_outcome.session);
        assert_eq!(a_outcome.remote_peer, peer("bbb"));
        assert_eq!(b_outcome.remote_peer, peer("aaa"));
        assert_eq!(a.pending_count(), 0);
    }

    #[test]
    fn test_second_proposal_ignored() {
        let mut c = SearchCycle::new(peer("ccc"), None);
        let first = MatchMessage::Propose {
            session: SessionChannelId::new("devgle_aaa_ccc_1"),
            sender: peer("aaa"),
        };
        let second = MatchMessage::Propose {
            session: SessionChannelId::new("devgle_bbb_ccc_1"),
            sender: peer("bbb"),
        };

        assert!(matches!(c.on_message(&peer("aaa"), first), Handled::Matched { .. }));
        assert_eq!(
            c.on_message(&peer("bbb"), second),
            Handled::Ignored("already matched")
        );
        assert_eq!(c.outcome().unwrap().session.as_str(), "devgle_aaa_ccc_1");
        assert_eq!(c.ignored_count(), 1);
    }

    #[test]
    fn test_unsolicited_accept_ignored() {
        let mut a = SearchCycle::new(peer("aaa"), None);
        let accept = MatchMessage::Accept {
            session: SessionChannelId::new("devgle_aaa_bbb_1"),
            sender: peer("bbb"),
        };
        assert_eq!(
            a.on_message(&peer("bbb"), accept),
            Handled::Ignored("accept for unknown proposal")
        );
        assert!(!a.is_matched());
    }

    #[test]
    fn test_accept_with_wrong_session_ignored() {
        let now = Instant::now();
        let mut a = SearchCycle::new(peer("aaa"), None);
        a.on_peer_joined(&peer("bbb"), now, 1).unwrap();

        let accept = MatchMessage::Accept {
            session: SessionChannelId::new("devgle_other_1"),
            sender: peer("bbb"),
        };
        assert!(matches!(a.on_message(&peer("bbb"), accept), Handled::Ignored(_)));
        assert!(!a.is_matched());
    }

    #[test]
    fn test_spoofed_sender_ignored() {
        let mut b = SearchCycle::new(peer("bbb"), None);
        let proposal = MatchMessage::Propose {
            session: SessionChannelId::new("devgle_aaa_bbb_1"),
            sender: peer("aaa"),
        };
        assert_eq!(
            b.on_message(&peer("mallory"), proposal),
            Handled::Ignored("sender mismatch")
        );
        assert!(!b.is_matched());
    }

    #[test]
    fn test_peer_left_abandons_proposal() {
        let now = Instant::now();
        let mut a = SearchCycle::new(peer("aaa"), None);
        let proposal = a.on_peer_joined(&peer("bbb"), now, 1).unwrap();
        a.on_peer_left(&peer("bbb"));
        assert_eq!(a.pending_count(), 0);

        // A late accept for the abandoned proposal does nothing
        let accept = MatchMessage::Accept {
            session: proposal.message.session().clone(),
            sender: peer("bbb"),
        };
        assert!(matches!(a.on_message(&peer("bbb"), accept), Handled::Ignored(_)));
        assert!(!a.is_matched());
        assert_eq!(a.lobby_peers().count(), 0);
    }

    #[test]
    fn test_no_proposals_after_match() {
        let now = Instant::now();
        let mut a = SearchCycle::new(peer("aaa"), None);
        let proposal = MatchMessage::Propose {
            session: SessionChannelId::new("devgle_00_aaa_1"),
            sender: peer("00"),
        };
        assert!(matches!(a.on_message(&peer("00"), proposal), Handled::Matched { .. }));
        assert!(a.on_peer_joined(&peer("zzz"), now, 2).is_none());
    }

    #[test]
    fn test_proposal_timeout_retries() {
        let start = Instant::now();
        let timeout = Duration::from_secs(3);
        let mut a = SearchCycle::new(peer("aaa"), Some(timeout));

        let first = a.on_peer_joined(&peer("bbb"), start, 1).unwrap();
        assert_eq!(a.next_deadline(), Some(start + timeout));

        // Not yet expired
        assert!(a.expire_proposals(start + Duration::from_secs(1), 2).is_empty());

        let retries = a.expire_proposals(start + timeout, 3001);
        assert_eq!(retries.len(), 1);
        assert_ne!(retries[0].message.session(), first.message.session());
        assert_eq!(retries[0].message.session().as_str(), "devgle_aaa_bbb_3001");
        assert_eq!(a.pending_count(), 1);
        assert_eq!(a.next_deadline(), Some(start + timeout + timeout));
    }

    #[test]
    fn test_slow_first_proposal_still_matches_after_retry() {
        let start = Instant::now();
        let timeout = Duration::from_secs(3);
        let mut a = SearchCycle::new(peer("aaa"), Some(timeout));
        let mut b = SearchCycle::new(peer("bbb"), Some(timeout));

        let first = a.on_peer_joined(&peer("bbb"), start, 1).unwrap();
        b.on_peer_joined(&peer("aaa"), start, 1);
        let retry = a.expire_proposals(start + timeout, 3001).pop().unwrap();

        // Both proposals arrive late, the first one wins on the responder
        let reply = match b.on_message(&peer("aaa"), first.message.clone()) {
            Handled::Matched { reply: Some(reply) } => reply,
            other => panic!("unexpected: {:?}", other),
        };
        assert_eq!(
            b.on_message(&peer("aaa"), retry.message),
            Handled::Ignored("already matched")
        );

        assert_eq!(
            a.on_message(&peer("bbb"), reply.message),
            Handled::Matched { reply: None }
        );
        assert_eq!(a.outcome().unwrap().session, *first.message.session());
        assert_eq!(a.outcome().unwrap().session, b.outcome().unwrap().session);
    }

    #[test]
    fn test_zero_timeout_disables_retry() {
        let start = Instant::now();
        let mut a = SearchCycle::new(peer("aaa"), Some(Duration::ZERO));

        a.on_peer_joined(&peer("bbb"), start, 1).unwrap();
        assert!(a.next_deadline().is_none());
        assert!(a.expire_proposals(start, 2).is_empty());
    }

    #[test]
    fn test_proposal_timeout_drops_departed_peer() {
        let start = Instant::now();
        let timeout = Duration::from_secs(3);
        let mut a = SearchCycle::new(peer("aaa"), Some(timeout));

        a.on_peer_joined(&peer("bbb"), start, 1).unwrap();
        a.lobby_peers.remove(&peer("bbb"));

        assert!(a.expire_proposals(start + timeout, 2).is_empty());
        assert_eq!(a.pending_count(), 0);
        assert!(a.next_deadline().is_none());
    }

    #[test]
    fn test_no_deadline_without_timeout() {
        let mut a = SearchCycle::new(peer("aaa"), None);
        a.on_peer_joined(&peer("bbb"), Instant::now(), 1).unwrap();
        assert!(a.next_deadline().is_none());
        assert!(a.expire_proposals(Instant::now(), 2).is_empty());
    }

    /// Deliver every queued message until the lobby is quiet
    fn settle(cycles: &mut [SearchCycle], mut queue: VecDeque<(PeerId, Outgoing)>) {
        while let Some((from, out)) = queue.pop_front() {
            let target = cycles
                .iter_mut()
                .find(|c| *c.self_id() == out.to)
                .unwrap();
            if let Handled::Matched { reply: Some(reply) } = target.on_message(&from, out.message) {
                queue.push_back((target.self_id().clone(), reply));
            }
        }
    }

    #[test]
    fn test_three_peers_same_tick() {
        let now = Instant::now();
        let ids = ["a1", "a2", "a3"];
        let mut cycles: Vec<SearchCycle> = ids.iter().map(|id| SearchCycle::new(peer(id), None)).collect();

        // Everyone sees everyone before any message is delivered
        let mut queue = VecDeque::new();
        for cycle in cycles.iter_mut() {
            for other in ids {
                if let Some(out) = cycle.on_peer_joined(&peer(other), now, 7) {
                    queue.push_back((cycle.self_id().clone(), out));
                }
            }
        }
        assert_eq!(queue.len(), 3);

        settle(&mut cycles, queue);

        for cycle in &cycles {
            // Each participant holds at most one outcome and never pairs with itself
            if let Some(outcome) = cycle.outcome() {
                assert_ne!(&outcome.remote_peer, cycle.self_id());
            }
        }

        // Any mutually agreed pair shares the same session channel
        for a in &cycles {
            for b in &cycles {
                if let (Some(oa), Some(ob)) = (a.outcome(), b.outcome()) {
                    if oa.remote_peer == *b.self_id() && ob.remote_peer == *a.self_id() {
                        assert_eq!(oa.session, ob.session);
                        assert_ne!(oa.is_initiator, ob.is_initiator);
                    }
                }
            }
        }
    }

    #[test]
    fn test_many_peers_match_at_most_once() {
        let now = Instant::now();
        let ids: Vec<String> = (0..9).map(|i| format!("peer{}", i)).collect();
        let mut cycles: Vec<SearchCycle> = ids
            .iter()
            .map(|id| SearchCycle::new(peer(id), None))
            .collect();

        let mut queue = VecDeque::new();
        for cycle in cycles.iter_mut() {
            for other in &ids {
                if let Some(out) = cycle.on_peer_joined(&peer(other), now, 1) {
                    queue.push_back((cycle.self_id().clone(), out));
                }
            }
        }

        // Duplicate every message to simulate redelivery
        let doubled: VecDeque<_> = queue.iter().cloned().chain(queue.iter().cloned()).collect();
        settle(&mut cycles, doubled);

        let matched = cycles.iter().filter(|c| c.is_matched()).count();
        assert!(matched >= 2);
        for cycle in &cycles {
            assert_eq!(cycle.is_matched(), cycle.outcome().is_some());
        }
    }
}
