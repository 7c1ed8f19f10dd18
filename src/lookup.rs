//! Candidate bookkeeping for iterative k-closest walks.
//!
//! Every iterative task (finding a value, locating peers to store onto,
//! refreshing a bucket) walks the network the same way: keep an ordered set
//! of candidate peers keyed by XOR distance to the target, contact a few of
//! the nearest untried ones, and fold every response's peer list back into
//! the set until the nearest candidates stop changing. [`CandidateSet`]
//! holds that state for one walk; the owning task drives all transitions,
//! so the set needs no locking.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use crate::id::Id;
use crate::routing::Peer;

/// How often a candidate that timed out may be re-contacted.
pub const MAX_ATTEMPTS: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateState {
    /// Not contacted yet.
    Unknown,
    /// A request is in flight.
    Contacted,
    /// Answered at least once.
    Responded,
    /// The last request to it timed out.
    TimedOut,
}

#[derive(Debug)]
struct Candidate {
    peer: Peer,
    state: CandidateState,
    attempts: u8,
}

/// The candidates of one walk, ordered by distance to the target.
pub struct CandidateSet {
    target: Id,
    /// Keyed by `distance(peer.id, target)`; iteration order is
    /// nearest-first.
    candidates: BTreeMap<Id, Candidate>,
    in_flight: usize,
    local_addrs: Vec<SocketAddr>,
}

impl CandidateSet {
    /// Seeds the set. `local_addrs` are this node's own endpoints: a
    /// candidate advertising one of them is never selected.
    pub fn new(
        target: Id,
        seed: impl IntoIterator<Item = Peer>,
        local_addrs: Vec<SocketAddr>,
    ) -> Self {
        let mut set = Self {
            target,
            candidates: BTreeMap::new(),
            in_flight: 0,
            local_addrs,
        };
        set.add_candidates(seed);
        set
    }

    pub fn target(&self) -> &Id {
        &self.target
    }

    /// Folds discovered peers in as fresh candidates. A peer whose distance
    /// is already present is ignored.
    pub fn add_candidates(&mut self, peers: impl IntoIterator<Item = Peer>) {
        for peer in peers {
            let distance = peer.id.distance(&self.target);
            self.candidates.entry(distance).or_insert(Candidate {
                peer,
                state: CandidateState::Unknown,
                attempts: 0,
            });
        }
    }

    /// Picks nearest-first candidates to contact, marking each contacted,
    /// while keeping at most `max` requests in flight. Untried candidates
    /// qualify, as do timed-out ones with attempts to spare.
    pub fn select_new_closest(&mut self, max: usize) -> Vec<Peer> {
        let mut picked = Vec::new();

        for candidate in self.candidates.values_mut() {
            if self.in_flight >= max {
                break;
            }

            let selectable = match candidate.state {
                CandidateState::Unknown => true,
                CandidateState::TimedOut => candidate.attempts < MAX_ATTEMPTS,
                _ => false,
            };
            if !selectable || self.local_addrs.contains(&candidate.peer.addr) {
                continue;
            }

            candidate.state = CandidateState::Contacted;
            self.in_flight += 1;
            picked.push(candidate.peer);
        }

        picked
    }

    /// Up to `max` candidates that have responded, nearest first.
    pub fn select_closest_valid(&self, max: usize) -> Vec<Peer> {
        self.candidates
            .values()
            .filter(|c| c.state == CandidateState::Responded)
            .take(max)
            .map(|c| c.peer)
            .collect()
    }

    /// Records a response from `id`.
    pub fn flag_valid(&mut self, id: &Id) {
        let distance = id.distance(&self.target);
        let Some(candidate) = self.candidates.get_mut(&distance) else {
            debug_assert!(false, "flagged an unknown candidate");
            return;
        };

        if candidate.state == CandidateState::Contacted {
            self.in_flight -= 1;
        }
        candidate.state = CandidateState::Responded;
        candidate.attempts = 0;
    }

    /// Records a timeout or send failure for `id`.
    pub fn flag_invalid(&mut self, id: &Id) {
        let distance = id.distance(&self.target);
        let Some(candidate) = self.candidates.get_mut(&distance) else {
            debug_assert!(false, "flagged an unknown candidate");
            return;
        };

        if candidate.state == CandidateState::Contacted {
            self.in_flight -= 1;
        }
        candidate.state = CandidateState::TimedOut;
        candidate.attempts = candidate.attempts.saturating_add(1);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn all_requests_completed(&self) -> bool {
        self.in_flight == 0
    }
}
