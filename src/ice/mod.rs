// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ICE-lite (controlled-only) connectivity-check agent (RFC 8445/5245, spec §4.F).
//!
//! We never originate a Binding Request: the remote peer always controls the
//! checks, and this agent only replies. The candidate pair checklist and its
//! Frozen -> Waiting -> InProgress -> {Succeeded, Failed} state machine below
//! follow the same explicit-enum-plus-transition-method idiom the teacher
//! uses for its own discovery FSM (`core/discovery/multicast/fsm/discovery.rs`):
//! every transition is a named method that returns the state actually
//! reached, so callers can log or assert on it.

mod candidate;

use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use lru::LruCache;
use rand::Rng;

pub use candidate::{Candidate, CandidateKind};

use crate::config::{
    DEFAULT_TXID_LRU, ICE_TYPE_PREF_HOST, ICE_TYPE_PREF_PRFLX, ICE_TYPE_PREF_SRFLX,
};
use crate::stun::{self, attr, Class, Message, SocketAddrStun, StunError};

/// ICE failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceError {
    /// MESSAGE-INTEGRITY or FINGERPRINT failed to verify.
    IntegrityCheckFailed,
    /// The USERNAME attribute did not match `local_ufrag:remote_ufrag`.
    ForeignUsername,
    /// Every candidate pair in the checklist transitioned to Failed.
    AllPairsFailed,
    /// No successful check arrived within the liveness window.
    LivenessTimeout,
}

impl fmt::Display for IceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IntegrityCheckFailed => write!(f, "STUN integrity check failed"),
            Self::ForeignUsername => write!(f, "USERNAME did not match the expected ufrag pair"),
            Self::AllPairsFailed => write!(f, "every candidate pair failed"),
            Self::LivenessTimeout => write!(f, "no successful connectivity check within the liveness window"),
        }
    }
}

impl std::error::Error for IceError {}

/// State of one candidate pair in the checklist (RFC 8445 §6.1.2.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    /// Not yet scheduled.
    Frozen,
    /// Scheduled but not yet checked.
    Waiting,
    /// A check is outstanding.
    InProgress,
    /// A check succeeded.
    Succeeded,
    /// A check failed or timed out past the retry budget.
    Failed,
}

/// Overall ICE connection state (spec §4.F.5), surfaced to the peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Agent created, no checks have started.
    New,
    /// At least one check has been received or sent.
    Checking,
    /// A nominated pair exists.
    Connected,
    /// Had a nominated pair but liveness lapsed.
    Disconnected,
    /// Every pair failed, or the failed liveness window elapsed.
    Failed,
    /// Explicitly closed.
    Closed,
}

/// Pair priority (RFC 8445 §6.1.2.3): `2^32*min(G,D) + 2*max(G,D) + tiebreak`.
/// `tiebreak` is 1 if the controller's priority (`g` when we are controlled
/// agent, since the controller is the remote side here) is greater, else 0.
#[must_use]
pub fn pair_priority(controller_priority: u32, controlled_priority: u32, controller_wins_tie: bool) -> u64 {
    let g = controller_priority as u64;
    let d = controlled_priority as u64;
    let tiebreak = u64::from(controller_wins_tie && g > d);
    (1u64 << 32) * g.min(d) + 2 * g.max(d) + tiebreak
}

/// One checklist entry: a local/remote candidate pair plus its check state.
pub struct CandidatePair {
    /// Our local candidate.
    pub local: Candidate,
    /// The peer's candidate.
    pub remote: Candidate,
    /// Current state.
    pub state: PairState,
    /// True once this pair has been nominated (USE-CANDIDATE from the remote controller).
    pub nominated: bool,
    /// Bounded LRU of transaction ids for in-flight/retried checks on this pair.
    txids: LruCache<[u8; 12], ()>,
    /// Last time a check was sent to this pair, if any.
    pub last_send: Option<Instant>,
    /// Last time a check was received for this pair, if any.
    pub last_recv: Option<Instant>,
}

impl CandidatePair {
    fn new(local: Candidate, remote: Candidate, txid_lru: usize) -> Self {
        Self {
            local,
            remote,
            state: PairState::Frozen,
            nominated: false,
            txids: LruCache::new(std::num::NonZeroUsize::new(txid_lru.max(1)).unwrap()),
            last_send: None,
            last_recv: None,
        }
    }

    /// Record an inbound transaction id so a retransmit of the same request
    /// can still be matched (RFC 8445 §14 tolerates client retransmission).
    fn remember(&mut self, txid: [u8; 12]) {
        self.txids.put(txid, ());
    }

    fn knows(&self, txid: &[u8; 12]) -> bool {
        self.txids.contains(txid)
    }

    /// Transition Frozen/Waiting -> InProgress.
    pub fn start_check(&mut self) -> PairState {
        if matches!(self.state, PairState::Frozen | PairState::Waiting) {
            self.state = PairState::InProgress;
        }
        self.state
    }

    /// Transition InProgress -> Succeeded on a valid response.
    pub fn succeed(&mut self) -> PairState {
        self.state = PairState::Succeeded;
        self.state
    }

    /// Transition to Failed (error response, or retry budget exhausted).
    pub fn fail(&mut self) -> PairState {
        self.state = PairState::Failed;
        self.state
    }
}

/// Overall checklist state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecklistState {
    /// Still processing pairs.
    Running,
    /// A pair has been nominated.
    Completed,
    /// Every pair failed.
    Failed,
}

/// The ICE-lite agent for one peer: local credentials, the candidate pair
/// checklist, and the derived connection state.
pub struct Agent {
    pub local_ufrag: String,
    pub local_password: String,
    pub remote_ufrag: Option<String>,
    pub remote_password: Option<String>,
    local_candidate: Candidate,
    pairs: Vec<CandidatePair>,
    checklist_state: ChecklistState,
    connection_state: ConnectionState,
    txid_lru: usize,
}

fn random_alnum(rng: &mut impl Rng, len: usize) -> String {
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    (0..len)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}

impl Agent {
    /// Build a new agent with one gathered host candidate (spec §4.F.2).
    #[must_use]
    pub fn new(host_addr: SocketAddr, txid_lru: usize) -> Self {
        let mut rng = rand::thread_rng();
        let local_candidate = Candidate::host(host_addr, ICE_TYPE_PREF_HOST);
        Self {
            local_ufrag: random_alnum(&mut rng, 12),
            local_password: random_alnum(&mut rng, 24),
            remote_ufrag: None,
            remote_password: None,
            local_candidate,
            pairs: Vec::new(),
            checklist_state: ChecklistState::Running,
            connection_state: ConnectionState::New,
            txid_lru,
        }
    }

    /// Build with the spec's default transaction-id LRU bound.
    #[must_use]
    pub fn with_defaults(host_addr: SocketAddr) -> Self {
        Self::new(host_addr, DEFAULT_TXID_LRU)
    }

    /// The one host candidate this lite agent ever gathers.
    #[must_use]
    pub fn local_candidate(&self) -> Candidate {
        self.local_candidate
    }

    /// Set remote ICE credentials (from `AcceptAnswer`) and add the
    /// remote-offered candidates to the checklist.
    pub fn set_remote(&mut self, ufrag: String, password: String, remote_candidates: &[Candidate]) {
        self.remote_ufrag = Some(ufrag);
        self.remote_password = Some(password);
        for remote in remote_candidates {
            self.pairs
                .push(CandidatePair::new(self.local_candidate, *remote, self.txid_lru));
        }
    }

    fn expected_username(&self) -> Option<String> {
        self.remote_ufrag
            .as_ref()
            .map(|remote_ufrag| format!("{}:{}", self.local_ufrag, remote_ufrag))
    }

    fn find_pair_mut(&mut self, remote_addr: SocketAddr) -> Option<&mut CandidatePair> {
        self.pairs.iter_mut().find(|p| p.remote.addr == remote_addr)
    }

    /// Handle an inbound STUN Binding Request from `from`. On success,
    /// returns the signed response to send back and updates pair/connection
    /// state. Learns a peer-reflexive candidate if `from` is unknown.
    pub fn on_binding_request(
        &mut self,
        msg: &Message,
        raw: &[u8],
        from: SocketAddr,
    ) -> Result<Vec<u8>, IceError> {
        self.connection_state = match self.connection_state {
            ConnectionState::New => ConnectionState::Checking,
            other => other,
        };

        let expected_username = self.expected_username();
        let username = msg.username();
        if expected_username.is_none() || username != expected_username {
            return Err(IceError::ForeignUsername);
        }

        msg.verify_integrity(raw, self.local_password.as_bytes())
            .map_err(|_| IceError::IntegrityCheckFailed)?;
        msg.verify_fingerprint(raw)
            .map_err(|_| IceError::IntegrityCheckFailed)?;

        if self.find_pair_mut(from).is_none() {
            // Peer-reflexive candidate learned on first successful check
            // from an unknown address (spec §4.F.4).
            let priority = msg.priority().unwrap_or(0);
            let prflx = Candidate {
                addr: from,
                kind: CandidateKind::PeerReflexive,
                foundation: candidate::foundation(CandidateKind::PeerReflexive, from),
                component: 1,
                priority: candidate::candidate_priority(ICE_TYPE_PREF_PRFLX, priority, 1),
            };
            self.pairs
                .push(CandidatePair::new(self.local_candidate, prflx, self.txid_lru));
        }

        let use_candidate = msg.has_use_candidate();
        let txid = msg.transaction_id;
        let pair = self.find_pair_mut(from).expect("pair exists or was just inserted");
        pair.remember(txid);
        pair.last_recv = Some(Instant::now());
        pair.start_check();
        pair.succeed();
        if use_candidate {
            pair.nominated = true;
        }

        if self.pairs.iter().any(|p| p.nominated && p.state == PairState::Succeeded) {
            self.checklist_state = ChecklistState::Completed;
            self.connection_state = ConnectionState::Connected;
        }

        let mut response = Message::new(Class::SuccessResponse, stun::METHOD_BINDING, txid);
        response.push_xor_mapped_address(SocketAddrStun {
            ip: from.ip(),
            port: from.port(),
        });
        Ok(response.encode_signed(Some(self.local_password.as_bytes())))
    }

    /// Handle an error/timeout on a pair previously checked. Accepting
    /// 401/438 here (credential mismatch on retry) would be a no-op retry;
    /// anything else fails the pair.
    pub fn fail_pair(&mut self, remote_addr: SocketAddr) -> ChecklistState {
        if let Some(pair) = self.find_pair_mut(remote_addr) {
            pair.fail();
        }
        if !self.pairs.is_empty() && self.pairs.iter().all(|p| p.state == PairState::Failed) {
            self.checklist_state = ChecklistState::Failed;
            self.connection_state = ConnectionState::Failed;
        }
        self.checklist_state
    }

    /// Current overall ICE connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    /// Current checklist state.
    #[must_use]
    pub fn checklist_state(&self) -> ChecklistState {
        self.checklist_state
    }

    /// The nominated pair, once one exists.
    #[must_use]
    pub fn nominated_pair(&self) -> Option<&CandidatePair> {
        self.pairs.iter().find(|p| p.nominated && p.state == PairState::Succeeded)
    }

    /// Mark the agent closed.
    pub fn close(&mut self) {
        self.connection_state = ConnectionState::Closed;
    }

    /// True if `txid` was previously seen on the pair for `remote_addr`
    /// (used to match retransmitted requests to an in-flight check).
    #[must_use]
    pub fn pair_knows_txid(&self, remote_addr: SocketAddr, txid: &[u8; 12]) -> bool {
        self.pairs
            .iter()
            .find(|p| p.remote.addr == remote_addr)
            .is_some_and(|p| p.knows(txid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    #[test]
    fn pair_priority_matches_rfc8445_formula() {
        let g = 2_130_706_431u32;
        let d = 2_130_706_430u32;
        let expected = (1u64 << 32) * (d as u64).min(g as u64) + 2 * (d as u64).max(g as u64) + 1;
        assert_eq!(pair_priority(g, d, true), expected);
    }

    #[test]
    fn pair_priority_tiebreak_only_applies_when_controller_wins() {
        let g = 100u32;
        let d = 200u32;
        // controller priority g < d, so tiebreak should not add 1 even if requested.
        assert_eq!(pair_priority(g, d, true) % 2, 0);
    }

    #[test]
    fn binding_request_with_wrong_username_is_rejected() {
        let mut agent = Agent::with_defaults(addr(5000));
        agent.set_remote("remoteufrag".into(), "remotepwd012345678901".into(), &[]);

        let mut msg = Message::new(Class::Request, stun::METHOD_BINDING, [9u8; 12]);
        msg.push_attr(attr::USERNAME, b"wrong:username".to_vec());
        let raw = msg.encode_signed(Some(agent.local_password.as_bytes()));
        let reparsed = Message::decode(&raw).unwrap();

        let err = agent
            .on_binding_request(&reparsed, &raw, addr(6000))
            .unwrap_err();
        assert_eq!(err, IceError::ForeignUsername);
    }

    #[test]
    fn valid_binding_request_with_use_candidate_nominates_and_connects() {
        let mut agent = Agent::with_defaults(addr(5000));
        let remote = Candidate {
            addr: addr(6000),
            kind: CandidateKind::Host,
            foundation: 1,
            component: 1,
            priority: 1000,
        };
        agent.set_remote("remoteufrag".into(), "remotepwd012345678901".into(), &[remote]);

        let username = format!("{}:remoteufrag", agent.local_ufrag);
        let mut msg = Message::new(Class::Request, stun::METHOD_BINDING, [1u8; 12]);
        msg.push_attr(attr::USERNAME, username.into_bytes());
        msg.push_attr(attr::USE_CANDIDATE, vec![]);
        let raw = msg.encode_signed(Some(agent.local_password.as_bytes()));
        let reparsed = Message::decode(&raw).unwrap();

        let response_bytes = agent
            .on_binding_request(&reparsed, &raw, addr(6000))
            .expect("should succeed");
        let response = Message::decode(&response_bytes).unwrap();
        assert_eq!(response.class, Class::SuccessResponse);
        assert_eq!(agent.connection_state(), ConnectionState::Connected);
        assert_eq!(agent.checklist_state(), ChecklistState::Completed);
        assert!(agent.nominated_pair().is_some());
    }

    #[test]
    fn unknown_sender_is_learned_as_peer_reflexive() {
        let mut agent = Agent::with_defaults(addr(5000));
        agent.set_remote("remoteufrag".into(), "remotepwd012345678901".into(), &[]);

        let username = format!("{}:remoteufrag", agent.local_ufrag);
        let mut msg = Message::new(Class::Request, stun::METHOD_BINDING, [2u8; 12]);
        msg.push_attr(attr::USERNAME, username.into_bytes());
        msg.push_attr(attr::PRIORITY, 555u32.to_be_bytes().to_vec());
        let raw = msg.encode_signed(Some(agent.local_password.as_bytes()));
        let reparsed = Message::decode(&raw).unwrap();

        agent
            .on_binding_request(&reparsed, &raw, addr(7000))
            .expect("should succeed and learn prflx");
        assert_eq!(agent.pairs.len(), 1);
        assert_eq!(agent.pairs[0].remote.kind, CandidateKind::PeerReflexive);
    }

    #[test]
    fn all_pairs_failing_fails_the_checklist() {
        let mut agent = Agent::with_defaults(addr(5000));
        let remote = Candidate {
            addr: addr(6000),
            kind: CandidateKind::Host,
            foundation: 1,
            component: 1,
            priority: 1000,
        };
        agent.set_remote("r".into(), "p".repeat(22), &[remote]);
        let state = agent.fail_pair(addr(6000));
        assert_eq!(state, ChecklistState::Failed);
        assert_eq!(agent.connection_state(), ConnectionState::Failed);
    }
}
