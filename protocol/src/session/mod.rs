//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

//! Per-request protocol state: the durable match request record, the
//! session state machine and the stores it resumes from.

use std::fmt;

use common::blob::BlobError;
use common::blob::ContentId;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

use crate::psi_dh::ProtocolError;

pub mod memory;
pub mod orchestrator;
pub mod traits;

/// Rounds whose output is published and recorded on the server
pub const PUBLISHED_ROUNDS: u8 = 3;
/// The last round, which only produces a local file
pub const FINAL_ROUND: u8 = 4;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Not an error for the request, it stays parked
    #[error("not ready: {0}")]
    NotReady(String),
    #[error("blob exchange failure: {0}")]
    Exchange(#[from] BlobError),
    #[error("integrity violation: {0}")]
    Integrity(String),
    #[error("malformed partner payload: {0}")]
    Malformed(String),
    #[error("protocol error: {0}")]
    Protocol(ProtocolError),
    #[error("state store error: {0}")]
    Store(String),
    #[error("local cache error: {0}")]
    Cache(String),
}

impl From<ProtocolError> for SessionError {
    fn from(e: ProtocolError) -> SessionError {
        if e.is_partner_fault() {
            SessionError::Malformed(e.to_string())
        } else {
            SessionError::Protocol(e)
        }
    }
}

impl SessionError {
    /// Stable short name used on the control channel
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::NotReady(_) => "NotReady",
            SessionError::Exchange(_) => "ExchangeFailure",
            SessionError::Integrity(_) => "IntegrityViolation",
            SessionError::Malformed(_) => "Malformed",
            SessionError::Protocol(_) => "Protocol",
            SessionError::Store(_) => "Store",
            SessionError::Cache(_) => "Cache",
        }
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, SessionError::NotReady(_))
    }
}

/// Position of one party within one match request.
///
/// `AwaitingPartnerRound(k)`: own round `k` is recorded, partner round `k`
/// is not known yet. `RoundReady(k)`: inputs of round `k` (k >= 2) are
/// available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    AwaitingRequest,
    Round1Pending,
    AwaitingPartnerRound(u8),
    RoundReady(u8),
    Completed,
    Failed(String),
}

impl SessionState {
    /// The round this state would execute next, if any
    pub fn runnable_round(&self) -> Option<u8> {
        match self {
            SessionState::Round1Pending => Some(1),
            SessionState::RoundReady(k) => Some(*k),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::AwaitingRequest => write!(f, "awaiting confirmation"),
            SessionState::Round1Pending => write!(f, "round 1 pending"),
            SessionState::AwaitingPartnerRound(k) => {
                write!(f, "waiting for partner round {}", k)
            }
            SessionState::RoundReady(k) => write!(f, "round {} ready", k),
            SessionState::Completed => write!(f, "completed"),
            SessionState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartyRole {
    A,
    B,
}

impl PartyRole {
    pub fn other(self) -> PartyRole {
        match self {
            PartyRole::A => PartyRole::B,
            PartyRole::B => PartyRole::A,
        }
    }
}

/// What happened to the partner notification after recording content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalOutcome {
    /// Enqueued on the partner's live connection
    Delivered,
    /// Partner offline, it resumes from the stored row on next login
    Stored,
}

/// Deterministic request id for a pair of identities, independent of order
pub fn request_id_for(x: &str, y: &str) -> String {
    let (lo, hi) = if x <= y { (x, y) } else { (y, x) };
    let mut hasher = Sha256::new();
    hasher.update(lo.as_bytes());
    hasher.update([0u8]);
    hasher.update(hi.as_bytes());
    hex::encode(hasher.finalize())
}

/// Durable record of one pairwise matching attempt.
///
/// `party_a` is the lexicographically smaller identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub request_id: String,
    pub party_a: String,
    pub party_b: String,
    pub confirmed_a: bool,
    pub confirmed_b: bool,
    pub cid_a: [Option<ContentId>; 3],
    pub cid_b: [Option<ContentId>; 3],
}

impl MatchRequest {
    pub fn new(x: &str, y: &str) -> Result<MatchRequest, SessionError> {
        if x == y {
            return Err(SessionError::Integrity(format!(
                "{} cannot match with itself",
                x
            )));
        }
        let (a, b) = if x < y { (x, y) } else { (y, x) };
        Ok(MatchRequest {
            request_id: request_id_for(a, b),
            party_a: a.to_string(),
            party_b: b.to_string(),
            confirmed_a: false,
            confirmed_b: false,
            cid_a: Default::default(),
            cid_b: Default::default(),
        })
    }

    pub fn role_of(&self, party: &str) -> Option<PartyRole> {
        if party == self.party_a {
            Some(PartyRole::A)
        } else if party == self.party_b {
            Some(PartyRole::B)
        } else {
            None
        }
    }

    /// Role of `party`, or an integrity violation when it is not part of the request
    pub fn require_role(&self, party: &str) -> Result<PartyRole, SessionError> {
        self.role_of(party).ok_or_else(|| {
            SessionError::Integrity(format!(
                "{} is not part of request {}",
                party, self.request_id
            ))
        })
    }

    pub fn party(&self, role: PartyRole) -> &str {
        match role {
            PartyRole::A => &self.party_a,
            PartyRole::B => &self.party_b,
        }
    }

    pub fn both_confirmed(&self) -> bool {
        self.confirmed_a && self.confirmed_b
    }

    pub fn confirm(&mut self, role: PartyRole) {
        match role {
            PartyRole::A => self.confirmed_a = true,
            PartyRole::B => self.confirmed_b = true,
        }
    }

    pub fn cids(&self, role: PartyRole) -> &[Option<ContentId>; 3] {
        match role {
            PartyRole::A => &self.cid_a,
            PartyRole::B => &self.cid_b,
        }
    }

    /// Content id of `round` (1..=3) published by `role`
    pub fn cid(&self, role: PartyRole, round: u8) -> Option<&ContentId> {
        if round == 0 || round > PUBLISHED_ROUNDS {
            return None;
        }
        self.cids(role)[(round - 1) as usize].as_ref()
    }

    /// Number of consecutive rounds recorded for `role`, starting at round 1
    pub fn progress(&self, role: PartyRole) -> u8 {
        self.cids(role).iter().take_while(|c| c.is_some()).count() as u8
    }

    /// Next round `role` can run with the inputs on record
    pub fn next_runnable_round(&self, role: PartyRole) -> Option<u8> {
        if !self.both_confirmed() {
            return None;
        }
        let own = self.progress(role);
        let partner = self.progress(role.other());
        if own == 0 {
            Some(1)
        } else if partner >= own {
            Some(own + 1)
        } else {
            None
        }
    }

    /// Records a round content id for `party`.
    ///
    /// Returns `true` when the id is new, `false` when the same id was
    /// already recorded. Mutates nothing on error.
    pub fn record_content(
        &mut self,
        party: &str,
        round: u8,
        cid: &ContentId,
    ) -> Result<bool, SessionError> {
        let role = self.require_role(party)?;
        if !self.both_confirmed() {
            return Err(SessionError::NotReady(format!(
                "request {} is not confirmed by both parties",
                self.request_id
            )));
        }
        if round == 0 || round > PUBLISHED_ROUNDS {
            return Err(SessionError::Integrity(format!(
                "round {} has no published content",
                round
            )));
        }
        if let Some(existing) = self.cid(role, round) {
            if existing == cid {
                return Ok(false);
            }
            return Err(SessionError::Integrity(format!(
                "round {} of {} is already recorded as {}",
                round, party, existing
            )));
        }
        if round > 1 && self.cid(role, round - 1).is_none() {
            return Err(SessionError::NotReady(format!(
                "round {} of {} is not recorded yet",
                round - 1,
                party
            )));
        }
        let slot = match role {
            PartyRole::A => &mut self.cid_a,
            PartyRole::B => &mut self.cid_b,
        };
        slot[(round - 1) as usize] = Some(cid.clone());
        Ok(true)
    }
}
