//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

//! Diffie-Hellman private set intersection in four rounds.
//!
//! Both parties share a prime `p` derived from the request id and each holds
//! a private exponent. Round 1 publishes `h^a`, round 2 publishes the pairs
//! `(c, c^b)` for every value `c` received from the partner, round 3 keeps
//! the rows whose doubly blinded value appears in both parties' round 2
//! output and publishes them, round 4 joins the two extracts on the hash.

use thiserror::Error;

use common::files::FileError;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("expected a round {expected} payload, got round {found}")]
    WrongRound { expected: u8, found: u8 },
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("column {0} not found in input header")]
    MissingColumn(String),
    #[error("private exponent is not valid for the shared modulus")]
    InvalidExponent,
    #[error("input error: {0}")]
    Input(#[from] FileError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProtocolError {
    /// True when the error comes from the partner's payload
    pub fn is_partner_fault(&self) -> bool {
        matches!(
            self,
            ProtocolError::Malformed(_) | ProtocolError::WrongRound { .. }
        )
    }
}

pub mod artifact;
pub mod party;
pub mod traits;

pub use artifact::BlindedSet;
pub use artifact::CrossBlinded;
pub use artifact::MatchedExtract;
pub use party::join_extracts;
pub use party::PartyPsi;
pub use traits::PsiPartyProtocol;
