//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use common::files::Table;

use crate::psi_dh::BlindedSet;
use crate::psi_dh::CrossBlinded;
use crate::psi_dh::MatchedExtract;
use crate::psi_dh::ProtocolError;

/// The four computations one party performs. No I/O.
pub trait PsiPartyProtocol {
    /// Blinds every own record hash with the own exponent
    fn round1(&self) -> Result<BlindedSet, ProtocolError>;

    /// Applies the own exponent to the partner's round 1 values
    fn round2(&self, partner_round1: &BlindedSet) -> Result<CrossBlinded, ProtocolError>;

    /// Extracts own rows whose doubly blinded value, as computed by the
    /// partner, is also in the own round 2 output
    fn round3(
        &self,
        own_round2: &CrossBlinded,
        partner_round2: &CrossBlinded,
    ) -> Result<MatchedExtract, ProtocolError>;

    /// Inner join of both extracts on the record hash
    fn round4(
        &self,
        own_round3: &MatchedExtract,
        partner_round3: &MatchedExtract,
    ) -> Result<Table, ProtocolError>;
}
