//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use common::files::Table;
use common::timer;
use common::vectors;
use crypto::dhcipher::is_group_element;
use crypto::prelude::*;
use crypto::prime::derive_modulus;
use num_traits::Zero;

use super::artifact::hash_to_hex;
use super::BlindedSet;
use super::CrossBlinded;
use super::MatchedExtract;
use super::ProtocolError;
use crate::fileio::RecordSource;
use crate::psi_dh::traits::PsiPartyProtocol;

/// Prefix of the partner's columns in the joined output
pub const PARTNER_PREFIX: &str = "partner_";

/// Round state of one party for one match request.
///
/// Holds the private exponent and the shared modulus. The own blinded
/// values are computed once and kept for round 3.
pub struct PartyPsi {
    modulus: BigUint,
    exponent: PrivateExponent,
    cipher: DHEngine,
    source: Arc<RecordSource>,
    /// `h^a` per record, in `source.records` order
    blinded: Arc<RwLock<Vec<BigUint>>>,
}

impl PartyPsi {
    /// Derives the modulus from `request_id`
    pub fn new(
        request_id: &str,
        exponent: PrivateExponent,
        source: Arc<RecordSource>,
    ) -> Result<PartyPsi, ProtocolError> {
        PartyPsi::with_modulus(derive_modulus(request_id.as_bytes()), exponent, source)
    }

    pub fn with_modulus(
        modulus: BigUint,
        exponent: PrivateExponent,
        source: Arc<RecordSource>,
    ) -> Result<PartyPsi, ProtocolError> {
        if !exponent.is_valid_for(&modulus) {
            return Err(ProtocolError::InvalidExponent);
        }
        Ok(PartyPsi {
            modulus,
            exponent,
            cipher: DHEngine::default(),
            source,
            blinded: Arc::new(RwLock::default()),
        })
    }

    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    pub fn input_size(&self) -> usize {
        self.source.len()
    }

    fn own_blinded(&self) -> Result<Vec<BigUint>, ProtocolError> {
        {
            let cached = self
                .blinded
                .read()
                .map_err(|e| ProtocolError::Internal(e.to_string()))?;
            if !cached.is_empty() || self.source.is_empty() {
                return Ok(cached.clone());
            }
        }
        let t = timer::Timer::new_silent("own_blinded");
        let values = self
            .cipher
            .blind(&self.source.hashes(), &self.exponent, &self.modulus);
        t.qps("blind", values.len());
        let mut w = self
            .blinded
            .write()
            .map_err(|e| ProtocolError::Internal(e.to_string()))?;
        *w = values.clone();
        Ok(values)
    }

    fn check_elements(&self, values: &[BigUint], what: &str) -> Result<(), ProtocolError> {
        match values.iter().find(|v| !is_group_element(v, &self.modulus)) {
            Some(v) => Err(ProtocolError::Malformed(format!(
                "{} contains {} which is outside the group",
                what,
                v.to_str_radix(16)
            ))),
            None => Ok(()),
        }
    }
}

impl PsiPartyProtocol for PartyPsi {
    fn round1(&self) -> Result<BlindedSet, ProtocolError> {
        let values = self.own_blinded()?;
        let set = BlindedSet::new(values);
        if set.len() != self.source.len() {
            warn!(
                "{} records collapsed to {} blinded values",
                self.source.len(),
                set.len()
            );
        }
        Ok(set)
    }

    fn round2(&self, partner_round1: &BlindedSet) -> Result<CrossBlinded, ProtocolError> {
        self.check_elements(partner_round1.values(), "partner round 1")?;
        let t = timer::Timer::new_silent("round2");
        let pairs =
            self.cipher
                .blind_pairs(partner_round1.values(), &self.exponent, &self.modulus);
        t.qps("cross blind", pairs.len());
        Ok(CrossBlinded::new(pairs))
    }

    fn round3(
        &self,
        own_round2: &CrossBlinded,
        partner_round2: &CrossBlinded,
    ) -> Result<MatchedExtract, ProtocolError> {
        let t = timer::Timer::new_silent("round3");
        let own_c = self.own_blinded()?;
        let partner_map = partner_round2
            .pairs()
            .iter()
            .map(|(c, k)| (c, k))
            .collect::<HashMap<&BigUint, &BigUint>>();

        let partner_keys = partner_map.keys().map(|c| (*c).clone()).collect::<Vec<_>>();
        let covered = vectors::count_covered(&own_c, &partner_keys);

        // zero is never a group element, so rows the partner did not
        // process never match
        let received = own_c
            .iter()
            .map(|c| {
                partner_map
                    .get(c)
                    .map(|k| (*k).clone())
                    .unwrap_or_else(BigUint::zero)
            })
            .collect::<Vec<BigUint>>();
        let local = own_round2.doubly_blinded();
        let mask = vectors::vec_intersection_mask(&received, &local);
        let matched = vectors::apply_mask(&mask, &self.source.records);
        t.qps("intersection", own_c.len());

        if !own_c.is_empty() && covered * 2 < own_c.len() {
            warn!(
                "Partner round 2 covers only {} of {} own values, check that both parties use the same request",
                covered,
                own_c.len()
            );
        }
        if matched.is_empty() && !own_c.is_empty() && !local.is_empty() {
            warn!(
                "Empty intersection for {} own and {} partner records, verify identifier columns and normalization on both sides",
                own_c.len(),
                local.len()
            );
        }
        info!(
            "Round 3 matched {} of {} own records",
            matched.len(),
            own_c.len()
        );

        MatchedExtract::new(
            self.source.publish_columns.clone(),
            matched
                .into_iter()
                .map(|r| (r.record_hash, r.values))
                .collect(),
        )
    }

    fn round4(
        &self,
        own_round3: &MatchedExtract,
        partner_round3: &MatchedExtract,
    ) -> Result<Table, ProtocolError> {
        Ok(join_extracts(own_round3, partner_round3))
    }
}

/// Inner join of two round 3 extracts on the record hash.
///
/// Output header is `record_hash`, own columns, then partner columns with
/// the `partner_` prefix. Rows are sorted by hash.
pub fn join_extracts(own: &MatchedExtract, partner: &MatchedExtract) -> Table {
    let t = timer::Timer::new_silent("round4");
    let partner_rows = partner
        .rows()
        .iter()
        .map(|(h, v)| (h, v))
        .collect::<HashMap<&BigUint, &Vec<String>>>();

    let mut headers = Vec::with_capacity(1 + own.columns().len() + partner.columns().len());
    headers.push("record_hash".to_string());
    headers.extend(own.columns().iter().cloned());
    headers.extend(
        partner
            .columns()
            .iter()
            .map(|c| format!("{}{}", PARTNER_PREFIX, c)),
    );

    let rows = own
        .rows()
        .iter()
        .filter_map(|(h, own_values)| {
            partner_rows.get(h).map(|partner_values| {
                let mut row = Vec::with_capacity(headers.len());
                row.push(hash_to_hex(h));
                row.extend(own_values.iter().cloned());
                row.extend(partner_values.iter().cloned());
                row
            })
        })
        .collect::<Vec<Vec<String>>>();
    t.qps("join", rows.len());

    if rows.len() != own.len() || rows.len() != partner.len() {
        warn!(
            "Join kept {} rows from extracts of {} and {} rows",
            rows.len(),
            own.len(),
            partner.len()
        );
    }
    Table { headers, rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileio::derive_hash;
    use crate::fileio::IdentifierRecord;
    use crypto::dhcipher::gen_exponent;

    fn source(ids: &[&str]) -> Arc<RecordSource> {
        let mut records = ids
            .iter()
            .map(|id| IdentifierRecord {
                record_hash: derive_hash(&[*id]),
                values: vec![format!("value_{}", id)],
            })
            .collect::<Vec<_>>();
        records.sort_by(|a, b| a.record_hash.cmp(&b.record_hash));
        Arc::new(RecordSource {
            id_columns: vec!["id".to_string()],
            publish_columns: vec!["label".to_string()],
            records,
        })
    }

    fn parties(a: &[&str], b: &[&str]) -> (PartyPsi, PartyPsi) {
        let p = derive_modulus(b"party-tests");
        let pa = PartyPsi::with_modulus(p.clone(), gen_exponent(&p), source(a)).unwrap();
        let pb = PartyPsi::with_modulus(p.clone(), gen_exponent(&p), source(b)).unwrap();
        (pa, pb)
    }

    fn run(a: &PartyPsi, b: &PartyPsi) -> (MatchedExtract, MatchedExtract, Table, Table) {
        let a1 = a.round1().unwrap();
        let b1 = b.round1().unwrap();
        let a2 = a.round2(&b1).unwrap();
        let b2 = b.round2(&a1).unwrap();
        let a3 = a.round3(&a2, &b2).unwrap();
        let b3 = b.round3(&b2, &a2).unwrap();
        let a4 = a.round4(&a3, &b3).unwrap();
        let b4 = b.round4(&b3, &a3).unwrap();
        (a3, b3, a4, b4)
    }

    #[test]
    fn test_concrete_scenario() {
        let (a, b) = parties(&["x1", "x2"], &["x2", "x3"]);
        let a1 = a.round1().unwrap();
        let b1 = b.round1().unwrap();
        assert_eq!((a1.len(), b1.len()), (2, 2));
        let a2 = a.round2(&b1).unwrap();
        let b2 = b.round2(&a1).unwrap();
        assert_eq!((a2.len(), b2.len()), (2, 2));
        let common = vectors::count_covered(&a2.doubly_blinded(), &b2.doubly_blinded());
        assert_eq!(common, 1);

        let a3 = a.round3(&a2, &b2).unwrap();
        let b3 = b.round3(&b2, &a2).unwrap();
        assert_eq!(a3.len(), 1);
        assert_eq!(b3.len(), 1);
        assert_eq!(a3.rows()[0].0, derive_hash(&["x2"]));

        let joined = a.round4(&a3, &b3).unwrap();
        assert_eq!(joined.headers, vec!["record_hash", "label", "partner_label"]);
        assert_eq!(
            joined.rows,
            vec![vec![
                hash_to_hex(&derive_hash(&["x2"])),
                "value_x2".to_string(),
                "value_x2".to_string()
            ]]
        );
    }

    #[test]
    fn test_no_false_positives() {
        for _ in 0..3 {
            let (a, b) = parties(&["a", "b", "c", "d"], &["c", "d", "e", "f", "g"]);
            let (a3, b3, a4, b4) = run(&a, &b);
            let expected = {
                let mut v = vec![derive_hash(&["c"]), derive_hash(&["d"])];
                v.sort();
                v
            };
            let got_a = a3.rows().iter().map(|r| r.0.clone()).collect::<Vec<_>>();
            let got_b = b3.rows().iter().map(|r| r.0.clone()).collect::<Vec<_>>();
            assert_eq!(got_a, expected);
            assert_eq!(got_b, expected);
            assert_eq!(a4.rows.len(), 2);
            assert_eq!(b4.rows.len(), 2);
        }
    }

    #[test]
    fn test_disjoint_sets() {
        let (a, b) = parties(&["a", "b"], &["c"]);
        let (a3, b3, a4, _) = run(&a, &b);
        assert!(a3.is_empty());
        assert!(b3.is_empty());
        assert!(a4.rows.is_empty());
    }

    #[test]
    fn test_rounds_are_deterministic() {
        let (a, b) = parties(&["x1", "x2"], &["x2", "x3"]);
        let a1 = a.round1().unwrap();
        let b1 = b.round1().unwrap();
        assert_eq!(a1.to_bytes().unwrap(), a.round1().unwrap().to_bytes().unwrap());
        assert_eq!(
            a.round2(&b1).unwrap().to_bytes().unwrap(),
            a.round2(&b1).unwrap().to_bytes().unwrap()
        );
        let a2 = a.round2(&b1).unwrap();
        let b2 = b.round2(&a1).unwrap();
        assert_eq!(
            a.round3(&a2, &b2).unwrap().to_bytes().unwrap(),
            a.round3(&a2, &b2).unwrap().to_bytes().unwrap()
        );
    }

    #[test]
    fn test_modulus_mismatch_gives_empty_intersection() {
        let pa = derive_modulus(b"one");
        let pb = derive_modulus(b"two");
        let a = PartyPsi::with_modulus(pa.clone(), gen_exponent(&pa), source(&["x"])).unwrap();
        let b = PartyPsi::with_modulus(pb.clone(), gen_exponent(&pb), source(&["x"])).unwrap();
        let a1 = a.round1().unwrap();
        let b1 = b.round1().unwrap();
        // values may fall outside the smaller group, either way nothing matches
        let (a2, b2) = match (a.round2(&b1), b.round2(&a1)) {
            (Ok(a2), Ok(b2)) => (a2, b2),
            _ => return,
        };
        assert!(a.round3(&a2, &b2).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_out_of_group_values() {
        let (a, _) = parties(&["x"], &[]);
        let bad = BlindedSet::new(vec![BigUint::from(1u32)]);
        assert!(matches!(a.round2(&bad), Err(ProtocolError::Malformed(_))));
        let too_big = BlindedSet::new(vec![a.modulus().clone()]);
        assert!(a.round2(&too_big).is_err());
    }

    #[test]
    fn test_invalid_exponent() {
        let p = derive_modulus(b"x");
        let e = PrivateExponent::from_biguint(BigUint::from(1u32));
        assert!(matches!(
            PartyPsi::with_modulus(p, e, source(&["x"])),
            Err(ProtocolError::InvalidExponent)
        ));
    }

    #[test]
    fn test_empty_source() {
        let (a, b) = parties(&[], &["x"]);
        let (a3, b3, _, _) = run(&a, &b);
        assert!(a3.is_empty());
        assert!(b3.is_empty());
    }
}
