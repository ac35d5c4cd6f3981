//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

//! JSON encoding of the round payloads exchanged through the blob store.
//!
//! Group elements are lowercase hex strings. Every document carries its
//! round number and collections are sorted, so equal inputs give equal bytes.

use num_bigint::BigUint;
use serde::Deserialize;
use serde::Serialize;

use super::ProtocolError;

fn to_hex(v: &BigUint) -> String {
    v.to_str_radix(16)
}

fn from_hex(s: &str) -> Result<BigUint, ProtocolError> {
    BigUint::parse_bytes(s.as_bytes(), 16)
        .ok_or_else(|| ProtocolError::Malformed(format!("not a hex integer: {:?}", s)))
}

#[derive(Deserialize)]
struct RoundTag {
    round: u8,
}

fn check_round(bytes: &[u8], expected: u8) -> Result<(), ProtocolError> {
    let tag: RoundTag =
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    if tag.round != expected {
        return Err(ProtocolError::WrongRound {
            expected,
            found: tag.round,
        });
    }
    Ok(())
}

fn encode<T: Serialize>(doc: &T) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(doc).map_err(|e| ProtocolError::Serialization(e.to_string()))
}

fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8], round: u8) -> Result<T, ProtocolError> {
    check_round(bytes, round)?;
    serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

#[derive(Serialize, Deserialize)]
struct Round1Doc {
    round: u8,
    values: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct Round2Doc {
    round: u8,
    pairs: Vec<(String, String)>,
}

#[derive(Serialize, Deserialize)]
struct Round3Row {
    hash: String,
    values: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct Round3Doc {
    round: u8,
    columns: Vec<String>,
    rows: Vec<Round3Row>,
}

/// Round 1 output: `h^a mod p` for every own row, sorted and deduplicated
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlindedSet {
    values: Vec<BigUint>,
}

impl BlindedSet {
    pub fn new(mut values: Vec<BigUint>) -> BlindedSet {
        common::vectors::dedup_unstable(&mut values, true);
        BlindedSet { values }
    }

    pub fn values(&self) -> &[BigUint] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(&Round1Doc {
            round: 1,
            values: self.values.iter().map(to_hex).collect(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<BlindedSet, ProtocolError> {
        let doc: Round1Doc = decode(bytes, 1)?;
        let values = doc
            .values
            .iter()
            .map(|s| from_hex(s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BlindedSet::new(values))
    }
}

/// Round 2 output: `(received, received^own_exponent)` for every value
/// received from the partner in round 1, sorted by the received value.
///
/// Keyed by the received value so the partner recovers `h^(ab)` for each of
/// its rows regardless of ordering.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CrossBlinded {
    pairs: Vec<(BigUint, BigUint)>,
}

impl CrossBlinded {
    pub fn new(mut pairs: Vec<(BigUint, BigUint)>) -> CrossBlinded {
        common::vectors::dedup_unstable(&mut pairs, true);
        CrossBlinded { pairs }
    }

    pub fn pairs(&self) -> &[(BigUint, BigUint)] {
        &self.pairs
    }

    /// Second components, the doubly blinded values
    pub fn doubly_blinded(&self) -> Vec<BigUint> {
        self.pairs.iter().map(|(_, k)| k.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(&Round2Doc {
            round: 2,
            pairs: self
                .pairs
                .iter()
                .map(|(c, k)| (to_hex(c), to_hex(k)))
                .collect(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<CrossBlinded, ProtocolError> {
        let doc: Round2Doc = decode(bytes, 2)?;
        let pairs = doc
            .pairs
            .iter()
            .map(|(c, k)| Ok((from_hex(c)?, from_hex(k)?)))
            .collect::<Result<Vec<_>, ProtocolError>>()?;
        Ok(CrossBlinded::new(pairs))
    }
}

/// Round 3 output: the matched rows, record hash plus publishable columns
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchedExtract {
    columns: Vec<String>,
    rows: Vec<(BigUint, Vec<String>)>,
}

impl MatchedExtract {
    pub fn new(
        columns: Vec<String>,
        mut rows: Vec<(BigUint, Vec<String>)>,
    ) -> Result<MatchedExtract, ProtocolError> {
        if let Some((h, r)) = rows.iter().find(|(_, r)| r.len() != columns.len()) {
            return Err(ProtocolError::Malformed(format!(
                "row {} has {} values for {} columns",
                to_hex(h),
                r.len(),
                columns.len()
            )));
        }
        common::vectors::dedup_by_key(&mut rows, |(h, _)| h.clone());
        Ok(MatchedExtract { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[(BigUint, Vec<String>)] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(&Round3Doc {
            round: 3,
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .map(|(h, values)| Round3Row {
                    hash: to_hex(h),
                    values: values.clone(),
                })
                .collect(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<MatchedExtract, ProtocolError> {
        let doc: Round3Doc = decode(bytes, 3)?;
        let rows = doc
            .rows
            .into_iter()
            .map(|r| Ok((from_hex(&r.hash)?, r.values)))
            .collect::<Result<Vec<_>, ProtocolError>>()?;
        MatchedExtract::new(doc.columns, rows)
    }
}

/// Hex form of a record hash as it appears in the joined output
pub fn hash_to_hex(h: &BigUint) -> String {
    to_hex(h)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big(v: u64) -> BigUint {
        BigUint::from(v)
    }

    #[test]
    fn test_blinded_set_sorted_and_stable() {
        let a = BlindedSet::new(vec![big(30), big(10), big(20), big(10)]);
        let b = BlindedSet::new(vec![big(20), big(30), big(10)]);
        assert_eq!(a.values(), &[big(10), big(20), big(30)]);
        assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
        assert_eq!(
            String::from_utf8(a.to_bytes().unwrap()).unwrap(),
            "{\"round\":1,\"values\":[\"a\",\"14\",\"1e\"]}"
        );
        assert_eq!(BlindedSet::from_bytes(&a.to_bytes().unwrap()).unwrap(), a);
    }

    #[test]
    fn test_round_tag_checked() {
        let a = BlindedSet::new(vec![big(2)]);
        match CrossBlinded::from_bytes(&a.to_bytes().unwrap()) {
            Err(ProtocolError::WrongRound { expected, found }) => {
                assert_eq!((expected, found), (2, 1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(
            BlindedSet::from_bytes(b"not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            BlindedSet::from_bytes(b"{\"round\":1,\"values\":[\"zz\"]}"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            CrossBlinded::from_bytes(b"{\"round\":2}"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_cross_blinded_encoding() {
        let c = CrossBlinded::new(vec![(big(5), big(6)), (big(3), big(4))]);
        assert_eq!(c.doubly_blinded(), vec![big(4), big(6)]);
        assert_eq!(
            String::from_utf8(c.to_bytes().unwrap()).unwrap(),
            "{\"round\":2,\"pairs\":[[\"3\",\"4\"],[\"5\",\"6\"]]}"
        );
        assert_eq!(CrossBlinded::from_bytes(&c.to_bytes().unwrap()).unwrap(), c);
    }

    #[test]
    fn test_extract_shape_checked() {
        let cols = vec!["name".to_string()];
        assert!(MatchedExtract::new(cols.clone(), vec![(big(1), vec![])]).is_err());
        let e = MatchedExtract::new(
            cols,
            vec![
                (big(9), vec!["z".to_string()]),
                (big(7), vec!["y".to_string()]),
            ],
        )
        .unwrap();
        assert_eq!(e.rows()[0].0, big(7));
        let back = MatchedExtract::from_bytes(&e.to_bytes().unwrap()).unwrap();
        assert_eq!(back, e);
    }
}
