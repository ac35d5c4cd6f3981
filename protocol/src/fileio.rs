//  Copyright (c) Facebook, Inc. and its affiliates.
//   SPDX-License-Identifier: Apache-2.0

extern crate common;
extern crate crypto;

use std::path::Path;

use common::files;
use common::files::Table;
use common::timer;
use num_bigint::BigUint;
use sha2::Digest;
use sha2::Sha256;

use crate::psi_dh::ProtocolError;

/// Joins normalized identifier fields before hashing. Never part of the input.
pub const ID_SEPARATOR: char = '\u{1f}';

/// Normalizes one identifier field: trimmed and lowercased
pub fn normalize_field(field: &str) -> String {
    field.trim().to_lowercase()
}

/// SHA-256 over the normalized identifier fields, read as a 256-bit integer.
///
/// ```
/// use protocol::fileio::derive_hash;
///
/// assert_eq!(derive_hash(&[" X2 "]), derive_hash(&["x2"]));
/// assert_ne!(derive_hash(&["a", "bc"]), derive_hash(&["ab", "c"]));
/// ```
pub fn derive_hash<S: AsRef<str>>(fields: &[S]) -> BigUint {
    let joined = fields
        .iter()
        .map(|f| normalize_field(f.as_ref()))
        .collect::<Vec<String>>()
        .join(&ID_SEPARATOR.to_string());
    BigUint::from_bytes_be(&Sha256::digest(joined.as_bytes()))
}

/// One input row, keyed by the hash of its identifier columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierRecord {
    pub record_hash: BigUint,
    /// Values of the publishable columns, in `RecordSource::publish_columns` order
    pub values: Vec<String>,
}

/// A party's dataset restricted to what the protocol needs.
///
/// Records are sorted by hash and unique per hash. Rebuilt from the input
/// file whenever a session needs it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSource {
    pub id_columns: Vec<String>,
    pub publish_columns: Vec<String>,
    pub records: Vec<IdentifierRecord>,
}

impl RecordSource {
    /// Loads a headered CSV file
    pub fn load<T>(
        path: T,
        id_columns: &[String],
        publish_columns: &[String],
    ) -> Result<RecordSource, ProtocolError>
    where
        T: AsRef<Path>,
    {
        let t = timer::Timer::new_silent("load_records");
        let table = files::read_csv_with_headers(path.as_ref())?;
        t.qps("read csv", table.rows.len());
        let source = RecordSource::from_table(&table, id_columns, publish_columns)?;
        t.qps("derive hashes", source.len());
        info!(
            "Loaded {} records from {}, id columns {:?}, publishable {:?}",
            source.len(),
            path.as_ref().display(),
            source.id_columns,
            source.publish_columns
        );
        Ok(source)
    }

    pub fn from_table(
        table: &Table,
        id_columns: &[String],
        publish_columns: &[String],
    ) -> Result<RecordSource, ProtocolError> {
        if id_columns.is_empty() {
            return Err(ProtocolError::MissingColumn(
                "at least one identifier column is required".to_string(),
            ));
        }
        let resolve = |cols: &[String]| {
            cols.iter()
                .map(|c| {
                    table
                        .column_index(c)
                        .ok_or_else(|| ProtocolError::MissingColumn(c.clone()))
                })
                .collect::<Result<Vec<usize>, ProtocolError>>()
        };
        let id_idx = resolve(id_columns)?;
        let publish_idx = resolve(publish_columns)?;

        let mut records = Vec::with_capacity(table.rows.len());
        let mut blank = 0;
        for row in table.rows.iter() {
            let fields = id_idx.iter().map(|i| row[*i].as_str()).collect::<Vec<&str>>();
            if fields.iter().all(|f| f.trim().is_empty()) {
                blank += 1;
                continue;
            }
            if fields.iter().any(|f| f.contains(ID_SEPARATOR)) {
                return Err(ProtocolError::Malformed(
                    "identifier field contains the unit separator".to_string(),
                ));
            }
            records.push(IdentifierRecord {
                record_hash: derive_hash(&fields),
                values: publish_idx.iter().map(|i| row[*i].clone()).collect(),
            });
        }
        if blank > 0 {
            warn!("Skipped {} rows with empty identifier columns", blank);
        }

        let dropped = common::vectors::dedup_by_key(&mut records, |r| r.record_hash.clone());
        if dropped > 0 {
            info!("Dropped {} rows with a repeated identifier", dropped);
        }

        Ok(RecordSource {
            id_columns: id_columns.to_vec(),
            publish_columns: publish_idx
                .iter()
                .map(|i| table.headers[*i].clone())
                .collect(),
            records,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn hashes(&self) -> Vec<BigUint> {
        self.records.iter().map(|r| r.record_hash.clone()).collect()
    }
}

/// Splits a comma separated column list, dropping empty entries
pub fn parse_column_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}
