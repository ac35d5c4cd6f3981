//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

extern crate csv;

use std::path::Path;

use rayon::prelude::ParallelSliceMut;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("csv error in {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} has no header row")]
    MissingHeader(String),
    #[error("row {row} has {found} fields, header has {expected}")]
    RaggedRow {
        row: usize,
        found: usize,
        expected: usize,
    },
}

fn csv_err<T: AsRef<Path>>(path: T) -> impl FnOnce(csv::Error) -> FileError {
    let path = path.as_ref().display().to_string();
    move |source| FileError::Csv { path, source }
}

/// A parsed CSV file: header names plus rows of trimmed strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Position of a column by name, case-insensitive
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let name = name.trim().to_lowercase();
        self.headers
            .iter()
            .position(|h| h.trim().to_lowercase() == name)
    }
}

/// Reads a CSV file whose first line is a header row.
///
/// Every field is trimmed. Rows with a field count different from the header
/// are rejected.
pub fn read_csv_with_headers<T>(filename: T) -> Result<Table, FileError>
where
    T: AsRef<Path>,
{
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b',')
        .flexible(true)
        .has_headers(true)
        .from_path(filename.as_ref())
        .map_err(csv_err(&filename))?;

    let headers = reader
        .headers()
        .map_err(csv_err(&filename))?
        .iter()
        .map(|h| String::from(h.trim()))
        .collect::<Vec<String>>();
    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(FileError::MissingHeader(
            filename.as_ref().display().to_string(),
        ));
    }

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(csv_err(&filename))?;
        if record.len() != headers.len() {
            return Err(FileError::RaggedRow {
                row: i + 1,
                found: record.len(),
                expected: headers.len(),
            });
        }
        rows.push(record.iter().map(|z| String::from(z.trim())).collect());
    }
    Ok(Table { headers, rows })
}

/// Writes a header row followed by the rows sorted by their first column
pub fn write_table_to_csv<T>(table: &mut Table, path: T) -> Result<(), FileError>
where
    T: AsRef<Path>,
{
    let mut wr = csv::WriterBuilder::new()
        .buffer_capacity(1024)
        .from_path(path.as_ref())
        .map_err(csv_err(&path))?;

    table.rows.par_sort_unstable_by(|a, b| a.first().cmp(&b.first()));

    wr.write_record(table.headers.as_slice())
        .map_err(csv_err(&path))?;
    for line in table.rows.iter() {
        wr.write_record(line.as_slice()).map_err(csv_err(&path))?;
    }
    wr.flush()?;
    Ok(())
}

pub fn write_table_to_stdout(table: &Table, limit: usize) {
    if table.rows.len() > limit {
        warn!(
            "View size {} is bigger than stdout limit {} view will be truncated",
            table.rows.len(),
            limit
        );
    }

    let mut slice = table.rows.iter().take(limit).collect::<Vec<_>>();
    slice.sort_by(|a, b| a.first().cmp(&b.first()));

    println!("-----BEGIN FULL VIEW-----");
    println!("{}", table.headers.join(","));
    for line in slice.iter() {
        println!("{}", line.join(","));
    }
    println!("-----END FULL VIEW-----");
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_read_trims_fields() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Email, name").unwrap();
        writeln!(file, " a@x.com , Ann").unwrap();
        let t = read_csv_with_headers(file.path()).unwrap();
        assert_eq!(t.headers, vec!["Email", "name"]);
        assert_eq!(t.rows, vec![vec!["a@x.com", "Ann"]]);
        assert_eq!(t.column_index("email"), Some(0));
        assert_eq!(t.column_index(" NAME "), Some(1));
        assert_eq!(t.column_index("phone"), None);
    }

    #[test]
    fn test_ragged_row_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "a,b").unwrap();
        writeln!(file, "1").unwrap();
        match read_csv_with_headers(file.path()) {
            Err(FileError::RaggedRow {
                row,
                found,
                expected,
            }) => {
                assert_eq!((row, found, expected), (1, 1, 2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            read_csv_with_headers("/nonexistent/file.csv"),
            Err(FileError::Csv { .. })
        ));
    }

    #[test]
    fn test_write_sorted() {
        let file = NamedTempFile::new().unwrap();
        let mut t = Table {
            headers: vec!["k".to_string(), "v".to_string()],
            rows: vec![
                vec!["b".to_string(), "2".to_string()],
                vec!["a".to_string(), "1".to_string()],
            ],
        };
        write_table_to_csv(&mut t, file.path()).unwrap();
        let back = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(back, "k,v\na,1\nb,2\n");
        write_table_to_stdout(&t, 1);
    }
}
