//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use common::files::read_csv_with_headers;
use common::files::write_table_to_csv;
use common::files::Table;
use common::vectors::dedup_by_key;

#[test]
fn test_read_csv_with_headers() {
    let t: Table = read_csv_with_headers("./tests/people.csv").unwrap();
    assert_eq!(t.headers, vec!["email", "name", "phone"]);
    assert_eq!(t.rows.len(), 3);
    assert_eq!(t.rows[0], ["alice@example.com", "Alice", "5550001"]);
    assert_eq!(t.rows[1][0], "BOB@example.com");
    assert_eq!(t.column_index("Phone"), Some(2));
}

#[test]
fn test_write_then_read_keeps_rows() {
    let mut t = read_csv_with_headers("./tests/people.csv").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("copy.csv");
    write_table_to_csv(&mut t, &out).unwrap();

    let back = read_csv_with_headers(&out).unwrap();
    assert_eq!(back.headers, t.headers);
    assert_eq!(back.rows.len(), 3);
    // rows are written sorted by first column
    assert_eq!(back.rows[0][0], "BOB@example.com");
}

#[test]
fn test_dedup_rows_by_first_column() {
    let mut t = read_csv_with_headers("./tests/people.csv").unwrap();
    t.rows.push(t.rows[2].clone());
    let dropped = dedup_by_key(&mut t.rows, |r| r[0].to_lowercase());
    assert_eq!(dropped, 1);
    assert_eq!(t.rows.len(), 3);
}
