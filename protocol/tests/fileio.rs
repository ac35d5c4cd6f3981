//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use common::blob::LocalBlobStore;
use common::files::read_csv_with_headers;
use protocol::fileio::*;
use protocol::psi_dh::artifact::hash_to_hex;
use protocol::session::memory::MemoryCache;
use protocol::session::memory::MemoryStateStore;
use protocol::session::orchestrator::SessionConfig;
use protocol::session::orchestrator::SessionOrchestrator;
use protocol::session::SessionState;

fn cols(list: &str) -> Vec<String> {
    parse_column_list(list)
}

#[test]
fn test_load_records() {
    let a = RecordSource::load("./tests/party_a.csv", &cols("email"), &cols("name,city")).unwrap();
    assert_eq!(a.len(), 3);
    assert_eq!(a.publish_columns, vec!["name", "city"]);
    let x4 = a
        .records
        .iter()
        .find(|r| r.record_hash == derive_hash(&["x4@example.com"]))
        .unwrap();
    assert_eq!(x4.values, vec!["Cid", "Rome"]);

    let b = RecordSource::load("./tests/party_b.csv", &cols("Email"), &[]).unwrap();
    assert!(b.hashes().contains(&derive_hash(&["x2@example.com"])));
    assert!(b.records.iter().all(|r| r.values.is_empty()));
}

#[test]
fn test_load_missing_column() {
    assert!(RecordSource::load("./tests/party_b.csv", &cols("name"), &[]).is_err());
    assert!(RecordSource::load("./tests/nope.csv", &cols("email"), &[]).is_err());
}

#[tokio::test]
async fn test_two_parties_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStateStore::new();
    let request = store.create("party-b", "party-a").await.unwrap();
    store.confirm(&request.request_id, "party-a").await.unwrap();
    store.confirm(&request.request_id, "party-b").await.unwrap();
    let blobs = Arc::new(LocalBlobStore::new(dir.path().join("blobs")).unwrap());

    let orchestrator = |party: &str, input: &str, publish: &str| {
        let mut config = SessionConfig::new(
            party,
            dir.path().join("work"),
            dir.path().join("out").join(party),
        );
        config.fetch_delay = Duration::from_millis(1);
        SessionOrchestrator::new(
            config,
            &request.request_id,
            Arc::new(store.view(party)),
            Arc::new(MemoryCache::new()),
            blobs.clone(),
            Arc::new(RecordSource::load(input, &cols("email"), &cols(publish)).unwrap()),
        )
    };
    let mut a = orchestrator("party-a", "./tests/party_a.csv", "name,city");
    let mut b = orchestrator("party-b", "./tests/party_b.csv", "phone");

    for _ in 0..4 {
        a.run_until_blocked().await.unwrap();
        b.run_until_blocked().await.unwrap();
    }
    assert_eq!(a.state(), &SessionState::Completed);
    assert_eq!(b.state(), &SessionState::Completed);

    let out = read_csv_with_headers(a.output_path()).unwrap();
    assert_eq!(
        out.headers,
        vec!["record_hash", "name", "city", "partner_phone"]
    );
    let mut expected = [
        derive_hash(&["x2@example.com"]),
        derive_hash(&["x4@example.com"]),
    ]
    .iter()
    .map(hash_to_hex)
    .collect::<Vec<_>>();
    expected.sort();
    let mut got = out.rows.iter().map(|r| r[0].clone()).collect::<Vec<_>>();
    got.sort();
    assert_eq!(got, expected);

    let bea = out.rows.iter().find(|r| r[1] == "Bea").unwrap();
    assert_eq!(bea[3], "5550002");

    let out_b = read_csv_with_headers(b.output_path()).unwrap();
    assert_eq!(
        out_b.headers,
        vec!["record_hash", "phone", "partner_name", "partner_city"]
    );
    assert_eq!(out_b.rows.len(), 2);
}
