//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use common::blob::ContentId;
use crypto::prelude::PrivateExponent;

use super::MatchRequest;
use super::SessionError;
use super::SignalOutcome;

/// Server-side record of match requests, seen from one authenticated party
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProtocolStateStore: Send + Sync {
    async fn fetch_request(&self, request_id: &str) -> Result<MatchRequest, SessionError>;

    /// Records the caller's content id for `round` and notifies the partner
    async fn record_content_id(
        &self,
        request_id: &str,
        round: u8,
        cid: &ContentId,
    ) -> Result<SignalOutcome, SessionError>;
}

/// Local progress of one party for one request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheEntry {
    pub request_id: String,
    pub exponent: Option<PrivateExponent>,
    pub own_cids: [Option<ContentId>; 3],
    pub partner_cids: [Option<ContentId>; 3],
    pub final_path: Option<PathBuf>,
}

impl CacheEntry {
    pub fn new(request_id: &str) -> CacheEntry {
        CacheEntry {
            request_id: request_id.to_string(),
            ..CacheEntry::default()
        }
    }
}

/// Per-party durable cache keyed by request id
#[async_trait]
pub trait LocalCache: Send + Sync {
    async fn load(&self, request_id: &str) -> Result<Option<CacheEntry>, SessionError>;

    /// Stores `candidate` unless an exponent is already cached, returns the cached one
    async fn ensure_exponent(
        &self,
        request_id: &str,
        candidate: PrivateExponent,
    ) -> Result<PrivateExponent, SessionError>;

    async fn record_own(
        &self,
        request_id: &str,
        round: u8,
        cid: &ContentId,
    ) -> Result<(), SessionError>;

    async fn record_partner(
        &self,
        request_id: &str,
        round: u8,
        cid: &ContentId,
    ) -> Result<(), SessionError>;

    async fn record_final(&self, request_id: &str, path: &Path) -> Result<(), SessionError>;
}

/// Index into the per-round arrays, rejecting rounds without published content
pub fn round_slot(round: u8) -> Result<usize, SessionError> {
    match round {
        1..=3 => Ok((round - 1) as usize),
        _ => Err(SessionError::Cache(format!(
            "round {} has no content id",
            round
        ))),
    }
}
