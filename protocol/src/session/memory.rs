//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

//! In-process stores, used for single-process runs and tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use common::blob::ContentId;
use crypto::prelude::PrivateExponent;
use tokio::sync::Mutex;

use super::traits::round_slot;
use super::traits::CacheEntry;
use super::traits::LocalCache;
use super::traits::ProtocolStateStore;
use super::MatchRequest;
use super::SessionError;
use super::SignalOutcome;

/// Match requests of all parties behind one lock
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    requests: Arc<Mutex<HashMap<String, MatchRequest>>>,
}

impl MemoryStateStore {
    pub fn new() -> MemoryStateStore {
        MemoryStateStore::default()
    }

    pub async fn create(&self, x: &str, y: &str) -> Result<MatchRequest, SessionError> {
        let request = MatchRequest::new(x, y)?;
        let mut requests = self.requests.lock().await;
        if requests.contains_key(&request.request_id) {
            return Err(SessionError::Integrity(format!(
                "request {} already exists",
                request.request_id
            )));
        }
        requests.insert(request.request_id.clone(), request.clone());
        Ok(request)
    }

    pub async fn confirm(&self, request_id: &str, party: &str) -> Result<(), SessionError> {
        let mut requests = self.requests.lock().await;
        let request = requests
            .get_mut(request_id)
            .ok_or_else(|| SessionError::Integrity(format!("unknown request {}", request_id)))?;
        let role = request.require_role(party)?;
        request.confirm(role);
        Ok(())
    }

    /// The store as seen by `party`
    pub fn view(&self, party: &str) -> PartyView {
        PartyView {
            party: party.to_string(),
            store: self.clone(),
        }
    }
}

/// `ProtocolStateStore` bound to one party identity
#[derive(Clone)]
pub struct PartyView {
    party: String,
    store: MemoryStateStore,
}

#[async_trait]
impl ProtocolStateStore for PartyView {
    async fn fetch_request(&self, request_id: &str) -> Result<MatchRequest, SessionError> {
        let requests = self.store.requests.lock().await;
        let request = requests
            .get(request_id)
            .ok_or_else(|| SessionError::Integrity(format!("unknown request {}", request_id)))?;
        request.require_role(&self.party)?;
        Ok(request.clone())
    }

    async fn record_content_id(
        &self,
        request_id: &str,
        round: u8,
        cid: &ContentId,
    ) -> Result<SignalOutcome, SessionError> {
        let mut requests = self.store.requests.lock().await;
        let request = requests
            .get_mut(request_id)
            .ok_or_else(|| SessionError::Integrity(format!("unknown request {}", request_id)))?;
        request.record_content(&self.party, round, cid)?;
        Ok(SignalOutcome::Stored)
    }
}

#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

impl MemoryCache {
    pub fn new() -> MemoryCache {
        MemoryCache::default()
    }

    async fn update<F>(&self, request_id: &str, f: F) -> Result<(), SessionError>
    where
        F: FnOnce(&mut CacheEntry) + Send,
    {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .entry(request_id.to_string())
            .or_insert_with(|| CacheEntry::new(request_id));
        f(entry);
        Ok(())
    }
}

#[async_trait]
impl LocalCache for MemoryCache {
    async fn load(&self, request_id: &str) -> Result<Option<CacheEntry>, SessionError> {
        Ok(self.entries.lock().await.get(request_id).cloned())
    }

    async fn ensure_exponent(
        &self,
        request_id: &str,
        candidate: PrivateExponent,
    ) -> Result<PrivateExponent, SessionError> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .entry(request_id.to_string())
            .or_insert_with(|| CacheEntry::new(request_id));
        Ok(entry.exponent.get_or_insert(candidate).clone())
    }

    async fn record_own(
        &self,
        request_id: &str,
        round: u8,
        cid: &ContentId,
    ) -> Result<(), SessionError> {
        let slot = round_slot(round)?;
        let cid = cid.clone();
        self.update(request_id, move |e| e.own_cids[slot] = Some(cid))
            .await
    }

    async fn record_partner(
        &self,
        request_id: &str,
        round: u8,
        cid: &ContentId,
    ) -> Result<(), SessionError> {
        let slot = round_slot(round)?;
        let cid = cid.clone();
        self.update(request_id, move |e| e.partner_cids[slot] = Some(cid))
            .await
    }

    async fn record_final(&self, request_id: &str, path: &Path) -> Result<(), SessionError> {
        let path = path.to_path_buf();
        self.update(request_id, move |e| e.final_path = Some(path))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crypto::dhcipher::gen_exponent;
    use crypto::prime::derive_modulus;

    #[tokio::test]
    async fn test_memory_store_views() {
        let store = MemoryStateStore::new();
        let r = store.create("alice", "bob").await.unwrap();
        assert!(store.create("bob", "alice").await.is_err());

        let alice = store.view("alice");
        let carol = store.view("carol");
        assert!(carol.fetch_request(&r.request_id).await.is_err());
        assert!(alice.fetch_request("missing").await.is_err());

        store.confirm(&r.request_id, "alice").await.unwrap();
        store.confirm(&r.request_id, "bob").await.unwrap();
        assert!(store.confirm(&r.request_id, "carol").await.is_err());

        let cid = ContentId::new("c1");
        assert_eq!(
            alice.record_content_id(&r.request_id, 1, &cid).await.unwrap(),
            SignalOutcome::Stored
        );
        let fetched = store.view("bob").fetch_request(&r.request_id).await.unwrap();
        assert_eq!(fetched.cid_a[0], Some(cid));
    }

    #[tokio::test]
    async fn test_memory_cache_keeps_first_exponent() {
        let cache = MemoryCache::new();
        assert!(cache.load("r").await.unwrap().is_none());
        let p = derive_modulus(b"cache");
        let first = gen_exponent(&p);
        let kept = cache.ensure_exponent("r", first.clone()).await.unwrap();
        assert_eq!(kept, first);
        let again = cache.ensure_exponent("r", gen_exponent(&p)).await.unwrap();
        assert_eq!(again, first);

        cache.record_own("r", 2, &ContentId::new("o2")).await.unwrap();
        cache.record_partner("r", 1, &ContentId::new("p1")).await.unwrap();
        cache.record_final("r", Path::new("/tmp/r.csv")).await.unwrap();
        assert!(cache.record_own("r", 4, &ContentId::new("x")).await.is_err());

        let e = cache.load("r").await.unwrap().unwrap();
        assert_eq!(e.own_cids[1], Some(ContentId::new("o2")));
        assert_eq!(e.partner_cids[0], Some(ContentId::new("p1")));
        assert_eq!(e.final_path.unwrap(), Path::new("/tmp/r.csv"));
    }
}
