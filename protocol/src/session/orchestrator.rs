//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::blob::fetch_with_backoff;
use common::blob::write_atomic;
use common::blob::BlobError;
use common::blob::BlobExchange;
use common::blob::ContentId;
use common::files;
use common::timer;
use crypto::dhcipher::gen_exponent;
use crypto::prime::derive_modulus;

use super::traits::round_slot;
use super::traits::CacheEntry;
use super::traits::LocalCache;
use super::traits::ProtocolStateStore;
use super::MatchRequest;
use super::PartyRole;
use super::SessionError;
use super::SessionState;
use super::FINAL_ROUND;
use super::PUBLISHED_ROUNDS;
use crate::fileio::RecordSource;
use crate::psi_dh::join_extracts;
use crate::psi_dh::BlindedSet;
use crate::psi_dh::CrossBlinded;
use crate::psi_dh::MatchedExtract;
use crate::psi_dh::PartyPsi;
use crate::psi_dh::ProtocolError;
use crate::psi_dh::PsiPartyProtocol;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Identity of the party this session runs for
    pub party: String,
    /// Scratch space for downloaded and published artifacts
    pub work_dir: PathBuf,
    /// Where the round 4 table is written, as `<request_id>.csv`
    pub output_dir: PathBuf,
    pub fetch_attempts: usize,
    pub fetch_delay: Duration,
}

impl SessionConfig {
    pub fn new(party: &str, work_dir: PathBuf, output_dir: PathBuf) -> SessionConfig {
        SessionConfig {
            party: party.to_string(),
            work_dir,
            output_dir,
            fetch_attempts: 5,
            fetch_delay: Duration::from_millis(500),
        }
    }
}

/// Sizes of a completed match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub own_input_size: usize,
    pub partner_extract_size: usize,
    pub intersection_size: usize,
    pub output_path: PathBuf,
}

async fn blocking<T, F>(f: F) -> Result<T, SessionError>
where
    F: FnOnce() -> Result<T, ProtocolError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SessionError::Protocol(ProtocolError::Internal(e.to_string())))?
        .map_err(SessionError::from)
}

fn missing(what: &str, round: u8) -> SessionError {
    SessionError::NotReady(format!("{} round {} content is not recorded", what, round))
}

/// Drives one party through the rounds of one match request.
///
/// Holds no state that cannot be rebuilt from the state store, the local
/// cache and the record source, so a fresh instance resumes where a
/// dropped one stopped.
pub struct SessionOrchestrator {
    config: SessionConfig,
    request_id: String,
    state: SessionState,
    store: Arc<dyn ProtocolStateStore>,
    cache: Arc<dyn LocalCache>,
    exchange: Arc<dyn BlobExchange>,
    source: Arc<RecordSource>,
    engine: Option<Arc<PartyPsi>>,
    report: Option<SessionReport>,
}

impl SessionOrchestrator {
    pub fn new(
        config: SessionConfig,
        request_id: &str,
        store: Arc<dyn ProtocolStateStore>,
        cache: Arc<dyn LocalCache>,
        exchange: Arc<dyn BlobExchange>,
        source: Arc<RecordSource>,
    ) -> SessionOrchestrator {
        SessionOrchestrator {
            config,
            request_id: request_id.to_string(),
            state: SessionState::AwaitingRequest,
            store,
            cache,
            exchange,
            source,
            engine: None,
            report: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn report(&self) -> Option<&SessionReport> {
        self.report.as_ref()
    }

    pub fn output_path(&self) -> PathBuf {
        self.config
            .output_dir
            .join(format!("{}.csv", self.request_id))
    }

    fn session_dir(&self) -> PathBuf {
        self.config
            .work_dir
            .join(&self.config.party)
            .join(&self.request_id)
    }

    /// Applies the outcome of a transition. NotReady leaves the state as is,
    /// any other error parks the session in `Failed`.
    fn settle(
        &mut self,
        result: Result<SessionState, SessionError>,
    ) -> Result<SessionState, SessionError> {
        match result {
            Ok(s) => {
                if s != self.state {
                    debug!(
                        "{} {}: {} -> {}",
                        self.config.party, self.request_id, self.state, s
                    );
                }
                self.state = s.clone();
                Ok(s)
            }
            Err(e) if e.is_not_ready() => {
                debug!("{} {}: {}", self.config.party, self.request_id, e);
                Err(e)
            }
            Err(e) => {
                error!(
                    "{} {} failed in state {}: {}",
                    self.config.party, self.request_id, self.state, e
                );
                self.state = SessionState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Rebuilds the state from the stored request and the local cache
    pub async fn resume(&mut self) -> Result<SessionState, SessionError> {
        let r = self.derive_state().await;
        self.settle(r)
    }

    async fn fetch_request(&self) -> Result<(MatchRequest, PartyRole), SessionError> {
        let request = self.store.fetch_request(&self.request_id).await?;
        let role = request.require_role(&self.config.party)?;
        Ok((request, role))
    }

    async fn derive_state(&mut self) -> Result<SessionState, SessionError> {
        let (request, role) = self.fetch_request().await?;
        let cached = self
            .cache
            .load(&self.request_id)
            .await?
            .unwrap_or_else(|| CacheEntry::new(&self.request_id));
        self.sync_cache(&request, role, &cached).await?;

        if let Some(path) = cached.final_path.as_ref() {
            if path.exists() {
                return Ok(SessionState::Completed);
            }
            warn!("Output {} is gone, round 4 will run again", path.display());
        }
        if !request.both_confirmed() {
            return Ok(SessionState::AwaitingRequest);
        }

        let own = request.progress(role);
        let partner = request.progress(role.other());
        let state = match own {
            0 => SessionState::Round1Pending,
            k if partner >= k => SessionState::RoundReady(k + 1),
            k => SessionState::AwaitingPartnerRound(k),
        };

        // rounds 2 and 3 reuse the exponent behind the recorded round 1
        let needs_exponent = matches!(
            state,
            SessionState::RoundReady(2)
                | SessionState::RoundReady(3)
                | SessionState::AwaitingPartnerRound(1)
                | SessionState::AwaitingPartnerRound(2)
        );
        if needs_exponent && cached.exponent.is_none() {
            return Err(SessionError::Cache(format!(
                "round 1 of {} is recorded but its private exponent is not cached",
                self.request_id
            )));
        }
        Ok(state)
    }

    /// Copies content ids known to the store into the local cache
    async fn sync_cache(
        &self,
        request: &MatchRequest,
        role: PartyRole,
        cached: &CacheEntry,
    ) -> Result<(), SessionError> {
        for round in 1..=PUBLISHED_ROUNDS {
            let slot = round_slot(round)?;
            if let Some(cid) = request.cid(role.other(), round) {
                if cached.partner_cids[slot].as_ref() != Some(cid) {
                    self.cache
                        .record_partner(&self.request_id, round, cid)
                        .await?;
                }
            }
            if let Some(cid) = request.cid(role, round) {
                if cached.own_cids[slot].as_ref() != Some(cid) {
                    self.cache.record_own(&self.request_id, round, cid).await?;
                }
            }
        }
        Ok(())
    }

    /// Performs one transition from the current state
    pub async fn step(&mut self) -> Result<SessionState, SessionError> {
        let r = self.step_inner().await;
        self.settle(r)
    }

    async fn step_inner(&mut self) -> Result<SessionState, SessionError> {
        match self.state.clone() {
            SessionState::AwaitingRequest => match self.derive_state().await? {
                SessionState::AwaitingRequest => Err(SessionError::NotReady(format!(
                    "request {} is not confirmed by both parties",
                    self.request_id
                ))),
                s => Ok(s),
            },
            SessionState::Round1Pending => self.execute_round(1).await,
            SessionState::AwaitingPartnerRound(k) => {
                let (request, role) = self.fetch_request().await?;
                match request.cid(role.other(), k) {
                    Some(cid) => {
                        self.cache.record_partner(&self.request_id, k, cid).await?;
                        Ok(SessionState::RoundReady(k + 1))
                    }
                    None => Err(SessionError::NotReady(format!(
                        "partner has not published round {}",
                        k
                    ))),
                }
            }
            SessionState::RoundReady(k) => self.execute_round(k).await,
            SessionState::Completed => Ok(SessionState::Completed),
            SessionState::Failed(_) => self.derive_state().await,
        }
    }

    /// Records a partner content id pushed by the server
    pub async fn on_partner_signal(
        &mut self,
        round: u8,
        cid: &ContentId,
    ) -> Result<SessionState, SessionError> {
        self.cache
            .record_partner(&self.request_id, round, cid)
            .await?;
        if self.state == SessionState::AwaitingPartnerRound(round) {
            self.state = SessionState::RoundReady(round + 1);
            info!(
                "{} {}: partner round {} available as {}",
                self.config.party, self.request_id, round, cid
            );
        }
        Ok(self.state.clone())
    }

    /// Resumes from durable state and runs one round: `round` when given,
    /// otherwise the next pending one.
    ///
    /// An explicit round that already ran is executed again, which records
    /// the same content id when inputs are unchanged.
    pub async fn run_round(&mut self, round: Option<u8>) -> Result<SessionState, SessionError> {
        let state = self.resume().await?;
        let next = state.runnable_round();
        match round {
            Some(k) if next == Some(k) => self.step().await,
            Some(k) => {
                if !self.round_done(k).await? {
                    return Err(SessionError::NotReady(format!(
                        "round {} cannot run, request is {}",
                        k, state
                    )));
                }
                info!(
                    "{} {}: running round {} again",
                    self.config.party, self.request_id, k
                );
                let r = self.execute_round(k).await;
                self.settle(r)?;
                self.resume().await
            }
            None if next.is_some() => self.step().await,
            None if state == SessionState::Completed => Ok(state),
            None => Err(SessionError::NotReady(format!("request is {}", state))),
        }
    }

    async fn round_done(&self, round: u8) -> Result<bool, SessionError> {
        let (request, role) = self.fetch_request().await?;
        Ok(match round {
            1..=3 => request.cid(role, round).is_some(),
            FINAL_ROUND => self.state == SessionState::Completed,
            _ => false,
        })
    }

    /// Steps until the session completes or waits on the partner
    pub async fn run_until_blocked(&mut self) -> Result<SessionState, SessionError> {
        loop {
            match self.step().await {
                Ok(SessionState::Completed) => return Ok(SessionState::Completed),
                Ok(_) => continue,
                Err(e) if e.is_not_ready() => return Ok(self.state.clone()),
                Err(e) => return Err(e),
            }
        }
    }

    async fn engine(
        &mut self,
        request: &MatchRequest,
        role: PartyRole,
    ) -> Result<Arc<PartyPsi>, SessionError> {
        if let Some(engine) = self.engine.as_ref() {
            return Ok(engine.clone());
        }
        let request_id = self.request_id.clone();
        let modulus = blocking(move || Ok(derive_modulus(request_id.as_bytes()))).await?;

        let cached = self.cache.load(&self.request_id).await?;
        let exponent = match cached.and_then(|c| c.exponent) {
            Some(e) => e,
            None if request.cid(role, 1).is_some() => {
                return Err(SessionError::Cache(format!(
                    "private exponent of {} is lost, round 1 cannot be reproduced",
                    self.request_id
                )));
            }
            // persisted before anything derived from it leaves this process
            None => {
                self.cache
                    .ensure_exponent(&self.request_id, gen_exponent(&modulus))
                    .await?
            }
        };
        let engine = Arc::new(PartyPsi::with_modulus(
            modulus,
            exponent,
            self.source.clone(),
        )?);
        self.engine = Some(engine.clone());
        Ok(engine)
    }

    async fn fetch(&self, cid: &ContentId, name: &str) -> Result<Vec<u8>, SessionError> {
        let dest = self.session_dir().join(name);
        let path = fetch_with_backoff(
            self.exchange.as_ref(),
            cid,
            &dest,
            self.config.fetch_attempts,
            self.config.fetch_delay,
        )
        .await?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| SessionError::Exchange(BlobError::Io(e)))
    }

    async fn publish(&self, round: u8, bytes: Vec<u8>) -> Result<SessionState, SessionError> {
        let path = self.session_dir().join(format!("own_round{}.json", round));
        write_atomic(&path, bytes).await?;
        let cid = self.exchange.put(&path).await?;
        self.cache.record_own(&self.request_id, round, &cid).await?;
        let outcome = self
            .store
            .record_content_id(&self.request_id, round, &cid)
            .await?;
        info!(
            "{} {}: round {} published as {} ({:?})",
            self.config.party, self.request_id, round, cid, outcome
        );
        Ok(SessionState::AwaitingPartnerRound(round))
    }

    async fn execute_round(&mut self, round: u8) -> Result<SessionState, SessionError> {
        let _t = timer::Builder::new()
            .label(&self.config.party)
            .extra_label(&format!("round {}", round))
            .build();
        let (request, role) = self.fetch_request().await?;
        if !request.both_confirmed() {
            return Err(SessionError::NotReady(format!(
                "request {} is not confirmed by both parties",
                self.request_id
            )));
        }
        if round > 1 && round <= FINAL_ROUND && request.cid(role, round - 1).is_none() {
            return Err(missing("own", round - 1));
        }
        let other = role.other();

        match round {
            1 => {
                let engine = self.engine(&request, role).await?;
                let set = blocking(move || engine.round1()).await?;
                self.publish(1, set.to_bytes()?).await
            }
            2 => {
                let cid = request.cid(other, 1).ok_or_else(|| missing("partner", 1))?;
                let bytes = self.fetch(cid, "partner_round1.json").await?;
                let partner = BlindedSet::from_bytes(&bytes)?;
                let engine = self.engine(&request, role).await?;
                let out = blocking(move || engine.round2(&partner)).await?;
                self.publish(2, out.to_bytes()?).await
            }
            3 => {
                let own_cid = request.cid(role, 2).ok_or_else(|| missing("own", 2))?;
                let cid = request.cid(other, 2).ok_or_else(|| missing("partner", 2))?;
                let own = self.fetch(own_cid, "own_round2.fetched.json").await?;
                let own = CrossBlinded::from_bytes(&own)?;
                let partner = self.fetch(cid, "partner_round2.json").await?;
                let partner = CrossBlinded::from_bytes(&partner)?;
                let engine = self.engine(&request, role).await?;
                let out = blocking(move || engine.round3(&own, &partner)).await?;
                self.publish(3, out.to_bytes()?).await
            }
            FINAL_ROUND => {
                let own_cid = request.cid(role, 3).ok_or_else(|| missing("own", 3))?;
                let cid = request.cid(other, 3).ok_or_else(|| missing("partner", 3))?;
                let own = self.fetch(own_cid, "own_round3.fetched.json").await?;
                let own = MatchedExtract::from_bytes(&own)?;
                let partner = self.fetch(cid, "partner_round3.json").await?;
                let partner = MatchedExtract::from_bytes(&partner)?;
                self.finish(own, partner).await
            }
            _ => Err(SessionError::Integrity(format!("there is no round {}", round))),
        }
    }

    async fn finish(
        &mut self,
        own: MatchedExtract,
        partner: MatchedExtract,
    ) -> Result<SessionState, SessionError> {
        let output = self.output_path();
        let partner_extract_size = partner.len();
        let out = output.clone();
        let rows = blocking(move || {
            let mut table = join_extracts(&own, &partner);
            if let Some(dir) = out.parent() {
                std::fs::create_dir_all(dir).map_err(|e| ProtocolError::Input(e.into()))?;
            }
            files::write_table_to_csv(&mut table, &out)?;
            Ok(table.rows.len())
        })
        .await?;
        self.cache.record_final(&self.request_id, &output).await?;
        info!(
            "{} {}: {} matched rows written to {}",
            self.config.party,
            self.request_id,
            rows,
            output.display()
        );
        self.report = Some(SessionReport {
            own_input_size: self.source.len(),
            partner_extract_size,
            intersection_size: rows,
            output_path: output,
        });
        Ok(SessionState::Completed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;
    use common::blob::LocalBlobStore;
    use common::files::Table;

    use super::*;
    use crate::session::memory::MemoryCache;
    use crate::session::memory::MemoryStateStore;
    use crate::session::traits::MockProtocolStateStore;
    use crate::session::SignalOutcome;

    fn source(rows: &[&[&str]]) -> Arc<RecordSource> {
        let table = Table {
            headers: vec!["id".to_string(), "label".to_string()],
            rows: rows
                .iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        };
        Arc::new(
            RecordSource::from_table(&table, &["id".to_string()], &["label".to_string()])
                .unwrap(),
        )
    }

    struct Harness {
        dir: tempfile::TempDir,
        store: MemoryStateStore,
        blobs: Arc<LocalBlobStore>,
        cache_a: Arc<MemoryCache>,
        cache_b: Arc<MemoryCache>,
        request_id: String,
    }

    impl Harness {
        async fn new(confirm: bool) -> Harness {
            let dir = tempfile::tempdir().unwrap();
            let store = MemoryStateStore::new();
            let request = store.create("alice", "bob").await.unwrap();
            if confirm {
                store.confirm(&request.request_id, "alice").await.unwrap();
                store.confirm(&request.request_id, "bob").await.unwrap();
            }
            Harness {
                blobs: Arc::new(LocalBlobStore::new(dir.path().join("blobs")).unwrap()),
                dir,
                store,
                cache_a: Arc::new(MemoryCache::new()),
                cache_b: Arc::new(MemoryCache::new()),
                request_id: request.request_id,
            }
        }

        fn config(&self, party: &str) -> SessionConfig {
            let mut c = SessionConfig::new(
                party,
                self.dir.path().join("work"),
                self.dir.path().join("out").join(party),
            );
            c.fetch_attempts = 2;
            c.fetch_delay = Duration::from_millis(1);
            c
        }

        fn alice(&self) -> SessionOrchestrator {
            SessionOrchestrator::new(
                self.config("alice"),
                &self.request_id,
                Arc::new(self.store.view("alice")),
                self.cache_a.clone(),
                self.blobs.clone(),
                source(&[&["x1", "a-one"], &["x2", "a-two"]]),
            )
        }

        fn bob(&self) -> SessionOrchestrator {
            SessionOrchestrator::new(
                self.config("bob"),
                &self.request_id,
                Arc::new(self.store.view("bob")),
                self.cache_b.clone(),
                self.blobs.clone(),
                source(&[&["X2 ", "b-two"], &["x3", "b-three"]]),
            )
        }
    }

    #[tokio::test]
    async fn test_full_two_party_run() {
        let h = Harness::new(true).await;
        let mut a = h.alice();
        let mut b = h.bob();

        assert_eq!(
            a.run_until_blocked().await.unwrap(),
            SessionState::AwaitingPartnerRound(1)
        );
        for _ in 0..4 {
            b.run_until_blocked().await.unwrap();
            a.run_until_blocked().await.unwrap();
        }
        assert_eq!(a.state(), &SessionState::Completed);
        assert_eq!(b.state(), &SessionState::Completed);

        let report = a.report().unwrap();
        assert_eq!(report.own_input_size, 2);
        assert_eq!(report.partner_extract_size, 1);
        assert_eq!(report.intersection_size, 1);

        let out = files::read_csv_with_headers(a.output_path()).unwrap();
        assert_eq!(out.headers, vec!["record_hash", "label", "partner_label"]);
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0][1], "a-two");
        assert_eq!(out.rows[0][2], "b-two");
        let out_b = files::read_csv_with_headers(b.output_path()).unwrap();
        assert_eq!(out_b.rows[0][0], out.rows[0][0]);

        // a fresh instance sees the finished request
        assert_eq!(h.alice().resume().await.unwrap(), SessionState::Completed);
    }

    #[tokio::test]
    async fn test_rerun_round_is_idempotent() {
        let h = Harness::new(true).await;
        let mut a = h.alice();
        let mut b = h.bob();
        a.run_round(None).await.unwrap();
        b.run_round(None).await.unwrap();
        a.run_round(Some(2)).await.unwrap();

        let before = h.store.view("alice").fetch_request(&h.request_id).await.unwrap();
        let mut fresh = h.alice();
        fresh.run_round(Some(1)).await.unwrap();
        fresh.run_round(Some(2)).await.unwrap();
        let after = h.store.view("alice").fetch_request(&h.request_id).await.unwrap();
        assert_eq!(before, after);
        assert_eq!(fresh.state(), &SessionState::AwaitingPartnerRound(2));

        // ahead of the partner
        assert!(fresh.run_round(Some(3)).await.unwrap_err().is_not_ready());
    }

    #[tokio::test]
    async fn test_confirmation_gating() {
        let h = Harness::new(false).await;
        h.store.confirm(&h.request_id, "alice").await.unwrap();
        let mut a = h.alice();
        let err = a.run_round(None).await.unwrap_err();
        assert!(err.is_not_ready());
        assert_eq!(a.state(), &SessionState::AwaitingRequest);
        let err = a.run_round(Some(1)).await.unwrap_err();
        assert!(err.is_not_ready());

        h.store.confirm(&h.request_id, "bob").await.unwrap();
        assert_eq!(
            a.run_round(None).await.unwrap(),
            SessionState::AwaitingPartnerRound(1)
        );
    }

    #[tokio::test]
    async fn test_gating_never_records() {
        let mut request = MatchRequest::new("alice", "bob").unwrap();
        request.confirm(PartyRole::A);
        let rid = request.request_id.clone();

        let mut store = MockProtocolStateStore::new();
        store
            .expect_fetch_request()
            .returning(move |_| Ok(request.clone()));
        store.expect_record_content_id().times(0);

        let dir = tempfile::tempdir().unwrap();
        let mut a = SessionOrchestrator::new(
            SessionConfig::new("alice", dir.path().join("w"), dir.path().join("o")),
            &rid,
            Arc::new(store),
            Arc::new(MemoryCache::new()),
            Arc::new(LocalBlobStore::new(dir.path().join("b")).unwrap()),
            source(&[&["x1", "one"]]),
        );
        assert!(a.run_round(None).await.unwrap_err().is_not_ready());
        assert!(a.run_until_blocked().await.is_ok());
        assert_eq!(a.state(), &SessionState::AwaitingRequest);
    }

    #[tokio::test]
    async fn test_resume_goes_to_round3() {
        let h = Harness::new(true).await;
        {
            let mut a = h.alice();
            let mut b = h.bob();
            a.run_round(Some(1)).await.unwrap();
            b.run_round(Some(1)).await.unwrap();
            a.run_round(Some(2)).await.unwrap();
            b.run_round(Some(2)).await.unwrap();
        }
        let request = h.store.view("alice").fetch_request(&h.request_id).await.unwrap();

        // only round 3 may be published by the fresh instance
        let mut store = MockProtocolStateStore::new();
        let r = request.clone();
        store.expect_fetch_request().returning(move |_| Ok(r.clone()));
        store
            .expect_record_content_id()
            .withf(|_, round, _| *round == 3)
            .times(1)
            .returning(|_, _, _| Ok(SignalOutcome::Delivered));

        let mut a = SessionOrchestrator::new(
            h.config("alice"),
            &h.request_id,
            Arc::new(store),
            h.cache_a.clone(),
            h.blobs.clone(),
            source(&[&["x1", "a-one"], &["x2", "a-two"]]),
        );
        assert_eq!(a.resume().await.unwrap(), SessionState::RoundReady(3));
        assert_eq!(a.step().await.unwrap(), SessionState::AwaitingPartnerRound(3));
    }

    #[tokio::test]
    async fn test_partner_signal_advances() {
        let h = Harness::new(true).await;
        let mut a = h.alice();
        let mut b = h.bob();
        a.run_round(None).await.unwrap();
        b.run_round(None).await.unwrap();
        let cid = h
            .store
            .view("bob")
            .fetch_request(&h.request_id)
            .await
            .unwrap()
            .cid_b[0]
            .clone()
            .unwrap();
        assert_eq!(
            a.on_partner_signal(1, &cid).await.unwrap(),
            SessionState::RoundReady(2)
        );
        let cached = h.cache_a.load(&h.request_id).await.unwrap().unwrap();
        assert_eq!(cached.partner_cids[0], Some(cid));
        assert!(cached.exponent.is_some());
    }

    #[tokio::test]
    async fn test_lost_exponent_fails() {
        let h = Harness::new(true).await;
        h.alice().run_round(None).await.unwrap();
        let mut a = SessionOrchestrator::new(
            h.config("alice"),
            &h.request_id,
            Arc::new(h.store.view("alice")),
            Arc::new(MemoryCache::new()),
            h.blobs.clone(),
            source(&[&["x1", "a-one"]]),
        );
        assert!(matches!(a.resume().await, Err(SessionError::Cache(_))));
        assert!(matches!(a.state(), SessionState::Failed(_)));
    }

    struct Outage {
        inner: Arc<LocalBlobStore>,
        down: AtomicBool,
    }

    #[async_trait]
    impl BlobExchange for Outage {
        async fn put(&self, path: &std::path::Path) -> Result<ContentId, BlobError> {
            self.inner.put(path).await
        }

        async fn get(
            &self,
            cid: &ContentId,
            dest: &std::path::Path,
        ) -> Result<PathBuf, BlobError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(BlobError::Transport("connection refused".to_string()));
            }
            self.inner.get(cid, dest).await
        }
    }

    #[tokio::test]
    async fn test_exchange_failure_then_resume() {
        let h = Harness::new(true).await;
        h.alice().run_round(None).await.unwrap();
        h.bob().run_round(None).await.unwrap();

        let outage = Arc::new(Outage {
            inner: h.blobs.clone(),
            down: AtomicBool::new(true),
        });
        let mut a = SessionOrchestrator::new(
            h.config("alice"),
            &h.request_id,
            Arc::new(h.store.view("alice")),
            h.cache_a.clone(),
            outage.clone(),
            source(&[&["x1", "a-one"], &["x2", "a-two"]]),
        );
        assert!(matches!(
            a.run_round(None).await,
            Err(SessionError::Exchange(_))
        ));
        assert!(matches!(a.state(), SessionState::Failed(_)));

        outage.down.store(false, Ordering::SeqCst);
        assert_eq!(a.step().await.unwrap(), SessionState::RoundReady(2));
        assert_eq!(a.step().await.unwrap(), SessionState::AwaitingPartnerRound(2));
    }
}
