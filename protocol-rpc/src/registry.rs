//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

//! Online parties and the inbox of their connection worker.
//!
//! Only the worker owning a connection writes to its socket. Everything
//! aimed at another party is pushed into that party's inbox.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use protocol::session::SignalOutcome;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::RwLock;

use crate::proto::Envelope;

pub type Inbox = mpsc::UnboundedSender<Envelope>;
pub type ConnectionId = u64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{0} is already online")]
    AlreadyOnline(String),
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    online: Arc<RwLock<HashMap<String, (ConnectionId, Inbox)>>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> ConnectionRegistry {
        ConnectionRegistry::default()
    }

    /// Binds `party` to a connection. A live binding is never replaced, a
    /// binding whose worker is gone is.
    pub async fn register(&self, party: &str, inbox: Inbox) -> Result<ConnectionId, RegistryError> {
        let mut online = self.online.write().await;
        if let Some((_, existing)) = online.get(party) {
            if !existing.is_closed() {
                return Err(RegistryError::AlreadyOnline(party.to_string()));
            }
            debug!("replacing stale connection of {}", party);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        online.insert(party.to_string(), (id, inbox));
        Ok(id)
    }

    /// Removes the binding only when it still belongs to `connection`
    pub async fn unregister(&self, party: &str, connection: ConnectionId) -> bool {
        let mut online = self.online.write().await;
        match online.get(party) {
            Some((id, _)) if *id == connection => {
                online.remove(party);
                true
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, party: &str) -> Option<Inbox> {
        self.online
            .read()
            .await
            .get(party)
            .filter(|(_, inbox)| !inbox.is_closed())
            .map(|(_, inbox)| inbox.clone())
    }

    pub async fn online(&self) -> Vec<String> {
        let mut parties = self
            .online
            .read()
            .await
            .iter()
            .filter(|(_, (_, inbox))| !inbox.is_closed())
            .map(|(party, _)| party.clone())
            .collect::<Vec<_>>();
        parties.sort();
        parties
    }

    /// Queues `envelope` for `party`. `Stored` when the party is offline,
    /// it then learns the news from durable state on its next login.
    pub async fn notify(&self, party: &str, envelope: Envelope) -> SignalOutcome {
        match self.lookup(party).await {
            Some(inbox) if inbox.send(envelope).is_ok() => SignalOutcome::Delivered,
            _ => SignalOutcome::Stored,
        }
    }
}
