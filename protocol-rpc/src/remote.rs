//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use common::blob::ContentId;
use protocol::session::traits::ProtocolStateStore;
use protocol::session::MatchRequest;
use protocol::session::SessionError;
use protocol::session::SignalOutcome;

use crate::control::ControlClient;
use crate::control::ControlError;

/// Maps control channel failures back onto the session error kinds
pub fn session_error(e: ControlError) -> SessionError {
    match e {
        ControlError::Remote { kind, message } => match kind.as_str() {
            "NotReady" => SessionError::NotReady(message),
            "IntegrityViolation" => SessionError::Integrity(message),
            _ => SessionError::Store(format!("{}: {}", kind, message)),
        },
        other => SessionError::Store(other.to_string()),
    }
}

/// The rendezvous server's match store, reached over the control channel
#[derive(Clone)]
pub struct RemoteStateStore {
    client: ControlClient,
}

impl RemoteStateStore {
    pub fn new(client: ControlClient) -> RemoteStateStore {
        RemoteStateStore { client }
    }
}

#[async_trait]
impl ProtocolStateStore for RemoteStateStore {
    async fn fetch_request(&self, request_id: &str) -> Result<MatchRequest, SessionError> {
        self.client
            .get_match(request_id)
            .await
            .map_err(session_error)
    }

    async fn record_content_id(
        &self,
        request_id: &str,
        round: u8,
        cid: &ContentId,
    ) -> Result<SignalOutcome, SessionError> {
        self.client
            .record_content(request_id, round, cid)
            .await
            .map_err(session_error)
    }
}
