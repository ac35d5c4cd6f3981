//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

//! Client side of the control channel.
//!
//! One task owns the connection. Callers hand it requests through a
//! channel and get the matching response back on a oneshot; signals are
//! forwarded to a separate receiver.

use std::collections::VecDeque;

use common::blob::ContentId;
use protocol::session::MatchRequest;
use protocol::session::SignalOutcome;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::proto::streaming::read_envelope;
use crate::proto::streaming::send_envelope;
use crate::proto::streaming::ControlStream;
use crate::proto::Command;
use crate::proto::Envelope;
use crate::proto::FrameError;
use crate::proto::MessageKind;
use crate::proto::Reply;
use crate::proto::Signal;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("{kind}: {message}")]
    Remote { kind: String, message: String },
    #[error("control connection closed")]
    Closed,
    #[error("unexpected reply to {0}")]
    UnexpectedReply(&'static str),
}

type PendingReply = oneshot::Sender<Result<Reply, ControlError>>;

#[derive(Clone)]
pub struct ControlClient {
    requests: mpsc::UnboundedSender<(Envelope, PendingReply)>,
}

async fn run_connection<T>(
    mut stream: ControlStream<T>,
    mut requests: mpsc::UnboundedReceiver<(Envelope, PendingReply)>,
    signals: mpsc::UnboundedSender<Signal>,
) -> Result<(), FrameError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut waiting: VecDeque<PendingReply> = VecDeque::new();
    let result = loop {
        tokio::select! {
            next = requests.recv() => match next {
                Some((envelope, reply)) => {
                    if let Err(e) = send_envelope(&mut stream, &envelope).await {
                        let _ = reply.send(Err(ControlError::Closed));
                        break Err(e);
                    }
                    if envelope.reply_expected {
                        waiting.push_back(reply);
                    } else {
                        let _ = reply.send(Ok(Reply::Ok));
                    }
                }
                // every handle dropped
                None => break Ok(()),
            },
            next = read_envelope(&mut stream) => {
                let envelope = match next {
                    Ok(Some(envelope)) => envelope,
                    Ok(None) => break Ok(()),
                    Err(FrameError::Json(e)) => {
                        warn!("dropping invalid server message: {}", e);
                        continue;
                    }
                    Err(e) => break Err(e),
                };
                match envelope.kind {
                    MessageKind::Response => match waiting.pop_front() {
                        Some(reply) => {
                            let decoded = envelope.decode::<Reply>().map_err(ControlError::from);
                            let _ = reply.send(decoded);
                        }
                        None => warn!("response without a pending request"),
                    },
                    MessageKind::Signal => match envelope.decode::<Signal>() {
                        Ok(signal) => {
                            if signals.send(signal).is_err() {
                                debug!("signal receiver gone");
                            }
                        }
                        Err(e) => warn!("invalid signal: {}", e),
                    },
                    MessageKind::Info => {
                        if let serde_json::Value::String(text) = &envelope.payload {
                            info!("server: {}", text);
                        }
                    }
                    MessageKind::Request => warn!("server sent a request, ignored"),
                }
            }
        }
    };
    for reply in waiting.drain(..) {
        let _ = reply.send(Err(ControlError::Closed));
    }
    result
}

impl ControlClient {
    /// Spawns the task owning `stream`
    pub fn spawn<T>(stream: ControlStream<T>) -> (ControlClient, mpsc::UnboundedReceiver<Signal>)
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            if let Err(e) = run_connection(stream, request_rx, signal_tx).await {
                error!("control connection failed: {}", e);
            }
        });
        (
            ControlClient {
                requests: request_tx,
            },
            signal_rx,
        )
    }

    /// Sends `command` and waits for its reply. Error replies become `Remote`.
    pub async fn call(&self, command: Command) -> Result<Reply, ControlError> {
        let envelope = Envelope::request(&command)?;
        let (tx, rx) = oneshot::channel();
        self.requests
            .send((envelope, tx))
            .map_err(|_| ControlError::Closed)?;
        match rx.await.map_err(|_| ControlError::Closed)?? {
            Reply::Error { kind, message } => Err(ControlError::Remote { kind, message }),
            reply => Ok(reply),
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<String, ControlError> {
        match self
            .call(Command::Login {
                username: username.to_string(),
                password: password.to_string(),
            })
            .await?
        {
            Reply::LoggedIn { username } => Ok(username),
            _ => Err(ControlError::UnexpectedReply("Login")),
        }
    }

    pub async fn list_peers(&self) -> Result<Vec<String>, ControlError> {
        match self.call(Command::ListPeers).await? {
            Reply::Peers { online } => Ok(online),
            _ => Err(ControlError::UnexpectedReply("ListPeers")),
        }
    }

    pub async fn create_match(&self, partner: &str) -> Result<MatchRequest, ControlError> {
        match self
            .call(Command::CreateMatch {
                partner: partner.to_string(),
            })
            .await?
        {
            Reply::Match { request } => Ok(request),
            _ => Err(ControlError::UnexpectedReply("CreateMatch")),
        }
    }

    pub async fn list_matches(&self) -> Result<Vec<MatchRequest>, ControlError> {
        match self.call(Command::ListMatches).await? {
            Reply::Matches { requests } => Ok(requests),
            _ => Err(ControlError::UnexpectedReply("ListMatches")),
        }
    }

    pub async fn confirm(&self, request_id: &str) -> Result<MatchRequest, ControlError> {
        match self
            .call(Command::Confirm {
                request_id: request_id.to_string(),
            })
            .await?
        {
            Reply::Match { request } => Ok(request),
            _ => Err(ControlError::UnexpectedReply("Confirm")),
        }
    }

    pub async fn get_match(&self, request_id: &str) -> Result<MatchRequest, ControlError> {
        match self
            .call(Command::GetMatch {
                request_id: request_id.to_string(),
            })
            .await?
        {
            Reply::Match { request } => Ok(request),
            _ => Err(ControlError::UnexpectedReply("GetMatch")),
        }
    }

    pub async fn record_content(
        &self,
        request_id: &str,
        round: u8,
        cid: &ContentId,
    ) -> Result<SignalOutcome, ControlError> {
        match self
            .call(Command::RecordContent {
                request_id: request_id.to_string(),
                round,
                cid: cid.clone(),
            })
            .await?
        {
            Reply::Recorded { outcome } => Ok(outcome),
            _ => Err(ControlError::UnexpectedReply("RecordContent")),
        }
    }

    pub async fn logout(&self) -> Result<(), ControlError> {
        match self.call(Command::Logout).await? {
            Reply::Ok => Ok(()),
            _ => Err(ControlError::UnexpectedReply("Logout")),
        }
    }
}
