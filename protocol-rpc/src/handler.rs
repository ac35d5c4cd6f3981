//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

//! Server side connection worker.
//!
//! Each worker is the only reader and writer of its connection. Messages
//! for other parties go through their inbox in the `ConnectionRegistry`.

use protocol::session::SignalOutcome;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

use crate::proto::streaming::read_envelope;
use crate::proto::streaming::send_envelope;
use crate::proto::streaming::ControlStream;
use crate::proto::streaming::framed;
use crate::proto::Command;
use crate::proto::Envelope;
use crate::proto::FrameError;
use crate::proto::MessageKind;
use crate::proto::Reply;
use crate::proto::Signal;
use crate::registry::ConnectionRegistry;
use crate::registry::RegistryError;
use crate::store::MatchStore;
use crate::store::StoreError;

#[derive(Clone)]
pub struct RendezvousHandler {
    store: MatchStore,
    registry: ConnectionRegistry,
}

enum Incoming {
    Command(Command),
    Invalid(String),
    Ignored,
}

fn classify(envelope: &Envelope) -> Incoming {
    match envelope.kind {
        MessageKind::Request => match envelope.decode::<Command>() {
            Ok(command) => Incoming::Command(command),
            Err(e) => Incoming::Invalid(e.to_string()),
        },
        MessageKind::Info => {
            if let serde_json::Value::String(text) = &envelope.payload {
                debug!("client info: {}", text);
            }
            Incoming::Ignored
        }
        kind => {
            debug!("ignoring {:?} message from client", kind);
            Incoming::Ignored
        }
    }
}

async fn respond<T>(stream: &mut ControlStream<T>, reply: &Reply) -> Result<(), FrameError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    send_envelope(stream, &Envelope::response(reply)?).await
}

impl RendezvousHandler {
    pub fn new(store: MatchStore, registry: ConnectionRegistry) -> RendezvousHandler {
        RendezvousHandler { store, registry }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Serves one client connection until logout, disconnect or a framing error
    pub async fn handle_connection<T>(&self, io: T) -> Result<(), FrameError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let mut stream = framed(io);
        let username = match self.login(&mut stream).await? {
            Some(username) => username,
            None => return Ok(()),
        };

        let (inbox, mut inbox_rx) = mpsc::unbounded_channel::<Envelope>();
        let connection = match self.registry.register(&username, inbox).await {
            Ok(id) => id,
            Err(e @ RegistryError::AlreadyOnline(_)) => {
                warn!("rejecting second session: {}", e);
                respond(&mut stream, &Reply::error("AlreadyOnline", &e.to_string())).await?;
                return Ok(());
            }
        };
        info!("{} logged in", username);

        let result = self.serve(&username, &mut stream, &mut inbox_rx).await;

        self.registry.unregister(&username, connection).await;
        info!("{} disconnected", username);
        result
    }

    async fn login<T>(&self, stream: &mut ControlStream<T>) -> Result<Option<String>, FrameError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let envelope = match read_envelope(stream).await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => return Ok(None),
                Err(FrameError::Json(e)) => {
                    respond(stream, &Reply::error("InvalidMessage", &e.to_string())).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };
            match classify(&envelope) {
                Incoming::Command(Command::Login { username, password }) => {
                    match self.store.verify_user(&username, &password).await {
                        Ok(true) => return Ok(Some(username)),
                        Ok(false) => {
                            warn!("failed login for {}", username);
                            respond(
                                stream,
                                &Reply::error("AuthFailed", "invalid username or password"),
                            )
                            .await?;
                        }
                        Err(e) => respond(stream, &Reply::error(e.kind(), &e.to_string())).await?,
                    }
                }
                Incoming::Command(Command::Logout) => {
                    respond(stream, &Reply::Ok).await?;
                    return Ok(None);
                }
                Incoming::Command(command) => {
                    let message = format!("{} requires login", command.name());
                    respond(stream, &Reply::error("NotLoggedIn", &message)).await?;
                }
                Incoming::Invalid(message) => {
                    respond(stream, &Reply::error("InvalidMessage", &message)).await?;
                }
                Incoming::Ignored => {}
            }
        }
    }

    async fn serve<T>(
        &self,
        username: &str,
        stream: &mut ControlStream<T>,
        inbox_rx: &mut mpsc::UnboundedReceiver<Envelope>,
    ) -> Result<(), FrameError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        respond(
            stream,
            &Reply::LoggedIn {
                username: username.to_string(),
            },
        )
        .await?;
        let online = self.registry.online().await;
        send_envelope(
            stream,
            &Envelope::info(&format!(
                "welcome {}, {} parties online",
                username,
                online.len()
            )),
        )
        .await?;
        match self.store.pending_for(username).await {
            Ok(request_ids) if !request_ids.is_empty() => {
                send_envelope(stream, &Envelope::signal(&Signal::PendingWork { request_ids })?)
                    .await?;
            }
            Ok(_) => {}
            Err(e) => warn!("pending work lookup for {} failed: {}", username, e),
        }

        loop {
            tokio::select! {
                // queued signals go out before the next reply
                biased;
                Some(envelope) = inbox_rx.recv() => {
                    send_envelope(stream, &envelope).await?;
                }
                next = read_envelope(stream) => {
                    let envelope = match next {
                        Ok(Some(envelope)) => envelope,
                        Ok(None) => return Ok(()),
                        Err(FrameError::Json(e)) => {
                            warn!("invalid message from {}: {}", username, e);
                            respond(stream, &Reply::error("InvalidMessage", &e.to_string())).await?;
                            continue;
                        }
                        Err(e) => {
                            error!("read error on {}: {}", username, e);
                            return Err(e);
                        }
                    };
                    match classify(&envelope) {
                        Incoming::Command(Command::Logout) => {
                            respond(stream, &Reply::Ok).await?;
                            return Ok(());
                        }
                        Incoming::Command(command) => {
                            let name = command.name();
                            let reply = match self.dispatch(username, command).await {
                                Ok(reply) => reply,
                                Err(e) => {
                                    debug!("{} {} failed: {}", username, name, e);
                                    Reply::error(e.kind(), &e.to_string())
                                }
                            };
                            respond(stream, &reply).await?;
                        }
                        Incoming::Invalid(message) => {
                            respond(stream, &Reply::error("InvalidMessage", &message)).await?;
                        }
                        Incoming::Ignored => {}
                    }
                }
            }
        }
    }

    async fn signal(&self, party: &str, signal: Signal) -> SignalOutcome {
        match Envelope::signal(&signal) {
            Ok(envelope) => self.registry.notify(party, envelope).await,
            Err(e) => {
                error!("cannot encode signal for {}: {}", party, e);
                SignalOutcome::Stored
            }
        }
    }

    async fn dispatch(&self, username: &str, command: Command) -> Result<Reply, StoreError> {
        match command {
            Command::Login { .. } => Ok(Reply::error(
                "AlreadyLoggedIn",
                &format!("already logged in as {}", username),
            )),
            Command::ListPeers => {
                let online = self
                    .registry
                    .online()
                    .await
                    .into_iter()
                    .filter(|p| p != username)
                    .collect();
                Ok(Reply::Peers { online })
            }
            Command::CreateMatch { partner } => {
                let request = self.store.create_request(username, &partner).await?;
                let signal = Signal::MatchCreated {
                    request_id: request.request_id.clone(),
                    from: username.to_string(),
                };
                self.signal(&partner, signal).await;
                Ok(Reply::Match { request })
            }
            Command::ListMatches => Ok(Reply::Matches {
                requests: self.store.requests_for(username).await?,
            }),
            Command::Confirm { request_id } => {
                let request = self.store.confirm(&request_id, username).await?;
                let role = request.require_role(username)?;
                let partner = request.party(role.other()).to_string();
                let signal = Signal::PartnerConfirmed {
                    request_id,
                    partner: username.to_string(),
                };
                self.signal(&partner, signal).await;
                Ok(Reply::Match { request })
            }
            Command::GetMatch { request_id } => Ok(Reply::Match {
                request: self.store.request_for(&request_id, username).await?,
            }),
            Command::RecordContent {
                request_id,
                round,
                cid,
            } => {
                let (request, changed) = self
                    .store
                    .record_content(&request_id, username, round, &cid)
                    .await?;
                if !changed {
                    debug!("{} re-recorded round {} of {}", username, round, request_id);
                }
                let role = request.require_role(username)?;
                let partner = request.party(role.other()).to_string();
                let outcome = self
                    .signal(
                        &partner,
                        Signal::PartnerContent {
                            request_id,
                            round,
                            cid,
                        },
                    )
                    .await;
                Ok(Reply::Recorded { outcome })
            }
            Command::Logout => Ok(Reply::Ok),
        }
    }
}
