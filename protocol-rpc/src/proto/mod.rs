//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

//! Control channel messages.
//!
//! Every line on the wire is one JSON `Envelope`. Requests carry a
//! `Command`, responses a `Reply`, signals a `Signal` and info messages a
//! plain string.

use common::blob::ContentId;
use protocol::session::MatchRequest;
use protocol::session::SignalOutcome;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio_util::codec::LinesCodecError;

pub mod streaming;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("framing error: {0}")]
    Codec(#[from] LinesCodecError),
    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("connection closed")]
    Closed,
    #[error("unexpected message: {0}")]
    Unexpected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Info,
    Request,
    Response,
    Signal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: MessageKind,
    pub payload: serde_json::Value,
    #[serde(rename = "replyExpected")]
    pub reply_expected: bool,
}

impl Envelope {
    fn new<T: Serialize>(
        kind: MessageKind,
        payload: &T,
        reply_expected: bool,
    ) -> Result<Envelope, FrameError> {
        Ok(Envelope {
            kind,
            payload: serde_json::to_value(payload)?,
            reply_expected,
        })
    }

    pub fn request(command: &Command) -> Result<Envelope, FrameError> {
        Envelope::new(MessageKind::Request, command, true)
    }

    pub fn response(reply: &Reply) -> Result<Envelope, FrameError> {
        Envelope::new(MessageKind::Response, reply, false)
    }

    pub fn signal(signal: &Signal) -> Result<Envelope, FrameError> {
        Envelope::new(MessageKind::Signal, signal, false)
    }

    pub fn info(text: &str) -> Envelope {
        Envelope {
            kind: MessageKind::Info,
            payload: serde_json::Value::String(text.to_string()),
            reply_expected: false,
        }
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Party to server requests, each answered by exactly one `Reply`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum Command {
    Login {
        username: String,
        password: String,
    },
    ListPeers,
    CreateMatch {
        partner: String,
    },
    ListMatches,
    Confirm {
        #[serde(rename = "requestId")]
        request_id: String,
    },
    GetMatch {
        #[serde(rename = "requestId")]
        request_id: String,
    },
    RecordContent {
        #[serde(rename = "requestId")]
        request_id: String,
        round: u8,
        cid: ContentId,
    },
    Logout,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Login { .. } => "Login",
            Command::ListPeers => "ListPeers",
            Command::CreateMatch { .. } => "CreateMatch",
            Command::ListMatches => "ListMatches",
            Command::Confirm { .. } => "Confirm",
            Command::GetMatch { .. } => "GetMatch",
            Command::RecordContent { .. } => "RecordContent",
            Command::Logout => "Logout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply")]
pub enum Reply {
    LoggedIn {
        username: String,
    },
    Peers {
        online: Vec<String>,
    },
    Match {
        request: MatchRequest,
    },
    Matches {
        requests: Vec<MatchRequest>,
    },
    Recorded {
        outcome: SignalOutcome,
    },
    Ok,
    Error {
        kind: String,
        message: String,
    },
}

impl Reply {
    pub fn error(kind: &str, message: &str) -> Reply {
        Reply::Error {
            kind: kind.to_string(),
            message: message.to_string(),
        }
    }
}

/// Server pushed notifications, no reply expected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal")]
pub enum Signal {
    MatchCreated {
        #[serde(rename = "requestId")]
        request_id: String,
        from: String,
    },
    PartnerConfirmed {
        #[serde(rename = "requestId")]
        request_id: String,
        partner: String,
    },
    PartnerContent {
        #[serde(rename = "requestId")]
        request_id: String,
        round: u8,
        cid: ContentId,
    },
    PendingWork {
        #[serde(rename = "requestIds")]
        request_ids: Vec<String>,
    },
}
