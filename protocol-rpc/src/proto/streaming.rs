//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use futures::SinkExt;
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio_util::codec::Framed;
use tokio_util::codec::LinesCodec;

use crate::proto::Envelope;
use crate::proto::FrameError;

/// Upper bound of one control line. Bulk data goes through the blob store.
pub const MAX_LINE_LENGTH: usize = 1 << 20;

pub type ControlStream<T> = Framed<T, LinesCodec>;

pub fn framed<T>(io: T) -> ControlStream<T>
where
    T: AsyncRead + AsyncWrite,
{
    Framed::new(io, LinesCodec::new_with_max_length(MAX_LINE_LENGTH))
}

pub async fn send_envelope<T>(
    stream: &mut ControlStream<T>,
    envelope: &Envelope,
) -> Result<(), FrameError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let line = serde_json::to_string(envelope)?;
    stream.send(line).await?;
    Ok(())
}

/// Next envelope, `None` once the peer closed the stream. Blank lines are skipped.
pub async fn read_envelope<T>(stream: &mut ControlStream<T>) -> Result<Option<Envelope>, FrameError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match stream.next().await {
            None => return Ok(None),
            Some(line) => {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                return parse_line(&line).map(Some);
            }
        }
    }
}

pub fn parse_line(line: &str) -> Result<Envelope, FrameError> {
    Ok(serde_json::from_str(line.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::Command;

    #[tokio::test]
    async fn test_envelopes_over_duplex() {
        let (a, b) = tokio::io::duplex(1024);
        let mut a = framed(a);
        let mut b = framed(b);
        let env = Envelope::request(&Command::Logout).unwrap();
        send_envelope(&mut a, &env).await.unwrap();
        send_envelope(&mut a, &Envelope::info("x")).await.unwrap();
        assert_eq!(read_envelope(&mut b).await.unwrap(), Some(env));
        assert_eq!(read_envelope(&mut b).await.unwrap(), Some(Envelope::info("x")));
        drop(a);
        assert_eq!(read_envelope(&mut b).await.unwrap(), None);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(parse_line("{oops"), Err(FrameError::Json(_))));
    }
}
