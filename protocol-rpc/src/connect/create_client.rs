//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use tokio::net::TcpStream;

use crate::connect::host_into_addr;
use crate::proto::streaming::framed;
use crate::proto::streaming::ControlStream;
use crate::proto::FrameError;

/// Dials the rendezvous server, retrying with a fixed delay
pub async fn create_client(
    host: &str,
    attempts: u32,
    delay: Duration,
) -> Result<ControlStream<TcpStream>, FrameError> {
    let addr = host_into_addr(host);
    let mut retry_count: u32 = 0;
    loop {
        if retry_count == 0 {
            info!("Connecting to host: {}", addr);
        } else {
            info!("Connecting to host: {} [retry: {}]", addr, retry_count)
        }
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                info!("Client connected!");
                return Ok(framed(stream));
            }
            Err(e) if retry_count + 1 < attempts.max(1) => {
                warn!("Connection to {} failed: {}", addr, e);
                retry_count += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(FrameError::Io(e)),
        }
    }
}
