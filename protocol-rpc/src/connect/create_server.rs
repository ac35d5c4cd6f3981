//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use tokio::net::TcpListener;

use crate::connect::host_into_addr;

/// Binds the control channel listener.
///
/// Returns the listener plus the shutdown pair the server loop selects on.
pub async fn create_server(
    host: &str,
) -> Result<
    (
        TcpListener,
        tokio::sync::oneshot::Sender<()>,
        tokio::sync::oneshot::Receiver<()>,
    ),
    std::io::Error,
> {
    let addr = host_into_addr(host);
    warn!("Starting server without TLS on {}", addr);
    let listener = TcpListener::bind(addr).await?;

    // oneshot channel impl from tokio is necessary
    // standard channel does not support futures yet
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    Ok((listener, tx, rx))
}
