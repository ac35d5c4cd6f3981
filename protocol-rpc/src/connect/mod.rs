//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

pub mod create_client;
pub mod create_server;

/// Strips an optional `tcp://` scheme, the listener and the dialer take `host:port`
pub fn host_into_addr(host: &str) -> &str {
    host.trim().trim_start_matches("tcp://").trim_end_matches('/')
}
