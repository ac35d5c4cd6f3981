//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

#[macro_use]
extern crate log;

extern crate crypto;

pub mod cache;
pub mod connect;
pub mod control;
pub mod handler;
pub mod proto;
pub mod registry;
pub mod remote;
pub mod store;
