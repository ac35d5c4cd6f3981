//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

pub use num_bigint::BigUint;

pub use crate::dhcipher::DHCipher;
pub use crate::dhcipher::PrivateExponent;

#[cfg(not(target_arch = "wasm32"))]
pub use crate::dhcipher::DHParallel as DHEngine;
#[cfg(target_arch = "wasm32")]
pub use crate::dhcipher::DHSequential as DHEngine;

/// Element of the multiplicative group mod p
pub type TElement = BigUint;
pub type TPayload = Vec<TElement>;
