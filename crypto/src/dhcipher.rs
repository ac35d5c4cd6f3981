//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use std::fmt::Debug;
use std::fmt::Error;
use std::fmt::Formatter;

use num_bigint::BigUint;
use num_bigint::RandBigInt;
use num_traits::One;
use num_traits::Zero;
use rand::rngs::OsRng;
use rayon::iter::IntoParallelRefIterator;
use rayon::iter::ParallelIterator;
use zeroize::Zeroize;

/// Private exponent of one party, sampled from `[2, p-2]`.
///
/// Never leaves the party that generated it except through the local
/// round cache. The value is wiped on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateExponent(BigUint);

impl PrivateExponent {
    pub fn from_biguint(value: BigUint) -> PrivateExponent {
        PrivateExponent(value)
    }

    /// Parses the hex encoding produced by `to_hex`
    pub fn from_hex(hex: &str) -> Option<PrivateExponent> {
        BigUint::parse_bytes(hex.as_bytes(), 16).map(PrivateExponent)
    }

    pub fn to_hex(&self) -> String {
        self.0.to_str_radix(16)
    }

    pub fn value(&self) -> &BigUint {
        &self.0
    }

    /// True iff the exponent lies within `[2, p-2]`
    pub fn is_valid_for(&self, modulus: &BigUint) -> bool {
        let two = BigUint::from(2u32);
        modulus > &two && self.0 >= two && self.0 <= modulus - &two
    }
}

impl Zeroize for PrivateExponent {
    fn zeroize(&mut self) {
        self.0.set_zero();
    }
}

impl Drop for PrivateExponent {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl Debug for PrivateExponent {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "PrivateExponent(***)")
    }
}

/// Samples a private exponent uniformly in `[2, p-2]` using the OS rng
pub fn gen_exponent(modulus: &BigUint) -> PrivateExponent {
    let low = BigUint::from(2u32);
    let high = modulus - BigUint::one();
    PrivateExponent(OsRng.gen_biguint_range(&low, &high))
}

/// `value^exponent mod p`
pub fn blind(value: &BigUint, exponent: &PrivateExponent, modulus: &BigUint) -> BigUint {
    value.modpow(&exponent.0, modulus)
}

/// Applies the own exponent to a value the counter-party already blinded.
///
/// Same arithmetic as `blind`; the separate name tracks which round the
/// caller is in.
pub fn second_blind(
    partner_value: &BigUint,
    exponent: &PrivateExponent,
    modulus: &BigUint,
) -> BigUint {
    partner_value.modpow(&exponent.0, modulus)
}

/// True iff `value` is a usable group element for modulus `p`, `1 < value < p`
pub fn is_group_element(value: &BigUint, modulus: &BigUint) -> bool {
    value > &BigUint::one() && value < modulus
}

/// Modular exponentiation over a batch of values
///
/// The trait aims to interface sequential and parallel implementations
pub trait DHCipher {
    /// Raises every value to `exponent` modulo `modulus`
    fn blind(
        &self,
        values: &[BigUint],
        exponent: &PrivateExponent,
        modulus: &BigUint,
    ) -> Vec<BigUint>;

    /// Raises every value and keeps the input next to the output
    fn blind_pairs(
        &self,
        values: &[BigUint],
        exponent: &PrivateExponent,
        modulus: &BigUint,
    ) -> Vec<(BigUint, BigUint)>;
}

/// Single threaded impl of `DHCipher`
#[derive(Debug, Default)]
pub struct DHSequential {}

impl DHCipher for DHSequential {
    fn blind(
        &self,
        values: &[BigUint],
        exponent: &PrivateExponent,
        modulus: &BigUint,
    ) -> Vec<BigUint> {
        values
            .iter()
            .map(|v| blind(v, exponent, modulus))
            .collect::<Vec<BigUint>>()
    }

    fn blind_pairs(
        &self,
        values: &[BigUint],
        exponent: &PrivateExponent,
        modulus: &BigUint,
    ) -> Vec<(BigUint, BigUint)> {
        values
            .iter()
            .map(|v| (v.clone(), second_blind(v, exponent, modulus)))
            .collect::<Vec<_>>()
    }
}

/// Parallel impl of `DHCipher`
///
/// Multithreaded component happens via `rayon` crate. Output order matches
/// input order.
///
/// # Example
///
/// ```
/// use crypto::dhcipher::{gen_exponent, DHCipher, DHParallel};
/// use crypto::prime::derive_modulus;
/// use num_bigint::BigUint;
///
/// let p = derive_modulus(b"example");
/// let (a, b) = (gen_exponent(&p), gen_exponent(&p));
/// let cipher = DHParallel::default();
/// let h = vec![BigUint::from(42u32)];
/// let ab = cipher.blind(&cipher.blind(&h, &a, &p), &b, &p);
/// let ba = cipher.blind(&cipher.blind(&h, &b, &p), &a, &p);
/// assert_eq!(ab, ba);
/// ```
#[derive(Debug, Default)]
pub struct DHParallel {}

impl DHCipher for DHParallel {
    fn blind(
        &self,
        values: &[BigUint],
        exponent: &PrivateExponent,
        modulus: &BigUint,
    ) -> Vec<BigUint> {
        values
            .par_iter()
            .map(|v| blind(v, exponent, modulus))
            .collect::<Vec<BigUint>>()
    }

    fn blind_pairs(
        &self,
        values: &[BigUint],
        exponent: &PrivateExponent,
        modulus: &BigUint,
    ) -> Vec<(BigUint, BigUint)> {
        values
            .par_iter()
            .map(|v| (v.clone(), second_blind(v, exponent, modulus)))
            .collect::<Vec<_>>()
    }
}
