//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use num_bigint::BigUint;
use num_bigint::RandBigInt;
use num_integer::Integer;
use num_traits::One;
use num_traits::Zero;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use sha2::Digest;
use sha2::Sha256;

/// Bit length of the shared modulus derived per match request
pub const MODULUS_BITS: u64 = 512;

/// Small primes used both for trial division and as fixed Miller-Rabin bases.
///
/// Fixed bases keep the primality decision deterministic, so two parties
/// deriving the modulus independently always land on the same prime.
const SMALL_PRIMES: [u32; 40] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89,
    97, 101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173,
];

/// Miller-Rabin test with the fixed bases from `SMALL_PRIMES`
pub fn is_probable_prime(n: &BigUint) -> bool {
    let two = BigUint::from(2u32);
    if n < &two {
        return false;
    }

    for p in SMALL_PRIMES.iter() {
        let p = BigUint::from(*p);
        if n == &p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }

    let n_1 = n - BigUint::one();
    let s = n_1.trailing_zeros().unwrap_or(0);
    let d = &n_1 >> s;

    'witness: for base in SMALL_PRIMES.iter() {
        let a = BigUint::from(*base);
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_1 {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_1 {
                continue 'witness;
            }
            if x.is_one() {
                return false;
            }
        }
        return false;
    }
    true
}

/// Returns the smallest prime strictly greater than `n`
pub fn next_prime(n: &BigUint) -> BigUint {
    let two = BigUint::from(2u32);
    if n < &two {
        return two;
    }
    let mut candidate = n + BigUint::one();
    if candidate.is_even() {
        if candidate == two {
            return candidate;
        }
        candidate += BigUint::one();
    }
    while !is_probable_prime(&candidate) {
        candidate += &two;
    }
    candidate
}

/// Samples a random prime with exactly `bit_size` bits
pub fn sample_prime(bit_size: u64) -> BigUint {
    assert!(bit_size > 1);
    let mut rng = rand::thread_rng();
    let low = BigUint::one() << (bit_size - 1);
    let high = BigUint::one() << bit_size;
    loop {
        let candidate = next_prime(&rng.gen_biguint_range(&low, &high));
        if candidate < high {
            return candidate;
        }
    }
}

/// Derives the shared modulus from an arbitrary seed (the match request id).
///
/// The seed is hashed with SHA-256 to key a ChaCha20 stream, a
/// `MODULUS_BITS`-bit candidate in `[2^(bits-1), 2^bits)` is sampled from it
/// and the next prime above the candidate is returned. Both parties compute
/// the same value without exchanging it.
pub fn derive_modulus(seed: &[u8]) -> BigUint {
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&Sha256::digest(seed));
    let mut rng = ChaCha20Rng::from_seed(digest);
    let low = BigUint::one() << (MODULUS_BITS - 1);
    let high = BigUint::one() << MODULUS_BITS;
    let candidate = rng.gen_biguint_range(&low, &high);
    next_prime(&candidate)
}
