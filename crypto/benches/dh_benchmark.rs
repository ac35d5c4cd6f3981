//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use criterion::*;
use crypto::dhcipher::gen_exponent;
use crypto::dhcipher::DHCipher;
use crypto::dhcipher::DHParallel;
use crypto::dhcipher::DHSequential;
use crypto::prime::derive_modulus;
use num_bigint::BigUint;
use num_bigint::RandBigInt;
use num_traits::One;

fn random_elements(n: usize, modulus: &BigUint) -> Vec<BigUint> {
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|_| rng.gen_biguint_range(&(BigUint::one() + BigUint::one()), modulus))
        .collect::<Vec<BigUint>>()
}

fn sequential_blind(n: usize, c: &mut Criterion) {
    let p = derive_modulus(b"bench");
    let e = gen_exponent(&p);
    let data = random_elements(n, &p);
    let cipher = DHSequential::default();
    c.bench_function(
        format!("dh sequential blind, size: {}", n).as_str(),
        move |b| {
            b.iter_batched(
                || data.clone(),
                |ctx| cipher.blind(&ctx, &e, &p),
                BatchSize::SmallInput,
            )
        },
    );
}

fn parallel_blind(n: usize, c: &mut Criterion) {
    let p = derive_modulus(b"bench");
    let e = gen_exponent(&p);
    let data = random_elements(n, &p);
    let cipher = DHParallel::default();
    c.bench_function(
        format!("dh parallel blind, size: {}", n).as_str(),
        move |b| {
            b.iter_batched(
                || data.clone(),
                |ctx| cipher.blind(&ctx, &e, &p),
                BatchSize::SmallInput,
            )
        },
    );
}

fn parallel_blind_pairs(n: usize, c: &mut Criterion) {
    let p = derive_modulus(b"bench");
    let e = gen_exponent(&p);
    let data = random_elements(n, &p);
    let cipher = DHParallel::default();
    c.bench_function(
        format!("dh parallel blind pairs, size: {}", n).as_str(),
        move |b| {
            b.iter_batched(
                || data.clone(),
                |ctx| cipher.blind_pairs(&ctx, &e, &p),
                BatchSize::SmallInput,
            )
        },
    );
}

fn bench_dh(c: &mut Criterion) {
    sequential_blind(1000, c);
    parallel_blind(1000, c);
    parallel_blind_pairs(1000, c);
}

fn derive(c: &mut Criterion) {
    c.bench_function("derive modulus", |b| b.iter(|| derive_modulus(b"req")));
}

criterion_group!(
name = dh_benches;
config = Criterion::default()
        .sample_size(10)
        .nresamples(10);
targets = bench_dh, derive
);
criterion_main!(dh_benches);
