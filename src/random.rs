//! Random variates used by the disease model and the tuner.
//!
//! Parameter-dependent distributions (the diagnosis delay) are built with
//! `rand_distr` where the parameters change.
//!
//! Every draw is a pure function of the generator passed in, so a seeded
//! [`rand_chacha::ChaCha12Rng`] reproduces a whole simulation.

use rand::prelude::*;

/// Uniform draw in `[low, high)`; returns `low` for an empty range.
pub fn uniform<R: Rng + ?Sized>(rng: &mut R, low: f64, high: f64) -> f64 {
    if high <= low {
        return low;
    }
    rng.random_range(low..high)
}

/// Uniform index in `0..len`.
///
/// `len` must be non-zero.
pub fn index<R: Rng + ?Sized>(rng: &mut R, len: usize) -> usize {
    rng.random_range(0..len)
}

/// Draw `r` in `[0, 1)` and succeed iff `r <= prob`.
pub fn chance<R: Rng + ?Sized>(rng: &mut R, prob: f64) -> bool {
    rng.random::<f64>() <= prob
}
