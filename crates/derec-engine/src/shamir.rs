//! Byte-wise Shamir secret sharing
//!
//! Each byte of the secret gets its own random polynomial of degree
//! `threshold - 1`; share `i` holds the evaluations at `x = i`.

use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};
use crate::gf256::Gf256;
use crate::polynomial::{interpolate_at_zero, Polynomial};
use crate::MAX_SHARES;

/// One point-set of a split secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawShare {
    /// Evaluation point (never zero)
    pub x: u8,
    /// One evaluation per secret byte
    pub ys: Vec<u8>,
}

/// Split `secret` into `share_count` shares, any `threshold` of which recover it
pub fn split<R: RngCore>(
    secret: &[u8],
    threshold: usize,
    share_count: usize,
    rng: &mut R,
) -> Result<Vec<RawShare>> {
    if share_count == 0 {
        return Err(CryptoError::NoChannels);
    }
    if share_count > MAX_SHARES {
        return Err(CryptoError::TooManyChannels {
            got: share_count,
            max: MAX_SHARES,
        });
    }
    if threshold == 0 || threshold > share_count {
        return Err(CryptoError::InvalidThreshold {
            threshold,
            participants: share_count,
        });
    }

    let mut shares: Vec<RawShare> = (1..=share_count)
        .map(|x| RawShare {
            x: x as u8,
            ys: Vec::with_capacity(secret.len()),
        })
        .collect();

    for byte in secret {
        let poly = Polynomial::random(Gf256::new(*byte), threshold - 1, rng);
        for share in &mut shares {
            share.ys.push(poly.evaluate(Gf256::new(share.x)).value());
        }
    }

    Ok(shares)
}

/// Recombine shares produced by [`split`]
///
/// The caller is responsible for supplying at least the threshold; with
/// fewer shares the output is unrelated to the secret.
pub fn combine(shares: &[RawShare]) -> Result<Zeroizing<Vec<u8>>> {
    let first = shares.first().ok_or(CryptoError::InsufficientShares { need: 1, got: 0 })?;
    let len = first.ys.len();
    if shares.iter().any(|s| s.ys.len() != len) {
        return Err(CryptoError::Mismatch("shares have different lengths".to_string()));
    }
    if shares.iter().any(|s| s.x == 0) {
        return Err(CryptoError::Mismatch("share evaluated at zero".to_string()));
    }

    let mut secret = Zeroizing::new(Vec::with_capacity(len));
    let mut points = Vec::with_capacity(shares.len());
    for i in 0..len {
        points.clear();
        points.extend(
            shares
                .iter()
                .map(|s| (Gf256::new(s.x), Gf256::new(s.ys[i]))),
        );
        let byte = interpolate_at_zero(&points)
            .ok_or_else(|| CryptoError::Mismatch("duplicate share coordinates".to_string()))?;
        secret.push(byte.value());
    }

    Ok(secret)
}
