//! Polynomials over GF(2^8) and Lagrange interpolation at zero

use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::gf256::Gf256;

/// A polynomial whose constant term is the secret byte
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct Polynomial {
    /// Coefficients, lowest degree first
    coefficients: Vec<Gf256>,
}

impl Polynomial {
    /// Random polynomial of the given degree with a fixed constant term
    pub fn random<R: RngCore>(constant: Gf256, degree: usize, rng: &mut R) -> Self {
        let mut random = vec![0u8; degree];
        rng.fill_bytes(&mut random);

        let mut coefficients = Vec::with_capacity(degree + 1);
        coefficients.push(constant);
        coefficients.extend(random.iter().map(|b| Gf256::new(*b)));
        random.zeroize();

        Self { coefficients }
    }

    /// Evaluate at `x` using Horner's rule
    pub fn evaluate(&self, x: Gf256) -> Gf256 {
        self.coefficients
            .iter()
            .rev()
            .fold(Gf256::ZERO, |acc, c| acc * x + *c)
    }

    pub fn degree(&self) -> usize {
        self.coefficients.len().saturating_sub(1)
    }
}

/// Interpolate the polynomial through `points` and evaluate it at zero
///
/// Returns `None` when two points share an x coordinate.
pub fn interpolate_at_zero(points: &[(Gf256, Gf256)]) -> Option<Gf256> {
    let mut value = Gf256::ZERO;
    for (i, (xi, yi)) in points.iter().enumerate() {
        let mut numerator = Gf256::ONE;
        let mut denominator = Gf256::ONE;
        for (j, (xj, _)) in points.iter().enumerate() {
            if i == j {
                continue;
            }
            // Basis polynomial evaluated at 0: prod(0 - xj) / prod(xi - xj)
            numerator = numerator * *xj;
            denominator = denominator * (*xi - *xj);
        }
        let basis = numerator * denominator.invert()?;
        value = value + *yi * basis;
    }
    Some(value)
}
