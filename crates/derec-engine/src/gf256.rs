//! Arithmetic in GF(2^8)
//!
//! Uses the Rijndael polynomial (x^8 + x^4 + x^3 + x + 1). Multiplication
//! is branchless; inversion is exponentiation by 254.

use std::ops::{Add, Mul, Sub};

use zeroize::Zeroize;

/// Low byte of the Rijndael reduction polynomial
const REDUCTION: u8 = 0x1b;

/// An element of GF(2^8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Zeroize)]
pub struct Gf256(u8);

impl Gf256 {
    pub const ZERO: Gf256 = Gf256(0);
    pub const ONE: Gf256 = Gf256(1);

    pub fn new(value: u8) -> Self {
        Self(value)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Multiplicative inverse; `None` for zero
    pub fn invert(self) -> Option<Self> {
        if self.0 == 0 {
            return None;
        }
        // a^254 == a^-1 since the multiplicative group has order 255
        let mut result = Gf256::ONE;
        let mut base = self;
        let mut exponent = 254u8;
        while exponent > 0 {
            if exponent & 1 == 1 {
                result = result * base;
            }
            base = base * base;
            exponent >>= 1;
        }
        Some(result)
    }
}

impl Add for Gf256 {
    type Output = Gf256;

    fn add(self, rhs: Gf256) -> Gf256 {
        Gf256(self.0 ^ rhs.0)
    }
}

impl Sub for Gf256 {
    type Output = Gf256;

    fn sub(self, rhs: Gf256) -> Gf256 {
        Gf256(self.0 ^ rhs.0)
    }
}

impl Mul for Gf256 {
    type Output = Gf256;

    fn mul(self, rhs: Gf256) -> Gf256 {
        let mut a = self.0;
        let mut b = rhs.0;
        let mut product = 0u8;
        for _ in 0..8 {
            product ^= a & 0u8.wrapping_sub(b & 1);
            let carry = a >> 7;
            a = (a << 1) ^ (REDUCTION & 0u8.wrapping_sub(carry));
            b >>= 1;
        }
        Gf256(product)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_product() {
        // FIPS-197 section 4.2 example: {57} * {83} = {c1}
        assert_eq!(Gf256::new(0x57) * Gf256::new(0x83), Gf256::new(0xc1));
    }

    #[test]
    fn test_every_nonzero_element_inverts() {
        for v in 1..=255u8 {
            let a = Gf256::new(v);
            let inv = a.invert().unwrap();
            assert_eq!(a * inv, Gf256::ONE, "inverse failed for {:#04x}", v);
        }
        assert!(Gf256::ZERO.invert().is_none());
    }

    #[test]
    fn test_addition_is_self_inverse() {
        let a = Gf256::new(0xab);
        assert_eq!(a + a, Gf256::ZERO);
        assert_eq!(a - Gf256::new(0x01), a + Gf256::new(0x01));
    }
}
