//! Random number generation utilities.
//!
//! The field cipher and vault codec sample IVs through [`Crng`], so tests can
//! swap in the deterministic [`SmallRng`] and production uses the OS-backed
//! [`SysRng`].

use std::num::NonZeroU32;

pub use rand_core::{CryptoRng, RngCore, SeedableRng};
use ring::rand::SecureRandom;

const RAND_ERROR_CODE: NonZeroU32 =
    match NonZeroU32::new(rand_core::Error::CUSTOM_START) {
        Some(code) => code,
        None => unreachable!(),
    };

/// A succinct trait alias for a Cryptographically Secure PRNG.
pub trait Crng: RngCore + CryptoRng {}

impl<R: RngCore + CryptoRng> Crng for R {}

/// Extension helpers over any [`Crng`].
pub trait RngExt {
    /// Sample a fixed-size array of random bytes.
    fn gen_bytes<const N: usize>(&mut self) -> [u8; N];
}

impl<R: Crng> RngExt for R {
    fn gen_bytes<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        self.fill_bytes(&mut out);
        out
    }
}

/// A compatibility wrapper so we can use `ring`'s PRG with `rand` traits.
#[derive(Clone, Debug)]
pub struct SysRng(ring::rand::SystemRandom);

impl SysRng {
    pub fn new() -> Self {
        Self(ring::rand::SystemRandom::new())
    }
}

impl Default for SysRng {
    fn default() -> Self {
        Self::new()
    }
}

/// [`ring::rand::SystemRandom`] is a cryptographically secure PRG
impl CryptoRng for SysRng {}

impl RngCore for SysRng {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        rand_core::impls::next_u32_via_fill(self)
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        rand_core::impls::next_u64_via_fill(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.try_fill_bytes(dest).expect("ring SystemRandom failed")
    }

    fn try_fill_bytes(
        &mut self,
        dest: &mut [u8],
    ) -> Result<(), rand_core::Error> {
        self.0
            .fill(dest)
            // ring's error type here is empty/unspecified anyway, so the
            // specific code doesn't matter.
            .map_err(|_| rand_core::Error::from(RAND_ERROR_CODE))
    }
}

/// A small, fast, _non-cryptographic_ rng with decent statistical properties.
/// Useful as a deterministic RNG for tests (instead of [`SysRng`], which uses
/// the global OS RNG).
///
/// The implementation is the same as `Xoroshiro64Star`.
#[derive(Clone, Debug)]
pub struct SmallRng {
    s0: u32,
    s1: u32,
}

impl SmallRng {
    pub fn new() -> Self {
        Self {
            s0: 0xdeadbeef,
            s1: 0xf00baa44,
        }
    }

    pub fn from_u64(s: u64) -> Self {
        Self::seed_from_u64(s)
    }
}

impl Default for SmallRng {
    fn default() -> Self {
        Self::new()
    }
}

impl SeedableRng for SmallRng {
    type Seed = [u8; 8];

    fn from_seed(seed: Self::Seed) -> Self {
        let mut s = [0u32; 2];
        rand_core::le::read_u32_into(&seed, &mut s);
        // Zero state would only ever emit zero.
        if s == [0, 0] {
            Self::new()
        } else {
            Self { s0: s[0], s1: s[1] }
        }
    }
}

/// Only a [`CryptoRng`] in the sense needed to exercise crypto code in tests.
impl CryptoRng for SmallRng {}

impl RngCore for SmallRng {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        let r = self.s0.wrapping_mul(0x9e3779bb);
        self.s1 ^= self.s0;
        self.s0 = self.s0.rotate_left(26) ^ self.s1 ^ (self.s1 << 9);
        self.s1 = self.s1.rotate_left(13);
        r
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        rand_core::impls::next_u64_via_u32(self)
    }

    #[inline]
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        rand_core::impls::fill_bytes_via_next(self, dest);
    }

    #[inline]
    fn try_fill_bytes(
        &mut self,
        dest: &mut [u8],
    ) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn small_rng_is_deterministic() {
        let mut rng1 = SmallRng::from_u64(42);
        let mut rng2 = SmallRng::from_u64(42);
        let a: [u8; 16] = rng1.gen_bytes();
        let b: [u8; 16] = rng2.gen_bytes();
        assert_eq!(a, b);

        let c: [u8; 16] = rng1.gen_bytes();
        assert_ne!(a, c);
    }
}
