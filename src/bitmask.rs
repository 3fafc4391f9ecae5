//! Arbitrary-precision bitmask.
//!
//! Bit `i` set means the unit at bit position `i` is held. Permission counts are
//! unbounded, so the value wraps a `BigUint` instead of a machine word. The
//! persisted form is the decimal string.

use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;
use crate::registry::BitPosition;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Bitmask(BigUint);

impl Bitmask {
    /// The empty mask.
    pub fn new() -> Self {
        Bitmask(BigUint::default())
    }

    /// Mask with exactly one bit set.
    pub fn from_bit(pos: BitPosition) -> Self {
        Bitmask::new().with_bit(pos)
    }

    /// `mask | (1 << pos)`, by value.
    pub fn with_bit(mut self, pos: BitPosition) -> Self {
        self.set_bit(pos);
        self
    }

    #[inline]
    pub fn set_bit(&mut self, pos: BitPosition) {
        self.0.set_bit(pos, true);
    }

    #[inline]
    pub fn clear_bit(&mut self, pos: BitPosition) {
        self.0.set_bit(pos, false);
    }

    #[inline]
    pub fn test_bit(&self, pos: BitPosition) -> bool {
        self.0.bit(pos)
    }

    pub fn union(&self, other: &Bitmask) -> Bitmask {
        Bitmask(&self.0 | &other.0)
    }

    #[inline]
    pub fn union_with(&mut self, other: &Bitmask) {
        self.0 |= &other.0;
    }

    /// `(self & other) == other`
    pub fn is_superset(&self, other: &Bitmask) -> bool {
        (&self.0 & &other.0) == other.0
    }

    pub fn intersects(&self, other: &Bitmask) -> bool {
        (&self.0 & &other.0).bits() != 0
    }

    pub fn popcount(&self) -> u64 {
        self.0.count_ones()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.bits() == 0
    }

    /// Set bit positions in ascending order.
    pub fn ones(&self) -> Vec<BitPosition> {
        let mut out = Vec::with_capacity(self.popcount() as usize);
        for (i, digit) in self.0.iter_u64_digits().enumerate() {
            let mut d = digit;
            while d != 0 {
                out.push(i as u64 * 64 + d.trailing_zeros() as u64);
                d &= d - 1;
            }
        }
        out
    }

    pub fn to_decimal(&self) -> String {
        self.0.to_str_radix(10)
    }

    pub fn from_decimal(s: &str) -> Result<Self, Error> {
        s.parse()
    }
}

impl From<u64> for Bitmask {
    fn from(v: u64) -> Self {
        Bitmask(BigUint::from(v))
    }
}

impl FromIterator<BitPosition> for Bitmask {
    fn from_iter<I: IntoIterator<Item = BitPosition>>(iter: I) -> Self {
        iter.into_iter().fold(Bitmask::new(), Bitmask::with_bit)
    }
}

impl FromStr for Bitmask {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        BigUint::from_str(s.trim())
            .map(Bitmask)
            .map_err(|e| Error::Corrupt(format!("bitmask '{}': {}", s, e)))
    }
}

impl fmt::Display for Bitmask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Bitmask {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Bitmask {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
