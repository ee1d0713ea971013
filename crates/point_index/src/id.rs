//! Id - arbitrary-width node address.
//!
//! Node ids grow by `dims` bits per tree level, so a 3D tree passes the
//! 64-bit range around depth 21. `Id` stores little-endian `u64` limbs with
//! no trailing zero limbs; two inline limbs cover every depth below 42
//! without a heap allocation.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;
use thiserror::Error;

type Limbs = SmallVec<[u64; 2]>;

/// Largest power of ten that fits a limb, used for decimal conversion.
const DECIMAL_CHUNK: u64 = 10_000_000_000_000_000_000;
const DECIMAL_CHUNK_DIGITS: usize = 19;

/// Node identifier of unbounded width.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Id {
  limbs: Limbs,
}

/// A string that is not a decimal node id.
#[derive(Debug, Error)]
#[error("invalid node id: {0:?}")]
pub struct ParseIdError(String);

impl Id {
  /// The root node.
  pub fn zero() -> Self {
    Self::default()
  }

  /// Check if this is the root id.
  #[inline]
  pub fn is_zero(&self) -> bool {
    self.limbs.is_empty()
  }

  /// Lowest 64 bits.
  #[inline]
  pub fn low_u64(&self) -> u64 {
    self.limbs.first().copied().unwrap_or(0)
  }

  /// Value as `u64` if it fits.
  pub fn to_u64(&self) -> Option<u64> {
    match self.limbs.len() {
      0 => Some(0),
      1 => Some(self.limbs[0]),
      _ => None,
    }
  }

  /// Little-endian limbs, without trailing zeros.
  #[inline]
  pub fn limbs(&self) -> &[u64] {
    &self.limbs
  }

  pub fn from_le_limbs(limbs: &[u64]) -> Self {
    Self::from_limbs(limbs.iter().copied().collect())
  }

  /// Number of significant bits.
  pub fn bits(&self) -> usize {
    match self.limbs.last() {
      None => 0,
      Some(top) => (self.limbs.len() - 1) * 64 + (64 - top.leading_zeros() as usize),
    }
  }

  /// Child id in direction `dir`: `(self << dims) + 1 + dir`.
  pub fn child(&self, dims: u32, dir: u64) -> Self {
    let mut id = self.shl(dims as usize);
    id.add_small(1 + dir);
    id
  }

  /// Parent id, or `None` for the root.
  pub fn parent(&self, dims: u32) -> Option<Self> {
    let mut id = self.checked_sub(&Self::from(1))?;
    id = id.shr(dims as usize);
    Some(id)
  }

  /// Direction of this node within its parent.
  pub fn direction(&self, dims: u32) -> Option<u64> {
    let id = self.checked_sub(&Self::from(1))?;
    Some(id.low_u64() & ((1u64 << dims) - 1))
  }

  /// Shift left by `bits`.
  pub fn shl(&self, bits: usize) -> Self {
    if self.is_zero() || bits == 0 {
      return self.clone();
    }
    let limb_shift = bits / 64;
    let bit_shift = bits % 64;

    let mut limbs = Limbs::with_capacity(self.limbs.len() + limb_shift + 1);
    limbs.extend(std::iter::repeat(0).take(limb_shift));
    if bit_shift == 0 {
      limbs.extend(self.limbs.iter().copied());
    } else {
      let mut carry = 0u64;
      for &limb in &self.limbs {
        limbs.push((limb << bit_shift) | carry);
        carry = limb >> (64 - bit_shift);
      }
      if carry != 0 {
        limbs.push(carry);
      }
    }
    Self::from_limbs(limbs)
  }

  /// Shift right by `bits`.
  pub fn shr(&self, bits: usize) -> Self {
    let limb_shift = bits / 64;
    if limb_shift >= self.limbs.len() {
      return Self::zero();
    }
    let bit_shift = bits % 64;
    let src = &self.limbs[limb_shift..];

    let mut limbs = Limbs::with_capacity(src.len());
    if bit_shift == 0 {
      limbs.extend(src.iter().copied());
    } else {
      for (i, &limb) in src.iter().enumerate() {
        let high = src.get(i + 1).copied().unwrap_or(0);
        limbs.push((limb >> bit_shift) | (high << (64 - bit_shift)));
      }
    }
    Self::from_limbs(limbs)
  }

  /// Sum of two ids.
  pub fn add(&self, other: &Self) -> Self {
    let len = self.limbs.len().max(other.limbs.len());
    let mut limbs = Limbs::with_capacity(len + 1);
    let mut carry = false;
    for i in 0..len {
      let a = self.limbs.get(i).copied().unwrap_or(0);
      let b = other.limbs.get(i).copied().unwrap_or(0);
      let (sum, o1) = a.overflowing_add(b);
      let (sum, o2) = sum.overflowing_add(carry as u64);
      limbs.push(sum);
      carry = o1 || o2;
    }
    if carry {
      limbs.push(1);
    }
    Self::from_limbs(limbs)
  }

  /// Difference, or `None` if `other > self`.
  pub fn checked_sub(&self, other: &Self) -> Option<Self> {
    if *self < *other {
      return None;
    }
    let mut limbs = Limbs::with_capacity(self.limbs.len());
    let mut borrow = false;
    for (i, &a) in self.limbs.iter().enumerate() {
      let b = other.limbs.get(i).copied().unwrap_or(0);
      let (diff, o1) = a.overflowing_sub(b);
      let (diff, o2) = diff.overflowing_sub(borrow as u64);
      limbs.push(diff);
      borrow = o1 || o2;
    }
    Some(Self::from_limbs(limbs))
  }

  /// Add a small value in place.
  pub fn add_small(&mut self, value: u64) {
    let mut carry = value;
    for limb in self.limbs.iter_mut() {
      if carry == 0 {
        return;
      }
      let (sum, overflow) = limb.overflowing_add(carry);
      *limb = sum;
      carry = overflow as u64;
    }
    if carry != 0 {
      self.limbs.push(carry);
    }
  }

  fn mul_small(&mut self, factor: u64) {
    let mut carry = 0u128;
    for limb in self.limbs.iter_mut() {
      let product = (*limb as u128) * (factor as u128) + carry;
      *limb = product as u64;
      carry = product >> 64;
    }
    if carry != 0 {
      self.limbs.push(carry as u64);
    }
    self.normalize();
  }

  fn div_rem_small(&self, divisor: u64) -> (Self, u64) {
    let mut limbs = Limbs::from_elem(0, self.limbs.len());
    let mut rem = 0u128;
    for i in (0..self.limbs.len()).rev() {
      let cur = (rem << 64) | self.limbs[i] as u128;
      limbs[i] = (cur / divisor as u128) as u64;
      rem = cur % divisor as u128;
    }
    (Self::from_limbs(limbs), rem as u64)
  }

  fn from_limbs(limbs: Limbs) -> Self {
    let mut id = Self { limbs };
    id.normalize();
    id
  }

  fn normalize(&mut self) {
    while self.limbs.last() == Some(&0) {
      self.limbs.pop();
    }
  }
}

impl From<u64> for Id {
  fn from(value: u64) -> Self {
    let mut limbs = Limbs::new();
    if value != 0 {
      limbs.push(value);
    }
    Self { limbs }
  }
}

impl Ord for Id {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .limbs
      .len()
      .cmp(&other.limbs.len())
      .then_with(|| self.limbs.iter().rev().cmp(other.limbs.iter().rev()))
  }
}

impl PartialOrd for Id {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl fmt::Display for Id {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.is_zero() {
      return f.write_str("0");
    }
    let mut chunks = Vec::new();
    let mut rest = self.clone();
    while !rest.is_zero() {
      let (quotient, rem) = rest.div_rem_small(DECIMAL_CHUNK);
      chunks.push(rem);
      rest = quotient;
    }
    let mut iter = chunks.iter().rev();
    if let Some(first) = iter.next() {
      write!(f, "{first}")?;
    }
    for chunk in iter {
      write!(f, "{chunk:0width$}", width = DECIMAL_CHUNK_DIGITS)?;
    }
    Ok(())
  }
}

impl fmt::Debug for Id {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Id({self})")
  }
}

impl FromStr for Id {
  type Err = ParseIdError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
      return Err(ParseIdError(s.to_string()));
    }
    let mut id = Self::zero();
    for digit in s.bytes() {
      id.mul_small(10);
      id.add_small((digit - b'0') as u64);
    }
    Ok(id)
  }
}

impl Serialize for Id {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

struct IdVisitor;

impl<'de> Visitor<'de> for IdVisitor {
  type Value = Id;

  fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("a decimal node id")
  }

  fn visit_str<E: de::Error>(self, v: &str) -> Result<Id, E> {
    v.parse().map_err(E::custom)
  }

  fn visit_u64<E: de::Error>(self, v: u64) -> Result<Id, E> {
    Ok(Id::from(v))
  }
}

impl<'de> Deserialize<'de> for Id {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    deserializer.deserialize_str(IdVisitor)
  }
}

/// First id at `depth` for a tree with `dims` bits per level.
pub fn level_begin(depth: usize, dims: u32) -> Id {
  let mut id = Id::zero();
  for _ in 0..depth {
    id = id.shl(dims as usize);
    id.add_small(1);
  }
  id
}

#[cfg(test)]
#[path = "id_test.rs"]
mod id_test;
