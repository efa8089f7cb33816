//! Fixed-width two-state bit vectors.
//!
//! Every [`BitVec`] carries its declared width and is kept normalized: bits
//! above the width are always zero, after construction and after every
//! operation. Arithmetic wraps modulo `2^width`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitXor, Not};

/// Returns a mask with the low `width` bits set, saturating at 64 bits.
pub fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// A two-state unsigned integer of a fixed bit width.
///
/// Bits are packed little-endian: bit `i` lives in word `i / 64`, position
/// `i % 64`. A width of zero is the empty vector and holds no words.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawBitVec")]
pub struct BitVec {
    width: u32,
    words: Vec<u64>,
}

#[derive(Deserialize)]
struct RawBitVec {
    width: u32,
    words: Vec<u64>,
}

impl From<RawBitVec> for BitVec {
    fn from(raw: RawBitVec) -> Self {
        BitVec::from_words(&raw.words, raw.width)
    }
}

impl BitVec {
    /// Creates an all-zero vector of the given width.
    pub fn zero(width: u32) -> Self {
        Self {
            width,
            words: vec![0; word_count(width)],
        }
    }

    /// Creates an all-one vector of the given width.
    pub fn ones(width: u32) -> Self {
        let mut v = Self {
            width,
            words: vec![u64::MAX; word_count(width)],
        };
        v.normalize();
        v
    }

    /// Creates a vector from a `u64`, truncating to `width`.
    pub fn from_u64(value: u64, width: u32) -> Self {
        let mut v = Self::zero(width);
        if let Some(w) = v.words.first_mut() {
            *w = value;
        }
        v.normalize();
        v
    }

    /// Creates a 1-bit vector from a boolean.
    pub fn from_bool(value: bool) -> Self {
        Self::from_u64(value as u64, 1)
    }

    /// Creates a vector from little-endian words, truncating or zero-filling to `width`.
    pub fn from_words(words: &[u64], width: u32) -> Self {
        let mut v = Self::zero(width);
        for (dst, src) in v.words.iter_mut().zip(words) {
            *dst = *src;
        }
        v.normalize();
        v
    }

    /// Returns the declared width in bits.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns the packed little-endian words.
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Returns bit `index`, or `false` beyond the width.
    pub fn bit(&self, index: u32) -> bool {
        if index >= self.width {
            return false;
        }
        (self.words[(index / 64) as usize] >> (index % 64)) & 1 == 1
    }

    fn set_bit(&mut self, index: u32, value: bool) {
        let word = &mut self.words[(index / 64) as usize];
        let bit = 1u64 << (index % 64);
        if value {
            *word |= bit;
        } else {
            *word &= !bit;
        }
    }

    /// Returns the low 64 bits.
    pub fn to_u64(&self) -> u64 {
        self.words.first().copied().unwrap_or(0)
    }

    /// Returns the value as a `u64` if no bit above position 63 is set.
    pub fn to_u64_exact(&self) -> Option<u64> {
        if self.words.iter().skip(1).any(|w| *w != 0) {
            None
        } else {
            Some(self.to_u64())
        }
    }

    /// Returns `true` if every bit is zero.
    pub fn is_zero(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Zero-extends or truncates to `width`.
    pub fn resize(&self, width: u32) -> Self {
        Self::from_words(&self.words, width)
    }

    /// Extracts bits `high..=low`.
    ///
    /// Returns `None` if `high` is outside the width or `high < low`.
    pub fn slice(&self, high: u32, low: u32) -> Option<Self> {
        if high >= self.width || high < low {
            return None;
        }
        Some(self.shr(low as u64).resize(high - low + 1))
    }

    /// Concatenates parts MSB-first: the first part occupies the highest bits.
    pub fn concat(parts: &[BitVec]) -> Self {
        let width = parts.iter().map(|p| p.width).sum();
        let mut out = Self::zero(width);
        let mut pos = width;
        for part in parts {
            pos -= part.width;
            for i in 0..part.width {
                if part.bit(i) {
                    out.set_bit(pos + i, true);
                }
            }
        }
        out
    }

    /// Wrapping addition at `width`.
    pub fn add(&self, rhs: &BitVec, width: u32) -> Self {
        let a = self.resize(width);
        let b = rhs.resize(width);
        let mut out = Self::zero(width);
        let mut carry = false;
        for i in 0..out.words.len() {
            let (s1, c1) = a.words[i].overflowing_add(b.words[i]);
            let (s2, c2) = s1.overflowing_add(carry as u64);
            out.words[i] = s2;
            carry = c1 || c2;
        }
        out.normalize();
        out
    }

    /// Wrapping subtraction at `width`.
    pub fn sub(&self, rhs: &BitVec, width: u32) -> Self {
        let neg = BitVec::zero(width).add(&!&rhs.resize(width), width);
        self.add(&neg, width).add(&BitVec::from_u64(1, width), width)
    }

    /// Two's complement negation at the vector's own width.
    pub fn neg(&self) -> Self {
        BitVec::zero(self.width).sub(self, self.width)
    }

    /// Wrapping multiplication at `width`.
    pub fn mul(&self, rhs: &BitVec, width: u32) -> Self {
        let a = self.resize(width);
        let b = rhs.resize(width);
        let n = a.words.len();
        let mut acc = vec![0u64; n];
        for i in 0..n {
            let mut carry: u128 = 0;
            for j in 0..(n - i) {
                let cur = acc[i + j] as u128 + (a.words[i] as u128) * (b.words[j] as u128) + carry;
                acc[i + j] = cur as u64;
                carry = cur >> 64;
            }
        }
        Self::from_words(&acc, width)
    }

    /// Unsigned division at `width`; `None` when `rhs` is zero.
    pub fn udiv(&self, rhs: &BitVec, width: u32) -> Option<Self> {
        self.divmod(rhs, width).map(|(q, _)| q)
    }

    /// Unsigned remainder at `width`; `None` when `rhs` is zero.
    pub fn urem(&self, rhs: &BitVec, width: u32) -> Option<Self> {
        self.divmod(rhs, width).map(|(_, r)| r)
    }

    fn divmod(&self, rhs: &BitVec, width: u32) -> Option<(Self, Self)> {
        let n = self.resize(width);
        let d = rhs.resize(width);
        if d.is_zero() {
            return None;
        }
        if let (Some(a), Some(b)) = (n.to_u64_exact(), d.to_u64_exact()) {
            return Some((Self::from_u64(a / b, width), Self::from_u64(a % b, width)));
        }
        // Shift-subtract; the remainder needs one spare bit to hold `r << 1`.
        let wide = width + 1;
        let d_wide = d.resize(wide);
        let mut q = Self::zero(width);
        let mut r = Self::zero(wide);
        for i in (0..width).rev() {
            r = r.shl(1);
            if n.bit(i) {
                r.set_bit(0, true);
            }
            if r.ucmp(&d_wide) != Ordering::Less {
                r = r.sub(&d_wide, wide);
                q.set_bit(i, true);
            }
        }
        Some((q, r.resize(width)))
    }

    /// Logical shift left by `amount`, keeping the width.
    pub fn shl(&self, amount: u64) -> Self {
        if amount >= self.width as u64 {
            return Self::zero(self.width);
        }
        let amount = amount as u32;
        let mut out = Self::zero(self.width);
        for i in amount..self.width {
            if self.bit(i - amount) {
                out.set_bit(i, true);
            }
        }
        out
    }

    /// Logical shift right by `amount`, keeping the width.
    pub fn shr(&self, amount: u64) -> Self {
        if amount >= self.width as u64 {
            return Self::zero(self.width);
        }
        let amount = amount as u32;
        let mut out = Self::zero(self.width);
        for i in 0..(self.width - amount) {
            if self.bit(i + amount) {
                out.set_bit(i, true);
            }
        }
        out
    }

    /// Shift amount carried by this vector, saturating when it does not fit a `u64`.
    pub fn shift_amount(&self) -> u64 {
        self.to_u64_exact().unwrap_or(u64::MAX)
    }

    /// Numeric comparison, independent of the operands' widths.
    pub fn ucmp(&self, rhs: &BitVec) -> Ordering {
        let n = self.words.len().max(rhs.words.len());
        for i in (0..n).rev() {
            let a = self.words.get(i).copied().unwrap_or(0);
            let b = rhs.words.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }

    /// AND of all bits; `true` for the empty vector.
    pub fn reduce_and(&self) -> bool {
        *self == Self::ones(self.width)
    }

    /// OR of all bits.
    pub fn reduce_or(&self) -> bool {
        !self.is_zero()
    }

    /// XOR of all bits (odd parity).
    pub fn reduce_xor(&self) -> bool {
        self.words.iter().map(|w| w.count_ones()).sum::<u32>() % 2 == 1
    }

    /// Formats as lowercase hexadecimal without a prefix.
    pub fn to_hex(&self) -> String {
        if self.width == 0 {
            return "0".into();
        }
        let digits = self.width.div_ceil(4);
        let mut s = String::with_capacity(digits as usize);
        for d in (0..digits).rev() {
            let mut nibble = 0u8;
            for b in 0..4 {
                if self.bit(d * 4 + b) {
                    nibble |= 1 << b;
                }
            }
            s.push(char::from_digit(nibble as u32, 16).unwrap_or('0'));
        }
        s
    }

    /// Parses `0x`/`0b` prefixed or decimal text and fits it to `width`.
    ///
    /// Returns `None` on malformed text. Values are truncated to `width`.
    /// Underscores are accepted as digit separators.
    pub fn parse(text: &str, width: u32) -> Option<Self> {
        let text: String = text.trim().chars().filter(|c| *c != '_').collect();
        let (digits, radix) = if let Some(rest) = text.strip_prefix("0x").or(text.strip_prefix("0X")) {
            (rest.to_string(), 16)
        } else if let Some(rest) = text.strip_prefix("0b").or(text.strip_prefix("0B")) {
            (rest.to_string(), 2)
        } else {
            (text.clone(), 10)
        };
        if digits.is_empty() {
            return None;
        }
        let acc_width = width.max(64) + 4;
        let mut acc = Self::zero(acc_width);
        let radix_vec = Self::from_u64(radix as u64, acc_width);
        for c in digits.chars() {
            let digit = c.to_digit(radix)?;
            acc = acc
                .mul(&radix_vec, acc_width)
                .add(&Self::from_u64(digit as u64, acc_width), acc_width);
        }
        Some(acc.resize(width))
    }

    fn normalize(&mut self) {
        let rem = self.width % 64;
        if rem != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= mask(rem);
            }
        }
    }
}

impl fmt::Display for BitVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in (0..self.width).rev() {
            write!(f, "{}", if self.bit(i) { '1' } else { '0' })?;
        }
        Ok(())
    }
}

impl fmt::Debug for BitVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitVec({}'h{})", self.width, self.to_hex())
    }
}

fn zip_words(a: &BitVec, b: &BitVec, op: impl Fn(u64, u64) -> u64) -> BitVec {
    let width = a.width.max(b.width);
    let mut out = BitVec::zero(width);
    for (i, w) in out.words.iter_mut().enumerate() {
        let x = a.words.get(i).copied().unwrap_or(0);
        let y = b.words.get(i).copied().unwrap_or(0);
        *w = op(x, y);
    }
    out.normalize();
    out
}

impl BitAnd for &BitVec {
    type Output = BitVec;

    fn bitand(self, rhs: Self) -> BitVec {
        zip_words(self, rhs, |a, b| a & b)
    }
}

impl BitOr for &BitVec {
    type Output = BitVec;

    fn bitor(self, rhs: Self) -> BitVec {
        zip_words(self, rhs, |a, b| a | b)
    }
}

impl BitXor for &BitVec {
    type Output = BitVec;

    fn bitxor(self, rhs: Self) -> BitVec {
        zip_words(self, rhs, |a, b| a ^ b)
    }
}

impl Not for &BitVec {
    type Output = BitVec;

    fn not(self) -> BitVec {
        let mut out = BitVec {
            width: self.width,
            words: self.words.iter().map(|w| !w).collect(),
        };
        out.normalize();
        out
    }
}

fn word_count(width: u32) -> usize {
    width.div_ceil(64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bv(v: u64, w: u32) -> BitVec {
        BitVec::from_u64(v, w)
    }

    #[test]
    fn from_u64_truncates() {
        assert_eq!(bv(0x1ff, 8).to_u64(), 0xff);
        assert_eq!(bv(5, 2).to_u64(), 1);
    }

    #[test]
    fn add_wraps_at_width() {
        assert_eq!(bv(3, 2).add(&bv(1, 2), 2), bv(0, 2));
        assert_eq!(bv(200, 8).add(&bv(100, 8), 8).to_u64(), 44);
    }

    #[test]
    fn add_carries_across_words() {
        let a = BitVec::from_words(&[u64::MAX, 0], 100);
        let sum = a.add(&bv(1, 100), 100);
        assert_eq!(sum.words(), &[0, 1]);
    }

    #[test]
    fn sub_wraps_below_zero() {
        assert_eq!(bv(0, 4).sub(&bv(1, 4), 4).to_u64(), 0xf);
        assert_eq!(bv(10, 8).sub(&bv(3, 8), 8).to_u64(), 7);
    }

    #[test]
    fn neg_is_twos_complement() {
        assert_eq!(bv(1, 8).neg().to_u64(), 0xff);
        assert_eq!(bv(0, 8).neg().to_u64(), 0);
    }

    #[test]
    fn mul_truncates() {
        assert_eq!(bv(16, 8).mul(&bv(17, 8), 8).to_u64(), (16 * 17) & 0xff);
        let big = BitVec::from_words(&[1u64 << 63, 0], 128);
        assert_eq!(big.mul(&bv(4, 128), 128).words(), &[0, 2]);
    }

    #[test]
    fn div_and_rem() {
        assert_eq!(bv(17, 8).udiv(&bv(5, 8), 8), Some(bv(3, 8)));
        assert_eq!(bv(17, 8).urem(&bv(5, 8), 8), Some(bv(2, 8)));
        assert_eq!(bv(17, 8).udiv(&bv(0, 8), 8), None);
    }

    #[test]
    fn wide_division_matches_narrow() {
        let n = BitVec::from_words(&[0, 6], 128);
        let d = bv(3, 128);
        let q = n.udiv(&d, 128).unwrap();
        assert_eq!(q.words(), &[0, 2]);
        assert!(n.urem(&d, 128).unwrap().is_zero());
    }

    #[test]
    fn slice_extracts_range() {
        let v = bv(0b1011_0110, 8);
        assert_eq!(v.slice(5, 2), Some(bv(0b1101, 4)));
        assert_eq!(v.slice(8, 0), None);
        assert_eq!(v.slice(1, 2), None);
    }

    #[test]
    fn concat_first_part_is_msb() {
        let v = BitVec::concat(&[bv(0b10, 2), bv(0b011, 3)]);
        assert_eq!(v.width(), 5);
        assert_eq!(v.to_u64(), 0b10011);
    }

    #[test]
    fn shifts_past_width_are_zero() {
        assert_eq!(bv(0xff, 8).shl(3).to_u64(), 0xf8);
        assert_eq!(bv(0xff, 8).shr(3).to_u64(), 0x1f);
        assert!(bv(0xff, 8).shl(8).is_zero());
        assert!(bv(0xff, 8).shr(100).is_zero());
    }

    #[test]
    fn compare_across_widths() {
        assert_eq!(bv(5, 4).ucmp(&bv(5, 64)), Ordering::Equal);
        assert_eq!(bv(4, 3).ucmp(&bv(5, 16)), Ordering::Less);
        let wide = BitVec::from_words(&[0, 1], 65);
        assert_eq!(wide.ucmp(&bv(u64::MAX, 64)), Ordering::Greater);
    }

    #[test]
    fn reductions() {
        assert!(bv(0xf, 4).reduce_and());
        assert!(!bv(0x7, 4).reduce_and());
        assert!(BitVec::zero(0).reduce_and());
        assert!(bv(2, 4).reduce_or());
        assert!(bv(0b111, 3).reduce_xor());
        assert!(!bv(0b11, 3).reduce_xor());
    }

    #[test]
    fn bitwise_ops_stay_masked() {
        let a = bv(0b1100, 4);
        let b = bv(0b1010, 4);
        assert_eq!((&a & &b).to_u64(), 0b1000);
        assert_eq!((&a | &b).to_u64(), 0b1110);
        assert_eq!((&a ^ &b).to_u64(), 0b0110);
        assert_eq!((!&a).to_u64(), 0b0011);
    }

    #[test]
    fn ones_masks_partial_word() {
        let v = BitVec::ones(70);
        assert_eq!(v.words(), &[u64::MAX, 0x3f]);
    }

    #[test]
    fn display_and_hex() {
        assert_eq!(bv(0b101, 3).to_string(), "101");
        assert_eq!(bv(0x42, 8).to_hex(), "42");
        assert_eq!(bv(0x5, 9).to_hex(), "005");
    }

    #[test]
    fn parse_literals() {
        assert_eq!(BitVec::parse("0x42", 8), Some(bv(0x42, 8)));
        assert_eq!(BitVec::parse("0b1_01", 3), Some(bv(5, 3)));
        assert_eq!(BitVec::parse("300", 8), Some(bv(300 & 0xff, 8)));
        assert_eq!(BitVec::parse("0xzz", 8), None);
        assert_eq!(BitVec::parse("", 8), None);
    }

    #[test]
    fn deserialize_normalizes() {
        let v: BitVec = serde_json::from_str(r#"{"width":4,"words":[255]}"#).unwrap();
        assert_eq!(v.to_u64(), 0xf);
    }

    #[test]
    fn serde_roundtrip() {
        let v = BitVec::from_words(&[0xdead_beef, 0x3], 66);
        let json = serde_json::to_string(&v).unwrap();
        let back: BitVec = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
    }
}
