//! Radix-N numeral strings over an arbitrary alphabet.
//!
//! FF1 and the structured pipeline both treat strings as big-endian numerals
//! in the radix of their alphabet. This module owns the alphabet type and the
//! string ⇄ big-integer conversions, including the cross-alphabet translation
//! used to render ciphertext in a dataset's output character set.

use crate::error::{CryptoError, CryptoResult};
use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::Zero;
use std::collections::HashMap;

/// An ordered character set defining a radix.
///
/// Character order is significant: the numeral value of a character is its
/// position. Duplicate characters are rejected at construction.
#[derive(Clone, Debug)]
pub struct Alphabet {
    chars: Vec<char>,
    index: HashMap<char, u32>,
}

impl Alphabet {
    pub fn new(charset: &str) -> CryptoResult<Self> {
        let chars: Vec<char> = charset.chars().collect();
        if chars.len() < 2 {
            return Err(CryptoError::InvalidInput(format!(
                "alphabet needs at least 2 characters, got {}",
                chars.len()
            )));
        }
        if chars.len() > 65536 {
            return Err(CryptoError::InvalidInput(format!(
                "alphabet too large: {} characters (max 65536)",
                chars.len()
            )));
        }

        let mut index = HashMap::with_capacity(chars.len());
        for (i, &c) in chars.iter().enumerate() {
            if index.insert(c, i as u32).is_some() {
                return Err(CryptoError::InvalidInput(format!(
                    "duplicate character {c:?} in alphabet"
                )));
            }
        }

        Ok(Self { chars, index })
    }

    /// Number of characters, i.e. the radix of numerals over this alphabet.
    pub fn radix(&self) -> u32 {
        self.chars.len() as u32
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Numeral value of a character, if it is a member.
    pub fn pos(&self, c: char) -> Option<u32> {
        self.index.get(&c).copied()
    }

    pub fn contains(&self, c: char) -> bool {
        self.index.contains_key(&c)
    }

    /// Character for a numeral value.
    pub fn char_at(&self, i: usize) -> Option<char> {
        self.chars.get(i).copied()
    }

    /// The zero numeral, used for left-padding.
    pub fn zero(&self) -> char {
        self.chars[0]
    }
}

/// Interprets `s` as a big-endian numeral string over `alphabet`.
pub fn str_to_int(alphabet: &Alphabet, s: &[char]) -> CryptoResult<BigUint> {
    let radix = BigUint::from(alphabet.radix());
    let mut acc = BigUint::zero();
    for &c in s {
        let v = alphabet.pos(c).ok_or_else(|| {
            CryptoError::InvalidInput(format!("character {c:?} not in alphabet"))
        })?;
        acc = acc * &radix + v;
    }
    Ok(acc)
}

/// Renders `x` as a numeral string of exactly `len` characters, left-padded
/// with the zero numeral. Fails with `Overflow` if `x >= radix^len`.
pub fn int_to_str(alphabet: &Alphabet, x: &BigUint, len: usize) -> CryptoResult<Vec<char>> {
    let radix = BigUint::from(alphabet.radix());
    let mut out = vec![alphabet.zero(); len];
    let mut rem = x.clone();
    for slot in out.iter_mut().rev() {
        if rem.is_zero() {
            break;
        }
        let (q, r) = rem.div_rem(&radix);
        let digit: u32 = r
            .try_into()
            .expect("remainder of division by radix fits in u32");
        *slot = alphabet
            .char_at(digit as usize)
            .expect("digit is below radix");
        rem = q;
    }
    if !rem.is_zero() {
        return Err(CryptoError::Overflow(format!(
            "value needs more than {len} characters in radix {}",
            alphabet.radix()
        )));
    }
    Ok(out)
}

/// Translates a numeral string from one alphabet to another at a fixed
/// length, preserving its integer value.
pub fn convert_radix(
    s: &[char],
    from: &Alphabet,
    to: &Alphabet,
    len: usize,
) -> CryptoResult<Vec<char>> {
    let x = str_to_int(from, s)?;
    int_to_str(to, &x, len)
}
