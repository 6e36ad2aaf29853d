//! FF1 format-preserving encryption (NIST SP 800-38G §5).
//!
//! Operates on numeral strings over an arbitrary alphabet, producing
//! ciphertext of the same length over the same alphabet. The round function
//! is an AES-CBC-MAC over a fixed 16-byte prefix plus the tweak and the
//! numeral value of half the input, expanded with counter blocks when the
//! round needs more than one AES block of output.
//!
//! AES-128 is selected for 16-byte keys and AES-256 for 32-byte keys.

use crate::error::{CryptoError, CryptoResult};
use crate::numeral::{self, Alphabet};
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes128, Aes256};
use num_bigint::BigUint;

/// The AES block cipher behind the FF1 round function, keyed once at
/// construction.
enum RoundCipher {
    Aes128(Aes128),
    Aes256(Aes256),
}

impl RoundCipher {
    fn new(key: &[u8]) -> CryptoResult<Self> {
        match key.len() {
            16 => Ok(Self::Aes128(
                Aes128::new_from_slice(key).expect("length checked"),
            )),
            32 => Ok(Self::Aes256(
                Aes256::new_from_slice(key).expect("length checked"),
            )),
            n => Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: n,
            }),
        }
    }

    fn encrypt_block(&self, block: &mut [u8; 16]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            Self::Aes128(c) => c.encrypt_block(block),
            Self::Aes256(c) => c.encrypt_block(block),
        }
    }
}

/// A keyed, tweaked FF1 instance over a fixed alphabet.
pub struct Ff1 {
    cipher: RoundCipher,
    tweak: Vec<u8>,
    alphabet: Alphabet,
    txtmin: usize,
    txtmax: usize,
}

const ROUNDS: usize = 10;

impl Ff1 {
    /// Creates an FF1 instance.
    ///
    /// The radix is the alphabet's cardinality; it must satisfy
    /// `radix^minlen >= 10^6`, which pins the minimum input length to
    /// `ceil(6 / log10(radix))` (floored at 2).
    pub fn new(key: &[u8], tweak: Vec<u8>, alphabet: &str) -> CryptoResult<Self> {
        let alphabet = Alphabet::new(alphabet)?;
        let radix = alphabet.radix();

        let txtmin = ((6.0 / (radix as f64).log10()).ceil() as usize).max(2);
        if txtmin > 65536 {
            return Err(CryptoError::InvalidInput(format!(
                "radix {radix} requires inputs longer than 65536 characters"
            )));
        }

        Ok(Self {
            cipher: RoundCipher::new(key)?,
            tweak,
            alphabet,
            txtmin,
            txtmax: u32::MAX as usize,
        })
    }

    /// Minimum accepted input length for this radix.
    pub fn min_len(&self) -> usize {
        self.txtmin
    }

    pub fn encrypt(&self, input: &str) -> CryptoResult<String> {
        let x: Vec<char> = input.chars().collect();
        let g = self.geometry(x.len())?;

        let mut a = x[..g.u].to_vec();
        let mut b = x[g.u..].to_vec();
        let mut pq = g.pq_template(&self.tweak);

        for i in 0..ROUNDS {
            let m = if i % 2 == 0 { g.u } else { g.v };
            let rpow = BigUint::from(self.alphabet.radix()).pow(m as u32);

            self.fill_round(&mut pq, i as u8, &b, g.b)?;
            let y = self.prf_expand(&pq, g.d);

            let c = (numeral::str_to_int(&self.alphabet, &a)? + y) % &rpow;
            let c_str = numeral::int_to_str(&self.alphabet, &c, m)?;

            a = b;
            b = c_str;
        }

        Ok(a.into_iter().chain(b).collect())
    }

    pub fn decrypt(&self, input: &str) -> CryptoResult<String> {
        let x: Vec<char> = input.chars().collect();
        let g = self.geometry(x.len())?;

        let mut a = x[..g.u].to_vec();
        let mut b = x[g.u..].to_vec();
        let mut pq = g.pq_template(&self.tweak);

        for i in (0..ROUNDS).rev() {
            let m = if i % 2 == 0 { g.u } else { g.v };
            let rpow = BigUint::from(self.alphabet.radix()).pow(m as u32);

            self.fill_round(&mut pq, i as u8, &a, g.b)?;
            let y = self.prf_expand(&pq, g.d);

            // (NUM(B) - y) mod radix^m, kept non-negative by adding the
            // modulus before subtracting the reduced y
            let c = (numeral::str_to_int(&self.alphabet, &b)? + &rpow - y % &rpow) % &rpow;
            let c_str = numeral::int_to_str(&self.alphabet, &c, m)?;

            b = a;
            a = c_str;
        }

        Ok(a.into_iter().chain(b).collect())
    }

    /// Validates the input length and derives the per-length constants of
    /// SP 800-38G §5: split point, numeral byte width `b`, PRF output width
    /// `d`, and the P||Q layout.
    fn geometry(&self, n: usize) -> CryptoResult<Geometry> {
        if n < self.txtmin || n > self.txtmax {
            return Err(CryptoError::InvalidInput(format!(
                "input length {n} outside [{}, {}]",
                self.txtmin, self.txtmax
            )));
        }

        let radix = self.alphabet.radix();
        let u = n / 2;
        let v = n - u;

        // b = ceil(ceil(v * log2(radix)) / 8), computed exactly:
        // ceil(v * log2(radix)) is the bit length of radix^v - 1
        let max_numeral = BigUint::from(radix).pow(v as u32) - 1u8;
        let bits = max_numeral.bits() as usize;
        let b = (bits + 7) / 8;
        let d = 4 * ((b + 3) / 4) + 4;

        let t = self.tweak.len();
        let q = 16 * ((t + b + 1 + 15) / 16);

        Ok(Geometry { radix, n, u, v, b, d, q })
    }

    /// Writes the round number and the numeral value of `half` into the
    /// trailing bytes of P||Q.
    fn fill_round(&self, pq: &mut [u8], round: u8, half: &[char], b: usize) -> CryptoResult<()> {
        let len = pq.len();
        pq[len - b - 1] = round;

        let num = numeral::str_to_int(&self.alphabet, half)?;
        let bytes = num.to_bytes_be();
        let tail = &mut pq[len - b..];
        tail.fill(0);
        // num < radix^v, which fits in b bytes by construction
        tail[b - bytes.len()..].copy_from_slice(&bytes);
        Ok(())
    }

    /// CBC-MAC over P||Q (zero IV, chained block by block), expanded with
    /// encrypted counter blocks until `d` bytes are available, interpreted
    /// as a big-endian integer.
    fn prf_expand(&self, pq: &[u8], d: usize) -> BigUint {
        let mut r0 = [0u8; 16];
        for block in pq.chunks(16) {
            for (acc, x) in r0.iter_mut().zip(block) {
                *acc ^= x;
            }
            self.cipher.encrypt_block(&mut r0);
        }

        let blocks = (d + 15) / 16;
        let mut s = Vec::with_capacity(blocks * 16);
        s.extend_from_slice(&r0);
        for j in 1..blocks as u128 {
            let mut blk = r0;
            for (x, c) in blk.iter_mut().zip(j.to_be_bytes()) {
                *x ^= c;
            }
            self.cipher.encrypt_block(&mut blk);
            s.extend_from_slice(&blk);
        }

        BigUint::from_bytes_be(&s[..d])
    }
}

/// Per-invocation layout constants.
struct Geometry {
    radix: u32,
    n: usize,
    u: usize,
    v: usize,
    b: usize,
    d: usize,
    q: usize,
}

impl Geometry {
    /// The fixed 16-byte P block followed by the tweak and zero padding;
    /// the round byte and numeral bytes are filled in per round.
    fn pq_template(&self, tweak: &[u8]) -> Vec<u8> {
        let mut pq = vec![0u8; 16 + self.q];

        pq[0] = 1;
        pq[1] = 2;
        pq[2] = 1;
        pq[3] = (self.radix >> 16) as u8;
        pq[4] = (self.radix >> 8) as u8;
        pq[5] = self.radix as u8;
        pq[6] = 10;
        pq[7] = (self.u % 256) as u8;
        pq[8..12].copy_from_slice(&(self.n as u32).to_be_bytes());
        pq[12..16].copy_from_slice(&(tweak.len() as u32).to_be_bytes());

        pq[16..16 + tweak.len()].copy_from_slice(tweak);
        pq
    }
}
