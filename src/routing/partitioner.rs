//! Partition-key hashing.
//!
//! A [`Partitioner`] maps a partition key byte sequence to a [`Token`],
//! the ordered value that locates the key on the ring. Two partitioners
//! exist and the set is closed, so they are a plain enum rather than an
//! open trait:
//!
//! - [`Partitioner::Murmur3`] - 64-bit signed tokens from the Cassandra
//!   variant of MurmurHash3 x64_128 (signed tail bytes, first 64 bits of
//!   the digest)
//! - [`Partitioner::Random`] - the MD5 digest read as an unsigned 128-bit
//!   big integer
//!
//! Tokens from different partitioners live in unrelated hash spaces and
//! must never be compared; [`Token::try_cmp`] rejects the attempt instead
//! of silently miscomparing.

use std::cmp::Ordering;
use std::fmt;

use md5::{Digest, Md5};
use num_bigint::BigUint;

use crate::error::{Result, TransportError};

/// The closed set of partitioner kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partitioner {
    /// Murmur3-based, 64-bit signed token space.
    Murmur3,
    /// MD5-based, 128-bit unsigned token space.
    Random,
}

impl Partitioner {
    /// Hash a partition key to its token.
    pub fn hash(&self, partition_key: &[u8]) -> Token {
        match self {
            Partitioner::Murmur3 => {
                let hash = murmur3_x64_128(partition_key).0;
                // The minimum value is reserved; remap it so no key ever
                // lands there and the hash space stays symmetric.
                let token = if hash == i64::MIN { i64::MAX } else { hash };
                Token::Murmur3(token)
            }
            Partitioner::Random => {
                let digest = Md5::digest(partition_key);
                Token::Random(BigUint::from_bytes_be(digest.as_slice()))
            }
        }
    }

    /// Parse the textual token form used for range-boundary configuration.
    /// Inverts [`Token`]'s `Display` for the same partitioner.
    pub fn parse(&self, text: &str) -> Result<Token> {
        let text = text.trim();
        match self {
            Partitioner::Murmur3 => text
                .parse::<i64>()
                .map(Token::Murmur3)
                .map_err(|e| TransportError::TokenParse(format!("{text:?}: {e}"))),
            Partitioner::Random => text
                .parse::<BigUint>()
                .map(Token::Random)
                .map_err(|e| TransportError::TokenParse(format!("{text:?}: {e}"))),
        }
    }
}

impl fmt::Display for Partitioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partitioner::Murmur3 => write!(f, "Murmur3Partitioner"),
            Partitioner::Random => write!(f, "RandomPartitioner"),
        }
    }
}

/// An opaque, totally ordered position in one partitioner's hash space.
///
/// Equality is structural: tokens of different partitioners are simply
/// unequal, which is what map keys and dedup need. *Ordering* is only
/// defined within one partitioner's space - cross-partitioner `==` is
/// `false`, but cross-partitioner comparison through
/// [`try_cmp`](Token::try_cmp) is an error, because "less than" between
/// unrelated hash spaces has no answer at all.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    /// Token in the Murmur3 space.
    Murmur3(i64),
    /// Token in the MD5 space.
    Random(BigUint),
}

impl Token {
    /// The partitioner whose space this token belongs to.
    pub fn partitioner(&self) -> Partitioner {
        match self {
            Token::Murmur3(_) => Partitioner::Murmur3,
            Token::Random(_) => Partitioner::Random,
        }
    }

    /// Compare two tokens of the same partitioner.
    ///
    /// Cross-partitioner comparison is undefined and is rejected with
    /// [`TransportError::IncompatiblePartitioner`].
    pub fn try_cmp(&self, other: &Token) -> Result<Ordering> {
        match (self, other) {
            (Token::Murmur3(a), Token::Murmur3(b)) => Ok(a.cmp(b)),
            (Token::Random(a), Token::Random(b)) => Ok(a.cmp(b)),
            _ => Err(TransportError::IncompatiblePartitioner),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Murmur3(value) => write!(f, "{value}"),
            Token::Random(value) => write!(f, "{value}"),
        }
    }
}

/// Cassandra's variant of MurmurHash3 x64_128.
///
/// Differs from the reference implementation in that tail bytes are
/// sign-extended, a quirk inherited from Java's signed bytes that every
/// compatible client has to reproduce. Returns both 64-bit halves; the
/// token is the first.
fn murmur3_x64_128(data: &[u8]) -> (i64, i64) {
    const C1: i64 = 0x87c3_7b91_1142_53d5_u64 as i64;
    const C2: i64 = 0x4cf5_ad43_2745_937f_u64 as i64;

    let mut h1: i64 = 0;
    let mut h2: i64 = 0;

    let mut blocks = data.chunks_exact(16);
    for block in &mut blocks {
        let mut k1 = i64::from_le_bytes(block[0..8].try_into().expect("16-byte block"));
        let mut k2 = i64::from_le_bytes(block[8..16].try_into().expect("16-byte block"));

        k1 = k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2);
        h1 ^= k1;
        h1 = h1
            .rotate_left(27)
            .wrapping_add(h2)
            .wrapping_mul(5)
            .wrapping_add(0x52dc_e729);

        k2 = k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1);
        h2 ^= k2;
        h2 = h2
            .rotate_left(31)
            .wrapping_add(h1)
            .wrapping_mul(5)
            .wrapping_add(0x3849_5ab5);
    }

    let tail = blocks.remainder();
    if tail.len() > 8 {
        let mut k2: i64 = 0;
        for i in (8..tail.len()).rev() {
            k2 ^= (tail[i] as i8 as i64) << ((i - 8) * 8);
        }
        k2 = k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1);
        h2 ^= k2;
    }
    if !tail.is_empty() {
        let mut k1: i64 = 0;
        for i in (0..tail.len().min(8)).rev() {
            k1 ^= (tail[i] as i8 as i64) << (i * 8);
        }
        k1 = k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= data.len() as i64;
    h2 ^= data.len() as i64;
    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);
    h1 = fmix64(h1);
    h2 = fmix64(h2);
    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);
    (h1, h2)
}

fn fmix64(mut k: i64) -> i64 {
    k ^= ((k as u64) >> 33) as i64;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd_u64 as i64);
    k ^= ((k as u64) >> 33) as i64;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53_u64 as i64);
    k ^= ((k as u64) >> 33) as i64;
    k
}
