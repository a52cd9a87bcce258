//! Coin-family hash functions.
//!
//! Bitcoin-derived coins hash transactions and headers with double SHA-256
//! (`sha256d`); a handful of forks (Groestlcoin, SmartCash) use a single
//! round, Decred uses BLAKE-256(d), Trezarcoin keys a BLAKE2s over its
//! 112-byte genesis header, and SmartCash's genesis block hash is Keccak-256.

use blake_hash::{Blake256, Digest as BlakeDigest};
use sha2::{Digest as Sha2Digest, Sha256};
use sha3::{Digest as Sha3Digest, Keccak256};

/// A 32-byte transaction or block hash, stored in natural (little-endian,
/// as produced by the hash function) byte order. Display/Debug reverse it
/// for the conventional big-endian hex rendering.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.write_str(&hex::encode(reversed))
    }
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.debug_tuple("Hash").field(&hex::encode(reversed)).finish()
    }
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

pub fn sha256d(data: &[u8]) -> Hash {
    Hash(sha256(&sha256(data)))
}

pub fn sha256_single(data: &[u8]) -> Hash {
    Hash(sha256(data))
}

pub fn blake256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Blake256::digest(data));
    out
}

pub fn blake256d(data: &[u8]) -> Hash {
    Hash(blake256(&blake256(data)))
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(data));
    out
}

/// Trezarcoin's genesis-block hash: a keyed BLAKE2s-256 over the 112-byte
/// header with the key material reassembled from two header sub-ranges, per
/// `DeserializerTrezarcoin.blake2s` in the upstream deserializer.
pub fn trezarcoin_blake2s(header: &[u8]) -> [u8; 32] {
    let key_one = &header[36..46];
    let key_two = &header[58..68];
    let ntime = &header[68..72];
    let n_bits = &header[72..76];
    let nonce = &header[76..80];
    let full_merkle = &header[36..68];

    let mut input112 = Vec::with_capacity(header.len() + full_merkle.len());
    input112.extend_from_slice(header);
    input112.extend_from_slice(full_merkle);

    let mut key = Vec::with_capacity(key_two.len() + ntime.len() + n_bits.len() + nonce.len() + key_one.len());
    key.extend_from_slice(key_two);
    key.extend_from_slice(ntime);
    key.extend_from_slice(n_bits);
    key.extend_from_slice(nonce);
    key.extend_from_slice(key_one);

    let digest = blake2s_simd::Params::new()
        .hash_length(32)
        .key(&key)
        .hash(&input112);
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256d_of_empty_matches_known_vector() {
        // sha256(sha256("")) — a standard test vector used throughout the
        // Bitcoin test suite.
        let hash = sha256d(b"");
        assert_eq!(
            hex::encode(hash.0),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn hash_display_is_byte_reversed_hex() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xaa;
        bytes[31] = 0xbb;
        let hash = Hash(bytes);
        let rendered = format!("{}", hash);
        assert!(rendered.starts_with("bb"));
        assert!(rendered.ends_with("aa"));
    }
}
