//! The status-hash chain: a running SHA-256 accumulator
//! over every mined (and, at the session layer, mempool) transaction that
//! touches a hashX. Used as an opaque subscription change-detector — clients
//! never see anything but the final hex digest.

use electrumx_chain::hash::{sha256, Hash};

/// `S_0`, the chain's starting value.
pub const GENESIS_STATUS: [u8; 32] = [0u8; 32];

/// `S_{k+1} = SHA256(S_k || tx_hash_k || height_k_le_i32)`, for a mined tx.
pub fn chain_confirmed_step(prev: &[u8; 32], tx_hash: &Hash, height: i32) -> [u8; 32] {
    let mut buf = Vec::with_capacity(32 + 32 + 4);
    buf.extend_from_slice(prev);
    buf.extend_from_slice(tx_hash.as_bytes());
    buf.extend_from_slice(&height.to_le_bytes());
    sha256(&buf)
}

/// The mempool suffix: `SHA256(S_k || tx_hash_k || height_le_i32 || fee_le_u64)`,
/// with `height = -1` if the tx has an unconfirmed input, else `0`.
pub fn chain_mempool_step(prev: &[u8; 32], tx_hash: &Hash, height: i32, fee: u64) -> [u8; 32] {
    let mut buf = Vec::with_capacity(32 + 32 + 4 + 8);
    buf.extend_from_slice(prev);
    buf.extend_from_slice(tx_hash.as_bytes());
    buf.extend_from_slice(&height.to_le_bytes());
    buf.extend_from_slice(&fee.to_le_bytes());
    sha256(&buf)
}

pub fn hex_status(status: &[u8; 32]) -> String {
    hex::encode(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmed_step_matches_s2_scenario() {
        // S2: a scripthash with one mined tx at some height. The status is
        // the hex of SHA256(32 zero bytes || tx_hash || pack_le_i32(height)).
        let tx_hash = Hash([7u8; 32]);
        let height = 100i32;
        let got = chain_confirmed_step(&GENESIS_STATUS, &tx_hash, height);

        let mut expected_input = Vec::new();
        expected_input.extend_from_slice(&GENESIS_STATUS);
        expected_input.extend_from_slice(&[7u8; 32]);
        expected_input.extend_from_slice(&100i32.to_le_bytes());
        let expected = sha256(&expected_input);

        assert_eq!(got, expected);
        assert_eq!(hex_status(&got).len(), 64);
    }

    #[test]
    fn different_heights_produce_different_status() {
        let tx_hash = Hash([1u8; 32]);
        let a = chain_confirmed_step(&GENESIS_STATUS, &tx_hash, 10);
        let b = chain_confirmed_step(&GENESIS_STATUS, &tx_hash, 11);
        assert_ne!(a, b);
    }
}
