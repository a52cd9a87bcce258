//! Big-endian packing for the History KV schema's fixed-width key fields
//! Big-endian is mandatory, not cosmetic: prefix iteration
//! order under `H`+hashX must equal numeric `tx_num` order in both
//! directions.

use byteorder::{BigEndian, ByteOrder};

/// `tx_num` is a 40-bit monotonic counter, packed as 5 bytes big-endian.
pub const TXNUM_LEN: usize = 5;
/// `tx_out_idx` is packed as 3 bytes big-endian, matching the original's
/// truncation of a `u32` to its low 3 bytes (a block can't have 2^24 outputs
/// in one transaction in practice).
pub const TXOUTIDX_LEN: usize = 3;

pub fn pack_txnum(tx_num: u64) -> [u8; TXNUM_LEN] {
    let mut buf8 = [0u8; 8];
    BigEndian::write_u64(&mut buf8, tx_num);
    let mut out = [0u8; TXNUM_LEN];
    out.copy_from_slice(&buf8[8 - TXNUM_LEN..]);
    out
}

pub fn unpack_txnum(bytes: &[u8]) -> u64 {
    debug_assert_eq!(bytes.len(), TXNUM_LEN);
    let mut buf8 = [0u8; 8];
    buf8[8 - TXNUM_LEN..].copy_from_slice(bytes);
    BigEndian::read_u64(&buf8)
}

pub fn pack_txoutidx(idx: u32) -> [u8; TXOUTIDX_LEN] {
    let mut buf4 = [0u8; 4];
    BigEndian::write_u32(&mut buf4, idx);
    let mut out = [0u8; TXOUTIDX_LEN];
    out.copy_from_slice(&buf4[4 - TXOUTIDX_LEN..]);
    out
}

pub fn unpack_txoutidx(bytes: &[u8]) -> u32 {
    debug_assert_eq!(bytes.len(), TXOUTIDX_LEN);
    let mut buf4 = [0u8; 4];
    buf4[4 - TXOUTIDX_LEN..].copy_from_slice(bytes);
    BigEndian::read_u32(&buf4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txnum_roundtrips_and_orders_big_endian() {
        for n in [0u64, 1, 255, 256, 65535, 1 << 30, (1u64 << 40) - 1] {
            assert_eq!(unpack_txnum(&pack_txnum(n)), n);
        }
        assert!(pack_txnum(1) < pack_txnum(2));
        assert!(pack_txnum(255) < pack_txnum(256));
    }

    #[test]
    fn txoutidx_roundtrips() {
        for n in [0u32, 1, 300, 1 << 23] {
            assert_eq!(unpack_txoutidx(&pack_txoutidx(n)), n);
        }
    }
}
