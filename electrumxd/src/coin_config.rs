//! The one coin a given `electrumxd` binary serves. Upstream picks a `Coin`
//! subclass at runtime from a config string; `electrumx_chain::coin::Coin`
//! is a set of associated consts instead, so the choice has to be nailed
//! down somewhere a plain `fn` pointer can close over it without captures —
//! `electrumx_mempool::MemPool::new` takes `read_tx: fn(&[u8]) -> Option<...>`,
//! not a capturing closure. A multi-coin build would swap this module out
//! per target rather than make it a runtime value.

use electrumx_chain::coin::{hashx_from_script, read_tx, Coin, DeserializerKind, HeaderKind};
use electrumx_chain::Hash;

pub struct SelectedCoin;

impl Coin for SelectedCoin {
    const DESERIALIZER: DeserializerKind = DeserializerKind::SegWit;
    const HEADER: HeaderKind = HeaderKind::Static;
    const HASHX_LEN: usize = 11;
}

/// Bitcoin mainnet's genesis block hash, in the natural little-endian byte
/// order `Hash` stores (i.e. the reverse of the familiar big-endian hex).
pub const GENESIS_HASH: Hash = Hash([
    0x6f, 0xe2, 0x8c, 0x0a, 0xb6, 0xf1, 0xb3, 0x72, 0xc1, 0xa6, 0xa2, 0x46, 0xae, 0x63, 0xf7, 0x4f,
    0x93, 0x1e, 0x83, 0x65, 0xe1, 0x5a, 0x08, 0x9c, 0x68, 0xd6, 0x19, 0x00, 0x00, 0x00, 0x00, 0x00,
]);

/// Composes `electrumx_chain::coin::read_tx` with `SelectedCoin`'s
/// deserializer and hashX policy into the bare `fn` pointer
/// `electrumx_mempool::MemPool::new` requires.
pub fn read_tx_for_mempool(
    data: &[u8],
) -> Option<(Vec<(Hash, u32)>, Vec<(Vec<u8>, u64)>, u32)> {
    let (tx, size) = read_tx(SelectedCoin::DESERIALIZER, data).ok()?;

    let prevouts = tx
        .inputs
        .iter()
        .filter(|input| !input.is_generation())
        .filter_map(|input| match input {
            electrumx_chain::tx::Input::PrevOut {
                prev_hash,
                prev_idx,
                ..
            }
            | electrumx_chain::tx::Input::Decred {
                prev_hash,
                prev_idx,
                ..
            } => Some((Hash(*prev_hash), *prev_idx)),
            electrumx_chain::tx::Input::TokenPayStealth { .. } => None,
        })
        .collect();

    let out_pairs = tx
        .outputs
        .iter()
        .map(|output| {
            (
                hashx_from_script(output.pk_script(), SelectedCoin::HASHX_LEN),
                output.value() as u64,
            )
        })
        .collect();

    Some((prevouts, out_pairs, size as u32))
}
