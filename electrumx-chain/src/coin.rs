//! Per-coin transaction dispatch.
//!
//! [`DeserializerKind`] enumerates every coin family's transaction wire
//! format; [`read_tx`] composes the primitives in [`crate::tx`] into the
//! exact byte walk each family requires. This plays the role the upstream
//! Python gives a chain of `Deserializer*` subclasses, but as one closed
//! dispatch instead of an open-ended inheritance tree, since every coin's
//! tx shape is known statically at compile time.
//!
//! [`HeaderKind`] does the same for block headers: most coins are a
//! fixed-size struct, but a handful (AuxPow, Equihash, Xaya's "triple
//! purpose mining", Primecoin's multiplier) have a dynamic tail whose size
//! can only be discovered by walking it.
//!
//! Every `read_*_tx` helper takes an already-positioned [`Cursor`] and
//! leaves it exactly past the transaction it read, so the AuxPow/Emercoin
//! header walkers below can embed a tx read as one step without
//! re-slicing or re-parsing.

use crate::bytes::Cursor;
use crate::error::{ChainError, ParseError, SkipTxDeserialize};
use crate::hash::{blake256d, sha256d, sha256_single, Hash};
use crate::tx::{
    self, read_decred_witness, read_input, read_input_decred, read_input_tokenpay,
    read_input_zcoin, read_inputs, read_output, read_output_decred, read_outputs, read_witness,
    Dip2Payload, Input, Output, Tx, TxExtra,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeserializerKind {
    Legacy,
    SegWit,
    LitecoinMweb,
    AuxPow,
    AuxPowSegWit,
    Equihash,
    EquihashSegWit,
    Zcash,
    Pivx,
    TxTime,
    TxTimeSegWit,
    TxTimeSegWitNavCoin,
    Trezarcoin,
    Blackcoin,
    Reddcoin,
    Verge,
    Emercoin,
    BitcoinAtom,
    Groestlcoin,
    TokenPay,
    Decred,
    SmartCash,
    BitcoinDiamond,
    BitcoinDiamondSegWit,
    Electra,
    ECCoin,
    Zcoin,
    Xaya,
    Simplicity,
    Primecoin,
    Dip2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    /// Fixed-size, no trailing data.
    Static,
    AuxPow,
    Equihash,
    /// BitcoinAtom grows the header by 4 bytes ("flags") past a fork height.
    BitcoinAtom { fork_height: u32 },
    EmercoinAuxPow,
    Xaya,
    Primecoin,
}

/// Identifies a coin for dispatch purposes: which tx shape it parses and
/// which (if any) header tail it has.
pub trait Coin {
    const DESERIALIZER: DeserializerKind;
    const HEADER: HeaderKind = HeaderKind::Static;
    /// Length in bytes of the hashX prefix this coin uses;
    /// 11 for every currently supported coin.
    const HASHX_LEN: usize = 11;
}

/// The "script identifier" used everywhere a script would otherwise have to
/// be carried around: the leading `len` bytes of `SHA256(script)`. Matches
/// `Coin.hashX_from_script` in the upstream deserializer.
pub fn hashx_from_script(script: &[u8], len: usize) -> Vec<u8> {
    crate::hash::sha256(script)[..len].to_vec()
}

pub fn read_tx(kind: DeserializerKind, data: &[u8]) -> Result<(Tx, usize), ChainError> {
    use DeserializerKind::*;
    let mut c = Cursor::new(data);
    let tx = match kind {
        Legacy | AuxPow | Equihash | Primecoin => read_legacy_tx(&mut c, sha256d)?,
        SmartCash => read_legacy_tx(&mut c, sha256_single)?,
        Zcoin => read_legacy_tx_with(&mut c, sha256d, read_input_zcoin)?,
        Zcash => read_zcash_tx(&mut c)?,
        Pivx => read_pivx_tx(&mut c)?,
        TxTime | Verge => read_txtime_tx(&mut c, sha256d)?,
        Trezarcoin => read_trezarcoin_tx(&mut c)?,
        Blackcoin => read_blackcoin_tx(&mut c)?,
        Reddcoin => read_reddcoin_tx(&mut c)?,
        TokenPay => read_tokenpay_tx(&mut c)?,
        BitcoinDiamond => read_bitcoin_diamond_tx(&mut c)?,
        Electra => read_electra_tx(&mut c)?,
        ECCoin => read_eccoin_tx(&mut c)?,
        Simplicity => read_simplicity_tx(&mut c)?,
        Dip2 => read_dip2_tx(&mut c)?,
        Decred => return read_decred(data),
        SegWit | AuxPowSegWit | EquihashSegWit | BitcoinAtom | Xaya => {
            return read_segwit(data, sha256d)
        }
        Groestlcoin => return read_segwit(data, sha256_single),
        LitecoinMweb => return read_segwit_litecoin(data),
        TxTimeSegWit | Emercoin => return read_segwit_time(data),
        TxTimeSegWitNavCoin => return read_segwit_time_navcoin(data),
        BitcoinDiamondSegWit => return read_bitcoin_diamond_segwit(data),
    };
    Ok((tx, data.len()))
}

fn read_legacy_tx(c: &mut Cursor, hash_fn: fn(&[u8]) -> Hash) -> Result<Tx, ParseError> {
    read_legacy_tx_with(c, hash_fn, read_input)
}

fn read_legacy_tx_with(
    c: &mut Cursor,
    hash_fn: fn(&[u8]) -> Hash,
    read_one_input: impl Fn(&mut Cursor) -> Result<Input, ParseError>,
) -> Result<Tx, ParseError> {
    let start = c.pos;
    let version = c.read_le_i32()?;
    let inputs = read_inputs(c, read_one_input)?;
    let outputs = read_outputs(c, read_output)?;
    let locktime = c.read_le_u32()?;
    let txid = hash_fn(&c.data[start..c.pos]);
    Ok(Tx {
        version,
        inputs,
        outputs,
        locktime,
        txid,
        wtxid: txid,
        extra: TxExtra::None,
    })
}

/// SegWit parse path shared by Bitcoin, AuxPow+SegWit coins, BitcoinAtom,
/// Groestlcoin and Xaya: sniff the marker byte at offset 4, fall back to
/// the legacy path if it's nonzero.
fn read_segwit(data: &[u8], hash_fn: fn(&[u8]) -> Hash) -> Result<(Tx, usize), ChainError> {
    let mut c = Cursor::new(data);
    let start = c.pos;
    if c.peek_at(4)? != 0 {
        return Ok((read_legacy_tx(&mut c, hash_fn)?, data.len()));
    }

    let version = c.read_le_i32()?;
    let orig_ser_head_end = c.pos;
    let marker = c.read_u8()?;
    let flag = c.read_u8()?;

    let witness_start = c.pos;
    let inputs = read_inputs(&mut c, read_input)?;
    let outputs = read_outputs(&mut c, read_output)?;
    let base_size = c.pos - witness_start;
    let witness = read_witness(&mut c, inputs.len())?;

    let locktime_start = c.pos;
    let locktime = c.read_le_u32()?;

    let mut orig_ser = Vec::with_capacity(c.pos - start);
    orig_ser.extend_from_slice(&data[start..orig_ser_head_end]);
    orig_ser.extend_from_slice(&data[witness_start..locktime_start + 4]);
    let vsize = (3 * base_size + data.len()) / 4;

    let txid = hash_fn(&orig_ser);
    let wtxid = hash_fn(&data[locktime_start..c.pos]);

    Ok((
        Tx {
            version,
            inputs,
            outputs,
            locktime,
            txid,
            wtxid,
            extra: TxExtra::SegWit {
                marker,
                flag,
                witness,
            },
        },
        vsize,
    ))
}

/// Litecoin's SegWit path, which additionally tolerates the MWEB flag bits
/// (`0x8`) and a v1-RPC-serialization quirk where an invalid MW-only
/// transaction looks like a zero-input/zero-output SegWit transaction.
fn read_segwit_litecoin(data: &[u8]) -> Result<(Tx, usize), ChainError> {
    let mut c = Cursor::new(data);
    let start = c.pos;
    if c.peek_at(4)? != 0 {
        return Ok((read_legacy_tx(&mut c, sha256d)?, data.len()));
    }

    let version = c.read_le_i32()?;
    let orig_ser_head_end = c.pos;
    let marker = c.read_u8()?;
    let flag = c.read_u8()?;

    if flag == 0 {
        return Err(SkipTxDeserialize(
            "invalid MW-only transaction with no regular inputs or outputs",
        )
        .into());
    }

    let witness_start = c.pos;
    let inputs = read_inputs(&mut c, read_input)?;
    let outputs = read_outputs(&mut c, read_output)?;
    let base_size = c.pos - witness_start;

    let witness = if flag & 1 != 0 {
        read_witness(&mut c, inputs.len())?
    } else {
        Vec::new()
    };

    if flag & 8 != 0 && c.read_u8()? != 0 {
        return Err(SkipTxDeserialize("non-null mwtx bytes are not parseable").into());
    }

    let locktime_start = c.pos;
    let locktime = c.read_le_u32()?;

    let mut orig_ser = Vec::with_capacity(c.pos - start);
    orig_ser.extend_from_slice(&data[start..orig_ser_head_end]);
    orig_ser.extend_from_slice(&data[witness_start..locktime_start + 4]);
    let vsize = (3 * base_size + data.len()) / 4;

    let txid = sha256d(&orig_ser);
    let wtxid = sha256d(&data[locktime_start..c.pos]);

    Ok((
        Tx {
            version,
            inputs,
            outputs,
            locktime,
            txid,
            wtxid,
            extra: TxExtra::SegWit {
                marker,
                flag,
                witness,
            },
        },
        vsize,
    ))
}

fn read_zcash_tx(c: &mut Cursor) -> Result<Tx, ParseError> {
    let start = c.pos;
    let header = c.read_le_u32()?;
    let overwintered = (header >> 31) == 1;
    let version = if overwintered {
        c.skip(4)?; // versionGroupId
        (header & 0x7fff_ffff) as i32
    } else {
        header as i32
    };

    let is_overwinter_v3 = version == 3;
    let is_sapling_v4 = version == 4;

    let inputs = read_inputs(c, read_input)?;
    let outputs = read_outputs(c, read_output)?;
    let locktime = c.read_le_u32()?;

    if is_overwinter_v3 || is_sapling_v4 {
        c.skip(4)?; // expiryHeight
    }

    let mut has_shielded = false;
    if is_sapling_v4 {
        c.skip(8)?; // valueBalance
        let shielded_spend_size = c.read_varint()? as usize;
        c.skip(shielded_spend_size * 384)?;
        let shielded_output_size = c.read_varint()? as usize;
        c.skip(shielded_output_size * 948)?;
        has_shielded = shielded_spend_size > 0 || shielded_output_size > 0;
    }

    if version >= 2 {
        let joinsplit_size = c.read_varint()? as usize;
        if joinsplit_size > 0 {
            let joinsplit_desc_len = 1506 + if is_sapling_v4 { 192 } else { 296 };
            c.skip(joinsplit_size * joinsplit_desc_len)?;
            c.skip(32)?; // joinSplitPubKey
            c.skip(64)?; // joinSplitSig
        }
    }

    if is_sapling_v4 && has_shielded {
        c.skip(64)?; // bindingSig
    }

    let txid = sha256d(&c.data[start..c.pos]);
    Ok(Tx {
        version,
        inputs,
        outputs,
        locktime,
        txid,
        wtxid: txid,
        extra: TxExtra::None,
    })
}

fn read_pivx_tx(c: &mut Cursor) -> Result<Tx, ParseError> {
    let start = c.pos;
    let header = c.read_le_u32()?;
    let mut tx_type = (header >> 16) as u16;
    let mut version = if tx_type != 0 {
        (header & 0x0000_ffff) as i32
    } else {
        header as i32
    };
    if tx_type != 0 && version < 3 {
        version = header as i32;
        tx_type = 0;
    }

    let inputs = read_inputs(c, read_input)?;
    let outputs = read_outputs(c, read_output)?;
    let locktime = c.read_le_u32()?;

    if version >= 3 {
        c.read_varint()?;
        c.skip(8)?; // valueBalance
        let shielded_spend_size = c.read_varint()? as usize;
        c.skip(shielded_spend_size * 384)?;
        let shielded_output_size = c.read_varint()? as usize;
        c.skip(shielded_output_size * 948)?;
        c.skip(64)?; // bindingSig
        if tx_type > 0 {
            c.skip(2)?; // extraPayload
        }
    }

    let txid = sha256d(&c.data[start..c.pos]);
    Ok(Tx {
        version,
        inputs,
        outputs,
        locktime,
        txid,
        wtxid: txid,
        extra: TxExtra::Pivx { tx_type },
    })
}

fn read_txtime_tx(c: &mut Cursor, hash_fn: fn(&[u8]) -> Hash) -> Result<Tx, ParseError> {
    let start = c.pos;
    let version = c.read_le_i32()?;
    let time = c.read_le_u32()?;
    let inputs = read_inputs(c, read_input)?;
    let outputs = read_outputs(c, read_output)?;
    let locktime = c.read_le_u32()?;
    let txid = hash_fn(&c.data[start..c.pos]);
    Ok(Tx {
        version,
        inputs,
        outputs,
        locktime,
        txid,
        wtxid: txid,
        extra: TxExtra::Time { time },
    })
}

fn read_segwit_time(data: &[u8]) -> Result<(Tx, usize), ChainError> {
    let mut c = Cursor::new(data);
    let start = c.pos;
    if c.peek_at(8)? != 0 {
        return Ok((read_txtime_tx(&mut c, sha256d)?, data.len()));
    }

    let version = c.read_le_i32()?;
    let time = c.read_le_u32()?;
    let orig_ser_head_end = c.pos;
    let marker = c.read_u8()?;
    let flag = c.read_u8()?;

    let witness_start = c.pos;
    let inputs = read_inputs(&mut c, read_input)?;
    let outputs = read_outputs(&mut c, read_output)?;
    let base_size = c.pos - witness_start;
    let witness = read_witness(&mut c, inputs.len())?;

    let locktime_start = c.pos;
    let locktime = c.read_le_u32()?;

    let mut orig_ser = Vec::with_capacity(c.pos - start);
    orig_ser.extend_from_slice(&data[start..orig_ser_head_end]);
    orig_ser.extend_from_slice(&data[witness_start..locktime_start + 4]);
    let vsize = (3 * base_size + data.len()) / 4;

    let txid = sha256d(&orig_ser);
    let wtxid = sha256d(&data[locktime_start..c.pos]);

    Ok((
        Tx {
            version,
            inputs,
            outputs,
            locktime,
            txid,
            wtxid,
            extra: TxExtra::TimeSegWit {
                time,
                marker,
                flag,
                witness,
            },
        },
        vsize,
    ))
}

fn read_txtime_no_segwit_navcoin(c: &mut Cursor) -> Result<Tx, ParseError> {
    let start = c.pos;
    let version = c.read_le_i32()?;
    let time = c.read_le_u32()?;
    let inputs = read_inputs(c, read_input)?;
    let outputs = read_outputs(c, read_output)?;
    let locktime = c.read_le_u32()?;
    if version >= 2 {
        c.read_varbytes()?;
    }
    let txid = sha256d(&c.data[start..c.pos]);
    Ok(Tx {
        version,
        inputs,
        outputs,
        locktime,
        txid,
        wtxid: txid,
        extra: TxExtra::Time { time },
    })
}

fn read_segwit_time_navcoin(data: &[u8]) -> Result<(Tx, usize), ChainError> {
    let mut c = Cursor::new(data);
    let start = c.pos;
    if c.peek_at(8)? != 0 {
        return Ok((read_txtime_no_segwit_navcoin(&mut c)?, data.len()));
    }

    let version = c.read_le_i32()?;
    let time = c.read_le_u32()?;
    let orig_ser_head_end = c.pos;
    let marker = c.read_u8()?;
    let flag = c.read_u8()?;

    let witness_start = c.pos;
    let inputs = read_inputs(&mut c, read_input)?;
    let outputs = read_outputs(&mut c, read_output)?;
    let base_size = c.pos - witness_start;
    let witness = read_witness(&mut c, inputs.len())?;

    let locktime_start = c.pos;
    let locktime = c.read_le_u32()?;
    let str_dzeel = if version >= 2 {
        c.read_varbytes()?.to_vec()
    } else {
        Vec::new()
    };

    let mut orig_ser = Vec::with_capacity(c.pos - start);
    orig_ser.extend_from_slice(&data[start..orig_ser_head_end]);
    orig_ser.extend_from_slice(&data[witness_start..locktime_start + 4]);
    let vsize = (3 * base_size + data.len()) / 4;

    let txid = sha256d(&orig_ser);
    let wtxid = sha256d(&data[locktime_start..c.pos]);

    Ok((
        Tx {
            version,
            inputs,
            outputs,
            locktime,
            txid,
            wtxid,
            extra: TxExtra::TimeSegWitDZeel {
                time,
                marker,
                flag,
                witness,
                str_dzeel,
            },
        },
        vsize,
    ))
}

fn read_trezarcoin_tx(c: &mut Cursor) -> Result<Tx, ParseError> {
    let start = c.pos;
    let version = c.read_le_i32()?;
    let time = c.read_le_u32()?;
    let inputs = read_inputs(c, read_input)?;
    let outputs = read_outputs(c, read_output)?;
    let locktime = c.read_le_u32()?;
    let comment = if version >= 2 {
        c.read_varbytes()?.to_vec()
    } else {
        Vec::new()
    };
    let txid = sha256d(&c.data[start..c.pos]);
    Ok(Tx {
        version,
        inputs,
        outputs,
        locktime,
        txid,
        wtxid: txid,
        extra: TxExtra::TimeComment { time, comment },
    })
}

fn read_blackcoin_tx(c: &mut Cursor) -> Result<Tx, ParseError> {
    const BLACKCOIN_TX_VERSION: i32 = 2;
    let start = c.pos;
    let version_peek = c.peek_i32_at(0)?;

    if version_peek < BLACKCOIN_TX_VERSION {
        let version = c.read_le_i32()?;
        let time = c.read_le_u32()?;
        let inputs = read_inputs(c, read_input)?;
        let outputs = read_outputs(c, read_output)?;
        let locktime = c.read_le_u32()?;
        let txid = sha256d(&c.data[start..c.pos]);
        Ok(Tx {
            version,
            inputs,
            outputs,
            locktime,
            txid,
            wtxid: txid,
            extra: TxExtra::Time { time },
        })
    } else {
        let version = c.read_le_i32()?;
        let inputs = read_inputs(c, read_input)?;
        let outputs = read_outputs(c, read_output)?;
        let locktime = c.read_le_u32()?;
        let txid = sha256d(&c.data[start..c.pos]);
        Ok(Tx {
            version,
            inputs,
            outputs,
            locktime,
            txid,
            wtxid: txid,
            extra: TxExtra::None,
        })
    }
}

fn read_reddcoin_tx(c: &mut Cursor) -> Result<Tx, ParseError> {
    let start = c.pos;
    let version = c.read_le_i32()?;
    let inputs = read_inputs(c, read_input)?;
    let outputs = read_outputs(c, read_output)?;
    let locktime = c.read_le_u32()?;
    let time = if version > 1 { c.read_le_u32()? } else { 0 };
    let txid = sha256d(&c.data[start..c.pos]);
    Ok(Tx {
        version,
        inputs,
        outputs,
        locktime,
        txid,
        wtxid: txid,
        extra: TxExtra::Time { time },
    })
}

fn read_tokenpay_tx(c: &mut Cursor) -> Result<Tx, ParseError> {
    let start = c.pos;
    let version = c.read_le_i32()?;
    let time = c.read_le_u32()?;
    let inputs = read_inputs(c, read_input_tokenpay)?;
    let outputs = read_outputs(c, read_output)?;
    let locktime = c.read_le_u32()?;
    let txid = sha256d(&c.data[start..c.pos]);
    Ok(Tx {
        version,
        inputs,
        outputs,
        locktime,
        txid,
        wtxid: txid,
        extra: TxExtra::Time { time },
    })
}

/// Decred's prefix/witness split: the txid hashes only the prefix (inputs'
/// outpoints+tree+sequence, outputs, locktime, expiry) under a synthetic
/// `TxSerializeNoWitness` version tag; the witness section is parsed but
/// not folded into the identifying hash.
fn read_decred(data: &[u8]) -> Result<(Tx, usize), ChainError> {
    let mut c = Cursor::new(data);
    let start = c.pos;
    let version = c.read_le_i32()?;
    let inputs = read_inputs(&mut c, read_input_decred)?;
    let outputs = read_outputs(&mut c, read_output_decred)?;
    let locktime = c.read_le_u32()?;
    let expiry = c.read_le_u32()?;
    let end_prefix = c.pos;
    let witness = read_decred_witness(&mut c, inputs.len())?;

    const TX_SERIALIZE_NO_WITNESS: u32 = 0x10000;
    let no_witness_header = TX_SERIALIZE_NO_WITNESS | ((version as u32) & 0xffff);
    let mut prefix_tx = Vec::with_capacity(4 + (end_prefix - (start + 4)));
    crate::bytes::pack_le_u32(no_witness_header, &mut prefix_tx);
    prefix_tx.extend_from_slice(&data[start + 4..end_prefix]);

    let tx_hash = blake256d(&prefix_tx);

    Ok((
        Tx {
            version,
            inputs,
            outputs,
            locktime,
            txid: tx_hash,
            wtxid: tx_hash,
            extra: TxExtra::Decred { expiry, witness },
        },
        c.pos - start,
    ))
}

fn read_bitcoin_diamond_tx(c: &mut Cursor) -> Result<Tx, ParseError> {
    const BITCOIN_DIAMOND_TX_VERSION: i32 = 12;
    let start = c.pos;
    let version_peek = c.peek_i32_at(0)?;

    if version_peek != BITCOIN_DIAMOND_TX_VERSION {
        let version = c.read_le_i32()?;
        let inputs = read_inputs(c, read_input)?;
        let outputs = read_outputs(c, read_output)?;
        let locktime = c.read_le_u32()?;
        let txid = sha256d(&c.data[start..c.pos]);
        Ok(Tx {
            version,
            inputs,
            outputs,
            locktime,
            txid,
            wtxid: txid,
            extra: TxExtra::None,
        })
    } else {
        let version = c.read_le_i32()?;
        let preblockhash = c.read_array32()?;
        let inputs = read_inputs(c, read_input)?;
        let outputs = read_outputs(c, read_output)?;
        let locktime = c.read_le_u32()?;
        let txid = sha256d(&c.data[start..c.pos]);
        Ok(Tx {
            version,
            inputs,
            outputs,
            locktime,
            txid,
            wtxid: txid,
            extra: TxExtra::BitcoinDiamond { preblockhash },
        })
    }
}

fn read_bitcoin_diamond_segwit(data: &[u8]) -> Result<(Tx, usize), ChainError> {
    const BITCOIN_DIAMOND_TX_VERSION: i32 = 12;
    let mut c = Cursor::new(data);
    let start = c.pos;
    let tx_version = c.peek_i32_at(0)?;
    let marker_offset = if tx_version == BITCOIN_DIAMOND_TX_VERSION {
        4 + 32
    } else {
        4
    };
    if c.peek_at(marker_offset)? != 0 {
        return Ok((read_bitcoin_diamond_tx(&mut c)?, data.len()));
    }

    let version = c.read_le_i32()?;
    let preblockhash = if version == BITCOIN_DIAMOND_TX_VERSION {
        Some(c.read_array32()?)
    } else {
        None
    };
    let orig_ser_head_end = c.pos;
    let marker = c.read_u8()?;
    let flag = c.read_u8()?;

    let witness_start = c.pos;
    let inputs = read_inputs(&mut c, read_input)?;
    let outputs = read_outputs(&mut c, read_output)?;
    let base_size = c.pos - witness_start;
    let witness = read_witness(&mut c, inputs.len())?;

    let locktime_start = c.pos;
    let locktime = c.read_le_u32()?;

    let mut orig_ser = Vec::with_capacity(c.pos - start);
    orig_ser.extend_from_slice(&data[start..orig_ser_head_end]);
    orig_ser.extend_from_slice(&data[witness_start..locktime_start + 4]);
    let vsize = (3 * base_size + data.len()) / 4;

    let txid = sha256d(&orig_ser);
    let wtxid = sha256d(&data[locktime_start..c.pos]);

    Ok((
        Tx {
            version,
            inputs,
            outputs,
            locktime,
            txid,
            wtxid,
            extra: TxExtra::BitcoinDiamondSegWit {
                preblockhash,
                marker,
                flag,
                witness,
            },
        },
        vsize,
    ))
}

fn read_electra_tx(c: &mut Cursor) -> Result<Tx, ParseError> {
    const ELECTRA_TX_VERSION: i32 = 7;
    let start = c.pos;
    let version_peek = c.peek_i32_at(0)?;

    if version_peek != ELECTRA_TX_VERSION {
        let version = c.read_le_i32()?;
        let time = c.read_le_u32()?;
        let inputs = read_inputs(c, read_input)?;
        let outputs = read_outputs(c, read_output)?;
        let locktime = c.read_le_u32()?;
        let txid = sha256d(&c.data[start..c.pos]);
        Ok(Tx {
            version,
            inputs,
            outputs,
            locktime,
            txid,
            wtxid: txid,
            extra: TxExtra::Time { time },
        })
    } else {
        let version = c.read_le_i32()?;
        let inputs = read_inputs(c, read_input)?;
        let outputs = read_outputs(c, read_output)?;
        let locktime = c.read_le_u32()?;
        let txid = sha256d(&c.data[start..c.pos]);
        Ok(Tx {
            version,
            inputs,
            outputs,
            locktime,
            txid,
            wtxid: txid,
            extra: TxExtra::None,
        })
    }
}

fn read_eccoin_tx(c: &mut Cursor) -> Result<Tx, ParseError> {
    let start = c.pos;
    let version = c.read_le_i32()?;
    let time = c.read_le_u32()?;
    let inputs = read_inputs(c, read_input)?;
    let outputs = read_outputs(c, read_output)?;
    let locktime = c.read_le_u32()?;
    if version > 1 {
        // An opaque 32-byte trailer: upstream skips it without
        // interpreting it, and so do we (see DESIGN.md).
        c.skip(32)?;
    }
    let txid = sha256d(&c.data[start..c.pos]);
    Ok(Tx {
        version,
        inputs,
        outputs,
        locktime,
        txid,
        wtxid: txid,
        extra: TxExtra::Time { time },
    })
}

fn read_simplicity_tx(c: &mut Cursor) -> Result<Tx, ParseError> {
    const SIMPLICITY_TX_VERSION: i32 = 3;
    let start = c.pos;
    let version_peek = c.peek_i32_at(0)?;

    if version_peek < SIMPLICITY_TX_VERSION {
        let version = c.read_le_i32()?;
        let time = c.read_le_u32()?;
        let inputs = read_inputs(c, read_input)?;
        let outputs = read_outputs(c, read_output)?;
        let locktime = c.read_le_u32()?;
        let txid = sha256d(&c.data[start..c.pos]);
        Ok(Tx {
            version,
            inputs,
            outputs,
            locktime,
            txid,
            wtxid: txid,
            extra: TxExtra::Time { time },
        })
    } else {
        let version = c.read_le_i32()?;
        let inputs = read_inputs(c, read_input)?;
        let outputs = read_outputs(c, read_output)?;
        let locktime = c.read_le_u32()?;
        let txid = sha256d(&c.data[start..c.pos]);
        Ok(Tx {
            version,
            inputs,
            outputs,
            locktime,
            txid,
            wtxid: txid,
            extra: TxExtra::None,
        })
    }
}

/// Dash/Axe DIP2 special transactions: the high 16 bits of the version word
/// are a special-tx-type tag when nonzero, and the tag selects a typed
/// extra-payload reader (DIP3 provider registration/update, DIP4 coinbase
/// commitments, DIP5 subscriptions) appended after `locktime`.
fn read_dip2_tx(c: &mut Cursor) -> Result<Tx, ParseError> {
    let start = c.pos;
    let header = c.read_le_u32()?;
    let mut tx_type = (header >> 16) as u16;
    let mut version = if tx_type != 0 {
        (header & 0x0000_ffff) as i32
    } else {
        header as i32
    };
    if tx_type != 0 && version < 3 {
        version = header as i32;
        tx_type = 0;
    }

    let inputs = read_inputs(c, read_input)?;
    let outputs = read_outputs(c, read_output)?;
    let locktime = c.read_le_u32()?;

    let extra_payload = if tx_type != 0 {
        let extra_payload_size = c.read_varint()? as usize;
        let end = c.pos + extra_payload_size;
        let payload = read_dip2_payload(c, tx_type, extra_payload_size)?;
        if c.pos != end {
            return Err(ParseError::ExtraPayloadMismatch {
                expected: end,
                actual: c.pos,
            });
        }
        payload
    } else {
        Dip2Payload::Raw(Vec::new())
    };

    let txid = sha256d(&c.data[start..c.pos]);
    Ok(Tx {
        version,
        inputs,
        outputs,
        locktime,
        txid,
        wtxid: txid,
        extra: TxExtra::Dip2 {
            tx_type,
            extra_payload,
        },
    })
}

fn read_dip2_payload(
    c: &mut Cursor,
    tx_type: u16,
    raw_size: usize,
) -> Result<Dip2Payload, ParseError> {
    const PRO_REG_TX: u16 = 1;
    const PRO_UP_SERV_TX: u16 = 2;
    const PRO_UP_REG_TX: u16 = 3;
    const PRO_UP_REV_TX: u16 = 4;
    const CB_TX: u16 = 5;
    const SUB_TX_REGISTER: u16 = 8;
    const SUB_TX_TOPUP: u16 = 9;
    const SUB_TX_RESET_KEY: u16 = 10;
    const SUB_TX_CLOSE_ACCOUNT: u16 = 11;

    fn arr<const N: usize>(c: &mut Cursor) -> Result<[u8; N], ParseError> {
        let mut b = [0u8; N];
        b.copy_from_slice(c.read_nbytes(N)?);
        Ok(b)
    }

    match tx_type {
        PRO_REG_TX => Ok(Dip2Payload::ProRegTx {
            version: c.read_le_u16()?,
            ty: c.read_le_u16()?,
            mode: c.read_le_u16()?,
            collateral_outpoint: tx::read_outpoint(c)?,
            ip_address: arr(c)?,
            port: c.read_be_u16()?,
            key_id_owner: arr(c)?,
            pub_key_operator: arr(c)?,
            key_id_voting: arr(c)?,
            operator_reward: c.read_le_u16()?,
            script_payout: c.read_varbytes()?.to_vec(),
            inputs_hash: c.read_array32()?,
            payload_sig: c.read_varbytes()?.to_vec(),
        }),
        PRO_UP_SERV_TX => Ok(Dip2Payload::ProUpServTx {
            version: c.read_le_u16()?,
            pro_tx_hash: c.read_array32()?,
            ip_address: arr(c)?,
            port: c.read_be_u16()?,
            script_operator_payout: c.read_varbytes()?.to_vec(),
            inputs_hash: c.read_array32()?,
            payload_sig: arr(c)?,
        }),
        PRO_UP_REG_TX => Ok(Dip2Payload::ProUpRegTx {
            version: c.read_le_u16()?,
            pro_tx_hash: c.read_array32()?,
            mode: c.read_le_u16()?,
            pub_key_operator: arr(c)?,
            key_id_voting: arr(c)?,
            script_payout: c.read_varbytes()?.to_vec(),
            inputs_hash: c.read_array32()?,
            payload_sig: c.read_varbytes()?.to_vec(),
        }),
        PRO_UP_REV_TX => Ok(Dip2Payload::ProUpRevTx {
            version: c.read_le_u16()?,
            pro_tx_hash: c.read_array32()?,
            reason: c.read_le_u16()?,
            inputs_hash: c.read_array32()?,
            payload_sig: arr(c)?,
        }),
        CB_TX => {
            let version = c.read_le_u16()?;
            let height = c.read_le_u32()?;
            let merkle_root_mn_list = c.read_array32()?;
            let merkle_root_quorums = if version > 1 {
                c.read_nbytes(32)?.to_vec()
            } else {
                Vec::new()
            };
            Ok(Dip2Payload::CbTx {
                version,
                height,
                merkle_root_mn_list,
                merkle_root_quorums,
            })
        }
        SUB_TX_REGISTER => Ok(Dip2Payload::SubTxRegister {
            version: c.read_le_u16()?,
            user_name: c.read_varbytes()?.to_vec(),
            pub_key: arr(c)?,
            payload_sig: arr(c)?,
        }),
        SUB_TX_TOPUP => Ok(Dip2Payload::SubTxTopup {
            version: c.read_le_u16()?,
            reg_tx_hash: c.read_array32()?,
        }),
        SUB_TX_RESET_KEY => Ok(Dip2Payload::SubTxResetKey {
            version: c.read_le_u16()?,
            reg_tx_hash: c.read_array32()?,
            hash_prev_sub_tx: c.read_array32()?,
            credit_fee: c.read_le_i64()?,
            new_pub_key: arr(c)?,
            payload_sig: arr(c)?,
        }),
        SUB_TX_CLOSE_ACCOUNT => Ok(Dip2Payload::SubTxCloseAccount {
            version: c.read_le_u16()?,
            reg_tx_hash: c.read_array32()?,
            hash_prev_sub_tx: c.read_array32()?,
            credit_fee: c.read_le_i64()?,
            payload_sig: arr(c)?,
        }),
        _ => Ok(Dip2Payload::Raw(c.read_nbytes(raw_size)?.to_vec())),
    }
}

impl<'a> Cursor<'a> {
    /// Peeks a little-endian `i32` at `self.pos + offset` without advancing.
    fn peek_i32_at(&self, offset: usize) -> Result<i32, ParseError> {
        use byteorder::{ByteOrder, LittleEndian};
        self.require(offset + 4)?;
        Ok(LittleEndian::read_i32(&self.data[self.pos + offset..]))
    }
}

/// Reads a coin's block header, walking past any dynamic tail
/// ([`HeaderKind`]) so the caller can slice out exactly the header bytes.
pub fn read_header<'a>(
    data: &'a [u8],
    start: usize,
    static_header_size: usize,
    kind: HeaderKind,
    height: u32,
) -> Result<&'a [u8], ParseError> {
    let mut c = Cursor::at(data, start);
    match kind {
        HeaderKind::Static => {
            c.require(static_header_size)?;
            Ok(&data[start..start + static_header_size])
        }
        HeaderKind::AuxPow => {
            const VERSION_AUXPOW: u32 = 1 << 8;
            let version = c.peek_le_u32()?;
            let end = if version & VERSION_AUXPOW != 0 {
                c.pos = start + static_header_size;
                skip_auxpow(&mut c)?;
                c.pos
            } else {
                start + static_header_size
            };
            Ok(&data[start..end])
        }
        HeaderKind::EmercoinAuxPow => {
            const VERSION_AUXPOW: u32 = 1 << 8;
            let version = c.peek_le_u32()?;
            let end = if version & VERSION_AUXPOW != 0 {
                c.pos = start + static_header_size;
                skip_auxpow(&mut c)?;
                c.pos
            } else {
                start + static_header_size
            };
            Ok(&data[start..end])
        }
        HeaderKind::Equihash => {
            c.pos = start + static_header_size;
            let solution_size = c.read_varint()? as usize;
            c.require(solution_size)?;
            c.pos += solution_size;
            Ok(&data[start..c.pos])
        }
        HeaderKind::BitcoinAtom { fork_height } => {
            let mut len = static_header_size;
            if height >= fork_height {
                len += 4;
            }
            c.require(len)?;
            Ok(&data[start..start + len])
        }
        HeaderKind::Xaya => {
            const MM_FLAG: u8 = 0x80;
            c.pos = start + static_header_size;
            let algo = c.read_u8()?;
            c.read_le_u32()?; // nBits
            if algo & MM_FLAG != 0 {
                skip_auxpow(&mut c)?;
            } else {
                c.require(static_header_size)?;
                c.pos += static_header_size; // fake header
            }
            Ok(&data[start..c.pos])
        }
        HeaderKind::Primecoin => {
            c.pos = start + static_header_size;
            let multiplier_size = c.read_varint()? as usize;
            c.require(multiplier_size)?;
            c.pos += multiplier_size;
            Ok(&data[start..c.pos])
        }
    }
}

impl<'a> Cursor<'a> {
    fn peek_le_u32(&self) -> Result<u32, ParseError> {
        use byteorder::{ByteOrder, LittleEndian};
        self.require(4)?;
        Ok(LittleEndian::read_u32(&self.data[self.pos..]))
    }
}

/// Skips a CAuxPow record: an embedded AuxPow coinbase transaction, parent
/// block hash, two Merkle branches, and an 80-byte parent block header.
fn skip_auxpow(c: &mut Cursor) -> Result<(), ParseError> {
    let _ = read_legacy_tx(c, sha256d)?; // AuxPow transaction
    c.require(32)?;
    c.pos += 32; // parent block hash
    let merkle_size = c.read_varint()? as usize;
    c.require(32 * merkle_size)?;
    c.pos += 32 * merkle_size;
    c.require(4)?;
    c.pos += 4; // index
    let merkle_size2 = c.read_varint()? as usize;
    c.require(32 * merkle_size2)?;
    c.pos += 32 * merkle_size2;
    c.require(4)?;
    c.pos += 4; // chain index
    c.require(80)?;
    c.pos += 80; // parent block header
    Ok(())
}
