//! Binary transaction parser (spec.md §4.2, component C2).
//!
//! Hand-rolled, SegWit-aware decoder over raw bytes — deliberately not
//! delegating to an existing Bitcoin consensus library, since this is
//! the from-scratch, paper-worthy part of the system (spec.md §1).
//! Never panics on attacker-controlled bytes: every read returns
//! `Result<_, OracleError::MalformedTx>`.

use sha2::{Digest, Sha256};

use crate::oracle::error::OracleError;
use crate::oracle::types::{ParsedTx, TxInput, TxOutput, TxOrigin};
use crate::oracle::varint::Cursor;

/// Cap on a single scriptSig/scriptPubKey/witness item, to reject
/// implausible lengths before they turn into large allocations.
const MAX_SCRIPT_LEN: u64 = 10_000;
const MAX_WITNESS_ITEM_LEN: u64 = 10_000;

/// Parses exactly one canonical serialized transaction, requiring the
/// whole of `bytes` to be consumed (the contract for a standalone
/// `rawtx` ZMQ payload).
pub fn parse_tx(
    bytes: &[u8],
    wall_time: i64,
    origin: TxOrigin,
    block_height: Option<u64>,
) -> Result<ParsedTx, OracleError> {
    let (tx, consumed) = read_tx_prefix(bytes, wall_time, origin, block_height)?;
    if consumed != bytes.len() {
        return Err(OracleError::MalformedTx(format!(
            "trailing bytes after transaction: consumed {} of {}",
            consumed,
            bytes.len()
        )));
    }
    Ok(tx)
}

/// Parses one transaction occupying a prefix of `bytes`, returning how
/// many bytes it consumed. Used to walk a `rawblock` payload's
/// transaction list, where each transaction is followed immediately by
/// the next.
pub fn read_tx_prefix(
    bytes: &[u8],
    wall_time: i64,
    origin: TxOrigin,
    block_height: Option<u64>,
) -> Result<(ParsedTx, usize), OracleError> {
    let mut cur = Cursor::new(bytes);

    let version = cur.read_i32_le()?;

    let mut is_segwit = false;
    if cur.remaining() >= 2 {
        let marker = bytes[cur.position()];
        let flag = bytes[cur.position() + 1];
        if marker == 0x00 && flag == 0x01 {
            is_segwit = true;
            cur.read_u8()?;
            cur.read_u8()?;
        }
    }

    let input_output_start = cur.position();

    let input_count = cur.read_varint()?;
    let mut inputs = Vec::with_capacity(input_count as usize);
    for _ in 0..input_count {
        let prev_txid_slice = cur.read_bytes(32)?;
        let mut prev_txid = [0u8; 32];
        prev_txid.copy_from_slice(prev_txid_slice);
        let prev_vout = cur.read_u32_le()?;
        let _script_sig = cur.read_varbytes(MAX_SCRIPT_LEN)?;
        let _sequence = cur.read_u32_le()?;
        inputs.push(TxInput {
            prev_txid,
            prev_vout,
            has_witness: false,
            witness_bytes: 0,
        });
    }

    let output_count = cur.read_varint()?;
    let mut outputs = Vec::with_capacity(output_count as usize);
    for _ in 0..output_count {
        let value_sats = cur.read_u64_le()?;
        let script = cur.read_varbytes(MAX_SCRIPT_LEN)?.to_vec();
        outputs.push(TxOutput { value_sats, script });
    }

    let input_output_end = cur.position();

    if is_segwit {
        for input in inputs.iter_mut() {
            let item_count = cur.read_varint()?;
            let mut total = 0usize;
            for _ in 0..item_count {
                let item = cur.read_varbytes(MAX_WITNESS_ITEM_LEN)?;
                total += item.len();
            }
            input.has_witness = item_count > 0;
            input.witness_bytes = total;
        }
    }

    let locktime_start = cur.position();
    let locktime = cur.read_u32_le()?;
    let locktime_end = cur.position();

    let consumed = locktime_end;

    let txid = double_sha256_txid(
        &bytes[0..4],
        &bytes[input_output_start..input_output_end],
        &bytes[locktime_start..locktime_end],
    );

    Ok((
        ParsedTx {
            version,
            inputs,
            outputs,
            locktime,
            is_segwit,
            txid,
            wall_time,
            origin,
            block_height,
        },
        consumed,
    ))
}

/// txid = double-SHA256 of the non-witness serialization (spec.md
/// §4.2). The three slices are version || (inputs+outputs, with the
/// segwit marker/flag excluded) || locktime, mirroring how a segwit
/// transaction's legacy digest is assembled without copying the whole
/// transaction into a new buffer.
fn double_sha256_txid(version: &[u8], inputs_outputs: &[u8], locktime: &[u8]) -> [u8; 32] {
    let mut first = Sha256::new();
    first.update(version);
    first.update(inputs_outputs);
    first.update(locktime);
    let first_digest = first.finalize();

    let mut second = Sha256::new();
    second.update(first_digest);
    let second_digest = second.finalize();

    let mut out = [0u8; 32];
    out.copy_from_slice(&second_digest);
    out
}

/// Extracts transactions from a raw block payload (spec.md §4.1
/// `extract_transactions`): an 80-byte header, a varint transaction
/// count, then back-to-back transactions, starting with the coinbase.
pub fn extract_block_transactions(
    block_bytes: &[u8],
    wall_time: i64,
    block_height: Option<u64>,
) -> Result<Vec<ParsedTx>, OracleError> {
    const BLOCK_HEADER_LEN: usize = 80;
    if block_bytes.len() < BLOCK_HEADER_LEN {
        return Err(OracleError::MalformedTx(
            "block shorter than header".into(),
        ));
    }

    let mut cur = Cursor::new(&block_bytes[BLOCK_HEADER_LEN..]);
    let tx_count = cur.read_varint()?;
    let mut offset = BLOCK_HEADER_LEN + cur.position();

    let mut txs = Vec::with_capacity(tx_count as usize);
    for _ in 0..tx_count {
        let (tx, consumed) =
            read_tx_prefix(&block_bytes[offset..], wall_time, TxOrigin::Block, block_height)?;
        offset += consumed;
        txs.push(tx);
    }
    Ok(txs)
}
