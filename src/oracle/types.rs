//! Core data model (spec.md §3).


/// Where a [`RawTx`]/[`ProcessedTx`] was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxOrigin {
    /// Seen on the node's `rawtx` ZMQ topic, unconfirmed.
    Mempool,
    /// Extracted from a `rawblock` payload.
    Block,
}

/// Bytes handed off by the [`crate::oracle::source`] layer, not yet parsed.
#[derive(Debug, Clone)]
pub struct RawTx {
    pub bytes: Vec<u8>,
    /// Wall-clock seconds, monotonic-compatible with [`wall_time_now`].
    pub wall_time: i64,
    pub origin: TxOrigin,
    /// Present when `origin == Block`.
    pub block_height: Option<u64>,
}

/// Current wall-clock time in seconds since the epoch.
pub fn wall_time_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// A transaction input (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// Previous output being spent.
    pub prev_txid: [u8; 32],
    pub prev_vout: u32,
    pub has_witness: bool,
    /// Total witness-stack bytes read for this input (0 for non-segwit
    /// transactions or unused segwit slots).
    pub witness_bytes: usize,
}

impl TxInput {
    pub fn is_coinbase_prevout(&self) -> bool {
        self.prev_txid == [0u8; 32] && self.prev_vout == u32::MAX
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.prev_txid,
            vout: self.prev_vout,
        }
    }
}

/// A transaction output (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub value_sats: u64,
    pub script: Vec<u8>,
}

impl TxOutput {
    /// Satoshi -> BTC conversion. Spec.md §4.2: "conversion to BTC ...
    /// happens exactly once at the boundary to the filter."
    pub fn value_btc(&self) -> f64 {
        self.value_sats as f64 / 1e8
    }

    pub fn is_op_return(&self) -> bool {
        matches!(self.script.first(), Some(0x6a))
    }
}

/// (txid, vout) reference, used by the anti-chaining guard (spec.md §4.3 rule 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub txid: [u8; 32],
    pub vout: u32,
}

/// A structurally decoded transaction (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTx {
    pub version: i32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub locktime: u32,
    pub is_segwit: bool,
    pub txid: [u8; 32],
    pub wall_time: i64,
    pub origin: TxOrigin,
    pub block_height: Option<u64>,
}

impl ParsedTx {
    pub fn txid_hex(&self) -> String {
        // Bitcoin txids are conventionally displayed byte-reversed.
        let mut rev = self.txid;
        rev.reverse();
        hex::encode(rev)
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.iter().any(|i| i.is_coinbase_prevout())
    }

    pub fn max_witness_bytes(&self) -> usize {
        self.inputs
            .iter()
            .map(|i| i.witness_bytes)
            .max()
            .unwrap_or(0)
    }
}

/// Output of the filter policy: a transaction that passed spec.md §4.3
/// and whose qualifying amounts are ready for the histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedTx {
    pub txid: [u8; 32],
    /// Qualifying BTC amounts, each in `[MIN_QUALIFYING_BTC, MAX_QUALIFYING_BTC]`.
    pub amounts: Vec<f64>,
    pub wall_time: i64,
    pub input_count: usize,
    pub output_count: usize,
    pub origin: TxOrigin,
    pub block_height: Option<u64>,
}

/// A finished price estimate (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub enum EstimatorKind {
    Baseline,
    Live,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PriceEstimate {
    pub price_usd: f64,
    pub confidence: f64,
    pub contributing_count: usize,
    pub estimator: EstimatorKind,
    pub as_of_wall_time: i64,
    /// Symmetric +/- band derived from the refinement stage's MAD, if any.
    pub range: Option<(f64, f64)>,
}

impl PriceEstimate {
    pub fn is_meaningful(&self) -> bool {
        self.confidence > 0.0 && self.price_usd > 0.0
    }
}
