//! Estimator orchestration logic (spec.md §4.7, component C7).
//!
//! Two independent estimators share the same histogram/stencil/refine
//! pipeline but differ in what keys their rolling window and what they
//! evict by: [`BaselineEstimator`] keys by block height over roughly a
//! day of blocks, [`LiveEstimator`] keys by wall-clock seconds over a
//! few hours of mempool activity. The live estimator seeds itself from
//! the baseline's most recent snapshot so it has a sane starting point
//! before it has accumulated its own window (spec.md §4.7 "seeding").

use crate::oracle::constants::CONFIDENCE_MIN_OUTPUTS;
use crate::oracle::error::OracleError;
use crate::oracle::histogram::Histogram;
use crate::oracle::refine::refine;
use crate::oracle::stencil::StencilFitter;
use crate::oracle::types::{EstimatorKind, PriceEstimate, ProcessedTx};
use crate::oracle::window::RollingWindow;

/// A snapshot of one estimator's contributing amounts, used to seed
/// another estimator's window (spec.md §4.7).
pub struct EstimatorSnapshot {
    /// `(key, amount)` pairs still resident in the source window.
    pub amounts: Vec<(i64, f64)>,
}

struct EstimatorCore {
    histogram: Histogram,
    stencil: StencilFitter,
    window: RollingWindow<f64>,
    /// Mirrors `window`'s eviction but keyed one entry per ingested
    /// transaction rather than per qualifying amount, so `active_in_window`
    /// and `evicted` can be reported at transaction granularity (spec.md
    /// §8's `total_received = total_filtered + active_in_window + evicted`)
    /// even though a transaction can contribute more than one amount to
    /// the histogram. Seeding from another estimator's snapshot (already
    /// flattened to individual amounts) does not have transaction
    /// boundaries to replay, so seeded amounts are not reflected here —
    /// they remain accounted for in the estimator that originally ingested
    /// them.
    tx_window: RollingWindow<()>,
    evicted_txs: u64,
    previous_shift: Option<i32>,
    /// Cumulative qualifying amounts ingested since this estimator was
    /// last seeded (or since construction, if never seeded). `seed_from`
    /// resets this to zero: the amounts it copies in are someone else's
    /// observations, not this estimator's own, so they must not buy
    /// confidence on their own (spec.md §8 scenario 6 — a freshly-seeded
    /// live estimator reports the seeded price at `confidence = 0` until
    /// it has accumulated `CONFIDENCE_MIN_OUTPUTS` amounts of its own).
    native_amounts_since_seed: u64,
}

impl EstimatorCore {
    fn new(span: i64) -> Self {
        Self {
            histogram: Histogram::new(),
            stencil: StencilFitter::new(),
            window: RollingWindow::new(span),
            tx_window: RollingWindow::new(span),
            evicted_txs: 0,
            previous_shift: None,
            native_amounts_since_seed: 0,
        }
    }

    fn ingest(&mut self, key: i64, tx: &ProcessedTx) {
        for &amount in &tx.amounts {
            self.histogram.add(amount, 1.0);
            let evicted = self.window.push(key, amount);
            self.histogram.decay(evicted.into_iter().map(|e| e.value));
        }
        self.native_amounts_since_seed += tx.amounts.len() as u64;
        self.evicted_txs += self.tx_window.push(key, ()).len() as u64;
    }

    fn tick(&mut self, newest_key: i64) {
        let evicted = self.window.evict_to(newest_key);
        self.histogram.decay(evicted.into_iter().map(|e| e.value));
        self.evicted_txs += self.tx_window.evict_to(newest_key).len() as u64;
    }

    fn active_in_window(&self) -> u64 {
        self.tx_window.len() as u64
    }

    fn evicted_count(&self) -> u64 {
        self.evicted_txs
    }

    /// Rebuilds the histogram and stencil correction state from
    /// whatever is still resident in `window`, discarding anything a
    /// corrupted `estimate()` pass may have accumulated (spec.md §4.7:
    /// "the orchestrator restarts the failing stage ... state is
    /// reconstructed from the surviving window contents"). The window
    /// itself is untouched — it's the thing being restarted *from*.
    fn rebuild_from_window(&mut self) {
        let mut histogram = Histogram::new();
        for entry in self.window.iter() {
            histogram.add(entry.value, 1.0);
        }
        self.histogram = histogram;
        self.stencil = StencilFitter::new();
        self.previous_shift = None;
        // native_amounts_since_seed is deliberately left alone: a restart
        // from corruption doesn't erase this estimator's own track record.
    }

    fn estimate(&mut self, kind: EstimatorKind, as_of: i64) -> Result<PriceEstimate, OracleError> {
        let mut normalised = self.histogram.normalise_default();
        self.histogram.denoise(&mut normalised);

        if normalised.iter().any(|v| !v.is_finite() || *v < 0.0) {
            self.rebuild_from_window();
            return Err(OracleError::InternalInvariantViolation(
                "histogram normalisation produced a non-finite or negative bin".into(),
            ));
        }

        let fit = self.stencil.fit(&normalised, self.previous_shift);
        if fit.is_flat() {
            return Err(OracleError::FlatFit(fit.flat_ratio()));
        }
        self.previous_shift = Some(fit.shift);

        let amounts: Vec<f64> = self.window.iter().map(|e| e.value).collect();
        let refined = refine(fit.rough_price, &amounts)?;

        // A window mostly (or entirely) filled by another estimator's
        // seeded amounts can already clear `refine`'s own output
        // threshold; that buys the price a sane starting point but not
        // this estimator's confidence.
        let confidence = if self.native_amounts_since_seed < CONFIDENCE_MIN_OUTPUTS as u64 {
            0.0
        } else {
            refined.confidence
        };

        Ok(PriceEstimate {
            price_usd: refined.price_usd,
            confidence,
            contributing_count: refined.contributing_count,
            estimator: kind,
            as_of_wall_time: as_of,
            range: Some((
                refined.price_usd * (1.0 - refined.mad_ratio),
                refined.price_usd * (1.0 + refined.mad_ratio),
            )),
        })
    }

    fn snapshot(&self) -> EstimatorSnapshot {
        EstimatorSnapshot {
            amounts: self.window.iter().map(|e| (e.key, e.value)).collect(),
        }
    }

    fn seed_from(&mut self, snapshot: &EstimatorSnapshot) {
        for &(key, amount) in &snapshot.amounts {
            self.histogram.add(amount, 1.0);
            let evicted = self.window.push(key, amount);
            self.histogram.decay(evicted.into_iter().map(|e| e.value));
        }
        self.native_amounts_since_seed = 0;
    }
}

/// 144-block (roughly a day) authoritative baseline estimator.
pub struct BaselineEstimator {
    core: EstimatorCore,
}

impl BaselineEstimator {
    pub fn new(window_blocks: u64) -> Self {
        Self {
            core: EstimatorCore::new(window_blocks as i64),
        }
    }

    pub fn ingest_block_tx(&mut self, block_height: u64, tx: &ProcessedTx) {
        self.core.ingest(block_height as i64, tx);
    }

    pub fn estimate(&mut self, as_of: i64) -> Result<PriceEstimate, OracleError> {
        self.core.estimate(EstimatorKind::Baseline, as_of)
    }

    pub fn snapshot(&self) -> EstimatorSnapshot {
        self.core.snapshot()
    }

    /// Transactions currently resident in the 144-block window.
    pub fn active_in_window(&self) -> u64 {
        self.core.active_in_window()
    }

    /// Cumulative transactions evicted from the window since startup.
    pub fn evicted_count(&self) -> u64 {
        self.core.evicted_count()
    }
}

/// 3h mempool-backed live estimator, seeded from the baseline.
pub struct LiveEstimator {
    core: EstimatorCore,
}

impl LiveEstimator {
    pub fn new(window_secs: i64) -> Self {
        Self {
            core: EstimatorCore::new(window_secs),
        }
    }

    pub fn seed_from_baseline(&mut self, snapshot: &EstimatorSnapshot) {
        self.core.seed_from(snapshot);
    }

    pub fn ingest_mempool_tx(&mut self, wall_time: i64, tx: &ProcessedTx) {
        self.core.ingest(wall_time, tx);
    }

    /// Ages out entries by wall-clock time even when no new transaction
    /// has arrived (spec.md §4.7: the live window must shrink on a
    /// timer, not only on ingest).
    pub fn tick(&mut self, now: i64) {
        self.core.tick(now);
    }

    pub fn estimate(&mut self, as_of: i64) -> Result<PriceEstimate, OracleError> {
        self.core.estimate(EstimatorKind::Live, as_of)
    }

    /// Transactions currently resident in the live window.
    pub fn active_in_window(&self) -> u64 {
        self.core.active_in_window()
    }

    /// Cumulative transactions evicted from the window since startup.
    pub fn evicted_count(&self) -> u64 {
        self.core.evicted_count()
    }
}
