//! Stencil fitter (spec.md §4.5, component C5).
//!
//! Two immutable, pre-computed shapes are correlated against a
//! normalized histogram snapshot to locate the exchange rate: a smooth
//! log-normal-like envelope and a discrete round-USD spike pattern.
//! Both stencils are anchored so that their own index 0 corresponds to
//! the histogram bin `CENTRAL_REFERENCE_BIN - local_mean_bin` (smooth)
//! or directly to `CENTRAL_REFERENCE_BIN + offset` (spike); the search
//! variable `s` is then a small correction shift, not the full BTC/USD
//! exponent.

use crate::oracle::constants::{
    BINS_PER_DECADE, CENTRAL_REFERENCE_BIN, CENTRAL_REFERENCE_PRICE, HIGH_PRICE_SHIFT_THRESHOLD,
    SHIFT_MAX, SHIFT_MIN, SHIFT_TIE_BREAK_RATIO, SMOOTH_DRIFT_PER_BIN, SMOOTH_MEAN_BIN,
    SMOOTH_SIGMA_BINS, SMOOTH_STENCIL_LEN, SMOOTH_WEIGHT, SPIKE_USD_LADDER, SPIKE_WEIGHT,
};
use crate::oracle::histogram::bin_index;

/// The global histogram bin that the smooth stencil's local index 0
/// corresponds to at shift zero.
const SMOOTH_BASE_OFFSET: i64 = CENTRAL_REFERENCE_BIN as i64 - SMOOTH_MEAN_BIN as i64;

/// Converts a stencil shift to a BTC/USD exchange rate (spec.md §4.5:
/// "each unit shift corresponds to a fixed multiplicative factor
/// `10^{1/B}`").
pub fn price_from_shift(shift: i32) -> f64 {
    CENTRAL_REFERENCE_PRICE * 10f64.powf(shift as f64 / BINS_PER_DECADE as f64)
}

/// Inverse of [`price_from_shift`], rounded to the nearest integer shift.
pub fn shift_from_price(price: f64) -> i32 {
    ((price / CENTRAL_REFERENCE_PRICE).log10() * BINS_PER_DECADE as f64).round() as i32
}

/// Pre-computed, immutable stencil pair.
pub struct StencilFitter {
    /// Local smooth envelope, index 0 maps to `SMOOTH_BASE_OFFSET`.
    smooth: Vec<f64>,
    /// Round-USD amount -> bin offsets relative to `CENTRAL_REFERENCE_BIN`.
    spike: Vec<(f64, Vec<i64>)>,
}

/// Result of a stencil fit (spec.md §4.5's "rough price").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitResult {
    pub shift: i32,
    pub rough_price: f64,
    pub best_score: f64,
    pub second_best_score: f64,
}

impl FitResult {
    /// spec.md §4.6 failure fallback: "if the stencil fit itself has
    /// flat scores (best/second-best ratio < 1.01)".
    pub fn is_flat(&self) -> bool {
        self.flat_ratio() < crate::oracle::constants::FLAT_FIT_RATIO
    }

    /// Best/second-best score ratio; `1.0` when both scores are zero
    /// (maximally flat).
    pub fn flat_ratio(&self) -> f64 {
        if self.second_best_score <= 0.0 {
            return if self.best_score <= 0.0 { 1.0 } else { f64::INFINITY };
        }
        self.best_score / self.second_best_score
    }
}

impl StencilFitter {
    pub fn new() -> Self {
        Self {
            smooth: build_smooth_stencil(),
            spike: build_spike_stencil(),
        }
    }

    fn smooth_score(&self, hist: &[f64], s: i32) -> f64 {
        let mut total = 0.0;
        for (i, weight) in self.smooth.iter().enumerate() {
            let idx = SMOOTH_BASE_OFFSET + i as i64 + s as i64;
            if idx >= 0 && (idx as usize) < hist.len() {
                total += hist[idx as usize] * weight;
            }
        }
        total
    }

    fn spike_score(&self, hist: &[f64], s: i32) -> f64 {
        let mut total = 0.0;
        for (_usd, offsets) in &self.spike {
            for offset in offsets {
                let idx = CENTRAL_REFERENCE_BIN as i64 + offset + s as i64;
                if idx >= 0 && (idx as usize) < hist.len() {
                    total += hist[idx as usize];
                }
            }
        }
        total
    }

    fn total_score(&self, hist: &[f64], s: i32) -> f64 {
        let spike = self.spike_score(hist, s);
        if s >= HIGH_PRICE_SHIFT_THRESHOLD {
            spike
        } else {
            SMOOTH_WEIGHT * self.smooth_score(hist, s) + SPIKE_WEIGHT * spike
        }
    }

    /// Slides both stencils over `hist` (a normalized histogram
    /// snapshot) across the supported shift range, returning the
    /// argmax shift converted to a rough price (spec.md §4.5).
    pub fn fit(&self, hist: &[f64], previous_shift: Option<i32>) -> FitResult {
        let mut scored: Vec<(i32, f64)> = (SHIFT_MIN..=SHIFT_MAX)
            .map(|s| (s, self.total_score(hist, s)))
            .collect();

        // Stable sort descending by score so ties preserve shift order,
        // which the tie-break below then refines.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let (mut best_shift, best_score) = scored[0];
        let second_best_score = scored.get(1).map(|(_, sc)| *sc).unwrap_or(0.0);

        if best_score > 0.0 {
            let threshold = best_score * (1.0 - SHIFT_TIE_BREAK_RATIO);
            let mut candidates: Vec<i32> = scored
                .iter()
                .filter(|(_, sc)| *sc >= threshold)
                .map(|(s, _)| *s)
                .collect();

            candidates.sort_by_key(|s| match previous_shift {
                Some(prev) => (s - prev).abs(),
                None => s.abs(),
            });
            best_shift = candidates[0];
        }

        FitResult {
            shift: best_shift,
            rough_price: price_from_shift(best_shift),
            best_score,
            second_best_score,
        }
    }
}

impl Default for StencilFitter {
    fn default() -> Self {
        Self::new()
    }
}

fn build_smooth_stencil() -> Vec<f64> {
    let mut v = Vec::with_capacity(SMOOTH_STENCIL_LEN);
    for i in 0..SMOOTH_STENCIL_LEN {
        let x = (i as f64 - SMOOTH_MEAN_BIN) / SMOOTH_SIGMA_BINS;
        let bell = (-0.5 * x * x).exp();
        let drift = SMOOTH_DRIFT_PER_BIN * i as f64;
        v.push(bell + drift);
    }
    let sum: f64 = v.iter().sum();
    if sum > 0.0 {
        for value in v.iter_mut() {
            *value /= sum;
        }
    }
    v
}

fn build_spike_stencil() -> Vec<(f64, Vec<i64>)> {
    SPIKE_USD_LADDER
        .iter()
        .map(|&usd| {
            let btc = usd / CENTRAL_REFERENCE_PRICE;
            let idx = bin_index(btc) as i64;
            let offset = idx - CENTRAL_REFERENCE_BIN as i64;
            (usd, vec![offset - 1, offset, offset + 1])
        })
        .collect()
}
