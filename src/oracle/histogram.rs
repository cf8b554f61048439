//! Logarithmic output-value histogram (spec.md §4.4, component C4).
//!
//! Bin index is O(1) from `log10(amount)`, never a search. The only
//! public operations are the ones spec.md §4.4 and §9 allow — the dense
//! bin vector itself is never exposed for external mutation.

use crate::oracle::constants::{
    BINS_PER_DECADE, DECADE_LOW, HISTOGRAM_CLIP, MAX_QUALIFYING_BTC, MIN_QUALIFYING_BTC,
    NORMALISE_WINDOW_HIGH, NORMALISE_WINDOW_LOW, TOTAL_BINS,
};

/// BTC reference amounts that are numerical artefacts rather than USD
/// payment intent (glossary: "Round BTC"), used by [`Histogram::denoise`].
const ROUND_BTC_MARKERS: [f64; 9] = [0.001, 0.01, 0.1, 1.0, 5.0, 10.0, 50.0, 100.0, 500.0];

/// Maps a BTC amount to its bin index (spec.md §4.4): the first bin
/// covers everything at or below `10^DECADE_LOW`, the last bin covers
/// everything at or above the top decade, and bins in between are
/// `10^{DECADE_LOW + k/BINS_PER_DECADE}` wide in log-space.
pub fn bin_index(amount: f64) -> usize {
    if !(amount.is_finite()) || amount <= 0.0 {
        return 0;
    }
    let log = amount.log10();
    if log <= DECADE_LOW as f64 {
        return 0;
    }
    let raw = ((log - DECADE_LOW as f64) * BINS_PER_DECADE as f64).floor() as i64 + 1;
    raw.clamp(0, (TOTAL_BINS - 1) as i64) as usize
}

/// Inverse of [`bin_index`]: the BTC amount at a bin's lower edge.
pub fn bin_lower_edge(index: usize) -> f64 {
    if index == 0 {
        return 0.0;
    }
    let k = (index - 1) as f64;
    10f64.powf(DECADE_LOW as f64 + k / BINS_PER_DECADE as f64)
}

/// A per-bin accumulator with Kahan compensated summation (spec.md §9:
/// "add/remove symmetry requires using the same accumulation order").
#[derive(Clone)]
struct KahanBin {
    sum: f64,
    compensation: f64,
}

impl KahanBin {
    fn add(&mut self, value: f64) {
        let y = value - self.compensation;
        let t = self.sum + y;
        self.compensation = (t - self.sum) - y;
        self.sum = t;
    }
}

pub struct Histogram {
    bins: Vec<KahanBin>,
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            bins: vec![
                KahanBin {
                    sum: 0.0,
                    compensation: 0.0
                };
                TOTAL_BINS
            ],
        }
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn total_weight(&self) -> f64 {
        self.bins.iter().map(|b| b.sum).sum()
    }

    /// Adds `weight` to the bin for `amount`. A no-op outside the
    /// qualifying range (spec.md §4.4 `add`).
    pub fn add(&mut self, amount: f64, weight: f64) {
        if amount < MIN_QUALIFYING_BTC || amount > MAX_QUALIFYING_BTC {
            return;
        }
        let idx = bin_index(amount);
        self.bins[idx].add(weight);
    }

    /// Symmetric with [`Histogram::add`]; floors the bin at zero to
    /// tolerate floating-point rounding (spec.md §4.4 `remove`).
    pub fn remove(&mut self, amount: f64, weight: f64) {
        if amount < MIN_QUALIFYING_BTC || amount > MAX_QUALIFYING_BTC {
            return;
        }
        let idx = bin_index(amount);
        self.bins[idx].add(-weight);
        if self.bins[idx].sum < 0.0 {
            self.bins[idx].sum = 0.0;
            self.bins[idx].compensation = 0.0;
        }
    }

    /// Ages weight out of the histogram for amounts that just fell out of
    /// a caller's rolling window (spec.md §2 item 4, §4.4: `decay(window)`).
    /// Each amount is removed with unit weight, same as calling
    /// [`Histogram::remove`] once per entry; this is that named operation's
    /// batch form, since the rolling-window eviction that drives it always
    /// produces a batch of just-expired entries at once.
    pub fn decay(&mut self, evicted_amounts: impl IntoIterator<Item = f64>) {
        for amount in evicted_amounts {
            self.remove(amount, 1.0);
        }
    }

    /// Read-only dense snapshot of the current per-bin weights.
    pub fn snapshot_counts(&self) -> Vec<f64> {
        self.bins.iter().map(|b| b.sum).collect()
    }

    /// Divides each bin's weight in `[window_low, window_high)` by the
    /// total weight in that window, then clips the per-bin share at
    /// [`HISTOGRAM_CLIP`] (spec.md §4.4 `normalise`). Returns a snapshot
    /// rather than mutating in place, so repeated `add`/`remove` calls
    /// keep exact raw counts (spec.md §8's round-trip invariant) while
    /// the stencil fitter works from a normalized view.
    pub fn normalise(&self, window_low: usize, window_high: usize) -> Vec<f64> {
        self.normalise_default_range(window_low, window_high)
    }

    pub fn normalise_default(&self) -> Vec<f64> {
        self.normalise_default_range(NORMALISE_WINDOW_LOW, NORMALISE_WINDOW_HIGH)
    }

    fn normalise_default_range(&self, window_low: usize, window_high: usize) -> Vec<f64> {
        let lo = window_low.min(self.bins.len());
        let hi = window_high.min(self.bins.len());
        let window_total: f64 = self.bins[lo..hi].iter().map(|b| b.sum).sum();

        let mut out = self.snapshot_counts();
        if window_total > 0.0 {
            for v in out[lo..hi].iter_mut() {
                *v = (*v / window_total).min(HISTOGRAM_CLIP);
            }
        }
        out
    }

    /// Zeroes bins at or adjacent to known round-BTC reference amounts,
    /// eliminating residual contamination that survived per-transaction
    /// filtering (spec.md §4.4 `denoise`).
    pub fn denoise(&self, counts: &mut [f64]) {
        for marker in ROUND_BTC_MARKERS {
            let idx = bin_index(marker);
            for offset in -1i64..=1 {
                let i = idx as i64 + offset;
                if i >= 0 && (i as usize) < counts.len() {
                    counts[i as usize] = 0.0;
                }
            }
        }
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}
