//! Load-bearing algorithm constants (spec.md §9).
//!
//! These are intentionally *not* part of [`crate::oracle::config::OracleConfig`]:
//! spec.md §6 is explicit that nothing beyond the enumerated knobs is
//! configurable, and §9 calls these numbers load-bearing, not tunable.
//!
//! The exact historical calibration constants from the reference
//! implementation were not available to this port (see DESIGN.md); the
//! values below reproduce the documented *shape* (log-normal bell
//! centred at bin ~411 with sigma ~201, a 0.65/1.00 smooth/spike weight
//! split, a 0.008 per-bin clip, 200 bins/decade) rather than
//! bit-for-bit historical coefficients.

/// Lowest decade offset covered by the histogram (10^-6 BTC).
pub const DECADE_LOW: i32 = -6;

/// Highest decade offset covered by the histogram, exclusive (10^6 BTC).
pub const DECADE_HIGH: i32 = 6;

/// Bins per decade (B in spec.md §4.4/§4.5).
pub const BINS_PER_DECADE: usize = 200;

/// Total addressable histogram bins: one underflow bin, `DECADE_HIGH -
/// DECADE_LOW` decades at `BINS_PER_DECADE` each, one overflow bin.
pub const TOTAL_BINS: usize = ((DECADE_HIGH - DECADE_LOW) as usize) * BINS_PER_DECADE + 2;

/// Filter/histogram amount bounds (BTC), spec.md §4.3 rule 7.
pub const MIN_QUALIFYING_BTC: f64 = 1e-5;
pub const MAX_QUALIFYING_BTC: f64 = 1e5;

/// Normalisation window (spec.md §4.4 `normalise`).
pub const NORMALISE_WINDOW_LOW: usize = 201;
pub const NORMALISE_WINDOW_HIGH: usize = 1601;

/// Per-bin share saturation clip (spec.md §4.4 `normalise`); an Open
/// Question per spec.md §9, kept as a constant and exposed `pub(crate)`
/// for tests rather than user configuration.
pub const HISTOGRAM_CLIP: f64 = 0.008;

/// Reference bin/price pair fixing the central convention (spec.md §4.5).
pub const CENTRAL_REFERENCE_BIN: usize = 601;
pub const CENTRAL_REFERENCE_PRICE: f64 = 100_000.0;
pub const CENTRAL_REFERENCE_BTC: f64 = 0.001;

/// Stencil shift search range around the central reference bin (spec.md §4.5).
pub const SHIFT_MIN: i32 = -141;
pub const SHIFT_MAX: i32 = 202;

/// High-price regime threshold: at and beyond this shift the smooth
/// envelope is dropped from the score (spec.md §4.5, §9 Open Question —
/// kept as the reference's step function).
pub const HIGH_PRICE_SHIFT_THRESHOLD: i32 = 150;

/// Smooth/spike score weights (spec.md §4.5).
pub const SMOOTH_WEIGHT: f64 = 0.65;
pub const SPIKE_WEIGHT: f64 = 1.00;

/// Smooth stencil shape (spec.md §4.5, §9).
pub const SMOOTH_STENCIL_LEN: usize = 803;
pub const SMOOTH_MEAN_BIN: f64 = 411.0;
pub const SMOOTH_SIGMA_BINS: f64 = 201.0;
/// Small positive linear drift added across the stencil's length.
pub const SMOOTH_DRIFT_PER_BIN: f64 = 1.0 / (SMOOTH_STENCIL_LEN as f64 * SMOOTH_STENCIL_LEN as f64);

/// Tie-break tolerance for the stencil argmax (spec.md §4.5).
pub const SHIFT_TIE_BREAK_RATIO: f64 = 0.001;

/// Canonical round-USD amounts the spike stencil is built from (spec.md
/// §4.5: "30 values, covering $1, $2, $5, $10, $15, $20, $50, $100,
/// $150, ... up to the highest price regime supported").
pub const SPIKE_USD_LADDER: [f64; 30] = [
    1.0, 2.0, 5.0, 10.0, 15.0, 20.0, 50.0, 100.0, 150.0, 200.0, 300.0, 500.0, 750.0, 1_000.0,
    1_500.0, 2_000.0, 3_000.0, 5_000.0, 7_500.0, 10_000.0, 15_000.0, 20_000.0, 30_000.0,
    50_000.0, 75_000.0, 100_000.0, 150_000.0, 200_000.0, 300_000.0, 500_000.0,
];

/// Dense round-USD ladder used by the refinement stage to snap implied
/// USD values (spec.md §4.6, glossary "Round USD").
pub const REFINE_USD_LADDER: [f64; 14] = [
    5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1_000.0, 2_000.0, 5_000.0, 10_000.0, 20_000.0,
    50_000.0, 100_000.0,
];

/// Relative distance tolerance for ladder snapping (spec.md §4.6 step 1).
pub const REFINE_LADDER_TOLERANCE: f64 = 0.05;

/// Refinement converging-band search bounds (spec.md §4.6 step 3).
pub const REFINE_INITIAL_BAND_RATIO: f64 = 0.05;
pub const REFINE_MAX_ITERATIONS: usize = 8;
pub const REFINE_CONVERGENCE_RATIO: f64 = 0.0001;

/// Confidence ramp control points (spec.md §4.6 step 4).
pub const CONFIDENCE_MIN_OUTPUTS: usize = 100;
pub const CONFIDENCE_LINEAR_TARGET_OUTPUTS: usize = 1_000;
pub const CONFIDENCE_LINEAR_TARGET: f64 = 0.8;

/// Flat-fit detector: best/second-best score ratio below this is "flat"
/// (spec.md §4.6 failure fallbacks).
pub const FLAT_FIT_RATIO: f64 = 1.01;

/// Filter structural bounds (spec.md §4.3).
pub const MIN_INPUT_COUNT: usize = 1;
pub const MAX_INPUT_COUNT: usize = 5;
pub const REQUIRED_OUTPUT_COUNT: usize = 2;
pub const WITNESS_BYTES_MAX_DEFAULT: usize = 500;

/// Anti-chaining guard window (spec.md §4.3 rule 6, §9 Open Question:
/// resolved as wall-clock time of first observation).
pub const ANTI_CHAIN_WINDOW_SECS: i64 = 24 * 60 * 60;

/// Rolling window defaults (spec.md §6).
pub const DEFAULT_LIVE_WINDOW_SECS: i64 = 10_800;
pub const DEFAULT_BASELINE_WINDOW_BLOCKS: u64 = 144;

/// Publisher defaults (spec.md §6).
pub const DEFAULT_PUBLISH_MIN_INTERVAL_MS: u64 = 500;
pub const DEFAULT_MATERIAL_CHANGE_RATIO: f64 = 0.001;

/// Bounded recent-points list length (spec.md §2 item 8, §6).
pub const RECENT_POINTS_CAPACITY: usize = 500;

/// Fallback seed used before the baseline has a first estimate (spec.md §6).
pub const DEFAULT_FALLBACK_SEED_PRICE: f64 = 100_000.0;
