//! Refinement stage (spec.md §4.6, component C6).
//!
//! Takes the stencil fitter's rough price and the qualifying BTC
//! amounts it was computed from, then converges on an exact price by
//! repeatedly snapping each amount's implied USD value onto a ladder of
//! round USD denominations and taking the geometric median of the
//! recovered per-amount prices inside a shrinking band around the
//! current estimate. Confidence is a monotone function of how many
//! amounts ultimately snap onto the ladder.

use statrs::statistics::{Data, Median};

use crate::oracle::constants::{
    CONFIDENCE_LINEAR_TARGET, CONFIDENCE_LINEAR_TARGET_OUTPUTS, CONFIDENCE_MIN_OUTPUTS,
    REFINE_CONVERGENCE_RATIO, REFINE_INITIAL_BAND_RATIO, REFINE_LADDER_TOLERANCE,
    REFINE_MAX_ITERATIONS, REFINE_USD_LADDER,
};
use crate::oracle::error::OracleError;

/// Outcome of a successful refinement pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefinementResult {
    pub price_usd: f64,
    pub confidence: f64,
    pub contributing_count: usize,
    pub mad_ratio: f64,
}

/// Snaps `implied_usd` to the nearest ladder rung if it falls within
/// `REFINE_LADDER_TOLERANCE` of it (relative), else returns `None`.
fn snap_to_ladder(implied_usd: f64) -> Option<f64> {
    let mut best: Option<(f64, f64)> = None; // (rung, relative distance)
    for &rung in REFINE_USD_LADDER.iter() {
        if rung <= 0.0 {
            continue;
        }
        let rel = (implied_usd - rung).abs() / rung;
        if rel <= REFINE_LADDER_TOLERANCE {
            if best.map(|(_, best_rel)| rel < best_rel).unwrap_or(true) {
                best = Some((rung, rel));
            }
        }
    }
    best.map(|(rung, _)| rung)
}

fn median_of(values: &[f64]) -> f64 {
    Data::new(values.to_vec()).median()
}

/// Runs the shrinking-band geometric-median convergence loop described
/// in spec.md §4.6, starting from the stencil fitter's `rough_price`.
///
/// `amounts` are the qualifying BTC amounts that fed the histogram bins
/// the stencil fit drew its shift from.
pub fn refine(rough_price: f64, amounts: &[f64]) -> Result<RefinementResult, OracleError> {
    if rough_price <= 0.0 || !rough_price.is_finite() {
        return Err(OracleError::InternalInvariantViolation(
            "refine called with non-positive rough price".into(),
        ));
    }

    let mut price = rough_price;
    let mut band_ratio = REFINE_INITIAL_BAND_RATIO;
    let mut recovered: Vec<f64> = Vec::new();

    for _ in 0..REFINE_MAX_ITERATIONS {
        let band_low = price * (1.0 - band_ratio);
        let band_high = price * (1.0 + band_ratio);

        recovered.clear();
        for &amount in amounts {
            if amount <= 0.0 {
                continue;
            }
            let implied_usd = amount * price;
            if let Some(rung) = snap_to_ladder(implied_usd) {
                let candidate_price = rung / amount;
                if candidate_price >= band_low && candidate_price <= band_high {
                    recovered.push(candidate_price);
                }
            }
        }

        if recovered.is_empty() {
            return Err(OracleError::InsufficientData(0));
        }

        let new_price = median_of(&recovered);
        let delta_ratio = (new_price - price).abs() / price;
        price = new_price;
        band_ratio *= 0.5;

        if delta_ratio < REFINE_CONVERGENCE_RATIO {
            break;
        }
    }

    let contributing_count = recovered.len();
    if contributing_count < CONFIDENCE_MIN_OUTPUTS {
        return Err(OracleError::InsufficientData(contributing_count));
    }

    let deviations: Vec<f64> = recovered.iter().map(|v| (v - price).abs() / price).collect();
    let mad_ratio = median_of(&deviations);

    Ok(RefinementResult {
        price_usd: price,
        confidence: confidence_from_count(contributing_count),
        contributing_count,
        mad_ratio,
    })
}

/// Confidence ramps linearly from 0 at `CONFIDENCE_MIN_OUTPUTS` to
/// `CONFIDENCE_LINEAR_TARGET` at `CONFIDENCE_LINEAR_TARGET_OUTPUTS`,
/// then continues asymptotically toward 1.0 beyond that (spec.md §4.6).
pub fn confidence_from_count(count: usize) -> f64 {
    if count < CONFIDENCE_MIN_OUTPUTS {
        return 0.0;
    }
    if count <= CONFIDENCE_LINEAR_TARGET_OUTPUTS {
        let span = (CONFIDENCE_LINEAR_TARGET_OUTPUTS - CONFIDENCE_MIN_OUTPUTS) as f64;
        let progress = (count - CONFIDENCE_MIN_OUTPUTS) as f64 / span;
        return progress * CONFIDENCE_LINEAR_TARGET;
    }
    let excess = (count - CONFIDENCE_LINEAR_TARGET_OUTPUTS) as f64;
    let remaining = 1.0 - CONFIDENCE_LINEAR_TARGET;
    CONFIDENCE_LINEAR_TARGET + remaining * (1.0 - (-excess / CONFIDENCE_LINEAR_TARGET_OUTPUTS as f64).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_amounts(price: f64, count: usize) -> Vec<f64> {
        let ladder = [5.0, 10.0, 20.0, 50.0, 100.0, 200.0];
        (0..count)
            .map(|i| ladder[i % ladder.len()] / price)
            .collect()
    }

    #[test]
    fn refine_converges_near_true_price() {
        let true_price = 63_000.0;
        let amounts = synthetic_amounts(true_price, 150);
        let result = refine(true_price * 1.02, &amounts).unwrap();
        assert!((result.price_usd - true_price).abs() / true_price < 0.01);
    }

    #[test]
    fn confidence_is_zero_below_minimum_outputs() {
        assert_eq!(confidence_from_count(CONFIDENCE_MIN_OUTPUTS - 1), 0.0);
    }

    #[test]
    fn confidence_increases_monotonically() {
        let a = confidence_from_count(CONFIDENCE_MIN_OUTPUTS);
        let b = confidence_from_count(CONFIDENCE_LINEAR_TARGET_OUTPUTS);
        let c = confidence_from_count(CONFIDENCE_LINEAR_TARGET_OUTPUTS * 5);
        assert!(a < b);
        assert!(b < c);
        assert!(c < 1.0);
        assert!((b - CONFIDENCE_LINEAR_TARGET).abs() < 1e-9);
    }

    #[test]
    fn insufficient_data_when_too_few_amounts_snap() {
        let amounts = vec![0.0001, 0.0002, 0.0003];
        let err = refine(63_000.0, &amounts).unwrap_err();
        matches!(err, OracleError::InsufficientData(_) | OracleError::FlatFit(_));
    }

    #[test]
    fn snap_to_ladder_respects_tolerance() {
        assert_eq!(snap_to_ladder(100.0), Some(100.0));
        assert_eq!(snap_to_ladder(104.0), Some(100.0));
        assert_eq!(snap_to_ladder(120.0), None);
    }
}
