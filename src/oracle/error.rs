//! Typed error taxonomy (spec.md §7).

use thiserror::Error;

/// Errors raised inside the price inference pipeline.
///
/// Only [`OracleError::SourceUnavailable`] and
/// [`OracleError::InternalInvariantViolation`] are surfaced to
/// subscribers (via [`crate::oracle::update::MempoolUpdate`]'s health
/// flag); the rest are internal statistics counted in
/// `MempoolUpdate.stats` (spec.md §7 "Propagation").
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OracleError {
    /// Node event-stream transport unreachable after the bounded retry budget.
    #[error("bitcoin node source unavailable: {0}")]
    SourceUnavailable(String),

    /// Parser rejected bytes: truncated input, impossible varints, or an
    /// inconsistent segwit marker/flag.
    #[error("malformed transaction: {0}")]
    MalformedTx(String),

    /// A structurally valid transaction did not match the economic
    /// activity predicates of spec.md §4.3. Not an error condition —
    /// counted, not logged as a failure.
    #[error("filtered out: {0}")]
    FilteredOut(&'static str),

    /// Fewer than the refinement threshold of qualifying outputs
    /// contributed to this estimator cycle.
    #[error("insufficient data: {0} contributing outputs")]
    InsufficientData(usize),

    /// The stencil fitter could not distinguish a best shift
    /// (best/second-best ratio below [`crate::oracle::constants::FLAT_FIT_RATIO`]).
    #[error("flat stencil fit: best/second-best ratio {0:.5}")]
    FlatFit(f64),

    /// A histogram or window invariant was violated (e.g. a negative
    /// bin weight). Fatal to the affected estimator; the orchestrator
    /// restarts it by replaying the surviving window contents.
    #[error("internal invariant violation: {0}")]
    InternalInvariantViolation(String),
}
