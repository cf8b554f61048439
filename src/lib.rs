//! UTXOracle core library.
//!
//! Exposes the price inference pipeline (ingestion -> parsing -> filter
//! -> histogram -> stencil fit -> refinement -> estimator orchestrator)
//! for use by the `utxoracled` binary and by integration tests.

pub mod oracle;
pub mod publish;

pub use oracle::config::OracleConfig;
pub use oracle::error::OracleError;
pub use oracle::orchestrator::Orchestrator;
pub use oracle::update::MempoolUpdate;
