//! Orchestrator: wires source -> parser -> filter -> histogram/stencil/
//! refine -> estimators -> update channel (spec.md §4, end to end).
//!
//! Everything downstream of the source's bounded channel runs on a
//! single tokio task. That task owns the filter policy and both
//! estimators outright, so there is no cross-task locking on the hot
//! path; the only shared state handed out to the rest of the process is
//! the `watch::Receiver<MempoolUpdate>` and the source's health flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::oracle::config::OracleConfig;
use crate::oracle::error::OracleError;
use crate::oracle::estimator::{BaselineEstimator, LiveEstimator};
use crate::oracle::filter::FilterPolicy;
use crate::oracle::parser::{extract_block_transactions, parse_tx};
use crate::oracle::source::{self, SourceConfig};
use crate::oracle::types::{wall_time_now, EstimatorKind, ParsedTx, PriceEstimate, RawTx, TxOrigin};
use crate::oracle::update::{new_stats, MempoolUpdate, OracleStats, UpdatePublisher};

/// Cadence of the periodic re-estimate/publish tick. Independent of
/// `publish_min_interval`, which only throttles how often a *new*
/// computed estimate actually reaches the watch channel.
const TICK_INTERVAL: Duration = Duration::from_millis(250);

pub struct Orchestrator {
    config: OracleConfig,
    stats: Arc<OracleStats>,
    shutdown: Arc<Notify>,
    running: Arc<AtomicBool>,
}

/// Everything the rest of the process needs after spawning the pipeline.
pub struct RunningOracle {
    pub updates: watch::Receiver<MempoolUpdate>,
    pub source_healthy: Arc<AtomicBool>,
    pub stats: Arc<OracleStats>,
    pub task: JoinHandle<()>,
    shutdown: Arc<Notify>,
    running: Arc<AtomicBool>,
}

impl RunningOracle {
    /// Cooperative shutdown (spec.md §5): wakes the pipeline task so it
    /// drains its current message, stops the ZMQ ingestion threads and
    /// exits its select loop, then waits up to 2s for that exit before
    /// aborting the task outright.
    pub async fn shutdown(self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();

        let abort_handle = self.task.abort_handle();
        if tokio::time::timeout(Duration::from_secs(2), self.task)
            .await
            .is_err()
        {
            warn!("pipeline task exceeded 2s shutdown budget, aborting");
            abort_handle.abort();
        }
    }
}

impl Orchestrator {
    pub fn new(config: OracleConfig) -> Self {
        Self {
            config,
            stats: new_stats(),
            shutdown: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn stats(&self) -> Arc<OracleStats> {
        self.stats.clone()
    }

    pub fn spawn(self) -> RunningOracle {
        let source_cfg: SourceConfig = self.config.source_config();
        let source_handle = source::spawn(source_cfg, self.config.source_channel_capacity);
        self.spawn_with_source(source_handle)
    }

    /// Same wiring as [`Orchestrator::spawn`], but against a
    /// caller-supplied [`source::SourceHandle`] rather than one backed by
    /// real ZMQ threads — the seam integration tests use to drive
    /// `pipeline_loop` end to end with synthetic events.
    pub fn spawn_with_source(self, source_handle: source::SourceHandle) -> RunningOracle {
        let source_healthy = source_handle.healthy.clone();
        let stats = self.stats.clone();
        let task_shutdown = self.shutdown.clone();
        let task_running = self.running.clone();

        let (publisher, updates) = UpdatePublisher::new(
            self.config.publish_min_interval,
            self.config.material_change_ratio,
        );

        let config = self.config.clone();
        let task = tokio::spawn(async move {
            pipeline_loop(config, source_handle, publisher, stats, task_shutdown, task_running).await;
        });

        RunningOracle {
            updates,
            source_healthy,
            stats: self.stats,
            task,
            shutdown: self.shutdown,
            running: self.running,
        }
    }
}

async fn pipeline_loop(
    config: OracleConfig,
    mut source_handle: source::SourceHandle,
    mut publisher: UpdatePublisher,
    stats: Arc<OracleStats>,
    shutdown: Arc<Notify>,
    running: Arc<AtomicBool>,
) {
    let mut filter = FilterPolicy::new(config.witness_bytes_max);
    let mut baseline = BaselineEstimator::new(config.baseline_window_blocks);
    let mut live = LiveEstimator::new(config.live_window_secs);
    let mut seeded_live = false;

    // spec.md §6: the fallback seed is "the only externally-configured
    // number with semantic meaning in the core" — the live price before
    // the baseline (or the live window itself) has produced a first
    // estimate, and again whenever a round's estimate fails (spec.md
    // §4.7/§7: "price is held at previous value, confidence decays to 0").
    let mut held_live = PriceEstimate {
        price_usd: config.fallback_seed_price,
        confidence: 0.0,
        contributing_count: 0,
        estimator: EstimatorKind::Live,
        as_of_wall_time: 0,
        range: None,
    };
    let mut held_baseline: Option<PriceEstimate> = None;

    let mut ticker = tokio::time::interval(TICK_INTERVAL);

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!("orchestrator shutdown requested");
                break;
            }
            maybe_raw = source_handle.receiver.recv() => {
                match maybe_raw {
                    Some(raw) => handle_raw_tx(raw, &mut filter, &mut baseline, &mut live, &stats),
                    None => {
                        warn!("source channel closed, stopping pipeline");
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                if !seeded_live && baseline_has_data(&baseline) {
                    live.seed_from_baseline(&baseline.snapshot());
                    seeded_live = true;
                }

                let now = wall_time_now();
                filter.prune(now);
                live.tick(now);

                match live.estimate(now) {
                    Ok(fresh) => held_live = fresh,
                    Err(OracleError::InternalInvariantViolation(reason)) => {
                        warn!(estimator = "live", reason, "internal invariant violation, restarted from surviving window contents");
                        held_live.confidence = 0.0;
                        held_live.as_of_wall_time = now;
                    }
                    Err(_) => {
                        held_live.confidence = 0.0;
                        held_live.as_of_wall_time = now;
                    }
                }
                match baseline.estimate(now) {
                    Ok(fresh) => held_baseline = Some(fresh),
                    Err(OracleError::InternalInvariantViolation(reason)) => {
                        warn!(estimator = "baseline", reason, "internal invariant violation, restarted from surviving window contents");
                        if let Some(prev) = held_baseline.as_mut() {
                            prev.confidence = 0.0;
                            prev.as_of_wall_time = now;
                        }
                    }
                    Err(_) => {
                        if let Some(prev) = held_baseline.as_mut() {
                            prev.confidence = 0.0;
                            prev.as_of_wall_time = now;
                        }
                    }
                }

                let healthy = source_handle.is_healthy();
                let active_in_window = live.active_in_window() + baseline.active_in_window();
                let evicted = live.evicted_count() + baseline.evicted_count();
                let snapshot = stats.snapshot(&source_handle.stats.snapshot(), active_in_window, evicted);

                gauge!("utxoracle_source_healthy").set(if healthy { 1.0 } else { 0.0 });
                stats.estimates_published.fetch_add(1, Ordering::Relaxed);
                gauge!("utxoracle_live_price_usd").set(held_live.price_usd);
                gauge!("utxoracle_live_confidence").set(held_live.confidence);
                if let Some(baseline_value) = &held_baseline {
                    gauge!("utxoracle_baseline_price_usd").set(baseline_value.price_usd);
                }

                let now_ms = (now as i64) * 1000;
                publisher.maybe_publish(Some(held_live.clone()), held_baseline.clone(), healthy, snapshot, now, now_ms);
            }
        }

        if !running.load(Ordering::Relaxed) {
            break;
        }
    }

    source_handle.stop();
    debug!("pipeline loop exited");
}

fn baseline_has_data(baseline: &BaselineEstimator) -> bool {
    !baseline.snapshot().amounts.is_empty()
}

/// Decodes one source event into its constituent transactions: a
/// `rawtx` payload is exactly one transaction, a `rawblock` payload is
/// a full block whose transactions (starting at the coinbase) must be
/// walked out individually (spec.md §4.1 `extract_transactions`).
fn decode_raw(raw: &RawTx, stats: &Arc<OracleStats>) -> Vec<ParsedTx> {
    match raw.origin {
        TxOrigin::Mempool => match parse_tx(&raw.bytes, raw.wall_time, raw.origin, raw.block_height) {
            Ok(tx) => vec![tx],
            Err(OracleError::MalformedTx(reason)) => {
                debug!(reason, "dropping malformed transaction");
                count_malformed(stats);
                Vec::new()
            }
            Err(other) => {
                warn!(error = %other, "unexpected parser error");
                count_malformed(stats);
                Vec::new()
            }
        },
        TxOrigin::Block => match extract_block_transactions(&raw.bytes, raw.wall_time, raw.block_height) {
            Ok(txs) => txs,
            Err(OracleError::MalformedTx(reason)) => {
                debug!(reason, "dropping malformed block");
                count_malformed(stats);
                Vec::new()
            }
            Err(other) => {
                warn!(error = %other, "unexpected block decode error");
                count_malformed(stats);
                Vec::new()
            }
        },
    }
}

/// A malformed payload was still received off the source — spec.md §8's
/// `total_received = total_filtered + active_in_window + evicted` counts
/// it on both sides of that ledger, not just as a filter rejection.
fn count_malformed(stats: &Arc<OracleStats>) {
    stats.txs_ingested.fetch_add(1, Ordering::Relaxed);
    stats.txs_filtered_out.fetch_add(1, Ordering::Relaxed);
}

fn handle_raw_tx(
    raw: RawTx,
    filter: &mut FilterPolicy,
    baseline: &mut BaselineEstimator,
    live: &mut LiveEstimator,
    stats: &Arc<OracleStats>,
) {
    counter!("utxoracle_txs_ingested_total").increment(1);

    for parsed in decode_raw(&raw, stats) {
        stats.txs_ingested.fetch_add(1, Ordering::Relaxed);

        let processed = match filter.apply(&parsed, raw.wall_time) {
            Ok(Some(p)) => p,
            Ok(None) => {
                stats.txs_filtered_out.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            Err(e) => {
                warn!(error = %e, "filter policy error");
                stats.txs_filtered_out.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        match processed.origin {
            TxOrigin::Mempool => live.ingest_mempool_tx(processed.wall_time, &processed),
            TxOrigin::Block => {
                if let Some(height) = processed.block_height {
                    baseline.ingest_block_tx(height, &processed);
                }
            }
        }
    }
}
