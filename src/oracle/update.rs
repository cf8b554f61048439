//! Update channel (spec.md §4.8, component C8).
//!
//! Publishes [`MempoolUpdate`] snapshots through a `tokio::sync::watch`
//! channel rather than `broadcast`: subscribers only ever want the
//! latest estimate, and `watch` coalesces intermediate values for free
//! instead of making a subscriber catch up through a replay queue
//! (spec.md §9's throttling requirement).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::oracle::constants::RECENT_POINTS_CAPACITY;
use crate::oracle::source::SourceStatsSnapshot;
use crate::oracle::types::PriceEstimate;

/// Pipeline-wide counters, independent of either estimator's internal
/// state, surfaced to subscribers and to `/healthz`.
#[derive(Default)]
pub struct OracleStats {
    pub txs_ingested: AtomicU64,
    pub txs_filtered_out: AtomicU64,
    pub estimates_published: AtomicU64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct OracleStatsSnapshot {
    pub txs_ingested: u64,
    pub txs_filtered_out: u64,
    pub estimates_published: u64,
    /// Transactions currently resident in either estimator's window
    /// (spec.md §8: `total_received = total_filtered + active_in_window
    /// + evicted`).
    pub active_in_window: u64,
    /// Cumulative transactions aged out of either estimator's window.
    pub evicted: u64,
    pub source_rawtx_received: u64,
    pub source_rawblock_received: u64,
    pub source_reconnects: u64,
}

impl OracleStats {
    pub fn snapshot(
        &self,
        source: &SourceStatsSnapshot,
        active_in_window: u64,
        evicted: u64,
    ) -> OracleStatsSnapshot {
        OracleStatsSnapshot {
            txs_ingested: self.txs_ingested.load(Ordering::Relaxed),
            txs_filtered_out: self.txs_filtered_out.load(Ordering::Relaxed),
            estimates_published: self.estimates_published.load(Ordering::Relaxed),
            active_in_window,
            evicted,
            source_rawtx_received: source.rawtx_received,
            source_rawblock_received: source.rawblock_received,
            source_reconnects: source.reconnects,
        }
    }
}

/// A single published price snapshot (spec.md §3).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MempoolUpdate {
    pub live: Option<PriceEstimate>,
    pub baseline: Option<PriceEstimate>,
    /// False while the transaction source has no healthy connection
    /// (spec.md §7 "Propagation": the only pipeline error surfaced to
    /// subscribers directly, rather than folded into stats).
    pub healthy: bool,
    pub stats: Option<OracleStatsSnapshot>,
    /// Bounded trailing history of the live estimator's price, oldest
    /// first, capped at [`RECENT_POINTS_CAPACITY`].
    pub recent_points: Vec<(i64, f64)>,
    pub generated_at: i64,
}

/// Throttled, material-change-gated publisher (spec.md §4.8).
pub struct UpdatePublisher {
    sender: watch::Sender<MempoolUpdate>,
    min_interval: Duration,
    material_change_ratio: f64,
    last_published_at: i64,
    last_published_price: Option<f64>,
    recent_points: VecDeque<(i64, f64)>,
}

impl UpdatePublisher {
    pub fn new(min_interval: Duration, material_change_ratio: f64) -> (Self, watch::Receiver<MempoolUpdate>) {
        let (sender, receiver) = watch::channel(MempoolUpdate::default());
        (
            Self {
                sender,
                min_interval,
                material_change_ratio,
                last_published_at: i64::MIN,
                last_published_price: None,
                recent_points: VecDeque::with_capacity(RECENT_POINTS_CAPACITY),
            },
            receiver,
        )
    }

    /// Publishes on a health-state transition, or once `min_interval` has
    /// elapsed since the last publish — whichever comes first. `min_interval`
    /// is a hard floor, not merely a cadence: spec.md §6 calls it a
    /// "throttle floor", and §8's testable invariant is "at most one update
    /// per `publisher.min_interval_ms`". A material price change earns a
    /// publish no sooner than the next point at which the floor has
    /// elapsed — it does not bypass it, even though spec.md §4.7 phrases
    /// the two triggers as "whichever is earlier". Returns whether a
    /// publication happened.
    pub fn maybe_publish(
        &mut self,
        live: Option<PriceEstimate>,
        baseline: Option<PriceEstimate>,
        healthy: bool,
        stats: OracleStatsSnapshot,
        now: i64,
        now_ms_monotonic: i64,
    ) -> bool {
        let health_changed = self.sender.borrow().healthy != healthy;
        let elapsed_ms = now_ms_monotonic.saturating_sub(self.last_published_at);
        let interval_elapsed = elapsed_ms >= self.min_interval.as_millis() as i64;

        let material_change = match (self.last_published_price, live.as_ref()) {
            (None, Some(_)) => true,
            (Some(prev), Some(curr)) => {
                (curr.price_usd - prev).abs() / prev.max(f64::MIN_POSITIVE) >= self.material_change_ratio
            }
            (Some(_), None) => true,
            (None, None) => false,
        };

        if !health_changed && !interval_elapsed {
            return false;
        }
        if interval_elapsed && material_change {
            debug!("publishing at throttle boundary with a material price change");
        }

        if let Some(live_estimate) = &live {
            if let Some(last) = self.recent_points.back() {
                if last.0 != now {
                    self.recent_points.push_back((now, live_estimate.price_usd));
                }
            } else {
                self.recent_points.push_back((now, live_estimate.price_usd));
            }
            while self.recent_points.len() > RECENT_POINTS_CAPACITY {
                self.recent_points.pop_front();
            }
            self.last_published_price = Some(live_estimate.price_usd);
        }

        let update = MempoolUpdate {
            live,
            baseline,
            healthy,
            stats: Some(stats),
            recent_points: self.recent_points.iter().copied().collect(),
            generated_at: now,
        };

        self.last_published_at = now_ms_monotonic;
        // watch::Sender::send only errors when every receiver has been
        // dropped; nothing to recover from, so the publisher carries on
        // computing estimates in case a new subscriber attaches later.
        let _ = self.sender.send(update);
        true
    }

    pub fn subscribe(&self) -> watch::Receiver<MempoolUpdate> {
        self.sender.subscribe()
    }
}

pub fn new_stats() -> Arc<OracleStats> {
    Arc::new(OracleStats::default())
}
