//! Transaction source (spec.md §4.1, component C1).
//!
//! Subscribes to a Bitcoin Core node's `rawtx` and `rawblock` ZMQ
//! publishers on their own OS threads — the `zmq` crate's socket is
//! blocking, so it doesn't belong on a tokio worker — and forwards
//! decoded payloads into a bounded async channel. Reconnects with
//! capped exponential backoff and flips a shared health flag so the
//! orchestrator can report `SourceUnavailable` without tearing down the
//! whole pipeline.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::oracle::types::{wall_time_now, RawTx, TxOrigin};

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub zmq_rawtx_endpoint: String,
    pub zmq_rawblock_endpoint: String,
    pub reconnect_backoff_min: Duration,
    pub reconnect_backoff_max: Duration,
    pub recv_timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            zmq_rawtx_endpoint: "tcp://127.0.0.1:28332".to_string(),
            zmq_rawblock_endpoint: "tcp://127.0.0.1:28332".to_string(),
            // spec.md §4.1: "initial <= 1 s, cap <= 5 s".
            reconnect_backoff_min: Duration::from_millis(500),
            reconnect_backoff_max: Duration::from_secs(5),
            recv_timeout: Duration::from_millis(500),
        }
    }
}

/// Operational counters, snapshotted read-only by `/healthz` and
/// `MempoolUpdate.stats` (spec.md §7 "Propagation").
#[derive(Default)]
pub struct SourceStats {
    pub rawtx_received: AtomicU64,
    pub rawblock_received: AtomicU64,
    pub reconnects: AtomicU64,
    pub decode_errors: AtomicU64,
}

pub struct SourceStatsSnapshot {
    pub rawtx_received: u64,
    pub rawblock_received: u64,
    pub reconnects: u64,
    pub decode_errors: u64,
}

impl SourceStats {
    pub fn snapshot(&self) -> SourceStatsSnapshot {
        SourceStatsSnapshot {
            rawtx_received: self.rawtx_received.load(Ordering::Relaxed),
            rawblock_received: self.rawblock_received.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }
}

/// Handle to the two background ingestion threads.
pub struct SourceHandle {
    pub receiver: mpsc::Receiver<RawTx>,
    pub stats: Arc<SourceStats>,
    pub healthy: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl SourceHandle {
    /// Signals both ingestion threads to stop at their next recv
    /// timeout. Does not join them; the threads are daemon-style and
    /// exit silently once `running` goes false.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}

/// Builds a [`SourceHandle`] backed by a caller-supplied channel instead
/// of real ZMQ subscriber threads, so the orchestrator's pipeline can be
/// driven end to end against synthetic events without a live Bitcoin
/// Core node. Returns the handle alongside the sender and health flag so
/// a caller can feed `RawTx` values in and flip connectivity on demand.
pub fn test_handle(channel_capacity: usize) -> (SourceHandle, mpsc::Sender<RawTx>, Arc<AtomicBool>) {
    let (tx, rx) = mpsc::channel(channel_capacity);
    let healthy = Arc::new(AtomicBool::new(true));
    let handle = SourceHandle {
        receiver: rx,
        stats: Arc::new(SourceStats::default()),
        healthy: healthy.clone(),
        running: Arc::new(AtomicBool::new(true)),
    };
    (handle, tx, healthy)
}

/// Starts the rawtx and rawblock subscriber threads and returns a
/// handle whose `receiver` yields decoded [`RawTx`] values in arrival
/// order across both topics.
pub fn spawn(config: SourceConfig, channel_capacity: usize) -> SourceHandle {
    let (tx, rx) = mpsc::channel(channel_capacity);
    let running = Arc::new(AtomicBool::new(true));
    let healthy = Arc::new(AtomicBool::new(false));
    let stats = Arc::new(SourceStats::default());

    spawn_topic_thread(
        "rawtx",
        config.zmq_rawtx_endpoint.clone(),
        config.clone(),
        tx.clone(),
        running.clone(),
        healthy.clone(),
        stats.clone(),
        TxOrigin::Mempool,
    );

    spawn_topic_thread(
        "rawblock",
        config.zmq_rawblock_endpoint.clone(),
        config,
        tx,
        running.clone(),
        healthy.clone(),
        stats.clone(),
        TxOrigin::Block,
    );

    SourceHandle {
        receiver: rx,
        stats,
        healthy,
        running,
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_topic_thread(
    topic: &'static str,
    endpoint: String,
    config: SourceConfig,
    sender: mpsc::Sender<RawTx>,
    running: Arc<AtomicBool>,
    healthy: Arc<AtomicBool>,
    stats: Arc<SourceStats>,
    origin: TxOrigin,
) {
    thread::Builder::new()
        .name(format!("utxoracle-zmq-{topic}"))
        .spawn(move || run_topic_loop(topic, endpoint, config, sender, running, healthy, stats, origin))
        .expect("failed to spawn zmq ingestion thread");
}

#[allow(clippy::too_many_arguments)]
fn run_topic_loop(
    topic: &'static str,
    endpoint: String,
    config: SourceConfig,
    sender: mpsc::Sender<RawTx>,
    running: Arc<AtomicBool>,
    healthy: Arc<AtomicBool>,
    stats: Arc<SourceStats>,
    origin: TxOrigin,
) {
    // rawblock's payload carries no height; this is a Non-goal-adjacent
    // simplification (no RPC client in scope to ask the node), so height
    // is a locally-maintained sequence counter rather than the node's
    // authoritative chain height.
    let mut next_block_height: u64 = 0;
    let mut backoff = config.reconnect_backoff_min;

    while running.load(Ordering::Relaxed) {
        match connect(&endpoint, topic) {
            Ok(socket) => {
                backoff = config.reconnect_backoff_min;
                healthy.store(true, Ordering::Relaxed);
                info!(topic, endpoint = %endpoint, "zmq subscription connected");

                while running.load(Ordering::Relaxed) {
                    match socket.recv_multipart(0) {
                        Ok(parts) if parts.len() >= 2 => {
                            let payload = &parts[1];
                            let wall_time = wall_time_now();
                            let raw = match origin {
                                TxOrigin::Mempool => {
                                    stats.rawtx_received.fetch_add(1, Ordering::Relaxed);
                                    RawTx {
                                        bytes: payload.clone(),
                                        wall_time,
                                        origin,
                                        block_height: None,
                                    }
                                }
                                TxOrigin::Block => {
                                    stats.rawblock_received.fetch_add(1, Ordering::Relaxed);
                                    let height = next_block_height;
                                    next_block_height += 1;
                                    RawTx {
                                        bytes: payload.clone(),
                                        wall_time,
                                        origin,
                                        block_height: Some(height),
                                    }
                                }
                            };
                            if sender.blocking_send(raw).is_err() {
                                warn!(topic, "receiver dropped, stopping source thread");
                                running.store(false, Ordering::Relaxed);
                            }
                        }
                        Ok(_) => {
                            stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(zmq::Error::EAGAIN) => {
                            // recv timeout elapsed, loop back and re-check `running`.
                            continue;
                        }
                        Err(e) => {
                            warn!(topic, error = %e, "zmq recv error, reconnecting");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                error!(topic, endpoint = %endpoint, error = %e, "zmq connect failed");
            }
        }

        healthy.store(false, Ordering::Relaxed);
        if !running.load(Ordering::Relaxed) {
            break;
        }
        stats.reconnects.fetch_add(1, Ordering::Relaxed);
        thread::sleep(backoff);
        backoff = (backoff * 2).min(config.reconnect_backoff_max);
    }
}

fn connect(endpoint: &str, topic: &str) -> Result<zmq::Socket, zmq::Error> {
    let ctx = zmq::Context::new();
    let socket = ctx.socket(zmq::SUB)?;
    socket.set_rcvtimeo(500)?;
    socket.connect(endpoint)?;
    socket.set_subscribe(topic.as_bytes())?;
    Ok(socket)
}
