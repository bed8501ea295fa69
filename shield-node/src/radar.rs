use crate::netdev::SampleSource;
use async_trait::async_trait;
use metrics::{counter, gauge};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Receiver of attack detections.
///
/// Invoked on the polling task's thread of control, once per tick for as
/// long as the excursion keeps holding; debouncing repeated invocations is
/// the handler's job (the shield's active-state guard).
#[async_trait]
pub trait AttackHandler: Send + Sync {
    async fn on_attack_detected(&self, iface: &str, rx_delta: u64);
}

/// Cooperative cancellation flag for the polling loop.
///
/// The loop observes it at the top of each tick and exits cleanly without
/// finishing an in-flight tick.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    requested: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.requested.store(true, Ordering::Relaxed);
    }
}

/// Per-interface detection state.
///
/// `last_rx == 0` means no baseline has been recorded yet; `above_since` is
/// meaningful only while the delta is above the limit and resets as soon as
/// it dips back at or under it.
struct ThresholdWindow {
    limit: u64,
    sustained_for: Duration,
    last_rx: u64,
    above_since: Option<Instant>,
}

impl ThresholdWindow {
    fn new(limit: u64, sustained_for: Duration) -> Self {
        Self {
            limit,
            sustained_for,
            last_rx: 0,
            above_since: None,
        }
    }

    /// Feed one cumulative counter reading; returns the delta when the
    /// excursion has held long enough to count as an attack.
    fn observe(&mut self, rx_total: u64, now: Instant) -> Option<u64> {
        if self.last_rx == 0 {
            self.last_rx = rx_total;
            return None;
        }

        // Wrapping subtraction: a counter reset (link restart) shows up as a
        // huge delta and can trip a false detection. Known trade-off.
        let delta = rx_total.wrapping_sub(self.last_rx);
        self.last_rx = rx_total;

        if delta > self.limit {
            match self.above_since {
                None => {
                    self.above_since = Some(now);
                    None
                }
                Some(since) if now.duration_since(since) >= self.sustained_for => Some(delta),
                Some(_) => None,
            }
        } else {
            self.above_since = None;
            None
        }
    }
}

/// Watches one interface's received-byte rate and reports sustained surges.
pub struct AttackRadar {
    iface: String,
    source: Arc<dyn SampleSource>,
    max_bytes_per_interval: u64,
    sustained_for: Duration,
    poll_interval: Duration,
    handler: Arc<dyn AttackHandler>,
}

impl AttackRadar {
    pub fn new(
        iface: String,
        source: Arc<dyn SampleSource>,
        max_bytes_per_interval: u64,
        sustained_for: Duration,
        poll_interval: Duration,
        handler: Arc<dyn AttackHandler>,
    ) -> Self {
        Self {
            iface,
            source,
            max_bytes_per_interval,
            sustained_for,
            poll_interval,
            handler,
        }
    }

    /// Poll until shutdown is requested.
    ///
    /// Sample failures are transient: logged, then retried after one
    /// interval. The handler runs inline, so a slow mitigation stalls
    /// subsequent ticks rather than overlapping them.
    pub async fn run(&self, shutdown: ShutdownSignal) {
        info!(
            iface = %self.iface,
            max_bytes_per_interval = self.max_bytes_per_interval,
            sustained_ms = self.sustained_for.as_millis() as u64,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Attack radar started"
        );

        let mut window = ThresholdWindow::new(self.max_bytes_per_interval, self.sustained_for);

        while !shutdown.is_shutdown_requested() {
            match self.source.sample() {
                Ok(totals) => {
                    if let Some(rx_total) = totals.get(&self.iface).copied() {
                        if let Some(delta) = window.observe(rx_total, Instant::now()) {
                            counter!("radar_attacks_detected", 1);
                            warn!(
                                iface = %self.iface,
                                rx_delta = delta,
                                "Sustained traffic surge detected"
                            );
                            self.handler.on_attack_detected(&self.iface, delta).await;
                        }
                        gauge!("radar_rx_total_bytes", rx_total as f64);
                    } else {
                        debug!(iface = %self.iface, "Interface not present this tick");
                    }
                }
                Err(e) => {
                    counter!("radar_sample_errors", 1);
                    warn!(error = %e, "Failed to read interface counters");
                }
            }

            sleep(self.poll_interval).await;
        }

        info!(iface = %self.iface, "Attack radar stopped");
    }
}
