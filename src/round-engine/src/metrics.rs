//! Metrics and logging for the round engine.

use std::time::Instant;

use tracing::info;

/// Metrics tracker for the round scheduler.
pub struct Metrics {
    start_time: Instant,
    /// Settlement runs completed
    settle_runs: u32,
    /// Settlement runs that failed or found nothing to settle
    settle_skips: u32,
    /// Phase transitions executed
    transitions: u32,
    /// Winner payouts sent
    payouts: u32,
    /// Total errors
    errors: u32,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            settle_runs: 0,
            settle_skips: 0,
            transitions: 0,
            payouts: 0,
            errors: 0,
        }
    }

    /// Record a completed settlement run.
    pub fn record_settle_run(&mut self) {
        self.settle_runs += 1;
    }

    /// Record a settlement run that did not update the leaderboard.
    pub fn record_settle_skip(&mut self) {
        self.settle_skips += 1;
    }

    /// Record a phase transition.
    pub fn record_transition(&mut self) {
        self.transitions += 1;
    }

    /// Record a winner payout.
    pub fn record_payout(&mut self) {
        self.payouts += 1;
    }

    /// Record an error.
    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    /// Print metrics summary.
    pub fn print_summary(&self) {
        let elapsed = self.start_time.elapsed();

        info!("╔════════════════════════════════════════════════════════════╗");
        info!("║              ROUND ENGINE METRICS                          ║");
        info!("╠════════════════════════════════════════════════════════════╣");
        info!(
            "║  Uptime:            {:>8.1} minutes                       ║",
            elapsed.as_secs_f64() / 60.0
        );
        info!(
            "║  Settle Runs:       {:>8}                                 ║",
            self.settle_runs
        );
        info!(
            "║  Settle Skips:      {:>8}                                 ║",
            self.settle_skips
        );
        info!(
            "║  Transitions:       {:>8}                                 ║",
            self.transitions
        );
        info!(
            "║  Payouts:           {:>8}                                 ║",
            self.payouts
        );
        info!(
            "║  Errors:            {:>8}                                 ║",
            self.errors
        );
        info!("╚════════════════════════════════════════════════════════════╝");
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
