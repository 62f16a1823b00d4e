//! Daily round lifecycle scheduler.
//!
//! One task owns the whole lifecycle: the UTC phase boundaries, the
//! periodic settlement tick while the round is active, and the round-end
//! sequence. The daily schedule is fixed:
//!
//!   00:00  rotate the round id
//!   01:00  activate the round and resume deposits
//!   22:00  pause deposits (settlement keeps running)
//!   23:00  close: settle, archive, pay the winner, pause, clear
//!
//! Every boundary handler tolerates failure by logging and moving on; the
//! next boundary or tick gets another chance. The one ordering rule is at
//! close: the live leaderboard is only cleared after the archive succeeded,
//! so standings are never lost.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use common::{fetch_or_create_round_id, rotate_round_id, RoundPhase, Store};

use crate::metrics::Metrics;
use crate::settlement::{RunOutcome, SettlementEngine};
use crate::vault::{with_retry, VaultAuthority, VaultError};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(300);

/// A lifecycle action fired at a UTC hour boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseJob {
    RotateRound,
    OpenDeposits,
    PauseDeposits,
    CloseRound,
}

const BOUNDARIES: [(u32, PhaseJob); 4] = [
    (0, PhaseJob::RotateRound),
    (1, PhaseJob::OpenDeposits),
    (22, PhaseJob::PauseDeposits),
    (23, PhaseJob::CloseRound),
];

/// Next boundary strictly after `now`, with its fire time.
pub fn next_transition(now: DateTime<Utc>) -> (PhaseJob, DateTime<Utc>) {
    let today = now.date_naive();
    for (hour, job) in BOUNDARIES {
        let at = today.and_hms_opt(hour, 0, 0).unwrap().and_utc();
        if at > now {
            return (job, at);
        }
    }
    // past 23:00; wrap to tomorrow's rotation
    let tomorrow = today.succ_opt().unwrap();
    (
        PhaseJob::RotateRound,
        tomorrow.and_hms_opt(0, 0, 0).unwrap().and_utc(),
    )
}

/// Phase the daily schedule implies at `now`, used as a boot fallback when
/// the vault cannot be reached.
pub fn phase_implied_by_clock(now: DateTime<Utc>) -> RoundPhase {
    match now.hour() {
        1..=21 => RoundPhase::DepositsOpen,
        22 => RoundPhase::DepositsPaused,
        _ => RoundPhase::Inactive,
    }
}

pub struct RoundScheduler {
    store: Arc<dyn Store>,
    engine: SettlementEngine,
    vault: Arc<dyn VaultAuthority>,
    round_id: String,
    phase: RoundPhase,
    settle_interval: Duration,
    metrics: Metrics,
}

impl RoundScheduler {
    /// Build a scheduler synced to the persisted round id and the vault's
    /// current phase. An unreachable vault degrades to the phase implied
    /// by the clock.
    pub async fn new(
        store: Arc<dyn Store>,
        engine: SettlementEngine,
        vault: Arc<dyn VaultAuthority>,
        settle_interval: Duration,
    ) -> Result<Self, common::StoreError> {
        let round = fetch_or_create_round_id(store.as_ref()).await?;

        let phase = match with_retry("fetch vault state", VaultError::is_transient, || {
            vault.fetch_state()
        })
        .await
        {
            Ok(phase) => phase,
            Err(e) => {
                let fallback = phase_implied_by_clock(Utc::now());
                warn!(
                    "Vault unreachable at boot ({}), assuming phase {:?} from the clock",
                    e, fallback
                );
                fallback
            }
        };

        info!(
            "Scheduler starting: round {} (game #{}), phase {:?}",
            round.round_id, round.games_played, phase
        );

        Ok(Self {
            store,
            engine,
            vault,
            round_id: round.round_id,
            phase,
            settle_interval,
            metrics: Metrics::new(),
        })
    }

    pub async fn run(mut self) {
        let mut settle_tick = tokio::time::interval(self.settle_interval);
        settle_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // skip the interval's immediate first fire
        settle_tick.tick().await;

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        heartbeat.tick().await;

        loop {
            let (job, at) = next_transition(Utc::now());
            let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = tokio::time::sleep(wait) => {
                    self.handle_job(job).await;
                }
                _ = settle_tick.tick() => {
                    if self.phase.is_active() {
                        self.settle_once().await;
                    }
                }
                _ = heartbeat.tick() => {
                    self.heartbeat().await;
                }
            }
        }

        self.metrics.print_summary();
    }

    async fn settle_once(&mut self) {
        match self.engine.run(&self.round_id).await {
            Ok(RunOutcome::Updated(_)) => self.metrics.record_settle_run(),
            Ok(outcome) => {
                info!("Settlement tick skipped: {:?}", outcome);
                self.metrics.record_settle_skip();
            }
            Err(e) => {
                error!("Settlement tick failed: {}", e);
                self.metrics.record_error();
            }
        }
    }

    async fn heartbeat(&self) {
        self.metrics.print_summary();
        match self.store.leaderboard_updated_at(&self.round_id).await {
            Ok(Some(ts)) => info!("Leaderboard last updated {}", ts),
            Ok(None) => info!("Leaderboard not yet built this round"),
            Err(e) => warn!("Heartbeat store check failed: {}", e),
        }
    }

    async fn handle_job(&mut self, job: PhaseJob) {
        info!("Phase boundary: {:?}", job);
        self.metrics.record_transition();
        match job {
            PhaseJob::RotateRound => self.rotate().await,
            PhaseJob::OpenDeposits => self.open_deposits().await,
            PhaseJob::PauseDeposits => self.pause_deposits().await,
            PhaseJob::CloseRound => self.close_round().await,
        }
    }

    async fn rotate(&mut self) {
        match rotate_round_id(self.store.as_ref()).await {
            Ok(round) => {
                let previous = std::mem::replace(&mut self.round_id, round.round_id);
                // backstop: a failed close may have left live rows behind,
                // and nothing settles the old round again after rotation
                if let Err(e) = self.store.clear_leaderboard(&previous).await {
                    warn!("Failed to clear stale leaderboard for {}: {}", previous, e);
                    self.metrics.record_error();
                }
            }
            Err(e) => {
                error!("Round rotation failed, keeping {}: {}", self.round_id, e);
                self.metrics.record_error();
            }
        }
    }

    async fn open_deposits(&mut self) {
        if let Err(e) = with_retry("activate round", VaultError::is_transient, || {
            self.vault.activate_round()
        })
        .await
        {
            error!("Round activation failed: {}", e);
            self.metrics.record_error();
            return;
        }

        match with_retry("resume deposits", VaultError::is_transient, || {
            self.vault.resume_deposits()
        })
        .await
        {
            Ok(phase) => self.phase = phase,
            Err(e) => {
                error!("Resuming deposits failed: {}", e);
                self.metrics.record_error();
            }
        }
    }

    async fn pause_deposits(&mut self) {
        match with_retry("pause deposits", VaultError::is_transient, || {
            self.vault.pause_deposits()
        })
        .await
        {
            Ok(phase) => self.phase = phase,
            Err(e) => {
                error!("Pausing deposits failed: {}", e);
                self.metrics.record_error();
            }
        }
    }

    /// Round end. Order is load-bearing: archive before payout so the
    /// winner comes from durable history, pause before clear so no new
    /// positions land on a board about to be wiped, clear only when the
    /// archive succeeded.
    async fn close_round(&mut self) {
        let finished = match self.engine.finish_round(&self.round_id).await {
            Ok(winner) => {
                if let Some(winner) = &winner {
                    self.pay_winner(winner).await;
                } else {
                    info!("Round {} had no winner to pay", self.round_id);
                }
                true
            }
            Err(e) => {
                error!("Round finish failed, keeping live leaderboard: {}", e);
                self.metrics.record_error();
                false
            }
        };

        match with_retry("pause round", VaultError::is_transient, || {
            self.vault.pause_round()
        })
        .await
        {
            Ok(phase) => self.phase = phase,
            Err(e) => {
                error!("Pausing round failed: {}", e);
                self.metrics.record_error();
                self.phase = RoundPhase::Inactive;
            }
        }

        if finished {
            if let Err(e) = self.engine.clear_live(&self.round_id).await {
                error!("Clearing live leaderboard failed: {}", e);
                self.metrics.record_error();
            }
        }
    }

    async fn pay_winner(&mut self, winner: &str) {
        match with_retry("payout winner", VaultError::is_transient, || {
            self.vault.payout_winner(winner)
        })
        .await
        {
            Ok(_) => {
                info!("Paid out round {} winner {}", self.round_id, winner);
                self.metrics.record_payout();
            }
            Err(e) => {
                // the archive already names the winner; payout can be
                // replayed manually from history
                error!("Winner payout failed for {}: {}", winner, e);
                self.metrics.record_error();
            }
        }
    }
}
