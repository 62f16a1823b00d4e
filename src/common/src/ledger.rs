//! Points ledger: deposit eligibility and the per-round points budget.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;

use crate::error::{invalid, GameError};
use crate::models::{Deposit, PointsBalance, MAX_POINTS};
use crate::store::{ReserveOutcome, Store};

/// Owns each player's per-round points balance and deposit record.
#[derive(Clone)]
pub struct PointsLedger {
    store: Arc<dyn Store>,
}

impl PointsLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Record a deposit and seed the player's points balance for the round.
    ///
    /// Exactly one deposit per (player, round); a second attempt fails with
    /// [`GameError::DuplicateEntry`].
    pub async fn allocate_deposit(
        &self,
        player_id: &str,
        round_id: &str,
    ) -> Result<PointsBalance, GameError> {
        if player_id.is_empty() {
            return Err(invalid("player id must not be empty"));
        }

        // Balance first: the insert is if-absent, so a retry after a
        // failure between the two writes converges instead of leaving a
        // deposit without a balance. An existing balance is never reset.
        let balance = PointsBalance {
            player_id: player_id.to_string(),
            round_id: round_id.to_string(),
            remaining: MAX_POINTS,
        };
        self.store.insert_balance(&balance).await?;

        let deposit = Deposit {
            player_id: player_id.to_string(),
            round_id: round_id.to_string(),
            timestamp: Utc::now(),
        };
        if !self.store.insert_deposit(&deposit).await? {
            return Err(GameError::DuplicateEntry);
        }

        info!(
            "Allocated {} points to {} for round {}",
            MAX_POINTS, player_id, round_id
        );
        Ok(balance)
    }

    /// Reserve `amount` points from the player's balance.
    ///
    /// The check-and-decrement is a single conditional update at the store,
    /// so concurrent reservations cannot overspend.
    pub async fn reserve_points(
        &self,
        player_id: &str,
        round_id: &str,
        amount: Decimal,
    ) -> Result<(), GameError> {
        if amount <= Decimal::ZERO {
            return Err(invalid("amount must be greater than 0"));
        }

        match self.store.reserve_points(player_id, round_id, amount).await? {
            ReserveOutcome::Reserved => Ok(()),
            ReserveOutcome::Insufficient => Err(GameError::InsufficientPoints),
            ReserveOutcome::Missing => Err(GameError::NotFound("points balance")),
        }
    }

    /// Credit a failed reservation back. Compensation path only.
    pub async fn refund_points(
        &self,
        player_id: &str,
        round_id: &str,
        amount: Decimal,
    ) -> Result<(), GameError> {
        self.store.refund_points(player_id, round_id, amount).await?;
        Ok(())
    }

    /// Current remaining budget for the round.
    pub async fn get_remaining(
        &self,
        player_id: &str,
        round_id: &str,
    ) -> Result<Decimal, GameError> {
        match self.store.get_balance(player_id, round_id).await? {
            Some(balance) => Ok(balance.remaining),
            None => Err(GameError::NotFound("points balance")),
        }
    }
}
