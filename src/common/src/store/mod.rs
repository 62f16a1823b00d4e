//! Persistent store abstraction over the game collections.
//!
//! The engine talks to a [`Store`] trait so the lifecycle and settlement
//! logic can be exercised against the in-memory implementation while the
//! service runs against Postgres. Uniqueness and the conditional points
//! decrement are enforced inside the store, not in engine memory, so
//! concurrent requests cannot overspend a balance.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{
    Deposit, EligibilityGrant, LeaderboardEntry, LeaderboardHistoryEntry, PointsBalance, Position,
    PriceQuote, Round,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A unique key was violated on a write path that has no boolean
    /// already-exists contract (the Postgres side fails the transaction
    /// on its unique index instead).
    #[error("unique constraint violated on {0}")]
    Conflict(&'static str),
}

/// Result of an atomic conditional points reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Balance existed and covered the amount; it was decremented.
    Reserved,
    /// Balance exists but `remaining < amount`.
    Insufficient,
    /// No balance row for this (player, round).
    Missing,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    // round identity
    async fn fetch_round(&self) -> Result<Option<Round>, StoreError>;
    async fn save_round(&self, round: &Round) -> Result<(), StoreError>;

    // deposits
    async fn find_deposit(
        &self,
        player_id: &str,
        round_id: &str,
    ) -> Result<Option<Deposit>, StoreError>;
    /// Insert a deposit; returns false when one already exists for the
    /// (player, round) key.
    async fn insert_deposit(&self, deposit: &Deposit) -> Result<bool, StoreError>;
    async fn list_deposits(&self, round_id: &str) -> Result<Vec<Deposit>, StoreError>;

    // points balances
    /// Insert if absent; an existing balance is left untouched.
    async fn insert_balance(&self, balance: &PointsBalance) -> Result<(), StoreError>;
    async fn get_balance(
        &self,
        player_id: &str,
        round_id: &str,
    ) -> Result<Option<PointsBalance>, StoreError>;
    /// Single conditional update: decrement `remaining` by `amount` only
    /// when `remaining >= amount`.
    async fn reserve_points(
        &self,
        player_id: &str,
        round_id: &str,
        amount: Decimal,
    ) -> Result<ReserveOutcome, StoreError>;
    /// Compensation path: credit a failed reservation back, capped at
    /// MAX_POINTS.
    async fn refund_points(
        &self,
        player_id: &str,
        round_id: &str,
        amount: Decimal,
    ) -> Result<(), StoreError>;

    // positions
    async fn find_position(
        &self,
        player_id: &str,
        round_id: &str,
        token_mint: &str,
    ) -> Result<Option<Position>, StoreError>;
    /// Insert a position; returns false when one already exists for the
    /// (player, round, token mint) key.
    async fn insert_position(&self, position: &Position) -> Result<bool, StoreError>;
    async fn insert_positions(&self, positions: &[Position]) -> Result<(), StoreError>;
    async fn list_positions(
        &self,
        player_id: &str,
        round_id: &str,
    ) -> Result<Vec<Position>, StoreError>;
    async fn list_round_positions(&self, round_id: &str) -> Result<Vec<Position>, StoreError>;

    // live leaderboard
    /// Clear-then-insert swap for one round, atomic from a reader's view.
    async fn replace_leaderboard(
        &self,
        round_id: &str,
        entries: &[LeaderboardEntry],
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    async fn get_leaderboard(&self, round_id: &str) -> Result<Vec<LeaderboardEntry>, StoreError>;
    async fn clear_leaderboard(&self, round_id: &str) -> Result<(), StoreError>;
    async fn leaderboard_updated_at(
        &self,
        round_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    // leaderboard history
    async fn history_exists(
        &self,
        round_id: &str,
        archive_date: NaiveDate,
    ) -> Result<bool, StoreError>;
    async fn append_history(
        &self,
        entries: &[LeaderboardHistoryEntry],
    ) -> Result<(), StoreError>;
    async fn get_history<'a>(
        &self,
        round_id: Option<&'a str>,
        archive_date: Option<NaiveDate>,
    ) -> Result<Vec<LeaderboardHistoryEntry>, StoreError>;

    // cached price quotes
    async fn replace_quotes(&self, quotes: &[PriceQuote]) -> Result<(), StoreError>;
    async fn list_quotes(&self) -> Result<Vec<PriceQuote>, StoreError>;

    // eligibility grants
    async fn find_grant(&self, player_id: &str) -> Result<Option<EligibilityGrant>, StoreError>;
    async fn insert_grant(&self, grant: &EligibilityGrant) -> Result<(), StoreError>;
}
