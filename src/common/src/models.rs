//! Shared data models for rounds, deposits, points and positions.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Synthetic points budget granted to every depositing player, per round.
pub const MAX_POINTS: Decimal = Decimal::ONE_HUNDRED;

/// Live leaderboard is truncated to this many rows.
pub const LEADERBOARD_SIZE: usize = 10;

/// Fixed set of playable tokens: (display name, mint address).
pub const PLAYABLE_TOKENS: &[(&str, &str)] = &[
    ("BONK", "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263"),
    ("WIF", "EKpQGSJtjMFqKZ9KQanSqYXRcF8fBopzLHYxdM65zcjm"),
    ("BOME", "ukHH6c7mMyiWCf1b9pnWe25TSpkDDt3H5pQZgZ74J82"),
    ("POPCAT", "7GCihgDB8fe6KNjn2MYtkzZcRjQy3t9GHdC8uHYmW2hr"),
    ("MEW", "MEW1gQWJ3nEXg2qgERiKu7FAFj79PHvQVREQUzScPP5"),
    ("WEN", "WENWENvqqNya429ubCdR81ZmD69brwQaaBYY6p3LCpk"),
    ("GIGA", "63LfDmNb3MQ8mw9MtZ2To9bEA2M71kZUUGq5tiJxcqj9"),
    ("CWIF", "7atgF8KQo4wJrD5ATGX7t1V2zVvykPJbFfNeVf1icFv1"),
];

/// Mint addresses of the playable token set.
pub fn playable_mints() -> Vec<String> {
    PLAYABLE_TOKENS
        .iter()
        .map(|(_, mint)| mint.to_string())
        .collect()
}

/// The rotating round identity. A single persisted row, rotated daily.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Round {
    pub round_id: String,
    pub games_played: i64,
    pub last_updated_ts: DateTime<Utc>,
}

/// Phase of the current round, mirrored from the vault authority.
///
/// The authoritative copy lives on the external ledger; this value is a
/// cache refreshed from every vault response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    Inactive,
    DepositsOpen,
    DepositsPaused,
}

impl RoundPhase {
    /// Settlement runs while the round is active, through the paused window.
    pub fn is_active(&self) -> bool {
        matches!(self, RoundPhase::DepositsOpen | RoundPhase::DepositsPaused)
    }
}

/// A player's one-time entry ticket into a round. Never mutated; old rows
/// remain as history once the round rotates.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Deposit {
    pub player_id: String,
    pub round_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-round points budget. The only mutation is the atomic reservation
/// decrement; `0 <= remaining <= MAX_POINTS` always holds.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PointsBalance {
    pub player_id: String,
    pub round_id: String,
    pub remaining: Decimal,
}

/// Direction of a paper position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PositionType {
    Long,
    Short,
}

/// An open paper position. Unique per (player, round, token mint),
/// immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Position {
    pub player_id: String,
    pub round_id: String,
    pub token_name: String,
    pub token_mint: String,
    pub entry_price: Decimal,
    pub leverage: Decimal,
    pub points_allocated: Decimal,
    pub position_type: PositionType,
    pub liquidation_price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Caller-supplied fields for opening a position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSpec {
    pub token_name: String,
    pub token_mint: String,
    pub entry_price: Decimal,
    pub leverage: Decimal,
    pub points_allocated: Decimal,
    pub position_type: PositionType,
    pub liquidation_price: Decimal,
}

/// A live leaderboard row. Fully replaced on every settlement tick.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LeaderboardEntry {
    pub player_id: String,
    pub round_id: String,
    pub points_allocated: Decimal,
    pub final_points: Decimal,
    /// Display string: names of the player's 3 highest-scoring positions.
    pub top3_positions: String,
}

/// An archived leaderboard row, written once per round at round end.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LeaderboardHistoryEntry {
    pub player_id: String,
    pub round_id: String,
    pub points_allocated: Decimal,
    pub final_points: Decimal,
    pub top3_positions: String,
    pub rank: i32,
    pub archive_date: NaiveDate,
}

/// Cached oracle price snapshot, overwritten wholesale each fetch.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PriceQuote {
    pub token_mint: String,
    pub value: Decimal,
    pub update_ts: DateTime<Utc>,
}

/// Alternate eligibility: a pre-verified grant (e.g. NFT-gated access)
/// that lets a player open positions without a deposit. Verification
/// itself happens elsewhere; the book only consults the grant row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EligibilityGrant {
    pub player_id: String,
    pub grant_kind: String,
    pub label: String,
}
