//! Common library for the round engine.
//!
//! Provides shared functionality:
//! - Configuration loading from .env
//! - Error taxonomy for game operations
//! - Data models and the persistent store abstraction
//! - Round identity rotation
//! - Points ledger and position book
//! - Pure position scoring
//! - Price oracle client

pub mod book;
pub mod config;
pub mod error;
pub mod ledger;
pub mod models;
pub mod oracle;
pub mod round_id;
pub mod scoring;
pub mod store;

pub use book::PositionBook;
pub use config::{Config, ConfigError};
pub use error::GameError;
pub use ledger::PointsLedger;
pub use models::{
    Deposit, EligibilityGrant, LeaderboardEntry, LeaderboardHistoryEntry, PointsBalance, Position,
    PositionSpec, PositionType, PriceQuote, Round, RoundPhase, LEADERBOARD_SIZE, MAX_POINTS,
    PLAYABLE_TOKENS,
};
pub use oracle::{BirdeyeClient, PriceOracle};
pub use round_id::{fetch_or_create_round_id, generate_round_id, rotate_round_id};
pub use scoring::score;
pub use store::{MemoryStore, PgStore, ReserveOutcome, Store, StoreError};
