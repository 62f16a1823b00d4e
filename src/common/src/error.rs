//! Error taxonomy for player-facing game operations.
//!
//! Validation, not-found and conflict errors are surfaced to the caller and
//! never retried. Store errors are transient infrastructure failures: the
//! current request or tick is abandoned and recovery happens on the next
//! natural trigger.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum GameError {
    /// Malformed or out-of-range input.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A referenced deposit, balance or position does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// A deposit already exists for this (player, round).
    #[error("entry already exists")]
    DuplicateEntry,

    /// A position already exists for this (player, round, token).
    #[error("position already exists")]
    DuplicatePosition,

    /// The reservation would exceed the player's remaining points.
    #[error("insufficient points")]
    InsufficientPoints,

    /// Player has neither a deposit nor an eligibility grant.
    #[error("not allowed to play")]
    NotEligible,

    /// Transient infrastructure failure from the persistent store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Shorthand used by validation code.
pub fn invalid(msg: impl Into<String>) -> GameError {
    GameError::Validation(msg.into())
}
