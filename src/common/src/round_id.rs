//! Round identity rotation.
//!
//! The round id is an opaque random token held in a single persisted row
//! together with the games-played counter. Only the scheduler rotates it.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::models::Round;
use crate::store::{Store, StoreError};

/// Produce a fresh opaque round identifier.
pub fn generate_round_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Return the persisted round, creating one with `games_played = 0` when
/// none exists yet.
pub async fn fetch_or_create_round_id(store: &dyn Store) -> Result<Round, StoreError> {
    if let Some(round) = store.fetch_round().await? {
        return Ok(round);
    }

    let round = Round {
        round_id: generate_round_id(),
        games_played: 0,
        last_updated_ts: Utc::now(),
    };
    store.save_round(&round).await?;
    info!("Created initial round id {}", round.round_id);
    Ok(round)
}

/// Rotate to a new round id, incrementing the games-played counter.
///
/// Always returns an id different from the previous one. On a cold start
/// with no persisted row this degrades to [`fetch_or_create_round_id`].
pub async fn rotate_round_id(store: &dyn Store) -> Result<Round, StoreError> {
    let previous = match store.fetch_round().await? {
        Some(round) => round,
        None => return fetch_or_create_round_id(store).await,
    };

    let mut next_id = generate_round_id();
    while next_id == previous.round_id {
        next_id = generate_round_id();
    }

    let round = Round {
        round_id: next_id,
        games_played: previous.games_played + 1,
        last_updated_ts: Utc::now(),
    };
    store.save_round(&round).await?;
    info!(
        "Rotated round id {} -> {} (game #{})",
        previous.round_id, round.round_id, round.games_played
    );
    Ok(round)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_generated_ids_are_distinct() {
        let a = generate_round_id();
        let b = generate_round_id();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_or_create_on_cold_start() {
        let store = MemoryStore::new();
        let round = fetch_or_create_round_id(&store).await.unwrap();
        assert_eq!(round.games_played, 0);

        // second call returns the same identity
        let again = fetch_or_create_round_id(&store).await.unwrap();
        assert_eq!(round.round_id, again.round_id);
    }

    #[tokio::test]
    async fn test_rotate_changes_id_and_increments_counter() {
        let store = MemoryStore::new();
        let first = fetch_or_create_round_id(&store).await.unwrap();

        let second = rotate_round_id(&store).await.unwrap();
        assert_ne!(first.round_id, second.round_id);
        assert_eq!(second.games_played, first.games_played + 1);

        let third = rotate_round_id(&store).await.unwrap();
        assert_ne!(second.round_id, third.round_id);
        assert_eq!(third.games_played, second.games_played + 1);
    }

    #[tokio::test]
    async fn test_rotate_survives_cold_start() {
        let store = MemoryStore::new();
        let round = rotate_round_id(&store).await.unwrap();
        assert_eq!(round.games_played, 0);
    }
}
