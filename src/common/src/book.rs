//! Position book: validation, eligibility and creation of paper positions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::error::{invalid, GameError};
use crate::ledger::PointsLedger;
use crate::models::{LeaderboardEntry, Position, PositionSpec, PriceQuote};
use crate::scoring::score;
use crate::store::Store;

/// Owns each player's open positions for a round. Reservation of the
/// points budget goes through the ledger.
#[derive(Clone)]
pub struct PositionBook {
    store: Arc<dyn Store>,
    ledger: PointsLedger,
}

fn validate_spec(spec: &PositionSpec) -> Result<(), GameError> {
    if spec.token_name.is_empty() || spec.token_mint.is_empty() {
        return Err(invalid("token name and mint are required"));
    }
    if spec.entry_price <= Decimal::ZERO {
        return Err(invalid("entry price must be greater than 0"));
    }
    if spec.leverage <= Decimal::ZERO {
        return Err(invalid("leverage must be greater than 0"));
    }
    if spec.points_allocated <= Decimal::ZERO {
        return Err(invalid("points allocated must be greater than 0"));
    }
    if spec.liquidation_price <= Decimal::ZERO {
        return Err(invalid("liquidation price must be greater than 0"));
    }
    Ok(())
}

impl PositionBook {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let ledger = PointsLedger::new(store.clone());
        Self { store, ledger }
    }

    /// A player may open positions once they deposited for the round, or
    /// when they hold an eligibility grant (e.g. a verified NFT).
    pub async fn is_allowed_to_play(
        &self,
        player_id: &str,
        round_id: &str,
    ) -> Result<bool, GameError> {
        if self.store.find_deposit(player_id, round_id).await?.is_some() {
            return Ok(true);
        }
        Ok(self.store.find_grant(player_id).await?.is_some())
    }

    /// Open a single position, reserving its allocation from the ledger.
    pub async fn open_position(
        &self,
        player_id: &str,
        round_id: &str,
        spec: PositionSpec,
    ) -> Result<Position, GameError> {
        validate_spec(&spec)?;

        if !self.is_allowed_to_play(player_id, round_id).await? {
            return Err(GameError::NotEligible);
        }

        if self
            .store
            .find_position(player_id, round_id, &spec.token_mint)
            .await?
            .is_some()
        {
            return Err(GameError::DuplicatePosition);
        }

        self.ledger
            .reserve_points(player_id, round_id, spec.points_allocated)
            .await?;

        let position = build_position(player_id, round_id, spec);
        match self.store.insert_position(&position).await {
            Ok(true) => {
                info!(
                    "Opened {} {:?} position for {} ({} points)",
                    position.token_name, position.position_type, player_id,
                    position.points_allocated
                );
                Ok(position)
            }
            Ok(false) => {
                // lost a race on the unique key; give the points back
                self.ledger
                    .refund_points(player_id, round_id, position.points_allocated)
                    .await?;
                Err(GameError::DuplicatePosition)
            }
            Err(e) => {
                // reservation must not outlive a failed persist
                if let Err(refund_err) = self
                    .ledger
                    .refund_points(player_id, round_id, position.points_allocated)
                    .await
                {
                    warn!("Failed to refund reservation for {}: {}", player_id, refund_err);
                }
                Err(e.into())
            }
        }
    }

    /// Open a batch of positions, all-or-nothing.
    ///
    /// The aggregate allocation is checked against the remaining balance
    /// before anything is persisted, so a batch can never over-allocate.
    pub async fn open_positions(
        &self,
        player_id: &str,
        round_id: &str,
        specs: Vec<PositionSpec>,
    ) -> Result<Vec<Position>, GameError> {
        if specs.is_empty() {
            return Err(invalid("no positions passed"));
        }
        for spec in &specs {
            validate_spec(spec)?;
        }

        let mut seen = HashSet::new();
        for spec in &specs {
            if !seen.insert(spec.token_mint.clone()) {
                return Err(GameError::DuplicatePosition);
            }
            if self
                .store
                .find_position(player_id, round_id, &spec.token_mint)
                .await?
                .is_some()
            {
                return Err(GameError::DuplicatePosition);
            }
        }

        if !self.is_allowed_to_play(player_id, round_id).await? {
            return Err(GameError::NotEligible);
        }

        let aggregate: Decimal = specs.iter().map(|s| s.points_allocated).sum();
        // one reservation covers the whole batch
        self.ledger
            .reserve_points(player_id, round_id, aggregate)
            .await?;

        let positions: Vec<Position> = specs
            .into_iter()
            .map(|spec| build_position(player_id, round_id, spec))
            .collect();

        if let Err(e) = self.store.insert_positions(&positions).await {
            if let Err(refund_err) = self
                .ledger
                .refund_points(player_id, round_id, aggregate)
                .await
            {
                warn!("Failed to refund batch reservation for {}: {}", player_id, refund_err);
            }
            return Err(e.into());
        }

        info!(
            "Opened {} positions for {} ({} points total)",
            positions.len(),
            player_id,
            aggregate
        );
        Ok(positions)
    }

    /// All open positions of a player for the round.
    pub async fn list_positions(
        &self,
        player_id: &str,
        round_id: &str,
    ) -> Result<Vec<Position>, GameError> {
        Ok(self.store.list_positions(player_id, round_id).await?)
    }

    /// Read-side preview: the player's would-be leaderboard entry at the
    /// given prices. Writes nothing.
    pub async fn position_stats(
        &self,
        player_id: &str,
        round_id: &str,
        quotes: &[PriceQuote],
    ) -> Result<LeaderboardEntry, GameError> {
        let positions = self.store.list_positions(player_id, round_id).await?;
        if positions.is_empty() {
            return Err(GameError::NotFound("positions"));
        }

        let prices: HashMap<&str, Decimal> = quotes
            .iter()
            .map(|q| (q.token_mint.as_str(), q.value))
            .collect();

        let points_allocated = positions.iter().map(|p| p.points_allocated).sum();
        let mut scored: Vec<(String, Decimal)> = Vec::with_capacity(positions.len());
        let mut final_points = Decimal::ZERO;
        for position in &positions {
            let current = match prices.get(position.token_mint.as_str()) {
                Some(value) if !value.is_zero() => *value,
                _ => continue,
            };
            let points = score(
                position.entry_price,
                position.leverage,
                current,
                position.liquidation_price,
                position.points_allocated,
                position.position_type,
            );
            final_points += points;
            scored.push((position.token_name.clone(), points));
        }

        Ok(LeaderboardEntry {
            player_id: player_id.to_string(),
            round_id: round_id.to_string(),
            points_allocated,
            final_points,
            top3_positions: top3_display(&mut scored),
        })
    }
}

fn build_position(player_id: &str, round_id: &str, spec: PositionSpec) -> Position {
    Position {
        player_id: player_id.to_string(),
        round_id: round_id.to_string(),
        token_name: spec.token_name,
        token_mint: spec.token_mint,
        entry_price: spec.entry_price,
        leverage: spec.leverage,
        points_allocated: spec.points_allocated,
        position_type: spec.position_type,
        liquidation_price: spec.liquidation_price,
        timestamp: Utc::now(),
    }
}

/// Names of the 3 highest-scoring positions, joined for display. The sort
/// is stable, so ties keep their original insertion order.
pub fn top3_display(scored: &mut [(String, Decimal)]) -> String {
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored
        .iter()
        .take(3)
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EligibilityGrant, PositionType};
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;

    fn spec(name: &str, points: Decimal) -> PositionSpec {
        PositionSpec {
            token_name: name.to_string(),
            token_mint: format!("{name}-mint"),
            entry_price: dec!(100),
            leverage: dec!(2),
            points_allocated: points,
            position_type: PositionType::Long,
            liquidation_price: dec!(50),
        }
    }

    async fn book_with_deposit() -> (PositionBook, PointsLedger) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let ledger = PointsLedger::new(store.clone());
        ledger.allocate_deposit("p1", "r1").await.unwrap();
        (PositionBook::new(store), ledger)
    }

    #[tokio::test]
    async fn test_open_position_reserves_points() {
        let (book, ledger) = book_with_deposit().await;

        book.open_position("p1", "r1", spec("BONK", dec!(40)))
            .await
            .unwrap();
        assert_eq!(ledger.get_remaining("p1", "r1").await.unwrap(), dec!(60));

        let positions = book.list_positions("p1", "r1").await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].token_name, "BONK");
    }

    #[tokio::test]
    async fn test_open_position_requires_eligibility() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let book = PositionBook::new(store.clone());

        let err = book
            .open_position("p1", "r1", spec("BONK", dec!(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::NotEligible));

        // an eligibility grant opens the gate without a deposit, but the
        // player still has no balance to reserve from
        store
            .insert_grant(&EligibilityGrant {
                player_id: "p1".to_string(),
                grant_kind: "nft".to_string(),
                label: "Saga Monkes".to_string(),
            })
            .await
            .unwrap();
        let err = book
            .open_position("p1", "r1", spec("BONK", dec!(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_token_rejected_before_reservation() {
        let (book, ledger) = book_with_deposit().await;

        book.open_position("p1", "r1", spec("WIF", dec!(30)))
            .await
            .unwrap();
        let err = book
            .open_position("p1", "r1", spec("WIF", dec!(30)))
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::DuplicatePosition));

        // the failed attempt must not have burned points
        assert_eq!(ledger.get_remaining("p1", "r1").await.unwrap(), dec!(70));
    }

    #[tokio::test]
    async fn test_open_position_rejects_invalid_fields() {
        let (book, _) = book_with_deposit().await;

        let mut bad = spec("BONK", dec!(10));
        bad.leverage = dec!(0);
        assert!(matches!(
            book.open_position("p1", "r1", bad).await.unwrap_err(),
            GameError::Validation(_)
        ));

        let bad = spec("BONK", dec!(0));
        assert!(matches!(
            book.open_position("p1", "r1", bad).await.unwrap_err(),
            GameError::Validation(_)
        ));

        let mut bad = spec("BONK", dec!(10));
        bad.token_mint = String::new();
        assert!(matches!(
            book.open_position("p1", "r1", bad).await.unwrap_err(),
            GameError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_single_positions_cannot_exceed_budget() {
        let (book, ledger) = book_with_deposit().await;

        book.open_position("p1", "r1", spec("BONK", dec!(60)))
            .await
            .unwrap();
        let err = book
            .open_position("p1", "r1", spec("WIF", dec!(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::InsufficientPoints));
        assert_eq!(ledger.get_remaining("p1", "r1").await.unwrap(), dec!(40));
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing_on_aggregate() {
        let (book, ledger) = book_with_deposit().await;

        // 60 + 50 exceeds the 100-point budget: nothing may be persisted
        let err = book
            .open_positions(
                "p1",
                "r1",
                vec![spec("BONK", dec!(60)), spec("WIF", dec!(50))],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::InsufficientPoints));
        assert!(book.list_positions("p1", "r1").await.unwrap().is_empty());
        assert_eq!(ledger.get_remaining("p1", "r1").await.unwrap(), dec!(100));

        // a fitting batch lands as a whole
        let positions = book
            .open_positions(
                "p1",
                "r1",
                vec![spec("BONK", dec!(60)), spec("WIF", dec!(40))],
            )
            .await
            .unwrap();
        assert_eq!(positions.len(), 2);
        assert_eq!(ledger.get_remaining("p1", "r1").await.unwrap(), dec!(0));
    }

    #[tokio::test]
    async fn test_batch_rejects_duplicate_mints() {
        let (book, _) = book_with_deposit().await;

        let err = book
            .open_positions(
                "p1",
                "r1",
                vec![spec("BONK", dec!(10)), spec("BONK", dec!(10))],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::DuplicatePosition));

        book.open_position("p1", "r1", spec("MEW", dec!(10)))
            .await
            .unwrap();
        let err = book
            .open_positions("p1", "r1", vec![spec("MEW", dec!(10))])
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::DuplicatePosition));
    }

    #[tokio::test]
    async fn test_failed_persist_refunds_and_surfaces_store_error() {
        use crate::models::Deposit;
        use crate::store::{MockStore, ReserveOutcome, StoreError};

        let mut store = MockStore::new();
        store.expect_find_deposit().returning(|player, round| {
            Ok(Some(Deposit {
                player_id: player.to_string(),
                round_id: round.to_string(),
                timestamp: Utc::now(),
            }))
        });
        store.expect_find_position().returning(|_, _, _| Ok(None));
        store
            .expect_reserve_points()
            .times(1)
            .returning(|_, _, _| Ok(ReserveOutcome::Reserved));
        store
            .expect_insert_position()
            .times(1)
            .returning(|_| Err(StoreError::Database(sqlx::Error::PoolClosed)));
        // the reservation must be compensated when the persist fails
        store
            .expect_refund_points()
            .withf(|_, _, amount| *amount == dec!(40))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let book = PositionBook::new(Arc::new(store));
        let err = book
            .open_position("p1", "r1", spec("BONK", dec!(40)))
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::Store(_)));
    }

    #[tokio::test]
    async fn test_position_stats_previews_scores() {
        let (book, _) = book_with_deposit().await;
        book.open_position("p1", "r1", spec("BONK", dec!(50)))
            .await
            .unwrap();

        let quotes = vec![PriceQuote {
            token_mint: "BONK-mint".to_string(),
            value: dec!(110),
            update_ts: Utc::now(),
        }];
        let stats = book.position_stats("p1", "r1", &quotes).await.unwrap();
        assert_eq!(stats.points_allocated, dec!(50));
        assert_eq!(stats.final_points, dec!(60));
        assert_eq!(stats.top3_positions, "BONK");
    }

    #[test]
    fn test_top3_display_is_stable_on_ties() {
        let mut scored = vec![
            ("BONK".to_string(), dec!(10)),
            ("WIF".to_string(), dec!(30)),
            ("MEW".to_string(), dec!(10)),
            ("WEN".to_string(), dec!(5)),
        ];
        assert_eq!(top3_display(&mut scored), "WIF,BONK,MEW");
    }
}
