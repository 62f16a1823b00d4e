//! Periodic settlement: price every open position and rebuild the live
//! leaderboard.
//!
//! A run is all-or-nothing for the leaderboard swap. When the oracle
//! returns nothing usable, or the round has no deposits or positions, the
//! previous leaderboard stays untouched and the run reports why it
//! stopped. A guard mutex serializes runs so an overlapping timer tick or
//! the round-end final pass never interleaves with a scheduled one.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

use common::book::top3_display;
use common::models::{playable_mints, Deposit, Position, PriceQuote, LEADERBOARD_SIZE};
use common::{score, LeaderboardEntry, LeaderboardHistoryEntry, PriceOracle, Store, StoreError};

/// Why a settlement run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Leaderboard was rebuilt with this many rows.
    Updated(usize),
    /// Oracle returned no usable prices; leaderboard untouched.
    NoPrices,
    /// Round has no deposits yet; leaderboard untouched.
    NoDeposits,
    /// Round has deposits but no open positions; leaderboard untouched.
    NoPositions,
}

pub struct SettlementEngine {
    store: Arc<dyn Store>,
    oracle: Arc<dyn PriceOracle>,
    run_guard: tokio::sync::Mutex<()>,
}

impl SettlementEngine {
    pub fn new(store: Arc<dyn Store>, oracle: Arc<dyn PriceOracle>) -> Self {
        Self {
            store,
            oracle,
            run_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// One settlement pass for `round_id`.
    pub async fn run(&self, round_id: &str) -> Result<RunOutcome, StoreError> {
        let _guard = self.run_guard.lock().await;
        self.run_locked(round_id).await
    }

    async fn run_locked(&self, round_id: &str) -> Result<RunOutcome, StoreError> {
        let mints = playable_mints();
        let quotes = self.oracle.get_prices(&mints).await;
        if quotes.iter().all(|q| q.value.is_zero()) {
            warn!("Settlement aborted for round {}: no usable prices", round_id);
            return Ok(RunOutcome::NoPrices);
        }
        self.store.replace_quotes(&quotes).await?;

        let deposits = self.store.list_deposits(round_id).await?;
        if deposits.is_empty() {
            return Ok(RunOutcome::NoDeposits);
        }

        let positions = self.store.list_round_positions(round_id).await?;
        if positions.is_empty() {
            return Ok(RunOutcome::NoPositions);
        }

        let entries = build_leaderboard(round_id, &deposits, &positions, &quotes);
        let count = entries.len();
        self.store
            .replace_leaderboard(round_id, &entries, Utc::now())
            .await?;
        info!("Settled round {}: {} leaderboard rows", round_id, count);
        Ok(RunOutcome::Updated(count))
    }

    /// Round-end pass: run a final settlement, archive the live rows into
    /// history and return the winner's player id.
    ///
    /// Archiving is idempotent per (round, date); a second call on the
    /// same day re-reads the winner from history instead of writing
    /// duplicate rows. Returns `None` when the round ends with an empty
    /// leaderboard.
    pub async fn finish_round(&self, round_id: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.run_guard.lock().await;

        // Best-effort final pass; a failed oracle here must not block the
        // archive of the last good standings.
        match self.run_locked(round_id).await {
            Ok(RunOutcome::Updated(_)) => {}
            Ok(outcome) => info!("Final settlement skipped: {:?}", outcome),
            Err(e) => warn!("Final settlement failed, archiving last standings: {}", e),
        }

        let live = self.store.get_leaderboard(round_id).await?;
        if live.is_empty() {
            info!("Round {} ended with an empty leaderboard", round_id);
            return Ok(None);
        }

        let archive_date = Utc::now().date_naive();
        if self.store.history_exists(round_id, archive_date).await? {
            info!("Round {} already archived for {}", round_id, archive_date);
        } else {
            let rows: Vec<LeaderboardHistoryEntry> = live
                .iter()
                .enumerate()
                .map(|(i, entry)| LeaderboardHistoryEntry {
                    player_id: entry.player_id.clone(),
                    round_id: entry.round_id.clone(),
                    points_allocated: entry.points_allocated,
                    final_points: entry.final_points,
                    top3_positions: entry.top3_positions.clone(),
                    rank: (i + 1) as i32,
                    archive_date,
                })
                .collect();
            self.store.append_history(&rows).await?;
            info!(
                "Archived {} rows for round {} on {}",
                rows.len(),
                round_id,
                archive_date
            );
        }

        // The winner always comes from the archive, never from the live
        // table, so payout and archive can never disagree.
        let history = self
            .store
            .get_history(Some(round_id), Some(archive_date))
            .await?;
        Ok(history
            .iter()
            .find(|row| row.rank == 1)
            .map(|row| row.player_id.clone()))
    }

    /// Wipe the live leaderboard after a finished round is archived.
    pub async fn clear_live(&self, round_id: &str) -> Result<(), StoreError> {
        let _guard = self.run_guard.lock().await;
        self.store.clear_leaderboard(round_id).await
    }
}

/// Build ranked leaderboard rows from this round's deposits, positions and
/// the current price snapshot.
///
/// Players are visited in deposit order and ranked with a stable sort, so
/// ties keep their deposit order. Positions on tokens with a zero or
/// missing quote are skipped for the cycle and contribute nothing.
pub fn build_leaderboard(
    round_id: &str,
    deposits: &[Deposit],
    positions: &[Position],
    quotes: &[PriceQuote],
) -> Vec<LeaderboardEntry> {
    let price_by_mint: HashMap<&str, Decimal> = quotes
        .iter()
        .filter(|q| !q.value.is_zero())
        .map(|q| (q.token_mint.as_str(), q.value))
        .collect();

    let mut by_player: HashMap<&str, Vec<&Position>> = HashMap::new();
    for position in positions {
        by_player
            .entry(position.player_id.as_str())
            .or_default()
            .push(position);
    }

    let mut entries: Vec<LeaderboardEntry> = Vec::new();
    for deposit in deposits {
        let Some(player_positions) = by_player.get(deposit.player_id.as_str()) else {
            continue;
        };

        let mut allocated = Decimal::ZERO;
        let mut final_points = Decimal::ZERO;
        let mut scored: Vec<(String, Decimal)> = Vec::with_capacity(player_positions.len());
        for position in player_positions {
            allocated += position.points_allocated;
            // no usable quote this cycle: skip the position entirely
            let Some(&current_price) = price_by_mint.get(position.token_mint.as_str()) else {
                continue;
            };
            let points = score(
                position.entry_price,
                position.leverage,
                current_price,
                position.liquidation_price,
                position.points_allocated,
                position.position_type,
            );
            final_points += points;
            scored.push((position.token_name.clone(), points));
        }

        entries.push(LeaderboardEntry {
            player_id: deposit.player_id.clone(),
            round_id: round_id.to_string(),
            points_allocated: allocated,
            final_points,
            top3_positions: top3_display(&mut scored),
        });
    }

    entries.sort_by(|a, b| b.final_points.cmp(&a.final_points));
    entries.truncate(LEADERBOARD_SIZE);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use common::models::PositionType;
    use common::MemoryStore;
    use rust_decimal_macros::dec;

    struct StubOracle {
        quotes: Vec<PriceQuote>,
    }

    #[async_trait]
    impl PriceOracle for StubOracle {
        async fn get_prices(&self, _mints: &[String]) -> Vec<PriceQuote> {
            self.quotes.clone()
        }
    }

    fn quote(mint: &str, value: Decimal) -> PriceQuote {
        PriceQuote {
            token_mint: mint.to_string(),
            value,
            update_ts: Utc::now(),
        }
    }

    fn deposit(player: &str, round: &str) -> Deposit {
        Deposit {
            player_id: player.to_string(),
            round_id: round.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn position(player: &str, round: &str, mint: &str, entry: Decimal, alloc: Decimal) -> Position {
        Position {
            player_id: player.to_string(),
            round_id: round.to_string(),
            token_name: mint.to_uppercase(),
            token_mint: mint.to_string(),
            entry_price: entry,
            leverage: dec!(2),
            points_allocated: alloc,
            position_type: PositionType::Long,
            liquidation_price: entry / dec!(2),
            timestamp: Utc::now(),
        }
    }

    async fn seed_player(
        store: &MemoryStore,
        round: &str,
        player: &str,
        positions: Vec<Position>,
    ) {
        store.insert_deposit(&deposit(player, round)).await.unwrap();
        for p in positions {
            store.insert_position(&p).await.unwrap();
        }
    }

    fn engine(store: Arc<MemoryStore>, quotes: Vec<PriceQuote>) -> SettlementEngine {
        SettlementEngine::new(store, Arc::new(StubOracle { quotes }))
    }

    #[test]
    fn test_ranking_and_top3_string() {
        let round = "r1";
        let deposits = vec![deposit("alice", round), deposit("bob", round)];
        let positions = vec![
            position("alice", round, "bonk", dec!(100), dec!(50)),
            position("bob", round, "bonk", dec!(100), dec!(50)),
            position("bob", round, "wif", dec!(100), dec!(50)),
        ];
        // bonk up 10%, wif down 10%
        let quotes = vec![quote("bonk", dec!(110)), quote("wif", dec!(90))];

        let entries = build_leaderboard(round, &deposits, &positions, &quotes);
        assert_eq!(entries.len(), 2);
        // bob: 60 + 40 = 100 allocated 100; alice: 60 allocated 50
        assert_eq!(entries[0].player_id, "bob");
        assert_eq!(entries[0].final_points, dec!(100));
        assert_eq!(entries[0].top3_positions, "BONK,WIF");
        assert_eq!(entries[1].player_id, "alice");
        assert_eq!(entries[1].final_points, dec!(60));
    }

    #[test]
    fn test_positionless_depositors_are_skipped() {
        let round = "r1";
        let deposits = vec![deposit("alice", round), deposit("bob", round)];
        let positions = vec![position("bob", round, "bonk", dec!(100), dec!(50))];
        let quotes = vec![quote("bonk", dec!(100))];

        let entries = build_leaderboard(round, &deposits, &positions, &quotes);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].player_id, "bob");
    }

    #[test]
    fn test_missing_quote_skips_the_position() {
        let round = "r1";
        let deposits = vec![deposit("alice", round)];
        let positions = vec![
            position("alice", round, "bonk", dec!(100), dec!(30)),
            position("alice", round, "wif", dec!(100), dec!(20)),
        ];
        // wif has a zero quote this cycle
        let quotes = vec![quote("bonk", dec!(120)), quote("wif", dec!(0))];

        let entries = build_leaderboard(round, &deposits, &positions, &quotes);
        // bonk: (0.3 * 120 - 30) * 2 + 30 = 42; wif contributes nothing
        assert_eq!(entries[0].final_points, dec!(42));
        // the allocation sum still covers every open position
        assert_eq!(entries[0].points_allocated, dec!(50));
        assert_eq!(entries[0].top3_positions, "BONK");
    }

    #[test]
    fn test_truncated_to_leaderboard_size() {
        let round = "r1";
        let mut deposits = Vec::new();
        let mut positions = Vec::new();
        for i in 0..15 {
            let player = format!("p{i}");
            deposits.push(deposit(&player, round));
            positions.push(position(&player, round, "bonk", dec!(100), dec!(50)));
        }
        let quotes = vec![quote("bonk", dec!(100))];

        let entries = build_leaderboard(round, &deposits, &positions, &quotes);
        assert_eq!(entries.len(), LEADERBOARD_SIZE);
    }

    #[test]
    fn test_ties_keep_deposit_order() {
        let round = "r1";
        let deposits = vec![deposit("first", round), deposit("second", round)];
        let positions = vec![
            position("first", round, "bonk", dec!(100), dec!(50)),
            position("second", round, "bonk", dec!(100), dec!(50)),
        ];
        let quotes = vec![quote("bonk", dec!(100))];

        let entries = build_leaderboard(round, &deposits, &positions, &quotes);
        assert_eq!(entries[0].player_id, "first");
        assert_eq!(entries[1].player_id, "second");
    }

    #[tokio::test]
    async fn test_run_updates_leaderboard() {
        let round = "r1";
        let store = Arc::new(MemoryStore::new());
        seed_player(
            &store,
            round,
            "alice",
            vec![position("alice", round, "bonk", dec!(100), dec!(50))],
        )
        .await;

        let engine = engine(store.clone(), vec![quote("bonk", dec!(110))]);
        let outcome = engine.run(round).await.unwrap();
        assert_eq!(outcome, RunOutcome::Updated(1));

        let board = store.get_leaderboard(round).await.unwrap();
        assert_eq!(board[0].final_points, dec!(60));
        assert!(store.leaderboard_updated_at(round).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_no_prices_leaves_previous_board() {
        let round = "r1";
        let store = Arc::new(MemoryStore::new());
        seed_player(
            &store,
            round,
            "alice",
            vec![position("alice", round, "bonk", dec!(100), dec!(50))],
        )
        .await;

        let good = engine(store.clone(), vec![quote("bonk", dec!(110))]);
        good.run(round).await.unwrap();

        let dead = engine(store.clone(), vec![quote("bonk", dec!(0))]);
        let outcome = dead.run(round).await.unwrap();
        assert_eq!(outcome, RunOutcome::NoPrices);

        let board = store.get_leaderboard(round).await.unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].final_points, dec!(60));
    }

    #[tokio::test]
    async fn test_run_without_deposits_or_positions() {
        let round = "r1";
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone(), vec![quote("bonk", dec!(110))]);
        assert_eq!(engine.run(round).await.unwrap(), RunOutcome::NoDeposits);

        store
            .insert_deposit(&deposit("alice", round))
            .await
            .unwrap();
        assert_eq!(engine.run(round).await.unwrap(), RunOutcome::NoPositions);
    }

    #[tokio::test]
    async fn test_finish_round_archives_and_names_winner() {
        let round = "r1";
        let store = Arc::new(MemoryStore::new());
        seed_player(
            &store,
            round,
            "alice",
            vec![position("alice", round, "bonk", dec!(100), dec!(50))],
        )
        .await;
        seed_player(
            &store,
            round,
            "bob",
            vec![position("bob", round, "wif", dec!(100), dec!(50))],
        )
        .await;

        let engine = engine(
            store.clone(),
            vec![quote("bonk", dec!(120)), quote("wif", dec!(90))],
        );
        let winner = engine.finish_round(round).await.unwrap();
        assert_eq!(winner.as_deref(), Some("alice"));

        let history = store.get_history(Some(round), None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.iter().find(|r| r.rank == 1).unwrap().player_id, "alice");
    }

    #[tokio::test]
    async fn test_finish_round_is_idempotent() {
        let round = "r1";
        let store = Arc::new(MemoryStore::new());
        seed_player(
            &store,
            round,
            "alice",
            vec![position("alice", round, "bonk", dec!(100), dec!(50))],
        )
        .await;

        let engine = engine(store.clone(), vec![quote("bonk", dec!(110))]);
        let first = engine.finish_round(round).await.unwrap();
        let second = engine.finish_round(round).await.unwrap();
        assert_eq!(first, second);

        let history = store.get_history(Some(round), None).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_finish_empty_round_yields_no_winner() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone(), vec![quote("bonk", dec!(110))]);
        assert_eq!(engine.finish_round("r1").await.unwrap(), None);
        assert!(store.get_history(None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_live_empties_the_board() {
        let round = "r1";
        let store = Arc::new(MemoryStore::new());
        seed_player(
            &store,
            round,
            "alice",
            vec![position("alice", round, "bonk", dec!(100), dec!(50))],
        )
        .await;

        let engine = engine(store.clone(), vec![quote("bonk", dec!(110))]);
        engine.run(round).await.unwrap();
        engine.clear_live(round).await.unwrap();
        assert!(store.get_leaderboard(round).await.unwrap().is_empty());
    }
}
