//! Postgres-backed store.
//!
//! Uniqueness rides on `ON CONFLICT DO NOTHING` against the unique indexes
//! in `schema.sql`; the points reservation is a single conditional UPDATE
//! so the check and the decrement cannot be split across two round trips;
//! the leaderboard swap runs inside one transaction so readers never see a
//! half-empty table.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::Config;
use crate::models::{
    Deposit, EligibilityGrant, LeaderboardEntry, LeaderboardHistoryEntry, PointsBalance, Position,
    PriceQuote, Round, MAX_POINTS,
};

use super::{ReserveOutcome, Store, StoreError};

/// Postgres connection pool wrapper.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new store over a fresh connection pool.
    pub async fn connect(config: &Config) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if the database connection is healthy.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn fetch_round(&self) -> Result<Option<Round>, StoreError> {
        let round = sqlx::query_as::<_, Round>(
            "SELECT round_id, games_played, last_updated_ts FROM round_state LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(round)
    }

    async fn save_round(&self, round: &Round) -> Result<(), StoreError> {
        // singleton row, keyed by a fixed id
        sqlx::query(
            r#"
            INSERT INTO round_state (singleton, round_id, games_played, last_updated_ts)
            VALUES (TRUE, $1, $2, $3)
            ON CONFLICT (singleton) DO UPDATE SET
                round_id = EXCLUDED.round_id,
                games_played = EXCLUDED.games_played,
                last_updated_ts = EXCLUDED.last_updated_ts
            "#,
        )
        .bind(&round.round_id)
        .bind(round.games_played)
        .bind(round.last_updated_ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_deposit(
        &self,
        player_id: &str,
        round_id: &str,
    ) -> Result<Option<Deposit>, StoreError> {
        let deposit = sqlx::query_as::<_, Deposit>(
            r#"
            SELECT player_id, round_id, timestamp
            FROM deposits
            WHERE player_id = $1 AND round_id = $2
            "#,
        )
        .bind(player_id)
        .bind(round_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(deposit)
    }

    async fn insert_deposit(&self, deposit: &Deposit) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO deposits (player_id, round_id, timestamp)
            VALUES ($1, $2, $3)
            ON CONFLICT (player_id, round_id) DO NOTHING
            "#,
        )
        .bind(&deposit.player_id)
        .bind(&deposit.round_id)
        .bind(deposit.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_deposits(&self, round_id: &str) -> Result<Vec<Deposit>, StoreError> {
        let deposits = sqlx::query_as::<_, Deposit>(
            r#"
            SELECT player_id, round_id, timestamp
            FROM deposits
            WHERE round_id = $1
            ORDER BY timestamp ASC
            "#,
        )
        .bind(round_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(deposits)
    }

    async fn insert_balance(&self, balance: &PointsBalance) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO points_balances (player_id, round_id, remaining)
            VALUES ($1, $2, $3)
            ON CONFLICT (player_id, round_id) DO NOTHING
            "#,
        )
        .bind(&balance.player_id)
        .bind(&balance.round_id)
        .bind(balance.remaining)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_balance(
        &self,
        player_id: &str,
        round_id: &str,
    ) -> Result<Option<PointsBalance>, StoreError> {
        let balance = sqlx::query_as::<_, PointsBalance>(
            r#"
            SELECT player_id, round_id, remaining
            FROM points_balances
            WHERE player_id = $1 AND round_id = $2
            "#,
        )
        .bind(player_id)
        .bind(round_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(balance)
    }

    async fn reserve_points(
        &self,
        player_id: &str,
        round_id: &str,
        amount: Decimal,
    ) -> Result<ReserveOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE points_balances
            SET remaining = remaining - $3
            WHERE player_id = $1 AND round_id = $2 AND remaining >= $3
            "#,
        )
        .bind(player_id)
        .bind(round_id)
        .bind(amount)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(ReserveOutcome::Reserved);
        }

        match self.get_balance(player_id, round_id).await? {
            Some(_) => Ok(ReserveOutcome::Insufficient),
            None => Ok(ReserveOutcome::Missing),
        }
    }

    async fn refund_points(
        &self,
        player_id: &str,
        round_id: &str,
        amount: Decimal,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE points_balances
            SET remaining = LEAST(remaining + $3, $4)
            WHERE player_id = $1 AND round_id = $2
            "#,
        )
        .bind(player_id)
        .bind(round_id)
        .bind(amount)
        .bind(MAX_POINTS)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_position(
        &self,
        player_id: &str,
        round_id: &str,
        token_mint: &str,
    ) -> Result<Option<Position>, StoreError> {
        let position = sqlx::query_as::<_, Position>(
            r#"
            SELECT player_id, round_id, token_name, token_mint, entry_price, leverage,
                   points_allocated, position_type, liquidation_price, timestamp
            FROM positions
            WHERE player_id = $1 AND round_id = $2 AND token_mint = $3
            "#,
        )
        .bind(player_id)
        .bind(round_id)
        .bind(token_mint)
        .fetch_optional(&self.pool)
        .await?;
        Ok(position)
    }

    async fn insert_position(&self, position: &Position) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO positions (player_id, round_id, token_name, token_mint, entry_price,
                                   leverage, points_allocated, position_type, liquidation_price,
                                   timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (player_id, round_id, token_mint) DO NOTHING
            "#,
        )
        .bind(&position.player_id)
        .bind(&position.round_id)
        .bind(&position.token_name)
        .bind(&position.token_mint)
        .bind(position.entry_price)
        .bind(position.leverage)
        .bind(position.points_allocated)
        .bind(position.position_type)
        .bind(position.liquidation_price)
        .bind(position.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_positions(&self, positions: &[Position]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for position in positions {
            sqlx::query(
                r#"
                INSERT INTO positions (player_id, round_id, token_name, token_mint, entry_price,
                                       leverage, points_allocated, position_type,
                                       liquidation_price, timestamp)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(&position.player_id)
            .bind(&position.round_id)
            .bind(&position.token_name)
            .bind(&position.token_mint)
            .bind(position.entry_price)
            .bind(position.leverage)
            .bind(position.points_allocated)
            .bind(position.position_type)
            .bind(position.liquidation_price)
            .bind(position.timestamp)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_positions(
        &self,
        player_id: &str,
        round_id: &str,
    ) -> Result<Vec<Position>, StoreError> {
        let positions = sqlx::query_as::<_, Position>(
            r#"
            SELECT player_id, round_id, token_name, token_mint, entry_price, leverage,
                   points_allocated, position_type, liquidation_price, timestamp
            FROM positions
            WHERE player_id = $1 AND round_id = $2
            ORDER BY timestamp ASC
            "#,
        )
        .bind(player_id)
        .bind(round_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(positions)
    }

    async fn list_round_positions(&self, round_id: &str) -> Result<Vec<Position>, StoreError> {
        let positions = sqlx::query_as::<_, Position>(
            r#"
            SELECT player_id, round_id, token_name, token_mint, entry_price, leverage,
                   points_allocated, position_type, liquidation_price, timestamp
            FROM positions
            WHERE round_id = $1
            ORDER BY timestamp ASC
            "#,
        )
        .bind(round_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(positions)
    }

    async fn replace_leaderboard(
        &self,
        round_id: &str,
        entries: &[LeaderboardEntry],
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM leaderboard_live WHERE round_id = $1")
            .bind(round_id)
            .execute(&mut *tx)
            .await?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO leaderboard_live (player_id, round_id, points_allocated,
                                              final_points, top3_positions)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(&entry.player_id)
            .bind(&entry.round_id)
            .bind(entry.points_allocated)
            .bind(entry.final_points)
            .bind(&entry.top3_positions)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO leaderboard_updated (round_id, updated_at)
            VALUES ($1, $2)
            ON CONFLICT (round_id) DO UPDATE SET updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(round_id)
        .bind(updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_leaderboard(&self, round_id: &str) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let entries = sqlx::query_as::<_, LeaderboardEntry>(
            r#"
            SELECT player_id, round_id, points_allocated, final_points, top3_positions
            FROM leaderboard_live
            WHERE round_id = $1
            ORDER BY final_points DESC, id ASC
            "#,
        )
        .bind(round_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn clear_leaderboard(&self, round_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM leaderboard_live WHERE round_id = $1")
            .bind(round_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn leaderboard_updated_at(
        &self,
        round_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let updated: Option<(DateTime<Utc>,)> = sqlx::query_as(
            "SELECT updated_at FROM leaderboard_updated WHERE round_id = $1",
        )
        .bind(round_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(updated.map(|(ts,)| ts))
    }

    async fn history_exists(
        &self,
        round_id: &str,
        archive_date: NaiveDate,
    ) -> Result<bool, StoreError> {
        let row: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM leaderboard_history WHERE round_id = $1 AND archive_date = $2 LIMIT 1",
        )
        .bind(round_id)
        .bind(archive_date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn append_history(
        &self,
        entries: &[LeaderboardHistoryEntry],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO leaderboard_history (player_id, round_id, points_allocated,
                                                 final_points, top3_positions, rank, archive_date)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (player_id, round_id, archive_date) DO NOTHING
                "#,
            )
            .bind(&entry.player_id)
            .bind(&entry.round_id)
            .bind(entry.points_allocated)
            .bind(entry.final_points)
            .bind(&entry.top3_positions)
            .bind(entry.rank)
            .bind(entry.archive_date)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_history<'a>(
        &self,
        round_id: Option<&'a str>,
        archive_date: Option<NaiveDate>,
    ) -> Result<Vec<LeaderboardHistoryEntry>, StoreError> {
        let entries = sqlx::query_as::<_, LeaderboardHistoryEntry>(
            r#"
            SELECT player_id, round_id, points_allocated, final_points, top3_positions,
                   rank, archive_date
            FROM leaderboard_history
            WHERE ($1::TEXT IS NULL OR round_id = $1)
              AND ($2::DATE IS NULL OR archive_date = $2)
            ORDER BY archive_date DESC, rank ASC
            "#,
        )
        .bind(round_id)
        .bind(archive_date)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn replace_quotes(&self, quotes: &[PriceQuote]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM price_quotes").execute(&mut *tx).await?;
        for quote in quotes {
            sqlx::query(
                "INSERT INTO price_quotes (token_mint, value, update_ts) VALUES ($1, $2, $3)",
            )
            .bind(&quote.token_mint)
            .bind(quote.value)
            .bind(quote.update_ts)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_quotes(&self) -> Result<Vec<PriceQuote>, StoreError> {
        let quotes = sqlx::query_as::<_, PriceQuote>(
            "SELECT token_mint, value, update_ts FROM price_quotes",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(quotes)
    }

    async fn find_grant(&self, player_id: &str) -> Result<Option<EligibilityGrant>, StoreError> {
        let grant = sqlx::query_as::<_, EligibilityGrant>(
            "SELECT player_id, grant_kind, label FROM eligibility_grants WHERE player_id = $1",
        )
        .bind(player_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(grant)
    }

    async fn insert_grant(&self, grant: &EligibilityGrant) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO eligibility_grants (player_id, grant_kind, label)
            VALUES ($1, $2, $3)
            ON CONFLICT (player_id) DO NOTHING
            "#,
        )
        .bind(&grant.player_id)
        .bind(&grant.grant_kind)
        .bind(&grant.label)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
