//! In-memory store used by tests and `--memory-store` local runs.
//!
//! One mutex over the whole state gives the same atomicity the Postgres
//! implementation gets from single-statement conditional updates.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::models::{
    Deposit, EligibilityGrant, LeaderboardEntry, LeaderboardHistoryEntry, PointsBalance, Position,
    PriceQuote, Round, MAX_POINTS,
};

use super::{ReserveOutcome, Store, StoreError};

#[derive(Default)]
struct Inner {
    round: Option<Round>,
    deposits: Vec<Deposit>,
    balances: HashMap<(String, String), Decimal>,
    positions: Vec<Position>,
    leaderboards: HashMap<String, Vec<LeaderboardEntry>>,
    leaderboard_updated: HashMap<String, DateTime<Utc>>,
    history: Vec<LeaderboardHistoryEntry>,
    quotes: Vec<PriceQuote>,
    grants: Vec<EligibilityGrant>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn fetch_round(&self) -> Result<Option<Round>, StoreError> {
        Ok(self.inner.lock().await.round.clone())
    }

    async fn save_round(&self, round: &Round) -> Result<(), StoreError> {
        self.inner.lock().await.round = Some(round.clone());
        Ok(())
    }

    async fn find_deposit(
        &self,
        player_id: &str,
        round_id: &str,
    ) -> Result<Option<Deposit>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .deposits
            .iter()
            .find(|d| d.player_id == player_id && d.round_id == round_id)
            .cloned())
    }

    async fn insert_deposit(&self, deposit: &Deposit) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let exists = inner
            .deposits
            .iter()
            .any(|d| d.player_id == deposit.player_id && d.round_id == deposit.round_id);
        if exists {
            return Ok(false);
        }
        inner.deposits.push(deposit.clone());
        Ok(true)
    }

    async fn list_deposits(&self, round_id: &str) -> Result<Vec<Deposit>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .deposits
            .iter()
            .filter(|d| d.round_id == round_id)
            .cloned()
            .collect())
    }

    async fn insert_balance(&self, balance: &PointsBalance) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .balances
            .entry((balance.player_id.clone(), balance.round_id.clone()))
            .or_insert(balance.remaining);
        Ok(())
    }

    async fn get_balance(
        &self,
        player_id: &str,
        round_id: &str,
    ) -> Result<Option<PointsBalance>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .balances
            .get(&(player_id.to_string(), round_id.to_string()))
            .map(|remaining| PointsBalance {
                player_id: player_id.to_string(),
                round_id: round_id.to_string(),
                remaining: *remaining,
            }))
    }

    async fn reserve_points(
        &self,
        player_id: &str,
        round_id: &str,
        amount: Decimal,
    ) -> Result<ReserveOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner
            .balances
            .get_mut(&(player_id.to_string(), round_id.to_string()))
        {
            None => Ok(ReserveOutcome::Missing),
            Some(remaining) if *remaining < amount => Ok(ReserveOutcome::Insufficient),
            Some(remaining) => {
                *remaining -= amount;
                Ok(ReserveOutcome::Reserved)
            }
        }
    }

    async fn refund_points(
        &self,
        player_id: &str,
        round_id: &str,
        amount: Decimal,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(remaining) = inner
            .balances
            .get_mut(&(player_id.to_string(), round_id.to_string()))
        {
            *remaining = (*remaining + amount).min(MAX_POINTS);
        }
        Ok(())
    }

    async fn find_position(
        &self,
        player_id: &str,
        round_id: &str,
        token_mint: &str,
    ) -> Result<Option<Position>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .positions
            .iter()
            .find(|p| {
                p.player_id == player_id && p.round_id == round_id && p.token_mint == token_mint
            })
            .cloned())
    }

    async fn insert_position(&self, position: &Position) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let exists = inner.positions.iter().any(|p| {
            p.player_id == position.player_id
                && p.round_id == position.round_id
                && p.token_mint == position.token_mint
        });
        if exists {
            return Ok(false);
        }
        inner.positions.push(position.clone());
        Ok(true)
    }

    async fn insert_positions(&self, positions: &[Position]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        // all-or-nothing, like the transactional Postgres path
        for (i, position) in positions.iter().enumerate() {
            let clashes = |p: &Position| {
                p.player_id == position.player_id
                    && p.round_id == position.round_id
                    && p.token_mint == position.token_mint
            };
            if inner.positions.iter().any(clashes) || positions[..i].iter().any(clashes) {
                return Err(StoreError::Conflict("positions"));
            }
        }
        inner.positions.extend_from_slice(positions);
        Ok(())
    }

    async fn list_positions(
        &self,
        player_id: &str,
        round_id: &str,
    ) -> Result<Vec<Position>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .positions
            .iter()
            .filter(|p| p.player_id == player_id && p.round_id == round_id)
            .cloned()
            .collect())
    }

    async fn list_round_positions(&self, round_id: &str) -> Result<Vec<Position>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .positions
            .iter()
            .filter(|p| p.round_id == round_id)
            .cloned()
            .collect())
    }

    async fn replace_leaderboard(
        &self,
        round_id: &str,
        entries: &[LeaderboardEntry],
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .leaderboards
            .insert(round_id.to_string(), entries.to_vec());
        inner
            .leaderboard_updated
            .insert(round_id.to_string(), updated_at);
        Ok(())
    }

    async fn get_leaderboard(&self, round_id: &str) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.leaderboards.get(round_id).cloned().unwrap_or_default())
    }

    async fn clear_leaderboard(&self, round_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.leaderboards.remove(round_id);
        Ok(())
    }

    async fn leaderboard_updated_at(
        &self,
        round_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.leaderboard_updated.get(round_id).copied())
    }

    async fn history_exists(
        &self,
        round_id: &str,
        archive_date: NaiveDate,
    ) -> Result<bool, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .history
            .iter()
            .any(|h| h.round_id == round_id && h.archive_date == archive_date))
    }

    async fn append_history(
        &self,
        entries: &[LeaderboardHistoryEntry],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.history.extend_from_slice(entries);
        Ok(())
    }

    async fn get_history<'a>(
        &self,
        round_id: Option<&'a str>,
        archive_date: Option<NaiveDate>,
    ) -> Result<Vec<LeaderboardHistoryEntry>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .history
            .iter()
            .filter(|h| round_id.map_or(true, |r| h.round_id == r))
            .filter(|h| archive_date.map_or(true, |d| h.archive_date == d))
            .cloned()
            .collect())
    }

    async fn replace_quotes(&self, quotes: &[PriceQuote]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.quotes = quotes.to_vec();
        Ok(())
    }

    async fn list_quotes(&self) -> Result<Vec<PriceQuote>, StoreError> {
        Ok(self.inner.lock().await.quotes.clone())
    }

    async fn find_grant(&self, player_id: &str) -> Result<Option<EligibilityGrant>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .grants
            .iter()
            .find(|g| g.player_id == player_id)
            .cloned())
    }

    async fn insert_grant(&self, grant: &EligibilityGrant) -> Result<(), StoreError> {
        self.inner.lock().await.grants.push(grant.clone());
        Ok(())
    }
}
