use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use thiserror::Error;
use tracing::debug;

use common::models::{PositionRecord, PositionSide, TrendColor};

#[derive(Debug, Error)]
pub enum StateError {
    /// The record changed between the caller's read and this write. Retry
    /// the whole decision from a fresh read.
    #[error("state for {symbol} changed concurrently")]
    Conflict { symbol: String },
    #[error("corrupt position record for {symbol}: {field}")]
    Corrupt { symbol: String, field: &'static str },
    #[error("state backend error: {0}")]
    Backend(#[from] sqlx::Error),
}

/// Durable per-symbol position/trend records with compare-and-swap writes.
///
/// All mutation goes through `compare_and_update`: read a record (which
/// carries its version), compute the next record, write conditionally on
/// the version being unchanged. Two webhook invocations racing on the same
/// symbol serialize here; one wins, the other gets `Conflict` and re-reads.
#[derive(Clone)]
pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Current record for a symbol. Symbols that have never traded get a
    /// zero-value record (version 0) rather than an error.
    pub async fn get(&self, symbol: &str) -> Result<PositionRecord, StateError> {
        let row = sqlx::query(
            r#"
                SELECT symbol, position, trend_color, waiting_for_reentry,
                       held_quantity, suspect, last_updated, version
                FROM position_state WHERE symbol = ?
            "#,
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => record_from_row(&row),
            None => Ok(PositionRecord::empty(symbol)),
        }
    }

    /// Conditionally persist `next`, whose `version` field must still hold
    /// the version the caller read. Version 0 inserts a fresh row; anything
    /// else updates in place. Returns the committed record (version bumped).
    pub async fn compare_and_update(
        &self,
        next: &PositionRecord,
    ) -> Result<PositionRecord, StateError> {
        let now = Utc::now();
        let affected = if next.version == 0 {
            sqlx::query(
                r#"
                    INSERT INTO position_state
                        (symbol, position, trend_color, waiting_for_reentry,
                         held_quantity, suspect, last_updated, version)
                    VALUES (?, ?, ?, ?, ?, ?, ?, 1)
                    ON CONFLICT(symbol) DO NOTHING
                "#,
            )
            .bind(&next.symbol)
            .bind(next.position.as_db_str())
            .bind(next.trend_color.as_db_str())
            .bind(next.waiting_for_reentry)
            .bind(next.held_quantity)
            .bind(next.suspect)
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?
            .rows_affected()
        } else {
            sqlx::query(
                r#"
                    UPDATE position_state
                    SET position = ?, trend_color = ?, waiting_for_reentry = ?,
                        held_quantity = ?, suspect = ?, last_updated = ?,
                        version = version + 1
                    WHERE symbol = ? AND version = ?
                "#,
            )
            .bind(next.position.as_db_str())
            .bind(next.trend_color.as_db_str())
            .bind(next.waiting_for_reentry)
            .bind(next.held_quantity)
            .bind(next.suspect)
            .bind(now.to_rfc3339())
            .bind(&next.symbol)
            .bind(next.version)
            .execute(&self.pool)
            .await?
            .rows_affected()
        };

        if affected == 0 {
            debug!("CAS lost for {} at version {}", next.symbol, next.version);
            return Err(StateError::Conflict {
                symbol: next.symbol.clone(),
            });
        }

        let mut committed = next.clone();
        committed.version += 1;
        committed.last_updated = now;
        Ok(committed)
    }
}

fn record_from_row(row: &SqliteRow) -> Result<PositionRecord, StateError> {
    let symbol: String = row.get("symbol");
    let position: String = row.get("position");
    let trend_color: String = row.get("trend_color");
    let last_updated: String = row.get("last_updated");

    Ok(PositionRecord {
        position: PositionSide::from_db_str(&position).ok_or(StateError::Corrupt {
            symbol: symbol.clone(),
            field: "position",
        })?,
        trend_color: TrendColor::from_db_str(&trend_color).ok_or(StateError::Corrupt {
            symbol: symbol.clone(),
            field: "trend_color",
        })?,
        waiting_for_reentry: row.get::<i64, _>("waiting_for_reentry") != 0,
        held_quantity: row.get("held_quantity"),
        suspect: row.get::<i64, _>("suspect") != 0,
        last_updated: DateTime::parse_from_rfc3339(&last_updated)
            .map_err(|_| StateError::Corrupt {
                symbol: symbol.clone(),
                field: "last_updated",
            })?
            .with_timezone(&Utc),
        version: row.get("version"),
        symbol,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_ephemeral;
    use std::sync::Arc;

    async fn store() -> StateStore {
        StateStore::new(connect_ephemeral().await.unwrap())
    }

    #[tokio::test]
    async fn absent_symbol_yields_zero_value_record() {
        let store = store().await;
        let rec = store.get("ES").await.unwrap();
        assert_eq!(rec.position, PositionSide::Flat);
        assert_eq!(rec.trend_color, TrendColor::Unset);
        assert_eq!(rec.version, 0);
        assert!(!rec.waiting_for_reentry);
    }

    #[tokio::test]
    async fn insert_then_update_round_trips() {
        let store = store().await;

        let mut rec = store.get("EURUSD").await.unwrap();
        rec.position = PositionSide::Long;
        rec.trend_color = TrendColor::Blue;
        let committed = store.compare_and_update(&rec).await.unwrap();
        assert_eq!(committed.version, 1);

        let mut rec = store.get("EURUSD").await.unwrap();
        assert_eq!(rec.position, PositionSide::Long);
        rec.waiting_for_reentry = true;
        rec.position = PositionSide::Flat;
        let committed = store.compare_and_update(&rec).await.unwrap();
        assert_eq!(committed.version, 2);

        let rec = store.get("EURUSD").await.unwrap();
        assert_eq!(rec.position, PositionSide::Flat);
        assert!(rec.waiting_for_reentry);
        assert_eq!(rec.trend_color, TrendColor::Blue);
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let store = store().await;

        let mut rec = store.get("GC").await.unwrap();
        rec.position = PositionSide::Short;
        store.compare_and_update(&rec).await.unwrap();

        // Same zero-version record applied again: the row now exists.
        let err = store.compare_and_update(&rec).await.unwrap_err();
        assert!(matches!(err, StateError::Conflict { .. }));

        // An update carrying an old version number loses the same way.
        let fresh = store.get("GC").await.unwrap();
        let mut stale = fresh.clone();
        stale.version -= 1;
        stale.position = PositionSide::Long;
        let err = store.compare_and_update(&stale).await.unwrap_err();
        assert!(matches!(err, StateError::Conflict { .. }));
    }

    #[tokio::test]
    async fn concurrent_cas_admits_exactly_one_winner_per_round() {
        let store = Arc::new(store().await);

        // Seed the row so every task reads version 1.
        let mut seed = store.get("NQ").await.unwrap();
        seed.trend_color = TrendColor::Red;
        store.compare_and_update(&seed).await.unwrap();

        let base = store.get("NQ").await.unwrap();
        let mut handles = Vec::new();
        for i in 0..8u32 {
            let store = store.clone();
            let mut next = base.clone();
            handles.push(tokio::spawn(async move {
                next.held_quantity = i as f64;
                store.compare_and_update(&next).await
            }));
        }

        let mut winners = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(StateError::Conflict { .. }) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(conflicts, 7);

        let final_rec = store.get("NQ").await.unwrap();
        assert_eq!(final_rec.version, 2);
    }
}
