use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::warn;

use common::models::Broker;

/// A broker session token with enough metadata to decide when it must be
/// replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerToken {
    pub broker: Broker,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl BrokerToken {
    /// Whether this token is still safe to use: not inside the expiry
    /// safety margin and not older than the venue tolerates a session.
    pub fn usable(&self, now: DateTime<Utc>, safety_margin_s: i64, max_age_s: i64) -> bool {
        let until_expiry = (self.expires_at - now).num_seconds();
        let age = (now - self.created_at).num_seconds();
        until_expiry > safety_margin_s && age < max_age_s
    }
}

/// Durable token records, so a restarted process re-uses a live session
/// instead of burning another login against the venue's auth endpoint.
#[derive(Clone)]
pub struct TokenStore {
    pool: SqlitePool,
}

impl TokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, broker: Broker) -> Result<Option<BrokerToken>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT access_token, expires_at, created_at FROM broker_tokens WHERE broker = ?",
        )
        .bind(broker.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let access_token: String = row.get("access_token");
        let expires_at: String = row.get("expires_at");
        let created_at: String = row.get("created_at");

        let parse = |s: &str| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        };
        match (parse(&expires_at), parse(&created_at)) {
            (Some(expires_at), Some(created_at)) => Ok(Some(BrokerToken {
                broker,
                access_token,
                expires_at,
                created_at,
            })),
            _ => {
                // A corrupt row is as good as no token.
                warn!("Discarding unparsable token record for {}", broker);
                Ok(None)
            }
        }
    }

    pub async fn put(&self, token: &BrokerToken) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
                INSERT INTO broker_tokens (broker, access_token, expires_at, created_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(broker) DO UPDATE SET
                    access_token = excluded.access_token,
                    expires_at = excluded.expires_at,
                    created_at = excluded.created_at
            "#,
        )
        .bind(token.broker.as_str())
        .bind(&token.access_token)
        .bind(token.expires_at.to_rfc3339())
        .bind(token.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, broker: Broker) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM broker_tokens WHERE broker = ?")
            .bind(broker.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
