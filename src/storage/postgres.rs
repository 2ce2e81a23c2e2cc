// src/storage/postgres.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;

use crate::domain::{OutboxEvent, Payment, PaymentStatus};

use super::traits::{OutboxStore, PaymentStore, StoreError};

/// PostgreSQL implementation of the payment and outbox stores.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgresStore instance with a connection pool.
    pub async fn connect(
        database_url: &str,
        min_connections: u32,
        max_connections: u32,
    ) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(min_connections)
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Map driver errors onto the store taxonomy.
fn classify(err: sqlx::Error, key: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::DuplicateKey(key.to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        _ => StoreError::Backend(err),
    }
}

fn payment_from_row(row: &PgRow) -> Result<Payment, StoreError> {
    let status: String = row.try_get("status")?;

    Ok(Payment {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        merchant_id: row.try_get("merchant_id")?,
        created_at: row.try_get("created_at")?,
        status: PaymentStatus::from_str(&status).unwrap_or_default(),
        risk_score: row.try_get("risk_score")?,
        risk_reason: row.try_get("risk_reason")?,
        correlation_id: row.try_get("correlation_id")?,
        version: row.try_get("version")?,
    })
}

fn event_from_row(row: &PgRow) -> Result<OutboxEvent, StoreError> {
    let payload: Vec<u8> = row.try_get("payload")?;
    let headers: Json<BTreeMap<String, String>> = row.try_get("headers")?;

    Ok(OutboxEvent {
        id: row.try_get("id")?,
        aggregate_id: row.try_get("aggregate_id")?,
        event_type: row.try_get("event_type")?,
        payload: payload.into(),
        headers: headers.0,
        created_at: row.try_get("created_at")?,
        published: row.try_get("published")?,
        published_at: row.try_get("published_at")?,
        correlation_id: row.try_get("correlation_id")?,
    })
}

#[async_trait]
impl PaymentStore for PostgresStore {
    async fn update_decision(
        &self,
        id: &str,
        status: PaymentStatus,
        score: f64,
        reason: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $2,
                risk_score = $3,
                risk_reason = $4,
                version = version + 1
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(score)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, id))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }

        Ok(())
    }

    async fn get_payment(&self, id: &str) -> Result<Option<Payment>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, amount, currency, merchant_id, created_at,
                   status, risk_score, risk_reason, correlation_id, version
            FROM payments
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify(e, id))?;

        row.as_ref().map(payment_from_row).transpose()
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                id, user_id, amount, currency, merchant_id, created_at,
                status, risk_score, risk_reason, correlation_id, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.user_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(&payment.merchant_id)
        .bind(payment.created_at)
        .bind(payment.status.as_str())
        .bind(payment.risk_score)
        .bind(&payment.risk_reason)
        .bind(&payment.correlation_id)
        .bind(payment.version)
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, &payment.id))?;

        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PostgresStore {
    async fn insert_event(&self, event: &OutboxEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO outbox (
                id, aggregate_id, event_type, payload, headers,
                created_at, published, published_at, correlation_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&event.id)
        .bind(&event.aggregate_id)
        .bind(&event.event_type)
        .bind(event.payload.as_ref())
        .bind(Json(&event.headers))
        .bind(event.created_at)
        .bind(event.published)
        .bind(event.published_at)
        .bind(&event.correlation_id)
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, &event.id))?;

        Ok(())
    }

    async fn get_event(&self, id: &str) -> Result<Option<OutboxEvent>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, aggregate_id, event_type, payload, headers,
                   created_at, published, published_at, correlation_id
            FROM outbox
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify(e, id))?;

        row.as_ref().map(event_from_row).transpose()
    }

    async fn mark_published(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET published = true,
                published_at = COALESCE(published_at, $2)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, id))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }

        Ok(())
    }
}
