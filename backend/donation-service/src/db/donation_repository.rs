//! Donation persistence. The orchestrator only calls through this trait;
//! the schema lives with the service that owns the table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::error::{AppError, Result};
use crate::models::{Donation, PaymentProvider, PaymentStatus};

/// Fields required to persist a new donation; ids and timestamps are
/// assigned by the store.
#[derive(Debug, Clone)]
pub struct NewDonation {
    pub amount: f64,
    pub currency: String,
    pub message: String,
    pub streamer_id: i64,
    pub donator_id: i64,
    pub display_name: String,
    pub is_anonymous: bool,
}

#[async_trait]
pub trait DonationRepository: Send + Sync {
    async fn create(&self, donation: NewDonation) -> Result<Donation>;
    async fn get_by_id(&self, id: i64) -> Result<Option<Donation>>;
    async fn update_status(&self, id: i64, status: PaymentStatus) -> Result<()>;
    async fn mark_paid(
        &self,
        id: i64,
        transaction_id: &str,
        provider: PaymentProvider,
        paid_at: DateTime<Utc>,
    ) -> Result<()>;
    async fn list_by_streamer(
        &self,
        streamer_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Donation>>;
}

pub struct PgDonationRepository {
    pool: PgPool,
}

impl PgDonationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const DONATION_COLUMNS: &str = r#"
    id, amount, currency, message, streamer_id, donator_id, display_name,
    is_anonymous, status, payment_provider, transaction_id, payment_time,
    created_at, updated_at
"#;

fn donation_from_row(row: &PgRow) -> Result<Donation> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<PaymentStatus>()
        .map_err(AppError::Internal)?;

    let provider: Option<String> = row.try_get("payment_provider")?;
    let payment_provider = provider
        .map(|p| p.parse::<PaymentProvider>())
        .transpose()
        .map_err(AppError::Internal)?;

    Ok(Donation {
        id: row.try_get("id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        message: row.try_get("message")?,
        streamer_id: row.try_get("streamer_id")?,
        donator_id: row.try_get("donator_id")?,
        display_name: row.try_get("display_name")?,
        is_anonymous: row.try_get("is_anonymous")?,
        status,
        payment_provider,
        transaction_id: row.try_get("transaction_id")?,
        payment_time: row.try_get("payment_time")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl DonationRepository for PgDonationRepository {
    async fn create(&self, donation: NewDonation) -> Result<Donation> {
        let query = format!(
            r#"
            INSERT INTO donations
                (amount, currency, message, streamer_id, donator_id,
                 display_name, is_anonymous, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')
            RETURNING {DONATION_COLUMNS}
            "#
        );

        let row = sqlx::query(&query)
            .bind(donation.amount)
            .bind(&donation.currency)
            .bind(&donation.message)
            .bind(donation.streamer_id)
            .bind(donation.donator_id)
            .bind(&donation.display_name)
            .bind(donation.is_anonymous)
            .fetch_one(&self.pool)
            .await?;

        donation_from_row(&row)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Donation>> {
        let query = format!("SELECT {DONATION_COLUMNS} FROM donations WHERE id = $1");

        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(donation_from_row).transpose()
    }

    async fn update_status(&self, id: i64, status: PaymentStatus) -> Result<()> {
        sqlx::query("UPDATE donations SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn mark_paid(
        &self,
        id: i64,
        transaction_id: &str,
        provider: PaymentProvider,
        paid_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE donations
            SET status = 'completed',
                transaction_id = $2,
                payment_provider = $3,
                payment_time = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(transaction_id)
        .bind(provider.as_str())
        .bind(paid_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_by_streamer(
        &self,
        streamer_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Donation>> {
        let query = format!(
            r#"
            SELECT {DONATION_COLUMNS}
            FROM donations
            WHERE streamer_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        );

        let rows = sqlx::query(&query)
            .bind(streamer_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(donation_from_row).collect()
    }
}
