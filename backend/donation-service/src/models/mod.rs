use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// User projection fetched live from the authoritative user service.
/// Never persisted directly; only used to build or refresh a cache record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub is_streamer: bool,
    #[serde(default)]
    pub profile_pic: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// Denormalized copy of user data owned by the donation service so the
/// donation workflow never needs a cross-service join. At most one record
/// exists per `user_id`; `expires_at = last_sync_at + TTL`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CachedUser {
    pub user_id: i64,
    pub username: String,
    pub full_name: String,
    pub is_streamer: bool,
    pub profile_pic: String,
    pub is_active: bool,
    pub last_sync_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedUser {
    pub fn from_user(user: &User, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            is_streamer: user.is_streamer,
            profile_pic: user.profile_pic.clone(),
            is_active: user.is_active,
            last_sync_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn into_user(self) -> User {
        User {
            id: self.user_id,
            username: self.username,
            full_name: self.full_name,
            is_streamer: self.is_streamer,
            profile_pic: self.profile_pic,
            is_active: self.is_active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    Midtrans,
    Paypal,
    Stripe,
    Crypto,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Midtrans => "midtrans",
            PaymentProvider::Paypal => "paypal",
            PaymentProvider::Stripe => "stripe",
            PaymentProvider::Crypto => "crypto",
        }
    }
}

impl fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "midtrans" => Ok(PaymentProvider::Midtrans),
            "paypal" => Ok(PaymentProvider::Paypal),
            "stripe" => Ok(PaymentProvider::Stripe),
            "crypto" => Ok(PaymentProvider::Crypto),
            other => Err(format!("unknown payment provider: {}", other)),
        }
    }
}

/// Donation record. `donator_id` is zero for anonymous donations; user
/// rows are resolved at the application level, there is no foreign key
/// across the service boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Donation {
    pub id: i64,
    pub amount: f64,
    pub currency: String,
    pub message: String,
    pub streamer_id: i64,
    pub donator_id: i64,
    pub display_name: String,
    pub is_anonymous: bool,
    pub status: PaymentStatus,
    pub payment_provider: Option<PaymentProvider>,
    pub transaction_id: Option<String>,
    pub payment_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDonationRequest {
    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub message: String,
    pub streamer_id: i64,
    pub donator_id: Option<i64>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub is_anonymous: bool,
}

fn default_currency() -> String {
    "IDR".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessPaymentRequest {
    pub transaction_id: String,
    pub provider: PaymentProvider,
}

/// Donation enriched with whatever identity data could be resolved.
/// Enrichment is advisory: a missing `streamer`/`donator` never indicates
/// a failed donation, only that resolution was skipped or unavailable.
#[derive(Debug, Clone, Serialize)]
pub struct DonationResponse {
    #[serde(flatten)]
    pub donation: Donation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streamer: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub donator: Option<User>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_user_expiry_is_last_sync_plus_ttl() {
        let user = User {
            id: 42,
            username: "alice".into(),
            full_name: "Alice".into(),
            is_streamer: true,
            profile_pic: String::new(),
            is_active: true,
        };
        let now = Utc::now();
        let record = CachedUser::from_user(&user, now, Duration::hours(24));

        assert_eq!(record.last_sync_at, now);
        assert_eq!(record.expires_at, now + Duration::hours(24));
        assert!(!record.is_expired(now));
        assert!(!record.is_expired(record.expires_at));
        assert!(record.is_expired(record.expires_at + Duration::seconds(1)));
    }

    #[test]
    fn cached_user_converts_back_to_user() {
        let user = User {
            id: 7,
            username: "bob".into(),
            full_name: "Bob".into(),
            is_streamer: false,
            profile_pic: "pic.png".into(),
            is_active: true,
        };
        let record = CachedUser::from_user(&user, Utc::now(), Duration::hours(1));
        assert_eq!(record.into_user(), user);
    }

    #[test]
    fn payment_status_round_trips() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Completed,
            PaymentStatus::Failed,
            PaymentStatus::Refunded,
        ] {
            assert_eq!(status.as_str().parse::<PaymentStatus>(), Ok(status));
        }
    }
}
