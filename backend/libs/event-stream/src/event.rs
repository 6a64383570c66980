use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of domain event carried on the live stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DonationCreated,
    PaymentVerified,
    DonationUpdated,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::DonationCreated => "donation_created",
            EventType::PaymentVerified => "payment_verified",
            EventType::DonationUpdated => "donation_updated",
        };
        f.write_str(name)
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "donation_created" => Ok(EventType::DonationCreated),
            "payment_verified" => Ok(EventType::PaymentVerified),
            "donation_updated" => Ok(EventType::DonationUpdated),
            other => Err(format!("unknown event type: {}", other)),
        }
    }
}

/// Ephemeral donation event. Never persisted; produced by the donation
/// workflow after a successful commit and fanned out to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationEvent {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

impl DonationEvent {
    pub fn new(event_type: EventType, metadata: HashMap<String, String>) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            metadata,
        }
    }

    pub fn donation_created(
        donation_id: i64,
        streamer_id: i64,
        amount: f64,
        currency: &str,
    ) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("donation_id".to_string(), donation_id.to_string());
        metadata.insert("streamer_id".to_string(), streamer_id.to_string());
        metadata.insert("amount".to_string(), amount.to_string());
        metadata.insert("currency".to_string(), currency.to_string());
        Self::new(EventType::DonationCreated, metadata)
    }

    pub fn payment_verified(donation_id: i64, transaction_id: &str) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("donation_id".to_string(), donation_id.to_string());
        metadata.insert("transaction_id".to_string(), transaction_id.to_string());
        Self::new(EventType::PaymentVerified, metadata)
    }

    pub fn donation_updated(donation_id: i64, status: &str) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("donation_id".to_string(), donation_id.to_string());
        metadata.insert("status".to_string(), status.to_string());
        Self::new(EventType::DonationUpdated, metadata)
    }
}
