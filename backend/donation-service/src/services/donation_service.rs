//! Donation orchestration: validate identities through the aggregator,
//! persist, enrich the response best-effort, then fan the event out.

use std::sync::Arc;

use chrono::Utc;
use event_stream::{DonationEvent, EventBroadcaster};
use tracing::{debug, warn};

use crate::db::{DonationRepository, NewDonation};
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::{
    CreateDonationRequest, Donation, DonationResponse, PaymentStatus, ProcessPaymentRequest, User,
};
use crate::services::UserAggregator;

pub struct DonationService {
    repo: Arc<dyn DonationRepository>,
    users: Arc<UserAggregator>,
    broadcaster: EventBroadcaster,
}

impl DonationService {
    pub fn new(
        repo: Arc<dyn DonationRepository>,
        users: Arc<UserAggregator>,
        broadcaster: EventBroadcaster,
    ) -> Self {
        Self {
            repo,
            users,
            broadcaster,
        }
    }

    /// Create a donation.
    ///
    /// Identity validation is fatal; enrichment and the event broadcast
    /// are not. There is no transaction spanning persistence and the
    /// broadcast: once the donation is committed, nothing rolls it back.
    pub async fn create_donation(&self, req: CreateDonationRequest) -> Result<DonationResponse> {
        if req.amount <= 0.0 {
            return Err(AppError::Validation(
                "donation amount must be greater than zero".into(),
            ));
        }
        if req.streamer_id == 0 {
            return Err(AppError::Validation("streamer id is required".into()));
        }

        self.users
            .validate_user(req.streamer_id, true)
            .await
            .map_err(|err| AppError::StreamerInvalid(err.to_string()))?;

        let donator_id = req.donator_id.unwrap_or(0);
        if !req.is_anonymous {
            if donator_id == 0 {
                return Err(AppError::DonatorInvalid(
                    "donator id is required for non-anonymous donations".into(),
                ));
            }
            self.users
                .validate_user(donator_id, false)
                .await
                .map_err(|err| AppError::DonatorInvalid(err.to_string()))?;
        }

        let donation = self
            .repo
            .create(NewDonation {
                amount: req.amount,
                currency: req.currency,
                message: req.message,
                streamer_id: req.streamer_id,
                donator_id,
                display_name: req.display_name,
                is_anonymous: req.is_anonymous,
            })
            .await?;

        self.publish(DonationEvent::donation_created(
            donation.id,
            donation.streamer_id,
            donation.amount,
            &donation.currency,
        ));

        Ok(self.enrich(donation).await)
    }

    pub async fn get_donation(&self, id: i64) -> Result<DonationResponse> {
        let donation = self
            .repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("donation {} not found", id)))?;

        Ok(self.enrich(donation).await)
    }

    /// Record a completed payment and notify subscribers.
    pub async fn process_payment(
        &self,
        id: i64,
        req: ProcessPaymentRequest,
    ) -> Result<DonationResponse> {
        let donation = self
            .repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("donation {} not found", id)))?;

        self.repo
            .mark_paid(donation.id, &req.transaction_id, req.provider, Utc::now())
            .await?;

        self.publish(DonationEvent::payment_verified(
            donation.id,
            &req.transaction_id,
        ));

        self.get_donation(id).await
    }

    pub async fn update_status(&self, id: i64, status: PaymentStatus) -> Result<()> {
        if self.repo.get_by_id(id).await?.is_none() {
            return Err(AppError::NotFound(format!("donation {} not found", id)));
        }
        self.repo.update_status(id, status).await?;

        self.publish(DonationEvent::donation_updated(id, status.as_str()));
        Ok(())
    }

    pub async fn list_by_streamer(
        &self,
        streamer_id: i64,
        page: i64,
        page_size: i64,
    ) -> Result<Vec<DonationResponse>> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 100);
        let offset = (page - 1).saturating_mul(page_size);
        let donations = self
            .repo
            .list_by_streamer(streamer_id, offset, page_size)
            .await?;

        let mut responses = Vec::with_capacity(donations.len());
        for donation in donations {
            responses.push(self.enrich(donation).await);
        }
        Ok(responses)
    }

    /// Fire-and-forget after commit. A full subscriber queue is a drop,
    /// not an error; the publisher never fails because of subscriber
    /// state.
    fn publish(&self, event: DonationEvent) {
        let stats = self.broadcaster.broadcast(&event);
        metrics::record_events_broadcast(stats.delivered, stats.dropped);
        debug!(
            event_type = %event.event_type,
            delivered = stats.delivered,
            dropped = stats.dropped,
            "donation event broadcast"
        );
    }

    /// Attach resolved display data. Advisory only: a resolution failure
    /// is logged and the donation goes out without that projection.
    async fn enrich(&self, donation: Donation) -> DonationResponse {
        let streamer = self.resolve_display_user(donation.streamer_id).await;
        let donator = if donation.donator_id > 0 && !donation.is_anonymous {
            self.resolve_display_user(donation.donator_id).await
        } else {
            None
        };

        DonationResponse {
            donation,
            streamer,
            donator,
        }
    }

    async fn resolve_display_user(&self, user_id: i64) -> Option<User> {
        match self.users.get_user(user_id).await {
            Ok(user) => Some(user),
            Err(err) => {
                warn!(user_id, error = %err, "could not resolve user for display data");
                None
            }
        }
    }
}
