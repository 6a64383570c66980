pub mod donation_service;
pub mod user_aggregator;

pub use donation_service::DonationService;
pub use user_aggregator::UserAggregator;
