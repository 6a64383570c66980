//! Donation event schema and fan-out broadcaster
//!
//! Shared between the donation workflow (producer side) and the transport
//! layer that relays live events to viewers (consumer side). Delivery is
//! at-most-once and best-effort: each subscriber owns a bounded queue and a
//! slow consumer only ever loses its own events.

pub mod broadcaster;
pub mod event;

pub use broadcaster::{BroadcastStats, EventBroadcaster, Subscription, EVENT_BUFFER_CAPACITY};
pub use event::{DonationEvent, EventType};
