//! Live donation event stream.
//!
//! The SSE response owns the subscription: when the client disconnects,
//! actix drops the stream, the subscription handle drops with it and the
//! broadcaster entry is cleaned up.

use std::collections::HashSet;

use actix_web::{web, HttpResponse};
use event_stream::{EventBroadcaster, EventType};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct SubscribeQuery {
    /// Comma-separated event types, e.g. `donation_created,payment_verified`.
    /// Absent or empty means all event types.
    pub types: Option<String>,
}

fn parse_event_types(raw: Option<&str>) -> Result<Option<HashSet<EventType>>, AppError> {
    let raw = match raw {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return Ok(None),
    };

    let mut types = HashSet::new();
    for part in raw.split(',') {
        let event_type = part
            .trim()
            .parse::<EventType>()
            .map_err(AppError::Validation)?;
        types.insert(event_type);
    }
    Ok(Some(types))
}

/// GET /api/v1/events/{user_id}
pub async fn subscribe_events(
    path: web::Path<i64>,
    query: web::Query<SubscribeQuery>,
    broadcaster: web::Data<EventBroadcaster>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    let filter = parse_event_types(query.types.as_deref())?;

    let subscription = broadcaster.subscribe(user_id, filter);
    debug!(user_id, "event stream opened");

    let body = subscription.map(|event| {
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok::<_, actix_web::Error>(web::Bytes::from(format!(
            "event: {}\ndata: {}\n\n",
            event.event_type, payload
        )))
    });

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(body))
}

/// GET /api/v1/events/status/{user_id}
pub async fn subscription_status(
    path: web::Path<i64>,
    broadcaster: web::Data<EventBroadcaster>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    let active = broadcaster.user_subscription_count(user_id);

    Ok(HttpResponse::Ok().json(json!({
        "user_id": user_id,
        "subscribed": active > 0,
        "active_subscriptions": active,
        "total_subscriptions": broadcaster.subscriber_count(),
    })))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/events")
            .route("/status/{user_id}", web::get().to(subscription_status))
            .route("/{user_id}", web::get().to(subscribe_events)),
    );
}
