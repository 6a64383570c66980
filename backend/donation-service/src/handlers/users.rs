//! Administrative endpoints for the user cache: force a resync or evict a
//! record without waiting for the freshness window to lapse.

use std::sync::Arc;

use actix_web::{web, HttpResponse};

use crate::error::AppError;
use crate::services::UserAggregator;

/// POST /api/v1/users/{id}/refresh
pub async fn refresh_user(
    aggregator: web::Data<Arc<UserAggregator>>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let user = aggregator.refresh_user(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(user))
}

/// DELETE /api/v1/users/{id}/cache
pub async fn evict_user(
    aggregator: web::Data<Arc<UserAggregator>>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    aggregator.evict(path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/users")
            .route("/{id}/refresh", web::post().to(refresh_user))
            .route("/{id}/cache", web::delete().to(evict_user)),
    );
}
