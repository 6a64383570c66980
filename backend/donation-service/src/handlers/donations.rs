//! Donation REST endpoints.

use std::sync::Arc;

use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::error::AppError;
use crate::models::{CreateDonationRequest, PaymentStatus, ProcessPaymentRequest};
use crate::services::DonationService;

#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: PaymentStatus,
}

/// POST /api/v1/donations
pub async fn create_donation(
    service: web::Data<Arc<DonationService>>,
    body: web::Json<CreateDonationRequest>,
) -> Result<HttpResponse, AppError> {
    let response = service.create_donation(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(response))
}

/// GET /api/v1/donations/{id}
pub async fn get_donation(
    service: web::Data<Arc<DonationService>>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let response = service.get_donation(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// POST /api/v1/donations/{id}/payment
pub async fn process_payment(
    service: web::Data<Arc<DonationService>>,
    path: web::Path<i64>,
    body: web::Json<ProcessPaymentRequest>,
) -> Result<HttpResponse, AppError> {
    let response = service
        .process_payment(path.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(response))
}

/// POST /api/v1/donations/{id}/status
pub async fn update_status(
    service: web::Data<Arc<DonationService>>,
    path: web::Path<i64>,
    body: web::Json<UpdateStatusRequest>,
) -> Result<HttpResponse, AppError> {
    service
        .update_status(path.into_inner(), body.status)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

/// GET /api/v1/donations/streamer/{id}
pub async fn list_by_streamer(
    service: web::Data<Arc<DonationService>>,
    path: web::Path<i64>,
    query: web::Query<Pagination>,
) -> Result<HttpResponse, AppError> {
    let donations = service
        .list_by_streamer(
            path.into_inner(),
            query.page.unwrap_or(1),
            query.page_size.unwrap_or(20),
        )
        .await?;
    Ok(HttpResponse::Ok().json(donations))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/donations")
            .route("", web::post().to(create_donation))
            .route("/streamer/{id}", web::get().to(list_by_streamer))
            .route("/{id}", web::get().to(get_donation))
            .route("/{id}/payment", web::post().to(process_payment))
            .route("/{id}/status", web::post().to(update_status)),
    );
}
