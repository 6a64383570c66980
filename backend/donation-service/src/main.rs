use actix_web::{middleware, web, App, HttpServer};
use donation_service::cache::PgUserCacheStore;
use donation_service::clients::HttpUserServiceClient;
use donation_service::db::PgDonationRepository;
use donation_service::handlers::{donations, events, users};
use donation_service::{metrics, Config, DonationService, UserAggregator};
use event_stream::EventBroadcaster;
use sqlx::postgres::PgPoolOptions;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn startup_error(err: impl ToString) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting donation service");

    let config = Config::from_env().map_err(startup_error)?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .map_err(startup_error)?;
    tracing::info!("Successfully connected to database");

    sqlx::migrate!().run(&pool).await.map_err(startup_error)?;

    let user_client = HttpUserServiceClient::new(
        &config.user_service.base_url,
        Duration::from_secs(config.user_service.timeout_secs),
    )
    .map_err(startup_error)?;

    let aggregator = Arc::new(UserAggregator::new(
        Arc::new(PgUserCacheStore::new(pool.clone())),
        Arc::new(user_client),
        chrono::Duration::hours(config.cache.user_ttl_hours),
    ));

    let broadcaster = EventBroadcaster::new();
    let donation_service = Arc::new(DonationService::new(
        Arc::new(PgDonationRepository::new(pool.clone())),
        aggregator.clone(),
        broadcaster.clone(),
    ));
    tracing::info!("Event broadcaster and donation workflow initialized");

    let addr = format!("0.0.0.0:{}", config.app.port);
    tracing::info!("Starting HTTP server on {}", addr);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(donation_service.clone()))
            .app_data(web::Data::new(aggregator.clone()))
            .app_data(web::Data::new(broadcaster.clone()))
            .wrap(middleware::Logger::default())
            .wrap(metrics::MetricsMiddleware)
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .configure(|cfg| {
                donations::register_routes(cfg);
                events::register_routes(cfg);
                users::register_routes(cfg);
            })
    })
    .bind(&addr)?
    .run()
    .await
}
