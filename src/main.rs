use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use secrecy::ExposeSecret;
use sqlx::postgres::PgPoolOptions;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use utsav_entitlements::adapters::http::entitlement::{entitlement_router, EntitlementAppState};
use utsav_entitlements::adapters::postgres::PostgresEntitlementStore;
use utsav_entitlements::adapters::razorpay::{RazorpayConfig, RazorpayGateway};
use utsav_entitlements::application::handlers::SweepExpiryHandler;
use utsav_entitlements::config::AppConfig;
use utsav_entitlements::domain::entitlement::PaymentSignatureVerifier;
use utsav_entitlements::ports::{EntitlementStore, PaymentGateway};

#[tokio::main]
async fn main() {
    // --- Configuration ---
    let config = AppConfig::load().expect("Failed to load configuration");

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate().expect("Invalid configuration");
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        test_mode = config.gateway.is_test_mode(),
        "Loaded configuration"
    );

    // --- Database ---
    let pool = PgPoolOptions::new()
        .min_connections(config.database.min_connections)
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout())
        .idle_timeout(config.database.idle_timeout())
        .connect(&config.database.url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    if config.database.run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run database migrations");
        tracing::info!("Database migrations applied");
    }

    // --- Payment gateway ---
    let gateway_config = RazorpayConfig::new(
        config.gateway.key_id.clone(),
        config.gateway.key_secret.expose_secret().to_string(),
    )
    .with_base_url(config.gateway.api_base_url.clone());
    let gateway: Arc<dyn PaymentGateway> =
        Arc::new(RazorpayGateway::new(gateway_config).expect("Failed to build gateway client"));

    // --- App state ---
    let store: Arc<dyn EntitlementStore> = Arc::new(PostgresEntitlementStore::new(pool));
    let signature_verifier = Arc::new(PaymentSignatureVerifier::new(
        config.gateway.key_secret.clone(),
    ));
    let state = EntitlementAppState {
        store: store.clone(),
        gateway,
        signature_verifier,
        intent_ttl_secs: config.gateway.intent_ttl_secs,
    };

    // --- Background expiry sweep ---
    let sweep_interval = Duration::from_secs(config.gateway.sweep_interval_secs);
    let sweep_store = store.clone();
    tokio::spawn(async move {
        let handler = SweepExpiryHandler::new(sweep_store);
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(error) = handler.run().await {
                tracing::error!(%error, "Expiry sweep failed");
            }
        }
    });

    // --- Router ---
    let app = Router::new()
        .nest("/api", Router::new().merge(entitlement_router()))
        .layer(
            tower::ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(
                    config.server.request_timeout_secs,
                ))),
        )
        .with_state(state);

    // --- Serve ---
    let addr = config
        .server
        .socket_addr()
        .expect("Invalid server bind address");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind server address");
    tracing::info!(%addr, "Server listening");

    axum::serve(listener, app)
        .await
        .expect("Server terminated unexpectedly");
}
