use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use washbook::config::AppConfig;
use washbook::db;
use washbook::routes;
use washbook::services::invoicing::http::HttpInvoiceIssuer;
use washbook::services::payments::mercadopago::MercadoPagoProvider;
use washbook::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    if config.mercadopago_access_token.is_empty() {
        tracing::warn!("MERCADOPAGO_ACCESS_TOKEN not set, payment lookups will fail");
    }
    if config.mercadopago_webhook_secret.is_empty() {
        tracing::warn!("MERCADOPAGO_WEBHOOK_SECRET not set, webhook signatures are not verified");
    }
    if config.admin_token == "changeme" {
        tracing::warn!("ADMIN_TOKEN is the default value, set it before exposing the admin API");
    }

    let payments = MercadoPagoProvider::new(
        config.mercadopago_api_url.clone(),
        config.mercadopago_access_token.clone(),
    )?;
    let invoices = HttpInvoiceIssuer::new(
        config.invoice_service_url.clone(),
        config.invoice_service_token.clone(),
    )?;
    if config.invoice_service_url.is_empty() {
        tracing::info!("INVOICE_SERVICE_URL not set, invoices are only logged");
    }

    let (events_tx, _) = broadcast::channel(256);

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        payments: Box::new(payments),
        invoices: Box::new(invoices),
        events_tx,
    });

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
