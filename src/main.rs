mod config;
mod db;
mod envelope;
mod llm;
mod rate_limit;
mod routes;
mod services;
mod state;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()
        .expect("invalid PORT");

    let pool = db::init_pool(&database_url)
        .await
        .expect("database init failed");
    let store = Arc::new(store::PgMessageStore::new(pool));

    // Model backends are non-fatal: the service starts and reports
    // SERVICE_UNAVAILABLE until one is configured.
    let models = Arc::new(llm::catalog::ModelSet::from_env());

    let limits = config::ChatLimits::from_env();
    let rate_limiter = rate_limit::RateLimiter::new();

    // Spawn the background sweeper that evicts idle rate limit windows.
    let _sweeper = rate_limiter.start_sweeper();

    let state = state::AppState::new(store, models, rate_limiter, limits);

    let app = routes::app(state).into_make_service_with_connect_info::<SocketAddr>();
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "solace listening");
    axum::serve(listener, app).await.expect("server failed");
}
