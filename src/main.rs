use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vizor_api::infra::cleanup::spawn_token_cleanup;
use vizor_api::infra::db::connect;
use vizor_api::routes;
use vizor_api::security::config::SecurityConfig;
use vizor_api::security::jwt::JwtManager;
use vizor_api::security::provider::IdentityProvider;
use vizor_api::state::AppState;
use vizor_api::store::{CredentialStore, PgStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db = connect().await?;
    sqlx::migrate!().run(&db).await?;

    let store: Arc<dyn CredentialStore> = Arc::new(PgStore::new(db.clone()));
    let jwt = JwtManager::default();
    let security = SecurityConfig::default();
    let provider = IdentityProvider::from_env()?;
    let cleanup_interval = Duration::from_secs(security.cleanup_interval_secs);
    let state = AppState::new(db, store.clone(), jwt, security, provider);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cleanup = spawn_token_cleanup(store, cleanup_interval, shutdown_rx);

    let app = routes::router(state.clone())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    shutdown_tx.send(true).ok();
    cleanup.await.ok();
    Ok(())
}
