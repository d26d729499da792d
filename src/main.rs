use dotenvy::dotenv;
use log::{error, info};
use std::sync::Arc;

use learnserver::core::config::AppConfig;
use learnserver::core::shared::state::AppState;
use learnserver::core::shared::utils::{create_conn, redact_database_url, run_migrations};
use learnserver::learn::events::spawn_certificate_listener;
use learnserver::main_module::run_axum_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .write_style(env_logger::WriteStyle::Always)
        .init();

    let config = AppConfig::from_env()?;
    info!(
        "Starting learnserver {} with database {}",
        env!("CARGO_PKG_VERSION"),
        redact_database_url(&config.database.url)
    );

    let pool = match create_conn(&config.database) {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to create database pool: {}", e);
            return Err(e.into());
        }
    };

    if config.database.run_migrations {
        let migrate_pool = pool.clone();
        tokio::task::spawn_blocking(move || run_migrations(&migrate_pool))
            .await?
            .map_err(|e| anyhow::anyhow!("{e}"))?;
    }

    let state = Arc::new(AppState::new(pool, config));
    let listener = spawn_certificate_listener(Arc::clone(&state));

    let served = run_axum_server(state).await;
    listener.abort();
    served?;
    info!("learnserver stopped");
    Ok(())
}
