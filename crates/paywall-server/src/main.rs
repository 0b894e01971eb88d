use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod payment;
mod server;

use config::ServerConfig;
use payment::TrustUpstream;
use server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "paywall_server=info,grant_store=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting x402 paywall");

    dotenvy::dotenv().ok();
    let config = ServerConfig::from_env()?;

    info!("Pay to: {}", config.pay_to);
    info!("Network: {}", config.network);
    info!("Price: {}", config.display_price());
    info!("Facilitator: {}", config.facilitator_url);
    if config.development {
        info!("Development mode: CORS restrictions disabled");
    }

    let sweep_interval_secs = config.sweep_interval_secs;
    let state = Arc::new(AppState::new(config, Arc::new(TrustUpstream)));

    if sweep_interval_secs > 0 {
        let sweep_state = state.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(sweep_interval_secs));
            loop {
                interval.tick().await;
                let (wallets, sessions) = sweep_state.purge_expired(Utc::now());
                if wallets + sessions > 0 {
                    info!(
                        "Purged {} wallet grants and {} session grants",
                        wallets, sessions
                    );
                }
            }
        });
        info!("Purging dead grants every {}s", sweep_interval_secs);
    }

    server::run(state).await?;
    Ok(())
}
