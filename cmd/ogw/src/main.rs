use ogw_core::util::config::Config;
use ogw_core::util::shutdown::shutdown_signal;
use ogw_core::{api, obs};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load()?;
    let metrics = obs::Metrics::new();
    let state = api::AppState::new(config, metrics).await?;

    let servers = api::build_servers(state)?;
    tokio::select! {
        _ = servers.run_all() => {},
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}
