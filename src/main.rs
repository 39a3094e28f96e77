mod args;

use std::path::Path;
use std::process::exit;
use std::sync::Arc;

use args::Args;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rdhcpd=debug".parse().unwrap()),
        )
        .init();

    let Args { cfg } = Args::parse_args();
    let cfgfile = Path::new(&cfg);
    if !cfgfile.exists() {
        error!(path = %cfg, "config file not found");
        exit(1);
    }

    let config = match rdhcpd::config::read_config(&cfg) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "configuration error at startup");
            exit(1);
        }
    };

    let store = rdhcpd::lease_store::LeaseStore::open(&config.lease_db_path)?;

    if let Some(ref path) = config.static_reservations_file {
        match rdhcpd::static_reservations::load_into(&store, path) {
            Ok(n) => info!(count = n, path = %path, "loaded static reservations"),
            Err(e) => error!(error = %e, path = %path, "failed to load static reservations"),
        }
    }

    info!(lease_seconds = config.lease_seconds, pool = %config.pool_cidr, "rdhcpd starting");

    rdhcpd::server::run(config, store).await?;

    Ok(())
}
