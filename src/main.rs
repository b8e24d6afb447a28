#[cfg(not(debug_assertions))]
use mimalloc::MiMalloc;

#[cfg(not(debug_assertions))]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use clap::Parser;
use route_sync::{config, store::etcd::EtcdStore, Synchronizer};
use std::{sync::Arc, time::Duration};
use tokio::time::interval;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // initialize the logger
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // parse the command line arguments
    let args = config::cli::Cli::parse();

    // initialize the config
    match config::runtime::initialize(args.config.as_deref()) {
        Ok(_) => {
            tracing::info!("✅ Config initialized");
        }
        Err(e) => {
            tracing::error!("❌ Error initializing config: {}", e);
            std::process::exit(1);
        }
    }
    if args.test {
        // exit after testing the configuration
        tracing::info!("✅ Config is valid");
        std::process::exit(0);
    }
    let app_conf = match config::runtime::config() {
        Ok(conf) => conf,
        Err(e) => {
            tracing::error!("❌ {}", e);
            std::process::exit(1);
        }
    };

    let store = match EtcdStore::new(&app_conf.store.endpoint, app_conf.connect_timeout()) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("❌ {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!("Using store at {}", app_conf.store.endpoint);

    let sync = Synchronizer::start(Arc::new(store), &app_conf.sync_config());
    let domains = sync.domains();
    let services = sync.services();

    let mut period_60s = interval(Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down synchronizer");
                break;
            }
            _ = period_60s.tick() => {
                let snapshot = services.snapshot();
                let routable: usize = snapshot.values().map(|c| c.routable().count()).sum();
                tracing::info!(
                    "{} domains, {} services, {} routable instances",
                    domains.len(),
                    snapshot.len(),
                    routable
                );
            }
        }
    }
    sync.shutdown();
}
