use clap::Parser;
use std::path::PathBuf;

/// Mirrors proxy routing configuration from etcd into memory
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Runtime config file, defaults to $ROUTE_SYNC_CONF or .config/route_sync.yaml
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Check the configuration and exit
    #[arg(short = 't', long, default_value_t = false)]
    pub test: bool,
}
