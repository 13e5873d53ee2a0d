use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// Multi-model consensus chat server.
#[derive(Debug, Parser)]
#[command(name = "concord", version)]
pub(crate) struct Args {
    /// Path to the concord.toml configuration file. Environment keys
    /// overlay the file either way.
    #[arg(short, long, env = "CONCORD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration.
    #[arg(short, long, env = "CONCORD_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Log filter, e.g. "info" or "server=debug,consensus=debug".
    #[arg(long, env = "CONCORD_LOG", default_value = "info")]
    pub log_filter: String,
}
