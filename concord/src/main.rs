use anyhow::Context;
use clap::Parser;
use server::ServeConfig;
use tokio_util::sync::CancellationToken;

use args::Args;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logger::init(&args.log_filter);
    log::info!("Concord {}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => config::Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => config::Config::from_env()?,
    };

    let listen_address = args.listen.unwrap_or_else(|| config.server.listen_address_or_default());

    let shutdown_signal = CancellationToken::new();
    let shutdown = shutdown_signal.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("ctrl-c received, shutting down");
            shutdown.cancel();
        }
    });

    server::serve(ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        bound_addr_sender: None,
        drive: None,
    })
    .await
}
