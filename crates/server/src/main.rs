// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use tymbal_server::config::ServerConfig;

#[derive(Parser)]
#[command(name = "tymbal-server", version, about = "Control-plane hub for Tymbal agents.")]
struct Cli {
    #[command(flatten)]
    config: ServerConfig,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = tymbal_server::run(cli.config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
