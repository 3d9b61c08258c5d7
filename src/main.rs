mod cli;

use crate::cli::app::{App, Cli};
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // clap reads STAFFING_* through `env`, so `.env` must be loaded before parsing
    dotenvy::dotenv().ok();
    init_tracing();

    let app = App::new(Cli::parse())?;
    app.run().await
}

fn init_tracing() {
    // stdout carries JSON results, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("staffing_profiles=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
