use clap::Parser;
use tracing_subscriber::EnvFilter;

use palaver::cli::Cli;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("palaver=info")),
        )
        .init();

    if let Err(err) = Cli::parse().execute().await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
