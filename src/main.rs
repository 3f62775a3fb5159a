use clap::Parser;
use tracing_subscriber::EnvFilter;

use fz::commands::{self, Cli};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = commands::run(cli).await {
        eprintln!("Error: {err}");
        if let Some(hint) = err.hint() {
            eprintln!("Hint: {hint}");
        }
        std::process::exit(err.exit_code());
    }
}
