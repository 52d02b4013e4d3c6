//! wpforge CLI — provision sandboxed WordPress sites from blueprints.

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "wpforge",
    version,
    about = "Blueprint provisioning for sandboxed WordPress sites — plugins, themes, persistent mounts"
)]
struct Cli {
    #[command(subcommand)]
    command: wpforge::cli::Commands,
}

fn main() {
    let filter = EnvFilter::try_from_env("WPFORGE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = wpforge::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
