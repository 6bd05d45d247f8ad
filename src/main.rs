//! spade CLI: converge YAML scripts locally or over SSH.

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "spade",
    disable_version_flag = true,
    about = "Declarative configuration convergence: assert, then rectify, locally or over SSH"
)]
struct Cli {
    #[command(flatten)]
    options: spade::cli::Options,
}

fn init_logging(debug: bool) {
    let fallback = if debug { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_env("SPADE_LOG").unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.options.debug);
    if let Err(e) = spade::cli::dispatch(&cli.options).await {
        spade::cli::report_failure(&cli.options, &e);
        std::process::exit(1);
    }
}
