#![forbid(unsafe_code)]

use tracing_subscriber::EnvFilter;

fn main() {
    let filter =
        EnvFilter::try_from_env("FTUI_REGTEST_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = ftui_regtest::run_from_env() {
        if !matches!(error, ftui_regtest::RegtestError::Mismatch { .. }) {
            eprintln!("{error}");
        }
        std::process::exit(error.exit_code());
    }
}
