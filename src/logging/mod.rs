// Tracing setup for the herald binary
//
// RUST_LOG wins when set; otherwise `info` for herald (or `debug` with -v)
// and `warn` for dependencies.

use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter directive for a given verbosity.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "warn,herald=debug,tower_http=debug"
    } else {
        "warn,herald=info"
    }
}

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays clean.
pub fn init_tracing(verbose: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    let console_layer = fmt::layer().with_writer(std::io::stderr).with_target(verbose);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .try_init()?;
    Ok(())
}
