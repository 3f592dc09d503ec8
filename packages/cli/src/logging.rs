// ABOUTME: tracing subscriber setup for the kl binary
// ABOUTME: RUST_LOG wins, otherwise warnings only (debug with --verbose)

use tracing_subscriber::EnvFilter;

pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "klbox_engine=debug,klbox_cli=debug,info"
    } else {
        "warn"
    }
}

/// Install the global subscriber writing to stderr
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    // A second init (tests) is not an error worth reporting
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
