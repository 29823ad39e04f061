//! Diagnostic logging for the command-line tool.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "confab=debug"
    } else {
        "confab=info"
    }
}

/// Install a stderr subscriber honouring `RUST_LOG`. Calling it twice is
/// harmless; the second call keeps the first subscriber.
pub fn init_tracing(verbose: bool) {
    let _ = tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose))),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
