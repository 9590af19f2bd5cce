use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Initialize structured logging. Quiet by default so log lines do not
/// interleave with the chat transcript; `--verbose` opens it up.
pub fn init(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}
