use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Maps `-v`/`-q` counts onto a level: warn with `-q`, info by default,
/// debug with `-v` and trace with `-vv` or more.
pub fn level(verbose: u8, quiet: bool) -> Level {
    match (quiet, verbose) {
        (true, _) => Level::WARN,
        (false, 0) => Level::INFO,
        (false, 1) => Level::DEBUG,
        (false, _) => Level::TRACE,
    }
}

/// Installs a stderr fmt subscriber for this crate's events. The level comes
/// from the command line only, the environment is not consulted.
pub fn init_tracing(level: Level) {
    let filter = EnvFilter::new(format!("widescreen={level},convert={level},fetch={level}"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
