//! Logging backend setup

use log::LevelFilter;

/// Inits logging for host. `RUST_LOG` overrides `level`. Safe to call more
/// than once; only the first call installs the logger.
pub fn init_logging(level: LevelFilter) {
    env_logger::Builder::new().filter(None, level).parse_default_env().try_init().ok();
    log::set_max_level(level)
}
