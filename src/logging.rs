//! Log sink setup for the binary
//!
//! The library only talks to the `log` facade. This installs `env_logger`
//! with the configured level (`RUST_LOG` still wins) writing to stderr, or
//! appending to a log file.

use crate::config::LoggingConfig;
use crate::error::ScanError;
use env_logger::{Builder, Env, Target};
use std::fs::OpenOptions;
use std::io::Write;

/// Map `-v` repetitions onto a level name, keeping the configured one at zero
pub fn level_for_verbosity(configured: &str, verbose: u8) -> String {
    match verbose {
        0 => configured.to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Install the global logger; fails if one is already installed
pub fn init_logging(config: &LoggingConfig) -> crate::Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or(config.level.as_str()));

    if let Some(path) = &config.file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                ScanError::Config(format!("Cannot open log file {}: {}", path.display(), e))
            })?;

        builder
            .target(Target::Pipe(Box::new(file)))
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{} [{}] {}: {}",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    record.target(),
                    record.args()
                )
            });
    } else {
        builder.format_timestamp_secs();
    }

    builder
        .try_init()
        .map_err(|e| ScanError::Config(format!("Logger already initialised: {}", e)))
}
