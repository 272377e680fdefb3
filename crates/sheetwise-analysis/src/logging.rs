//! Tracing subscriber setup

use sheetwise_config::LoggingConfig;
use tracing::Level;

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install a stderr fmt subscriber at the configured level
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_logging(config: &LoggingConfig) -> bool {
    use tracing_subscriber::fmt;

    fmt()
        .with_max_level(parse_level(&config.level))
        .with_target(config.verbose)
        .with_thread_ids(config.verbose)
        .with_file(config.verbose)
        .with_line_number(config.verbose)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("warn"), Level::WARN);
        assert_eq!(parse_level("loud"), Level::INFO);
    }

    #[test]
    fn test_repeated_init_is_harmless() {
        let config = LoggingConfig::default();
        init_logging(&config);
        assert!(!init_logging(&config));
    }
}
