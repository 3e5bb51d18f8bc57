//! Logging setup
//!
//! Priority: `RUST_LOG` > config `log_level` > `--verbose` > default "warn".
//! Logs go to stderr so stdout carries only operator output.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const VERBOSE_FILTER: &str = "warn,llrefine_core=debug,llrefine_agent=debug";
const DEFAULT_FILTER: &str = "warn";

/// Filter directive used when `RUST_LOG` is not set.
pub fn default_directive(log_level: Option<&str>, verbose: bool) -> String {
    match log_level {
        Some(level) => level.to_string(),
        None if verbose => VERBOSE_FILTER.to_string(),
        None => DEFAULT_FILTER.to_string(),
    }
}

pub fn init(log_level: Option<&str>, verbose: bool) {
    let directive = default_directive(log_level, verbose);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_priority() {
        assert_eq!(default_directive(Some("info"), true), "info");
        assert_eq!(default_directive(None, true), VERBOSE_FILTER);
        assert_eq!(default_directive(None, false), "warn");
    }
}
