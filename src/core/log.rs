//! Tracing setup for the CLI. Logs go to stderr so command output stays clean.

use anyhow::{Context, Result};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const APP_TARGET: &str = env!("CARGO_CRATE_NAME");

/// Level of this crate's own events. Warnings always show, so a failed
/// backfill or sweep is visible without `--verbose`.
fn app_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    }
}

/// Builds the filter from `RUST_LOG` when set, otherwise from `verbose`.
/// Other crates stay silent unless `RUST_LOG` names them.
fn build_filter(verbose: bool, rust_log: Option<&str>) -> Result<EnvFilter> {
    let builder = EnvFilter::builder().with_default_directive(LevelFilter::OFF.into());
    match rust_log {
        Some(directives) => builder
            .parse(directives)
            .with_context(|| format!("Invalid RUST_LOG: {directives}")),
        None => Ok(builder.parse_lossy(format!("{APP_TARGET}={}", app_level(verbose)))),
    }
}

/// Installs the global subscriber. Fails on a malformed `RUST_LOG` or when a
/// subscriber is already set.
pub fn init_logging(verbose: bool) -> Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(verbose, rust_log.as_deref())?;

    let detailed = verbose.then(|| {
        fmt::layer()
            .pretty()
            .without_time()
            .with_writer(std::io::stderr)
    });
    let terse = (!verbose).then(|| {
        fmt::layer()
            .compact()
            .without_time()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(detailed)
        .with(terse)
        .try_init()
        .context("Failed to install log subscriber")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_target_is_crate_name() {
        assert_eq!(APP_TARGET, "finbot");
    }

    #[test]
    fn test_verbose_flag_sets_app_level() {
        let quiet = build_filter(false, None).unwrap();
        let verbose = build_filter(true, None).unwrap();

        assert_eq!(quiet.max_level_hint(), Some(LevelFilter::WARN));
        assert_eq!(verbose.max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn test_rust_log_overrides_verbose_flag() {
        let filter = build_filter(false, Some("finbot=trace")).unwrap();

        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));
    }

    #[test]
    fn test_malformed_rust_log_is_an_error() {
        let err = build_filter(true, Some("finbot=loud")).unwrap_err();

        assert!(err.to_string().contains("Invalid RUST_LOG"), "{err}");
    }
}
