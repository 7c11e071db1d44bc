use anyhow::anyhow;
use tracing::Subscriber;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;

use crate::configs::{AppConfig, LogFormat};

const DEFAULT_LOG_LEVEL: &str = "info";

/// Install the global subscriber. Events go to stderr so the artifact summary
/// on stdout stays clean.
pub fn init(config: &AppConfig, cli_level_override: Option<&str>) -> anyhow::Result<()> {
    let subscriber = build_subscriber(config, cli_level_override, std::io::stderr)?;
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| anyhow!("initialize logging subscriber: {err}"))?;

    Ok(())
}

fn build_subscriber<W>(
    config: &AppConfig,
    cli_level_override: Option<&str>,
    writer: W,
) -> anyhow::Result<Box<dyn Subscriber + Send + Sync>>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let log_level = resolve_log_level(config, cli_level_override)?;

    let subscriber: Box<dyn Subscriber + Send + Sync> = match resolve_log_format(config) {
        LogFormat::Json => Box::new(
            tracing_subscriber::fmt()
                .with_max_level(log_level)
                .with_target(true)
                .with_writer(writer)
                .json()
                .finish(),
        ),
        LogFormat::Pretty => Box::new(
            tracing_subscriber::fmt()
                .with_max_level(log_level)
                .with_target(false)
                .with_writer(writer)
                .compact()
                .finish(),
        ),
    };
    Ok(subscriber)
}

fn resolve_log_level(
    config: &AppConfig,
    cli_level_override: Option<&str>,
) -> anyhow::Result<LevelFilter> {
    let raw_level = cli_level_override
        .or(config.logging.level.as_deref())
        .unwrap_or(DEFAULT_LOG_LEVEL);
    let normalized = raw_level.trim().to_ascii_lowercase();

    normalized.parse::<LevelFilter>().map_err(|_| {
        anyhow!(
            "invalid log level `{raw_level}`; expected one of trace, debug, info, warn, error, off"
        )
    })
}

fn resolve_log_format(config: &AppConfig) -> LogFormat {
    config.logging.format.unwrap_or(LogFormat::Pretty)
}
