use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Initialize logging from the `[logging]` section.
///
/// `RUST_LOG` takes precedence over the configured level when set.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .wrap_err_with(|| format!("Invalid log level: {}", config.level))?,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if config.json {
        Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(config.include_spans)
                    .with_span_list(config.include_spans),
            )
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
    }

    tracing::info!(
        level = %config.level,
        json = config.json,
        spans = config.include_spans,
        "Fleet gateway logging initialized"
    );
    Ok(())
}

/// Span for one listener's accept loop
pub fn listener_span(name: &str, protocols: &str) -> tracing::Span {
    tracing::info_span!("listener", listener.name = name, listener.protocols = protocols)
}

/// Span for one accepted TCP connection
pub fn connection_span(listener: &str, peer: &str) -> tracing::Span {
    tracing::info_span!(
        "connection",
        listener.name = listener,
        net.peer = peer,
        protocol = tracing::field::Empty,
        backend = tracing::field::Empty,
    )
}
