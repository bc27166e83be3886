use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Build the filter: `RUST_LOG` wins, then the given level.
fn env_filter(level: &str) -> Result<EnvFilter> {
    let from_env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    build_filter(from_env.as_deref(), level)
}

/// Valid `directives` win; otherwise `level` must parse.
fn build_filter(directives: Option<&str>, level: &str) -> Result<EnvFilter> {
    if let Some(Ok(filter)) = directives.map(EnvFilter::try_new) {
        return Ok(filter);
    }
    EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}"))
}

/// Initialize logging, either as JSON lines or as console-friendly output.
pub fn init_tracing_with_config(level: &str, json_format: bool) -> Result<()> {
    let env_filter = env_filter(level)?;

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    if json_format {
        Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(false)
                    .with_span_list(false),
            )
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.compact().with_ansi(true))
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
    }

    tracing::debug!(level, json_format, "devgate logging initialized");
    Ok(())
}
