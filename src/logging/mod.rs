use crate::cli::TracingFormat;
use crate::config::Config;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::JsonFields;

/// Configure and initialize logging for the application.
pub fn setup_logging(config: &Config, tracing_format: TracingFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let base_level = &config.log_level;
        EnvFilter::new(format!("warn,talktime={base_level}"))
    });

    let subscriber_builder = tracing_subscriber::fmt().with_target(true).with_env_filter(filter);

    match tracing_format {
        TracingFormat::Pretty => {
            subscriber_builder.pretty().init();
        }
        TracingFormat::Json => {
            subscriber_builder.json().fmt_fields(JsonFields::new()).init();
        }
    }
}
