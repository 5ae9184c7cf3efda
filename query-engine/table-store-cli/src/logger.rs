use tracing::subscriber;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt};

use crate::opt::LogFormat;

/// An installer for the global logger.
#[derive(Debug, Clone)]
pub struct Logger {
    log_format: LogFormat,
    log_queries: bool,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger {
    pub fn new() -> Self {
        Self {
            log_format: LogFormat::Text,
            log_queries: false,
        }
    }

    /// Sets the STDERR log output format. Default: Text.
    pub fn log_format(&mut self, log_format: LogFormat) {
        self.log_format = log_format;
    }

    /// Enable store request logging. Default: false.
    pub fn log_queries(&mut self, log_queries: bool) {
        self.log_queries = log_queries;
    }

    /// Installs the logger as the global default. Can be called only once per process.
    pub fn install(&self) -> anyhow::Result<()> {
        let level = std::env::var("TABLE_STORE_LOG_LEVEL").ok();
        let filter = create_env_filter(level.as_deref(), self.log_queries)?;

        let fmt_layer = match self.log_format {
            LogFormat::Text => tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter)
                .boxed(),
            LogFormat::Json => tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_filter(filter)
                .boxed(),
        };

        subscriber::set_global_default(tracing_subscriber::registry().with(fmt_layer))?;

        Ok(())
    }
}

fn create_env_filter(level: Option<&str>, log_queries: bool) -> anyhow::Result<EnvFilter> {
    let mut filter = EnvFilter::from_default_env()
        .add_directive("hyper=error".parse()?)
        .add_directive("reqwest=error".parse()?);

    if let Some(level) = level {
        // The binary's crate name, not the package name.
        filter = filter
            .add_directive(format!("table_store_connector={level}").parse()?)
            .add_directive(format!("{}={level}", env!("CARGO_CRATE_NAME")).parse()?);
    }

    if log_queries {
        filter = filter.add_directive("table_store_connector::query=debug".parse()?);
    }

    Ok(filter)
}
