use std::{path::PathBuf, str::FromStr, time::Duration};

use serde_json::Value as JsonValue;
use structopt::StructOpt;
use table_store_connector::{ConnectorConfig, Param, StoreConfig};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format `{other}`, expected `text` or `json`")),
        }
    }
}

/// Runs one statement against a REST table store and prints the result envelope as JSON.
#[derive(Debug, StructOpt)]
#[structopt(name = "table-store")]
pub struct TableStoreOpt {
    /// REST root of the table store.
    #[structopt(long, env = "TABLE_STORE_URL")]
    pub url: String,

    /// API key sent as `apikey` and bearer token.
    #[structopt(long, env = "TABLE_STORE_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// TOML file with chunk sizes, conflict columns, binary columns and join aliases.
    #[structopt(long, parse(from_os_str))]
    pub config: Option<PathBuf>,

    /// Log output format, `text` or `json`.
    #[structopt(long, default_value = "text")]
    pub log_format: LogFormat,

    /// Log every store request.
    #[structopt(long)]
    pub log_queries: bool,

    /// Request timeout in seconds.
    #[structopt(long, default_value = "30")]
    pub timeout_secs: u64,

    /// Positional parameter, as JSON. Anything that is not valid JSON is sent as a string.
    #[structopt(short = "p", long = "param")]
    pub params: Vec<String>,

    /// The statement. Read from stdin when omitted.
    pub statement: Option<String>,
}

impl TableStoreOpt {
    pub fn store_config(&self) -> table_store_connector::Result<StoreConfig> {
        Ok(StoreConfig::new(&self.url, self.api_key.clone())?.with_timeout(Duration::from_secs(self.timeout_secs)))
    }

    pub fn connector_config(&self) -> table_store_connector::Result<ConnectorConfig> {
        match &self.config {
            Some(path) => ConnectorConfig::load(path),
            None => Ok(ConnectorConfig::default()),
        }
    }

    pub fn params(&self) -> Vec<Param> {
        self.params.iter().map(|raw| parse_param(raw)).collect()
    }
}

fn parse_param(raw: &str) -> Param {
    match serde_json::from_str::<JsonValue>(raw) {
        Ok(value) => Param::Json(value),
        Err(_) => Param::from(raw),
    }
}
