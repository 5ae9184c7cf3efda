use std::{collections::HashMap, path::Path, time::Duration};

use serde::Deserialize;
use url::Url;

use crate::Error;

/// Tunables of the translation layer. Everything has a default, so an empty TOML document is a
/// valid configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectorConfig {
    /// Maximum number of keys sent in one `in.(..)` filter.
    pub chunk_size: usize,
    /// Page size used when enumerating identifiers for an unconditional delete.
    pub delete_page_size: usize,
    /// Primary key column, shared by every table.
    pub primary_key: String,
    /// Table name to the column that identifies an existing row during an upsert.
    pub conflict_columns: HashMap<String, String>,
    /// Table name to the columns holding binary payloads.
    pub binary_columns: HashMap<String, Vec<String>>,
    /// Join aliases whose columns are also flattened without the table prefix.
    pub bare_column_aliases: Vec<String>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            delete_page_size: 1000,
            primary_key: "id".to_owned(),
            conflict_columns: HashMap::from([("settings".to_owned(), "key".to_owned())]),
            binary_columns: HashMap::new(),
            bare_column_aliases: vec!["c".to_owned(), "j".to_owned(), "u".to_owned()],
        }
    }
}

impl ConnectorConfig {
    pub fn from_toml(source: &str) -> crate::Result<Self> {
        let config: ConnectorConfig = toml::from_str(source).map_err(|err| Error::Config(err.to_string()))?;
        config.validate()?;

        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("cannot read {}: {err}", path.display())))?;

        Self::from_toml(&source)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("`chunk_size` must be at least 1".into()));
        }

        if self.delete_page_size == 0 {
            return Err(Error::Config("`delete_page_size` must be at least 1".into()));
        }

        if self.primary_key.is_empty() {
            return Err(Error::Config("`primary_key` must not be empty".into()));
        }

        Ok(())
    }

    pub fn conflict_column(&self, table: &str) -> Option<&str> {
        self.conflict_columns.get(table).map(String::as_str)
    }

    pub fn is_binary_column(&self, table: &str, column: &str) -> bool {
        self.binary_columns
            .get(table)
            .is_some_and(|columns| columns.iter().any(|c| c == column))
    }

    pub(crate) fn binary_columns_of(&self, table: &str) -> &[String] {
        self.binary_columns.get(table).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn flattens_bare(&self, alias: &str) -> bool {
        self.bare_column_aliases.iter().any(|a| a.eq_ignore_ascii_case(alias))
    }
}

/// Where the REST table store lives and how to authenticate against it.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// The REST root, e.g. `https://project.example.co/rest/v1/`. Table names are appended.
    pub url: Url,
    pub api_key: String,
    pub timeout: Duration,
}

impl StoreConfig {
    pub fn new(url: &str, api_key: impl Into<String>) -> crate::Result<Self> {
        let mut url = Url::parse(url).map_err(|err| Error::Config(format!("invalid store url `{url}`: {err}")))?;

        // Url::join replaces the last segment unless the path ends with a slash.
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        Ok(Self {
            url,
            api_key: api_key.into(),
            timeout: Duration::from_secs(30),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
