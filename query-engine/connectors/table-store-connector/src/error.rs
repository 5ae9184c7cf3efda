use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::Row;

/// Error body returned by the table store, e.g.
/// `{"code": "PGRST200", "message": "...", "details": null, "hint": null}`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StoreError {
    /// HTTP status of the failed request, when there was one.
    #[serde(skip)]
    pub status: Option<u16>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Option<JsonValue>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    fn render(&self) -> String {
        let mut out = match &self.code {
            Some(code) => format!("{code}: {}", self.message),
            None => self.message.clone(),
        };

        if let Some(details) = self.details.as_ref().filter(|d| !d.is_null()) {
            match details {
                JsonValue::String(s) => out.push_str(&format!(" ({s})")),
                other => out.push_str(&format!(" ({other})")),
            }
        }

        if let Some(hint) = &self.hint {
            out.push_str(&format!(" Hint: {hint}"));
        }

        out
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

impl std::error::Error for StoreError {}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());

        StoreError {
            status,
            message: err.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// The statement text uses something the dialect does not support.
    #[error("Unsupported statement construct: {construct} (at offset {position}).")]
    Parse { construct: String, position: usize },

    /// A placeholder refers to a parameter that was never supplied.
    #[error("Statement placeholder #{} has no bound parameter ({} supplied).", index + 1, supplied)]
    MissingParameter { index: usize, supplied: usize },

    #[error("Table store request failed: {0}")]
    Backend(#[from] StoreError),

    /// A backend response could not be mapped to the expected row shape.
    #[error("Unexpected value in column '{column}': {message}")]
    Shape { column: String, message: String },

    /// A binary payload was neither a buffer nor recognized hex/base64 text.
    #[error("Invalid binary payload for column '{column}': {message}")]
    Encoding { column: String, message: String },

    /// A chunked sequence stopped at a failing batch. Carries whatever was gathered before it.
    #[error("Batch {} of {} failed: {}", batch + 1, batches, source)]
    BatchAborted {
        batch: usize,
        batches: usize,
        source: StoreError,
        rows: Vec<Row>,
        affected_rows: u64,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn parse(construct: impl Into<String>, position: usize) -> Self {
        Error::Parse {
            construct: construct.into(),
            position,
        }
    }

    pub(crate) fn shape(column: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Shape {
            column: column.into(),
            message: message.into(),
        }
    }

    pub(crate) fn encoding(column: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Encoding {
            column: column.into(),
            message: message.into(),
        }
    }

    pub fn is_parse_error(&self) -> bool {
        matches!(self, Error::Parse { .. } | Error::MissingParameter { .. })
    }
}
