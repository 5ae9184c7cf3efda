use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::{Error, Row};

/// What a statement produced, before it is shaped into one of the result envelopes.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    Rows {
        rows: Vec<Row>,
        /// Joined tables were dropped after the store refused the joined request.
        degraded: bool,
    },
    /// The `{total, count}` pseudo row of a `SELECT COUNT`.
    Count(Row),
    Insert {
        rows: Vec<Row>,
        insert_id: Option<JsonValue>,
        affected_rows: u64,
    },
    Write {
        rows: Vec<Row>,
        affected_rows: u64,
    },
}

/// The envelope every statement resolves to.
///
/// ```json
/// {"success": true, "data": [{"id": 1}], "affectedRows": 1, "insertId": 1}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub data: Vec<Row>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_rows: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_id: Option<JsonValue>,
    /// Set when a joined select came back without its joined tables.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

impl ExecutionResult {
    pub(crate) fn from_outcome(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Rows { rows, degraded } => Self {
                success: true,
                data: rows,
                degraded,
                ..Default::default()
            },
            Outcome::Count(row) => Self {
                success: true,
                data: vec![row],
                ..Default::default()
            },
            Outcome::Insert {
                rows,
                insert_id,
                affected_rows,
            } => Self {
                success: true,
                data: rows,
                affected_rows: Some(affected_rows),
                insert_id,
                ..Default::default()
            },
            Outcome::Write { rows, affected_rows } => Self {
                success: true,
                data: rows,
                affected_rows: Some(affected_rows),
                ..Default::default()
            },
        }
    }

    /// A failed statement. An aborted batch sequence keeps the rows and counts gathered so far.
    pub(crate) fn from_error(err: Error) -> Self {
        let error = Some(err.to_string());

        match err {
            Error::BatchAborted {
                rows, affected_rows, ..
            } => Self {
                success: false,
                data: rows,
                error,
                affected_rows: Some(affected_rows),
                ..Default::default()
            },
            _ => Self {
                success: false,
                error,
                ..Default::default()
            },
        }
    }
}

/// The shape relational drivers hand back: rows for reads, counters for writes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DriverResult {
    Rows(Vec<Row>),
    #[serde(rename_all = "camelCase")]
    Insert {
        insert_id: Option<JsonValue>,
        affected_rows: u64,
    },
    #[serde(rename_all = "camelCase")]
    Write { affected_rows: u64, changed_rows: u64 },
}

impl DriverResult {
    pub(crate) fn from_outcome(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Rows { rows, .. } => DriverResult::Rows(rows),
            Outcome::Count(row) => DriverResult::Rows(vec![row]),
            Outcome::Insert {
                insert_id,
                affected_rows,
                ..
            } => DriverResult::Insert {
                insert_id,
                affected_rows,
            },
            Outcome::Write { affected_rows, .. } => DriverResult::Write {
                affected_rows,
                changed_rows: affected_rows,
            },
        }
    }

    pub fn rows(&self) -> &[Row] {
        match self {
            DriverResult::Rows(rows) => rows,
            _ => &[],
        }
    }

    pub fn affected_rows(&self) -> u64 {
        match self {
            DriverResult::Rows(_) => 0,
            DriverResult::Insert { affected_rows, .. } | DriverResult::Write { affected_rows, .. } => *affected_rows,
        }
    }
}
