//! Table Store Connector
//!
//! Executes statements written in a small SQL dialect against a REST table store that only
//! offers per-table filter, sort, page and embed primitives. Call sites keep issuing ordinary
//! parameterized statements (`SELECT .. WHERE id = ?`); this crate parses them, binds the
//! positional parameters and compiles each statement into one or more store requests. Joins
//! are emulated with embedded rows, oversized key lists are chunked, unconditional deletes are
//! enumerated and deleted in batches, and every outcome is reshaped into the result envelope
//! relational drivers return.
//!
//! The store is reached through the [`TableStore`] trait. [`RestStore`] talks to the real
//! backend, [`MemoryStore`] is an in-process fixture with the same behaviour.
//!
//! There are no transactions. [`BestEffortSequence`] and the `begin`/`commit`/`rollback` entry
//! points of [`DriverConnection`] exist for call-site compatibility only: every statement is
//! applied as soon as it runs and a rollback undoes nothing.

mod batch;
mod binary;
mod config;
mod driver;
mod error;
mod filter;
mod join;
mod logger;
mod queries;
mod result;
mod sequence;
mod statement;
mod store;
mod translator;
mod value;

pub use config::{ConnectorConfig, StoreConfig};
pub use driver::DriverConnection;
pub use error::{Error, StoreError};
pub use logger::describe_metrics;
pub use result::{DriverResult, ExecutionResult};
pub use sequence::BestEffortSequence;
pub use statement::{
    ColumnRef, Delete, Direction, Insert, JoinKind, JoinSpec, Operand, Operator, OrderBy, Predicate, RowBound, Select,
    SelectCount, SelectItem, Statement, StatementKind, TableRef, Update, ValueExpr, parse,
};
pub use store::{
    CountRequest, Embed, Filter, FilterOp, Order, Projection, SelectRequest, StoreResult, TableStore,
    memory::MemoryStore, rest::RestStore,
};
pub use translator::Translator;
pub use value::Param;

/// A row as returned to callers, keyed by column name in backend order.
pub type Row = serde_json::Map<String, serde_json::Value>;

pub type Result<T> = std::result::Result<T, Error>;
