//! The REST table store seam.
//!
//! A [`TableStore`] offers per-table primitives only: filtered selects with embedded related
//! rows, counts, single-row inserts and upserts, and filtered updates and deletes. Requests are
//! plain data so they can be logged and asserted on in tests. The query-string notation used by
//! [`SelectRequest::query_pairs`] is the one the REST backend understands.

pub mod memory;
pub mod rest;

use std::{collections::HashSet, fmt, sync::Arc, time::Instant};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::{Row, StoreError, logger, value::scalar_text};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait TableStore: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn select(&self, request: &SelectRequest) -> StoreResult<Vec<Row>>;

    /// Exact number of rows (or distinct values) matching the request.
    async fn count(&self, request: &CountRequest) -> StoreResult<u64>;

    /// Inserts one row and returns the stored representation when the store echoes it.
    async fn insert(&self, table: &str, row: &Row) -> StoreResult<Vec<Row>>;

    /// Inserts or merges one row, identifying existing rows by `on_conflict`.
    async fn upsert(&self, table: &str, row: &Row, on_conflict: &str) -> StoreResult<Vec<Row>>;

    /// Applies `patch` to every matching row and returns the updated rows.
    async fn update(&self, table: &str, patch: &Row, filters: &[Filter]) -> StoreResult<Vec<Row>>;

    /// Deletes every matching row and returns the deleted rows.
    async fn delete(&self, table: &str, filters: &[Filter]) -> StoreResult<Vec<Row>>;
}

/// One selected column, optionally renamed (`alias:column`).
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub column: String,
    pub alias: Option<String>,
}

impl Projection {
    pub fn column(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            alias: None,
        }
    }

    pub fn aliased(column: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            alias: Some(alias.into()),
        }
    }

    /// The key this column has in a returned row.
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.column)
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{alias}:{}", self.column),
            None => f.write_str(&self.column),
        }
    }
}

/// Related rows of `table` embedded under `alias`, linked by `local_column = foreign_column`.
#[derive(Debug, Clone, PartialEq)]
pub struct Embed {
    pub alias: String,
    pub table: String,
    pub local_column: String,
    pub foreign_column: String,
    /// Drop parent rows without a related row.
    pub inner: bool,
}

impl fmt::Display for Embed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}!{}", self.alias, self.table, self.local_column)?;

        if self.inner {
            f.write_str("!inner")?;
        }

        f.write_str("(*)")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = if self.descending { "desc" } else { "asc" };
        write!(f, "{}.{direction}", self.column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    /// Equality on a non-null value.
    Eq(JsonValue),
    /// Case-insensitive pattern match with `%` and `_` wildcards.
    ILike(String),
    In(Vec<JsonValue>),
}

/// A filter on one column. Filters on embedded rows use `alias.column`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self {
            column: column.into(),
            op: FilterOp::Eq(value.into()),
        }
    }

    pub fn ilike(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            op: FilterOp::ILike(pattern.into()),
        }
    }

    pub fn is_in(column: impl Into<String>, values: Vec<JsonValue>) -> Self {
        Self {
            column: column.into(),
            op: FilterOp::In(values),
        }
    }

    /// The part after `column=` in a query string.
    pub fn operand_text(&self) -> String {
        match &self.op {
            FilterOp::Eq(value) => format!("eq.{}", scalar_text(value)),
            FilterOp::ILike(pattern) => format!("ilike.{pattern}"),
            FilterOp::In(values) => {
                let items: Vec<_> = values.iter().map(in_list_item).collect();
                format!("in.({})", items.join(","))
            }
        }
    }

    /// The embed alias this filter applies to, if any.
    pub fn embed(&self) -> Option<&str> {
        self.column.split_once('.').map(|(embed, _)| embed)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.column, self.operand_text())
    }
}

fn in_list_item(value: &JsonValue) -> String {
    let text = scalar_text(value);
    let reserved = |c: char| matches!(c, ',' | '.' | ':' | '(' | ')' | '"' | '\\') || c.is_whitespace();

    if value.is_string() && (text.is_empty() || text.chars().any(reserved)) {
        format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        text
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectRequest {
    pub table: String,
    /// Empty selects every column.
    pub projection: Vec<Projection>,
    pub embeds: Vec<Embed>,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectRequest {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            projection: Vec::new(),
            embeds: Vec::new(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn project(mut self, projection: Projection) -> Self {
        self.projection.push(projection);
        self
    }

    pub fn embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order.push(Order {
            column: column.into(),
            descending,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn select_clause(&self) -> String {
        let mut items: Vec<String> = if self.projection.is_empty() {
            vec!["*".to_owned()]
        } else {
            self.projection.iter().map(ToString::to_string).collect()
        };

        items.extend(self.embeds.iter().map(ToString::to_string));
        items.join(",")
    }

    /// Unencoded query-string pairs in the backend's notation.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![("select".to_owned(), self.select_clause())];

        pairs.extend(self.filters.iter().map(|f| (f.column.clone(), f.operand_text())));

        if !self.order.is_empty() {
            let order: Vec<_> = self.order.iter().map(ToString::to_string).collect();
            pairs.push(("order".to_owned(), order.join(",")));
        }

        if let Some(limit) = self.limit {
            pairs.push(("limit".to_owned(), limit.to_string()));
        }

        if let Some(offset) = self.offset {
            pairs.push(("offset".to_owned(), offset.to_string()));
        }

        pairs
    }
}

impl fmt::Display for SelectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GET {}?{}", self.table, render_pairs(&self.query_pairs()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CountRequest {
    pub table: String,
    pub filters: Vec<Filter>,
    /// Count distinct values of this column instead of rows.
    pub distinct: Option<String>,
}

impl CountRequest {
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let select = self.distinct.clone().unwrap_or_else(|| "*".to_owned());
        let mut pairs = vec![("select".to_owned(), select)];
        pairs.extend(self.filters.iter().map(|f| (f.column.clone(), f.operand_text())));

        pairs
    }
}

impl fmt::Display for CountRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.distinct.is_some() { "COUNT DISTINCT" } else { "COUNT" };
        write!(f, "{verb} {}?{}", self.table, render_pairs(&self.query_pairs()))
    }
}

fn render_pairs(pairs: &[(String, String)]) -> String {
    let rendered: Vec<_> = pairs.iter().map(|(k, v)| format!("{k}={v}")).collect();
    rendered.join("&")
}

fn render_filters(filters: &[Filter]) -> String {
    let rendered: Vec<_> = filters.iter().map(ToString::to_string).collect();
    rendered.join("&")
}

/// Counts the distinct non-null values of `column` by reading the column page by page, for
/// stores that cannot count distinct values themselves. The store may cap a page below
/// `page_size`, so only an empty page ends the scan.
pub(crate) async fn count_distinct_by_paging<S>(
    store: &S,
    request: &CountRequest,
    column: &str,
    page_size: u64,
) -> StoreResult<u64>
where
    S: TableStore + ?Sized,
{
    let mut seen = HashSet::new();
    let mut offset = 0;

    loop {
        let page = SelectRequest {
            table: request.table.clone(),
            projection: vec![Projection::column(column)],
            embeds: Vec::new(),
            filters: request.filters.clone(),
            order: vec![Order {
                column: column.to_owned(),
                descending: false,
            }],
            limit: Some(page_size),
            offset: Some(offset),
        };

        let rows = store.select(&page).await?;

        if rows.is_empty() {
            return Ok(seen.len() as u64);
        }

        offset += rows.len() as u64;
        seen.extend(
            rows.iter()
                .filter_map(|row| row.get(column))
                .filter(|v| !v.is_null())
                .map(JsonValue::to_string),
        );
    }
}

/// Shared handle to a store. Every request goes through here so it is logged and counted once,
/// whatever the store implementation.
#[derive(Clone)]
pub(crate) struct StoreHandle {
    inner: Arc<dyn TableStore>,
}

impl StoreHandle {
    pub(crate) fn new(inner: Arc<dyn TableStore>) -> Self {
        Self { inner }
    }

    pub(crate) async fn select(&self, request: &SelectRequest) -> StoreResult<Vec<Row>> {
        let start = Instant::now();
        let res = self.inner.select(request).await;
        logger::log_request(self.inner.name(), "select", &request.to_string(), start, res.is_ok());
        res
    }

    pub(crate) async fn count(&self, request: &CountRequest) -> StoreResult<u64> {
        let start = Instant::now();
        let res = self.inner.count(request).await;
        logger::log_request(self.inner.name(), "count", &request.to_string(), start, res.is_ok());
        res
    }

    pub(crate) async fn insert(&self, table: &str, row: &Row) -> StoreResult<Vec<Row>> {
        let start = Instant::now();
        let res = self.inner.insert(table, row).await;
        let query = format!("POST {table} {}", JsonValue::Object(row.clone()));
        logger::log_request(self.inner.name(), "insert", &query, start, res.is_ok());
        res
    }

    pub(crate) async fn upsert(&self, table: &str, row: &Row, on_conflict: &str) -> StoreResult<Vec<Row>> {
        let start = Instant::now();
        let res = self.inner.upsert(table, row, on_conflict).await;
        let query = format!(
            "POST {table}?on_conflict={on_conflict} {}",
            JsonValue::Object(row.clone())
        );
        logger::log_request(self.inner.name(), "upsert", &query, start, res.is_ok());
        res
    }

    pub(crate) async fn update(&self, table: &str, patch: &Row, filters: &[Filter]) -> StoreResult<Vec<Row>> {
        let start = Instant::now();
        let res = self.inner.update(table, patch, filters).await;
        let query = format!(
            "PATCH {table}?{} {}",
            render_filters(filters),
            JsonValue::Object(patch.clone())
        );
        logger::log_request(self.inner.name(), "update", &query, start, res.is_ok());
        res
    }

    pub(crate) async fn delete(&self, table: &str, filters: &[Filter]) -> StoreResult<Vec<Row>> {
        let start = Instant::now();
        let res = self.inner.delete(table, filters).await;
        let query = format!("DELETE {table}?{}", render_filters(filters));
        logger::log_request(self.inner.name(), "delete", &query, start, res.is_ok());
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;
    use serde_json::json;

    #[test]
    fn select_requests_render_in_backend_notation() {
        let request = SelectRequest::new("evaluations")
            .embed(Embed {
                alias: "c".into(),
                table: "candidates".into(),
                local_column: "candidate_id".into(),
                foreign_column: "id".into(),
                inner: true,
            })
            .filter(Filter::eq("job_id", 7))
            .filter(Filter::eq("c.deleted", false))
            .filter(Filter::is_in("status", vec![json!("open"), json!("on hold"), json!("a,b")]))
            .filter(Filter::ilike("c.email", "%@example.com"))
            .order_by("created_at", true)
            .limit(20)
            .offset(40);

        expect![[r#"GET evaluations?select=*,c:candidates!candidate_id!inner(*)&job_id=eq.7&c.deleted=eq.false&status=in.(open,"on hold","a,b")&c.email=ilike.%@example.com&order=created_at.desc&limit=20&offset=40"#]]
            .assert_eq(&request.to_string());
    }

    #[test]
    fn projections_and_counts() {
        let request = SelectRequest::new("candidates")
            .project(Projection::column("id"))
            .project(Projection::aliased("name", "candidate_name"));

        expect!["GET candidates?select=id,candidate_name:name"].assert_eq(&request.to_string());

        let count = CountRequest {
            table: "evaluations".into(),
            filters: vec![Filter::eq("job_id", "j1")],
            distinct: Some("candidate_id".into()),
        };

        expect!["COUNT DISTINCT evaluations?select=candidate_id&job_id=eq.j1"].assert_eq(&count.to_string());
    }

    #[test]
    fn embedded_filters_know_their_embed() {
        assert_eq!(Filter::eq("c.name", "x").embed(), Some("c"));
        assert_eq!(Filter::eq("name", "x").embed(), None);
    }

    #[tokio::test]
    async fn distinct_counts_read_past_capped_pages() {
        let store = memory::MemoryStore::new()
            .with_table(
                "evaluations",
                (0..25).map(|i| json!({"id": i, "candidate_id": i % 12, "job_id": 7})),
            )
            .with_max_rows(5);

        let request = CountRequest {
            table: "evaluations".into(),
            filters: vec![Filter::eq("job_id", 7)],
            distinct: Some("candidate_id".into()),
        };

        let count = count_distinct_by_paging(&store, &request, "candidate_id", 10).await.unwrap();

        assert_eq!(count, 12);
        // 5 full pages and the empty one that ends the scan.
        assert_eq!(store.request_count(), 6);
    }
}
