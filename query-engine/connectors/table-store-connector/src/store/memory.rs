//! An in-process table store.
//!
//! Behaves like the REST backend for everything the translator relies on: loose equality on
//! text, `ilike` patterns, to-one and to-many embeds, `!inner` embeds, nulls sorting last on
//! ascending orders and the error codes for unknown columns, embeds and relationships. Failures
//! can be injected to exercise the degraded paths.

use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicUsize, Ordering as AtomicOrdering},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use super::*;
use crate::value::scalar_text;

#[derive(Default)]
struct State {
    tables: HashMap<String, Vec<Row>>,
    log: Vec<String>,
}

pub struct MemoryStore {
    state: Mutex<State>,
    requests: AtomicUsize,
    primary_key: String,
    reject_embeds: bool,
    echo_writes: bool,
    fail_after: Option<usize>,
    max_rows: Option<usize>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            requests: AtomicUsize::new(0),
            primary_key: "id".to_owned(),
            reject_embeds: false,
            echo_writes: true,
            fail_after: None,
            max_rows: None,
        }
    }

    /// Seeds `table` with JSON objects. Non-object values are ignored.
    pub fn with_table(self, table: &str, rows: impl IntoIterator<Item = JsonValue>) -> Self {
        self.seed(table, rows);
        self
    }

    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    /// Answers every request carrying embeds with a missing-relationship error.
    pub fn rejecting_embeds(mut self) -> Self {
        self.reject_embeds = true;
        self
    }

    /// Writes succeed but return no representation.
    pub fn without_write_echo(mut self) -> Self {
        self.echo_writes = false;
        self
    }

    /// Lets the first `n` requests through and fails every later one.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Never returns more than `n` rows from a select, whatever the requested limit, like a
    /// server-side `max-rows` setting.
    pub fn with_max_rows(mut self, n: usize) -> Self {
        self.max_rows = Some(n);
        self
    }

    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = JsonValue>) {
        let mut state = self.state.lock();
        let stored = state.tables.entry(table.to_owned()).or_default();

        stored.extend(rows.into_iter().filter_map(|row| match row {
            JsonValue::Object(obj) => Some(obj),
            _ => None,
        }));
    }

    /// Snapshot of a table, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state.lock().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(AtomicOrdering::SeqCst)
    }

    /// Every request received so far, rendered like the query log.
    pub fn request_log(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    fn receive(&self, state: &mut State, request: String) -> StoreResult<()> {
        let seq = self.requests.fetch_add(1, AtomicOrdering::SeqCst);
        state.log.push(request);

        match self.fail_after {
            Some(n) if seq >= n => Err(StoreError::new("injected failure").with_status(503)),
            _ => Ok(()),
        }
    }

    fn echo(&self, rows: Vec<Row>) -> Vec<Row> {
        if self.echo_writes { rows } else { Vec::new() }
    }

    fn run_select(&self, state: &State, request: &SelectRequest) -> StoreResult<Vec<Row>> {
        if let Some(embed) = request.embeds.first().filter(|_| self.reject_embeds) {
            return Err(StoreError::new(format!(
                "Could not find a relationship between '{}' and '{}' in the schema cache",
                request.table, embed.table
            ))
            .with_code("PGRST200")
            .with_status(400));
        }

        for alias in request.filters.iter().filter_map(Filter::embed) {
            if !request.embeds.iter().any(|e| e.alias == alias) {
                return Err(StoreError::new(format!("'{alias}' is not an embedded resource in this request"))
                    .with_code("PGRST108")
                    .with_status(400));
            }
        }

        let empty = Vec::new();
        let source = state.tables.get(&request.table).unwrap_or(&empty);

        for projection in &request.projection {
            ensure_column(&request.table, source, &projection.column)?;
        }

        let (embedded_filters, own_filters): (Vec<&Filter>, Vec<&Filter>) =
            request.filters.iter().partition(|f| f.embed().is_some());

        let mut rows: Vec<Row> = source
            .iter()
            .filter(|row| own_filters.iter().all(|f| row_matches(row, &f.column, &f.op)))
            .cloned()
            .collect();

        for embed in &request.embeds {
            let foreign = state.tables.get(&embed.table).unwrap_or(&empty);
            let filters: Vec<_> = embedded_filters
                .iter()
                .filter(|f| f.embed() == Some(embed.alias.as_str()))
                .map(|f| (f.column[embed.alias.len() + 1..].to_owned(), f.op.clone()))
                .collect();

            let to_one = embed.foreign_column == self.primary_key;

            rows.retain_mut(|row| {
                let key = row.get(&embed.local_column).cloned().unwrap_or(JsonValue::Null);
                let related: Vec<JsonValue> = foreign
                    .iter()
                    .filter(|f| f.get(&embed.foreign_column).is_some_and(|v| loose_eq(v, &key)))
                    .filter(|f| filters.iter().all(|(column, op)| row_matches(f, column, op)))
                    .map(|f| JsonValue::Object(f.clone()))
                    .collect();

                let found = !related.is_empty();

                let value = if to_one {
                    related.into_iter().next().unwrap_or(JsonValue::Null)
                } else {
                    JsonValue::Array(related)
                };

                row.insert(embed.alias.clone(), value);
                found || !embed.inner
            });
        }

        rows.sort_by(|a, b| {
            request
                .order
                .iter()
                .map(|o| {
                    let ord = compare(a.get(&o.column), b.get(&o.column));
                    if o.descending { ord.reverse() } else { ord }
                })
                .find(|ord| ord.is_ne())
                .unwrap_or(Ordering::Equal)
        });

        let offset = request.offset.unwrap_or(0) as usize;
        let limit = request.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let limit = self.max_rows.map_or(limit, |max| limit.min(max));
        let rows = rows.into_iter().skip(offset).take(limit);

        if request.projection.is_empty() {
            return Ok(rows.collect());
        }

        Ok(rows
            .map(|row| {
                let mut out = Row::new();

                for projection in &request.projection {
                    if projection.column == "*" {
                        out.extend(row.iter().map(|(k, v)| (k.clone(), v.clone())));
                        continue;
                    }

                    let value = row.get(&projection.column).cloned().unwrap_or(JsonValue::Null);
                    out.insert(projection.output_name().to_owned(), value);
                }

                for embed in &request.embeds {
                    if let Some(value) = row.get(&embed.alias) {
                        out.insert(embed.alias.clone(), value.clone());
                    }
                }

                out
            })
            .collect())
    }

    fn next_id(&self, rows: &[Row]) -> JsonValue {
        let max = rows
            .iter()
            .filter_map(|r| r.get(&self.primary_key).and_then(JsonValue::as_i64))
            .max()
            .unwrap_or(0);

        JsonValue::from(max + 1)
    }

    fn insert_row(&self, rows: &mut Vec<Row>, row: &Row) -> Row {
        let mut row = row.clone();

        if row.get(&self.primary_key).is_none_or(JsonValue::is_null) {
            row.insert(self.primary_key.clone(), self.next_id(rows));
        }

        rows.push(row.clone());
        row
    }
}

#[async_trait]
impl TableStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn select(&self, request: &SelectRequest) -> StoreResult<Vec<Row>> {
        let mut state = self.state.lock();
        self.receive(&mut state, request.to_string())?;
        self.run_select(&state, request)
    }

    async fn count(&self, request: &CountRequest) -> StoreResult<u64> {
        let mut state = self.state.lock();
        self.receive(&mut state, request.to_string())?;

        let empty = Vec::new();
        let rows = state.tables.get(&request.table).unwrap_or(&empty);

        if let Some(column) = &request.distinct {
            ensure_column(&request.table, rows, column)?;
        }

        let matching = rows
            .iter()
            .filter(|row| request.filters.iter().all(|f| row_matches(row, &f.column, &f.op)));

        let count = match &request.distinct {
            None => matching.count(),
            Some(column) => matching
                .filter_map(|row| row.get(column).filter(|v| !v.is_null()))
                .map(|v| v.to_string())
                .collect::<HashSet<_>>()
                .len(),
        };

        Ok(count as u64)
    }

    async fn insert(&self, table: &str, row: &Row) -> StoreResult<Vec<Row>> {
        let mut state = self.state.lock();
        self.receive(&mut state, format!("POST {table}"))?;

        let rows = state.tables.entry(table.to_owned()).or_default();
        let stored = self.insert_row(rows, row);

        Ok(self.echo(vec![stored]))
    }

    async fn upsert(&self, table: &str, row: &Row, on_conflict: &str) -> StoreResult<Vec<Row>> {
        let mut state = self.state.lock();
        self.receive(&mut state, format!("POST {table}?on_conflict={on_conflict}"))?;

        let rows = state.tables.entry(table.to_owned()).or_default();
        let key = row.get(on_conflict).cloned().unwrap_or(JsonValue::Null);

        let position = rows
            .iter()
            .position(|r| r.get(on_conflict).is_some_and(|v| loose_eq(v, &key)));

        let stored = match position {
            Some(index) => {
                let existing = &mut rows[index];
                for (column, value) in row {
                    existing.insert(column.clone(), value.clone());
                }
                existing.clone()
            }
            None => self.insert_row(rows, row),
        };

        Ok(self.echo(vec![stored]))
    }

    async fn update(&self, table: &str, patch: &Row, filters: &[Filter]) -> StoreResult<Vec<Row>> {
        let mut state = self.state.lock();
        self.receive(&mut state, format!("PATCH {table}?{}", render_filters(filters)))?;

        let mut updated = Vec::new();

        if let Some(rows) = state.tables.get_mut(table) {
            for row in rows
                .iter_mut()
                .filter(|row| filters.iter().all(|f| row_matches(row, &f.column, &f.op)))
            {
                for (column, value) in patch {
                    row.insert(column.clone(), value.clone());
                }
                updated.push(row.clone());
            }
        }

        Ok(self.echo(updated))
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> StoreResult<Vec<Row>> {
        let mut state = self.state.lock();
        self.receive(&mut state, format!("DELETE {table}?{}", render_filters(filters)))?;

        let Some(rows) = state.tables.get_mut(table) else {
            return Ok(Vec::new());
        };

        let (deleted, kept): (Vec<Row>, Vec<Row>) = std::mem::take(rows)
            .into_iter()
            .partition(|row| filters.iter().all(|f| row_matches(row, &f.column, &f.op)));

        *rows = kept;

        Ok(self.echo(deleted))
    }
}

fn ensure_column(table: &str, rows: &[Row], column: &str) -> StoreResult<()> {
    if column == "*" || rows.is_empty() || rows.iter().any(|r| r.contains_key(column)) {
        return Ok(());
    }

    Err(StoreError::new(format!("column {table}.{column} does not exist"))
        .with_code("42703")
        .with_status(400))
}

fn row_matches(row: &Row, column: &str, op: &FilterOp) -> bool {
    let cell = row.get(column).unwrap_or(&JsonValue::Null);

    match op {
        FilterOp::Eq(value) => loose_eq(cell, value),
        FilterOp::ILike(pattern) => !cell.is_null() && ilike(&scalar_text(cell), pattern),
        FilterOp::In(values) => values.iter().any(|v| loose_eq(cell, v)),
    }
}

/// Equality the way a query string compares: `42` matches `"42"`, null matches nothing.
fn loose_eq(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Null, _) | (_, JsonValue::Null) => false,
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64() == y.as_f64(),
        _ => scalar_text(a) == scalar_text(b),
    }
}

fn ilike(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.to_lowercase().chars().collect();
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();

    // matches[i][j]: text[..i] matches pattern[..j]
    let mut matches = vec![vec![false; pattern.len() + 1]; text.len() + 1];
    matches[0][0] = true;

    for j in 1..=pattern.len() {
        matches[0][j] = matches[0][j - 1] && pattern[j - 1] == '%';
    }

    for i in 1..=text.len() {
        for j in 1..=pattern.len() {
            matches[i][j] = match pattern[j - 1] {
                '%' => matches[i][j - 1] || matches[i - 1][j],
                '_' => matches[i - 1][j - 1],
                c => matches[i - 1][j - 1] && c == text[i - 1],
            };
        }
    }

    matches[text.len()][pattern.len()]
}

/// Ascending order with nulls last.
fn compare(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());

    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(JsonValue::Number(x)), Some(JsonValue::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(x), Some(y)) => scalar_text(x).cmp(&scalar_text(y)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::new()
            .with_table(
                "candidates",
                vec![
                    json!({"id": 1, "name": "Ada", "email": "ada@example.com"}),
                    json!({"id": 2, "name": "Grace", "email": "grace@navy.mil"}),
                ],
            )
            .with_table(
                "evaluations",
                vec![
                    json!({"id": 10, "candidate_id": 1, "score": 90}),
                    json!({"id": 11, "candidate_id": 2, "score": null}),
                    json!({"id": 12, "candidate_id": 3, "score": 70}),
                ],
            )
    }

    fn ids(rows: &[Row]) -> Vec<i64> {
        rows.iter().filter_map(|r| r.get("id").and_then(JsonValue::as_i64)).collect()
    }

    #[tokio::test]
    async fn filters_compare_loosely_and_ilike_ignores_case() {
        let store = store();

        let rows = store
            .select(&SelectRequest::new("candidates").filter(Filter::eq("id", "2")))
            .await
            .unwrap();
        assert_eq!(ids(&rows), vec![2]);

        let rows = store
            .select(&SelectRequest::new("candidates").filter(Filter::ilike("email", "%@EXAMPLE.___")))
            .await
            .unwrap();
        assert_eq!(ids(&rows), vec![1]);
    }

    #[tokio::test]
    async fn inner_embeds_drop_unmatched_rows() {
        let store = store();
        let embed = Embed {
            alias: "c".into(),
            table: "candidates".into(),
            local_column: "candidate_id".into(),
            foreign_column: "id".into(),
            inner: true,
        };

        let rows = store
            .select(&SelectRequest::new("evaluations").embed(embed.clone()))
            .await
            .unwrap();
        assert_eq!(ids(&rows), vec![10, 11]);
        assert_eq!(rows[0]["c"]["name"], json!("Ada"));

        let left = Embed { inner: false, ..embed };
        let rows = store
            .select(&SelectRequest::new("evaluations").embed(left))
            .await
            .unwrap();
        assert_eq!(rows[2]["c"], JsonValue::Null);
    }

    #[tokio::test]
    async fn nulls_sort_last_ascending() {
        let rows = store()
            .select(&SelectRequest::new("evaluations").order_by("score", false))
            .await
            .unwrap();

        assert_eq!(ids(&rows), vec![12, 10, 11]);
    }

    #[tokio::test]
    async fn unknown_columns_and_embeds_are_rejected() {
        let store = store().rejecting_embeds();

        let err = store
            .select(&SelectRequest::new("candidates").project(Projection::column("nope")))
            .await
            .unwrap_err();
        assert_eq!(err.code.as_deref(), Some("42703"));

        let err = store
            .select(&SelectRequest::new("candidates").filter(Filter::eq("c.name", "Ada")))
            .await
            .unwrap_err();
        assert_eq!(err.code.as_deref(), Some("PGRST108"));
    }

    #[tokio::test]
    async fn writes_assign_ids_and_merge_upserts() {
        let store = MemoryStore::new();
        let mut row = Row::new();
        row.insert("key".into(), json!("theme"));
        row.insert("value".into(), json!("dark"));

        let inserted = store.insert("settings", &row).await.unwrap();
        assert_eq!(inserted[0]["id"], json!(1));

        row.insert("value".into(), json!("light"));
        store.upsert("settings", &row, "key").await.unwrap();

        let rows = store.rows("settings");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["value"], json!("light"));
    }

    #[tokio::test]
    async fn selects_are_capped_at_max_rows() {
        let store = MemoryStore::new()
            .with_table("messages", (1..=10).map(|i| json!({"id": i})))
            .with_max_rows(4);

        let rows = store
            .select(&SelectRequest::new("messages").offset(8))
            .await
            .unwrap();
        assert_eq!(ids(&rows), vec![9, 10]);

        let rows = store
            .select(&SelectRequest::new("messages").limit(6))
            .await
            .unwrap();
        assert_eq!(ids(&rows), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn injected_failures_start_after_the_threshold() {
        let store = store().failing_after(1);
        let request = SelectRequest::new("candidates");

        assert!(store.select(&request).await.is_ok());
        let err = store.select(&request).await.unwrap_err();

        assert_eq!(err.status, Some(503));
        assert_eq!(store.request_count(), 2);
    }
}
