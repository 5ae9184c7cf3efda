//! Chunked execution.
//!
//! Key lists longer than the configured chunk size are split across sequential requests, one
//! chunk at a time. The first failing chunk stops the sequence; whatever was gathered before it
//! travels with the error.

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::{
    Error, Row, StoreError,
    store::{Filter, FilterOp, Projection, SelectRequest, StoreHandle},
};

/// The filter to split: the `IN` list with the most keys, if it exceeds `chunk_size`.
fn chunked_filter(filters: &[Filter], chunk_size: usize) -> Option<usize> {
    filters
        .iter()
        .enumerate()
        .filter_map(|(i, f)| match &f.op {
            FilterOp::In(values) if values.len() > chunk_size => Some((i, values.len())),
            _ => None,
        })
        .max_by_key(|(_, len)| *len)
        .map(|(i, _)| i)
}

/// One filter set per chunk, in key order. A single set when nothing needs splitting.
fn split(filters: &[Filter], chunk_size: usize) -> Vec<Vec<Filter>> {
    let Some(index) = chunked_filter(filters, chunk_size) else {
        return vec![filters.to_vec()];
    };

    let FilterOp::In(keys) = &filters[index].op else {
        return vec![filters.to_vec()];
    };

    keys.chunks(chunk_size)
        .map(|chunk| {
            let mut chunked = filters.to_vec();
            chunked[index].op = FilterOp::In(chunk.to_vec());
            chunked
        })
        .collect()
}

fn aborted(batch: usize, batches: usize, source: StoreError, rows: Vec<Row>, affected_rows: u64) -> Error {
    // A single request has no partial state worth reporting.
    if batches == 1 {
        return Error::Backend(source);
    }

    Error::BatchAborted {
        batch,
        batches,
        source,
        rows,
        affected_rows,
    }
}

/// Runs a select, chunking its largest `IN` list. `LIMIT`/`OFFSET` of a chunked select apply to
/// the concatenated rows.
pub(crate) async fn select(store: &StoreHandle, request: &SelectRequest, chunk_size: usize) -> crate::Result<Vec<Row>> {
    let chunks = split(&request.filters, chunk_size);

    if chunks.len() == 1 {
        return Ok(store.select(request).await?);
    }

    let batches = chunks.len();
    debug!(table = %request.table, batches, "splitting select into chunks");

    let mut rows = Vec::new();

    for (batch, filters) in chunks.into_iter().enumerate() {
        let chunk_request = SelectRequest {
            filters,
            limit: None,
            offset: None,
            ..request.clone()
        };

        match store.select(&chunk_request).await {
            Ok(chunk_rows) => rows.extend(chunk_rows),
            Err(source) => return Err(aborted(batch, batches, source, rows, 0)),
        }
    }

    let offset = request.offset.unwrap_or(0) as usize;
    let limit = request.limit.map(|l| l as usize).unwrap_or(usize::MAX);

    Ok(rows.into_iter().skip(offset).take(limit).collect())
}

/// Applies `patch` to the matching rows, chunk by chunk. Returns the rows the store echoed.
pub(crate) async fn update(
    store: &StoreHandle,
    table: &str,
    patch: &Row,
    filters: &[Filter],
    chunk_size: usize,
) -> crate::Result<Vec<Row>> {
    let chunks = split(filters, chunk_size);
    let batches = chunks.len();
    let mut rows = Vec::new();

    for (batch, filters) in chunks.iter().enumerate() {
        match store.update(table, patch, filters).await {
            Ok(updated) => rows.extend(updated),
            Err(source) => {
                let affected = rows.len() as u64;
                return Err(aborted(batch, batches, source, rows, affected));
            }
        }
    }

    Ok(rows)
}

/// Deletes the matching rows, chunk by chunk. Returns the rows the store echoed.
pub(crate) async fn delete(
    store: &StoreHandle,
    table: &str,
    filters: &[Filter],
    chunk_size: usize,
) -> crate::Result<Vec<Row>> {
    let chunks = split(filters, chunk_size);
    let batches = chunks.len();
    let mut rows = Vec::new();

    for (batch, filters) in chunks.iter().enumerate() {
        match store.delete(table, filters).await {
            Ok(deleted) => rows.extend(deleted),
            Err(source) => {
                let affected = rows.len() as u64;
                return Err(aborted(batch, batches, source, rows, affected));
            }
        }
    }

    Ok(rows)
}

/// Deletes every row of `table` without an unconditional delete request: all primary keys are
/// listed page by page first, then deleted `chunk_size` at a time. Returns the number of rows
/// the store reported deleted.
///
/// The store may cap a page below `page_size`, so listing only stops at an empty page.
pub(crate) async fn delete_all(
    store: &StoreHandle,
    table: &str,
    primary_key: &str,
    page_size: usize,
    chunk_size: usize,
) -> crate::Result<u64> {
    let ids = list_ids(store, table, primary_key, page_size).await?;

    if ids.is_empty() {
        return Ok(0);
    }

    let batches = ids.len().div_ceil(chunk_size);
    debug!(table, rows = ids.len(), batches, "deleting every row in batches");

    let mut affected = 0u64;

    for (batch, chunk) in ids.chunks(chunk_size).enumerate() {
        let filters = [Filter::is_in(primary_key, chunk.to_vec())];

        match store.delete(table, &filters).await {
            Ok(deleted) => affected += deleted.len() as u64,
            Err(source) => {
                return Err(Error::BatchAborted {
                    batch,
                    batches,
                    source,
                    rows: Vec::new(),
                    affected_rows: affected,
                });
            }
        }
    }

    Ok(affected)
}

async fn list_ids(store: &StoreHandle, table: &str, primary_key: &str, page_size: usize) -> crate::Result<Vec<JsonValue>> {
    let mut ids = Vec::new();
    let mut skipped = 0usize;
    let mut offset = 0u64;

    loop {
        let page = SelectRequest::new(table)
            .project(Projection::column(primary_key))
            .order_by(primary_key, false)
            .limit(page_size as u64)
            .offset(offset);

        let rows = store.select(&page).await?;

        if rows.is_empty() {
            break;
        }

        let fetched = rows.len();

        for row in rows {
            match row.get(primary_key) {
                Some(id) if !id.is_null() => ids.push(id.clone()),
                _ => skipped += 1,
            }
        }

        offset += fetched as u64;
    }

    if skipped > 0 {
        warn!(table, skipped, "rows without a primary key cannot be deleted");
    }

    Ok(ids)
}
