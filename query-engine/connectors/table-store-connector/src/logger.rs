use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use tracing::debug;

pub const TABLE_STORE_REQUESTS_TOTAL: &str = "table_store_requests_total";
pub const TABLE_STORE_REQUEST_DURATION_HISTOGRAM_MS: &str = "table_store_request_duration_histogram_ms";
pub const TABLE_STORE_JOIN_DEGRADATIONS_TOTAL: &str = "table_store_join_degradations_total";

/// Registers descriptions for the metrics this crate records. Recording works without it.
pub fn describe_metrics() {
    describe_counter!(
        TABLE_STORE_REQUESTS_TOTAL,
        "The total number of requests sent to the table store"
    );
    describe_histogram!(
        TABLE_STORE_REQUEST_DURATION_HISTOGRAM_MS,
        "The distribution of the time table store requests took"
    );
    describe_counter!(
        TABLE_STORE_JOIN_DEGRADATIONS_TOTAL,
        "The number of joined selects answered without their joined tables"
    );
}

pub(crate) fn log_request(store: &str, operation: &'static str, query: &str, start: Instant, ok: bool) {
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    counter!(TABLE_STORE_REQUESTS_TOTAL, "operation" => operation).increment(1);
    histogram!(TABLE_STORE_REQUEST_DURATION_HISTOGRAM_MS, "operation" => operation).record(elapsed_ms);

    debug!(
        target: "table_store_connector::query",
        item_type = "query",
        is_query = true,
        store,
        operation,
        query,
        duration_ms = elapsed_ms,
        ok,
    );
}

pub(crate) fn record_degradation(table: &str) {
    counter!(TABLE_STORE_JOIN_DEGRADATIONS_TOTAL, "table" => table.to_owned()).increment(1);
}
