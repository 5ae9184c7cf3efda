use chrono::{SecondsFormat, Utc};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::{
    Row,
    batch,
    binary::{decode_row, normalize_json, normalize_param},
    filter::{Binder, Scope, compile_predicates},
    result::Outcome,
    statement::{Delete, Insert, TableRef, Update, ValueExpr},
    store::SelectRequest,
};

use super::Context;

/// Builds the row object written by an `INSERT` or `UPDATE`.
struct RowBuilder<'a, 'b> {
    ctx: &'a Context<'a>,
    table: &'a str,
    binder: &'a mut Binder<'b>,
    /// Every `NOW()` of one statement resolves to the same instant.
    now: String,
}

impl<'a, 'b> RowBuilder<'a, 'b> {
    fn new(ctx: &'a Context<'a>, table: &'a str, binder: &'a mut Binder<'b>) -> Self {
        Self {
            ctx,
            table,
            binder,
            now: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    fn value(&mut self, column: &str, expr: &ValueExpr) -> crate::Result<JsonValue> {
        let binary = self.ctx.config.is_binary_column(self.table, column);

        match expr {
            ValueExpr::Param(index) => normalize_param(column, self.binder.param(*index)?, binary),
            ValueExpr::Literal(value) => normalize_json(column, value, binary),
            ValueExpr::Now => Ok(JsonValue::String(self.now.clone())),
            // The existing column value is never read back: a null parameter writes null.
            ValueExpr::Coalesce { param, .. } => normalize_param(column, self.binder.param(*param)?, binary),
        }
    }

    fn build<'c>(&mut self, assignments: impl Iterator<Item = (&'c String, &'c ValueExpr)>) -> crate::Result<Row> {
        let mut row = Row::new();

        for (column, expr) in assignments {
            let value = self.value(column, expr)?;
            row.insert(column.clone(), value);
        }

        Ok(row)
    }
}

pub(crate) async fn insert(ctx: &Context<'_>, insert: &Insert, binder: &mut Binder<'_>) -> crate::Result<Outcome> {
    let table = insert.table.as_str();
    let row = RowBuilder::new(ctx, table, binder).build(insert.columns.iter().zip(&insert.values))?;

    let echoed = if insert.upsert {
        let conflict = match ctx.config.conflict_column(table) {
            Some(column) => column,
            None => {
                warn!(
                    table,
                    primary_key = %ctx.config.primary_key,
                    "no conflict column configured for upsert, using the primary key"
                );
                ctx.config.primary_key.as_str()
            }
        };

        ctx.store.upsert(table, &row, conflict).await?
    } else {
        ctx.store.insert(table, &row).await?
    };

    let pk = ctx.config.primary_key.as_str();
    let echoed_id = echoed
        .first()
        .and_then(|r| r.get(pk))
        .filter(|id| !id.is_null())
        .cloned();

    let insert_id = match echoed_id {
        Some(id) => Some(id),
        None => latest_id(ctx, table).await,
    };

    let affected_rows = echoed.len().max(1) as u64;
    let rows = decode(ctx, table, echoed)?;

    Ok(Outcome::Insert {
        rows,
        insert_id,
        affected_rows,
    })
}

/// Primary key of the most recent row in `table`. Under concurrent writers this may belong to
/// someone else's row.
async fn latest_id(ctx: &Context<'_>, table: &str) -> Option<JsonValue> {
    let pk = ctx.config.primary_key.as_str();
    let request = SelectRequest::new(table)
        .project(crate::Projection::column(pk))
        .order_by(pk, true)
        .limit(1);

    match ctx.store.select(&request).await {
        Ok(rows) => rows.into_iter().next().and_then(|mut r| r.remove(pk)).filter(|id| !id.is_null()),
        Err(err) => {
            warn!(table, error = %err, "could not look up the id of the inserted row");
            None
        }
    }
}

pub(crate) async fn update(ctx: &Context<'_>, update: &Update, binder: &mut Binder<'_>) -> crate::Result<Outcome> {
    let table = update.table.as_str();
    let patch = RowBuilder::new(ctx, table, binder).build(update.assignments.iter().map(|(c, v)| (c, v)))?;

    let primary = TableRef {
        name: update.table.clone(),
        alias: None,
    };
    let compiled = compile_predicates(&update.predicates, &Scope::new(&primary, &[]), binder)?;

    if compiled.unsatisfiable {
        return Ok(Outcome::Write {
            rows: Vec::new(),
            affected_rows: 0,
        });
    }

    let rows = batch::update(ctx.store, table, &patch, &compiled.filters, ctx.config.chunk_size).await?;
    let affected_rows = rows.len() as u64;

    Ok(Outcome::Write {
        rows: decode(ctx, table, rows)?,
        affected_rows,
    })
}

pub(crate) async fn delete(ctx: &Context<'_>, delete: &Delete, binder: &mut Binder<'_>) -> crate::Result<Outcome> {
    let table = delete.table.as_str();

    if delete.predicates.is_empty() {
        let affected_rows = batch::delete_all(
            ctx.store,
            table,
            &ctx.config.primary_key,
            ctx.config.delete_page_size,
            ctx.config.chunk_size,
        )
        .await?;

        return Ok(Outcome::Write {
            rows: Vec::new(),
            affected_rows,
        });
    }

    let primary = TableRef {
        name: delete.table.clone(),
        alias: None,
    };
    let compiled = compile_predicates(&delete.predicates, &Scope::new(&primary, &[]), binder)?;

    if compiled.unsatisfiable {
        return Ok(Outcome::Write {
            rows: Vec::new(),
            affected_rows: 0,
        });
    }

    let rows = batch::delete(ctx.store, table, &compiled.filters, ctx.config.chunk_size).await?;
    let affected_rows = rows.len() as u64;

    Ok(Outcome::Write {
        rows: decode(ctx, table, rows)?,
        affected_rows,
    })
}

fn decode(ctx: &Context<'_>, table: &str, mut rows: Vec<Row>) -> crate::Result<Vec<Row>> {
    let binary = ctx.config.binary_columns_of(table);

    for row in &mut rows {
        decode_row(row, binary)?;
    }

    Ok(rows)
}
