use crate::{
    Error, Row,
    batch,
    binary::decode_row,
    filter::{Binder, Scope, Target, compile_predicates},
    join::{self, Flattener},
    result::Outcome,
    statement::{Direction, Select, SelectItem},
    store::{Order, Projection, SelectRequest},
};

use super::Context;

pub(crate) async fn select(ctx: &Context<'_>, select: &Select, binder: &mut Binder<'_>) -> crate::Result<Outcome> {
    let table = &select.table.name;
    let scope = Scope::new(&select.table, &select.joins);

    let compiled = compile_predicates(&select.predicates, &scope, binder)?;
    let limit = select.limit.map(|b| binder.bound(b, "LIMIT")).transpose()?;
    let offset = select.offset.map(|b| binder.bound(b, "OFFSET")).transpose()?;
    let order = order(select, &scope)?;
    let projection = projection(select, &scope)?;

    if compiled.unsatisfiable {
        return Ok(Outcome::Rows {
            rows: Vec::new(),
            degraded: false,
        });
    }

    let mut request = SelectRequest {
        table: table.clone(),
        projection,
        embeds: Vec::new(),
        filters: compiled.filters,
        order,
        limit,
        offset,
    };

    let binary = ctx.config.binary_columns_of(table);

    if select.joins.is_empty() {
        let rows = batch::select(ctx.store, &request, ctx.config.chunk_size).await?;

        return Ok(Outcome::Rows {
            rows: decode(rows, binary)?,
            degraded: false,
        });
    }

    request.embeds = join::embeds(&select.joins, &request);

    let flattener = Flattener {
        joins: &select.joins,
        columns: &select.columns,
        scope: &scope,
        config: ctx.config,
    };

    let joined = match batch::select(ctx.store, &request, ctx.config.chunk_size).await {
        Ok(rows) => decode(rows, binary).and_then(|rows| flattener.flatten(rows)),
        Err(err) => Err(err),
    };

    match joined {
        Ok(rows) => Ok(Outcome::Rows { rows, degraded: false }),
        Err(err @ (Error::Backend(_) | Error::BatchAborted { .. } | Error::Shape { .. })) => {
            join::report_degradation(table, &err);

            let fallback = join::primary_only(&request);
            let rows = batch::select(ctx.store, &fallback, ctx.config.chunk_size).await?;

            Ok(Outcome::Rows {
                rows: decode(rows, binary)?,
                degraded: true,
            })
        }
        Err(err) => Err(err),
    }
}

fn decode(mut rows: Vec<Row>, binary: &[String]) -> crate::Result<Vec<Row>> {
    if !binary.is_empty() {
        for row in &mut rows {
            decode_row(row, binary)?;
        }
    }

    Ok(rows)
}

/// Sort keys. The store sorts by primary table columns only.
fn order(select: &Select, scope: &Scope<'_>) -> crate::Result<Vec<Order>> {
    select
        .order_by
        .iter()
        .map(|o| match scope.resolve(&o.column)? {
            Target::Primary => Ok(Order {
                column: o.column.name.clone(),
                descending: o.direction == Direction::Desc,
            }),
            Target::Joined(_) => Err(Error::parse(
                format!("ORDER BY on joined column `{}`", o.column),
                o.column.position,
            )),
        })
        .collect()
}

/// The columns to request. Joined selects fetch every primary column since flattening
/// needs the join keys; their `AS` aliases are applied, and rows trimmed to the named items,
/// while flattening.
fn projection(select: &Select, scope: &Scope<'_>) -> crate::Result<Vec<Projection>> {
    let mut projection = Vec::new();
    let mut wildcard = false;

    for item in &select.columns {
        match item {
            SelectItem::Wildcard { qualifier, position } => {
                wildcard |= scope.resolve_qualifier(qualifier.as_deref(), *position)? == Target::Primary;
            }
            SelectItem::Column { column, alias } => match scope.resolve(column)? {
                Target::Primary => projection.push(Projection {
                    column: column.name.clone(),
                    alias: alias.clone(),
                }),
                Target::Joined(_) => (),
            },
        }
    }

    if !select.joins.is_empty() {
        return Ok(Vec::new());
    }

    if wildcard && !projection.is_empty() {
        projection.insert(0, Projection::column("*"));
    } else if wildcard {
        projection.clear();
    }

    Ok(projection)
}
