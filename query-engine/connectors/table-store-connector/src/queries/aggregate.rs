use serde_json::Value as JsonValue;

use crate::{
    Error, Row,
    filter::{Binder, Scope, Target, compile_predicates},
    result::Outcome,
    statement::SelectCount,
    store::CountRequest,
};

use super::Context;

/// `SELECT COUNT(*)` and `SELECT COUNT(DISTINCT col)`, answered with a single
/// `{total, count}` row. An `AS` alias adds a third key with the same value.
pub(crate) async fn count(ctx: &Context<'_>, count: &SelectCount, binder: &mut Binder<'_>) -> crate::Result<Outcome> {
    let scope = Scope::new(&count.table, &[]);
    let compiled = compile_predicates(&count.predicates, &scope, binder)?;

    let distinct = match &count.distinct {
        Some(column) => match scope.resolve(column)? {
            Target::Primary => Some(column.name.clone()),
            Target::Joined(_) => return Err(Error::parse("COUNT over a joined column", column.position)),
        },
        None => None,
    };

    let total = if compiled.unsatisfiable {
        0
    } else {
        let request = CountRequest {
            table: count.table.name.clone(),
            filters: compiled.filters,
            distinct,
        };

        ctx.store.count(&request).await?
    };

    let mut row = Row::new();
    row.insert("total".to_owned(), JsonValue::from(total));
    row.insert("count".to_owned(), JsonValue::from(total));

    if let Some(alias) = &count.alias {
        row.insert(alias.clone(), JsonValue::from(total));
    }

    Ok(Outcome::Count(row))
}
