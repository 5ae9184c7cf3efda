//! Binding of `WHERE` conjuncts to store filters.

use serde_json::Value as JsonValue;
use tracing::warn;

use crate::{
    Error, Param,
    binary::{normalize_json, normalize_param},
    statement::{ColumnRef, JoinSpec, Operand, Operator, Predicate, RowBound, TableRef},
    store::Filter,
    value::scalar_text,
};

/// Hands out parameters by placeholder index and remembers which ones were used.
pub(crate) struct Binder<'a> {
    params: &'a [Param],
    used: Vec<bool>,
}

impl<'a> Binder<'a> {
    pub(crate) fn new(params: &'a [Param]) -> Self {
        Self {
            params,
            used: vec![false; params.len()],
        }
    }

    pub(crate) fn param(&mut self, index: usize) -> crate::Result<&'a Param> {
        let param = self.params.get(index).ok_or(Error::MissingParameter {
            index,
            supplied: self.params.len(),
        })?;

        self.used[index] = true;
        Ok(param)
    }

    /// The JSON value of a predicate operand, as written to `column`.
    fn operand(&mut self, column: &str, operand: &Operand) -> crate::Result<JsonValue> {
        match operand {
            Operand::Param(index) => normalize_param(column, self.param(*index)?, false),
            Operand::Literal(value) => Ok(value.clone()),
        }
    }

    /// A `LIMIT` or `OFFSET` value. Numeric text is accepted for parameters.
    pub(crate) fn bound(&mut self, bound: RowBound, clause: &str) -> crate::Result<u64> {
        let index = match bound {
            RowBound::Literal(n) => return Ok(n),
            RowBound::Param(index) => index,
        };

        let value = self.param(index)?.to_json();
        let parsed = match &value {
            JsonValue::Number(n) => n.as_u64(),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        };

        parsed.ok_or_else(|| Error::shape(clause, format!("expected a non-negative integer, got `{value}`")))
    }

    /// Warns when the caller supplied parameters no placeholder referred to.
    pub(crate) fn finish(self) {
        let unused = self.used.iter().filter(|used| !**used).count();

        if unused > 0 {
            warn!(
                unused,
                supplied = self.params.len(),
                "statement did not use every supplied parameter"
            );
        }
    }
}

/// Where a column reference points to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Target<'a> {
    Primary,
    Joined(&'a JoinSpec),
}

/// The tables a statement can refer to: the primary table and its joins.
pub(crate) struct Scope<'a> {
    primary: &'a TableRef,
    joins: &'a [JoinSpec],
}

impl<'a> Scope<'a> {
    pub(crate) fn new(primary: &'a TableRef, joins: &'a [JoinSpec]) -> Self {
        Self { primary, joins }
    }

    /// Unqualified columns belong to the primary table.
    pub(crate) fn resolve(&self, column: &ColumnRef) -> crate::Result<Target<'a>> {
        self.resolve_qualifier(column.qualifier.as_deref(), column.position)
    }

    /// `position` is reported when the qualifier names no table in the statement.
    pub(crate) fn resolve_qualifier(&self, qualifier: Option<&str>, position: usize) -> crate::Result<Target<'a>> {
        let Some(qualifier) = qualifier else {
            return Ok(Target::Primary);
        };

        if self.primary.is_named(qualifier) {
            return Ok(Target::Primary);
        }

        self.joins
            .iter()
            .find(|join| join.is_named(qualifier))
            .map(Target::Joined)
            .ok_or_else(|| Error::parse(format!("unknown table qualifier `{qualifier}`"), position))
    }

    /// The column name in store notation: `column` or `embed.column`.
    fn store_column(&self, column: &ColumnRef) -> crate::Result<String> {
        Ok(match self.resolve(column)? {
            Target::Primary => column.name.clone(),
            Target::Joined(join) => format!("{}.{}", join.embed_name(), column.name),
        })
    }
}

#[derive(Debug, Default)]
pub(crate) struct CompiledFilters {
    pub filters: Vec<Filter>,
    /// Some conjunct can never match, e.g. `IN ()` after expansion. No request is needed.
    pub unsatisfiable: bool,
}

pub(crate) fn compile_predicates(
    predicates: &[Predicate],
    scope: &Scope<'_>,
    binder: &mut Binder<'_>,
) -> crate::Result<CompiledFilters> {
    let mut compiled = CompiledFilters::default();

    // Conjuncts are bound strictly in textual order.
    for predicate in predicates {
        let column = scope.store_column(&predicate.column)?;

        match predicate.operator {
            // `= NULL` is never true.
            Operator::Eq => match binder.operand(&column, &predicate.operands[0])? {
                JsonValue::Null => compiled.unsatisfiable = true,
                value => compiled.filters.push(Filter::eq(column, value)),
            },
            Operator::Like => match binder.operand(&column, &predicate.operands[0])? {
                JsonValue::Null => compiled.unsatisfiable = true,
                pattern => compiled.filters.push(Filter::ilike(column, scalar_text(&pattern))),
            },
            Operator::In => {
                let mut values = Vec::with_capacity(predicate.operands.len());

                for operand in &predicate.operands {
                    match binder.operand(&column, operand)? {
                        JsonValue::Array(items) => {
                            for item in &items {
                                values.push(normalize_json(&column, item, false)?);
                            }
                        }
                        JsonValue::Null => (),
                        value => values.push(value),
                    }
                }

                compiled.unsatisfiable |= values.is_empty();
                compiled.filters.push(Filter::is_in(column, values));
            }
        }
    }

    Ok(compiled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::{Statement, parse};
    use crate::store::FilterOp;
    use serde_json::json;

    fn compile(sql: &str, params: &[Param]) -> crate::Result<CompiledFilters> {
        let Statement::Select(select) = parse(sql).unwrap() else {
            panic!("not a select");
        };

        let scope = Scope::new(&select.table, &select.joins);
        let mut binder = Binder::new(params);
        compile_predicates(&select.predicates, &scope, &mut binder)
    }

    #[test]
    fn binds_in_placeholder_order() {
        let compiled = compile(
            "SELECT * FROM evaluations WHERE status IN (?, ?) AND job_id = ? AND note LIKE ?",
            &["open".into(), "closed".into(), 7.into(), "%urgent%".into()],
        )
        .unwrap();

        assert_eq!(
            compiled.filters,
            vec![
                Filter::is_in("status", vec![json!("open"), json!("closed")]),
                Filter::eq("job_id", 7),
                Filter::ilike("note", "%urgent%"),
            ]
        );
    }

    #[test]
    fn joined_columns_use_the_embed_name() {
        let compiled = compile(
            "SELECT * FROM evaluations e JOIN candidates c ON c.id = e.candidate_id WHERE c.email = ? AND e.id = ?",
            &["a@b.c".into(), 1.into()],
        )
        .unwrap();

        assert_eq!(compiled.filters[0].column, "c.email");
        assert_eq!(compiled.filters[1].column, "id");
    }

    #[test]
    fn array_parameters_expand_in_lists() {
        let compiled = compile(
            "SELECT * FROM candidates WHERE id IN (?)",
            &[Param::Json(json!([1, 2, 3]))],
        )
        .unwrap();

        assert_eq!(
            compiled.filters[0].op,
            FilterOp::In(vec![json!(1), json!(2), json!(3)])
        );

        let compiled = compile("SELECT * FROM candidates WHERE id IN (?)", &[Param::Json(json!([]))]).unwrap();
        assert!(compiled.unsatisfiable);
    }

    #[test]
    fn null_equality_matches_nothing() {
        let compiled = compile(
            "SELECT * FROM messages WHERE body = ? AND parent_id = ?",
            &["hi".into(), Param::null()],
        )
        .unwrap();

        assert!(compiled.unsatisfiable);
        assert_eq!(compiled.filters, vec![Filter::eq("body", "hi")]);

        let compiled = compile("SELECT * FROM messages WHERE parent_id = NULL", &[]).unwrap();
        assert!(compiled.unsatisfiable);
    }

    #[test]
    fn missing_parameters_are_reported_by_slot() {
        let err = compile("SELECT * FROM candidates WHERE a = ? AND b = ?", &["x".into()]).unwrap_err();
        assert!(matches!(err, Error::MissingParameter { index: 1, supplied: 1 }));
    }

    #[test]
    fn unknown_qualifiers_are_parse_errors() {
        let err = compile("SELECT * FROM candidates c WHERE x.name = ?", &["x".into()]).unwrap_err();
        assert!(err.is_parse_error());
    }

    #[test]
    fn row_bounds_accept_numeric_text() {
        let params = ["25".into(), Param::from(-1)];
        let mut binder = Binder::new(&params);

        assert_eq!(binder.bound(RowBound::Param(0), "LIMIT").unwrap(), 25);
        assert!(matches!(
            binder.bound(RowBound::Param(1), "OFFSET"),
            Err(Error::Shape { .. })
        ));
    }
}
