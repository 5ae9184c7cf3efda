//! Join emulation.
//!
//! A joined select is sent as one request on the primary table with the joined tables embedded
//! under their aliases. The embedded rows are then flattened into the primary row twice: as
//! `<table>_<column>` and, for the configured short aliases, as the bare `<column>`. Primary
//! columns always win a name clash. A select list without any wildcard then trims each row to
//! the keys its items name.
//!
//! When the store cannot answer the embedded request the select is re-issued on the primary
//! table alone. That fallback is never silent: the result is flagged, a warning is logged and a
//! counter is bumped.

use serde_json::Value as JsonValue;
use tracing::warn;

use crate::{
    ConnectorConfig, Error, Row,
    binary::decode_row,
    filter::{Scope, Target},
    logger,
    statement::{JoinKind, JoinSpec, SelectItem},
    store::{Embed, SelectRequest},
};

/// The embeds requested for `joins`. An embed that is filtered on must drop the parent rows it
/// does not match, like a `WHERE` on a joined column would.
pub(crate) fn embeds(joins: &[JoinSpec], request: &SelectRequest) -> Vec<Embed> {
    joins
        .iter()
        .map(|join| {
            let alias = join.embed_name().to_owned();
            let filtered = request.filters.iter().any(|f| f.embed() == Some(alias.as_str()));

            Embed {
                table: join.foreign_table.clone(),
                local_column: join.local_column.clone(),
                foreign_column: join.foreign_column.clone(),
                inner: join.kind == JoinKind::Inner || filtered,
                alias,
            }
        })
        .collect()
}

/// The same request without embeds and without the filters that target them.
pub(crate) fn primary_only(request: &SelectRequest) -> SelectRequest {
    SelectRequest {
        embeds: Vec::new(),
        filters: request
            .filters
            .iter()
            .filter(|f| f.embed().is_none())
            .cloned()
            .collect(),
        ..request.clone()
    }
}

pub(crate) fn report_degradation(table: &str, reason: &Error) {
    warn!(
        table,
        reason = %reason,
        "joined select answered without its joined tables"
    );

    logger::record_degradation(table);
}

/// Flattens embedded rows into their parent rows.
///
/// A to-many embed yields one output row per related row. A parent without related rows keeps
/// its own columns only.
pub(crate) struct Flattener<'a> {
    pub joins: &'a [JoinSpec],
    pub columns: &'a [SelectItem],
    pub scope: &'a Scope<'a>,
    pub config: &'a ConnectorConfig,
}

impl Flattener<'_> {
    pub(crate) fn flatten(&self, rows: Vec<Row>) -> crate::Result<Vec<Row>> {
        let mut out = Vec::with_capacity(rows.len());

        for row in rows {
            self.flatten_row(row, &mut out)?;
        }

        if let Some(keys) = self.requested_keys()? {
            for row in &mut out {
                let mut full = std::mem::take(row);

                for key in &keys {
                    if let Some(value) = full.remove(key) {
                        row.insert(key.clone(), value);
                    }
                }
            }
        }

        Ok(out)
    }

    /// The output keys named by the select list, or `None` when a wildcard keeps whole rows.
    /// An unaliased joined column answers to its prefixed key, and to its bare name when the
    /// join alias flattens bare.
    fn requested_keys(&self) -> crate::Result<Option<Vec<String>>> {
        let mut keys = Vec::new();

        for item in self.columns {
            let (column, alias) = match item {
                SelectItem::Wildcard { .. } => return Ok(None),
                SelectItem::Column { column, alias } => (column, alias),
            };

            if let Some(alias) = alias {
                keys.push(alias.clone());
                continue;
            }

            match self.scope.resolve(column)? {
                Target::Primary => keys.push(column.name.clone()),
                Target::Joined(join) => {
                    keys.push(format!("{}_{}", join.foreign_table, column.name));

                    if self.config.flattens_bare(join.embed_name()) {
                        keys.push(column.name.clone());
                    }
                }
            }
        }

        Ok(Some(keys))
    }

    fn flatten_row(&self, row: Row, out: &mut Vec<Row>) -> crate::Result<()> {
        let mut primary = Row::new();
        let mut embedded = Vec::with_capacity(self.joins.len());

        for join in self.joins {
            embedded.push(self.related_rows(join, row.get(join.embed_name()))?);
        }

        for (column, value) in row {
            if !self.joins.iter().any(|j| j.embed_name() == column) {
                primary.insert(column, value);
            }
        }

        // One combination of related rows per output row.
        let mut combinations: Vec<Vec<Option<&Row>>> = vec![Vec::new()];

        for related in &embedded {
            let options: Vec<Option<&Row>> = if related.is_empty() {
                vec![None]
            } else {
                related.iter().map(Some).collect()
            };

            combinations = combinations
                .into_iter()
                .flat_map(|combination| {
                    options.iter().map(move |option| {
                        let mut next = combination.clone();
                        next.push(*option);
                        next
                    })
                })
                .collect();
        }

        for combination in combinations {
            out.push(self.merge(&primary, &combination)?);
        }

        Ok(())
    }

    fn related_rows(&self, join: &JoinSpec, value: Option<&JsonValue>) -> crate::Result<Vec<Row>> {
        let alias = join.embed_name();
        let binary = self.config.binary_columns_of(&join.foreign_table);

        let mut rows = match value {
            None | Some(JsonValue::Null) => Vec::new(),
            Some(JsonValue::Object(row)) => vec![row.clone()],
            Some(JsonValue::Array(items)) => items
                .iter()
                .map(|item| match item {
                    JsonValue::Object(row) => Ok(row.clone()),
                    other => Err(Error::shape(alias, format!("embedded row is `{other}`"))),
                })
                .collect::<crate::Result<_>>()?,
            Some(other) => return Err(Error::shape(alias, format!("embedded value is `{other}`"))),
        };

        for row in &mut rows {
            decode_row(row, binary)?;
        }

        Ok(rows)
    }

    fn merge(&self, primary: &Row, related: &[Option<&Row>]) -> crate::Result<Row> {
        let mut row = primary.clone();

        for (join, foreign) in self.joins.iter().zip(related) {
            let Some(foreign) = foreign else { continue };
            let bare = self.config.flattens_bare(join.embed_name());

            for (column, value) in foreign.iter() {
                let prefixed = format!("{}_{column}", join.foreign_table);

                if !primary.contains_key(&prefixed) {
                    row.insert(prefixed, value.clone());
                }

                if bare && !primary.contains_key(column) {
                    row.insert(column.clone(), value.clone());
                }
            }
        }

        for item in self.columns {
            let SelectItem::Column {
                column,
                alias: Some(alias),
            } = item
            else {
                continue;
            };

            let value = match self.scope.resolve(column)? {
                Target::Primary => primary.get(&column.name).cloned(),
                Target::Joined(join) => self
                    .joins
                    .iter()
                    .position(|j| j.embed_name() == join.embed_name())
                    .and_then(|i| related[i])
                    .and_then(|foreign| foreign.get(&column.name).cloned()),
            };

            row.insert(alias.clone(), value.unwrap_or(JsonValue::Null));
        }

        Ok(row)
    }
}
