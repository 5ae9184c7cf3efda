use serde_json::{Number, Value as JsonValue};

use super::lexer::{Spanned, Token, tokenize};
use super::*;
use crate::Error;

/// Words that terminate an identifier position. They can still be used as column names when
/// quoted.
const RESERVED: &[&str] = &[
    "SELECT", "FROM", "WHERE", "AND", "OR", "NOT", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "OUTER", "ON",
    "ORDER", "BY", "GROUP", "HAVING", "LIMIT", "OFFSET", "AS", "INSERT", "INTO", "VALUES", "UPDATE", "SET", "DELETE",
    "UNION", "LIKE", "IN", "IS", "ASC", "DESC", "RETURNING",
];

/// Parses one statement of the dialect.
///
/// ```text
/// SELECT <cols|*> FROM <table> [<j> JOIN <table2> [<alias>] ON <col>=<col>]
///   [WHERE <cond> [AND <cond>]*] [ORDER BY <col> (ASC|DESC)] [LIMIT <n>] [OFFSET <n>]
/// SELECT COUNT(*|DISTINCT <col>) FROM <table> [WHERE ...]
/// INSERT INTO <table> (<col>,...) VALUES (<val>,...) [ON CONFLICT|ON DUPLICATE KEY UPDATE ...]
/// UPDATE <table> SET <col>=<val>[,...] [WHERE ...]
/// DELETE FROM <table> [WHERE ...]
/// ```
///
/// Anything outside the grammar is rejected with [`Error::Parse`] naming the construct.
pub fn parse(sql: &str) -> crate::Result<Statement> {
    let tokens = tokenize(sql)?;
    let mut parser = Parser { tokens, pos: 0 };

    parser.statement()
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn statement(&mut self) -> crate::Result<Statement> {
        let statement = if self.eat_keyword("SELECT") {
            if self.peek_keyword("COUNT") && self.peek_nth(1) == &Token::LParen {
                Statement::SelectCount(self.select_count()?)
            } else {
                Statement::Select(self.select()?)
            }
        } else if self.eat_keyword("INSERT") {
            Statement::Insert(self.insert()?)
        } else if self.eat_keyword("UPDATE") {
            Statement::Update(self.update()?)
        } else if self.eat_keyword("DELETE") {
            Statement::Delete(self.delete()?)
        } else {
            return Err(self.unsupported(format!("statement starting with `{}`", self.peek())));
        };

        self.eat(&Token::Semicolon);

        if self.peek() != &Token::Eof {
            return Err(self.unsupported(format!("unexpected `{}` after the statement", self.peek())));
        }

        Ok(statement)
    }

    fn select(&mut self) -> crate::Result<Select> {
        let columns = self.select_items()?;

        if !self.eat_keyword("FROM") {
            return Err(self.unsupported("SELECT without FROM"));
        }

        let table = self.table_ref("FROM")?;
        let joins = self.joins(&table)?;
        let predicates = self.where_clause()?;
        let order_by = self.order_by()?;

        let limit = if self.eat_keyword("LIMIT") {
            Some(self.row_bound("LIMIT")?)
        } else {
            None
        };

        let offset = if self.eat_keyword("OFFSET") {
            Some(self.row_bound("OFFSET")?)
        } else {
            None
        };

        Ok(Select {
            table,
            columns,
            joins,
            predicates,
            order_by,
            limit,
            offset,
        })
    }

    fn select_count(&mut self) -> crate::Result<SelectCount> {
        self.expect_keyword("COUNT")?;
        self.expect(&Token::LParen, "COUNT(")?;

        let distinct = if self.eat(&Token::Star) {
            None
        } else if self.eat_keyword("DISTINCT") {
            Some(self.column_ref()?)
        } else {
            return Err(self.unsupported("COUNT over a column without DISTINCT"));
        };

        self.expect(&Token::RParen, "COUNT(..)")?;
        let alias = self.alias()?;

        if self.peek() == &Token::Comma {
            return Err(self.unsupported("COUNT combined with other select items"));
        }

        if !self.eat_keyword("FROM") {
            return Err(self.unsupported("SELECT COUNT without FROM"));
        }

        let table = self.table_ref("FROM")?;

        if self.peek_join() {
            return Err(self.unsupported("JOIN in a COUNT query"));
        }

        let predicates = self.where_clause()?;

        Ok(SelectCount {
            table,
            distinct,
            alias,
            predicates,
        })
    }

    fn insert(&mut self) -> crate::Result<Insert> {
        if !self.eat_keyword("INTO") {
            return Err(self.unsupported("INSERT without INTO"));
        }

        let table = self.identifier("table name after INTO")?;

        if !self.eat(&Token::LParen) {
            return Err(self.unsupported("INSERT without a column list"));
        }

        let columns = self.comma_separated(|p| p.identifier("column name"))?;
        self.expect(&Token::RParen, "column list")?;

        if !self.eat_keyword("VALUES") {
            return Err(self.unsupported("INSERT without VALUES"));
        }

        let tuple_offset = self.offset();
        self.expect(&Token::LParen, "VALUES (")?;
        let values = self.comma_separated(Self::value_expr)?;
        self.expect(&Token::RParen, "VALUES (..)")?;

        if self.peek() == &Token::Comma {
            return Err(self.unsupported("multi-row VALUES"));
        }

        if values.len() != columns.len() {
            return Err(Error::parse(
                format!("{} column(s) but {} value(s)", columns.len(), values.len()),
                tuple_offset,
            ));
        }

        let upsert = self.upsert_clause()?;

        Ok(Insert {
            table,
            columns,
            values,
            upsert,
        })
    }

    /// Detects `ON CONFLICT ..` / `ON DUPLICATE KEY UPDATE ..` and skips the clause body.
    fn upsert_clause(&mut self) -> crate::Result<bool> {
        if !self.eat_keyword("ON") {
            return Ok(false);
        }

        let recognized = if self.eat_keyword("CONFLICT") {
            true
        } else {
            self.eat_keyword("DUPLICATE") && self.eat_keyword("KEY") && self.eat_keyword("UPDATE")
        };

        if !recognized {
            return Err(self.unsupported("ON clause that is not ON CONFLICT / ON DUPLICATE KEY UPDATE"));
        }

        while !matches!(self.peek(), Token::Semicolon | Token::Eof) {
            self.pos += 1;
        }

        Ok(true)
    }

    fn update(&mut self) -> crate::Result<Update> {
        let table = self.identifier("table name after UPDATE")?;

        if !self.eat_keyword("SET") {
            return Err(self.unsupported("UPDATE without SET"));
        }

        let assignments = self.comma_separated(|p| {
            let column = p.assignment_target()?;
            p.expect(&Token::Eq, "SET column =")?;
            let value = p.value_expr()?;
            Ok((column, value))
        })?;

        let predicates = self.where_clause()?;

        Ok(Update {
            table,
            assignments,
            predicates,
        })
    }

    fn delete(&mut self) -> crate::Result<Delete> {
        if !self.eat_keyword("FROM") {
            return Err(self.unsupported("DELETE without FROM"));
        }

        let table = self.identifier("table name after FROM")?;
        let predicates = self.where_clause()?;

        Ok(Delete { table, predicates })
    }

    fn select_items(&mut self) -> crate::Result<Vec<SelectItem>> {
        self.comma_separated(|p| {
            let position = p.offset();

            if p.eat(&Token::Star) {
                return Ok(SelectItem::Wildcard {
                    qualifier: None,
                    position,
                });
            }

            let first = p.identifier("select item")?;

            if p.peek() == &Token::LParen {
                return Err(p.unsupported(format!("function `{first}()` in the select list")));
            }

            let column = if p.eat(&Token::Dot) {
                if p.eat(&Token::Star) {
                    return Ok(SelectItem::Wildcard {
                        qualifier: Some(first),
                        position,
                    });
                }

                ColumnRef {
                    qualifier: Some(first),
                    name: p.identifier("column name")?,
                    position,
                }
            } else {
                ColumnRef::bare(first).at(position)
            };

            let alias = p.alias()?;
            Ok(SelectItem::Column { column, alias })
        })
    }

    fn alias(&mut self) -> crate::Result<Option<String>> {
        if self.eat_keyword("AS") {
            Ok(Some(self.identifier("alias after AS")?))
        } else {
            Ok(None)
        }
    }

    fn table_ref(&mut self, after: &str) -> crate::Result<TableRef> {
        let name = self.identifier(&format!("table name after {after}"))?;

        let alias = if self.eat_keyword("AS") {
            Some(self.identifier("table alias")?)
        } else if self.peek_identifier() {
            Some(self.identifier("table alias")?)
        } else {
            None
        };

        Ok(TableRef { name, alias })
    }

    fn peek_join(&self) -> bool {
        ["JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS"]
            .iter()
            .any(|kw| self.peek_keyword(kw))
    }

    fn joins(&mut self, primary: &TableRef) -> crate::Result<Vec<JoinSpec>> {
        let mut joins: Vec<JoinSpec> = Vec::new();

        while self.peek_join() {
            let kind = if self.eat_keyword("INNER") {
                JoinKind::Inner
            } else if self.eat_keyword("LEFT") {
                self.eat_keyword("OUTER");
                JoinKind::Left
            } else if self.peek_keyword("JOIN") {
                JoinKind::Inner
            } else {
                return Err(self.unsupported(format!("{} JOIN", self.peek())));
            };

            if !self.eat_keyword("JOIN") {
                return Err(self.unsupported(format!("`{}` where JOIN was expected", self.peek())));
            }

            let foreign = self.table_ref("JOIN")?;

            if !self.eat_keyword("ON") {
                return Err(self.unsupported("JOIN without ON"));
            }

            let on_offset = self.offset();
            let left = self.column_ref()?;

            if !self.eat(&Token::Eq) {
                return Err(self.unsupported(format!("join condition using `{}`", self.peek())));
            }

            let right = self.column_ref()?;

            if self.peek_keyword("AND") || self.peek_keyword("OR") {
                return Err(self.unsupported("compound join condition"));
            }

            let side = |column: &ColumnRef| -> crate::Result<bool> {
                let Some(qualifier) = column.qualifier.as_deref() else {
                    return Err(Error::parse(format!("unqualified join column `{}`", column.name), on_offset));
                };

                if foreign.name.eq_ignore_ascii_case(qualifier)
                    || foreign.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(qualifier))
                {
                    Ok(false)
                } else if primary.is_named(qualifier) {
                    Ok(true)
                } else if joins.iter().any(|j| j.is_named(qualifier)) {
                    Err(Error::parse("join between two joined tables", on_offset))
                } else {
                    Err(Error::parse(format!("unknown table qualifier `{qualifier}`"), on_offset))
                }
            };

            let (local, foreign_column) = match (side(&left)?, side(&right)?) {
                (true, false) => (left, right),
                (false, true) => (right, left),
                _ => return Err(Error::parse("join condition must pair the two joined tables", on_offset)),
            };

            joins.push(JoinSpec {
                kind,
                foreign_table: foreign.name,
                alias: foreign.alias,
                local_column: local.name,
                foreign_column: foreign_column.name,
            });
        }

        Ok(joins)
    }

    fn where_clause(&mut self) -> crate::Result<Vec<Predicate>> {
        if !self.eat_keyword("WHERE") {
            return Ok(Vec::new());
        }

        let mut predicates = vec![self.predicate()?];

        loop {
            if self.eat_keyword("AND") {
                predicates.push(self.predicate()?);
            } else if self.peek_keyword("OR") {
                return Err(self.unsupported("OR"));
            } else {
                return Ok(predicates);
            }
        }
    }

    fn predicate(&mut self) -> crate::Result<Predicate> {
        match self.peek() {
            Token::LParen => return Err(self.unsupported("parenthesized condition")),
            Token::Word(w) if w.eq_ignore_ascii_case("NOT") => return Err(self.unsupported("NOT")),
            _ => (),
        }

        let column = self.column_ref()?;

        let (operator, operands) = if self.eat(&Token::Eq) {
            (Operator::Eq, vec![self.operand()?])
        } else if self.eat_keyword("LIKE") {
            (Operator::Like, vec![self.operand()?])
        } else if self.eat_keyword("IN") {
            self.expect(&Token::LParen, "IN (")?;

            if self.peek_keyword("SELECT") {
                return Err(self.unsupported("subquery"));
            }

            let operands = self.comma_separated(Self::operand)?;
            self.expect(&Token::RParen, "IN (..)")?;
            (Operator::In, operands)
        } else {
            let construct = match self.peek() {
                Token::Op(op) => format!("comparison operator `{op}`"),
                Token::Word(w) if w.eq_ignore_ascii_case("IS") => "IS [NOT] NULL".to_owned(),
                Token::Word(w) if w.eq_ignore_ascii_case("NOT") => format!("NOT after `{column}`"),
                other => format!("condition on `{column}` using `{other}`"),
            };

            return Err(self.unsupported(construct));
        };

        Ok(Predicate {
            column,
            operator,
            operands,
        })
    }

    fn operand(&mut self) -> crate::Result<Operand> {
        if let Token::Placeholder(index) = self.peek() {
            let index = *index;
            self.pos += 1;
            return Ok(Operand::Param(index));
        }

        match self.literal()? {
            Some(value) => Ok(Operand::Literal(value)),
            None => Err(self.unsupported(format!("operand `{}`", self.peek()))),
        }
    }

    fn literal(&mut self) -> crate::Result<Option<JsonValue>> {
        let offset = self.offset();

        let value = match self.peek().clone() {
            Token::Str(s) => JsonValue::String(s),
            Token::Number(n) => number(&n).ok_or_else(|| Error::parse(format!("number `{n}`"), offset))?,
            Token::Word(w) if w.eq_ignore_ascii_case("NULL") => JsonValue::Null,
            Token::Word(w) if w.eq_ignore_ascii_case("TRUE") => JsonValue::Bool(true),
            Token::Word(w) if w.eq_ignore_ascii_case("FALSE") => JsonValue::Bool(false),
            _ => return Ok(None),
        };

        self.pos += 1;
        Ok(Some(value))
    }

    fn value_expr(&mut self) -> crate::Result<ValueExpr> {
        if let Token::Placeholder(index) = self.peek() {
            let index = *index;
            self.pos += 1;
            return Ok(ValueExpr::Param(index));
        }

        if let Some(value) = self.literal()? {
            return Ok(ValueExpr::Literal(value));
        }

        if self.eat_keyword("CURRENT_TIMESTAMP") {
            return Ok(ValueExpr::Now);
        }

        let word = self.identifier("value")?;

        if !self.eat(&Token::LParen) {
            return Err(self.unsupported(format!("column reference `{word}` used as a value")));
        }

        if word.eq_ignore_ascii_case("NOW") {
            self.expect(&Token::RParen, "NOW()")?;
            return Ok(ValueExpr::Now);
        }

        if word.eq_ignore_ascii_case("COALESCE") {
            let param = match self.peek() {
                Token::Placeholder(index) => *index,
                _ => return Err(self.unsupported("COALESCE whose first argument is not `?`")),
            };
            self.pos += 1;

            self.expect(&Token::Comma, "COALESCE(?, column)")?;
            let column = self.identifier("COALESCE fallback column")?;
            self.expect(&Token::RParen, "COALESCE(?, column)")?;

            return Ok(ValueExpr::Coalesce { param, column });
        }

        Err(self.unsupported(format!("function `{word}()`")))
    }

    fn assignment_target(&mut self) -> crate::Result<String> {
        let first = self.identifier("column name in SET")?;

        // `SET t.col = ?` is accepted for the updated table only; the qualifier is dropped.
        if self.eat(&Token::Dot) {
            return self.identifier("column name in SET");
        }

        Ok(first)
    }

    fn order_by(&mut self) -> crate::Result<Vec<OrderBy>> {
        if !self.eat_keyword("ORDER") {
            return Ok(Vec::new());
        }

        if !self.eat_keyword("BY") {
            return Err(self.unsupported("ORDER without BY"));
        }

        self.comma_separated(|p| {
            let column = p.column_ref()?;
            let direction = if p.eat_keyword("DESC") {
                Direction::Desc
            } else {
                p.eat_keyword("ASC");
                Direction::Asc
            };

            Ok(OrderBy { column, direction })
        })
    }

    fn row_bound(&mut self, clause: &str) -> crate::Result<RowBound> {
        let offset = self.offset();

        match self.peek().clone() {
            Token::Placeholder(index) => {
                self.pos += 1;
                Ok(RowBound::Param(index))
            }
            Token::Number(n) => {
                self.pos += 1;
                n.parse::<u64>()
                    .map(RowBound::Literal)
                    .map_err(|_| Error::parse(format!("{clause} `{n}`"), offset))
            }
            other => Err(Error::parse(format!("{clause} `{other}`"), offset)),
        }
    }

    fn column_ref(&mut self) -> crate::Result<ColumnRef> {
        let position = self.offset();
        let first = self.identifier("column name")?;

        if self.peek() == &Token::LParen {
            return Err(self.unsupported(format!("function `{first}()` in a condition")));
        }

        if self.eat(&Token::Dot) {
            Ok(ColumnRef {
                qualifier: Some(first),
                name: self.identifier("column name")?,
                position,
            })
        } else {
            Ok(ColumnRef::bare(first).at(position))
        }
    }

    fn comma_separated<T>(&mut self, mut item: impl FnMut(&mut Self) -> crate::Result<T>) -> crate::Result<Vec<T>> {
        let mut items = vec![item(self)?];

        while self.eat(&Token::Comma) {
            items.push(item(self)?);
        }

        Ok(items)
    }

    fn identifier(&mut self, what: &str) -> crate::Result<String> {
        match self.peek().clone() {
            Token::Quoted(name) => {
                self.pos += 1;
                Ok(name)
            }
            Token::Word(word) if !is_reserved(&word) => {
                self.pos += 1;
                Ok(word)
            }
            other => Err(self.unsupported(format!("missing {what} (found `{other}`)"))),
        }
    }

    fn peek_identifier(&self) -> bool {
        match self.peek() {
            Token::Quoted(_) => true,
            Token::Word(word) => !is_reserved(word),
            _ => false,
        }
    }

    fn peek(&self) -> &Token {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> &Token {
        self.tokens
            .get(self.pos + n)
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|s| s.offset)
            .unwrap_or_default()
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Token::Word(w) if w.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let found = self.peek_keyword(keyword);
        if found {
            self.pos += 1;
        }
        found
    }

    fn expect_keyword(&mut self, keyword: &str) -> crate::Result<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unsupported(format!("`{}` where {keyword} was expected", self.peek())))
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        let found = self.peek() == token;
        if found {
            self.pos += 1;
        }
        found
    }

    fn expect(&mut self, token: &Token, context: &str) -> crate::Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.unsupported(format!("`{}` in {context}, expected `{token}`", self.peek())))
        }
    }

    fn unsupported(&self, construct: impl Into<String>) -> Error {
        Error::parse(construct, self.offset())
    }
}

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(word))
}

fn number(text: &str) -> Option<JsonValue> {
    if text.contains('.') {
        text.parse::<f64>().ok().and_then(Number::from_f64).map(JsonValue::Number)
    } else {
        text.parse::<i64>().ok().map(JsonValue::from)
    }
}
