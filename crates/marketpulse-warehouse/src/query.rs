//! Guarded ad-hoc SQL for inspection tools.

use std::time::{Duration, Instant};

use ::duckdb::types::Value as DuckValue;
use ::duckdb::{Connection, Statement};
use serde::Serialize;
use serde_json::{Number, Value};

use crate::WarehouseError;

/// Row and time limits applied to an ad-hoc query.
#[derive(Debug, Clone, Copy)]
pub struct QueryGuardrails {
    pub max_rows: usize,
    pub query_timeout_ms: u64,
}

impl Default for QueryGuardrails {
    fn default() -> Self {
        Self {
            max_rows: 1_000,
            query_timeout_ms: 5_000,
        }
    }
}

impl QueryGuardrails {
    fn timeout(self) -> Duration {
        Duration::from_millis(self.query_timeout_ms.max(1))
    }

    fn validate(self) -> Result<(), WarehouseError> {
        if self.max_rows == 0 {
            return Err(WarehouseError::QueryRejected(String::from(
                "max rows must be greater than zero",
            )));
        }
        if self.query_timeout_ms == 0 {
            return Err(WarehouseError::QueryRejected(String::from(
                "query timeout must be greater than zero",
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SqlColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub r#type: String,
}

/// Result set of an ad-hoc query, rows rendered as JSON values.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub columns: Vec<SqlColumn>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    pub truncated: bool,
}

/// Statements that change data, schema or the attached catalog.
const WRITE_KEYWORDS: [&str; 18] = [
    "ALTER", "ATTACH", "CALL", "CHECKPOINT", "COPY", "CREATE", "DELETE", "DETACH", "DROP",
    "EXPORT", "GRANT", "IMPORT", "INSERT", "INSTALL", "LOAD", "PRAGMA", "TRUNCATE", "UPDATE",
];

/// Validate `sql` as a single read-only statement and return it without trailing semicolons.
///
/// Keywords are matched outside string literals, quoted identifiers and
/// comments, so `WITH t AS (...) DELETE ...` is caught while `WHERE note = 'drop'` is not.
pub(crate) fn prepare_read_only(sql: &str) -> Result<&str, WarehouseError> {
    let sql = sql.trim().trim_end_matches(';').trim();
    if sql.is_empty() {
        return Err(WarehouseError::QueryRejected(String::from(
            "query must not be empty",
        )));
    }

    let tokens = scan(sql);
    let first_keyword = tokens
        .iter()
        .find_map(|token| match token {
            Token::Word(word) => Some(word.to_ascii_uppercase()),
            Token::Separator => None,
        })
        .unwrap_or_default();
    if !matches!(
        first_keyword.as_str(),
        "SELECT" | "WITH" | "EXPLAIN" | "SHOW" | "DESCRIBE" | "SUMMARIZE" | "FROM"
    ) {
        return Err(WarehouseError::QueryRejected(format!(
            "only read-only statements are accepted, got '{first_keyword}'"
        )));
    }

    if tokens.contains(&Token::Separator) {
        return Err(WarehouseError::QueryRejected(String::from(
            "multiple statements are not allowed",
        )));
    }

    if let Some(keyword) = tokens.iter().find_map(|token| match token {
        Token::Word(word) => WRITE_KEYWORDS
            .iter()
            .find(|keyword| word.eq_ignore_ascii_case(keyword)),
        Token::Separator => None,
    }) {
        return Err(WarehouseError::QueryRejected(format!(
            "'{keyword}' is not allowed in a read-only query"
        )));
    }

    Ok(sql)
}

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Separator,
}

/// Bare words and `;` of `sql`, skipping literals, quoted identifiers and comments.
fn scan(sql: &str) -> Vec<Token<'_>> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut index = 0;

    while index < bytes.len() {
        match bytes[index] {
            quote @ (b'\'' | b'"') => {
                index += 1;
                while index < bytes.len() {
                    if bytes[index] == quote {
                        // A doubled quote is an escaped quote inside the literal.
                        if bytes.get(index + 1) == Some(&quote) {
                            index += 2;
                            continue;
                        }
                        break;
                    }
                    index += 1;
                }
                index += 1;
            }
            b'-' if bytes.get(index + 1) == Some(&b'-') => {
                while index < bytes.len() && bytes[index] != b'\n' {
                    index += 1;
                }
            }
            b'/' if bytes.get(index + 1) == Some(&b'*') => {
                index += 2;
                while index < bytes.len()
                    && !(bytes[index] == b'*' && bytes.get(index + 1) == Some(&b'/'))
                {
                    index += 1;
                }
                index += 2;
            }
            b';' => {
                tokens.push(Token::Separator);
                index += 1;
            }
            byte if byte.is_ascii_alphabetic() || byte == b'_' => {
                let start = index;
                while index < bytes.len()
                    && (bytes[index].is_ascii_alphanumeric() || bytes[index] == b'_')
                {
                    index += 1;
                }
                tokens.push(Token::Word(&sql[start..index]));
            }
            _ => index += 1,
        }
    }

    tokens
}

pub(crate) fn run_guarded(
    connection: &Connection,
    sql: &str,
    guardrails: QueryGuardrails,
) -> Result<QueryResult, WarehouseError> {
    guardrails.validate()?;
    let started = Instant::now();
    let deadline = guardrails.timeout();

    let mut statement = connection.prepare(sql)?;
    let mut cursor = statement.query([])?;
    // Column metadata is only populated once the statement has run.
    let columns = cursor.as_ref().map(describe_columns).unwrap_or_default();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut truncated = false;
    while let Some(row) = cursor.next()? {
        check_deadline(started, deadline)?;
        if rows.len() >= guardrails.max_rows {
            truncated = true;
            break;
        }

        let mut values = Vec::with_capacity(width);
        for index in 0..width {
            values.push(to_json_value(row.get::<_, DuckValue>(index)?));
        }
        rows.push(values);
    }

    check_deadline(started, deadline)?;
    Ok(QueryResult {
        columns,
        row_count: rows.len(),
        rows,
        truncated,
    })
}

fn describe_columns(statement: &Statement<'_>) -> Vec<SqlColumn> {
    (0..statement.column_count())
        .map(|index| SqlColumn {
            name: statement
                .column_name(index)
                .map(|name| name.to_string())
                .unwrap_or_else(|_| format!("column_{index}")),
            r#type: statement.column_type(index).to_string(),
        })
        .collect()
}

fn check_deadline(started: Instant, deadline: Duration) -> Result<(), WarehouseError> {
    if started.elapsed() > deadline {
        return Err(WarehouseError::QueryTimeout {
            timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
        });
    }
    Ok(())
}

fn to_json_value(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(value) => Value::Bool(value),
        DuckValue::TinyInt(value) => Value::from(value),
        DuckValue::SmallInt(value) => Value::from(value),
        DuckValue::Int(value) => Value::from(value),
        DuckValue::BigInt(value) => Value::from(value),
        DuckValue::UTinyInt(value) => Value::from(value),
        DuckValue::USmallInt(value) => Value::from(value),
        DuckValue::UInt(value) => Value::from(value),
        DuckValue::UBigInt(value) => Value::from(value),
        DuckValue::Float(value) => finite_number(f64::from(value)),
        DuckValue::Double(value) => finite_number(value),
        DuckValue::Text(value) => Value::String(value),
        other => Value::String(format!("{other:?}")),
    }
}

fn finite_number(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_writes_and_statement_chains() {
        assert!(matches!(
            prepare_read_only("DELETE FROM quotes"),
            Err(WarehouseError::QueryRejected(_))
        ));
        assert!(matches!(
            prepare_read_only("SELECT 1; DROP TABLE quotes"),
            Err(WarehouseError::QueryRejected(_))
        ));
        assert!(matches!(
            prepare_read_only("   "),
            Err(WarehouseError::QueryRejected(_))
        ));
    }

    #[test]
    fn rejects_writes_hidden_behind_a_cte() {
        // Given: statements that open like a read but modify data
        let hidden = [
            "WITH doomed AS (SELECT 1) DELETE FROM quotes",
            "with t as (select 1) insert into quotes select * from quotes",
            "SELECT 1 /* harmless */ ; DROP TABLE quotes",
        ];

        // When / Then: each is rejected before it reaches the database
        for sql in hidden {
            assert!(
                matches!(prepare_read_only(sql), Err(WarehouseError::QueryRejected(_))),
                "{sql}"
            );
        }
    }

    #[test]
    fn keywords_inside_literals_and_comments_are_ignored() {
        // Given: reads that mention write keywords only as data or commentary
        let reads = [
            "SELECT * FROM system_health WHERE error_message = 'DROP; DELETE'",
            "SELECT 'it''s a delete' AS note -- update later",
            "SELECT \"insert\" FROM (SELECT 1 AS \"insert\")",
            "SELECT updated_at FROM instruments",
        ];

        // When / Then: each passes the gate unchanged
        for sql in reads {
            assert_eq!(prepare_read_only(sql).expect(sql), sql);
        }
    }

    #[test]
    fn strips_trailing_semicolons() {
        assert_eq!(
            prepare_read_only("select * from quotes;;").expect("accepted"),
            "select * from quotes"
        );
    }

    #[test]
    fn truncates_at_max_rows() {
        let connection = Connection::open_in_memory().expect("db");
        let result = run_guarded(
            &connection,
            "SELECT * FROM range(10) t(i)",
            QueryGuardrails {
                max_rows: 3,
                query_timeout_ms: 5_000,
            },
        )
        .expect("query");

        assert_eq!(result.row_count, 3);
        assert!(result.truncated);
        assert_eq!(result.columns[0].name, "i");
        assert_eq!(result.rows[1][0], Value::from(1_i64));
    }
}
