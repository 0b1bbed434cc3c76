//! Parameterized SQL building and parameter binding.
//!
//! Queries are assembled as SQL strings with `$1, $2, ...` placeholders
//! and a parallel parameter vector, so no document or key material is ever
//! interpolated into statement text.

use bytes::BytesMut;
use tokio_postgres::types::{IsNull, ToSql, Type as PgTypeInfo, to_sql_checked};

/// A runtime SQL parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_owned())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(v: serde_json::Value) -> Self {
        SqlValue::Json(v)
    }
}

/// Result of building a query: SQL text and parameter values in order.
#[derive(Debug)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Builds SQL incrementally, tracking parameter indices.
pub(crate) struct SqlBuilder {
    sql: String,
    params: Vec<SqlValue>,
}

impl SqlBuilder {
    pub fn new() -> Self {
        SqlBuilder {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    pub fn push(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    /// Append a parameter placeholder and register its value.
    pub fn push_param(&mut self, value: impl Into<SqlValue>) {
        self.params.push(value.into());
        self.sql.push('$');
        self.sql.push_str(&self.params.len().to_string());
    }

    /// Append a quoted identifier, doubling embedded quotes.
    pub fn push_ident(&mut self, name: &str) {
        self.sql.push('"');
        for c in name.chars() {
            if c == '"' {
                self.sql.push('"');
            }
            self.sql.push(c);
        }
        self.sql.push('"');
    }

    /// Append `LIMIT`/`OFFSET` from an optional pair.
    pub fn push_limit_offset(&mut self, limit: Option<u64>, offset: Option<u64>) {
        if let Some(n) = limit {
            self.push(" LIMIT ");
            self.push(&n.to_string());
        }
        if let Some(n) = offset {
            self.push(" OFFSET ");
            self.push(&n.to_string());
        }
    }

    pub fn finish(self) -> BuiltQuery {
        BuiltQuery {
            sql: self.sql,
            params: self.params,
        }
    }
}

/// Wrapper binding a [`SqlValue`] as a statement parameter.
#[derive(Debug)]
pub(crate) struct SqlParam<'a>(pub &'a SqlValue);

impl ToSql for SqlParam<'_> {
    fn to_sql(
        &self,
        ty: &PgTypeInfo,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self.0 {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(v) => v.to_sql(ty, out),
            SqlValue::Int(v) => v.to_sql(ty, out),
            SqlValue::Text(v) => v.to_sql(ty, out),
            SqlValue::Bytes(v) => v.to_sql(ty, out),
            SqlValue::Json(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(ty: &PgTypeInfo) -> bool {
        matches!(
            *ty,
            PgTypeInfo::BOOL
                | PgTypeInfo::INT4
                | PgTypeInfo::INT8
                | PgTypeInfo::TEXT
                | PgTypeInfo::VARCHAR
                | PgTypeInfo::BYTEA
                | PgTypeInfo::JSON
                | PgTypeInfo::JSONB
        )
    }

    to_sql_checked!();
}

/// Borrow a parameter vector in the form the driver wants.
pub(crate) fn bind_params(params: &[SqlValue]) -> Vec<SqlParam<'_>> {
    params.iter().map(SqlParam).collect()
}
