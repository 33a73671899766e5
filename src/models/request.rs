//! Logical operations, prepared requests and results.

use crate::error::{DbError, DbResult};
use crate::models::schema::TableSpec;
use crate::models::value::{Row, Value, row_from_json, row_to_json};
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// Logical operation understood by every pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Select,
    Search,
    List,
    Add,
    Put,
    Update,
    Incr,
    Del,
    Create,
    Upgrade,
    Drop,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Get => "get",
            Op::Select => "select",
            Op::Search => "search",
            Op::List => "list",
            Op::Add => "add",
            Op::Put => "put",
            Op::Update => "update",
            Op::Incr => "incr",
            Op::Del => "del",
            Op::Create => "create",
            Op::Upgrade => "upgrade",
            Op::Drop => "drop",
        }
    }

    /// Row-modifying operations that invalidate cached records.
    pub fn is_write(&self) -> bool {
        matches!(self, Op::Add | Op::Put | Op::Update | Op::Incr | Op::Del)
    }

    pub fn is_ddl(&self) -> bool {
        matches!(self, Op::Create | Op::Upgrade | Op::Drop)
    }

    pub fn is_read(&self) -> bool {
        matches!(self, Op::Get | Op::Select | Op::Search | Op::List)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Op {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "get" => Op::Get,
            "select" => Op::Select,
            "search" => Op::Search,
            "list" => Op::List,
            "add" => Op::Add,
            "put" => Op::Put,
            "update" => Op::Update,
            "incr" => Op::Incr,
            "del" => Op::Del,
            "create" => Op::Create,
            "upgrade" => Op::Upgrade,
            "drop" => Op::Drop,
            other => return Err(DbError::invalid_input(format!("Unknown operation: {other}"))),
        })
    }
}

/// Opaque pagination cursor.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Row offset for backends with OFFSET support
    Offset(u64),
    /// Key values of the last returned record
    Key(Row),
    /// Resume point for key-value scans
    Name(String),
}

impl Token {
    pub fn to_json(&self) -> JsonValue {
        match self {
            Token::Offset(n) => JsonValue::from(*n),
            Token::Key(row) => row_to_json(row),
            Token::Name(s) => JsonValue::String(s.clone()),
        }
    }

    pub fn from_json(value: JsonValue) -> Option<Token> {
        match value {
            JsonValue::Number(n) => n.as_u64().map(Token::Offset),
            JsonValue::String(s) => match s.parse::<u64>() {
                Ok(n) => Some(Token::Offset(n)),
                Err(_) => Some(Token::Name(s)),
            },
            obj @ JsonValue::Object(_) => Some(Token::Key(row_from_json(obj))),
            _ => None,
        }
    }

    pub fn offset(&self) -> Option<u64> {
        match self {
            Token::Offset(n) => Some(*n),
            _ => None,
        }
    }
}

impl Serialize for Token {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Caller-supplied object of an operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Input {
    #[default]
    None,
    Row(Row),
    List(Vec<Row>),
    Table(TableSpec),
}

impl Input {
    pub fn row(&self) -> Option<&Row> {
        match self {
            Input::Row(row) => Some(row),
            _ => None,
        }
    }

    pub fn rows(&self) -> &[Row] {
        match self {
            Input::Row(row) => std::slice::from_ref(row),
            Input::List(rows) => rows,
            _ => &[],
        }
    }

    pub fn table(&self) -> Option<&TableSpec> {
        match self {
            Input::Table(t) => Some(t),
            _ => None,
        }
    }
}

impl From<Row> for Input {
    fn from(row: Row) -> Self {
        Input::Row(row)
    }
}

impl From<Vec<Row>> for Input {
    fn from(rows: Vec<Row>) -> Self {
        Input::List(rows)
    }
}

impl From<TableSpec> for Input {
    fn from(table: TableSpec) -> Self {
        Input::Table(table)
    }
}

/// One or more SQL statements with positional bind values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlStatement {
    /// Statements executed in order; a single entry for most operations
    pub text: Vec<String>,
    pub values: Vec<Value>,
}

impl SqlStatement {
    pub fn new(text: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            text: vec![text.into()],
            values,
        }
    }

    pub fn batch(text: Vec<String>) -> Self {
        Self {
            text,
            values: Vec::new(),
        }
    }

    /// All statements joined for logging.
    pub fn sql(&self) -> String {
        self.text.join("; ")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    /// Nothing to do: missing keys or no columns
    #[default]
    Empty,
    Sql(SqlStatement),
    /// Adapter interprets `op`/`input` against its native API
    Native,
}

/// Backend-specific compiled form of a logical operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub op: Op,
    pub table: String,
    pub input: Input,
    pub body: RequestBody,
}

impl Request {
    pub fn new(op: Op, table: impl Into<String>, input: Input, body: RequestBody) -> Self {
        Self {
            op,
            table: table.into(),
            input,
            body,
        }
    }

    pub fn empty(op: Op, table: impl Into<String>, input: Input) -> Self {
        Self::new(op, table, input, RequestBody::Empty)
    }

    pub fn native(op: Op, table: impl Into<String>, input: Input) -> Self {
        Self::new(op, table, input, RequestBody::Native)
    }

    pub fn sql(op: Op, table: impl Into<String>, input: Input, stmt: SqlStatement) -> Self {
        Self::new(op, table, input, RequestBody::Sql(stmt))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.body, RequestBody::Empty)
    }

    pub fn statement(&self) -> Option<&SqlStatement> {
        match &self.body {
            RequestBody::Sql(stmt) => Some(stmt),
            _ => None,
        }
    }
}

/// Uniform feedback envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultInfo {
    pub affected_rows: u64,
    pub inserted_oid: Option<i64>,
    pub next_token: Option<Token>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryOutput {
    pub rows: Vec<Row>,
    pub info: ResultInfo,
}

impl QueryOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            info: ResultInfo::default(),
        }
    }

    pub fn affected(affected_rows: u64) -> Self {
        Self {
            rows: Vec::new(),
            info: ResultInfo {
                affected_rows,
                ..Default::default()
            },
        }
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn to_json(&self) -> DbResult<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }
}
