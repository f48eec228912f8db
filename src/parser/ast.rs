//! AST node shapes consumed by `codegen` (§4.6).
//!
//! The LEMON grammar that would build these from SQL text is out of scope
//! (§1); callers construct these directly, or go through the tiny
//! recognizer in `parser::recognizer` for the handful of statement shapes
//! it accepts.

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    IntLiteral(i64),
    RealLiteral(f64),
    StrLiteral(String),
    BlobLiteral(Vec<u8>),
    Null,
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    In(Box<Expr>, Vec<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub column: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
    IsNull,
    NotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Concat,
    Like,
    Glob,
}

/// `INSERT INTO table (columns...) VALUES (row), (row), ...` (§4.6).
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStmt {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Expr>>,
}

/// `UPDATE table SET col = expr, ... [WHERE expr]` (§4.6, two-cursor
/// pattern).
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStmt {
    pub table: String,
    pub assignments: Vec<(String, Expr)>,
    pub filter: Option<Expr>,
}

/// `CREATE TABLE name (col, col, ...)`. Column types are accepted but not
/// enforced (no type affinity system in this design).
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStmt {
    pub table: String,
    pub columns: Vec<String>,
}

/// `CREATE INDEX name ON table (col)`. One column only, matching the
/// single-column `(String, Pgno, usize)` shape `schema::TableDef::indexes`
/// already carries.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndexStmt {
    pub name: String,
    pub table: String,
    pub column: String,
}
