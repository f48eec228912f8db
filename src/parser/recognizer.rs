//! A tiny statement recognizer for the embedding boundary (§6): not the
//! LEMON grammar (out of scope, §1), just enough hand-written recursive
//! descent to recognize transaction control, `CREATE TABLE`,
//! `CREATE INDEX`, single-row `INSERT`, and `UPDATE`, so
//! `api::Connection::prepare` has something to call without requiring
//! every embedder to build AST nodes by hand.

use crate::error::{Error, Result};
use crate::parser::ast::{BinaryOp, ColumnRef, CreateIndexStmt, CreateTableStmt, Expr, InsertStmt, UnaryOp, UpdateStmt};
use crate::parser::tokenizer::{tokenize, Keyword, Operator, TokenKind};

pub enum Recognized {
    Begin,
    Commit,
    Rollback,
    CreateTable(CreateTableStmt),
    CreateIndex(CreateIndexStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
}

pub fn recognize(sql: &str) -> Result<Recognized> {
    let tokens = tokenize(sql.as_bytes());
    let mut p = Parser { tokens, pos: 0 };
    let result = match p.peek_kind() {
        Some(TokenKind::Keyword(Keyword::Begin)) => {
            p.advance();
            Recognized::Begin
        }
        Some(TokenKind::Keyword(Keyword::Commit)) => {
            p.advance();
            Recognized::Commit
        }
        Some(TokenKind::Keyword(Keyword::Rollback)) => {
            p.advance();
            Recognized::Rollback
        }
        Some(TokenKind::Keyword(Keyword::Create)) => match p.tokens.get(p.pos + 1).map(|(k, _)| *k) {
            Some(TokenKind::Keyword(Keyword::Index)) => Recognized::CreateIndex(p.parse_create_index()?),
            _ => Recognized::CreateTable(p.parse_create_table()?),
        },
        Some(TokenKind::Keyword(Keyword::Insert)) => Recognized::Insert(p.parse_insert()?),
        Some(TokenKind::Keyword(Keyword::Update)) => Recognized::Update(p.parse_update()?),
        _ => return Err(Error::sql("unrecognized statement; only transaction control, CREATE TABLE, CREATE INDEX, INSERT and UPDATE are accepted without hand-built AST")),
    };
    p.skip_op(Operator::Semicolon);
    if p.pos != p.tokens.len() {
        return Err(Error::sql("trailing tokens after statement"));
    }
    Ok(result)
}

struct Parser<'a> {
    tokens: Vec<(TokenKind, &'a [u8])>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek_kind(&self) -> Option<TokenKind> {
        self.tokens.get(self.pos).map(|(k, _)| *k)
    }

    fn advance(&mut self) -> Option<(TokenKind, &'a [u8])> {
        let t = self.tokens.get(self.pos).copied();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn skip_op(&mut self, op: Operator) {
        if self.peek_kind() == Some(TokenKind::Operator(op)) {
            self.pos += 1;
        }
    }

    fn expect_keyword(&mut self, kw: Keyword) -> Result<()> {
        match self.advance() {
            Some((TokenKind::Keyword(k), _)) if k == kw => Ok(()),
            other => Err(Error::sql(format!("expected keyword {kw:?}, found {other:?}"))),
        }
    }

    fn expect_op(&mut self, op: Operator) -> Result<()> {
        match self.advance() {
            Some((TokenKind::Operator(o), _)) if o == op => Ok(()),
            other => Err(Error::sql(format!("expected operator {op:?}, found {other:?}"))),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.advance() {
            Some((TokenKind::Identifier, bytes)) => Ok(String::from_utf8_lossy(bytes).into_owned()),
            other => Err(Error::sql(format!("expected an identifier, found {other:?}"))),
        }
    }

    /// `name (col [type...], col [type...], ...)`: consumes any trailing
    /// type-name tokens after a column's own identifier (no affinity
    /// system, §1 non-goal), stopping at the next comma or `)`.
    fn parse_create_table(&mut self) -> Result<CreateTableStmt> {
        self.expect_keyword(Keyword::Create)?;
        self.expect_keyword(Keyword::Table)?;
        let table = self.expect_ident()?;
        self.expect_op(Operator::LParen)?;
        let mut columns = Vec::new();
        loop {
            columns.push(self.expect_ident()?);
            while !matches!(
                self.peek_kind(),
                Some(TokenKind::Operator(Operator::Comma)) | Some(TokenKind::Operator(Operator::RParen)) | None
            ) {
                self.advance();
            }
            if self.peek_kind() == Some(TokenKind::Operator(Operator::Comma)) {
                self.advance();
                continue;
            }
            break;
        }
        self.expect_op(Operator::RParen)?;
        Ok(CreateTableStmt { table, columns })
    }

    /// `CREATE INDEX name ON table (col)`: single column only, matching
    /// `schema::TableDef::indexes`'s shape.
    fn parse_create_index(&mut self) -> Result<CreateIndexStmt> {
        self.expect_keyword(Keyword::Create)?;
        self.expect_keyword(Keyword::Index)?;
        let name = self.expect_ident()?;
        self.expect_keyword(Keyword::On)?;
        let table = self.expect_ident()?;
        self.expect_op(Operator::LParen)?;
        let column = self.expect_ident()?;
        self.expect_op(Operator::RParen)?;
        Ok(CreateIndexStmt { name, table, column })
    }

    /// `INTO name [(col, ...)] VALUES (expr, ...)`: a single row, since
    /// this recognizer exists to exercise the VM contract end to end, not
    /// to stand in for the LEMON grammar.
    fn parse_insert(&mut self) -> Result<InsertStmt> {
        self.expect_keyword(Keyword::Insert)?;
        self.expect_keyword(Keyword::Into)?;
        let table = self.expect_ident()?;
        let mut columns = Vec::new();
        if self.peek_kind() == Some(TokenKind::Operator(Operator::LParen)) {
            self.advance();
            loop {
                columns.push(self.expect_ident()?);
                if self.peek_kind() == Some(TokenKind::Operator(Operator::Comma)) {
                    self.advance();
                    continue;
                }
                break;
            }
            self.expect_op(Operator::RParen)?;
        }
        self.expect_keyword(Keyword::Values)?;
        self.expect_op(Operator::LParen)?;
        let mut row = Vec::new();
        loop {
            row.push(self.parse_expr()?);
            if self.peek_kind() == Some(TokenKind::Operator(Operator::Comma)) {
                self.advance();
                continue;
            }
            break;
        }
        self.expect_op(Operator::RParen)?;
        Ok(InsertStmt { table, columns, rows: vec![row] })
    }

    /// `table SET col = expr [, col = expr]* [WHERE expr]`
    fn parse_update(&mut self) -> Result<UpdateStmt> {
        self.expect_keyword(Keyword::Update)?;
        let table = self.expect_ident()?;
        self.expect_keyword(Keyword::Set)?;
        let mut assignments = Vec::new();
        loop {
            let col = self.expect_ident()?;
            self.expect_op(Operator::Eq)?;
            let value = self.parse_expr()?;
            assignments.push((col, value));
            if self.peek_kind() == Some(TokenKind::Operator(Operator::Comma)) {
                self.advance();
                continue;
            }
            break;
        }
        let filter = if self.peek_kind() == Some(TokenKind::Keyword(Keyword::Where)) {
            self.advance();
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(UpdateStmt { table, assignments, filter })
    }

    // ---- expression parsing: precedence-climbing recursive descent -----

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.peek_kind() == Some(TokenKind::Keyword(Keyword::Or)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_not()?;
        while self.peek_kind() == Some(TokenKind::Keyword(Keyword::And)) {
            self.advance();
            let rhs = self.parse_not()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.peek_kind() == Some(TokenKind::Keyword(Keyword::Not)) {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let lhs = self.parse_concat()?;
        let op = match self.peek_kind() {
            Some(TokenKind::Operator(Operator::Eq)) | Some(TokenKind::Operator(Operator::EqEq)) => Some(BinaryOp::Eq),
            Some(TokenKind::Operator(Operator::Ne)) => Some(BinaryOp::Ne),
            Some(TokenKind::Operator(Operator::Lt)) => Some(BinaryOp::Lt),
            Some(TokenKind::Operator(Operator::Le)) => Some(BinaryOp::Le),
            Some(TokenKind::Operator(Operator::Gt)) => Some(BinaryOp::Gt),
            Some(TokenKind::Operator(Operator::Ge)) => Some(BinaryOp::Ge),
            Some(TokenKind::Keyword(Keyword::Like)) => Some(BinaryOp::Like),
            Some(TokenKind::Keyword(Keyword::Glob)) => Some(BinaryOp::Glob),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let rhs = self.parse_concat()?;
            return Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)));
        }
        if self.peek_kind() == Some(TokenKind::Keyword(Keyword::In)) {
            self.advance();
            self.expect_op(Operator::LParen)?;
            let mut list = Vec::new();
            if self.peek_kind() != Some(TokenKind::Operator(Operator::RParen)) {
                loop {
                    list.push(self.parse_concat()?);
                    if self.peek_kind() == Some(TokenKind::Operator(Operator::Comma)) {
                        self.advance();
                        continue;
                    }
                    break;
                }
            }
            self.expect_op(Operator::RParen)?;
            return Ok(Expr::In(Box::new(lhs), list));
        }
        if self.peek_kind() == Some(TokenKind::Keyword(Keyword::Is)) {
            self.advance();
            let negate = self.peek_kind() == Some(TokenKind::Keyword(Keyword::Not));
            if negate {
                self.advance();
            }
            self.expect_keyword(Keyword::Null)?;
            let op = if negate { UnaryOp::NotNull } else { UnaryOp::IsNull };
            return Ok(Expr::Unary(op, Box::new(lhs)));
        }
        Ok(lhs)
    }

    fn parse_concat(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_additive()?;
        while self.peek_kind() == Some(TokenKind::Operator(Operator::Concat)) {
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(BinaryOp::Concat, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Operator(Operator::Plus)) => BinaryOp::Add,
                Some(TokenKind::Operator(Operator::Minus)) => BinaryOp::Subtract,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Operator(Operator::Star)) => BinaryOp::Multiply,
                Some(TokenKind::Operator(Operator::Slash)) => BinaryOp::Divide,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek_kind() == Some(TokenKind::Operator(Operator::Minus)) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Negate, Box::new(inner)));
        }
        if self.peek_kind() == Some(TokenKind::Operator(Operator::Plus)) {
            self.advance();
            return self.parse_unary();
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Some((TokenKind::Integer, bytes)) => {
                let s = std::str::from_utf8(bytes).map_err(|_| Error::sql("invalid integer literal"))?;
                s.parse::<i64>().map(Expr::IntLiteral).map_err(|_| Error::sql("invalid integer literal"))
            }
            Some((TokenKind::Real, bytes)) => {
                let s = std::str::from_utf8(bytes).map_err(|_| Error::sql("invalid real literal"))?;
                s.parse::<f64>().map(Expr::RealLiteral).map_err(|_| Error::sql("invalid real literal"))
            }
            Some((TokenKind::String, bytes)) => Ok(Expr::StrLiteral(unquote(bytes))),
            Some((TokenKind::Blob, bytes)) => Ok(Expr::BlobLiteral(parse_blob_literal(bytes)?)),
            Some((TokenKind::Keyword(Keyword::Null), _)) => Ok(Expr::Null),
            Some((TokenKind::Operator(Operator::LParen), _)) => {
                let inner = self.parse_expr()?;
                self.expect_op(Operator::RParen)?;
                Ok(inner)
            }
            Some((TokenKind::Identifier, bytes)) => {
                let name = String::from_utf8_lossy(bytes).into_owned();
                if self.peek_kind() == Some(TokenKind::Operator(Operator::LParen)) {
                    self.advance();
                    let mut args = Vec::new();
                    if self.peek_kind() != Some(TokenKind::Operator(Operator::RParen)) {
                        loop {
                            args.push(self.parse_expr()?);
                            if self.peek_kind() == Some(TokenKind::Operator(Operator::Comma)) {
                                self.advance();
                                continue;
                            }
                            break;
                        }
                    }
                    self.expect_op(Operator::RParen)?;
                    return Ok(Expr::Call(name, args));
                }
                if self.peek_kind() == Some(TokenKind::Operator(Operator::Dot)) {
                    self.advance();
                    let column = self.expect_ident()?;
                    return Ok(Expr::Column(ColumnRef { table: Some(name), column }));
                }
                Ok(Expr::Column(ColumnRef { table: None, column: name }))
            }
            other => Err(Error::sql(format!("unexpected token in expression: {other:?}"))),
        }
    }
}

/// Strips the surrounding quote character and un-escapes a doubled quote
/// (the tokenizer already validated the quoting, §4.3 `scan_quoted`).
fn unquote(bytes: &[u8]) -> String {
    let inner = &bytes[1..bytes.len() - 1];
    let quote = bytes[0];
    let text = String::from_utf8_lossy(inner);
    text.replace(&format!("{}{}", quote as char, quote as char), &(quote as char).to_string())
}

fn parse_blob_literal(bytes: &[u8]) -> Result<Vec<u8>> {
    let inner = &bytes[2..bytes.len() - 1];
    let hex = std::str::from_utf8(inner).map_err(|_| Error::sql("invalid blob literal"))?;
    if hex.len() % 2 != 0 {
        return Err(Error::sql("blob literal must have an even number of hex digits"));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| Error::sql("invalid hex digit in blob literal")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_create_table() {
        let stmt = match recognize("create table people (name, age);").unwrap() {
            Recognized::CreateTable(s) => s,
            _ => panic!("expected CreateTable"),
        };
        assert_eq!(stmt.table, "people");
        assert_eq!(stmt.columns, vec!["name", "age"]);
    }

    #[test]
    fn recognizes_create_index() {
        let stmt = match recognize("create index people_name on people (name);").unwrap() {
            Recognized::CreateIndex(s) => s,
            _ => panic!("expected CreateIndex"),
        };
        assert_eq!(stmt.name, "people_name");
        assert_eq!(stmt.table, "people");
        assert_eq!(stmt.column, "name");
    }

    #[test]
    fn recognizes_single_row_insert_with_explicit_columns() {
        let stmt = match recognize("insert into people (name) values ('ada');").unwrap() {
            Recognized::Insert(s) => s,
            _ => panic!("expected Insert"),
        };
        assert_eq!(stmt.table, "people");
        assert_eq!(stmt.columns, vec!["name"]);
        assert_eq!(stmt.rows, vec![vec![Expr::StrLiteral("ada".into())]]);
    }

    #[test]
    fn recognizes_update_with_where_clause() {
        let stmt = match recognize("update people set age = age + 1 where name = 'ada';").unwrap() {
            Recognized::Update(s) => s,
            _ => panic!("expected Update"),
        };
        assert_eq!(stmt.table, "people");
        assert_eq!(stmt.assignments.len(), 1);
        assert!(stmt.filter.is_some());
    }

    #[test]
    fn recognizes_transaction_control() {
        assert!(matches!(recognize("begin;").unwrap(), Recognized::Begin));
        assert!(matches!(recognize("commit;").unwrap(), Recognized::Commit));
        assert!(matches!(recognize("rollback;").unwrap(), Recognized::Rollback));
    }

    #[test]
    fn rejects_unsupported_statement_shapes() {
        assert!(recognize("select * from people;").is_err());
    }
}
