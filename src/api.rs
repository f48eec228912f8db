//! Embedding boundary (§6 expansion): `Connection`/`Statement`, the thin
//! public surface a host program drives the engine through. The LEMON
//! grammar that would turn arbitrary SQL text into `codegen` AST is out of
//! scope (§1), so `Connection::prepare` only recognizes transaction
//! control, `CREATE TABLE`, `CREATE INDEX`, `INSERT`, and `UPDATE` via
//! `parser::recognizer`; anything else is rejected with `Error::Sql`. A
//! caller who needs more builds AST directly and calls `codegen` itself.

use std::cell::RefCell;
use std::path::Path;

use crate::codegen::{insert::compile_insert, update::compile_update};
use crate::error::{Error, Result};
use crate::parser::recognizer::{recognize, Recognized};
use crate::schema::Schema;
use crate::storage::btree::Btree;
use crate::storage::pager::Pager;
use crate::vdbe::bytecode::Program;
use crate::vdbe::engine::Engine;
use crate::vdbe::mem::Mem;

/// Page size, cache size, and busy-retry knobs an embedder can set before
/// `Connection::open` (§6 "Configuration"). `busy_timeout_ms` is read by
/// `Connection::busy_timeout`; `page_size` and `cache_pages` are accepted
/// for API completeness but not yet wired through, since the pager's page
/// size (`storage::pager::PAGE_SIZE`) is a compile-time constant and its
/// page cache is currently unbounded (see DESIGN.md).
#[derive(Debug, Clone)]
pub struct Config {
    pub page_size: usize,
    pub cache_pages: usize,
    pub busy_timeout_ms: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self { page_size: crate::storage::pager::PAGE_SIZE, cache_pages: 2000, busy_timeout_ms: 0 }
    }
}

/// An open database handle: the B-tree/pager pair plus the connection-local
/// schema catalog (§4.5) DDL replays into. `schema` is behind a `RefCell`
/// because `CREATE TABLE` must mutate it through `&self` while a live
/// `Statement` may be borrowing the same `Connection` for DML.
pub struct Connection {
    btree: Btree,
    schema: RefCell<Schema>,
    config: Config,
    last_insert_rowid: RefCell<i64>,
    changes: RefCell<i64>,
    last_error: RefCell<Option<Error>>,
}

impl Connection {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(Pager::open(path)?, Config::default())
    }

    pub fn open_with_config(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        Self::open_with(Pager::open(path)?, config)
    }

    /// An in-memory, non-persistent connection, mainly for tests.
    pub fn open_memory() -> Self {
        Self::open_with(Pager::open_memory(), Config::default()).expect("in-memory pager never fails to open")
    }

    fn open_with(pager: Pager, config: Config) -> Result<Self> {
        let btree = Btree::new(pager);
        Ok(Self {
            btree,
            schema: RefCell::new(Schema::new()),
            config,
            last_insert_rowid: RefCell::new(0),
            changes: RefCell::new(0),
            last_error: RefCell::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn busy_timeout(&mut self, ms: u32) {
        self.config.busy_timeout_ms = ms;
    }

    /// No-op: `Statement::step` always runs its program to completion
    /// before returning (§6 "Embedding API"), so there is no long-running
    /// step for an interrupt to land on. Kept for API symmetry.
    pub fn interrupt(&self) {}

    pub fn last_insert_rowid(&self) -> i64 {
        *self.last_insert_rowid.borrow()
    }

    pub fn changes(&self) -> i64 {
        *self.changes.borrow()
    }

    pub fn errcode(&self) -> Option<Error> {
        self.last_error.borrow().clone()
    }

    pub fn errmsg(&self) -> Option<String> {
        self.last_error.borrow().as_ref().map(|e| e.to_string())
    }

    fn record_error(&self, err: Error) -> Error {
        *self.last_error.borrow_mut() = Some(err.clone());
        err
    }

    fn record_outcome(&self, rows: &[Vec<Mem>]) {
        if let Some(last) = rows.last() {
            if let Some(Mem::Int(rowid)) = last.first() {
                *self.last_insert_rowid.borrow_mut() = *rowid;
            }
        }
        *self.changes.borrow_mut() = rows.len() as i64;
    }

    /// Prepares one statement. Transaction control and `CREATE TABLE`
    /// execute immediately (there is nothing for a `Statement` to defer:
    /// no cursors, no rows), returning a `Statement` in `Done` state;
    /// `INSERT`/`UPDATE` compile to a real `Program` that `Statement::step`
    /// drives.
    pub fn prepare(&self, sql: &str) -> Result<Statement<'_>> {
        let recognized = recognize(sql).map_err(|e| self.record_error(e))?;
        match recognized {
            Recognized::Begin => {
                self.btree.pager().begin_write().map_err(|e| self.record_error(e))?;
                Ok(Statement::done(self))
            }
            Recognized::Commit => {
                self.btree.pager().commit().map_err(|e| self.record_error(e))?;
                Ok(Statement::done(self))
            }
            Recognized::Rollback => {
                self.btree.pager().rollback().map_err(|e| self.record_error(e))?;
                Ok(Statement::done(self))
            }
            Recognized::CreateTable(stmt) => {
                self.btree.pager().begin_write().map_err(|e| self.record_error(e))?;
                let root = match self.btree.create_table() {
                    Ok(root) => root,
                    Err(e) => {
                        let _ = self.btree.pager().rollback();
                        return Err(self.record_error(e));
                    }
                };
                if let Err(e) = self.schema.borrow_mut().add_table(&stmt.table, root, stmt.columns) {
                    let _ = self.btree.pager().rollback();
                    return Err(self.record_error(e));
                }
                self.btree.pager().commit().map_err(|e| self.record_error(e))?;
                Ok(Statement::done(self))
            }
            Recognized::CreateIndex(stmt) => {
                self.btree.pager().begin_write().map_err(|e| self.record_error(e))?;
                let root = match self.btree.create_table() {
                    Ok(root) => root,
                    Err(e) => {
                        let _ = self.btree.pager().rollback();
                        return Err(self.record_error(e));
                    }
                };
                let mut schema = self.schema.borrow_mut();
                let column = match schema.table(&stmt.table) {
                    Ok(table) => table.columns.iter().position(|c| c.eq_ignore_ascii_case(&stmt.column)),
                    Err(e) => {
                        let _ = self.btree.pager().rollback();
                        return Err(self.record_error(e));
                    }
                };
                let Some(column) = column else {
                    let _ = self.btree.pager().rollback();
                    return Err(self.record_error(Error::sql(format!("no such column: {}", stmt.column))));
                };
                if let Err(e) = schema.add_index(&stmt.table, &stmt.name, root, column) {
                    drop(schema);
                    let _ = self.btree.pager().rollback();
                    return Err(self.record_error(e));
                }
                drop(schema);
                self.btree.pager().commit().map_err(|e| self.record_error(e))?;
                Ok(Statement::done(self))
            }
            Recognized::Insert(stmt) => {
                let schema = self.schema.borrow();
                let program = compile_insert(&schema, &stmt).map_err(|e| self.record_error(e))?;
                Ok(Statement::dml(self, program))
            }
            Recognized::Update(stmt) => {
                let schema = self.schema.borrow();
                let program = compile_update(&schema, &stmt).map_err(|e| self.record_error(e))?;
                Ok(Statement::dml(self, program))
            }
        }
    }

    /// Runs `sql` to completion, calling `row_callback` for every row a
    /// `Callback` opcode produces (§3.6). Mirrors `prepare` + repeated
    /// `step` for a caller with no need to hold the statement open.
    pub fn exec(&self, sql: &str, mut row_callback: impl FnMut(&[Mem])) -> Result<()> {
        let mut stmt = self.prepare(sql)?;
        while let Some(row) = stmt.step()? {
            row_callback(row);
        }
        Ok(())
    }

    pub fn close(self) -> Result<()> {
        if self.btree.pager().in_transaction() {
            self.btree.pager().rollback()?;
        }
        Ok(())
    }
}

enum Kind {
    /// Already ran to completion during `prepare` (transaction control,
    /// `CREATE TABLE`): `step` always returns `Ok(None)`.
    Done,
    /// A compiled `INSERT`/`UPDATE` program, run to completion on the
    /// first `step` call and then drained one row at a time.
    Dml { program: Program, rows: Option<std::vec::IntoIter<Vec<Mem>>> },
}

/// A prepared statement (§6). DML programs are fully resolved to page
/// numbers by `codegen` at `prepare` time, so `Statement` only needs a
/// `&Connection` back-reference, not a live borrow of its schema.
pub struct Statement<'c> {
    conn: &'c Connection,
    kind: Kind,
    bound: Vec<(usize, Mem)>,
    last_row: Option<Vec<Mem>>,
}

impl<'c> Statement<'c> {
    fn done(conn: &'c Connection) -> Self {
        Self { conn, kind: Kind::Done, bound: Vec::new(), last_row: None }
    }

    fn dml(conn: &'c Connection, program: Program) -> Self {
        Self { conn, kind: Kind::Dml { program, rows: None }, bound: Vec::new(), last_row: None }
    }

    /// Binds a value directly to a VM memory cell by index (§6 "bind by
    /// index"), applied to `Engine::bind` right before the program first
    /// runs. There is no `?`/numbered/named placeholder syntax lowered to
    /// a cell reference anywhere in `codegen` — the tokenizer recognizes
    /// `NumberedParam`/`NamedParam` tokens but nothing downstream consumes
    /// them, so a compiled `INSERT`/`UPDATE` program never reads a bound
    /// cell back through its own instructions. In practice this makes
    /// `bind_*` accepted-but-inert for every statement `prepare` compiles
    /// today: `INSERT`'s one mem cell (index 0) is `NewRecno`'s own rowid
    /// cell, unconditionally overwritten before any bound value could
    /// surface, and `UPDATE`'s cells are all similarly claimed by the
    /// two-pass codegen in `codegen::update`. Kept on the public surface
    /// for API symmetry with §6's full contract and because `Engine::bind`
    /// itself works correctly against a hand-built `Program` that actually
    /// reads the cell back (see `vdbe::engine`'s own bind tests).
    pub fn bind_int(&mut self, index: usize, value: i64) {
        self.bind(index, Mem::Int(value));
    }

    pub fn bind_double(&mut self, index: usize, value: f64) {
        self.bind(index, Mem::Real(value));
    }

    pub fn bind_text(&mut self, index: usize, value: impl Into<String>) {
        self.bind(index, Mem::Str(value.into()));
    }

    pub fn bind_blob(&mut self, index: usize, value: impl Into<Vec<u8>>) {
        self.bind(index, Mem::Blob(value.into()));
    }

    pub fn bind_null(&mut self, index: usize) {
        self.bind(index, Mem::Null);
    }

    fn bind(&mut self, index: usize, value: Mem) {
        self.bound.retain(|(i, _)| *i != index);
        self.bound.push((index, value));
    }

    /// Advances the statement by one row. The VM here is run-to-completion
    /// rather than truly co-routine-stepped (§3.6 would need a suspended
    /// interpreter for that); `step` runs the whole program on its first
    /// call and replays the buffered rows one at a time afterward, which
    /// is observationally the same for a caller that only calls `step` in
    /// a loop.
    pub fn step(&mut self) -> Result<Option<&[Mem]>> {
        match &mut self.kind {
            Kind::Done => Ok(None),
            Kind::Dml { program, rows } => {
                if rows.is_none() {
                    let schema_cookie = self.conn.schema.borrow().cookie();
                    let mut engine = Engine::new(program, &self.conn.btree, schema_cookie);
                    for (index, value) in &self.bound {
                        engine.bind(*index, value.clone()).map_err(|e| self.conn.record_error(e))?;
                    }
                    let produced = engine.run().map_err(|e| self.conn.record_error(e))?;
                    self.conn.record_outcome(&produced);
                    *rows = Some(produced.into_iter());
                }
                match rows.as_mut().and_then(Iterator::next) {
                    Some(row) => {
                        self.last_row = Some(row);
                        Ok(self.last_row.as_deref())
                    }
                    None => Ok(None),
                }
            }
        }
    }

    pub fn column_count(&self) -> usize {
        self.last_row.as_ref().map_or(0, Vec::len)
    }

    /// No column-name metadata survives past `codegen` for a hand-compiled
    /// `INSERT`/`UPDATE` program (it has no `ColumnName` opcodes, unlike a
    /// `SELECT`), so this always returns `None`; kept for API symmetry with
    /// §6's full surface.
    pub fn column_name(&self, _index: usize) -> Option<&str> {
        None
    }

    pub fn column_value(&self, index: usize) -> Option<&Mem> {
        self.last_row.as_ref().and_then(|r| r.get(index))
    }

    pub fn column_int(&self, index: usize) -> i64 {
        self.column_value(index).map_or(0, Mem::to_int)
    }

    pub fn column_double(&self, index: usize) -> f64 {
        self.column_value(index).map_or(0.0, Mem::to_real)
    }

    pub fn column_text(&self, index: usize) -> String {
        self.column_value(index).map_or_else(String::new, Mem::to_text)
    }

    pub fn column_blob(&self, index: usize) -> Vec<u8> {
        self.column_value(index).map_or_else(Vec::new, Mem::to_blob)
    }

    /// Clears bindings and rewinds so the statement can be stepped again
    /// (§6 "reset"). A `Done` statement (transaction control, DDL) already
    /// ran its one-shot effect during `prepare` and has nothing to redo.
    pub fn reset(&mut self) {
        self.last_row = None;
        if let Kind::Dml { rows, .. } = &mut self.kind {
            *rows = None;
        }
    }

    pub fn finalize(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_insert_and_read_back_through_the_public_surface() {
        let conn = Connection::open_memory();
        let mut create = conn.prepare("create table people (name, age);").unwrap();
        assert!(create.step().unwrap().is_none());

        let mut insert = conn.prepare("insert into people (name, age) values ('ada', 30);").unwrap();
        let row = insert.step().unwrap().unwrap();
        assert_eq!(row.len(), 1);
        let rowid = row[0].to_int();
        assert!(insert.step().unwrap().is_none());
        assert_eq!(conn.last_insert_rowid(), rowid);
        assert_eq!(conn.changes(), 1);
    }

    #[test]
    fn update_reports_changed_row_count() {
        let conn = Connection::open_memory();
        conn.exec("create table people (name, age);", |_| {}).unwrap();
        conn.exec("insert into people (name, age) values ('ada', 30);", |_| {}).unwrap();
        conn.exec("insert into people (name, age) values ('alan', 40);", |_| {}).unwrap();

        conn.exec("update people set age = 0;", |_| {}).unwrap();
        assert_eq!(conn.changes(), 2);
    }

    #[test]
    fn transaction_control_statements_complete_immediately() {
        let conn = Connection::open_memory();
        let mut begin = conn.prepare("begin;").unwrap();
        assert!(begin.step().unwrap().is_none());
        let mut rollback = conn.prepare("rollback;").unwrap();
        assert!(rollback.step().unwrap().is_none());
    }

    #[test]
    fn unsupported_statement_shapes_are_rejected() {
        let conn = Connection::open_memory();
        assert!(conn.prepare("select * from people;").is_err());
        assert!(conn.errmsg().is_some());
    }

    #[test]
    fn bind_on_a_compiled_insert_does_not_change_its_output() {
        // `bind_*` is accepted-but-inert for every statement `prepare`
        // compiles today (see the doc comment on `bind_int`): `INSERT`'s
        // only mem cell is `NewRecno`'s own rowid cell, unconditionally
        // overwritten before the program's `MemLoad(0)` reads it back. This
        // asserts that honestly — binding cell 0 changes nothing — rather
        // than just checking a row comes out.
        let conn = Connection::open_memory();
        conn.exec("create table people (name);", |_| {}).unwrap();

        let mut unbound = conn.prepare("insert into people (name) values ('grace');").unwrap();
        let unbound_row = unbound.step().unwrap().unwrap().to_vec();

        let mut bound = conn.prepare("insert into people (name) values ('ada');").unwrap();
        bound.bind_int(0, 999);
        let bound_row = bound.step().unwrap().unwrap().to_vec();

        assert_ne!(bound_row[0].to_int(), 999, "the bound value never reaches the rowid");
        assert_eq!(unbound_row.len(), bound_row.len());
    }
}
