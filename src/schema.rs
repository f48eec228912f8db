//! Schema catalog (§4.5 "Schema cookie"; §4.6 name resolution).
//!
//! The normative design persists the schema as rows of a special
//! `sqlite_master`-style table read back at open time; since the LEMON
//! grammar that would parse those rows into `CreateTableStmt`s is out of
//! scope here (§1), this expansion keeps the catalog connection-local and
//! in-memory, rebuilt by replaying `CREATE TABLE` calls for the lifetime
//! of the `Connection`. The schema cookie itself still lives in the
//! database header and still gates recompilation exactly as §4.5
//! describes; only the catalog's own durability is simplified.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::types::Pgno;

#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: String,
    pub root: Pgno,
    pub columns: Vec<String>,
    /// Root pages of indexes built on this table, parallel to
    /// `index_columns`. Index maintenance beyond simple create/insert
    /// mirroring is out of scope.
    pub indexes: Vec<(String, Pgno, usize)>,
}

#[derive(Default)]
pub struct Schema {
    tables: HashMap<String, TableDef>,
    cookie: u32,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cookie(&self) -> u32 {
        self.cookie
    }

    pub fn table(&self, name: &str) -> Result<&TableDef> {
        self.tables
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| Error::sql(format!("no such table: {name}")))
    }

    /// Registers a new table and bumps the schema cookie (§4.5: "any DDL
    /// increments the counter on commit").
    pub fn add_table(&mut self, name: &str, root: Pgno, columns: Vec<String>) -> Result<()> {
        let key = name.to_ascii_lowercase();
        if self.tables.contains_key(&key) {
            return Err(Error::sql(format!("table {name} already exists")));
        }
        self.tables.insert(key, TableDef { name: name.to_string(), root, columns, indexes: Vec::new() });
        self.cookie += 1;
        Ok(())
    }

    pub fn add_index(&mut self, table: &str, index_name: &str, root: Pgno, column: usize) -> Result<()> {
        let key = table.to_ascii_lowercase();
        let def = self.tables.get_mut(&key).ok_or_else(|| Error::sql(format!("no such table: {table}")))?;
        def.indexes.push((index_name.to_string(), root, column));
        self.cookie += 1;
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_a_table_bumps_the_cookie() {
        let mut schema = Schema::new();
        let before = schema.cookie();
        schema.add_table("t", 2, vec!["a".into()]).unwrap();
        assert_eq!(schema.cookie(), before + 1);
    }

    #[test]
    fn duplicate_table_name_is_rejected() {
        let mut schema = Schema::new();
        schema.add_table("t", 2, vec!["a".into()]).unwrap();
        assert!(schema.add_table("t", 3, vec!["a".into()]).is_err());
    }

    #[test]
    fn table_lookup_is_case_insensitive() {
        let mut schema = Schema::new();
        schema.add_table("People", 2, vec!["name".into()]).unwrap();
        assert!(schema.table("people").is_ok());
    }
}
