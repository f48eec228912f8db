//! `INSERT` code generation (§4.6): resolve the table, map the supplied
//! column list onto the full schema (missing columns become NULL), and
//! for each row emit `NewRecno` / `MakeRecord` / `MakeKey` / `Put`,
//! followed by one `MakeIdxKey` / `PutIdx` per index on the table.

use crate::error::{Error, Result};
use crate::parser::ast::{Expr, InsertStmt};
use crate::schema::Schema;
use crate::vdbe::bytecode::{Instruction, Opcode, Program};

use super::expr::{emit_expr, Scope};

const TABLE_CURSOR: i32 = 0;
const ROWID_MEM: i32 = 0;

pub fn compile_insert(schema: &Schema, stmt: &InsertStmt) -> Result<Program> {
    let table = schema.table(&stmt.table)?;

    let positions: Vec<usize> = if stmt.columns.is_empty() {
        (0..table.columns.len()).collect()
    } else {
        stmt.columns
            .iter()
            .map(|name| {
                table
                    .columns
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case(name))
                    .ok_or_else(|| Error::sql(format!("no such column: {name}")))
            })
            .collect::<Result<_>>()?
    };
    for row in &stmt.rows {
        if row.len() != positions.len() {
            return Err(Error::sql("number of values does not match number of columns"));
        }
    }

    let mut program = Program::new();
    program.mem_cells = 1;
    let scope = Scope { columns: &table.columns, cursor: TABLE_CURSOR };

    program.push(Instruction::simple(Opcode::Transaction));
    program.push(Instruction::new(Opcode::OpenWrite, TABLE_CURSOR, table.root as i32, None));
    for (i, (_, root, _)) in table.indexes.iter().enumerate() {
        program.push(Instruction::new(Opcode::OpenWrite, index_cursor(i), *root as i32, None));
    }

    for row in &stmt.rows {
        // Values supplied in schema-column order, NULL where a column was
        // left off the `INSERT` column list.
        let mut by_position: Vec<Option<&Expr>> = vec![None; table.columns.len()];
        for (pos, value) in positions.iter().zip(row.iter()) {
            by_position[*pos] = Some(value);
        }

        program.push(Instruction::new(Opcode::NewRecno, TABLE_CURSOR, 0, None));
        program.push(Instruction::new(Opcode::MemStore, ROWID_MEM, 0, None));

        program.push(Instruction::new(Opcode::MemLoad, ROWID_MEM, 0, None));
        program.push(Instruction::new(Opcode::MakeKey, 1, 0, None));
        for value in &by_position {
            match value {
                Some(expr) => emit_expr(&mut program, &scope, expr)?,
                None => {
                    program.push(Instruction::simple(Opcode::Null));
                }
            }
        }
        program.push(Instruction::new(Opcode::MakeRecord, table.columns.len() as i32, 0, None));
        program.push(Instruction::new(Opcode::Put, TABLE_CURSOR, 0, None));
        // Surface the generated rowid as the statement's output row, the
        // way a `RETURNING rowid` clause would; `Connection` reads it back
        // for `last_insert_rowid`.
        program.push(Instruction::new(Opcode::MemLoad, ROWID_MEM, 0, None));
        program.push(Instruction::new(Opcode::Callback, 1, 0, None));

        for (i, (_, _, column)) in table.indexes.iter().enumerate() {
            match &by_position[*column] {
                Some(expr) => emit_expr(&mut program, &scope, expr)?,
                None => {
                    program.push(Instruction::simple(Opcode::Null));
                }
            }
            program.push(Instruction::new(Opcode::MemLoad, ROWID_MEM, 0, None));
            program.push(Instruction::new(Opcode::MakeIdxKey, 1, 0, None));
            program.push(Instruction::new(Opcode::String, 0, 0, None));
            program.push(Instruction::new(Opcode::PutIdx, index_cursor(i), 0, None));
        }
    }

    program.push(Instruction::simple(Opcode::Commit));
    program.push(Instruction::simple(Opcode::Halt));
    Ok(program)
}

fn index_cursor(i: usize) -> i32 {
    1 + i as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::btree::Btree;
    use crate::storage::pager::Pager;
    use crate::vdbe::engine::Engine;

    fn schema_with_people() -> Schema {
        let mut schema = Schema::new();
        schema.add_table("people", 2, vec!["name".into(), "age".into()]).unwrap();
        schema
    }

    #[test]
    fn inserts_one_row_with_a_missing_trailing_column() {
        let schema = schema_with_people();
        let stmt = InsertStmt {
            table: "people".into(),
            columns: vec!["name".into()],
            rows: vec![vec![Expr::StrLiteral("ada".into())]],
        };
        let program = compile_insert(&schema, &stmt).unwrap();

        let pager = Pager::open_memory();
        let btree = Btree::new(pager);
        let root = btree.create_table().unwrap();
        assert_eq!(root, 2);
        let mut engine = Engine::new(&program, &btree, 0);
        engine.run().unwrap();

        let mut cur = btree.open_cursor(root).unwrap();
        assert!(btree.first(&mut cur).unwrap());
        let data = btree.data(&cur).unwrap();
        let fields = crate::vdbe::aux::split_record(&data, 2).unwrap();
        assert_eq!(fields[0], b"ada");
        assert_eq!(fields[1], b"");
    }

    #[test]
    fn inserting_into_an_indexed_table_also_writes_the_index_entry() {
        let pager = Pager::open_memory();
        let btree = Btree::new(pager);
        let table_root = btree.create_table().unwrap();
        let index_root = btree.create_table().unwrap();

        let mut schema = Schema::new();
        schema.add_table("people", table_root, vec!["name".into(), "age".into()]).unwrap();
        schema.add_index("people", "people_name", index_root, 0).unwrap();

        let stmt = InsertStmt {
            table: "people".into(),
            columns: vec!["name".into(), "age".into()],
            rows: vec![vec![Expr::StrLiteral("ada".into()), Expr::IntLiteral(30)]],
        };
        let program = compile_insert(&schema, &stmt).unwrap();
        let mut engine = Engine::new(&program, &btree, 0);
        let rows = engine.run().unwrap();
        let rowid = rows[0][0].to_int() as u32;

        let mut idx_cur = btree.open_cursor(index_root).unwrap();
        let probe = crate::vdbe::aux::make_idx_key(&[crate::vdbe::mem::Mem::Str("ada".into())], rowid);
        let found = btree.move_to(&mut idx_cur, &probe).unwrap();
        assert_eq!(found, crate::storage::btree::MoveResult::Exact);
    }

    #[test]
    fn rejects_mismatched_value_count() {
        let schema = schema_with_people();
        let stmt = InsertStmt {
            table: "people".into(),
            columns: vec!["name".into(), "age".into()],
            rows: vec![vec![Expr::StrLiteral("ada".into())]],
        };
        assert!(compile_insert(&schema, &stmt).is_err());
    }
}
