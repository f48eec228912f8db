//! `UPDATE` code generation (§4.6 "two-cursor pattern"): a first pass
//! scans the table under the `WHERE` filter and records matching rowids
//! into a keylist cursor is never moved between the scan and the write so
//! in-flight B-tree page splits can't perturb it; a second pass drains the
//! keylist, repositioning by rowid each time, removes now-stale index
//! entries, rewrites the row, and inserts fresh index entries.

use crate::error::{Error, Result};
use crate::parser::ast::{Expr, UpdateStmt};
use crate::schema::Schema;
use crate::vdbe::bytecode::{Instruction, Opcode, Program};

use super::expr::{emit_expr, Scope};

const SCAN_CURSOR: i32 = 0;
const WRITE_CURSOR: i32 = 0;
const LIST_ID: i32 = 0;
const ROWID_MEM: i32 = 0;

pub fn compile_update(schema: &Schema, stmt: &UpdateStmt) -> Result<Program> {
    let table = schema.table(&stmt.table)?;
    let ncols = table.columns.len();
    let old_mem = |i: usize| -> i32 { 1 + i as i32 };
    let new_mem = |i: usize| -> i32 { 1 + ncols as i32 + i as i32 };

    let mut assignments: Vec<Option<&Expr>> = vec![None; ncols];
    for (name, expr) in &stmt.assignments {
        let pos = table
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::sql(format!("no such column: {name}")))?;
        assignments[pos] = Some(expr);
    }

    let mut program = Program::new();
    program.mem_cells = 1 + 2 * ncols;
    let scope = Scope { columns: &table.columns, cursor: SCAN_CURSOR };

    // --- Pass 1: collect matching rowids --------------------------------
    program.push(Instruction::simple(Opcode::Transaction));
    program.push(Instruction::new(Opcode::Open, SCAN_CURSOR, table.root as i32, None));
    program.push(Instruction::new(Opcode::ListOpen, LIST_ID, 0, None));

    let rewind_at = program.push(Instruction::new(Opcode::Rewind, SCAN_CURSOR, 0, None));
    let pass1_loop = program.instructions.len();
    let mut skip_at = None;
    if let Some(filter) = &stmt.filter {
        emit_expr(&mut program, &scope, filter)?;
        skip_at = Some(program.push(Instruction::new(Opcode::IfNot, 0, 0, None)));
    }
    program.push(Instruction::new(Opcode::Recno, SCAN_CURSOR, 0, None));
    program.push(Instruction::new(Opcode::ListWrite, LIST_ID, 0, None));
    if let Some(at) = skip_at {
        let here = program.instructions.len();
        program.instructions[at].p2 = here as i32;
    }
    program.push(Instruction::new(Opcode::Next, SCAN_CURSOR, pass1_loop as i32, None));
    let pass1_end = program.instructions.len();
    program.instructions[rewind_at].p2 = pass1_end as i32;
    program.push(Instruction::new(Opcode::Close, SCAN_CURSOR, 0, None));

    // --- Pass 2: rewrite each collected row ------------------------------
    program.push(Instruction::new(Opcode::ListRewind, LIST_ID, 0, None));
    program.push(Instruction::new(Opcode::OpenWrite, WRITE_CURSOR, table.root as i32, None));
    for (i, (_, root, _)) in table.indexes.iter().enumerate() {
        program.push(Instruction::new(Opcode::OpenWrite, index_cursor(i), *root as i32, None));
    }

    let pass2_loop = program.instructions.len();
    let read_at = program.push(Instruction::new(Opcode::ListRead, LIST_ID, 0, None));
    program.push(Instruction::new(Opcode::MemStore, ROWID_MEM, 0, None));

    program.push(Instruction::new(Opcode::MemLoad, ROWID_MEM, 0, None));
    program.push(Instruction::new(Opcode::MakeKey, 1, 0, None));
    program.push(Instruction::new(Opcode::MoveTo, WRITE_CURSOR, 0, None));
    program.push(Instruction::simple(Opcode::Pop));

    for i in 0..ncols {
        program.push(Instruction::new(Opcode::Column, WRITE_CURSOR, i as i32, None));
        program.push(Instruction::new(Opcode::MemStore, old_mem(i), 0, None));
    }

    for (i, (_, _, column)) in table.indexes.iter().enumerate() {
        let idx_cursor = index_cursor(i);
        program.push(Instruction::new(Opcode::MemLoad, old_mem(*column), 0, None));
        program.push(Instruction::new(Opcode::MemLoad, ROWID_MEM, 0, None));
        program.push(Instruction::new(Opcode::MakeIdxKey, 1, 0, None));
        program.push(Instruction::new(Opcode::BeginIdx, idx_cursor, 0, None));
        program.push(Instruction::new(Opcode::DeleteIdx, idx_cursor, 0, None));
    }

    program.push(Instruction::new(Opcode::MemLoad, ROWID_MEM, 0, None));
    program.push(Instruction::new(Opcode::MakeKey, 1, 0, None));
    for i in 0..ncols {
        match assignments[i] {
            Some(expr) => emit_expr(&mut program, &scope, expr)?,
            None => {
                program.push(Instruction::new(Opcode::MemLoad, old_mem(i), 0, None));
            }
        }
        program.push(Instruction::simple(Opcode::Dup));
        program.push(Instruction::new(Opcode::MemStore, new_mem(i), 0, None));
    }
    program.push(Instruction::new(Opcode::MakeRecord, ncols as i32, 0, None));
    program.push(Instruction::new(Opcode::Put, WRITE_CURSOR, 0, None));
    program.push(Instruction::new(Opcode::MemLoad, ROWID_MEM, 0, None));
    program.push(Instruction::new(Opcode::Callback, 1, 0, None));

    for (i, (_, _, column)) in table.indexes.iter().enumerate() {
        program.push(Instruction::new(Opcode::MemLoad, new_mem(*column), 0, None));
        program.push(Instruction::new(Opcode::MemLoad, ROWID_MEM, 0, None));
        program.push(Instruction::new(Opcode::MakeIdxKey, 1, 0, None));
        program.push(Instruction::new(Opcode::String, 0, 0, None));
        program.push(Instruction::new(Opcode::PutIdx, index_cursor(i), 0, None));
    }

    program.push(Instruction::new(Opcode::Goto, 0, pass2_loop as i32, None));
    let pass2_end = program.instructions.len();
    program.instructions[read_at].p2 = pass2_end as i32;
    program.push(Instruction::new(Opcode::ListClose, LIST_ID, 0, None));
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
    use crate::parser::ast::{BinaryOp, ColumnRef};
    use crate::storage::btree::Btree;
    use crate::storage::pager::Pager;
    use crate::vdbe::aux::{make_key, make_record, split_record};
    use crate::vdbe::engine::Engine;
    use crate::vdbe::mem::Mem;

    fn table_with_two_rows() -> (Schema, Btree) {
        let pager = Pager::open_memory();
        let btree = Btree::new(pager);
        let root = btree.create_table().unwrap();
        for (rowid, name, age) in [(1i64, "ada", 30i64), (2, "alan", 40)] {
            let mut cur = btree.open_cursor(root).unwrap();
            let key = make_key(&[Mem::Int(rowid)]);
            let data = make_record(&[Mem::Str(name.into()), Mem::Int(age)]);
            btree.pager().begin_write().unwrap();
            btree.insert(&mut cur, &key, &data).unwrap();
            btree.pager().commit().unwrap();
        }
        let mut schema = Schema::new();
        schema.add_table("people", root, vec!["name".into(), "age".into()]).unwrap();
        (schema, btree)
    }

    #[test]
    fn updates_rows_matching_filter() {
        let (schema, btree) = table_with_two_rows();
        let stmt = UpdateStmt {
            table: "people".into(),
            assignments: vec![("age".into(), Expr::IntLiteral(31))],
            filter: Some(Expr::Binary(
                BinaryOp::Eq,
                Box::new(Expr::Column(ColumnRef { table: None, column: "name".into() })),
                Box::new(Expr::StrLiteral("ada".into())),
            )),
        };
        let program = compile_update(&schema, &stmt).unwrap();
        let mut engine = Engine::new(&program, &btree, 0);
        engine.run().unwrap();

        let root = schema.table("people").unwrap().root;
        let mut cur = btree.open_cursor(root).unwrap();
        btree.first(&mut cur).unwrap();
        loop {
            let key = btree.key(&cur).unwrap();
            let data = btree.data(&cur).unwrap();
            let fields = split_record(&data, 2).unwrap();
            if key == make_key(&[Mem::Int(1)]) {
                assert_eq!(fields[1], b"31");
            } else {
                assert_eq!(fields[1], b"40");
            }
            if !btree.next(&mut cur).unwrap() {
                break;
            }
        }
    }

    #[test]
    fn updating_an_indexed_column_rewrites_its_index_entry() {
        use crate::storage::btree::MoveResult;
        use crate::vdbe::aux::make_idx_key;

        let (mut schema, btree) = table_with_two_rows();
        let index_root = btree.create_table().unwrap();
        schema.add_index("people", "people_name", index_root, 0).unwrap();
        for (rowid, name) in [(1u32, "ada"), (2, "alan")] {
            let mut idx_cur = btree.open_cursor(index_root).unwrap();
            let key = make_idx_key(&[Mem::Str(name.into())], rowid);
            btree.pager().begin_write().unwrap();
            btree.insert(&mut idx_cur, &key, &[]).unwrap();
            btree.pager().commit().unwrap();
        }

        let stmt = UpdateStmt {
            table: "people".into(),
            assignments: vec![("name".into(), Expr::StrLiteral("beth".into()))],
            filter: Some(Expr::Binary(
                BinaryOp::Eq,
                Box::new(Expr::Column(ColumnRef { table: None, column: "name".into() })),
                Box::new(Expr::StrLiteral("ada".into())),
            )),
        };
        let program = compile_update(&schema, &stmt).unwrap();
        let mut engine = Engine::new(&program, &btree, 0);
        engine.run().unwrap();

        let mut stale = btree.open_cursor(index_root).unwrap();
        let stale_key = make_idx_key(&[Mem::Str("ada".into())], 1);
        assert_eq!(btree.move_to(&mut stale, &stale_key).unwrap(), MoveResult::Nearest);

        let mut fresh = btree.open_cursor(index_root).unwrap();
        let fresh_key = make_idx_key(&[Mem::Str("beth".into())], 1);
        assert_eq!(btree.move_to(&mut fresh, &fresh_key).unwrap(), MoveResult::Exact);

        let mut untouched = btree.open_cursor(index_root).unwrap();
        let untouched_key = make_idx_key(&[Mem::Str("alan".into())], 2);
        assert_eq!(btree.move_to(&mut untouched, &untouched_key).unwrap(), MoveResult::Exact);
    }

    #[test]
    fn updates_every_row_without_a_filter() {
        let (schema, btree) = table_with_two_rows();
        let stmt = UpdateStmt {
            table: "people".into(),
            assignments: vec![("age".into(), Expr::IntLiteral(0))],
            filter: None,
        };
        let program = compile_update(&schema, &stmt).unwrap();
        let mut engine = Engine::new(&program, &btree, 0);
        engine.run().unwrap();

        let root = schema.table("people").unwrap().root;
        let mut cur = btree.open_cursor(root).unwrap();
        btree.first(&mut cur).unwrap();
        loop {
            let data = btree.data(&cur).unwrap();
            let fields = split_record(&data, 2).unwrap();
            assert_eq!(fields[1], b"0");
            if !btree.next(&mut cur).unwrap() {
                break;
            }
        }
    }
}
