//! Hand-built bytecode program: create a table, insert two rows, scan
//! them back in key order.

use wrensql::storage::btree::Btree;
use wrensql::storage::pager::Pager;
use wrensql::vdbe::{Engine, Instruction, Mem, Opcode, Program};

#[test]
fn create_insert_and_scan_emits_rows_in_key_order() {
    let btree = Btree::new(Pager::open_memory());
    let root = btree.create_table().unwrap();

    let mut program = Program::new();
    program.push(Instruction::new(Opcode::Transaction, 0, 0, None));
    program.push(Instruction::new(Opcode::OpenWrite, 0, root as i32, None));

    for (rowid, name) in [(1, "alice"), (2, "bob")] {
        program.push(Instruction::new(Opcode::Integer, rowid, 0, None));
        program.push(Instruction::new(Opcode::MakeKey, 1, 0, None));
        program.push(Instruction::new(Opcode::String, 0, 0, Some(name)));
        program.push(Instruction::new(Opcode::MakeRecord, 1, 0, None));
        program.push(Instruction::new(Opcode::Put, 0, 0, None));
    }
    program.push(Instruction::simple(Opcode::Close));
    program.push(Instruction::new(Opcode::Open, 0, root as i32, None));
    let rewind_at = program.push(Instruction::new(Opcode::Rewind, 0, 0, None));
    let loop_start = program.instructions.len();
    program.push(Instruction::new(Opcode::Column, 0, 0, None));
    program.push(Instruction::new(Opcode::Callback, 1, 0, None));
    program.push(Instruction::new(Opcode::Next, 0, loop_start as i32, None));
    let end = program.instructions.len();
    program.instructions[rewind_at].p2 = end as i32;
    program.push(Instruction::simple(Opcode::Commit));
    program.push(Instruction::simple(Opcode::Halt));

    let mut engine = Engine::new(&program, &btree, 0);
    let rows = engine.run().unwrap();
    assert_eq!(rows, vec![vec![Mem::Str("alice".into())], vec![Mem::Str("bob".into())]]);
}
