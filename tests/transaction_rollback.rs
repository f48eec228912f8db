//! §8 scenario 5: a row inserted inside a transaction that rolls back
//! instead of committing must be gone afterward, and the schema cookie
//! the VM started with must still read back unchanged.

use wrensql::storage::btree::Btree;
use wrensql::storage::pager::Pager;
use wrensql::vdbe::{Engine, Instruction, Opcode, Program};

#[test]
fn rolled_back_insert_leaves_no_trace() {
    let btree = Btree::new(Pager::open_memory());
    let root = btree.create_table().unwrap();

    let mut program = Program::new();
    program.push(Instruction::new(Opcode::Transaction, 0, 0, None));
    program.push(Instruction::new(Opcode::OpenWrite, 0, root as i32, None));
    program.push(Instruction::new(Opcode::Integer, 1, 0, None));
    program.push(Instruction::new(Opcode::MakeKey, 1, 0, None));
    program.push(Instruction::new(Opcode::String, 0, 0, Some("x")));
    program.push(Instruction::new(Opcode::MakeRecord, 1, 0, None));
    program.push(Instruction::new(Opcode::Put, 0, 0, None));
    program.push(Instruction::simple(Opcode::Close));
    program.push(Instruction::simple(Opcode::Rollback));
    program.push(Instruction::simple(Opcode::Halt));

    let mut engine = Engine::new(&program, &btree, 7);
    let rows = engine.run().unwrap();
    assert!(rows.is_empty());
    assert!(!btree.pager().in_transaction());

    let mut scan = Program::new();
    scan.push(Instruction::new(Opcode::Open, 0, root as i32, None));
    let rewind_at = scan.push(Instruction::new(Opcode::Rewind, 0, 0, None));
    let loop_start = scan.instructions.len();
    scan.push(Instruction::new(Opcode::Column, 0, 0, None));
    scan.push(Instruction::new(Opcode::Callback, 1, 0, None));
    scan.push(Instruction::new(Opcode::Next, 0, loop_start as i32, None));
    let end = scan.instructions.len();
    scan.instructions[rewind_at].p2 = end as i32;
    scan.push(Instruction::simple(Opcode::Close));
    scan.push(Instruction::simple(Opcode::Halt));

    let mut scan_engine = Engine::new(&scan, &btree, 7);
    let remaining = scan_engine.run().unwrap();
    assert!(remaining.is_empty(), "rolled-back row should not be visible: {:?}", remaining);

    let mut verify = Program::new();
    verify.push(Instruction::simple(Opcode::ReadCookie));
    verify.push(Instruction::simple(Opcode::Halt));
    let mut verify_engine = Engine::new(&verify, &btree, 7);
    verify_engine.run().unwrap();
    assert_eq!(verify_engine.schema_cookie(), 7);
}
