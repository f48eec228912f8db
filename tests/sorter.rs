//! §8 scenario 4: three (key, payload) pairs fed in arbitrary order come
//! back out in ascending key order once `Sort` finalizes the run.

use wrensql::storage::btree::Btree;
use wrensql::storage::pager::Pager;
use wrensql::vdbe::{Engine, Instruction, Opcode, Program};

#[test]
fn sort_then_drain_yields_payloads_in_key_order() {
    let btree = Btree::new(Pager::open_memory());

    let mut program = Program::new();
    program.push(Instruction::simple(Opcode::SortOpen));
    for (key, payload) in [("c", 1), ("a", 2), ("b", 3)] {
        program.push(Instruction::new(Opcode::String, 0, 0, Some(key)));
        program.push(Instruction::new(Opcode::SortMakeKey, 1, 0, None));
        program.push(Instruction::new(Opcode::Integer, payload, 0, None));
        program.push(Instruction::new(Opcode::SortMakeRec, 1, 0, None));
        program.push(Instruction::simple(Opcode::SortPut));
    }
    program.push(Instruction::simple(Opcode::Sort));
    let next_at = program.push(Instruction::new(Opcode::SortNext, 0, 0, None));
    program.push(Instruction::new(Opcode::SortCallback, 1, 0, None));
    program.push(Instruction::new(Opcode::Goto, 0, next_at as i32, None));
    let end = program.instructions.len();
    program.instructions[next_at].p2 = end as i32;
    program.push(Instruction::simple(Opcode::SortClose));
    program.push(Instruction::simple(Opcode::Halt));

    let mut engine = Engine::new(&program, &btree, 0);
    let rows = engine.run().unwrap();
    let payloads: Vec<i64> = rows.into_iter().map(|r| r[0].to_int()).collect();
    assert_eq!(payloads, vec![2, 3, 1]);
}
