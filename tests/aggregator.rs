//! §8 scenario 3: group `("x",1), ("y",2), ("x",3)` by key, summing the
//! value column per bucket, and read every bucket back exactly once.

use wrensql::storage::btree::Btree;
use wrensql::storage::pager::Pager;
use wrensql::vdbe::{Engine, Instruction, Mem, Opcode, Program};

#[test]
fn buckets_accumulate_by_key_and_each_is_emitted_once() {
    let btree = Btree::new(Pager::open_memory());

    let mut program = Program::new();
    program.push(Instruction::new(Opcode::AggReset, 1, 0, None));

    for (key, value) in [("x", 1), ("y", 2), ("x", 3)] {
        program.push(Instruction::new(Opcode::String, 0, 0, Some(key)));
        program.push(Instruction::new(Opcode::AggFocus, 0, 0, None));
        program.push(Instruction::new(Opcode::AggIncr, 0, value, None));
    }

    let next_at = program.push(Instruction::new(Opcode::AggNext, 0, 0, None));
    program.push(Instruction::new(Opcode::AggGet, 0, 0, None));
    program.push(Instruction::new(Opcode::Callback, 1, 0, None));
    program.push(Instruction::new(Opcode::Goto, 0, next_at as i32, None));
    let end = program.instructions.len();
    program.instructions[next_at].p2 = end as i32;
    program.push(Instruction::simple(Opcode::Halt));

    let mut engine = Engine::new(&program, &btree, 0);
    let rows = engine.run().unwrap();
    let totals: Vec<i64> = rows.into_iter().map(|r| r[0].to_int()).collect();
    assert_eq!(totals.len(), 2);
    assert!(totals.contains(&4));
    assert!(totals.contains(&2));
}
