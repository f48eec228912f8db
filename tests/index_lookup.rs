//! §8 scenario 2: a table plus an index on column 0, probed through the
//! VM's own opcode sequence — `MakeKey("bob")`, `BeginIdx`, `NextIdx` —
//! rather than by reaching into the storage layer directly, so the fix
//! to `NextIdx`'s rowid decoding is exercised the way a real program
//! would drive it.

use wrensql::storage::btree::Btree;
use wrensql::storage::pager::Pager;
use wrensql::vdbe::{Engine, Instruction, Opcode, Program};

#[test]
fn begin_idx_then_next_idx_yields_the_matching_rowid() {
    let btree = Btree::new(Pager::open_memory());
    let table_root = btree.create_table().unwrap();
    let index_root = btree.create_table().unwrap();

    let mut build = Program::new();
    build.push(Instruction::simple(Opcode::Transaction));
    build.push(Instruction::new(Opcode::OpenWrite, 0, table_root as i32, None));
    build.push(Instruction::new(Opcode::OpenWrite, 1, index_root as i32, None));
    for (rowid, name) in [(1i32, "alice"), (2i32, "bob")] {
        build.push(Instruction::new(Opcode::Integer, rowid, 0, None));
        build.push(Instruction::new(Opcode::MakeKey, 1, 0, None));
        build.push(Instruction::new(Opcode::String, 0, 0, Some(name)));
        build.push(Instruction::new(Opcode::MakeRecord, 1, 0, None));
        build.push(Instruction::new(Opcode::Put, 0, 0, None));

        build.push(Instruction::new(Opcode::String, 0, 0, Some(name)));
        build.push(Instruction::new(Opcode::Integer, rowid, 0, None));
        build.push(Instruction::new(Opcode::MakeIdxKey, 1, 0, None));
        build.push(Instruction::simple(Opcode::Null));
        build.push(Instruction::new(Opcode::PutIdx, 1, 0, None));
    }
    build.push(Instruction::simple(Opcode::Commit));
    build.push(Instruction::simple(Opcode::Halt));
    let mut build_engine = Engine::new(&build, &btree, 0);
    build_engine.run().unwrap();

    let mut lookup = Program::new();
    lookup.push(Instruction::new(Opcode::Open, 1, index_root as i32, None));
    lookup.push(Instruction::new(Opcode::String, 0, 0, Some("bob")));
    lookup.push(Instruction::new(Opcode::MakeKey, 1, 0, None));
    lookup.push(Instruction::new(Opcode::BeginIdx, 1, 0, None));
    let next_idx = lookup.push(Instruction::new(Opcode::NextIdx, 1, 0, None));
    lookup.push(Instruction::new(Opcode::Callback, 1, 0, None));
    lookup.push(Instruction::simple(Opcode::Close));
    lookup.push(Instruction::simple(Opcode::Halt));
    let end = lookup.instructions.len();
    lookup.instructions[next_idx].p2 = end as i32;

    let mut lookup_engine = Engine::new(&lookup, &btree, 0);
    let rows = lookup_engine.run().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0].to_int(), 2);
}
