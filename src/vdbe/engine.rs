//! The stack-based interpreter (§3.6, §4.5): owns the stack, memory
//! cells, cursor table, keylists, sorter(s), aggregator, and sets, and
//! drives them by looping over a `Program`'s instructions.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{Error, Result};
use crate::random::Prng;
use crate::storage::btree::{Btree, BtreeCursor, MoveResult};
use crate::types::Pgno;
use crate::vdbe::aux::{make_idx_key, make_key, make_record, split_record};
use crate::vdbe::bytecode::{Instruction, Opcode, Program};
use crate::vdbe::mem::Mem;
use crate::vdbe::sort::Sorter;
use crate::vdbe::trace::Tracer;
use crate::vdbe::types::{NEWRECNO_HINT_ATTEMPTS, NEWRECNO_MAX_ATTEMPTS};

/// Outcome of a single `run` call: either the program produced a row
/// (caller should re-enter with the same engine to continue, in a real
/// step-based API) or it halted.
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    Row(Vec<Mem>),
    Done,
}

struct OpenCursor {
    btree_cursor: BtreeCursor,
    #[allow(dead_code)]
    writable: bool,
}

#[derive(Default)]
struct AggBucket {
    values: Vec<Mem>,
}

#[derive(Default)]
struct Aggregator {
    buckets: Vec<AggBucket>,
    index: HashMap<Vec<u8>, usize>,
    arity: usize,
    focus: Option<usize>,
    iter_pos: usize,
}

impl Aggregator {
    fn reset(&mut self, arity: usize) {
        self.buckets.clear();
        self.index.clear();
        self.arity = arity;
        self.focus = None;
        self.iter_pos = 0;
    }
}

pub struct Engine<'a> {
    program: &'a Program,
    pc: usize,
    stack: Vec<Mem>,
    mem: Vec<Mem>,
    cursors: HashMap<i32, OpenCursor>,
    keylists: HashMap<i32, VecDeque<i64>>,
    sorters: HashMap<i32, Sorter>,
    sets: HashMap<i32, HashSet<Vec<u8>>>,
    agg: Aggregator,
    btree: &'a Btree,
    schema_cookie: u32,
    interrupted: bool,
    row_column_names: Vec<String>,
    prng: Prng,
    next_rowid_hint: i64,
    last_sort_record: Option<Vec<u8>>,
    tracer: Option<&'a mut dyn Tracer>,
}

impl<'a> Engine<'a> {
    pub fn new(program: &'a Program, btree: &'a Btree, schema_cookie: u32) -> Self {
        Self {
            program,
            pc: 0,
            stack: Vec::new(),
            mem: vec![Mem::Null; program.mem_cells],
            cursors: HashMap::new(),
            keylists: HashMap::new(),
            sorters: HashMap::new(),
            sets: HashMap::new(),
            agg: Aggregator::default(),
            btree,
            schema_cookie,
            interrupted: false,
            row_column_names: Vec::new(),
            prng: Prng::from_entropy(),
            next_rowid_hint: 1,
            last_sort_record: None,
            tracer: None,
        }
    }

    pub fn with_tracer(mut self, tracer: &'a mut dyn Tracer) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn interrupt(&mut self) {
        self.interrupted = true;
    }

    pub fn schema_cookie(&self) -> u32 {
        self.schema_cookie
    }

    /// Pre-load a memory cell before `run` (§6 bind parameters): used by
    /// `api::Statement::bind_*` to seed values a hand-built program reads
    /// back with `MemLoad`.
    pub fn bind(&mut self, index: usize, value: Mem) -> Result<()> {
        let slot = self.mem.get_mut(index).ok_or_else(|| Error::internal("bind index out of range"))?;
        *slot = value;
        Ok(())
    }

    fn pop(&mut self) -> Result<Mem> {
        self.stack.pop().ok_or_else(|| Error::internal("stack underflow"))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Mem>> {
        if self.stack.len() < n {
            return Err(Error::internal("stack underflow"));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn cursor_mut(&mut self, p1: i32) -> Result<&mut OpenCursor> {
        self.cursors.get_mut(&p1).ok_or_else(|| Error::internal("no such cursor"))
    }

    /// Runs the whole program to completion, collecting every emitted row
    /// (via `Callback`). Closes all open cursors on every exit path,
    /// normal or error (§3.6 "implicitly closed when the program
    /// halts").
    pub fn run(&mut self) -> Result<Vec<Vec<Mem>>> {
        let mut rows = Vec::new();
        let result = self.run_inner(&mut rows);
        self.cursors.clear();
        if let Err(e) = &result {
            // §7: only a fixed subset of error kinds force the active
            // transaction to unwind; Busy/Constraint leave it open so the
            // caller can retry or issue an explicit ROLLBACK.
            if e.forces_rollback() {
                let _ = self.btree.pager().rollback();
            }
        }
        result?;
        Ok(rows)
    }

    fn run_inner(&mut self, rows: &mut Vec<Vec<Mem>>) -> Result<()> {
        loop {
            if self.interrupted {
                return Err(Error::Interrupt);
            }
            let Some(instr) = self.program.instructions.get(self.pc) else {
                return Ok(());
            };
            if let Some(t) = self.tracer.as_deref_mut() {
                t.trace(self.pc, instr, &self.stack);
            }
            let instr = instr.clone();
            let mut next_pc = self.pc + 1;
            self.exec(&instr, &mut next_pc, rows)?;
            if matches!(instr.op, Opcode::Halt) {
                return Ok(());
            }
            self.pc = next_pc;
        }
    }

    fn exec(&mut self, instr: &Instruction, next_pc: &mut usize, rows: &mut Vec<Vec<Mem>>) -> Result<()> {
        use Opcode::*;
        // Copied out up front: `self.btree` is an independent `&Btree`
        // handle, so using `btree` instead of `self.btree` alongside a
        // `self.cursor_mut(...)` borrow avoids fighting the borrow
        // checker over disjoint fields hidden behind a method call.
        let btree = self.btree;
        match instr.op {
            Integer => self.stack.push(Mem::Int(instr.p1 as i64)),
            String => self.stack.push(Mem::Str(instr.p3.clone().unwrap_or_default())),
            Null => self.stack.push(Mem::Null),
            Pop => {
                self.pop()?;
            }
            Dup => {
                let v = self.stack.last().ok_or_else(|| Error::internal("stack underflow"))?.clone();
                self.stack.push(v);
            }
            Pull => {
                let idx = self.stack.len().checked_sub(1 + instr.p1 as usize)
                    .ok_or_else(|| Error::internal("Pull out of range"))?;
                let v = self.stack.remove(idx);
                self.stack.push(v);
            }

            Add | Subtract | Multiply | Divide => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.stack.push(arith(instr.op, &a, &b));
            }
            And => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.stack.push(if a.is_null() || b.is_null() {
                    Mem::Null
                } else {
                    Mem::Int((a.is_truthy() && b.is_truthy()) as i64)
                });
            }
            Or => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.stack.push(if a.is_null() && b.is_null() {
                    Mem::Null
                } else {
                    Mem::Int((a.is_truthy() || b.is_truthy()) as i64)
                });
            }
            Not => {
                let a = self.pop()?;
                self.stack.push(if a.is_null() { Mem::Null } else { Mem::Int(!a.is_truthy() as i64) });
            }
            Negative => {
                let a = self.pop()?;
                self.stack.push(match a {
                    Mem::Int(i) => Mem::Int(-i),
                    Mem::Null => Mem::Null,
                    other => Mem::Real(-other.to_real()),
                });
            }
            AddImm => {
                let a = self.pop()?;
                self.stack.push(Mem::Int(a.to_int() + instr.p1 as i64));
            }

            Eq | Ne | Lt | Le | Gt | Ge => {
                let b = self.pop()?;
                let a = self.pop()?;
                if let Some(ord) = a.compare(&b, instr.p1 != 0) {
                    if cmp_matches(instr.op, ord) {
                        *next_pc = instr.p2 as usize;
                    }
                }
            }
            If => {
                let a = self.pop()?;
                if a.is_truthy() {
                    *next_pc = instr.p2 as usize;
                }
            }
            IfNot => {
                let a = self.pop()?;
                if !a.is_truthy() {
                    *next_pc = instr.p2 as usize;
                }
            }
            IsNull => {
                let a = self.pop()?;
                if a.is_null() {
                    *next_pc = instr.p2 as usize;
                }
            }
            NotNull => {
                let a = self.pop()?;
                if !a.is_null() {
                    *next_pc = instr.p2 as usize;
                }
            }

            Like => {
                let pattern = self.pop()?.to_text();
                let value = self.pop()?.to_text();
                self.stack.push(Mem::Int(sql_like(&value, &pattern) as i64));
            }
            Glob => {
                let pattern = self.pop()?.to_text();
                let value = self.pop()?.to_text();
                self.stack.push(Mem::Int(file_glob(&value, &pattern) as i64));
            }
            Concat => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.stack.push(Mem::Str(a.to_text() + &b.to_text()));
            }
            Strlen => {
                let a = self.pop()?;
                self.stack.push(Mem::Int(a.to_text().chars().count() as i64));
            }
            Substr => {
                let len = self.pop()?.to_int();
                let start = self.pop()?.to_int();
                let s = self.pop()?.to_text();
                self.stack.push(Mem::Str(substr(&s, start, len)));
            }

            Transaction => {
                btree.pager().begin_write()?;
            }
            Commit => {
                btree.pager().commit()?;
            }
            Rollback => {
                btree.pager().rollback()?;
                self.cursors.clear();
            }

            ReadCookie => self.stack.push(Mem::Int(self.schema_cookie as i64)),
            SetCookie => self.schema_cookie = instr.p1 as u32,
            VerifyCookie => {
                if instr.p1 as u32 != self.schema_cookie {
                    *next_pc = instr.p2 as usize;
                }
            }

            Open | OpenWrite => {
                let root = instr.p2 as Pgno;
                let cur = btree.open_cursor(root)?;
                self.cursors.insert(instr.p1, OpenCursor { btree_cursor: cur, writable: instr.op == OpenWrite });
            }
            OpenTemp => {
                let root = btree.create_table()?;
                let cur = btree.open_cursor(root)?;
                self.cursors.insert(instr.p1, OpenCursor { btree_cursor: cur, writable: true });
            }
            Close => {
                self.cursors.remove(&instr.p1);
            }
            MoveTo => {
                let key = self.pop()?.to_blob();
                let cur = self.cursor_mut(instr.p1)?;
                let result = btree.move_to(&mut cur.btree_cursor, &key)?;
                self.stack.push(Mem::Int((result == MoveResult::Exact) as i64));
            }
            Rewind => {
                let cur = self.cursor_mut(instr.p1)?;
                let found = btree.first(&mut cur.btree_cursor)?;
                if !found {
                    *next_pc = instr.p2 as usize;
                }
            }
            Next => {
                let cur = self.cursor_mut(instr.p1)?;
                let root_has_more = btree.next(&mut cur.btree_cursor)?;
                if root_has_more {
                    *next_pc = instr.p2 as usize;
                }
            }
            Recno => {
                let cur = self.cursor_mut(instr.p1)?;
                let key = btree.key(&cur.btree_cursor)?;
                self.stack.push(Mem::Int(decode_rowid(&key)));
            }
            Column => {
                let cur = self.cursor_mut(instr.p1)?;
                let data = btree.data(&cur.btree_cursor)?;
                let idx = instr.p2 as usize;
                let column_count = idx + 1;
                let fields = split_record(&data, column_count)
                    .ok_or_else(|| Error::corrupt("record header shorter than requested column"))?;
                self.stack.push(decode_field(fields[idx]));
            }

            MakeRecord => {
                let values = self.pop_n(instr.p1 as usize)?;
                self.stack.push(Mem::Blob(make_record(&values)));
            }
            MakeKey => {
                let values = self.pop_n(instr.p1 as usize)?;
                self.stack.push(Mem::Blob(make_key(&values)));
            }
            MakeIdxKey => {
                let rowid = self.pop()?.to_int() as u32;
                let values = self.pop_n(instr.p1 as usize)?;
                self.stack.push(Mem::Blob(make_idx_key(&values, rowid)));
            }

            NewRecno => {
                self.cursor_mut(instr.p1)?;
                let rowid = self.new_recno(instr.p1)?;
                self.stack.push(Mem::Int(rowid));
            }
            Put => {
                let data = self.pop()?.to_blob();
                let key = self.pop()?.to_blob();
                let cur = self.cursor_mut(instr.p1)?;
                btree.insert(&mut cur.btree_cursor, &key, &data)?;
            }
            Delete => {
                let cur = self.cursor_mut(instr.p1)?;
                btree.delete(&mut cur.btree_cursor)?;
            }

            BeginIdx => {
                let key = self.pop()?.to_blob();
                let cur = self.cursor_mut(instr.p1)?;
                btree.move_to(&mut cur.btree_cursor, &key)?;
            }
            NextIdx => {
                let cur = self.cursor_mut(instr.p1)?;
                if !cur.btree_cursor.is_valid() {
                    *next_pc = instr.p2 as usize;
                } else {
                    let key = btree.key(&cur.btree_cursor)?;
                    let rowid = decode_idx_rowid(&key);
                    btree.next(&mut cur.btree_cursor)?;
                    self.stack.push(Mem::Int(rowid));
                }
            }
            PutIdx => {
                let data = self.pop()?.to_blob();
                let key = self.pop()?.to_blob();
                let cur = self.cursor_mut(instr.p1)?;
                btree.insert(&mut cur.btree_cursor, &key, &data)?;
            }
            DeleteIdx => {
                let cur = self.cursor_mut(instr.p1)?;
                btree.delete(&mut cur.btree_cursor)?;
            }

            MemStore => {
                let v = self.pop()?;
                let slot = self.mem.get_mut(instr.p1 as usize)
                    .ok_or_else(|| Error::internal("memory cell out of range"))?;
                *slot = v;
            }
            MemLoad => {
                let v = self.mem.get(instr.p1 as usize)
                    .ok_or_else(|| Error::internal("memory cell out of range"))?
                    .clone();
                self.stack.push(v);
            }

            ListOpen => {
                self.keylists.insert(instr.p1, VecDeque::new());
            }
            ListWrite => {
                let v = self.pop()?;
                self.keylists.entry(instr.p1).or_default().push_back(v.to_int());
            }
            ListRewind => {
                // Single-pass FIFO: nothing to rewind, reading drains it.
            }
            ListRead => {
                let list = self.keylists.get_mut(&instr.p1);
                match list.and_then(|l| l.pop_front()) {
                    Some(rowid) => self.stack.push(Mem::Int(rowid)),
                    None => *next_pc = instr.p2 as usize,
                }
            }
            ListClose => {
                self.keylists.remove(&instr.p1);
            }

            SortOpen => {
                self.sorters.insert(instr.p1, Sorter::new());
            }
            SortPut => {
                let data = self.pop()?.to_blob();
                let key = self.pop()?.to_blob();
                self.sorters.entry(instr.p1).or_insert_with(Sorter::new).put(key, data);
            }
            SortMakeKey => {
                let values = self.pop_n(instr.p1 as usize)?;
                self.stack.push(Mem::Blob(make_key(&values)));
            }
            SortMakeRec => {
                let values = self.pop_n(instr.p1 as usize)?;
                self.stack.push(Mem::Blob(make_record(&values)));
            }
            Sort => {
                if let Some(s) = self.sorters.get_mut(&instr.p1) {
                    s.finalize();
                }
            }
            SortNext => {
                let found = self.sorters.get_mut(&instr.p1).and_then(|s| s.next().cloned());
                match found {
                    Some((_, data)) => self.last_sort_record = Some(data),
                    None => *next_pc = instr.p2 as usize,
                }
            }
            SortCallback => {
                let data = self.last_sort_record.take()
                    .ok_or_else(|| Error::internal("SortCallback with no current record"))?;
                let column_count = instr.p1 as usize;
                let fields = split_record(&data, column_count)
                    .ok_or_else(|| Error::corrupt("sorted record shorter than column count"))?;
                rows.push(fields.into_iter().map(decode_field).collect());
            }
            SortClose => {
                self.sorters.remove(&instr.p1);
            }

            AggReset => self.agg.reset(instr.p1 as usize),
            AggFocus => {
                let key = self.pop()?.to_blob();
                if let Some(&idx) = self.agg.index.get(&key) {
                    self.agg.focus = Some(idx);
                    *next_pc = instr.p2 as usize;
                } else {
                    let idx = self.agg.buckets.len();
                    self.agg.buckets.push(AggBucket { values: vec![Mem::Null; self.agg.arity] });
                    self.agg.index.insert(key, idx);
                    self.agg.focus = Some(idx);
                }
            }
            AggIncr => {
                let idx = self.agg.focus.ok_or_else(|| Error::internal("no focused aggregate bucket"))?;
                let slot = &mut self.agg.buckets[idx].values[instr.p1 as usize];
                *slot = Mem::Int(slot.to_int() + instr.p2 as i64);
            }
            AggSet => {
                let v = self.pop()?;
                let idx = self.agg.focus.ok_or_else(|| Error::internal("no focused aggregate bucket"))?;
                self.agg.buckets[idx].values[instr.p1 as usize] = v;
            }
            AggGet => {
                let idx = self.agg.focus.ok_or_else(|| Error::internal("no focused aggregate bucket"))?;
                self.stack.push(self.agg.buckets[idx].values[instr.p1 as usize].clone());
            }
            AggNext => {
                // Insertion order (§4.5 pinned choice): bucket i is the
                // i-th one AggFocus ever created.
                if self.agg.iter_pos >= self.agg.buckets.len() {
                    *next_pc = instr.p2 as usize;
                } else {
                    self.agg.focus = Some(self.agg.iter_pos);
                    self.agg.iter_pos += 1;
                }
            }

            SetInsert => {
                let v = self.pop()?.to_blob();
                self.sets.entry(instr.p1).or_default().insert(v);
            }
            SetFound => {
                let v = self.pop()?.to_blob();
                if self.sets.get(&instr.p1).map_or(false, |s| s.contains(&v)) {
                    *next_pc = instr.p2 as usize;
                }
            }
            SetNotFound => {
                let v = self.pop()?.to_blob();
                if !self.sets.get(&instr.p1).map_or(false, |s| s.contains(&v)) {
                    *next_pc = instr.p2 as usize;
                }
            }

            ColumnCount => {
                self.row_column_names = vec![std::string::String::new(); instr.p1 as usize];
            }
            ColumnName => {
                if let Some(slot) = self.row_column_names.get_mut(instr.p1 as usize) {
                    *slot = instr.p3.clone().unwrap_or_default();
                }
            }
            Callback => {
                let values = self.pop_n(instr.p1 as usize)?;
                rows.push(values);
            }

            Goto => *next_pc = instr.p2 as usize,
            Halt => {
                if instr.p1 != 0 {
                    return Err(Error::sql(instr.p3.clone().unwrap_or_else(|| "halt".into())));
                }
            }
            Noop => {}
        }
        Ok(())
    }

    /// §4.5 "NewRecno algorithm": probe the table with small random
    /// deltas around a running hint, falling back to fully random probes,
    /// giving up with `Full`.
    fn new_recno(&mut self, cursor_p1: i32) -> Result<i64> {
        let root = self.cursor_mut(cursor_p1)?.btree_cursor.root();
        for attempt in 0..NEWRECNO_MAX_ATTEMPTS {
            let candidate = if attempt < NEWRECNO_HINT_ATTEMPTS {
                self.next_rowid_hint + self.prng.next_delta(1000)
            } else {
                (self.prng.next_u32() as i64) & 0x7fff_ffff
            };
            if candidate <= 0 || candidate > u32::MAX as i64 {
                continue;
            }
            let key = candidate as u32;
            let key_bytes = crate::storage::btree::rowid_key(key);
            let mut probe = self.btree.open_cursor(root)?;
            let found = self.btree.move_to(&mut probe, &key_bytes)? == MoveResult::Exact;
            if !found {
                self.next_rowid_hint = candidate + 1;
                return Ok(candidate);
            }
        }
        Err(Error::Full)
    }
}

/// Table rowid key: the whole key is the 4-byte big-endian rowid
/// (`storage::btree::rowid_key`), so the leading bytes are the rowid.
fn decode_rowid(key: &[u8]) -> i64 {
    if key.len() >= 4 {
        u32::from_be_bytes([key[0], key[1], key[2], key[3]]) as i64
    } else {
        0
    }
}

/// Index key: `vdbe::aux::make_idx_key` fields followed by a trailing
/// 4-byte big-endian rowid suffix, so the rowid is the *last* 4 bytes,
/// not the first — an index key's field bytes can be any length.
fn decode_idx_rowid(key: &[u8]) -> i64 {
    if key.len() >= 4 {
        let tail = &key[key.len() - 4..];
        u32::from_be_bytes(tail.try_into().unwrap()) as i64
    } else {
        0
    }
}

/// Decodes a raw column byte slice back into a `Mem`. There is no stored
/// type tag (§6 record format is untyped bytes plus offsets), so this
/// applies the same text-affinity guess SQLite's `OP_Column` uses absent
/// a declared column affinity: integer if it parses cleanly as one,
/// otherwise text, with an empty span decoding to `Null`.
fn decode_field(bytes: &[u8]) -> Mem {
    if bytes.is_empty() {
        return Mem::Null;
    }
    if let Ok(s) = std::str::from_utf8(bytes) {
        if let Ok(i) = s.parse::<i64>() {
            return Mem::Int(i);
        }
        return Mem::Str(s.to_string());
    }
    Mem::Blob(bytes.to_vec())
}

fn arith(op: Opcode, a: &Mem, b: &Mem) -> Mem {
    if matches!(op, Opcode::Divide) && b.to_real() == 0.0 {
        return Mem::Null;
    }
    let both_int = matches!(a, Mem::Int(_) | Mem::Null) && matches!(b, Mem::Int(_) | Mem::Null);
    if both_int {
        let (x, y) = (a.to_int(), b.to_int());
        return Mem::Int(match op {
            Opcode::Add => x.wrapping_add(y),
            Opcode::Subtract => x.wrapping_sub(y),
            Opcode::Multiply => x.wrapping_mul(y),
            Opcode::Divide => x / y,
            _ => unreachable!(),
        });
    }
    let (x, y) = (a.to_real(), b.to_real());
    Mem::Real(match op {
        Opcode::Add => x + y,
        Opcode::Subtract => x - y,
        Opcode::Multiply => x * y,
        Opcode::Divide => x / y,
        _ => unreachable!(),
    })
}

fn cmp_matches(op: Opcode, ord: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match op {
        Opcode::Eq => ord == Equal,
        Opcode::Ne => ord != Equal,
        Opcode::Lt => ord == Less,
        Opcode::Le => ord != Greater,
        Opcode::Gt => ord == Greater,
        Opcode::Ge => ord != Less,
        _ => false,
    }
}

fn substr(s: &str, start: i64, len: i64) -> String {
    let chars: Vec<char> = s.chars().collect();
    let start = (start.max(1) - 1) as usize;
    if start >= chars.len() || len <= 0 {
        return String::new();
    }
    let end = (start + len as usize).min(chars.len());
    chars[start..end].iter().collect()
}

/// SQL `LIKE`: case-insensitive, `%` matches any run, `_` matches one.
fn sql_like(value: &str, pattern: &str) -> bool {
    let v: Vec<char> = value.to_lowercase().chars().collect();
    let p: Vec<char> = pattern.to_lowercase().chars().collect();
    like_match(&v, &p)
}

fn like_match(v: &[char], p: &[char]) -> bool {
    match p.first() {
        None => v.is_empty(),
        Some('%') => like_match(v, &p[1..]) || (!v.is_empty() && like_match(&v[1..], p)),
        Some('_') => !v.is_empty() && like_match(&v[1..], &p[1..]),
        Some(c) => !v.is_empty() && v[0] == *c && like_match(&v[1..], &p[1..]),
    }
}

/// File-glob: case-sensitive, `*`/`?`/`[...]`.
fn file_glob(value: &str, pattern: &str) -> bool {
    let v: Vec<char> = value.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    glob_match(&v, &p)
}

fn glob_match(v: &[char], p: &[char]) -> bool {
    match p.first() {
        None => v.is_empty(),
        Some('*') => glob_match(v, &p[1..]) || (!v.is_empty() && glob_match(&v[1..], p)),
        Some('?') => !v.is_empty() && glob_match(&v[1..], &p[1..]),
        Some('[') => {
            let close = p.iter().position(|&c| c == ']');
            match close {
                Some(end) if !v.is_empty() => {
                    let class = &p[1..end];
                    if class.contains(&v[0]) {
                        glob_match(&v[1..], &p[end + 1..])
                    } else {
                        false
                    }
                }
                _ => false,
            }
        }
        Some(c) => !v.is_empty() && v[0] == *c && glob_match(&v[1..], &p[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::pager::Pager;
    use crate::vdbe::bytecode::Instruction;

    fn fresh_btree() -> Btree {
        Btree::new(Pager::open_memory())
    }

    #[test]
    fn arithmetic_and_halt() {
        let btree = fresh_btree();
        let mut program = Program::new();
        program.push(Instruction::new(Opcode::Integer, 3, 0, None));
        program.push(Instruction::new(Opcode::Integer, 4, 0, None));
        program.push(Instruction::new(Opcode::Add, 0, 0, None));
        program.push(Instruction::new(Opcode::Callback, 1, 0, None));
        program.push(Instruction::simple(Opcode::Halt));
        let mut engine = Engine::new(&program, &btree, 0);
        let rows = engine.run().unwrap();
        assert_eq!(rows, vec![vec![Mem::Int(7)]]);
    }

    #[test]
    fn insert_then_scan_round_trips() {
        let btree = fresh_btree();
        let root = btree.create_table().unwrap();
        let mut program = Program::new();
        program.push(Instruction::new(Opcode::OpenWrite, 0, root as i32, None));
        program.push(Instruction::new(Opcode::Integer, 1, 0, None));
        program.push(Instruction::new(Opcode::String, 0, 0, Some("hello")));
        program.push(Instruction::new(Opcode::MakeRecord, 1, 0, None));
        program.push(Instruction::new(Opcode::Integer, 1, 0, None));
        program.push(Instruction::new(Opcode::MakeKey, 1, 0, None));
        program.push(Instruction::new(Opcode::Put, 0, 0, None));
        program.push(Instruction::new(Opcode::Rewind, 0, 9, None));
        program.push(Instruction::new(Opcode::Column, 0, 0, None));
        program.push(Instruction::new(Opcode::Callback, 1, 0, None));
        program.push(Instruction::new(Opcode::Next, 0, 7, None));
        program.push(Instruction::simple(Opcode::Halt));
        let mut engine = Engine::new(&program, &btree, 0);
        let rows = engine.run().unwrap();
        assert_eq!(rows, vec![vec![Mem::Str("hello".into())]]);
    }

    #[test]
    fn divide_by_zero_yields_null() {
        let btree = fresh_btree();
        let mut program = Program::new();
        program.push(Instruction::new(Opcode::Integer, 5, 0, None));
        program.push(Instruction::new(Opcode::Integer, 0, 0, None));
        program.push(Instruction::new(Opcode::Divide, 0, 0, None));
        program.push(Instruction::new(Opcode::Callback, 1, 0, None));
        program.push(Instruction::simple(Opcode::Halt));
        let mut engine = Engine::new(&program, &btree, 0);
        let rows = engine.run().unwrap();
        assert_eq!(rows, vec![vec![Mem::Null]]);
    }

    #[test]
    fn bind_overrides_a_mem_cell_read_by_the_program() {
        let btree = fresh_btree();
        let mut program = Program::new();
        program.mem_cells = 1;
        program.push(Instruction::new(Opcode::MemLoad, 0, 0, None));
        program.push(Instruction::new(Opcode::Callback, 1, 0, None));
        program.push(Instruction::simple(Opcode::Halt));
        let mut engine = Engine::new(&program, &btree, 0);
        engine.bind(0, Mem::Int(42)).unwrap();
        let rows = engine.run().unwrap();
        assert_eq!(rows, vec![vec![Mem::Int(42)]]);
    }

    #[test]
    fn bind_rejects_an_out_of_range_cell() {
        let btree = fresh_btree();
        let mut program = Program::new();
        program.mem_cells = 1;
        program.push(Instruction::simple(Opcode::Halt));
        let mut engine = Engine::new(&program, &btree, 0);
        assert!(engine.bind(5, Mem::Int(1)).is_err());
    }

    #[test]
    fn like_is_case_insensitive() {
        assert!(sql_like("Hello", "h_l%"));
        assert!(!sql_like("world", "h_l%"));
    }

    #[test]
    fn glob_is_case_sensitive() {
        assert!(file_glob("abc", "a?c"));
        assert!(!file_glob("ABC", "a?c"));
    }
}
