//! Opcode tracing sink (§4.5): a domain-specific diagnostic channel,
//! separate from ambient `log` output. Enabled per-VM instance rather
//! than globally, since a trace is usually wanted for one misbehaving
//! program, not the whole process.

use crate::vdbe::bytecode::Instruction;
use crate::vdbe::mem::Mem;

pub trait Tracer {
    fn trace(&mut self, pc: usize, instr: &Instruction, stack: &[Mem]);
}

/// Writes one line per opcode to stderr: `pc  opcode p1 p2 p3`, with a
/// pretty-printed stack summary appended in debug builds.
pub struct StderrTracer;

impl Tracer for StderrTracer {
    fn trace(&mut self, pc: usize, instr: &Instruction, stack: &[Mem]) {
        eprint!("{pc:04}  {:?} {} {}", instr.op, instr.p1, instr.p2);
        if let Some(p3) = &instr.p3 {
            eprint!(" {p3:?}");
        }
        if cfg!(debug_assertions) {
            eprint!("    stack={stack:?}");
        }
        eprintln!();
    }
}

/// Accumulates trace lines in memory instead of printing them, for tests
/// that want to assert on the exact opcode sequence a program executed.
#[derive(Default)]
pub struct RecordingTracer {
    pub lines: Vec<String>,
}

impl Tracer for RecordingTracer {
    fn trace(&mut self, pc: usize, instr: &Instruction, _stack: &[Mem]) {
        self.lines.push(format!("{pc:04} {:?} {} {}", instr.op, instr.p1, instr.p2));
    }
}
