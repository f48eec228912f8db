//! Expression code generation (§4.6): two preorder passes over each
//! expression tree. The first assigns cursor numbers to `IN (SELECT ...)`
//! terms so the cursor table is sized before name resolution runs; since
//! this crate doesn't model subqueries (out of scope, §1), that pass is a
//! no-op here and kept only so the two-pass shape matches the design.
//! The second pass resolves column references against the FROM-list and
//! lowers operators to opcodes.

use crate::error::{Error, Result};
use crate::parser::ast::{BinaryOp, Expr, UnaryOp};
use crate::vdbe::bytecode::{Instruction, Opcode, Program};

/// Maps a column name to its zero-based position in a single-table
/// FROM-list (multi-table joins are out of scope, §1).
pub struct Scope<'a> {
    pub columns: &'a [String],
    pub cursor: i32,
}

impl<'a> Scope<'a> {
    fn resolve(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::sql(format!("no such column: {name}")))
    }
}

/// First pass (§4.6): walks the tree purely to discover `IN (...)` terms
/// that would need a dedicated cursor. No-op here; see module doc.
pub fn assign_subquery_cursors(_expr: &Expr) {}

/// Second pass: emits opcodes that leave the expression's value on top of
/// the stack.
pub fn emit_expr(program: &mut Program, scope: &Scope, expr: &Expr) -> Result<()> {
    match expr {
        Expr::Column(col) => {
            let idx = scope.resolve(&col.column)?;
            program.push(Instruction::new(Opcode::Column, scope.cursor, idx as i32, None));
        }
        Expr::IntLiteral(i) => {
            program.push(Instruction::new(Opcode::Integer, *i as i32, 0, None));
        }
        Expr::RealLiteral(r) => {
            program.push(Instruction::new(Opcode::String, 0, 0, Some(&r.to_string())));
        }
        Expr::StrLiteral(s) => {
            program.push(Instruction::new(Opcode::String, 0, 0, Some(s)));
        }
        Expr::BlobLiteral(b) => {
            let hex: String = b.iter().map(|b| format!("{b:02x}")).collect();
            program.push(Instruction::new(Opcode::String, 0, 0, Some(&hex)));
        }
        Expr::Null => {
            program.push(Instruction::simple(Opcode::Null));
        }
        Expr::Unary(op, inner) => {
            emit_expr(program, scope, inner)?;
            let opcode = match op {
                UnaryOp::Negate => Opcode::Negative,
                UnaryOp::Not => Opcode::Not,
                UnaryOp::IsNull => Opcode::IsNull,
                UnaryOp::NotNull => Opcode::NotNull,
            };
            program.push(Instruction::simple(opcode));
        }
        Expr::Binary(op, lhs, rhs) => {
            emit_expr(program, scope, lhs)?;
            emit_expr(program, scope, rhs)?;
            let opcode = match op {
                BinaryOp::Add => Opcode::Add,
                BinaryOp::Subtract => Opcode::Subtract,
                BinaryOp::Multiply => Opcode::Multiply,
                BinaryOp::Divide => Opcode::Divide,
                BinaryOp::And => Opcode::And,
                BinaryOp::Or => Opcode::Or,
                BinaryOp::Eq => Opcode::Eq,
                BinaryOp::Ne => Opcode::Ne,
                BinaryOp::Lt => Opcode::Lt,
                BinaryOp::Le => Opcode::Le,
                BinaryOp::Gt => Opcode::Gt,
                BinaryOp::Ge => Opcode::Ge,
                BinaryOp::Concat => Opcode::Concat,
                BinaryOp::Like => Opcode::Like,
                BinaryOp::Glob => Opcode::Glob,
            };
            // Eq/Ne/.../Ge are branch opcodes in the VM's native form
            // (pop two, jump on truth); as a value-producing expression
            // they instead push a boolean, so comparisons get a small
            // Eq-jump-else-push-0 shim here via two instructions.
            if matches!(
                op,
                BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
            ) {
                emit_boolean_compare(program, opcode);
            } else {
                program.push(Instruction::simple(opcode));
            }
        }
        Expr::In(lhs, list) => {
            // Build the set once per evaluation (no caching across rows
            // in this simplified generator), then probe it the same way
            // a comparison opcode turns a jump into a 0/1 value.
            let set_id = program.instructions.len() as i32;
            for item in list {
                emit_expr(program, scope, item)?;
                program.push(Instruction::new(Opcode::SetInsert, set_id, 0, None));
            }
            emit_expr(program, scope, lhs)?;
            let branch_at = program.push(Instruction::new(Opcode::SetFound, set_id, 0, None));
            program.push(Instruction::new(Opcode::Integer, 0, 0, None));
            let goto_at = program.push(Instruction::new(Opcode::Goto, 0, 0, None));
            let true_at = program.push(Instruction::new(Opcode::Integer, 1, 0, None));
            let end_at = program.instructions.len();
            program.instructions[branch_at].p2 = true_at as i32;
            program.instructions[goto_at].p2 = end_at as i32;
        }
        Expr::Call(name, args) => {
            emit_call(program, scope, name, args)?;
        }
    }
    Ok(())
}

/// Rewrites a comparison opcode (which natively jumps) into one that
/// pushes `Int(1)`/`Int(0)` by branching around a pair of pushes.
fn emit_boolean_compare(program: &mut Program, opcode: Opcode) {
    let branch_at = program.push(Instruction::new(opcode, 0, 0, None));
    program.push(Instruction::new(Opcode::Integer, 0, 0, None));
    let goto_at = program.push(Instruction::new(Opcode::Goto, 0, 0, None));
    let true_at = program.push(Instruction::new(Opcode::Integer, 1, 0, None));
    let end_at = program.instructions.len();
    program.instructions[branch_at].p2 = true_at as i32;
    program.instructions[goto_at].p2 = end_at as i32;
}

/// Scalar/aggregate function dispatch via a small static table (§4.6).
/// Aggregate functions outside an aggregate context (no open `AggFocus`
/// bucket) are rejected by the caller, which only reaches this path for
/// plain scalar expressions (INSERT/UPDATE value lists and WHERE
/// filters); aggregate codegen lives in the SELECT path, out of scope.
fn emit_call(program: &mut Program, scope: &Scope, name: &str, args: &[Expr]) -> Result<()> {
    match name.to_ascii_lowercase().as_str() {
        "length" => {
            if args.len() != 1 {
                return Err(Error::sql("length() takes exactly one argument"));
            }
            emit_expr(program, scope, &args[0])?;
            program.push(Instruction::simple(Opcode::Strlen));
        }
        "substr" => {
            if args.len() != 3 {
                return Err(Error::sql("substr() takes exactly three arguments"));
            }
            for a in args {
                emit_expr(program, scope, a)?;
            }
            program.push(Instruction::simple(Opcode::Substr));
        }
        "count" | "sum" | "avg" | "min" | "max" => {
            Err(Error::sql(format!("{name}() is an aggregate function and is not valid here")))?
        }
        other => return Err(Error::sql(format!("no such function: {other}"))),
    }
    Ok(())
}
