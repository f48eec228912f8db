//! Code generation (§4.6): lowers a handful of statement ASTs into a
//! `vdbe::Program`. Each statement kind gets its own module mirroring the
//! design's per-statement generator functions; `expr` holds the shared
//! expression lowering both depend on.

pub mod expr;
pub mod insert;
pub mod update;
