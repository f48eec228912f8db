//! `wrensql`: an embeddable relational database engine.
//!
//! SQL text is tokenized, compiled into a flat bytecode program, and run
//! by a stack-based virtual machine over a paged B-tree. The three layers
//! live in [`parser`]/[`codegen`] (front-end glue), [`vdbe`] (the bytecode
//! model and interpreter), and [`storage`] (the pager and B-tree). A thin
//! public surface over all of it lives in [`api`].
//!
//! The LEMON grammar that would turn arbitrary SQL text into the AST
//! shapes in [`parser::ast`] is an external collaborator and is not
//! implemented here; [`parser::recognizer`] covers the handful of
//! statement shapes [`api::Connection::prepare`] accepts directly.

pub mod api;
pub mod codegen;
pub mod error;
pub mod parser;
pub mod random;
pub mod schema;
pub mod storage;
pub mod types;
pub mod vdbe;

pub use api::{Config, Connection, Statement};
pub use error::{Error, Result};
