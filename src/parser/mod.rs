//! Query compiler front-end glue (§4.3, §4.6): the tokenizer, the
//! statement-completion detector, the AST shapes `codegen` consumes, and a
//! small recognizer that builds those AST nodes for the handful of
//! statement shapes the embedding boundary accepts directly. The LEMON
//! grammar that would turn arbitrary SQL text into these AST nodes is an
//! external collaborator and is not modeled here (§1).

pub mod ast;
pub mod completion;
pub mod recognizer;
pub mod tokenizer;
