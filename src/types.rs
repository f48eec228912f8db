//! Core type aliases shared across storage, VM, and code generator.

/// A page identifier. Page 1 is reserved for the database header.
pub type Pgno = u32;

/// The integer primary key of a table row, stored big-endian in B-tree
/// keys so lexicographic and numeric order coincide.
pub type RowId = i64;

/// Text/blob encoding tag carried alongside `Value::Str`. The engine does
/// not transcode; it only compares and formats under one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
}
