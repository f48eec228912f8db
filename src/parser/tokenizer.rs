//! Byte-level tokenizer (§4.3): a hand-rolled scanner that classifies the
//! bytes at a given offset into a `(kind, length)` pair without needing
//! any state from prior calls, so a caller can restart it at any byte
//! offset (used by the completion detector to re-scan a growing buffer).

use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Whitespace,
    LineComment,
    BlockComment,
    Identifier,
    Keyword(Keyword),
    Integer,
    Real,
    String,
    BracketedIdentifier,
    Blob,
    NumberedParam,
    NamedParam,
    Operator(Operator),
    Illegal,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Create,
    Table,
    Index,
    Select,
    From,
    Where,
    Insert,
    Into,
    Values,
    Update,
    Set,
    Delete,
    Begin,
    Commit,
    Rollback,
    Trigger,
    End,
    Explain,
    Glob,
    Like,
    In,
    Is,
    Null,
    Not,
    And,
    Or,
    Case,
    When,
    Then,
    Else,
    As,
    Asc,
    Desc,
    Order,
    By,
    Group,
    Having,
    Limit,
    Offset,
    Join,
    On,
    Using,
    Primary,
    Key,
    Unique,
    Default,
    Collate,
    Integer,
    Real,
    Text,
    Blob,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Comma,
    Semicolon,
    Dot,
    Eq,
    EqEq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Shl,
    Shr,
    Concat,
    BitAnd,
    BitOr,
    BitNot,
}

fn keyword_table() -> &'static HashMap<&'static str, Keyword> {
    static TABLE: OnceLock<HashMap<&'static str, Keyword>> = OnceLock::new();
    TABLE.get_or_init(|| {
        use Keyword::*;
        [
            ("create", Create),
            ("table", Table),
            ("index", Index),
            ("select", Select),
            ("from", From),
            ("where", Where),
            ("insert", Insert),
            ("into", Into),
            ("values", Values),
            ("update", Update),
            ("set", Set),
            ("delete", Delete),
            ("begin", Begin),
            ("commit", Commit),
            ("rollback", Rollback),
            ("trigger", Trigger),
            ("end", End),
            ("explain", Explain),
            ("glob", Glob),
            ("like", Like),
            ("in", In),
            ("is", Is),
            ("null", Null),
            ("not", Not),
            ("and", And),
            ("or", Or),
            ("case", Case),
            ("when", When),
            ("then", Then),
            ("else", Else),
            ("as", As),
            ("asc", Asc),
            ("desc", Desc),
            ("order", Order),
            ("by", By),
            ("group", Group),
            ("having", Having),
            ("limit", Limit),
            ("offset", Offset),
            ("join", Join),
            ("on", On),
            ("using", Using),
            ("primary", Primary),
            ("key", Key),
            ("unique", Unique),
            ("default", Default),
            ("collate", Collate),
            ("integer", Integer),
            ("real", Real),
            ("text", Text),
            ("blob", Blob),
        ]
        .into_iter()
        .collect()
    })
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$' || b & 0x80 != 0
}

fn is_ident_cont(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit()
}

/// Classify the token beginning at `src[offset..]`. Returns
/// `(kind, length)`; `length` is always >= 1 unless `offset >= src.len()`,
/// in which case `(Eof, 0)` is returned.
pub fn next_token(src: &[u8], offset: usize) -> (TokenKind, usize) {
    if offset >= src.len() {
        return (TokenKind::Eof, 0);
    }
    let rest = &src[offset..];
    let b0 = rest[0];

    if b0 == b' ' || b0 == b'\t' || b0 == b'\r' || b0 == b'\n' {
        let mut n = 1;
        while n < rest.len() && matches!(rest[n], b' ' | b'\t' | b'\r' | b'\n') {
            n += 1;
        }
        return (TokenKind::Whitespace, n);
    }

    if b0 == b'-' && rest.get(1) == Some(&b'-') {
        let n = rest.iter().position(|&b| b == b'\n').map(|p| p + 1).unwrap_or(rest.len());
        return (TokenKind::LineComment, n);
    }
    if b0 == b'/' && rest.get(1) == Some(&b'*') {
        let mut n = 2;
        while n + 1 < rest.len() {
            if rest[n] == b'*' && rest[n + 1] == b'/' {
                return (TokenKind::BlockComment, n + 2);
            }
            n += 1;
        }
        return (TokenKind::BlockComment, rest.len());
    }

    if b0 == b'\'' || b0 == b'"' || b0 == b'`' {
        return (TokenKind::String, scan_quoted(rest, b0));
    }

    if b0 == b'[' {
        let n = rest.iter().position(|&b| b == b']').map(|p| p + 1).unwrap_or(rest.len());
        return (TokenKind::BracketedIdentifier, n);
    }

    if (b0 == b'x' || b0 == b'X') && rest.get(1) == Some(&b'\'') {
        let body_len = scan_quoted(&rest[1..], b'\'');
        return (TokenKind::Blob, 1 + body_len);
    }

    if b0.is_ascii_digit() || (b0 == b'.' && rest.get(1).map_or(false, u8::is_ascii_digit)) {
        return scan_number(rest);
    }

    if b0 == b'?' {
        let mut n = 1;
        while n < rest.len() && rest[n].is_ascii_digit() {
            n += 1;
        }
        return (TokenKind::NumberedParam, n);
    }
    if b0 == b':' || b0 == b'@' || b0 == b'$' {
        let mut n = 1;
        while n < rest.len() && is_ident_cont(rest[n]) {
            n += 1;
        }
        if n == 1 {
            return (TokenKind::Illegal, 1);
        }
        return (TokenKind::NamedParam, n);
    }

    if is_ident_start(b0) {
        let mut n = 1;
        while n < rest.len() && is_ident_cont(rest[n]) {
            n += 1;
        }
        let word = String::from_utf8_lossy(&rest[..n]).to_ascii_lowercase();
        if let Some(&kw) = keyword_table().get(word.as_str()) {
            return (TokenKind::Keyword(kw), n);
        }
        return (TokenKind::Identifier, n);
    }

    scan_operator(rest)
}

fn scan_quoted(rest: &[u8], quote: u8) -> usize {
    let mut n = 1;
    while n < rest.len() {
        if rest[n] == quote {
            if rest.get(n + 1) == Some(&quote) {
                n += 2;
                continue;
            }
            return n + 1;
        }
        n += 1;
    }
    n
}

fn scan_number(rest: &[u8]) -> (TokenKind, usize) {
    let mut n = 0;
    let mut is_real = false;
    while n < rest.len() && rest[n].is_ascii_digit() {
        n += 1;
    }
    if rest.get(n) == Some(&b'.') {
        is_real = true;
        n += 1;
        while n < rest.len() && rest[n].is_ascii_digit() {
            n += 1;
        }
    }
    if matches!(rest.get(n), Some(&b'e') | Some(&b'E')) {
        let mut m = n + 1;
        if matches!(rest.get(m), Some(&b'+') | Some(&b'-')) {
            m += 1;
        }
        if rest.get(m).map_or(false, u8::is_ascii_digit) {
            is_real = true;
            n = m;
            while n < rest.len() && rest[n].is_ascii_digit() {
                n += 1;
            }
        }
    }
    (if is_real { TokenKind::Real } else { TokenKind::Integer }, n)
}

fn scan_operator(rest: &[u8]) -> (TokenKind, usize) {
    use Operator::*;
    let two = rest.get(1).copied();
    let (op, len) = match (rest[0], two) {
        (b'<', Some(b'=')) => (Le, 2),
        (b'<', Some(b'>')) => (Ne, 2),
        (b'<', Some(b'<')) => (Shl, 2),
        (b'>', Some(b'=')) => (Ge, 2),
        (b'>', Some(b'>')) => (Shr, 2),
        (b'|', Some(b'|')) => (Concat, 2),
        (b'=', Some(b'=')) => (EqEq, 2),
        (b'!', Some(b'=')) => (Ne, 2),
        (b'!', _) => return (TokenKind::Illegal, 1),
        (b'+', _) => (Plus, 1),
        (b'-', _) => (Minus, 1),
        (b'*', _) => (Star, 1),
        (b'/', _) => (Slash, 1),
        (b'%', _) => (Percent, 1),
        (b'(', _) => (LParen, 1),
        (b')', _) => (RParen, 1),
        (b',', _) => (Comma, 1),
        (b';', _) => (Semicolon, 1),
        (b'.', _) => (Dot, 1),
        (b'=', _) => (Eq, 1),
        (b'<', _) => (Lt, 1),
        (b'>', _) => (Gt, 1),
        (b'&', _) => (BitAnd, 1),
        (b'|', _) => (BitOr, 1),
        (b'~', _) => (BitNot, 1),
        _ => return (TokenKind::Illegal, 1),
    };
    (TokenKind::Operator(op), len)
}

/// Tokenize the whole buffer, dropping whitespace and comments, returning
/// each surviving token's kind and its slice of `src`.
pub fn tokenize(src: &[u8]) -> Vec<(TokenKind, &[u8])> {
    let mut out = Vec::new();
    let mut off = 0;
    loop {
        let (kind, len) = next_token(src, off);
        if matches!(kind, TokenKind::Eof) {
            break;
        }
        if !matches!(kind, TokenKind::Whitespace | TokenKind::LineComment | TokenKind::BlockComment) {
            out.push((kind, &src[off..off + len]));
        }
        off += len.max(1);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_keywords_case_insensitively() {
        let toks = tokenize(b"SELECT * from Foo");
        assert_eq!(toks[0].0, TokenKind::Keyword(Keyword::Select));
        assert_eq!(toks[3].0, TokenKind::Keyword(Keyword::From));
        assert_eq!(toks[4].0, TokenKind::Identifier);
    }

    #[test]
    fn multi_byte_operators_are_single_tokens() {
        let toks = tokenize(b"a <= b <> c == d != e");
        let ops: Vec<_> = toks
            .iter()
            .filter_map(|(k, _)| if let TokenKind::Operator(o) = k { Some(*o) } else { None })
            .collect();
        assert_eq!(ops, vec![Operator::Le, Operator::Ne, Operator::EqEq, Operator::Ne]);
    }

    #[test]
    fn bang_without_equals_is_illegal() {
        let (kind, len) = next_token(b"!x", 0);
        assert_eq!(kind, TokenKind::Illegal);
        assert_eq!(len, 1);
    }

    #[test]
    fn doubled_quote_escapes_inside_strings() {
        let (kind, len) = next_token(b"'it''s'  ", 0);
        assert_eq!(kind, TokenKind::String);
        assert_eq!(len, 7);
    }

    #[test]
    fn utf8_identifiers_pass_through() {
        let src = "caf\u{e9}_table".as_bytes();
        let (kind, len) = next_token(src, 0);
        assert_eq!(kind, TokenKind::Identifier);
        assert_eq!(len, src.len());
    }

    #[test]
    fn numbered_and_named_params() {
        assert_eq!(next_token(b"?12", 0), (TokenKind::NumberedParam, 3));
        assert_eq!(next_token(b":name", 0), (TokenKind::NamedParam, 5));
        assert_eq!(next_token(b"@p1", 0), (TokenKind::NamedParam, 3));
    }

    #[test]
    fn is_restartable_at_any_offset() {
        let src = b"SELECT a FROM b";
        let whole = tokenize(src);
        let mid = whole[2].1.as_ptr() as usize - src.as_ptr() as usize;
        let (kind, _) = next_token(src, mid);
        assert_eq!(kind, TokenKind::Keyword(Keyword::From));
    }
}
