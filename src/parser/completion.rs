//! Statement-completion detector (§4.3): a 6-state machine layered over
//! the token stream, used by an embedder's line-reading loop to decide
//! whether to keep accumulating input or submit what it has.

use crate::parser::tokenizer::{next_token, Keyword, Operator, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Statement,
    AfterExplain,
    AfterCreate,
    TriggerBody,
    TriggerSemi,
}

/// Feeds `src` through the tokenizer and reports whether it forms one
/// complete, terminated statement. Whitespace and comments never cause a
/// state transition.
pub fn is_complete(src: &[u8]) -> bool {
    let mut state = State::Start;
    let mut off = 0;
    let mut saw_any = false;
    loop {
        let (kind, len) = next_token(src, off);
        if matches!(kind, TokenKind::Eof) {
            break;
        }
        if matches!(kind, TokenKind::Whitespace | TokenKind::LineComment | TokenKind::BlockComment) {
            off += len.max(1);
            continue;
        }
        saw_any = true;
        state = step(state, &kind);
        off += len.max(1);
    }
    saw_any && state == State::Start
}

fn step(state: State, kind: &TokenKind) -> State {
    use State::*;
    let semicolon = matches!(kind, TokenKind::Operator(Operator::Semicolon));
    match state {
        Start => {
            if semicolon {
                Start
            } else if matches!(kind, TokenKind::Keyword(Keyword::Explain)) {
                AfterExplain
            } else if matches!(kind, TokenKind::Keyword(Keyword::Create)) {
                AfterCreate
            } else {
                Statement
            }
        }
        AfterExplain => {
            if matches!(kind, TokenKind::Keyword(Keyword::Create)) {
                AfterCreate
            } else {
                Statement
            }
        }
        AfterCreate => {
            if matches!(kind, TokenKind::Keyword(Keyword::Trigger)) {
                TriggerBody
            } else {
                Statement
            }
        }
        Statement => {
            if semicolon {
                Start
            } else {
                Statement
            }
        }
        TriggerBody => {
            if matches!(kind, TokenKind::Keyword(Keyword::End)) {
                TriggerSemi
            } else {
                TriggerBody
            }
        }
        TriggerSemi => {
            if semicolon {
                Start
            } else if matches!(kind, TokenKind::Keyword(Keyword::End)) {
                TriggerSemi
            } else {
                TriggerBody
            }
        }
    }
}

/// The simpler, non-trigger-aware variant (§4.3: "optional at build
/// time"): a complete statement is any buffer containing an unquoted
/// top-level semicolon. Quoting/bracketing is handled by the tokenizer
/// itself, so this just checks for a trailing, non-whitespace-only
/// semicolon-terminated token stream.
pub fn is_complete_simple(src: &[u8]) -> bool {
    let mut off = 0;
    let mut saw_semicolon = false;
    loop {
        let (kind, len) = next_token(src, off);
        if matches!(kind, TokenKind::Eof) {
            break;
        }
        if matches!(kind, TokenKind::Whitespace | TokenKind::LineComment | TokenKind::BlockComment) {
            off += len.max(1);
            continue;
        }
        saw_semicolon = matches!(kind, TokenKind::Operator(Operator::Semicolon));
        off += len.max(1);
    }
    saw_semicolon
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinary_statement_needs_semicolon() {
        assert!(!is_complete(b"select * from t"));
        assert!(is_complete(b"select * from t;"));
    }

    #[test]
    fn create_table_is_ordinary() {
        assert!(is_complete(b"create table t (a, b);"));
    }

    #[test]
    fn trigger_body_needs_end_semicolon() {
        let partial = b"create trigger t before insert on t begin select 1;";
        assert!(!is_complete(partial));
        let full = b"create trigger t before insert on t begin select 1; end;";
        assert!(is_complete(full));
    }

    #[test]
    fn whitespace_and_comments_do_not_count() {
        assert!(!is_complete(b"  -- just a comment\n  "));
    }

    #[test]
    fn simple_detector_only_checks_trailing_semicolon() {
        assert!(is_complete_simple(b"select 1;"));
        assert!(!is_complete_simple(b"select 1"));
    }
}
