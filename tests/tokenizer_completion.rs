//! §8 scenario 6: the completion detector distinguishes a terminated
//! statement, a trigger body that keeps swallowing semicolons until its
//! own `END;`, and an unterminated string literal that never completes.

use wrensql::parser::completion::is_complete;

#[test]
fn plain_statement_completes_at_its_semicolon() {
    assert!(is_complete(b"SELECT 1;"));
    assert!(!is_complete(b"SELECT 1"));
}

#[test]
fn trigger_body_swallows_inner_semicolons_until_end() {
    let partial = b"CREATE TRIGGER t BEFORE INSERT ON x BEGIN INSERT INTO y VALUES(1);";
    assert!(!is_complete(partial));
    let full = b"CREATE TRIGGER t BEFORE INSERT ON x BEGIN INSERT INTO y VALUES(1); END;";
    assert!(is_complete(full));
}

#[test]
fn unterminated_string_literal_never_completes() {
    assert!(!is_complete(b"SELECT 'unterminated"));
    assert!(!is_complete(b"SELECT 'unterminated;"));
}
