//! The VM value type and its coercion rules (§3.4, §4.4).
//!
//! The design spec's "storage discipline" tags (owned / static / ephemeral
//! / short) exist in the original to avoid allocator churn across a
//! manually-managed stack. Rust's ownership model gives us that for free:
//! a `Mem` either owns its bytes or it doesn't, and `Clone` is the "deep
//! copy owned storage" rule from §3.4 (Dup). There is no separate
//! ephemeral/static tag to track by hand.

use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
pub enum Mem {
    Null,
    Int(i64),
    Real(f64),
    Str(String),
    Blob(Vec<u8>),
}

impl Mem {
    pub fn type_name(&self) -> &'static str {
        match self {
            Mem::Null => "null",
            Mem::Int(_) => "integer",
            Mem::Real(_) => "real",
            Mem::Str(_) => "text",
            Mem::Blob(_) => "blob",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Mem::Null)
    }

    /// §4.4 "To integer": Int→self; Real→truncate; Str→parse, 0 on
    /// malformed; Null→0.
    pub fn to_int(&self) -> i64 {
        match self {
            Mem::Null => 0,
            Mem::Int(i) => *i,
            Mem::Real(r) => *r as i64,
            Mem::Str(s) => parse_numeric_prefix(s).map(|n| n.0).unwrap_or(0),
            Mem::Blob(b) => std::str::from_utf8(b)
                .ok()
                .and_then(|s| parse_numeric_prefix(s).map(|n| n.0))
                .unwrap_or(0),
        }
    }

    /// §4.4 "To real": same shape, 0.0 on malformed.
    pub fn to_real(&self) -> f64 {
        match self {
            Mem::Null => 0.0,
            Mem::Int(i) => *i as f64,
            Mem::Real(r) => *r,
            Mem::Str(s) => s.trim().parse::<f64>().unwrap_or(0.0),
            Mem::Blob(b) => std::str::from_utf8(b)
                .ok()
                .and_then(|s| s.trim().parse::<f64>().ok())
                .unwrap_or(0.0),
        }
    }

    /// §4.4 "To string": canonical decimal formatting; Null → "".
    pub fn to_text(&self) -> String {
        match self {
            Mem::Null => String::new(),
            Mem::Int(i) => i.to_string(),
            Mem::Real(r) => format_real(*r),
            Mem::Str(s) => s.clone(),
            Mem::Blob(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }

    pub fn to_blob(&self) -> Vec<u8> {
        match self {
            Mem::Blob(b) => b.clone(),
            other => other.to_text().into_bytes(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Mem::Null => false,
            Mem::Int(i) => *i != 0,
            Mem::Real(r) => *r != 0.0,
            Mem::Str(_) | Mem::Blob(_) => self.to_real() != 0.0,
        }
    }

    fn numeric_ok(&self) -> bool {
        match self {
            Mem::Int(_) | Mem::Real(_) => true,
            Mem::Str(s) => parse_numeric_prefix(s).map_or(false, |(_, exact)| exact),
            _ => false,
        }
    }

    /// §4.4 "Comparison": numeric compare if both coerce to pure numeric,
    /// else byte/string compare. `fold_case` implements the opcode flag
    /// for locale-insensitive text comparison.
    pub fn compare(&self, other: &Mem, fold_case: bool) -> Option<Ordering> {
        if self.is_null() || other.is_null() {
            return None;
        }
        if self.numeric_ok() && other.numeric_ok() {
            return self.to_real().partial_cmp(&other.to_real());
        }
        let (a, b) = (self.to_text(), other.to_text());
        if fold_case {
            Some(a.to_lowercase().cmp(&b.to_lowercase()))
        } else {
            Some(a.as_bytes().cmp(b.as_bytes()))
        }
    }
}

/// Parses a leading numeric literal (used by Str→Int/Real coercion). The
/// `bool` reports whether the *entire* trimmed string was consumed (used
/// to decide "is this a pure numeric" for comparison purposes).
fn parse_numeric_prefix(s: &str) -> Option<(i64, bool)> {
    let trimmed = s.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some((i, true));
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return Some((f as i64, true));
    }
    let mut end = 0;
    let bytes = trimmed.as_bytes();
    if end < bytes.len() && (bytes[end] == b'-' || bytes[end] == b'+') {
        end += 1;
    }
    let digit_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == digit_start {
        return None;
    }
    trimmed[..end].parse::<i64>().ok().map(|i| (i, false))
}

/// `%.15g`-style canonical real formatting: shortest representation that
/// round-trips, with a trailing `.0` for integral values so Int and Real
/// never look alike in text form.
fn format_real(r: f64) -> String {
    if r.is_nan() {
        return "NaN".to_string();
    }
    if r == r.trunc() && r.abs() < 1e15 {
        return format!("{:.1}", r);
    }
    let mut s = format!("{:.15e}", r);
    if let Ok(short) = format!("{}", r).parse::<f64>() {
        if short == r {
            s = format!("{}", r);
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_string_coerces_to_zero() {
        assert_eq!(Mem::Str("abc".into()).to_int(), 0);
        assert_eq!(Mem::Str("abc".into()).to_real(), 0.0);
    }

    #[test]
    fn numeric_strings_compare_numerically() {
        let a = Mem::Str("10".into());
        let b = Mem::Int(9);
        assert_eq!(a.compare(&b, false), Some(Ordering::Greater));
    }

    #[test]
    fn non_numeric_strings_compare_as_bytes() {
        let a = Mem::Str("b".into());
        let b = Mem::Str("a".into());
        assert_eq!(a.compare(&b, false), Some(Ordering::Greater));
    }

    #[test]
    fn null_comparison_is_always_none() {
        assert_eq!(Mem::Null.compare(&Mem::Int(0), false), None);
    }

    #[test]
    fn case_fold_flag_controls_text_comparison() {
        let a = Mem::Str("ABC".into());
        let b = Mem::Str("abc".into());
        assert_eq!(a.compare(&b, true), Some(Ordering::Equal));
        assert_ne!(a.compare(&b, false), Some(Ordering::Equal));
    }
}
