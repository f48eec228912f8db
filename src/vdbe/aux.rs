//! Record and key encoding (§6 "Record format" / "Index key format",
//! §4.5 MakeRecord/MakeKey/MakeIdxKey).

use crate::vdbe::mem::Mem;

/// Builds a row payload: a header of 16-bit field-offset words (one per
/// column, giving the start of that column's bytes relative to the
/// payload start) followed by the concatenated column bytes. A NULL
/// column occupies zero bytes, detectable because its offset word equals
/// the next column's offset word (or the payload end, for the last
/// column).
pub fn make_record(values: &[Mem]) -> Vec<u8> {
    let header_len = values.len() * 2;
    let mut bodies: Vec<Vec<u8>> = Vec::with_capacity(values.len());
    for v in values {
        bodies.push(match v {
            Mem::Null => Vec::new(),
            other => other.to_blob(),
        });
    }
    let mut out = vec![0u8; header_len];
    let mut offset = header_len as u16;
    for (i, body) in bodies.iter().enumerate() {
        out[i * 2..i * 2 + 2].copy_from_slice(&offset.to_le_bytes());
        offset += body.len() as u16;
    }
    for body in &bodies {
        out.extend_from_slice(body);
    }
    out
}

/// The reverse of `make_record`: splits a row payload back into raw
/// per-column byte slices (still tagged NULL vs present; typing a blob
/// back into a `Mem` is a `Column` opcode's job, which knows the declared
/// affinity).
pub fn split_record(payload: &[u8], column_count: usize) -> Option<Vec<&[u8]>> {
    let header_len = column_count * 2;
    if payload.len() < header_len {
        return None;
    }
    let mut offsets = Vec::with_capacity(column_count + 1);
    for i in 0..column_count {
        let off = u16::from_le_bytes([payload[i * 2], payload[i * 2 + 1]]) as usize;
        offsets.push(off);
    }
    offsets.push(payload.len());
    let mut out = Vec::with_capacity(column_count);
    for i in 0..column_count {
        let (start, end) = (offsets[i], offsets[i + 1]);
        if start > payload.len() || end > payload.len() || start > end {
            return None;
        }
        out.push(&payload[start..end]);
    }
    Some(out)
}

/// Concatenates field bytes with a single NUL separator, used for
/// non-index composite keys (§4.2 "Key ordering").
///
/// A lone integer value is the common case (a table's rowid key) and gets
/// the fixed 4-byte big-endian encoding §4.2 specifies for rowid keys,
/// matching `btree::rowid_key` and `OP_Recno`'s decode of it, rather than
/// the decimal-text bytes `Mem::to_blob` would otherwise produce.
pub fn make_key(values: &[Mem]) -> Vec<u8> {
    if let [Mem::Int(i)] = values {
        return (*i as u32).to_be_bytes().to_vec();
    }
    let mut out = Vec::new();
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.push(0);
        }
        out.extend_from_slice(&v.to_blob());
    }
    out
}

/// An index key: `make_key` fields followed by a 4-byte big-endian rowid
/// suffix, so entries with equal field values still sort by rowid and
/// every index entry maps back to exactly one table row.
pub fn make_idx_key(values: &[Mem], rowid: u32) -> Vec<u8> {
    let mut out = make_key(values);
    out.extend_from_slice(&rowid.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_mixed_columns_with_null() {
        let values = vec![Mem::Int(7), Mem::Null, Mem::Str("hi".into())];
        let record = make_record(&values);
        let fields = split_record(&record, 3).unwrap();
        assert_eq!(fields[0], b"7");
        assert_eq!(fields[1], b"");
        assert_eq!(fields[2], b"hi");
    }

    #[test]
    fn null_offset_equals_following_offset() {
        let values = vec![Mem::Null, Mem::Int(1)];
        let record = make_record(&values);
        let off0 = u16::from_le_bytes([record[0], record[1]]);
        let off1 = u16::from_le_bytes([record[2], record[3]]);
        assert_eq!(off0, off1);
    }

    #[test]
    fn idx_key_appends_big_endian_rowid() {
        let key = make_idx_key(&[Mem::Int(1)], 0x01020304);
        assert_eq!(&key[key.len() - 4..], &[0x01, 0x02, 0x03, 0x04]);
    }
}
