//! The sorter (§3.6, §4.5 "Merge-sort"): an accumulator of `(key, data)`
//! pairs distributed into power-of-two-length run bins as they arrive,
//! merged pairwise into one sorted list on finalization.
//!
//! Records are collected in insertion order into bin 0; a bin that
//! already holds a run merges with the incoming run and the result moves
//! up to the next bin, cascading exactly like a binary counter increment.
//! This keeps any partial merge to at most O(log n) runs alive at once
//! instead of one O(n log n) sort at the end, at the cost of re-merging
//! nothing at `Sort` time beyond a final pairwise reduction.

use crate::vdbe::types::SORT_BIN_COUNT;

pub struct Sorter {
    bins: Vec<Option<Vec<(Vec<u8>, Vec<u8>)>>>,
    sorted: Option<Vec<(Vec<u8>, Vec<u8>)>>,
    cursor: usize,
}

impl Sorter {
    pub fn new() -> Self {
        Self { bins: (0..SORT_BIN_COUNT).map(|_| None).collect(), sorted: None, cursor: 0 }
    }

    pub fn put(&mut self, key: Vec<u8>, data: Vec<u8>) {
        self.sorted = None;
        let mut run = vec![(key, data)];
        for bin in self.bins.iter_mut() {
            match bin.take() {
                None => {
                    *bin = Some(run);
                    return;
                }
                Some(existing) => {
                    run = merge(existing, run);
                }
            }
        }
        // Ran out of bins (pathological run count); keep growing the last.
        self.bins[SORT_BIN_COUNT - 1] = Some(run);
    }

    /// Merge every non-empty bin into one sorted list. A higher bin index
    /// holds a larger run built from strictly earlier `put` calls than any
    /// lower bin's run (the same carry-chronology a binary counter gives
    /// its bits), so folding from the highest surviving bin down keeps the
    /// running merge's `a` operand always the older run — `merge`'s
    /// tie rule (`x.0 <= y.0` prefers `a`) then reproduces insertion order
    /// on equal keys across bin boundaries, not just within one bin.
    pub fn finalize(&mut self) {
        let mut merged: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        let mut started = false;
        for bin in self.bins.iter_mut().rev() {
            if let Some(run) = bin.take() {
                merged = if started { merge(merged, run) } else { run };
                started = true;
            }
        }
        self.sorted = Some(merged);
        self.cursor = 0;
    }

    pub fn next(&mut self) -> Option<&(Vec<u8>, Vec<u8>)> {
        let sorted = self.sorted.as_ref()?;
        let item = sorted.get(self.cursor);
        if item.is_some() {
            self.cursor += 1;
        }
        item
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for Sorter {
    fn default() -> Self {
        Self::new()
    }
}

/// Stable merge by key, comparing as raw bytes (the domain-aware
/// collation of §4.4 is applied earlier, when `SortMakeKey` builds the
/// key bytes; by the time records reach the sorter, byte order already
/// reflects the right collation).
fn merge(
    a: Vec<(Vec<u8>, Vec<u8>)>,
    b: Vec<(Vec<u8>, Vec<u8>)>,
) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut ai, mut bi) = (a.into_iter().peekable(), b.into_iter().peekable());
    loop {
        match (ai.peek(), bi.peek()) {
            (Some(x), Some(y)) => {
                if x.0 <= y.0 {
                    out.push(ai.next().unwrap());
                } else {
                    out.push(bi.next().unwrap());
                }
            }
            (Some(_), None) => out.push(ai.next().unwrap()),
            (None, Some(_)) => out.push(bi.next().unwrap()),
            (None, None) => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_by_key_ascending() {
        let mut s = Sorter::new();
        for (k, d) in [(3, "c"), (1, "a"), (2, "b")] {
            s.put(vec![k], d.as_bytes().to_vec());
        }
        s.finalize();
        let mut out = Vec::new();
        while let Some((k, d)) = s.next() {
            out.push((k.clone(), d.clone()));
        }
        assert_eq!(out, vec![(vec![1], b"a".to_vec()), (vec![2], b"b".to_vec()), (vec![3], b"c".to_vec())]);
    }

    #[test]
    fn stable_on_duplicate_keys() {
        let mut s = Sorter::new();
        s.put(vec![1], b"first".to_vec());
        s.put(vec![1], b"second".to_vec());
        s.finalize();
        let mut out = Vec::new();
        while let Some((_, d)) = s.next() {
            out.push(d.clone());
        }
        assert_eq!(out, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    /// Three equal-key puts cascade r1+r2 into bin1 on the second put,
    /// leaving r3 alone in bin0; `finalize` must still come back in
    /// insertion order instead of stopping at within-bin stability.
    #[test]
    fn stable_on_duplicate_keys_across_bin_boundary() {
        let mut s = Sorter::new();
        s.put(vec![1], b"r1".to_vec());
        s.put(vec![1], b"r2".to_vec());
        s.put(vec![1], b"r3".to_vec());
        s.finalize();
        let mut out = Vec::new();
        while let Some((_, d)) = s.next() {
            out.push(d.clone());
        }
        assert_eq!(out, vec![b"r1".to_vec(), b"r2".to_vec(), b"r3".to_vec()]);
    }

    #[test]
    fn reset_clears_prior_runs() {
        let mut s = Sorter::new();
        s.put(vec![5], vec![]);
        s.finalize();
        s.reset();
        s.finalize();
        assert!(s.next().is_none());
    }
}
