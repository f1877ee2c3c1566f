//! Fixed-capacity bit array over `u32` words.

use alloc::vec;
use alloc::vec::Vec;

const BITS: usize = u32::BITS as usize;

/// Per-word masks covering `[start, start + n)`.
fn word_masks(start: usize, n: usize) -> impl Iterator<Item = (usize, u32)> {
    let end = start + n;
    let mut i = start;
    core::iter::from_fn(move || {
        if i >= end {
            return None;
        }
        let bit = i % BITS;
        let take = (BITS - bit).min(end - i);
        let mask = if take == BITS {
            u32::MAX
        } else {
            ((1u32 << take) - 1) << bit
        };
        let word = i / BITS;
        i += take;
        Some((word, mask))
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitset {
    words: Vec<u32>,
    len: usize,
}

impl Bitset {
    /// `len` clear bits.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(BITS)],
            len,
        }
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    #[must_use]
    pub fn test(&self, i: usize) -> bool {
        debug_assert!(i < self.len, "bit {i} out of range");
        self.words[i / BITS] & (1 << (i % BITS)) != 0
    }

    pub fn set_range(&mut self, start: usize, n: usize) {
        debug_assert!(start + n <= self.len);
        for (w, m) in word_masks(start, n) {
            self.words[w] |= m;
        }
    }

    pub fn clear_range(&mut self, start: usize, n: usize) {
        debug_assert!(start + n <= self.len);
        for (w, m) in word_masks(start, n) {
            self.words[w] &= !m;
        }
    }

    #[must_use]
    pub fn is_range_set(&self, start: usize, n: usize) -> bool {
        debug_assert!(start + n <= self.len);
        word_masks(start, n).all(|(w, m)| self.words[w] & m == m)
    }

    #[must_use]
    pub fn is_range_clear(&self, start: usize, n: usize) -> bool {
        debug_assert!(start + n <= self.len);
        word_masks(start, n).all(|(w, m)| self.words[w] & m == 0)
    }

    /// Number of consecutive set bits starting at `start`.
    #[must_use]
    pub fn count_set_from(&self, start: usize) -> usize {
        (start..self.len).take_while(|&i| self.test(i)).count()
    }

    /// First index of `n` consecutive clear bits.
    ///
    /// Fully occupied and fully free words are skipped whole.
    #[must_use]
    pub fn find_clear_run(&self, n: usize) -> Option<usize> {
        if n == 0 || n > self.len {
            return None;
        }
        let mut run = 0;
        let mut start = 0;
        let mut i = 0;
        while i < self.len {
            let word = self.words[i / BITS];
            if i % BITS == 0 && i + BITS <= self.len && (word == 0 || word == u32::MAX) {
                if word == 0 {
                    if run == 0 {
                        start = i;
                    }
                    run += BITS;
                    if run >= n {
                        return Some(start);
                    }
                } else {
                    run = 0;
                }
                i += BITS;
                continue;
            }
            if word & (1 << (i % BITS)) == 0 {
                if run == 0 {
                    start = i;
                }
                run += 1;
                if run >= n {
                    return Some(start);
                }
            } else {
                run = 0;
            }
            i += 1;
        }
        None
    }

    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// `true` when no bit is set.
    #[must_use]
    pub fn none(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_across_word_boundaries() {
        let mut b = Bitset::new(100);
        b.set_range(30, 40);
        assert!(!b.test(29));
        assert!(b.test(30) && b.test(63) && b.test(64) && b.test(69));
        assert!(!b.test(70));
        assert!(b.is_range_set(30, 40));
        assert!(!b.is_range_set(29, 2));
        assert!(b.is_range_clear(70, 30));
        assert_eq!(b.count_ones(), 40);
        assert_eq!(b.count_set_from(60), 10);

        b.clear_range(32, 36);
        assert_eq!(b.count_ones(), 4);
        assert!(b.test(31) && b.test(68));
    }

    #[test]
    fn find_clear_run_first_fit() {
        let mut b = Bitset::new(80);
        assert_eq!(b.find_clear_run(80), Some(0));
        assert_eq!(b.find_clear_run(81), None);
        assert_eq!(b.find_clear_run(0), None);

        b.set_range(0, 3);
        b.set_range(5, 1);
        assert_eq!(b.find_clear_run(2), Some(3));
        assert_eq!(b.find_clear_run(3), Some(6));

        // a run spanning a fully clear word
        b.set_range(6, 26);
        assert_eq!(b.find_clear_run(40), Some(32));
        b.set_range(32, 32);
        assert_eq!(b.find_clear_run(16), Some(64));
        assert_eq!(b.find_clear_run(17), None);
    }

    #[test]
    fn tail_word_is_bounded_by_len() {
        let mut b = Bitset::new(33);
        b.set_range(0, 32);
        assert_eq!(b.find_clear_run(1), Some(32));
        assert_eq!(b.find_clear_run(2), None);
        b.clear_range(0, 33);
        assert!(b.none());
    }
}
