/**
 * A fixed-size bit set indexed by block (or function) number.
 **/
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub(crate) struct BitVector {
    words: Vec<u64>,
    len: usize,
}

const WORD_BITS: usize = u64::BITS as usize;

impl BitVector {
    pub(crate) fn new(len: usize) -> BitVector {
        Self {
            words: vec![0; (len + WORD_BITS - 1) / WORD_BITS],
            len,
        }
    }

    pub(crate) fn full(len: usize) -> BitVector {
        let mut r = Self::new(len);
        r.words.iter_mut().for_each(|w| *w = u64::MAX);
        r.clear_tail();
        r
    }

    pub(crate) fn singleton(len: usize, bit: usize) -> BitVector {
        let mut r = Self::new(len);
        r.insert(bit);
        r
    }

    fn clear_tail(&mut self) {
        let rem = self.len % WORD_BITS;
        if rem != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << rem) - 1;
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn insert(&mut self, bit: usize) -> bool {
        debug_assert!(bit < self.len);
        let (w, mask) = (bit / WORD_BITS, 1u64 << (bit % WORD_BITS));
        let changed = self.words[w] & mask == 0;
        self.words[w] |= mask;
        changed
    }

    pub(crate) fn contains(&self, bit: usize) -> bool {
        bit < self.len && self.words[bit / WORD_BITS] & (1u64 << (bit % WORD_BITS)) != 0
    }

    pub(crate) fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Returns true if `self` changed.
    pub(crate) fn union_with(&mut self, other: &BitVector) -> bool {
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            let n = *a | *b;
            changed |= n != *a;
            *a = n;
        }
        changed
    }

    pub(crate) fn intersect_with(&mut self, other: &BitVector) -> bool {
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            let n = *a & *b;
            changed |= n != *a;
            *a = n;
        }
        changed
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |x| self.contains(*x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitvector_ops() {
        let mut a = BitVector::full(70);
        assert_eq!(70, a.count());
        let b = BitVector::singleton(70, 65);
        assert!(a.intersect_with(&b));
        assert_eq!(vec![65], a.iter().collect::<Vec<_>>());
        assert!(!a.intersect_with(&b));
        let mut c = BitVector::new(70);
        assert!(c.is_empty());
        assert!(c.union_with(&b));
        assert!(c.insert(3));
        assert!(!c.insert(3));
        assert_eq!(vec![3, 65], c.iter().collect::<Vec<_>>());
        assert!(!c.contains(70));
    }
}
