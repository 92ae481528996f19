use std::fmt::{Debug, Error, Formatter};

/// Fixed-capacity set of small integers, packed into 32-bit words
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BitSet {
    words: Vec<u32>,
}

const BITS_PER_WORD: usize = 32;

impl BitSet {
    /// Empty set able to hold `0..capacity`
    pub fn with_capacity(capacity: usize) -> BitSet {
        BitSet {
            words: vec![0; (capacity + BITS_PER_WORD - 1) / BITS_PER_WORD],
        }
    }

    /// Number of elements the set can track
    pub fn capacity(&self) -> usize {
        self.words.len() * BITS_PER_WORD
    }

    /// Whether the element is in the set (elements beyond the capacity never are)
    pub fn contains(&self, elem: usize) -> bool {
        self.words
            .get(elem / BITS_PER_WORD)
            .map_or(false, |word| word & (1 << (elem % BITS_PER_WORD)) != 0)
    }

    /// Add an element, returning whether it was newly added
    ///
    /// Elements beyond the capacity grow the set.
    pub fn insert(&mut self, elem: usize) -> bool {
        let word = elem / BITS_PER_WORD;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let bit = 1 << (elem % BITS_PER_WORD);
        let added = self.words[word] & bit == 0;
        self.words[word] |= bit;
        added
    }

    /// Add every element of another set
    pub fn union_with(&mut self, other: &BitSet) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (word, other_word) in self.words.iter_mut().zip(&other.words) {
            *word |= other_word;
        }
    }

    /// Whether every element of this set is in the other one
    pub fn is_subset(&self, other: &BitSet) -> bool {
        self.words.iter().enumerate().all(|(idx, word)| {
            let other_word = other.words.get(idx).copied().unwrap_or(0);
            word & !other_word == 0
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.capacity()).filter(move |elem| self.contains(*elem))
    }
}

impl Debug for BitSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_and_query() {
        let mut set = BitSet::with_capacity(40);
        assert_eq!(set.capacity(), 64);
        assert!(set.insert(3));
        assert!(!set.insert(3));
        assert!(set.insert(33));
        assert!(set.contains(3) && set.contains(33));
        assert!(!set.contains(4));
        assert!(!set.contains(1000));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![3, 33]);
    }

    #[test]
    fn union_and_subset() {
        let mut small = BitSet::with_capacity(8);
        small.insert(1);
        let mut large = BitSet::with_capacity(0);
        large.insert(1);
        large.insert(70);

        assert!(small.is_subset(&large));
        assert!(!large.is_subset(&small));

        small.union_with(&large);
        assert_eq!(small, large);
    }
}
