use std::fmt::{Debug, Formatter};

const WORD_BITS: usize = u64::BITS as usize;

/// A bit vector with a capacity that is fixed at construction time.
///
/// Bit `0` is the lowest bit. Shifting left moves bits towards higher indexes, discarding the
///  bits that move beyond capacity and zero-filling the low end.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct BitVector {
    words: Vec<u64>,
    len: usize,
}

impl BitVector {
    pub fn new(len: usize) -> BitVector {
        BitVector {
            words: vec![0; len.div_ceil(WORD_BITS)],
            len,
        }
    }

    pub fn from_bools(bits: &[bool]) -> BitVector {
        let mut result = BitVector::new(bits.len());
        for (i, &b) in bits.iter().enumerate() {
            if b {
                result.set(i);
            }
        }
        result
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> bool {
        assert!(index < self.len, "bit index {} out of range for bit vector of length {}", index, self.len);
        self.words[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    pub fn set(&mut self, index: usize) {
        self.assign(index, true);
    }

    pub fn clear(&mut self, index: usize) {
        self.assign(index, false);
    }

    pub fn assign(&mut self, index: usize, value: bool) {
        assert!(index < self.len, "bit index {} out of range for bit vector of length {}", index, self.len);
        let mask = 1u64 << (index % WORD_BITS);
        if value {
            self.words[index / WORD_BITS] |= mask;
        }
        else {
            self.words[index / WORD_BITS] &= !mask;
        }
    }

    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }

    pub fn shift_left(&mut self, k: usize) {
        if k >= self.len {
            self.clear_all();
            return;
        }
        if k == 0 {
            return;
        }

        let word_shift = k / WORD_BITS;
        let bit_shift = k % WORD_BITS;

        for i in (0..self.words.len()).rev() {
            let mut word = 0;
            if i >= word_shift {
                word = self.words[i - word_shift] << bit_shift;
                if bit_shift > 0 && i > word_shift {
                    word |= self.words[i - word_shift - 1] >> (WORD_BITS - bit_shift);
                }
            }
            self.words[i] = word;
        }
        self.mask_unused_bits();
    }

    /// The number of bits that are set
    pub fn count_ones(&self) -> usize {
        self.words.iter()
            .map(|w| w.count_ones() as usize)
            .sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(|i| self.get(i))
    }

    fn mask_unused_bits(&mut self) {
        let used = self.len % WORD_BITS;
        if used != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << used) - 1;
            }
        }
    }
}

impl Debug for BitVector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // highest index first, reading like a binary number
        for i in (0..self.len).rev() {
            write!(f, "{}", if self.get(i) { '1' } else { '0' })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn bits(s: &str) -> BitVector {
        // same notation as Debug: highest index first
        let bools = s.chars().rev().map(|c| c == '1').collect::<Vec<_>>();
        BitVector::from_bools(&bools)
    }

    #[rstest]
    #[case::empty(0)]
    #[case::short(5)]
    #[case::word(64)]
    #[case::word_and_a_bit(65)]
    #[case::several_words(200)]
    fn test_new_is_clear(#[case] len: usize) {
        let v = BitVector::new(len);
        assert_eq!(v.len(), len);
        assert_eq!(v.count_ones(), 0);
        assert!(v.iter().all(|b| !b));
    }

    #[test]
    fn test_set_clear() {
        let mut v = BitVector::new(70);
        v.set(0);
        v.set(63);
        v.set(64);
        v.set(69);
        assert!(v.get(0) && v.get(63) && v.get(64) && v.get(69));
        assert_eq!(v.count_ones(), 4);

        v.clear(63);
        assert!(!v.get(63));
        assert_eq!(v.count_ones(), 3);

        v.clear_all();
        assert_eq!(v.count_ones(), 0);
    }

    #[test]
    #[should_panic]
    fn test_out_of_range() {
        BitVector::new(4).get(4);
    }

    #[rstest]
    #[case::zero("1011", 0, "1011")]
    #[case::one("1011", 1, "0110")]
    #[case::two("1011", 2, "1100")]
    #[case::three("1011", 3, "1000")]
    #[case::all("1011", 4, "0000")]
    #[case::more("1011", 9, "0000")]
    fn test_shift_left_short(#[case] initial: &str, #[case] k: usize, #[case] expected: &str) {
        let mut v = bits(initial);
        v.shift_left(k);
        assert_eq!(v, bits(expected));
    }

    #[rstest]
    #[case::within_word(3)]
    #[case::to_word_boundary(1)]
    #[case::across_word(5)]
    #[case::whole_word(64)]
    #[case::word_and_bits(70)]
    fn test_shift_left_long(#[case] k: usize) {
        let len = 130;
        let set_bits = [0, 1, 62, 63, 64, 100, 129];

        let mut v = BitVector::new(len);
        for &i in &set_bits {
            v.set(i);
        }
        v.shift_left(k);

        for i in 0..len {
            let expected = i >= k && set_bits.contains(&(i - k));
            assert_eq!(v.get(i), expected, "bit {}", i);
        }
    }

    #[test]
    fn test_debug() {
        let mut v = BitVector::new(4);
        v.set(1);
        assert_eq!(format!("{:?}", v), "0010");
    }
}
