use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

/// A wrapping 16-bit sequence number.
///
/// Sequence numbers have no absolute order: `a` is newer than `b` iff `a - b` (as a signed
///  16-bit quantity) is positive, i.e. iff `b` is less than half the number space behind `a`.
///  This relation is not transitive across more than half the number space, so `SeqNo`
///  deliberately does not implement `PartialOrd` / `Ord`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct SeqNo(u16);

impl Display for SeqNo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SeqNo {
    pub const ZERO: SeqNo = SeqNo(0);

    /// the number of bits in the wire representation
    pub const BITS: usize = 16;

    pub const fn from_raw(value: u16) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u16 {
        self.0
    }

    pub fn next(&self) -> SeqNo {
        SeqNo(self.0.wrapping_add(1))
    }

    pub fn prev(&self) -> SeqNo {
        SeqNo(self.0.wrapping_sub(1))
    }

    pub fn plus(&self, delta: u16) -> SeqNo {
        SeqNo(self.0.wrapping_add(delta))
    }

    pub fn minus(&self, delta: u16) -> SeqNo {
        SeqNo(self.0.wrapping_sub(delta))
    }

    /// the signed minimal circular distance `self - other`
    pub fn difference(&self, other: SeqNo) -> i16 {
        self.0.wrapping_sub(other.0) as i16
    }

    pub fn circular_cmp(&self, other: SeqNo) -> Ordering {
        self.difference(other).cmp(&0)
    }

    /// -1, 0 or 1, analogous to `circular_cmp`
    pub fn compare_to(&self, other: SeqNo) -> i32 {
        match self.circular_cmp(other) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        }
    }

    pub fn is_newer_than(&self, other: SeqNo) -> bool {
        self.circular_cmp(other) == Ordering::Greater
    }

    pub fn is_older_than(&self, other: SeqNo) -> bool {
        self.circular_cmp(other) == Ordering::Less
    }
}
