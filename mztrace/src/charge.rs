use std::cmp;

/// An inclusive range of charge states, `(low, high)`
pub type ChargeRange = (i32, i32);

/// Iterate over every charge state of a [`ChargeRange`], ends included, preserving
/// the sign of the lower bound.
#[derive(Debug, Clone)]
pub struct ChargeRangeIter {
    pub min: i32,
    pub max: i32,
    pub sign: i32,
    index: usize,
    size: usize,
}

impl ChargeRangeIter {
    pub fn new(min: i32, max: i32) -> ChargeRangeIter {
        let low = cmp::min(min.abs(), max.abs());
        let high = cmp::max(min.abs(), max.abs());
        let sign = if min < 0 { -1 } else { 1 };
        let size = if low == 0 && high == 0 {
            0
        } else {
            (high - low.max(1) + 1) as usize
        };
        ChargeRangeIter {
            min: low.max(1),
            max: high,
            sign,
            index: 0,
            size,
        }
    }

    pub fn next_charge(&mut self) -> Option<i32> {
        if self.index >= self.size {
            None
        } else {
            let i = (self.min + self.index as i32) * self.sign;
            self.index += 1;
            Some(i)
        }
    }
}

impl Iterator for ChargeRangeIter {
    type Item = i32;

    fn next(&mut self) -> Option<i32> {
        self.next_charge()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rem = self.size - self.index;
        (rem, Some(rem))
    }
}

impl ExactSizeIterator for ChargeRangeIter {}

impl From<ChargeRange> for ChargeRangeIter {
    fn from(pair: ChargeRange) -> ChargeRangeIter {
        ChargeRangeIter::new(pair.0, pair.1)
    }
}
