// Copyright 2020 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Axis-aligned interval and bin algebra, used by [`crate::distributional`]'s
//! `remap` and by [`conditional_probability`].

use crate::error::HistogramError;

/// A closed interval `[lower, upper]` on one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub lower: f64,
    pub upper: f64,
}

impl Interval {
    pub fn new(lower: f64, upper: f64) -> Self {
        Interval { lower, upper }
    }

    pub fn is_empty(&self) -> bool {
        self.lower > self.upper
    }

    pub fn width(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.upper - self.lower
        }
    }

    pub fn median(&self) -> f64 {
        (self.lower + self.upper) / 2.0
    }

    /// The intersection of two intervals; empty (`lower > upper`) if they
    /// don't overlap.
    pub fn intersect(&self, other: &Interval) -> Interval {
        Interval::new(self.lower.max(other.lower), self.upper.min(other.upper))
    }
}

/// A bin: one interval per axis, defining an axis-aligned box.
pub type NBin = Vec<Interval>;

/// Builds a partition of the real line from a sorted, deduplicated list of
/// axis values: each value owns the region closer to it than to either
/// neighbor, with the two outer bins extended by the width of their single
/// neighboring gap so that every bin has finite, nonzero width.
pub fn bins_from_axis_values(values: &[f64]) -> Vec<Interval> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![Interval::new(values[0] - 0.5, values[0] + 0.5)];
    }
    let mut bins = Vec::with_capacity(n);
    for i in 0..n {
        let lower = if i == 0 {
            values[0] - (values[1] - values[0]) / 2.0
        } else {
            (values[i - 1] + values[i]) / 2.0
        };
        let upper = if i == n - 1 {
            values[n - 1] + (values[n - 1] - values[n - 2]) / 2.0
        } else {
            (values[i] + values[i + 1]) / 2.0
        };
        bins.push(Interval::new(lower, upper));
    }
    bins
}

/// The fraction of `b1`'s volume that overlaps `b2`, axis by axis: the
/// product over axes of `width(b1ᵢ ∩ b2ᵢ) / width(b1ᵢ)`. An axis on which
/// `b1` has zero width contributes `1` if its point lies within `b2`'s
/// interval on that axis (rather than `0/0`), `0` otherwise.
pub fn conditional_probability(b1: &[Interval], b2: &[Interval]) -> Result<f64, HistogramError> {
    if b1.len() != b2.len() {
        return Err(HistogramError::DimensionMismatch {
            actual: b2.len() as u32,
            expected: b1.len() as u32,
        });
    }
    let mut p = 1.0;
    for (i1, i2) in b1.iter().zip(b2.iter()) {
        let overlap = i1.intersect(i2).width();
        let w1 = i1.width();
        let ratio = if w1 == 0.0 {
            if i1.lower >= i2.lower && i1.lower <= i2.upper {
                1.0
            } else {
                0.0
            }
        } else {
            overlap / w1
        };
        p *= ratio;
    }
    Ok(p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersect_and_width() {
        let a = Interval::new(0.0, 4.0);
        let b = Interval::new(2.0, 6.0);
        let i = a.intersect(&b);
        assert_eq!(i.width(), 2.0);
    }

    #[test]
    fn disjoint_intervals_have_zero_width_intersection() {
        let a = Interval::new(0.0, 1.0);
        let b = Interval::new(2.0, 3.0);
        assert_eq!(a.intersect(&b).width(), 0.0);
        assert!(a.intersect(&b).is_empty());
    }

    #[test]
    fn bins_from_axis_values_cover_a_contiguous_range() {
        let values = vec![0.0, 1.0, 3.0];
        let bins = bins_from_axis_values(&values);
        assert_eq!(bins.len(), 3);
        assert_eq!(bins[0].upper, bins[1].lower);
        assert_eq!(bins[1].upper, bins[2].lower);
    }

    #[test]
    fn conditional_probability_of_identical_bins_is_one() {
        let b = vec![Interval::new(0.0, 1.0), Interval::new(0.0, 1.0)];
        assert_eq!(conditional_probability(&b, &b).unwrap(), 1.0);
    }

    #[test]
    fn conditional_probability_of_disjoint_bins_is_zero() {
        let b1 = vec![Interval::new(0.0, 1.0)];
        let b2 = vec![Interval::new(2.0, 3.0)];
        assert_eq!(conditional_probability(&b1, &b2).unwrap(), 0.0);
    }
}
