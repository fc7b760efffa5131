// Copyright 2020 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The capability a cell's value must provide so that [`crate::Histogram`]
//! can be generic over plain counts (`f64`) and over nested histograms
//! (`Histogram<f64>`).

/// A mergeable, scalable weight. `count()` is the quantity the tree and
/// cover-tree back-ends use to weight positions when averaging; `scaled` and
/// `shifted` back the histogram's `*=`/`/=` and `+=`/`-=` scalar arithmetic;
/// `merged` combines two cells that land on (or are merged into) the same
/// position.
pub trait CellValue: Clone {
    /// The total weight carried by this value.
    fn count(&self) -> f64;

    /// Multiply every count this value carries by `factor`.
    fn scaled(&self, factor: f64) -> Self;

    /// Add `delta` to every count this value carries.
    fn shifted(&self, delta: f64) -> Self;

    /// Combine two values that occupy the same cell, summing their counts.
    fn merged(self, other: Self) -> Self;
}

impl CellValue for f64 {
    fn count(&self) -> f64 {
        *self
    }

    fn scaled(&self, factor: f64) -> Self {
        self * factor
    }

    fn shifted(&self, delta: f64) -> Self {
        self + delta
    }

    fn merged(self, other: Self) -> Self {
        self + other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f64_count_is_itself() {
        assert_eq!(3.5f64.count(), 3.5);
    }

    #[test]
    fn f64_merged_sums() {
        assert_eq!(CellValue::merged(2.0f64, 3.0f64), 5.0);
    }

    #[test]
    fn f64_scaled_and_shifted() {
        assert_eq!(2.0f64.scaled(3.0), 6.0);
        assert_eq!(2.0f64.shifted(3.0), 5.0);
    }
}
