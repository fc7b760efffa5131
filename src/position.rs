// Copyright 2020 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use std::fmt;

use crate::error::HistogramError;

/// Coordinate-wise tolerance (in units-in-the-last-place) used by
/// [`Position::eq_ulp`]. Two coordinates farther apart than this are
/// considered distinct positions.
pub const ULP_TOL: u64 = 24;

/// A point in ℝᵈ. Dimensionality is fixed once a `Position` is built and is
/// checked against a histogram's configured dimensions at every operation
/// boundary (never internally, where a mismatch would be a defect).
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    coords: Vec<f64>,
}

impl Position {
    /// Build a position from its coordinates.
    pub fn new(coords: Vec<f64>) -> Self {
        Position { coords }
    }

    /// The number of dimensions of this position.
    pub fn dims(&self) -> u32 {
        self.coords.len() as u32
    }

    /// Borrow the coordinates.
    pub fn as_slice(&self) -> &[f64] {
        &self.coords
    }

    fn check_dims(&self, other: &Position) -> Result<(), HistogramError> {
        if self.dims() != other.dims() {
            return Err(HistogramError::DimensionMismatch {
                actual: other.dims(),
                expected: self.dims(),
            });
        }
        Ok(())
    }

    fn zip_map(
        &self,
        other: &Position,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<Position, HistogramError> {
        self.check_dims(other)?;
        let coords = self
            .coords
            .iter()
            .zip(other.coords.iter())
            .map(|(a, b)| f(*a, *b))
            .collect();
        Ok(Position::new(coords))
    }

    /// Elementwise addition. Fails if `self` and `other` have different
    /// dimensions.
    pub fn add(&self, other: &Position) -> Result<Position, HistogramError> {
        self.zip_map(other, |a, b| a + b)
    }

    /// Elementwise subtraction. Fails if `self` and `other` have different
    /// dimensions.
    pub fn sub(&self, other: &Position) -> Result<Position, HistogramError> {
        self.zip_map(other, |a, b| a - b)
    }

    /// Multiply every coordinate by a scalar.
    pub fn mul_scalar(&self, s: f64) -> Position {
        Position::new(self.coords.iter().map(|c| c * s).collect())
    }

    /// Divide every coordinate by a scalar.
    pub fn div_scalar(&self, s: f64) -> Position {
        Position::new(self.coords.iter().map(|c| c / s).collect())
    }

    /// `|a - b|` if `d = 1`, else the Euclidean (L²) distance.
    pub fn dist(&self, other: &Position) -> Result<f64, HistogramError> {
        self.check_dims(other)?;
        if self.coords.len() == 1 {
            return Ok((self.coords[0] - other.coords[0]).abs());
        }
        let sum_sq: f64 = self
            .coords
            .iter()
            .zip(other.coords.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        Ok(sum_sq.sqrt())
    }

    /// Coordinate-wise ULP-approximate equality: true iff every coordinate
    /// pair is within [`ULP_TOL`] units-in-the-last-place of each other.
    pub fn eq_ulp(&self, other: &Position) -> Result<bool, HistogramError> {
        self.check_dims(other)?;
        Ok(self
            .coords
            .iter()
            .zip(other.coords.iter())
            .all(|(a, b)| ulp_distance(*a, *b) <= ULP_TOL))
    }

    /// The orthant of `query` relative to `self` as the reference point:
    /// `1 + Σᵢ 2ⁱ · [queryᵢ > selfᵢ]`, a value in `1..=2^d`.
    pub fn orthant(&self, query: &Position) -> Result<u32, HistogramError> {
        self.check_dims(query)?;
        let mut bits: u32 = 0;
        for (i, (r, q)) in self.coords.iter().zip(query.coords.iter()).enumerate() {
            if q > r {
                bits |= 1 << i;
            }
        }
        Ok(bits + 1)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.coords.len() == 1 {
            return write!(f, "{}", self.coords[0]);
        }
        write!(f, "(")?;
        for (i, c) in self.coords.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", c)?;
        }
        write!(f, ")")
    }
}

/// The direction opposite `k` among the `2^dims` orthants:
/// `((k - 1) + 2^(dims - 1)) mod 2^dims + 1`.
pub fn opposite_orthant(k: u32, dims: u32) -> u32 {
    let subs = 1u32 << dims;
    ((k - 1) + (1 << (dims - 1))) % subs + 1
}

/// Maps an IEEE-754 double to a `u64` whose ordering matches the float's
/// ordering, so that two floats' ULP distance is the absolute difference of
/// their mapped keys.
fn ordered_key(f: f64) -> u64 {
    let bits = f.to_bits();
    if bits & (1u64 << 63) != 0 {
        !bits
    } else {
        bits | (1u64 << 63)
    }
}

/// Distance in units-in-the-last-place between two doubles.
pub fn ulp_distance(a: f64, b: f64) -> u64 {
    let ka = ordered_key(a) as i128;
    let kb = ordered_key(b) as i128;
    (ka - kb).unsigned_abs() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dist_1d_is_abs_diff() {
        let a = Position::new(vec![1.0]);
        let b = Position::new(vec![3.5]);
        assert_eq!(a.dist(&b).unwrap(), 2.5);
    }

    #[test]
    fn dist_2d_is_euclidean() {
        let a = Position::new(vec![0.0, 0.0]);
        let b = Position::new(vec![3.0, 4.0]);
        assert_eq!(a.dist(&b).unwrap(), 5.0);
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let a = Position::new(vec![0.0]);
        let b = Position::new(vec![0.0, 1.0]);
        assert!(a.dist(&b).is_err());
    }

    #[test]
    fn eq_ulp_tolerates_last_bit_noise() {
        let a = Position::new(vec![1.0]);
        let mut bits = 1.0f64.to_bits();
        bits += 3;
        let b = Position::new(vec![f64::from_bits(bits)]);
        assert!(a.eq_ulp(&b).unwrap());
    }

    #[test]
    fn eq_ulp_rejects_distinct_values() {
        let a = Position::new(vec![1.0]);
        let b = Position::new(vec![1.5]);
        assert!(!a.eq_ulp(&b).unwrap());
    }

    #[test]
    fn orthant_1d() {
        let origin = Position::new(vec![0.0]);
        assert_eq!(origin.orthant(&Position::new(vec![1.0])).unwrap(), 2);
        assert_eq!(origin.orthant(&Position::new(vec![-1.0])).unwrap(), 1);
    }

    #[test]
    fn orthant_2d_corners() {
        let origin = Position::new(vec![0.0, 0.0]);
        assert_eq!(origin.orthant(&Position::new(vec![1.0, 1.0])).unwrap(), 4);
        assert_eq!(origin.orthant(&Position::new(vec![-1.0, -1.0])).unwrap(), 1);
        assert_eq!(origin.orthant(&Position::new(vec![1.0, -1.0])).unwrap(), 2);
        assert_eq!(origin.orthant(&Position::new(vec![-1.0, 1.0])).unwrap(), 3);
    }

    #[test]
    fn opposite_orthant_pairs_are_involutions() {
        for dims in 1..=4u32 {
            let subs = 1u32 << dims;
            for k in 1..=subs {
                let opp = opposite_orthant(k, dims);
                assert_eq!(opposite_orthant(opp, dims), k);
                assert_ne!(opp, k);
            }
        }
    }
}
