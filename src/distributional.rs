// Copyright 2020 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! L3: [`DistributionalValue`], a weighted distribution over ℝᵈ built on
//! top of [`Histogram<f64>`].

use std::cmp::Ordering;

use crate::cell_value::CellValue;
use crate::error::HistogramError;
use crate::histogram::Histogram;
use crate::position::Position;
use crate::{CONJ_EPSILON, DEFAULT_K};

/// A weighted distribution over ℝᵈ: a count-valued histogram together with
/// mean/mode/variance/confidence views over it.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionalValue {
    hist: Histogram<f64>,
}

/// Converts an evidence count into a confidence in `[0, 1)`, the inverse of
/// [`to_count`]: `count / (count + DEFAULT_K)`.
pub fn to_conf(count: f64) -> f64 {
    count / (count + DEFAULT_K)
}

/// Converts a confidence in `[0, 1)` into the evidence count that would
/// produce it: `DEFAULT_K * conf / (1 - conf)`, clamped to be non-negative.
pub fn to_count(conf: f64) -> f64 {
    if conf >= 1.0 {
        return f64::MAX;
    }
    (DEFAULT_K * conf / (1.0 - conf)).max(0.0)
}

impl DistributionalValue {
    /// An empty distribution over `dims` dimensions with the given cell
    /// capacity (`0` for unbounded).
    pub fn new(cap: u32, dims: u32) -> Result<Self, HistogramError> {
        Ok(DistributionalValue {
            hist: Histogram::new(cap, dims)?,
        })
    }

    pub fn from_histogram(hist: Histogram<f64>) -> Self {
        DistributionalValue { hist }
    }

    pub fn histogram(&self) -> &Histogram<f64> {
        &self.hist
    }

    pub fn dims(&self) -> u32 {
        self.hist.dims()
    }

    pub fn total_count(&self) -> f64 {
        self.hist.total_count()
    }

    pub fn elem_count(&self) -> u32 {
        self.hist.elem_count()
    }

    /// A single-point distribution built from a `(mode, confidence)` pair,
    /// the way `DistributionalValue`'s `(mode, confidence)` constructor
    /// inverts [`to_conf`] via [`to_count`]. A confidence of `0` leaves the
    /// distribution empty (total ignorance) rather than materializing a
    /// zero-weight cell (I2).
    pub fn from_mode_confidence(mode: &[f64], confidence: f64, dims: u32) -> Result<Self, HistogramError> {
        let mut dv = DistributionalValue::new(0, dims)?;
        let count = to_count(confidence);
        if count > 0.0 {
            dv.add_evidence(mode, count)?;
        }
        Ok(dv)
    }

    /// The canonical "true" truth value: mode `1.0`, near-certain confidence.
    pub fn true_value() -> Self {
        DistributionalValue::from_mode_confidence(&[1.0], 0.9999, 1)
            .expect("the true truth value is always constructible")
    }

    /// The canonical "false" truth value: mode `0.0`, near-certain
    /// confidence.
    pub fn false_value() -> Self {
        DistributionalValue::from_mode_confidence(&[0.0], 0.9999, 1)
            .expect("the false truth value is always constructible")
    }

    /// The canonical "unknown" truth value: no evidence at all.
    pub fn default_value() -> Self {
        DistributionalValue::new(0, 1).expect("the default truth value is always constructible")
    }

    /// Adds `weight` worth of evidence at `pos`.
    pub fn add_evidence(&mut self, pos: &[f64], weight: f64) -> Result<(), HistogramError> {
        self.hist.insert(pos, weight)
    }

    /// Merges two distributions, summing their evidence (I3).
    pub fn merge(a: &DistributionalValue, b: &DistributionalValue) -> Result<DistributionalValue, HistogramError> {
        Ok(DistributionalValue {
            hist: Histogram::merge(&a.hist, &b.hist)?,
        })
    }

    /// True if every populated cell carries the same weight (within
    /// floating-point tolerance). Supplemented from the original source's
    /// `is_uniform`.
    pub fn is_uniform(&self) -> bool {
        let mut iter = self.hist.iter();
        let first = match iter.next() {
            Some((_, &w)) => w,
            None => return true,
        };
        iter.all(|(_, &w)| (w - first).abs() <= first.abs().max(1.0) * 1e-9)
    }

    /// The weighted mean position, per axis.
    pub fn get_mean(&self) -> Result<Position, HistogramError> {
        if self.hist.is_empty() {
            return Err(HistogramError::Empty);
        }
        let dims = self.dims() as usize;
        let mut sum = vec![0.0; dims];
        let total = self.total_count();
        for (pos, &w) in self.hist.iter() {
            for (i, c) in pos.as_slice().iter().enumerate() {
                sum[i] += c * w;
            }
        }
        Ok(Position::new(sum.into_iter().map(|s| s / total).collect()))
    }

    /// The position of the heaviest cell.
    pub fn get_mode(&self) -> Result<Position, HistogramError> {
        self.hist
            .iter()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
            .map(|(pos, _)| pos.clone())
            .ok_or(HistogramError::Empty)
    }

    /// The weighted per-axis variance about [`get_mean`].
    pub fn get_variance(&self) -> Result<Vec<f64>, HistogramError> {
        let mean = self.get_mean()?;
        let dims = self.dims() as usize;
        let mut sum = vec![0.0; dims];
        let total = self.total_count();
        for (pos, &w) in self.hist.iter() {
            for (i, c) in pos.as_slice().iter().enumerate() {
                let d = c - mean.as_slice()[i];
                sum[i] += w * d * d;
            }
        }
        Ok(sum.into_iter().map(|s| s / total).collect())
    }

    /// The confidence [`to_conf`] assigns to this distribution's total
    /// evidence.
    pub fn get_confidence(&self) -> f64 {
        to_conf(self.total_count())
    }

    /// The bounding box (per-axis min and max) of this distribution's
    /// populated cells.
    fn extrema(&self) -> Result<(Vec<f64>, Vec<f64>), HistogramError> {
        let dims = self.dims() as usize;
        let mut iter = self.hist.iter();
        let (first, _) = iter.next().ok_or(HistogramError::Empty)?;
        let mut lo = first.as_slice().to_vec();
        let mut hi = first.as_slice().to_vec();
        for (pos, _) in iter {
            for i in 0..dims {
                lo[i] = lo[i].min(pos.as_slice()[i]);
                hi[i] = hi[i].max(pos.as_slice()[i]);
            }
        }
        Ok((lo, hi))
    }

    /// Reflects every cell about the midpoint of this distribution's
    /// bounding box (its "L∞ center"), preserving each cell's weight.
    pub fn mirror(&self) -> Result<DistributionalValue, HistogramError> {
        let (lo, hi) = self.extrema()?;
        let dims = self.dims();
        let mut out = Histogram::new(self.hist.cap(), dims)?;
        for (pos, &w) in self.hist.iter() {
            let mirrored: Vec<f64> = pos
                .as_slice()
                .iter()
                .enumerate()
                .map(|(i, c)| lo[i] + hi[i] - c)
                .collect();
            out.insert(&mirrored, w)?;
        }
        Ok(DistributionalValue { hist: out })
    }

    /// Redistributes this distribution's evidence onto `new_positions`, the
    /// way `DistributionalValue::remap` distributes cell weight in
    /// proportion to axis-aligned overlap.
    pub fn remap(&self, new_positions: &[Position]) -> Result<DistributionalValue, HistogramError> {
        Ok(DistributionalValue {
            hist: self.hist.remap(new_positions)?,
        })
    }

    /// The fraction of this distribution's mass that a target position's
    /// bin would receive under [`remap`], for callers that only need the
    /// ratio rather than a full remap. Identical to [`DistributionalValue::bin_mean`];
    /// kept under its original name since `remap` and friends use it as a
    /// ratio rather than a statistic.
    pub fn conditional_probability(&self, pos: &[f64]) -> Result<f64, HistogramError> {
        self.bin_mean(pos)
    }

    /// `mean(bin) = aᵢ / a₀`: the probability mass `pos`'s cell carries.
    /// `0` for a position with no evidence, rather than `0/0`.
    pub fn bin_mean(&self, pos: &[f64]) -> Result<f64, HistogramError> {
        let weight = match self.hist.get(pos) {
            Ok(w) => *w,
            Err(HistogramError::PositionAbsent) => 0.0,
            Err(e) => return Err(e),
        };
        let total = self.total_count();
        if total == 0.0 {
            return Ok(0.0);
        }
        Ok(weight / total)
    }

    /// `mode(bin) = (aᵢ - 1) / (a₀ - n)`, the Krichevsky-Trofimov-style mode
    /// estimate for `pos`'s bin; `0` (rather than a negative or undefined
    /// value) when `a₀ - n <= 0`.
    pub fn bin_mode(&self, pos: &[f64]) -> Result<f64, HistogramError> {
        let weight = match self.hist.get(pos) {
            Ok(w) => *w,
            Err(HistogramError::PositionAbsent) => 0.0,
            Err(e) => return Err(e),
        };
        let a0 = self.total_count();
        let n = self.elem_count() as f64;
        let denom = a0 - n;
        if denom <= 0.0 {
            return Ok(0.0);
        }
        Ok((weight - 1.0) / denom)
    }

    /// `variance(bin) = aᵢ(a₀ - aᵢ) / (a₀²(a₀ + 1))`: the variance of the
    /// binomial estimate of `pos`'s bin's share of the total evidence.
    pub fn bin_variance(&self, pos: &[f64]) -> Result<f64, HistogramError> {
        let weight = match self.hist.get(pos) {
            Ok(w) => *w,
            Err(HistogramError::PositionAbsent) => 0.0,
            Err(e) => return Err(e),
        };
        let a0 = self.total_count();
        if a0 == 0.0 {
            return Ok(0.0);
        }
        Ok(weight * (a0 - weight) / (a0 * a0 * (a0 + 1.0)))
    }
}

/// `A AND B`: walks both distributions in lexicographic position order,
/// consuming whole cells from the lower-valued side at each step (see
/// [`fuzzy_walk`]).
pub fn conjunction(a: &DistributionalValue, b: &DistributionalValue) -> Result<DistributionalValue, HistogramError> {
    fuzzy_walk(a, b, Ordering::Less)
}

/// `A OR B`: the mirror image of [`conjunction`], consuming from the
/// higher-valued side at each step.
pub fn disjunction(a: &DistributionalValue, b: &DistributionalValue) -> Result<DistributionalValue, HistogramError> {
    fuzzy_walk(a, b, Ordering::Greater)
}

/// Walks the sorted cells of `a` and `b` with two pointers, at each step
/// consuming whichever side's current position compares as `consume_side`
/// against the other (conjunction consumes the lower position, disjunction
/// the higher). Consuming a cell deposits `result_total * mean(cell) *
/// other_side_residual_mass` at that cell's position and subtracts
/// `mean(cell)` from the consumed side's residual mass. Stops once either
/// side's residual mass drops below [`CONJ_EPSILON`], or either side's cells
/// run out (the two are equivalent once `Σ mean(bin) = 1` has been fully
/// walked). `result.total_count() = min(a.total_count(), b.total_count())`.
fn fuzzy_walk(
    a: &DistributionalValue,
    b: &DistributionalValue,
    consume_side: Ordering,
) -> Result<DistributionalValue, HistogramError> {
    if a.dims() != b.dims() {
        return Err(HistogramError::DimensionMismatch {
            actual: b.dims(),
            expected: a.dims(),
        });
    }
    if a.hist.is_empty() || b.hist.is_empty() {
        return Err(HistogramError::Empty);
    }
    let at = a.total_count();
    let bt = b.total_count();
    let result_total = at.min(bt);

    let cells_a: Vec<(Position, f64)> = a.hist.iter().map(|(p, &w)| (p.clone(), w)).collect();
    let cells_b: Vec<(Position, f64)> = b.hist.iter().map(|(p, &w)| (p.clone(), w)).collect();

    let mut out = Histogram::new(0, a.dims())?;
    let (mut ia, mut ib) = (0usize, 0usize);
    let (mut ma, mut mb) = (1.0f64, 1.0f64);

    while ma >= CONJ_EPSILON && mb >= CONJ_EPSILON && ia < cells_a.len() && ib < cells_b.len() {
        let order = cells_a[ia]
            .0
            .as_slice()
            .partial_cmp(cells_b[ib].0.as_slice())
            .expect("positions never contain NaN");
        let take_a = order == consume_side || order == Ordering::Equal;
        if take_a {
            let (pos, weight) = &cells_a[ia];
            let mean = weight / at;
            out.insert(pos.as_slice(), result_total * mean * mb)?;
            ma -= mean;
            ia += 1;
        } else {
            let (pos, weight) = &cells_b[ib];
            let mean = weight / bt;
            out.insert(pos.as_slice(), result_total * mean * ma)?;
            mb -= mean;
            ib += 1;
        }
    }
    Ok(DistributionalValue { hist: out })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_conf_and_to_count_are_inverses_near_midrange() {
        let conf = 0.5;
        let count = to_count(conf);
        let back = to_conf(count);
        assert!((back - conf).abs() < 1e-9);
    }

    #[test]
    fn from_mode_confidence_zero_confidence_is_empty() {
        let dv = DistributionalValue::from_mode_confidence(&[0.5], 0.0, 1).unwrap();
        assert_eq!(dv.total_count(), 0.0);
        assert_eq!(dv.elem_count(), 0);
    }

    #[test]
    fn mean_of_symmetric_distribution() {
        let mut dv = DistributionalValue::new(0, 1).unwrap();
        dv.add_evidence(&[0.0], 1.0).unwrap();
        dv.add_evidence(&[2.0], 1.0).unwrap();
        let mean = dv.get_mean().unwrap();
        assert_eq!(mean.as_slice()[0], 1.0);
    }

    #[test]
    fn mode_is_the_heaviest_cell() {
        let mut dv = DistributionalValue::new(0, 1).unwrap();
        dv.add_evidence(&[0.0], 1.0).unwrap();
        dv.add_evidence(&[5.0], 9.0).unwrap();
        assert_eq!(dv.get_mode().unwrap().as_slice()[0], 5.0);
    }

    #[test]
    fn is_uniform_true_for_equal_weights() {
        let mut dv = DistributionalValue::new(0, 1).unwrap();
        dv.add_evidence(&[0.0], 1.0).unwrap();
        dv.add_evidence(&[1.0], 1.0).unwrap();
        assert!(dv.is_uniform());
    }

    #[test]
    fn mirror_reflects_about_bounding_box_midpoint() {
        let mut dv = DistributionalValue::new(0, 1).unwrap();
        dv.add_evidence(&[0.0], 1.0).unwrap();
        dv.add_evidence(&[10.0], 1.0).unwrap();
        let mirrored = dv.mirror().unwrap();
        assert!(mirrored.hist.get(&[10.0]).is_ok());
        assert!(mirrored.hist.get(&[0.0]).is_ok());
    }

    #[test]
    fn conjunction_of_certain_true_values_is_near_true() {
        let a = DistributionalValue::true_value();
        let b = DistributionalValue::true_value();
        let c = conjunction(&a, &b).unwrap();
        let mode = c.get_mode().unwrap();
        assert_eq!(mode.as_slice()[0], 1.0);
    }

    #[test]
    fn conjunction_matches_worked_example() {
        // DV_A = {0.2:3, 0.8:1}, DV_B = {0.3:2, 0.9:2}
        let mut a = DistributionalValue::new(0, 1).unwrap();
        a.add_evidence(&[0.2], 3.0).unwrap();
        a.add_evidence(&[0.8], 1.0).unwrap();
        let mut b = DistributionalValue::new(0, 1).unwrap();
        b.add_evidence(&[0.3], 2.0).unwrap();
        b.add_evidence(&[0.9], 2.0).unwrap();

        let c = conjunction(&a, &b).unwrap();
        assert!((c.total_count() - 4.0).abs() < 1e-12);
        assert!((c.bin_mean(&[0.2]).unwrap() * c.total_count() - 3.0).abs() < 1e-12);
        assert!((c.bin_mean(&[0.3]).unwrap() * c.total_count() - 0.5).abs() < 1e-12);
        assert!((c.bin_mean(&[0.8]).unwrap() * c.total_count() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn bin_mean_sums_to_one() {
        let mut dv = DistributionalValue::new(0, 1).unwrap();
        dv.add_evidence(&[0.0], 1.0).unwrap();
        dv.add_evidence(&[1.0], 3.0).unwrap();
        let sum: f64 = dv.histogram().iter().map(|(p, _)| dv.bin_mean(p.as_slice()).unwrap()).sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }
}
