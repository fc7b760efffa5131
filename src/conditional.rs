// Copyright 2020 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! L4: [`ConditionalDistributionalValue`], a distribution over outcomes
//! indexed by condition, built as `Histogram<Histogram<f64>>` (I8).

use crate::distributional::DistributionalValue;
use crate::error::HistogramError;
use crate::histogram::Histogram;
use crate::position::Position;

/// `P(outcome | condition)` for every condition cell it has seen evidence
/// for: a histogram whose positions are conditions and whose cell values
/// are themselves histograms over the outcome space.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalDistributionalValue {
    hist: Histogram<Histogram<f64>>,
}

impl ConditionalDistributionalValue {
    pub fn new(cap: u32, condition_dims: u32) -> Result<Self, HistogramError> {
        Ok(ConditionalDistributionalValue {
            hist: Histogram::new(cap, condition_dims)?,
        })
    }

    pub fn condition_dims(&self) -> u32 {
        self.hist.dims()
    }

    /// The total evidence across every condition, equal to the sum of each
    /// condition cell's own total count.
    pub fn total_count(&self) -> f64 {
        self.hist.total_count()
    }

    pub fn elem_count(&self) -> u32 {
        self.hist.elem_count()
    }

    /// The average total count per populated condition cell.
    pub fn avg_count(&self) -> Result<f64, HistogramError> {
        if self.hist.is_empty() {
            return Err(HistogramError::Empty);
        }
        Ok(self.total_count() / self.hist.elem_count() as f64)
    }

    pub fn get_conditions(&self) -> Vec<Position> {
        self.hist.iter().map(|(pos, _)| pos.clone()).collect()
    }

    /// Records evidence for `outcome` under `condition`.
    pub fn add_evidence(&mut self, condition: &[f64], outcome: &[f64], weight: f64) -> Result<(), HistogramError> {
        match self.hist.get(condition) {
            Ok(dv) => {
                let mut dv = dv.clone();
                dv.insert(outcome, weight)?;
                self.hist.insert(condition, dv)
            }
            Err(HistogramError::PositionAbsent) => {
                let outcome_dims = outcome.len() as u32;
                let mut dv = Histogram::new(0, outcome_dims)?;
                dv.insert(outcome, weight)?;
                self.hist.insert(condition, dv)
            }
            Err(e) => Err(e),
        }
    }

    /// The unconditional outcome distribution stored for `condition`
    /// exactly.
    pub fn get_unconditional_at(&self, condition: &[f64]) -> Result<DistributionalValue, HistogramError> {
        self.hist.get(condition).map(|h| DistributionalValue::from_histogram(h.clone()))
    }

    /// The inverse-distance weighted blend of the outcome distributions
    /// nearest `condition`, for conditions with no exact evidence.
    pub fn get_unconditional_avg(&self, condition: &[f64]) -> Result<DistributionalValue, HistogramError> {
        self.hist
            .get_avg(condition)
            .map(DistributionalValue::from_histogram)
    }

    /// `P(outcome)`: the marginal outcome distribution obtained by mixing
    /// every condition's inner histogram, each weighted by `mean(cond)`, the
    /// share of this value's total evidence that condition cell carries.
    /// Since the weights `mean(cond)` already sum to 1 (property 7 applied to
    /// the outer histogram, via I8), the result's total count is exactly the
    /// expectation of the inner histograms' totals under the condition
    /// distribution this CDV itself induces.
    pub fn get_unconditional(&self) -> Result<Histogram<f64>, HistogramError> {
        let mut iter = self.hist.iter();
        let (_, first) = iter.next().ok_or(HistogramError::Empty)?;
        let grand_total = self.total_count();
        let mean_first = if grand_total > 0.0 { first.total_count() / grand_total } else { 0.0 };
        let mut acc = first.scaled_copy(mean_first)?;
        for (_, inner) in iter {
            let mean = if grand_total > 0.0 { inner.total_count() / grand_total } else { 0.0 };
            let scaled = inner.scaled_copy(mean)?;
            acc = Histogram::merge(&acc, &scaled)?;
        }
        Ok(acc)
    }

    /// `P(condition, outcome)` as a joint histogram over
    /// `condition_dims + outcome_dims` axes: for each cell `(k₁, c₁)` of
    /// `base` (a distribution over the condition space, which need not share
    /// this CDV's exact grid) and each cell `(k₂, c₂)` of the outcome
    /// distribution this CDV assigns to `k₁` (via [`Self::get_unconditional_avg`],
    /// i.e. "the remapped condition"), emits a joint cell at `k₁ ‖ k₂` with
    /// count `mean(base, k₁) · mean(cond→unc, k₂) · base.total_count()`.
    pub fn get_joint_probability(&self, base: &DistributionalValue) -> Result<Histogram<f64>, HistogramError> {
        if base.dims() != self.condition_dims() {
            return Err(HistogramError::DimensionMismatch {
                actual: base.dims(),
                expected: self.condition_dims(),
            });
        }
        if base.histogram().is_empty() || self.hist.is_empty() {
            return Err(HistogramError::Empty);
        }
        let base_total = base.total_count();
        let mut out: Option<Histogram<f64>> = None;
        for (k1, _) in base.histogram().iter() {
            let mean1 = base.bin_mean(k1.as_slice())?;
            if mean1 == 0.0 {
                continue;
            }
            let unconditional = self.get_unconditional_avg(k1.as_slice())?;
            let unc_total = unconditional.total_count();
            if unc_total == 0.0 {
                continue;
            }
            let outcome_dims = unconditional.dims();
            let mut joint = Histogram::<f64>::new(0, self.condition_dims() + outcome_dims)?;
            for (k2, &w2) in unconditional.histogram().iter() {
                let mean2 = w2 / unc_total;
                if mean2 == 0.0 {
                    continue;
                }
                let mut pos = k1.as_slice().to_vec();
                pos.extend_from_slice(k2.as_slice());
                joint.insert(&pos, mean1 * mean2 * base_total)?;
            }
            out = Some(match out {
                None => joint,
                Some(acc) => Histogram::merge(&acc, &joint)?,
            });
        }
        out.ok_or(HistogramError::Empty)
    }

    /// Combines two (possibly independent) conditional distributions into
    /// one over the Cartesian product of their condition spaces: every
    /// combination of a condition cell from `a` with one from `b` becomes a
    /// condition in the result, whose outcome distribution is the merge of
    /// the two operands' outcome distributions.
    pub fn merge(
        a: &ConditionalDistributionalValue,
        b: &ConditionalDistributionalValue,
    ) -> Result<ConditionalDistributionalValue, HistogramError> {
        let dims = a.condition_dims() + b.condition_dims();
        let mut out = Histogram::<Histogram<f64>>::new(0, dims)?;
        for (pa, dva) in a.hist.iter() {
            for (pb, dvb) in b.hist.iter() {
                let mut combined_pos = pa.as_slice().to_vec();
                combined_pos.extend_from_slice(pb.as_slice());
                let combined_dv = Histogram::merge(dva, dvb)?;
                out.insert(&combined_pos, combined_dv)?;
            }
        }
        Ok(ConditionalDistributionalValue { hist: out })
    }
}

/// Helper used only by [`ConditionalDistributionalValue::get_unconditional`]:
/// a copy of an inner histogram with every cell's weight scaled by `factor`.
trait ScaledCopy {
    fn scaled_copy(&self, factor: f64) -> Result<Histogram<f64>, HistogramError>;
}

impl ScaledCopy for Histogram<f64> {
    fn scaled_copy(&self, factor: f64) -> Result<Histogram<f64>, HistogramError> {
        let mut out = self.clone();
        out.scale_assign(factor);
        Ok(out)
    }
}

/// Marginalizes a joint histogram by dropping coordinate `axis`: every cell's
/// weight is carried unchanged into a new `d - 1`-dimensional histogram at
/// its remaining coordinates, accumulating when two source cells share the
/// same remainder.
pub fn sum_joint(joint: &Histogram<f64>, axis: u32) -> Result<Histogram<f64>, HistogramError> {
    let dims = joint.dims();
    if dims < 2 || axis >= dims {
        return Err(HistogramError::DimensionMismatch { actual: axis, expected: dims });
    }
    let mut out = Histogram::<f64>::new(0, dims - 1)?;
    for (pos, &weight) in joint.iter() {
        let remainder = drop_axis(pos.as_slice(), axis as usize);
        out.insert(&remainder, weight)?;
    }
    Ok(out)
}

/// Builds a `ConditionalDistributionalValue` out of a joint distribution over
/// `condition_dims + 1` axes, the inverse of [`ConditionalDistributionalValue::get_joint_probability`]
/// for a single outcome axis. For each joint cell, the coordinate at `axis`
/// becomes the inner (outcome) position `h` and the remaining coordinates
/// become the outer (condition) position; cells with the same condition
/// accumulate into that condition's inner histogram. The inner bin at `h`
/// gets weight `mean(joint cell) / mean(marginal, remainder) · marginal.total_count()`,
/// where `marginal` is the (caller-supplied, typically `sum_joint(joint,
/// axis)`) distribution over the condition space.
///
/// Per §7's error-handling policy, a condition whose marginal bin has zero
/// mean is skipped (its joint evidence contributes nothing to the result)
/// rather than failing the whole conversion.
pub fn joint_to_cdv(
    joint: &Histogram<f64>,
    marginal: &DistributionalValue,
    axis: u32,
) -> Result<ConditionalDistributionalValue, HistogramError> {
    let dims = joint.dims();
    if dims < 2 || axis >= dims {
        return Err(HistogramError::DimensionMismatch { actual: axis, expected: dims });
    }
    if joint.is_empty() {
        return Err(HistogramError::Empty);
    }
    let condition_dims = dims - 1;
    if marginal.dims() != condition_dims {
        return Err(HistogramError::DimensionMismatch {
            actual: marginal.dims(),
            expected: condition_dims,
        });
    }
    let marginal_total = marginal.total_count();

    let mut out = ConditionalDistributionalValue::new(0, condition_dims)?;
    for (pos, &weight) in joint.iter() {
        let h = pos.as_slice()[axis as usize];
        let remainder = drop_axis(pos.as_slice(), axis as usize);
        let marginal_weight = match marginal.histogram().get(&remainder) {
            Ok(w) => *w,
            Err(HistogramError::PositionAbsent) => 0.0,
            Err(e) => return Err(e),
        };
        if marginal_weight == 0.0 {
            continue;
        }
        let inner_weight = weight * marginal_total / marginal_weight;
        out.add_evidence(&remainder, &[h], inner_weight)?;
    }
    Ok(out)
}

fn drop_axis(pos: &[f64], axis: usize) -> Vec<f64> {
    pos.iter()
        .enumerate()
        .filter(|(i, _)| *i != axis)
        .map(|(_, c)| *c)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_evidence_and_get_unconditional_at() {
        let mut cdv = ConditionalDistributionalValue::new(0, 1).unwrap();
        cdv.add_evidence(&[0.0], &[1.0], 2.0).unwrap();
        cdv.add_evidence(&[0.0], &[2.0], 3.0).unwrap();
        cdv.add_evidence(&[1.0], &[5.0], 1.0).unwrap();
        let dv = cdv.get_unconditional_at(&[0.0]).unwrap();
        assert_eq!(dv.total_count(), 5.0);
        assert_eq!(cdv.total_count(), 6.0);
    }

    #[test]
    fn avg_count_divides_by_condition_count() {
        let mut cdv = ConditionalDistributionalValue::new(0, 1).unwrap();
        cdv.add_evidence(&[0.0], &[1.0], 2.0).unwrap();
        cdv.add_evidence(&[1.0], &[1.0], 4.0).unwrap();
        assert_eq!(cdv.avg_count().unwrap(), 3.0);
    }

    #[test]
    fn get_unconditional_mixes_inner_histograms_by_condition_share() {
        let mut cdv = ConditionalDistributionalValue::new(0, 1).unwrap();
        cdv.add_evidence(&[0.0], &[1.0], 6.0).unwrap(); // condition 0.0: total 6, share 6/10
        cdv.add_evidence(&[1.0], &[5.0], 4.0).unwrap(); // condition 1.0: total 4, share 4/10
        let marginal = cdv.get_unconditional().unwrap();
        // mean(cond 0.0)=0.6, inner total 6 -> contributes 0.6*6=3.6
        // mean(cond 1.0)=0.4, inner total 4 -> contributes 0.4*4=1.6
        assert!((marginal.total_count() - 5.2).abs() < 1e-9);
    }

    #[test]
    fn sum_joint_drops_an_axis() {
        let mut joint = Histogram::<f64>::new(0, 2).unwrap();
        joint.insert(&[0.0, 1.0], 2.0).unwrap();
        joint.insert(&[1.0, 1.0], 1.0).unwrap();
        joint.insert(&[0.0, 2.0], 3.0).unwrap();
        let marginal = sum_joint(&joint, 0).unwrap();
        assert_eq!(marginal.dims(), 1);
        assert_eq!(marginal.total_count(), 6.0);
        assert_eq!(*marginal.get(&[1.0]).unwrap(), 3.0);
        assert_eq!(*marginal.get(&[2.0]).unwrap(), 3.0);
    }

    #[test]
    fn joint_to_cdv_matches_worked_example() {
        // joint over (a=0,b=1) x (x=0,y=1): (0,0):2, (0,1):1, (1,0):1, (1,1):3
        let mut joint = Histogram::<f64>::new(0, 2).unwrap();
        joint.insert(&[0.0, 0.0], 2.0).unwrap();
        joint.insert(&[0.0, 1.0], 1.0).unwrap();
        joint.insert(&[1.0, 0.0], 1.0).unwrap();
        joint.insert(&[1.0, 1.0], 3.0).unwrap();

        let marginal_hist = sum_joint(&joint, 0).unwrap();
        let marginal = DistributionalValue::from_histogram(marginal_hist);
        assert_eq!(*marginal.histogram().get(&[0.0]).unwrap(), 3.0);
        assert_eq!(*marginal.histogram().get(&[1.0]).unwrap(), 4.0);

        let cdv = joint_to_cdv(&joint, &marginal, 0).unwrap();
        let at_x = cdv.get_unconditional_at(&[0.0]).unwrap();
        assert!((*at_x.histogram().get(&[0.0]).unwrap() - 2.0 * 7.0 / 3.0).abs() < 1e-9);
        assert!((*at_x.histogram().get(&[1.0]).unwrap() - 1.0 * 7.0 / 3.0).abs() < 1e-9);

        let at_y = cdv.get_unconditional_at(&[1.0]).unwrap();
        assert!((*at_y.histogram().get(&[0.0]).unwrap() - 1.0 * 7.0 / 4.0).abs() < 1e-9);
        assert!((*at_y.histogram().get(&[1.0]).unwrap() - 3.0 * 7.0 / 4.0).abs() < 1e-9);
    }

    #[test]
    fn merge_is_a_cartesian_product_of_conditions() {
        let mut a = ConditionalDistributionalValue::new(0, 1).unwrap();
        a.add_evidence(&[0.0], &[1.0], 1.0).unwrap();
        let mut b = ConditionalDistributionalValue::new(0, 1).unwrap();
        b.add_evidence(&[9.0], &[2.0], 1.0).unwrap();
        let merged = ConditionalDistributionalValue::merge(&a, &b).unwrap();
        assert_eq!(merged.condition_dims(), 2);
        assert_eq!(merged.get_conditions().len(), 1);
        assert_eq!(*merged.get_conditions()[0].as_slice(), [0.0, 9.0]);
    }
}
