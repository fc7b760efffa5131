// Copyright 2020 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! `Histogram<V>`: a bounded-capacity map from positions in ℝᵈ to values,
//! backed by whichever of the two back-ends fits the requested capacity.
//! Dispatch between them happens once, at construction: [`tree`] is used
//! when `cap` is a legal complete `2^d`-ary tree capacity, [`cover`]
//! otherwise (including `cap == 0`, meaning unbounded).

pub(crate) mod cover;
pub(crate) mod tree;

use std::fmt;

use crate::cell_value::CellValue;
use crate::error::HistogramError;
use crate::interval::{bins_from_axis_values, conditional_probability};
use crate::position::Position;

use cover::CoverBackend;
use tree::TreeBackend;

#[derive(Debug, Clone)]
enum Backend<V> {
    Tree(TreeBackend<V>),
    Cover(CoverBackend<V>),
}

/// A bounded-capacity histogram over ℝᵈ: a set of at most `cap` weighted
/// cells, each at a distinct (ULP-approximate) position, supporting
/// nearest-neighbor query, weighted merge, and remapping onto a new grid.
#[derive(Debug, Clone)]
pub struct Histogram<V> {
    backend: Backend<V>,
}

impl<V: CellValue> Histogram<V> {
    /// Builds an empty histogram over `dims` dimensions with room for at
    /// most `cap` cells. If `cap` is a legal complete `2^dims`-ary tree
    /// capacity the tree back-end is used; otherwise (including `cap == 0`,
    /// meaning unbounded) the cover-tree back-end is used. `dims` must be in
    /// `1..=31`.
    pub fn new(cap: u32, dims: u32) -> Result<Self, HistogramError> {
        if dims == 0 || dims > crate::MAX_DIMS {
            return Err(HistogramError::DimensionUnsupported(dims));
        }
        let backend = if cap != 0 && tree::capacity_levels(cap, dims).is_some() {
            Backend::Tree(TreeBackend::new(cap, dims)?)
        } else {
            Backend::Cover(CoverBackend::new(cap, dims))
        };
        Ok(Histogram { backend })
    }

    pub fn dims(&self) -> u32 {
        match &self.backend {
            Backend::Tree(t) => t.dims(),
            Backend::Cover(c) => c.dims(),
        }
    }

    pub fn cap(&self) -> u32 {
        match &self.backend {
            Backend::Tree(t) => t.cap(),
            Backend::Cover(c) => c.cap(),
        }
    }

    pub fn elem_count(&self) -> u32 {
        match &self.backend {
            Backend::Tree(t) => t.elem_count(),
            Backend::Cover(c) => c.elem_count(),
        }
    }

    pub fn total_count(&self) -> f64 {
        match &self.backend {
            Backend::Tree(t) => t.total_count(),
            Backend::Cover(c) => c.total_count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.elem_count() == 0
    }

    /// Inserts `value` at `pos`. If the histogram is at capacity, `value`
    /// is merged into its nearest existing cell instead of being stored as
    /// a new one (I3: total count is always preserved).
    pub fn insert(&mut self, pos: &[f64], value: V) -> Result<(), HistogramError> {
        let pos = Position::new(pos.to_vec());
        match &mut self.backend {
            Backend::Tree(t) => t.insert(pos, value),
            Backend::Cover(c) => c.insert(pos, value),
        }
    }

    /// Looks up the value stored at `pos` exactly (within ULP tolerance).
    pub fn get(&self, pos: &[f64]) -> Result<&V, HistogramError> {
        let pos = Position::new(pos.to_vec());
        match &self.backend {
            Backend::Tree(t) => t.get(&pos),
            Backend::Cover(c) => c.get(&pos),
        }
    }

    /// Returns the inverse-distance weighted average of the cell(s) nearest
    /// `pos`: the exact value if `pos` is stored, otherwise a blend of the
    /// nearest cell and one neighbor per remaining direction.
    pub fn get_avg(&self, pos: &[f64]) -> Result<V, HistogramError> {
        let pos = Position::new(pos.to_vec());
        match &self.backend {
            Backend::Tree(t) => t.get_avg(&pos),
            Backend::Cover(c) => c.get_avg(&pos),
        }
    }

    /// Iterates over every populated cell in position order.
    pub fn iter(&self) -> impl Iterator<Item = (&Position, &V)> + '_ {
        match &self.backend {
            Backend::Tree(t) => t.iter().collect::<Vec<_>>().into_iter(),
            Backend::Cover(c) => c.iter().collect::<Vec<_>>().into_iter(),
        }
    }

    /// Builds a new histogram holding every cell of both `a` and `b`,
    /// inserted in alternation so that neither operand's ordering biases
    /// which cells survive capacity merges. The result's capacity is the
    /// larger of the two operands'.
    pub fn merge(a: &Histogram<V>, b: &Histogram<V>) -> Result<Histogram<V>, HistogramError> {
        match (&a.backend, &b.backend) {
            (Backend::Tree(ta), Backend::Tree(tb)) => Ok(Histogram {
                backend: Backend::Tree(TreeBackend::merge(ta, tb)?),
            }),
            (Backend::Cover(ca), Backend::Cover(cb)) => Ok(Histogram {
                backend: Backend::Cover(CoverBackend::merge(ca, cb)?),
            }),
            _ => {
                // mixed back-ends: reinsert both through a fresh cover-tree
                // (unbounded unless both caps agree) rather than forcing one
                // operand's structural bound onto the other's cells.
                if a.dims() != b.dims() {
                    return Err(HistogramError::DimensionMismatch {
                        actual: b.dims(),
                        expected: a.dims(),
                    });
                }
                let cap = if a.cap() == b.cap() { a.cap() } else { 0 };
                let mut out = Histogram::new(cap, a.dims())?;
                let mut ai = a.iter();
                let mut bi = b.iter();
                loop {
                    match (ai.next(), bi.next()) {
                        (Some((p, v)), Some((p2, v2))) => {
                            out.insert(p.as_slice(), v.clone())?;
                            out.insert(p2.as_slice(), v2.clone())?;
                        }
                        (Some((p, v)), None) => out.insert(p.as_slice(), v.clone())?,
                        (None, Some((p, v))) => out.insert(p.as_slice(), v.clone())?,
                        (None, None) => break,
                    }
                }
                Ok(out)
            }
        }
    }

    /// Redistributes this histogram's weight onto `new_positions`: each
    /// source cell's count is split across every target position in
    /// proportion to the axis-aligned overlap between the source cell's
    /// implicit bin (the region of each axis closer to it than to any other
    /// distinct source value, per [`bins_from_axis_values`]) and the
    /// target's implicit bin built the same way from `new_positions`. Total
    /// count is preserved as long as `new_positions` spans at least the
    /// range spanned by this histogram's cells.
    pub fn remap(&self, new_positions: &[Position]) -> Result<Histogram<V>, HistogramError> {
        let dims = self.dims();
        if new_positions.is_empty() {
            return Err(HistogramError::Empty);
        }
        for np in new_positions {
            if np.dims() != dims {
                return Err(HistogramError::DimensionMismatch {
                    actual: np.dims(),
                    expected: dims,
                });
            }
        }

        let source: Vec<(Position, V)> = self.iter().map(|(p, v)| (p.clone(), v.clone())).collect();
        if source.is_empty() {
            return Err(HistogramError::Empty);
        }

        let source_bins = bins_per_axis(source.iter().map(|(p, _)| p), dims);
        let target_bins = bins_per_axis(new_positions.iter(), dims);

        let source_nbins: Vec<Vec<_>> = source
            .iter()
            .map(|(p, _)| nbin_for(p, &source_bins))
            .collect();
        let target_nbins: Vec<Vec<_>> = new_positions.iter().map(|p| nbin_for(p, &target_bins)).collect();

        let mut out = Histogram::new(0, dims)?;
        for (i, (_, value)) in source.iter().enumerate() {
            let weight = value.count();
            if weight == 0.0 {
                continue;
            }
            for (j, target_pos) in new_positions.iter().enumerate() {
                let frac = conditional_probability(&source_nbins[i], &target_nbins[j])?;
                if frac <= 0.0 {
                    continue;
                }
                out.insert(target_pos.as_slice(), value.scaled(frac))?;
            }
        }
        Ok(out)
    }
}

fn bins_per_axis<'a>(
    positions: impl Iterator<Item = &'a Position>,
    dims: u32,
) -> Vec<Vec<crate::interval::Interval>> {
    let mut per_axis: Vec<Vec<f64>> = vec![Vec::new(); dims as usize];
    for p in positions {
        for (axis, v) in p.as_slice().iter().enumerate() {
            per_axis[axis].push(*v);
        }
    }
    per_axis
        .into_iter()
        .map(|mut values| {
            values.sort_by(|a, b| a.partial_cmp(b).unwrap());
            values.dedup();
            bins_from_axis_values(&values)
        })
        .collect()
}

fn nbin_for(pos: &Position, axis_bins: &[Vec<crate::interval::Interval>]) -> Vec<crate::interval::Interval> {
    pos.as_slice()
        .iter()
        .enumerate()
        .map(|(axis, v)| {
            axis_bins[axis]
                .iter()
                .find(|b| *v >= b.lower && *v <= b.upper)
                .copied()
                .unwrap_or(crate::interval::Interval::new(*v, *v))
        })
        .collect()
}

impl<V: CellValue> Histogram<V> {
    /// Adds `other`'s cells into a copy of `self` (I3: `+=` delegates to
    /// [`Histogram::merge`]).
    pub fn merge_assign(&mut self, other: &Histogram<V>) -> Result<(), HistogramError> {
        *self = Histogram::merge(self, other)?;
        Ok(())
    }

    /// Multiplies every cell's weight by `factor`.
    pub fn scale_assign(&mut self, factor: f64) {
        match &mut self.backend {
            Backend::Tree(t) => t.scale_assign(factor),
            Backend::Cover(c) => c.scale_assign(factor),
        }
    }

    /// Adds `delta` to every cell's weight.
    pub fn shift_assign(&mut self, delta: f64) {
        match &mut self.backend {
            Backend::Tree(t) => t.shift_assign(delta),
            Backend::Cover(c) => c.shift_assign(delta),
        }
    }
}

impl<V: CellValue + PartialEq> PartialEq for Histogram<V> {
    fn eq(&self, other: &Self) -> bool {
        match (&self.backend, &other.backend) {
            (Backend::Tree(a), Backend::Tree(b)) => a == b,
            (Backend::Cover(a), Backend::Cover(b)) => a == b,
            _ => {
                if self.dims() != other.dims() || self.elem_count() != other.elem_count() {
                    return false;
                }
                let a: Vec<_> = self.iter().collect();
                let b: Vec<_> = other.iter().collect();
                a == b
            }
        }
    }
}

impl<V: CellValue + fmt::Debug> fmt::Display for Histogram<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Histogram(dims={}, cap={}, elems={}, total={}) {{", self.dims(), self.cap(), self.elem_count(), self.total_count())?;
        for (i, (pos, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} -> {:?}", pos, value)?;
        }
        write!(f, "}}")
    }
}

/// Lets `Histogram<f64>` itself serve as a cell value, so that
/// `Histogram<Histogram<f64>>` represents a joint or conditional
/// distribution (I8).
impl CellValue for Histogram<f64> {
    fn count(&self) -> f64 {
        self.total_count()
    }

    fn scaled(&self, factor: f64) -> Self {
        let mut out = self.clone();
        out.scale_assign(factor);
        out
    }

    fn shifted(&self, delta: f64) -> Self {
        let mut out = self.clone();
        out.shift_assign(delta);
        out
    }

    fn merged(self, other: Self) -> Self {
        Histogram::merge(&self, &other).expect("nested histograms share dimensionality by construction")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_picks_tree_backend_for_legal_capacity() {
        let h = Histogram::<f64>::new(7, 1).unwrap();
        assert!(matches!(h.backend, Backend::Tree(_)));
    }

    #[test]
    fn new_picks_cover_backend_for_illegal_capacity() {
        let h = Histogram::<f64>::new(10, 1).unwrap();
        assert!(matches!(h.backend, Backend::Cover(_)));
    }

    #[test]
    fn new_picks_cover_backend_for_unbounded() {
        let h = Histogram::<f64>::new(0, 1).unwrap();
        assert!(matches!(h.backend, Backend::Cover(_)));
    }

    #[test]
    fn new_rejects_bad_dims() {
        assert!(Histogram::<f64>::new(7, 0).is_err());
        assert!(Histogram::<f64>::new(7, 32).is_err());
    }

    #[test]
    fn insert_and_get() {
        let mut h = Histogram::<f64>::new(7, 1).unwrap();
        h.insert(&[1.0], 2.0).unwrap();
        h.insert(&[2.0], 3.0).unwrap();
        assert_eq!(*h.get(&[2.0]).unwrap(), 3.0);
        assert_eq!(h.total_count(), 5.0);
    }

    #[test]
    fn merge_of_tree_backends_preserves_total_count() {
        let mut a = Histogram::<f64>::new(3, 1).unwrap();
        a.insert(&[1.0], 1.0).unwrap();
        let mut b = Histogram::<f64>::new(3, 1).unwrap();
        b.insert(&[2.0], 2.0).unwrap();
        let merged = Histogram::merge(&a, &b).unwrap();
        assert_eq!(merged.total_count(), 3.0);
    }

    #[test]
    fn remap_preserves_total_count_within_spanned_range() {
        let mut h = Histogram::<f64>::new(3, 1).unwrap();
        h.insert(&[0.0], 1.0).unwrap();
        h.insert(&[1.0], 1.0).unwrap();
        h.insert(&[2.0], 1.0).unwrap();
        let targets = vec![Position::new(vec![0.0]), Position::new(vec![1.0]), Position::new(vec![2.0])];
        let remapped = h.remap(&targets).unwrap();
        assert!((remapped.total_count() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn nested_histogram_cell_value_merges_by_histogram_merge() {
        let mut inner_a = Histogram::<f64>::new(3, 1).unwrap();
        inner_a.insert(&[1.0], 2.0).unwrap();
        let mut inner_b = Histogram::<f64>::new(3, 1).unwrap();
        inner_b.insert(&[1.0], 3.0).unwrap();
        let merged = CellValue::merged(inner_a, inner_b);
        assert_eq!(merged.total_count(), 5.0);
    }
}
