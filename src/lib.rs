// Copyright 2020 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Adaptive multi-dimensional histograms with distributional and
//! conditional distributional values.
//!
//! A [`Histogram`] is a bounded-size, mergeable, position-weighted count map
//! over ℝᵈ, generic over its cell value via [`CellValue`]. A
//! [`DistributionalValue`] wraps `Histogram<f64>` with mean/mode/variance/
//! confidence views; a [`ConditionalDistributionalValue`] wraps
//! `Histogram<Histogram<f64>>` and adds joint/conditional conversions.

mod cell_value;
mod conditional;
mod distributional;
mod error;
mod histogram;
mod interval;
mod position;

pub use cell_value::CellValue;
pub use conditional::{joint_to_cdv, sum_joint, ConditionalDistributionalValue};
pub use distributional::{conjunction, disjunction, to_conf, to_count, DistributionalValue};
pub use error::HistogramError;
pub use histogram::Histogram;
pub use interval::{conditional_probability, Interval, NBin};
pub use position::{opposite_orthant, ulp_distance, Position};

/// Confidence-to-count conversion constant used by
/// [`DistributionalValue::from_mode_confidence`] and [`to_conf`]/[`to_count`].
pub const DEFAULT_K: f64 = 800.0;

/// Hard upper bound on a histogram's dimensionality. Construction with more
/// dimensions than this fails with [`HistogramError::DimensionUnsupported`].
pub const MAX_DIMS: u32 = 31;

/// Coordinate-wise ULP tolerance used by [`Position::eq_ulp`]. Re-exported
/// here alongside the other process-wide configuration constants; see
/// [`position::ULP_TOL`] for the canonical definition.
pub const ULP_TOL: u64 = position::ULP_TOL;

/// Residual-mass cutoff for the fuzzy [`conjunction`]/[`disjunction`] walk.
pub const CONJ_EPSILON: f64 = 1e-16;
