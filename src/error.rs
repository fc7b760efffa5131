// Copyright 2020 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use thiserror::Error;

/// Possible errors returned by operations on a [`crate::Histogram`] and the
/// value types built on top of it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HistogramError {
    #[error("position has {actual} dimensions, expected {expected}")]
    /// A position (or a second histogram) did not have the number of
    /// dimensions the operation required.
    DimensionMismatch {
        /// dimensions actually provided
        actual: u32,
        /// dimensions the histogram was constructed with
        expected: u32,
    },

    #[error("{cap} is not a valid capacity for a complete 2^{dims}-ary tree")]
    /// The tree back-end was constructed with a capacity that is not
    /// `((2^d)^L - 1) / (2^d - 1)` for any level count `L >= 1`.
    CapacityMisconfigured {
        /// the capacity that was provided
        cap: u32,
        /// the dimensionality that was provided
        dims: u32,
    },

    #[error("dimension count {0} is unsupported (must be 1..=31)")]
    /// `d == 0` or `d > MAX_DIMS`.
    DimensionUnsupported(u32),

    /// `get` was called with a position that is not stored in the
    /// histogram.
    #[error("position is not present in the histogram")]
    PositionAbsent,

    /// An operation that requires at least one populated cell was called on
    /// an empty histogram.
    #[error("histogram has no populated cells")]
    Empty,

    /// `joint_to_cdv` encountered a marginal bin whose mean is zero, so the
    /// ratio that would produce the conditional count is undefined. The
    /// caller skips that cell and continues; this variant documents why.
    #[error("undefined ratio: marginal bin at {0:?} has zero mean")]
    UndefinedRatio(Vec<f64>),
}
