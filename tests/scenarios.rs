// Copyright 2020 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Cross-cutting scenario tests (the worked examples from the adaptive
//! histogram design), kept separate from the per-module unit tests the way
//! `rustcommon-metrics`'s `tests/` directory holds its multi-file
//! integration coverage.

use rustcommon_distvalue::{conjunction, joint_to_cdv, sum_joint, DistributionalValue, Histogram};

/// S1: four ordinary inserts, well under capacity, come back out in sorted
/// position order with their weights untouched.
#[test]
fn s1_plain_inserts_stay_distinct_and_ordered() {
    let mut h = Histogram::<f64>::new(15, 1).unwrap();
    for x in [0.5, 0.6, 0.7, 0.8] {
        h.insert(&[x], 1.0).unwrap();
    }
    assert_eq!(h.elem_count(), 4);
    assert_eq!(h.total_count(), 4.0);
    let positions: Vec<f64> = h.iter().map(|(p, _)| p.as_slice()[0]).collect();
    assert_eq!(positions, vec![0.5, 0.6, 0.7, 0.8]);
}

/// S2: a fourth insert past capacity merges into the nearest existing cell
/// rather than being dropped or growing the tree.
#[test]
fn s2_insert_past_capacity_merges_into_nearest() {
    let mut h = Histogram::<f64>::new(3, 1).unwrap();
    h.insert(&[0.1], 1.0).unwrap();
    h.insert(&[0.5], 1.0).unwrap();
    h.insert(&[0.9], 1.0).unwrap();
    h.insert(&[0.55], 1.0).unwrap();

    assert_eq!(h.elem_count(), 3);
    assert_eq!(h.total_count(), 4.0);

    let cells: Vec<(f64, f64)> = h.iter().map(|(p, &w)| (p.as_slice()[0], w)).collect();
    assert_eq!(cells.len(), 3);
    assert_eq!(cells[0], (0.1, 1.0));
    assert!((cells[1].0 - 0.525).abs() < 1e-12);
    assert_eq!(cells[1].1, 2.0);
    assert_eq!(cells[2], (0.9, 1.0));
}

/// S4: `from_mode_confidence` inverts the confidence law exactly, and the
/// confidence computed back from the resulting histogram round-trips.
#[test]
fn s4_mode_confidence_round_trips() {
    let dv = DistributionalValue::from_mode_confidence(&[0.7], 0.5, 1).unwrap();
    assert_eq!(dv.total_count(), 800.0);
    assert!((dv.get_confidence() - 0.5).abs() < 1e-12);
    let mode = dv.get_mode().unwrap();
    assert_eq!(mode.as_slice()[0], 0.7);
}

/// S5: fuzzy conjunction's pointer walk over two distributions.
#[test]
fn s5_fuzzy_conjunction_worked_example() {
    let mut a = DistributionalValue::new(0, 1).unwrap();
    a.add_evidence(&[0.2], 3.0).unwrap();
    a.add_evidence(&[0.8], 1.0).unwrap();
    let mut b = DistributionalValue::new(0, 1).unwrap();
    b.add_evidence(&[0.3], 2.0).unwrap();
    b.add_evidence(&[0.9], 2.0).unwrap();

    let c = conjunction(&a, &b).unwrap();
    assert!((c.total_count() - 4.0).abs() < 1e-12);

    let cells: Vec<(f64, f64)> = c.histogram().iter().map(|(p, &w)| (p.as_slice()[0], w)).collect();
    assert_eq!(cells.len(), 3);
    assert!((cells[0].0 - 0.2).abs() < 1e-12 && (cells[0].1 - 3.0).abs() < 1e-12);
    assert!((cells[1].0 - 0.3).abs() < 1e-12 && (cells[1].1 - 0.5).abs() < 1e-12);
    assert!((cells[2].0 - 0.8).abs() < 1e-12 && (cells[2].1 - 0.5).abs() < 1e-12);
}

/// S6: `joint_to_cdv` scales each inner bin by `marginal.total_count() /
/// marginal(remainder)`.
#[test]
fn s6_joint_to_cdv_worked_example() {
    let mut joint = Histogram::<f64>::new(0, 2).unwrap();
    joint.insert(&[0.0, 0.0], 2.0).unwrap(); // (a,x)
    joint.insert(&[0.0, 1.0], 1.0).unwrap(); // (a,y)
    joint.insert(&[1.0, 0.0], 1.0).unwrap(); // (b,x)
    joint.insert(&[1.0, 1.0], 3.0).unwrap(); // (b,y)

    let marginal = DistributionalValue::from_histogram(sum_joint(&joint, 0).unwrap());
    assert_eq!(*marginal.histogram().get(&[0.0]).unwrap(), 3.0); // x
    assert_eq!(*marginal.histogram().get(&[1.0]).unwrap(), 4.0); // y

    let cdv = joint_to_cdv(&joint, &marginal, 0).unwrap();

    let at_x = cdv.get_unconditional_at(&[0.0]).unwrap();
    assert!((*at_x.histogram().get(&[0.0]).unwrap() - 2.0 * 7.0 / 3.0).abs() < 1e-9); // a
    assert!((*at_x.histogram().get(&[1.0]).unwrap() - 1.0 * 7.0 / 3.0).abs() < 1e-9); // b

    let at_y = cdv.get_unconditional_at(&[1.0]).unwrap();
    assert!((*at_y.histogram().get(&[0.0]).unwrap() - 1.0 * 7.0 / 4.0).abs() < 1e-9); // a
    assert!((*at_y.histogram().get(&[1.0]).unwrap() - 3.0 * 7.0 / 4.0).abs() < 1e-9); // b
}

/// Invariant 4: merge preserves total evidence across both operands.
#[test]
fn merge_preserves_total_count() {
    let mut a = Histogram::<f64>::new(0, 1).unwrap();
    a.insert(&[1.0], 2.0).unwrap();
    a.insert(&[2.0], 3.0).unwrap();
    let mut b = Histogram::<f64>::new(0, 1).unwrap();
    b.insert(&[5.0], 4.0).unwrap();

    let merged = Histogram::merge(&a, &b).unwrap();
    assert_eq!(merged.total_count(), a.total_count() + b.total_count());
}

/// Invariant 8: mirroring a distribution twice is the identity.
#[test]
fn mirror_is_an_involution() {
    let mut dv = DistributionalValue::new(0, 1).unwrap();
    dv.add_evidence(&[0.0], 1.0).unwrap();
    dv.add_evidence(&[3.0], 4.0).unwrap();
    dv.add_evidence(&[7.0], 2.0).unwrap();

    let once = dv.mirror().unwrap();
    let twice = once.mirror().unwrap();

    let orig: Vec<(f64, f64)> = dv.histogram().iter().map(|(p, &w)| (p.as_slice()[0], w)).collect();
    let back: Vec<(f64, f64)> = twice.histogram().iter().map(|(p, &w)| (p.as_slice()[0], w)).collect();
    assert_eq!(orig.len(), back.len());
    for ((op, ow), (bp, bw)) in orig.iter().zip(back.iter()) {
        assert!((op - bp).abs() < 1e-9);
        assert_eq!(ow, bw);
    }
}
