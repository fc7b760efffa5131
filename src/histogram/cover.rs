// Copyright 2020 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The alternative back-end, used when `cap` is not a legal complete
//! `2^d`-ary tree capacity or when the domain is unbounded (`cap == 0`).
//! A levelled nearest-ancestor tree where a node's children all lie within
//! `covdist(level)` of it, and a point farther than that from the current
//! root grows the root upward rather than failing to insert.

use ordered_float::OrderedFloat;

use crate::cell_value::CellValue;
use crate::error::HistogramError;
use crate::position::Position;

#[derive(Debug, Clone)]
struct CoverNode<V> {
    pos: Position,
    value: V,
    parent: Option<usize>,
    children: Vec<usize>,
    alive: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct CoverBackend<V> {
    dims: u32,
    cap: u32,
    nodes: Vec<CoverNode<V>>,
    root: Option<usize>,
    root_level: i32,
    elem_count: u32,
    total_count: f64,
    limits: Vec<Position>,
}

impl<V: CellValue> CoverBackend<V> {
    pub(crate) fn new(cap: u32, dims: u32) -> Self {
        let subs = 1usize << dims;
        CoverBackend {
            dims,
            cap,
            nodes: Vec::new(),
            root: None,
            root_level: 0,
            elem_count: 0,
            total_count: 0.0,
            limits: vec![Position::new(vec![0.0; dims as usize]); subs],
        }
    }

    pub(crate) fn dims(&self) -> u32 {
        self.dims
    }

    pub(crate) fn cap(&self) -> u32 {
        self.cap
    }

    pub(crate) fn elem_count(&self) -> u32 {
        self.elem_count
    }

    pub(crate) fn total_count(&self) -> f64 {
        self.total_count
    }

    fn check_dims(&self, pos: &Position) -> Result<(), HistogramError> {
        if pos.dims() != self.dims {
            return Err(HistogramError::DimensionMismatch {
                actual: pos.dims(),
                expected: self.dims,
            });
        }
        Ok(())
    }

    /// The radius within which every descendant of a node at `level` must
    /// lie relative to that node.
    fn covdist(level: i32) -> f64 {
        2f64.powi(level + 1)
    }

    /// The minimum separation cover-tree theory expects between siblings at
    /// `level`; kept for reference even though this implementation does not
    /// enforce separation explicitly.
    #[allow(dead_code)]
    fn sepdist(level: i32) -> f64 {
        2f64.powi(level)
    }

    fn update_limits(&mut self, pos: &Position) -> Result<(), HistogramError> {
        if self.elem_count == 0 {
            for k in 0..self.limits.len() {
                self.limits[k] = pos.clone();
            }
            return Ok(());
        }
        for k in 0..self.limits.len() {
            if self.limits[k].orthant(pos)? as usize == k + 1 {
                self.limits[k] = pos.clone();
            }
        }
        Ok(())
    }

    fn push_node(&mut self, pos: Position, value: V, parent: Option<usize>) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(CoverNode {
            pos,
            value,
            parent,
            children: Vec::new(),
            alive: true,
        });
        if let Some(p) = parent {
            self.nodes[p].children.push(idx);
        }
        self.elem_count += 1;
        idx
    }

    fn merge_into(&mut self, idx: usize, pos: Position, value: V) -> Result<(), HistogramError> {
        let node = &self.nodes[idx];
        let nc = node.value.count();
        let vc = value.count();
        let total = nc + vc;
        let new_pos = if total == 0.0 {
            node.pos.clone()
        } else {
            node.pos
                .mul_scalar(nc)
                .add(&pos.mul_scalar(vc))
                .expect("dims already validated")
                .div_scalar(total)
        };
        let new_value = node.value.clone().merged(value);
        self.nodes[idx].pos = new_pos;
        self.nodes[idx].value = new_value;
        Ok(())
    }

    fn insert_rec(&mut self, idx: usize, level: i32, pos: Position, value: V) -> Result<(), HistogramError> {
        let children = self.nodes[idx].children.clone();
        for c in children {
            if !self.nodes[c].alive {
                continue;
            }
            let d = self.nodes[c].pos.dist(&pos)?;
            if d <= Self::covdist(level - 1) {
                return self.insert_rec(c, level - 1, pos, value);
            }
        }
        if self.nodes[idx].pos.eq_ulp(&pos)? {
            return self.merge_into(idx, pos, value);
        }
        self.push_node(pos, value, Some(idx));
        Ok(())
    }

    fn collect_items(&self) -> Vec<(Position, V)> {
        self.nodes
            .iter()
            .filter(|n| n.alive)
            .map(|n| (n.pos.clone(), n.value.clone()))
            .collect()
    }

    fn reset_with(&mut self, items: Vec<(Position, V)>) -> Result<(), HistogramError> {
        self.nodes.clear();
        self.root = None;
        self.elem_count = 0;
        let mut iter = items.into_iter();
        if let Some((pos, value)) = iter.next() {
            let idx = self.push_node(pos, value, None);
            self.root = Some(idx);
        }
        for (pos, value) in iter {
            let r = self.root.expect("root was just set");
            let d = self.nodes[r].pos.dist(&pos)?;
            while Self::covdist(self.root_level) < d {
                self.root_level += 1;
            }
            self.insert_rec(r, self.root_level, pos, value)?;
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, pos: Position, value: V) -> Result<(), HistogramError> {
        self.check_dims(&pos)?;
        self.update_limits(&pos)?;
        let weight = value.count();
        match self.root {
            None => {
                let idx = self.push_node(pos, value, None);
                self.root = Some(idx);
                self.root_level = 0;
            }
            Some(r) => {
                let d = self.nodes[r].pos.dist(&pos)?;
                if d > Self::covdist(self.root_level) {
                    let mut items = self.collect_items();
                    items.push((pos, value));
                    let mut level = self.root_level;
                    // recompute a level that covers the full new spread;
                    // reset_with will grow it further per-point if needed.
                    while Self::covdist(level) < d {
                        level += 1;
                    }
                    self.root_level = level;
                    self.reset_with(items)?;
                } else {
                    self.insert_rec(r, self.root_level, pos, value)?;
                }
            }
        }
        self.total_count += weight;
        self.enforce_capacity()?;
        Ok(())
    }

    fn maxdist(&self, idx: usize) -> f64 {
        let mut max_d = 0.0f64;
        let mut stack = vec![idx];
        while let Some(i) = stack.pop() {
            for &c in &self.nodes[i].children {
                if !self.nodes[c].alive {
                    continue;
                }
                if let Ok(d) = self.nodes[idx].pos.dist(&self.nodes[c].pos) {
                    max_d = max_d.max(d);
                }
                stack.push(c);
            }
        }
        max_d
    }

    /// Finds the node nearest `pos`, pruning any subtree whose farthest
    /// possible point cannot beat the current best.
    fn find_nearest(&self, pos: &Position) -> Result<Option<usize>, HistogramError> {
        let r = match self.root {
            Some(r) => r,
            None => return Ok(None),
        };
        let mut best_idx = r;
        let mut best_dist = self.nodes[r].pos.dist(pos)?;
        let mut stack = vec![r];
        while let Some(idx) = stack.pop() {
            if !self.nodes[idx].alive {
                continue;
            }
            let d = self.nodes[idx].pos.dist(pos)?;
            if d < best_dist {
                best_dist = d;
                best_idx = idx;
            }
            for &c in &self.nodes[idx].children {
                if !self.nodes[c].alive {
                    continue;
                }
                let dc = self.nodes[c].pos.dist(pos)?;
                let maxd = self.maxdist(c);
                if dc - maxd <= best_dist {
                    stack.push(c);
                }
            }
        }
        Ok(Some(best_idx))
    }

    pub(crate) fn get(&self, pos: &Position) -> Result<&V, HistogramError> {
        self.check_dims(pos)?;
        match self.find_nearest(pos)? {
            Some(idx) if self.nodes[idx].pos.eq_ulp(pos)? => Ok(&self.nodes[idx].value),
            _ => Err(HistogramError::PositionAbsent),
        }
    }

    pub(crate) fn get_avg(&self, pos: &Position) -> Result<V, HistogramError> {
        self.check_dims(pos)?;
        if self.elem_count == 0 {
            return Err(HistogramError::Empty);
        }
        let nearest_idx = self
            .find_nearest(pos)?
            .expect("a non-empty backend always has a nearest node");
        let nearest = &self.nodes[nearest_idx];
        if nearest.pos.eq_ulp(pos)? {
            return Ok(nearest.value.clone());
        }
        let mut group = vec![nearest_idx];
        if let Some(p) = nearest.parent {
            for &sibling in &self.nodes[p].children {
                if sibling != nearest_idx && self.nodes[sibling].alive {
                    group.push(sibling);
                }
            }
        }
        for &c in &nearest.children {
            if self.nodes[c].alive {
                group.push(c);
            }
        }

        let mut total_weight = 0.0;
        let mut acc: Option<V> = None;
        for &i in &group {
            let node = &self.nodes[i];
            let d = node.pos.dist(pos)?.max(f64::EPSILON);
            let w = 1.0 / d;
            let contribution = node.value.scaled(w);
            acc = Some(match acc {
                None => contribution,
                Some(prev) => prev.merged(contribution),
            });
            total_weight += w;
        }
        Ok(acc.unwrap().scaled(1.0 / total_weight))
    }

    fn is_ancestor(&self, maybe_ancestor: usize, idx: usize) -> bool {
        let mut cur = self.nodes[idx].parent;
        while let Some(p) = cur {
            if p == maybe_ancestor {
                return true;
            }
            cur = self.nodes[p].parent;
        }
        false
    }

    fn enforce_capacity(&mut self) -> Result<(), HistogramError> {
        if self.cap == 0 {
            return Ok(());
        }
        while self.elem_count > self.cap {
            let alive: Vec<usize> = (0..self.nodes.len()).filter(|&i| self.nodes[i].alive).collect();
            // OrderedFloat lets the nearest-pair scan use a plain `BinaryHeap`-style
            // min-comparison instead of an `f64::partial_cmp().unwrap()` per pair.
            let mut best: Option<(usize, usize, OrderedFloat<f64>)> = None;
            for (ai, &a) in alive.iter().enumerate() {
                for &b in &alive[ai + 1..] {
                    if self.is_ancestor(a, b) || self.is_ancestor(b, a) {
                        continue;
                    }
                    let d = OrderedFloat(self.nodes[a].pos.dist(&self.nodes[b].pos)?);
                    if best.map(|(_, _, bd)| d < bd).unwrap_or(true) {
                        best = Some((a, b, d));
                    }
                }
            }
            let (keep, drop) = match best {
                Some((a, b, _)) => (a, b),
                None => break,
            };
            let dropped = self.nodes[drop].clone();
            self.merge_into(keep, dropped.pos, dropped.value)?;
            for c in dropped.children {
                self.nodes[c].parent = Some(keep);
                self.nodes[keep].children.push(c);
            }
            if let Some(p) = dropped.parent {
                self.nodes[p].children.retain(|&x| x != drop);
            }
            self.nodes[drop].alive = false;
            self.elem_count -= 1;
        }
        Ok(())
    }

    /// Every live node in lexicographic position order (I3). The cover-tree
    /// has no notion of in-order traversal (children aren't split by sign
    /// along a single axis), so this collects and sorts directly, the same
    /// choice [`super::tree::TreeBackend::iter`] makes.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&Position, &V)> + '_ {
        let mut items: Vec<(&Position, &V)> = self
            .nodes
            .iter()
            .filter(|n| n.alive)
            .map(|n| (&n.pos, &n.value))
            .collect();
        items.sort_by(|(a, _), (b, _)| {
            a.as_slice()
                .partial_cmp(b.as_slice())
                .expect("positions never contain NaN")
        });
        items.into_iter()
    }

    pub(crate) fn merge(a: &CoverBackend<V>, b: &CoverBackend<V>) -> Result<CoverBackend<V>, HistogramError> {
        if a.dims != b.dims {
            return Err(HistogramError::DimensionMismatch {
                actual: b.dims,
                expected: a.dims,
            });
        }
        let cap = if a.cap == 0 || b.cap == 0 { 0 } else { a.cap.max(b.cap) };
        let mut out = CoverBackend::new(cap, a.dims);
        let a_items: Vec<(Position, V)> = a.iter().map(|(p, v)| (p.clone(), v.clone())).collect();
        let b_items: Vec<(Position, V)> = b.iter().map(|(p, v)| (p.clone(), v.clone())).collect();
        let mut ai = a_items.into_iter();
        let mut bi = b_items.into_iter();
        loop {
            match (ai.next(), bi.next()) {
                (Some((p, v)), Some((p2, v2))) => {
                    out.insert(p, v)?;
                    out.insert(p2, v2)?;
                }
                (Some((p, v)), None) => out.insert(p, v)?,
                (None, Some((p, v))) => out.insert(p, v)?,
                (None, None) => break,
            }
        }
        Ok(out)
    }

    pub(crate) fn scale_assign(&mut self, factor: f64) {
        for node in self.nodes.iter_mut() {
            if node.alive {
                node.value = node.value.scaled(factor);
            }
        }
        self.total_count *= factor;
    }

    pub(crate) fn shift_assign(&mut self, delta: f64) {
        for node in self.nodes.iter_mut() {
            if node.alive {
                node.value = node.value.shifted(delta);
            }
        }
        self.total_count = self.nodes.iter().filter(|n| n.alive).map(|n| n.value.count()).sum();
    }
}

impl<V: CellValue + PartialEq> PartialEq for CoverBackend<V> {
    fn eq(&self, other: &Self) -> bool {
        if self.dims != other.dims || self.elem_count != other.elem_count {
            return false;
        }
        let a: Vec<_> = self.iter().collect();
        let b: Vec<_> = other.iter().collect();
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(coords: Vec<f64>) -> Position {
        Position::new(coords)
    }

    #[test]
    fn insert_and_get_roundtrip() {
        let mut c = CoverBackend::<f64>::new(0, 1);
        c.insert(p(vec![1.0]), 1.0).unwrap();
        c.insert(p(vec![50.0]), 2.0).unwrap();
        c.insert(p(vec![0.5]), 3.0).unwrap();
        assert_eq!(*c.get(&p(vec![50.0])).unwrap(), 2.0);
        assert_eq!(c.elem_count(), 3);
        assert_eq!(c.total_count(), 6.0);
    }

    #[test]
    fn insert_same_position_accumulates_count() {
        let mut c = CoverBackend::<f64>::new(0, 1);
        c.insert(p(vec![1.0]), 1.0).unwrap();
        c.insert(p(vec![1.0]), 4.0).unwrap();
        assert_eq!(c.elem_count(), 1);
        assert_eq!(*c.get(&p(vec![1.0])).unwrap(), 5.0);
    }

    #[test]
    fn capacity_enforcement_merges_nearest_pair() {
        let mut c = CoverBackend::<f64>::new(2, 1);
        c.insert(p(vec![1.0]), 1.0).unwrap();
        c.insert(p(vec![1.1]), 1.0).unwrap();
        c.insert(p(vec![100.0]), 1.0).unwrap();
        assert_eq!(c.elem_count(), 2);
        assert_eq!(c.total_count(), 3.0);
    }

    #[test]
    fn root_grows_to_cover_distant_points() {
        let mut c = CoverBackend::<f64>::new(0, 1);
        c.insert(p(vec![0.0]), 1.0).unwrap();
        c.insert(p(vec![1_000_000.0]), 1.0).unwrap();
        assert_eq!(c.elem_count(), 2);
        assert_eq!(*c.get(&p(vec![1_000_000.0])).unwrap(), 1.0);
    }
}
