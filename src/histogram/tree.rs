// Copyright 2020 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The primary back-end: a balanced `2^d`-ary tree stored flat in a
//! fixed-size array, indexed the way a binary heap indexes a binary tree but
//! generalized to `2^d` children per node. Rotations are a collect-and-reinsert
//! pass over the affected subtree rather than in-place pointer surgery: a
//! rotation always yields a structurally valid subtree, at the cost of
//! `O(subtree size)` instead of `O(1)` per rotation.

use crate::cell_value::CellValue;
use crate::error::HistogramError;
use crate::position::Position;

#[derive(Debug, Clone)]
struct TreeNode<V> {
    pos: Position,
    value: V,
}

/// The `2^d`-ary tree back-end. A slot's absence (`None`) means the cell is
/// unoccupied; a present slot always carries a strictly positive count (I2).
#[derive(Debug, Clone)]
pub(crate) struct TreeBackend<V> {
    dims: u32,
    subs: usize,
    cap: u32,
    nodes: Vec<Option<TreeNode<V>>>,
    elem_count: u32,
    total_count: f64,
    limits: Vec<Position>,
}

/// Returns the number of levels `L >= 1` for which
/// `cap == ((2^dims)^L - 1) / (2^dims - 1)`, or `None` if `cap` is not a
/// legal complete `2^dims`-ary tree capacity.
pub(crate) fn capacity_levels(cap: u32, dims: u32) -> Option<u32> {
    if cap == 0 {
        return None;
    }
    let subs = 1u64 << dims;
    let mut total: u64 = 0;
    let mut level_size: u64 = 1;
    let mut level = 0u32;
    loop {
        total += level_size;
        level += 1;
        if total == cap as u64 {
            return Some(level);
        }
        if total > cap as u64 {
            return None;
        }
        level_size = match level_size.checked_mul(subs) {
            Some(v) => v,
            None => return None,
        };
    }
}

impl<V: CellValue> TreeBackend<V> {
    pub(crate) fn new(cap: u32, dims: u32) -> Result<Self, HistogramError> {
        if capacity_levels(cap, dims).is_none() {
            return Err(HistogramError::CapacityMisconfigured { cap, dims });
        }
        let subs = 1usize << dims;
        Ok(TreeBackend {
            dims,
            subs,
            cap,
            nodes: vec![None; cap as usize],
            elem_count: 0,
            total_count: 0.0,
            limits: vec![Position::new(vec![0.0; dims as usize]); subs],
        })
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

    fn parent(&self, idx: usize) -> usize {
        debug_assert!(idx != 0, "root has no parent");
        (idx - 1) / self.subs
    }

    fn child(&self, idx: usize, dir: usize) -> usize {
        debug_assert!((1..=self.subs).contains(&dir));
        idx * self.subs + dir
    }

    fn get_dir(&self, parent_idx: usize, child_idx: usize) -> usize {
        child_idx - parent_idx * self.subs
    }

    fn opposite_dir(&self, dir: usize) -> usize {
        crate::position::opposite_orthant(dir as u32, self.dims) as usize
    }

    fn height(&self, idx: usize) -> u32 {
        if idx >= self.nodes.len() || self.nodes[idx].is_none() {
            return 0;
        }
        let mut max = 0;
        for dir in 1..=self.subs {
            let c = self.child(idx, dir);
            if c < self.nodes.len() {
                max = max.max(self.height(c));
            }
        }
        1 + max
    }

    /// The direction of the tallest child subtree, and its height.
    fn tallest_child(&self, idx: usize) -> Option<(usize, u32)> {
        let mut best: Option<(usize, u32)> = None;
        for dir in 1..=self.subs {
            let c = self.child(idx, dir);
            if c >= self.nodes.len() {
                continue;
            }
            let h = self.height(c);
            if h > 0 && best.map(|(_, bh)| h > bh).unwrap_or(true) {
                best = Some((dir, h));
            }
        }
        best
    }

    /// Removes every node in the subtree rooted at `idx`, tagging each with
    /// its original array index so the caller can tell them apart again.
    fn collect_and_clear(&mut self, idx: usize, out: &mut Vec<(usize, Position, V)>) {
        if idx >= self.nodes.len() {
            return;
        }
        if let Some(node) = self.nodes[idx].take() {
            out.push((idx, node.pos, node.value));
            for dir in 1..=self.subs {
                self.collect_and_clear(self.child(idx, dir), out);
            }
        }
    }

    /// Inserts `items` into the (empty) subtree rooted at `root` using plain
    /// orthant-routed descent, with no rebalancing or ULP-merge: used only
    /// to redistribute a set of already-distinct positions after `root` has
    /// just been vacated or had its payload replaced.
    fn fill_subtree(&mut self, root: usize, items: Vec<(Position, V)>) {
        for (pos, value) in items {
            self.place_in_subtree(root, pos, value);
        }
    }

    fn place_in_subtree(&mut self, root: usize, pos: Position, value: V) {
        let mut i = root;
        loop {
            if i >= self.nodes.len() {
                return;
            }
            match self.nodes[i].take() {
                None => {
                    self.nodes[i] = Some(TreeNode { pos, value });
                    return;
                }
                Some(node) => {
                    let dir = node.pos.orthant(&pos).expect("dims already validated") as usize;
                    let next = self.child(i, dir);
                    self.nodes[i] = Some(node);
                    i = next;
                }
            }
        }
    }

    /// Rotates the subtree at `idx` so that its tallest child's payload
    /// becomes the new local root, with every other node in the subtree
    /// (including `idx`'s old payload) re-dropped through ordinary
    /// orthant-routed descent under the new root.
    fn rotate_up(&mut self, idx: usize) {
        let (dir, _) = match self.tallest_child(idx) {
            Some(v) => v,
            None => return,
        };
        let child_idx = self.child(idx, dir);
        if child_idx >= self.nodes.len() {
            return;
        }
        let mut items = Vec::new();
        self.collect_and_clear(idx, &mut items);
        let promote_at = items.iter().position(|(orig, _, _)| *orig == child_idx);
        let promote_at = match promote_at {
            Some(p) => p,
            None => {
                // nothing occupied `child_idx`; restore as found.
                let rest = items.into_iter().map(|(_, p, v)| (p, v)).collect();
                self.fill_subtree(idx, rest);
                return;
            }
        };
        let (_, root_pos, root_val) = items.remove(promote_at);
        self.nodes[idx] = Some(TreeNode {
            pos: root_pos,
            value: root_val,
        });
        let rest: Vec<(Position, V)> = items.into_iter().map(|(_, p, v)| (p, v)).collect();
        self.fill_subtree(idx, rest);
    }

    /// Rebalances the path from `idx` up to the root, rotating a child up
    /// whenever its subtree is more than one level taller than its sibling
    /// subtrees.
    fn rebalance(&mut self, mut idx: usize) {
        loop {
            if let Some((dir, h)) = self.tallest_child(idx) {
                let mut max_other = 0;
                for d in 1..=self.subs {
                    if d == dir {
                        continue;
                    }
                    let c = self.child(idx, d);
                    if c < self.nodes.len() {
                        max_other = max_other.max(self.height(c));
                    }
                }
                if h > max_other + 1 {
                    self.rotate_up(idx);
                }
            }
            if idx == 0 {
                return;
            }
            idx = self.parent(idx);
        }
    }

    /// Makes room at `child(p, dir)` by rotating the subtree rooted at `p`
    /// so that its occupant moves out of the way, walking up toward the
    /// root if one rotation isn't enough.
    fn make_space(&mut self, p: usize, dir: usize) {
        let mut cur = p;
        loop {
            let target = self.child(cur, dir);
            if target >= self.nodes.len() || self.nodes[target].is_none() {
                return;
            }
            self.rotate_up(cur);
            let target = self.child(cur, dir);
            if target >= self.nodes.len() || self.nodes[target].is_none() {
                return;
            }
            if cur == 0 {
                return;
            }
            cur = self.parent(cur);
        }
    }

    fn update_limits(&mut self, pos: &Position) -> Result<(), HistogramError> {
        if self.elem_count == 0 {
            for k in 0..self.subs {
                self.limits[k] = pos.clone();
            }
            return Ok(());
        }
        for k in 0..self.subs {
            if self.limits[k].orthant(pos)? as usize == k + 1 {
                self.limits[k] = pos.clone();
            }
        }
        Ok(())
    }

    fn merge_node_at(&mut self, idx: usize, pos: Position, value: V) -> Result<(), HistogramError> {
        let node = self.nodes[idx].take().expect("merge target must be occupied");
        let nc = node.value.count();
        let vc = value.count();
        let total = nc + vc;
        let new_pos = if total == 0.0 {
            node.pos
        } else {
            node.pos
                .mul_scalar(nc)
                .add(&pos.mul_scalar(vc))
                .expect("dims already validated")
                .div_scalar(total)
        };
        let new_value = node.value.merged(value);
        self.nodes[idx] = Some(TreeNode {
            pos: new_pos,
            value: new_value,
        });
        Ok(())
    }

    fn insert_fill(&mut self, pos: Position, value: V) -> Result<(), HistogramError> {
        let mut i: usize = 0;
        let mut min_dist = f64::INFINITY;
        let mut min_idx: Option<usize> = None;
        loop {
            if i >= self.cap as usize {
                break;
            }
            match self.nodes[i].take() {
                None => {
                    self.nodes[i] = Some(TreeNode { pos, value });
                    self.elem_count += 1;
                    if i != 0 {
                        let parent = self.parent(i);
                        self.rebalance(parent);
                    }
                    return Ok(());
                }
                Some(node) => {
                    if node.pos.eq_ulp(&pos)? {
                        let merged = node.value.merged(value);
                        self.nodes[i] = Some(TreeNode { pos: node.pos, value: merged });
                        return Ok(());
                    }
                    let d = node.pos.dist(&pos)?;
                    if d < min_dist {
                        min_dist = d;
                        min_idx = Some(i);
                    }
                    let dir = node.pos.orthant(&pos)? as usize;
                    let next = self.child(i, dir);
                    self.nodes[i] = Some(node);
                    i = next;
                }
            }
        }

        let idx = self.parent(i);
        if idx != 0 {
            let p = self.parent(idx);
            let idx_pos = self.nodes[idx]
                .as_ref()
                .expect("descent only passes through occupied slots")
                .pos
                .clone();
            let dir_idx = idx_pos.orthant(&pos)?;
            let dir_parent = self.nodes[p]
                .as_ref()
                .expect("descent only passes through occupied slots")
                .pos
                .orthant(&idx_pos)?;
            if dir_idx == dir_parent {
                let dir = self.get_dir(p, idx);
                self.make_space(p, dir);
                if self.nodes[idx].is_none() {
                    self.nodes[idx] = Some(TreeNode { pos, value });
                    self.elem_count += 1;
                    return Ok(());
                }
            }
        }
        let min_idx = min_idx.expect("fill descent always tracks a nearest occupied node");
        self.merge_node_at(min_idx, pos, value)
    }

    fn insert_merge(&mut self, pos: Position, value: V) -> Result<(), HistogramError> {
        let mut i: usize = 0;
        let mut min_dist = f64::INFINITY;
        let mut min_idx: usize = 0;
        loop {
            let node = self.nodes[i]
                .as_ref()
                .expect("a full tree has no empty slots along any descent");
            if node.pos.eq_ulp(&pos)? {
                return self.merge_node_at(i, pos, value);
            }
            let d = node.pos.dist(&pos)?;
            if d < min_dist {
                min_dist = d;
                min_idx = i;
            }
            let dir = node.pos.orthant(&pos)? as usize;
            let child_i = self.child(i, dir);
            if child_i >= self.cap as usize || self.nodes[child_i].is_none() {
                return self.merge_node_at(min_idx, pos, value);
            }
            i = child_i;
        }
    }

    pub(crate) fn insert(&mut self, pos: Position, value: V) -> Result<(), HistogramError> {
        self.check_dims(&pos)?;
        let weight = value.count();
        self.update_limits(&pos)?;
        if self.elem_count < self.cap {
            self.insert_fill(pos, value)?;
        } else {
            self.insert_merge(pos, value)?;
        }
        self.total_count += weight;
        Ok(())
    }

    fn find(&self, pos: &Position) -> Result<Option<usize>, HistogramError> {
        let mut i = 0usize;
        loop {
            if i >= self.nodes.len() {
                return Ok(None);
            }
            match &self.nodes[i] {
                None => return Ok(None),
                Some(node) => {
                    if node.pos.eq_ulp(pos)? {
                        return Ok(Some(i));
                    }
                    let dir = node.pos.orthant(pos)? as usize;
                    i = self.child(i, dir);
                }
            }
        }
    }

    pub(crate) fn get(&self, pos: &Position) -> Result<&V, HistogramError> {
        self.check_dims(pos)?;
        match self.find(pos)? {
            Some(i) => Ok(&self.nodes[i].as_ref().unwrap().value),
            None => Err(HistogramError::PositionAbsent),
        }
    }

    fn nearest(&self, pos: &Position) -> Result<usize, HistogramError> {
        let mut best: Option<(usize, f64)> = None;
        for i in 0..self.nodes.len() {
            if let Some(node) = &self.nodes[i] {
                let d = node.pos.dist(pos)?;
                if best.map(|(_, bd)| d < bd).unwrap_or(true) {
                    best = Some((i, d));
                }
            }
        }
        best.map(|(i, _)| i).ok_or(HistogramError::Empty)
    }

    /// Returns the inverse-distance weighted average of the cell nearest
    /// `pos` and its nearest neighbor in each of the other `2^d - 1`
    /// directions.
    pub(crate) fn get_avg(&self, pos: &Position) -> Result<V, HistogramError> {
        self.check_dims(pos)?;
        if self.elem_count == 0 {
            return Err(HistogramError::Empty);
        }
        let nearest_idx = self.nearest(pos)?;
        let nearest = self.nodes[nearest_idx].as_ref().unwrap();
        if nearest.pos.eq_ulp(pos)? {
            return Ok(nearest.value.clone());
        }
        let nearest_pos = nearest.pos.clone();

        let mut visited = vec![nearest_idx];
        let mut candidates: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| self.nodes[i].is_some() && i != nearest_idx)
            .collect();
        for dir in 1..=self.subs {
            let best = candidates
                .iter()
                .copied()
                .filter(|&i| {
                    let n = self.nodes[i].as_ref().unwrap();
                    nearest_pos.orthant(&n.pos).map(|o| o as usize) == Ok(dir)
                })
                .min_by(|&a, &b| {
                    let da = self.nodes[a].as_ref().unwrap().pos.dist(pos).unwrap_or(f64::INFINITY);
                    let db = self.nodes[b].as_ref().unwrap().pos.dist(pos).unwrap_or(f64::INFINITY);
                    da.partial_cmp(&db).unwrap()
                });
            if let Some(i) = best {
                visited.push(i);
                candidates.retain(|&c| c != i);
            }
        }

        let mut total_weight = 0.0;
        let mut acc: Option<V> = None;
        for &i in &visited {
            let node = self.nodes[i].as_ref().unwrap();
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

    /// Every populated cell in lexicographic position order. Rotations keep
    /// moving cells between array slots, so there is no fixed "in-order"
    /// walk of the array that stays correct across rebalances for `d > 1`
    /// (a node's own coordinates don't sit between its children's on every
    /// axis at once); collecting and sorting is the simple thing that is
    /// always right (I3), and restarting it per call tolerates rebalancing
    /// having happened before a traversal begins.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&Position, &V)> + '_ {
        let mut items: Vec<(&Position, &V)> = self
            .nodes
            .iter()
            .flatten()
            .map(|node| (&node.pos, &node.value))
            .collect();
        items.sort_by(|(a, _), (b, _)| {
            a.as_slice()
                .partial_cmp(b.as_slice())
                .expect("positions never contain NaN")
        });
        items.into_iter()
    }

    pub(crate) fn merge(a: &TreeBackend<V>, b: &TreeBackend<V>) -> Result<TreeBackend<V>, HistogramError> {
        if a.dims != b.dims {
            return Err(HistogramError::DimensionMismatch {
                actual: b.dims,
                expected: a.dims,
            });
        }
        let cap = a.cap.max(b.cap);
        let mut out = TreeBackend::new(cap, a.dims)?;
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
        for slot in self.nodes.iter_mut() {
            if let Some(node) = slot {
                node.value = node.value.scaled(factor);
            }
        }
        self.total_count *= factor;
    }

    pub(crate) fn shift_assign(&mut self, delta: f64) {
        for slot in self.nodes.iter_mut() {
            if let Some(node) = slot {
                node.value = node.value.shifted(delta);
            }
        }
        self.total_count = self.nodes.iter().flatten().map(|n| n.value.count()).sum();
    }
}

impl<V: CellValue + PartialEq> PartialEq for TreeBackend<V> {
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
impl<V: CellValue> TreeBackend<V> {
    fn limits(&self) -> &[Position] {
        &self.limits
    }
}
