//! Arena-backed search tree with a uniform-grid nearest-neighbour index.

use crate::geometry::Point3;
use crate::steering::is_angled_towards;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Stable handle to a node in one [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RrtNode {
    pub position: Point3,
    /// Unit heading.
    pub heading: Point3,
    pub time_s: f64,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// A curvature-constrained chain was attached here.
    pub pinned: bool,
}

impl RrtNode {
    pub fn new(position: Point3, heading: Point3, time_s: f64) -> Self {
        Self {
            position,
            heading: heading.unit(),
            time_s,
            parent: None,
            children: Vec::new(),
            pinned: false,
        }
    }

    pub fn distance(&self, other: &RrtNode) -> f64 {
        self.position.distance(&other.position)
    }

    pub fn is_angled_towards(&self, target: &Point3, tolerance_rad: f64) -> bool {
        is_angled_towards(&self.position, &self.heading, target, tolerance_rad)
    }
}

#[derive(Debug, Clone, Copy)]
struct FloatOrd(f64);

impl PartialEq for FloatOrd {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for FloatOrd {}

impl PartialOrd for FloatOrd {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatOrd {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone)]
struct GridIndex {
    cell_size_m: f64,
    cells: HashMap<(i64, i64), Vec<NodeId>>,
    min_cell: (i64, i64),
    max_cell: (i64, i64),
}

impl GridIndex {
    fn new(cell_size_m: f64) -> Self {
        Self {
            cell_size_m: cell_size_m.max(1.0),
            cells: HashMap::new(),
            min_cell: (i64::MAX, i64::MAX),
            max_cell: (i64::MIN, i64::MIN),
        }
    }

    fn cell_of(&self, point: &Point3) -> (i64, i64) {
        let inv_cell = 1.0 / self.cell_size_m;
        (
            (point.x * inv_cell).floor() as i64,
            (point.y * inv_cell).floor() as i64,
        )
    }

    fn insert(&mut self, id: NodeId, point: &Point3) {
        let cell = self.cell_of(point);
        self.min_cell = (self.min_cell.0.min(cell.0), self.min_cell.1.min(cell.1));
        self.max_cell = (self.max_cell.0.max(cell.0), self.max_cell.1.max(cell.1));
        self.cells.entry(cell).or_default().push(id);
    }

    /// Largest ring around `center` that still touches an occupied cell.
    fn max_ring(&self, center: (i64, i64)) -> i64 {
        [
            center.0 - self.min_cell.0,
            self.max_cell.0 - center.0,
            center.1 - self.min_cell.1,
            self.max_cell.1 - center.1,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
        .max(0)
    }

    /// Cells exactly `ring` steps away from `center` (Chebyshev distance).
    fn ring_cells(center: (i64, i64), ring: i64) -> Vec<(i64, i64)> {
        let (cx, cy) = center;
        if ring == 0 {
            return vec![center];
        }
        let mut cells = Vec::with_capacity((8 * ring) as usize);
        for dx in -ring..=ring {
            cells.push((cx + dx, cy - ring));
            cells.push((cx + dx, cy + ring));
        }
        for dy in (-ring + 1)..ring {
            cells.push((cx - ring, cy + dy));
            cells.push((cx + ring, cy + dy));
        }
        cells
    }
}

/// Flattened view of a tree for diagnostic dumps.
#[derive(Debug, Clone, Serialize)]
pub struct TreeSnapshot {
    pub nodes: Vec<RrtNode>,
}

#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<RrtNode>,
    index: GridIndex,
}

impl Tree {
    /// Starts a tree at `root`; `cell_size_m` sizes the neighbour grid.
    pub fn new(mut root: RrtNode, cell_size_m: f64) -> Self {
        root.parent = None;
        root.children.clear();
        let mut index = GridIndex::new(cell_size_m);
        index.insert(NodeId(0), &root.position);
        Self {
            nodes: vec![root],
            index,
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A tree always holds at least its root.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn node(&self, id: NodeId) -> &RrtNode {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &RrtNode)> {
        self.nodes.iter().enumerate().map(|(i, node)| (NodeId(i), node))
    }

    /// (parent, child) for every edge.
    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.nodes()
            .filter_map(|(id, node)| node.parent.map(|parent| (parent, id)))
    }

    pub fn pin(&mut self, id: NodeId) {
        self.nodes[id.0].pinned = true;
    }

    /// Adds `node` under `parent` and returns its handle.
    pub fn attach(&mut self, parent: NodeId, mut node: RrtNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.parent = Some(parent);
        node.children.clear();
        self.index.insert(id, &node.position);
        self.nodes.push(node);
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Attaches `chain` as a path below `parent`; returns the last node added.
    pub fn attach_chain(&mut self, parent: NodeId, chain: Vec<RrtNode>) -> NodeId {
        chain
            .into_iter()
            .fold(parent, |tail, node| self.attach(tail, node))
    }

    /// Up to `k` nodes closest to `target`, nearest first.
    pub fn nearest(&self, target: &Point3, k: usize) -> Vec<NodeId> {
        if k == 0 {
            return Vec::new();
        }
        let center = self.index.cell_of(target);
        let max_ring = self.index.max_ring(center);
        let mut found: Vec<(FloatOrd, NodeId)> = Vec::new();

        // Far-away targets would walk more empty cells than there are nodes.
        if (max_ring as u128).pow(2) > self.nodes.len() as u128 {
            found = self
                .nodes()
                .map(|(id, node)| (FloatOrd(node.position.distance(target)), id))
                .collect();
            found.sort();
            found.truncate(k);
            return found.into_iter().map(|(_, id)| id).collect();
        }

        for ring in 0..=max_ring {
            for cell in GridIndex::ring_cells(center, ring) {
                if let Some(ids) = self.index.cells.get(&cell) {
                    found.extend(
                        ids.iter()
                            .map(|id| (FloatOrd(self.nodes[id.0].position.distance(target)), *id)),
                    );
                }
            }
            if found.len() >= k {
                found.sort();
                // Cells outside this ring are at least `ring` cells away horizontally.
                if found[k - 1].0 .0 <= ring as f64 * self.index.cell_size_m {
                    break;
                }
            }
        }

        found.sort();
        found.truncate(k);
        found.into_iter().map(|(_, id)| id).collect()
    }

    /// Node handles from the root down to `leaf`.
    pub fn branch(&self, leaf: NodeId) -> Vec<NodeId> {
        let mut branch = vec![leaf];
        let mut current = leaf;
        while let Some(parent) = self.nodes[current.0].parent {
            branch.push(parent);
            current = parent;
        }
        branch.reverse();
        branch
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        TreeSnapshot {
            nodes: self.nodes.clone(),
        }
    }

    /// Logs the whole tree as JSON at trace level.
    pub fn trace_dump(&self, label: &str) {
        if !tracing::enabled!(tracing::Level::TRACE) {
            return;
        }
        match serde_json::to_string(&self.snapshot()) {
            Ok(json) => tracing::trace!("{} ({} nodes): {}", label, self.len(), json),
            Err(err) => tracing::trace!("{}: could not serialise tree: {}", label, err),
        }
    }
}
