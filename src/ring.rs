// Ring module
// Fixed-size circular buffer of cache nodes, stored as a deque ordered by slice position.
// The actual (current) node is always the centre element and the edge is the last one;
// following `next` from the edge wraps around to the first element, which closes the ring.
// Only the controlling thread changes the topology.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::geometry::Nm;
use crate::node::{CacheNode, NodeId};

#[derive(Debug, Default)]
pub struct CacheRing {
    nodes: VecDeque<Arc<CacheNode>>,
}

impl CacheRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the ring with `2 * width + 1` fresh nodes centred on `center`.
    /// Returns the nodes that were dropped.
    pub fn init(&mut self, center: Nm, width: usize, spacing: Nm) -> Vec<Arc<CacheNode>> {
        let old = self.clear();
        let width = width as i64;
        for i in -width..=width {
            self.nodes.push_back(CacheNode::new(center + i as f64 * spacing));
        }
        old
    }

    pub fn clear(&mut self) -> Vec<Arc<CacheNode>> {
        self.nodes.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Half width of the window.
    pub fn width(&self) -> usize {
        self.nodes.len().saturating_sub(1) / 2
    }

    pub fn actual_index(&self) -> usize {
        self.width()
    }

    pub fn edge_index(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    pub fn next_index(&self, index: usize) -> usize {
        (index + 1) % self.nodes.len().max(1)
    }

    pub fn previous_index(&self, index: usize) -> usize {
        let len = self.nodes.len().max(1);
        (index + len - 1) % len
    }

    pub fn get(&self, index: usize) -> Option<&Arc<CacheNode>> {
        self.nodes.get(index)
    }

    pub fn actual(&self) -> Option<&Arc<CacheNode>> {
        self.nodes.get(self.actual_index())
    }

    pub fn edge(&self) -> Option<&Arc<CacheNode>> {
        self.nodes.back()
    }

    pub fn is_actual(&self, node: NodeId) -> bool {
        self.actual().is_some_and(|actual| actual.id() == node)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.iter().any(|n| n.id() == node)
    }

    /// Nodes from the lowest to the highest position.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<CacheNode>> {
        self.nodes.iter()
    }

    /// Indexes ordered from the actual node outwards, alternating one step up and one down.
    pub fn outward_indexes(&self) -> Vec<usize> {
        let center = self.actual_index();
        let mut order = Vec::with_capacity(self.nodes.len());
        if !self.nodes.is_empty() {
            order.push(center);
        }
        for step in 1..=self.width() {
            order.push(center + step);
            order.push(center - step);
        }
        order
    }

    /// Move the window one step towards higher positions: the lowest node becomes the
    /// new edge. Returns the recycled node and the position it must take.
    pub fn rotate_forward(&mut self, spacing: Nm) -> Option<(Arc<CacheNode>, Nm)> {
        let position = self.nodes.back()?.position() + spacing;
        let node = self.nodes.pop_front()?;
        self.nodes.push_back(Arc::clone(&node));
        Some((node, position))
    }

    /// Move the window one step towards lower positions: the edge node wraps to the front.
    pub fn rotate_backward(&mut self, spacing: Nm) -> Option<(Arc<CacheNode>, Nm)> {
        let position = self.nodes.front()?.position() - spacing;
        let node = self.nodes.pop_back()?;
        self.nodes.push_front(Arc::clone(&node));
        Some((node, position))
    }

    /// Add one node at each end. Returns (new lowest, new highest).
    pub fn grow(&mut self, spacing: Nm) -> Option<(Arc<CacheNode>, Arc<CacheNode>)> {
        let low = CacheNode::new(self.nodes.front()?.position() - spacing);
        let high = CacheNode::new(self.nodes.back()?.position() + spacing);
        self.nodes.push_front(Arc::clone(&low));
        self.nodes.push_back(Arc::clone(&high));
        Some((low, high))
    }

    /// Remove one node from each end, keeping at least the actual node.
    pub fn shrink(&mut self) -> Option<(Arc<CacheNode>, Arc<CacheNode>)> {
        if self.nodes.len() < 3 {
            return None;
        }
        let low = self.nodes.pop_front()?;
        let high = self.nodes.pop_back()?;
        Some((low, high))
    }

    pub fn positions(&self) -> Vec<Nm> {
        self.nodes.iter().map(|node| node.position()).collect()
    }
}
