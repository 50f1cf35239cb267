// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::collections::VecDeque;

use super::MetadataNode;

/// Why nodes are being destroyed. Only affects logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Data the node described was discarded.
    Dropped,
    /// The node was fully handled.
    Consumed,
}

/// Ordered ledger of metadata nodes, oldest first.
///
/// Nodes are boxed so moving one between ledgers transfers the allocation
/// instead of copying the payload.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MetadataList {
    nodes: VecDeque<Box<MetadataNode>>,
}

impl MetadataList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetadataNode> {
        self.nodes.iter().map(|n| &**n)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut MetadataNode> {
        self.nodes.iter_mut().map(|n| &mut **n)
    }

    /// Append a new node at the tail.
    pub fn create(&mut self, node: MetadataNode) {
        self.nodes.push_back(Box::new(node));
    }

    pub fn push(&mut self, node: Box<MetadataNode>) {
        self.nodes.push_back(node);
    }

    pub fn pop_front(&mut self) -> Option<Box<MetadataNode>> {
        self.nodes.pop_front()
    }

    /// Deep copy of the node at `index`.
    pub fn clone_node(&self, index: usize) -> Option<Box<MetadataNode>> {
        self.nodes.get(index).cloned()
    }

    /// Remove and destroy the node at `index`.
    pub fn destroy(&mut self, index: usize, reason: DropReason) -> bool {
        match self.nodes.remove(index) {
            Some(node) => {
                log_destroy(&node, reason);
                true
            }
            None => false,
        }
    }

    pub fn destroy_all(&mut self, reason: DropReason) -> usize {
        let count = self.nodes.len();
        for node in self.nodes.drain(..) {
            log_destroy(&node, reason);
        }
        count
    }

    /// Destroy nodes matching `pred`, keeping the rest in order.
    pub fn destroy_where<F>(&mut self, reason: DropReason, mut pred: F) -> usize
    where
        F: FnMut(&MetadataNode) -> bool,
    {
        let before = self.nodes.len();
        self.nodes.retain(|node| {
            if pred(&**node) {
                log_destroy(node, reason);
                false
            } else {
                true
            }
        });
        before - self.nodes.len()
    }

    /// Destroy everything except stream-associated end-of-stream nodes.
    pub fn retain_stream_eos(&mut self, reason: DropReason) -> usize {
        self.destroy_where(reason, |node| !node.is_stream_eos())
    }

    /// Move nodes matching `pred` to the tail of `dst`, preserving order.
    pub fn move_where<F>(&mut self, dst: &mut MetadataList, mut pred: F) -> usize
    where
        F: FnMut(&MetadataNode) -> bool,
    {
        let mut kept = VecDeque::with_capacity(self.nodes.len());
        let mut moved = 0;
        for node in self.nodes.drain(..) {
            if pred(&*node) {
                dst.nodes.push_back(node);
                moved += 1;
            } else {
                kept.push_back(node);
            }
        }
        self.nodes = kept;
        moved
    }

    /// Move every node to `dst`.
    pub fn move_all(&mut self, dst: &mut MetadataList) -> usize {
        let moved = self.nodes.len();
        dst.nodes.append(&mut self.nodes);
        moved
    }

    pub fn add_offsets(&mut self, by: usize) {
        for node in self.nodes.iter_mut() {
            node.offset += by;
        }
    }

    pub fn subtract_offsets(&mut self, by: usize) {
        for node in self.nodes.iter_mut() {
            node.rebase_down(by);
        }
    }

    pub fn set_offsets(&mut self, offset: usize) {
        for node in self.nodes.iter_mut() {
            node.offset = offset;
        }
    }

    pub fn has_eos(&self) -> bool {
        self.nodes.iter().any(|n| n.is_eos())
    }

    pub fn has_flushing_eos(&self) -> bool {
        self.nodes.iter().any(|n| n.is_flushing_eos())
    }
}

fn log_destroy(node: &MetadataNode, reason: DropReason) {
    match (node.is_flushing_eos(), reason) {
        (true, DropReason::Dropped) => tracing::warn!(
            "[MetadataList] Dropping flushing EOS at offset {}",
            node.offset
        ),
        _ => tracing::debug!(
            "[MetadataList] Destroying {:?} at offset {} ({:?})",
            node.id(),
            node.offset,
            reason
        ),
    }
}
