//! Pooled node storage.
//!
//! A fixed-capacity slab hands out node slots without per-frame heap
//! traffic. A free-index stack makes allocation and deallocation O(1).
//! Exhaustion is not an error: allocation falls back to a growable overflow
//! region, and both origins are destroyed through the same call.

use crate::node::{Node, NodeFlags};

/// Generational handle to a node in a [`NodePool`].
///
/// Indices below the pool capacity address the fixed block; indices at or
/// above it address the heap overflow region. The generation guards against
/// stale handles to recycled slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

#[derive(Default)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Fixed-capacity node slab with transparent heap fallback.
pub struct NodePool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    overflow: Vec<Slot>,
    overflow_free: Vec<u32>,
    capacity: u32,
    live: usize,
}

impl NodePool {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity as u32;
        let mut slots = Vec::with_capacity(capacity as usize);
        slots.resize_with(capacity as usize, Slot::default);

        Self {
            slots,
            free: (0..capacity).rev().collect(),
            overflow: Vec::new(),
            overflow_free: Vec::new(),
            capacity,
            live: 0,
        }
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Fixed block capacity (excluding overflow).
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Whether a handle addresses the fixed block rather than the overflow
    /// region.
    pub fn is_pool_allocated(&self, id: NodeId) -> bool {
        id.index < self.capacity
    }

    /// Allocate a slot for `node`, preferring the fixed block.
    pub fn allocate(&mut self, mut node: Node) -> NodeId {
        self.live += 1;

        if let Some(index) = self.free.pop() {
            node.flags.insert(NodeFlags::POOL_ALLOCATED);
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId::new(index, slot.generation);
        }

        // Pool exhausted; degrade gracefully to the heap.
        node.flags.remove(NodeFlags::POOL_ALLOCATED);
        if let Some(overflow_index) = self.overflow_free.pop() {
            let slot = &mut self.overflow[overflow_index as usize];
            slot.node = Some(node);
            return NodeId::new(self.capacity + overflow_index, slot.generation);
        }

        tracing::debug!(capacity = self.capacity, "node pool exhausted, heap fallback");
        self.overflow.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId::new(self.capacity + (self.overflow.len() - 1) as u32, 0)
    }

    /// Return a node's slot to its free list, dropping the node.
    ///
    /// Returns the node so callers can inspect it before the drop. Stale
    /// handles return `None`.
    pub fn deallocate(&mut self, id: NodeId) -> Option<Node> {
        let (slot, free, local_index) = self.slot_mut(id)?;
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        free.push(local_index);
        self.live -= 1;
        Some(node)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        let slot = if id.index < self.capacity {
            self.slots.get(id.index as usize)?
        } else {
            self.overflow.get((id.index - self.capacity) as usize)?
        };
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let capacity = self.capacity;
        let slot = if id.index < capacity {
            self.slots.get_mut(id.index as usize)?
        } else {
            self.overflow.get_mut((id.index - capacity) as usize)?
        };
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    fn slot_mut(&mut self, id: NodeId) -> Option<(&mut Slot, &mut Vec<u32>, u32)> {
        if id.index < self.capacity {
            let slot = self.slots.get_mut(id.index as usize)?;
            if slot.generation != id.generation {
                return None;
            }
            Some((slot, &mut self.free, id.index))
        } else {
            let local = id.index - self.capacity;
            let slot = self.overflow.get_mut(local as usize)?;
            if slot.generation != id.generation {
                return None;
            }
            Some((slot, &mut self.overflow_free, local))
        }
    }
}
