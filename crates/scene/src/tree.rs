//! Scene tree ownership and traversal.

use crate::node::{Node, NodeFlags};
use crate::pool::{NodeId, NodePool};

/// Lazy per-node update hook, run by the compositor's prepass when the node
/// is flagged dirty.
pub type PreprocessFn = Box<dyn FnMut(&mut SceneTree, NodeId)>;

/// Default fixed pool capacity.
const DEFAULT_POOL_CAPACITY: usize = 1024;

/// Tree of scene nodes backed by a [`NodePool`].
///
/// Ownership is exclusive and tree-structured: a parent owns its children,
/// and destroying a node destroys its whole subtree. Invalid mutations
/// (attaching an already-parented node, removing a non-child) are contract
/// violations and fail assertions rather than returning errors.
pub struct SceneTree {
    pool: NodePool,
}

impl SceneTree {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_POOL_CAPACITY)
    }

    /// A tree whose fixed pool block holds `capacity` nodes before falling
    /// back to the heap.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pool: NodePool::with_capacity(capacity),
        }
    }

    /// Insert a parentless node, drawing storage from the pool.
    pub fn create(&mut self, node: Node) -> NodeId {
        assert!(node.parent.is_none(), "created node must be parentless");
        self.pool.allocate(node)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.pool.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.pool.get_mut(id)
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn is_pool_allocated(&self, id: NodeId) -> bool {
        self.pool.is_pool_allocated(id)
    }

    // === Structure mutation ===

    /// Attach `child` as the last child of `parent`.
    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        self.attach(parent, child, true);
    }

    /// Attach `child` as the first child of `parent`.
    pub fn prepend(&mut self, parent: NodeId, child: NodeId) {
        self.attach(parent, child, false);
    }

    fn attach(&mut self, parent: NodeId, child: NodeId, back: bool) {
        assert_ne!(parent, child, "cannot attach a node to itself");

        let child_node = self.pool.get_mut(child).expect("attach: child does not exist");
        assert!(
            child_node.parent.is_none(),
            "attach: child already has a parent"
        );
        child_node.parent = Some(parent);

        let parent_node = self.pool.get_mut(parent).expect("attach: parent does not exist");
        debug_assert!(
            !parent_node.children.contains(&child),
            "attach: child already present"
        );
        if back {
            parent_node.children.push(child);
        } else {
            parent_node.children.insert(0, child);
        }
    }

    /// Detach `child` from `parent` without destroying it.
    pub fn remove(&mut self, parent: NodeId, child: NodeId) {
        let child_node = self.pool.get_mut(child).expect("remove: child does not exist");
        assert_eq!(
            child_node.parent,
            Some(parent),
            "remove: node is not a child of this parent"
        );
        child_node.parent = None;

        let parent_node = self.pool.get_mut(parent).expect("remove: parent does not exist");
        let position = parent_node
            .children
            .iter()
            .position(|&id| id == child)
            .expect("remove: child missing from parent's list");
        parent_node.children.remove(position);
    }

    /// Destroy a node and its whole subtree, depth-first post-order.
    ///
    /// The node detaches itself from its parent first, then each child
    /// subtree is destroyed before the node's own storage is released.
    pub fn destroy(&mut self, id: NodeId) {
        let Some(node) = self.pool.get(id) else {
            return;
        };

        if let Some(parent) = node.parent {
            self.remove(parent, id);
        }
        self.destroy_subtree(id);
    }

    fn destroy_subtree(&mut self, id: NodeId) {
        let children: Vec<NodeId> = match self.pool.get(id) {
            Some(node) => node.children.iter().copied().collect(),
            None => return,
        };

        for child in children {
            self.destroy_subtree(child);
        }

        self.pool.deallocate(id);
    }

    // === Traversal helpers ===

    /// Number of children, equal to the walk length of the sibling ring.
    pub fn child_count(&self, id: NodeId) -> usize {
        self.pool.get(id).map_or(0, |node| node.children.len())
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.pool.get(id)?.children.first().copied()
    }

    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.pool.get(id)?.children.last().copied()
    }

    /// The next sibling in paint order, or `None` at the logical end.
    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.pool.get(id)?.parent?;
        let siblings = &self.pool.get(parent)?.children;
        let position = siblings.iter().position(|&sibling| sibling == id)?;
        siblings.get(position + 1).copied()
    }

    /// The previous sibling in paint order, or `None` at the logical start.
    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.pool.get(id)?.parent?;
        let siblings = &self.pool.get(parent)?.children;
        let position = siblings.iter().position(|&sibling| sibling == id)?;
        position.checked_sub(1).and_then(|i| siblings.get(i).copied())
    }

    // === Preprocess hooks ===

    /// Register the lazy update hook for a node.
    pub fn set_preprocess(&mut self, id: NodeId, hook: PreprocessFn) {
        if let Some(node) = self.pool.get_mut(id) {
            node.preprocess = Some(hook);
        }
    }

    /// Flag a node's hook to run at the next prepass.
    pub fn request_preprocess(&mut self, id: NodeId) {
        if let Some(node) = self.pool.get_mut(id) {
            node.flags.insert(NodeFlags::PREPROCESS);
        }
    }

    /// Run the node's preprocess hook if it is flagged, clearing the flag.
    ///
    /// The hook is lifted out of the node for the duration of the call so it
    /// may mutate the tree, including the node itself.
    pub fn run_preprocess(&mut self, id: NodeId) {
        let Some(node) = self.pool.get_mut(id) else {
            return;
        };
        if !node.flags.contains(NodeFlags::PREPROCESS) {
            return;
        }
        node.flags.remove(NodeFlags::PREPROCESS);

        let Some(mut hook) = node.preprocess.take() else {
            return;
        };
        hook(self, id);

        // The hook may have destroyed the node.
        if let Some(node) = self.pool.get_mut(id) {
            if node.preprocess.is_none() {
                node.preprocess = Some(hook);
            }
        }
    }
}

impl Default for SceneTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Color, Rect};
    use std::cell::Cell;
    use std::rc::Rc;

    fn rect_node() -> Node {
        Node::rectangle(Rect::new(0.0, 0.0, 10.0, 10.0), Color::WHITE)
    }

    #[test]
    fn test_append_and_child_count() {
        let mut tree = SceneTree::new();
        let root = tree.create(Node::basic());
        let a = tree.create(rect_node());
        let b = tree.create(rect_node());
        let c = tree.create(rect_node());

        tree.append(root, a);
        tree.append(root, b);
        tree.prepend(root, c);

        assert_eq!(tree.child_count(root), 3);
        assert_eq!(tree.first_child(root), Some(c));
        assert_eq!(tree.last_child(root), Some(b));

        // Walking the sibling chain visits every child exactly once.
        let mut walked = 0;
        let mut cursor = tree.first_child(root);
        while let Some(id) = cursor {
            walked += 1;
            cursor = tree.next_sibling(id);
        }
        assert_eq!(walked, tree.child_count(root));
    }

    #[test]
    fn test_sibling_navigation() {
        let mut tree = SceneTree::new();
        let root = tree.create(Node::basic());
        let a = tree.create(rect_node());
        let b = tree.create(rect_node());
        tree.append(root, a);
        tree.append(root, b);

        assert_eq!(tree.next_sibling(a), Some(b));
        assert_eq!(tree.next_sibling(b), None);
        assert_eq!(tree.previous_sibling(b), Some(a));
        assert_eq!(tree.previous_sibling(a), None);
    }

    #[test]
    fn test_remove_and_reattach() {
        let mut tree = SceneTree::new();
        let first = tree.create(Node::basic());
        let second = tree.create(Node::basic());
        let child = tree.create(rect_node());

        tree.append(first, child);
        tree.remove(first, child);
        assert_eq!(tree.node(child).unwrap().parent(), None);
        assert_eq!(tree.child_count(first), 0);

        tree.append(second, child);
        assert_eq!(tree.node(child).unwrap().parent(), Some(second));
    }

    #[test]
    #[should_panic(expected = "child already has a parent")]
    fn test_double_parent_asserts() {
        let mut tree = SceneTree::new();
        let a = tree.create(Node::basic());
        let b = tree.create(Node::basic());
        let child = tree.create(rect_node());

        tree.append(a, child);
        tree.append(b, child);
    }

    #[test]
    #[should_panic(expected = "not a child of this parent")]
    fn test_remove_non_child_asserts() {
        let mut tree = SceneTree::new();
        let a = tree.create(Node::basic());
        let stranger = tree.create(rect_node());
        tree.remove(a, stranger);
    }

    /// Guard whose drop increments a shared counter; stands in for a node
    /// variant with destruction side effects.
    struct DropGuard(Rc<Cell<usize>>);

    impl Drop for DropGuard {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_destroy_recursive_exactly_once() {
        let drops = Rc::new(Cell::new(0));
        let mut tree = SceneTree::new();

        let make_counted = |tree: &mut SceneTree, drops: &Rc<Cell<usize>>| {
            let guard = DropGuard(drops.clone());
            tree.create(Node::render(
                Rect::new(0.0, 0.0, 1.0, 1.0),
                Box::new(move |_, _| {
                    let _ = &guard;
                }),
            ))
        };

        let root = make_counted(&mut tree, &drops);
        let mid = make_counted(&mut tree, &drops);
        let leaf_a = make_counted(&mut tree, &drops);
        let leaf_b = make_counted(&mut tree, &drops);

        tree.append(root, mid);
        tree.append(mid, leaf_a);
        tree.append(mid, leaf_b);

        tree.destroy(root);
        assert_eq!(drops.get(), 4);
        assert_eq!(tree.len(), 0);
        assert!(tree.node(leaf_a).is_none());
    }

    #[test]
    fn test_destroy_detaches_from_parent() {
        let mut tree = SceneTree::new();
        let root = tree.create(Node::basic());
        let child = tree.create(rect_node());
        tree.append(root, child);

        tree.destroy(child);
        assert_eq!(tree.child_count(root), 0);
        assert!(tree.node(root).is_some());
    }

    #[test]
    fn test_mixed_origin_destroy() {
        let mut tree = SceneTree::with_capacity(2);
        let root = tree.create(Node::basic());
        let pooled = tree.create(rect_node());
        let heaped = tree.create(rect_node());

        tree.append(root, pooled);
        tree.append(root, heaped);
        assert!(tree.is_pool_allocated(pooled));
        assert!(!tree.is_pool_allocated(heaped));

        tree.destroy(root);
        assert_eq!(tree.len(), 0);
    }

    #[test]
    fn test_preprocess_runs_once_when_flagged() {
        let mut tree = SceneTree::new();
        let node = tree.create(rect_node());
        let runs = Rc::new(Cell::new(0));

        let counter = runs.clone();
        tree.set_preprocess(
            node,
            Box::new(move |tree, id| {
                counter.set(counter.get() + 1);
                if let Some(node) = tree.node_mut(id) {
                    node.set_color(Color::BLACK);
                }
            }),
        );

        // Not flagged: nothing runs.
        tree.run_preprocess(node);
        assert_eq!(runs.get(), 0);

        tree.request_preprocess(node);
        tree.run_preprocess(node);
        tree.run_preprocess(node);
        assert_eq!(runs.get(), 1);
        assert_eq!(tree.node(node).unwrap().as_rectangle().unwrap().color, Color::BLACK);
    }
}
