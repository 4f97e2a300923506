//! Pointer hit testing.

use crate::node::NodeKind;
use crate::pool::NodeId;
use crate::tree::SceneTree;
use common::{Point, Transform};

/// Find the top-most pointer target containing `point`.
///
/// Nodes are visited in reverse paint order (later siblings first, children
/// before their parent), so the first hit is the one drawn on top. Transform
/// nodes map the position through their inverse 2D affine; a non-invertible
/// transform makes the subtree unhittable.
pub fn hit_test(tree: &SceneTree, root: NodeId, point: Point) -> Option<NodeId> {
    let node = tree.node(root)?;
    if node.is_hidden() {
        return None;
    }

    let point = match node.kind() {
        NodeKind::Transform(transform) => {
            let affine = Transform::from_mat4(&transform.matrix);
            match affine.inverse() {
                Some(inverse) => inverse.transform_point(point),
                None => return None,
            }
        }
        _ => point,
    };

    for &child in node.children().iter().rev() {
        if let Some(hit) = hit_test(tree, child, point) {
            return Some(hit);
        }
    }

    if node.is_pointer_target() {
        let contains = match node.kind() {
            NodeKind::Rectangle(rectangle) => rectangle.rect.contains_point(point),
            NodeKind::Texture(texture) => texture.rect.contains_point(point),
            NodeKind::Render(render) => render.rect.contains_point(point),
            _ => false,
        };
        if contains {
            return Some(root);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use common::{Color, Rect};
    use glam::{Mat4, Vec3};

    #[test]
    fn test_topmost_sibling_wins() {
        let mut tree = SceneTree::new();
        let root = tree.create(Node::basic());
        let below = tree.create(Node::rectangle(Rect::new(0.0, 0.0, 100.0, 100.0), Color::WHITE));
        let above = tree.create(Node::rectangle(Rect::new(40.0, 40.0, 100.0, 100.0), Color::BLACK));
        tree.append(root, below);
        tree.append(root, above);
        tree.node_mut(below).unwrap().set_pointer_target(true);
        tree.node_mut(above).unwrap().set_pointer_target(true);

        // Overlap region: the later sibling paints on top.
        assert_eq!(hit_test(&tree, root, Point::new(50.0, 50.0)), Some(above));
        // Only the lower rectangle covers the top-left corner.
        assert_eq!(hit_test(&tree, root, Point::new(10.0, 10.0)), Some(below));
        assert_eq!(hit_test(&tree, root, Point::new(300.0, 300.0)), None);
    }

    #[test]
    fn test_transform_inverse_applied() {
        let mut tree = SceneTree::new();
        let root = tree.create(Node::basic());
        let shifted = tree.create(Node::transform(Mat4::from_translation(Vec3::new(
            100.0, 0.0, 0.0,
        ))));
        let target = tree.create(Node::rectangle(Rect::new(0.0, 0.0, 20.0, 20.0), Color::WHITE));
        tree.append(root, shifted);
        tree.append(shifted, target);
        tree.node_mut(target).unwrap().set_pointer_target(true);

        // The rectangle lives at x 100..120 in surface space.
        assert_eq!(hit_test(&tree, root, Point::new(110.0, 10.0)), Some(target));
        assert_eq!(hit_test(&tree, root, Point::new(10.0, 10.0)), None);
    }

    #[test]
    fn test_non_target_ignored() {
        let mut tree = SceneTree::new();
        let root = tree.create(Node::basic());
        let rect = tree.create(Node::rectangle(Rect::new(0.0, 0.0, 50.0, 50.0), Color::WHITE));
        tree.append(root, rect);

        assert_eq!(hit_test(&tree, root, Point::new(25.0, 25.0)), None);
    }

    #[test]
    fn test_hidden_subtree_skipped() {
        let mut tree = SceneTree::new();
        let root = tree.create(Node::basic());
        let rect = tree.create(Node::rectangle(Rect::new(0.0, 0.0, 50.0, 50.0), Color::WHITE));
        tree.append(root, rect);
        tree.node_mut(rect).unwrap().set_pointer_target(true);
        tree.node_mut(rect).unwrap().set_hidden(true);

        assert_eq!(hit_test(&tree, root, Point::new(25.0, 25.0)), None);
    }
}
