//! Scene-graph compositor.
//!
//! Converts the node tree into ordered draw calls once per frame, in three
//! phases:
//!
//! 1. **Prepass**: depth-first walk running due preprocess hooks and
//!    tallying exactly how many elements and quads the frame needs, so
//!    storage is reserved once with no mid-frame reallocation.
//! 2. **Build**: second walk projecting leaf geometry through the ambient
//!    2D (or 3D-projected) transform chain into a flat element array that
//!    mirrors the tree in traversal order. Effect nodes that cannot be
//!    expressed as per-draw parameters open a layered group around their
//!    descendants and accumulate their bounding box.
//! 3. **Render**: layered groups are rendered (innermost first) into
//!    pooled offscreen targets with the projection rebased to the target's
//!    origin, then one flat pass draws the remaining elements in array
//!    order, depth-sorting 3D-projected ranges back to front.

use crate::element::{Element, FrameCounts};
use crate::targets::TargetPool;
use common::{Bounds, Color, Point, Quad, Rect, Size, Transform};
use glam::{Mat4, Vec4};
use gpu::Device;
use ordered_float::OrderedFloat;
use scene::{NodeId, NodeKind, SceneTree};

/// Compositor configuration.
#[derive(Clone, Debug)]
pub struct CompositorSettings {
    /// Offscreen targets kept alive for reuse across layers and frames.
    pub max_pooled_targets: usize,
}

impl Default for CompositorSettings {
    fn default() -> Self {
        Self {
            max_pooled_targets: 8,
        }
    }
}

/// Per-frame statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct CompositorStats {
    /// Elements built this frame.
    pub elements: usize,
    /// Vertices reserved this frame (four per quad).
    pub vertices: usize,
    /// Layered subtrees rendered offscreen.
    pub layers_rendered: u32,
    /// Layered subtrees dropped for degenerate bounds.
    pub layers_skipped: u32,
    /// Draw calls issued.
    pub draw_calls: u32,
}

/// Ambient transform state carried through the build recursion by value.
#[derive(Clone, Copy)]
enum Space {
    /// Ordinary 2D compositing.
    Flat(Transform),
    /// Inside a 3D-projected subtree: `base` maps projected 2D points back
    /// into the frame, `matrix` accumulates the 3D chain, `depth` is the
    /// perspective distance.
    Projected {
        base: Transform,
        matrix: Mat4,
        depth: f32,
    },
}

/// How a layered group sizes and positions its quads.
enum LayerParams {
    /// Opacity and color filter: one quad over the child bounds.
    Plain,
    /// Blur: bounds expanded by the radius, plus two pass quads.
    Blur(f32),
    /// Shadow: untouched source quad, offset shadow quad, pass quad.
    Shadow { radius: f32, offset: Point },
}

/// The scene-graph compositor.
pub struct Compositor {
    settings: CompositorSettings,
    stats: CompositorStats,
    /// Per-frame element array; mirrors the tree in build order.
    elements: Vec<Element>,
    /// Per-frame quad storage, indexed by `Element::vertex_offset`.
    quads: Vec<Quad>,
    /// Open bounding-box scopes during build (innermost last).
    bounds_stack: Vec<Bounds>,
    targets: TargetPool,
}

impl Compositor {
    pub fn new() -> Self {
        Self::with_settings(CompositorSettings::default())
    }

    pub fn with_settings(settings: CompositorSettings) -> Self {
        let targets = TargetPool::new(settings.max_pooled_targets);
        Self {
            settings,
            stats: CompositorStats::default(),
            elements: Vec::new(),
            quads: Vec::new(),
            bounds_stack: Vec::new(),
            targets,
        }
    }

    pub fn settings(&self) -> &CompositorSettings {
        &self.settings
    }

    pub fn stats(&self) -> &CompositorStats {
        &self.stats
    }

    /// The element array of the most recent frame.
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// The quad storage of the most recent frame.
    pub fn quads(&self) -> &[Quad] {
        &self.quads
    }

    /// Destroy pooled offscreen targets.
    pub fn clear_target_pool(&mut self, device: &mut dyn Device) {
        self.targets.clear(device);
    }

    /// Render one frame of `scene` under `root` into `device`.
    pub fn render(
        &mut self,
        scene: &mut SceneTree,
        root: NodeId,
        viewport: Size,
        clear: Color,
        device: &mut dyn Device,
    ) {
        self.stats = CompositorStats::default();
        self.elements.clear();
        self.quads.clear();
        self.bounds_stack.clear();

        if viewport.is_empty() {
            tracing::debug!("zero-sized frame, skipping render");
            return;
        }

        // Prepass: exact storage needs for the frame.
        let mut counts = FrameCounts::default();
        self.prepass(scene, root, &mut counts);
        self.elements.reserve_exact(counts.elements);
        self.quads.reserve_exact(counts.quads);

        // Build: flatten the tree into the element array.
        self.build_node(scene, root, Space::Flat(Transform::identity()));
        debug_assert_eq!(self.elements.len(), counts.elements, "build diverged from prepass");
        debug_assert_eq!(self.quads.len(), counts.quads, "build diverged from prepass");

        self.stats.elements = self.elements.len();
        self.stats.vertices = self.quads.len() * 4;

        // Render: layers first, then one flat pass in array order.
        device.begin_frame(viewport.width as u32, viewport.height as u32, clear);
        let end = self.elements.len();
        self.resolve_layers(scene, device, 0, end);
        device.bind_target(None, Point::ZERO, None);
        self.flat_draw(scene, device, 0, end);
        device.end_frame();
    }

    // === Phase 1: prepass ===

    fn prepass(&mut self, scene: &mut SceneTree, id: NodeId, counts: &mut FrameCounts) {
        scene.run_preprocess(id);

        let Some(node) = scene.node(id) else {
            return;
        };
        if node.is_hidden() {
            return;
        }

        match node.kind() {
            NodeKind::Rectangle(_) | NodeKind::Texture(_) | NodeKind::Render(_) => {
                counts.elements += 1;
                counts.quads += 1;
            }
            NodeKind::Transform(t) if t.projection_depth > 0.0 => {
                counts.elements += 1;
            }
            NodeKind::Opacity(o) if o.opacity < 1.0 => {
                counts.elements += 1;
                counts.quads += 1;
            }
            NodeKind::ColorFilter(f) if !f.matrix.is_identity() => {
                counts.elements += 1;
                counts.quads += 1;
            }
            NodeKind::Blur(b) if b.radius > 0 => {
                counts.elements += 1;
                counts.quads += 3;
            }
            NodeKind::Shadow(s) if s.color.a > 0 => {
                counts.elements += 1;
                counts.quads += 3;
            }
            _ => {}
        }

        let children: Vec<NodeId> = node.children().to_vec();
        for child in children {
            self.prepass(scene, child, counts);
        }
    }

    // === Phase 2: build ===

    fn build_node(&mut self, scene: &mut SceneTree, id: NodeId, space: Space) {
        let Some(node) = scene.node(id) else {
            return;
        };
        if node.is_hidden() {
            return;
        }
        let children: Vec<NodeId> = node.children().to_vec();

        enum Step {
            Recurse,
            Transform(scene::TransformNode),
            Leaf(Rect),
            Layer(LayerParams),
        }

        let step = match node.kind() {
            NodeKind::Basic => Step::Recurse,
            NodeKind::Transform(t) => Step::Transform(*t),
            NodeKind::Rectangle(r) => Step::Leaf(r.rect),
            NodeKind::Texture(t) => Step::Leaf(t.rect),
            NodeKind::Render(r) => Step::Leaf(r.rect),
            NodeKind::Opacity(o) if o.opacity < 1.0 => Step::Layer(LayerParams::Plain),
            NodeKind::ColorFilter(f) if !f.matrix.is_identity() => Step::Layer(LayerParams::Plain),
            NodeKind::Blur(b) if b.radius > 0 => Step::Layer(LayerParams::Blur(b.radius as f32)),
            NodeKind::Shadow(s) if s.color.a > 0 => Step::Layer(LayerParams::Shadow {
                radius: s.radius,
                offset: s.offset,
            }),
            // Pass-through effects (opacity 1, identity filter, zero radius,
            // invisible shadow) contribute nothing themselves.
            _ => Step::Recurse,
        };

        match step {
            Step::Recurse => {
                for child in children {
                    self.build_node(scene, child, space);
                }
            }
            Step::Transform(transform) => {
                if transform.projection_depth > 0.0 {
                    // Entering a 3D subtree: the element marks the range to
                    // depth-sort later.
                    let index = self.elements.len();
                    self.elements.push(Element::group(id, false));

                    let child_space = match space {
                        Space::Flat(ambient) => Space::Projected {
                            base: ambient,
                            matrix: transform.matrix,
                            depth: transform.projection_depth,
                        },
                        Space::Projected { base, matrix, .. } => Space::Projected {
                            base,
                            matrix: matrix * transform.matrix,
                            depth: transform.projection_depth,
                        },
                    };
                    for child in children {
                        self.build_node(scene, child, child_space);
                    }
                    self.close_group(index);
                } else {
                    // Plain transform: fold into the ambient matrix, passed
                    // by value so the caller's copy is restored on return.
                    let child_space = match space {
                        Space::Flat(ambient) => {
                            Space::Flat(Transform::from_mat4(&transform.matrix).then(&ambient))
                        }
                        Space::Projected { base, matrix, depth } => Space::Projected {
                            base,
                            matrix: matrix * transform.matrix,
                            depth,
                        },
                    };
                    for child in children {
                        self.build_node(scene, child, child_space);
                    }
                }
            }
            Step::Leaf(rect) => {
                let (quad, z) = project_rect(&space, rect);
                if let Some(bounds) = self.bounds_stack.last_mut() {
                    bounds.accumulate_quad(&quad);
                }
                let offset = self.quads.len();
                self.quads.push(quad);
                self.elements.push(Element::leaf(id, offset, z));

                // Drawables may carry children; they paint on top.
                for child in children {
                    self.build_node(scene, child, space);
                }
            }
            Step::Layer(params) => {
                let index = self.elements.len();
                self.elements.push(Element::group(id, true));

                self.bounds_stack.push(Bounds::empty());
                for child in children {
                    self.build_node(scene, child, space);
                }
                let bounds = self.bounds_stack.pop().unwrap_or_default();
                self.close_group(index);

                let rect = bounds.to_rect();
                let offset = self.quads.len();
                self.elements[index].vertex_offset = offset;
                self.push_layer_quads(rect, &params);
            }
        }
    }

    /// Emit the composite quad (plus any auxiliary pass quads) for a closed
    /// layered group, and merge its extent into the enclosing scope.
    fn push_layer_quads(&mut self, rect: Rect, params: &LayerParams) {
        let degenerate = rect.is_empty();

        match params {
            LayerParams::Plain => {
                let quad = Quad::from_rect(rect);
                self.quads.push(quad);
                if !degenerate {
                    if let Some(parent) = self.bounds_stack.last_mut() {
                        parent.accumulate_quad(&quad);
                    }
                }
            }
            LayerParams::Blur(radius) => {
                let expanded = if degenerate {
                    Rect::ZERO
                } else {
                    rect.inflate(*radius, *radius)
                };
                let quad = Quad::from_rect(expanded);
                // Composite quad plus the horizontal and vertical pass
                // quads of the separable kernel.
                self.quads.push(quad);
                self.quads.push(quad);
                self.quads.push(quad);
                if !degenerate {
                    if let Some(parent) = self.bounds_stack.last_mut() {
                        parent.accumulate_quad(&quad);
                    }
                }
            }
            LayerParams::Shadow { radius, offset } => {
                let expanded = if degenerate {
                    Rect::ZERO
                } else {
                    rect.inflate(radius.ceil(), radius.ceil())
                };
                let source_quad = Quad::from_rect(rect);
                let shadow_quad = Quad::from_rect(expanded.translate(offset.x, offset.y));
                let pass_quad = Quad::from_rect(expanded);
                self.quads.push(source_quad);
                self.quads.push(shadow_quad);
                self.quads.push(pass_quad);
                if !degenerate {
                    if let Some(parent) = self.bounds_stack.last_mut() {
                        parent.accumulate_quad(&source_quad);
                        parent.accumulate_quad(&shadow_quad);
                    }
                }
            }
        }
    }

    /// Fix up a group element once its descendants are built: range size
    /// and, for depth sorting, the unweighted average z of the range.
    fn close_group(&mut self, index: usize) {
        let end = self.elements.len();
        let group_size = end - index - 1;

        let mut z_sum = 0.0;
        for element in &self.elements[index + 1..end] {
            z_sum += element.z;
        }

        let element = &mut self.elements[index];
        element.group_size = group_size;
        element.z = if group_size > 0 {
            z_sum / group_size as f32
        } else {
            0.0
        };
    }

    // === Phase 3: render ===

    /// Render every layered element in `[start, end)` into an offscreen
    /// target, innermost groups first.
    fn resolve_layers(
        &mut self,
        scene: &mut SceneTree,
        device: &mut dyn Device,
        start: usize,
        end: usize,
    ) {
        let mut i = start;
        while i < end {
            let element = self.elements[i];
            if element.layered && !element.completed {
                self.resolve_layers(scene, device, i + 1, i + 1 + element.group_size);
                self.render_layer(scene, device, i);
                i += 1 + element.group_size;
            } else {
                i += 1;
            }
        }
    }

    /// Render one layered element's descendant range into offscreen
    /// target(s), applying any multi-pass effect, and mark the range
    /// consumed.
    fn render_layer(&mut self, scene: &mut SceneTree, device: &mut dyn Device, index: usize) {
        let element = self.elements[index];
        let group_end = index + 1 + element.group_size;

        let params = match scene.node(element.node).map(|n| n.kind()) {
            Some(NodeKind::Blur(b)) => LayerParams::Blur(b.radius as f32),
            Some(NodeKind::Shadow(s)) => LayerParams::Shadow {
                radius: s.radius,
                offset: s.offset,
            },
            Some(_) => LayerParams::Plain,
            None => {
                for e in &mut self.elements[index..group_end] {
                    e.completed = true;
                }
                return;
            }
        };

        // The first quad is the composite quad; a degenerate box aborts
        // only this subtree's offscreen render.
        let content_rect = self.quads[element.vertex_offset].bounding_rect();
        if content_rect.is_empty() {
            tracing::debug!(node = ?element.node, "degenerate layer bounds, skipping subtree");
            self.stats.layers_skipped += 1;
            for e in &mut self.elements[index..group_end] {
                e.completed = true;
            }
            return;
        }

        let width = content_rect.width.ceil() as u32;
        let height = content_rect.height.ceil() as u32;

        match params {
            LayerParams::Plain => {
                let target = self.targets.acquire(device, width, height);
                device.bind_target(Some(target), content_rect.origin(), Some(Color::TRANSPARENT));
                self.flat_draw(scene, device, index + 1, group_end);
                self.elements[index].target = Some(target);
            }
            LayerParams::Blur(radius) => {
                // Content renders into the radius-expanded box so the
                // kernel has room to bleed.
                let content = self.targets.acquire(device, width, height);
                device.bind_target(Some(content), content_rect.origin(), Some(Color::TRANSPARENT));
                self.flat_draw(scene, device, index + 1, group_end);

                // Separable kernel: horizontal into a scratch target,
                // vertical back into the content target.
                let scratch = self.targets.acquire(device, width, height);
                device.bind_target(Some(scratch), content_rect.origin(), Some(Color::TRANSPARENT));
                let content_texture = device.target_texture(content);
                device.draw_blur(
                    &self.quads[element.vertex_offset + 1],
                    content_texture,
                    radius,
                    true,
                );

                device.bind_target(Some(content), content_rect.origin(), Some(Color::TRANSPARENT));
                let scratch_texture = device.target_texture(scratch);
                device.draw_blur(
                    &self.quads[element.vertex_offset + 2],
                    scratch_texture,
                    radius,
                    false,
                );
                self.targets.release(device, scratch);
                self.stats.draw_calls += 2;

                self.elements[index].target = Some(content);
            }
            LayerParams::Shadow { radius, .. } => {
                // The source subtree renders untouched at its own bounds;
                // a second, radius-expanded target holds the blurred mask.
                let expanded = self.quads[element.vertex_offset + 2].bounding_rect();
                let mask_width = expanded.width.ceil() as u32;
                let mask_height = expanded.height.ceil() as u32;

                let source = self.targets.acquire(device, width, height);
                device.bind_target(Some(source), content_rect.origin(), Some(Color::TRANSPARENT));
                self.flat_draw(scene, device, index + 1, group_end);

                let mask = self.targets.acquire(device, mask_width, mask_height);
                device.bind_target(Some(mask), expanded.origin(), Some(Color::TRANSPARENT));
                let source_texture = device.target_texture(source);
                device.draw_textured(&self.quads[element.vertex_offset], source_texture, 1.0);

                let scratch = self.targets.acquire(device, mask_width, mask_height);
                device.bind_target(Some(scratch), expanded.origin(), Some(Color::TRANSPARENT));
                let mask_texture = device.target_texture(mask);
                device.draw_blur(
                    &self.quads[element.vertex_offset + 2],
                    mask_texture,
                    radius,
                    true,
                );

                device.bind_target(Some(mask), expanded.origin(), Some(Color::TRANSPARENT));
                let scratch_texture = device.target_texture(scratch);
                device.draw_blur(
                    &self.quads[element.vertex_offset + 2],
                    scratch_texture,
                    radius,
                    false,
                );
                self.targets.release(device, scratch);
                self.stats.draw_calls += 3;

                self.elements[index].target = Some(mask);
                self.elements[index].source = Some(source);
            }
        }

        for e in &mut self.elements[index + 1..group_end] {
            e.completed = true;
        }
        self.stats.layers_rendered += 1;
    }

    /// Draw every unconsumed element in `[start, end)` in array order,
    /// depth-sorting 3D-projected ranges as they are encountered.
    fn flat_draw(&mut self, scene: &mut SceneTree, device: &mut dyn Device, start: usize, end: usize) {
        let mut i = start;
        while i < end {
            let element = self.elements[i];
            if element.completed {
                i += 1;
                continue;
            }

            if element.projection {
                // Back-to-front: ascending z, farthest first. Stable, so 2D
                // paint order breaks ties.
                let sub_end = (i + 1 + element.group_size).min(end);
                self.elements[i + 1..sub_end].sort_by_key(|e| OrderedFloat(e.z));
                self.elements[i].completed = true;
                i += 1;
                continue;
            }

            self.draw_element(scene, device, i);
            self.elements[i].completed = true;
            i += 1;
        }
    }

    /// Issue the draw call(s) for a single element.
    fn draw_element(&mut self, scene: &mut SceneTree, device: &mut dyn Device, index: usize) {
        let element = self.elements[index];
        let quad = self.quads[element.vertex_offset];

        let Some(node) = scene.node_mut(element.node) else {
            return;
        };

        match node.kind_mut() {
            NodeKind::Rectangle(r) => {
                device.draw_solid(&quad, r.color);
                self.stats.draw_calls += 1;
            }
            NodeKind::Texture(t) => {
                device.draw_textured(&quad, t.texture, 1.0);
                self.stats.draw_calls += 1;
            }
            NodeKind::Render(r) => {
                let mut draw = std::mem::replace(&mut r.draw, Box::new(|_, _| {}));
                draw(device, &quad);
                r.draw = draw;
                self.stats.draw_calls += 1;
            }
            NodeKind::Opacity(o) => {
                let opacity = o.opacity;
                if let Some(target) = element.target {
                    let texture = device.target_texture(target);
                    device.draw_textured(&quad, texture, opacity);
                    self.targets.release(device, target);
                    self.stats.draw_calls += 1;
                }
            }
            NodeKind::ColorFilter(f) => {
                let matrix = f.matrix;
                if let Some(target) = element.target {
                    let texture = device.target_texture(target);
                    device.draw_color_matrix(&quad, texture, &matrix);
                    self.targets.release(device, target);
                    self.stats.draw_calls += 1;
                }
            }
            NodeKind::Blur(_) => {
                if let Some(target) = element.target {
                    let texture = device.target_texture(target);
                    device.draw_textured(&quad, texture, 1.0);
                    self.targets.release(device, target);
                    self.stats.draw_calls += 1;
                }
            }
            NodeKind::Shadow(s) => {
                let color = s.color;
                let shadow_quad = self.quads[element.vertex_offset + 1];
                if let Some(target) = element.target {
                    let texture = device.target_texture(target);
                    device.draw_shadow_mask(&shadow_quad, texture, color);
                    self.targets.release(device, target);
                    self.stats.draw_calls += 1;
                }
                // The untouched source composites on top of its shadow.
                if let Some(source) = element.source {
                    let texture = device.target_texture(source);
                    device.draw_textured(&quad, texture, 1.0);
                    self.targets.release(device, source);
                    self.stats.draw_calls += 1;
                }
            }
            NodeKind::Basic | NodeKind::Transform(_) => {}
        }
    }
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

/// Project a leaf rectangle through the ambient space, producing its screen
/// quad and (under 3D projection) the depth of its midpoint.
fn project_rect(space: &Space, rect: Rect) -> (Quad, f32) {
    match space {
        Space::Flat(ambient) => (Quad::from_rect(rect).transformed(ambient), 0.0),
        Space::Projected { base, matrix, depth } => {
            let quad = Quad::from_rect(rect);
            let points = quad
                .points
                .map(|p| project_point(base, matrix, *depth, p).0);
            let (_, z) = project_point(base, matrix, *depth, rect.center());
            (Quad { points }, z)
        }
    }
}

fn project_point(base: &Transform, matrix: &Mat4, depth: f32, p: Point) -> (Point, f32) {
    let v = *matrix * Vec4::new(p.x, p.y, 0.0, 1.0);
    let w = if v.w.abs() > f32::EPSILON { v.w } else { 1.0 };
    let (x, y, z) = (v.x / w, v.y / w, v.z / w);

    // Perspective scale toward the viewer; geometry at or behind the camera
    // plane clamps rather than inverting.
    let denominator = (depth - z).max(depth * 1e-3);
    let scale = depth / denominator;

    (base.transform_point(Point::new(x * scale, y * scale)), z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ColorMatrix;
    use glam::Vec3;
    use gpu::{SoftwareDevice, TextureFormat};
    use scene::Node;

    const VIEW: Size = Size {
        width: 100.0,
        height: 100.0,
    };

    fn render(
        compositor: &mut Compositor,
        scene: &mut SceneTree,
        root: NodeId,
        device: &mut SoftwareDevice,
    ) {
        compositor.render(scene, root, VIEW, Color::WHITE, device);
    }

    #[test]
    fn test_opacity_layer_scenario() {
        let mut device = SoftwareDevice::new();
        let mut scene = SceneTree::new();
        let root = scene.create(Node::basic());
        let group = scene.create(Node::opacity(0.5));
        let red = scene.create(Node::rectangle(
            Rect::new(10.0, 10.0, 30.0, 30.0),
            Color::rgb(255, 0, 0),
        ));
        let green = scene.create(Node::rectangle(
            Rect::new(50.0, 10.0, 30.0, 30.0),
            Color::rgb(0, 255, 0),
        ));
        scene.append(root, group);
        scene.append(group, red);
        scene.append(group, green);

        let mut compositor = Compositor::new();
        render(&mut compositor, &mut scene, root, &mut device);

        // Exactly one layered element whose range spans the two rectangles.
        let layered: Vec<&Element> = compositor.elements().iter().filter(|e| e.layered).collect();
        assert_eq!(layered.len(), 1);
        assert_eq!(layered[0].group_size, 2);
        assert_eq!(compositor.elements().len(), 3);
        assert_eq!(compositor.stats().layers_rendered, 1);

        // Half-transparent red over the white clear color.
        let pixel = device.frame().get_pixel(25, 25);
        assert!(pixel.r > 250);
        assert!((pixel.g as i32 - 127).abs() <= 3);
        assert!((pixel.b as i32 - 127).abs() <= 3);

        // Half-transparent green likewise.
        let pixel = device.frame().get_pixel(65, 25);
        assert!((pixel.r as i32 - 127).abs() <= 3);
        assert!(pixel.g > 250);

        // Outside both rectangles: untouched clear color.
        assert_eq!(device.frame().get_pixel(5, 50), Color::WHITE);
    }

    #[test]
    fn test_blur_zero_radius_is_pass_through() {
        let mut device = SoftwareDevice::new();
        let mut scene = SceneTree::new();
        let root = scene.create(Node::blur(0));
        let rect = scene.create(Node::rectangle(
            Rect::new(10.0, 10.0, 20.0, 20.0),
            Color::rgb(0, 0, 255),
        ));
        scene.append(root, rect);

        let mut compositor = Compositor::new();
        render(&mut compositor, &mut scene, root, &mut device);

        assert!(compositor.elements().iter().all(|e| !e.layered));
        assert_eq!(compositor.stats().elements, 1);
        assert_eq!(compositor.stats().vertices, 4);
        assert_eq!(device.frame().get_pixel(15, 15), Color::rgb(0, 0, 255));
    }

    #[test]
    fn test_blur_positive_radius_allocates_two_extra_quads() {
        let mut device = SoftwareDevice::new();
        let mut scene = SceneTree::new();
        let root = scene.create(Node::blur(2));
        let rect = scene.create(Node::rectangle(
            Rect::new(20.0, 20.0, 20.0, 20.0),
            Color::rgb(0, 0, 255),
        ));
        scene.append(root, rect);

        let mut compositor = Compositor::new();
        render(&mut compositor, &mut scene, root, &mut device);

        // One rect quad, one composite quad, two pass quads.
        assert_eq!(compositor.stats().elements, 2);
        assert_eq!(compositor.stats().vertices, 16);
        assert_eq!(compositor.elements().iter().filter(|e| e.layered).count(), 1);

        // Blur bleeds past the rectangle edge.
        assert!(device.frame().get_pixel(19, 30) != Color::WHITE);
        // The interior stays blue-dominated.
        let center = device.frame().get_pixel(30, 30);
        assert!(center.b > 200);
    }

    #[test]
    fn test_projection_depth_sort_back_to_front() {
        let mut device = SoftwareDevice::new();
        let mut scene = SceneTree::new();
        let root = scene.create(Node::basic());
        let projection = scene.create(Node::projection(Mat4::IDENTITY, 1000.0));
        let near = scene.create(Node::transform(Mat4::from_translation(Vec3::new(
            0.0, 0.0, 10.0,
        ))));
        let far = scene.create(Node::transform(Mat4::from_translation(Vec3::new(
            0.0, 0.0, -10.0,
        ))));
        let red = scene.create(Node::rectangle(
            Rect::new(20.0, 20.0, 40.0, 40.0),
            Color::rgb(255, 0, 0),
        ));
        let blue = scene.create(Node::rectangle(
            Rect::new(40.0, 20.0, 40.0, 40.0),
            Color::rgb(0, 0, 255),
        ));
        scene.append(root, projection);
        // Paint order alone would put blue on top.
        scene.append(projection, near);
        scene.append(projection, far);
        scene.append(near, red);
        scene.append(far, blue);

        let mut compositor = Compositor::new();
        render(&mut compositor, &mut scene, root, &mut device);

        let head = compositor
            .elements()
            .iter()
            .position(|e| e.projection)
            .expect("projection element");
        assert_eq!(compositor.elements()[head].group_size, 2);

        // The range is sorted ascending by z: blue (-10) before red (+10).
        let range = &compositor.elements()[head + 1..head + 3];
        assert!(range[0].z < range[1].z);

        // The nearer (red) rectangle wins the overlap.
        let pixel = device.frame().get_pixel(50, 40);
        assert_eq!(pixel, Color::rgb(255, 0, 0));
        // Blue still owns its non-overlapping side.
        let pixel = device.frame().get_pixel(75, 40);
        assert_eq!(pixel, Color::rgb(0, 0, 255));
    }

    #[test]
    fn test_degenerate_layer_bounds_skip_subtree_only() {
        let mut device = SoftwareDevice::new();
        let mut scene = SceneTree::new();
        let root = scene.create(Node::basic());
        let empty_group = scene.create(Node::opacity(0.5));
        let rect = scene.create(Node::rectangle(
            Rect::new(10.0, 10.0, 20.0, 20.0),
            Color::rgb(255, 0, 0),
        ));
        scene.append(root, empty_group);
        scene.append(root, rect);

        let mut compositor = Compositor::new();
        render(&mut compositor, &mut scene, root, &mut device);

        // The empty layer is skipped; the sibling still draws.
        assert_eq!(compositor.stats().layers_skipped, 1);
        assert_eq!(compositor.stats().layers_rendered, 0);
        assert_eq!(device.frame().get_pixel(15, 15), Color::rgb(255, 0, 0));
    }

    #[test]
    fn test_nested_layers_compose() {
        let mut device = SoftwareDevice::new();
        let mut scene = SceneTree::new();
        let outer = scene.create(Node::opacity(0.5));
        let inner = scene.create(Node::opacity(0.5));
        let rect = scene.create(Node::rectangle(
            Rect::new(10.0, 10.0, 20.0, 20.0),
            Color::rgb(255, 0, 0),
        ));
        scene.append(outer, inner);
        scene.append(inner, rect);

        let mut compositor = Compositor::new();
        render(&mut compositor, &mut scene, outer, &mut device);

        assert_eq!(compositor.stats().layers_rendered, 2);

        // Opacity compounds: quarter-strength red over white.
        let pixel = device.frame().get_pixel(15, 15);
        assert!(pixel.r > 250);
        assert!((pixel.g as i32 - 191).abs() <= 4);
    }

    #[test]
    fn test_color_filter_layer() {
        let mut device = SoftwareDevice::new();
        let mut scene = SceneTree::new();
        let filter = scene.create(Node::color_filter(ColorMatrix::grayscale()));
        let rect = scene.create(Node::rectangle(
            Rect::new(10.0, 10.0, 20.0, 20.0),
            Color::rgb(255, 0, 0),
        ));
        scene.append(filter, rect);

        let mut compositor = Compositor::new();
        render(&mut compositor, &mut scene, filter, &mut device);

        // Pure red through the luma matrix lands near 54 gray.
        let pixel = device.frame().get_pixel(15, 15);
        assert_eq!(pixel.r, pixel.g);
        assert_eq!(pixel.g, pixel.b);
        assert!((pixel.r as i32 - 54).abs() <= 3);
    }

    #[test]
    fn test_identity_color_filter_is_pass_through() {
        let mut device = SoftwareDevice::new();
        let mut scene = SceneTree::new();
        let filter = scene.create(Node::color_filter(ColorMatrix::IDENTITY));
        let rect = scene.create(Node::rectangle(
            Rect::new(10.0, 10.0, 20.0, 20.0),
            Color::rgb(255, 0, 0),
        ));
        scene.append(filter, rect);

        let mut compositor = Compositor::new();
        render(&mut compositor, &mut scene, filter, &mut device);

        assert_eq!(compositor.stats().elements, 1);
        assert_eq!(compositor.stats().layers_rendered, 0);
        assert_eq!(device.frame().get_pixel(15, 15), Color::rgb(255, 0, 0));
    }

    #[test]
    fn test_shadow_draws_mask_then_source() {
        let mut device = SoftwareDevice::new();
        let mut scene = SceneTree::new();
        let shadow = scene.create(Node::shadow(
            2.0,
            Point::new(8.0, 8.0),
            Color::rgba(0, 0, 0, 255),
        ));
        let rect = scene.create(Node::rectangle(
            Rect::new(20.0, 20.0, 20.0, 20.0),
            Color::rgb(255, 0, 0),
        ));
        scene.append(shadow, rect);

        let mut compositor = Compositor::new();
        render(&mut compositor, &mut scene, shadow, &mut device);

        // The source draws untouched on top.
        assert_eq!(device.frame().get_pixel(30, 30), Color::rgb(255, 0, 0));

        // Past the source's lower-right edge, the offset shadow shows.
        let pixel = device.frame().get_pixel(44, 44);
        assert!(pixel.r < 100);
        assert!(pixel.g < 100);

        // Far corner stays clear.
        assert_eq!(device.frame().get_pixel(5, 5), Color::WHITE);
    }

    #[test]
    fn test_transform_chain_associativity() {
        let t1 = Mat4::from_translation(Vec3::new(5.0, 10.0, 0.0));
        let t2 = Mat4::from_rotation_z(0.3);
        let rect = Rect::new(4.0, 6.0, 10.0, 12.0);

        // One node carrying t1 * t2.
        let mut scene_a = SceneTree::new();
        let root_a = scene_a.create(Node::transform(t1 * t2));
        let leaf_a = scene_a.create(Node::rectangle(rect, Color::BLACK));
        scene_a.append(root_a, leaf_a);

        // Two chained nodes: t1 outer, t2 inner.
        let mut scene_b = SceneTree::new();
        let root_b = scene_b.create(Node::transform(t1));
        let mid_b = scene_b.create(Node::transform(t2));
        let leaf_b = scene_b.create(Node::rectangle(rect, Color::BLACK));
        scene_b.append(root_b, mid_b);
        scene_b.append(mid_b, leaf_b);

        let mut device = SoftwareDevice::new();
        let mut compositor_a = Compositor::new();
        render(&mut compositor_a, &mut scene_a, root_a, &mut device);
        let quad_a = compositor_a.quads()[0];

        let mut compositor_b = Compositor::new();
        render(&mut compositor_b, &mut scene_b, root_b, &mut device);
        let quad_b = compositor_b.quads()[0];

        for (a, b) in quad_a.points.iter().zip(quad_b.points.iter()) {
            assert!((a.x - b.x).abs() < 1e-4);
            assert!((a.y - b.y).abs() < 1e-4);
        }
    }

    #[test]
    fn test_texture_node_draws() {
        let mut device = SoftwareDevice::new();
        let pixels = vec![0u8, 255, 0, 255].repeat(4);
        let texture = device.create_texture(2, 2, TextureFormat::Rgba8, &pixels);

        let mut scene = SceneTree::new();
        let root = scene.create(Node::basic());
        let node = scene.create(Node::texture(Rect::new(10.0, 10.0, 8.0, 8.0), texture));
        scene.append(root, node);

        let mut compositor = Compositor::new();
        render(&mut compositor, &mut scene, root, &mut device);

        assert_eq!(device.frame().get_pixel(12, 12), Color::rgb(0, 255, 0));
    }

    #[test]
    fn test_render_callback_invoked_with_projected_quad() {
        use std::cell::Cell;
        use std::rc::Rc;

        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();

        let mut device = SoftwareDevice::new();
        let mut scene = SceneTree::new();
        let root = scene.create(Node::transform(Mat4::from_translation(Vec3::new(
            30.0, 0.0, 0.0,
        ))));
        let custom = scene.create(Node::render(
            Rect::new(0.0, 0.0, 10.0, 10.0),
            Box::new(move |device, quad| {
                seen.set(seen.get() + 1);
                device.draw_solid(quad, Color::rgb(255, 0, 255));
            }),
        ));
        scene.append(root, custom);

        let mut compositor = Compositor::new();
        render(&mut compositor, &mut scene, root, &mut device);

        assert_eq!(calls.get(), 1);
        // The quad arrived pre-transformed.
        assert_eq!(device.frame().get_pixel(35, 5), Color::rgb(255, 0, 255));
        assert_eq!(device.frame().get_pixel(5, 5), Color::WHITE);
    }

    #[test]
    fn test_zero_sized_frame_is_recoverable() {
        let mut device = SoftwareDevice::new();
        let mut scene = SceneTree::new();
        let root = scene.create(Node::rectangle(
            Rect::new(0.0, 0.0, 10.0, 10.0),
            Color::BLACK,
        ));

        let mut compositor = Compositor::new();
        compositor.render(&mut scene, root, Size::ZERO, Color::WHITE, &mut device);

        assert_eq!(compositor.stats().elements, 0);
        assert_eq!(compositor.stats().draw_calls, 0);
    }

    #[test]
    fn test_hidden_subtree_not_built() {
        let mut device = SoftwareDevice::new();
        let mut scene = SceneTree::new();
        let root = scene.create(Node::basic());
        let hidden = scene.create(Node::rectangle(
            Rect::new(10.0, 10.0, 20.0, 20.0),
            Color::BLACK,
        ));
        scene.append(root, hidden);
        scene.node_mut(hidden).unwrap().set_hidden(true);

        let mut compositor = Compositor::new();
        render(&mut compositor, &mut scene, root, &mut device);

        assert_eq!(compositor.stats().elements, 0);
        assert_eq!(device.frame().get_pixel(15, 15), Color::WHITE);
    }

    #[test]
    fn test_drawable_children_paint_on_top() {
        let mut device = SoftwareDevice::new();
        let mut scene = SceneTree::new();
        let parent = scene.create(Node::rectangle(
            Rect::new(0.0, 0.0, 40.0, 40.0),
            Color::rgb(0, 0, 255),
        ));
        let child = scene.create(Node::rectangle(
            Rect::new(10.0, 10.0, 10.0, 10.0),
            Color::rgb(255, 0, 0),
        ));
        scene.append(parent, child);

        let mut compositor = Compositor::new();
        render(&mut compositor, &mut scene, parent, &mut device);

        assert_eq!(compositor.stats().elements, 2);
        assert_eq!(device.frame().get_pixel(15, 15), Color::rgb(255, 0, 0));
        assert_eq!(device.frame().get_pixel(35, 35), Color::rgb(0, 0, 255));
    }

    #[test]
    fn test_preprocess_hook_runs_in_prepass() {
        let mut device = SoftwareDevice::new();
        let mut scene = SceneTree::new();
        let root = scene.create(Node::rectangle(
            Rect::new(0.0, 0.0, 10.0, 10.0),
            Color::BLACK,
        ));

        scene.set_preprocess(
            root,
            Box::new(|tree, id| {
                if let Some(node) = tree.node_mut(id) {
                    node.set_color(Color::rgb(0, 255, 0));
                }
            }),
        );
        scene.request_preprocess(root);

        let mut compositor = Compositor::new();
        render(&mut compositor, &mut scene, root, &mut device);

        // The hook recolored the rectangle before it was built.
        assert_eq!(device.frame().get_pixel(5, 5), Color::rgb(0, 255, 0));
    }

    #[test]
    fn test_targets_return_to_pool() {
        let mut device = SoftwareDevice::new();
        let mut scene = SceneTree::new();
        let group = scene.create(Node::opacity(0.5));
        let rect = scene.create(Node::rectangle(
            Rect::new(10.0, 10.0, 20.0, 20.0),
            Color::BLACK,
        ));
        scene.append(group, rect);

        let mut compositor = Compositor::new();
        render(&mut compositor, &mut scene, group, &mut device);

        // The layer's target was released after compositing.
        assert_eq!(compositor.targets.pooled(), 1);

        // A second frame reuses it rather than growing the pool.
        render(&mut compositor, &mut scene, group, &mut device);
        assert_eq!(compositor.targets.pooled(), 1);
    }
}
