//! Frame driver.
//!
//! Glue between the animation scheduler and the compositor: one `frame()`
//! call per display refresh ticks animations, renders the scene, and
//! reports whether animation progress warrants another frame. Everything is
//! single-threaded; the scene is shared with animation setters through
//! `Rc<RefCell<_>>`.

use crate::compositor::{Compositor, CompositorSettings};
use animation::Scheduler;
use common::{Color, Point, Size};
use gpu::Device;
use scene::{hit_test, NodeId, SceneTree};
use std::cell::RefCell;
use std::rc::Rc;

/// An interactive surface: scene, scheduler, compositor and backend.
pub struct Surface {
    scene: Rc<RefCell<SceneTree>>,
    scheduler: Scheduler,
    compositor: Compositor,
    device: Box<dyn Device>,
    root: Option<NodeId>,
    size: Size,
    clear: Color,
}

impl Surface {
    pub fn new(device: Box<dyn Device>, width: f32, height: f32) -> Self {
        Self::with_settings(device, width, height, CompositorSettings::default())
    }

    pub fn with_settings(
        device: Box<dyn Device>,
        width: f32,
        height: f32,
        settings: CompositorSettings,
    ) -> Self {
        Self {
            scene: Rc::new(RefCell::new(SceneTree::new())),
            scheduler: Scheduler::new(),
            compositor: Compositor::with_settings(settings),
            device,
            root: None,
            size: Size::new(width, height),
            clear: Color::WHITE,
        }
    }

    /// Shared handle to the scene, for building the tree and for animation
    /// setters to capture.
    pub fn scene(&self) -> Rc<RefCell<SceneTree>> {
        self.scene.clone()
    }

    /// Set the node rendered as the tree root.
    pub fn set_root(&mut self, root: NodeId) {
        self.root = Some(root);
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    /// The backend, for texture creation and pixel readback.
    pub fn device_mut(&mut self) -> &mut dyn Device {
        self.device.as_mut()
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        self.size = Size::new(width, height);
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn set_clear_color(&mut self, color: Color) {
        self.clear = color;
    }

    /// Advance animations to `now` (seconds) and render one frame.
    ///
    /// Returns whether another frame should be requested: true while any
    /// animation is running or scheduled. The system otherwise renders
    /// strictly on demand.
    pub fn frame(&mut self, now: f64) -> bool {
        self.scheduler.tick(now);

        if let Some(root) = self.root {
            let mut scene = self.scene.borrow_mut();
            self.compositor.render(
                &mut scene,
                root,
                self.size,
                self.clear,
                self.device.as_mut(),
            );
        }

        self.scheduler.is_active()
    }

    /// Hit test a surface-space position against the scene's pointer
    /// targets.
    pub fn hit_test(&self, position: Point) -> Option<NodeId> {
        let root = self.root?;
        let scene = self.scene.borrow();
        hit_test(&scene, root, position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use animation::{Animation, Easing, KeyframeAnimation};
    use common::Rect;
    use gpu::SoftwareDevice;
    use scene::Node;

    fn surface() -> Surface {
        Surface::new(Box::new(SoftwareDevice::new()), 64.0, 64.0)
    }

    #[test]
    fn test_frame_renders_and_reports_idle() {
        let mut surface = surface();
        let scene = surface.scene();
        let root = scene.borrow_mut().create(Node::rectangle(
            Rect::new(0.0, 0.0, 32.0, 32.0),
            Color::rgb(255, 0, 0),
        ));
        surface.set_root(root);

        // No animations: no further frames requested.
        assert!(!surface.frame(0.0));
        assert_eq!(surface.compositor().stats().elements, 1);
    }

    #[test]
    fn test_animation_drives_scene_property() {
        let mut surface = surface();
        let scene = surface.scene();
        let root = scene.borrow_mut().create(Node::basic());
        let group = scene.borrow_mut().create(Node::opacity(1.0));
        let rect = scene.borrow_mut().create(Node::rectangle(
            Rect::new(0.0, 0.0, 64.0, 64.0),
            Color::rgb(0, 0, 0),
        ));
        scene.borrow_mut().append(root, group);
        scene.borrow_mut().append(group, rect);
        surface.set_root(root);

        // Fade the group out over one second.
        let target = scene.clone();
        let mut fade = KeyframeAnimation::new(
            1.0,
            Box::new(move |value: f32| {
                if let Some(node) = target.borrow_mut().node_mut(group) {
                    node.set_opacity(value);
                }
            }),
        );
        fade.set_easing(Easing::Linear);
        fade.add_keyframe(0.0, 1.0);
        fade.add_keyframe(1.0, 0.0);
        let fade: Box<dyn Animation> = Box::new(fade);
        surface.scheduler_mut().start(fade, 0.0);

        // Mid-animation: the group is translucent, more frames wanted.
        assert!(surface.frame(0.5));
        let opacity = scene
            .borrow()
            .node(group)
            .unwrap()
            .as_opacity()
            .unwrap()
            .opacity;
        assert!((opacity - 0.5).abs() < 1e-4);

        // Past the end: animation completed, no more frames needed.
        assert!(!surface.frame(1.5));
        let opacity = scene
            .borrow()
            .node(group)
            .unwrap()
            .as_opacity()
            .unwrap()
            .opacity;
        assert_eq!(opacity, 0.0);
    }

    #[test]
    fn test_scheduled_animation_keeps_surface_active() {
        let mut surface = surface();
        let scene = surface.scene();
        let root = scene.borrow_mut().create(Node::basic());
        surface.set_root(root);

        let noop: Box<dyn Animation> = {
            let mut animation =
                KeyframeAnimation::new(1.0, Box::new(|_: f32| {}));
            animation.add_keyframe(0.0, 0.0);
            animation.add_keyframe(1.0, 1.0);
            Box::new(animation)
        };
        surface.scheduler_mut().start(noop, 0.5);

        // Still waiting on the delayed start.
        assert!(surface.frame(0.1));
        assert_eq!(surface.scheduler().animations_scheduled(), 1);
        assert_eq!(surface.scheduler().animations_running(), 0);
    }

    #[test]
    fn test_surface_hit_test() {
        let mut surface = surface();
        let scene = surface.scene();
        let root = scene.borrow_mut().create(Node::basic());
        let button = scene.borrow_mut().create(Node::rectangle(
            Rect::new(10.0, 10.0, 20.0, 20.0),
            Color::rgb(0, 0, 255),
        ));
        scene.borrow_mut().append(root, button);
        scene.borrow_mut().node_mut(button).unwrap().set_pointer_target(true);
        surface.set_root(root);

        assert_eq!(surface.hit_test(Point::new(15.0, 15.0)), Some(button));
        assert_eq!(surface.hit_test(Point::new(50.0, 50.0)), None);
    }
}
