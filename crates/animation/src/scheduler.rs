//! Frame-tick animation scheduler.

use crate::animation::Animation;
use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Handle to an animation managed by the [`Scheduler`].
    pub struct AnimationKey;
}

/// Synchronous notifications emitted during [`Scheduler::tick`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnimationEvent {
    /// A scheduled animation's start time elapsed and it began running.
    Started(AnimationKey),
    /// A running animation finished naturally and was evicted.
    Completed(AnimationKey),
}

#[derive(Clone, Copy)]
enum State {
    /// Waiting for its absolute start time.
    Scheduled { start_at: f64 },
    /// Ticking every frame, measured from its start time.
    Running { started_at: f64 },
}

struct Entry {
    animation: Box<dyn Animation>,
    state: State,
}

/// Owns scheduled and running animations and advances them once per frame.
///
/// The two queue-length accessors are the sole signal by which the frame
/// driver decides whether to request another frame; everything else renders
/// on demand.
pub struct Scheduler {
    entries: SlotMap<AnimationKey, Entry>,
    scheduled: Vec<AnimationKey>,
    running: Vec<AnimationKey>,
    now: f64,
    observers: Vec<Box<dyn FnMut(AnimationEvent)>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            entries: SlotMap::with_key(),
            scheduled: Vec::new(),
            running: Vec::new(),
            now: 0.0,
            observers: Vec::new(),
        }
    }

    /// Register a synchronous observer for start/completion notifications.
    pub fn observe(&mut self, observer: impl FnMut(AnimationEvent) + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Submit an animation. A positive delay schedules it for a future
    /// start; otherwise it runs immediately.
    pub fn start(&mut self, mut animation: Box<dyn Animation>, delay: f64) -> AnimationKey {
        if delay > 0.0 {
            let start_at = self.now + delay;
            let key = self.entries.insert(Entry {
                animation,
                state: State::Scheduled { start_at },
            });
            self.scheduled.push(key);
            key
        } else {
            animation.set_running(true);
            let key = self.entries.insert(Entry {
                animation,
                state: State::Running { started_at: self.now },
            });
            self.running.push(key);
            self.emit(AnimationEvent::Started(key));
            key
        }
    }

    /// Remove an animation from whichever queue holds it.
    ///
    /// Idempotent: stopping an unknown or already-evicted key is a no-op.
    pub fn stop(&mut self, key: AnimationKey) {
        let Some(mut entry) = self.entries.remove(key) else {
            return;
        };
        entry.animation.set_running(false);
        self.scheduled.retain(|&k| k != key);
        self.running.retain(|&k| k != key);
    }

    /// Advance all animations to absolute time `now` (seconds).
    ///
    /// First promotes scheduled animations whose start time elapsed, then
    /// ticks the running set with each animation's locally elapsed time and
    /// evicts the ones that stopped themselves during the tick.
    pub fn tick(&mut self, now: f64) {
        self.now = now;

        // Promote due animations into the running queue.
        let mut promoted = Vec::new();
        let entries = &self.entries;
        self.scheduled.retain(|&key| {
            let due = matches!(
                entries.get(key).map(|e| &e.state),
                Some(State::Scheduled { start_at }) if *start_at <= now
            );
            if due {
                promoted.push(key);
            }
            !due
        });

        for key in promoted {
            if let Some(entry) = self.entries.get_mut(key) {
                let State::Scheduled { start_at } = entry.state else {
                    continue;
                };
                entry.state = State::Running { started_at: start_at };
                entry.animation.set_running(true);
                self.running.push(key);
                self.emit(AnimationEvent::Started(key));
            }
        }

        // Tick the running set; completion is self-reported.
        let mut completed = Vec::new();
        let keys: Vec<AnimationKey> = self.running.clone();
        for key in keys {
            let Some(entry) = self.entries.get_mut(key) else {
                continue;
            };
            let State::Running { started_at } = entry.state else {
                continue;
            };
            entry.animation.tick((now - started_at) as f32);
            if !entry.animation.is_running() {
                completed.push(key);
            }
        }

        for key in completed {
            tracing::trace!(?key, "animation completed");
            self.entries.remove(key);
            self.running.retain(|&k| k != key);
            self.emit(AnimationEvent::Completed(key));
        }
    }

    /// Number of animations currently ticking.
    pub fn animations_running(&self) -> usize {
        self.running.len()
    }

    /// Number of animations waiting on a start time.
    pub fn animations_scheduled(&self) -> usize {
        self.scheduled.len()
    }

    /// Whether the frame driver should request another frame.
    pub fn is_active(&self) -> bool {
        !self.running.is_empty() || !self.scheduled.is_empty()
    }

    /// Drop every animation without notifications.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.scheduled.clear();
        self.running.clear();
    }

    fn emit(&mut self, event: AnimationEvent) {
        for observer in &mut self.observers {
            observer(event);
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::KeyframeAnimation;
    use crate::easing::Easing;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ramp(duration: f32, iterations: i32) -> (Box<KeyframeAnimation<f32>>, Rc<RefCell<Vec<f32>>>) {
        let applied = Rc::new(RefCell::new(Vec::new()));
        let sink = applied.clone();
        let mut animation = KeyframeAnimation::new(
            duration,
            Box::new(move |value| sink.borrow_mut().push(value)),
        );
        animation.set_iterations(iterations);
        animation.set_easing(Easing::Linear);
        animation.add_keyframe(0.0, 0.0);
        animation.add_keyframe(1.0, 1.0);
        (Box::new(animation), applied)
    }

    fn event_log(scheduler: &mut Scheduler) -> Rc<RefCell<Vec<AnimationEvent>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        scheduler.observe(move |event| sink.borrow_mut().push(event));
        events
    }

    #[test]
    fn test_delayed_start_promotion() {
        let mut scheduler = Scheduler::new();
        let events = event_log(&mut scheduler);
        let (animation, _) = ramp(1.0, 1);

        let key = scheduler.start(animation, 0.2);
        assert_eq!(scheduler.animations_scheduled(), 1);
        assert_eq!(scheduler.animations_running(), 0);

        scheduler.tick(0.1);
        assert_eq!(scheduler.animations_scheduled(), 1);
        assert_eq!(scheduler.animations_running(), 0);
        assert!(events.borrow().is_empty());

        scheduler.tick(0.25);
        assert_eq!(scheduler.animations_scheduled(), 0);
        assert_eq!(scheduler.animations_running(), 1);
        assert_eq!(*events.borrow(), vec![AnimationEvent::Started(key)]);
    }

    #[test]
    fn test_local_time_measured_from_scheduled_start() {
        let mut scheduler = Scheduler::new();
        let (animation, applied) = ramp(1.0, 1);

        scheduler.start(animation, 0.5);
        scheduler.tick(0.75);

        // Elapsed is measured against the scheduled start (0.5), not the
        // promoting tick.
        let samples = applied.borrow();
        assert_eq!(samples.len(), 1);
        assert!((samples[0] - 0.25).abs() < 1e-5);
    }

    #[test]
    fn test_zero_delay_runs_immediately() {
        let mut scheduler = Scheduler::new();
        let events = event_log(&mut scheduler);
        let (animation, _) = ramp(1.0, 1);

        let key = scheduler.start(animation, 0.0);
        assert_eq!(scheduler.animations_running(), 1);
        assert_eq!(*events.borrow(), vec![AnimationEvent::Started(key)]);
    }

    #[test]
    fn test_completion_evicts_and_notifies() {
        let mut scheduler = Scheduler::new();
        let events = event_log(&mut scheduler);
        let (animation, _) = ramp(1.0, 1);

        let key = scheduler.start(animation, 0.0);
        scheduler.tick(0.5);
        assert_eq!(scheduler.animations_running(), 1);

        scheduler.tick(1.5);
        assert_eq!(scheduler.animations_running(), 0);
        assert!(!scheduler.is_active());
        assert_eq!(
            *events.borrow(),
            vec![
                AnimationEvent::Started(key),
                AnimationEvent::Completed(key)
            ]
        );
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut scheduler = Scheduler::new();
        let (animation, _) = ramp(1.0, -1);

        let key = scheduler.start(animation, 0.0);
        scheduler.tick(0.5);

        scheduler.stop(key);
        assert_eq!(scheduler.animations_running(), 0);

        // Stopping again, or stopping a never-known key, is a no-op.
        scheduler.stop(key);
        assert_eq!(scheduler.animations_running(), 0);
    }

    #[test]
    fn test_promoted_animation_ticks_same_frame() {
        let mut scheduler = Scheduler::new();
        let (animation, applied) = ramp(1.0, -1);

        scheduler.start(animation, 0.2);
        scheduler.tick(0.2);

        assert_eq!(applied.borrow().len(), 1);
    }
}
