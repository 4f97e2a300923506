//! Keyframe animation core.

use crate::easing::Easing;
use crate::value::Animatable;

/// Playback direction across iterations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Normal,
    Reverse,
    /// Mirror every odd iteration.
    Alternate,
    /// Mirror every even iteration.
    AlternateReverse,
}

/// A (time, value) waypoint. Times live in 0.0 - 1.0 of one iteration.
#[derive(Clone, Copy, Debug)]
pub struct Keyframe<T> {
    pub time: f32,
    pub value: T,
}

/// Object-safe face of a running animation, as the scheduler sees it.
///
/// `tick` receives the absolute elapsed seconds since the animation's start
/// and is defined only while `is_running()`.
pub trait Animation {
    fn tick(&mut self, elapsed: f32);
    fn is_running(&self) -> bool;
    fn set_running(&mut self, running: bool);
}

/// Time-driven property mutator over an ordered keyframe list.
///
/// The endpoint is an arbitrary `(target, value)` setter: the closure
/// captures its target and is invoked with the blended value every tick.
pub struct KeyframeAnimation<T: Animatable> {
    keyframes: Vec<Keyframe<T>>,
    duration: f32,
    /// Iteration count; -1 repeats forever.
    iterations: i32,
    direction: Direction,
    easing: Easing,
    running: bool,
    setter: Box<dyn FnMut(T)>,
}

impl<T: Animatable> KeyframeAnimation<T> {
    pub fn new(duration: f32, setter: Box<dyn FnMut(T)>) -> Self {
        assert!(duration > 0.0, "animation duration must be positive");
        Self {
            keyframes: Vec::new(),
            duration,
            iterations: 1,
            direction: Direction::Normal,
            easing: Easing::default(),
            running: false,
            setter,
        }
    }

    /// Append a keyframe. Times must be strictly increasing within 0.0 - 1.0.
    pub fn add_keyframe(&mut self, time: f32, value: T) {
        assert!((0.0..=1.0).contains(&time), "keyframe time out of range");
        if let Some(last) = self.keyframes.last() {
            assert!(time > last.time, "keyframe times must be strictly increasing");
        }
        self.keyframes.push(Keyframe { time, value });
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    /// Change the duration. Timing may not be mutated while running.
    pub fn set_duration(&mut self, duration: f32) {
        assert!(!self.running, "cannot change duration while running");
        assert!(duration > 0.0, "animation duration must be positive");
        self.duration = duration;
    }

    pub fn iterations(&self) -> i32 {
        self.iterations
    }

    /// Change the iteration count (-1 = infinite). Not while running.
    pub fn set_iterations(&mut self, iterations: i32) {
        assert!(!self.running, "cannot change iterations while running");
        self.iterations = iterations;
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    pub fn set_easing(&mut self, easing: Easing) {
        self.easing = easing;
    }

    /// Blend between the keyframes bracketing normalized time `s`.
    ///
    /// Values outside the keyframe range clamp to the nearest edge.
    fn sample(&self, s: f32) -> T {
        let first = &self.keyframes[0];
        if s <= first.time {
            return first.value;
        }
        let last = &self.keyframes[self.keyframes.len() - 1];
        if s >= last.time {
            return last.value;
        }

        for pair in self.keyframes.windows(2) {
            if s <= pair[1].time {
                let span = pair[1].time - pair[0].time;
                let fraction = if span <= f32::EPSILON {
                    1.0
                } else {
                    (s - pair[0].time) / span
                };
                let eased = self.easing.apply(fraction);
                return T::blend(pair[0].value, pair[1].value, eased);
            }
        }

        last.value
    }
}

impl<T: Animatable> Animation for KeyframeAnimation<T> {
    fn tick(&mut self, elapsed: f32) {
        assert!(self.running, "tick on an animation that is not running");
        if self.keyframes.is_empty() {
            return;
        }

        let mut iteration = (elapsed / self.duration).floor() as i64;
        let mut local = elapsed % self.duration;
        let mut stop_after = false;

        if self.iterations >= 0 && iteration >= self.iterations as i64 {
            // Clamp to the final iteration and apply the end-of-range value
            // exactly once before stopping.
            iteration = (self.iterations as i64 - 1).max(0);
            local = self.duration;
            stop_after = true;
        }

        let mut s = local / self.duration;
        let mirrored = match self.direction {
            Direction::Normal => false,
            Direction::Reverse => true,
            Direction::Alternate => iteration % 2 == 1,
            Direction::AlternateReverse => iteration % 2 == 0,
        };
        if mirrored {
            s = 1.0 - s;
        }

        let value = self.sample(s);
        (self.setter)(value);

        if stop_after {
            self.running = false;
        }
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn set_running(&mut self, running: bool) {
        self.running = running;
    }
}
