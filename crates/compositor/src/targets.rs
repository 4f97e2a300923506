//! Reusable offscreen target pool.

use gpu::{Device, TargetId};

/// Pools offscreen color targets by exact size.
///
/// Layer renders acquire a target and release it back the moment its
/// texture has been consumed, so a frame with many effect nodes touches a
/// handful of GPU objects instead of churning one per layer.
pub struct TargetPool {
    free: Vec<TargetId>,
    max_pooled: usize,
}

impl TargetPool {
    pub fn new(max_pooled: usize) -> Self {
        Self {
            free: Vec::new(),
            max_pooled,
        }
    }

    /// Take a target of exactly `width` x `height`, reusing a pooled one
    /// when available.
    pub fn acquire(&mut self, device: &mut dyn Device, width: u32, height: u32) -> TargetId {
        let width = width.max(1);
        let height = height.max(1);

        if let Some(position) = self
            .free
            .iter()
            .position(|&id| device.target_size(id) == (width, height))
        {
            return self.free.swap_remove(position);
        }

        device.create_target(width, height)
    }

    /// Return a target to the pool, destroying it if the pool is full.
    pub fn release(&mut self, device: &mut dyn Device, id: TargetId) {
        if self.free.len() < self.max_pooled {
            self.free.push(id);
        } else {
            device.destroy_target(id);
        }
    }

    /// Destroy every pooled target.
    pub fn clear(&mut self, device: &mut dyn Device) {
        for id in self.free.drain(..) {
            device.destroy_target(id);
        }
    }

    pub fn pooled(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Color;
    use gpu::SoftwareDevice;

    #[test]
    fn test_exact_size_reuse() {
        let mut device = SoftwareDevice::new();
        device.begin_frame(8, 8, Color::BLACK);
        let mut pool = TargetPool::new(4);

        let a = pool.acquire(&mut device, 32, 32);
        pool.release(&mut device, a);

        let b = pool.acquire(&mut device, 32, 32);
        assert_eq!(a, b);
        assert_eq!(pool.pooled(), 0);

        // A different size allocates fresh.
        let c = pool.acquire(&mut device, 16, 16);
        assert_ne!(b, c);
    }

    #[test]
    fn test_pool_bound() {
        let mut device = SoftwareDevice::new();
        device.begin_frame(8, 8, Color::BLACK);
        let mut pool = TargetPool::new(1);

        let a = pool.acquire(&mut device, 8, 8);
        let b = pool.acquire(&mut device, 8, 8);
        pool.release(&mut device, a);
        pool.release(&mut device, b);

        // Only one target is retained; the second was destroyed.
        assert_eq!(pool.pooled(), 1);
    }
}
