//! Host port allocation
//!
//! Ports come from a rotating window above a base offset. This is a coarse
//! best-effort scheme: concurrent runs can collide once the counter wraps.
//! The policy sits behind [`PortAllocator`] so it can be swapped.

use std::sync::atomic::{AtomicU32, Ordering};

/// Width of the rotating port window
pub const PORT_WINDOW: u16 = 1000;

/// Hands out host ports
pub trait PortAllocator: Send + Sync {
    /// Returns the next port; safe under concurrent calls
    fn next(&self) -> u16;
}

/// `base + counter % window`
pub struct RotatingPortAllocator {
    base: u16,
    window: u16,
    counter: AtomicU32,
}

impl RotatingPortAllocator {
    pub fn new(base: u16) -> Self {
        Self::with_window(base, PORT_WINDOW)
    }

    pub fn with_window(base: u16, window: u16) -> Self {
        Self {
            base,
            window: window.max(1),
            counter: AtomicU32::new(0),
        }
    }
}

impl PortAllocator for RotatingPortAllocator {
    fn next(&self) -> u16 {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        self.base + (n % u32::from(self.window)) as u16
    }
}
