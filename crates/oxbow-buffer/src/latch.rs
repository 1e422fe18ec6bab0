//! Wakeup latch for the background writer.

use parking_lot::{Condvar, Mutex};

/// A one-bit wakeup primitive shared between victim selection and the
/// background writer.
///
/// The writer parks in [`Latch::wait`] while hibernating; the next victim
/// request sets the latch. Setting may enter the kernel to wake the waiter,
/// so callers signal with the pool lock released.
#[derive(Debug)]
pub struct Latch {
    set: Mutex<bool>,
    cvar: Condvar,
}

impl Latch {
    /// Creates a new unset latch.
    pub fn new() -> Self {
        Self {
            set: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    /// Sets the latch and wakes any waiters.
    pub fn set(&self) {
        let mut set = self.set.lock();
        *set = true;
        self.cvar.notify_all();
    }

    /// Blocks until the latch is set. The latch stays set until reset.
    pub fn wait(&self) {
        let mut set = self.set.lock();
        while !*set {
            self.cvar.wait(&mut set);
        }
    }

    /// Clears the latch.
    pub fn reset(&self) {
        *self.set.lock() = false;
    }

    /// Returns true if the latch is currently set.
    pub fn is_set(&self) -> bool {
        *self.set.lock()
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}
