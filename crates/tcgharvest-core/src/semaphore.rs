//! Counting semaphore bounding concurrent live fetches

use std::sync::{Condvar, Mutex};

/// Counting semaphore built on `Mutex + Condvar`.
pub struct Semaphore {
    permits: Mutex<usize>,
    cond: Condvar,
}

/// Releases one permit on drop.
pub struct Permit<'a>(&'a Semaphore);

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            cond: Condvar::new(),
        }
    }

    /// Block until a permit is free, then take it.
    pub fn acquire(&self) -> Permit<'_> {
        let mut free = self.permits.lock().expect("semaphore poisoned");
        while *free == 0 {
            free = self.cond.wait(free).expect("semaphore poisoned");
        }
        *free -= 1;
        Permit(self)
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        *self.0.permits.lock().expect("semaphore poisoned") += 1;
        self.0.cond.notify_one();
    }
}
