// Shared ownership of an external resource that shutdown must release
// even when the worker using it is stuck.

use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::time::Duration;

pub struct ResourceHandle<T: ?Sized> {
    inner: Arc<Mutex<Option<Box<T>>>>,
}

impl<T: ?Sized> Clone for ResourceHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: ?Sized> ResourceHandle<T> {
    pub fn new(resource: Box<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(resource))),
        }
    }

    /// Lock the resource for one operation. `None` inside the guard means it was released.
    pub fn lock(&self) -> MutexGuard<'_, Option<Box<T>>> {
        self.inner.lock()
    }

    pub fn is_released(&self) -> bool {
        self.inner.lock().is_none()
    }

    /// Take the resource out and hand it to `release`.
    ///
    /// Waits at most `wait` for the current holder. Returns false when the lock
    /// could not be taken in time; the resource is then dropped with the last handle.
    pub fn release_with<F>(&self, wait: Duration, release: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        match self.inner.try_lock_for(wait) {
            Some(mut guard) => {
                if let Some(mut resource) = guard.take() {
                    release(resource.as_mut());
                }
                true
            }
            None => false,
        }
    }
}
