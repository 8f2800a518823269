use std::cell::UnsafeCell;

/// Shared cell for state whose access is serialized by the graph schedule
/// rather than by a lock.
///
/// A port buffer has exactly one writer per cycle (its owning node) and is
/// only read by nodes in later levels, which the level barrier orders after
/// the writer. The render pool relies on that to hand out references
/// without locking on the real-time thread.
#[derive(Debug)]
pub struct UnsafeMutex<T> {
    data: UnsafeCell<T>,
}

impl<T> UnsafeMutex<T> {
    pub fn new(data: T) -> Self {
        UnsafeMutex {
            data: UnsafeCell::new(data),
        }
    }

    /// Exclusive access. The caller must be the single writer for the
    /// current phase of the cycle.
    #[allow(clippy::mut_from_ref)]
    pub fn lock(&self) -> &mut T {
        unsafe { &mut *self.data.get() }
    }

    /// Shared access for readers ordered after the writer.
    pub fn get(&self) -> &T {
        unsafe { &*self.data.get() }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

unsafe impl<T: Send> Send for UnsafeMutex<T> {}
unsafe impl<T: Send> Sync for UnsafeMutex<T> {}

#[cfg(test)]
mod tests {
    use super::UnsafeMutex;
    use std::sync::Arc;

    #[test]
    fn lock_and_get_see_same_value() {
        let cell = Arc::new(UnsafeMutex::new(vec![1.0_f32; 4]));
        cell.lock()[2] = 0.5;
        assert_eq!(cell.get()[2], 0.5);
        let inner = Arc::try_unwrap(cell).unwrap().into_inner();
        assert_eq!(inner, vec![1.0, 1.0, 0.5, 1.0]);
    }
}
