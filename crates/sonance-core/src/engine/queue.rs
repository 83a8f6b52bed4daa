//! Bounded message queues between caller threads and the audio side
//!
//! Two backings share one interface:
//!
//! - [`QueueKind::LockFree`]: a `crossbeam` bounded MPMC ring. Push and pop
//!   are wait-free from every thread.
//! - [`QueueKind::Locked`]: a `parking_lot` mutex around a pre-allocated
//!   `VecDeque`, for runtimes whose atomics or threads are unreliable. The
//!   audio side only ever uses `try_lock`, so it skips a turn instead of
//!   waiting on a caller.
//!
//! Neither backing allocates after construction.

use std::collections::VecDeque;

use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Which backing a [`MessageQueue`] uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueKind {
    LockFree,
    Locked,
}

impl Default for QueueKind {
    fn default() -> Self {
        if cfg!(feature = "lock-free-queue") {
            QueueKind::LockFree
        } else {
            QueueKind::Locked
        }
    }
}

enum Backing<T> {
    LockFree(ArrayQueue<T>),
    Locked(Mutex<VecDeque<T>>),
}

/// Bounded FIFO shared by reference between threads
pub struct MessageQueue<T> {
    backing: Backing<T>,
    capacity: usize,
}

impl<T> MessageQueue<T> {
    pub fn new(kind: QueueKind, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let backing = match kind {
            QueueKind::LockFree => Backing::LockFree(ArrayQueue::new(capacity)),
            QueueKind::Locked => Backing::Locked(Mutex::new(VecDeque::with_capacity(capacity))),
        };
        Self { backing, capacity }
    }

    pub fn kind(&self) -> QueueKind {
        match self.backing {
            Backing::LockFree(_) => QueueKind::LockFree,
            Backing::Locked(_) => QueueKind::Locked,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Push from a caller thread; hands the value back when full
    pub fn push(&self, value: T) -> Result<(), T> {
        match &self.backing {
            Backing::LockFree(q) => q.push(value),
            Backing::Locked(q) => Self::push_locked(&mut q.lock(), value, self.capacity),
        }
    }

    /// Push from the audio side; also gives up when the lock is contended
    pub fn try_push(&self, value: T) -> Result<(), T> {
        match &self.backing {
            Backing::LockFree(q) => q.push(value),
            Backing::Locked(q) => match q.try_lock() {
                Some(mut guard) => Self::push_locked(&mut guard, value, self.capacity),
                None => Err(value),
            },
        }
    }

    /// Pop from a caller thread
    pub fn pop(&self) -> Option<T> {
        match &self.backing {
            Backing::LockFree(q) => q.pop(),
            Backing::Locked(q) => q.lock().pop_front(),
        }
    }

    /// Pop from the audio side; `None` when empty or contended
    pub fn try_pop(&self) -> Option<T> {
        match &self.backing {
            Backing::LockFree(q) => q.pop(),
            Backing::Locked(q) => q.try_lock()?.pop_front(),
        }
    }

    pub fn len(&self) -> usize {
        match &self.backing {
            Backing::LockFree(q) => q.len(),
            Backing::Locked(q) => q.lock().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push_locked(queue: &mut VecDeque<T>, value: T, capacity: usize) -> Result<(), T> {
        // capacity was reserved up front; staying below it never reallocates
        if queue.len() >= capacity {
            return Err(value);
        }
        queue.push_back(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const KINDS: [QueueKind; 2] = [QueueKind::LockFree, QueueKind::Locked];

    #[test]
    fn test_fifo_and_bounded() {
        for kind in KINDS {
            let queue = MessageQueue::new(kind, 3);
            assert_eq!(queue.kind(), kind);
            for i in 0..3 {
                queue.push(i).unwrap();
            }
            assert_eq!(queue.push(99), Err(99));
            assert_eq!(queue.try_push(98), Err(98));
            assert_eq!(queue.len(), 3);
            assert_eq!(queue.pop(), Some(0));
            assert_eq!(queue.try_pop(), Some(1));
            assert_eq!(queue.pop(), Some(2));
            assert!(queue.is_empty());
            assert_eq!(queue.try_pop(), None);
        }
    }

    #[test]
    fn test_try_pop_skips_while_locked() {
        let queue = MessageQueue::new(QueueKind::Locked, 4);
        queue.push(1).unwrap();
        let Backing::Locked(inner) = &queue.backing else {
            unreachable!()
        };
        let guard = inner.lock();
        assert_eq!(queue.try_pop(), None);
        assert_eq!(queue.try_push(2), Err(2));
        drop(guard);
        assert_eq!(queue.try_pop(), Some(1));
    }

    #[test]
    fn test_many_producers_one_consumer() {
        for kind in KINDS {
            let queue = Arc::new(MessageQueue::new(kind, 4000));
            let producers: Vec<_> = (0..4)
                .map(|p| {
                    let queue = queue.clone();
                    thread::spawn(move || {
                        for i in 0..1000 {
                            queue.push(p * 1000 + i).unwrap();
                        }
                    })
                })
                .collect();
            for producer in producers {
                producer.join().unwrap();
            }
            let mut seen: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
            seen.sort_unstable();
            assert_eq!(seen, (0..4000).collect::<Vec<_>>());
        }
    }
}
