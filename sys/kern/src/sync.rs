// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mutex and counting-semaphore primitives (C4), each with a bounded FIFO
//! waiter queue.
//!
//! These are pure bookkeeping structures: they hold thread-table indexes,
//! never references, and are only ever mutated from inside the syscall
//! dispatcher (`syscall.rs`), which already has exclusive access to the
//! thread table for the duration of the call.

use abi::{MAX_MUTEXES, MAX_SEMAPHORES, MUTEX_QUEUE_CAP, SEM_QUEUE_CAP};
use unwrap_lite::UnwrapLite;

/// A fixed-capacity FIFO queue of thread-table indexes.
///
/// Capacity is proved statically rather than checked at runtime: a thread
/// can occupy at most one waiter queue system-wide (it is blocked on at
/// most one resource at a time), so no queue can ever hold more waiters
/// than there are threads. `N` is sized to the reference firmware's
/// documented per-primitive capacity, which is in turn bounded by the
/// thread count.
#[derive(Debug)]
pub struct WaitQueue<const N: usize> {
    items: [usize; N],
    len: usize,
}

impl<const N: usize> WaitQueue<N> {
    pub const fn new() -> Self {
        Self {
            items: [0; N],
            len: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn front(&self) -> Option<usize> {
        (self.len > 0).then(|| self.items[0])
    }

    /// Appends `idx` to the back of the queue. Panics if the queue is full:
    /// per the static capacity proof above, this is an internal invariant
    /// violation, not a recoverable caller error.
    pub fn push_back(&mut self, idx: usize) {
        (self.len < N).then_some(()).unwrap_lite();
        self.items[self.len] = idx;
        self.len += 1;
    }

    /// Removes and returns the front of the queue, shifting the rest down.
    pub fn pop_front(&mut self) -> Option<usize> {
        if self.len == 0 {
            return None;
        }
        let head = self.items[0];
        for i in 1..self.len {
            self.items[i - 1] = self.items[i];
        }
        self.len -= 1;
        Some(head)
    }

    /// Removes every occurrence of `idx`, compacting the queue in place.
    /// Used when a thread is killed while it sits in a waiter queue it does
    /// not own.
    pub fn remove(&mut self, idx: usize) {
        let mut write = 0;
        for read in 0..self.len {
            if self.items[read] != idx {
                self.items[write] = self.items[read];
                write += 1;
            }
        }
        self.len = write;
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.items[..self.len].iter().copied()
    }
}

/// Outcome of attempting to acquire a mutex or semaphore: either it
/// succeeded immediately, or the calling thread must block.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AcquireOutcome {
    Acquired,
    Blocked,
}

/// A single mutex: at most one owner, plus a FIFO of blocked waiters.
#[derive(Debug)]
pub struct Mutex {
    locked: bool,
    owner: usize,
    pub waiters: WaitQueue<MUTEX_QUEUE_CAP>,
}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            locked: false,
            owner: 0,
            waiters: WaitQueue::new(),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn owner(&self) -> Option<usize> {
        self.locked.then_some(self.owner)
    }

    /// Implements syscall 2 (`lock`). On `Blocked`, the caller is
    /// responsible for transitioning `current` to `BlockedMutex` and, if
    /// priority inheritance applies, boosting the owner's priority — this
    /// function only performs the enqueue, since it has no access to the
    /// thread table.
    pub fn lock(&mut self, current: usize) -> AcquireOutcome {
        if self.locked {
            self.waiters.push_back(current);
            AcquireOutcome::Blocked
        } else {
            self.locked = true;
            self.owner = current;
            AcquireOutcome::Acquired
        }
    }

    /// Implements syscall 3 (`unlock`). Returns the thread that now owns the
    /// mutex (the dequeued waiter), if any, so the caller can mark it
    /// `Ready`. A no-op (returning `None` without releasing anything) unless
    /// `current` is the owner.
    pub fn unlock(&mut self, current: usize) -> Option<Option<usize>> {
        if !self.locked || self.owner != current {
            return None;
        }
        if let Some(next) = self.waiters.pop_front() {
            self.owner = next;
            Some(Some(next))
        } else {
            self.locked = false;
            Some(None)
        }
    }

    /// Removes `idx` from this mutex entirely: if it's the owner, releases
    /// the lock (handing off to the next waiter, same as `unlock`); if it's
    /// merely queued, compacts it out. Used by `kill_thread`.
    pub fn force_release(&mut self, idx: usize) -> Option<usize> {
        let mut woken = None;
        if self.locked && self.owner == idx {
            if let Some(next) = self.waiters.pop_front() {
                self.owner = next;
                woken = Some(next);
            } else {
                self.locked = false;
            }
        }
        self.waiters.remove(idx);
        woken
    }
}

/// A counting semaphore: a non-negative count plus a FIFO of blocked
/// waiters. Invariant: `count > 0 ⇒ waiters.is_empty()`.
#[derive(Debug)]
pub struct Semaphore {
    count: u32,
    pub waiters: WaitQueue<SEM_QUEUE_CAP>,
}

impl Semaphore {
    pub const fn new(initial: u32) -> Self {
        Self {
            count: initial,
            waiters: WaitQueue::new(),
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Implements syscall 4 (`wait`).
    pub fn wait(&mut self, current: usize) -> AcquireOutcome {
        if self.count > 0 {
            self.count -= 1;
            AcquireOutcome::Acquired
        } else {
            self.waiters.push_back(current);
            AcquireOutcome::Blocked
        }
    }

    /// Implements syscall 5 (`post`). Returns the thread that was woken, if
    /// the queue was non-empty.
    pub fn post(&mut self) -> Option<usize> {
        if let Some(woken) = self.waiters.pop_front() {
            Some(woken)
        } else {
            self.count += 1;
            None
        }
    }

    /// Removes `idx` from the waiter queue, if present. Used by
    /// `kill_thread`; a semaphore has no owner, so there is nothing to hand
    /// off.
    pub fn force_release(&mut self, idx: usize) {
        self.waiters.remove(idx);
    }
}

/// The fixed set of mutexes and semaphores in the system.
pub struct SyncTable {
    pub mutexes: [Mutex; MAX_MUTEXES],
    pub semaphores: [Semaphore; MAX_SEMAPHORES],
}

impl SyncTable {
    pub const fn new() -> Self {
        Self {
            mutexes: [const { Mutex::new() }; MAX_MUTEXES],
            semaphores: [const { Semaphore::new(0) }; MAX_SEMAPHORES],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutex_fifo_handoff() {
        let mut m = Mutex::new();
        assert_eq!(m.lock(/* L */ 3), AcquireOutcome::Acquired);
        assert_eq!(m.lock(/* H */ 1), AcquireOutcome::Blocked);
        assert_eq!(m.lock(/* M */ 2), AcquireOutcome::Blocked);

        // L unlocks -> H (FIFO head) becomes owner, M still queued.
        assert_eq!(m.unlock(3), Some(Some(1)));
        assert_eq!(m.owner(), Some(1));
        assert_eq!(m.waiters.len(), 1);

        // H unlocks -> M becomes owner, queue empty.
        assert_eq!(m.unlock(1), Some(Some(2)));
        assert_eq!(m.owner(), Some(2));
        assert!(m.waiters.is_empty());

        // M unlocks -> no waiters, mutex free.
        assert_eq!(m.unlock(2), Some(None));
        assert!(!m.is_locked());
    }

    #[test]
    fn unlock_by_non_owner_is_a_no_op() {
        let mut m = Mutex::new();
        m.lock(0);
        assert_eq!(m.unlock(1), None);
        assert!(m.is_locked());
        assert_eq!(m.owner(), Some(0));
    }

    #[test]
    fn lock_then_unlock_round_trips() {
        let mut m = Mutex::new();
        assert_eq!(m.lock(0), AcquireOutcome::Acquired);
        assert_eq!(m.unlock(0), Some(None));
        assert!(!m.is_locked());
    }

    #[test]
    fn semaphore_wait_then_post_round_trips() {
        let mut s = Semaphore::new(1);
        assert_eq!(s.wait(0), AcquireOutcome::Acquired);
        assert_eq!(s.count(), 0);
        assert_eq!(s.post(), None);
        assert_eq!(s.count(), 1);
    }

    #[test]
    fn semaphore_wakes_fifo_head() {
        let mut s = Semaphore::new(0);
        assert_eq!(s.wait(5), AcquireOutcome::Blocked);
        assert_eq!(s.wait(7), AcquireOutcome::Blocked);
        assert_eq!(s.post(), Some(5));
        assert_eq!(s.post(), Some(7));
        assert_eq!(s.post(), None);
        assert_eq!(s.count(), 1);
    }

    #[test]
    fn force_release_hands_off_ownership() {
        let mut m = Mutex::new();
        m.lock(0);
        m.lock(1);
        assert_eq!(m.force_release(0), Some(1));
        assert_eq!(m.owner(), Some(1));
    }

    #[test]
    fn force_release_compacts_queue_without_owning() {
        let mut m = Mutex::new();
        m.lock(0);
        m.lock(1);
        m.lock(2);
        assert_eq!(m.force_release(1), None);
        assert_eq!(m.waiters.iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn no_thread_appears_twice_in_a_queue() {
        let mut q: WaitQueue<4> = WaitQueue::new();
        q.push_back(1);
        q.push_back(2);
        q.push_back(1);
        q.remove(1);
        assert_eq!(q.iter().collect::<Vec<_>>(), vec![2]);
    }
}
