// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel: wires the thread table, sync primitives, heap, and
//! scheduler together behind the operations the syscall dispatcher and the
//! tick/context-switch/fault handlers call.
//!
//! `Kernel<C>` is generic over the `Cpu` implementation so the exact same
//! logic runs against [`crate::arch::sim::Sim`] in host tests and the real
//! target implementation in firmware. There is exactly one `Kernel`
//! instance, built once at boot (`Kernel::new`) and never reconstructed.

use abi::{KernelError, Pid, Priority, ResourceKind, SchedulerMode, ThreadState};

use crate::arch::Cpu;
use crate::heap::Heap;
use crate::mpu;
use crate::sched::Scheduler;
use crate::sync::{AcquireOutcome, SyncTable};
use crate::thread::ThreadTable;

/// Everything the kernel needs to schedule and dispatch syscalls for the
/// life of the system. `active_srd_mask` is the software shadow of
/// whichever mask is currently loaded into the MPU — §3's "SRD mask
/// (global)" — kept here rather than duplicated per-thread-access because
/// the heap allocator mutates it as a side effect of `malloc`/`free` on
/// behalf of whichever thread is creating/killing/restarting another.
pub struct Kernel<C> {
    pub threads: ThreadTable,
    pub sync: SyncTable,
    pub heap: Heap,
    pub sched: Scheduler,
    pub active_srd_mask: u32,
    pub current: usize,
    pub preemption: bool,
    pub priority_inheritance: bool,
    pub cpu: C,
}

/// Result of a syscall dispatch: the value to write back into the stacked
/// R0, and whether the context-switch exception should be pended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SyscallResult {
    pub ret: u32,
    pub reschedule: bool,
}

impl<C: Cpu> Kernel<C> {
    pub const fn new(cpu: C) -> Self {
        Self {
            threads: ThreadTable::new(),
            sync: SyncTable::new(),
            heap: Heap::new(abi::SRAM_BASE),
            sched: Scheduler::new(),
            active_srd_mask: 0xFFFF_FFFF,
            current: 0,
            preemption: false,
            priority_inheritance: false,
            cpu,
        }
    }

    // -- Thread lifecycle (C5) --------------------------------------------

    pub fn create_thread(
        &mut self,
        entry: u32,
        name: &[u8],
        priority: Priority,
        stack_bytes: u32,
    ) -> Result<Pid, KernelError> {
        self.threads.create_thread(
            &mut self.heap,
            &mut self.active_srd_mask,
            &self.cpu,
            entry,
            name,
            priority,
            stack_bytes,
        )
    }

    /// Resolves a `kill`/`SVC #6` target: a small integer below
    /// [`abi::MAX_THREADS`] is taken as a table index directly (matching
    /// the reference firmware's `input < MAX_TASKS` check), anything else
    /// is looked up by PID.
    fn resolve_target(&self, target: u32) -> Option<usize> {
        if (target as usize) < self.threads.len()
            && self.threads.get(target as usize).state != ThreadState::Invalid
        {
            Some(target as usize)
        } else {
            self.threads.find_by_pid(Pid(target))
        }
    }

    /// Implements `killThread` (syscall 6, §4.5): releases every mutex the
    /// target owns (handing off to the FIFO head if one is waiting),
    /// removes it from every waiter queue it merely occupies, frees its
    /// stack, and marks it `Killed`. Returns whether a reschedule is
    /// needed (the target was the calling thread).
    pub fn kill_thread(&mut self, target: u32) -> Result<bool, KernelError> {
        let idx = self.resolve_target(target).ok_or(KernelError::NoSuchThread)?;

        for mutex in self.sync.mutexes.iter_mut() {
            if let Some(woken) = mutex.force_release(idx) {
                self.threads.get_mut(woken).state = ThreadState::Ready;
            }
        }
        for sem in self.sync.semaphores.iter_mut() {
            sem.force_release(idx);
        }

        let (stack_base, _) = self.threads.stack_base_and_bytes(idx);
        if stack_base != 0 {
            self.heap
                .free(stack_base, &mut self.active_srd_mask, &self.cpu);
        }
        self.threads.get_mut(idx).state = ThreadState::Killed;
        self.threads.get_mut(idx).set_held_mutex(None);

        Ok(idx == self.current)
    }

    pub fn restart_thread(&mut self, entry: u32) -> Result<(), KernelError> {
        self.threads.restart_thread(
            &mut self.heap,
            &mut self.active_srd_mask,
            &self.cpu,
            entry,
        )
    }

    pub fn set_thread_priority(&mut self, entry: u32, priority: Priority) -> Result<(), KernelError> {
        self.threads.set_priority(entry, priority)
    }

    pub fn pid_by_name(&self, name: &[u8]) -> Option<Pid> {
        self.threads.find_by_name(name).map(|idx| self.threads.get(idx).pid())
    }

    // -- Synchronization (C4) ----------------------------------------------

    /// Implements `lock` (syscall 2, §4.4). On block, applies priority
    /// inheritance if enabled and the blocked thread is more important than
    /// the current owner, and reports that a reschedule is needed.
    pub fn lock(&mut self, mutex_idx: usize) -> bool {
        let current = self.current;
        match self.sync.mutexes[mutex_idx].lock(current) {
            AcquireOutcome::Acquired => {
                self.threads.get_mut(current).set_held_mutex(Some(mutex_idx));
                false
            }
            AcquireOutcome::Blocked => {
                self.threads.get_mut(current).state =
                    ThreadState::BlockedMutex { index: mutex_idx };
                self.threads.get_mut(current).set_held_mutex(Some(mutex_idx));
                if self.priority_inheritance {
                    if let Some(owner) = self.sync.mutexes[mutex_idx].owner() {
                        let blocked_prio = self.threads.get(current).current_priority();
                        let owner_prio = self.threads.get(owner).current_priority();
                        if blocked_prio.is_more_important_than(owner_prio) {
                            self.threads.get_mut(owner).set_current_priority(blocked_prio);
                        }
                    }
                }
                true
            }
        }
    }

    /// Implements `unlock` (syscall 3, §4.4). Never requests a reschedule:
    /// the caller may continue running until its next natural suspension
    /// point.
    pub fn unlock(&mut self, mutex_idx: usize) {
        let current = self.current;
        if self.priority_inheritance {
            let base = self.threads.get(current).base_priority();
            self.threads.get_mut(current).set_current_priority(base);
        }
        match self.sync.mutexes[mutex_idx].unlock(current) {
            None => {} // not the owner: no-op
            Some(Some(next_owner)) => {
                self.threads.get_mut(next_owner).state = ThreadState::Ready;
                self.threads.get_mut(next_owner).set_held_mutex(Some(mutex_idx));
                self.threads.get_mut(current).set_held_mutex(None);
            }
            Some(None) => {
                self.threads.get_mut(current).set_held_mutex(None);
            }
        }
    }

    /// Implements `wait` (syscall 4, §4.4).
    pub fn wait(&mut self, sem_idx: usize) -> bool {
        let current = self.current;
        match self.sync.semaphores[sem_idx].wait(current) {
            AcquireOutcome::Acquired => false,
            AcquireOutcome::Blocked => {
                self.threads.get_mut(current).state = ThreadState::BlockedSem { index: sem_idx };
                true
            }
        }
    }

    /// Implements `post` (syscall 5, §4.4). Requests a reschedule only if
    /// the woken thread's base priority is strictly more important than
    /// the posting thread's — otherwise the poster continues until its
    /// next natural suspension point.
    pub fn post(&mut self, sem_idx: usize) -> bool {
        let current = self.current;
        match self.sync.semaphores[sem_idx].post() {
            None => false,
            Some(woken) => {
                self.threads.get_mut(woken).state = ThreadState::Ready;
                self.threads
                    .get(woken)
                    .base_priority()
                    .is_more_important_than(self.threads.get(current).base_priority())
            }
        }
    }

    // -- Introspection (syscalls 7-8) --------------------------------------

    pub fn task_info(&self, idx: usize) -> Option<abi::TaskInfo> {
        self.threads.task_info(idx)
    }

    pub fn resource_info_mutex(&self, idx: usize) -> Option<abi::MutexInfo> {
        let m = self.sync.mutexes.get(idx)?;
        Some(abi::MutexInfo {
            locked: m.is_locked() as u8,
            owner_pid: m
                .owner()
                .map(|o| self.threads.get(o).pid().0)
                .unwrap_or(0),
            queue_len: m.waiters.len() as u32,
            ..Default::default()
        })
    }

    pub fn resource_info_semaphore(&self, idx: usize) -> Option<abi::SemaphoreInfo> {
        let s = self.sync.semaphores.get(idx)?;
        Some(abi::SemaphoreInfo {
            count: s.count(),
            queue_len: s.waiters.len() as u32,
        })
    }

    pub fn resource_info(&self, kind: ResourceKind, idx: usize) -> Option<ResourceInfo> {
        match kind {
            ResourceKind::Mutex => self.resource_info_mutex(idx).map(ResourceInfo::Mutex),
            ResourceKind::Semaphore => {
                self.resource_info_semaphore(idx).map(ResourceInfo::Semaphore)
            }
        }
    }

    // -- Reconfiguration ----------------------------------------------------

    pub fn set_preemption(&mut self, enabled: bool) {
        self.preemption = enabled;
    }

    pub fn set_priority_inheritance(&mut self, enabled: bool) {
        self.priority_inheritance = enabled;
    }

    pub fn set_scheduler(&mut self, priority_mode: bool) {
        self.sched.set_mode(if priority_mode {
            SchedulerMode::Priority
        } else {
            SchedulerMode::RoundRobin
        });
    }

    // -- Tick and context switch (C8, C9) ------------------------------------

    /// Implements the 1 ms tick handler (§4.9). Returns whether a
    /// reschedule should be pended (true whenever preemption is enabled,
    /// regardless of whether any thread actually woke — matching the
    /// reference firmware, which pends unconditionally rather than only on
    /// a wake edge).
    pub fn tick(&mut self) -> bool {
        self.threads.get_mut(self.current).tick();
        for i in 0..self.threads.len() {
            if let ThreadState::Delayed { ticks_remaining } = self.threads.get(i).state {
                let remaining = ticks_remaining - 1;
                if remaining == 0 {
                    self.threads.get_mut(i).state = ThreadState::Ready;
                } else {
                    self.threads.get_mut(i).state = ThreadState::Delayed {
                        ticks_remaining: remaining,
                    };
                }
            }
        }
        self.preemption
    }

    /// Implements the context-switch handler's architecture-independent
    /// core (C8, steps 2-3): given the stack pointer the caller just saved
    /// the outgoing thread's callee-saved registers to, records it, picks
    /// the next thread, applies its SRD mask, and returns its saved stack
    /// pointer for the caller to restore from.
    ///
    /// The register save (before this call) and restore (after it) are
    /// architecture-specific and live in `arch::arm_m`'s naked PendSV
    /// handler; this function contains everything about a context switch
    /// that doesn't require touching CPU registers directly.
    pub fn context_switch(&mut self, outgoing_sp: u32) -> u32 {
        self.threads.get_mut(self.current).set_saved_sp(outgoing_sp);
        if self.threads.get(self.current).state == ThreadState::Running {
            self.threads.get_mut(self.current).state = ThreadState::Ready;
        }
        let next = self.sched.pick(&self.threads, self.current);
        self.current = next;
        self.threads.get_mut(next).state = ThreadState::Running;
        let mask = self.threads.get(next).srd_mask;
        mpu::apply_mask(&self.cpu, mask);
        self.threads.get(next).saved_sp()
    }

    /// Implements `startRtos` (§4.6/§4.8 bootstrap): picks the first
    /// thread to run and applies its SRD mask, without performing any
    /// register save (there is no outgoing thread). The caller (firmware
    /// bootstrap) then uses `Cpu`'s first-task-entry primitive to jump into
    /// it.
    pub fn start(&mut self) -> u32 {
        let first = self.sched.pick(&self.threads, self.threads.len() - 1);
        self.current = first;
        self.threads.get_mut(first).state = ThreadState::Running;
        let mask = self.threads.get(first).srd_mask;
        mpu::apply_mask(&self.cpu, mask);
        self.threads.get(first).saved_sp()
    }
}

/// Either half of a `getResourceInfo` (syscall 8) result, tagged by
/// [`ResourceKind`].
#[derive(Copy, Clone, Debug)]
pub enum ResourceInfo {
    Mutex(abi::MutexInfo),
    Semaphore(abi::SemaphoreInfo),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::sim::Sim;

    fn boot_two_threads() -> Kernel<Sim> {
        let mut k = Kernel::new(Sim::new());
        k.create_thread(0x1000, b"idle", Priority(7), 1024).unwrap();
        k.create_thread(0x2000, b"a", Priority(4), 1024).unwrap();
        k.start();
        k
    }

    #[test]
    fn sleep_ordering_scenario() {
        // §8 scenario 1, adapted to two extra sleepers at equal priority.
        let mut k = Kernel::new(Sim::new());
        let a = k.create_thread(0x1000, b"a", Priority(4), 1024).unwrap();
        let b = k.create_thread(0x2000, b"b", Priority(4), 1024).unwrap();
        let c = k.create_thread(0x3000, b"c", Priority(4), 1024).unwrap();
        for pid in [a, b, c] {
            let idx = k.threads.find_by_pid(pid).unwrap();
            k.threads.get_mut(idx).state = ThreadState::Ready;
        }
        let ia = k.threads.find_by_pid(a).unwrap();
        let ib = k.threads.find_by_pid(b).unwrap();
        let ic = k.threads.find_by_pid(c).unwrap();
        k.threads.get_mut(ia).state = ThreadState::Delayed { ticks_remaining: 100 };
        k.threads.get_mut(ib).state = ThreadState::Delayed { ticks_remaining: 50 };
        k.threads.get_mut(ic).state = ThreadState::Delayed { ticks_remaining: 75 };

        for _ in 0..80 {
            k.tick();
        }

        assert_eq!(k.threads.get(ib).state, ThreadState::Ready);
        assert_eq!(k.threads.get(ic).state, ThreadState::Ready);
        assert_eq!(k.threads.get(ia).state, ThreadState::Delayed { ticks_remaining: 20 });
    }

    #[test]
    fn priority_inheritance_scenario() {
        // §8 scenario 3.
        let mut k = Kernel::new(Sim::new());
        k.set_priority_inheritance(true);
        let h = k.create_thread(0x1000, b"h", Priority(1), 1024).unwrap();
        let m = k.create_thread(0x2000, b"m", Priority(2), 1024).unwrap();
        let l = k.create_thread(0x3000, b"l", Priority(3), 1024).unwrap();
        let ih = k.threads.find_by_pid(h).unwrap();
        let im = k.threads.find_by_pid(m).unwrap();
        let il = k.threads.find_by_pid(l).unwrap();

        k.current = il;
        assert!(!k.lock(0)); // L locks, uncontended
        k.current = ih;
        assert!(k.lock(0)); // H blocks
        assert_eq!(k.threads.get(il).current_priority(), Priority(1));

        k.current = im;
        assert!(k.lock(0)); // M blocks too

        k.current = il;
        k.unlock(0);
        assert_eq!(k.threads.get(il).current_priority(), Priority(3));
        assert_eq!(k.sync.mutexes[0].owner(), Some(ih));
    }

    #[test]
    fn kill_releases_mutex_to_waiter_and_frees_stack() {
        let mut k = boot_two_threads();
        let heap_before = k.heap.snapshot();
        let victim = k.create_thread(0x5000, b"victim", Priority(4), 1024).unwrap();
        let iv = k.threads.find_by_pid(victim).unwrap();
        let waiter = k.create_thread(0x6000, b"waiter", Priority(4), 1024).unwrap();
        let iw = k.threads.find_by_pid(waiter).unwrap();

        k.current = iv;
        k.lock(0);
        k.current = iw;
        k.lock(0); // blocks behind victim

        k.kill_thread(victim.0).unwrap();
        assert_eq!(k.threads.get(iv).state, ThreadState::Killed);
        assert_eq!(k.sync.mutexes[0].owner(), Some(iw));
        assert_eq!(k.threads.get(iw).state, ThreadState::BlockedMutex { index: 0 });

        // Restarting frees a fresh 1 KiB stack and returns it on kill again.
        k.restart_thread(victim.0).unwrap();
        assert_eq!(k.threads.get(iv).state, ThreadState::Ready);
        k.kill_thread(victim.0).unwrap();
        assert_eq!(k.heap.snapshot(), heap_before);
    }

    #[test]
    fn restart_resolves_pid_by_name() {
        let mut k = boot_two_threads();
        let flash = k.create_thread(0x4000, b"flash4Hz", Priority(4), 1024).unwrap();
        let idx = k.threads.find_by_pid(flash).unwrap();
        k.threads.get_mut(idx).state = ThreadState::Ready;

        k.kill_thread(flash.0).unwrap();
        k.restart_thread(flash.0).unwrap();

        let found = k.pid_by_name(b"flash4Hz").unwrap();
        assert_eq!(found, flash);
        let info = k.task_info(k.threads.find_by_pid(found).unwrap()).unwrap();
        assert_eq!(info.state_tag, 2); // Ready
    }

    #[test]
    fn post_reschedules_only_for_higher_priority_waiter() {
        let mut k = Kernel::new(Sim::new());
        let low = k.create_thread(0x1000, b"low", Priority(5), 1024).unwrap();
        let high = k.create_thread(0x2000, b"high", Priority(1), 1024).unwrap();
        let il = k.threads.find_by_pid(low).unwrap();
        let ih = k.threads.find_by_pid(high).unwrap();

        k.current = ih;
        assert!(k.wait(0)); // high blocks on an empty semaphore

        k.current = il;
        assert!(k.post(0)); // low posts, wakes a strictly-higher-priority waiter
        assert_eq!(k.threads.get(ih).state, ThreadState::Ready);
    }

    #[test]
    fn post_does_not_reschedule_for_lower_priority_waiter() {
        let mut k = Kernel::new(Sim::new());
        let low = k.create_thread(0x1000, b"low", Priority(5), 1024).unwrap();
        let poster = k.create_thread(0x2000, b"poster", Priority(1), 1024).unwrap();
        let il = k.threads.find_by_pid(low).unwrap();
        let ip = k.threads.find_by_pid(poster).unwrap();

        k.current = il;
        assert!(k.wait(0));

        k.current = ip;
        assert!(!k.post(0));
    }
}
