// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Thread table and lifecycle (C5): per-thread records, creation, restart,
//! and priority changes.
//!
//! Cross-cutting lifecycle operations that also touch the sync primitives
//! (`killThread` must release mutexes and drain waiter queues) live in
//! [`crate::kernel`], which owns both this table and the `SyncTable`. This
//! module is the self-contained half: the `Thread` record shape, slot
//! allocation, and the raw stack-frame seeding that `createThread` and
//! `restartThread` share.

use abi::{Pid, Priority, TaskInfo, ThreadState, MAX_NAME_LEN, MAX_THREADS};

use crate::arch::Cpu;
use crate::heap::Heap;
use crate::mpu;

/// Default stack size `restartThread` rebuilds with, per §4.5: the
/// reference firmware always reallocates exactly 1 KiB on restart,
/// regardless of the thread's original stack size (which is not retained
/// once the stack is freed).
pub const RESTART_STACK_BYTES: usize = 1024;

/// One thread-table record.
#[derive(Clone)]
pub struct Thread {
    pub state: ThreadState,
    pid: Pid,
    name: [u8; MAX_NAME_LEN + 1],
    name_len: usize,
    base_priority: Priority,
    current_priority: Priority,
    saved_sp: u32,
    stack_base: u32,
    stack_bytes: u32,
    pub srd_mask: u32,
    /// The mutex this thread owns or is blocked on, when relevant. Blocking
    /// state is also carried on `ThreadState::BlockedMutex`; this field is
    /// the one that survives into `Running`/`Ready` once the lock is
    /// acquired, so `killThread` can find mutexes to release without a
    /// linear scan of the mutex table.
    held_mutex: Option<usize>,
    cpu_time: u32,
}

impl Thread {
    pub const fn invalid() -> Self {
        Self {
            state: ThreadState::Invalid,
            pid: Pid::NONE,
            name: [0; MAX_NAME_LEN + 1],
            name_len: 0,
            base_priority: Priority(0),
            current_priority: Priority(0),
            saved_sp: 0,
            stack_base: 0,
            stack_bytes: 0,
            srd_mask: 0xFFFF_FFFF,
            held_mutex: None,
            cpu_time: 0,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn name(&self) -> &[u8] {
        &self.name[..self.name_len]
    }

    pub fn base_priority(&self) -> Priority {
        self.base_priority
    }

    pub fn current_priority(&self) -> Priority {
        self.current_priority
    }

    pub fn set_current_priority(&mut self, p: Priority) {
        self.current_priority = p;
    }

    pub fn saved_sp(&self) -> u32 {
        self.saved_sp
    }

    pub fn set_saved_sp(&mut self, sp: u32) {
        self.saved_sp = sp;
    }

    pub fn held_mutex(&self) -> Option<usize> {
        self.held_mutex
    }

    pub fn set_held_mutex(&mut self, m: Option<usize>) {
        self.held_mutex = m;
    }

    pub fn cpu_time(&self) -> u32 {
        self.cpu_time
    }

    pub fn tick(&mut self) {
        self.cpu_time = self.cpu_time.wrapping_add(1);
    }

    /// Rebuilds the seeded frame over a just-(re)allocated stack and
    /// transitions `self` into `Unrun`-ready shape. Shared by `createThread`
    /// (fresh record) and `restartThread` (existing, previously-killed
    /// record).
    ///
    /// Register contents are seeded by [`Cpu::seed_initial_frame`] with the
    /// reference firmware's recognizable byte-repeated patterns
    /// (`0x0R0R0R0R` for `R4`..`R12`) rather than zeroed, so a post-mortem
    /// dump can tell a register that was never touched by the thread apart
    /// from one that legitimately holds zero.
    fn init_stack(
        &mut self,
        cpu: &impl Cpu,
        entry: u32,
        stack_base: u32,
        stack_bytes: u32,
        mask: u32,
    ) {
        self.stack_base = stack_base;
        self.stack_bytes = stack_bytes;
        self.srd_mask = mask;
        // Safety: `stack_base` was just returned by the heap allocator and
        // is not yet visible to any other thread.
        self.saved_sp =
            unsafe { cpu.seed_initial_frame(entry, stack_base + stack_bytes) };
    }

    fn to_task_info(&self, total_time: u32) -> TaskInfo {
        let mut name = [0u8; MAX_NAME_LEN + 1];
        name[..self.name_len].copy_from_slice(&self.name[..self.name_len]);
        TaskInfo {
            pid: self.pid.0,
            state_tag: state_tag(self.state),
            base_priority: self.base_priority.0,
            current_priority: self.current_priority.0,
            cpu_time: self.cpu_time,
            total_time,
            name,
            ..Default::default()
        }
    }
}

/// Numeric encoding of `ThreadState` for the `TaskInfo` snapshot ABI; the
/// blocking payload (mutex/semaphore index, sleep ticks) is not carried
/// across this boundary since `getResourceInfo` (syscall 8) already exposes
/// per-resource waiter membership.
fn state_tag(state: ThreadState) -> u8 {
    match state {
        ThreadState::Invalid => 0,
        ThreadState::Unrun => 1,
        ThreadState::Ready => 2,
        ThreadState::Running => 3,
        ThreadState::Delayed { .. } => 4,
        ThreadState::BlockedMutex { .. } => 5,
        ThreadState::BlockedSem { .. } => 6,
        ThreadState::Killed => 7,
    }
}

/// The fixed-size thread table: up to [`MAX_THREADS`] records, indexed by
/// slot number (the syscall ABI's "index" arguments refer to this index,
/// never the PID).
pub struct ThreadTable {
    threads: [Thread; MAX_THREADS],
}

impl ThreadTable {
    pub const fn new() -> Self {
        Self {
            threads: [const { Thread::invalid() }; MAX_THREADS],
        }
    }

    pub fn get(&self, idx: usize) -> &Thread {
        &self.threads[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut Thread {
        &mut self.threads[idx]
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Thread)> {
        self.threads.iter().enumerate()
    }

    pub fn find_by_pid(&self, pid: Pid) -> Option<usize> {
        self.threads
            .iter()
            .position(|t| t.state != ThreadState::Invalid && t.pid == pid)
    }

    pub fn find_by_name(&self, name: &[u8]) -> Option<usize> {
        self.threads
            .iter()
            .position(|t| t.state != ThreadState::Invalid && t.name() == name)
    }

    fn find_invalid_slot(&self) -> Option<usize> {
        self.threads.iter().position(|t| t.state == ThreadState::Invalid)
    }

    fn entry_already_registered(&self, entry: u32) -> bool {
        self.threads
            .iter()
            .any(|t| t.state != ThreadState::Invalid && t.pid.0 == entry)
    }

    /// Implements `createThread` (§4.5). Rejects a full table and
    /// reentrant (duplicate-entry) registration before touching the heap,
    /// matching the reference firmware's check ordering.
    pub fn create_thread(
        &mut self,
        heap: &mut Heap,
        active_mask: &mut u32,
        cpu: &impl Cpu,
        entry: u32,
        name: &[u8],
        priority: Priority,
        stack_bytes: u32,
    ) -> Result<Pid, abi::KernelError> {
        if self.entry_already_registered(entry) {
            return Err(abi::KernelError::DuplicateEntry);
        }
        let slot = self
            .find_invalid_slot()
            .ok_or(abi::KernelError::TableFull)?;

        let stack = heap
            .malloc(stack_bytes as usize, active_mask, cpu)
            .ok_or(abi::KernelError::OutOfMemory)?;

        let mut mask = mpu::no_access_mask();
        mpu::add_window(&mut mask, stack, stack_bytes);

        let t = &mut self.threads[slot];
        t.pid = Pid(entry);
        t.name_len = name.len().min(MAX_NAME_LEN);
        t.name[..t.name_len].copy_from_slice(&name[..t.name_len]);
        t.base_priority = priority;
        t.current_priority = priority;
        t.held_mutex = None;
        t.cpu_time = 0;
        t.init_stack(cpu, entry, stack, stack_bytes, mask);
        t.state = ThreadState::Unrun;

        Ok(t.pid)
    }

    /// Implements `restartThread` (§4.5, syscall 11). Only `Killed` or
    /// `Unrun` threads may be restarted; a fresh 1 KiB stack is allocated
    /// (the original `stack_bytes` is not retained across a kill).
    pub fn restart_thread(
        &mut self,
        heap: &mut Heap,
        active_mask: &mut u32,
        cpu: &impl Cpu,
        entry: u32,
    ) -> Result<(), abi::KernelError> {
        let idx = self
            .find_by_pid(Pid(entry))
            .ok_or(abi::KernelError::NoSuchThread)?;
        let t = &self.threads[idx];
        if !matches!(t.state, ThreadState::Killed | ThreadState::Unrun) {
            return Err(abi::KernelError::NotRestartable);
        }

        let stack = heap
            .malloc(RESTART_STACK_BYTES, active_mask, cpu)
            .ok_or(abi::KernelError::OutOfMemory)?;
        let mut mask = mpu::no_access_mask();
        mpu::add_window(&mut mask, stack, RESTART_STACK_BYTES as u32);

        let t = &mut self.threads[idx];
        t.init_stack(cpu, entry, stack, RESTART_STACK_BYTES as u32, mask);
        t.state = ThreadState::Ready;
        Ok(())
    }

    /// Implements `setThreadPriority` (§4.5, syscall 14): updates the base
    /// priority, and lowers `currentPriority` alongside it unless the
    /// thread is currently boosted above the new value by priority
    /// inheritance.
    pub fn set_priority(&mut self, entry: u32, priority: Priority) -> Result<(), abi::KernelError> {
        let idx = self
            .find_by_pid(Pid(entry))
            .ok_or(abi::KernelError::NoSuchThread)?;
        let t = &mut self.threads[idx];
        t.base_priority = priority;
        if t.current_priority.0 > priority.0 {
            t.current_priority = priority;
        }
        Ok(())
    }

    /// Implements `populateTaskInfo` (syscall 7): a read-only snapshot of
    /// slot `idx`, plus the live sum of every thread's `cpu_time` as the
    /// "total time" denominator (§4.7, preserved from the reference
    /// firmware's definition — see `DESIGN.md` for the documented choice).
    pub fn task_info(&self, idx: usize) -> Option<TaskInfo> {
        if idx >= self.threads.len() || self.threads[idx].state == ThreadState::Invalid {
            return None;
        }
        let total_time = self
            .threads
            .iter()
            .fold(0u32, |acc, t| acc.wrapping_add(t.cpu_time));
        Some(self.threads[idx].to_task_info(total_time))
    }

    pub fn stack_base_and_bytes(&self, idx: usize) -> (u32, u32) {
        (self.threads[idx].stack_base, self.threads[idx].stack_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::sim::Sim;

    fn new_heap_and_cpu() -> (Heap, Sim, u32) {
        (Heap::new(abi::SRAM_BASE), Sim::new(), mpu::no_access_mask())
    }

    #[test]
    fn create_then_kill_frees_exact_stack() {
        let (mut heap, cpu, mut mask) = new_heap_and_cpu();
        let mut table = ThreadTable::new();
        let before = heap.snapshot();

        let pid = table
            .create_thread(&mut heap, &mut mask, &cpu, 0x1000, b"demo", Priority(3), 1024)
            .unwrap();
        assert_eq!(pid, Pid(0x1000));
        let idx = table.find_by_pid(pid).unwrap();
        assert_eq!(table.get(idx).state, ThreadState::Unrun);

        let (base, bytes) = table.stack_base_and_bytes(idx);
        heap.free(base, &mut mask, &cpu);
        assert_eq!(bytes, 1024);
        assert_eq!(heap.snapshot(), before);
    }

    #[test]
    fn duplicate_entry_is_rejected() {
        let (mut heap, cpu, mut mask) = new_heap_and_cpu();
        let mut table = ThreadTable::new();
        table
            .create_thread(&mut heap, &mut mask, &cpu, 0x2000, b"a", Priority(1), 1024)
            .unwrap();
        let err = table
            .create_thread(&mut heap, &mut mask, &cpu, 0x2000, b"b", Priority(1), 1024)
            .unwrap_err();
        assert_eq!(err, abi::KernelError::DuplicateEntry);
    }

    #[test]
    fn restart_requires_killed_or_unrun() {
        let (mut heap, cpu, mut mask) = new_heap_and_cpu();
        let mut table = ThreadTable::new();
        table
            .create_thread(&mut heap, &mut mask, &cpu, 0x3000, b"a", Priority(1), 1024)
            .unwrap();
        let idx = table.find_by_pid(Pid(0x3000)).unwrap();
        table.get_mut(idx).state = ThreadState::Ready;

        let err = table
            .restart_thread(&mut heap, &mut mask, &cpu, 0x3000)
            .unwrap_err();
        assert_eq!(err, abi::KernelError::NotRestartable);

        table.get_mut(idx).state = ThreadState::Killed;
        table
            .restart_thread(&mut heap, &mut mask, &cpu, 0x3000)
            .unwrap();
        assert_eq!(table.get(idx).state, ThreadState::Ready);
    }

    #[test]
    fn set_priority_lowers_unboosted_current_priority() {
        let (mut heap, cpu, mut mask) = new_heap_and_cpu();
        let mut table = ThreadTable::new();
        table
            .create_thread(&mut heap, &mut mask, &cpu, 0x4000, b"a", Priority(5), 1024)
            .unwrap();
        table.set_priority(0x4000, Priority(2)).unwrap();
        let idx = table.find_by_pid(Pid(0x4000)).unwrap();
        assert_eq!(table.get(idx).current_priority(), Priority(2));
    }

    #[test]
    fn set_priority_does_not_clobber_an_active_boost() {
        let (mut heap, cpu, mut mask) = new_heap_and_cpu();
        let mut table = ThreadTable::new();
        table
            .create_thread(&mut heap, &mut mask, &cpu, 0x5000, b"a", Priority(5), 1024)
            .unwrap();
        let idx = table.find_by_pid(Pid(0x5000)).unwrap();
        table.get_mut(idx).set_current_priority(Priority(1)); // boosted by PI
        table.set_priority(0x5000, Priority(3)).unwrap();
        // 1 < 3, so the boost stands.
        assert_eq!(table.get(idx).current_priority(), Priority(1));
    }
}
