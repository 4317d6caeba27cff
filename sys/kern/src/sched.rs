// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scheduler (C6): chooses the next thread to run.
//!
//! Selection is a pure function of the thread table except for the
//! rotating start position, which this struct owns as instance state
//! rather than the reference firmware's free-standing `static uint8_t
//! task`. There is exactly one `Scheduler` per kernel.

use abi::SchedulerMode;

use crate::thread::ThreadTable;

pub struct Scheduler {
    mode: SchedulerMode,
    /// Round-robin mode's cursor: the last slot returned, so the next pick
    /// resumes after it. Distinct from priority mode's rotating `start`,
    /// which is derived fresh from `current` on every call.
    rr_cursor: usize,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            mode: SchedulerMode::Priority,
            rr_cursor: 0,
        }
    }

    pub fn mode(&self) -> SchedulerMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: SchedulerMode) {
        self.mode = mode;
    }

    /// Picks the next thread to run, given the currently running slot
    /// `current`. Always returns a valid index; if no thread is
    /// Ready/Unrun, returns slot 0 (the idle thread, which the firmware
    /// guarantees is always runnable).
    pub fn pick(&mut self, table: &ThreadTable, current: usize) -> usize {
        match self.mode {
            SchedulerMode::Priority => self.pick_priority(table, current),
            SchedulerMode::RoundRobin => self.pick_round_robin(table),
        }
    }

    /// Priority mode (§4.6): scan all `N` slots starting at
    /// `(current + 1) % N`, wrapping. The first slot at the lowest
    /// `currentPriority` seen among Ready/Unrun candidates wins — scanning
    /// from a rotating start, rather than always from 0, gives round-robin
    /// tiebreaking among threads of equal priority instead of starving
    /// later slots.
    fn pick_priority(&self, table: &ThreadTable, current: usize) -> usize {
        let n = table.len();
        let start = (current + 1) % n;
        let mut best: Option<(usize, abi::Priority)> = None;
        for k in 0..n {
            let i = (start + k) % n;
            let t = table.get(i);
            if t.state.is_schedulable() {
                let p = t.current_priority();
                if best.map_or(true, |(_, bp)| p.is_more_important_than(bp)) {
                    best = Some((i, p));
                }
            }
        }
        best.map(|(i, _)| i).unwrap_or(0)
    }

    /// Round-robin mode (§4.6): advance the cursor from the previous
    /// choice, skipping non-candidate slots, wrapping at `N`.
    fn pick_round_robin(&mut self, table: &ThreadTable) -> usize {
        let n = table.len();
        for step in 1..=n {
            let i = (self.rr_cursor + step) % n;
            if table.get(i).state.is_schedulable() {
                self.rr_cursor = i;
                return i;
            }
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::sim::Sim;
    use crate::heap::Heap;
    use crate::mpu;
    use abi::Priority;

    fn setup() -> (ThreadTable, Heap, Sim, u32) {
        (
            ThreadTable::new(),
            Heap::new(abi::SRAM_BASE),
            Sim::new(),
            mpu::no_access_mask(),
        )
    }

    #[test]
    fn priority_mode_picks_lowest_number_among_ready() {
        let (mut table, mut heap, cpu, mut mask) = setup();
        table
            .create_thread(&mut heap, &mut mask, &cpu, 0x1000, b"idle", Priority(7), 1024)
            .unwrap();
        table
            .create_thread(&mut heap, &mut mask, &cpu, 0x2000, b"a", Priority(4), 1024)
            .unwrap();
        table
            .create_thread(&mut heap, &mut mask, &cpu, 0x3000, b"b", Priority(2), 1024)
            .unwrap();
        // Mark all Ready (normally the scheduler itself promotes Unrun on
        // pick, but we want all three visible as candidates up front).
        for i in 0..table.len() {
            if table.get(i).state != abi::ThreadState::Invalid {
                table.get_mut(i).state = abi::ThreadState::Ready;
            }
        }

        let mut sched = Scheduler::new();
        let picked = sched.pick(&table, 0);
        assert_eq!(picked, 2); // priority 2 is the most important Ready thread
    }

    #[test]
    fn priority_mode_falls_back_to_idle_when_nothing_runnable() {
        let table = ThreadTable::new(); // every slot Invalid
        let mut sched = Scheduler::new();
        assert_eq!(sched.pick(&table, 0), 0);
    }

    #[test]
    fn priority_mode_rotates_tiebreak_among_equal_priority() {
        let (mut table, mut heap, cpu, mut mask) = setup();
        for (i, entry) in [0x1000u32, 0x2000, 0x3000].into_iter().enumerate() {
            table
                .create_thread(&mut heap, &mut mask, &cpu, entry, b"t", Priority(4), 1024)
                .unwrap();
            table.get_mut(i).state = abi::ThreadState::Ready;
        }

        let mut sched = Scheduler::new();
        // current = 0: scan starts at 1, so slot 1 wins the tie.
        assert_eq!(sched.pick(&table, 0), 1);
        // current = 1: scan starts at 2.
        assert_eq!(sched.pick(&table, 1), 2);
        // current = 2: scan wraps to 0.
        assert_eq!(sched.pick(&table, 2), 0);
    }

    #[test]
    fn round_robin_mode_cycles_through_candidates() {
        let (mut table, mut heap, cpu, mut mask) = setup();
        for entry in [0x1000u32, 0x2000, 0x3000] {
            table
                .create_thread(&mut heap, &mut mask, &cpu, entry, b"t", Priority(4), 1024)
                .unwrap();
        }
        for i in 0..3 {
            table.get_mut(i).state = abi::ThreadState::Ready;
        }
        let mut sched = Scheduler::new();
        sched.set_mode(SchedulerMode::RoundRobin);
        let a = sched.pick(&table, 0);
        let b = sched.pick(&table, 0);
        let c = sched.pick(&table, 0);
        let d = sched.pick(&table, 0);
        assert_eq!([a, b, c, d], [1, 2, 0, 1]);
    }

    #[test]
    fn unrun_thread_is_a_valid_pick_candidate() {
        let (mut table, mut heap, cpu, mut mask) = setup();
        table
            .create_thread(&mut heap, &mut mask, &cpu, 0x1000, b"a", Priority(4), 1024)
            .unwrap();
        // state is Unrun immediately after create_thread.
        let mut sched = Scheduler::new();
        assert_eq!(sched.pick(&table, 5), 0);
    }
}
