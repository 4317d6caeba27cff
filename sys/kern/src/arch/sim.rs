// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host-testable stand-in for the real Cortex-M `Cpu` implementation.
//!
//! There is no real second stack to context-switch into on a host thread, so
//! this module doesn't attempt to model register save/restore at all. It
//! models `Cpu` at the granularity the kernel actually calls it: recording
//! the last-applied SRD mask, whether a reschedule was requested, and a
//! software tick count. That's everything the scheduler, sync primitives,
//! heap, and thread table logic need in order to be fully exercised by unit
//! tests.

use core::cell::{Cell, RefCell};

use super::{Cpu, Memory};

/// Size in bytes of the seeded initial frame: sixteen 32-bit words (xPSR,
/// PC, LR, R12, R3..R0, R11..R4).
const FRAME_BYTES: u32 = 16 * 4;

/// Size of the fabricated byte arena backing this module's [`Memory`] impl.
/// Addresses passed to `read`/`write` in tests are small offsets into this
/// arena, not real SRAM addresses — there is no hardware behind them on the
/// host.
const ARENA_BYTES: usize = 256;

/// A `Cpu` implementation for unit tests, recording what the kernel asked of
/// it instead of touching real hardware.
pub struct Sim {
    last_srd_mask: Cell<u32>,
    reschedule_pending: Cell<bool>,
    irq_enabled: Cell<bool>,
    ticks: Cell<u64>,
    /// `(entry, stack_top)` most recently passed to `seed_initial_frame`,
    /// for tests that want to assert a thread was (re)seeded.
    last_seeded_frame: Cell<(u32, u32)>,
    arena: RefCell<[u8; ARENA_BYTES]>,
}

impl Default for Sim {
    fn default() -> Self {
        Self::new()
    }
}

impl Sim {
    pub const fn new() -> Self {
        Self {
            last_srd_mask: Cell::new(0xFFFF_FFFF),
            reschedule_pending: Cell::new(false),
            irq_enabled: Cell::new(true),
            ticks: Cell::new(0),
            last_seeded_frame: Cell::new((0, 0)),
            arena: RefCell::new([0; ARENA_BYTES]),
        }
    }

    /// Test helper: the `(entry, stack_top)` of the most recently seeded
    /// frame.
    pub fn last_seeded_frame(&self) -> (u32, u32) {
        self.last_seeded_frame.get()
    }

    /// Test helper: the SRD mask most recently applied.
    pub fn srd_mask(&self) -> u32 {
        self.last_srd_mask.get()
    }

    /// Test helper: whether a context switch has been requested since the
    /// last call to `take_reschedule_pending`.
    pub fn take_reschedule_pending(&self) -> bool {
        self.reschedule_pending.replace(false)
    }

    /// Test helper: advances the simulated tick count, mirroring what the
    /// real SysTick handler would do.
    pub fn advance_tick(&self) {
        self.ticks.set(self.ticks.get() + 1);
    }
}

impl Cpu for Sim {
    fn apply_srd_mask(&self, mask: u32) {
        self.last_srd_mask.set(mask);
    }

    fn pend_context_switch(&self) {
        self.reschedule_pending.set(true);
    }

    fn disable_irq(&self) -> bool {
        self.irq_enabled.replace(false)
    }

    fn enable_irq(&self, was_enabled: bool) {
        self.irq_enabled.set(was_enabled);
    }

    fn now_ticks(&self) -> u64 {
        self.ticks.get()
    }

    unsafe fn seed_initial_frame(&self, entry: u32, stack_top: u32) -> u32 {
        self.last_seeded_frame.set((entry, stack_top));
        stack_top - FRAME_BYTES
    }

    fn reset(&self) -> ! {
        panic!("system reset");
    }
}

impl Memory for Sim {
    fn read(&self, addr: u32, buf: &mut [u8]) {
        let start = addr as usize;
        let arena = self.arena.borrow();
        buf.copy_from_slice(&arena[start..start + buf.len()]);
    }

    fn write(&self, addr: u32, bytes: &[u8]) {
        let start = addr as usize;
        self.arena.borrow_mut()[start..start + bytes.len()].copy_from_slice(bytes);
    }
}

impl Sim {
    /// Test helper: writes `bytes` into the arena at `addr` and returns
    /// `addr`, for building name buffers ahead of a `pidByName`-style call.
    pub fn poke(&self, addr: u32, bytes: &[u8]) -> u32 {
        let start = addr as usize;
        self.arena.borrow_mut()[start..start + bytes.len()].copy_from_slice(bytes);
        addr
    }
}
