// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support, hidden behind the [`Cpu`] capability.
//!
//! Everything above this module — the scheduler, sync primitives, heap,
//! thread table, syscall dispatch logic, and fault-report construction — is
//! architecture-independent and is exercised by host-side unit tests against
//! [`sim::Sim`]. Only this module, and the MPU register plumbing it drives,
//! differs between the real target and the host test build.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "arm")] {
        pub mod arm_m;
        pub use arm_m::ArmM as Impl;
    } else {
        pub mod sim;
        pub use sim::Sim as Impl;
    }
}

/// The EXC_RETURN value stacked as LR in every thread's initial frame: return
/// to unprivileged Thread mode, using PSP, with no floating-point state
/// (floating-point context preservation is out of scope).
pub const EXC_RETURN_CONST: u32 = 0xFFFF_FFFD;

/// Capability that hides every CPU- and board-specific operation the kernel
/// needs: applying an SRD mask to the MPU, requesting a deferred context
/// switch, masking interrupts around critical sections, and resetting.
///
/// Each method's contract is atomic with respect to thread scheduling: it
/// either runs with interrupts disabled, or is only ever called from
/// handler-mode code that is itself non-preemptible by the kernel's own
/// exceptions (all kernel exceptions share one priority level).
pub trait Cpu {
    /// Writes `mask` into the four SRAM MPU regions' SRD fields, one byte
    /// per region, least-significant byte first (region
    /// `SRAM_REGIONS_START + i` gets byte `i`).
    fn apply_srd_mask(&self, mask: u32);

    /// Requests that the context-switch handler run once the current
    /// exception (or the current syscall, if called from thread mode
    /// indirectly via a syscall handler) returns.
    fn pend_context_switch(&self);

    /// Disables interrupts for the duration of a critical section. Returns
    /// an opaque token that `enable_irq` consumes; used in
    /// save-then-restore pairs rather than unconditionally re-enabling.
    fn disable_irq(&self) -> bool;

    /// Restores the interrupt-enable state captured by `disable_irq`.
    fn enable_irq(&self, was_enabled: bool);

    /// Number of ticks elapsed since boot, used only for diagnostics.
    fn now_ticks(&self) -> u64;

    /// Writes the sixteen-word seeded initial frame (xPSR, PC, LR, R12,
    /// R3..R0, R11..R4 — see `thread::Thread::seed_initial_frame`) at the
    /// top of the memory region ending at `stack_top`, and returns the
    /// resulting stack pointer.
    ///
    /// This is the one piece of raw-memory-touching logic in thread
    /// lifecycle management that isn't architecture-independent bookkeeping
    /// — on the real target it writes into live SRAM through a raw pointer;
    /// the host test double computes the same arithmetic without
    /// dereferencing anything, since there is no real backing memory at a
    /// fabricated SRAM address on the host.
    ///
    /// # Safety
    /// `[stack_top - 64, stack_top)` must be a live allocation the caller
    /// owns exclusively.
    unsafe fn seed_initial_frame(&self, entry: u32, stack_top: u32) -> u32;

    /// Halts the system after an unrecoverable failure. Never returns.
    fn reset(&self) -> !;
}

/// Capability that hides raw pointer access to user memory for the syscalls
/// that pass pointers in their arguments (`populateTaskInfo`'s and
/// `getResourceInfo`'s `out*`, `pidByName`'s and `launchByName`'s `name*`).
///
/// [`crate::syscall::dispatch`] is otherwise architecture-independent and
/// host-testable; this is the one seam where it needs to turn a bare `u32`
/// argument into bytes. On the real target `usize` and `u32` are the same
/// width, so this is a direct pointer cast; the host test double backs it
/// with a small in-process byte arena so dispatch can be exercised end to
/// end, pointer-bearing calls included, without real target memory.
pub trait Memory {
    /// Copies `buf.len()` bytes starting at `addr` into `buf`.
    fn read(&self, addr: u32, buf: &mut [u8]);

    /// Copies `bytes` to `addr`.
    fn write(&self, addr: u32, bytes: &[u8]);
}
