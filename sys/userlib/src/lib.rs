// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! User task support library.
//!
//! This contains syscall stubs and re-exports the contents of the `abi`
//! crate shared with the kernel.
//!
//! # Syscall stub implementations
//!
//! Every syscall here fits in the three-register, one-return-value ABI
//! (§4.7 of the reference call table): up to three word arguments in
//! r0-r2, a single word result back in r0. The call number is not passed
//! in a register at all -- it's the 8-bit immediate operand of the `svc`
//! instruction itself, which `SVCall` recovers by reading the instruction
//! byte at `stacked_pc - 2`. That means each stub needs its own `svc #N`
//! with a compile-time immediate; there's no call-number register to load
//! the way Hubris's IPC stubs load one into r11.
//!
//! Because the whole ABI already lines up with the C calling convention
//! (args in r0-r2, return in r0), these stubs don't need to be `naked`:
//! an ordinary `extern "C" fn` with an inline `asm!` block that names r0
//! as both input and output gets the compiler to do the register shuffling
//! for us.

#![no_std]

pub use abi::*;

pub mod hl;

use core::arch::asm;

/// Relinquishes the remainder of the current time slice without blocking.
#[inline(always)]
pub fn sys_yield() {
    unsafe { svc0(Syscall::Yield as u8, 0) };
}

/// Blocks the calling thread for `ticks` system ticks. `ticks == 0` is a
/// plain yield (§4.7).
#[inline(always)]
pub fn sys_sleep(ticks: u32) {
    unsafe { svc0(Syscall::Sleep as u8, ticks) };
}

/// Locks the mutex at table index `mutex`. Returns 0 on success, or a
/// nonzero `KernelError` code if `mutex` doesn't resolve.
#[inline(always)]
pub fn sys_lock(mutex: u32) -> u32 {
    unsafe { svc0(Syscall::Lock as u8, mutex) }
}

/// Unlocks the mutex at table index `mutex`.
#[inline(always)]
pub fn sys_unlock(mutex: u32) -> u32 {
    unsafe { svc0(Syscall::Unlock as u8, mutex) }
}

/// Waits on the semaphore at table index `sem`, blocking if its count is
/// zero.
#[inline(always)]
pub fn sys_wait(sem: u32) -> u32 {
    unsafe { svc0(Syscall::Wait as u8, sem) }
}

/// Posts to the semaphore at table index `sem`, waking the longest-waiting
/// blocked thread if one exists.
#[inline(always)]
pub fn sys_post(sem: u32) -> u32 {
    unsafe { svc0(Syscall::Post as u8, sem) }
}

/// Kills the thread identified by `pid` (its entry-point address, §3).
#[inline(always)]
pub fn sys_kill(pid: u32) -> u32 {
    unsafe { svc0(Syscall::Kill as u8, pid) }
}

/// Restarts the (presumably dead) thread identified by `pid`.
#[inline(always)]
pub fn sys_restart(pid: u32) -> u32 {
    unsafe { svc0(Syscall::Restart as u8, pid) }
}

/// Copies the [`TaskInfo`] snapshot for thread table slot `idx` into `out`.
///
/// # Safety
/// `out` must point to at least `size_of::<TaskInfo>()` writable bytes.
#[inline(always)]
pub unsafe fn sys_populate_task_info(idx: u32, out: *mut TaskInfo) -> u32 {
    svc2(Syscall::PopulateTaskInfo as u8, idx, out as u32)
}

/// Copies the [`MutexInfo`] or [`SemaphoreInfo`] snapshot (selected by
/// `kind`) for resource table slot `idx` into `out`.
///
/// # Safety
/// `out` must point to enough writable bytes for the resource kind named
/// by `kind` (a [`MutexInfo`] or [`SemaphoreInfo`], whichever is larger
/// being the safe bound if the caller doesn't know `kind` up front).
#[inline(always)]
pub unsafe fn sys_get_resource_info(kind: ResourceKind, idx: u32, out: *mut u8) -> u32 {
    svc3(Syscall::GetResourceInfo as u8, kind as u32, idx, out as u32)
}

/// Looks up a thread by name, returning its table index, or
/// `0xFFFF_FFFF` if no thread has that name.
///
/// # Safety
/// `name` must point to a NUL-terminated or `MAX_NAME_LEN`-bounded byte
/// string.
#[inline(always)]
pub unsafe fn sys_pid_by_name(name: *const u8) -> u32 {
    svc0(Syscall::PidByName as u8, name as u32)
}

/// Looks up a thread by name and starts it running from its entry point.
///
/// # Safety
/// `name` must point to a NUL-terminated or `MAX_NAME_LEN`-bounded byte
/// string.
#[inline(always)]
pub unsafe fn sys_launch_by_name(name: *const u8) -> u32 {
    svc0(Syscall::LaunchByName as u8, name as u32)
}

/// Enables or disables preemptive context switching on the tick interrupt.
#[inline(always)]
pub fn sys_set_preemption(enabled: bool) {
    unsafe { svc0(Syscall::SetPreemption as u8, enabled as u32) };
}

/// Enables or disables priority inheritance on mutex ownership.
#[inline(always)]
pub fn sys_set_priority_inheritance(enabled: bool) {
    unsafe { svc0(Syscall::SetPriorityInheritance as u8, enabled as u32) };
}

/// Sets thread `pid`'s base priority to `priority`.
#[inline(always)]
pub fn sys_set_thread_priority(pid: u32, priority: u8) -> u32 {
    unsafe { svc1(Syscall::SetThreadPriority as u8, pid, priority as u32) }
}

/// Selects the scheduling discipline: priority-based when `priority_mode`
/// is true, round-robin otherwise.
#[inline(always)]
pub fn sys_set_scheduler(priority_mode: bool) {
    unsafe { svc0(Syscall::SetScheduler as u8, priority_mode as u32) };
}

/// Issues an `svc #{n}` with a single argument in r0, returning r0.
///
/// Only defined for the real target: there's no supervisor call to make
/// on the host, so the host build of this crate (exercised by `cargo
/// test` for the pieces that don't actually trap) panics instead. Nothing
/// under `#[cfg(test)]` in this crate calls it.
///
/// # Safety
/// `n` must be a call number the kernel's dispatcher understands; passing
/// an unrecognized number is harmless (the call becomes a no-op per
/// §4.7) but passing one whose argument isn't a plain integer (a pointer
/// call) through this entry point is not.
#[inline(always)]
unsafe fn svc0(n: u8, r0: u32) -> u32 {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "arm")] {
            let ret: u32;
            asm!(
                "svc #{n}",
                n = const n,
                inout("r0") r0 => ret,
                options(nostack),
            );
            ret
        } else {
            let _ = (n, r0);
            unreachable!("svc is only available on target_arch = \"arm\"")
        }
    }
}

/// Issues an `svc #{n}` with arguments in r0 and r1, returning r0.
///
/// # Safety
/// See [`svc0`].
#[inline(always)]
unsafe fn svc1(n: u8, r0: u32, r1: u32) -> u32 {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "arm")] {
            let ret: u32;
            asm!(
                "svc #{n}",
                n = const n,
                inout("r0") r0 => ret,
                in("r1") r1,
                options(nostack),
            );
            ret
        } else {
            let _ = (n, r0, r1);
            unreachable!("svc is only available on target_arch = \"arm\"")
        }
    }
}

/// Issues an `svc #{n}` with arguments in r0 and r1, returning r0. Same as
/// [`svc1`] but named for call sites where the second argument is a
/// pointer, for readability at the call site.
#[inline(always)]
unsafe fn svc2(n: u8, r0: u32, r1: u32) -> u32 {
    svc1(n, r0, r1)
}

/// Issues an `svc #{n}` with arguments in r0, r1 and r2, returning r0.
///
/// # Safety
/// See [`svc0`].
#[inline(always)]
unsafe fn svc3(n: u8, r0: u32, r1: u32, r2: u32) -> u32 {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "arm")] {
            let ret: u32;
            asm!(
                "svc #{n}",
                n = const n,
                inout("r0") r0 => ret,
                in("r1") r1,
                in("r2") r2,
                options(nostack),
            );
            ret
        } else {
            let _ = (n, r0, r1, r2);
            unreachable!("svc is only available on target_arch = \"arm\"")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_numbers_fit_svc_immediate() {
        // The `svc` instruction's immediate is 8 bits; every call number
        // in the table must fit, with headroom for growth.
        for n in 0..=15u8 {
            assert!(Syscall::try_from(n).is_ok());
        }
    }
}
