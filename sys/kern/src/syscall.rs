// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The syscall dispatcher (C7): one tagged match over [`abi::Syscall`],
//! translating each call's R0/R1/R2 arguments into the corresponding
//! [`crate::kernel::Kernel`] method and packing its result back into a
//! single return word.
//!
//! Per the call table (§4.7), unrecognized call numbers are no-ops: the
//! architecture layer decodes the 8-bit SVC immediate with
//! `abi::Syscall::try_from`, and anything that doesn't parse skips this
//! module entirely and returns 0 with no reschedule.
//!
//! Pointer-bearing arguments (`populateTaskInfo`'s and `getResourceInfo`'s
//! `out*`, `pidByName`'s and `launchByName`'s `name*`) are read and written
//! through the [`crate::arch::Memory`] capability rather than raw pointer
//! casts here, so this entire dispatcher — buffer-bearing calls included —
//! is exercised by host-side unit tests against `arch::sim::Sim`.

use abi::{KernelError, Priority, ResourceKind, MAX_NAME_LEN};
use zerocopy::IntoBytes;

use crate::arch::{Cpu, Memory};
use crate::kernel::{Kernel, ResourceInfo, SyscallResult};

/// Sentinel `pidByName` returns in R0 when no thread has the given name,
/// per the call table's "index or -1".
const NOT_FOUND: u32 = 0xFFFF_FFFF;

/// Maps a [`KernelError`] to the small positive return code the ABI uses
/// in place of a typed `Result`. 0 always means success.
fn encode_error(e: KernelError) -> u32 {
    e.code()
}

fn ok(ret: u32, reschedule: bool) -> SyscallResult {
    SyscallResult { ret, reschedule }
}

fn err(e: KernelError) -> SyscallResult {
    SyscallResult {
        ret: encode_error(e),
        reschedule: false,
    }
}

/// Reads a `name*` argument: up to [`MAX_NAME_LEN`] bytes starting at
/// `addr`, stopping early at a nul terminator, matching the reference
/// firmware's C-string thread names (§3's `name` field is "≤15 bytes,
/// null-terminated").
fn read_name<M: Memory>(mem: &M, addr: u32) -> ([u8; MAX_NAME_LEN], usize) {
    let mut buf = [0u8; MAX_NAME_LEN];
    mem.read(addr, &mut buf);
    let len = buf.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN);
    (buf, len)
}

/// Implements the syscall dispatcher (C7): decodes `call` and mutates
/// `kernel` accordingly, reading/writing pointer arguments through `mem`.
///
/// `r0`/`r1`/`r2` are the three argument words the reference ABI allows
/// (§4.7); which ones are meaningful, and whether they're plain integers or
/// addresses, depends on `call` per the call table.
pub fn dispatch<C: Cpu, M: Memory>(
    kernel: &mut Kernel<C>,
    mem: &M,
    call: abi::Syscall,
    r0: u32,
    r1: u32,
    r2: u32,
) -> SyscallResult {
    use abi::Syscall::*;

    match call {
        Yield => ok(0, true),

        Sleep => {
            // sleepTicks=0 means "don't block": the reference firmware's
            // Delayed state requires sleepTicks>0 (§3 invariant), so a
            // sleep(0) resolves to a no-op yield rather than an immediate
            // self-wake next tick.
            if r0 == 0 {
                return ok(0, true);
            }
            let current = kernel.current;
            kernel.threads.get_mut(current).state = abi::ThreadState::Delayed {
                ticks_remaining: r0,
            };
            ok(0, true)
        }

        Lock => match resolve_mutex(kernel, r0) {
            Ok(idx) => ok(0, kernel.lock(idx)),
            Err(e) => err(e),
        },

        Unlock => match resolve_mutex(kernel, r0) {
            Ok(idx) => {
                kernel.unlock(idx);
                ok(0, false)
            }
            Err(e) => err(e),
        },

        Wait => match resolve_semaphore(kernel, r0) {
            Ok(idx) => ok(0, kernel.wait(idx)),
            Err(e) => err(e),
        },

        Post => match resolve_semaphore(kernel, r0) {
            Ok(idx) => ok(0, kernel.post(idx)),
            Err(e) => err(e),
        },

        Kill => match kernel.kill_thread(r0) {
            Ok(reschedule) => ok(0, reschedule),
            Err(e) => err(e),
        },

        PopulateTaskInfo => {
            let idx = r0 as usize;
            match kernel.task_info(idx) {
                Some(info) => {
                    mem.write(r1, info.as_bytes());
                    ok(0, false)
                }
                None => err(KernelError::NoSuchThread),
            }
        }

        GetResourceInfo => {
            let Ok(kind) = ResourceKind::try_from(r0) else {
                return err(KernelError::NoSuchThread);
            };
            let idx = r1 as usize;
            match kernel.resource_info(kind, idx) {
                Some(ResourceInfo::Mutex(info)) => {
                    mem.write(r2, info.as_bytes());
                    ok(0, false)
                }
                Some(ResourceInfo::Semaphore(info)) => {
                    mem.write(r2, info.as_bytes());
                    ok(0, false)
                }
                None => err(KernelError::NoSuchThread),
            }
        }

        PidByName => {
            let (name, len) = read_name(mem, r0);
            match kernel.threads.find_by_name(&name[..len]) {
                Some(idx) => ok(idx as u32, false),
                None => ok(NOT_FOUND, false),
            }
        }

        // "launchByName": resolves a thread by name and starts it running,
        // the same way `restart` does by entry point. Not otherwise
        // specified by the call table beyond its signature; this is the
        // natural reading given `restart` is the only other lifecycle
        // transition into Ready; see `DESIGN.md`.
        LaunchByName => {
            let (name, len) = read_name(mem, r0);
            match kernel.threads.find_by_name(&name[..len]) {
                Some(idx) => {
                    let entry = kernel.threads.get(idx).pid().0;
                    match kernel.restart_thread(entry) {
                        Ok(()) => ok(0, false),
                        Err(e) => err(e),
                    }
                }
                None => err(KernelError::NoSuchThread),
            }
        }

        Restart => match kernel.restart_thread(r0) {
            Ok(()) => ok(0, false),
            Err(e) => err(e),
        },

        SetPreemption => {
            kernel.set_preemption(r0 != 0);
            ok(0, false)
        }

        SetPriorityInheritance => {
            kernel.set_priority_inheritance(r0 != 0);
            ok(0, false)
        }

        SetThreadPriority => match kernel.set_thread_priority(r0, Priority(r1 as u8)) {
            Ok(()) => ok(0, false),
            Err(e) => err(e),
        },

        SetScheduler => {
            kernel.set_scheduler(r0 != 0);
            ok(0, false)
        }
    }
}

fn resolve_mutex<C: Cpu>(kernel: &Kernel<C>, idx: u32) -> Result<usize, KernelError> {
    let idx = idx as usize;
    if idx < kernel.sync.mutexes.len() {
        Ok(idx)
    } else {
        Err(KernelError::NoSuchThread)
    }
}

fn resolve_semaphore<C: Cpu>(kernel: &Kernel<C>, idx: u32) -> Result<usize, KernelError> {
    let idx = idx as usize;
    if idx < kernel.sync.semaphores.len() {
        Ok(idx)
    } else {
        Err(KernelError::NoSuchThread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::sim::Sim;
    use abi::{MutexInfo, Priority, SemaphoreInfo, TaskInfo};
    use zerocopy::FromBytes;

    fn boot() -> (Kernel<Sim>, Sim) {
        let mut k = Kernel::new(Sim::new());
        k.create_thread(0x1000, b"idle", Priority(7), 1024).unwrap();
        k.start();
        (k, Sim::new())
    }

    #[test]
    fn unrecognized_sleep_zero_does_not_block() {
        let (mut k, mem) = boot();
        let out = dispatch(&mut k, &mem, abi::Syscall::Sleep, 0, 0, 0, );
        assert_eq!(out.ret, 0);
        assert!(out.reschedule);
        assert_eq!(k.threads.get(k.current).state, abi::ThreadState::Running);
    }

    #[test]
    fn sleep_nonzero_delays_current_thread() {
        let (mut k, mem) = boot();
        let out = dispatch(&mut k, &mem, abi::Syscall::Sleep, 10, 0, 0);
        assert!(out.reschedule);
        assert_eq!(
            k.threads.get(k.current).state,
            abi::ThreadState::Delayed { ticks_remaining: 10 }
        );
    }

    #[test]
    fn lock_out_of_range_mutex_is_an_error_not_a_panic() {
        let (mut k, mem) = boot();
        let out = dispatch(&mut k, &mem, abi::Syscall::Lock, 99, 0, 0);
        assert_eq!(out.ret, encode_error(KernelError::NoSuchThread));
        assert!(!out.reschedule);
    }

    #[test]
    fn lock_then_unlock_round_trip() {
        let (mut k, mem) = boot();
        let locked = dispatch(&mut k, &mem, abi::Syscall::Lock, 0, 0, 0);
        assert_eq!(locked.ret, 0);
        assert!(!locked.reschedule); // uncontended
        let unlocked = dispatch(&mut k, &mem, abi::Syscall::Unlock, 0, 0, 0);
        assert_eq!(unlocked.ret, 0);
    }

    #[test]
    fn populate_task_info_writes_through_memory() {
        let (mut k, mem) = boot();
        let out_ptr = 0u32;
        let result = dispatch(
            &mut k,
            &mem,
            abi::Syscall::PopulateTaskInfo,
            k.current as u32,
            out_ptr,
            0,
        );
        assert_eq!(result.ret, 0);
        let mut bytes = [0u8; core::mem::size_of::<TaskInfo>()];
        mem.read(out_ptr, &mut bytes);
        let info = TaskInfo::read_from_bytes(&bytes).unwrap();
        assert_eq!(info.pid, 0x1000);
        assert_eq!(&info.name[..4], b"idle");
    }

    #[test]
    fn populate_task_info_unknown_index_is_an_error() {
        let (mut k, mem) = boot();
        let result = dispatch(&mut k, &mem, abi::Syscall::PopulateTaskInfo, 11, 0, 0);
        assert_eq!(result.ret, encode_error(KernelError::NoSuchThread));
    }

    #[test]
    fn get_resource_info_mutex_round_trip() {
        let (mut k, mem) = boot();
        dispatch(&mut k, &mem, abi::Syscall::Lock, 0, 0, 0);
        let out_ptr = 64u32;
        let result = dispatch(
            &mut k,
            &mem,
            abi::Syscall::GetResourceInfo,
            0, // Mutex
            0, // index
            out_ptr,
        );
        assert_eq!(result.ret, 0);
        let mut bytes = [0u8; core::mem::size_of::<MutexInfo>()];
        mem.read(out_ptr, &mut bytes);
        let info = MutexInfo::read_from_bytes(&bytes).unwrap();
        assert_eq!(info.locked, 1);
    }

    #[test]
    fn get_resource_info_semaphore_round_trip() {
        let (mut k, mem) = boot();
        let out_ptr = 64u32;
        let result = dispatch(
            &mut k,
            &mem,
            abi::Syscall::GetResourceInfo,
            1, // Semaphore
            0,
            out_ptr,
        );
        assert_eq!(result.ret, 0);
        let mut bytes = [0u8; core::mem::size_of::<SemaphoreInfo>()];
        mem.read(out_ptr, &mut bytes);
        let info = SemaphoreInfo::read_from_bytes(&bytes).unwrap();
        assert_eq!(info.queue_len, 0);
    }

    #[test]
    fn pid_by_name_returns_index_or_sentinel() {
        let (mut k, mem) = boot();
        let name_ptr = mem.poke(128, b"idle\0");
        let found = dispatch(&mut k, &mem, abi::Syscall::PidByName, name_ptr, 0, 0);
        assert_eq!(found.ret, k.current as u32);

        let name_ptr2 = mem.poke(140, b"nope\0");
        let missing = dispatch(&mut k, &mem, abi::Syscall::PidByName, name_ptr2, 0, 0);
        assert_eq!(missing.ret, NOT_FOUND);
    }

    #[test]
    fn launch_by_name_restarts_a_killed_thread() {
        let (mut k, mem) = boot();
        let demo = k.create_thread(0x2000, b"demo", Priority(4), 1024).unwrap();
        k.kill_thread(demo.0).unwrap();

        let name_ptr = mem.poke(0, b"demo\0");
        let result = dispatch(&mut k, &mem, abi::Syscall::LaunchByName, name_ptr, 0, 0);
        assert_eq!(result.ret, 0);
        let idx = k.threads.find_by_pid(demo).unwrap();
        assert_eq!(k.threads.get(idx).state, abi::ThreadState::Ready);
    }

    #[test]
    fn set_thread_priority_lowers_unboosted_priority() {
        let (mut k, mem) = boot();
        let t = k.create_thread(0x3000, b"t", Priority(5), 1024).unwrap();
        let result = dispatch(&mut k, &mem, abi::Syscall::SetThreadPriority, t.0, 2, 0);
        assert_eq!(result.ret, 0);
        let idx = k.threads.find_by_pid(t).unwrap();
        assert_eq!(k.threads.get(idx).current_priority(), Priority(2));
    }

    #[test]
    fn unknown_target_returns_no_such_thread_without_panicking() {
        let (mut k, mem) = boot();
        let result = dispatch(&mut k, &mem, abi::Syscall::Kill, 0xDEAD_BEEF, 0, 0);
        assert_eq!(result.ret, encode_error(KernelError::NoSuchThread));
    }
}
