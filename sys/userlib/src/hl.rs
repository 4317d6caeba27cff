// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ergonomic wrappers over the raw syscall stubs in the crate root.
//!
//! The raw `sys_*` functions return bare `u32` codes and take raw table
//! indices because that's what the ABI carries across the SVC boundary.
//! Everything here decodes those codes into [`KernelError`] and, where a
//! resource has natural RAII scoping (the mutex), returns a guard instead
//! of a bare success code.

use core::mem::MaybeUninit;

use unwrap_lite::UnwrapLite;
use zerocopy::FromBytes;

use crate::{
    sys_get_resource_info, sys_kill, sys_launch_by_name, sys_lock, sys_pid_by_name,
    sys_populate_task_info, sys_post, sys_restart, sys_set_preemption,
    sys_set_priority_inheritance, sys_set_scheduler, sys_set_thread_priority, sys_sleep,
    sys_unlock, sys_wait, sys_yield,
};
use abi::{
    KernelError, MutexInfo, Pid, Priority, ResourceKind, SemaphoreInfo, TaskInfo, MAX_NAME_LEN,
};

/// Turns a raw syscall return code into a typed result. 0 is success;
/// anything else is one of the codes in [`KernelError::code`].
fn decode(ret: u32) -> Result<(), KernelError> {
    if ret == 0 {
        Ok(())
    } else {
        Err(KernelError::try_from(ret).unwrap_lite())
    }
}

/// Gives up the rest of the current time slice.
#[inline(always)]
pub fn yield_now() {
    sys_yield();
}

/// Blocks the calling thread for `ticks` system ticks.
#[inline(always)]
pub fn sleep_for(ticks: u32) {
    sys_sleep(ticks);
}

/// A held mutex. Dropping this unlocks it.
///
/// There's no separate "mutex handle" type: the table index the kernel
/// assigns each mutex at boot is the only identity a mutex has, so this
/// guard just remembers it.
pub struct MutexGuard {
    index: u32,
}

impl Drop for MutexGuard {
    fn drop(&mut self) {
        sys_unlock(self.index);
    }
}

/// Locks the mutex at table index `index`, blocking if it's already held.
///
/// Only fails if `index` doesn't resolve to a mutex in the table.
pub fn lock(index: u32) -> Result<MutexGuard, KernelError> {
    decode(sys_lock(index))?;
    Ok(MutexGuard { index })
}

/// Waits on the semaphore at table index `index`, blocking while its count
/// is zero.
pub fn wait(index: u32) -> Result<(), KernelError> {
    decode(sys_wait(index))
}

/// Posts to the semaphore at table index `index`.
pub fn post(index: u32) -> Result<(), KernelError> {
    decode(sys_post(index))
}

/// Kills the thread identified by `pid`.
pub fn kill(pid: Pid) -> Result<(), KernelError> {
    decode(sys_kill(pid.0))
}

/// Restarts the (presumably dead) thread identified by `pid`.
pub fn restart(pid: Pid) -> Result<(), KernelError> {
    decode(sys_restart(pid.0))
}

/// Sets thread `pid`'s base priority.
pub fn set_thread_priority(pid: Pid, priority: Priority) -> Result<(), KernelError> {
    decode(sys_set_thread_priority(pid.0, priority.0))
}

/// Enables or disables preemptive context switching on the tick interrupt.
pub fn set_preemption(enabled: bool) {
    sys_set_preemption(enabled);
}

/// Enables or disables priority inheritance on mutex ownership.
pub fn set_priority_inheritance(enabled: bool) {
    sys_set_priority_inheritance(enabled);
}

/// Selects the scheduling discipline: priority-based when `priority_mode`
/// is true, round-robin otherwise.
pub fn set_scheduler(priority_mode: bool) {
    sys_set_scheduler(priority_mode);
}

/// Reads back the thread-table snapshot for slot `index`.
///
/// Returns `None` if `index` is out of range.
pub fn task_info(index: u32) -> Option<TaskInfo> {
    let mut out = MaybeUninit::<TaskInfo>::uninit();
    // Safety: `out` is sized for `TaskInfo` and the kernel only ever
    // writes a full `TaskInfo` worth of bytes into it on success.
    let rc = unsafe { sys_populate_task_info(index, out.as_mut_ptr()) };
    if rc == 0 {
        Some(unsafe { out.assume_init() })
    } else {
        None
    }
}

/// Reads back the mutex-table snapshot for slot `index`.
///
/// Returns `None` if `index` is out of range.
pub fn mutex_info(index: u32) -> Option<MutexInfo> {
    let mut buf = [0u8; core::mem::size_of::<MutexInfo>()];
    // Safety: `buf` is sized for `MutexInfo`, matching `ResourceKind::Mutex`.
    let rc = unsafe { sys_get_resource_info(ResourceKind::Mutex, index, buf.as_mut_ptr()) };
    if rc == 0 {
        Some(MutexInfo::read_from_bytes(&buf).unwrap_lite())
    } else {
        None
    }
}

/// Reads back the semaphore-table snapshot for slot `index`.
///
/// Returns `None` if `index` is out of range.
pub fn semaphore_info(index: u32) -> Option<SemaphoreInfo> {
    let mut buf = [0u8; core::mem::size_of::<SemaphoreInfo>()];
    // Safety: `buf` is sized for `SemaphoreInfo`, matching
    // `ResourceKind::Semaphore`.
    let rc = unsafe { sys_get_resource_info(ResourceKind::Semaphore, index, buf.as_mut_ptr()) };
    if rc == 0 {
        Some(SemaphoreInfo::read_from_bytes(&buf).unwrap_lite())
    } else {
        None
    }
}

/// Packs `name` into a NUL-padded, `MAX_NAME_LEN`-bounded stack buffer for
/// the `pidByName`/`launchByName` calls' `name*` argument.
///
/// Names longer than `MAX_NAME_LEN` are truncated; the kernel only ever
/// compares up to that many bytes anyway (§3).
fn pack_name(name: &str) -> [u8; MAX_NAME_LEN + 1] {
    let mut buf = [0u8; MAX_NAME_LEN + 1];
    let bytes = name.as_bytes();
    let len = bytes.len().min(MAX_NAME_LEN);
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

/// Looks up a thread by name.
///
/// Returns `None` if no thread has that name.
pub fn pid_by_name(name: &str) -> Option<Pid> {
    let buf = pack_name(name);
    // Safety: `buf` is NUL-terminated (or full) and lives for the call.
    let idx = unsafe { sys_pid_by_name(buf.as_ptr()) };
    if idx == 0xFFFF_FFFF {
        None
    } else {
        task_info(idx).map(|info| Pid(info.pid))
    }
}

/// Looks up a thread by name and starts it running from its entry point.
pub fn launch_by_name(name: &str) -> Result<(), KernelError> {
    let buf = pack_name(name);
    // Safety: `buf` is NUL-terminated (or full) and lives for the call.
    let rc = unsafe { sys_launch_by_name(buf.as_ptr()) };
    decode(rc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_name_truncates_and_pads() {
        let buf = pack_name("idle");
        assert_eq!(&buf[..4], b"idle");
        assert_eq!(buf[4], 0);

        let long = "x".repeat(MAX_NAME_LEN + 5);
        let buf = pack_name(&long);
        assert_eq!(buf.len(), MAX_NAME_LEN + 1);
        assert!(buf[..MAX_NAME_LEN].iter().all(|&b| b == b'x'));
    }

    #[test]
    fn decode_maps_zero_to_ok() {
        assert_eq!(decode(0), Ok(()));
        assert_eq!(decode(4), Err(KernelError::NoSuchThread));
    }
}
