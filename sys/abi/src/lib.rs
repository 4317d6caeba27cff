// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel, `userlib`, and firmware
//! thread bodies.

#![cfg_attr(target_os = "none", no_std)]

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Maximum number of threads the kernel can track. The reference firmware
/// fixes this at 12; it's kept as a named constant because the waiter-queue
/// capacity proof (see `MUTEX_QUEUE_CAP`/`SEM_QUEUE_CAP`) is expressed in
/// terms of it.
pub const MAX_THREADS: usize = 12;

/// Number of mutexes in the system. The reference firmware has exactly one
/// (`resource`).
pub const MAX_MUTEXES: usize = 1;

/// Capacity of each mutex's FIFO waiter queue.
pub const MUTEX_QUEUE_CAP: usize = 2;

/// Number of semaphores in the system (`keyPressed`, `keyReleased`,
/// `flashReq` in the reference firmware).
pub const MAX_SEMAPHORES: usize = 3;

/// Capacity of each semaphore's FIFO waiter queue.
pub const SEM_QUEUE_CAP: usize = 2;

/// Size of one heap chunk, and the granularity of SRD-based access control.
pub const HEAP_CHUNK_BYTES: usize = 1024;

/// Number of chunks in the heap arena (28 KiB).
pub const HEAP_CHUNKS: usize = 28;

/// Base address of flash.
pub const FLASH_BASE: u32 = 0x0000_0000;
/// Size of the flash region.
pub const FLASH_SIZE: u32 = 256 * 1024;

/// Base address of the peripheral bitband/alias window.
pub const PERIPH_BASE: u32 = 0x4000_0000;
/// Size of the peripheral window.
pub const PERIPH_SIZE: u32 = 64 * 1024 * 1024;

/// Base address of on-chip SRAM.
pub const SRAM_BASE: u32 = 0x2000_0000;
/// Size of on-chip SRAM (four 8 KiB MPU regions).
pub const SRAM_SIZE: u32 = 32 * 1024;
/// One past the last valid SRAM address.
pub const SRAM_END: u32 = SRAM_BASE + SRAM_SIZE;

/// Number of MPU regions covering SRAM, each subdivided into 8 SRD-controlled
/// 1 KiB subregions.
pub const SRAM_MPU_REGIONS: usize = 4;

/// System clock frequency assumed by the tick configuration.
pub const SYSTEM_CLOCK_HZ: u32 = 40_000_000;

/// SysTick reload value giving a 1 ms period at [`SYSTEM_CLOCK_HZ`].
pub const SYSTICK_RELOAD: u32 = SYSTEM_CLOCK_HZ / 1000 - 1;

/// Maximum length of a thread's name, not counting the null terminator.
pub const MAX_NAME_LEN: usize = 15;

/// Names a thread by the address of its entry point.
///
/// This is this system's notion of PID: there is no separate counter or
/// generation number, because threads are never created dynamically after
/// boot (every thread's entry point is fixed at link time), so the entry
/// address alone is a stable, collision-free identity.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromBytes, IntoBytes, Immutable)]
#[repr(transparent)]
pub struct Pid(pub u32);

impl Pid {
    /// Reserved PID meaning "no thread" / "invalid slot."
    pub const NONE: Self = Self(0);
}

/// Indicates priority of a thread.
///
/// Priorities are small numbers starting from zero. Numerically lower
/// priorities are more important, so priority 0 is the most likely to be
/// scheduled. This type deliberately does not implement `PartialOrd`/`Ord`,
/// to avoid confusing "greater" with "more important" at call sites.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, FromBytes, IntoBytes, Immutable, Default,
)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Checks if `self` is strictly more important than `other`.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 < other.0
    }
}

/// Which scheduling discipline the kernel is currently using.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum SchedulerMode {
    /// Priority-ordered, with a rotating tiebreak start among threads of
    /// equal priority.
    Priority = 0,
    /// Pure round-robin, ignoring priority.
    RoundRobin = 1,
}

/// A thread's scheduling state.
///
/// This collapses the reference firmware's scattered `state` integer plus
/// separate `mutex`/`semaphore`/`ticks` fields into a single tagged union:
/// the blocking reason is carried as payload on the variant that needs it,
/// rather than living in fields that are meaningless in every other state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ThreadState {
    /// Slot is unoccupied.
    Invalid,
    /// Thread has been created but has never run; its stack holds a freshly
    /// seeded initial frame.
    Unrun,
    /// Thread is eligible for selection by the scheduler.
    Ready,
    /// Thread is the one currently executing.
    Running,
    /// Thread is asleep; becomes `Ready` when the tick counter reaches zero.
    Delayed { ticks_remaining: u32 },
    /// Thread is blocked acquiring mutex `index`.
    BlockedMutex { index: usize },
    /// Thread is blocked waiting on semaphore `index`.
    BlockedSem { index: usize },
    /// Thread has been killed; its stack has been released. Its slot may be
    /// reused by `restartThread` using the same entry point, or remains
    /// retired otherwise.
    Killed,
}

impl ThreadState {
    /// Whether a thread in this state is a candidate for scheduler selection.
    pub fn is_schedulable(self) -> bool {
        matches!(self, ThreadState::Ready | ThreadState::Unrun)
    }
}

/// The sixteen kernel operations reachable through the SVC instruction.
///
/// Values match the reference firmware's call numbers exactly, since they
/// are baked into the `SVC` immediate at every call site in compiled thread
/// bodies.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Syscall {
    Yield = 0,
    Sleep = 1,
    Lock = 2,
    Unlock = 3,
    Wait = 4,
    Post = 5,
    Kill = 6,
    PopulateTaskInfo = 7,
    GetResourceInfo = 8,
    PidByName = 9,
    LaunchByName = 10,
    Restart = 11,
    SetPreemption = 12,
    SetPriorityInheritance = 13,
    SetThreadPriority = 14,
    SetScheduler = 15,
}

impl core::convert::TryFrom<u8> for Syscall {
    type Error = ();

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Ok(match n {
            0 => Syscall::Yield,
            1 => Syscall::Sleep,
            2 => Syscall::Lock,
            3 => Syscall::Unlock,
            4 => Syscall::Wait,
            5 => Syscall::Post,
            6 => Syscall::Kill,
            7 => Syscall::PopulateTaskInfo,
            8 => Syscall::GetResourceInfo,
            9 => Syscall::PidByName,
            10 => Syscall::LaunchByName,
            11 => Syscall::Restart,
            12 => Syscall::SetPreemption,
            13 => Syscall::SetPriorityInheritance,
            14 => Syscall::SetThreadPriority,
            15 => Syscall::SetScheduler,
            _ => return Err(()),
        })
    }
}

/// Recoverable failure modes of the kernel's Rust-level API (§10.2 of the
/// design spec). These are flattened to the ABI's no-op-or-value-in-R0
/// contract at the syscall boundary; they exist as a typed enum for the
/// kernel's own API and its tests.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum KernelError {
    /// `malloc` could not find a fitting run of free chunks.
    OutOfMemory,
    /// `createThread` was given an `entry` already registered in the table.
    DuplicateEntry,
    /// No `Invalid` slot was available in the thread table.
    TableFull,
    /// A thread reference (PID, index, or name) did not resolve.
    NoSuchThread,
    /// `unlock` was attempted by a thread that is not the mutex's owner.
    NotOwner,
    /// A thread could not be restarted because it was not `Killed`/`Unrun`.
    NotRestartable,
}

impl KernelError {
    /// The small positive R0 value the syscall dispatcher returns in place
    /// of this error. 0 is reserved for success, so codes start at 1.
    pub fn code(self) -> u32 {
        match self {
            KernelError::OutOfMemory => 1,
            KernelError::DuplicateEntry => 2,
            KernelError::TableFull => 3,
            KernelError::NoSuchThread => 4,
            KernelError::NotOwner => 5,
            KernelError::NotRestartable => 6,
        }
    }
}

impl core::convert::TryFrom<u32> for KernelError {
    type Error = ();

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        Ok(match n {
            1 => KernelError::OutOfMemory,
            2 => KernelError::DuplicateEntry,
            3 => KernelError::TableFull,
            4 => KernelError::NoSuchThread,
            5 => KernelError::NotOwner,
            6 => KernelError::NotRestartable,
            _ => return Err(()),
        })
    }
}

bitflags::bitflags! {
    /// Access attributes for one MPU region, matching the TEX/S/C/B/AP/XN
    /// fields the reference firmware packs into the region attribute
    /// register.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct RegionAttributes: u32 {
        /// Readable by code running in either privilege level.
        const READ = 1 << 0;
        /// Writable by code running in either privilege level.
        const WRITE = 1 << 1;
        /// Executable (absence implies the XN bit is set).
        const EXECUTE = 1 << 2;
        /// Device memory: implies strongly-ordered, non-cacheable.
        const DEVICE = 1 << 3;
        /// Region is shareable (the `S` bit).
        const SHAREABLE = 1 << 4;
        /// Region is bufferable (the `B` bit).
        const BUFFERABLE = 1 << 5;
        /// Region is cacheable (the `C` bit).
        const CACHEABLE = 1 << 6;
    }
}

/// Which kind of fault caused a `FaultReport` to be generated.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultSource {
    MemManage,
    BusFault,
    UsageFault,
    HardFault,
}

bitflags::bitflags! {
    /// Individual fault causes, decoded from the fault status register bits.
    /// More than one may be set at once; the fault handler reports every bit
    /// that is set rather than the first one found, matching the reference
    /// firmware's `printFaultDebug`.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    pub struct FaultCause: u32 {
        // UsageFault causes.
        const DIV_BY_ZERO = 1 << 0;
        const UNALIGNED_ACCESS = 1 << 1;
        const NO_COPROCESSOR = 1 << 2;
        const INVALID_PC = 1 << 3;
        const INVALID_STATE = 1 << 4;
        const UNDEFINED_INSTRUCTION = 1 << 5;
        // BusFault causes.
        const BUS_FAULT_ON_RETURN = 1 << 6;
        const BUS_FAULT_ON_STACKING = 1 << 7;
        const IMPRECISE_BUS_ERROR = 1 << 8;
        const PRECISE_BUS_ERROR = 1 << 9;
        const INSTRUCTION_BUS_ERROR = 1 << 10;
        const BUS_FAULT_ADDRESS_VALID = 1 << 11;
        // MemManage causes.
        const MEM_FAULT_ON_RETURN = 1 << 12;
        const MEM_FAULT_ON_STACKING = 1 << 13;
        const DATA_ACCESS_VIOLATION = 1 << 14;
        const INSTRUCTION_ACCESS_VIOLATION = 1 << 15;
        const MEM_FAULT_ADDRESS_VALID = 1 << 16;
    }
}

/// The eight registers a Cortex-M exception entry stacks automatically.
#[derive(Copy, Clone, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct ExceptionFrame {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
}

/// A complete post-mortem snapshot of a fault, pushed into a diagnostic ring
/// buffer rather than formatted as text (this kernel assumes no console
/// exists). Carries every field the reference firmware's fault dump prints.
#[derive(Copy, Clone, Debug)]
pub struct FaultReport {
    pub source: FaultSource,
    pub cause: FaultCause,
    pub msp: u32,
    pub psp: u32,
    pub frame: ExceptionFrame,
    /// Raw halfword at `frame.pc - 2`, in its natural (already unswapped)
    /// byte order: the faulting instruction encoding.
    pub faulting_instruction: u16,
    /// MMFAR or BFAR, present only when the matching address-valid cause bit
    /// is set.
    pub faulting_address: Option<u32>,
    /// The thread that was running when the fault was taken, if known.
    pub pid: Option<Pid>,
}

/// Read-only snapshot of one thread, copied out through syscalls 7/8 for
/// introspection (`ps`-style tooling).
#[derive(Copy, Clone, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct TaskInfo {
    pub pid: u32,
    pub state_tag: u8,
    pub base_priority: u8,
    pub current_priority: u8,
    _pad: u8,
    pub cpu_time: u32,
    /// Sum of every thread's `cpu_time` at the moment of the call. This is a
    /// live, monotonically growing total across the system's lifetime, not
    /// a windowed rate — the reference firmware computes it the same way
    /// and this rewrite preserves that definition rather than switching to
    /// a windowed total.
    pub total_time: u32,
    pub name: [u8; MAX_NAME_LEN + 1],
}

/// Read-only snapshot of one mutex, copied out through syscall 8.
#[derive(Copy, Clone, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct MutexInfo {
    pub locked: u8,
    _pad: [u8; 3],
    pub owner_pid: u32,
    pub queue_len: u32,
}

/// Read-only snapshot of one semaphore, copied out through syscall 8.
#[derive(Copy, Clone, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct SemaphoreInfo {
    pub count: u32,
    pub queue_len: u32,
}

/// Which kind of resource `getResourceInfo` (syscall 8) is being asked about.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ResourceKind {
    Mutex = 0,
    Semaphore = 1,
}

impl core::convert::TryFrom<u32> for ResourceKind {
    type Error = ();

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        match n {
            0 => Ok(ResourceKind::Mutex),
            1 => Ok(ResourceKind::Semaphore),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_is_inverted() {
        assert!(Priority(0).is_more_important_than(Priority(1)));
        assert!(!Priority(1).is_more_important_than(Priority(0)));
        assert!(!Priority(3).is_more_important_than(Priority(3)));
    }

    #[test]
    fn syscall_round_trips_every_call_number() {
        for n in 0..16u8 {
            assert!(Syscall::try_from(n).is_ok());
        }
        assert!(Syscall::try_from(16u8).is_err());
    }

    #[test]
    fn systick_reload_is_one_millisecond() {
        assert_eq!(SYSTICK_RELOAD, 39_999);
    }

    #[test]
    fn thread_state_schedulability() {
        assert!(ThreadState::Ready.is_schedulable());
        assert!(ThreadState::Unrun.is_schedulable());
        assert!(!ThreadState::Invalid.is_schedulable());
        assert!(!ThreadState::Killed.is_schedulable());
        assert!(!ThreadState::Delayed { ticks_remaining: 5 }.is_schedulable());
    }

    #[test]
    fn kernel_error_code_round_trips() {
        let errors = [
            KernelError::OutOfMemory,
            KernelError::DuplicateEntry,
            KernelError::TableFull,
            KernelError::NoSuchThread,
            KernelError::NotOwner,
            KernelError::NotRestartable,
        ];
        for e in errors {
            assert_eq!(KernelError::try_from(e.code()), Ok(e));
        }
        assert!(KernelError::try_from(0u32).is_err());
    }
}
