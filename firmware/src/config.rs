// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The static thread table (§10.3): entry point, name, priority, and stack
//! size for every thread this image runs, plus the initial scheduler mode
//! and reconfiguration flags. `populate` is the one function allowed to
//! call [`kern::kernel::Kernel::create_thread`] -- it runs once, from
//! inside [`kern::arch::arm_m::boot`], before the first thread starts.
//!
//! Twelve threads are registered here, filling [`abi::MAX_THREADS`]
//! exactly: the reference firmware's nine working demo tasks (`idle`,
//! `flash4Hz`, `oneshot`, `lengthyFn`, `readKeys`, `debounce`,
//! `uncooperative`, `errant`, `important`) plus the three
//! priority-inheritance exercises this rewrite supplies bodies for
//! (`highPrioHog`/`highPrioHog2`, the reference firmware's other two
//! declared-but-undefined demo tasks, are not included -- they duplicate
//! `uncooperative`'s busy-spin purpose without adding a distinct scenario).
//! `idle` is listed first so it lands in thread-table slot 0, matching the
//! scheduler's fallback assumption that slot 0 is always schedulable.

use abi::Priority;
use kern::arch::arm_m::ArmM;
use kern::kernel::Kernel;
use unwrap_lite::UnwrapLite;

use crate::tasks;

struct ThreadSpec {
    entry: extern "C" fn() -> !,
    name: &'static [u8],
    priority: Priority,
    stack_bytes: u32,
}

const STACK_BYTES: u32 = 1024;

const THREADS: [ThreadSpec; 12] = [
    ThreadSpec {
        entry: tasks::idle,
        name: b"idle",
        priority: Priority(7),
        stack_bytes: STACK_BYTES,
    },
    ThreadSpec {
        entry: tasks::important,
        name: b"important",
        priority: Priority(0),
        stack_bytes: STACK_BYTES,
    },
    ThreadSpec {
        entry: tasks::test_pi_high,
        name: b"testPiHigh",
        priority: Priority(1),
        stack_bytes: STACK_BYTES,
    },
    ThreadSpec {
        entry: tasks::test_pi_medium,
        name: b"testPiMedium",
        priority: Priority(2),
        stack_bytes: STACK_BYTES,
    },
    ThreadSpec {
        entry: tasks::test_pi_low,
        name: b"testPiLow",
        priority: Priority(3),
        stack_bytes: STACK_BYTES,
    },
    ThreadSpec {
        entry: tasks::read_keys,
        name: b"readKeys",
        priority: Priority(3),
        stack_bytes: STACK_BYTES,
    },
    ThreadSpec {
        entry: tasks::debounce,
        name: b"debounce",
        priority: Priority(4),
        stack_bytes: STACK_BYTES,
    },
    ThreadSpec {
        entry: tasks::lengthy_fn,
        name: b"lengthyFn",
        priority: Priority(4),
        stack_bytes: STACK_BYTES,
    },
    ThreadSpec {
        entry: tasks::flash4_hz,
        name: b"flash4Hz",
        priority: Priority(5),
        stack_bytes: STACK_BYTES,
    },
    ThreadSpec {
        entry: tasks::oneshot,
        name: b"oneshot",
        priority: Priority(5),
        stack_bytes: STACK_BYTES,
    },
    ThreadSpec {
        entry: tasks::uncooperative,
        name: b"uncooperative",
        priority: Priority(6),
        stack_bytes: STACK_BYTES,
    },
    ThreadSpec {
        entry: tasks::errant,
        name: b"errant",
        priority: Priority(6),
        stack_bytes: STACK_BYTES,
    },
];

/// Registers every thread in [`THREADS`] and selects the initial scheduler
/// policy. Passed to [`kern::arch::arm_m::boot`]; unreachable from anywhere
/// else, since there is no syscall for creating a thread (§1 non-goals).
pub fn populate(kernel: &mut Kernel<ArmM>) {
    kernel.set_preemption(true);
    kernel.set_priority_inheritance(true);
    kernel.set_scheduler(true);

    for spec in THREADS.iter() {
        kernel
            .create_thread(
                spec.entry as usize as u32,
                spec.name,
                spec.priority,
                spec.stack_bytes,
            )
            .unwrap_lite();
    }
}
