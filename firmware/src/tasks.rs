// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Demo thread bodies.
//!
//! These are exactly the threads the fixed table in [`crate::config`]
//! registers at boot, each an infinite loop as required of a cooperating
//! thread (a thread that returns is a bug the kernel does not guard
//! against, matching the reference firmware's tasks). `idle`, `flash4Hz`,
//! `oneshot`, `lengthyFn`, `readKeys`, `debounce`, `uncooperative`,
//! `errant`, and `important` follow the reference firmware's task bodies
//! directly; `testPiLow`/`testPiMedium`/`testPiHigh` have no reference
//! body (only forward declarations survive in the original source) and are
//! written fresh against the priority-inheritance scenario they're named
//! for.

use unwrap_lite::UnwrapLite;
use userlib::hl;

use crate::board::{wait_microseconds, Board, Led, BOARD};

/// Table index of the system's one mutex (named "resource" after the
/// reference firmware's sole `mutex` instance).
const RESOURCE: u32 = 0;

/// Semaphore table indices, by the convention the reference firmware's
/// `keyPressed`/`keyReleased`/`flashReq` globals establish -- the ABI itself
/// only knows these as indices 0/1/2.
const KEY_PRESSED: u32 = 0;
const KEY_RELEASED: u32 = 1;
const FLASH_REQ: u32 = 2;

/// Only one thread may ever be `Ready`-or-`Unrun` at all times or the
/// scheduler has nothing to run; this thread exists to guarantee that.
pub extern "C" fn idle() -> ! {
    loop {
        BOARD.set_led(Led::Orange, true);
        wait_microseconds(1000);
        BOARD.set_led(Led::Orange, false);
        hl::yield_now();
    }
}

pub extern "C" fn flash4_hz() -> ! {
    loop {
        let on = BOARD.get_led(Led::Green);
        BOARD.set_led(Led::Green, !on);
        hl::sleep_for(125);
    }
}

pub extern "C" fn oneshot() -> ! {
    loop {
        hl::wait(FLASH_REQ).unwrap_lite();
        BOARD.set_led(Led::Yellow, true);
        hl::sleep_for(1000);
        BOARD.set_led(Led::Yellow, false);
    }
}

/// One unit of simulated work: `lengthyFn` calls this 5000 times per
/// critical section to hold `resource` long enough to be worth preempting.
fn part_of_lengthy_fn() {
    wait_microseconds(990);
    hl::yield_now();
}

pub extern "C" fn lengthy_fn() -> ! {
    loop {
        let _guard = hl::lock(RESOURCE).unwrap_lite();
        for _ in 0..5000u16 {
            part_of_lengthy_fn();
        }
        let on = BOARD.get_led(Led::Red);
        BOARD.set_led(Led::Red, !on);
    }
}

pub extern "C" fn read_keys() -> ! {
    loop {
        hl::wait(KEY_RELEASED).unwrap_lite();
        let mut buttons = 0u8;
        while buttons == 0 {
            buttons = BOARD.read_buttons();
            hl::yield_now();
        }
        hl::post(KEY_PRESSED).unwrap_lite();

        if buttons & 0b0000_0001 != 0 {
            let on = BOARD.get_led(Led::Yellow);
            BOARD.set_led(Led::Yellow, !on);
            BOARD.set_led(Led::Red, true);
        }
        if buttons & 0b0000_0010 != 0 {
            hl::post(FLASH_REQ).unwrap_lite();
            BOARD.set_led(Led::Red, false);
        }
        if buttons & 0b0000_0100 != 0 {
            if let Some(pid) = hl::pid_by_name("flash4Hz") {
                hl::restart(pid).ok();
            }
        }
        if buttons & 0b0000_1000 != 0 {
            if let Some(pid) = hl::pid_by_name("flash4Hz") {
                hl::kill(pid).ok();
            }
        }
        if buttons & 0b0001_0000 != 0 {
            if let Some(pid) = hl::pid_by_name("lengthyFn") {
                hl::set_thread_priority(pid, abi::Priority(4)).ok();
            }
        }
        hl::yield_now();
    }
}

pub extern "C" fn debounce() -> ! {
    loop {
        hl::wait(KEY_PRESSED).unwrap_lite();
        let mut count = 10u8;
        while count != 0 {
            hl::sleep_for(10);
            if BOARD.read_buttons() == 0 {
                count -= 1;
            } else {
                count = 10;
            }
        }
        hl::post(KEY_RELEASED).unwrap_lite();
    }
}

/// Deliberately ill-behaved: spins without yielding while button 4 is held,
/// demonstrating why preemption (not just cooperative `yield`) matters.
pub extern "C" fn uncooperative() -> ! {
    loop {
        while BOARD.read_buttons() == 0b0000_1000 {}
        hl::yield_now();
    }
}

/// Deliberately faulting: while button 6 is held, repeatedly writes to the
/// base of the heap arena, which is never part of this thread's own stack
/// window. The first write takes a memory-management fault, exercising
/// the fault-containment scenario end to end.
pub extern "C" fn errant() -> ! {
    loop {
        while BOARD.read_buttons() == 0b0010_0000 {
            // Safety: none -- this is intentionally out of bounds, to
            // trigger the fault-containment path the kernel is tested
            // against.
            unsafe { (abi::SRAM_BASE as *mut u32).write_volatile(0) };
        }
        hl::yield_now();
    }
}

pub extern "C" fn important() -> ! {
    loop {
        let _guard = hl::lock(RESOURCE).unwrap_lite();
        BOARD.set_led(Led::Blue, true);
        hl::sleep_for(1000);
        BOARD.set_led(Led::Blue, false);
    }
}

/// Holds `resource` for a long stretch at the least important of the three
/// priority-inheritance demo priorities, so `testPiHigh` blocking on it
/// exercises inheritance (§8 scenario 3).
pub extern "C" fn test_pi_low() -> ! {
    loop {
        let _guard = hl::lock(RESOURCE).unwrap_lite();
        wait_microseconds(50_000);
        hl::yield_now();
    }
}

/// Runs at the middle priority and never touches `resource`, so it is the
/// thread priority inheritance exists to keep from running ahead of the
/// blocked `testPiHigh` while `testPiLow` holds the mutex.
pub extern "C" fn test_pi_medium() -> ! {
    loop {
        hl::yield_now();
    }
}

/// Blocks on `resource` shortly after `testPiLow` acquires it; with
/// inheritance enabled, `testPiLow`'s current priority should rise to
/// match this thread's until it unlocks.
pub extern "C" fn test_pi_high() -> ! {
    loop {
        hl::sleep_for(10);
        let _guard = hl::lock(RESOURCE).unwrap_lite();
        hl::yield_now();
    }
}

