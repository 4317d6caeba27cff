// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel-wide fatal path (§10.2): a single-write latch recording that the
//! kernel has failed and why, consulted by a debugger attached after the
//! fact rather than printed live (there is no console, per §1).
//!
//! This module defines the following binary interface to debuggers:
//!
//! - `kern::fail::KERNEL_HAS_FAILED` is a `bool`, cleared before the first
//!   thread runs and set to `true` the one time `die` is reached, whether
//!   via an explicit call or a `panic!` unwinding into this crate's
//!   `#[panic_handler]`.
//! - `kern::fail::KERNEL_EPITAPH` is a fixed-size byte array. `die` writes
//!   as much of its message into it as fits, in UTF-8, truncating rather
//!   than growing it — trim trailing NULs when reading it back.

use core::fmt::{Display, Write};
use core::sync::atomic::{fence, Ordering};

#[used]
static mut KERNEL_HAS_FAILED: bool = false;

const EPITAPH_LEN: usize = 128;

#[used]
static mut KERNEL_EPITAPH: [u8; EPITAPH_LEN] = [0; EPITAPH_LEN];

/// Safety: called at most twice in practice (the real failure, and possibly
/// a recursive one triggered by the first), never concurrently — every
/// caller is already past the point of scheduling anything else.
fn begin_epitaph() -> &'static mut [u8; EPITAPH_LEN] {
    // Safety: see above; there is no `AtomicBool` requirement here since
    // this only ever runs with interrupts effectively moot (the system is
    // already on its way down).
    let already_failed = unsafe {
        core::ptr::replace(core::ptr::addr_of_mut!(KERNEL_HAS_FAILED), true)
    };
    if already_failed {
        // A recursive failure while already dying. Don't try to be clever;
        // just stop.
        spin_forever();
    }
    // Safety: the flag swap above succeeds for exactly one caller.
    unsafe { &mut *core::ptr::addr_of_mut!(KERNEL_EPITAPH) }
}

fn spin_forever() -> ! {
    loop {
        fence(Ordering::SeqCst);
    }
}

/// Latches `msg` into the epitaph buffer and parks the CPU. Never returns.
#[inline(always)]
pub fn die(msg: impl Display) -> ! {
    die_impl(&msg)
}

#[inline(never)]
fn die_impl(msg: &dyn Display) -> ! {
    let buf = begin_epitaph();
    let mut writer = Eulogist { dest: buf };
    write!(writer, "{msg}").ok();
    spin_forever();
}

struct Eulogist {
    dest: &'static mut [u8],
}

impl Write for Eulogist {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let s = s.as_bytes();
        let n = s.len().min(self.dest.len());
        let (dest, leftovers) = {
            let taken = core::mem::take(&mut self.dest);
            taken.split_at_mut(n)
        };
        dest.copy_from_slice(&s[..n]);
        self.dest = leftovers;
        Ok(())
    }
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    die(info)
}
