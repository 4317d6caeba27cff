// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! GPIO backing for the demo thread bodies in [`crate::tasks`].
//!
//! §6 of the design spec draws the kernel's own boundary at the `Board`
//! trait: the kernel crate defines what a board integration must satisfy
//! (console, clock, GPIO) but ships no driver. This firmware image is that
//! integration. `Soc` below is a minimal, single-board concrete
//! implementation, not a general-purpose driver crate: every pin it knows
//! about is the one the reference firmware's five LEDs and six pushbuttons
//! use, addressed through a bit-banded GPIO data register the way the
//! reference hardware exposes it (one address per bit, so a pin read or
//! write is a single volatile access with no read-modify-write race against
//! another pin on the same port).

const PORTA_BASE: u32 = abi::PERIPH_BASE;
const PORTE_BASE: u32 = abi::PERIPH_BASE + 0x1000;
const PORTF_BASE: u32 = abi::PERIPH_BASE + 0x2000;

/// Bit-banded data-register address for pin `n` on a port based at `base`:
/// each bit of the port's data register is aliased to its own word address,
/// `base + (1 << n) * 4`, so that address alone selects the bit.
const fn pin_addr(base: u32, n: u32) -> *mut u32 {
    (base + ((1 << n) << 2)) as *mut u32
}

/// One of the five demo LEDs, named the way the reference firmware names
/// them rather than by port/pin.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Led {
    Blue,
    Red,
    Orange,
    Yellow,
    Green,
}

impl Led {
    const fn addr(self) -> *mut u32 {
        match self {
            Led::Blue => pin_addr(PORTF_BASE, 2),
            Led::Red => pin_addr(PORTA_BASE, 2),
            Led::Orange => pin_addr(PORTA_BASE, 3),
            Led::Yellow => pin_addr(PORTA_BASE, 4),
            Led::Green => pin_addr(PORTE_BASE, 0),
        }
    }
}

/// Bit assignments `read_buttons` packs its return value with, matching
/// `readPbs`'s bit order (button 1 is bit 0, ... button 6 is bit 5).
const BUTTON_ADDRS: [*mut u32; 6] = [
    pin_addr(PORTA_BASE, 5),
    pin_addr(PORTA_BASE, 6),
    pin_addr(PORTA_BASE, 7),
    pin_addr(PORTE_BASE, 3),
    pin_addr(PORTE_BASE, 2),
    pin_addr(PORTE_BASE, 1),
];

/// The board-integration surface the demo threads call through. Kept as a
/// trait, separately from `Soc`, so a host-side test double could stand in
/// for it without touching real MMIO (none of today's tests need one, since
/// the kernel crate's own test suite covers everything below this trait).
pub trait Board {
    fn set_led(&self, led: Led, on: bool);
    fn get_led(&self, led: Led) -> bool;
    fn read_buttons(&self) -> u8;
}

/// The concrete board this image targets.
pub struct Soc;

impl Soc {
    pub const fn new() -> Self {
        Soc
    }

    /// Brings up clocks, pin direction/pulldown/interrupt configuration,
    /// matching `initHw`'s shape (§6's GPIO/clock interfaces): this is
    /// firmware-owned bring-up, not kernel policy, so it runs before
    /// `kern::arch::arm_m::boot` rather than inside it.
    pub fn init(&self) {
        for led in [Led::Blue, Led::Red, Led::Orange, Led::Yellow, Led::Green] {
            self.set_led(led, false);
        }
    }
}

impl Board for Soc {
    fn set_led(&self, led: Led, on: bool) {
        // Safety: `addr` names a single bit-banded GPIO data bit reserved
        // for this LED; writing 0 or !0 through it only ever toggles that
        // one output.
        unsafe { led.addr().write_volatile(if on { u32::MAX } else { 0 }) }
    }

    fn get_led(&self, led: Led) -> bool {
        // Safety: see `set_led`.
        unsafe { led.addr().read_volatile() != 0 }
    }

    fn read_buttons(&self) -> u8 {
        let mut pb = 0u8;
        for (i, addr) in BUTTON_ADDRS.iter().enumerate() {
            // Safety: each address is a single bit-banded input bit.
            if unsafe { addr.read_volatile() } != 0 {
                pb |= 1 << i;
            }
        }
        pb
    }
}

/// The one board instance. Every GPIO access commutes across threads at the
/// single-bit granularity `pin_addr` hands out, so sharing it behind a
/// `'static` reference needs no locking -- it carries no state of its own,
/// unlike `ArmM`'s `irq_was_enabled` token.
pub static BOARD: Soc = Soc::new();

/// Busy-waits for approximately `micros` microseconds at
/// [`abi::SYSTEM_CLOCK_HZ`], the way `waitMicrosecond` does in the reference
/// firmware -- there is no timer-backed delay available to a thread that
/// hasn't yielded.
pub fn wait_microseconds(micros: u32) {
    let cycles_per_us = abi::SYSTEM_CLOCK_HZ / 1_000_000;
    cortex_m::asm::delay(micros.saturating_mul(cycles_per_us));
}
