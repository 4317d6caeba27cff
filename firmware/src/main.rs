// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Demo firmware image: brings up the board, then hands control to the
//! kernel with a fixed thread table.
//!
//! There is no `panic_halt` here, unlike the structural teacher's own boot
//! stage -- `kern::fail` supplies the one `#[panic_handler]` this binary
//! links, since a real kernel has somewhere useful to latch a panic message
//! before parking the CPU, and a binary may only have one panic handler.

#![no_std]
#![no_main]

use cortex_m_rt::entry;

mod board;
mod config;
mod tasks;

#[entry]
fn main() -> ! {
    board::BOARD.init();
    kern::arch::arm_m::boot(config::populate)
}
