// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SRD-mask bookkeeping for the MPU region manager (C2).
//!
//! This module is the architecture-independent half of memory protection:
//! the 32-bit mask arithmetic that decides which 1 KiB SRAM subregions a
//! thread may touch. Actually writing the mask into MPU registers is the
//! `Cpu::apply_srd_mask` half, implemented per-architecture.

use abi::{SRAM_BASE, SRAM_END};

/// All 32 subregions denied. The starting point before any window is
/// granted, and the state a freshly freed allocation returns to.
pub const fn no_access_mask() -> u32 {
    0xFFFF_FFFF
}

/// Index of the 1 KiB subregion containing `addr`, not bounds-checked
/// against the arena.
fn subregion_index(addr: u32) -> u32 {
    (addr - SRAM_BASE) / abi::HEAP_CHUNK_BYTES as u32
}

/// Clears the bits in `mask` corresponding to the 1 KiB subregions covered
/// by `[base, base + bytes)`, granting access to that window.
///
/// Rejects (leaves `mask` unchanged) if `base` lies below SRAM or `bytes`
/// is zero. Clamps the window if it would extend past the end of SRAM.
pub fn add_window(mask: &mut u32, base: u32, bytes: u32) {
    if bytes == 0 || base < SRAM_BASE {
        return;
    }
    let bytes = if base.saturating_add(bytes) > SRAM_END {
        SRAM_END - base
    } else {
        bytes
    };
    let start = subregion_index(base);
    let extra_subregions = (bytes - 1) / abi::HEAP_CHUNK_BYTES as u32;
    for i in start..=start + extra_subregions {
        *mask &= !(1 << i);
    }
}

/// The inverse of [`add_window`]: sets the bits for the covered subregions,
/// revoking access. Same rejection and clamping rules.
pub fn revoke_window(mask: &mut u32, base: u32, bytes: u32) {
    if bytes == 0 || base < SRAM_BASE {
        return;
    }
    let bytes = if base.saturating_add(bytes) > SRAM_END {
        SRAM_END - base
    } else {
        bytes
    };
    let start = subregion_index(base);
    let extra_subregions = (bytes - 1) / abi::HEAP_CHUNK_BYTES as u32;
    for i in start..=start + extra_subregions {
        *mask |= 1 << i;
    }
}

/// Applies `mask` to the hardware (or, on the host test build, records it
/// for inspection) through the `Cpu` capability.
pub fn apply_mask(cpu: &impl crate::arch::Cpu, mask: u32) {
    cpu.apply_srd_mask(mask);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_access_denies_everything() {
        assert_eq!(no_access_mask(), 0xFFFF_FFFF);
    }

    #[test]
    fn window_grants_exactly_its_chunks() {
        let mut mask = no_access_mask();
        add_window(&mut mask, SRAM_BASE, 1024);
        assert_eq!(mask, 0xFFFF_FFFE);
    }

    #[test]
    fn window_spanning_two_chunks_grants_both() {
        let mut mask = no_access_mask();
        add_window(&mut mask, SRAM_BASE + 1024, 1025);
        // subregions 1 and 2 granted
        assert_eq!(mask, 0xFFFF_FFF9);
    }

    #[test]
    fn revoke_is_the_inverse_of_add() {
        let mut mask = no_access_mask();
        add_window(&mut mask, SRAM_BASE + 2048, 3072);
        assert_ne!(mask, no_access_mask());
        revoke_window(&mut mask, SRAM_BASE + 2048, 3072);
        assert_eq!(mask, no_access_mask());
    }

    #[test]
    fn zero_size_window_is_rejected() {
        let mut mask = no_access_mask();
        add_window(&mut mask, SRAM_BASE, 0);
        assert_eq!(mask, no_access_mask());
    }

    #[test]
    fn window_below_sram_is_rejected() {
        let mut mask = no_access_mask();
        add_window(&mut mask, SRAM_BASE - 4, 1024);
        assert_eq!(mask, no_access_mask());
    }

    #[test]
    fn window_past_sram_end_is_clamped() {
        let mut mask = no_access_mask();
        add_window(&mut mask, SRAM_END - 1024, 8192);
        assert_eq!(mask, 0x7FFF_FFFF);
    }
}
