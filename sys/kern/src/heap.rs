// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! First-fit-with-skip heap allocator (C3) over the fixed SRAM arena.
//!
//! The arena is exactly [`abi::HEAP_CHUNKS`] chunks of [`abi::HEAP_CHUNK_BYTES`]
//! bytes each. `chunk_status[i]` encodes, in one integer, the entire
//! allocation state: `0` free, `+n` the first chunk of an `n`-chunk
//! allocation, `-1` an interior chunk of a preceding allocation. This is
//! exactly the encoding the reference firmware uses (`allocated_lengths[]`
//! in the original `mallocHeap`/`freeHeap`), kept here because it lets the
//! whole heap live in one small fixed-size array with no free list to
//! corrupt.

use abi::{HEAP_CHUNKS, HEAP_CHUNK_BYTES};

use crate::arch::Cpu;
use crate::mpu;

/// The heap arena, tracked purely as chunk-status metadata. `base` is the
/// address of chunk 0; callers are responsible for the backing bytes
/// actually living there (the firmware reserves the arena in its linker
/// script).
pub struct Heap {
    chunk_status: [i8; HEAP_CHUNKS],
    base: u32,
}

impl Heap {
    pub const fn new(base: u32) -> Self {
        Self {
            chunk_status: [0; HEAP_CHUNKS],
            base,
        }
    }

    fn chunks_for(bytes: usize) -> usize {
        (bytes + HEAP_CHUNK_BYTES - 1) / HEAP_CHUNK_BYTES
    }

    fn addr_of(&self, chunk: usize) -> u32 {
        self.base + (chunk * HEAP_CHUNK_BYTES) as u32
    }

    /// Allocates `bytes`, rounded up to a whole number of chunks, using
    /// first-fit-with-skip: when a candidate run is blocked by an allocated
    /// chunk at offset `j`, the scan resumes at `i + j` rather than `i + 1`,
    /// so a long allocated run is only ever examined once.
    ///
    /// On success, grants access to the new region by updating `active_mask`
    /// (the software-shadowed SRD mask currently loaded into the MPU) and
    /// reapplying it through `cpu` — the caller (typically mid-`createThread`)
    /// needs to write into the memory it just got back immediately.
    pub fn malloc(
        &mut self,
        bytes: usize,
        active_mask: &mut u32,
        cpu: &impl Cpu,
    ) -> Option<u32> {
        if bytes == 0 {
            return None;
        }
        let n = Self::chunks_for(bytes);
        if n > HEAP_CHUNKS {
            return None;
        }

        let mut i = 0;
        while i <= HEAP_CHUNKS - n {
            let mut free_run = true;
            let mut j = 0;
            while j < n {
                if self.chunk_status[i + j] != 0 {
                    free_run = false;
                    i += j;
                    break;
                }
                j += 1;
            }
            if free_run {
                self.chunk_status[i] = n as i8;
                for k in 1..n {
                    self.chunk_status[i + k] = -1;
                }
                let ptr = self.addr_of(i);
                mpu::add_window(active_mask, ptr, (n * HEAP_CHUNK_BYTES) as u32);
                mpu::apply_mask(cpu, *active_mask);
                return Some(ptr);
            }
            i += 1;
        }
        None
    }

    /// Frees the allocation starting at `ptr`. A no-op on `ptr` outside the
    /// arena, or not the start of a live allocation — the reference firmware
    /// silently ignores both, and so does this rewrite.
    ///
    /// The freed chunk index is always derived from `ptr` itself; the
    /// reference implementation has a variant that instead reads an
    /// undeclared `ptr` identifier here (a bug) — not reproduced.
    pub fn free(&mut self, ptr: u32, active_mask: &mut u32, cpu: &impl Cpu) {
        if ptr < self.base {
            return;
        }
        let offset = ptr - self.base;
        if offset % HEAP_CHUNK_BYTES as u32 != 0 {
            return;
        }
        let start = (offset / HEAP_CHUNK_BYTES as u32) as usize;
        if start >= HEAP_CHUNKS {
            return;
        }
        let n = self.chunk_status[start];
        if n <= 0 {
            return;
        }
        let n = n as usize;
        mpu::revoke_window(active_mask, ptr, (n * HEAP_CHUNK_BYTES) as u32);
        mpu::apply_mask(cpu, *active_mask);
        for k in 0..n {
            self.chunk_status[start + k] = 0;
        }
    }

    /// Returns a copy of the chunk-status array, for invariant checks and
    /// the `createThread`-then-`killThread` law in tests.
    pub fn snapshot(&self) -> [i8; HEAP_CHUNKS] {
        self.chunk_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::sim::Sim;

    const BASE: u32 = abi::SRAM_BASE;

    #[test]
    fn zero_size_allocation_returns_none() {
        let mut heap = Heap::new(BASE);
        let cpu = Sim::new();
        let mut mask = mpu::no_access_mask();
        assert!(heap.malloc(0, &mut mask, &cpu).is_none());
    }

    #[test]
    fn first_fit_with_skip_matches_reference_scenario() {
        let mut heap = Heap::new(BASE);
        let cpu = Sim::new();
        let mut mask = mpu::no_access_mask();

        let sizes_chunks = [2, 4, 2, 6, 4];
        let mut starts = Vec::new();
        for chunks in sizes_chunks {
            let ptr = heap
                .malloc(chunks * HEAP_CHUNK_BYTES, &mut mask, &cpu)
                .expect("arena has room");
            starts.push(((ptr - BASE) / HEAP_CHUNK_BYTES as u32) as usize);
        }
        assert_eq!(starts, vec![0, 2, 6, 8, 14]);

        // Free the 4-chunk allocation starting at index 2.
        heap.free(BASE + 2 * HEAP_CHUNK_BYTES as u32, &mut mask, &cpu);

        let ptr = heap
            .malloc(3 * HEAP_CHUNK_BYTES, &mut mask, &cpu)
            .expect("fits in freed run");
        assert_eq!((ptr - BASE) / HEAP_CHUNK_BYTES as u32, 2);

        // The freed run (chunks 2-5) only had 1 chunk left after the
        // 3-chunk allocation above claimed chunks 2-4; a 2-chunk request
        // doesn't fit there, so first-fit-with-skip continues past every
        // other occupied run and lands in the untouched tail of the arena.
        let ptr = heap
            .malloc(2 * HEAP_CHUNK_BYTES, &mut mask, &cpu)
            .expect("arena has room in its untouched tail");
        assert_eq!((ptr - BASE) / HEAP_CHUNK_BYTES as u32, 18);
    }

    #[test]
    fn alloc_then_free_restores_chunk_status() {
        let mut heap = Heap::new(BASE);
        let cpu = Sim::new();
        let mut mask = mpu::no_access_mask();

        let before = heap.snapshot();
        let ptr = heap.malloc(1024, &mut mask, &cpu).unwrap();
        heap.free(ptr, &mut mask, &cpu);
        assert_eq!(heap.snapshot(), before);
    }

    #[test]
    fn free_of_interior_chunk_is_a_no_op() {
        let mut heap = Heap::new(BASE);
        let cpu = Sim::new();
        let mut mask = mpu::no_access_mask();

        let ptr = heap.malloc(3 * HEAP_CHUNK_BYTES, &mut mask, &cpu).unwrap();
        let before = heap.snapshot();
        heap.free(ptr + HEAP_CHUNK_BYTES as u32, &mut mask, &cpu);
        assert_eq!(heap.snapshot(), before);
    }

    #[test]
    fn oversized_allocation_fails() {
        let mut heap = Heap::new(BASE);
        let cpu = Sim::new();
        let mut mask = mpu::no_access_mask();
        assert!(heap
            .malloc((HEAP_CHUNKS + 1) * HEAP_CHUNK_BYTES, &mut mask, &cpu)
            .is_none());
    }
}
