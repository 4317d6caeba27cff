// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Real Cortex-M (ARMv7-M) implementation of the [`Cpu`]/[`Memory`]
//! capability traits, plus the exception handlers that drive the kernel:
//! SVCall (syscall entry), PendSV (context switch), SysTick (tick), and the
//! four fault exceptions.
//!
//! There is exactly one [`Kernel`] instance for the life of the system,
//! held in a [`StaticCell`] and borrowed for the duration of each handler.
//! Handler-mode code on this target never nests (every kernel exception
//! shares the same priority, per §5), so a single short-lived borrow per
//! handler invocation is sound: two handlers can never be holding it at
//! once.
//!
//! The register-save/restore and first-task-entry sequences are naked
//! functions written in inline `asm!`, following the shape of the
//! reference firmware's `svCallIsr`/`pendSvIsr`/`startRtos` (see
//! `examples/original_source/rtos-project/kernel.c`): SVCall decodes its
//! call number from the immediate encoded in the faulting instruction
//! itself (the byte at `stacked_pc - 2`), not from a register, so the
//! calling convention for a syscall stub is nothing more than "load args
//! into r0-r2, execute `svc #n`" — no register spill is needed around the
//! call site.

use core::arch::asm;
use core::cell::Cell;
use core::sync::atomic::{AtomicU32, Ordering};

use static_cell::StaticCell;

use abi::{ExceptionFrame, FaultCause, FaultSource, RegionAttributes};

use super::{Cpu, Memory};
use crate::fault::{self, FaultAction};
use crate::kernel::Kernel;
use crate::syscall;

/// MPU region indices, matching the reference firmware's fixed layout
/// (`examples/original_source/rtos-project/mm.c`): one region for flash,
/// one for the peripheral window, and four for SRAM (the SRD-bearing
/// regions the kernel reassigns per thread).
const MPU_REGION_FLASH: u32 = 1;
const MPU_REGION_PERIPH: u32 = 2;
const MPU_REGION_SRAM_START: u32 = 3;

const MPU_CTRL: *mut u32 = 0xE000_ED94 as *mut u32;
const MPU_RNR: *mut u32 = 0xE000_ED98 as *mut u32;
const MPU_RBAR: *mut u32 = 0xE000_ED9C as *mut u32;
const MPU_RASR: *mut u32 = 0xE000_EDA0 as *mut u32;

const SHPR2: *mut u32 = 0xE000_ED1C as *mut u32;
const SHPR3: *mut u32 = 0xE000_ED20 as *mut u32;
const SCB_ICSR: *mut u32 = 0xE000_ED04 as *mut u32;
const ICSR_PENDSVSET: u32 = 1 << 28;

/// Configuration Control Register: `DIV_0_TRP` makes integer division by
/// zero raise a UsageFault instead of silently returning 0, per §4.10.
const SCB_CCR: *mut u32 = 0xE000_ED14 as *mut u32;
const CCR_DIV_0_TRP: u32 = 1 << 4;

/// System Handler Control and State Register: bits 16/17/18 enable the
/// MemManage/BusFault/UsageFault handlers as their own exceptions. Without
/// this they're disabled and every one of them escalates straight to
/// HardFault, which would make `fault::policy`'s per-source split moot.
const SHCSR: *mut u32 = 0xE000_ED24 as *mut u32;
const SHCSR_MEMFAULTENA: u32 = 1 << 16;
const SHCSR_BUSFAULTENA: u32 = 1 << 17;
const SHCSR_USGFAULTENA: u32 = 1 << 18;

const CFSR: *mut u32 = 0xE000_ED28 as *mut u32;
const MMFAR: *mut u32 = 0xE000_ED34 as *mut u32;
const BFAR: *mut u32 = 0xE000_ED38 as *mut u32;

/// SysTick registers: control/status, reload value, current value.
const SYST_CSR: *mut u32 = 0xE000_E010 as *mut u32;
const SYST_RVR: *mut u32 = 0xE000_E014 as *mut u32;
const SYST_CVR: *mut u32 = 0xE000_E018 as *mut u32;
const SYST_CSR_ENABLE: u32 = 1 << 0;
const SYST_CSR_TICKINT: u32 = 1 << 1;
const SYST_CSR_CLKSOURCE: u32 = 1 << 2;

const CFSR_IACCVIOL: u32 = 1 << 0;
const CFSR_DACCVIOL: u32 = 1 << 1;
const CFSR_MUNSTKERR: u32 = 1 << 3;
const CFSR_MSTKERR: u32 = 1 << 4;
const CFSR_MMARVALID: u32 = 1 << 7;
const CFSR_IBUSERR: u32 = 1 << 8;
const CFSR_PRECISERR: u32 = 1 << 9;
const CFSR_IMPRECISERR: u32 = 1 << 10;
const CFSR_UNSTKERR: u32 = 1 << 11;
const CFSR_STKERR: u32 = 1 << 12;
const CFSR_BFARVALID: u32 = 1 << 15;
const CFSR_UNDEFINSTR: u32 = 1 << 16;
const CFSR_INVSTATE: u32 = 1 << 17;
const CFSR_INVPC: u32 = 1 << 18;
const CFSR_NOCP: u32 = 1 << 19;
const CFSR_UNALIGNED: u32 = 1 << 24;
const CFSR_DIVBYZERO: u32 = 1 << 25;

/// Region size field for the MPU's `RASR.SIZE`: `log2(bytes) - 1`.
const fn size_field(bytes: u32) -> u32 {
    31 - bytes.leading_zeros() - 1
}

/// The one kernel instance, built at boot and accessed exclusively from
/// handler-mode code for the rest of the system's life.
static KERNEL: StaticCell<Kernel<ArmM>> = StaticCell::new(Kernel::new(ArmM::new()));

/// Software millisecond counter, incremented by the SysTick handler.
/// Reported via [`Cpu::now_ticks`] for diagnostics only; the kernel's own
/// notion of time lives entirely in `ThreadState::Delayed`.
static TICKS: AtomicU32 = AtomicU32::new(0);

/// Real Cortex-M backend. Carries no state of its own beyond the
/// save-then-restore token `disable_irq`/`enable_irq` exchange; everything
/// else lives in hardware registers the methods below touch directly. Zero
/// state otherwise, so additional instances (as used to satisfy the
/// `Memory` argument separately from the kernel's own `cpu` field, see
/// `SVCall` below) are interchangeable.
pub struct ArmM {
    irq_was_enabled: Cell<bool>,
}

impl ArmM {
    const fn new() -> Self {
        Self {
            irq_was_enabled: Cell::new(true),
        }
    }
}

impl Cpu for ArmM {
    fn apply_srd_mask(&self, mask: u32) {
        for i in 0..abi::SRAM_MPU_REGIONS as u32 {
            let srd_byte = (mask >> (8 * i)) & 0xFF;
            // Safety: writes to fixed MPU MMIO registers, region index in
            // range. This is the kernel's own memory-isolation mechanism;
            // nothing else touches these registers.
            unsafe {
                MPU_RNR.write_volatile(MPU_REGION_SRAM_START + i);
                let mut rasr = MPU_RASR.read_volatile();
                rasr &= !(0xFF << 8);
                rasr |= srd_byte << 8;
                MPU_RASR.write_volatile(rasr);
            }
        }
    }

    fn pend_context_switch(&self) {
        // Safety: SCB.ICSR is a fixed MMIO register; setting PENDSVSET is
        // the documented way to request PendSV.
        unsafe {
            SCB_ICSR.write_volatile(ICSR_PENDSVSET);
        }
    }

    fn disable_irq(&self) -> bool {
        let was_enabled = cortex_m::register::primask::read().is_active();
        cortex_m::interrupt::disable();
        self.irq_was_enabled.set(was_enabled);
        was_enabled
    }

    fn enable_irq(&self, was_enabled: bool) {
        if was_enabled {
            // Safety: re-enabling interrupts that this same critical
            // section previously disabled via `disable_irq`.
            unsafe { cortex_m::interrupt::enable() };
        }
    }

    fn now_ticks(&self) -> u64 {
        TICKS.load(Ordering::Relaxed) as u64
    }

    unsafe fn seed_initial_frame(&self, entry: u32, stack_top: u32) -> u32 {
        const FRAME_WORDS: u32 = 16;
        let sp = stack_top - FRAME_WORDS * 4;
        // Safety: caller guarantees `[stack_top - 64, stack_top)` is a live
        // exclusive allocation. Order matches the reference firmware's
        // `createThread`/`restartThreadKernel` stack seed exactly: xPSR,
        // PC, LR, R12, R3..R0, then R11..R4 (the callee-saved block PendSV
        // additionally pushes/pops around every other context switch).
        unsafe {
            let words = sp as *mut u32;
            words.add(0).write(0x0100_0000); // xPSR: Thumb bit set
            words.add(1).write(entry); // PC
            words.add(2).write(super::EXC_RETURN_CONST); // LR
            words.add(3).write(0x1212_1212); // R12
            words.add(4).write(0x0303_0303); // R3
            words.add(5).write(0x0202_0202); // R2
            words.add(6).write(0x0101_0101); // R1
            words.add(7).write(0x0000_0000); // R0
            words.add(8).write(0x1111_1111); // R11
            words.add(9).write(0x1010_1010); // R10
            words.add(10).write(0x0909_0909); // R9
            words.add(11).write(0x0808_0808); // R8
            words.add(12).write(0x0707_0707); // R7
            words.add(13).write(0x0606_0606); // R6
            words.add(14).write(0x0505_0505); // R5
            words.add(15).write(0x0404_0404); // R4
        }
        sp
    }

    fn reset(&self) -> ! {
        cortex_m::peripheral::SCB::sys_reset();
    }
}

impl Memory for ArmM {
    fn read(&self, addr: u32, buf: &mut [u8]) {
        // Safety: `addr` comes from a syscall argument the calling thread
        // supplied for its own memory; the MPU, not this function, is what
        // keeps an unprivileged thread from pointing it somewhere it
        // shouldn't.
        unsafe {
            core::ptr::copy_nonoverlapping(addr as *const u8, buf.as_mut_ptr(), buf.len());
        }
    }

    fn write(&self, addr: u32, bytes: &[u8]) {
        // Safety: see `read`.
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), addr as *mut u8, bytes.len());
        }
    }
}

/// Programs the five fixed MPU regions (flash, peripherals, four SRAM
/// windows) and enables the MPU with the default background region
/// disabled for unprivileged code, so unprivileged thread code can reach
/// only flash, peripherals, and whichever SRAM subregions its current SRD
/// mask grants. Called once at boot, before the first thread runs.
///
/// Region field packing follows `examples/original_source/rtos-project/mm.c`'s
/// `allowFlashAccess`/`allowPeripheralAccess`.
fn configure_mpu() {
    let flash_attrs = RegionAttributes::READ | RegionAttributes::EXECUTE;
    let periph_attrs =
        RegionAttributes::READ | RegionAttributes::WRITE | RegionAttributes::DEVICE;
    let sram_attrs = RegionAttributes::READ | RegionAttributes::WRITE;

    // Safety: these are the kernel's fixed MMIO MPU registers, programmed
    // once at boot before any thread runs.
    unsafe {
        MPU_CTRL.write_volatile(0);

        program_region(MPU_REGION_FLASH, abi::FLASH_BASE, abi::FLASH_SIZE, flash_attrs, 0xFF);
        program_region(
            MPU_REGION_PERIPH,
            abi::PERIPH_BASE,
            abi::PERIPH_SIZE,
            periph_attrs,
            0xFF,
        );
        for i in 0..abi::SRAM_MPU_REGIONS as u32 {
            let region_bytes = abi::SRAM_SIZE / abi::SRAM_MPU_REGIONS as u32;
            program_region(
                MPU_REGION_SRAM_START + i,
                abi::SRAM_BASE + i * region_bytes,
                region_bytes,
                sram_attrs,
                0xFF, // deny every subregion until a thread's mask grants some
            );
        }

        // Enable the MPU with PRIVDEFENA set: privileged code (the
        // kernel, running in handler mode) still sees the full address
        // map via the default memory map -- including its own MSP stack
        // and `.data`/`.bss`, which live outside every SRD window any
        // thread mask ever grants -- while unprivileged thread code is
        // confined entirely to the regions above.
        MPU_CTRL.write_volatile(0b101);
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }
}

/// # Safety
/// Must only be called with the MPU disabled (`MPU_CTRL` cleared), and
/// `region` must be one of the five fixed indices this module defines.
unsafe fn program_region(region: u32, base: u32, bytes: u32, attrs: RegionAttributes, srd: u32) {
    let mut rasr: u32 = 1; // ENABLE
    rasr |= size_field(bytes) << 1;
    rasr |= srd << 8;
    if attrs.contains(RegionAttributes::SHAREABLE) {
        rasr |= 1 << 18;
    }
    if attrs.contains(RegionAttributes::CACHEABLE) {
        rasr |= 1 << 17;
    }
    if attrs.contains(RegionAttributes::BUFFERABLE) {
        rasr |= 1 << 16;
    }
    // AP field: unprivileged RW if WRITE set, unprivileged RO if only
    // READ set. Full read-write-execute for any region this kernel uses.
    let ap = if attrs.contains(RegionAttributes::WRITE) {
        0b011
    } else {
        0b010
    };
    rasr |= ap << 24;
    if !attrs.contains(RegionAttributes::EXECUTE) {
        rasr |= 1 << 28; // XN
    }

    // Safety: caller contract.
    unsafe {
        MPU_RNR.write_volatile(region);
        MPU_RBAR.write_volatile(base);
        MPU_RASR.write_volatile(rasr);
    }
}

/// Boots the system: configures the MPU, sets every kernel exception to a
/// single shared priority (so none can preempt another, matching §5's
/// atomicity contract), runs `populate` against the one kernel instance to
/// register its thread table (`Kernel::create_thread`, `set_scheduler`,
/// etc. are only reachable here, before the first task starts — there is
/// no syscall for creating a thread, matching the spec's non-goal against
/// dynamic creation after boot), picks the first thread via
/// [`Kernel::start`], and transfers control to it. Never returns.
///
/// This is the real-target counterpart of the reference firmware's
/// `startRtos`.
pub fn boot(populate: impl FnOnce(&mut Kernel<ArmM>)) -> ! {
    configure_mpu();

    // Safety: SHPR2/SHPR3 are fixed MMIO registers; this sets SVCall,
    // PendSV, and SysTick to the same priority level so they can never
    // preempt one another.
    unsafe {
        SHPR2.write_volatile(0xE000_0000); // SVCall: priority 7 (lowest) in bits 31:24
        let mut shpr3 = SHPR3.read_volatile();
        shpr3 &= !0xFFFF_0000;
        shpr3 |= 0xE0 << 16; // PendSV: priority 7
        shpr3 |= 0xE0 << 24; // SysTick: priority 7
        SHPR3.write_volatile(shpr3);

        // Enable the three configurable fault handlers so MemManage/Bus/
        // Usage faults reach `configurable_fault` instead of escalating to
        // HardFault, and trap integer division by zero as a UsageFault
        // (§4.10).
        let mut shcsr = SHCSR.read_volatile();
        shcsr |= SHCSR_MEMFAULTENA | SHCSR_BUSFAULTENA | SHCSR_USGFAULTENA;
        SHCSR.write_volatile(shcsr);
        let mut ccr = SCB_CCR.read_volatile();
        ccr |= CCR_DIV_0_TRP;
        SCB_CCR.write_volatile(ccr);

        // Configure SysTick for a 1 ms period at `abi::SYSTEM_CLOCK_HZ`
        // (§4.9) and start it, using the core clock rather than an external
        // reference.
        SYST_CSR.write_volatile(0);
        SYST_RVR.write_volatile(abi::SYSTICK_RELOAD);
        SYST_CVR.write_volatile(0);
        SYST_CSR.write_volatile(SYST_CSR_ENABLE | SYST_CSR_TICKINT | SYST_CSR_CLKSOURCE);
    }

    let sp = {
        let mut guard = KERNEL.borrow_mut();
        populate(&mut guard);
        guard.start()
    };

    // Safety: `sp` was just produced by `Kernel::start`, pointing at a
    // freshly seeded 16-word frame this function is about to consume as an
    // exception return. The `StaticCell` guard above has already gone out
    // of scope, so no borrow survives past this point.
    unsafe { enter_first_task(sp) }
}

/// Drops privilege, loads `sp` into PSP, and performs an exception return
/// into thread mode, unprivileged, using PSP — the same manufactured
/// `EXC_RETURN` every thread's seeded frame carries as its LR. Never
/// returns.
#[unsafe(naked)]
unsafe extern "C" fn enter_first_task(sp: u32) -> ! {
    core::arch::naked_asm!(
        "msr PSP, r0",
        "movs r0, #3", // CONTROL: SPSEL=1 (use PSP), nPRIV=1 (unprivileged)
        "msr CONTROL, r0",
        "isb",
        "ldr r0, ={exc_return}",
        "bx r0",
        exc_return = const 0xFFFF_FFFDu32,
    )
}

/// SVCall handler. Reads the stacked PC off PSP, decodes the SVC
/// immediate from the byte before it, dispatches through
/// [`syscall::dispatch`], writes the return value back into the stacked
/// R0, and pends PendSV if the dispatch asked for a reschedule.
///
/// Matches `examples/original_source/rtos-project/kernel.c`'s `svCallIsr`:
/// the call number comes from the instruction encoding, not a register, so
/// user-side syscall stubs need only place their arguments in r0-r2 before
/// executing `svc #n`.
#[unsafe(no_mangle)]
extern "C" fn SVCall() {
    // Safety: called only from the SVCall exception, with PSP pointing at
    // the automatically-stacked frame of the thread that issued the `svc`.
    unsafe {
        let psp: u32;
        asm!("mrs {0}, PSP", out(reg) psp);
        let frame = &mut *(psp as *mut ExceptionFrame);
        let pc = frame.pc;
        let svc_byte = *((pc - 2) as *const u8);
        let call = match abi::Syscall::try_from(svc_byte) {
            Ok(c) => c,
            Err(_) => return,
        };

        // A fresh `ArmM` for the `Memory` argument: `dispatch` needs the
        // kernel mutably borrowed and a `Memory` impl at the same time,
        // and `ArmM` carries no per-instance state that matters to either
        // trait's MMIO-free methods (`Memory::read`/`write` touch only the
        // raw address given), so any instance is interchangeable — same
        // pattern the host-side unit tests use with a second `Sim`.
        let mem = ArmM::new();
        let mut guard = KERNEL.borrow_mut();
        let result = syscall::dispatch(&mut guard, &mem, call, frame.r0, frame.r1, frame.r2);
        frame.r0 = result.ret;
        if result.reschedule {
            guard.cpu.pend_context_switch();
        }
    }
}

/// PendSV handler. Saves the outgoing thread's callee-saved registers,
/// calls [`Kernel::context_switch`] to pick the next thread and apply its
/// SRD mask, then restores the incoming thread's callee-saved registers
/// from the stack pointer `context_switch` returned.
///
/// The save/restore shape follows the reference firmware's `pendSvIsr` and
/// the teacher kernel's PendSV assembly: r4-r11 are not automatically
/// stacked by exception entry, so this handler stacks them manually around
/// the call into Rust.
#[unsafe(naked)]
unsafe extern "C" fn PendSV() {
    core::arch::naked_asm!(
        "mrs r0, PSP",
        "stmdb r0!, {{r4-r11}}",
        "bl {switch}",
        "ldmia r0!, {{r4-r11}}",
        "msr PSP, r0",
        "bx lr",
        switch = sym pendsv_switch,
    )
}

/// # Safety
/// Called only from [`PendSV`]'s naked asm, with `outgoing_sp` pointing
/// just below the outgoing thread's saved r4-r11 block.
#[unsafe(no_mangle)]
unsafe extern "C" fn pendsv_switch(outgoing_sp: u32) -> u32 {
    // Safety: PendSV runs at the same priority as SVCall and SysTick, so
    // they never nest; this is the only borrow live at this instant.
    let mut guard = unsafe { KERNEL.borrow_mut() };
    guard.context_switch(outgoing_sp)
}

/// SysTick handler. Advances the software tick counter, calls
/// [`Kernel::tick`] to decrement every delayed thread's countdown, and
/// pends PendSV when preemption is enabled.
#[unsafe(no_mangle)]
extern "C" fn SysTick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
    let mut guard = KERNEL.borrow_mut();
    if guard.tick() {
        guard.cpu.pend_context_switch();
    }
}

/// Reads the configurable fault status bits into a [`FaultCause`] and an
/// optional fault address, mirroring the reference firmware's
/// `printFaultDebug`.
fn read_cfsr() -> (FaultCause, Option<u32>, Option<u32>) {
    // Safety: CFSR/MMFAR/BFAR are fixed, always-readable MMIO registers.
    let cfsr = unsafe { CFSR.read_volatile() };
    let mut cause = FaultCause::empty();

    if cfsr & CFSR_DIVBYZERO != 0 {
        cause |= FaultCause::DIV_BY_ZERO;
    }
    if cfsr & CFSR_UNALIGNED != 0 {
        cause |= FaultCause::UNALIGNED_ACCESS;
    }
    if cfsr & CFSR_NOCP != 0 {
        cause |= FaultCause::NO_COPROCESSOR;
    }
    if cfsr & CFSR_INVPC != 0 {
        cause |= FaultCause::INVALID_PC;
    }
    if cfsr & CFSR_INVSTATE != 0 {
        cause |= FaultCause::INVALID_STATE;
    }
    if cfsr & CFSR_UNDEFINSTR != 0 {
        cause |= FaultCause::UNDEFINED_INSTRUCTION;
    }
    if cfsr & CFSR_STKERR != 0 {
        cause |= FaultCause::BUS_FAULT_ON_STACKING;
    }
    if cfsr & CFSR_UNSTKERR != 0 {
        cause |= FaultCause::BUS_FAULT_ON_RETURN;
    }
    if cfsr & CFSR_IMPRECISERR != 0 {
        cause |= FaultCause::IMPRECISE_BUS_ERROR;
    }
    if cfsr & CFSR_PRECISERR != 0 {
        cause |= FaultCause::PRECISE_BUS_ERROR;
    }
    if cfsr & CFSR_IBUSERR != 0 {
        cause |= FaultCause::INSTRUCTION_BUS_ERROR;
    }
    if cfsr & CFSR_MSTKERR != 0 {
        cause |= FaultCause::MEM_FAULT_ON_STACKING;
    }
    if cfsr & CFSR_MUNSTKERR != 0 {
        cause |= FaultCause::MEM_FAULT_ON_RETURN;
    }
    if cfsr & CFSR_DACCVIOL != 0 {
        cause |= FaultCause::DATA_ACCESS_VIOLATION;
    }
    if cfsr & CFSR_IACCVIOL != 0 {
        cause |= FaultCause::INSTRUCTION_ACCESS_VIOLATION;
    }

    let mem_addr = if cfsr & CFSR_MMARVALID != 0 {
        cause |= FaultCause::MEM_FAULT_ADDRESS_VALID;
        // Safety: MMFAR is valid per the flag just checked.
        Some(unsafe { MMFAR.read_volatile() })
    } else {
        None
    };
    let bus_addr = if cfsr & CFSR_BFARVALID != 0 {
        cause |= FaultCause::BUS_FAULT_ADDRESS_VALID;
        // Safety: BFAR is valid per the flag just checked.
        Some(unsafe { BFAR.read_volatile() })
    } else {
        None
    };

    (cause, mem_addr, bus_addr)
}

/// Common handler for MemManage, BusFault, and UsageFault: builds a
/// fault report, decides the policy, and either kills the faulting thread
/// and requests a reschedule, or halts.
fn configurable_fault(source: FaultSource) {
    // Safety: PSP/MSP reads are always valid; the frame dereference below
    // is sound because this kernel never takes these faults from handler
    // mode (handler-mode code touches only its own stack and the
    // always-granted flash/peripheral regions).
    let psp: u32 = unsafe {
        let v: u32;
        asm!("mrs {0}, PSP", out(reg) v);
        v
    };
    let msp: u32 = unsafe {
        let v: u32;
        asm!("mrs {0}, MSP", out(reg) v);
        v
    };
    // Safety: frame was stacked by hardware at exception entry.
    let frame = unsafe { *(psp as *const ExceptionFrame) };
    let (cause, mem_addr, bus_addr) = read_cfsr();
    let faulting_address = mem_addr.or(bus_addr);
    // Safety: `frame.pc - 2` is within the flash region the MPU always
    // grants privileged handler-mode code, regardless of what the
    // faulting thread's own SRD mask permits.
    let faulting_instruction = unsafe { *(frame.pc.wrapping_sub(2) as *const u16) };

    let mut guard = KERNEL.borrow_mut();
    let pid = Some(guard.threads.get(guard.current).pid());
    let report = fault::build_report(
        source,
        cause,
        msp,
        psp,
        frame,
        faulting_instruction,
        faulting_address,
        pid,
    );

    // Safety: CFSR is write-one-to-clear for the fault status bits.
    unsafe { CFSR.write_volatile(CFSR.read_volatile()) };

    match fault::policy(report.source) {
        FaultAction::TerminateThread => {
            let current = guard.current as u32;
            if guard.kill_thread(current).unwrap_or(false) {
                guard.cpu.pend_context_switch();
            }
        }
        FaultAction::Halt => {
            drop(guard);
            crate::fail::die(fault_source_name(source));
        }
    }
}

fn fault_source_name(source: FaultSource) -> &'static str {
    match source {
        FaultSource::MemManage => "MemManage",
        FaultSource::BusFault => "BusFault",
        FaultSource::UsageFault => "UsageFault",
        FaultSource::HardFault => "HardFault",
    }
}

#[unsafe(no_mangle)]
extern "C" fn MemoryManagement() {
    configurable_fault(FaultSource::MemManage);
}

#[unsafe(no_mangle)]
extern "C" fn BusFault() {
    configurable_fault(FaultSource::BusFault);
}

#[unsafe(no_mangle)]
extern "C" fn UsageFault() {
    configurable_fault(FaultSource::UsageFault);
}

/// HardFault indicates the kernel's own invariants broke (a fault taken
/// while already handling a fault, or a fault in handler mode) — nothing
/// below this kernel can contain it, so it always halts.
#[unsafe(no_mangle)]
extern "C" fn HardFault() {
    configurable_fault(FaultSource::HardFault);
    crate::fail::die("HardFault");
}
