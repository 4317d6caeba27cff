// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fault handling and diagnostic pipeline (C10).
//!
//! The three hardware fault exceptions (MemManage, BusFault, UsageFault)
//! and HardFault all funnel through [`build_report`], which is pure: it
//! takes the raw bits the real fault handler reads out of the fault status
//! and address registers plus the stacked exception frame, and produces a
//! [`FaultReport`] with no side effects. [`policy`] then decides what the
//! kernel does about it — this split keeps the decision ("terminate the
//! thread" vs. "halt the system") testable without a real fault frame.

use abi::{ExceptionFrame, FaultCause, FaultReport, FaultSource, Pid};

use ringbuf::{ringbuf, ringbuf_entry};

/// What the kernel should do in response to a fault, decided by
/// [`policy`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultAction {
    /// Terminate the faulting thread and continue scheduling the rest of
    /// the system. Chosen for MemManage faults (see `DESIGN.md` Open
    /// Question 1: later reference iterations lean toward
    /// terminate-and-continue, and this rewrite commits to it rather than
    /// halt-and-dump).
    TerminateThread,
    /// Print the diagnostic and halt. Chosen for BusFault, UsageFault, and
    /// HardFault: these indicate a kernel- or hardware-level problem that
    /// memory isolation cannot contain by killing a single thread.
    Halt,
}

/// Decides the fault policy for a given source. A pure function of the
/// fault source alone — see the module doc for why MemManage is the only
/// terminate-and-continue case.
pub fn policy(source: FaultSource) -> FaultAction {
    match source {
        FaultSource::MemManage => FaultAction::TerminateThread,
        FaultSource::BusFault | FaultSource::UsageFault | FaultSource::HardFault => {
            FaultAction::Halt
        }
    }
}

ringbuf!(Trace, 8, Trace::None);

/// Ring-buffer payload. `FaultReport` itself isn't `Copy` in a way that's
/// convenient to store directly (it embeds an `Option`), so the ring buffer
/// keeps a flattened summary: source, cause bits, and the faulting PC. Full
/// detail is reconstructed from the live `FaultReport` at the point of
/// handling; the ring buffer exists for post-mortem inspection after a halt
/// (via Humility-style external tooling), not as the report's primary
/// storage.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trace {
    None,
    Fault {
        source: FaultSource,
        cause: FaultCause,
        pc: u32,
    },
}

/// Builds a [`FaultReport`] from the raw inputs the real fault handler
/// reads off the hardware: the stacked exception frame, the fault status
/// bits (already decoded into [`FaultCause`] by the caller), the optional
/// fault address (present only when the matching address-valid bit is
/// set), the current MSP/PSP, and the PID of the thread that was running,
/// if known.
///
/// The faulting instruction halfword is read from `frame.pc - 2` by the
/// caller (this requires dereferencing flash, which `fault.rs` itself does
/// not do, to keep this function free of raw pointer access) and passed in
/// directly.
pub fn build_report(
    source: FaultSource,
    cause: FaultCause,
    msp: u32,
    psp: u32,
    frame: ExceptionFrame,
    faulting_instruction: u16,
    faulting_address: Option<u32>,
    pid: Option<Pid>,
) -> FaultReport {
    let report = FaultReport {
        source,
        cause,
        msp,
        psp,
        frame,
        faulting_instruction,
        faulting_address,
        pid,
    };
    ringbuf_entry!(Trace::Fault {
        source,
        cause,
        pc: frame.pc,
    });
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> ExceptionFrame {
        ExceptionFrame {
            r0: 0,
            r1: 0,
            r2: 0,
            r3: 0,
            r12: 0,
            lr: 0xFFFF_FFFD,
            pc: 0x8042,
            xpsr: 0x0100_0000,
        }
    }

    #[test]
    fn mem_manage_terminates_not_halts() {
        assert_eq!(policy(FaultSource::MemManage), FaultAction::TerminateThread);
    }

    #[test]
    fn bus_usage_hard_faults_halt() {
        assert_eq!(policy(FaultSource::BusFault), FaultAction::Halt);
        assert_eq!(policy(FaultSource::UsageFault), FaultAction::Halt);
        assert_eq!(policy(FaultSource::HardFault), FaultAction::Halt);
    }

    #[test]
    fn report_carries_every_field() {
        let report = build_report(
            FaultSource::MemManage,
            FaultCause::DATA_ACCESS_VIOLATION | FaultCause::MEM_FAULT_ADDRESS_VALID,
            0x2000_7F00,
            0x2000_1000,
            frame(),
            0xDF06, // an SVC encoding, used here only as a stand-in instruction
            Some(0x2000_0800),
            Some(Pid(0x1000)),
        );
        assert_eq!(report.source, FaultSource::MemManage);
        assert!(report.cause.contains(FaultCause::DATA_ACCESS_VIOLATION));
        assert_eq!(report.faulting_address, Some(0x2000_0800));
        assert_eq!(report.pid, Some(Pid(0x1000)));
        assert_eq!(report.frame.pc, 0x8042);
    }

    #[test]
    fn faulting_address_is_none_when_invalid() {
        let report = build_report(
            FaultSource::BusFault,
            FaultCause::IMPRECISE_BUS_ERROR,
            0x2000_7F00,
            0x2000_1000,
            frame(),
            0,
            None,
            None,
        );
        assert_eq!(report.faulting_address, None);
    }
}
