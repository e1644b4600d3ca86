//! Exception and fault capture.
//!
//! Capture is independent of the scheduler: whatever state the fault
//! found, the record is populated once, every thread is frozen, and only
//! then is a recovery decision made (monitor signal, halt, or reset).
//! A fault inside the capture path itself only bumps the unroll counter;
//! past the bound the kernel makes the observable transition to `Halt`
//! instead of spinning through the fault forever.

use bitflags::bitflags;

use crate::config::EXCEPT_UNROLL_MAX;
use crate::kernel::{FaultPolicy, Kernel};
use crate::monitor::Signal;
use crate::thread::{ThreadId, ThreadState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Hard,
    Bus,
    Usage,
    MemManage,
}

bitflags! {
    /// Fault status bits, laid out like the combined CFSR: mem-manage in
    /// the low byte, bus faults in the second, usage faults on top.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaultStatus: u32 {
        const IACCVIOL    = 1 << 0;
        const DACCVIOL    = 1 << 1;
        const MUNSTKERR   = 1 << 3;
        const MSTKERR     = 1 << 4;

        const IBUSERR     = 1 << 8;
        const PRECISERR   = 1 << 9;
        const IMPRECISERR = 1 << 10;
        const UNSTKERR    = 1 << 11;
        const STKERR      = 1 << 12;

        const UNDEFINSTR  = 1 << 16;
        const INVSTATE    = 1 << 17;
        const INVPC       = 1 << 18;
        const NOCP        = 1 << 19;
        const STKOF       = 1 << 20;
        const UNALIGNED   = 1 << 24;
        const DIVBYZERO   = 1 << 25;
    }
}

/// r0-r12, sp, lr, pc, xpsr.
pub type RegsSnapshot = [u32; 17];

pub const REG_SP: usize = 13;
pub const REG_PC: usize = 15;

/// The single shared fault record. Populated once per fault, cleared by
/// monitor reset.
#[derive(Debug, Clone, Copy)]
pub struct ExceptionRecord {
    pub regs: RegsSnapshot,
    pub kind: FaultKind,
    pub status: FaultStatus,
    /// Faulting thread, `None` when the fault hit interrupt context.
    pub thread: Option<ThreadId>,
    /// Re-entry counter.
    pub unroll: u32,
    pub active: bool,
}

impl ExceptionRecord {
    pub(crate) const fn new() -> Self {
        ExceptionRecord {
            regs: [0; 17],
            kind: FaultKind::Hard,
            status: FaultStatus::empty(),
            thread: None,
            unroll: 0,
            active: false,
        }
    }
}

impl Kernel {
    /// Fault entry point, one per fault class on the vector side.
    ///
    /// Pauses every thread before any recovery decision. The record is
    /// populated exactly once; a recurring fault before the monitor
    /// consumes it only bumps the unroll counter, so the monitor sees a
    /// single fault signal, never a duplicate.
    pub fn fault_capture(
        &self,
        kind: FaultKind,
        status: FaultStatus,
        thread: Option<ThreadId>,
        regs: RegsSnapshot,
    ) {
        if self.state() == crate::kernel::KernelState::Halt {
            return;
        }

        {
            let mut rec = self.except.lock();
            if rec.active {
                rec.unroll += 1;
                log::warn!("re-entrant fault, unroll {}", rec.unroll);
                if rec.unroll > EXCEPT_UNROLL_MAX {
                    drop(rec);
                    self.halt();
                }
                return;
            }
            rec.regs = regs;
            rec.kind = kind;
            rec.status = status;
            rec.thread = thread;
            rec.unroll = 0;
            rec.active = true;
        }

        log::error!("fault {:?} status {:?} thread {:?}", kind, status, thread);
        self.pause_all();

        if let Some(t) = thread {
            if let Some(tcb) = self.tcb_mut(t) {
                tcb.state = ThreadState::Faulty;
                tcb.ctx.sp = regs[REG_SP] as usize;
                tcb.ctx.pc = regs[REG_PC] as usize;
            }
            self.wq_ready.clear(t);
        }

        if self.monitor.is_attached() {
            let sig = match thread {
                Some(_) => Signal::ThreadFault,
                None => Signal::KernelFault,
            };
            self.monitor.signal(sig);
        } else {
            match self.fault_policy() {
                FaultPolicy::Halt => self.halt(),
                FaultPolicy::Reset => self.request_reset(),
            }
        }
    }

    /// Copy of the shared fault record.
    pub fn exception_record(&self) -> ExceptionRecord {
        *self.except.lock()
    }

    /// Monitor-reset hook: drop the record and rearm capture.
    pub(crate) fn exception_clear(&self) {
        let mut rec = self.except.lock();
        rec.active = false;
        rec.unroll = 0;
    }
}
