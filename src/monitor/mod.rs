//! Debug monitor.
//!
//! The monitor is a privileged task with its own stack and context,
//! driven by a signal bitmap rather than the thread scheduler: raising a
//! signal sets a bit, and the monitor task consumes bits through
//! `select`/`expect`. There is exactly one monitor, so the machinery is a
//! specialized single-waiter cut of the wait-queue idea: no queue, just
//! the event and mask bitmaps mutated by the same atomic retry loops.
//!
//! `select` returning `None` (and `expect` returning `Again`) means the
//! monitor would block; the port's exception-return loop swaps back to
//! the interrupted context until a masked bit is raised. `Reset` and
//! `SoftReset` are permanently unmasked so a wedged monitor task can
//! always be restarted.

mod breakpoint;

pub use breakpoint::{Breakpoint, WatchAccess, Watchpoint};

use core::cell::UnsafeCell;

use portable_atomic::{AtomicI32, AtomicU8, AtomicUsize, Ordering};
use spin::Mutex as SpinMutex;

use breakpoint::{BreakpointPool, WatchpointPool};

use crate::bitmap::Bitmap;
use crate::config::KernelProfile;
use crate::context::CpuContext;
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::thread::{ThreadId, ThreadState};

/// Monitor signals. Bit positions index the event and mask bitmaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Signal {
    Reset = 0,
    SoftReset = 1,
    KernelFault = 2,
    ThreadFault = 3,
    ThreadBreak = 4,
    ThreadStep = 5,
    CommRcv = 6,
    CommCtl = 7,
    CommEot = 8,
    Idle = 9,
}

impl Signal {
    pub const fn bit(self) -> u32 {
        1 << self as u32
    }

    fn from_index(idx: usize) -> Option<Signal> {
        Some(match idx {
            0 => Signal::Reset,
            1 => Signal::SoftReset,
            2 => Signal::KernelFault,
            3 => Signal::ThreadFault,
            4 => Signal::ThreadBreak,
            5 => Signal::ThreadStep,
            6 => Signal::CommRcv,
            7 => Signal::CommCtl,
            8 => Signal::CommEot,
            9 => Signal::Idle,
            _ => return None,
        })
    }
}

/// A set of monitor signals, for `select` masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigSet(u32);

impl SigSet {
    pub const EMPTY: SigSet = SigSet(0);
    pub const ALL: SigSet = SigSet(u32::MAX);

    pub const fn of(sig: Signal) -> SigSet {
        SigSet(sig.bit())
    }

    pub const fn with(self, sig: Signal) -> SigSet {
        SigSet(self.0 | sig.bit())
    }

    pub const fn contains(self, sig: Signal) -> bool {
        self.0 & sig.bit() != 0
    }

    pub const fn bits(self) -> u32 {
        self.0
    }
}

/// Signals that can never be masked out.
const PERSISTENT: u32 = Signal::Reset.bit() | Signal::SoftReset.bit();

/// The canonical monitor lifecycle:
/// `Uninit --reset--> Bootstrap --run--> Running --reset--> Bootstrap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Uninit,
    Bootstrap,
    Running,
}

/// Host-link channel supplied by a driver (USB-CDC, UART). Only the
/// interface is specified here; `ctrl` carries driver-defined requests.
pub trait Comm: Sync {
    fn send(&self, buf: &[u8]) -> KernelResult<usize>;
    fn recv(&self, buf: &mut [u8]) -> KernelResult<usize>;
    fn ctrl(&self, op: u32) -> KernelResult<i32>;
    fn connected(&self) -> bool;
}

const NO_BREAK: usize = usize::MAX;

pub struct Monitor {
    events: Bitmap,
    mask: Bitmap,
    state: AtomicU8,
    /// Monitor execution context; the port swaps through this on entry.
    ctx: UnsafeCell<CpuContext>,
    stack_base: AtomicUsize,
    stack_size: AtomicUsize,
    /// Thread whose registers host tooling may inspect without racing
    /// the scheduler.
    break_id: AtomicUsize,
    errno: AtomicI32,
    comm: SpinMutex<Option<&'static dyn Comm>>,
    pub(crate) bp: SpinMutex<BreakpointPool>,
    pub(crate) wp: SpinMutex<WatchpointPool>,
    step_req: Bitmap,
}

impl Monitor {
    pub(crate) const fn new() -> Self {
        Monitor {
            events: Bitmap::new(),
            mask: Bitmap::new(),
            state: AtomicU8::new(0),
            ctx: UnsafeCell::new(CpuContext::new()),
            stack_base: AtomicUsize::new(0),
            stack_size: AtomicUsize::new(0),
            break_id: AtomicUsize::new(NO_BREAK),
            errno: AtomicI32::new(0),
            comm: SpinMutex::new(None),
            bp: SpinMutex::new(BreakpointPool::new()),
            wp: SpinMutex::new(WatchpointPool::new()),
            step_req: Bitmap::new(),
        }
    }

    pub fn state(&self) -> MonitorState {
        match self.state.load(Ordering::Acquire) {
            0 => MonitorState::Uninit,
            1 => MonitorState::Bootstrap,
            _ => MonitorState::Running,
        }
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.state() != MonitorState::Uninit
    }

    /// Raise a signal. Idempotent while pending: a fault recurring before
    /// the monitor consumes the bit does not duplicate it.
    pub fn signal(&self, sig: Signal) {
        self.events.set(sig as usize);
    }

    pub fn is_pending(&self, sig: Signal) -> bool {
        self.events.get(sig as usize)
    }

    /// Acknowledge a signal.
    pub fn clear(&self, sig: Signal) {
        self.events.clear(sig as usize);
    }

    pub fn unmask(&self, sig: Signal) {
        self.mask.set(sig as usize);
    }

    pub fn mask(&self, sig: Signal) {
        self.mask.clear(sig as usize);
    }

    fn eligible(&self, set: SigSet) -> u32 {
        self.events.load() & (self.mask.load() | PERSISTENT) & set.bits()
    }

    /// Lowest pending signal within `set` that the mask lets through.
    /// `None` means the monitor would block: the port swaps back to the
    /// interrupted context until a masked bit is raised.
    pub fn select(&self, set: SigSet) -> Option<Signal> {
        let pending = self.eligible(set);
        if pending == 0 {
            return None;
        }
        Signal::from_index(pending.trailing_zeros() as usize)
    }

    /// Wait for one specific signal. Any other masked signal arriving
    /// first is reported as `Interrupted` so the caller re-evaluates its
    /// wait; the unexpected signal stays pending.
    pub fn expect(&self, sig: Signal) -> KernelResult<Signal> {
        match self.select(SigSet::ALL) {
            None => Err(KernelError::Again),
            Some(got) if got == sig => Ok(got),
            Some(_) => Err(KernelError::Interrupted),
        }
    }

    /// Thread whose break is being serviced.
    pub fn break_id(&self) -> Option<ThreadId> {
        match self.break_id.load(Ordering::Acquire) {
            NO_BREAK => None,
            t => Some(t),
        }
    }

    pub(crate) fn set_break_id(&self, t: Option<ThreadId>) {
        self.break_id.store(t.unwrap_or(NO_BREAK), Ordering::Release);
    }

    pub fn errno(&self) -> i32 {
        self.errno.load(Ordering::Acquire)
    }

    pub fn set_errno(&self, err: i32) {
        self.errno.store(err, Ordering::Release);
    }

    /// Bind the monitor stack. The context is seeded when the port first
    /// enters the monitor exception.
    pub fn set_stack(&self, base: usize, size: usize) {
        self.stack_base.store(base, Ordering::Release);
        self.stack_size.store(size, Ordering::Release);
    }

    pub fn stack(&self) -> (usize, usize) {
        (
            self.stack_base.load(Ordering::Acquire),
            self.stack_size.load(Ordering::Acquire),
        )
    }

    pub fn ctx_ptr(&self) -> *mut CpuContext {
        self.ctx.get()
    }

    pub fn bind_comm(&self, comm: &'static dyn Comm) {
        *self.comm.lock() = Some(comm);
    }

    pub fn comm_connected(&self) -> bool {
        match *self.comm.lock() {
            Some(c) => c.connected(),
            None => false,
        }
    }

    pub fn comm_send(&self, buf: &[u8]) -> KernelResult<usize> {
        match *self.comm.lock() {
            Some(c) => c.send(buf),
            None => Err(KernelError::NoSys),
        }
    }

    pub fn comm_recv(&self, buf: &mut [u8]) -> KernelResult<usize> {
        match *self.comm.lock() {
            Some(c) => c.recv(buf),
            None => Err(KernelError::NoSys),
        }
    }

    pub fn comm_ctrl(&self, op: u32) -> KernelResult<i32> {
        match *self.comm.lock() {
            Some(c) => c.ctrl(op),
            None => Err(KernelError::NoSys),
        }
    }

    /// Profile descriptor for host tooling.
    pub fn profile(&self) -> KernelProfile {
        KernelProfile::current()
    }
}

impl Kernel {
    /// (Re-)enter the monitor bootstrap: clear comparators and transient
    /// signals, drop the fault record, rearm the persistent mask, raise
    /// `Reset`. From `Uninit` this is the attach transition.
    pub fn monitor_reset(&self) {
        let mon = &self.monitor;
        mon.bp.lock().clear_all();
        mon.wp.lock().clear_all();
        mon.step_req.take();
        mon.set_break_id(None);
        mon.set_errno(0);
        // transient events die with the old task; Reset survives
        mon.events.take();
        mon.mask.take();
        self.exception_clear();
        mon.state.store(1, Ordering::Release);
        mon.signal(Signal::Reset);
        log::info!("monitor reset");
    }

    /// Bootstrap finished; the monitor task is in its event loop.
    pub fn monitor_run(&self) {
        self.monitor.clear(Signal::Reset);
        self.monitor.state.store(2, Ordering::Release);
    }

    /// Attach a host-link driver and start the monitor.
    pub fn monitor_attach(&self, comm: &'static dyn Comm) {
        self.monitor.bind_comm(comm);
        self.monitor_reset();
    }

    /// Resume the system after a break: every paused, non-faulty thread
    /// goes back to its previous disposition.
    pub fn monitor_continue(&self) {
        self.monitor.set_break_id(None);
        self.resume_all();
    }

    // ------------------------------------------------------------------
    // Breakpoints, watchpoints, stepping
    // ------------------------------------------------------------------

    pub fn breakpoint_set(&self, addr: u32, size: u32) -> KernelResult<()> {
        self.monitor.bp.lock().set(addr, size)
    }

    pub fn breakpoint_clear(&self, addr: u32) -> KernelResult<()> {
        self.monitor.bp.lock().clear(addr)
    }

    pub fn breakpoint_clear_all(&self) {
        self.monitor.bp.lock().clear_all();
    }

    pub fn breakpoint_slots(&self) -> [Option<Breakpoint>; crate::config::BP_MAX] {
        self.monitor.bp.lock().slots()
    }

    pub fn watchpoint_set(&self, addr: u32, size: u32, access: WatchAccess) -> KernelResult<()> {
        self.monitor.wp.lock().set(addr, size, access)
    }

    pub fn watchpoint_clear(&self, addr: u32) -> KernelResult<()> {
        self.monitor.wp.lock().clear(addr)
    }

    pub fn watchpoint_slots(&self) -> [Option<Watchpoint>; crate::config::WP_MAX] {
        self.monitor.wp.lock().slots()
    }

    /// Software breakpoint trap handler. Advances the thread's resume
    /// address past the trap instruction, freezes the system, records the
    /// break thread and signals the monitor.
    pub fn on_breakpoint(&self, t: ThreadId, insn_size: u32) {
        self.pause_all();
        if let Some(tcb) = self.tcb_mut(t) {
            tcb.ctx.pc = tcb.ctx.pc.wrapping_add(insn_size as usize);
        }
        self.monitor.set_break_id(Some(t));
        self.monitor.signal(Signal::ThreadBreak);
        log::debug!("thread {} breakpoint", t);
    }

    /// Arm a hardware single-step for one thread and let it run.
    pub fn step_request(&self, t: ThreadId) -> KernelResult<()> {
        if !self.thread_exists(t) {
            return Err(KernelError::BadHandle);
        }
        if self.thread_state(t) == Some(ThreadState::Faulty) {
            return Err(KernelError::Permission);
        }
        self.monitor.step_req.set(t);
        self.thread_resume(t)?;
        Ok(())
    }

    pub fn step_pending(&self, t: ThreadId) -> bool {
        self.monitor.step_req.get(t)
    }

    /// Step trap handler: the stepped instruction retired. Re-suspend the
    /// thread and report.
    pub fn on_step_done(&self, t: ThreadId) {
        if !self.monitor.step_req.clear(t) {
            return;
        }
        self.thread_pause(t).ok();
        self.monitor.set_break_id(Some(t));
        self.monitor.signal(Signal::ThreadStep);
        log::debug!("thread {} step complete", t);
    }
}
