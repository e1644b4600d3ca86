//! Kernel core: thread table, ready set, scheduling and thread lifecycle.
//!
//! The `Kernel` struct owns every piece of scheduler state. Boot code
//! constructs one instance and threads it through the syscall and
//! exception entry points; there are no hidden statics, so unit tests can
//! build as many independent kernels as they need.
//!
//! The ready set is a bitmap shared between thread-mode and interrupt-mode
//! code; all edits go through the atomic retry loops in `bitmap`. The
//! scheduler picks the lowest-id ready thread (ids double as priority
//! order, lowest wins) and falls back to the idle context when the bitmap
//! is empty. Wake paths never reschedule directly: they set the deferred
//! flag and the next `reschedule()` at exception exit collapses any number
//! of wakes into a single pick.

use core::cell::UnsafeCell;

use portable_atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use spin::Mutex as SpinMutex;

use crate::bitmap::{bits, Bitmap};
use crate::config::{IDLE_ID, THREAD_MAX};
use crate::config::KernelProfile;
use crate::context::CpuContext;
use crate::error::{KernelError, KernelResult};
use crate::except::ExceptionRecord;
use crate::monitor::Monitor;
use crate::sync::{SyncPool, JOIN_BASE};
use crate::thread::{Tcb, ThreadId, ThreadState};
use crate::wq::WaitQueue;

/// Kernel lifecycle state. `Halt` is terminal: the kernel reaches it
/// through the fail-stop paths and never leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelState {
    Init,
    Running,
    Halt,
    Reset,
}

impl KernelState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => KernelState::Init,
            1 => KernelState::Running,
            2 => KernelState::Halt,
            _ => KernelState::Reset,
        }
    }
}

/// Recovery policy for faults captured with no monitor attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPolicy {
    Halt,
    Reset,
}

/// Outcome of a kernel operation invoked from the syscall layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SvcAction {
    /// Completed synchronously; the value goes into the return slot.
    Ret(i32),
    /// The caller was blocked; its wakeup path delivers the return value
    /// through the TCB return slot.
    Block,
}

pub struct Kernel {
    threads: [UnsafeCell<Option<Tcb>>; THREAD_MAX],
    thread_alloc: Bitmap,
    /// Runnable threads. The active thread keeps its bit while running.
    pub(crate) wq_ready: Bitmap,
    wq_paused: Bitmap,
    /// Threads with an armed tick deadline.
    wq_clock: Bitmap,
    active: AtomicUsize,
    ticks: AtomicU32,
    defer: AtomicBool,
    /// Global FIFO stamp source for wait-queue insertion order.
    wq_seq: AtomicU32,
    state: AtomicU8,
    fault_policy: AtomicU8,
    sched_lock: AtomicBool,
    idle_ctx: UnsafeCell<CpuContext>,
    pub(crate) pool: SyncPool,
    pub(crate) except: SpinMutex<ExceptionRecord>,
    pub(crate) monitor: Monitor,
}

unsafe impl Sync for Kernel {}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    pub const fn new() -> Self {
        const SLOT: UnsafeCell<Option<Tcb>> = UnsafeCell::new(None);
        Kernel {
            threads: [SLOT; THREAD_MAX],
            thread_alloc: Bitmap::new(),
            wq_ready: Bitmap::new(),
            wq_paused: Bitmap::new(),
            wq_clock: Bitmap::new(),
            active: AtomicUsize::new(IDLE_ID),
            ticks: AtomicU32::new(0),
            defer: AtomicBool::new(false),
            wq_seq: AtomicU32::new(0),
            state: AtomicU8::new(0),
            fault_policy: AtomicU8::new(0),
            sched_lock: AtomicBool::new(false),
            idle_ctx: UnsafeCell::new(CpuContext::new()),
            pool: SyncPool::new(),
            except: SpinMutex::new(ExceptionRecord::new()),
            monitor: Monitor::new(),
        }
    }

    /// Leave `Init`. Must run before the first syscall is dispatched.
    pub fn start(&self) {
        let _ = self.state.compare_exchange(
            0,
            KernelState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.active.store(IDLE_ID, Ordering::Release);
    }

    pub fn state(&self) -> KernelState {
        KernelState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Terminal fail-stop transition. Observable, never re-entered.
    pub(crate) fn halt(&self) {
        self.state.store(KernelState::Halt as u8, Ordering::Release);
        log::error!("kernel halt");
    }

    pub(crate) fn request_reset(&self) {
        self.state.store(KernelState::Reset as u8, Ordering::Release);
        log::warn!("kernel reset requested");
    }

    pub fn set_fault_policy(&self, policy: FaultPolicy) {
        self.fault_policy.store(policy as u8, Ordering::Release);
    }

    pub fn fault_policy(&self) -> FaultPolicy {
        match self.fault_policy.load(Ordering::Acquire) {
            0 => FaultPolicy::Halt,
            _ => FaultPolicy::Reset,
        }
    }

    pub fn profile(&self) -> KernelProfile {
        KernelProfile::current()
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub(crate) fn lock(&self) {
        let mut backoff = 1;
        while self
            .sched_lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            for _ in 0..backoff {
                core::hint::spin_loop();
            }
            backoff = (backoff * 2).min(1024);
        }
    }

    pub(crate) fn unlock(&self) {
        self.sched_lock.store(false, Ordering::Release);
    }

    pub(crate) fn tcb(&self, t: ThreadId) -> Option<&Tcb> {
        if t >= THREAD_MAX {
            return None;
        }
        unsafe { (*self.threads[t].get()).as_ref() }
    }

    #[allow(clippy::mut_from_ref)]
    pub(crate) fn tcb_mut(&self, t: ThreadId) -> Option<&mut Tcb> {
        if t >= THREAD_MAX {
            return None;
        }
        unsafe { (*self.threads[t].get()).as_mut() }
    }

    pub fn thread_exists(&self, t: ThreadId) -> bool {
        t < THREAD_MAX && self.thread_alloc.get(t)
    }

    pub fn thread_state(&self, t: ThreadId) -> Option<ThreadState> {
        self.tcb(t).map(|tcb| tcb.state)
    }

    pub fn thread_context(&self, t: ThreadId) -> Option<CpuContext> {
        self.tcb(t).map(|tcb| tcb.ctx)
    }

    /// Return value last delivered to this thread's blocked syscall.
    pub fn thread_svc_ret(&self, t: ThreadId) -> Option<i32> {
        self.tcb(t).map(|tcb| tcb.svc_ret)
    }

    pub fn thread_count(&self) -> usize {
        self.thread_alloc.load().count_ones() as usize
    }

    pub fn active(&self) -> ThreadId {
        self.active.load(Ordering::Acquire)
    }

    pub fn thread_self(&self) -> ThreadId {
        self.active()
    }

    pub fn ticks(&self) -> u32 {
        self.ticks.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Thread lifecycle
    // ------------------------------------------------------------------

    pub fn thread_create(
        &self,
        stack: &'static mut [u8],
        entry: fn(),
        priority: u8,
    ) -> KernelResult<ThreadId> {
        #[cfg(feature = "arg-check")]
        if stack.len() < 256 {
            return Err(KernelError::InvalidArgument);
        }

        let mut slot = None;
        for i in 0..THREAD_MAX {
            if self.thread_alloc.set(i) {
                slot = Some(i);
                break;
            }
        }
        let id = slot.ok_or(KernelError::NoMemory)?;

        let tcb = Tcb::new(id, stack, entry, priority);
        self.lock();
        unsafe {
            *self.threads[id].get() = Some(tcb);
        }
        self.unlock();

        self.wq_ready.set(id);
        self.sched_defer();
        log::debug!("thread {} created, priority {}", id, priority);
        Ok(id)
    }

    /// Release a slot. Bits in every scheduler bitmap are cleared first so
    /// a stale id can never be picked.
    fn reap(&self, t: ThreadId) {
        self.wq_ready.clear(t);
        self.wq_paused.clear(t);
        self.wq_clock.clear(t);
        self.lock();
        unsafe {
            *self.threads[t].get() = None;
        }
        self.unlock();
        self.thread_alloc.clear(t);
    }

    /// Voluntary exit. Joiners are woken with the exit code; if any were
    /// waiting the slot is released immediately, otherwise it stays
    /// `Finished` until someone joins it.
    pub fn thread_exit(&self, self_id: ThreadId, code: i32) -> SvcAction {
        if let Some(tcb) = self.tcb_mut(self_id) {
            tcb.exit_code = code;
            tcb.state = ThreadState::Finished;
            let joined = {
                let q = &tcb.join_wq as *const WaitQueue;
                // join_wq lives in this TCB; waking joiners only touches
                // other slots.
                self.wq_wake_all(unsafe { &*q }, code)
            };
            self.wq_ready.clear(self_id);
            if joined != 0 {
                self.reap(self_id);
            }
        }
        self.sched_defer();
        SvcAction::Block
    }

    /// Forced termination of any thread, including a faulty one. This is
    /// the external-decision path: the kernel itself never reuses it to
    /// quietly restart a fault victim.
    pub fn thread_terminate(&self, target: ThreadId, code: i32) -> KernelResult<SvcAction> {
        if !self.thread_exists(target) {
            return Err(KernelError::BadHandle);
        }
        if let Some(tcb) = self.tcb_mut(target) {
            if let Some(h) = tcb.wait_on.take() {
                if let Some(q) = self.wq_by_handle(h) {
                    q.remove(target);
                }
            }
            self.wq_clock.clear(target);
            tcb.deadline = None;
        }
        Ok(self.thread_exit(target, code))
    }

    pub fn join(&self, target: ThreadId, self_id: ThreadId) -> KernelResult<SvcAction> {
        if !self.thread_exists(target) {
            return Err(KernelError::BadHandle);
        }
        if target == self_id {
            return Err(KernelError::Deadlock);
        }
        let tcb = self.tcb(target).ok_or(KernelError::BadHandle)?;
        if tcb.state == ThreadState::Finished {
            let code = tcb.exit_code;
            self.reap(target);
            return Ok(SvcAction::Ret(code));
        }
        let q = &tcb.join_wq as *const WaitQueue;
        self.wq_wait(unsafe { &*q }, (JOIN_BASE + target) as u32, self_id, 0);
        Ok(SvcAction::Block)
    }

    /// Force-resume a blocked thread, marking its syscall outcome
    /// cancelled. A ready thread just gets the cancelled mark.
    pub fn cancel(&self, target: ThreadId) -> KernelResult<()> {
        if !self.thread_exists(target) {
            return Err(KernelError::BadHandle);
        }
        let Some(tcb) = self.tcb_mut(target) else {
            return Err(KernelError::BadHandle);
        };
        tcb.cancelled = true;
        match tcb.state {
            ThreadState::Blocked | ThreadState::Paused => {
                if let Some(h) = tcb.wait_on.take() {
                    if let Some(q) = self.wq_by_handle(h) {
                        q.remove(target);
                    }
                }
                self.wq_clock.clear(target);
                tcb.deadline = None;
                tcb.svc_ret = KernelError::Interrupted.code();
                self.wq_paused.clear(target);
                tcb.state = ThreadState::Ready;
                self.wq_ready.set(target);
                self.sched_defer();
            }
            _ => {}
        }
        Ok(())
    }

    pub fn thread_pause(&self, target: ThreadId) -> KernelResult<()> {
        if !self.thread_exists(target) {
            return Err(KernelError::BadHandle);
        }
        self.pause_one(target);
        self.sched_defer();
        Ok(())
    }

    fn pause_one(&self, t: ThreadId) {
        self.wq_paused.set(t);
        self.wq_ready.clear(t);
        if let Some(tcb) = self.tcb_mut(t) {
            if tcb.is_runnable() {
                tcb.state = ThreadState::Paused;
            }
        }
    }

    /// Undo a pause. Refuses faulty threads: only the monitor/host path
    /// (`thread_terminate`, monitor restart) may act on those.
    pub fn thread_resume(&self, target: ThreadId) -> KernelResult<()> {
        if !self.thread_exists(target) {
            return Err(KernelError::BadHandle);
        }
        let Some(tcb) = self.tcb_mut(target) else {
            return Err(KernelError::BadHandle);
        };
        if tcb.state == ThreadState::Faulty {
            return Err(KernelError::Permission);
        }
        self.wq_paused.clear(target);
        if tcb.state == ThreadState::Paused {
            if tcb.wait_on.is_none() {
                tcb.state = ThreadState::Ready;
                self.wq_ready.set(target);
                self.sched_defer();
            } else {
                tcb.state = ThreadState::Blocked;
            }
        }
        Ok(())
    }

    /// Suspend every thread. Fault capture and the monitor use this to
    /// freeze the system before any recovery decision.
    pub(crate) fn pause_all(&self) {
        for t in bits(self.thread_alloc.load()) {
            self.pause_one(t);
        }
    }

    pub(crate) fn resume_all(&self) {
        for t in bits(self.thread_alloc.load()) {
            if self.thread_state(t) == Some(ThreadState::Faulty) {
                continue;
            }
            let _ = self.thread_resume(t);
        }
        self.sched_defer();
    }

    // ------------------------------------------------------------------
    // Scheduler
    // ------------------------------------------------------------------

    /// O(1) removal from the ready set.
    pub fn suspend(&self, t: ThreadId) {
        self.wq_ready.clear(t);
        if let Some(tcb) = self.tcb_mut(t) {
            if tcb.is_runnable() {
                tcb.state = ThreadState::Blocked;
            }
        }
    }

    /// O(1) insertion into the ready set (paused and faulty threads stay
    /// out; their own resume paths reinstate them).
    pub fn resume(&self, t: ThreadId) {
        self.make_ready(t);
    }

    pub(crate) fn make_ready(&self, t: ThreadId) {
        if self.wq_paused.get(t) {
            if let Some(tcb) = self.tcb_mut(t) {
                if tcb.state == ThreadState::Blocked {
                    tcb.state = ThreadState::Paused;
                }
            }
            return;
        }
        if let Some(tcb) = self.tcb_mut(t) {
            match tcb.state {
                ThreadState::Faulty | ThreadState::Finished => return,
                _ => {
                    tcb.state = ThreadState::Ready;
                    self.wq_ready.set(t);
                    self.sched_defer();
                }
            }
        }
    }

    /// Request a reschedule at the next exception exit. Multiple wake
    /// events before that point coalesce into a single pick.
    pub fn sched_defer(&self) {
        self.defer.store(true, Ordering::Release);
    }

    pub fn reschedule_pending(&self) -> bool {
        self.defer.load(Ordering::Acquire)
    }

    /// Pick the next thread: lowest-id ready wins (ids encode priority
    /// order; equal-priority ties therefore resolve by id). Falls back to
    /// the idle context when nothing is ready.
    pub fn schedule(&self) -> ThreadId {
        let next = self.wq_ready.lowest().unwrap_or(IDLE_ID);
        if next == IDLE_ID && self.monitor.is_attached() {
            // idle time is when the monitor does its background work
            self.monitor.signal(crate::monitor::Signal::Idle);
        }
        let prev = self.active.swap(next, Ordering::AcqRel);
        if prev != next {
            if let Some(tcb) = self.tcb_mut(prev) {
                if tcb.state == ThreadState::Running {
                    tcb.state = ThreadState::Ready;
                }
            }
            if let Some(tcb) = self.tcb_mut(next) {
                tcb.state = ThreadState::Running;
            }
        } else if let Some(tcb) = self.tcb_mut(next) {
            tcb.state = ThreadState::Running;
        }
        next
    }

    /// Trigger a reschedule from thread mode.
    pub fn sched_yield(&self) {
        self.sched_defer();
    }

    fn ctx_ptr(&self, t: ThreadId) -> *mut CpuContext {
        match self.tcb_mut(t) {
            Some(tcb) => &mut tcb.ctx as *mut CpuContext,
            None => self.idle_ctx.get(),
        }
    }

    /// Exception-exit hook: consume the deferred flag, pick, swap.
    ///
    /// # Safety
    /// Performs a physical context switch; must be called from a context
    /// where switching is legal (never from an ISR body on the host
    /// harness). Logic-level tests use `schedule()` instead.
    pub unsafe fn reschedule(&self) {
        if !self.defer.swap(false, Ordering::AcqRel) {
            return;
        }
        let prev = self.active();

        #[cfg(feature = "stack-limit")]
        self.stack_check(prev);

        let next = self.schedule();
        if next == prev {
            return;
        }
        let save = self.ctx_ptr(prev);
        let restore = self.ctx_ptr(next) as *const CpuContext;
        unsafe { crate::context::swap(save, restore) };
    }

    /// Guard-word and stack-pointer range check for the outgoing thread.
    #[cfg(feature = "stack-limit")]
    fn stack_check(&self, t: ThreadId) {
        use crate::except::{FaultKind, FaultStatus};
        let Some(tcb) = self.tcb(t) else { return };
        if tcb.stack_overflowed() || tcb.sp_out_of_bounds() {
            log::error!("thread {} stack limit violation", t);
            self.fault_capture(FaultKind::Usage, FaultStatus::STKOF, Some(t), [0; 17]);
        }
    }

    // ------------------------------------------------------------------
    // Clock
    // ------------------------------------------------------------------

    pub fn clock(&self) -> u32 {
        self.ticks()
    }

    /// Relative sleep; a zero delay is just a yield.
    pub fn sleep(&self, self_id: ThreadId, ms: u32) -> KernelResult<SvcAction> {
        if ms == 0 {
            self.sched_defer();
            return Ok(SvcAction::Ret(0));
        }
        self.alarm(self_id, self.ticks().wrapping_add(ms))
    }

    /// Absolute-deadline sleep.
    pub fn alarm(&self, self_id: ThreadId, deadline: u32) -> KernelResult<SvcAction> {
        let Some(tcb) = self.tcb_mut(self_id) else {
            return Err(KernelError::BadHandle);
        };
        tcb.svc_ret = 0;
        tcb.state = ThreadState::Blocked;
        tcb.wait_on = None;
        tcb.deadline = Some(deadline);
        self.wq_clock.set(self_id);
        self.wq_ready.clear(self_id);
        self.sched_defer();
        Ok(SvcAction::Block)
    }

    /// SysTick hook. Advances the tick counter and force-wakes expired
    /// timed waits; this wake path is independent of `wake_one`/`wake_all`
    /// and of cancellation. The blocked syscall keeps the default return
    /// value it armed at block time (timeout code or zero for sleeps).
    pub fn on_tick(&self) {
        let now = self.ticks.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        for t in bits(self.wq_clock.load()) {
            let due = match self.tcb(t).and_then(|tcb| tcb.deadline) {
                Some(d) => (now.wrapping_sub(d) as i32) >= 0,
                None => true,
            };
            if !due {
                continue;
            }
            if !self.wq_clock.clear(t) {
                continue; // another wake path got here first
            }
            if let Some(tcb) = self.tcb_mut(t) {
                tcb.deadline = None;
                if let Some(h) = tcb.wait_on.take() {
                    if let Some(q) = self.wq_by_handle(h) {
                        q.remove(t);
                    }
                }
            }
            self.make_ready(t);
        }
        self.sched_defer();
    }

    // ------------------------------------------------------------------
    // Wait-queue plumbing
    // ------------------------------------------------------------------

    pub(crate) fn wq_by_handle(&self, h: u32) -> Option<&WaitQueue> {
        if let Some(q) = self.pool.wq(h) {
            return Some(q);
        }
        let idx = h as usize;
        if (JOIN_BASE..JOIN_BASE + THREAD_MAX).contains(&idx) {
            return self.tcb(idx - JOIN_BASE).map(|tcb| &tcb.join_wq);
        }
        None
    }

    /// Move `t` from the ready set into `q`, arming the default return
    /// value delivered if the wait expires or is cancelled.
    pub(crate) fn wq_wait(&self, q: &WaitQueue, handle: u32, t: ThreadId, default_ret: i32) {
        if let Some(tcb) = self.tcb_mut(t) {
            tcb.wq_stamp = self.wq_seq.fetch_add(1, Ordering::AcqRel);
            tcb.wait_on = Some(handle);
            tcb.svc_ret = default_ret;
            tcb.state = ThreadState::Blocked;
        }
        q.insert(t);
        self.wq_ready.clear(t);
        self.sched_defer();
    }

    /// Timed variant: also arms an absolute deadline for the tick handler.
    pub(crate) fn wq_wait_timed(&self, q: &WaitQueue, handle: u32, t: ThreadId, ms: u32) {
        self.wq_wait(q, handle, t, KernelError::TimedOut.code());
        if let Some(tcb) = self.tcb_mut(t) {
            tcb.deadline = Some(self.ticks().wrapping_add(ms.max(1)));
        }
        self.wq_clock.set(t);
    }

    /// Earliest-stamped member of `q`.
    pub(crate) fn wq_head(&self, q: &WaitQueue) -> Option<ThreadId> {
        let mut best: Option<(u32, ThreadId)> = None;
        for t in bits(q.snapshot()) {
            let Some(tcb) = self.tcb(t) else { continue };
            let stamp = tcb.wq_stamp;
            best = match best {
                None => Some((stamp, t)),
                Some((bs, bt)) => {
                    if (stamp.wrapping_sub(bs) as i32) < 0 {
                        Some((stamp, t))
                    } else {
                        Some((bs, bt))
                    }
                }
            };
        }
        best.map(|(_, t)| t)
    }

    pub(crate) fn finish_wait(&self, t: ThreadId, ret: i32) {
        self.wq_clock.clear(t);
        if let Some(tcb) = self.tcb_mut(t) {
            tcb.wait_on = None;
            tcb.deadline = None;
            tcb.svc_ret = ret;
        }
        self.make_ready(t);
    }

    /// Wake the earliest-queued thread, delivering `ret`.
    pub(crate) fn wq_wake_one(&self, q: &WaitQueue, ret: i32) -> Option<ThreadId> {
        loop {
            let t = self.wq_head(q)?;
            if !q.remove(t) {
                continue; // raced with expiry or cancel, rescan
            }
            self.finish_wait(t, ret);
            return Some(t);
        }
    }

    /// Wake every thread queued at call time in one atomic pass. Returns
    /// the drained membership bitmap.
    pub(crate) fn wq_wake_all(&self, q: &WaitQueue, ret: i32) -> u32 {
        let snap = q.take_all();
        for t in bits(snap) {
            self.finish_wait(t, ret);
        }
        snap
    }
}
