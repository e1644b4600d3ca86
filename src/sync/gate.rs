//! Gate operations.
//!
//! A gate is a level-triggered doorway with room for one thread inside.
//! Two state bits: SIGNALED (the gate is open) and LOCKED (a thread is
//! inside). Opening an occupied gate leaves the signal latched so the
//! next `exit` readmits exactly one waiter.

use portable_atomic::Ordering;

use crate::config::GATE_MAX;
use crate::error::{KernelError, KernelResult};
use crate::kernel::{Kernel, SvcAction};
use crate::sync::{check_handle, SyncPool, GATE_BASE, GATE_LOCKED, GATE_SIGNALED};
use crate::thread::ThreadId;

impl Kernel {
    fn gate_check(&self, g: u32) -> KernelResult<usize> {
        check_handle(g, GATE_BASE, GATE_MAX, &self.pool.gate_alloc)
    }

    pub fn gate_alloc(&self) -> KernelResult<u32> {
        let idx = SyncPool::alloc_slot(&self.pool.gate_alloc, GATE_MAX)?;
        self.pool.gate[idx].state.store(0, Ordering::Release);
        Ok((GATE_BASE + idx) as u32)
    }

    pub fn gate_free(&self, g: u32) -> KernelResult<()> {
        let idx = self.gate_check(g)?;
        let obj = &self.pool.gate[idx];
        if !obj.wq.is_empty() {
            return Err(KernelError::Permission);
        }
        obj.state.store(0, Ordering::Release);
        self.pool.gate_alloc.clear(idx);
        Ok(())
    }

    /// Pass through an open gate, locking it behind; block while it is
    /// closed or occupied.
    pub fn gate_wait(&self, g: u32, self_id: ThreadId) -> KernelResult<SvcAction> {
        let idx = self.gate_check(g)?;
        let obj = &self.pool.gate[idx];
        self.lock();
        let s = obj.state.load(Ordering::Acquire);
        if s == GATE_SIGNALED {
            obj.state.store(GATE_LOCKED, Ordering::Release);
            self.unlock();
            return Ok(SvcAction::Ret(0));
        }
        self.wq_wait(&obj.wq, g, self_id, 0);
        self.unlock();
        Ok(SvcAction::Block)
    }

    pub fn gate_timedwait(&self, g: u32, self_id: ThreadId, ms: u32) -> KernelResult<SvcAction> {
        let idx = self.gate_check(g)?;
        let obj = &self.pool.gate[idx];
        self.lock();
        let s = obj.state.load(Ordering::Acquire);
        if s == GATE_SIGNALED {
            obj.state.store(GATE_LOCKED, Ordering::Release);
            self.unlock();
            return Ok(SvcAction::Ret(0));
        }
        self.wq_wait_timed(&obj.wq, g, self_id, ms);
        self.unlock();
        Ok(SvcAction::Block)
    }

    /// Open the gate. With a thread inside, the signal latches; otherwise
    /// a waiter is admitted directly, or the gate stays open.
    pub fn gate_open(&self, g: u32) -> KernelResult<SvcAction> {
        let idx = self.gate_check(g)?;
        let obj = &self.pool.gate[idx];
        self.lock();
        let s = obj.state.load(Ordering::Acquire);
        if s & GATE_LOCKED != 0 {
            obj.state.store(GATE_LOCKED | GATE_SIGNALED, Ordering::Release);
        } else if self.wq_wake_one(&obj.wq, 0).is_some() {
            obj.state.store(GATE_LOCKED, Ordering::Release);
        } else {
            obj.state.store(GATE_SIGNALED, Ordering::Release);
        }
        self.unlock();
        Ok(SvcAction::Ret(0))
    }

    /// Withdraw the signal. A thread already inside is unaffected.
    pub fn gate_close(&self, g: u32) -> KernelResult<SvcAction> {
        let idx = self.gate_check(g)?;
        let obj = &self.pool.gate[idx];
        self.lock();
        let s = obj.state.load(Ordering::Acquire);
        obj.state.store(s & !GATE_SIGNALED, Ordering::Release);
        self.unlock();
        Ok(SvcAction::Ret(0))
    }

    /// Leave the gate. `open != 0` re-signals on the way out; a latched
    /// signal readmits exactly one waiter.
    pub fn gate_exit(&self, g: u32, open: u32, self_id: ThreadId) -> KernelResult<SvcAction> {
        let idx = self.gate_check(g)?;
        let obj = &self.pool.gate[idx];
        let _ = self_id;
        self.lock();
        let mut s = obj.state.load(Ordering::Acquire);
        if s & GATE_LOCKED == 0 {
            self.unlock();
            return Err(KernelError::Permission);
        }
        if open != 0 {
            s |= GATE_SIGNALED;
        }
        if s & GATE_SIGNALED != 0 {
            if self.wq_wake_one(&obj.wq, 0).is_some() {
                obj.state.store(GATE_LOCKED, Ordering::Release);
            } else {
                obj.state.store(GATE_SIGNALED, Ordering::Release);
            }
        } else {
            obj.state.store(0, Ordering::Release);
        }
        self.unlock();
        Ok(SvcAction::Ret(0))
    }
}
