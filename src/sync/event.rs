//! Event-set operations.
//!
//! An event set is a bitmask of 32 independent events with a pending map
//! and an enable mask. Masked-out events stay pending but never satisfy a
//! wait; unmasking replays them. Wait-for-any consumes and returns the
//! lowest eligible event; wait-for-all consumes the whole requested mask
//! at once.

use portable_atomic::Ordering;

use crate::bitmap::bits;
use crate::config::EVENT_MAX;
use crate::error::{KernelError, KernelResult};
use crate::kernel::{Kernel, SvcAction};
use crate::sync::{check_handle, EventObj, SyncPool, EVENT_BASE};
use crate::thread::ThreadId;

impl Kernel {
    fn ev_check(&self, e: u32) -> KernelResult<usize> {
        check_handle(e, EVENT_BASE, EVENT_MAX, &self.pool.event_alloc)
    }

    pub fn ev_alloc(&self) -> KernelResult<u32> {
        let idx = SyncPool::alloc_slot(&self.pool.event_alloc, EVENT_MAX)?;
        let obj = &self.pool.event[idx];
        obj.pend.take();
        obj.mask.store(u32::MAX, Ordering::Release);
        Ok((EVENT_BASE + idx) as u32)
    }

    pub fn ev_free(&self, e: u32) -> KernelResult<()> {
        let idx = self.ev_check(e)?;
        let obj = &self.pool.event[idx];
        if !obj.wq.is_empty() {
            return Err(KernelError::Permission);
        }
        self.pool.event_alloc.clear(idx);
        Ok(())
    }

    /// Consume and return the lowest pending unmasked event, or block.
    pub fn ev_wait(&self, e: u32, self_id: ThreadId) -> KernelResult<SvcAction> {
        let idx = self.ev_check(e)?;
        let obj = &self.pool.event[idx];
        self.lock();
        if let Some(ev) = Self::ev_consume_any(obj) {
            self.unlock();
            return Ok(SvcAction::Ret(ev as i32));
        }
        if let Some(tcb) = self.tcb_mut(self_id) {
            tcb.wait_mask = 0;
        }
        self.wq_wait(&obj.wq, e, self_id, 0);
        self.unlock();
        Ok(SvcAction::Block)
    }

    pub fn ev_timedwait(&self, e: u32, self_id: ThreadId, ms: u32) -> KernelResult<SvcAction> {
        let idx = self.ev_check(e)?;
        let obj = &self.pool.event[idx];
        self.lock();
        if let Some(ev) = Self::ev_consume_any(obj) {
            self.unlock();
            return Ok(SvcAction::Ret(ev as i32));
        }
        if let Some(tcb) = self.tcb_mut(self_id) {
            tcb.wait_mask = 0;
        }
        self.wq_wait_timed(&obj.wq, e, self_id, ms);
        self.unlock();
        Ok(SvcAction::Block)
    }

    /// Block until every event in `want` is pending and unmasked, then
    /// consume them all in one step.
    pub fn ev_wait_all(&self, e: u32, want: u32, self_id: ThreadId) -> KernelResult<SvcAction> {
        let idx = self.ev_check(e)?;
        #[cfg(feature = "arg-check")]
        if want == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let obj = &self.pool.event[idx];
        self.lock();
        if Self::ev_consume_all(obj, want) {
            self.unlock();
            return Ok(SvcAction::Ret(0));
        }
        if let Some(tcb) = self.tcb_mut(self_id) {
            tcb.wait_mask = want;
        }
        self.wq_wait(&obj.wq, e, self_id, 0);
        self.unlock();
        Ok(SvcAction::Block)
    }

    /// Raise one event and service the queue.
    pub fn ev_raise(&self, e: u32, ev: u32) -> KernelResult<SvcAction> {
        let idx = self.ev_check(e)?;
        #[cfg(feature = "arg-check")]
        if ev > 31 {
            return Err(KernelError::InvalidArgument);
        }
        let obj = &self.pool.event[idx];
        self.lock();
        obj.pend.set(ev as usize);
        self.ev_service(obj);
        self.unlock();
        Ok(SvcAction::Ret(0))
    }

    /// Enable or disable one event. Unmasking replays pending events to
    /// the queue.
    pub fn ev_mask(&self, e: u32, ev: u32, enable: u32) -> KernelResult<SvcAction> {
        let idx = self.ev_check(e)?;
        #[cfg(feature = "arg-check")]
        if ev > 31 {
            return Err(KernelError::InvalidArgument);
        }
        let obj = &self.pool.event[idx];
        self.lock();
        let bit = 1u32 << ev;
        if enable != 0 {
            obj.mask.fetch_or(bit, Ordering::AcqRel);
            self.ev_service(obj);
        } else {
            obj.mask.fetch_and(!bit, Ordering::AcqRel);
        }
        self.unlock();
        Ok(SvcAction::Ret(0))
    }

    pub fn ev_clear(&self, e: u32, ev: u32) -> KernelResult<SvcAction> {
        let idx = self.ev_check(e)?;
        #[cfg(feature = "arg-check")]
        if ev > 31 {
            return Err(KernelError::InvalidArgument);
        }
        self.pool.event[idx].pend.clear(ev as usize);
        Ok(SvcAction::Ret(0))
    }

    pub fn ev_pending(&self, e: u32) -> KernelResult<u32> {
        let idx = self.ev_check(e)?;
        Ok(self.pool.event[idx].pend.load())
    }

    fn ev_consume_any(obj: &EventObj) -> Option<usize> {
        loop {
            let avail = obj.pend.load() & obj.mask.load(Ordering::Acquire);
            if avail == 0 {
                return None;
            }
            let ev = avail.trailing_zeros() as usize;
            if obj.pend.clear(ev) {
                return Some(ev);
            }
        }
    }

    fn ev_consume_all(obj: &EventObj, want: u32) -> bool {
        let avail = obj.pend.load() & obj.mask.load(Ordering::Acquire);
        if avail & want != want {
            return false;
        }
        for ev in bits(want) {
            obj.pend.clear(ev);
        }
        true
    }

    /// Deliver eligible events to waiters in FIFO order until no waiter
    /// can be satisfied.
    fn ev_service(&self, obj: &EventObj) {
        loop {
            let Some(t) = self.wq_head(&obj.wq) else { return };
            let want = self.tcb(t).map(|tcb| tcb.wait_mask).unwrap_or(0);
            if want == 0 {
                let Some(ev) = Self::ev_consume_any(obj) else { return };
                if obj.wq.remove(t) {
                    self.finish_wait(t, ev as i32);
                } else {
                    // lost the thread to expiry or cancel, put the event back
                    obj.pend.set(ev);
                }
            } else {
                if !Self::ev_consume_all(obj, want) {
                    return;
                }
                if obj.wq.remove(t) {
                    self.finish_wait(t, 0);
                    if let Some(tcb) = self.tcb_mut(t) {
                        tcb.wait_mask = 0;
                    }
                } else {
                    for ev in bits(want) {
                        obj.pend.set(ev);
                    }
                }
            }
        }
    }
}
