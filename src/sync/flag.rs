//! Flag operations: an auto-clearing binary semaphore (`give`/`take`)
//! overlaid with a level surface (`set`/`clr`/`val`/`watch`) on the same
//! wait queue.

use portable_atomic::Ordering;

use crate::config::FLAG_MAX;
use crate::error::{KernelError, KernelResult};
use crate::kernel::{Kernel, SvcAction};
use crate::sync::{check_handle, SyncPool, FLAG_BASE};
use crate::thread::ThreadId;

impl Kernel {
    fn flag_check(&self, f: u32) -> KernelResult<usize> {
        check_handle(f, FLAG_BASE, FLAG_MAX, &self.pool.flag_alloc)
    }

    pub fn flag_alloc(&self) -> KernelResult<u32> {
        let idx = SyncPool::alloc_slot(&self.pool.flag_alloc, FLAG_MAX)?;
        self.pool.flag[idx].val.store(false, Ordering::Release);
        Ok((FLAG_BASE + idx) as u32)
    }

    pub fn flag_free(&self, f: u32) -> KernelResult<()> {
        let idx = self.flag_check(f)?;
        let obj = &self.pool.flag[idx];
        if !obj.wq.is_empty() {
            return Err(KernelError::Permission);
        }
        obj.val.store(false, Ordering::Release);
        self.pool.flag_alloc.clear(idx);
        Ok(())
    }

    /// Consume the flag or block until given.
    pub fn flag_take(&self, f: u32, self_id: ThreadId) -> KernelResult<SvcAction> {
        let idx = self.flag_check(f)?;
        let obj = &self.pool.flag[idx];
        if obj
            .val
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return Ok(SvcAction::Ret(0));
        }
        self.wq_wait(&obj.wq, f, self_id, 0);
        Ok(SvcAction::Block)
    }

    pub fn flag_timedtake(&self, f: u32, self_id: ThreadId, ms: u32) -> KernelResult<SvcAction> {
        let idx = self.flag_check(f)?;
        let obj = &self.pool.flag[idx];
        if obj
            .val
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return Ok(SvcAction::Ret(0));
        }
        self.wq_wait_timed(&obj.wq, f, self_id, ms);
        Ok(SvcAction::Block)
    }

    /// Hand the flag to one waiter, or latch it when nobody waits.
    pub fn flag_give(&self, f: u32) -> KernelResult<SvcAction> {
        let idx = self.flag_check(f)?;
        let obj = &self.pool.flag[idx];
        if self.wq_wake_one(&obj.wq, 0).is_none() {
            obj.val.store(true, Ordering::Release);
        }
        Ok(SvcAction::Ret(0))
    }

    /// Latch the flag and release every waiter. The flag stays set.
    pub fn flag_set(&self, f: u32) -> KernelResult<SvcAction> {
        let idx = self.flag_check(f)?;
        let obj = &self.pool.flag[idx];
        obj.val.store(true, Ordering::Release);
        self.wq_wake_all(&obj.wq, 0);
        Ok(SvcAction::Ret(0))
    }

    pub fn flag_clr(&self, f: u32) -> KernelResult<SvcAction> {
        let idx = self.flag_check(f)?;
        self.pool.flag[idx].val.store(false, Ordering::Release);
        Ok(SvcAction::Ret(0))
    }

    pub fn flag_val(&self, f: u32) -> KernelResult<SvcAction> {
        let idx = self.flag_check(f)?;
        Ok(SvcAction::Ret(
            self.pool.flag[idx].val.load(Ordering::Acquire) as i32,
        ))
    }

    /// Level wait: returns immediately while the flag is set, without
    /// consuming it.
    pub fn flag_watch(&self, f: u32, self_id: ThreadId) -> KernelResult<SvcAction> {
        let idx = self.flag_check(f)?;
        let obj = &self.pool.flag[idx];
        if obj.val.load(Ordering::Acquire) {
            return Ok(SvcAction::Ret(0));
        }
        self.wq_wait(&obj.wq, f, self_id, 0);
        Ok(SvcAction::Block)
    }

    pub fn flag_timedwatch(&self, f: u32, self_id: ThreadId, ms: u32) -> KernelResult<SvcAction> {
        let idx = self.flag_check(f)?;
        let obj = &self.pool.flag[idx];
        if obj.val.load(Ordering::Acquire) {
            return Ok(SvcAction::Ret(0));
        }
        self.wq_wait_timed(&obj.wq, f, self_id, ms);
        Ok(SvcAction::Block)
    }
}
