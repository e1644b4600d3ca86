//! Counting semaphore operations.
//!
//! The count never goes negative: a waiter that cannot decrement blocks,
//! and a post that finds waiters hands its credit straight to one of them
//! without touching the count.

use portable_atomic::Ordering;

use crate::config::SEM_MAX;
use crate::error::{KernelError, KernelResult};
use crate::kernel::{Kernel, SvcAction};
use crate::sync::{check_handle, SyncPool, SEM_BASE};
use crate::thread::ThreadId;

impl Kernel {
    fn sem_check(&self, s: u32) -> KernelResult<usize> {
        check_handle(s, SEM_BASE, SEM_MAX, &self.pool.sem_alloc)
    }

    pub fn sem_alloc(&self, value: u32) -> KernelResult<u32> {
        let idx = SyncPool::alloc_slot(&self.pool.sem_alloc, SEM_MAX)?;
        self.pool.sem[idx].count.store(value, Ordering::Release);
        Ok((SEM_BASE + idx) as u32)
    }

    pub fn sem_free(&self, s: u32) -> KernelResult<()> {
        let idx = self.sem_check(s)?;
        let obj = &self.pool.sem[idx];
        if !obj.wq.is_empty() {
            return Err(KernelError::Permission);
        }
        obj.count.store(0, Ordering::Release);
        self.pool.sem_alloc.clear(idx);
        Ok(())
    }

    pub fn sem_init(&self, s: u32, value: u32) -> KernelResult<SvcAction> {
        let idx = self.sem_check(s)?;
        self.pool.sem[idx].count.store(value, Ordering::Release);
        Ok(SvcAction::Ret(0))
    }

    pub fn sem_value(&self, s: u32) -> KernelResult<u32> {
        let idx = self.sem_check(s)?;
        Ok(self.pool.sem[idx].count.load(Ordering::Acquire))
    }

    /// Decrement-or-block.
    fn sem_take(&self, idx: usize) -> bool {
        let count = &self.pool.sem[idx].count;
        let mut cur = count.load(Ordering::Acquire);
        loop {
            if cur == 0 {
                return false;
            }
            match count.compare_exchange_weak(cur, cur - 1, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    pub fn sem_wait(&self, s: u32, self_id: ThreadId) -> KernelResult<SvcAction> {
        let idx = self.sem_check(s)?;
        if self.sem_take(idx) {
            return Ok(SvcAction::Ret(0));
        }
        self.wq_wait(&self.pool.sem[idx].wq, s, self_id, 0);
        Ok(SvcAction::Block)
    }

    pub fn sem_trywait(&self, s: u32, self_id: ThreadId) -> KernelResult<SvcAction> {
        let idx = self.sem_check(s)?;
        let _ = self_id;
        if self.sem_take(idx) {
            Ok(SvcAction::Ret(0))
        } else {
            Err(KernelError::Again)
        }
    }

    pub fn sem_timedwait(&self, s: u32, self_id: ThreadId, ms: u32) -> KernelResult<SvcAction> {
        let idx = self.sem_check(s)?;
        if self.sem_take(idx) {
            return Ok(SvcAction::Ret(0));
        }
        self.wq_wait_timed(&self.pool.sem[idx].wq, s, self_id, ms);
        Ok(SvcAction::Block)
    }

    /// Wake exactly one waiter, or bank the credit when nobody waits.
    pub fn sem_post(&self, s: u32) -> KernelResult<SvcAction> {
        let idx = self.sem_check(s)?;
        let obj = &self.pool.sem[idx];
        if self.wq_wake_one(&obj.wq, 0).is_none() {
            obj.count.fetch_add(1, Ordering::AcqRel);
        }
        Ok(SvcAction::Ret(0))
    }
}
