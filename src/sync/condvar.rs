//! Condition variable operations.
//!
//! The primitive does not police the lock protocol: the caller is expected
//! to hold the associated mutex when waiting, and the userspace wrapper
//! re-acquires it after the wait returns. `wait` does verify ownership
//! before it releases, so a stray call cannot unlock somebody else's
//! mutex.

use portable_atomic::Ordering;

use crate::config::{COND_MAX, MUTEX_MAX};
use crate::error::{KernelError, KernelResult};
use crate::kernel::{Kernel, SvcAction};
use crate::sync::{check_handle, SyncPool, COND_BASE, MUTEX_BASE};
use crate::thread::ThreadId;

impl Kernel {
    fn cond_check(&self, c: u32) -> KernelResult<usize> {
        check_handle(c, COND_BASE, COND_MAX, &self.pool.cond_alloc)
    }

    pub fn cond_alloc(&self) -> KernelResult<u32> {
        let idx = SyncPool::alloc_slot(&self.pool.cond_alloc, COND_MAX)?;
        Ok((COND_BASE + idx) as u32)
    }

    pub fn cond_free(&self, c: u32) -> KernelResult<()> {
        let idx = self.cond_check(c)?;
        if !self.pool.cond[idx].wq.is_empty() {
            return Err(KernelError::Permission);
        }
        self.pool.cond_alloc.clear(idx);
        Ok(())
    }

    fn cond_wait_prepare(&self, c: u32, m: u32, self_id: ThreadId) -> KernelResult<usize> {
        let cidx = self.cond_check(c)?;
        let midx = check_handle(m, MUTEX_BASE, MUTEX_MAX, &self.pool.mutex_alloc)?;
        if self.mutex_owner(m)? != Some(self_id) {
            return Err(KernelError::Permission);
        }
        self.pool.cond[cidx].mutex.store(m, Ordering::Release);
        // hand the mutex over before going to sleep
        self.mutex_unlock_wakeup(midx);
        Ok(cidx)
    }

    pub fn cond_wait(&self, c: u32, m: u32, self_id: ThreadId) -> KernelResult<SvcAction> {
        let cidx = self.cond_wait_prepare(c, m, self_id)?;
        self.wq_wait(&self.pool.cond[cidx].wq, c, self_id, 0);
        Ok(SvcAction::Block)
    }

    pub fn cond_timedwait(
        &self,
        c: u32,
        m: u32,
        self_id: ThreadId,
        ms: u32,
    ) -> KernelResult<SvcAction> {
        let cidx = self.cond_wait_prepare(c, m, self_id)?;
        self.wq_wait_timed(&self.pool.cond[cidx].wq, c, self_id, ms);
        Ok(SvcAction::Block)
    }

    /// Mutex last associated with this condvar, for host tooling.
    pub fn cond_mutex(&self, c: u32) -> KernelResult<Option<u32>> {
        let idx = self.cond_check(c)?;
        match self.pool.cond[idx].mutex.load(Ordering::Acquire) {
            u32::MAX => Ok(None),
            m => Ok(Some(m)),
        }
    }

    pub fn cond_signal(&self, c: u32) -> KernelResult<SvcAction> {
        let idx = self.cond_check(c)?;
        self.wq_wake_one(&self.pool.cond[idx].wq, 0);
        Ok(SvcAction::Ret(0))
    }

    pub fn cond_broadcast(&self, c: u32) -> KernelResult<SvcAction> {
        let idx = self.cond_check(c)?;
        self.wq_wake_all(&self.pool.cond[idx].wq, 0);
        Ok(SvcAction::Ret(0))
    }
}
