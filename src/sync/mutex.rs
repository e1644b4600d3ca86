//! Mutex operations.
//!
//! Ownership transfers on unlock: when waiters are queued, the earliest
//! one becomes the owner before it is woken, so there is never a window
//! where a third thread can steal the lock from a woken waiter.

use portable_atomic::Ordering;

use crate::config::MUTEX_MAX;
use crate::error::{KernelError, KernelResult};
use crate::kernel::{Kernel, SvcAction};
use crate::sync::{check_handle, SyncPool, MUTEX_BASE, NO_OWNER};
use crate::thread::ThreadId;

impl Kernel {
    fn mutex_check(&self, m: u32) -> KernelResult<usize> {
        check_handle(m, MUTEX_BASE, MUTEX_MAX, &self.pool.mutex_alloc)
    }

    pub fn mutex_alloc(&self) -> KernelResult<u32> {
        let idx = SyncPool::alloc_slot(&self.pool.mutex_alloc, MUTEX_MAX)?;
        self.pool.mutex[idx].owner.store(NO_OWNER, Ordering::Release);
        Ok((MUTEX_BASE + idx) as u32)
    }

    pub fn mutex_free(&self, m: u32) -> KernelResult<()> {
        let idx = self.mutex_check(m)?;
        let obj = &self.pool.mutex[idx];
        if !obj.wq.is_empty() {
            return Err(KernelError::Permission);
        }
        obj.owner.store(NO_OWNER, Ordering::Release);
        self.pool.mutex_alloc.clear(idx);
        Ok(())
    }

    pub fn mutex_owner(&self, m: u32) -> KernelResult<Option<ThreadId>> {
        let idx = self.mutex_check(m)?;
        match self.pool.mutex[idx].owner.load(Ordering::Acquire) {
            NO_OWNER => Ok(None),
            t => Ok(Some(t)),
        }
    }

    pub fn mutex_lock(&self, m: u32, self_id: ThreadId) -> KernelResult<SvcAction> {
        let idx = self.mutex_check(m)?;
        let obj = &self.pool.mutex[idx];

        if obj
            .owner
            .compare_exchange(NO_OWNER, self_id, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return Ok(SvcAction::Ret(0));
        }
        if obj.owner.load(Ordering::Acquire) == self_id {
            // lock by current owner: report, leave the thread runnable
            log::warn!("thread {} deadlock on mutex {}", self_id, m);
            return Err(KernelError::Deadlock);
        }
        self.wq_wait(&obj.wq, m, self_id, 0);
        Ok(SvcAction::Block)
    }

    pub fn mutex_trylock(&self, m: u32, self_id: ThreadId) -> KernelResult<SvcAction> {
        let idx = self.mutex_check(m)?;
        let obj = &self.pool.mutex[idx];

        if obj
            .owner
            .compare_exchange(NO_OWNER, self_id, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return Ok(SvcAction::Ret(0));
        }
        if obj.owner.load(Ordering::Acquire) == self_id {
            return Err(KernelError::Deadlock);
        }
        Err(KernelError::Again)
    }

    pub fn mutex_timedlock(&self, m: u32, self_id: ThreadId, ms: u32) -> KernelResult<SvcAction> {
        let idx = self.mutex_check(m)?;
        let obj = &self.pool.mutex[idx];

        if obj
            .owner
            .compare_exchange(NO_OWNER, self_id, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return Ok(SvcAction::Ret(0));
        }
        if obj.owner.load(Ordering::Acquire) == self_id {
            return Err(KernelError::Deadlock);
        }
        self.wq_wait_timed(&obj.wq, m, self_id, ms);
        Ok(SvcAction::Block)
    }

    pub fn mutex_unlock(&self, m: u32, self_id: ThreadId) -> KernelResult<SvcAction> {
        let idx = self.mutex_check(m)?;
        let obj = &self.pool.mutex[idx];

        if obj.owner.load(Ordering::Acquire) != self_id {
            log::warn!("thread {} unlock of mutex {} it does not own", self_id, m);
            return Err(KernelError::Permission);
        }
        self.mutex_unlock_wakeup(idx);
        Ok(SvcAction::Ret(0))
    }

    /// Release the lock, handing it to the earliest waiter if any.
    /// Shared with the condvar wait path.
    pub(crate) fn mutex_unlock_wakeup(&self, idx: usize) {
        let obj = &self.pool.mutex[idx];
        match self.wq_wake_one(&obj.wq, 0) {
            Some(next) => obj.owner.store(next, Ordering::Release),
            None => obj.owner.store(NO_OWNER, Ordering::Release),
        }
    }
}
