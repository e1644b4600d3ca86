//! Atomic bitmap primitives.
//!
//! Every shared bitmap in the kernel (ready set, wait queues, monitor
//! events and masks, pool allocation maps) goes through these helpers.
//! Each mutation is a single atomic read-modify-write retry loop, standing
//! in for the LDREX/STREX sequences used on the target. Fairness of
//! `wake_one` and the one-pass guarantee of `wake_all` depend on this
//! contract, so callers must not substitute plain load/store pairs.

use portable_atomic::{AtomicU32, Ordering};

pub struct Bitmap(AtomicU32);

impl Bitmap {
    pub const fn new() -> Self {
        Bitmap(AtomicU32::new(0))
    }

    pub fn load(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    pub fn get(&self, idx: usize) -> bool {
        self.load() & (1 << idx) != 0
    }

    /// Set bit `idx`. Returns true if the bit was previously clear.
    pub fn set(&self, idx: usize) -> bool {
        let mask = 1u32 << idx;
        let mut cur = self.0.load(Ordering::Acquire);
        loop {
            if cur & mask != 0 {
                return false;
            }
            match self.0.compare_exchange_weak(
                cur,
                cur | mask,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Clear bit `idx`. Returns true if the bit was previously set.
    pub fn clear(&self, idx: usize) -> bool {
        let mask = 1u32 << idx;
        let mut cur = self.0.load(Ordering::Acquire);
        loop {
            if cur & mask == 0 {
                return false;
            }
            match self.0.compare_exchange_weak(
                cur,
                cur & !mask,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Take the whole bitmap in one atomic pass, leaving it empty.
    ///
    /// Bits set after this call are not part of the returned snapshot.
    pub fn take(&self) -> u32 {
        self.0.swap(0, Ordering::AcqRel)
    }

    /// Lowest set bit index, the CLZ(RBIT) scan of the ready bitmap.
    pub fn lowest(&self) -> Option<usize> {
        let v = self.load();
        if v == 0 {
            None
        } else {
            Some(v.trailing_zeros() as usize)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.load() == 0
    }
}

impl Default for Bitmap {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterate the set bits of a snapshot, lowest first.
pub fn bits(mut word: u32) -> impl Iterator<Item = usize> {
    core::iter::from_fn(move || {
        if word == 0 {
            None
        } else {
            let idx = word.trailing_zeros() as usize;
            word &= word - 1;
            Some(idx)
        }
    })
}
