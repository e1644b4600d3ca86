//! Host-side periodic tick driver.
//!
//! On a target the SysTick exception drives `Kernel::on_tick`; on a Linux
//! host the same cadence comes from an interval timer delivering SIGALRM.
//! The signal handler needs a process-global kernel pointer, which is
//! host glue, not kernel state: the kernel itself stays free of hidden
//! statics.

#[cfg(target_os = "linux")]
mod imp {
    use portable_atomic::{AtomicPtr, Ordering};

    use crate::kernel::Kernel;

    static TICK_KERNEL: AtomicPtr<Kernel> = AtomicPtr::new(core::ptr::null_mut());

    pub struct TickDriver {
        enabled: bool,
    }

    impl Default for TickDriver {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TickDriver {
        pub const fn new() -> Self {
            TickDriver { enabled: false }
        }

        /// # Safety
        /// Installs a process-wide SIGALRM handler and interval timer.
        /// Only one instance may drive ticks at a time, and `kernel` must
        /// outlive the driver.
        pub unsafe fn enable(&mut self, kernel: &'static Kernel, interval_us: u64) {
            TICK_KERNEL.store(kernel as *const Kernel as *mut Kernel, Ordering::Release);

            unsafe {
                libc::signal(libc::SIGALRM, tick_handler as extern "C" fn(i32) as usize);
            }

            let timer = libc::itimerval {
                it_interval: libc::timeval {
                    tv_sec: (interval_us / 1_000_000) as _,
                    tv_usec: (interval_us % 1_000_000) as _,
                },
                it_value: libc::timeval {
                    tv_sec: (interval_us / 1_000_000) as _,
                    tv_usec: (interval_us % 1_000_000) as _,
                },
            };
            unsafe {
                libc::setitimer(libc::ITIMER_REAL, &timer, core::ptr::null_mut());
            }
            self.enabled = true;
        }

        /// # Safety
        /// Tears down the process-wide interval timer; no other code may
        /// rely on ITIMER_REAL afterwards.
        pub unsafe fn disable(&mut self) {
            if !self.enabled {
                return;
            }
            let timer = libc::itimerval {
                it_interval: libc::timeval {
                    tv_sec: 0,
                    tv_usec: 0,
                },
                it_value: libc::timeval {
                    tv_sec: 0,
                    tv_usec: 0,
                },
            };
            unsafe {
                libc::setitimer(libc::ITIMER_REAL, &timer, core::ptr::null_mut());
            }
            TICK_KERNEL.store(core::ptr::null_mut(), Ordering::Release);
            self.enabled = false;
        }
    }

    extern "C" fn tick_handler(_sig: i32) {
        let kernel = TICK_KERNEL.load(Ordering::Acquire);
        if kernel.is_null() {
            return;
        }
        let kernel = unsafe { &*kernel };
        kernel.on_tick();
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use crate::kernel::Kernel;

    pub struct TickDriver;

    impl Default for TickDriver {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TickDriver {
        pub const fn new() -> Self {
            TickDriver
        }

        /// # Safety
        /// No-op stub; the target's SysTick exception drives the kernel.
        pub unsafe fn enable(&mut self, _kernel: &'static Kernel, _interval_us: u64) {}

        /// # Safety
        /// No-op stub.
        pub unsafe fn disable(&mut self) {}
    }
}

pub use imp::TickDriver;
