#![no_std]

pub mod bitmap;
pub mod config;
pub mod context;
pub mod error;
pub mod except;
pub mod kernel;
pub mod monitor;
pub mod preemption;
pub mod sync;
pub mod syscall;
pub mod thread;
pub mod wq;


#[cfg(test)]
extern crate std;

pub use config::KernelProfile;
pub use error::{KernelError, KernelResult};
pub use except::{ExceptionRecord, FaultKind, FaultStatus};
pub use kernel::{FaultPolicy, Kernel, KernelState, SvcAction};
pub use monitor::{Comm, Monitor, MonitorState, SigSet, Signal};
pub use preemption::TickDriver;
pub use syscall::{svc_dispatch, SyscallArgs, ThreadInit};
pub use thread::{Tcb, ThreadId, ThreadState};
