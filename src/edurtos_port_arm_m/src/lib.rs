//! The Cortex-M4 port for [`edurtos_kernel`].
//!
//! The port uses `PRIMASK` for CPU Lock, PendSV (at the lowest priority) for
//! context switching, SysTick for the tick interrupt, and `ldrex`/`strex`
//! for the exclusive word accesses. Every task, including the idle task,
//! runs in Thread mode on the process stack (PSP). Interrupt handlers use
//! the main stack (MSP).
//!
//! Floating-point registers are not saved or restored. Build for
//! `thumbv7em-none-eabi` (soft-float ABI), or make sure that no task uses
//! the FPU.
//!
//! # Usage
//!
//! ```rust,ignore
//! edurtos_port_arm_m::use_port!(unsafe struct System; kernel = KERNEL);
//! edurtos_port_arm_m::use_systick_tickful!(unsafe impl PortTimer for System; kernel = KERNEL);
//!
//! impl edurtos_port_arm_m::ThreadingOptions for System {}
//!
//! impl edurtos_port_arm_m::SysTickOptions for System {
//!     // SysTick = HSI (internal 16-MHz RC oscillator)
//!     const FREQUENCY: u64 = 16_000_000;
//! }
//!
//! unsafe impl edurtos_kernel::KernelCfg for System {
//!     const STACK_REGION_TOP: usize = 0x2001_0000;
//!     const STACK_REGION_SIZE: usize = 5 * 1024;
//! }
//!
//! static KERNEL: edurtos_kernel::Kernel<System, 10> = edurtos_kernel::Kernel::new();
//!
//! #[cortex_m_rt::entry]
//! fn main() -> ! {
//!     KERNEL.create_task(task_body, 1, 1024, TaskParams::default()).unwrap();
//!     KERNEL.start()
//! }
//! ```
#![deny(unsafe_op_in_unsafe_fn)]
#![cfg_attr(not(test), no_std)]

/// The [`edurtos_kernel::PortThreading`] and
/// [`edurtos_kernel::PortExclusive`] implementation.
#[doc(hidden)]
pub mod threading {
    pub mod cfg;
    #[cfg(target_os = "none")]
    pub mod imp;
}

/// The [`edurtos_kernel::PortTimer`] implementation based on SysTick.
#[doc(hidden)]
pub mod systick_tickful {
    pub mod cfg;
    #[cfg(target_os = "none")]
    pub mod imp;
}

pub use self::{systick_tickful::cfg::*, threading::cfg::*};

/// Used by `use_port!`
#[doc(hidden)]
#[cfg(target_os = "none")]
pub extern crate core;
/// Used by `use_port!`
#[doc(hidden)]
pub extern crate edurtos_kernel;
/// Used by `use_port!`
#[doc(hidden)]
#[cfg(target_os = "none")]
pub use cortex_m_rt;
