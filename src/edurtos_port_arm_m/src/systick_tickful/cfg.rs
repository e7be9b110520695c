/// The configuration for the implementation of `PortTimer` based on SysTick.
pub trait SysTickOptions {
    /// The input clock frequency of SysTick, measured in hertz.
    const FREQUENCY: u64;

    /// The interrupt priority of SysTick. Defaults to `0xc0`.
    ///
    /// This must be higher (numerically lower) than
    /// [`ThreadingOptions::PEND_SV_PRIORITY`](crate::ThreadingOptions::PEND_SV_PRIORITY).
    const INTERRUPT_PRIORITY: u8 = 0xc0;
}

/// Calculate the SysTick reload value for a tick period of `period_ms`
/// milliseconds. The result is clamped to the range supported by the
/// 24-bit counter.
pub const fn reload_value(frequency: u64, period_ms: u32) -> u32 {
    let cycles = frequency * period_ms as u64 / 1000;
    if cycles <= 1 {
        1
    } else if cycles > 0x100_0000 {
        0xff_ffff
    } else {
        (cycles - 1) as u32
    }
}

/// Attach the implementation of [`PortTimer`] that is based on SysTick to a
/// given kernel trait type, and define the SysTick handler, which drives the
/// tick handler of the kernel `$kernel`.
///
/// You should also implement [`SysTickOptions`] manually.
///
/// ```rust,ignore
/// edurtos_port_arm_m::use_systick_tickful!(unsafe impl PortTimer for System; kernel = KERNEL);
///
/// impl edurtos_port_arm_m::SysTickOptions for System {
///     // SysTick = HSI (internal 16-MHz RC oscillator)
///     const FREQUENCY: u64 = 16_000_000;
/// }
/// ```
///
/// [`PortTimer`]: edurtos_kernel::PortTimer
///
/// # Safety
///
///  - The target must really be a bare-metal Arm-M environment.
///  - SysTick must be clocked by the processor clock.
#[macro_export]
macro_rules! use_systick_tickful {
    (unsafe impl PortTimer for $Traits:ty; kernel = $kernel:path) => {
        unsafe impl $crate::edurtos_kernel::PortTimer for $Traits {
            unsafe fn start_tick_timer(period_ms: u32) {
                // Safety: Called once by the kernel with CPU Lock active
                unsafe { $crate::systick_tickful::imp::init::<$Traits>(period_ms) };
            }
        }

        #[$crate::cortex_m_rt::exception]
        fn SysTick() {
            // Safety: First-level interrupt handler, CPU Lock inactive
            unsafe { $kernel.port_timer_tick() };
        }
    };
}
