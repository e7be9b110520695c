//! The `PortTimer` implementation based on SysTick.
use cortex_m::peripheral::{scb::SystemHandler, syst::SystClkSource};

use crate::{reload_value, SysTickOptions};

/// Configure and start SysTick.
///
/// # Safety
///
/// We must have the control of SysTick.
#[inline]
pub unsafe fn init<Traits: SysTickOptions>(period_ms: u32) {
    // Safety: We have the control of SysTick
    let mut peripherals = unsafe { cortex_m::Peripherals::steal() };

    // Safety: We don't make "priority-based critical sections"
    unsafe {
        peripherals
            .SCB
            .set_priority(SystemHandler::SysTick, Traits::INTERRUPT_PRIORITY)
    };

    peripherals.SYST.set_clock_source(SystClkSource::Core);
    peripherals
        .SYST
        .set_reload(reload_value(Traits::FREQUENCY, period_ms));
    peripherals.SYST.clear_current();
    peripherals.SYST.enable_interrupt();
    peripherals.SYST.enable_counter();
}
