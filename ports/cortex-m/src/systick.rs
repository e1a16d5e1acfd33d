//! Tick interrupt.

use cortex_m_rt::exception;

#[exception]
fn SysTick() {
    let kernel = rk_kernel::kernel();
    if kernel.tick() {
        kernel.port().request_context_switch(kernel);
    }
}
