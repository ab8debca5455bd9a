//! Trap entry and secondary boot stub.

use super::{ArmCpu, CpuFaults, VECTORS};
use crate::interrupt::PtRegs;
use core::arch::{asm, global_asm};

global_asm!(include_str!("entry.s"), options(raw));

extern "C" {
    static exception_vectors: u8;
    pub(super) fn secondary_trampoline();
}

/// Point VBAR of the executing core at the vector table.
///
/// Secondaries do this themselves in the trampoline.
pub fn install_vectors() {
    unsafe {
        let base = core::ptr::addr_of!(exception_vectors) as usize;
        asm!("mcr p15, 0, {}, c12, c0, 0", "isb", in(reg) base, options(nostack));
    }
}

// Called by the vector stubs with the frame they saved.
#[no_mangle]
extern "C" fn do_handle_exception(vector: u32, regs: &mut PtRegs) {
    VECTORS.handle(&ArmCpu, vector as u8, regs, &CpuFaults);
}
