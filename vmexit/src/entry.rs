//! Bare-metal entry points, called by the boot code.
use crate::{run, Config, Context, Platform, Status};
use abyss::{
    arm::{self, ArmCpu, Pmccntr},
    cpu::Cpu,
    dev::{
        iomap::IoMaps,
        mmio::{IdentityMapper, MmioMapper},
        pl011::{self, Pl011},
    },
    kprint::{self, Stdout},
    psci::FunctionIds,
    PAGE_SIZE,
};
use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::ffi::{c_char, CStr};
use core::ptr::null_mut;
use core::sync::atomic::{AtomicPtr, Ordering};

static CONTEXT: AtomicPtr<Context> = AtomicPtr::new(null_mut());

fn install_console(iomaps: &IoMaps) {
    let base = iomaps
        .find_compatible(pl011::COMPATIBLE)
        .and_then(|m| m.addrs.first());
    if let Some(regs) = base.and_then(|base| IdentityMapper.map(*base, PAGE_SIZE).ok()) {
        kprint::set_console(Box::leak(Box::new(Pl011::new(regs))));
    }
}

/// Main of the primary core. `argv` holds the test names and flags,
/// without the program name.
///
/// # Safety
/// `argv` must point to `argc` valid nul-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn vmexit_main(argc: i32, argv: *const *const c_char) -> i32 {
    arm::install_vectors();
    let iomaps = IoMaps::qemu_virt();
    install_console(&iomaps);
    arm::set_cpu_count(iomaps.find_type("cpu").map_or(1, |m| m.addrs.len()));

    let platform = Platform {
        cpu: Arc::new(ArmCpu),
        counter: Arc::new(Pmccntr),
        power: Arc::new(arm::psci(FunctionIds::V0_2)),
        mapper: Arc::new(IdentityMapper),
        iomaps,
        vectors: &arm::VECTORS,
        secondary_entry: vmexit_secondary as usize,
    };
    let ctx = Arc::new(Context::new(platform, Config::default()));
    // Leaked: the secondary keeps using it after main returns.
    CONTEXT.store(Arc::into_raw(ctx.clone()) as *mut Context, Ordering::Release);

    let args: Vec<&str> = (0..argc.max(0) as usize)
        .filter_map(|i| CStr::from_ptr(*argv.add(i)).to_str().ok())
        .collect();
    run(&ctx, &args, &mut Stdout) as i32
}

/// Main of the secondary core, reached through the PSCI trampoline.
#[no_mangle]
pub extern "C" fn vmexit_secondary() -> ! {
    match unsafe { CONTEXT.load(Ordering::Acquire).as_ref() } {
        Some(ctx) => crate::secondary_main(ctx),
        None => ArmCpu.halt(Status::Fail as i32),
    }
}
