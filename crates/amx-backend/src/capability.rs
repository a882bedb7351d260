//! Process-wide permission gate for tile register state.
//!
//! Linux only hands out the extended tile-data save area to processes that
//! ask for it (`arch_prctl(ARCH_REQ_XCOMP_PERM, XFEATURE_XTILEDATA)`). The
//! request is made once and the answer cached for the process lifetime.

use std::sync::OnceLock;

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
const ARCH_REQ_XCOMP_PERM: libc::c_int = 0x1023;
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
const XFEATURE_XTILEDATA: libc::c_ulong = 18;

static GRANTED: OnceLock<bool> = OnceLock::new();

/// Request permission to use tile register state.
///
/// Only the first call reaches the operating system; later calls return the
/// cached answer. Platforms without a permission model report `true`.
pub fn request_capability() -> bool {
    *GRANTED.get_or_init(|| {
        let granted = os_request();
        if granted {
            log::info!("tile register state enabled for this process");
        } else {
            log::warn!("tile register state was not granted; AMX is not ready to be used");
        }
        granted
    })
}

/// The cached answer, without triggering a request.
pub fn capability_granted() -> Option<bool> {
    GRANTED.get().copied()
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
fn os_request() -> bool {
    let ret = unsafe { libc::syscall(libc::SYS_arch_prctl, ARCH_REQ_XCOMP_PERM, XFEATURE_XTILEDATA) };
    ret == 0
}

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
fn os_request() -> bool {
    true
}

/// CPUID leaf 7 reports both AMX-TILE (EDX bit 24) and AMX-INT8 (EDX bit 25).
#[cfg(target_arch = "x86_64")]
pub fn cpu_has_amx() -> bool {
    static HAS_AMX: OnceLock<bool> = OnceLock::new();
    *HAS_AMX.get_or_init(|| {
        use std::arch::x86_64::{__cpuid_count, __get_cpuid_max};
        #[allow(unused_unsafe)]
        let (max_leaf, edx) = unsafe {
            let (max_leaf, _) = __get_cpuid_max(0);
            let edx = if max_leaf >= 7 { __cpuid_count(7, 0).edx } else { 0 };
            (max_leaf, edx)
        };
        max_leaf >= 7 && edx & (1 << 24) != 0 && edx & (1 << 25) != 0
    })
}

#[cfg(not(target_arch = "x86_64"))]
pub fn cpu_has_amx() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_is_idempotent() {
        let first = request_capability();
        assert_eq!(capability_granted(), Some(first));
        for _ in 0..3 {
            assert_eq!(request_capability(), first);
        }
    }

    #[test]
    fn test_cpu_check_is_stable() {
        assert_eq!(cpu_has_amx(), cpu_has_amx());
    }
}
