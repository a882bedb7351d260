use std::arch::asm;

use super::config::{TileCfg, TileGeometry};
use super::TileUnit;
use crate::capability::{cpu_has_amx, request_capability};

/// The real AMX tile register file.
///
/// Loads and stores are only issued when the CPU has AMX and the process
/// was granted tile state; otherwise they are skipped and the unit reads
/// back as unconfigured.
#[derive(Debug, Default, Clone, Copy)]
pub struct HardwareTiles;

impl HardwareTiles {
    pub fn new() -> Self {
        HardwareTiles
    }

    /// Runtime availability check: CPU support plus OS permission.
    pub fn is_available() -> bool {
        cpu_has_amx() && request_capability()
    }
}

impl TileUnit for HardwareTiles {
    fn request_permission(&self) -> bool {
        if !cpu_has_amx() {
            log::warn!("CPU does not report AMX-TILE and AMX-INT8");
            return false;
        }
        request_capability()
    }

    fn load_config(&self, geometry: &TileGeometry) {
        if !Self::is_available() {
            log::error!("tile configuration skipped: AMX is not available on this thread");
            return;
        }
        let cfg = TileCfg::from(geometry);
        unsafe { ldtilecfg(&cfg) };
    }

    fn store_config(&self) -> TileGeometry {
        if !Self::is_available() {
            return TileGeometry::default();
        }
        let mut cfg = TileCfg::zeroed();
        unsafe { sttilecfg(&mut cfg) };
        cfg.geometry()
    }
}

// The encodings are emitted as bytes so no assembler AMX support is needed.

/// `ldtilecfg [rdi]`
unsafe fn ldtilecfg(cfg: &TileCfg) {
    asm!(
        ".byte 0xc4, 0xe2, 0x78, 0x49, 0x07",
        in("rdi") cfg as *const TileCfg,
        options(nostack, readonly, preserves_flags),
    );
}

/// `sttilecfg [rdi]`
unsafe fn sttilecfg(cfg: &mut TileCfg) {
    asm!(
        ".byte 0xc4, 0xe2, 0x79, 0x49, 0x07",
        in("rdi") cfg as *mut TileCfg,
        options(nostack, preserves_flags),
    );
}
