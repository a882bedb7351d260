/// Number of architectural tile registers (TMM0..TMM7).
pub const NUM_TILES: usize = 8;

/// Rows and row width (in bytes) of each tile register, plus the palette.
///
/// Palette 0 means "no configuration loaded".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TileGeometry {
    pub palette: u8,
    pub rows: [u8; NUM_TILES],
    pub colsb: [u16; NUM_TILES],
}

/// Geometry used by the matmul kernels, a 2-2-4 tile split:
///
/// ```text
///            B TMM0  B TMM1        A: 16 rows x 32 bytes (one int8 block)
///   A TMM2   C TMM4  C TMM6        B: 8 rows x 64 bytes (VNNI packed)
///   A TMM3   C TMM5  C TMM7        C: 16 rows x 16 i32
/// ```
pub const GEMM_GEOMETRY: TileGeometry = TileGeometry {
    palette: 1,
    rows: [8, 8, 16, 16, 16, 16, 16, 16],
    colsb: [64, 64, 32, 32, 64, 64, 64, 64],
};

impl TileGeometry {
    pub fn is_configured(&self) -> bool {
        self.palette != 0
    }
}

/// The 64-byte memory image read by `ldtilecfg` and written by `sttilecfg`.
#[repr(C, align(64))]
#[derive(Debug, Clone, Copy)]
pub struct TileCfg {
    pub palette_id: u8,
    pub start_row: u8,
    reserved: [u8; 14],
    pub colsb: [u16; 16],
    pub rows: [u8; 16],
}

impl TileCfg {
    pub const fn zeroed() -> Self {
        TileCfg {
            palette_id: 0,
            start_row: 0,
            reserved: [0; 14],
            colsb: [0; 16],
            rows: [0; 16],
        }
    }

    pub fn geometry(&self) -> TileGeometry {
        let mut g = TileGeometry {
            palette: self.palette_id,
            ..TileGeometry::default()
        };
        g.rows.copy_from_slice(&self.rows[..NUM_TILES]);
        g.colsb.copy_from_slice(&self.colsb[..NUM_TILES]);
        g
    }
}

impl From<&TileGeometry> for TileCfg {
    fn from(g: &TileGeometry) -> Self {
        let mut cfg = TileCfg::zeroed();
        cfg.palette_id = g.palette;
        cfg.rows[..NUM_TILES].copy_from_slice(&g.rows);
        cfg.colsb[..NUM_TILES].copy_from_slice(&g.colsb);
        cfg
    }
}
