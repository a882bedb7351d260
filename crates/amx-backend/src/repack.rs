//! Weight repacking into the tile-friendly layout.
//!
//! A weight `[N, K]` is cut into groups of `TILE_N` rows (N padded up to a
//! multiple of `TILE_N`) and K-blocks of `TILE_K` elements. Each
//! (group, K-block) pair becomes one packed tile, stored group-major:
//!
//! ```text
//! tile(g, kb) at ((g * KB) + kb) * tile_bytes
//!   quants  [TILE_K / 4][TILE_N][4 values]   VNNI quad order
//!   scales  [TILE_N] f32
//!   mins    [TILE_N] f32                      Q4_1 only
//! ```
//!
//! 4-bit values keep two per byte (low nibble first). F16 weights use
//! K-pair order, `[TILE_K / 2][TILE_N][2]`, with no scales.

use amx_tensor::{DType, Shape};
use half::f16;

use crate::error::{BackendError, Result};

/// Rows per B tile, i.e. output columns per tile.
pub const TILE_N: usize = 16;
/// Rows per A and C tile.
pub const TILE_M: usize = 16;
/// Elements of K covered by one packed tile (one quantization block).
pub const TILE_K: usize = 32;

const VNNI_BLK: usize = 4;
const QUADS: usize = TILE_K / VNNI_BLK;

/// True when `dtype` has an accelerated kernel and is stored repacked.
pub fn has_amx_kernels(dtype: DType) -> bool {
    match dtype {
        DType::Q4_0 | DType::Q4_1 | DType::Q8_0 => true,
        DType::F16 => cfg!(feature = "f16"),
        _ => false,
    }
}

fn quant_bytes(dtype: DType) -> usize {
    match dtype {
        DType::Q4_0 | DType::Q4_1 => TILE_N * TILE_K / 2,
        DType::Q8_0 => TILE_N * TILE_K,
        DType::F16 => TILE_N * TILE_K * 2,
        _ => 0,
    }
}

fn scale_fields(dtype: DType) -> usize {
    match dtype {
        DType::Q4_0 | DType::Q8_0 => 1,
        DType::Q4_1 => 2,
        _ => 0,
    }
}

/// Bytes of one packed tile, or `None` for types that are not repacked.
pub fn packed_tile_bytes(dtype: DType) -> Option<usize> {
    if !has_amx_kernels(dtype) {
        return None;
    }
    Some(quant_bytes(dtype) + scale_fields(dtype) * TILE_N * 4)
}

/// Geometry of a weight in the packed layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedDims {
    /// Logical rows (output features).
    pub n: usize,
    /// Logical columns (reduction length).
    pub k: usize,
    /// Row groups of `TILE_N`.
    pub groups: usize,
    /// K-blocks of `TILE_K`.
    pub k_blocks: usize,
    pub tile_bytes: usize,
}

impl PackedDims {
    pub fn new(dtype: DType, shape: &Shape) -> Option<Self> {
        let tile_bytes = packed_tile_bytes(dtype)?;
        let n = shape.rows();
        let k = shape.cols();
        Some(PackedDims {
            n,
            k,
            groups: n.div_ceil(TILE_N),
            k_blocks: k.div_ceil(TILE_K),
            tile_bytes,
        })
    }

    pub fn total_bytes(&self) -> usize {
        self.groups * self.k_blocks * self.tile_bytes
    }

    pub fn tile_offset(&self, group: usize, k_block: usize) -> usize {
        (group * self.k_blocks + k_block) * self.tile_bytes
    }
}

/// Size of the packed representation of a `dtype` tensor of `shape`, or
/// `None` when the type is stored as-is.
pub fn packed_size(dtype: DType, shape: &Shape) -> Option<usize> {
    PackedDims::new(dtype, shape).map(|d| d.total_bytes())
}

/// One quantization block decoded to per-row scale, minimum and raw quants.
struct Block {
    d: f32,
    m: f32,
    q: [u8; TILE_K],
}

fn read_f16(bytes: &[u8]) -> f32 {
    f16::from_le_bytes([bytes[0], bytes[1]]).to_f32()
}

fn unpack_nibbles(qs: &[u8], q: &mut [u8; TILE_K]) {
    for (j, &byte) in qs.iter().enumerate().take(TILE_K / 2) {
        q[j] = byte & 0x0f;
        q[j + TILE_K / 2] = byte >> 4;
    }
}

fn decode_block(dtype: DType, raw: &[u8]) -> Block {
    let mut block = Block {
        d: read_f16(raw),
        m: 0.0,
        q: [0; TILE_K],
    };
    match dtype {
        DType::Q4_0 => unpack_nibbles(&raw[2..18], &mut block.q),
        DType::Q4_1 => {
            block.m = read_f16(&raw[2..4]);
            unpack_nibbles(&raw[4..20], &mut block.q);
        }
        DType::Q8_0 => block.q.copy_from_slice(&raw[2..34]),
        _ => unreachable!("{} has no block layout", dtype),
    }
    block
}

fn write_block(dtype: DType, tile: &mut [u8], row: usize, block: &Block) {
    for quad in 0..QUADS {
        let q = &block.q[quad * VNNI_BLK..(quad + 1) * VNNI_BLK];
        match dtype {
            DType::Q8_0 => {
                let at = (quad * TILE_N + row) * VNNI_BLK;
                tile[at..at + VNNI_BLK].copy_from_slice(q);
            }
            _ => {
                let at = (quad * TILE_N + row) * 2;
                tile[at] = q[0] | (q[1] << 4);
                tile[at + 1] = q[2] | (q[3] << 4);
            }
        }
    }
    let scales = quant_bytes(dtype);
    tile[scales + row * 4..scales + row * 4 + 4].copy_from_slice(&block.d.to_le_bytes());
    if dtype == DType::Q4_1 {
        let mins = scales + TILE_N * 4;
        tile[mins + row * 4..mins + row * 4 + 4].copy_from_slice(&block.m.to_le_bytes());
    }
}

fn write_f16_row(tile: &mut [u8], row: usize, values: &[u8]) {
    // `values` holds up to TILE_K f16 values (2 bytes each); the rest stays zero.
    for (i, pair) in values.chunks(4).enumerate() {
        let at = (i * TILE_N + row) * 4;
        tile[at..at + pair.len()].copy_from_slice(pair);
    }
}

/// Reorganize a whole row-major `dtype` tensor of `shape` from `src` into the
/// packed layout in `dst`.
///
/// # Errors
/// Returns `InvalidArgument` when `src` is not exactly the tensor's row-major
/// byte size or `dst` is smaller than the packed size, and
/// `UnsupportedDType` for types without an accelerated kernel.
pub fn repack(dtype: DType, shape: &Shape, src: &[u8], dst: &mut [u8]) -> Result<()> {
    let dims = PackedDims::new(dtype, shape)
        .ok_or_else(|| BackendError::UnsupportedDType(dtype.to_string()))?;
    let row_size = dtype.row_size(dims.k)?;
    if src.len() != dims.n * row_size {
        return Err(BackendError::InvalidArgument(format!(
            "repack of {} {} expects {} source bytes, got {}",
            dtype,
            shape,
            dims.n * row_size,
            src.len()
        )));
    }
    if dst.len() < dims.total_bytes() {
        return Err(BackendError::InvalidArgument(format!(
            "repack destination holds {} bytes, {} required",
            dst.len(),
            dims.total_bytes()
        )));
    }

    let dst = &mut dst[..dims.total_bytes()];
    dst.fill(0);

    let block_bytes = dtype.size_in_bytes() * (TILE_K / dtype.block_size());
    for n in 0..dims.n {
        let row = &src[n * row_size..(n + 1) * row_size];
        let (group, r) = (n / TILE_N, n % TILE_N);
        for kb in 0..dims.k_blocks {
            let offset = dims.tile_offset(group, kb);
            let tile = &mut dst[offset..offset + dims.tile_bytes];
            let start = kb * block_bytes;
            let end = (start + block_bytes).min(row.len());
            if dtype == DType::F16 {
                write_f16_row(tile, r, &row[start..end]);
            } else {
                write_block(dtype, tile, r, &decode_block(dtype, &row[start..end]));
            }
        }
    }
    log::debug!(
        "repacked {} {}: {} -> {} bytes",
        dtype,
        shape,
        src.len(),
        dims.total_bytes()
    );
    Ok(())
}

/// Expand one packed tile into `TILE_N` rows of `TILE_K` f32 weights.
pub fn dequantize_tile(dtype: DType, tile: &[u8], out: &mut [[f32; TILE_K]; TILE_N]) {
    if dtype == DType::F16 {
        for (row, values) in out.iter_mut().enumerate() {
            for (k, v) in values.iter_mut().enumerate() {
                let at = ((k / 2) * TILE_N + row) * 4 + (k % 2) * 2;
                *v = read_f16(&tile[at..at + 2]);
            }
        }
        return;
    }

    let scales = quant_bytes(dtype);
    for (row, values) in out.iter_mut().enumerate() {
        let at = scales + row * 4;
        let d = f32::from_le_bytes([tile[at], tile[at + 1], tile[at + 2], tile[at + 3]]);
        let m = if dtype == DType::Q4_1 {
            let at = at + TILE_N * 4;
            f32::from_le_bytes([tile[at], tile[at + 1], tile[at + 2], tile[at + 3]])
        } else {
            0.0
        };
        for (k, v) in values.iter_mut().enumerate() {
            let (quad, lane) = (k / VNNI_BLK, k % VNNI_BLK);
            *v = match dtype {
                DType::Q8_0 => {
                    let q = tile[(quad * TILE_N + row) * VNNI_BLK + lane] as i8;
                    q as f32 * d
                }
                _ => {
                    let byte = tile[(quad * TILE_N + row) * 2 + lane / 2];
                    let q = if lane % 2 == 0 { byte & 0x0f } else { byte >> 4 };
                    if dtype == DType::Q4_1 {
                        q as f32 * d + m
                    } else {
                        (q as f32 - 8.0) * d
                    }
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q4_0_block(d: f32, q: &[u8; 32]) -> Vec<u8> {
        let mut out = f16::from_f32(d).to_le_bytes().to_vec();
        for j in 0..16 {
            out.push(q[j] | (q[j + 16] << 4));
        }
        out
    }

    #[test]
    fn test_accelerated_set() {
        assert!(has_amx_kernels(DType::Q4_0));
        assert!(has_amx_kernels(DType::Q4_1));
        assert!(has_amx_kernels(DType::Q8_0));
        assert!(!has_amx_kernels(DType::Q5_0));
        assert!(!has_amx_kernels(DType::F32));
        assert_eq!(has_amx_kernels(DType::F16), cfg!(feature = "f16"));
    }

    #[test]
    fn test_packed_tile_bytes() {
        assert_eq!(packed_tile_bytes(DType::Q4_0), Some(320));
        assert_eq!(packed_tile_bytes(DType::Q4_1), Some(384));
        assert_eq!(packed_tile_bytes(DType::Q8_0), Some(576));
        assert_eq!(packed_tile_bytes(DType::F32), None);
    }

    #[test]
    fn test_packed_size_pads_rows() {
        // 20 rows round up to two row groups.
        let shape = Shape::new(vec![20, 64]);
        assert_eq!(packed_size(DType::Q8_0, &shape), Some(2 * 2 * 576));
        assert_eq!(packed_size(DType::Q5_0, &shape), None);
    }

    #[test]
    fn test_repack_q4_0_then_dequantize() {
        let mut q = [0u8; 32];
        for (j, v) in q.iter_mut().enumerate() {
            *v = (j % 16) as u8;
        }
        let shape = Shape::new(vec![1, 32]);
        let src = q4_0_block(0.5, &q);
        let mut dst = vec![0xaa; packed_size(DType::Q4_0, &shape).unwrap()];
        repack(DType::Q4_0, &shape, &src, &mut dst).unwrap();

        let mut tile = [[0f32; TILE_K]; TILE_N];
        dequantize_tile(DType::Q4_0, &dst, &mut tile);
        for k in 0..32 {
            assert_eq!(tile[0][k], (q[k] as f32 - 8.0) * 0.5, "k={k}");
        }
        // Padding rows carry a zero scale.
        assert!(tile[1..].iter().flatten().all(|&v| v == 0.0));
    }

    #[test]
    fn test_repack_q8_0_layout_is_interleaved() {
        let shape = Shape::new(vec![2, 32]);
        let mut src = Vec::new();
        for row in 0..2u8 {
            src.extend_from_slice(&f16::from_f32(1.0).to_le_bytes());
            src.extend((0..32u8).map(|j| row * 64 + j));
        }
        let mut dst = vec![0; packed_size(DType::Q8_0, &shape).unwrap()];
        repack(DType::Q8_0, &shape, &src, &mut dst).unwrap();
        // First quad: row 0 values 0..4, then row 1 values 64..68.
        assert_eq!(&dst[0..4], &[0, 1, 2, 3]);
        assert_eq!(&dst[4..8], &[64, 65, 66, 67]);
        // Second quad of row 0 starts after all TILE_N rows of the first quad.
        assert_eq!(&dst[TILE_N * 4..TILE_N * 4 + 4], &[4, 5, 6, 7]);
    }

    #[test]
    fn test_repack_q4_1_keeps_min() {
        let shape = Shape::new(vec![1, 32]);
        let mut src = f16::from_f32(2.0).to_le_bytes().to_vec();
        src.extend_from_slice(&f16::from_f32(-1.0).to_le_bytes());
        src.extend([0x31u8; 16]);
        let mut dst = vec![0; packed_size(DType::Q4_1, &shape).unwrap()];
        repack(DType::Q4_1, &shape, &src, &mut dst).unwrap();
        let mut tile = [[0f32; TILE_K]; TILE_N];
        dequantize_tile(DType::Q4_1, &dst, &mut tile);
        assert_eq!(tile[0][0], 1.0 * 2.0 - 1.0);
        assert_eq!(tile[0][16], 3.0 * 2.0 - 1.0);
    }

    #[test]
    fn test_repack_rejects_partial_source() {
        let shape = Shape::new(vec![16, 64]);
        let mut dst = vec![0; packed_size(DType::Q4_0, &shape).unwrap()];
        let err = repack(DType::Q4_0, &shape, &[0u8; 100], &mut dst).unwrap_err();
        assert!(matches!(err, BackendError::InvalidArgument(_)));
    }

    #[test]
    fn test_repack_rejects_small_destination() {
        let shape = Shape::new(vec![16, 32]);
        let src = vec![0u8; 16 * 18];
        let mut dst = vec![0; 100];
        assert!(repack(DType::Q4_0, &shape, &src, &mut dst).is_err());
    }

    #[test]
    fn test_repack_unsupported_dtype() {
        let shape = Shape::new(vec![1, 32]);
        let err = repack(DType::Q5_0, &shape, &[0u8; 22], &mut [0u8; 64]).unwrap_err();
        assert!(matches!(err, BackendError::UnsupportedDType(_)));
    }

    #[cfg(feature = "f16")]
    #[test]
    fn test_repack_f16_pairs() {
        let shape = Shape::new(vec![1, 4]);
        let src: Vec<u8> = [1.0f32, 2.0, 3.0, 4.0]
            .iter()
            .flat_map(|v| f16::from_f32(*v).to_le_bytes())
            .collect();
        let mut dst = vec![0; packed_size(DType::F16, &shape).unwrap()];
        repack(DType::F16, &shape, &src, &mut dst).unwrap();
        let mut tile = [[0f32; TILE_K]; TILE_N];
        dequantize_tile(DType::F16, &dst, &mut tile);
        assert_eq!(&tile[0][..5], &[1.0, 2.0, 3.0, 4.0, 0.0]);
    }
}
