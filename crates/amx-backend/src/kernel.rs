//! The narrow interface to the numeric matmul kernel, plus a portable
//! kernel that reads the packed weight layout directly.

use std::fmt::Debug;

use amx_tensor::{DType, GraphNode, Tensor, TensorError};
use rayon::prelude::*;

use crate::buffer::AMX_NAME;
use crate::context::BackendContext;
use crate::error::{BackendError, Result};
use crate::repack::{dequantize_tile, PackedDims, TILE_K, TILE_M, TILE_N};
use crate::tile::{TileConfigState, TileUnit, GEMM_GEOMETRY};

/// Computes one `MulMat` node: `output[m, n] = sum_k weight[n, k] * act[m, k]`.
///
/// Implementations must call `ensure_configured` on every thread before
/// issuing tile work on it.
pub trait MatMulKernel: Send + Sync + Debug {
    fn mul_mat(&self, ctx: &BackendContext, tiles: &dyn TileUnit, node: &GraphNode) -> Result<()>;
}

/// Scalar kernel over the packed layout.
///
/// Output columns are processed in pairs of B tiles (`2 * TILE_N` columns),
/// spread across the context's worker pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct PackedReferenceKernel;

/// Raw bytes of a bound tensor.
fn bytes_of(tensor: &Tensor, len: usize) -> Result<&[u8]> {
    let data = tensor.try_data()?;
    if data.len() < len {
        return Err(TensorError::OutOfBounds {
            offset: 0,
            size: len,
            capacity: data.len(),
        }
        .into());
    }
    Ok(unsafe { std::slice::from_raw_parts(data.as_ptr(), len) })
}

fn read_f32s(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn shape_mismatch(expected: &[usize], got: &[usize]) -> BackendError {
    TensorError::ShapeMismatch {
        expected: expected.to_vec(),
        got: got.to_vec(),
    }
    .into()
}

impl MatMulKernel for PackedReferenceKernel {
    fn mul_mat(&self, ctx: &BackendContext, tiles: &dyn TileUnit, node: &GraphNode) -> Result<()> {
        let (Some(weight), Some(act)) = (node.src(0), node.src(1)) else {
            return Err(BackendError::InvalidArgument(format!(
                "MUL_MAT '{}' needs two sources",
                node.output().name()
            )));
        };
        let out = node.output();

        let w_data = weight.try_data()?;
        if w_data.buffer_type() != AMX_NAME {
            log::error!(
                "weight '{}' lives in a {} buffer, not in the packed layout",
                weight.name(),
                w_data.buffer_type()
            );
            panic!("MUL_MAT weight '{}' was not loaded through an AMX buffer", weight.name());
        }
        if act.dtype() != DType::F32 || out.dtype() != DType::F32 {
            return Err(BackendError::UnsupportedDType(format!(
                "MUL_MAT expects f32 activations and output, got {} and {}",
                act.dtype(),
                out.dtype()
            )));
        }

        let dims = PackedDims::new(weight.dtype(), weight.shape())
            .ok_or_else(|| BackendError::UnsupportedDType(weight.dtype().to_string()))?;
        let (n, k, m) = (dims.n, dims.k, act.shape().rows());
        if act.shape().cols() != k {
            return Err(shape_mismatch(&[m, k], act.shape().dims()));
        }
        if out.shape().rows() != m || out.shape().cols() != n {
            return Err(shape_mismatch(&[m, n], out.shape().dims()));
        }

        let packed = bytes_of(weight, dims.total_bytes())?;
        let x = read_f32s(bytes_of(act, m * k * 4)?);
        let out_data = out.try_data()?;
        if out_data.len() < m * n * 4 {
            return Err(TensorError::OutOfBounds {
                offset: 0,
                size: m * n * 4,
                capacity: out_data.len(),
            }
            .into());
        }

        let pair_cols = 2 * TILE_N;
        let pairs = n.div_ceil(pair_cols);
        let wtype = weight.dtype();

        let blocks: Vec<(usize, Vec<f32>)> = ctx.install(|| {
            (0..pairs)
                .into_par_iter()
                .map(|pair| {
                    TileConfigState::with_thread(|s| s.ensure_configured(tiles, &GEMM_GEOMETRY));
                    (pair, pair_block(wtype, &dims, packed, &x, m, pair))
                })
                .collect()
        });

        let dst = unsafe { std::slice::from_raw_parts_mut(out_data.as_ptr(), m * n * 4) };
        for (pair, acc) in blocks {
            let col0 = pair * pair_cols;
            let width = pair_cols.min(n - col0);
            for row in 0..m {
                for c in 0..width {
                    let at = (row * n + col0 + c) * 4;
                    dst[at..at + 4].copy_from_slice(&acc[row * pair_cols + c].to_le_bytes());
                }
            }
        }
        Ok(())
    }
}

/// Accumulate the `[m, 2 * TILE_N]` output block for one column pair.
fn pair_block(
    dtype: DType,
    dims: &PackedDims,
    packed: &[u8],
    x: &[f32],
    m: usize,
    pair: usize,
) -> Vec<f32> {
    let pair_cols = 2 * TILE_N;
    let mut acc = vec![0f32; m * pair_cols];
    let mut w = [[0f32; TILE_K]; TILE_N];

    for half in 0..2 {
        let group = pair * 2 + half;
        if group >= dims.groups {
            break;
        }
        for kb in 0..dims.k_blocks {
            let offset = dims.tile_offset(group, kb);
            dequantize_tile(dtype, &packed[offset..offset + dims.tile_bytes], &mut w);
            let k0 = kb * TILE_K;
            let klen = TILE_K.min(dims.k - k0);

            for m0 in (0..m).step_by(TILE_M) {
                for row in m0..(m0 + TILE_M).min(m) {
                    let xs = &x[row * dims.k + k0..row * dims.k + k0 + klen];
                    let c = &mut acc[row * pair_cols + half * TILE_N..][..TILE_N];
                    for (r, wr) in w.iter().enumerate() {
                        c[r] += wr[..klen].iter().zip(xs).map(|(a, b)| a * b).sum::<f32>();
                    }
                }
            }
        }
    }
    acc
}
