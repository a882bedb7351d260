use amx_tensor::{BufferType, DType, GraphNode, Op, Tensor};

use crate::buffer::AMX_NAME;
use crate::repack::{has_amx_kernels, TILE_N};

/// Output columns the kernel produces per step: two B tiles side by side.
pub const COLUMN_PAIR: usize = TILE_N * 2;

fn is_plain_matrix(t: &Tensor) -> bool {
    t.is_contiguous() && t.shape().is_matrix()
}

/// Whether the accelerated kernel can run `node`.
///
/// Pure and silent: a `false` answer is a normal outcome. `capability_ok`
/// carries the backend's capability decision; when it is false every node is
/// rejected.
pub fn supports_op(node: &GraphNode, capability_ok: bool) -> bool {
    if !capability_ok || node.op() != Op::MulMat {
        return false;
    }
    let (Some(weight), Some(act)) = (node.src(0), node.src(1)) else {
        return false;
    };

    weight.grad().is_none()
        && act.grad().is_none()
        && is_plain_matrix(weight)
        && is_plain_matrix(act)
        && act.dtype() == DType::F32
        && has_amx_kernels(weight.dtype())
        && node.output().shape().cols() % COLUMN_PAIR == 0
}

/// Only weights already resident in the packed layout are accepted.
pub fn supports_buffer_type(buft: &dyn BufferType) -> bool {
    buft.name() == AMX_NAME
}
