//! Reference attention kernels built from candle primitives.
//!
//! All three kernels promote to `f32` internally and cast the output back to
//! the input dtype.

use candle_core::{DType, Result as CandleResult, Tensor, D};
use candle_nn::ops::softmax_last_dim;

use crate::core::shape::{expect_compatible, expect_dims};
use crate::core::{AttentionError, AttentionShape};

/// Safe-softmax attention spelled out step by step: scores, scale, row max,
/// subtract, exp, row sum, normalise, weighted sum of values.
pub fn unfused_attention(q: &Tensor, k: &Tensor, v: &Tensor) -> Result<Tensor, AttentionError> {
    let shape = validate_heads_major(q, k, v)?;
    let (q_view, k_view, v_view) = merged_views(&shape, q, k, v)?;

    let scores = q_view.matmul(&k_view.t()?)?;
    let scores = scores.mul_scalar(shape.softmax_scale())?;
    let row_max = scores.max_keepdim(D::Minus1)?;
    let shifted = scores.broadcast_sub(&row_max)?;
    let weights = shifted.exp()?;
    let row_sum = weights.sum_keepdim(D::Minus1)?;
    let probs = weights.broadcast_div(&row_sum)?;

    let output = probs.matmul(&v_view)?;
    Ok(output.reshape(shape.dims().as_slice())?.to_dtype(q.dtype())?)
}

/// Attention through candle's fused last-dim softmax.
pub fn exact_attention(q: &Tensor, k: &Tensor, v: &Tensor) -> Result<Tensor, AttentionError> {
    let shape = validate_heads_major(q, k, v)?;
    let (q_view, k_view, v_view) = merged_views(&shape, q, k, v)?;

    let scores = q_view
        .matmul(&k_view.transpose(1, 2)?)?
        .mul_scalar(shape.softmax_scale())?;
    let probs = softmax_last_dim(&scores)?;
    let output = probs.matmul(&v_view)?;
    Ok(output.reshape(shape.dims().as_slice())?.to_dtype(q.dtype())?)
}

/// Attention over `[batch, seq_len, heads, head_dim]` inputs, returning the
/// output in the same layout.
pub fn seq_major_attention(q: &Tensor, k: &Tensor, v: &Tensor) -> Result<Tensor, AttentionError> {
    let shape = AttentionShape::seq_major(q, "q")?;
    let seq_dims = [shape.batch, shape.seq_len, shape.num_heads, shape.head_dim];
    expect_dims(k, &seq_dims, "k")?;
    expect_dims(v, &seq_dims, "v")?;

    let q = q.transpose(1, 2)?.contiguous()?;
    let k = k.transpose(1, 2)?.contiguous()?;
    let v = v.transpose(1, 2)?.contiguous()?;
    let output = exact_attention(&q, &k, &v)?;
    Ok(output.transpose(1, 2)?.contiguous()?)
}

/// Copy `src` into the caller-owned buffer `out`, casting to its dtype.
pub fn write_into(out: &Tensor, src: &Tensor) -> Result<(), AttentionError> {
    expect_dims(src, out.dims(), "output")?;
    if !out.is_contiguous() {
        return Err(AttentionError::shape("output buffer must be contiguous"));
    }
    let src = src.to_dtype(out.dtype())?.contiguous()?;
    out.slice_set(&src, 0, 0)?;
    Ok(())
}

fn validate_heads_major(q: &Tensor, k: &Tensor, v: &Tensor) -> Result<AttentionShape, AttentionError> {
    let shape = AttentionShape::heads_major(q, "q")?;
    expect_dims(k, &shape.dims(), "k")?;
    expect_dims(v, &shape.dims(), "v")?;
    expect_compatible(q, &[(k, "k"), (v, "v")])?;
    Ok(shape)
}

fn merged_views(
    shape: &AttentionShape,
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
) -> CandleResult<(Tensor, Tensor, Tensor)> {
    let merged = (shape.slices(), shape.seq_len, shape.head_dim);
    Ok((
        q.to_dtype(DType::F32)?.reshape(merged)?,
        k.to_dtype(DType::F32)?.reshape(merged)?,
        v.to_dtype(DType::F32)?.reshape(merged)?,
    ))
}

trait MulScalarExt {
    fn mul_scalar(&self, value: f32) -> CandleResult<Tensor>;
}

impl MulScalarExt for Tensor {
    fn mul_scalar(&self, value: f32) -> CandleResult<Tensor> {
        let scalar = Tensor::new(value, self.device())?;
        let scalar = scalar.broadcast_as(self.shape())?;
        self.mul(&scalar)
    }
}
