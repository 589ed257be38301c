//! Tiled online-softmax kernels writing into caller-owned buffers.
//!
//! The kernels follow the calling convention of hand-written GPU attention
//! kernels: `q` and `v` use `[batch, heads, seq_len, head_dim]`, the key is
//! supplied pre-transposed as `[batch, heads, head_dim, seq_len]`, and the
//! result is written into `out` instead of being returned. Tensors are staged
//! through host memory and accumulated in `f32`.
//!
//! Two work decompositions are provided:
//!
//! * [`split_q`] walks query tiles and streams every key/value block through a
//!   single running softmax state per row.
//! * [`split_kv`] partitions the key/value range, reduces each partition
//!   independently and merges the partial states with a log-sum-exp rescale.

mod split_kv;
mod split_q;

pub use split_kv::split_kv;
pub use split_q::{split_q, split_q_lse};

use candle_core::{DType, Tensor};

use crate::core::shape::{expect_compatible, expect_dims};
use crate::core::{AttentionError, AttentionShape};

/// Host copies of the kernel operands.
pub(crate) struct HostOperands {
    pub shape: AttentionShape,
    pub q: Vec<f32>,
    pub tk: Vec<f32>,
    pub v: Vec<f32>,
}

impl HostOperands {
    pub fn load(q: &Tensor, tk: &Tensor, v: &Tensor, out: &Tensor) -> Result<Self, AttentionError> {
        let shape = AttentionShape::heads_major(q, "q")?;
        expect_dims(tk, &shape.transposed_key_dims(), "tk")?;
        expect_dims(v, &shape.dims(), "v")?;
        expect_dims(out, &shape.dims(), "out")?;
        expect_compatible(q, &[(tk, "tk"), (v, "v"), (out, "out")])?;
        if !out.is_contiguous() {
            return Err(AttentionError::shape("out must be contiguous"));
        }
        Ok(Self {
            shape,
            q: to_host(q)?,
            tk: to_host(tk)?,
            v: to_host(v)?,
        })
    }

    /// Query row `row` of slice `bh`.
    pub fn q_row(&self, bh: usize, row: usize) -> &[f32] {
        let d = self.shape.head_dim;
        let start = (bh * self.shape.seq_len + row) * d;
        &self.q[start..start + d]
    }

    /// Scaled score of query `q_row` against key position `col` in slice `bh`.
    pub fn score(&self, bh: usize, q_row: &[f32], col: usize, scale: f32) -> f32 {
        let n = self.shape.seq_len;
        let base = bh * self.shape.head_dim * n;
        let mut dot = 0f32;
        for (d, q) in q_row.iter().enumerate() {
            dot += q * self.tk[base + d * n + col];
        }
        dot * scale
    }

    /// Value row at position `col` of slice `bh`.
    pub fn v_row(&self, bh: usize, col: usize) -> &[f32] {
        let d = self.shape.head_dim;
        let start = (bh * self.shape.seq_len + col) * d;
        &self.v[start..start + d]
    }
}

/// Running softmax statistics for one query row.
#[derive(Debug, Clone)]
pub(crate) struct RowState {
    pub max: f32,
    pub sum: f32,
    pub acc: Vec<f32>,
}

impl RowState {
    pub fn new(head_dim: usize) -> Self {
        Self {
            max: f32::NEG_INFINITY,
            sum: 0.0,
            acc: vec![0.0; head_dim],
        }
    }

    /// Fold key/value positions `cols` into the running state.
    pub fn absorb_block(
        &mut self,
        ops: &HostOperands,
        bh: usize,
        q_row: &[f32],
        cols: std::ops::Range<usize>,
        scale: f32,
        scores: &mut Vec<f32>,
    ) {
        scores.clear();
        scores.extend(cols.clone().map(|col| ops.score(bh, q_row, col, scale)));
        let block_max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let new_max = self.max.max(block_max);
        if new_max == f32::NEG_INFINITY {
            return;
        }
        let correction = (self.max - new_max).exp();
        self.sum *= correction;
        for a in self.acc.iter_mut() {
            *a *= correction;
        }
        for (score, col) in scores.iter().zip(cols) {
            let p = (score - new_max).exp();
            self.sum += p;
            for (a, v) in self.acc.iter_mut().zip(ops.v_row(bh, col)) {
                *a += p * v;
            }
        }
        self.max = new_max;
    }

    /// Combine two partial states covering disjoint key ranges.
    pub fn merge(&mut self, other: &RowState) {
        let new_max = self.max.max(other.max);
        if new_max == f32::NEG_INFINITY {
            return;
        }
        let left = (self.max - new_max).exp();
        let right = (other.max - new_max).exp();
        self.sum = self.sum * left + other.sum * right;
        for (a, b) in self.acc.iter_mut().zip(&other.acc) {
            *a = *a * left + b * right;
        }
        self.max = new_max;
    }

    /// Write the normalised output row.
    pub fn finish(&self, dst: &mut [f32]) {
        let inv = if self.sum > 0.0 { 1.0 / self.sum } else { 0.0 };
        for (o, a) in dst.iter_mut().zip(&self.acc) {
            *o = a * inv;
        }
    }

    /// Natural log of the softmax denominator, including the max shift.
    pub fn log_sum_exp(&self) -> f32 {
        self.max + self.sum.ln()
    }
}

fn to_host(tensor: &Tensor) -> Result<Vec<f32>, AttentionError> {
    Ok(tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?)
}

/// Upload a host result into `out`, preserving its dtype and device.
pub(crate) fn store(out: &Tensor, shape: &AttentionShape, data: Vec<f32>) -> Result<(), AttentionError> {
    let result = Tensor::from_vec(data, shape.dims().as_slice(), out.device())?.to_dtype(out.dtype())?;
    out.slice_set(&result, 0, 0)?;
    Ok(())
}
