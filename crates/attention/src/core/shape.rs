//! Logical attention shapes and the validation shared by every kernel.

use candle_core::{DType, Tensor};

use super::errors::AttentionError;

/// Logical description of attention tensor shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttentionShape {
    /// Batch size for the attention invocation.
    pub batch: usize,
    /// Number of heads processed in parallel.
    pub num_heads: usize,
    /// Sequence length (queries and keys) measured in tokens.
    pub seq_len: usize,
    /// Dimensionality per-head.
    pub head_dim: usize,
}

impl AttentionShape {
    /// Read `[batch, heads, seq_len, head_dim]` from a tensor.
    pub fn heads_major(tensor: &Tensor, name: &str) -> Result<Self, AttentionError> {
        let (batch, num_heads, seq_len, head_dim) = tensor.dims4().map_err(|_| {
            AttentionError::shape(format!(
                "{name} must have shape [batch, heads, seq_len, head_dim], got {:?}",
                tensor.dims()
            ))
        })?;
        Ok(Self {
            batch,
            num_heads,
            seq_len,
            head_dim,
        })
    }

    /// Read `[batch, seq_len, heads, head_dim]` from a tensor.
    pub fn seq_major(tensor: &Tensor, name: &str) -> Result<Self, AttentionError> {
        let (batch, seq_len, num_heads, head_dim) = tensor.dims4().map_err(|_| {
            AttentionError::shape(format!(
                "{name} must have shape [batch, seq_len, heads, head_dim], got {:?}",
                tensor.dims()
            ))
        })?;
        Ok(Self {
            batch,
            num_heads,
            seq_len,
            head_dim,
        })
    }

    /// Dims in `[batch, heads, seq_len, head_dim]` order.
    pub fn dims(&self) -> [usize; 4] {
        [self.batch, self.num_heads, self.seq_len, self.head_dim]
    }

    /// Dims of a key stored pre-transposed: `[batch, heads, head_dim, seq_len]`.
    pub fn transposed_key_dims(&self) -> [usize; 4] {
        [self.batch, self.num_heads, self.head_dim, self.seq_len]
    }

    /// Number of independent `(batch, head)` slices.
    pub fn slices(&self) -> usize {
        self.batch * self.num_heads
    }

    /// Total element count of a `[batch, heads, seq_len, head_dim]` tensor.
    pub fn elem_count(&self) -> usize {
        self.slices() * self.seq_len * self.head_dim
    }

    /// Softmax temperature `1 / sqrt(head_dim)`.
    pub fn softmax_scale(&self) -> f32 {
        1.0 / (self.head_dim as f32).sqrt()
    }
}

/// Ensure `tensor` has exactly `expected` dims.
pub fn expect_dims(tensor: &Tensor, expected: &[usize], name: &str) -> Result<(), AttentionError> {
    if tensor.dims() == expected {
        Ok(())
    } else {
        Err(AttentionError::shape(format!(
            "{name} shape mismatch: expected {expected:?} got {:?}",
            tensor.dims()
        )))
    }
}

/// Ensure all tensors share the dtype and device of `lead`, and that the dtype
/// is one of the floating point types the kernels accept.
pub fn expect_compatible(lead: &Tensor, others: &[(&Tensor, &str)]) -> Result<(), AttentionError> {
    let dtype = lead.dtype();
    if !matches!(dtype, DType::F32 | DType::F16 | DType::BF16) {
        return Err(AttentionError::UnsupportedDType {
            requested: format!("{dtype:?}"),
        });
    }
    for (tensor, name) in others {
        if tensor.dtype() != dtype {
            return Err(AttentionError::shape(format!(
                "{name} dtype {:?} does not match {dtype:?}",
                tensor.dtype()
            )));
        }
        if !lead.device().same_device(tensor.device()) {
            return Err(AttentionError::shape(format!(
                "{name} must reside on the same device as q"
            )));
        }
    }
    Ok(())
}
