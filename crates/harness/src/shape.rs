//! Problem shapes and the two axis conventions kernels disagree on.

use std::fmt;

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use crate::HarnessError;

/// Axis order of a 4-d attention tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisConvention {
    /// `[batch, heads, seq_len, head_dim]`, the primary layout.
    HeadsMajor,
    /// `[batch, seq_len, heads, head_dim]`, used by the reference kernel.
    SeqMajor,
}

impl AxisConvention {
    /// Index of the sequence axis.
    pub fn seq_axis(self) -> usize {
        match self {
            AxisConvention::HeadsMajor => 2,
            AxisConvention::SeqMajor => 1,
        }
    }

    /// Bring a tensor in this convention to [`AxisConvention::HeadsMajor`].
    /// The result is contiguous.
    pub fn to_heads_major(self, tensor: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            AxisConvention::HeadsMajor => Ok(tensor.clone()),
            AxisConvention::SeqMajor => tensor.transpose(1, 2)?.contiguous(),
        }
    }
}

/// `(batch, heads, seq_len, head_dim)` of one benchmark round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProblemShape {
    pub batch: usize,
    pub heads: usize,
    pub seq_len: usize,
    pub head_dim: usize,
}

impl ProblemShape {
    pub const fn new(batch: usize, heads: usize, seq_len: usize, head_dim: usize) -> Self {
        Self {
            batch,
            heads,
            seq_len,
            head_dim,
        }
    }

    /// Construct a shape, rejecting zero-sized axes.
    pub fn try_new(
        batch: usize,
        heads: usize,
        seq_len: usize,
        head_dim: usize,
    ) -> Result<Self, HarnessError> {
        let shape = Self::new(batch, heads, seq_len, head_dim);
        if shape.dims().contains(&0) {
            return Err(HarnessError::Validation(vec![format!(
                "problem shape {shape} has a zero-sized axis"
            )]));
        }
        Ok(shape)
    }

    /// Read the shape of `query`, interpreting its axes under `convention`.
    pub fn infer(query: &Tensor, convention: AxisConvention) -> Result<Self, HarnessError> {
        let (a, b, c, d) = query
            .dims4()
            .map_err(|_| HarnessError::ShapeMismatch(format!("expected a 4-d query, got {:?}", query.dims())))?;
        match convention {
            AxisConvention::HeadsMajor => Self::try_new(a, b, c, d),
            AxisConvention::SeqMajor => Self::try_new(a, c, b, d),
        }
    }

    /// Dims in `[batch, heads, seq_len, head_dim]` order.
    pub fn dims(&self) -> [usize; 4] {
        [self.batch, self.heads, self.seq_len, self.head_dim]
    }

    /// Dims under `convention`.
    pub fn dims_in(&self, convention: AxisConvention) -> [usize; 4] {
        match convention {
            AxisConvention::HeadsMajor => self.dims(),
            AxisConvention::SeqMajor => [self.batch, self.seq_len, self.heads, self.head_dim],
        }
    }
}

impl fmt::Display for ProblemShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "B={}, H={}, N={}, D={}",
            self.batch, self.heads, self.seq_len, self.head_dim
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn inference_respects_convention() {
        let t = Tensor::zeros((2, 128, 8, 64), DType::F16, &Device::Cpu).unwrap();
        let seq = ProblemShape::infer(&t, AxisConvention::SeqMajor).unwrap();
        assert_eq!(seq, ProblemShape::new(2, 8, 128, 64));
        let heads = ProblemShape::infer(&t, AxisConvention::HeadsMajor).unwrap();
        assert_eq!(heads, ProblemShape::new(2, 128, 8, 64));
    }

    #[test]
    fn zero_axes_rejected() {
        assert!(ProblemShape::try_new(1, 0, 16, 8).is_err());
        assert!(ProblemShape::try_new(1, 1, 16, 8).is_ok());
    }

    #[test]
    fn seq_major_round_trips_to_heads_major() -> candle_core::Result<()> {
        let data: Vec<f32> = (0..24).map(|i| i as f32).collect();
        let heads_major = Tensor::from_vec(data, (1, 2, 3, 4), &Device::Cpu)?;
        let seq_major = heads_major.transpose(1, 2)?.contiguous()?;
        let restored = AxisConvention::SeqMajor.to_heads_major(&seq_major)?;
        assert!(restored.is_contiguous());
        assert_eq!(
            restored.flatten_all()?.to_vec1::<f32>()?,
            heads_major.flatten_all()?.to_vec1::<f32>()?
        );
        Ok(())
    }
}
