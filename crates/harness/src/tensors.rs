//! Input generation for one benchmark round.

use candle_core::{DType, Device, Result as CandleResult, Tensor};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::shape::ProblemShape;
use crate::HarnessError;

/// Which inputs are replaced by deterministic values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomnessPolicy {
    pub no_rand_q: bool,
    pub no_rand_k: bool,
    pub no_rand_v: bool,
    pub no_rand_qkv: bool,
    /// With a non-random key, fill sequence position `i` with `(i + 1) / N`.
    pub range_k: bool,
}

impl RandomnessPolicy {
    /// Every input is all ones.
    pub fn deterministic() -> Self {
        Self {
            no_rand_qkv: true,
            ..Self::default()
        }
    }

    pub fn random_q(&self) -> bool {
        !(self.no_rand_q || self.no_rand_qkv)
    }

    pub fn random_k(&self) -> bool {
        !(self.no_rand_k || self.no_rand_qkv)
    }

    pub fn random_v(&self) -> bool {
        !(self.no_rand_v || self.no_rand_qkv)
    }

    /// Ranged keys only apply when key randomness is suppressed.
    pub fn ranged_key(&self) -> bool {
        self.range_k && !self.random_k()
    }
}

/// Inputs and buffers shared by every variant of one round.
///
/// All derived layouts are materialised contiguous. `out` and `lse` are the
/// only tensors kernels may write to.
#[derive(Debug, Clone)]
pub struct TensorSet {
    pub shape: ProblemShape,
    pub q: Tensor,
    pub k: Tensor,
    pub v: Tensor,
    /// Output buffer, shaped like `q`.
    pub out: Tensor,
    /// Key with its last two axes swapped: `[batch, heads, head_dim, seq_len]`.
    pub tk: Tensor,
    /// Seq-major copies: `[batch, seq_len, heads, head_dim]`.
    pub fq: Tensor,
    pub fk: Tensor,
    pub fv: Tensor,
    /// Auxiliary per-row buffer `[batch, heads, seq_len, 1]` in f32.
    pub lse: Tensor,
}

impl TensorSet {
    /// Zero the output buffer.
    pub fn reset_output(&self) -> CandleResult<()> {
        zero_fill(&self.out)
    }

    /// Zero the auxiliary buffer.
    pub fn reset_aux(&self) -> CandleResult<()> {
        zero_fill(&self.lse)
    }
}

/// Overwrite a contiguous tensor with zeros in place.
pub fn zero_fill(tensor: &Tensor) -> CandleResult<()> {
    tensor.slice_set(&tensor.zeros_like()?, 0, 0)
}

/// Builds a [`TensorSet`] per shape under a [`RandomnessPolicy`].
///
/// Normal samples are drawn on the host from a seeded [`StdRng`], so a given
/// seed reproduces the same inputs on every device.
pub struct TensorFactory {
    device: Device,
    dtype: DType,
    policy: RandomnessPolicy,
    rng: StdRng,
}

impl TensorFactory {
    pub fn new(device: Device, dtype: DType, policy: RandomnessPolicy, seed: u64) -> Self {
        Self {
            device,
            dtype,
            policy,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn generate(&mut self, shape: &ProblemShape) -> Result<TensorSet, HarnessError> {
        let dims = shape.dims();
        let q = if self.policy.random_q() {
            self.randn(dims)?
        } else {
            self.ones(dims)?
        };
        let k = if self.policy.random_k() {
            self.randn(dims)?
        } else if self.policy.ranged_key() {
            self.ranged_key(shape)?
        } else {
            self.ones(dims)?
        };
        let v = if self.policy.random_v() {
            self.randn(dims)?
        } else {
            self.ones(dims)?
        };

        let out = Tensor::zeros(dims.as_slice(), self.dtype, &self.device)?;
        let lse = Tensor::zeros(
            (shape.batch, shape.heads, shape.seq_len, 1),
            DType::F32,
            &self.device,
        )?;
        let tk = k.transpose(2, 3)?.contiguous()?;
        let fq = q.transpose(1, 2)?.contiguous()?;
        let fk = k.transpose(1, 2)?.contiguous()?;
        let fv = v.transpose(1, 2)?.contiguous()?;

        Ok(TensorSet {
            shape: *shape,
            q,
            k,
            v,
            out,
            tk,
            fq,
            fk,
            fv,
            lse,
        })
    }

    fn ones(&self, dims: [usize; 4]) -> CandleResult<Tensor> {
        Tensor::ones(dims.as_slice(), self.dtype, &self.device)
    }

    fn randn(&mut self, dims: [usize; 4]) -> CandleResult<Tensor> {
        let count: usize = dims.iter().product();
        let values: Vec<f32> = (0..count)
            .map(|_| self.rng.sample(StandardNormal))
            .collect();
        Tensor::from_vec(values, dims.as_slice(), &self.device)?.to_dtype(self.dtype)
    }

    fn ranged_key(&self, shape: &ProblemShape) -> CandleResult<Tensor> {
        let n = shape.seq_len;
        let positions: Vec<f32> = (0..n).map(|i| (i + 1) as f32 / n as f32).collect();
        Tensor::from_vec(positions, (1, 1, n, 1), &self.device)?
            .broadcast_as(shape.dims().as_slice())?
            .to_dtype(self.dtype)?
            .contiguous()
    }
}
