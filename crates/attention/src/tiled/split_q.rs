use candle_core::{DType, Tensor};

use super::{store, HostOperands, RowState};
use crate::core::shape::expect_dims;
use crate::core::{AttentionError, TileConfig};

/// Split-Q attention: each query tile streams all key/value blocks through one
/// running softmax state per row. Writes the result into `out`.
pub fn split_q(
    q: &Tensor,
    tk: &Tensor,
    v: &Tensor,
    out: &Tensor,
    stages: usize,
) -> Result<(), AttentionError> {
    let tiles = TileConfig::for_stages(stages)?;
    let ops = HostOperands::load(q, tk, v, out)?;
    log::trace!("split-q: {:?} with {:?}", ops.shape, tiles);
    let (output, _) = run(&ops, &tiles, false);
    store(out, &ops.shape, output)
}

/// Split-Q attention that additionally records the per-row log-sum-exp of the
/// scaled scores into `lse`, shaped `[batch, heads, seq_len, 1]` with dtype f32.
pub fn split_q_lse(
    q: &Tensor,
    tk: &Tensor,
    v: &Tensor,
    out: &Tensor,
    lse: &Tensor,
    stages: usize,
) -> Result<(), AttentionError> {
    let tiles = TileConfig::for_stages(stages)?;
    let ops = HostOperands::load(q, tk, v, out)?;
    let shape = ops.shape;
    expect_dims(lse, &[shape.batch, shape.num_heads, shape.seq_len, 1], "lse")?;
    if lse.dtype() != DType::F32 {
        return Err(AttentionError::UnsupportedDType {
            requested: format!("lse expects F32, got {:?}", lse.dtype()),
        });
    }
    let (output, lse_values) = run(&ops, &tiles, true);
    store(out, &shape, output)?;
    let lse_values = Tensor::from_vec(lse_values, lse.dims(), lse.device())?;
    lse.slice_set(&lse_values, 0, 0)?;
    Ok(())
}

fn run(ops: &HostOperands, tiles: &TileConfig, keep_lse: bool) -> (Vec<f32>, Vec<f32>) {
    let shape = &ops.shape;
    let (n, d) = (shape.seq_len, shape.head_dim);
    let scale = shape.softmax_scale();
    let mut output = vec![0f32; shape.elem_count()];
    let mut lse = Vec::with_capacity(if keep_lse { shape.slices() * n } else { 0 });
    let mut scores = Vec::with_capacity(tiles.kv_block);

    for bh in 0..shape.slices() {
        for q_start in (0..n).step_by(tiles.q_block) {
            let q_end = (q_start + tiles.q_block).min(n);
            let mut states = vec![RowState::new(d); q_end - q_start];
            for kv_start in (0..n).step_by(tiles.kv_block) {
                let kv_end = (kv_start + tiles.kv_block).min(n);
                for (offset, state) in states.iter_mut().enumerate() {
                    let q_row = ops.q_row(bh, q_start + offset);
                    state.absorb_block(ops, bh, q_row, kv_start..kv_end, scale, &mut scores);
                }
            }
            for (offset, state) in states.iter().enumerate() {
                let row = bh * n + q_start + offset;
                state.finish(&mut output[row * d..(row + 1) * d]);
                if keep_lse {
                    lse.push(state.log_sum_exp());
                }
            }
        }
    }
    (output, lse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn lse_matches_logsumexp_of_scores() -> candle_core::Result<()> {
        let device = Device::Cpu;
        let q = Tensor::randn(0f32, 1.0, (1, 2, 10, 8), &device)?;
        let k = Tensor::randn(0f32, 1.0, (1, 2, 10, 8), &device)?;
        let v = Tensor::randn(0f32, 1.0, (1, 2, 10, 8), &device)?;
        let tk = k.transpose(2, 3)?.contiguous()?;
        let out = Tensor::zeros((1, 2, 10, 8), DType::F32, &device)?;
        let lse = Tensor::zeros((1, 2, 10, 1), DType::F32, &device)?;
        split_q_lse(&q, &tk, &v, &out, &lse, 1).unwrap();

        let scale = 1.0 / 8f64.sqrt();
        let scores = (q.matmul(&tk)? * scale)?;
        let expected = scores
            .exp()?
            .sum_keepdim(candle_core::D::Minus1)?
            .log()?;
        let diff = lse
            .sub(&expected)?
            .abs()?
            .flatten_all()?
            .max(0)?
            .to_scalar::<f32>()?;
        assert!(diff < 1e-4, "lse diverged by {diff}");
        Ok(())
    }

    #[test]
    fn lse_buffer_must_be_f32() -> candle_core::Result<()> {
        let device = Device::Cpu;
        let q = Tensor::ones((1, 1, 4, 4), DType::F16, &device)?;
        let tk = Tensor::ones((1, 1, 4, 4), DType::F16, &device)?;
        let out = Tensor::zeros((1, 1, 4, 4), DType::F16, &device)?;
        let lse = Tensor::zeros((1, 1, 4, 1), DType::F16, &device)?;
        let err = split_q_lse(&q, &tk, &q, &out, &lse, 1).unwrap_err();
        assert!(matches!(err, AttentionError::UnsupportedDType { .. }));
        Ok(())
    }
}
