use candle_core::Tensor;

use super::{store, HostOperands, RowState};
use crate::core::{AttentionError, TileConfig};

/// Split-KV attention: the key/value range is cut into `kv_splits` contiguous
/// partitions, each reduced with its own softmax state, then merged.
/// Writes the result into `out`.
pub fn split_kv(
    q: &Tensor,
    tk: &Tensor,
    v: &Tensor,
    out: &Tensor,
    stages: usize,
) -> Result<(), AttentionError> {
    let tiles = TileConfig::for_stages(stages)?;
    let ops = HostOperands::load(q, tk, v, out)?;
    log::trace!("split-kv: {:?} with {:?}", ops.shape, tiles);
    let output = run(&ops, &tiles);
    store(out, &ops.shape, output)
}

fn run(ops: &HostOperands, tiles: &TileConfig) -> Vec<f32> {
    let shape = &ops.shape;
    let (n, d) = (shape.seq_len, shape.head_dim);
    let scale = shape.softmax_scale();
    let partition = n.div_ceil(tiles.kv_splits).max(1);
    let mut output = vec![0f32; shape.elem_count()];
    let mut scores = Vec::with_capacity(tiles.kv_block);

    for bh in 0..shape.slices() {
        for q_start in (0..n).step_by(tiles.q_block) {
            let q_end = (q_start + tiles.q_block).min(n);
            for row in q_start..q_end {
                let q_row = ops.q_row(bh, row);
                let mut merged = RowState::new(d);
                for split in 0..tiles.kv_splits {
                    let split_start = (split * partition).min(n);
                    let split_end = (split_start + partition).min(n);
                    let mut partial = RowState::new(d);
                    for kv_start in (split_start..split_end).step_by(tiles.kv_block) {
                        let kv_end = (kv_start + tiles.kv_block).min(split_end);
                        partial.absorb_block(ops, bh, q_row, kv_start..kv_end, scale, &mut scores);
                    }
                    merged.merge(&partial);
                }
                let dst = (bh * n + row) * d;
                merged.finish(&mut output[dst..dst + d]);
            }
        }
    }
    output
}
