//! Tiling parameters shared by the tiled kernels.
//!
//! The `stages` argument accepted by [`split_kv`](crate::tiled::split_kv) and
//! [`split_q`](crate::tiled::split_q) selects how many key/value blocks are
//! consumed per pipeline step. [`TileConfig`] turns that knob into concrete
//! block sizes.

use super::errors::AttentionError;

/// Query rows processed together by one tile.
pub const Q_BLOCK: usize = 64;
/// Key/value columns consumed per stage.
pub const KV_BLOCK_PER_STAGE: usize = 32;
/// Number of independent key/value partitions reduced by the split-kv kernel.
pub const KV_SPLITS: usize = 4;
/// Deepest supported pipeline.
pub const MAX_STAGES: usize = 4;

/// Concrete block sizes derived from a stage count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileConfig {
    /// Number of query rows per tile.
    pub q_block: usize,
    /// Number of key/value positions per inner step.
    pub kv_block: usize,
    /// Number of partitions the key/value range is split into.
    pub kv_splits: usize,
    /// The stage count this configuration was derived from.
    pub stages: usize,
}

impl TileConfig {
    /// Resolve block sizes for `stages`, rejecting depths outside `1..=MAX_STAGES`.
    pub fn for_stages(stages: usize) -> Result<Self, AttentionError> {
        if stages == 0 || stages > MAX_STAGES {
            return Err(AttentionError::UnsupportedStages { stages });
        }
        Ok(Self {
            q_block: Q_BLOCK,
            kv_block: KV_BLOCK_PER_STAGE * stages,
            kv_splits: KV_SPLITS,
            stages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_block_grows_with_stages() {
        let one = TileConfig::for_stages(1).unwrap();
        let two = TileConfig::for_stages(2).unwrap();
        assert_eq!(one.kv_block, KV_BLOCK_PER_STAGE);
        assert_eq!(two.kv_block, 2 * KV_BLOCK_PER_STAGE);
        assert_eq!(one.q_block, two.q_block);
    }

    #[test]
    fn out_of_range_stages_rejected() {
        assert!(matches!(
            TileConfig::for_stages(0),
            Err(AttentionError::UnsupportedStages { stages: 0 })
        ));
        assert!(TileConfig::for_stages(MAX_STAGES + 1).is_err());
    }
}
