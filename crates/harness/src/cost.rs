//! Analytic cost model for one attention forward pass.
//!
//! The count follows an *unfused* safe-softmax: every intermediate (scores,
//! scaled scores, shifted scores, exponentials, probabilities) is charged as if
//! materialised. Fused kernels are scored against the same count.

use crate::shape::ProblemShape;

/// FLOPs charged for each step of the unfused algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlopBreakdown {
    pub qk_matmul: u64,
    pub scaling: u64,
    pub row_max: u64,
    pub subtract_max: u64,
    pub exp: u64,
    pub row_sum: u64,
    pub normalize: u64,
    pub pv_matmul: u64,
}

impl FlopBreakdown {
    /// A shape with a zero-sized axis costs 0 FLOPs.
    pub fn for_shape(shape: &ProblemShape) -> Self {
        if shape.dims().contains(&0) {
            return Self::default();
        }
        let b = shape.batch as u64;
        let h = shape.heads as u64;
        let n = shape.seq_len as u64;
        let d = shape.head_dim as u64;
        let rows = b * h * n;
        Self {
            qk_matmul: rows * n * (2 * d - 1),
            scaling: rows * n,
            row_max: rows * (n - 1),
            subtract_max: rows * n,
            exp: rows * n,
            row_sum: rows * (n - 1),
            normalize: rows * n,
            pv_matmul: rows * d * (2 * n - 1),
        }
    }

    pub fn safe_softmax(&self) -> u64 {
        self.row_max + self.subtract_max + self.exp + self.row_sum + self.normalize
    }

    pub fn total(&self) -> u64 {
        self.qk_matmul + self.scaling + self.safe_softmax() + self.pv_matmul
    }
}

/// Total FLOPs of one forward pass over `shape`.
pub fn attention_flops(shape: &ProblemShape) -> u64 {
    FlopBreakdown::for_shape(shape).total()
}

/// Throughput in TFLOP/s given the mean wall time of one pass in seconds.
pub fn tflops(shape: &ProblemShape, elapsed_secs: f64) -> f64 {
    attention_flops(shape) as f64 * 1e-12 / elapsed_secs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hand_computed_fixed_point() {
        let shape = ProblemShape::new(1, 1, 2, 1);
        let flops = FlopBreakdown::for_shape(&shape);
        assert_eq!(flops.qk_matmul, 4);
        assert_eq!(flops.scaling, 4);
        assert_eq!(flops.row_max, 2);
        assert_eq!(flops.subtract_max, 4);
        assert_eq!(flops.exp, 4);
        assert_eq!(flops.row_sum, 2);
        assert_eq!(flops.normalize, 4);
        assert_eq!(flops.pv_matmul, 6);
        assert_eq!(flops.total(), 30);
    }

    #[test]
    fn zero_sized_axes_cost_nothing() {
        for shape in [
            ProblemShape::new(1, 1, 0, 4),
            ProblemShape::new(1, 1, 4, 0),
            ProblemShape::new(0, 2, 8, 8),
        ] {
            assert_eq!(FlopBreakdown::for_shape(&shape), FlopBreakdown::default());
            assert_eq!(attention_flops(&shape), 0, "{shape}");
            assert_eq!(tflops(&shape, 1.0), 0.0);
        }
    }

    #[test]
    fn default_grid_shape_total() {
        let shape = ProblemShape::new(1, 1, 1024, 64);
        let n = 1024u64;
        let d = 64u64;
        let expected = n * n * (2 * d - 1) + 4 * n * n + 2 * n * (n - 1) + n * d * (2 * n - 1);
        assert_eq!(attention_flops(&shape), expected);
    }

    #[test]
    fn throughput_decreases_with_time() {
        let shape = ProblemShape::new(2, 4, 1024, 64);
        let mut previous = f64::INFINITY;
        for t in [1e-4, 1e-3, 1e-2, 1e-1, 1.0] {
            let current = tflops(&shape, t);
            assert!(current < previous);
            previous = current;
        }
    }

    #[test]
    fn throughput_is_linear_in_inverse_time() {
        let shape = ProblemShape::new(4, 8, 2048, 128);
        let base = tflops(&shape, 0.5);
        let half = tflops(&shape, 0.25);
        assert!((half / base - 2.0).abs() < 1e-12);
        assert!((tflops(&shape, 1.0) * 1e12 - attention_flops(&shape) as f64).abs() < 1.0);
    }
}
