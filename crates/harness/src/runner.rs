//! Warmup / timed-loop protocol for a single kernel variant.
//!
//! The timed region is bounded by two device barriers: everything queued
//! during warmup retires before the start timestamp, and everything queued by
//! the timed loop retires before the end timestamp. Iterations inside the loop
//! are issued back to back with no intermediate barrier, so the figure is
//! sustained throughput rather than single-call latency.

use std::time::{Duration, Instant};

use candle_core::{Device, Tensor};

use crate::config::BenchConfig;
use crate::cost;
use crate::invoke::KernelVariant;
use crate::shape::{AxisConvention, ProblemShape};
use crate::tensors::TensorSet;
use crate::HarnessError;

/// Smallest elapsed time credited to a timed loop.
const TIMER_RESOLUTION_SECS: f64 = 1e-9;

/// Measurement of one variant on one shape.
#[derive(Debug, Clone)]
pub struct BenchmarkResult {
    pub tag: String,
    pub shape: ProblemShape,
    /// Deep copy of the final output, in the variant's axis convention.
    pub output: Tensor,
    pub convention: AxisConvention,
    pub mean_ms: f64,
    pub tflops: f64,
}

impl BenchmarkResult {
    pub fn mean_secs(&self) -> f64 {
        self.mean_ms / 1e3
    }
}

pub struct BenchmarkRunner {
    device: Device,
    warmup: usize,
    iters: usize,
    cooldown: Duration,
}

impl BenchmarkRunner {
    pub fn new(device: Device, config: &BenchConfig) -> Self {
        Self {
            device,
            warmup: config.warmup,
            iters: config.iters,
            cooldown: Duration::from_millis(config.cooldown_ms),
        }
    }

    /// Runner with explicit counts and no cooldown.
    pub fn with_counts(device: Device, warmup: usize, iters: usize) -> Self {
        Self {
            device,
            warmup,
            iters,
            cooldown: Duration::ZERO,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn run(
        &self,
        variant: &KernelVariant,
        tensors: &TensorSet,
    ) -> Result<BenchmarkResult, HarnessError> {
        if self.iters == 0 {
            return Err(HarnessError::Validation(vec![
                "iters must be greater than 0".to_string(),
            ]));
        }
        let tag = variant.tag();
        let kernel = variant.kernel();
        if kernel.uses_output_buffer() {
            tensors.reset_output()?;
        }
        if kernel.uses_aux_buffer() {
            tensors.reset_aux()?;
        }

        for _ in 0..self.warmup {
            variant
                .invoke(tensors)
                .map_err(|err| HarnessError::kernel(tag, err))?;
        }

        self.synchronize()?;
        let start = Instant::now();
        let mut returned = None;
        for _ in 0..self.iters {
            let output = variant
                .invoke(tensors)
                .map_err(|err| HarnessError::kernel(tag, err))?;
            if output.is_some() {
                returned = output;
            }
        }
        self.synchronize()?;
        let elapsed = start.elapsed();

        let mean_secs = elapsed.as_secs_f64().max(TIMER_RESOLUTION_SECS) / self.iters as f64;
        let (query, _, _) = variant.layout().select(tensors);
        let convention = variant.convention();
        let shape = ProblemShape::infer(query, convention)?;
        let tflops = cost::tflops(&shape, mean_secs);

        let output = match returned {
            Some(tensor) => tensor.copy()?,
            None if kernel.uses_output_buffer() => tensors.out.copy()?,
            None => {
                return Err(HarnessError::kernel(
                    tag,
                    anyhow::anyhow!("functional kernel produced no output"),
                ))
            }
        };

        log::debug!(
            "{tag}: {shape} iters={} elapsed={:?} mean={:.6}ms tflops={:.3}",
            self.iters,
            elapsed,
            mean_secs * 1e3,
            tflops
        );

        if !self.cooldown.is_zero() {
            std::thread::sleep(self.cooldown);
            self.synchronize()?;
        }

        Ok(BenchmarkResult {
            tag: tag.to_string(),
            shape,
            output,
            convention,
            mean_ms: mean_secs * 1e3,
            tflops,
        })
    }

    fn synchronize(&self) -> Result<(), HarnessError> {
        self.device.synchronize().map_err(HarnessError::Synchronize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoke::InputLayout;
    use crate::tensors::{zero_fill, RandomnessPolicy, TensorFactory};
    use candle_core::DType;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn tensors(shape: ProblemShape) -> TensorSet {
        TensorFactory::new(Device::Cpu, DType::F32, RandomnessPolicy::default(), 11)
            .generate(&shape)
            .unwrap()
    }

    fn values(tensor: &Tensor) -> Vec<f32> {
        tensor.flatten_all().unwrap().to_vec1::<f32>().unwrap()
    }

    fn copy_query() -> KernelVariant {
        KernelVariant::buffered("copy", InputLayout::HeadsMajor, |q, _, _, out| {
            attention::write_into(out, q)?;
            Ok(())
        })
    }

    #[test]
    fn invocation_count_is_warmup_plus_iters() {
        let calls = Rc::new(Cell::new(0usize));
        let counter = calls.clone();
        let variant = KernelVariant::functional("count", InputLayout::HeadsMajor, move |q, _, _| {
            counter.set(counter.get() + 1);
            Ok(q.clone())
        });
        let runner = BenchmarkRunner::with_counts(Device::Cpu, 3, 7);
        runner.run(&variant, &tensors(ProblemShape::new(1, 1, 4, 4))).unwrap();
        assert_eq!(calls.get(), 10);
    }

    #[test]
    fn output_buffer_is_zeroed_before_first_invocation() {
        let set = tensors(ProblemShape::new(1, 2, 4, 4));
        set.out.slice_set(&set.q, 0, 0).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let record = seen.clone();
        let variant = KernelVariant::buffered("probe", InputLayout::HeadsMajor, move |q, _, _, out| {
            record.borrow_mut().push(values(out));
            attention::write_into(out, q)?;
            Ok(())
        });
        BenchmarkRunner::with_counts(Device::Cpu, 1, 2)
            .run(&variant, &set)
            .unwrap();
        let seen = seen.borrow();
        assert_eq!(seen.len(), 3);
        assert!(seen[0].iter().all(|&x| x == 0.0));
    }

    #[test]
    fn aux_buffer_is_zeroed_for_aux_variants() {
        let set = tensors(ProblemShape::new(1, 1, 4, 4));
        let ones = set.lse.ones_like().unwrap();
        set.lse.slice_set(&ones, 0, 0).unwrap();
        let variant = KernelVariant::staged_with_aux(
            "aux",
            InputLayout::HeadsMajorKeyTransposed,
            1,
            |_, _, _, _, aux, _| {
                anyhow::ensure!(values(aux).iter().all(|&x| x == 0.0), "stale aux buffer");
                Ok(())
            },
        );
        BenchmarkRunner::with_counts(Device::Cpu, 0, 1)
            .run(&variant, &set)
            .unwrap();
    }

    #[test]
    fn repeated_runs_are_bit_identical_and_not_aliased() {
        let set = tensors(ProblemShape::new(2, 2, 8, 4));
        let runner = BenchmarkRunner::with_counts(Device::Cpu, 1, 3);
        let variant = copy_query();
        let first = runner.run(&variant, &set).unwrap();
        let second = runner.run(&variant, &set).unwrap();
        assert_eq!(values(&first.output), values(&second.output));

        zero_fill(&set.out).unwrap();
        assert_eq!(values(&first.output), values(&set.q));
    }

    #[test]
    fn timing_feeds_the_cost_model() {
        let set = tensors(ProblemShape::new(1, 2, 8, 4));
        let result = BenchmarkRunner::with_counts(Device::Cpu, 0, 4)
            .run(&copy_query(), &set)
            .unwrap();
        assert!(result.mean_ms > 0.0);
        assert!(result.tflops.is_finite() && result.tflops > 0.0);
        let expected = cost::tflops(&result.shape, result.mean_secs());
        assert!((result.tflops - expected).abs() <= expected * 1e-9);
    }

    #[test]
    fn seq_major_variants_report_heads_major_shape() {
        let set = tensors(ProblemShape::new(1, 3, 16, 4));
        let variant = KernelVariant::functional("seq", InputLayout::SeqMajor, |q, _, _| Ok(q.clone()));
        let result = BenchmarkRunner::with_counts(Device::Cpu, 0, 1)
            .run(&variant, &set)
            .unwrap();
        assert_eq!(result.shape, ProblemShape::new(1, 3, 16, 4));
        assert_eq!(result.convention, AxisConvention::SeqMajor);
        assert_eq!(result.output.dims(), &[1, 16, 3, 4]);
    }

    #[test]
    fn kernel_failures_carry_the_tag() {
        let set = tensors(ProblemShape::new(1, 1, 4, 4));
        let variant = KernelVariant::staged("bad", InputLayout::HeadsMajorKeyTransposed, 9, |q, k, v, out, stages| {
            attention::split_q(q, k, v, out, stages)?;
            Ok(())
        });
        let err = BenchmarkRunner::with_counts(Device::Cpu, 0, 1)
            .run(&variant, &set)
            .unwrap_err();
        match err {
            HarnessError::Kernel { tag, .. } => assert_eq!(tag, "bad"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn zero_iterations_rejected() {
        let set = tensors(ProblemShape::new(1, 1, 4, 4));
        let err = BenchmarkRunner::with_counts(Device::Cpu, 0, 0)
            .run(&copy_query(), &set)
            .unwrap_err();
        assert!(matches!(err, HarnessError::Validation(_)));
    }
}
