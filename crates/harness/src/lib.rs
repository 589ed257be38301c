//! Benchmark and cross-validation engine for attention kernels.
//!
//! For every shape of a sweep the [`tensors::TensorFactory`] builds one
//! [`tensors::TensorSet`], the [`runner::BenchmarkRunner`] times each
//! registered [`invoke::KernelVariant`] between device barriers, the
//! [`cost`] model turns the mean latency into TFLOP/s and the
//! [`compare::Comparator`] certifies buffered variants against the reference
//! output.

pub mod compare;
pub mod config;
pub mod cost;
pub mod error;
pub mod invoke;
pub mod registry;
pub mod report;
pub mod runner;
pub mod shape;
pub mod sweep;
pub mod tensors;

pub use compare::Comparator;
pub use config::{BenchConfig, ConfigOverride, DeviceKind, Precision, SweepConfig};
pub use cost::{attention_flops, tflops, FlopBreakdown};
pub use error::HarnessError;
pub use invoke::{InputLayout, Kernel, KernelVariant};
pub use registry::Registry;
pub use runner::{BenchmarkResult, BenchmarkRunner};
pub use shape::{AxisConvention, ProblemShape};
pub use sweep::{Sweep, SweepSummary};
pub use tensors::{RandomnessPolicy, TensorFactory, TensorSet};
