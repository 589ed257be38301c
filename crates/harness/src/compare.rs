//! Numerical agreement between a reference output and a candidate.
//!
//! Agreement is absolute-tolerance only: `|a - b| <= atol` for every element
//! after both sides are promoted to f32. There is no relative term.

use candle_core::{DType, Tensor};

use crate::config::BenchConfig;
use crate::report::SEPARATOR;
use crate::runner::BenchmarkResult;
use crate::shape::AxisConvention;
use crate::HarnessError;

/// Positions shown per verbose chunk.
const CHUNK: usize = 8;
/// Verbose output stops after this many chunks.
const MAX_CHUNKS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparator {
    atol: f32,
    verbose: bool,
}

impl Comparator {
    pub fn new(atol: f32, verbose: bool) -> Self {
        Self { atol, verbose }
    }

    pub fn from_config(config: &BenchConfig) -> Self {
        Self::new(config.atol, config.verbose)
    }

    pub fn atol(&self) -> f32 {
        self.atol
    }

    /// Certify `candidate` (heads-major) against `reference` laid out in
    /// `reference_convention`. Verbose dumps never influence the verdict.
    pub fn certify(
        &self,
        reference: &Tensor,
        reference_convention: AxisConvention,
        candidate: &Tensor,
        candidate_tag: &str,
    ) -> Result<bool, HarnessError> {
        let reference = reference_convention.to_heads_major(reference)?;
        if reference.dims() != candidate.dims() {
            return Err(HarnessError::ShapeMismatch(format!(
                "reference {:?} vs {candidate_tag} {:?}",
                reference.dims(),
                candidate.dims()
            )));
        }
        let reference = reference.to_dtype(DType::F32)?;
        let candidate = candidate.to_dtype(DType::F32)?;
        if self.verbose {
            dump_chunks(&reference, &candidate, candidate_tag)?;
        }
        all_close(&reference, &candidate, self.atol)
    }

    /// Certify two benchmark results, reconciling both axis conventions.
    pub fn certify_results(
        &self,
        reference: &BenchmarkResult,
        candidate: &BenchmarkResult,
    ) -> Result<bool, HarnessError> {
        let candidate_output = candidate.convention.to_heads_major(&candidate.output)?;
        self.certify(
            &reference.output,
            reference.convention,
            &candidate_output,
            &candidate.tag,
        )
    }
}

/// True iff every element pair differs by at most `atol`. NaNs never pass.
pub fn all_close(a: &Tensor, b: &Tensor, atol: f32) -> Result<bool, HarnessError> {
    let diff = a
        .to_dtype(DType::F32)?
        .sub(&b.to_dtype(DType::F32)?)?
        .abs()?
        .flatten_all()?
        .to_vec1::<f32>()?;
    Ok(diff.iter().all(|d| *d <= atol))
}

fn dump_chunks(reference: &Tensor, candidate: &Tensor, tag: &str) -> Result<(), HarnessError> {
    let seq_len = reference.dim(2)?;
    for chunk in 0..(seq_len / CHUNK).min(MAX_CHUNKS) {
        let (start, end) = (chunk * CHUNK, (chunk + 1) * CHUNK);
        println!("{SEPARATOR}");
        println!("reference[:, :, {start}:{end}, :]:\n");
        println!("{}", reference.narrow(2, start, CHUNK)?);
        println!("{tag}[:, :, {start}:{end}, :]:\n");
        println!("{}", candidate.narrow(2, start, CHUNK)?);
    }
    println!("{SEPARATOR}");
    Ok(())
}
