//! Drives every registered variant over the configured shape grid.

use candle_core::Device;

use crate::compare::Comparator;
use crate::config::BenchConfig;
use crate::registry::Registry;
use crate::report::{self, SummaryRow, SEPARATOR};
use crate::runner::{BenchmarkResult, BenchmarkRunner};
use crate::shape::ProblemShape;
use crate::tensors::TensorFactory;
use crate::HarnessError;

/// What survives a sweep once the per-shape outputs are dropped.
#[derive(Debug, Clone)]
pub struct SweepSummary {
    pub seed: u64,
    pub rows: Vec<SummaryRow>,
}

impl SweepSummary {
    /// False if any certified variant diverged from the reference.
    pub fn all_certified(&self) -> bool {
        self.rows.iter().all(|row| row.verdict != Some(false))
    }

    pub fn table(&self) -> String {
        report::summary_table(&self.rows)
    }
}

pub struct Sweep {
    config: BenchConfig,
    registry: Registry,
    runner: BenchmarkRunner,
    comparator: Comparator,
}

impl Sweep {
    /// Validate `config` and register the default lineup on `device`.
    pub fn new(config: BenchConfig, device: Device) -> Result<Self, HarnessError> {
        let registry = Registry::from_config(&config);
        Self::with_registry(config, device, registry)
    }

    pub fn with_registry(
        config: BenchConfig,
        device: Device,
        registry: Registry,
    ) -> Result<Self, HarnessError> {
        config.validate()?;
        Ok(Self {
            runner: BenchmarkRunner::new(device, &config),
            comparator: Comparator::from_config(&config),
            registry,
            config,
        })
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    pub fn run(&self) -> Result<SweepSummary, HarnessError> {
        let config = &self.config;
        let seed = config.seed.unwrap_or_else(|| fastrand::u64(..));
        if config.randomness.range_k && !config.randomness.ranged_key() {
            log::warn!("range_k has no effect while keys are random; pass no_rand_k as well");
        }

        let shapes = config.sweep.shapes();
        println!("{SEPARATOR}");
        println!(
            "attention sweep: {} shapes x {} variants, dtype={:?}, seed={seed}, warmup={}, iters={}",
            shapes.len(),
            self.registry.variants().len(),
            config.dtype(),
            config.warmup,
            config.iters
        );
        log::info!(
            "sweeping {} shapes on {:?} with seed {seed}",
            shapes.len(),
            self.runner.device()
        );

        let mut factory = TensorFactory::new(
            self.runner.device().clone(),
            config.dtype(),
            config.randomness,
            seed,
        );
        let mut rows = Vec::with_capacity(shapes.len() * self.registry.variants().len());
        for shape in &shapes {
            self.run_shape(&mut factory, shape, &mut rows)?;
        }

        let summary = SweepSummary { seed, rows };
        let table = summary.table();
        println!("{SEPARATOR}");
        println!("{table}");
        if let Some(path) = &config.results_path {
            report::update_results(path, "sweep", &table)?;
            log::info!("wrote sweep summary to {}", path.display());
        }
        Ok(summary)
    }

    fn run_shape(
        &self,
        factory: &mut TensorFactory,
        shape: &ProblemShape,
        rows: &mut Vec<SummaryRow>,
    ) -> Result<(), HarnessError> {
        let tensors = factory.generate(shape)?;
        println!("{SEPARATOR}");
        println!("{shape}");
        log::info!("running {shape}");

        let mut results: Vec<BenchmarkResult> = Vec::with_capacity(self.registry.variants().len());
        for variant in self.registry.variants() {
            let result = self.runner.run(variant, &tensors)?;
            println!("{}", report::format_report_line(&result)?);
            if self.config.show_all {
                println!("{}", result.output);
            }
            results.push(result);
        }

        let mut verdicts = vec![None; results.len()];
        if self.config.check {
            let reference = &results[self.registry.reference_index()];
            for (index, candidate) in results.iter().enumerate() {
                if !self.registry.is_certified(index) {
                    continue;
                }
                let verdict = self.comparator.certify_results(reference, candidate)?;
                println!("out_flash vs {}: {verdict}", candidate.tag);
                if !verdict {
                    log::warn!(
                        "{} diverges from {} beyond atol={} at {shape}",
                        candidate.tag,
                        reference.tag,
                        self.comparator.atol()
                    );
                }
                verdicts[index] = Some(verdict);
            }
        }

        rows.extend(
            results
                .iter()
                .zip(verdicts)
                .map(|(result, verdict)| SummaryRow::from_result(result, verdict)),
        );
        Ok(())
    }
}
