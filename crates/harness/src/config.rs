use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use candle_core::{DType, Device};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::shape::ProblemShape;
use crate::tensors::RandomnessPolicy;
use crate::HarnessError;

/// Absolute tolerance for half-precision attention outputs.
pub const DEFAULT_ATOL: f32 = 1e-2;
pub const DEFAULT_WARMUP: usize = 2;
pub const DEFAULT_ITERS: usize = 10;
pub const DEFAULT_COOLDOWN_MS: u64 = 50;

/// Everything a sweep needs, passed explicitly to the runner and the sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub sweep: SweepConfig,
    pub randomness: RandomnessPolicy,
    pub warmup: usize,
    pub iters: usize,
    pub atol: f32,
    /// Certify every buffered variant against the reference output.
    pub check: bool,
    /// Print each variant's full output tensor after its report line.
    pub show_all: bool,
    /// Print sequence-axis slices of both tensors during certification.
    pub verbose: bool,
    pub seed: Option<u64>,
    pub precision: Precision,
    pub device: DeviceKind,
    pub cuda_ordinal: usize,
    /// Pause after each variant so clocks settle before the next one.
    pub cooldown_ms: u64,
    pub run_unfused: bool,
    pub run_sdpa: bool,
    /// Markdown file receiving the summary table.
    pub results_path: Option<PathBuf>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            sweep: SweepConfig::default(),
            randomness: RandomnessPolicy::default(),
            warmup: DEFAULT_WARMUP,
            iters: DEFAULT_ITERS,
            atol: DEFAULT_ATOL,
            check: false,
            show_all: false,
            verbose: false,
            seed: None,
            precision: Precision::F16,
            device: DeviceKind::Cpu,
            cuda_ordinal: 0,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            run_unfused: false,
            run_sdpa: false,
            results_path: None,
        }
    }
}

impl BenchConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, HarnessError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: BenchConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(HarnessError::ConfigFormat(format!(
                    "unsupported configuration extension '{}'",
                    other
                )));
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        let mut errors = self.sweep.validation_errors();

        if self.iters == 0 {
            errors.push("iters must be greater than 0".to_string());
        }
        if !(self.atol.is_finite() && self.atol > 0.0) {
            errors.push(format!("atol must be a positive finite number (got {})", self.atol));
        }

        if !errors.is_empty() {
            return Err(HarnessError::Validation(errors));
        }
        Ok(())
    }

    pub fn dtype(&self) -> DType {
        self.precision.dtype()
    }

    pub fn create_device(&self) -> Result<Device, HarnessError> {
        match self.device {
            DeviceKind::Cpu => Ok(Device::Cpu),
            DeviceKind::Cuda => Ok(Device::new_cuda(self.cuda_ordinal)?),
        }
    }
}

/// Independently configurable axis sets; the sweep is their Cartesian product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub batch: Vec<usize>,
    pub heads: Vec<usize>,
    pub seq_len: Vec<usize>,
    pub head_dim: Vec<usize>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            batch: vec![1, 2, 4],
            heads: vec![1, 4, 8],
            seq_len: vec![1024, 2048],
            head_dim: vec![64, 128],
        }
    }
}

impl SweepConfig {
    /// A sweep over exactly one shape.
    pub fn single(shape: ProblemShape) -> Self {
        Self {
            batch: vec![shape.batch],
            heads: vec![shape.heads],
            seq_len: vec![shape.seq_len],
            head_dim: vec![shape.head_dim],
        }
    }

    /// Enumerate shapes batch-major, then heads, sequence length, head dim.
    pub fn shapes(&self) -> Vec<ProblemShape> {
        let mut shapes = Vec::with_capacity(
            self.batch.len() * self.heads.len() * self.seq_len.len() * self.head_dim.len(),
        );
        for &batch in &self.batch {
            for &heads in &self.heads {
                for &seq_len in &self.seq_len {
                    for &head_dim in &self.head_dim {
                        shapes.push(ProblemShape::new(batch, heads, seq_len, head_dim));
                    }
                }
            }
        }
        shapes
    }

    fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for (name, values) in [
            ("batch", &self.batch),
            ("heads", &self.heads),
            ("seq_len", &self.seq_len),
            ("head_dim", &self.head_dim),
        ] {
            if values.is_empty() {
                errors.push(format!("sweep.{name} must not be empty"));
            }
            if values.contains(&0) {
                errors.push(format!("sweep.{name} entries must be greater than 0"));
            }
        }
        errors
    }
}

/// A `dotted.path=value` override applied on top of a loaded configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigOverride {
    path: Vec<String>,
    value: Value,
}

impl FromStr for ConfigOverride {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, value) = s
            .split_once('=')
            .ok_or_else(|| "override must be in the form key=value".to_string())?;
        let path: Vec<String> = path.trim().split('.').map(str::to_string).collect();
        if path.iter().any(|segment| segment.is_empty()) {
            return Err(format!("invalid override key '{s}'"));
        }
        Ok(Self {
            path,
            value: parse_override_value(value),
        })
    }
}

impl ConfigOverride {
    fn apply(&self, root: &mut Value) -> Result<(), HarnessError> {
        let mut current = root;
        for segment in &self.path {
            current = current
                .as_object_mut()
                .and_then(|map| map.get_mut(segment))
                .ok_or_else(|| {
                    HarnessError::ConfigFormat(format!(
                        "unknown configuration key '{}'",
                        self.path.join(".")
                    ))
                })?;
        }
        *current = self.value.clone();
        Ok(())
    }
}

impl BenchConfig {
    /// Apply overrides in order and re-validate.
    pub fn with_overrides(self, overrides: &[ConfigOverride]) -> Result<Self, HarnessError> {
        if overrides.is_empty() {
            return Ok(self);
        }
        let mut value = serde_json::to_value(&self)?;
        for entry in overrides {
            entry.apply(&mut value)?;
        }
        let config: BenchConfig = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }
}

fn parse_override_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    match trimmed {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if let Ok(int_val) = trimmed.parse::<i64>() {
        return Value::Number(Number::from(int_val));
    }
    if let Some(number) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(number);
    }
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        if let Ok(json_val) = serde_json::from_str::<Value>(trimmed) {
            return json_val;
        }
    }
    Value::String(trimmed.to_string())
}

/// Storage dtype of the generated tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    F16,
    Bf16,
    F32,
}

impl Precision {
    pub fn dtype(self) -> DType {
        match self {
            Precision::F16 => DType::F16,
            Precision::Bf16 => DType::BF16,
            Precision::F32 => DType::F32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    Cuda,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_sweep_is_the_full_grid() {
        let shapes = SweepConfig::default().shapes();
        assert_eq!(shapes.len(), 3 * 3 * 2 * 2);
        assert_eq!(shapes[0], ProblemShape::new(1, 1, 1024, 64));
        assert_eq!(shapes[1], ProblemShape::new(1, 1, 1024, 128));
        assert_eq!(shapes[2], ProblemShape::new(1, 1, 2048, 64));
        assert_eq!(*shapes.last().unwrap(), ProblemShape::new(4, 8, 2048, 128));
    }

    #[test]
    fn defaults_validate() {
        let config = BenchConfig::default();
        config.validate().unwrap();
        assert_eq!(config.atol, 1e-2);
        assert_eq!(config.dtype(), DType::F16);
    }

    #[test]
    fn validation_collects_every_problem() {
        let config = BenchConfig {
            iters: 0,
            atol: -1.0,
            sweep: SweepConfig {
                batch: vec![],
                head_dim: vec![0],
                ..SweepConfig::default()
            },
            ..BenchConfig::default()
        };
        match config.validate() {
            Err(HarnessError::Validation(errors)) => assert_eq!(errors.len(), 4),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn loads_partial_toml_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            "iters = 3\ncheck = true\nprecision = \"bf16\"\n\n[sweep]\nseq_len = [64]\n\n[randomness]\nno_rand_k = true\nrange_k = true"
        )
        .unwrap();

        let config = BenchConfig::from_path(&path).unwrap();
        assert_eq!(config.iters, 3);
        assert_eq!(config.warmup, DEFAULT_WARMUP);
        assert!(config.check);
        assert_eq!(config.precision, Precision::Bf16);
        assert_eq!(config.sweep.seq_len, vec![64]);
        assert_eq!(config.sweep.batch, vec![1, 2, 4]);
        assert!(config.randomness.no_rand_k && config.randomness.range_k);
    }

    #[test]
    fn loads_json_and_rejects_unknown_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("bench.json");
        fs::write(&json, r#"{"warmup": 0, "atol": 0.05}"#).unwrap();
        let config = BenchConfig::from_path(&json).unwrap();
        assert_eq!(config.warmup, 0);
        assert_eq!(config.atol, 0.05);

        let yaml = dir.path().join("bench.yaml");
        fs::write(&yaml, "iters: 1").unwrap();
        assert!(matches!(
            BenchConfig::from_path(&yaml),
            Err(HarnessError::ConfigFormat(_))
        ));
    }

    #[test]
    fn overrides_reach_nested_fields() {
        let overrides: Vec<ConfigOverride> = [
            "sweep.seq_len=[64, 128]",
            "randomness.no_rand_qkv=true",
            "seed=42",
            "precision=f32",
            "atol=0.05",
        ]
        .iter()
        .map(|raw| raw.parse().unwrap())
        .collect();
        let config = BenchConfig::default().with_overrides(&overrides).unwrap();
        assert_eq!(config.sweep.seq_len, vec![64, 128]);
        assert!(config.randomness.no_rand_qkv);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.precision, Precision::F32);
        assert_eq!(config.atol, 0.05);
    }

    #[test]
    fn overrides_reject_unknown_keys_and_bad_values() {
        let unknown: ConfigOverride = "sweep.depth=3".parse().unwrap();
        assert!(matches!(
            BenchConfig::default().with_overrides(&[unknown]),
            Err(HarnessError::ConfigFormat(_))
        ));
        let zero: ConfigOverride = "iters=0".parse().unwrap();
        assert!(matches!(
            BenchConfig::default().with_overrides(&[zero]),
            Err(HarnessError::Validation(_))
        ));
        assert!("iters".parse::<ConfigOverride>().is_err());
        assert!("sweep..batch=1".parse::<ConfigOverride>().is_err());
    }
}
