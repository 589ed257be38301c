use std::path::PathBuf;

use clap::Parser;
use harness::{BenchConfig, ConfigOverride, DeviceKind, HarnessError, Precision, Sweep};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run() {
        eprintln!("attention benchmark failed: {err}");
        std::process::exit(1);
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Benchmark and cross-check attention kernels", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "PATH", help = "Benchmark config file (TOML or JSON)")]
    config: Option<PathBuf>,

    #[arg(
        long = "override",
        value_name = "KEY=VALUE",
        help = "Override a configuration value using a dot-separated path"
    )]
    overrides: Vec<ConfigOverride>,

    #[arg(long = "no-rand-q", visible_alias = "no-rq", help = "Fill q with ones")]
    no_rand_q: bool,

    #[arg(long = "no-rand-k", visible_alias = "no-rk", help = "Fill k with ones")]
    no_rand_k: bool,

    #[arg(long = "no-rand-v", visible_alias = "no-rv", help = "Fill v with ones")]
    no_rand_v: bool,

    #[arg(long = "no-rand-qkv", visible_alias = "no-rqkv", help = "Fill q, k and v with ones")]
    no_rand_qkv: bool,

    #[arg(
        long = "range-k",
        visible_alias = "gk",
        help = "With a non-random key, set position i to (i + 1) / N"
    )]
    range_k: bool,

    #[arg(long = "run-torch-unfused", visible_alias = "torch", help = "Also time the unfused baseline")]
    run_unfused: bool,

    #[arg(long = "run-torch-sdpa", visible_alias = "sdpa", help = "Also time the fused exact baseline")]
    run_sdpa: bool,

    #[arg(long, help = "Certify buffered kernels against the reference output")]
    check: bool,

    #[arg(long = "show-all", visible_alias = "show", help = "Print every output tensor")]
    show_all: bool,

    #[arg(long, visible_alias = "v", help = "Print sequence chunks while certifying")]
    verbose: bool,

    #[arg(long = "B", value_name = "BATCH", help = "Run a single batch size")]
    batch: Option<usize>,

    #[arg(long = "H", value_name = "HEADS", help = "Run a single head count")]
    heads: Option<usize>,

    #[arg(long = "N", value_name = "SEQ_LEN", help = "Run a single sequence length")]
    seq_len: Option<usize>,

    #[arg(long = "D", value_name = "HEAD_DIM", help = "Run a single head dimension")]
    head_dim: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    warmup: Option<usize>,

    #[arg(long)]
    iters: Option<usize>,

    #[arg(long, value_enum)]
    precision: Option<Precision>,

    #[arg(long, value_enum)]
    device: Option<DeviceKind>,

    #[arg(long = "results", value_name = "PATH", help = "Markdown file receiving the summary table")]
    results_path: Option<PathBuf>,
}

impl Args {
    /// Command-line flags win over file values.
    fn apply(&self, mut config: BenchConfig) -> BenchConfig {
        let randomness = &mut config.randomness;
        randomness.no_rand_q |= self.no_rand_q;
        randomness.no_rand_k |= self.no_rand_k;
        randomness.no_rand_v |= self.no_rand_v;
        randomness.no_rand_qkv |= self.no_rand_qkv;
        randomness.range_k |= self.range_k;

        config.run_unfused |= self.run_unfused;
        config.run_sdpa |= self.run_sdpa;
        config.check |= self.check;
        config.show_all |= self.show_all;
        config.verbose |= self.verbose;

        let sweep = &mut config.sweep;
        for (axis, value) in [
            (&mut sweep.batch, self.batch),
            (&mut sweep.heads, self.heads),
            (&mut sweep.seq_len, self.seq_len),
            (&mut sweep.head_dim, self.head_dim),
        ] {
            if let Some(value) = value {
                *axis = vec![value];
            }
        }

        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if let Some(warmup) = self.warmup {
            config.warmup = warmup;
        }
        if let Some(iters) = self.iters {
            config.iters = iters;
        }
        if let Some(precision) = self.precision {
            config.precision = precision;
        }
        if let Some(device) = self.device {
            config.device = device;
        }
        if self.results_path.is_some() {
            config.results_path = self.results_path.clone();
        }
        config
    }
}

/// File values, then `--override` entries, then dedicated flags.
fn resolve_config(args: &Args) -> Result<BenchConfig, HarnessError> {
    let config = match &args.config {
        Some(path) => BenchConfig::from_path(path)?,
        None => BenchConfig::default(),
    };
    Ok(args.apply(config.with_overrides(&args.overrides)?))
}

fn run() -> Result<(), HarnessError> {
    let args = Args::parse();
    let config = resolve_config(&args)?;

    let device = config.create_device()?;
    let summary = Sweep::new(config, device)?.run()?;
    if !summary.all_certified() {
        log::warn!("at least one kernel diverged from the reference (seed {})", summary.seed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn resolve(argv: &[&str]) -> BenchConfig {
        let args = Args::try_parse_from(std::iter::once("attn-bench").chain(argv.iter().copied()))
            .unwrap();
        resolve_config(&args).unwrap()
    }

    #[test]
    fn no_flags_yields_defaults() {
        assert_eq!(resolve(&[]), BenchConfig::default());
    }

    #[test]
    fn boolean_flags_are_or_ed_with_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.toml");
        fs::write(&path, "check = true\n\n[randomness]\nno_rand_k = true\n").unwrap();

        let config = resolve(&["--config", path.to_str().unwrap(), "--no-rq", "--gk", "--torch"]);
        assert!(config.check);
        assert!(config.randomness.no_rand_k);
        assert!(config.randomness.no_rand_q);
        assert!(config.randomness.range_k);
        assert!(config.run_unfused);
        assert!(!config.run_sdpa);
        assert!(!config.show_all);
    }

    #[test]
    fn shape_flags_replace_whole_axes() {
        let config = resolve(&["--B", "2", "--N", "64"]);
        assert_eq!(config.sweep.batch, vec![2]);
        assert_eq!(config.sweep.seq_len, vec![64]);
        assert_eq!(config.sweep.heads, vec![1, 4, 8]);
        assert_eq!(config.sweep.head_dim, vec![64, 128]);
    }

    #[test]
    fn dedicated_flags_win_over_overrides() {
        let config = resolve(&[
            "--override",
            "seed=1",
            "--override",
            "sweep.head_dim=[32]",
            "--seed",
            "9",
            "--D",
            "16",
            "--precision",
            "f32",
        ]);
        assert_eq!(config.seed, Some(9));
        assert_eq!(config.sweep.head_dim, vec![16]);
        assert_eq!(config.precision, Precision::F32);
    }

    #[test]
    fn aliases_match_long_names() {
        let long = resolve(&["--show-all", "--verbose", "--run-torch-sdpa", "--no-rand-qkv"]);
        let short = resolve(&["--show", "--v", "--sdpa", "--no-rqkv"]);
        assert_eq!(long, short);
        assert!(long.show_all && long.verbose && long.run_sdpa && long.randomness.no_rand_qkv);
    }
}
