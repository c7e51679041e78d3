//! Command-line arguments and their merge into [`BenchConfig`].

use crate::logging::LogFormat;
use crate::output::OutputFormat;
use anyhow::{Context, Result};
use clap::Parser;
use directgma::{BenchConfig, OrientationSet, TimingSource, TransferMode, WarmupPolicy};
use std::path::PathBuf;

/// Device API the benchmark drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// In-process simulated devices; no GPUs needed.
    #[default]
    Sim,
    /// System OpenCL runtime.
    OpenCl,
}

impl std::str::FromStr for Backend {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sim" | "simulated" => Ok(Self::Sim),
            "opencl" | "cl" => Ok(Self::OpenCl),
            other => Err(format!("unknown backend '{other}'. Expected one of: sim, opencl")),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sim => write!(f, "sim"),
            Self::OpenCl => write!(f, "opencl"),
        }
    }
}

/// DirectGMA - peer-to-peer GPU DMA throughput benchmark
#[derive(Debug, Parser)]
#[command(name = "directgma")]
#[command(about = "Measure peer-to-peer DMA throughput between two GPUs over bus-addressable memory")]
#[command(long_about = r#"
Copies a buffer from one GPU directly into a resident buffer on a second GPU,
repeats the copy, reports throughput and verifies the destination contents.

Examples:
  # Default size list, both orientations, on simulated devices
  directgma

  # Real hardware, 64 MiB only, JSON output
  directgma --backend opencl --sizes 67108864 --format json

  # Host-staged fallback through map/unmap
  directgma --mode map-unmap --timing wall-clock
"#)]
#[command(version)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "PATH", env = "DGMA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Device API (sim, opencl)
    #[arg(short, long, value_name = "BACKEND", default_value = "sim")]
    pub backend: Backend,

    /// Transfer mode (zero-copy, map-unmap, read-write)
    #[arg(short, long, value_name = "MODE")]
    pub mode: Option<TransferMode>,

    /// Timing source (device-events, wall-clock)
    #[arg(long, value_name = "SOURCE")]
    pub timing: Option<TimingSource>,

    /// Warm-up policy (auto, always, never)
    #[arg(long, value_name = "POLICY")]
    pub warmup: Option<WarmupPolicy>,

    /// Copies per trial
    #[arg(short = 'n', long, value_name = "N")]
    pub iterations: Option<u32>,

    /// Transfer sizes in bytes, comma separated
    #[arg(short, long, value_name = "BYTES", value_delimiter = ',')]
    pub sizes: Option<Vec<usize>>,

    /// Device orientations to run (forward, swapped, both)
    #[arg(short, long, value_name = "SET")]
    pub orientation: Option<OrientationSet>,

    /// Report format (text, json)
    #[arg(short, long, value_name = "FORMAT", default_value = "text")]
    pub format: OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Log format (pretty, compact, json)
    #[arg(long, value_name = "FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// Simulated copy bandwidth in GiB/s
    #[arg(long, value_name = "GIBPS")]
    pub sim_bandwidth_gibps: Option<f64>,
}

impl Cli {
    /// Defaults, then the config file, then `DGMA_*` variables, then flags.
    ///
    /// The merged result is validated once, so any layer may correct an
    /// earlier one.
    pub fn bench_config(&self) -> Result<BenchConfig> {
        let mut config = match &self.config {
            Some(path) => BenchConfig::layered(Some(path.as_path()))
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => BenchConfig::layered(None).context("failed to apply DGMA_* overrides")?,
        };

        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(timing) = self.timing {
            config.timing = Some(timing);
        }
        if let Some(warmup) = self.warmup {
            config.warmup = warmup;
        }
        if let Some(n) = self.iterations {
            config.iterations = Some(n);
        }
        if let Some(sizes) = &self.sizes {
            config.sizes = sizes.clone();
        }
        if let Some(set) = self.orientation {
            config.orientations = set;
        }

        config.validate().context("invalid benchmark configuration")?;
        Ok(config)
    }
}
