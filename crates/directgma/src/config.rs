//! Benchmark configuration.
//!
//! Loads [`BenchConfig`] from a TOML file with environment variable overrides
//! via `DGMA_*` prefixed variables, then validates it. [`BenchConfig::layered`]
//! stops before validation so callers can apply further overrides first.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Target vendor string matched against each platform's vendor.
pub const AMD_VENDOR: &str = "Advanced Micro Devices, Inc.";
/// Device extension that exposes bus-addressable memory.
pub const BUS_ADDRESSABLE_EXTENSION: &str = "cl_amd_bus_addressable_memory";

/// Iteration count used by the zero-copy path when none is configured.
pub const ZERO_COPY_ITERATIONS: u32 = 5000;
/// Iteration count used by the host-staged paths when none is configured.
pub const HOST_STAGED_ITERATIONS: u32 = 500;

/// Transfer sizes in bytes, in the order they are measured.
pub const DEFAULT_SIZES: [usize; 9] = [
    192 * 2048 * 2,
    256 * 2048 * 2,
    192 * 4096 * 2,
    256 * 4096 * 2,
    192 * 2048 * 2 * 7,
    256 * 2048 * 2 * 7,
    192 * 4096 * 2 * 7,
    256 * 4096 * 2 * 7,
    64 * 1024 * 1024,
];

/// How bytes move from the source device to the destination device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferMode {
    /// Device-to-device copy into an alias of the peer's resident buffer.
    ZeroCopy,
    /// Map both buffers into host memory and copy between the mappings.
    MapUnmap,
    /// Blocking read into a host buffer, then blocking write from it.
    ReadWrite,
}

impl TransferMode {
    pub fn is_zero_copy(self) -> bool {
        matches!(self, Self::ZeroCopy)
    }

    /// Timing source used when the configuration does not set one. Only the
    /// zero-copy path produces device events.
    pub fn default_timing(self) -> TimingSource {
        if self.is_zero_copy() { TimingSource::DeviceEvents } else { TimingSource::WallClock }
    }

    /// Iteration count used when the configuration does not set one.
    pub fn default_iterations(self) -> u32 {
        if self.is_zero_copy() { ZERO_COPY_ITERATIONS } else { HOST_STAGED_ITERATIONS }
    }
}

impl std::fmt::Display for TransferMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroCopy => write!(f, "zero-copy"),
            Self::MapUnmap => write!(f, "map-unmap"),
            Self::ReadWrite => write!(f, "read-write"),
        }
    }
}

impl std::str::FromStr for TransferMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "zero-copy" | "zerocopy" | "direct" => Ok(Self::ZeroCopy),
            "map-unmap" | "map" => Ok(Self::MapUnmap),
            "read-write" | "readwrite" => Ok(Self::ReadWrite),
            other => Err(format!("unknown transfer mode: {other}")),
        }
    }
}

/// Where elapsed transfer time comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimingSource {
    /// Sum of per-copy device start/end timestamps. Zero-copy only.
    DeviceEvents,
    /// Monotonic host clock spanning all iterations and the final finish.
    WallClock,
}

impl std::fmt::Display for TimingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeviceEvents => write!(f, "device-events"),
            Self::WallClock => write!(f, "wall-clock"),
        }
    }
}

impl std::str::FromStr for TimingSource {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "device-events" | "events" => Ok(Self::DeviceEvents),
            "wall-clock" | "wallclock" | "host" => Ok(Self::WallClock),
            other => Err(format!("unknown timing source: {other}")),
        }
    }
}

/// Whether one unmeasured copy runs after setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarmupPolicy {
    /// Warm up in zero-copy mode only.
    #[default]
    Auto,
    Always,
    Never,
}

impl WarmupPolicy {
    pub fn applies_to(self, mode: TransferMode) -> bool {
        match self {
            Self::Auto => mode.is_zero_copy(),
            Self::Always => true,
            Self::Never => false,
        }
    }
}

impl std::fmt::Display for WarmupPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Always => write!(f, "always"),
            Self::Never => write!(f, "never"),
        }
    }
}

impl std::str::FromStr for WarmupPolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "always" | "on" => Ok(Self::Always),
            "never" | "off" => Ok(Self::Never),
            other => Err(format!("unknown warmup policy: {other}")),
        }
    }
}

/// Device roles for one trial.
///
/// `Forward` keeps the enumeration order: device 0 is the destination and
/// device 1 the source. `Swapped` exchanges the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Forward,
    Swapped,
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forward => write!(f, "forward"),
            Self::Swapped => write!(f, "swapped"),
        }
    }
}

/// Which orientations a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrientationSet {
    Forward,
    Swapped,
    #[default]
    Both,
}

impl OrientationSet {
    /// Orientations in run order.
    pub fn orientations(self) -> &'static [Orientation] {
        match self {
            Self::Forward => &[Orientation::Forward],
            Self::Swapped => &[Orientation::Swapped],
            Self::Both => &[Orientation::Forward, Orientation::Swapped],
        }
    }
}

impl std::fmt::Display for OrientationSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forward => write!(f, "forward"),
            Self::Swapped => write!(f, "swapped"),
            Self::Both => write!(f, "both"),
        }
    }
}

impl std::str::FromStr for OrientationSet {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "forward" => Ok(Self::Forward),
            "swapped" | "reverse" => Ok(Self::Swapped),
            "both" => Ok(Self::Both),
            other => Err(format!("unknown orientation set: {other}")),
        }
    }
}

/// Benchmark configuration loaded from TOML with environment variable overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Platform vendor string to select.
    /// Override: `DGMA_VENDOR`
    pub vendor: String,

    /// Device extension both devices must advertise in zero-copy mode.
    /// Override: `DGMA_EXTENSION`
    pub extension: String,

    /// Override: `DGMA_MODE`
    pub mode: TransferMode,

    /// Timing source; the mode default applies when unset.
    /// Override: `DGMA_TIMING`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<TimingSource>,

    /// Override: `DGMA_WARMUP`
    pub warmup: WarmupPolicy,

    /// Copies per trial; the mode default applies when unset.
    /// Override: `DGMA_ITERATIONS`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,

    /// Transfer sizes in bytes.
    /// Override: `DGMA_SIZES` (comma separated)
    pub sizes: Vec<usize>,

    /// Override: `DGMA_ORIENTATIONS`
    pub orientations: OrientationSet,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            vendor: AMD_VENDOR.to_string(),
            extension: BUS_ADDRESSABLE_EXTENSION.to_string(),
            mode: TransferMode::ZeroCopy,
            timing: None,
            warmup: WarmupPolicy::Auto,
            iterations: None,
            sizes: DEFAULT_SIZES.to_vec(),
            orientations: OrientationSet::Both,
        }
    }
}

/// Errors that can occur when loading or validating a [`BenchConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid environment override {key}={value}: {reason}")]
    EnvOverride { key: String, value: String, reason: String },
}

impl BenchConfig {
    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load from a TOML string, then apply environment overrides.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut cfg: BenchConfig = toml::from_str(toml_str)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load only from environment variables, starting from defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let cfg = Self::layered(None)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults, then the file at `path` if any, then `DGMA_*` overrides.
    ///
    /// The result is not validated; call [`validate`](Self::validate) once
    /// every later layer has been applied.
    pub fn layered(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg: Self = match path {
            Some(path) => toml::from_str(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    /// Copies per trial after applying the mode default.
    pub fn effective_iterations(&self) -> u32 {
        self.iterations.unwrap_or_else(|| self.mode.default_iterations())
    }

    /// Timing source after applying the mode default.
    pub fn effective_timing(&self) -> TimingSource {
        self.timing.unwrap_or_else(|| self.mode.default_timing())
    }

    /// Whether the queues must record device timestamps.
    pub fn profiling(&self) -> bool {
        self.effective_timing() == TimingSource::DeviceEvents
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vendor.trim().is_empty() {
            return Err(ConfigError::Validation("vendor must not be empty".into()));
        }
        if self.extension.trim().is_empty() {
            return Err(ConfigError::Validation("extension must not be empty".into()));
        }
        if self.sizes.is_empty() {
            return Err(ConfigError::Validation("at least one transfer size is required".into()));
        }
        if let Some(&bad) = self.sizes.iter().find(|&&s| s == 0 || s % 4 != 0) {
            return Err(ConfigError::Validation(format!(
                "transfer sizes must be positive multiples of 4 bytes, got {bad}"
            )));
        }
        if self.iterations == Some(0) {
            return Err(ConfigError::Validation("iterations must be > 0".into()));
        }
        if self.effective_timing() == TimingSource::DeviceEvents && !self.mode.is_zero_copy() {
            return Err(ConfigError::Validation(format!(
                "device-events timing requires zero-copy mode, got {}",
                self.mode
            )));
        }
        Ok(())
    }

    /// Apply `DGMA_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("DGMA_VENDOR") {
            self.vendor = val;
        }

        if let Ok(val) = std::env::var("DGMA_EXTENSION") {
            self.extension = val;
        }

        if let Ok(val) = std::env::var("DGMA_MODE") {
            self.mode = parse_override("DGMA_MODE", &val)?;
        }

        if let Ok(val) = std::env::var("DGMA_TIMING") {
            self.timing = Some(parse_override("DGMA_TIMING", &val)?);
        }

        if let Ok(val) = std::env::var("DGMA_WARMUP") {
            self.warmup = parse_override("DGMA_WARMUP", &val)?;
        }

        if let Ok(val) = std::env::var("DGMA_ITERATIONS") {
            let n = val.parse::<u32>().map_err(|e| ConfigError::EnvOverride {
                key: "DGMA_ITERATIONS".into(),
                value: val.clone(),
                reason: e.to_string(),
            })?;
            self.iterations = Some(n);
        }

        if let Ok(val) = std::env::var("DGMA_SIZES") {
            self.sizes = parse_sizes(&val).map_err(|reason| ConfigError::EnvOverride {
                key: "DGMA_SIZES".into(),
                value: val.clone(),
                reason,
            })?;
        }

        if let Ok(val) = std::env::var("DGMA_ORIENTATIONS") {
            self.orientations = parse_override("DGMA_ORIENTATIONS", &val)?;
        }

        Ok(())
    }
}

fn parse_override<T>(key: &str, val: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = String>,
{
    val.parse::<T>().map_err(|reason| ConfigError::EnvOverride {
        key: key.into(),
        value: val.into(),
        reason,
    })
}

/// Parse a comma-separated list of byte sizes, e.g. `"4096, 786432"`.
pub fn parse_sizes(list: &str) -> Result<Vec<usize>, String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|e| format!("'{s}': {e}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ALL_VARS: [&str; 8] = [
        "DGMA_VENDOR",
        "DGMA_EXTENSION",
        "DGMA_MODE",
        "DGMA_TIMING",
        "DGMA_WARMUP",
        "DGMA_ITERATIONS",
        "DGMA_SIZES",
        "DGMA_ORIENTATIONS",
    ];

    fn with_env<R>(set: &[(&str, &str)], f: impl FnOnce() -> R) -> R {
        let vars: Vec<(&str, Option<&str>)> = ALL_VARS
            .iter()
            .map(|k| (*k, set.iter().find(|(sk, _)| sk == k).map(|(_, v)| *v)))
            .collect();
        temp_env::with_vars(vars, f)
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = BenchConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.effective_iterations(), 5000);
        assert!(cfg.profiling());
        assert_eq!(cfg.sizes.len(), 9);
        assert_eq!(cfg.sizes[0], 786_432);
        assert_eq!(cfg.sizes[8], 67_108_864);
    }

    #[test]
    fn host_staged_modes_default_to_fewer_iterations() {
        let cfg = BenchConfig {
            mode: TransferMode::MapUnmap,
            ..Default::default()
        };
        assert_eq!(cfg.effective_iterations(), 500);
        assert_eq!(cfg.effective_timing(), TimingSource::WallClock);
        let cfg = BenchConfig { iterations: Some(12), ..cfg };
        assert_eq!(cfg.effective_iterations(), 12);
    }

    #[test]
    #[serial(dgma_env)]
    fn from_toml_partial_uses_defaults() {
        let cfg = with_env(&[], || {
            BenchConfig::from_toml(
                r#"
mode = "read-write"
timing = "wall-clock"
warmup = "always"
sizes = [4096, 8192]
orientations = "swapped"
"#,
            )
        })
        .unwrap();
        assert_eq!(cfg.mode, TransferMode::ReadWrite);
        assert_eq!(cfg.timing, Some(TimingSource::WallClock));
        assert_eq!(cfg.warmup, WarmupPolicy::Always);
        assert_eq!(cfg.sizes, vec![4096, 8192]);
        assert_eq!(cfg.orientations, OrientationSet::Swapped);
        assert_eq!(cfg.vendor, AMD_VENDOR);
        assert_eq!(cfg.iterations, None);
    }

    #[test]
    #[serial(dgma_env)]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("directgma.toml");
        std::fs::write(&path, "iterations = 7\nsizes = [1024]\n").unwrap();
        let cfg = with_env(&[], || BenchConfig::load(&path)).unwrap();
        assert_eq!(cfg.effective_iterations(), 7);
        assert_eq!(cfg.sizes, vec![1024]);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = BenchConfig::load(Path::new("/nonexistent/directgma.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    #[serial(dgma_env)]
    fn malformed_toml_is_parse_error() {
        let err = with_env(&[], || BenchConfig::from_toml("mode = [")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn validation_rejects_empty_sizes() {
        let cfg = BenchConfig { sizes: vec![], ..Default::default() };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("at least one transfer size"));
    }

    #[test]
    fn validation_rejects_unaligned_size() {
        let cfg = BenchConfig { sizes: vec![4096, 1023], ..Default::default() };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("1023"));
    }

    #[test]
    fn validation_rejects_zero_iterations() {
        let cfg = BenchConfig { iterations: Some(0), ..Default::default() };
        assert!(cfg.validate().unwrap_err().to_string().contains("iterations"));
    }

    #[test]
    fn validation_rejects_events_on_host_staged_path() {
        let cfg = BenchConfig {
            mode: TransferMode::MapUnmap,
            timing: Some(TimingSource::DeviceEvents),
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("requires zero-copy"));
    }

    #[test]
    fn warmup_auto_only_for_zero_copy() {
        assert!(WarmupPolicy::Auto.applies_to(TransferMode::ZeroCopy));
        assert!(!WarmupPolicy::Auto.applies_to(TransferMode::ReadWrite));
        assert!(WarmupPolicy::Always.applies_to(TransferMode::MapUnmap));
        assert!(!WarmupPolicy::Never.applies_to(TransferMode::ZeroCopy));
    }

    #[test]
    fn orientation_set_run_order() {
        assert_eq!(
            OrientationSet::Both.orientations(),
            &[Orientation::Forward, Orientation::Swapped]
        );
        assert_eq!(OrientationSet::Swapped.orientations(), &[Orientation::Swapped]);
    }

    #[test]
    fn parse_sizes_accepts_spaces_and_trailing_comma() {
        assert_eq!(parse_sizes("4096, 8192,").unwrap(), vec![4096, 8192]);
        assert!(parse_sizes("4k").is_err());
    }

    #[test]
    #[serial(dgma_env)]
    fn env_overrides_multiple_fields() {
        let cfg = with_env(
            &[
                ("DGMA_MODE", "map-unmap"),
                ("DGMA_TIMING", "wall-clock"),
                ("DGMA_WARMUP", "never"),
                ("DGMA_ITERATIONS", "3"),
                ("DGMA_SIZES", "4096,8192"),
                ("DGMA_ORIENTATIONS", "forward"),
                ("DGMA_VENDOR", "Simulated Devices"),
            ],
            BenchConfig::from_env,
        )
        .unwrap();
        assert_eq!(cfg.mode, TransferMode::MapUnmap);
        assert_eq!(cfg.timing, Some(TimingSource::WallClock));
        assert_eq!(cfg.warmup, WarmupPolicy::Never);
        assert_eq!(cfg.effective_iterations(), 3);
        assert_eq!(cfg.sizes, vec![4096, 8192]);
        assert_eq!(cfg.orientations, OrientationSet::Forward);
        assert_eq!(cfg.vendor, "Simulated Devices");
    }

    #[test]
    #[serial(dgma_env)]
    fn env_override_invalid_mode() {
        let err = with_env(&[("DGMA_MODE", "teleport")], BenchConfig::from_env).unwrap_err();
        match err {
            ConfigError::EnvOverride { key, .. } => assert_eq!(key, "DGMA_MODE"),
            other => panic!("expected EnvOverride, got: {other}"),
        }
    }

    #[test]
    #[serial(dgma_env)]
    fn env_override_invalid_iterations() {
        let err = with_env(&[("DGMA_ITERATIONS", "-1")], BenchConfig::from_env).unwrap_err();
        assert!(matches!(err, ConfigError::EnvOverride { ref key, .. } if key == "DGMA_ITERATIONS"));
    }

    #[test]
    #[serial(dgma_env)]
    fn env_override_takes_precedence_over_file() {
        let cfg = with_env(&[("DGMA_SIZES", "64")], || BenchConfig::from_toml("sizes = [4096]")).unwrap();
        assert_eq!(cfg.sizes, vec![64]);
    }

    #[test]
    fn serialized_config_round_trips() {
        let cfg = BenchConfig { iterations: Some(9), ..Default::default() };
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("mode = \"zero-copy\""));
        assert!(!text.contains("timing"));
        let back: BenchConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    #[serial(dgma_env)]
    fn toml_host_staged_mode_defaults_to_wall_clock() {
        let cfg = with_env(&[], || BenchConfig::from_toml("mode = \"map-unmap\"")).unwrap();
        assert_eq!(cfg.timing, None);
        assert_eq!(cfg.effective_timing(), TimingSource::WallClock);
        assert!(!cfg.profiling());
    }

    #[test]
    #[serial(dgma_env)]
    fn env_host_staged_mode_defaults_to_wall_clock() {
        let cfg = with_env(&[("DGMA_MODE", "read-write")], BenchConfig::from_env).unwrap();
        assert_eq!(cfg.effective_timing(), TimingSource::WallClock);
        assert_eq!(cfg.effective_iterations(), 500);
    }

    #[test]
    #[serial(dgma_env)]
    fn layered_defers_validation_to_the_caller() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("directgma.toml");
        std::fs::write(&path, "mode = \"read-write\"\ntiming = \"device-events\"\n").unwrap();

        let mut cfg = with_env(&[], || BenchConfig::layered(Some(&path))).unwrap();
        assert!(cfg.validate().is_err());
        cfg.timing = Some(TimingSource::WallClock);
        assert!(cfg.validate().is_ok());

        let cfg = with_env(&[("DGMA_MODE", "map-unmap")], || BenchConfig::layered(Some(&path))).unwrap();
        assert_eq!(cfg.mode, TransferMode::MapUnmap);
        assert_eq!(cfg.timing, Some(TimingSource::DeviceEvents));
    }
}
