//! Trial driver.
//!
//! [`run_trial`] runs bootstrap, residency, seeding, the optional warm-up,
//! the measured loop and validation for one (size, orientation) pair inside a
//! fresh [`Session`]. [`run_all`] covers every orientation and size of a
//! [`BenchConfig`] in order and stops at the first failure.

use crate::api::ComputeApi;
use crate::config::{BenchConfig, Orientation};
use crate::discovery::{resolve, Discovery, DiscoveryRequest};
use crate::error::{Result, SetupError};
use crate::host::HostMirror;
use crate::report::{elapsed_seconds, read_back, Throughput, TrialReport};
use crate::residency::BufferTriple;
use crate::session::Session;
use crate::transfer::{run, strategy_for, warm_up};
use tracing::{debug, info};

/// One (buffer size, iteration count, orientation) measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trial {
    pub size: usize,
    pub iterations: u32,
    pub orientation: Orientation,
}

/// Trials a configuration describes, orientation-major.
pub fn plan(config: &BenchConfig) -> Vec<Trial> {
    let iterations = config.effective_iterations();
    config
        .orientations
        .orientations()
        .iter()
        .flat_map(|&orientation| {
            config.sizes.iter().map(move |&size| Trial { size, iterations, orientation })
        })
        .collect()
}

/// What [`resolve`] must find for `config`.
pub fn discovery_request(config: &BenchConfig) -> DiscoveryRequest {
    DiscoveryRequest {
        vendor: config.vendor.clone(),
        extension: config.extension.clone(),
        require_residency: config.mode.is_zero_copy(),
    }
}

/// Run one trial against devices already resolved by [`resolve`].
///
/// The trial's orientation is applied to the resolved pair before the
/// session is opened. Every handle the trial creates is released before this
/// returns, on success and on every error path.
pub fn run_trial<A: ComputeApi>(
    api: &A,
    discovery: &Discovery<A>,
    trial: &Trial,
    config: &BenchConfig,
) -> Result<TrialReport> {
    let mode = config.mode;
    let pair = discovery.devices.clone().oriented(trial.orientation);
    let session = Session::open(api, &discovery.platform, pair, config.profiling())?;

    let mut mirror = HostMirror::new(trial.size);
    let mut buffers = if mode.is_zero_copy() {
        let caps = discovery.residency.as_ref().ok_or(SetupError::ResidencyUnavailable)?;
        BufferTriple::allocate_zero_copy(&session, caps, trial.size)?
    } else {
        BufferTriple::allocate_staged(&session, trial.size)?
    };
    buffers.upload_seed(&session, mirror.input_bytes())?;
    debug!("Seeded {} words into {}", mirror.words(), session.source_name());

    let mut strategy = strategy_for::<A>(mode, trial.size);
    if config.warmup.applies_to(mode) {
        warm_up(strategy.as_mut(), &session, &mut buffers)?;
    }

    let record = run(strategy.as_mut(), &session, &mut buffers, trial.iterations, config.effective_timing())?;
    let timing = record.source();
    let seconds = elapsed_seconds(api, &record)?;
    drop(record);

    read_back(&session, &buffers, &mut mirror)?;
    mirror.verify()?;
    let throughput = Throughput::compute(trial.size, trial.iterations, seconds)?;

    let report = TrialReport::new(
        session.source_name(),
        session.destination_name(),
        trial.orientation,
        mode,
        timing,
        trial.size,
        trial.iterations,
        seconds,
        throughput,
    );
    info!(
        "{} {} trial: {} bytes x {} in {:.6} s, {:.2} GiB/s",
        trial.orientation, mode, trial.size, trial.iterations, seconds, report.gib_per_sec
    );
    Ok(report)
}

/// Run every trial of `config`, calling `on_report` after each one.
///
/// Discovery runs once per orientation before that orientation's trials; the
/// first error from any step ends the run.
pub fn run_all<A, F>(api: &A, config: &BenchConfig, mut on_report: F) -> Result<Vec<TrialReport>>
where
    A: ComputeApi,
    F: FnMut(&TrialReport),
{
    let request = discovery_request(config);
    let trials = plan(config);
    let mut reports = Vec::with_capacity(trials.len());

    for &orientation in config.orientations.orientations() {
        let discovery = resolve(api, &request)?;
        debug!("Running {} orientation: {:?}", orientation, discovery);
        for trial in trials.iter().filter(|t| t.orientation == orientation) {
            let report = run_trial(api, &discovery, trial, config)?;
            on_report(&report);
            reports.push(report);
        }
    }
    Ok(reports)
}
