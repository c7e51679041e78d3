//! Bandwidth computation, read-back validation and per-trial reports.

use crate::api::ComputeApi;
use crate::config::{Orientation, TimingSource, TransferMode};
use crate::error::{TransferError, ValidationError};
use crate::host::HostMirror;
use crate::residency::BufferTriple;
use crate::session::Session;
use crate::transfer::TimingRecord;
use serde::Serialize;
use std::fmt;

/// Bytes per GiB; reported "GB/s" figures use this base.
pub const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Total elapsed seconds of a measured loop.
///
/// Device-event records sum every event's `end - start`; wall-clock records
/// return the single span.
pub fn elapsed_seconds<A: ComputeApi>(api: &A, record: &TimingRecord<A::Event>) -> Result<f64, TransferError> {
    match record {
        TimingRecord::DeviceEvents(events) => {
            let mut seconds = 0.0;
            for event in events {
                let times = api.event_times(event).map_err(TransferError::ProfilingFailed)?;
                seconds += times.duration_ns() as f64 / 1e9;
            }
            Ok(seconds)
        }
        TimingRecord::WallClock(elapsed) => Ok(elapsed.as_secs_f64()),
    }
}

/// Aggregate throughput of one trial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Throughput {
    pub bytes_per_sec: f64,
    pub gib_per_sec: f64,
}

impl Throughput {
    /// `(size * iterations) / seconds`. `seconds` must be strictly positive.
    pub fn compute(size: usize, iterations: u32, seconds: f64) -> Result<Self, ValidationError> {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(ValidationError::NonPositiveElapsed { seconds });
        }
        let bytes_per_sec = size as f64 * f64::from(iterations) / seconds;
        Ok(Self { bytes_per_sec, gib_per_sec: bytes_per_sec / GIB })
    }
}

/// Blocking read of the physical destination on the destination queue into
/// the output mirror.
pub fn read_back<A: ComputeApi>(
    session: &Session<'_, A>,
    buffers: &BufferTriple<A>,
    mirror: &mut HostMirror,
) -> Result<(), TransferError> {
    session
        .api()
        .enqueue_read(session.destination_queue(), buffers.dst(), mirror.output_bytes_mut())
        .map_err(TransferError::ReadbackFailed)
}

/// Result of one verified trial.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialReport {
    pub source: String,
    pub destination: String,
    pub orientation: Orientation,
    pub mode: TransferMode,
    /// Timing source actually used.
    pub timing: TimingSource,
    pub size_bytes: usize,
    pub size_kib: usize,
    pub iterations: u32,
    pub elapsed_seconds: f64,
    pub bytes_per_sec: f64,
    pub gib_per_sec: f64,
}

impl TrialReport {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: &str,
        destination: &str,
        orientation: Orientation,
        mode: TransferMode,
        timing: TimingSource,
        size: usize,
        iterations: u32,
        elapsed_seconds: f64,
        throughput: Throughput,
    ) -> Self {
        Self {
            source: source.to_string(),
            destination: destination.to_string(),
            orientation,
            mode,
            timing,
            size_bytes: size,
            size_kib: size / 1024,
            iterations,
            elapsed_seconds,
            bytes_per_sec: throughput.bytes_per_sec,
            gib_per_sec: throughput.gib_per_sec,
        }
    }
}

impl fmt::Display for TrialReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} -> {}]: buffSize = {} KB, iterations = {}, DMA throughput = {:.2} GB/s",
            self.source, self.destination, self.size_kib, self.iterations, self.gib_per_sec
        )
    }
}
