//! Peer-to-peer GPU DMA throughput measurement over bus-addressable memory.
//!
//! One device's buffer is pinned resident and its physical bus address is
//! aliased inside a second device's context, so the second device can copy
//! straight into the first device's memory. The crate resolves the devices,
//! sets up both contexts, negotiates residency, drives the copy loop, times
//! it and validates the copied bytes.
//!
//! ```no_run
//! use directgma::{run_all, BenchConfig, SimApi};
//!
//! let reports = run_all(&SimApi::default(), &BenchConfig::default(), |r| println!("{r}"))?;
//! # Ok::<(), directgma::DirectGmaError>(())
//! ```

pub mod api;
pub mod config;
pub mod discovery;
pub mod error;
pub mod host;
#[cfg(feature = "opencl-runtime")]
pub mod opencl;
pub mod report;
pub mod residency;
pub mod runner;
pub mod session;
pub mod sim;
pub mod transfer;

pub use api::{ApiError, BufferKind, BusAddress, ComputeApi, EventTimes, MapAccess};
pub use config::{
    BenchConfig, ConfigError, Orientation, OrientationSet, TimingSource, TransferMode, WarmupPolicy,
};
pub use discovery::{resolve, DevicePair, Discovery, DiscoveryRequest, ResidencyCaps};
pub use error::{DirectGmaError, DiscoveryError, Result, SetupError, TransferError, ValidationError};
pub use host::HostMirror;
#[cfg(feature = "opencl-runtime")]
pub use opencl::ClApi;
pub use report::{Throughput, TrialReport};
pub use residency::BufferTriple;
pub use runner::{plan, run_all, run_trial, Trial};
pub use session::Session;
pub use sim::{SimApi, SimDeviceSpec, SimPlatformSpec, SimSpec};
pub use transfer::{TimingRecord, TransferStrategy};
