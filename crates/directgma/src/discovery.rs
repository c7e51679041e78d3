//! Platform, device and extension resolution.
//!
//! [`resolve`] picks the first platform whose vendor string contains the
//! requested vendor, takes its first two GPUs and, when zero-copy transfers
//! are requested, checks both advertise the bus-addressable capability and
//! resolves the extension entry points into a [`ResidencyCaps`] value that is
//! handed to the residency manager explicitly.

use crate::api::ComputeApi;
use crate::config::Orientation;
use crate::error::DiscoveryError;
use tracing::{debug, info};

/// Extension entry point that pins buffers resident and returns bus addresses.
pub const MAKE_RESIDENT_ENTRY: &str = "clEnqueueMakeBuffersResidentAMD";
/// Entry point that waits on a marker written by a peer device.
pub const WAIT_SIGNAL_ENTRY: &str = "clEnqueueWaitSignalAMD";
/// Entry point that writes a marker value into a peer's signalling slot.
pub const WRITE_SIGNAL_ENTRY: &str = "clEnqueueWriteSignalAMD";

/// What the resolver must find.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRequest {
    /// Substring matched against each platform's vendor string.
    pub vendor: String,
    /// Capability substring matched against each device's extension string.
    pub extension: String,
    /// Check the capability and resolve entry points (zero-copy path).
    pub require_residency: bool,
}

/// Extension entry points resolved for one platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResidencyCaps<E> {
    pub make_resident: E,
    pub wait_signal: E,
    pub write_signal: E,
}

/// A device handle with its enumeration index and name.
#[derive(Debug, Clone)]
pub struct DeviceSlot<D> {
    pub handle: D,
    pub index: usize,
    pub name: String,
}

/// Two distinct devices with explicit roles.
#[derive(Debug, Clone)]
pub struct DevicePair<D> {
    pub source: DeviceSlot<D>,
    pub destination: DeviceSlot<D>,
}

impl<D> DevicePair<D> {
    /// Exchange the source and destination roles.
    pub fn swapped(self) -> Self {
        Self { source: self.destination, destination: self.source }
    }

    pub fn oriented(self, orientation: Orientation) -> Self {
        match orientation {
            Orientation::Forward => self,
            Orientation::Swapped => self.swapped(),
        }
    }
}

/// Output of [`resolve`].
pub struct Discovery<A: ComputeApi> {
    pub platform: A::Platform,
    pub vendor: String,
    /// Device 1 as source, device 0 as destination.
    pub devices: DevicePair<A::Device>,
    /// Present only when residency was requested.
    pub residency: Option<ResidencyCaps<A::EntryPoint>>,
}

impl<A: ComputeApi> std::fmt::Debug for Discovery<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discovery")
            .field("vendor", &self.vendor)
            .field("source", &self.devices.source.name)
            .field("destination", &self.devices.destination.name)
            .field("residency", &self.residency.is_some())
            .finish()
    }
}

/// Resolve a platform, two GPUs and (optionally) the residency extension.
///
/// Only devices 0 and 1 of the platform's GPU list are considered; extra
/// devices are ignored.
pub fn resolve<A: ComputeApi>(api: &A, request: &DiscoveryRequest) -> Result<Discovery<A>, DiscoveryError> {
    let platforms = api.platforms().map_err(DiscoveryError::Query)?;
    let scanned = platforms.len();

    let mut selected = None;
    for platform in platforms {
        let vendor = api.platform_vendor(&platform).map_err(DiscoveryError::Query)?;
        debug!("Scanning platform: {}", vendor);
        if vendor.contains(&request.vendor) {
            selected = Some((platform, vendor));
            break;
        }
    }
    let (platform, vendor) = selected.ok_or_else(|| DiscoveryError::NoCapablePlatform {
        vendor: request.vendor.clone(),
        scanned,
    })?;

    let gpus = api.gpu_devices(&platform).map_err(DiscoveryError::Query)?;
    let found = gpus.len();
    if found > 2 {
        debug!("{} GPUs on platform, using devices 0 and 1", found);
    }
    let mut gpus = gpus.into_iter();
    let (first, second) = match (gpus.next(), gpus.next()) {
        (Some(first), Some(second)) => (first, second),
        _ => return Err(DiscoveryError::InsufficientDevices { vendor, found }),
    };

    let destination = describe(api, request, 0, first)?;
    let source = describe(api, request, 1, second)?;

    let residency = if request.require_residency {
        let lookup = |name: &str| {
            api.extension_entry_point(&platform, name).ok_or_else(|| DiscoveryError::MissingExtension {
                target: format!("platform '{vendor}'"),
                name: name.to_string(),
            })
        };
        Some(ResidencyCaps {
            make_resident: lookup(MAKE_RESIDENT_ENTRY)?,
            wait_signal: lookup(WAIT_SIGNAL_ENTRY)?,
            write_signal: lookup(WRITE_SIGNAL_ENTRY)?,
        })
    } else {
        None
    };

    info!(
        "Selected platform '{}': source GPU 1 '{}', destination GPU 0 '{}'",
        vendor, source.name, destination.name
    );
    Ok(Discovery { platform, vendor, devices: DevicePair { source, destination }, residency })
}

fn describe<A: ComputeApi>(
    api: &A,
    request: &DiscoveryRequest,
    index: usize,
    handle: A::Device,
) -> Result<DeviceSlot<A::Device>, DiscoveryError> {
    let name = api.device_name(&handle).map_err(DiscoveryError::Query)?;
    if request.require_residency {
        let extensions = api.device_extensions(&handle).map_err(DiscoveryError::Query)?;
        if !extensions.contains(&request.extension) {
            return Err(DiscoveryError::MissingExtension {
                target: format!("GPU {index} ({name})"),
                name: request.extension.clone(),
            });
        }
    }
    debug!("GPU {}: {}", index, name);
    Ok(DeviceSlot { handle, index, name })
}
