//! Per-trial context and queue bootstrap.
//!
//! A [`Session`] owns one single-device context and one command queue for
//! each side of a [`DevicePair`]. Queues are declared before contexts so
//! they are released first when the session drops.

use crate::api::ComputeApi;
use crate::discovery::DevicePair;
use crate::error::SetupError;
use tracing::debug;

/// Contexts and queues for one trial.
pub struct Session<'a, A: ComputeApi> {
    api: &'a A,
    pair: DevicePair<A::Device>,
    source_queue: A::Queue,
    destination_queue: A::Queue,
    source_context: A::Context,
    destination_context: A::Context,
    profiling: bool,
}

impl<'a, A: ComputeApi> Session<'a, A> {
    /// Create both contexts, then both queues.
    ///
    /// Any handle created before a failure is released when this returns.
    pub fn open(
        api: &'a A,
        platform: &A::Platform,
        pair: DevicePair<A::Device>,
        profiling: bool,
    ) -> Result<Self, SetupError> {
        let destination_context = api
            .create_context(platform, &pair.destination.handle)
            .map_err(SetupError::ContextCreationFailed)?;
        let source_context = api
            .create_context(platform, &pair.source.handle)
            .map_err(SetupError::ContextCreationFailed)?;

        let destination_queue = api
            .create_queue(&destination_context, &pair.destination.handle, profiling)
            .map_err(SetupError::QueueCreationFailed)?;
        let source_queue = api
            .create_queue(&source_context, &pair.source.handle, profiling)
            .map_err(SetupError::QueueCreationFailed)?;

        debug!(
            "Session open: source GPU {} '{}', destination GPU {} '{}', profiling={}",
            pair.source.index, pair.source.name, pair.destination.index, pair.destination.name, profiling
        );

        Ok(Self {
            api,
            pair,
            source_queue,
            destination_queue,
            source_context,
            destination_context,
            profiling,
        })
    }

    pub fn api(&self) -> &'a A {
        self.api
    }

    pub fn source_name(&self) -> &str {
        &self.pair.source.name
    }

    pub fn destination_name(&self) -> &str {
        &self.pair.destination.name
    }

    pub fn source_context(&self) -> &A::Context {
        &self.source_context
    }

    pub fn destination_context(&self) -> &A::Context {
        &self.destination_context
    }

    /// Queue used for copies into the alias and for the final barrier.
    pub fn source_queue(&self) -> &A::Queue {
        &self.source_queue
    }

    /// Queue used for residency pinning and read-back.
    pub fn destination_queue(&self) -> &A::Queue {
        &self.destination_queue
    }

    pub fn profiling(&self) -> bool {
        self.profiling
    }
}
