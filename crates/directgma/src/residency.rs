//! Cross-device buffer residency.
//!
//! The zero-copy path allocates the destination in the destination device's
//! bus-addressable pool, pins it resident on the destination queue, then
//! creates an alias of its bus address inside the source context. The
//! host-staged paths allocate two ordinary buffers and never alias.

use crate::api::{BufferKind, BusAddress, ComputeApi};
use crate::discovery::ResidencyCaps;
use crate::error::SetupError;
use crate::session::Session;
use tracing::debug;

/// Source buffer, optional alias and physical destination for one trial.
///
/// Fields drop in declaration order, so the alias is released before the
/// physical allocation it refers to.
pub struct BufferTriple<A: ComputeApi> {
    src: A::Buffer,
    external_dst: Option<A::Buffer>,
    dst: A::Buffer,
    bus_address: Option<BusAddress>,
    size: usize,
}

impl<A: ComputeApi> BufferTriple<A> {
    /// Allocate and alias buffers for device-to-device copies.
    pub fn allocate_zero_copy(
        session: &Session<'_, A>,
        caps: &ResidencyCaps<A::EntryPoint>,
        size: usize,
    ) -> Result<Self, SetupError> {
        let api = session.api();

        let mut dst = api
            .create_buffer(session.destination_context(), BufferKind::BusAddressable, size)
            .map_err(|source| SetupError::BufferAllocFailed { size, source })?;

        // Blocks until the allocation is resident.
        let bus_address = api
            .make_resident(caps.make_resident, session.destination_queue(), &mut dst)
            .map_err(SetupError::ResidencyPinFailed)?;
        debug!("Destination resident at {}", bus_address);

        let external_dst = api
            .create_external_buffer(session.source_context(), size, bus_address)
            .map_err(SetupError::AliasCreationFailed)?;

        let src = api
            .create_buffer(session.source_context(), BufferKind::ReadWrite, size)
            .map_err(|source| SetupError::BufferAllocFailed { size, source })?;

        Ok(Self { src, external_dst: Some(external_dst), dst, bus_address: Some(bus_address), size })
    }

    /// Allocate one ordinary buffer per context for host-staged copies.
    pub fn allocate_staged(session: &Session<'_, A>, size: usize) -> Result<Self, SetupError> {
        let api = session.api();
        let dst = api
            .create_buffer(session.destination_context(), BufferKind::ReadWrite, size)
            .map_err(|source| SetupError::BufferAllocFailed { size, source })?;
        let src = api
            .create_buffer(session.source_context(), BufferKind::ReadWrite, size)
            .map_err(|source| SetupError::BufferAllocFailed { size, source })?;
        Ok(Self { src, external_dst: None, dst, bus_address: None, size })
    }

    /// Blocking upload of `seed` into the source buffer on the source queue.
    pub fn upload_seed(&mut self, session: &Session<'_, A>, seed: &[u8]) -> Result<(), SetupError> {
        session
            .api()
            .enqueue_write(session.source_queue(), &mut self.src, seed)
            .map_err(SetupError::SeedUploadFailed)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn bus_address(&self) -> Option<BusAddress> {
        self.bus_address
    }

    pub fn is_aliased(&self) -> bool {
        self.external_dst.is_some()
    }

    /// Source buffer, in the source context.
    pub fn src(&self) -> &A::Buffer {
        &self.src
    }

    /// Physical destination, in the destination context. Only this handle is
    /// read back.
    pub fn dst(&self) -> &A::Buffer {
        &self.dst
    }

    /// Source buffer and the alias copy target, both in the source context.
    pub fn copy_endpoints(&mut self) -> Option<(&A::Buffer, &mut A::Buffer)> {
        let alias = self.external_dst.as_mut()?;
        Some((&self.src, alias))
    }

    /// Source buffer and the physical destination, one per context.
    pub fn staged_endpoints(&mut self) -> (&A::Buffer, &mut A::Buffer) {
        (&self.src, &mut self.dst)
    }
}
