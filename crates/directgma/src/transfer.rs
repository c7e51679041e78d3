//! Transfer engine.
//!
//! A [`TransferStrategy`] moves one full buffer from the source device to the
//! destination device. [`run`] drives a strategy for N iterations and
//! produces a [`TimingRecord`]: in zero-copy mode every copy is enqueued
//! back-to-back on the source queue and only the final barrier blocks, so the
//! recorded window covers device DMA time rather than per-call dispatch.
//! Host-staged strategies block inside every iteration and are timed with
//! the host clock.
//!
//! Known limitation: there is no timeout or cancellation. A device call that
//! never returns, such as a `finish` on a hung DMA engine, blocks the process
//! indefinitely.

use crate::api::{ops, status, ApiError, ApiResult, ComputeApi, MapAccess};
use crate::config::{TimingSource, TransferMode};
use crate::error::TransferError;
use crate::residency::BufferTriple;
use crate::session::Session;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One way of moving a buffer between the two devices.
pub trait TransferStrategy<A: ComputeApi> {
    fn mode(&self) -> TransferMode;

    /// Whether [`copy_once`](Self::copy_once) can hand back a device event.
    fn records_events(&self) -> bool {
        false
    }

    /// Issue one whole-buffer transfer. Host-staged strategies block until it
    /// has completed; the zero-copy strategy only enqueues it.
    fn copy_once(
        &mut self,
        session: &Session<'_, A>,
        buffers: &mut BufferTriple<A>,
        want_event: bool,
    ) -> ApiResult<Option<A::Event>>;

    /// Wait for every queue this strategy submits to.
    fn drain(&self, session: &Session<'_, A>) -> ApiResult<()>;
}

// ── Zero-copy ───────────────────────────────────────────────────────────────

/// Device copy from the source buffer into the alias of the peer's resident
/// destination, on the source queue.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZeroCopyTransfer;

impl<A: ComputeApi> TransferStrategy<A> for ZeroCopyTransfer {
    fn mode(&self) -> TransferMode {
        TransferMode::ZeroCopy
    }

    fn records_events(&self) -> bool {
        true
    }

    fn copy_once(
        &mut self,
        session: &Session<'_, A>,
        buffers: &mut BufferTriple<A>,
        want_event: bool,
    ) -> ApiResult<Option<A::Event>> {
        let size = buffers.size();
        let (src, alias) = buffers
            .copy_endpoints()
            .ok_or(ApiError::new(ops::COPY_BUFFER, status::INVALID_MEM_OBJECT))?;
        session.api().enqueue_copy(session.source_queue(), src, alias, size, want_event)
    }

    fn drain(&self, session: &Session<'_, A>) -> ApiResult<()> {
        session.api().finish(session.source_queue())
    }
}

// ── Host-staged ─────────────────────────────────────────────────────────────

/// Map the source for reading and the destination for writing, copy between
/// the mappings on the host, then unmap both.
#[derive(Debug, Default, Clone, Copy)]
pub struct MapUnmapTransfer;

impl<A: ComputeApi> TransferStrategy<A> for MapUnmapTransfer {
    fn mode(&self) -> TransferMode {
        TransferMode::MapUnmap
    }

    fn copy_once(
        &mut self,
        session: &Session<'_, A>,
        buffers: &mut BufferTriple<A>,
        _want_event: bool,
    ) -> ApiResult<Option<A::Event>> {
        let api = session.api();
        let size = buffers.size();
        let (src, dst) = buffers.staged_endpoints();

        let src_map = api.map_buffer(session.source_queue(), src, MapAccess::Read, size)?;
        let mut dst_map = api.map_buffer(session.destination_queue(), dst, MapAccess::Write, size)?;
        dst_map.as_mut().copy_from_slice(src_map.as_ref());

        api.unmap_buffer(session.source_queue(), src, src_map)?;
        api.unmap_buffer(session.destination_queue(), dst, dst_map)?;
        Ok(None)
    }

    fn drain(&self, session: &Session<'_, A>) -> ApiResult<()> {
        drain_both(session)
    }
}

/// Blocking read of the source into a host staging buffer, then blocking
/// write of that buffer into the destination.
#[derive(Debug, Clone)]
pub struct ReadWriteTransfer {
    staging: Vec<u8>,
}

impl ReadWriteTransfer {
    /// The staging buffer is allocated once and reused by every iteration.
    pub fn new(size: usize) -> Self {
        Self { staging: vec![0u8; size] }
    }
}

impl<A: ComputeApi> TransferStrategy<A> for ReadWriteTransfer {
    fn mode(&self) -> TransferMode {
        TransferMode::ReadWrite
    }

    fn copy_once(
        &mut self,
        session: &Session<'_, A>,
        buffers: &mut BufferTriple<A>,
        _want_event: bool,
    ) -> ApiResult<Option<A::Event>> {
        let api = session.api();
        let (src, dst) = buffers.staged_endpoints();
        api.enqueue_read(session.source_queue(), src, &mut self.staging)?;
        api.enqueue_write(session.destination_queue(), dst, &self.staging)?;
        Ok(None)
    }

    fn drain(&self, session: &Session<'_, A>) -> ApiResult<()> {
        drain_both(session)
    }
}

fn drain_both<A: ComputeApi>(session: &Session<'_, A>) -> ApiResult<()> {
    session.api().finish(session.source_queue())?;
    session.api().finish(session.destination_queue())
}

/// Strategy implementing `mode` for buffers of `size` bytes.
pub fn strategy_for<A: ComputeApi>(mode: TransferMode, size: usize) -> Box<dyn TransferStrategy<A>> {
    match mode {
        TransferMode::ZeroCopy => Box::new(ZeroCopyTransfer),
        TransferMode::MapUnmap => Box::new(MapUnmapTransfer),
        TransferMode::ReadWrite => Box::new(ReadWriteTransfer::new(size)),
    }
}

// ── Timing ──────────────────────────────────────────────────────────────────

/// Raw timing of one measured loop.
#[derive(Debug)]
pub enum TimingRecord<E> {
    /// One completion event per iteration, in submission order.
    DeviceEvents(Vec<E>),
    /// Host time from the first submission through the final barrier.
    WallClock(Duration),
}

impl<E> TimingRecord<E> {
    pub fn source(&self) -> TimingSource {
        match self {
            Self::DeviceEvents(_) => TimingSource::DeviceEvents,
            Self::WallClock(_) => TimingSource::WallClock,
        }
    }
}

/// One unmeasured transfer followed by a full drain.
pub fn warm_up<A: ComputeApi>(
    strategy: &mut dyn TransferStrategy<A>,
    session: &Session<'_, A>,
    buffers: &mut BufferTriple<A>,
) -> Result<(), TransferError> {
    strategy.copy_once(session, buffers, false).map_err(TransferError::WarmupFailed)?;
    strategy.drain(session).map_err(TransferError::WarmupFailed)?;
    debug!("Warm-up {} transfer complete", strategy.mode());
    Ok(())
}

/// Run `iterations` transfers and drain the queues.
///
/// The first failing call aborts the loop. Device-event timing is used only
/// when requested, supported by the strategy and the queues are profiling;
/// otherwise the host clock is used.
pub fn run<A: ComputeApi>(
    strategy: &mut dyn TransferStrategy<A>,
    session: &Session<'_, A>,
    buffers: &mut BufferTriple<A>,
    iterations: u32,
    timing: TimingSource,
) -> Result<TimingRecord<A::Event>, TransferError> {
    let use_events = timing == TimingSource::DeviceEvents;
    if use_events && !(strategy.records_events() && session.profiling()) {
        warn!("{} transfers cannot be timed with device events, using the host clock", strategy.mode());
        return run_wall_clock(strategy, session, buffers, iterations);
    }
    if !use_events {
        return run_wall_clock(strategy, session, buffers, iterations);
    }

    let mut events = Vec::with_capacity(iterations as usize);
    for iteration in 0..iterations {
        let event = strategy
            .copy_once(session, buffers, true)
            .map_err(|source| TransferError::TransferFailed { iteration, source })?
            .ok_or(TransferError::ProfilingFailed(ApiError::new(
                ops::COPY_BUFFER,
                status::PROFILING_INFO_NOT_AVAILABLE,
            )))?;
        events.push(event);
    }
    strategy.drain(session).map_err(TransferError::FinishFailed)?;
    debug!("{} {} transfers complete", iterations, strategy.mode());
    Ok(TimingRecord::DeviceEvents(events))
}

fn run_wall_clock<A: ComputeApi>(
    strategy: &mut dyn TransferStrategy<A>,
    session: &Session<'_, A>,
    buffers: &mut BufferTriple<A>,
    iterations: u32,
) -> Result<TimingRecord<A::Event>, TransferError> {
    let start = Instant::now();
    for iteration in 0..iterations {
        strategy
            .copy_once(session, buffers, false)
            .map_err(|source| TransferError::TransferFailed { iteration, source })?;
    }
    strategy.drain(session).map_err(TransferError::FinishFailed)?;
    let elapsed = start.elapsed();
    debug!("{} {} transfers complete in {:?}", iterations, strategy.mode(), elapsed);
    Ok(TimingRecord::WallClock(elapsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AMD_VENDOR, BUS_ADDRESSABLE_EXTENSION};
    use crate::discovery::{resolve, Discovery, DiscoveryRequest};
    use crate::sim::{SimApi, SimSpec};

    fn discover(api: &SimApi) -> Discovery<SimApi> {
        let request = DiscoveryRequest {
            vendor: AMD_VENDOR.into(),
            extension: BUS_ADDRESSABLE_EXTENSION.into(),
            require_residency: true,
        };
        resolve(api, &request).unwrap()
    }

    #[test]
    fn zero_copy_enqueues_all_then_finishes_once() {
        let api = SimApi::new(SimSpec::amd_pair());
        let found = discover(&api);
        let caps = found.residency.unwrap();
        let session = Session::open(&api, &found.platform, found.devices, true).unwrap();
        let mut buffers = BufferTriple::allocate_zero_copy(&session, &caps, 1024).unwrap();
        let mut strategy = strategy_for::<SimApi>(TransferMode::ZeroCopy, 1024);

        let record = run(strategy.as_mut(), &session, &mut buffers, 8, TimingSource::DeviceEvents).unwrap();
        match record {
            TimingRecord::DeviceEvents(events) => assert_eq!(events.len(), 8),
            other => panic!("expected events, got {other:?}"),
        }

        let calls = api.calls();
        let last_copy = calls.iter().rposition(|c| *c == ops::COPY_BUFFER).unwrap();
        let first_finish = calls.iter().position(|c| *c == ops::FINISH).unwrap();
        assert!(last_copy < first_finish);
        assert_eq!(api.call_count(ops::FINISH), 1);
        assert_eq!(api.call_count(ops::COPY_BUFFER), 8);
    }

    #[test]
    fn copy_failure_reports_iteration() {
        let api = SimApi::new(SimSpec::amd_pair());
        let found = discover(&api);
        let caps = found.residency.unwrap();
        let session = Session::open(&api, &found.platform, found.devices, false).unwrap();
        let mut buffers = BufferTriple::allocate_zero_copy(&session, &caps, 64).unwrap();
        api.fail_on(ops::COPY_BUFFER, 4, status::OUT_OF_RESOURCES);

        let err = run::<SimApi>(&mut ZeroCopyTransfer, &session, &mut buffers, 10, TimingSource::WallClock).unwrap_err();
        assert_eq!(
            err,
            TransferError::TransferFailed {
                iteration: 3,
                source: ApiError::new(ops::COPY_BUFFER, status::OUT_OF_RESOURCES)
            }
        );
        assert_eq!(api.call_count(ops::COPY_BUFFER), 4);
        assert_eq!(api.call_count(ops::FINISH), 0);
    }

    #[test]
    fn map_unmap_moves_bytes_and_drains_both_queues() {
        let api = SimApi::new(SimSpec::amd_pair());
        let found = discover(&api);
        let session = Session::open(&api, &found.platform, found.devices, false).unwrap();
        let mut buffers = BufferTriple::allocate_staged(&session, 16).unwrap();
        buffers.upload_seed(&session, &[9u8; 16]).unwrap();

        let record = run::<SimApi>(&mut MapUnmapTransfer, &session, &mut buffers, 3, TimingSource::WallClock).unwrap();
        assert_eq!(record.source(), TimingSource::WallClock);
        assert_eq!(api.call_count(ops::MAP_BUFFER), 6);
        assert_eq!(api.call_count(ops::UNMAP_BUFFER), 6);
        assert_eq!(api.call_count(ops::FINISH), 2);

        let mut out = [0u8; 16];
        api.enqueue_read(session.destination_queue(), buffers.dst(), &mut out).unwrap();
        assert_eq!(out, [9u8; 16]);
    }

    #[test]
    fn read_write_reuses_staging_buffer() {
        let api = SimApi::new(SimSpec::amd_pair());
        let found = discover(&api);
        let session = Session::open(&api, &found.platform, found.devices, false).unwrap();
        let mut buffers = BufferTriple::allocate_staged(&session, 8).unwrap();
        buffers.upload_seed(&session, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();

        let mut strategy = ReadWriteTransfer::new(8);
        run::<SimApi>(&mut strategy, &session, &mut buffers, 2, TimingSource::WallClock).unwrap();
        assert_eq!(strategy.staging, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(api.call_count(ops::READ_BUFFER), 2);
        assert_eq!(api.call_count(ops::WRITE_BUFFER), 3);
    }

    #[test]
    fn event_timing_falls_back_without_profiling_queue() {
        let api = SimApi::new(SimSpec::amd_pair());
        let found = discover(&api);
        let caps = found.residency.unwrap();
        let session = Session::open(&api, &found.platform, found.devices, false).unwrap();
        let mut buffers = BufferTriple::allocate_zero_copy(&session, &caps, 64).unwrap();
        let record = run::<SimApi>(&mut ZeroCopyTransfer, &session, &mut buffers, 2, TimingSource::DeviceEvents).unwrap();
        assert_eq!(record.source(), TimingSource::WallClock);
    }

    #[test]
    fn warm_up_failure_is_distinct() {
        let api = SimApi::new(SimSpec::amd_pair());
        let found = discover(&api);
        let caps = found.residency.unwrap();
        let session = Session::open(&api, &found.platform, found.devices, true).unwrap();
        let mut buffers = BufferTriple::allocate_zero_copy(&session, &caps, 64).unwrap();
        api.fail_on(ops::FINISH, 1, status::OUT_OF_RESOURCES);
        let err = warm_up::<SimApi>(&mut ZeroCopyTransfer, &session, &mut buffers).unwrap_err();
        assert!(matches!(err, TransferError::WarmupFailed(e) if e.op == ops::FINISH));
    }
}
