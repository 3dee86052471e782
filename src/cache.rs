use crate::fifo::Fifo;
use crate::{address, mem_fetch};
use std::sync::{Arc, Mutex};

/// Outcome of probing the L2 data array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    Hit,
    HitReserved,
    Miss,
    ReservationFail,
}

pub mod event {
    /// Side effects of a cache probe, reported back to the caller.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub enum Event {
        WriteSent,
        ReadSent,
        WriteBackSent,
        WriteAllocateSent,
    }

    #[must_use]
    pub fn was_write_sent(events: &[Event]) -> bool {
        events.contains(&Event::WriteSent)
    }

    #[must_use]
    pub fn was_read_sent(events: &[Event]) -> bool {
        events.contains(&Event::ReadSent)
    }

    #[must_use]
    pub fn was_writeallocate_sent(events: &[Event]) -> bool {
        events.contains(&Event::WriteAllocateSent)
    }
}

/// The L2 cache behind a memory sub partition.
///
/// The cache model itself lives outside this crate; the sub partition talks
/// to it through this seam only.  Misses leave the cache through the top
/// port handed over via [`Cache::set_top_port`] (the sub partition's
/// L2-to-DRAM queue) and come back as fills.
pub trait Cache: Send + 'static {
    /// Advance the cache by one cycle in its own clock domain.
    fn cycle(&mut self, time: u64);

    /// Probe the cache with a request.
    ///
    /// `events` receives the side effects of the probe (reads or writes sent
    /// downstream).
    fn access(
        &mut self,
        addr: address,
        fetch: mem_fetch::MemFetch,
        events: &mut Vec<event::Event>,
        time: u64,
    ) -> RequestStatus;

    /// Does this reply fill an outstanding miss of this cache?
    fn waiting_for_fill(&self, fetch: &mem_fetch::MemFetch) -> bool;

    /// Deliver a fill for an outstanding miss.
    fn fill(&mut self, fetch: mem_fetch::MemFetch, time: u64);

    /// Are serviced accesses waiting to be drained?
    fn has_ready_accesses(&self) -> bool;

    /// Pop the next serviced access.
    fn next_access(&mut self) -> Option<mem_fetch::MemFetch>;

    fn has_free_data_port(&self) -> bool;

    fn has_free_fill_port(&self) -> bool;

    /// Hand the cache its miss port (the sub partition's L2-to-DRAM queue).
    fn set_top_port(&mut self, port: Arc<Mutex<Fifo<mem_fetch::MemFetch>>>);

    /// Write back all dirty lines, returning how many were flushed.
    fn flush(&mut self) -> usize;

    fn invalidate(&mut self);
}
