//! Cycle-accurate model of one GPU memory partition.
//!
//! A partition owns a single DRAM channel and the sub-partitions that share
//! it.  Requests arrive from the interconnect as [`mem_fetch::MemFetch`]
//! packets, pass through the sub-partition queues and the L2 seam, are
//! scheduled onto banked DRAM under a full JEDEC-style timing model, and
//! return as replies.
//!
//! The simulation is single-threaded and advances in lockstep: the caller
//! drives [`MemoryPartitionUnit::cache_cycle`] in the L2 clock domain and
//! [`MemoryPartitionUnit::dram_cycle`] in the DRAM clock domain.  All timing
//! comes from explicit counters and the [`fifo::DelayPipeline`] primitive.

pub mod addrdec;
pub mod arbitration;
pub mod cache;
pub mod config;
pub mod dram;
pub mod fifo;
pub mod mem_fetch;
pub mod mem_partition_unit;
pub mod mem_sub_partition;
pub mod scheduler;

pub use config::Config;
pub use mem_fetch::MemFetch;
pub use mem_partition_unit::MemoryPartitionUnit;
pub use mem_sub_partition::MemorySubPartition;

/// Simulated physical address.
#[allow(non_camel_case_types)]
pub type address = u64;
