use serde::{Deserialize, Serialize};

/// DRAM request scheduling policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchedulerKind {
    /// In-order: only the head of the memory request queue may bind to its
    /// bank, even while other banks sit idle.
    Fifo,
    /// First-ready (row hit), then first-come-first-served.
    FrFcfs,
}

/// DRAM timing parameters in command-clock cycles.
///
/// `{nbk:tCCD:tRRD:tRCD:tRAS:tRP:tRC:CL:WL:nbkgrp:tCCDL:tRTPL}`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimingOptions {
    /// column to column delay
    pub t_ccd: u64,
    /// minimal time between activation of rows in different banks
    pub t_rrd: u64,
    /// row to column delay before a read
    pub t_rcd: u64,
    /// row to column delay before a write
    pub t_rcdwr: u64,
    /// time needed to activate a row
    pub t_ras: u64,
    /// row precharge (deactivate row)
    pub t_rp: u64,
    /// row cycle time (precharge current, then activate different row)
    pub t_rc: u64,
    /// read to write turnaround, applies across banks
    pub t_rtw: u64,
    /// write to read turnaround, applies across banks
    pub t_wtr: u64,
    /// write to precharge in the same bank
    pub t_wtp: u64,
    /// read to precharge in the same bank
    pub t_rtp: u64,
    /// column to column delay within a bank group
    pub t_ccdl: u64,
    /// read to precharge delay within a bank group
    pub t_rtpl: u64,
}

impl Default for TimingOptions {
    fn default() -> Self {
        // GDDR5 numbers used by the reference configs
        Self {
            t_ccd: 2,
            t_rrd: 6,
            t_rcd: 12,
            t_rcdwr: 12,
            t_ras: 28,
            t_rp: 12,
            t_rc: 40,
            t_rtw: 12,
            t_wtr: 5,
            t_wtp: 13,
            t_rtp: 4,
            t_ccdl: 3,
            t_rtpl: 2,
        }
    }
}

/// Configuration of the memory partitions and their DRAM channels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// number of DRAM banks per channel
    pub num_banks: usize,
    /// number of DRAM bank groups per channel
    pub num_bank_groups: usize,
    /// DRAM bus width in bytes (default = 4 bytes, 8 bytes per cycle at DDR)
    pub dram_buswidth: usize,
    /// burst length of each DRAM request (data bus cycles)
    pub burst_length: usize,
    /// column access latency for reads (CL)
    pub cas_latency: usize,
    /// column access latency for writes (WL)
    pub write_latency: usize,
    /// frequency ratio between DRAM data bus and command bus (DDR = 2)
    pub data_command_freq_ratio: usize,
    /// number of memory chips per controller
    pub num_dram_chips_per_controller: usize,
    /// DRAM timing parameters
    pub timing: TimingOptions,
    /// DRAM scheduler policy
    pub scheduler: SchedulerKind,
    /// FR-FCFS scheduler queue size (0 = unlimited)
    pub frfcfs_sched_queue_size: usize,
    /// DRAM return queue size (0 = default of 1024)
    pub dram_return_queue_size: usize,
    /// fixed latency between the L2-to-DRAM queue and the channel
    pub dram_latency: u64,
    /// ROP delay applied to non-texture requests entering a sub partition
    pub rop_latency: u64,
    /// interconnect-to-L2 queue capacity
    pub partition_queue_interconn_to_l2: usize,
    /// L2-to-DRAM queue capacity
    pub partition_queue_l2_to_dram: usize,
    /// DRAM-to-L2 queue capacity
    pub partition_queue_dram_to_l2: usize,
    /// L2-to-interconnect queue capacity
    pub partition_queue_l2_to_interconn: usize,
    /// number of sub partitions per memory channel
    pub num_sub_partitions_per_channel: usize,
    /// number of memory channels
    pub num_memory_channels: usize,
    /// L2 cache used for texture accesses only
    pub l2_texture_only: bool,
}

impl Config {
    /// Number of bytes transferred per read or write command.
    #[must_use]
    pub fn dram_atom_size(&self) -> usize {
        // burst length x bus width x # chips per partition
        self.burst_length * self.dram_buswidth * self.num_dram_chips_per_controller
    }

    /// Number of low bank-address bits selecting the bank within its group.
    #[must_use]
    pub fn bank_tag_length(&self) -> u32 {
        debug_assert!(self.num_banks % self.num_bank_groups == 0);
        (self.num_banks / self.num_bank_groups).ilog2()
    }

    /// Total number of sub partitions across all channels.
    #[must_use]
    pub fn total_sub_partitions(&self) -> usize {
        self.num_memory_channels * self.num_sub_partitions_per_channel
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_banks: 16,
            num_bank_groups: 4,
            dram_buswidth: 4,
            burst_length: 8,
            cas_latency: 12,
            write_latency: 4,
            data_command_freq_ratio: 4,
            num_dram_chips_per_controller: 1,
            timing: TimingOptions::default(),
            scheduler: SchedulerKind::FrFcfs,
            frfcfs_sched_queue_size: 64,
            dram_return_queue_size: 116,
            dram_latency: 100,
            rop_latency: 120,
            partition_queue_interconn_to_l2: 8,
            partition_queue_l2_to_dram: 8,
            partition_queue_dram_to_l2: 8,
            partition_queue_l2_to_interconn: 8,
            num_sub_partitions_per_channel: 2,
            num_memory_channels: 8,
            l2_texture_only: false,
        }
    }
}
