use crate::mem_sub_partition::MemorySubPartition;
use crate::{arbitration, config, dram, mem_fetch};
use console::style;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Entry of the DRAM latency queue: a packet and the cycle it may enter the
/// channel.
#[derive(Debug)]
pub struct DramDelay {
    pub ready_cycle: u64,
    pub fetch: mem_fetch::MemFetch,
}

/// One memory partition: a DRAM channel shared by N sub partitions.
///
/// Per DRAM cycle the partition forwards one completed fetch back to its
/// sub partition, ticks the channel, arbitrates one new request out of the
/// sub partitions into the latency queue, and releases the latency-queue
/// head into the channel once its delay elapsed.
pub struct MemoryPartitionUnit {
    pub id: usize,
    pub dram: dram::DRAM,
    pub dram_latency_queue: VecDeque<DramDelay>,
    pub sub_partitions: Vec<Arc<Mutex<MemorySubPartition>>>,
    pub arbiter: arbitration::ArbitrationUnit,

    config: Arc<config::Config>,
}

impl MemoryPartitionUnit {
    #[must_use]
    pub fn new(id: usize, config: Arc<config::Config>) -> Self {
        let num_sub_partitions = config.num_sub_partitions_per_channel;
        let sub_partitions: Vec<_> = (0..num_sub_partitions)
            .map(|i| {
                let sub_id = id * num_sub_partitions + i;
                Arc::new(Mutex::new(MemorySubPartition::new(
                    sub_id,
                    id,
                    Arc::clone(&config),
                )))
            })
            .collect();

        let dram = dram::DRAM::new(id, Arc::clone(&config));
        let arbiter = arbitration::ArbitrationUnit::new(&arbitration::Config::from(&*config));
        Self {
            id,
            dram,
            dram_latency_queue: VecDeque::new(),
            sub_partitions,
            arbiter,
            config,
        }
    }

    #[must_use]
    pub fn busy(&self) -> bool {
        !self.dram_latency_queue.is_empty()
            || self
                .sub_partitions
                .iter()
                .any(|sub| sub.try_lock().unwrap().busy())
    }

    fn global_sub_partition_id_to_local_id(&self, global_sub_partition_id: usize) -> usize {
        global_sub_partition_id - self.id * self.config.num_sub_partitions_per_channel
    }

    /// Route a packet from the interconnect to its sub partition.
    pub fn push(&mut self, fetch: mem_fetch::MemFetch, cycle: u64) {
        let spid = self.global_sub_partition_id_to_local_id(fetch.sub_partition_id());
        self.sub_partitions[spid].try_lock().unwrap().push(fetch, cycle);
    }

    /// Acknowledge a completed packet to its sub partition.
    ///
    /// Writeback acknowledgements return the sub partition's credit here;
    /// they never travel back through the interconnect.
    pub fn set_done(&mut self, fetch: &mem_fetch::MemFetch) {
        let global_spid = fetch.sub_partition_id();
        let spid = self.global_sub_partition_id_to_local_id(global_spid);
        let mut sub = self.sub_partitions[spid].try_lock().unwrap();
        debug_assert_eq!(sub.id, global_spid);
        if fetch.access_kind().is_writeback() {
            self.arbiter.return_credit(spid);
            log::trace!(
                "{} returned from dram to sub partition {}",
                fetch,
                spid
            );
        }
        sub.set_done(fetch);
    }

    /// Advance every sub partition by one cycle in the L2 clock domain.
    pub fn cache_cycle(&mut self, cycle: u64) {
        for sub in &self.sub_partitions {
            sub.try_lock().unwrap().cache_cycle(cycle);
        }
    }

    /// Advance the partition by one cycle in the DRAM clock domain.
    pub fn dram_cycle(&mut self, cycle: u64) {
        log::debug!("{}", style(format!("partition[{}] dram cycle {}", self.id, cycle)).red());

        // pop a completed memory request from the channel and hand it to the
        // dram-to-L2 queue of the original sub partition
        match self.dram.return_queue_top().map(mem_fetch::MemFetch::sub_partition_id) {
            Some(dest_global_spid) => {
                let dest_spid = self.global_sub_partition_id_to_local_id(dest_global_spid);
                let sub = Arc::clone(&self.sub_partitions[dest_spid]);
                let mut sub = sub.try_lock().unwrap();
                debug_assert_eq!(sub.id, dest_global_spid);
                if !sub.dram_to_l2_queue.full() {
                    let mut fetch = self.dram.return_queue_pop().unwrap();
                    if fetch.access_kind().is_writeback() {
                        self.arbiter.return_credit(dest_spid);
                        sub.set_done(&fetch);
                    } else {
                        fetch.set_status(mem_fetch::Status::IN_PARTITION_DRAM_TO_L2_QUEUE, cycle);
                        self.arbiter.return_credit(dest_spid);
                        log::debug!(
                            "{} returned from dram to sub partition {}",
                            fetch,
                            dest_spid
                        );
                        debug_assert!(fetch.is_reply());
                        sub.dram_to_l2_queue.enqueue(fetch);
                    }
                }
            }
            None => {
                // keep the channel queue advancing
                self.dram.return_queue_pop();
            }
        }

        if let Some(writeback) = self.dram.cycle(cycle) {
            self.set_done(&writeback);
        }

        // arbitrate one request out of the sub partitions into the latency
        // queue
        if !self.dram.full() {
            let num_sub_partitions = self.sub_partitions.len();
            let last_issued_partition = self.arbiter.last_borrower();
            for i in 0..num_sub_partitions {
                let spid = (i + last_issued_partition + 1) % num_sub_partitions;
                let sub = Arc::clone(&self.sub_partitions[spid]);
                let sub = sub.try_lock().unwrap();
                let sub_partition_contention = sub.dram_to_l2_queue.full();
                let has_dram_resource = self.arbiter.has_credits(spid);
                let can_issue_to_dram = has_dram_resource && !sub_partition_contention;
                if !can_issue_to_dram {
                    continue;
                }
                let mut l2_to_dram_queue = sub.l2_to_dram_queue.lock().unwrap();
                if let Some(mut fetch) = l2_to_dram_queue.dequeue() {
                    log::debug!("issue {} from sub partition {} to dram", fetch, spid);
                    fetch.set_status(mem_fetch::Status::IN_PARTITION_DRAM_LATENCY_QUEUE, cycle);
                    self.dram_latency_queue.push_back(DramDelay {
                        ready_cycle: cycle + self.config.dram_latency,
                        fetch,
                    });
                    self.arbiter.borrow_credit(spid);
                    // the DRAM should only accept one request per cycle
                    break;
                }
            }
        }

        // release the latency queue head into the channel
        if let Some(head) = self.dram_latency_queue.front() {
            if cycle >= head.ready_cycle && !self.dram.full() {
                let DramDelay { fetch, .. } = self.dram_latency_queue.pop_front().unwrap();
                self.dram.push(fetch, cycle);
            }
        }
    }
}
