use crate::fifo::Fifo;
use crate::{cache, config, mem_fetch};
use console::style;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// One memory sub partition: the L2 slice and queues in front of a share of
/// a DRAM channel.
///
/// Four bounded queues connect the interconnect, the L2 seam and the DRAM
/// side; non-texture traffic additionally passes through a fixed-latency
/// ROP delay stage on entry.
pub struct MemorySubPartition {
    /// global sub partition id
    pub id: usize,
    /// id of the memory partition owning this sub partition
    pub partition_id: usize,
    pub config: Arc<config::Config>,

    pub interconn_to_l2_queue: Fifo<mem_fetch::MemFetch>,
    /// shared with the L2 cache, which pushes its misses here
    pub l2_to_dram_queue: Arc<Mutex<Fifo<mem_fetch::MemFetch>>>,
    pub dram_to_l2_queue: Fifo<mem_fetch::MemFetch>,
    /// L2 cache hit response queue
    pub l2_to_interconn_queue: Fifo<mem_fetch::MemFetch>,
    /// (ready cycle, packet) pairs delayed by the ROP latency
    pub rop_queue: VecDeque<(u64, mem_fetch::MemFetch)>,

    pub l2_cache: Option<Box<dyn cache::Cache>>,

    /// uids of packets in flight inside this sub partition
    request_tracker: HashSet<u64>,
}

impl std::fmt::Debug for MemorySubPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySubPartition")
            .field("id", &self.id)
            .field("partition_id", &self.partition_id)
            .finish()
    }
}

impl MemorySubPartition {
    #[must_use]
    pub fn new(id: usize, partition_id: usize, config: Arc<config::Config>) -> Self {
        let interconn_to_l2_queue = Fifo::new(Some(config.partition_queue_interconn_to_l2));
        let l2_to_dram_queue = Arc::new(Mutex::new(Fifo::new(Some(
            config.partition_queue_l2_to_dram,
        ))));
        let dram_to_l2_queue = Fifo::new(Some(config.partition_queue_dram_to_l2));
        let l2_to_interconn_queue = Fifo::new(Some(config.partition_queue_l2_to_interconn));
        Self {
            id,
            partition_id,
            config,
            interconn_to_l2_queue,
            l2_to_dram_queue,
            dram_to_l2_queue,
            l2_to_interconn_queue,
            rop_queue: VecDeque::new(),
            l2_cache: None,
            request_tracker: HashSet::new(),
        }
    }

    /// Attach the L2 cache collaborator, wiring its miss port to the
    /// L2-to-DRAM queue.
    pub fn set_l2_cache(&mut self, mut l2_cache: Box<dyn cache::Cache>) {
        l2_cache.set_top_port(Arc::clone(&self.l2_to_dram_queue));
        self.l2_cache = Some(l2_cache);
    }

    /// Accept a packet from the interconnect.
    ///
    /// Texture requests enter the interconnect-to-L2 queue directly; all
    /// other requests are delayed by the ROP latency first.  Callers must
    /// check [`MemorySubPartition::full`].
    pub fn push(&mut self, mut fetch: mem_fetch::MemFetch, cycle: u64) {
        assert!(!self.interconn_to_l2_queue.full());
        self.request_tracker.insert(fetch.uid);
        if fetch.is_texture() {
            fetch.set_status(mem_fetch::Status::IN_PARTITION_ICNT_TO_L2_QUEUE, cycle);
            self.interconn_to_l2_queue.enqueue(fetch);
        } else {
            let ready_cycle = cycle + self.config.rop_latency;
            fetch.set_status(mem_fetch::Status::IN_PARTITION_ROP_DELAY, cycle);
            log::debug!("{}: {fetch}", style("push to rop").red());
            self.rop_queue.push_back((ready_cycle, fetch));
        }
    }

    /// Ingress predicate checked by the interconnect before `push`.
    #[must_use]
    pub fn full(&self) -> bool {
        self.interconn_to_l2_queue.full()
    }

    #[must_use]
    pub fn busy(&self) -> bool {
        !self.request_tracker.is_empty()
    }

    pub fn flush_l2(&mut self) -> Option<usize> {
        self.l2_cache.as_mut().map(|l2| l2.flush())
    }

    pub fn invalidate_l2(&mut self) {
        if let Some(l2) = &mut self.l2_cache {
            l2.invalidate();
        }
    }

    /// Pop the next reply for the interconnect.
    ///
    /// Writeback acknowledgements are consumed here and yield `None`.
    pub fn pop(&mut self) -> Option<mem_fetch::MemFetch> {
        let fetch = self.l2_to_interconn_queue.dequeue()?;
        self.request_tracker.remove(&fetch.uid);
        if fetch.access_kind().is_writeback() {
            return None;
        }
        Some(fetch)
    }

    /// Peek the next reply for the interconnect, consuming any writeback
    /// acknowledgements in front of it.
    pub fn top(&mut self) -> Option<&mem_fetch::MemFetch> {
        while self
            .l2_to_interconn_queue
            .first()
            .is_some_and(|fetch| fetch.access_kind().is_writeback())
        {
            let fetch = self.l2_to_interconn_queue.dequeue().unwrap();
            self.request_tracker.remove(&fetch.uid);
        }
        self.l2_to_interconn_queue.first()
    }

    pub fn set_done(&mut self, fetch: &mem_fetch::MemFetch) {
        self.request_tracker.remove(&fetch.uid);
    }

    /// Advance the sub partition by one cycle in the L2 clock domain.
    pub fn cache_cycle(&mut self, cycle: u64) {
        use cache::RequestStatus;
        use mem_fetch::Status;

        log::debug!(
            "{}: rop queue={}, icnt to l2={}, l2 to icnt={}, dram to l2={}",
            style(format!("sub partition[{}] cache cycle {}", self.id, cycle)).blue(),
            self.rop_queue.len(),
            self.interconn_to_l2_queue,
            self.l2_to_interconn_queue,
            self.dram_to_l2_queue,
        );

        // L2 fill responses
        if let Some(l2_cache) = &mut self.l2_cache {
            if l2_cache.has_ready_accesses() && !self.l2_to_interconn_queue.full() {
                let mut fetch = l2_cache.next_access().unwrap();
                // don't pass write allocate read requests back to the upper
                // level cache
                if fetch.access_kind() != mem_fetch::access::Kind::L2_WR_ALLOC_R {
                    fetch.set_reply();
                    fetch.set_status(Status::IN_PARTITION_L2_TO_ICNT_QUEUE, cycle);
                    self.l2_to_interconn_queue.enqueue(fetch);
                } else {
                    self.request_tracker.remove(&fetch.uid);
                }
            }
        }

        // DRAM replies fill the L2 or bypass it toward the interconnect
        if let Some(reply) = self.dram_to_l2_queue.first() {
            match self.l2_cache {
                Some(ref mut l2_cache) if l2_cache.waiting_for_fill(reply) => {
                    if l2_cache.has_free_fill_port() {
                        let mut reply = self.dram_to_l2_queue.dequeue().unwrap();
                        log::debug!("filling L2 with {}", &reply);
                        reply.set_status(Status::IN_PARTITION_L2_FILL_QUEUE, cycle);
                        l2_cache.fill(reply, cycle);
                    }
                }
                _ if !self.l2_to_interconn_queue.full() => {
                    let mut reply = self.dram_to_l2_queue.dequeue().unwrap();
                    reply.set_status(Status::IN_PARTITION_L2_TO_ICNT_QUEUE, cycle);
                    self.l2_to_interconn_queue.enqueue(reply);
                }
                _ => {}
            }
        }

        // prior L2 misses are pushed onto the L2-to-DRAM port here
        if let Some(l2_cache) = &mut self.l2_cache {
            l2_cache.cycle(cycle);
        }

        // new L2 accesses, or the bypass for a disabled/texture-only L2
        let l2_to_dram_full = self.l2_to_dram_queue.lock().unwrap().full();
        if !l2_to_dram_full {
            if let Some(fetch) = self.interconn_to_l2_queue.first() {
                let use_l2 = self.l2_cache.is_some()
                    && (!self.config.l2_texture_only || fetch.is_texture());
                if use_l2 {
                    let l2_cache = self.l2_cache.as_mut().unwrap();
                    let output_full = self.l2_to_interconn_queue.full();
                    let port_free = l2_cache.has_free_data_port();
                    if !output_full && port_free {
                        let mut events = Vec::new();
                        let status =
                            l2_cache.access(fetch.addr(), fetch.clone(), &mut events, cycle);
                        let write_sent = cache::event::was_write_sent(&events);
                        let read_sent = cache::event::was_read_sent(&events);
                        log::debug!("probing L2 address={} status={:?}", fetch.addr(), status);

                        if status == RequestStatus::Hit {
                            let mut fetch = self.interconn_to_l2_queue.dequeue().unwrap();
                            if !write_sent {
                                // L2 cache replies
                                assert!(!read_sent);
                                if fetch.access_kind() == mem_fetch::access::Kind::L1_WRBK_ACC {
                                    self.request_tracker.remove(&fetch.uid);
                                } else {
                                    fetch.set_reply();
                                    fetch.set_status(Status::IN_PARTITION_L2_TO_ICNT_QUEUE, cycle);
                                    self.l2_to_interconn_queue.enqueue(fetch);
                                }
                            }
                        } else if status != RequestStatus::ReservationFail {
                            // L2 cache accepted the request
                            self.interconn_to_l2_queue.dequeue();
                        } else {
                            // L2 cache lock-up: will try again next cycle
                            assert!(!write_sent);
                            assert!(!read_sent);
                        }
                    }
                } else {
                    // L2 is disabled or non-texture access to texture-only L2
                    let mut fetch = self.interconn_to_l2_queue.dequeue().unwrap();
                    fetch.set_status(Status::IN_PARTITION_L2_TO_DRAM_QUEUE, cycle);
                    self.l2_to_dram_queue.lock().unwrap().enqueue(fetch);
                }
            }
        }

        // ROP delay queue
        if !self.interconn_to_l2_queue.full() {
            if let Some((ready_cycle, _)) = self.rop_queue.front() {
                if cycle >= *ready_cycle {
                    let (_, mut fetch) = self.rop_queue.pop_front().unwrap();
                    log::debug!("{}: {fetch}", style("pop from rop").red());
                    fetch.set_status(Status::IN_PARTITION_ICNT_TO_L2_QUEUE, cycle);
                    self.interconn_to_l2_queue.enqueue(fetch);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MemorySubPartition;
    use crate::cache::{self, event::Event, RequestStatus};
    use crate::config::Config;
    use crate::fifo::Fifo;
    use crate::mem_fetch::testing::fetch;
    use crate::mem_fetch::{access, MemFetch, Status};
    use std::collections::{HashSet, VecDeque};
    use std::sync::{Arc, Mutex};

    fn sub_partition(rop_latency: u64) -> MemorySubPartition {
        let config = Arc::new(Config {
            rop_latency,
            ..Config::default()
        });
        MemorySubPartition::new(0, 0, config)
    }

    /// Scriptable stand-in for the L2 cache collaborator.
    #[derive(Default)]
    struct StubL2 {
        status: Option<RequestStatus>,
        events: Vec<Event>,
        ready: VecDeque<MemFetch>,
        waiting_uids: HashSet<u64>,
        filled: Vec<MemFetch>,
        accessed: Vec<u64>,
        port: Option<Arc<Mutex<Fifo<MemFetch>>>>,
    }

    impl StubL2 {
        /// Share the stub between the sub partition and the test.
        fn install(self, sub: &mut MemorySubPartition) -> Arc<Mutex<StubL2>> {
            let stub = Arc::new(Mutex::new(self));
            sub.set_l2_cache(Box::new(Arc::clone(&stub)));
            stub
        }
    }

    impl cache::Cache for Arc<Mutex<StubL2>> {
        fn cycle(&mut self, _time: u64) {}

        fn access(
            &mut self,
            addr: crate::address,
            _fetch: MemFetch,
            events: &mut Vec<Event>,
            _time: u64,
        ) -> RequestStatus {
            let mut stub = self.lock().unwrap();
            stub.accessed.push(addr);
            events.extend(stub.events.iter().copied());
            stub.status.expect("unexpected L2 access")
        }

        fn waiting_for_fill(&self, fetch: &MemFetch) -> bool {
            self.lock().unwrap().waiting_uids.contains(&fetch.uid)
        }

        fn fill(&mut self, fetch: MemFetch, _time: u64) {
            self.lock().unwrap().filled.push(fetch);
        }

        fn has_ready_accesses(&self) -> bool {
            !self.lock().unwrap().ready.is_empty()
        }

        fn next_access(&mut self) -> Option<MemFetch> {
            self.lock().unwrap().ready.pop_front()
        }

        fn has_free_data_port(&self) -> bool {
            true
        }

        fn has_free_fill_port(&self) -> bool {
            true
        }

        fn set_top_port(&mut self, port: Arc<Mutex<Fifo<MemFetch>>>) {
            self.lock().unwrap().port = Some(port);
        }

        fn flush(&mut self) -> usize {
            0
        }

        fn invalidate(&mut self) {}
    }

    #[test]
    fn non_texture_requests_wait_in_the_rop_queue() {
        let mut sub = sub_partition(4);
        let read = fetch(access::Kind::GLOBAL_ACC_R, 0, 0, 1, 0, 32, 0);
        sub.push(read, 0);
        assert!(sub.busy());
        assert_eq!(sub.rop_queue.len(), 1);
        assert!(sub.interconn_to_l2_queue.is_empty());

        for cycle in 0..4 {
            sub.cache_cycle(cycle);
            assert!(
                sub.interconn_to_l2_queue.is_empty(),
                "visible before the rop latency elapsed"
            );
        }
        sub.cache_cycle(4);
        assert!(sub.rop_queue.is_empty());
        assert_eq!(sub.interconn_to_l2_queue.len(), 1);
        assert_eq!(
            sub.interconn_to_l2_queue.first().unwrap().status,
            Status::IN_PARTITION_ICNT_TO_L2_QUEUE
        );

        // without an L2 the request bypasses straight to the DRAM side
        sub.cache_cycle(5);
        assert!(sub.interconn_to_l2_queue.is_empty());
        assert_eq!(sub.l2_to_dram_queue.lock().unwrap().len(), 1);
    }

    #[test]
    fn texture_requests_bypass_the_rop_queue() {
        let mut sub = sub_partition(100);
        let texture = fetch(access::Kind::TEXTURE_ACC_R, 0, 0, 1, 0, 32, 0);
        sub.push(texture, 0);
        assert!(sub.rop_queue.is_empty());
        assert_eq!(sub.interconn_to_l2_queue.len(), 1);
    }

    #[test]
    fn replies_from_dram_reach_the_interconnect() {
        let mut sub = sub_partition(1);
        let mut reply = fetch(access::Kind::GLOBAL_ACC_R, 0, 0, 1, 0, 32, 0);
        let uid = reply.uid;
        sub.request_tracker.insert(uid);
        reply.set_reply();
        sub.dram_to_l2_queue.enqueue(reply);

        sub.cache_cycle(0);
        assert_eq!(sub.l2_to_interconn_queue.len(), 1);
        let popped = sub.pop().unwrap();
        assert_eq!(popped.uid, uid);
        assert!(popped.is_reply());
        assert!(!sub.busy());
    }

    #[test]
    fn top_and_pop_consume_writeback_acknowledgements() {
        let mut sub = sub_partition(1);
        let writeback = fetch(access::Kind::L1_WRBK_ACC, 0, 0, 1, 0, 32, 0);
        let read = fetch(access::Kind::GLOBAL_ACC_R, 0, 0, 2, 0, 32, 0);
        let read_uid = read.uid;
        sub.l2_to_interconn_queue.enqueue(writeback);
        sub.l2_to_interconn_queue.enqueue(read);

        // top drains the leading writeback and peeks the real reply
        assert_eq!(sub.top().unwrap().uid, read_uid);
        assert_eq!(sub.pop().unwrap().uid, read_uid);
        assert!(sub.top().is_none());
    }

    #[test]
    fn l2_hit_replies_to_the_interconnect() {
        let mut sub = sub_partition(1);
        let stub = StubL2 {
            status: Some(RequestStatus::Hit),
            ..StubL2::default()
        }
        .install(&mut sub);
        let texture = fetch(access::Kind::TEXTURE_ACC_R, 0, 0, 1, 0, 32, 0);
        let uid = texture.uid;
        let addr = texture.addr();
        sub.push(texture, 0);

        sub.cache_cycle(0);
        assert!(sub.interconn_to_l2_queue.is_empty());
        assert_eq!(stub.lock().unwrap().accessed, vec![addr]);
        let reply = sub.pop().unwrap();
        assert_eq!(reply.uid, uid);
        assert!(reply.is_reply());
        assert!(!sub.busy());
    }

    #[test]
    fn l2_reservation_fail_retries_next_cycle() {
        let mut sub = sub_partition(1);
        let stub = StubL2 {
            status: Some(RequestStatus::ReservationFail),
            ..StubL2::default()
        }
        .install(&mut sub);
        sub.push(fetch(access::Kind::TEXTURE_ACC_R, 0, 0, 1, 0, 32, 0), 0);

        // the access is probed every cycle but never leaves the queue
        sub.cache_cycle(0);
        sub.cache_cycle(1);
        assert_eq!(stub.lock().unwrap().accessed.len(), 2);
        assert_eq!(sub.interconn_to_l2_queue.len(), 1);
        assert!(sub.l2_to_interconn_queue.is_empty());
    }

    #[test]
    fn l2_accepts_misses_and_takes_fills() {
        let mut sub = sub_partition(1);
        let miss = fetch(access::Kind::TEXTURE_ACC_R, 0, 0, 1, 0, 32, 0);
        let uid = miss.uid;
        let stub = StubL2 {
            status: Some(RequestStatus::Miss),
            waiting_uids: HashSet::from([uid]),
            ..StubL2::default()
        }
        .install(&mut sub);
        // the miss port points at the L2-to-DRAM queue
        assert!(stub.lock().unwrap().port.is_some());
        sub.push(miss.clone(), 0);

        // accepted by the L2: the request leaves the icnt queue silently
        sub.cache_cycle(0);
        assert!(sub.interconn_to_l2_queue.is_empty());
        assert!(sub.l2_to_interconn_queue.is_empty());

        // the DRAM reply fills the cache instead of bypassing it
        let mut reply = miss;
        reply.set_reply();
        sub.dram_to_l2_queue.enqueue(reply);
        sub.cache_cycle(1);
        assert!(sub.dram_to_l2_queue.is_empty());
        assert!(sub.l2_to_interconn_queue.is_empty());
        let stub = stub.lock().unwrap();
        assert_eq!(stub.filled.len(), 1);
        assert_eq!(stub.filled[0].uid, uid);
    }

    #[test]
    fn ready_accesses_drain_to_the_interconnect() {
        let mut sub = sub_partition(1);
        let serviced = fetch(access::Kind::GLOBAL_ACC_R, 0, 0, 1, 0, 32, 0);
        let discarded = fetch(access::Kind::L2_WR_ALLOC_R, 0, 0, 2, 0, 32, 0);
        let uid = serviced.uid;
        StubL2 {
            ready: VecDeque::from([discarded, serviced]),
            ..StubL2::default()
        }
        .install(&mut sub);

        // write-allocate reads are not passed back to the upper level
        sub.cache_cycle(0);
        assert!(sub.l2_to_interconn_queue.is_empty());
        sub.cache_cycle(1);
        assert_eq!(sub.l2_to_interconn_queue.len(), 1);
        assert_eq!(sub.pop().unwrap().uid, uid);
    }

    #[test]
    fn rop_release_respects_icnt_queue_capacity() {
        let config = Arc::new(Config {
            rop_latency: 0,
            partition_queue_interconn_to_l2: 1,
            partition_queue_l2_to_dram: 1,
            ..Config::default()
        });
        let mut sub = MemorySubPartition::new(0, 0, config);
        sub.push(fetch(access::Kind::GLOBAL_ACC_R, 0, 0, 2, 0, 32, 0), 0);
        sub.push(fetch(access::Kind::TEXTURE_ACC_R, 0, 0, 1, 0, 32, 0), 0);
        assert!(sub.full());
        // a stalled DRAM side keeps the texture access parked in the icnt
        // queue, which in turn stalls the rop release
        let blocker = fetch(access::Kind::GLOBAL_ACC_R, 0, 0, 3, 0, 32, 0);
        sub.l2_to_dram_queue.lock().unwrap().enqueue(blocker);

        sub.cache_cycle(0);
        assert_eq!(sub.rop_queue.len(), 1);
        assert!(sub.full());

        // DRAM side drains: texture moves on and the rop head follows
        sub.l2_to_dram_queue.lock().unwrap().dequeue();
        sub.cache_cycle(1);
        assert!(sub.rop_queue.is_empty());
        assert_eq!(sub.interconn_to_l2_queue.len(), 1);
    }
}
