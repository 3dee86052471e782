use crate::dram::DramRequest;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// First-ready, first-come-first-served DRAM request scheduler.
///
/// Requests are binned per bank and per row.  A bank keeps serving its open
/// row while hits remain; when forced to switch it falls back to the row of
/// the oldest pending request, first-come-first-served across rows.
///
/// Every request gets a monotonically increasing sequence number on entry;
/// the per-bank insertion order lives in a `BTreeMap` keyed by it and the
/// row index stores sequence numbers, so removal from both structures is
/// cheap and needs no stable iterators.
#[derive(Debug, Default)]
pub struct FrFcfsScheduler {
    banks: Vec<BankQueue>,
    num_pending: usize,
    next_seq: u64,
}

#[derive(Debug, Default)]
struct BankQueue {
    /// pending requests in insertion order
    queue: BTreeMap<u64, DramRequest>,
    /// row -> pending sequence numbers, newest at the front
    bins: HashMap<u64, VecDeque<u64>>,
    /// row bucket currently being serviced
    last_row: Option<u64>,

    row_service_timestamp: u64,
    pub max_row_service_time: u64,
    pub num_row_switches: u64,
}

impl BankQueue {
    /// The serviced row is switching: close out its service interval.
    fn collect_row_switch(&mut self, time: u64) {
        if time > self.row_service_timestamp {
            let service_time = time - self.row_service_timestamp;
            self.max_row_service_time = self.max_row_service_time.max(service_time);
        }
        self.row_service_timestamp = time;
        self.num_row_switches += 1;
    }
}

impl FrFcfsScheduler {
    #[must_use]
    pub fn new(num_banks: usize) -> Self {
        Self {
            banks: (0..num_banks).map(|_| BankQueue::default()).collect(),
            num_pending: 0,
            next_seq: 0,
        }
    }

    #[must_use]
    pub fn num_pending(&self) -> usize {
        self.num_pending
    }

    /// Times the scheduler was forced off the serviced row of `bank`.
    #[must_use]
    pub fn num_row_switches(&self, bank: usize) -> u64 {
        self.banks[bank].num_row_switches
    }

    #[must_use]
    pub fn max_row_service_time(&self, bank: usize) -> u64 {
        self.banks[bank].max_row_service_time
    }

    pub fn add(&mut self, req: DramRequest) {
        let (bank, row) = {
            let req = req.lock().unwrap();
            (req.bank, req.row)
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        let bank = &mut self.banks[bank];
        bank.queue.insert(seq, req);
        bank.bins.entry(row).or_default().push_front(seq);
        self.num_pending += 1;
    }

    /// Pick the next request for `bank`, whose open row is `curr_row`.
    ///
    /// Returns `None` when the bank has nothing pending.
    pub fn schedule(&mut self, bank: usize, curr_row: u64, time: u64) -> Option<DramRequest> {
        let bank = &mut self.banks[bank];
        if bank.last_row.is_none() {
            if bank.queue.is_empty() {
                return None;
            }
            if bank.bins.contains_key(&curr_row) {
                // row hit continues
                bank.last_row = Some(curr_row);
            } else {
                // fall back to the row of the oldest pending request
                let (_, oldest) = bank.queue.iter().next().unwrap();
                let row = oldest.lock().unwrap().row;
                debug_assert!(bank.bins.contains_key(&row), "where did the request go?");
                bank.last_row = Some(row);
                bank.collect_row_switch(time);
            }
        }
        let row = bank.last_row.unwrap();
        let bin = bank.bins.get_mut(&row).unwrap();
        // oldest request of the serviced row
        let seq = bin.pop_back().unwrap();
        let req = bank.queue.remove(&seq).unwrap();
        if bin.is_empty() {
            bank.bins.remove(&row);
            bank.last_row = None;
        }
        assert!(self.num_pending > 0);
        self.num_pending -= 1;
        Some(req)
    }
}

#[cfg(test)]
mod tests {
    use super::FrFcfsScheduler;
    use crate::dram::{DramRequest, Request};
    use crate::mem_fetch::testing::read_fetch;
    use std::sync::{Arc, Mutex};

    fn request(bank: u64, row: u64) -> DramRequest {
        Arc::new(Mutex::new(Request::new(read_fetch(bank, row, 32), 0)))
    }

    fn row_of(req: &DramRequest) -> u64 {
        req.lock().unwrap().row
    }

    #[test]
    fn row_hits_are_served_before_older_rows() {
        let mut sched = FrFcfsScheduler::new(2);
        sched.add(request(0, 1)); // A
        sched.add(request(0, 2)); // B
        sched.add(request(0, 1)); // C
        assert_eq!(sched.num_pending(), 3);

        // bank starts closed on some other row: oldest request (A) wins,
        // then its row mate (C), then B
        let mut served = Vec::new();
        let mut curr_row = 0;
        for time in 0..3 {
            let req = sched.schedule(0, curr_row, time).unwrap();
            curr_row = row_of(&req);
            served.push(curr_row);
        }
        similar_asserts::assert_eq!(served, vec![1, 1, 2]);
        assert!(sched.schedule(0, 2, 3).is_none());
        assert_eq!(sched.num_pending(), 0);

        // picking row 1 over the closed row, then row 2 over row 1
        assert_eq!(sched.num_row_switches(0), 2);
    }

    #[test]
    fn open_row_is_preferred_over_older_requests() {
        let mut sched = FrFcfsScheduler::new(1);
        sched.add(request(0, 7)); // older, different row
        sched.add(request(0, 5)); // hit on the open row
        assert_eq!(row_of(&sched.schedule(0, 5, 0).unwrap()), 5);
        assert_eq!(row_of(&sched.schedule(0, 5, 1).unwrap()), 7);
    }

    #[test]
    fn within_a_row_oldest_first() {
        let mut sched = FrFcfsScheduler::new(1);
        let first = request(0, 3);
        let second = request(0, 3);
        let first_uid = first.lock().unwrap().data.as_ref().unwrap().uid;
        sched.add(first);
        sched.add(second);
        let served = sched.schedule(0, 3, 0).unwrap();
        let served_uid = served.lock().unwrap().data.as_ref().unwrap().uid;
        assert_eq!(served_uid, first_uid);
    }

    #[test]
    fn banks_are_independent() {
        let mut sched = FrFcfsScheduler::new(2);
        sched.add(request(1, 4));
        assert!(sched.schedule(0, 4, 0).is_none());
        assert!(sched.schedule(1, 4, 0).is_some());
    }
}
