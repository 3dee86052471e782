use crate::config;

/// Arbitration configuration, derived from the partition config.
#[derive(Debug, Clone)]
pub struct Config {
    pub num_sub_partitions_per_channel: usize,
    pub frfcfs_sched_queue_size: usize,
    pub dram_return_queue_size: usize,
}

impl From<&config::Config> for Config {
    fn from(config: &config::Config) -> Self {
        Config {
            num_sub_partitions_per_channel: config.num_sub_partitions_per_channel,
            frfcfs_sched_queue_size: config.frfcfs_sched_queue_size,
            dram_return_queue_size: config.dram_return_queue_size,
        }
    }
}

/// Credit accounting between the sub partitions sharing one DRAM channel.
///
/// Every sub partition owns one guaranteed private credit; the rest of the
/// downstream buffer space is a shared pool.  A sub partition may inject a
/// request into the channel pipeline only while it holds a credit, which
/// keeps a single busy sub partition from saturating the shared queues.
#[derive(Debug)]
pub struct ArbitrationUnit {
    /// id of the last subpartition that borrowed credit
    pub last_borrower: usize,
    pub shared_credit_limit: usize,
    pub private_credit_limit: usize,

    // credits borrowed by the subpartitions
    pub private_credit: Vec<usize>,
    pub shared_credit: usize,
}

impl ArbitrationUnit {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let num_borrowers = config.num_sub_partitions_per_channel;
        assert!(num_borrowers > 0);
        let private_credit = vec![0; num_borrowers];
        let shared_credit_limit =
            if config.frfcfs_sched_queue_size == 0 || config.dram_return_queue_size == 0 {
                // no limit if either of the queues has no limit in size
                0
            } else {
                let shared_credit_limit =
                    config.frfcfs_sched_queue_size + config.dram_return_queue_size;
                shared_credit_limit
                    .checked_sub(num_borrowers - 1)
                    .expect("arbitration: too many borrowers")
            };
        Self {
            last_borrower: num_borrowers - 1,
            shared_credit_limit,
            private_credit_limit: 1,
            private_credit,
            shared_credit: 0,
        }
    }

    /// Check if a subpartition still has credit.
    #[must_use]
    pub fn has_credits(&self, inner_sub_partition_id: usize) -> bool {
        if self.private_credit[inner_sub_partition_id] < self.private_credit_limit {
            return true;
        }
        self.shared_credit_limit == 0 || self.shared_credit < self.shared_credit_limit
    }

    /// Borrow a credit for a subpartition.
    pub fn borrow_credit(&mut self, inner_sub_partition_id: usize) {
        let private_credit = &mut self.private_credit[inner_sub_partition_id];
        if *private_credit < self.private_credit_limit {
            *private_credit += 1;
        } else if self.shared_credit_limit == 0 || self.shared_credit < self.shared_credit_limit {
            self.shared_credit += 1;
        } else {
            panic!("arbitration: borrowing from depleted credit!");
        }
        self.last_borrower = inner_sub_partition_id;
    }

    /// Return a credit from a subpartition.
    pub fn return_credit(&mut self, inner_sub_partition_id: usize) {
        let private_credit = &mut self.private_credit[inner_sub_partition_id];
        if *private_credit > 0 {
            *private_credit -= 1;
        } else {
            self.shared_credit = self
                .shared_credit
                .checked_sub(1)
                .expect("arbitration: returning more than available credits!");
        }
    }

    /// The last subpartition that borrowed credit.
    #[must_use]
    pub fn last_borrower(&self) -> usize {
        self.last_borrower
    }

    /// Total credits currently out on loan.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.private_credit.iter().sum::<usize>() + self.shared_credit
    }
}
