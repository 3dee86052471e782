use super::{config, mem_fetch, scheduler::FrFcfsScheduler};
use crate::fifo::{DelayPipeline, Fifo};
use crate::address;
use console::style;
use std::sync::{Arc, Mutex};

/// Direction of the last data transfer on the channel bus.
///
/// Switching direction pays the RTW/WTR turnaround and re-times the
/// read/write queue to CL or WL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RwDir {
    Read,
    Write,
}

/// Row-buffer state of a DRAM bank.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BankState {
    Idle,
    Active,
}

/// One in-flight DRAM request.
///
/// Born when a packet enters the channel, bound to exactly one bank, and
/// destroyed after its last atom drains from the read/write queue.  During a
/// multi-atom transfer the same request is visible through the bank slot and
/// the read/write queue at once, hence the shared handle.
#[derive(Debug)]
pub struct Request {
    pub bank: usize,
    pub row: u64,
    pub col: u64,
    pub addr: address,
    /// total payload size in bytes
    pub nbytes: u32,
    /// bytes transferred toward DRAM, advanced per column command
    pub tx_bytes: u32,
    /// bytes drained from the read/write queue toward the return path
    pub dq_bytes: u32,
    pub dir: RwDir,
    pub timestamp: u64,
    pub insertion_time: u64,
    /// the upstream packet, surfaced once when the transfer completes
    pub data: Option<mem_fetch::MemFetch>,
}

pub type DramRequest = Arc<Mutex<Request>>;

impl Request {
    #[must_use]
    pub fn new(fetch: mem_fetch::MemFetch, time: u64) -> Self {
        let tlx = fetch.tlx_addr;
        Self {
            bank: tlx.bk as usize,
            row: tlx.row,
            col: tlx.col,
            addr: fetch.addr(),
            nbytes: fetch.data_size(),
            tx_bytes: 0,
            dq_bytes: 0,
            dir: if fetch.is_write() {
                RwDir::Write
            } else {
                RwDir::Read
            },
            timestamp: time,
            insertion_time: time,
            data: Some(fetch),
        }
    }
}

/// A DRAM bank: one row buffer plus the timers gating its commands.
#[derive(Debug)]
pub struct Bank {
    pub state: BankState,
    /// the open row; meaningful only while `state` is `Active`
    pub curr_row: u64,

    /// row to column delay (read)
    pub rcd: u64,
    /// row to column delay (write)
    pub rcd_wr: u64,
    /// activate to precharge
    pub ras: u64,
    /// precharge to activate
    pub rp: u64,
    /// activate to activate (same bank)
    pub rc: u64,
    /// write to precharge
    pub wtp: u64,
    /// read to precharge
    pub rtp: u64,

    /// the request currently serviced by this bank, at most one
    pub mrq: Option<DramRequest>,
    /// bank group this bank belongs to
    pub group: usize,

    pub n_access: u64,
    pub n_idle: u64,
}

impl Bank {
    fn new(group: usize) -> Self {
        Self {
            state: BankState::Idle,
            curr_row: 0,
            rcd: 0,
            rcd_wr: 0,
            ras: 0,
            rp: 0,
            rc: 0,
            wtp: 0,
            rtp: 0,
            mrq: None,
            group,
            n_access: 0,
            n_idle: 0,
        }
    }
}

/// Shared timers of a bank group.
#[derive(Clone, Debug, Default)]
pub struct BankGroup {
    /// column to column delay within the group
    pub ccdl: u64,
    /// read to precharge delay within the group
    pub rtpl: u64,
}

/// Channel activity counters, dumped periodically by the surrounding
/// simulator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    pub n_cmd: u64,
    pub n_activity: u64,
    pub n_nop: u64,
    pub n_act: u64,
    pub n_pre: u64,
    pub n_rd: u64,
    pub n_wr: u64,
    pub n_req: u64,
    pub max_mrqs_temp: u64,
    pub max_mrqs: u64,
    pub ave_mrqs: u64,
    /// busy data-bus cycles, in command-clock units
    pub bwutil: u64,
}

/// One DRAM channel: banked memory behind a JEDEC-style timing model.
///
/// Requests enter through [`DRAM::push`] into the memory request queue, are
/// assigned to banks by the configured scheduler, issue at most one command
/// per cycle across all banks, and drain through the read/write queue into
/// the return queue.
pub struct DRAM {
    pub id: usize,
    config: Arc<config::Config>,

    banks: Vec<Bank>,
    bank_groups: Vec<BankGroup>,
    /// next bank considered first by the schedulers, rotated on ACT/PRE
    prio: usize,

    /// activate to activate (different banks)
    rrd: u64,
    /// column to column delay
    ccd: u64,
    /// read to write turnaround
    rtw: u64,
    /// write to read turnaround
    wtr: u64,
    /// direction of the last column command
    rw_last: RwDir,

    /// incoming memory request queue
    mrqq: Fifo<DramRequest>,
    /// in-flight column transfers, timed to CL (reads) or WL (writes)
    rwq: DelayPipeline<DramRequest>,
    /// completed fetches awaiting pickup by the partition
    returnq: Fifo<mem_fetch::MemFetch>,

    frfcfs: Option<FrFcfsScheduler>,

    pub counters: Counters,
}

impl DRAM {
    #[must_use]
    pub fn new(id: usize, config: Arc<config::Config>) -> Self {
        let num_banks = config.num_banks;
        assert!(num_banks > 0);
        assert!(config.num_bank_groups > 0);
        let banks_per_group = num_banks / config.num_bank_groups;
        let banks = (0..num_banks).map(|b| Bank::new(b / banks_per_group)).collect();
        let bank_groups = vec![BankGroup::default(); config.num_bank_groups];

        let rwq = DelayPipeline::new(config.cas_latency, config.cas_latency + 1);
        let mrqq = Fifo::new(Some(2));
        let return_queue_size = match config.dram_return_queue_size {
            0 => 1024,
            size => size,
        };
        let returnq = Fifo::new(Some(return_queue_size));
        let frfcfs = match config.scheduler {
            config::SchedulerKind::FrFcfs => Some(FrFcfsScheduler::new(num_banks)),
            config::SchedulerKind::Fifo => None,
        };
        Self {
            id,
            config,
            banks,
            bank_groups,
            prio: 0,
            rrd: 0,
            ccd: 0,
            rtw: 0,
            wtr: 0,
            rw_last: RwDir::Read,
            mrqq,
            rwq,
            returnq,
            frfcfs,
            counters: Counters::default(),
        }
    }

    /// Can the channel accept another request?
    #[must_use]
    pub fn full(&self) -> bool {
        match self.config.scheduler {
            config::SchedulerKind::FrFcfs => {
                let size = self.config.frfcfs_sched_queue_size;
                if size == 0 {
                    return false;
                }
                self.scheduler().num_pending() >= size
            }
            config::SchedulerKind::Fifo => self.mrqq.full(),
        }
    }

    /// Pending request count, per the active scheduler.
    #[must_use]
    pub fn que_length(&self) -> usize {
        match self.config.scheduler {
            config::SchedulerKind::FrFcfs => self.scheduler().num_pending(),
            config::SchedulerKind::Fifo => self.mrqq.len(),
        }
    }

    #[must_use]
    pub fn queue_limit(&self) -> usize {
        self.config.frfcfs_sched_queue_size
    }

    #[must_use]
    pub fn returnq_full(&self) -> bool {
        self.returnq.full()
    }

    pub fn return_queue_pop(&mut self) -> Option<mem_fetch::MemFetch> {
        self.returnq.dequeue()
    }

    #[must_use]
    pub fn return_queue_top(&self) -> Option<&mem_fetch::MemFetch> {
        self.returnq.first()
    }

    #[must_use]
    pub fn banks(&self) -> &[Bank] {
        &self.banks
    }

    fn scheduler(&self) -> &FrFcfsScheduler {
        self.frfcfs.as_ref().expect("FR-FCFS scheduler")
    }

    /// Hand a packet to the channel.
    ///
    /// Callers must check [`DRAM::full`] first; the channel id must match
    /// the packet's decoded chip.
    pub fn push(&mut self, mut fetch: mem_fetch::MemFetch, time: u64) {
        assert_eq!(
            self.id as u64, fetch.tlx_addr.chip,
            "request pushed to wrong memory channel"
        );
        log::trace!(
            "dram[{}]: push {} bank={} row={}",
            self.id,
            fetch,
            fetch.tlx_addr.bk,
            fetch.tlx_addr.row
        );
        fetch.set_status(mem_fetch::Status::IN_PARTITION_MC_INTERFACE_QUEUE, time);
        let req = Arc::new(Mutex::new(Request::new(fetch, time)));
        assert!(!self.mrqq.full());
        self.mrqq.enqueue(req);

        self.counters.n_req += 1;
        let pending = self.que_length() as u64;
        self.counters.max_mrqs_temp = self.counters.max_mrqs_temp.max(pending);
    }

    /// Bind the queue head to its bank, if that bank is free.
    ///
    /// Only the head may bind: a busy bank at the head blocks every request
    /// behind it, idle banks included.
    fn scheduler_fifo(&mut self, time: u64) {
        let Some(head) = self.mrqq.first() else {
            return;
        };
        let bank = {
            let mut head = head.lock().unwrap();
            if let Some(data) = head.data.as_mut() {
                data.set_status(mem_fetch::Status::IN_PARTITION_MC_BANK_ARB_QUEUE, time);
            }
            head.bank
        };
        if self.banks[bank].mrq.is_none() {
            self.banks[bank].mrq = self.mrqq.dequeue();
        }
    }

    /// Drain the queue into the scheduler, then bind at most one scheduled
    /// request to a free bank in rotating priority order.
    fn scheduler_frfcfs(&mut self, time: u64) {
        let sched_queue_size = self.config.frfcfs_sched_queue_size;
        let num_banks = self.config.num_banks;

        while !self.mrqq.is_empty()
            && (sched_queue_size == 0
                || self.frfcfs.as_ref().unwrap().num_pending() < sched_queue_size)
        {
            let req = self.mrqq.dequeue().unwrap();
            {
                let mut req = req.lock().unwrap();
                if let Some(data) = req.data.as_mut() {
                    data.set_status(mem_fetch::Status::IN_PARTITION_MC_INPUT_QUEUE, time);
                }
            }
            self.frfcfs.as_mut().unwrap().add(req);
        }

        for i in 0..num_banks {
            let b = (i + self.prio) % num_banks;
            if self.banks[b].mrq.is_some() {
                continue;
            }
            let curr_row = self.banks[b].curr_row;
            let Some(req) = self.frfcfs.as_mut().unwrap().schedule(b, curr_row, time) else {
                continue;
            };
            {
                let mut req = req.lock().unwrap();
                if let Some(data) = req.data.as_mut() {
                    data.set_status(mem_fetch::Status::IN_PARTITION_MC_BANK_ARB_QUEUE, time);
                }
            }
            self.prio = (self.prio + 1) % num_banks;
            self.banks[b].mrq = Some(req);
            // only one bank is newly bound per cycle
            break;
        }
    }

    /// Advance the channel by one cycle.
    ///
    /// Drains one read/write queue slot toward the return queue, runs the
    /// scheduler, issues at most one command across all banks, then
    /// decrements every timer.  A writeback whose transfer completed this
    /// cycle is handed back to the caller instead of entering the return
    /// queue.
    pub fn cycle(&mut self, time: u64) -> Option<mem_fetch::MemFetch> {
        let atom = self.config.dram_atom_size() as u32;
        let mut completed_writeback = None;

        if !self.returnq.full() {
            if let Some(cmd) = self.rwq.pop() {
                let mut cmd = cmd.lock().unwrap();
                cmd.dq_bytes += atom;
                if cmd.dq_bytes >= cmd.nbytes {
                    let mut data = cmd.data.take().expect("request drained twice");
                    data.set_status(mem_fetch::Status::IN_PARTITION_MC_RETURNQ, time);
                    if data.access_kind().is_writeback() {
                        completed_writeback = Some(data);
                    } else {
                        data.set_reply();
                        log::debug!("dram[{}]: {} completed", self.id, data);
                        self.returnq.enqueue(data);
                    }
                }
            }
        }

        match self.config.scheduler {
            config::SchedulerKind::Fifo => self.scheduler_fifo(time),
            config::SchedulerKind::FrFcfs => self.scheduler_frfcfs(time),
        }
        let pending = self.que_length() as u64;
        self.counters.max_mrqs = self.counters.max_mrqs.max(pending);
        self.counters.ave_mrqs += pending;

        let num_banks = self.config.num_banks;
        let timing = self.config.timing;
        let burst = (self.config.burst_length / self.config.data_command_freq_ratio) as u64;
        let mut issued = false;
        let mut k = num_banks;

        for i in 0..num_banks {
            let j = (i + self.prio) % num_banks;
            let grp = self.banks[j].group;

            let Some(mrq) = self.banks[j].mrq.clone() else {
                let bank = &mut self.banks[j];
                if self.ccd == 0
                    && self.rrd == 0
                    && self.rtw == 0
                    && self.wtr == 0
                    && bank.rcd == 0
                    && bank.ras == 0
                    && bank.rc == 0
                    && bank.rp == 0
                    && bank.rcd_wr == 0
                {
                    k -= 1;
                }
                bank.n_idle += 1;
                continue;
            };

            let (row, dir) = {
                let mut mrq = mrq.lock().unwrap();
                if let Some(data) = mrq.data.as_mut() {
                    data.set_status(mem_fetch::Status::IN_PARTITION_DRAM, time);
                }
                (mrq.row, mrq.dir)
            };
            let bank_active = self.banks[j].state == BankState::Active;
            let row_hit = bank_active && self.banks[j].curr_row == row;

            if !issued
                && self.ccd == 0
                && self.banks[j].rcd == 0
                && self.bank_groups[grp].ccdl == 0
                && row_hit
                && dir == RwDir::Read
                && self.wtr == 0
                && !self.rwq.full()
            {
                // READ column command
                if self.rw_last == RwDir::Write {
                    self.rw_last = RwDir::Read;
                    self.rwq.set_min_length(self.config.cas_latency);
                }
                self.rwq.push(Some(Arc::clone(&mrq)));
                let transfer_done = {
                    let mut mrq = mrq.lock().unwrap();
                    mrq.tx_bytes += atom;
                    mrq.tx_bytes >= mrq.nbytes
                };
                self.ccd = timing.t_ccd;
                self.bank_groups[grp].ccdl = timing.t_ccdl;
                self.rtw = timing.t_rtw;
                self.banks[j].rtp = burst;
                self.bank_groups[grp].rtpl = timing.t_rtpl;
                issued = true;
                self.counters.n_rd += 1;
                self.counters.bwutil += burst;
                self.banks[j].n_access += 1;
                log::trace!(
                    "dram[{}]: RD bank={} row={:03x}",
                    self.id,
                    j,
                    self.banks[j].curr_row
                );
                if transfer_done {
                    self.banks[j].mrq = None;
                }
            } else if !issued
                && self.ccd == 0
                && self.banks[j].rcd_wr == 0
                && self.bank_groups[grp].ccdl == 0
                && row_hit
                && dir == RwDir::Write
                && self.rtw == 0
                && !self.rwq.full()
            {
                // WRITE column command
                if self.rw_last == RwDir::Read {
                    self.rw_last = RwDir::Write;
                    self.rwq.set_min_length(self.config.write_latency);
                }
                self.rwq.push(Some(Arc::clone(&mrq)));
                let transfer_done = {
                    let mut mrq = mrq.lock().unwrap();
                    mrq.tx_bytes += atom;
                    mrq.tx_bytes >= mrq.nbytes
                };
                self.ccd = timing.t_ccd;
                self.bank_groups[grp].ccdl = timing.t_ccdl;
                self.wtr = timing.t_wtr;
                self.banks[j].wtp = timing.t_wtp;
                issued = true;
                self.counters.n_wr += 1;
                self.counters.bwutil += burst;
                log::trace!(
                    "dram[{}]: WR bank={} row={:03x}",
                    self.id,
                    j,
                    self.banks[j].curr_row
                );
                if transfer_done {
                    self.banks[j].mrq = None;
                }
            } else if !issued
                && self.rrd == 0
                && self.banks[j].state == BankState::Idle
                && self.banks[j].rp == 0
                && self.banks[j].rc == 0
            {
                // ACTIVATE: open the requested row
                log::trace!(
                    "dram[{}]: ACT bank={} row={:03x} from={:03x}",
                    self.id,
                    j,
                    row,
                    self.banks[j].curr_row
                );
                self.banks[j].curr_row = row;
                self.banks[j].state = BankState::Active;
                self.rrd = timing.t_rrd;
                self.banks[j].rcd = timing.t_rcd;
                self.banks[j].rcd_wr = timing.t_rcdwr;
                self.banks[j].ras = timing.t_ras;
                self.banks[j].rc = timing.t_rc;
                self.prio = (j + 1) % num_banks;
                issued = true;
                self.counters.n_act += 1;
            } else if !issued
                && self.banks[j].state == BankState::Active
                && self.banks[j].curr_row != row
                && self.banks[j].ras == 0
                && self.banks[j].wtp == 0
                && self.banks[j].rtp == 0
                && self.bank_groups[grp].rtpl == 0
            {
                // PRECHARGE: the wrong row is open
                log::trace!(
                    "dram[{}]: PRE bank={} row={:03x}",
                    self.id,
                    j,
                    self.banks[j].curr_row
                );
                self.banks[j].state = BankState::Idle;
                self.banks[j].rp = timing.t_rp;
                self.prio = (j + 1) % num_banks;
                issued = true;
                self.counters.n_pre += 1;
            }
        }

        if !issued {
            self.counters.n_nop += 1;
        }
        if k > 0 {
            self.counters.n_activity += 1;
        }
        self.counters.n_cmd += 1;

        self.rrd = self.rrd.saturating_sub(1);
        self.ccd = self.ccd.saturating_sub(1);
        self.rtw = self.rtw.saturating_sub(1);
        self.wtr = self.wtr.saturating_sub(1);
        for bank in &mut self.banks {
            bank.rcd = bank.rcd.saturating_sub(1);
            bank.ras = bank.ras.saturating_sub(1);
            bank.rc = bank.rc.saturating_sub(1);
            bank.rp = bank.rp.saturating_sub(1);
            bank.rcd_wr = bank.rcd_wr.saturating_sub(1);
            bank.wtp = bank.wtp.saturating_sub(1);
            bank.rtp = bank.rtp.saturating_sub(1);
        }
        for group in &mut self.bank_groups {
            group.ccdl = group.ccdl.saturating_sub(1);
            group.rtpl = group.rtpl.saturating_sub(1);
        }

        completed_writeback
    }
}

impl std::fmt::Display for DRAM {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let timing = &self.config.timing;
        let counters = &self.counters;
        writeln!(
            f,
            "DRAM[{}]: {} bks, busW={} BL={} CL={}, tRRD={} tCCD={} tRCD={} tRAS={} tRP={} tRC={}",
            self.id,
            self.config.num_banks,
            self.config.dram_buswidth,
            self.config.burst_length,
            self.config.cas_latency,
            timing.t_rrd,
            timing.t_ccd,
            timing.t_rcd,
            timing.t_ras,
            timing.t_rp,
            timing.t_rc,
        )?;
        writeln!(
            f,
            "n_cmd={} n_nop={} n_act={} n_pre={} n_req={} n_rd={} n_write={} bw_util={:.4}",
            counters.n_cmd,
            counters.n_nop,
            counters.n_act,
            counters.n_pre,
            counters.n_req,
            counters.n_rd,
            counters.n_wr,
            counters.bwutil as f64 / counters.n_cmd.max(1) as f64,
        )?;
        writeln!(
            f,
            "n_activity={} dram_eff={:.4} mrqq: max={} avg={:.4}",
            counters.n_activity,
            counters.bwutil as f64 / counters.n_activity.max(1) as f64,
            counters.max_mrqs,
            counters.ave_mrqs as f64 / counters.n_cmd.max(1) as f64,
        )?;
        for (i, bank) in self.banks.iter().enumerate() {
            write!(f, "bk{i}: {}a {}i ", bank.n_access, bank.n_idle)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for DRAM {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DRAM")
            .field("id", &self.id)
            .field("pending", &self.que_length())
            .field("counters", &style(&self.counters).cyan())
            .finish()
    }
}
