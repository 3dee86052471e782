use super::{addrdec, address};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::atomic;

pub const READ_PACKET_SIZE: u8 = 8;

// bytes: 6 address, 2 miscellaneous.
pub const WRITE_PACKET_SIZE: u8 = 8;

/// Packet kind on the wire.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    READ_REQUEST = 0,
    WRITE_REQUEST,
    READ_REPLY,
    WRITE_ACK,
}

/// Location of a packet inside the memory partition pipeline.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Status {
    INITIALIZED,
    IN_ICNT_TO_MEM,
    IN_PARTITION_ROP_DELAY,
    IN_PARTITION_ICNT_TO_L2_QUEUE,
    IN_PARTITION_L2_TO_DRAM_QUEUE,
    IN_PARTITION_DRAM_LATENCY_QUEUE,
    IN_PARTITION_L2_MISS_QUEUE,
    IN_PARTITION_MC_INTERFACE_QUEUE,
    IN_PARTITION_MC_INPUT_QUEUE,
    IN_PARTITION_MC_BANK_ARB_QUEUE,
    IN_PARTITION_DRAM,
    IN_PARTITION_MC_RETURNQ,
    IN_PARTITION_DRAM_TO_L2_QUEUE,
    IN_PARTITION_L2_FILL_QUEUE,
    IN_PARTITION_L2_TO_ICNT_QUEUE,
    IN_ICNT_TO_SHADER,
    DELETED,
}

pub mod access {
    use serde::{Deserialize, Serialize};

    /// What a memory access does and on whose behalf.
    #[allow(non_camel_case_types)]
    #[derive(
        Debug,
        strum::EnumIter,
        strum::EnumCount,
        Clone,
        Copy,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
    )]
    pub enum Kind {
        GLOBAL_ACC_R,
        LOCAL_ACC_R,
        CONST_ACC_R,
        TEXTURE_ACC_R,
        GLOBAL_ACC_W,
        LOCAL_ACC_W,
        L1_WRBK_ACC,
        L2_WRBK_ACC,
        INST_ACC_R,
        L1_WR_ALLOC_R,
        L2_WR_ALLOC_R,
    }

    impl Kind {
        #[must_use]
        pub fn is_write(&self) -> bool {
            match self {
                Kind::GLOBAL_ACC_R
                | Kind::LOCAL_ACC_R
                | Kind::CONST_ACC_R
                | Kind::TEXTURE_ACC_R
                | Kind::INST_ACC_R
                | Kind::L1_WR_ALLOC_R
                | Kind::L2_WR_ALLOC_R => false,
                Kind::GLOBAL_ACC_W | Kind::LOCAL_ACC_W | Kind::L1_WRBK_ACC | Kind::L2_WRBK_ACC => {
                    true
                }
            }
        }

        /// Writeback acknowledgements are consumed inside the partition and
        /// never returned to the interconnect.
        #[must_use]
        pub fn is_writeback(&self) -> bool {
            matches!(self, Kind::L1_WRBK_ACC | Kind::L2_WRBK_ACC)
        }

        #[must_use]
        pub fn is_texture(&self) -> bool {
            *self == Kind::TEXTURE_ACC_R
        }
    }

    /// A single memory access as issued by a core or cache.
    #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub struct MemAccess {
        /// Requested address.
        pub addr: super::address,
        /// Access kind.
        pub kind: Kind,
        /// Requested number of bytes.
        pub req_size_bytes: u32,
        pub is_write: bool,
    }

    impl std::fmt::Display for MemAccess {
        fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "{:?}@{}", self.kind, self.addr)
        }
    }

    impl MemAccess {
        #[must_use]
        pub fn new(kind: Kind, addr: super::address, req_size_bytes: u32) -> Self {
            Self {
                addr,
                kind,
                req_size_bytes,
                is_write: kind.is_write(),
            }
        }

        #[must_use]
        pub fn control_size(&self) -> u32 {
            if self.is_write {
                u32::from(super::WRITE_PACKET_SIZE)
            } else {
                u32::from(super::READ_PACKET_SIZE)
            }
        }

        #[must_use]
        pub fn data_size(&self) -> u32 {
            self.req_size_bytes
        }
    }
}

/// A memory request/reply packet traveling through the partition.
///
/// The partition reads only the decoded DRAM coordinates, the size, the
/// direction and the access kind; everything else rides along opaquely.
#[derive(Clone, Debug, PartialOrd, Ord)]
pub struct MemFetch {
    pub uid: u64,
    pub access: access::MemAccess,
    /// decoded DRAM coordinates of `access.addr`
    pub tlx_addr: addrdec::DecodedAddress,
    pub partition_addr: address,
    pub kind: Kind,
    pub status: Status,
    pub last_status_change: Option<u64>,
    pub inject_cycle: Option<u64>,
    pub return_cycle: Option<u64>,
}

impl std::fmt::Display for MemFetch {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}({:?}@{})", self.kind, self.access_kind(), self.addr())
    }
}

impl Eq for MemFetch {}

impl PartialEq for MemFetch {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid
    }
}

impl std::hash::Hash for MemFetch {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uid.hash(state);
    }
}

static MEM_FETCH_UID: Lazy<atomic::AtomicU64> = Lazy::new(|| atomic::AtomicU64::new(0));

/// Generate a unique ID that can be used to identify fetch requests.
pub fn generate_uid() -> u64 {
    MEM_FETCH_UID.fetch_add(1, atomic::Ordering::SeqCst)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Builder {
    pub access: access::MemAccess,
    pub tlx_addr: addrdec::DecodedAddress,
    pub partition_addr: address,
}

impl Builder {
    #[must_use]
    pub fn build(self) -> MemFetch {
        let kind = if self.access.is_write {
            Kind::WRITE_REQUEST
        } else {
            Kind::READ_REQUEST
        };
        MemFetch {
            uid: generate_uid(),
            access: self.access,
            tlx_addr: self.tlx_addr,
            partition_addr: self.partition_addr,
            kind,
            status: Status::INITIALIZED,
            last_status_change: None,
            inject_cycle: None,
            return_cycle: None,
        }
    }
}

impl From<Builder> for MemFetch {
    fn from(builder: Builder) -> Self {
        builder.build()
    }
}

impl MemFetch {
    #[must_use]
    pub fn addr(&self) -> address {
        self.access.addr
    }

    #[must_use]
    pub fn data_size(&self) -> u32 {
        self.access.req_size_bytes
    }

    #[must_use]
    pub fn control_size(&self) -> u32 {
        self.access.control_size()
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        self.data_size() + self.control_size()
    }

    #[must_use]
    pub fn is_write(&self) -> bool {
        self.access.is_write
    }

    #[must_use]
    pub fn is_texture(&self) -> bool {
        self.access.kind.is_texture()
    }

    #[must_use]
    pub fn access_kind(&self) -> access::Kind {
        self.access.kind
    }

    /// Global id of the sub partition servicing this packet.
    #[must_use]
    pub fn sub_partition_id(&self) -> usize {
        self.tlx_addr.sub_partition as usize
    }

    pub fn set_status(&mut self, status: Status, time: u64) {
        self.status = status;
        self.last_status_change = Some(time);
    }

    #[must_use]
    pub fn is_reply(&self) -> bool {
        matches!(self.kind, Kind::READ_REPLY | Kind::WRITE_ACK)
    }

    /// Turn the request into its reply.
    ///
    /// Writeback accesses are acknowledged out of band and never become
    /// replies.
    pub fn set_reply(&mut self) {
        assert!(!self.access.kind.is_writeback());
        match self.kind {
            Kind::READ_REQUEST => {
                debug_assert!(!self.is_write());
                self.kind = Kind::READ_REPLY;
            }
            Kind::WRITE_REQUEST => {
                debug_assert!(self.is_write());
                self.kind = Kind::WRITE_ACK;
            }
            Kind::READ_REPLY | Kind::WRITE_ACK => {}
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{access, addrdec, Builder, MemFetch};

    /// Build a packet bound for `chip` with the given DRAM coordinates.
    pub(crate) fn fetch(
        kind: access::Kind,
        chip: u64,
        bank: u64,
        row: u64,
        col: u64,
        nbytes: u32,
        sub_partition: u64,
    ) -> MemFetch {
        let addr = (row << 20) | (bank << 10) | col;
        Builder {
            access: access::MemAccess::new(kind, addr, nbytes),
            tlx_addr: addrdec::DecodedAddress {
                chip,
                bk: bank,
                row,
                col,
                burst: 0,
                sub_partition,
            },
            partition_addr: addr,
        }
        .build()
    }

    pub(crate) fn read_fetch(bank: u64, row: u64, nbytes: u32) -> MemFetch {
        fetch(access::Kind::GLOBAL_ACC_R, 0, bank, row, 0, nbytes, 0)
    }

    pub(crate) fn write_fetch(bank: u64, row: u64, nbytes: u32) -> MemFetch {
        fetch(access::Kind::GLOBAL_ACC_W, 0, bank, row, 0, nbytes, 0)
    }
}
