use serde::{Deserialize, Serialize};

/// Physical address decoded into DRAM coordinates.
///
/// Decoding happens upstream of the memory partition; the partition only
/// consumes the values carried on each packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DecodedAddress {
    /// memory channel (chip) the address maps to
    pub chip: u64,
    /// bank within the channel
    pub bk: u64,
    /// row within the bank
    pub row: u64,
    /// column within the row
    pub col: u64,
    /// burst offset within the column
    pub burst: u64,
    /// global sub partition servicing the address
    pub sub_partition: u64,
}

/// Maps raw physical addresses to DRAM coordinates.
pub trait AddressDecoder {
    fn tlx(&self, addr: crate::address) -> DecodedAddress;
}
