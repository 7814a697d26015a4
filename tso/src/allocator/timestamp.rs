use std::{cmp::Ordering, fmt::Display};

use coarsetime::Duration;

// Millisecond
pub type UnixTimeStamp = u64;

#[derive(Clone, Copy, Debug)]
pub struct Timestamp {
    pub physical_millis: u64, // 42bit, max 140 years
    pub logical: u32,         // 18bit, max 262k
    // 4bit, reserved
    pub reserved: u32,
}

impl Default for Timestamp {
    fn default() -> Self {
        Timestamp {
            physical_millis: 0,
            logical: 0,
            reserved: 0,
        }
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.physical_millis == other.physical_millis && self.logical == other.logical
    }
}
impl Eq for Timestamp {}
impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.physical_millis, self.logical).cmp(&(other.physical_millis, other.logical))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "Timestamp as {:?}|{}, binary: {}",
            std::time::SystemTime::UNIX_EPOCH
                .checked_add(Duration::from_millis(self.physical_millis).into())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            self.logical,
            self.as_u64()
        ))
    }
}

impl Timestamp {
    /// maxLogical is the max upper limit for logical time.
    /// When a TSO's logical time reaches this limit, the physical time is
    /// forced to increase.
    pub const MAX_LOGICAL_BITS: u32 = 18;
    pub const MAX_LOGICAL: u32 = 1 << Self::MAX_LOGICAL_BITS;
    pub const RESERVED_BITS: u32 = 4;
}

impl Timestamp {
    pub fn new(physical: u64, logical: u32) -> Self {
        Self {
            physical_millis: physical,
            logical,
            reserved: 0,
        }
    }

    pub fn as_u64(&self) -> u64 {
        let physical_42 = self.physical_millis << (Self::MAX_LOGICAL_BITS + Self::RESERVED_BITS);
        let logical = (self.logical & 0x0003_FFFF) << Self::RESERVED_BITS;
        let reserved = self.reserved & 0x0000_000F;

        physical_42 | logical as u64 | reserved as u64
    }

    pub fn from_u64(from: u64) -> Self {
        let physical_millis = from >> (Self::MAX_LOGICAL_BITS + Self::RESERVED_BITS);
        let logical = ((from >> Self::RESERVED_BITS) & 0x0003_FFFF) as u32;
        let reserved = (from & 0x0000_000F) as u32;

        Self {
            physical_millis,
            logical,
            reserved,
        }
    }
}
