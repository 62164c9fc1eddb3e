use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of bins an upload returns. Sent to the peripheral low byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BinCount(pub u16);

/// First bin an upload starts from. Same byte order as [`BinCount`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BinAddress(pub u16);

impl BinCount {
    pub fn from_le_bytes(lsb: u8, msb: u8) -> Self {
        Self(u16::from_le_bytes([lsb, msb]))
    }

    pub fn to_le_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    pub fn get(self) -> u16 {
        self.0
    }

    /// Raw bytes an upload of this many bins produces: two per bin plus the terminator.
    pub fn expected_upload_len(self) -> usize {
        1 + 2 * self.0 as usize
    }
}

impl BinAddress {
    pub fn from_le_bytes(lsb: u8, msb: u8) -> Self {
        Self(u16::from_le_bytes([lsb, msb]))
    }

    pub fn to_le_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

impl From<u16> for BinCount {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<u16> for BinAddress {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for BinCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bins", self.0)
    }
}

impl fmt::Display for BinAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bin {:#06x}", self.0)
    }
}
