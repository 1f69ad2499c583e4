//! Slave information interface (SII) fields used to enter BOOT.
//!
//! The boot mailbox descriptors are 32-bit values made of two 16-bit
//! words: the mailbox offset in the low word and its size in the high word
//! (ETG.1000.6 Table 20).

use serde::{Deserialize, Serialize};
use std::fmt;

/// SII words read during the reboot sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SiiField {
    /// Bootstrap receive mailbox (master → slave): offset, size.
    BootRxMailbox,
    /// Bootstrap send mailbox (slave → master): offset, size.
    BootTxMailbox,
}

impl SiiField {
    /// SII word address of the field.
    #[must_use]
    pub fn word_address(self) -> u16 {
        match self {
            Self::BootRxMailbox => 0x0014,
            Self::BootTxMailbox => 0x0016,
        }
    }
}

impl fmt::Display for SiiField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BootRxMailbox => write!(f, "boot RX mailbox"),
            Self::BootTxMailbox => write!(f, "boot TX mailbox"),
        }
    }
}

/// A mailbox memory window in ESC address space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MailboxWindow {
    /// Start address.
    pub address: u16,
    /// Length in bytes.
    pub length: u16,
}

impl MailboxWindow {
    /// Split a 32-bit SII descriptor: low-order 16 bits are the address,
    /// high-order 16 bits the length. Host byte order does not matter.
    #[must_use]
    pub fn decode(raw: u32) -> Self {
        let [a0, a1, l0, l1] = raw.to_le_bytes();
        Self {
            address: u16::from_le_bytes([a0, a1]),
            length: u16::from_le_bytes([l0, l1]),
        }
    }
}

/// Boot mailbox layout cached for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxConfig {
    /// Master → slave mailbox.
    pub write: MailboxWindow,
    /// Slave → master mailbox.
    pub read: MailboxWindow,
}
