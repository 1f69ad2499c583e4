//! Sync-manager descriptors for the boot mailbox.
//!
//! Each sync manager occupies an 8-byte register block starting at
//! `0x0800 + 8 * n`: physical start address (u16), length (u16) and a
//! 32-bit word holding control, status, activate and PDI control bytes.
//! All fields are little-endian on the wire.

use crate::sii::MailboxConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Register address of SM0.
pub const SM0_REGISTER: u16 = 0x0800;

/// Size of one sync-manager register block.
pub const SM_REGISTER_SIZE: usize = 8;

/// Address distance between consecutive sync-manager blocks.
const SM_REGISTER_STRIDE: u16 = 8;

/// SOEM default flags for the mailbox-write sync manager (SM0).
pub const DEFAULT_MAILBOX_SM0_FLAGS: u32 = 0x0001_0026;

/// SOEM default flags for the mailbox-read sync manager (SM1).
pub const DEFAULT_MAILBOX_SM1_FLAGS: u32 = 0x0001_0022;

/// Register address of sync manager `index`.
#[must_use]
pub fn sm_register(index: u8) -> u16 {
    SM0_REGISTER + u16::from(index) * SM_REGISTER_STRIDE
}

/// One sync-manager register block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncManagerDescriptor {
    /// Physical start address in ESC memory.
    pub start_address: u16,
    /// Length in bytes.
    pub length: u16,
    /// Control/status/activate/PDI-control word.
    pub control_flags: u32,
}

impl SyncManagerDescriptor {
    /// Create a descriptor.
    #[must_use]
    pub fn new(start_address: u16, length: u16, control_flags: u32) -> Self {
        Self {
            start_address,
            length,
            control_flags,
        }
    }

    /// Encode as the register block written with FPWR.
    #[must_use]
    pub fn to_register_bytes(&self) -> [u8; SM_REGISTER_SIZE] {
        let mut bytes = [0u8; SM_REGISTER_SIZE];
        bytes[0..2].copy_from_slice(&self.start_address.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.control_flags.to_le_bytes());
        bytes
    }

    /// Decode a register block, if `bytes` holds at least one.
    #[must_use]
    pub fn from_register_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < SM_REGISTER_SIZE {
            return None;
        }
        Some(Self {
            start_address: u16::from_le_bytes([bytes[0], bytes[1]]),
            length: u16::from_le_bytes([bytes[2], bytes[3]]),
            control_flags: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }
}

impl fmt::Display for SyncManagerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "A:{:04x} L:{:4} F:{:08x}",
            self.start_address, self.length, self.control_flags
        )
    }
}

/// The two mailbox sync managers programmed before BOOT is requested.
///
/// Index 0 is the master → slave (write) mailbox, index 1 the
/// slave → master (read) mailbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncManagerConfig {
    /// SM0 and SM1.
    pub descriptors: [SyncManagerDescriptor; 2],
}

impl SyncManagerConfig {
    /// Build SM0/SM1 from the boot mailbox layout, keeping the slave's
    /// current control flags.
    #[must_use]
    pub fn from_boot_mailbox(mailbox: &MailboxConfig, flags: [u32; 2]) -> Self {
        Self {
            descriptors: [
                SyncManagerDescriptor::new(mailbox.write.address, mailbox.write.length, flags[0]),
                SyncManagerDescriptor::new(mailbox.read.address, mailbox.read.length, flags[1]),
            ],
        }
    }

    /// Master → slave mailbox (SM0).
    #[must_use]
    pub fn write_mailbox(&self) -> &SyncManagerDescriptor {
        &self.descriptors[0]
    }

    /// Slave → master mailbox (SM1).
    #[must_use]
    pub fn read_mailbox(&self) -> &SyncManagerDescriptor {
        &self.descriptors[1]
    }

    /// Descriptors paired with their register address.
    pub fn registers(&self) -> impl Iterator<Item = (u8, u16, &SyncManagerDescriptor)> {
        self.descriptors
            .iter()
            .zip(0u8..)
            .map(|(descriptor, index)| (index, sm_register(index), descriptor))
    }
}

/// Proof that SM0/SM1 were programmed for the boot mailbox.
///
/// Only the sync-manager programming step can construct this, and the
/// BOOT request takes it by reference, so BOOT cannot be requested with
/// the mailbox still in its PRE_OP layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgrammedSyncManagers {
    config: SyncManagerConfig,
}

impl ProgrammedSyncManagers {
    pub(crate) fn new(config: SyncManagerConfig) -> Self {
        Self { config }
    }

    /// The configuration that was written.
    #[must_use]
    pub fn config(&self) -> &SyncManagerConfig {
        &self.config
    }
}
