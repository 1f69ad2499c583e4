//! Slaves as seen after auto-configuration.
//!
//! A [`SlaveDirectory`] is the value produced by one discovery pass. It is
//! owned by the reboot call and handed explicitly to every later step, so
//! there is no ambient slave table to go stale between runs.

use serde::{Deserialize, Serialize};

/// EtherCAT slave identification from the SII.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlaveIdentity {
    /// Vendor ID.
    pub vendor_id: u32,
    /// Product code.
    pub product_code: u32,
    /// Revision number.
    pub revision: u32,
    /// Serial number (if available).
    pub serial: u32,
}

impl SlaveIdentity {
    /// Create a new slave identity.
    #[must_use]
    pub fn new(vendor_id: u32, product_code: u32, revision: u32, serial: u32) -> Self {
        Self {
            vendor_id,
            product_code,
            revision,
            serial,
        }
    }
}

impl std::fmt::Display for SlaveIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "V:{:#010x} P:{:#010x} R:{:#010x}",
            self.vendor_id, self.product_code, self.revision
        )
    }
}

/// A configured slave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveHandle {
    /// Position in EtherCAT order, 1-based.
    pub position: u16,
    /// Station address assigned during auto-configuration.
    pub configured_address: u16,
    /// Device name from the SII.
    pub name: String,
    /// Identity from the SII.
    pub identity: SlaveIdentity,
    /// Control flags of the mailbox sync managers (SM0, SM1) as left by
    /// auto-configuration. Zero until the backend reports them.
    pub mailbox_sm_flags: [u32; 2],
}

impl SlaveHandle {
    /// Create a handle with no name, identity or mailbox flags.
    #[must_use]
    pub fn new(position: u16, configured_address: u16) -> Self {
        Self {
            position,
            configured_address,
            name: String::new(),
            identity: SlaveIdentity::default(),
            mailbox_sm_flags: [0, 0],
        }
    }

    /// Set the device name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the identity.
    #[must_use]
    pub fn with_identity(mut self, identity: SlaveIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Set the mailbox sync-manager control flags.
    #[must_use]
    pub fn with_mailbox_sm_flags(mut self, sm0: u32, sm1: u32) -> Self {
        self.mailbox_sm_flags = [sm0, sm1];
        self
    }
}

/// Slaves found by one discovery pass, in EtherCAT order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlaveDirectory {
    slaves: Vec<SlaveHandle>,
}

impl SlaveDirectory {
    /// Wrap the slaves returned by discovery.
    #[must_use]
    pub fn new(slaves: Vec<SlaveHandle>) -> Self {
        Self { slaves }
    }

    /// Number of discovered slaves.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slaves.len()
    }

    /// True when discovery found nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slaves.is_empty()
    }

    /// Look up a slave by 1-based position.
    #[must_use]
    pub fn get(&self, position: u16) -> Option<&SlaveHandle> {
        self.slaves.iter().find(|slave| slave.position == position)
    }

    /// Iterate over the slaves.
    pub fn iter(&self) -> impl Iterator<Item = &SlaveHandle> {
        self.slaves.iter()
    }
}
