//! Master-stack abstraction consumed by the reboot sequence.
//!
//! The trait covers exactly the services the sequence needs from an
//! EtherCAT master library: binding a NIC, discovery with auto-configuration
//! to PRE_OP, AL state requests and checks, SII reads, and configured-address
//! register access. Every call is blocking and bounded by the timeout the
//! caller passes in.

use crate::sii::SiiField;
use crate::slave::SlaveHandle;
use ecboot_common::error::FieldbusResult;
use ecboot_common::state::{AlStatus, ApplicationState};
use std::fmt;
use std::time::Duration;

/// Which slaves a state check covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTarget {
    /// Every discovered slave; the lowest common state is reported.
    All,
    /// A single slave by 1-based position.
    Slave(u16),
}

impl fmt::Display for StateTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all slaves"),
            Self::Slave(position) => write!(f, "slave {position}"),
        }
    }
}

/// Master-stack backend.
///
/// Implemented by [`SimulatedMaster`](crate::SimulatedMaster) for testing
/// and by `SoemMaster` (feature `soem`) for hardware.
pub trait MasterStack: Send {
    /// Open the named network interface for raw EtherCAT frames.
    fn bind(&mut self, interface: &str) -> FieldbusResult<()>;

    /// Enumerate slaves and bring them to the configured PRE_OP baseline.
    fn discover_and_configure(&mut self) -> FieldbusResult<Vec<SlaveHandle>>;

    /// Poll until `target` reports `state` or `timeout` elapses, returning
    /// the last observed status either way.
    fn poll_state(
        &mut self,
        target: StateTarget,
        state: ApplicationState,
        timeout: Duration,
    ) -> FieldbusResult<AlStatus>;

    /// Write `state` to the slave's AL control register. Returns once the
    /// transport accepted the write; it does not wait for the transition.
    fn request_state(&mut self, slave: &SlaveHandle, state: ApplicationState)
        -> FieldbusResult<()>;

    /// Read a 32-bit SII field.
    fn read_sii(
        &mut self,
        slave: &SlaveHandle,
        field: SiiField,
        timeout: Duration,
    ) -> FieldbusResult<u32>;

    /// Configured-address write (FPWR) of `data` at `register`.
    fn write_register(
        &mut self,
        configured_address: u16,
        register: u16,
        data: &[u8],
        timeout: Duration,
    ) -> FieldbusResult<()>;

    /// Configured-address read (FPRD) of `len` bytes at `register`.
    fn read_register(
        &mut self,
        configured_address: u16,
        register: u16,
        len: usize,
        timeout: Duration,
    ) -> FieldbusResult<Vec<u8>>;

    /// Release the interface. Calling it on an unbound master is a no-op.
    fn close(&mut self) -> FieldbusResult<()>;
}
