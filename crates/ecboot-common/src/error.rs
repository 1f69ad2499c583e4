use crate::state::ApplicationState;
use std::time::Duration;
use thiserror::Error;

/// Failures reported by a master-stack backend.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FieldbusError {
    /// The network interface could not be opened (missing, or no raw-socket privilege).
    #[error("no socket connection on {interface}: {reason}")]
    TransportUnavailable {
        /// Interface that was requested.
        interface: String,
        /// Backend-specific reason.
        reason: String,
    },

    /// An operation was attempted before `bind` succeeded or after `close`.
    #[error("transport not bound")]
    NotBound,

    /// Slave discovery or auto-configuration failed.
    #[error("slave discovery failed: {0}")]
    Discovery(String),

    /// The collaborator did not complete an operation within its budget.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Operation that timed out.
        operation: String,
        /// Budget that was exhausted.
        timeout: Duration,
    },

    /// Writing the AL control register was not accepted.
    #[error("request {state} for slave {slave} failed: {reason}")]
    StateRequest {
        /// 1-based slave position.
        slave: u16,
        /// Requested state.
        state: ApplicationState,
        /// Backend-specific reason.
        reason: String,
    },

    /// Reading a word from the slave information interface failed.
    #[error("SII read of word {word:#06x} on slave {slave} failed: {reason}")]
    SiiRead {
        /// 1-based slave position.
        slave: u16,
        /// SII word address.
        word: u16,
        /// Backend-specific reason.
        reason: String,
    },

    /// A configured-address register write was not accepted.
    #[error("write of register {register:#06x} on station {station:#06x} failed: {reason}")]
    RegisterWrite {
        /// Configured station address.
        station: u16,
        /// ESC register address.
        register: u16,
        /// Backend-specific reason.
        reason: String,
    },

    /// A configured-address register read failed.
    #[error("read of register {register:#06x} on station {station:#06x} failed: {reason}")]
    RegisterRead {
        /// Configured station address.
        station: u16,
        /// ESC register address.
        register: u16,
        /// Backend-specific reason.
        reason: String,
    },
}

/// Convenience type alias for master-stack operations.
pub type FieldbusResult<T> = Result<T, FieldbusError>;
