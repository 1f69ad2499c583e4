//! EtherCAT application-layer (AL) state types.
//!
//! Encoding follows the AL control (0x0120) and AL status (0x0130)
//! registers: the low nibble carries the state, bit 4 the error flag.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Slave application states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ApplicationState {
    /// Initial state after power-on; no mailbox communication.
    #[default]
    Init = 0x01,
    /// Pre-operational: mailbox communication available.
    PreOp = 0x02,
    /// Bootstrap: firmware update mode with boot mailbox layout.
    Boot = 0x03,
    /// Safe-operational: inputs active, outputs safe.
    SafeOp = 0x04,
    /// Operational: full I/O active.
    Op = 0x08,
}

impl ApplicationState {
    /// Parse a state from the low nibble of an AL status/control byte.
    #[must_use]
    pub fn from_al_code(code: u8) -> Option<Self> {
        match code & AlStatus::STATE_MASK {
            0x01 => Some(Self::Init),
            0x02 => Some(Self::PreOp),
            0x03 => Some(Self::Boot),
            0x04 => Some(Self::SafeOp),
            0x08 => Some(Self::Op),
            _ => None,
        }
    }

    /// The AL control value for requesting this state.
    #[must_use]
    pub fn al_code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ApplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "INIT"),
            Self::PreOp => write!(f, "PRE_OP"),
            Self::Boot => write!(f, "BOOT"),
            Self::SafeOp => write!(f, "SAFE_OP"),
            Self::Op => write!(f, "OP"),
        }
    }
}

/// Observed AL status: a base state plus the orthogonal error flag.
///
/// `state` is `None` when the slave did not answer or reported a code
/// outside the known states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct AlStatus {
    /// Base application state, if recognised.
    pub state: Option<ApplicationState>,
    /// AL status error indication (bit 4).
    pub error: bool,
}

impl AlStatus {
    /// Mask for the state nibble.
    pub const STATE_MASK: u8 = 0x0F;
    /// Error indication bit.
    pub const ERROR_FLAG: u8 = 0x10;

    /// Status of a slave that reports `state` without error.
    #[must_use]
    pub fn new(state: ApplicationState) -> Self {
        Self {
            state: Some(state),
            error: false,
        }
    }

    /// Status when nothing answered.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Set the error flag.
    #[must_use]
    pub fn with_error(mut self) -> Self {
        self.error = true;
        self
    }

    /// Decode a raw AL status byte.
    #[must_use]
    pub fn from_raw(raw: u8) -> Self {
        Self {
            state: ApplicationState::from_al_code(raw),
            error: raw & Self::ERROR_FLAG != 0,
        }
    }

    /// Encode as a raw AL status byte.
    #[must_use]
    pub fn to_raw(self) -> u8 {
        let state = self.state.map_or(0, ApplicationState::al_code);
        if self.error {
            state | Self::ERROR_FLAG
        } else {
            state
        }
    }

    /// True when the slave sits in `target` with no error pending.
    #[must_use]
    pub fn reached(self, target: ApplicationState) -> bool {
        self.state == Some(target) && !self.error
    }
}

impl fmt::Display for AlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            Some(state) => write!(f, "{state}")?,
            None => write!(f, "NONE")?,
        }
        if self.error {
            write!(f, "+ERROR")?;
        }
        Ok(())
    }
}

impl From<ApplicationState> for AlStatus {
    fn from(state: ApplicationState) -> Self {
        Self::new(state)
    }
}
