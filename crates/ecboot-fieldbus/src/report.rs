//! Outcome record of one reboot attempt.

use crate::sii::MailboxConfig;
use crate::sync_manager::SyncManagerConfig;
use ecboot_common::state::AlStatus;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Steps of the reboot sequence, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Bind the master stack to the network interface.
    BindTransport,
    /// Discover and auto-configure slaves; select the target.
    DiscoverSlaves,
    /// Collective PRE_OP check.
    WaitPreOp,
    /// Request INIT for the target.
    RequestInit,
    /// INIT check for the target.
    WaitInit,
    /// Read and decode the boot mailbox descriptors from the SII.
    ReadBootMailbox,
    /// Write SM0/SM1 with the boot mailbox layout.
    ProgramSyncManagers,
    /// Request BOOT and check it was reached.
    RequestBoot,
    /// Request INIT from BOOT, which restarts the device.
    RequestRestart,
    /// Release the interface.
    ReleaseTransport,
}

impl Step {
    /// 1-based position in the sequence.
    #[must_use]
    pub fn number(self) -> u8 {
        self as u8 + 1
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BindTransport => "bind transport",
            Self::DiscoverSlaves => "discover slaves",
            Self::WaitPreOp => "wait for PRE_OP",
            Self::RequestInit => "request INIT",
            Self::WaitInit => "wait for INIT",
            Self::ReadBootMailbox => "read boot mailbox",
            Self::ProgramSyncManagers => "program sync managers",
            Self::RequestBoot => "request BOOT",
            Self::RequestRestart => "request restart",
            Self::ReleaseTransport => "release transport",
        };
        write!(f, "{}. {name}", self.number())
    }
}

/// Why an attempt stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FatalReason {
    /// The interface could not be opened.
    #[error("transport unavailable on {interface}: {reason}")]
    TransportUnavailable {
        /// Requested interface.
        interface: String,
        /// Backend reason.
        reason: String,
    },
    /// Discovery returned no slaves.
    #[error("no slaves found")]
    NoSlavesFound,
    /// Discovery itself failed.
    #[error("slave discovery failed: {reason}")]
    DiscoveryFailed {
        /// Backend reason.
        reason: String,
    },
    /// The requested slave position is not on the bus.
    #[error("slave {requested} not found ({found} slaves on the bus)")]
    SlaveNotFound {
        /// Requested 1-based position.
        requested: u16,
        /// Number of slaves discovered.
        found: usize,
    },
}

/// Tagged result of one step. Only `Fatal` halts the sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum StepOutcome {
    /// Step completed.
    Ok,
    /// Step failed in a way the sequence tolerates.
    Advisory(String),
    /// Step failed; remaining steps are skipped except cleanup.
    Fatal(FatalReason),
}

impl StepOutcome {
    /// Combine advisory messages into one outcome.
    #[must_use]
    pub fn from_advisories(advisories: Vec<String>) -> Self {
        if advisories.is_empty() {
            Self::Ok
        } else {
            Self::Advisory(advisories.join("; "))
        }
    }

    /// True for `Fatal`.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Advisory(reason) => write!(f, "advisory: {reason}"),
            Self::Fatal(reason) => write!(f, "fatal: {reason}"),
        }
    }
}

/// One executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    /// Which step.
    pub step: Step,
    /// How it ended.
    pub outcome: StepOutcome,
    /// AL status observed by a state check, if the step polled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed: Option<AlStatus>,
}

/// Overall result of an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum RebootOutcome {
    /// Every step ran; some may have been advisory.
    Completed,
    /// A fatal step stopped the sequence.
    Aborted(FatalReason),
}

/// Record of one reboot attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebootReport {
    /// Interface the attempt used.
    pub interface: String,
    /// Target slave, 1-based.
    pub slave: u16,
    /// Slaves found by discovery, if discovery ran.
    pub slave_count: Option<usize>,
    /// Executed steps in order.
    pub steps: Vec<StepRecord>,
    /// Boot mailbox layout read from the SII.
    pub mailbox: Option<MailboxConfig>,
    /// SM0/SM1 as written to the device.
    pub sync_managers: Option<SyncManagerConfig>,
}

impl RebootReport {
    /// Start an empty report.
    #[must_use]
    pub fn new(interface: &str, slave: u16) -> Self {
        Self {
            interface: interface.to_string(),
            slave,
            slave_count: None,
            steps: Vec::new(),
            mailbox: None,
            sync_managers: None,
        }
    }

    /// Append a step outcome.
    pub fn record(&mut self, step: Step, outcome: StepOutcome) {
        self.steps.push(StepRecord {
            step,
            outcome,
            observed: None,
        });
    }

    /// Append a step outcome together with the AL status it observed.
    pub fn record_observed(&mut self, step: Step, outcome: StepOutcome, observed: AlStatus) {
        self.steps.push(StepRecord {
            step,
            outcome,
            observed: Some(observed),
        });
    }

    /// Outcome of `step`, if it ran.
    #[must_use]
    pub fn outcome(&self, step: Step) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|record| record.step == step)
            .map(|record| &record.outcome)
    }

    /// Steps that ran, in order.
    #[must_use]
    pub fn executed_steps(&self) -> Vec<Step> {
        self.steps.iter().map(|record| record.step).collect()
    }

    /// Advisory messages by step.
    #[must_use]
    pub fn advisories(&self) -> Vec<(Step, &str)> {
        self.steps
            .iter()
            .filter_map(|record| match &record.outcome {
                StepOutcome::Advisory(reason) => Some((record.step, reason.as_str())),
                _ => None,
            })
            .collect()
    }

    /// The fatal reason, if the attempt was aborted.
    #[must_use]
    pub fn fatal(&self) -> Option<&FatalReason> {
        self.steps.iter().find_map(|record| match &record.outcome {
            StepOutcome::Fatal(reason) => Some(reason),
            _ => None,
        })
    }

    /// Overall result.
    #[must_use]
    pub fn result(&self) -> RebootOutcome {
        match self.fatal() {
            Some(reason) => RebootOutcome::Aborted(reason.clone()),
            None => RebootOutcome::Completed,
        }
    }

    /// True when every step ran (advisories allowed).
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.fatal().is_none()
    }
}

impl fmt::Display for RebootReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "quick reboot of slave {} on {}", self.slave, self.interface)?;
        for record in &self.steps {
            write!(f, "  {:<26} {}", record.step.to_string(), record.outcome)?;
            if let Some(observed) = record.observed {
                write!(f, " (observed {observed})")?;
            }
            writeln!(f)?;
        }
        if let Some(sync_managers) = &self.sync_managers {
            writeln!(f, "  SM0 {}", sync_managers.write_mailbox())?;
            writeln!(f, "  SM1 {}", sync_managers.read_mailbox())?;
        }
        match self.result() {
            RebootOutcome::Completed => write!(
                f,
                "completed with {} advisory condition(s)",
                self.advisories().len()
            ),
            RebootOutcome::Aborted(reason) => write!(f, "aborted: {reason}"),
        }
    }
}
