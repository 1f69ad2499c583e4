//! Common utilities for acceptance tests.

#![allow(dead_code)] // Not every scenario uses every helper

use ecboot_common::config::{RebootConfig, SyncManagerWritePolicy};
use ecboot_fieldbus::{CallJournal, RebootOrchestrator, RebootReport, SimulatedMaster, SimulatedSlave};
use std::time::Duration;

/// Boot mailbox RX descriptor: address 0x0080, length 16.
pub const BOOT_RX: u32 = 0x0010_0080;
/// Boot mailbox TX descriptor: address 0x0090, length 32.
pub const BOOT_TX: u32 = 0x0020_0090;

/// Configuration with millisecond budgets.
pub fn fast_config() -> RebootConfig {
    let mut config = RebootConfig::default();
    config.timeouts.state = Duration::from_millis(1);
    config
}

/// Configuration that reads sync-manager registers back.
pub fn verifying_config() -> RebootConfig {
    let mut config = fast_config();
    config.sync_manager.write_policy = SyncManagerWritePolicy::Verify;
    config
}

/// Boot-capable slave at `position` with station address `0x1000 + position`.
pub fn boot_slave(position: u16) -> SimulatedSlave {
    SimulatedSlave::boot_capable(position, 0x1000 + position, BOOT_RX, BOOT_TX)
}

/// Outcome of one simulated run.
pub struct Run {
    /// Report returned by the orchestrator.
    pub report: RebootReport,
    /// Calls the master saw.
    pub journal: CallJournal,
}

/// Run one attempt against `master`.
pub fn run(master: SimulatedMaster, config: RebootConfig, interface: &str, slave: u16) -> Run {
    let journal = master.journal();
    let mut orchestrator = RebootOrchestrator::new(config, Box::new(master));
    let report = orchestrator.reboot(interface, slave);
    Run { report, journal }
}
