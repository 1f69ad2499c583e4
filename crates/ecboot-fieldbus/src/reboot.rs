//! Quick-reboot orchestration.
//!
//! Drives one slave through PRE_OP → INIT → BOOT → INIT. The BOOT → INIT
//! transition makes the device drop its running firmware and restart.
//! Before BOOT is requested, SM0/SM1 are reprogrammed with the boot mailbox
//! layout from the SII; requesting BOOT with the PRE_OP mailbox layout
//! still in place is rejected by the device.
//!
//! Only a failed bind and an empty (or unusable) discovery stop the
//! sequence. Every other failure is logged, recorded as advisory, and the
//! next step runs anyway: a slave that stops answering after being told to
//! restart is the expected result, not a fault.

use crate::master::{MasterStack, StateTarget};
use crate::report::{FatalReason, RebootReport, Step, StepOutcome};
use crate::sii::{MailboxConfig, MailboxWindow, SiiField};
use crate::slave::{SlaveDirectory, SlaveHandle};
use crate::sync_manager::{ProgrammedSyncManagers, SyncManagerConfig, SM_REGISTER_SIZE};
use ecboot_common::config::{RebootConfig, SyncManagerWritePolicy};
use ecboot_common::error::FieldbusError;
use ecboot_common::state::{AlStatus, ApplicationState};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Runs the quick-reboot handshake against a master stack.
pub struct RebootOrchestrator {
    /// Timeouts and policies.
    config: RebootConfig,
    /// Master-stack backend.
    master: Box<dyn MasterStack>,
}

impl std::fmt::Debug for RebootOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebootOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RebootOrchestrator {
    /// Create an orchestrator over `master`.
    pub fn new(config: RebootConfig, master: Box<dyn MasterStack>) -> Self {
        Self { config, master }
    }

    /// Run the full sequence for the slave at 1-based `slave_index` on
    /// `interface`.
    ///
    /// Never fails: fatal conditions end the attempt early and are recorded
    /// in the returned report. Once bind succeeded, the transport is
    /// released on every path; if bind failed, close is not called.
    pub fn reboot(&mut self, interface: &str, slave_index: u16) -> RebootReport {
        info!(interface, slave = slave_index, "Starting quick reboot");
        let mut report = RebootReport::new(interface, slave_index);

        let bind = self.bind_transport(interface);
        let bound = !bind.is_fatal();
        report.record(Step::BindTransport, bind);

        if bound {
            self.run_bound(slave_index, &mut report);
            let release = self.release_transport();
            report.record(Step::ReleaseTransport, release);
        }

        match report.fatal() {
            Some(reason) => warn!(%reason, "Quick reboot aborted"),
            None => info!(
                advisories = report.advisories().len(),
                "Quick reboot sequence complete"
            ),
        }
        report
    }

    /// Steps 2-9; returns early only on a fatal discovery outcome.
    fn run_bound(&mut self, slave_index: u16, report: &mut RebootReport) {
        let slave = match self.discover_slaves(slave_index, report) {
            Ok(slave) => {
                report.record(Step::DiscoverSlaves, StepOutcome::Ok);
                slave
            }
            Err(reason) => {
                error!(%reason, "Stopping before any state transition");
                report.record(Step::DiscoverSlaves, StepOutcome::Fatal(reason));
                return;
            }
        };

        let (outcome, observed) = self.wait_for_state(
            StateTarget::All,
            ApplicationState::PreOp,
            self.config.pre_op_timeout(),
        );
        report.record_observed(Step::WaitPreOp, outcome, observed);

        let outcome = self.request_state(&slave, ApplicationState::Init);
        report.record(Step::RequestInit, outcome);

        let (outcome, observed) = self.wait_for_state(
            StateTarget::Slave(slave.position),
            ApplicationState::Init,
            self.config.init_timeout(),
        );
        report.record_observed(Step::WaitInit, outcome, observed);

        let (outcome, mailbox) = self.read_boot_mailbox(&slave);
        report.mailbox = Some(mailbox);
        report.record(Step::ReadBootMailbox, outcome);

        let sync_managers = SyncManagerConfig::from_boot_mailbox(&mailbox, slave.mailbox_sm_flags);
        report.sync_managers = Some(sync_managers);
        let (outcome, programmed) = self.program_sync_managers(&slave, sync_managers);
        report.record(Step::ProgramSyncManagers, outcome);

        let (outcome, observed) = self.request_boot(&slave, &programmed);
        report.record_observed(Step::RequestBoot, outcome, observed);

        let outcome = self.request_restart(&slave);
        report.record(Step::RequestRestart, outcome);
    }

    /// Step 1.
    fn bind_transport(&mut self, interface: &str) -> StepOutcome {
        match self.master.bind(interface) {
            Ok(()) => {
                info!(interface, "Transport bound");
                StepOutcome::Ok
            }
            Err(e) => {
                error!(interface, error = %e, "No socket connection; execute as root or grant CAP_NET_RAW");
                let reason = match e {
                    FieldbusError::TransportUnavailable { reason, .. } => reason,
                    other => other.to_string(),
                };
                StepOutcome::Fatal(FatalReason::TransportUnavailable {
                    interface: interface.to_string(),
                    reason,
                })
            }
        }
    }

    /// Step 2: discovery plus target selection.
    fn discover_slaves(
        &mut self,
        slave_index: u16,
        report: &mut RebootReport,
    ) -> Result<SlaveHandle, FatalReason> {
        let directory = self
            .master
            .discover_and_configure()
            .map(SlaveDirectory::new)
            .map_err(|e| FatalReason::DiscoveryFailed {
                reason: e.to_string(),
            })?;
        report.slave_count = Some(directory.len());

        if directory.is_empty() {
            warn!("No slaves found");
            return Err(FatalReason::NoSlavesFound);
        }
        info!(slave_count = directory.len(), "Slaves found and configured");
        for slave in directory.iter() {
            debug!(
                position = slave.position,
                station = format!("{:#06x}", slave.configured_address),
                name = %slave.name,
                identity = %slave.identity,
                "Discovered slave"
            );
        }

        directory
            .get(slave_index)
            .cloned()
            .ok_or(FatalReason::SlaveNotFound {
                requested: slave_index,
                found: directory.len(),
            })
    }

    /// Steps 3 and 5: advisory state check.
    fn wait_for_state(
        &mut self,
        target: StateTarget,
        state: ApplicationState,
        timeout: Duration,
    ) -> (StepOutcome, AlStatus) {
        match self.master.poll_state(target, state, timeout) {
            Ok(observed) if observed.reached(state) => {
                info!(%target, %state, "State reached");
                (StepOutcome::Ok, observed)
            }
            Ok(observed) => {
                warn!(%target, %state, %observed, ?timeout, "State not reached");
                (
                    StepOutcome::Advisory(format!(
                        "{target} did not reach {state} within {timeout:?} (observed {observed})"
                    )),
                    observed,
                )
            }
            Err(e) => {
                warn!(%target, %state, error = %e, "State check failed");
                (
                    StepOutcome::Advisory(format!("{state} check for {target} failed: {e}")),
                    AlStatus::none(),
                )
            }
        }
    }

    /// Steps 4, 8 and 9: write the AL control register, advisory on failure.
    fn request_state(&mut self, slave: &SlaveHandle, state: ApplicationState) -> StepOutcome {
        info!(slave = slave.position, %state, "Requesting state");
        match self.master.request_state(slave, state) {
            Ok(()) => StepOutcome::Ok,
            Err(e) => {
                warn!(slave = slave.position, %state, error = %e, "State request not accepted");
                StepOutcome::Advisory(e.to_string())
            }
        }
    }

    /// Step 6: read both boot mailbox descriptors. A failed read leaves
    /// that window at zero.
    fn read_boot_mailbox(&mut self, slave: &SlaveHandle) -> (StepOutcome, MailboxConfig) {
        let mut advisories = Vec::new();
        let mut read_window = |field: SiiField| -> MailboxWindow {
            match self.master.read_sii(slave, field, self.config.timeouts.eeprom) {
                Ok(raw) => {
                    let window = MailboxWindow::decode(raw);
                    debug!(
                        %field,
                        raw = format!("{raw:#010x}"),
                        address = format!("{:#06x}", window.address),
                        length = window.length,
                        "SII mailbox descriptor"
                    );
                    window
                }
                Err(e) => {
                    warn!(slave = slave.position, %field, error = %e, "SII read failed");
                    advisories.push(format!("{field}: {e}"));
                    MailboxWindow::default()
                }
            }
        };

        let mailbox = MailboxConfig {
            write: read_window(SiiField::BootRxMailbox),
            read: read_window(SiiField::BootTxMailbox),
        };
        (StepOutcome::from_advisories(advisories), mailbox)
    }

    /// Step 7: FPWR SM0 and SM1. Writes are not polled unless the verify
    /// policy is configured.
    fn program_sync_managers(
        &mut self,
        slave: &SlaveHandle,
        config: SyncManagerConfig,
    ) -> (StepOutcome, ProgrammedSyncManagers) {
        let timeout = self.config.timeouts.register;
        let policy = self.config.sync_manager.write_policy;
        let mut advisories = Vec::new();

        for (index, register, descriptor) in config.registers() {
            info!(slave = slave.position, "SM{index} {descriptor}");
            let bytes = descriptor.to_register_bytes();
            if let Err(e) =
                self.master
                    .write_register(slave.configured_address, register, &bytes, timeout)
            {
                warn!(slave = slave.position, sm = index, error = %e, "Sync manager write failed");
                advisories.push(format!("SM{index}: {e}"));
                continue;
            }

            if policy == SyncManagerWritePolicy::Verify {
                match self.master.read_register(
                    slave.configured_address,
                    register,
                    SM_REGISTER_SIZE,
                    timeout,
                ) {
                    Ok(readback) if readback == bytes => {
                        debug!(sm = index, "Sync manager readback matches");
                    }
                    Ok(readback) => {
                        warn!(sm = index, ?readback, expected = ?bytes, "Sync manager readback mismatch");
                        advisories.push(format!("SM{index}: readback does not match written value"));
                    }
                    Err(e) => {
                        warn!(sm = index, error = %e, "Sync manager readback failed");
                        advisories.push(format!("SM{index}: {e}"));
                    }
                }
            }
        }

        (
            StepOutcome::from_advisories(advisories),
            ProgrammedSyncManagers::new(config),
        )
    }

    /// Step 8. Taking the programmed sync managers makes it impossible to
    /// reach this before step 7.
    fn request_boot(
        &mut self,
        slave: &SlaveHandle,
        programmed: &ProgrammedSyncManagers,
    ) -> (StepOutcome, AlStatus) {
        debug!(
            sm0 = %programmed.config().write_mailbox(),
            sm1 = %programmed.config().read_mailbox(),
            "Boot mailbox in place"
        );
        let request = self.request_state(slave, ApplicationState::Boot);
        let (check, observed) = self.wait_for_state(
            StateTarget::Slave(slave.position),
            ApplicationState::Boot,
            self.config.boot_timeout(),
        );

        let advisories: Vec<String> = [request, check]
            .into_iter()
            .filter_map(|outcome| match outcome {
                StepOutcome::Advisory(reason) => Some(reason),
                _ => None,
            })
            .collect();
        (StepOutcome::from_advisories(advisories), observed)
    }

    /// Step 9. The device may drop off the bus while restarting, so no
    /// state check follows.
    fn request_restart(&mut self, slave: &SlaveHandle) -> StepOutcome {
        info!(
            slave = slave.position,
            "Requesting INIT; BOOT to INIT transition triggers slave restart"
        );
        self.request_state(slave, ApplicationState::Init)
    }

    /// Step 10.
    fn release_transport(&mut self) -> StepOutcome {
        match self.master.close() {
            Ok(()) => {
                info!("End quick reboot, transport closed");
                StepOutcome::Ok
            }
            Err(e) => {
                warn!(error = %e, "Transport close failed");
                StepOutcome::Advisory(e.to_string())
            }
        }
    }
}
