//! In-memory master stack for testing.
//!
//! Models just enough of an ESC to exercise the reboot sequence: AL state
//! requests, SII words, and sync-manager register blocks. Every call is
//! recorded in a [`CallJournal`] that tests can inspect after the master has
//! been moved into an orchestrator.

use crate::master::{MasterStack, StateTarget};
use crate::sii::{MailboxWindow, SiiField};
use crate::slave::{SlaveHandle, SlaveIdentity};
use crate::sync_manager::{
    sm_register, SyncManagerDescriptor, DEFAULT_MAILBOX_SM0_FLAGS, DEFAULT_MAILBOX_SM1_FLAGS,
    SM_REGISTER_SIZE,
};
use ecboot_common::error::{FieldbusError, FieldbusResult};
use ecboot_common::state::{AlStatus, ApplicationState};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// One collaborator call as seen by the simulated master.
#[derive(Debug, Clone, PartialEq)]
pub enum MasterCall {
    /// `bind`.
    Bind {
        /// Requested interface.
        interface: String,
    },
    /// `discover_and_configure`.
    Discover,
    /// `poll_state`.
    PollState {
        /// Slaves covered.
        target: StateTarget,
        /// Awaited state.
        state: ApplicationState,
        /// Budget passed by the caller.
        timeout: Duration,
    },
    /// `request_state`.
    RequestState {
        /// 1-based slave position.
        slave: u16,
        /// Requested state.
        state: ApplicationState,
    },
    /// `read_sii`.
    ReadSii {
        /// 1-based slave position.
        slave: u16,
        /// Field read.
        field: SiiField,
        /// Budget passed by the caller.
        timeout: Duration,
    },
    /// `write_register`.
    WriteRegister {
        /// Configured station address.
        station: u16,
        /// Register address.
        register: u16,
        /// Bytes written.
        data: Vec<u8>,
        /// Budget passed by the caller.
        timeout: Duration,
    },
    /// `read_register`.
    ReadRegister {
        /// Configured station address.
        station: u16,
        /// Register address.
        register: u16,
        /// Bytes requested.
        len: usize,
    },
    /// `close`.
    Close,
}

impl MasterCall {
    /// True for calls that change device state or touch device registers.
    #[must_use]
    pub fn touches_device(&self) -> bool {
        matches!(
            self,
            Self::RequestState { .. } | Self::WriteRegister { .. } | Self::ReadRegister { .. }
        )
    }
}

/// Shared, clonable record of master calls.
#[derive(Debug, Clone, Default)]
pub struct CallJournal {
    calls: Arc<Mutex<Vec<MasterCall>>>,
}

impl CallJournal {
    fn record(&self, call: MasterCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    /// Snapshot of all calls so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<MasterCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&MasterCall) -> bool) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|call| predicate(call))
            .count()
    }

    /// Forget all recorded calls.
    pub fn clear(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// A simulated slave device.
#[derive(Debug, Clone)]
pub struct SimulatedSlave {
    handle: SlaveHandle,
    /// Raw AL status register (0x0130).
    al_status: u8,
    sii: HashMap<u16, u32>,
    registers: HashMap<u16, Vec<u8>>,
    refused: HashSet<ApplicationState>,
    stuck_in: Option<ApplicationState>,
    fail_sii_reads: bool,
    fail_register_writes: bool,
    drop_register_writes: bool,
    restarts: u32,
}

impl SimulatedSlave {
    /// Create a slave in INIT with an empty SII.
    #[must_use]
    pub fn new(position: u16, configured_address: u16) -> Self {
        Self {
            handle: SlaveHandle::new(position, configured_address)
                .with_mailbox_sm_flags(DEFAULT_MAILBOX_SM0_FLAGS, DEFAULT_MAILBOX_SM1_FLAGS),
            al_status: AlStatus::new(ApplicationState::Init).to_raw(),
            sii: HashMap::new(),
            registers: HashMap::new(),
            refused: HashSet::new(),
            stuck_in: None,
            fail_sii_reads: false,
            fail_register_writes: false,
            drop_register_writes: false,
            restarts: 0,
        }
    }

    /// Create a slave whose SII carries the given boot mailbox descriptors.
    #[must_use]
    pub fn boot_capable(position: u16, configured_address: u16, boot_rx: u32, boot_tx: u32) -> Self {
        Self::new(position, configured_address)
            .with_sii(SiiField::BootRxMailbox, boot_rx)
            .with_sii(SiiField::BootTxMailbox, boot_tx)
    }

    /// Set an SII field.
    #[must_use]
    pub fn with_sii(mut self, field: SiiField, raw: u32) -> Self {
        self.sii.insert(field.word_address(), raw);
        self
    }

    /// Set name and identity reported by discovery.
    #[must_use]
    pub fn with_identity(mut self, name: &str, identity: SlaveIdentity) -> Self {
        self.handle = self.handle.with_name(name).with_identity(identity);
        self
    }

    /// Start in `state` instead of INIT.
    #[must_use]
    pub fn in_state(mut self, state: ApplicationState) -> Self {
        self.al_status = AlStatus::new(state).to_raw();
        self
    }

    /// Never enter `state` when it is requested.
    #[must_use]
    pub fn refusing(mut self, state: ApplicationState) -> Self {
        self.refused.insert(state);
        self
    }

    /// Once in `state`, ignore every further request.
    #[must_use]
    pub fn stuck_in(mut self, state: ApplicationState) -> Self {
        self.stuck_in = Some(state);
        self
    }

    /// Report these mailbox sync-manager flags after auto-configuration.
    #[must_use]
    pub fn with_mailbox_sm_flags(mut self, sm0: u32, sm1: u32) -> Self {
        self.handle = self.handle.with_mailbox_sm_flags(sm0, sm1);
        self
    }

    /// Fail every SII read.
    #[must_use]
    pub fn failing_sii_reads(mut self) -> Self {
        self.fail_sii_reads = true;
        self
    }

    /// Reject every register write.
    #[must_use]
    pub fn failing_register_writes(mut self) -> Self {
        self.fail_register_writes = true;
        self
    }

    /// Accept register writes without storing them.
    #[must_use]
    pub fn dropping_register_writes(mut self) -> Self {
        self.drop_register_writes = true;
        self
    }

    /// Discovery handle of this slave.
    #[must_use]
    pub fn handle(&self) -> &SlaveHandle {
        &self.handle
    }

    /// Current AL status.
    #[must_use]
    pub fn status(&self) -> AlStatus {
        AlStatus::from_raw(self.al_status)
    }

    /// Number of BOOT → INIT restarts performed.
    #[must_use]
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Current content of a register block, if it was ever written.
    #[must_use]
    pub fn register(&self, register: u16) -> Option<&[u8]> {
        self.registers.get(&register).map(Vec::as_slice)
    }

    /// A slave without a boot mailbox in its SII cannot enter BOOT; one
    /// with a boot mailbox needs SM0/SM1 to match it.
    fn boot_mailbox_programmed(&self) -> bool {
        [
            (0, SiiField::BootRxMailbox),
            (1, SiiField::BootTxMailbox),
        ]
        .into_iter()
        .all(|(index, field)| {
            let expected = MailboxWindow::decode(
                self.sii.get(&field.word_address()).copied().unwrap_or(0),
            );
            expected.length > 0
                && self
                    .register(sm_register(index))
                    .and_then(SyncManagerDescriptor::from_register_bytes)
                    .is_some_and(|sm| {
                        sm.start_address == expected.address && sm.length == expected.length
                    })
        })
    }

    fn apply_request(&mut self, requested: ApplicationState) {
        if self.stuck_in.is_some() && self.status().state == self.stuck_in {
            return;
        }
        if self.refused.contains(&requested) {
            return;
        }

        if requested == ApplicationState::Boot && !self.boot_mailbox_programmed() {
            // Invalid mailbox configuration for BOOT: stay in INIT with error
            self.al_status = AlStatus::new(ApplicationState::Init).with_error().to_raw();
            return;
        }

        if requested == ApplicationState::Init && self.status().state == Some(ApplicationState::Boot) {
            self.restarts += 1;
            self.registers.clear();
        }

        self.al_status = AlStatus::new(requested).to_raw();
    }
}

/// Simulated master stack.
#[derive(Debug, Default)]
pub struct SimulatedMaster {
    interface: Option<String>,
    bind_error: Option<String>,
    discovery_error: Option<String>,
    slaves: Vec<SimulatedSlave>,
    journal: CallJournal,
}

impl SimulatedMaster {
    /// Create a master with no slaves on the bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus with one boot-capable slave, used by the CLI's simulated mode.
    #[must_use]
    pub fn with_boot_capable_slave() -> Self {
        Self::new().with_slave(
            SimulatedSlave::boot_capable(1, 0x1001, 0x0080_1000, 0x0080_1080)
                .with_identity("SIM-BOOT", SlaveIdentity::new(0x0000_0002, 0x0444_2C52, 1, 0)),
        )
    }

    /// Attach a slave.
    #[must_use]
    pub fn with_slave(mut self, slave: SimulatedSlave) -> Self {
        self.add_slave(slave);
        self
    }

    /// Attach a slave.
    pub fn add_slave(&mut self, slave: SimulatedSlave) {
        self.slaves.push(slave);
    }

    /// Make `bind` fail with `reason`.
    #[must_use]
    pub fn failing_bind(mut self, reason: impl Into<String>) -> Self {
        self.bind_error = Some(reason.into());
        self
    }

    /// Make discovery fail with `reason`.
    #[must_use]
    pub fn failing_discovery(mut self, reason: impl Into<String>) -> Self {
        self.discovery_error = Some(reason.into());
        self
    }

    /// Handle on the call journal; stays valid after the master is moved.
    #[must_use]
    pub fn journal(&self) -> CallJournal {
        self.journal.clone()
    }

    /// Look up a simulated slave by position.
    #[must_use]
    pub fn slave(&self, position: u16) -> Option<&SimulatedSlave> {
        self.slaves.iter().find(|s| s.handle.position == position)
    }

    /// Whether an interface is currently bound.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.interface.is_some()
    }

    fn ensure_bound(&self) -> FieldbusResult<()> {
        if self.interface.is_some() {
            Ok(())
        } else {
            Err(FieldbusError::NotBound)
        }
    }

    fn slave_mut(&mut self, position: u16) -> Option<&mut SimulatedSlave> {
        self.slaves.iter_mut().find(|s| s.handle.position == position)
    }

    fn slave_at_station_mut(&mut self, station: u16) -> Option<&mut SimulatedSlave> {
        self.slaves
            .iter_mut()
            .find(|s| s.handle.configured_address == station)
    }
}

impl MasterStack for SimulatedMaster {
    fn bind(&mut self, interface: &str) -> FieldbusResult<()> {
        self.journal.record(MasterCall::Bind {
            interface: interface.to_string(),
        });
        if let Some(reason) = &self.bind_error {
            return Err(FieldbusError::TransportUnavailable {
                interface: interface.to_string(),
                reason: reason.clone(),
            });
        }
        debug!(interface, "Simulated transport bound");
        self.interface = Some(interface.to_string());
        Ok(())
    }

    fn discover_and_configure(&mut self) -> FieldbusResult<Vec<SlaveHandle>> {
        self.journal.record(MasterCall::Discover);
        self.ensure_bound()?;
        if let Some(reason) = &self.discovery_error {
            return Err(FieldbusError::Discovery(reason.clone()));
        }

        for slave in &mut self.slaves {
            slave.apply_request(ApplicationState::PreOp);
        }

        debug!(count = self.slaves.len(), "Simulated slave scan");
        Ok(self.slaves.iter().map(|s| s.handle.clone()).collect())
    }

    fn poll_state(
        &mut self,
        target: StateTarget,
        state: ApplicationState,
        timeout: Duration,
    ) -> FieldbusResult<AlStatus> {
        self.journal.record(MasterCall::PollState {
            target,
            state,
            timeout,
        });
        self.ensure_bound()?;

        let status = match target {
            StateTarget::All => self
                .slaves
                .iter()
                .map(SimulatedSlave::status)
                .find(|status| !status.reached(state))
                .unwrap_or_else(|| {
                    if self.slaves.is_empty() {
                        AlStatus::none()
                    } else {
                        AlStatus::new(state)
                    }
                }),
            StateTarget::Slave(position) => self
                .slave(position)
                .map_or_else(AlStatus::none, SimulatedSlave::status),
        };

        debug!(%target, awaited = %state, observed = %status, "Simulated state check");
        Ok(status)
    }

    fn request_state(
        &mut self,
        slave: &SlaveHandle,
        state: ApplicationState,
    ) -> FieldbusResult<()> {
        self.journal.record(MasterCall::RequestState {
            slave: slave.position,
            state,
        });
        self.ensure_bound()?;

        let device = self
            .slave_mut(slave.position)
            .ok_or_else(|| FieldbusError::StateRequest {
                slave: slave.position,
                state,
                reason: "no such slave".into(),
            })?;
        device.apply_request(state);
        debug!(slave = slave.position, requested = %state, now = %device.status(), "Simulated state request");
        Ok(())
    }

    fn read_sii(
        &mut self,
        slave: &SlaveHandle,
        field: SiiField,
        timeout: Duration,
    ) -> FieldbusResult<u32> {
        self.journal.record(MasterCall::ReadSii {
            slave: slave.position,
            field,
            timeout,
        });
        self.ensure_bound()?;

        let word = field.word_address();
        let device = self.slave(slave.position).ok_or_else(|| FieldbusError::SiiRead {
            slave: slave.position,
            word,
            reason: "no such slave".into(),
        })?;
        if device.fail_sii_reads {
            return Err(FieldbusError::Timeout {
                operation: format!("SII read of word {word:#06x}"),
                timeout,
            });
        }
        Ok(device.sii.get(&word).copied().unwrap_or(0))
    }

    fn write_register(
        &mut self,
        configured_address: u16,
        register: u16,
        data: &[u8],
        timeout: Duration,
    ) -> FieldbusResult<()> {
        self.journal.record(MasterCall::WriteRegister {
            station: configured_address,
            register,
            data: data.to_vec(),
            timeout,
        });
        self.ensure_bound()?;

        let device = self
            .slave_at_station_mut(configured_address)
            .ok_or_else(|| FieldbusError::RegisterWrite {
                station: configured_address,
                register,
                reason: "no slave at station address".into(),
            })?;
        if device.fail_register_writes {
            return Err(FieldbusError::RegisterWrite {
                station: configured_address,
                register,
                reason: "working counter 0".into(),
            });
        }
        if !device.drop_register_writes {
            device.registers.insert(register, data.to_vec());
        }
        Ok(())
    }

    fn read_register(
        &mut self,
        configured_address: u16,
        register: u16,
        len: usize,
        _timeout: Duration,
    ) -> FieldbusResult<Vec<u8>> {
        self.journal.record(MasterCall::ReadRegister {
            station: configured_address,
            register,
            len,
        });
        self.ensure_bound()?;

        let device = self
            .slave_at_station_mut(configured_address)
            .ok_or_else(|| FieldbusError::RegisterRead {
                station: configured_address,
                register,
                reason: "no slave at station address".into(),
            })?;
        let mut data = device
            .registers
            .get(&register)
            .cloned()
            .unwrap_or_else(|| vec![0; SM_REGISTER_SIZE]);
        data.resize(len, 0);
        Ok(data)
    }

    fn close(&mut self) -> FieldbusResult<()> {
        self.journal.record(MasterCall::Close);
        if let Some(interface) = self.interface.take() {
            debug!(%interface, "Simulated transport closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(1);

    fn bound_master(slave: SimulatedSlave) -> SimulatedMaster {
        let mut master = SimulatedMaster::new().with_slave(slave);
        master.bind("sim0").unwrap();
        master
    }

    #[test]
    fn test_operations_require_bind() {
        let mut master = SimulatedMaster::with_boot_capable_slave();
        assert_eq!(
            master.discover_and_configure(),
            Err(FieldbusError::NotBound)
        );
        // Closing an unbound master is a no-op
        assert!(master.close().is_ok());
        assert!(!master.is_bound());
    }

    #[test]
    fn test_bind_failure() {
        let mut master = SimulatedMaster::new().failing_bind("permission denied");
        let err = master.bind("eth0").unwrap_err();
        assert!(matches!(err, FieldbusError::TransportUnavailable { .. }));
        assert!(!master.is_bound());
    }

    #[test]
    fn test_discovery_brings_slaves_to_pre_op() {
        let mut master = bound_master(SimulatedSlave::new(1, 0x1001));
        let slaves = master.discover_and_configure().unwrap();
        assert_eq!(slaves.len(), 1);
        assert_eq!(slaves[0].configured_address, 0x1001);

        let status = master
            .poll_state(StateTarget::All, ApplicationState::PreOp, TIMEOUT)
            .unwrap();
        assert!(status.reached(ApplicationState::PreOp));
    }

    #[test]
    fn test_collective_poll_reports_laggard() {
        let mut master = SimulatedMaster::new()
            .with_slave(SimulatedSlave::new(1, 0x1001))
            .with_slave(SimulatedSlave::new(2, 0x1002).refusing(ApplicationState::PreOp));
        master.bind("sim0").unwrap();
        master.discover_and_configure().unwrap();

        let status = master
            .poll_state(StateTarget::All, ApplicationState::PreOp, TIMEOUT)
            .unwrap();
        assert_eq!(status, AlStatus::new(ApplicationState::Init));
    }

    #[test]
    fn test_boot_rejected_without_boot_mailbox() {
        let mut master = bound_master(SimulatedSlave::boot_capable(1, 0x1001, 0x0010_0080, 0x0020_0090));
        let slaves = master.discover_and_configure().unwrap();
        master.request_state(&slaves[0], ApplicationState::Init).unwrap();
        master.request_state(&slaves[0], ApplicationState::Boot).unwrap();

        let status = master.slave(1).unwrap().status();
        assert_eq!(status, AlStatus::new(ApplicationState::Init).with_error());
    }

    #[test]
    fn test_blank_sii_refuses_boot_even_with_matching_registers() {
        let mut master = bound_master(SimulatedSlave::new(1, 0x1001));
        let slaves = master.discover_and_configure().unwrap();
        master.request_state(&slaves[0], ApplicationState::Init).unwrap();

        // Zero-length windows equal to the blank SII descriptors
        let empty = SyncManagerDescriptor::new(0, 0, 0x0001_0026);
        master
            .write_register(0x1001, 0x0800, &empty.to_register_bytes(), TIMEOUT)
            .unwrap();
        master
            .write_register(0x1001, 0x0808, &empty.to_register_bytes(), TIMEOUT)
            .unwrap();
        master.request_state(&slaves[0], ApplicationState::Boot).unwrap();

        let status = master.slave(1).unwrap().status();
        assert_eq!(status.state, Some(ApplicationState::Init));
        assert!(status.error);
    }

    #[test]
    fn test_discovery_reports_configured_mailbox_flags() {
        let mut master = bound_master(
            SimulatedSlave::new(1, 0x1001).with_mailbox_sm_flags(0x0001_0024, 0x0001_0020),
        );
        let slaves = master.discover_and_configure().unwrap();
        assert_eq!(slaves[0].mailbox_sm_flags, [0x0001_0024, 0x0001_0020]);

        let mut master = bound_master(SimulatedSlave::new(1, 0x1001));
        let slaves = master.discover_and_configure().unwrap();
        assert_eq!(slaves[0].mailbox_sm_flags, [0x0001_0026, 0x0001_0022]);
    }

    #[test]
    fn test_boot_accepted_with_programmed_mailbox_and_restart_counted() {
        let mut master = bound_master(SimulatedSlave::boot_capable(1, 0x1001, 0x0010_0080, 0x0020_0090));
        let slaves = master.discover_and_configure().unwrap();
        master.request_state(&slaves[0], ApplicationState::Init).unwrap();

        let sm0 = SyncManagerDescriptor::new(0x0080, 0x0010, 0x0001_0026);
        let sm1 = SyncManagerDescriptor::new(0x0090, 0x0020, 0x0001_0022);
        master
            .write_register(0x1001, 0x0800, &sm0.to_register_bytes(), TIMEOUT)
            .unwrap();
        master
            .write_register(0x1001, 0x0808, &sm1.to_register_bytes(), TIMEOUT)
            .unwrap();

        master.request_state(&slaves[0], ApplicationState::Boot).unwrap();
        assert!(master.slave(1).unwrap().status().reached(ApplicationState::Boot));

        master.request_state(&slaves[0], ApplicationState::Init).unwrap();
        let device = master.slave(1).unwrap();
        assert_eq!(device.restarts(), 1);
        assert!(device.register(0x0800).is_none());
    }

    #[test]
    fn test_sii_and_register_failures() {
        let mut master = bound_master(
            SimulatedSlave::new(1, 0x1001)
                .failing_sii_reads()
                .failing_register_writes(),
        );
        let slaves = master.discover_and_configure().unwrap();

        assert!(matches!(
            master.read_sii(&slaves[0], SiiField::BootRxMailbox, TIMEOUT),
            Err(FieldbusError::Timeout { .. })
        ));
        assert!(matches!(
            master.write_register(0x1001, 0x0800, &[0; 8], TIMEOUT),
            Err(FieldbusError::RegisterWrite { .. })
        ));
    }

    #[test]
    fn test_journal_survives_move() {
        let master = SimulatedMaster::with_boot_capable_slave();
        let journal = master.journal();
        let mut boxed: Box<dyn MasterStack> = Box::new(master);
        boxed.bind("sim0").unwrap();
        boxed.close().unwrap();

        assert_eq!(
            journal.calls(),
            vec![
                MasterCall::Bind {
                    interface: "sim0".into()
                },
                MasterCall::Close
            ]
        );
        journal.clear();
        assert!(journal.calls().is_empty());
    }
}
