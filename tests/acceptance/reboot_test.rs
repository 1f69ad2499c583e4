//! Quick-reboot scenarios.
//!
//! # Acceptance Criteria
//!
//! - A boot-capable slave ends up restarted with SM0/SM1 set from its SII
//! - An unusable transport or empty segment stops before any device access
//! - State-check misses are reported but never stop the attempt
//! - Repeating an attempt gives the same result

use super::common::{boot_slave, fast_config, run, verifying_config};
use ecboot_common::state::{AlStatus, ApplicationState};
use ecboot_fieldbus::{
    FatalReason, MasterCall, RebootOutcome, SimulatedMaster, Step, StepOutcome,
    SyncManagerDescriptor,
};

#[test]
fn test_happy_path_restarts_slave() {
    let master = SimulatedMaster::new().with_slave(boot_slave(1));
    let journal = master.journal();
    let mut orchestrator =
        ecboot_fieldbus::RebootOrchestrator::new(fast_config(), Box::new(master));

    let report = orchestrator.reboot("eth0", 1);

    assert_eq!(report.result(), RebootOutcome::Completed);
    assert_eq!(report.steps.len(), 10);
    assert!(report.advisories().is_empty());
    assert_eq!(report.slave_count, Some(1));

    let sync_managers = report.sync_managers.expect("sync managers recorded");
    let sm0 = sync_managers.write_mailbox();
    let sm1 = sync_managers.read_mailbox();
    assert_eq!((sm0.start_address, sm0.length), (0x0080, 0x0010));
    assert_eq!((sm1.start_address, sm1.length), (0x0090, 0x0020));

    let boot = report
        .steps
        .iter()
        .find(|record| record.step == Step::RequestBoot)
        .expect("BOOT step recorded");
    assert_eq!(boot.observed, Some(AlStatus::new(ApplicationState::Boot)));

    // Closing twice would show up as a second Close
    assert_eq!(journal.count(|call| *call == MasterCall::Close), 1);
}

#[test]
fn test_restart_leaves_slave_in_init() {
    let mut master = SimulatedMaster::new();
    master.add_slave(boot_slave(1));
    let journal = master.journal();

    let mut orchestrator =
        ecboot_fieldbus::RebootOrchestrator::new(fast_config(), Box::new(master));
    let report = orchestrator.reboot("eth0", 1);
    assert!(report.is_completed());

    let requests: Vec<_> = journal
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            MasterCall::RequestState { state, .. } => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        requests,
        vec![
            ApplicationState::Init,
            ApplicationState::Boot,
            ApplicationState::Init
        ]
    );
}

#[test]
fn test_no_devices_is_fatal_and_releases_transport() {
    let outcome = run(SimulatedMaster::new(), fast_config(), "eth0", 1);

    assert_eq!(
        outcome.report.result(),
        RebootOutcome::Aborted(FatalReason::NoSlavesFound)
    );
    assert_eq!(
        outcome.report.executed_steps(),
        vec![
            Step::BindTransport,
            Step::DiscoverSlaves,
            Step::ReleaseTransport
        ]
    );
    assert_eq!(outcome.journal.count(MasterCall::touches_device), 0);
    assert_eq!(outcome.journal.count(|call| *call == MasterCall::Close), 1);
}

#[test]
fn test_unavailable_interface_is_fatal_without_close() {
    let master = SimulatedMaster::new()
        .with_slave(boot_slave(1))
        .failing_bind("No such device");
    let outcome = run(master, fast_config(), "eth9", 1);

    assert!(matches!(
        outcome.report.fatal(),
        Some(FatalReason::TransportUnavailable { interface, .. }) if interface == "eth9"
    ));
    assert_eq!(outcome.journal.calls().len(), 1);
}

#[test]
fn test_slave_beyond_segment_is_fatal() {
    let master = SimulatedMaster::new()
        .with_slave(boot_slave(1))
        .with_slave(boot_slave(2));
    let outcome = run(master, fast_config(), "eth0", 3);

    assert_eq!(
        outcome.report.fatal(),
        Some(&FatalReason::SlaveNotFound {
            requested: 3,
            found: 2
        })
    );
    assert_eq!(outcome.journal.count(MasterCall::touches_device), 0);
    assert_eq!(outcome.journal.calls().last(), Some(&MasterCall::Close));
}

#[test]
fn test_discovery_failure_is_fatal() {
    let master = SimulatedMaster::new()
        .with_slave(boot_slave(1))
        .failing_discovery("frame lost");
    let outcome = run(master, fast_config(), "eth0", 1);

    assert!(matches!(
        outcome.report.fatal(),
        Some(FatalReason::DiscoveryFailed { reason }) if reason.contains("frame lost")
    ));
    assert_eq!(outcome.journal.calls().last(), Some(&MasterCall::Close));
}

#[test]
fn test_slave_without_boot_mailbox_refuses_boot() {
    // Blank SII: both descriptors read as zero
    let master = SimulatedMaster::new().with_slave(ecboot_fieldbus::SimulatedSlave::new(1, 0x1001));
    let outcome = run(master, fast_config(), "eth0", 1);

    assert!(outcome.report.is_completed());
    let sync_managers = outcome.report.sync_managers.expect("sync managers recorded");
    assert_eq!(sync_managers.write_mailbox().start_address, 0);
    assert_eq!(sync_managers.write_mailbox().length, 0);

    // Zero-length windows are written as read, but the device stays out of BOOT
    assert_eq!(
        outcome.report.outcome(Step::ProgramSyncManagers),
        Some(&StepOutcome::Ok)
    );
    assert!(matches!(
        outcome.report.outcome(Step::RequestBoot),
        Some(StepOutcome::Advisory(_))
    ));
    let boot = &outcome.report.steps[7];
    assert_eq!(boot.step, Step::RequestBoot);
    assert_eq!(
        boot.observed,
        Some(AlStatus::new(ApplicationState::Init).with_error())
    );
}

#[test]
fn test_sii_failure_leaves_device_refusing_boot() {
    let master =
        SimulatedMaster::new().with_slave(boot_slave(1).failing_sii_reads());
    let outcome = run(master, fast_config(), "eth0", 1);

    assert!(outcome.report.is_completed());
    let advisory_steps: Vec<_> = outcome
        .report
        .advisories()
        .into_iter()
        .map(|(step, _)| step)
        .collect();
    assert_eq!(advisory_steps, vec![Step::ReadBootMailbox, Step::RequestBoot]);

    let boot = &outcome.report.steps[7];
    assert_eq!(boot.step, Step::RequestBoot);
    assert_eq!(
        boot.observed,
        Some(AlStatus::new(ApplicationState::Init).with_error())
    );
}

#[test]
fn test_verify_policy_reads_back_both_sync_managers() {
    let outcome = run(
        SimulatedMaster::new().with_slave(boot_slave(1)),
        verifying_config(),
        "eth0",
        1,
    );

    assert!(outcome.report.advisories().is_empty());
    let reads: Vec<_> = outcome
        .journal
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            MasterCall::ReadRegister { register, len, .. } => Some((register, len)),
            _ => None,
        })
        .collect();
    assert_eq!(reads, vec![(0x0800, 8), (0x0808, 8)]);
}

#[test]
fn test_verify_policy_flags_lost_writes() {
    let outcome = run(
        SimulatedMaster::new().with_slave(boot_slave(1).dropping_register_writes()),
        verifying_config(),
        "eth0",
        1,
    );

    assert!(outcome.report.is_completed());
    assert!(matches!(
        outcome.report.outcome(Step::ProgramSyncManagers),
        Some(StepOutcome::Advisory(_))
    ));
}

#[test]
fn test_repeated_attempts_against_stuck_slave_match() {
    let attempt = || {
        run(
            SimulatedMaster::new().with_slave(
                boot_slave(1)
                    .in_state(ApplicationState::Boot)
                    .stuck_in(ApplicationState::Boot),
            ),
            fast_config(),
            "eth0",
            1,
        )
    };

    let first = attempt();
    let second = attempt();

    assert_eq!(first.report.advisories(), second.report.advisories());
    assert_eq!(first.journal.calls(), second.journal.calls());
    assert_eq!(first.report.advisories().len(), 2);
}

#[test]
fn test_descriptor_written_matches_report() {
    let outcome = run(
        SimulatedMaster::new().with_slave(boot_slave(1)),
        fast_config(),
        "eth0",
        1,
    );
    let sync_managers = outcome.report.sync_managers.expect("sync managers recorded");

    let written: Vec<_> = outcome
        .journal
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            MasterCall::WriteRegister { data, .. } => SyncManagerDescriptor::from_register_bytes(&data),
            _ => None,
        })
        .collect();
    assert_eq!(written, sync_managers.descriptors.to_vec());
}
