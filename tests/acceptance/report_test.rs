//! Report rendering.
//!
//! The JSON report is what `quick-reboot --json` prints; these tests pin
//! the field names callers depend on.

use super::common::{boot_slave, fast_config, run};
use ecboot_fieldbus::SimulatedMaster;
use serde_json::Value;

fn completed_report() -> Value {
    let outcome = run(
        SimulatedMaster::new().with_slave(boot_slave(1)),
        fast_config(),
        "eth0",
        1,
    );
    serde_json::to_value(&outcome.report).unwrap()
}

#[test]
fn test_json_report_lists_all_steps() {
    let json = completed_report();

    let steps: Vec<&str> = json["steps"]
        .as_array()
        .unwrap()
        .iter()
        .map(|record| record["step"].as_str().unwrap())
        .collect();
    assert_eq!(
        steps,
        vec![
            "bind_transport",
            "discover_slaves",
            "wait_pre_op",
            "request_init",
            "wait_init",
            "read_boot_mailbox",
            "program_sync_managers",
            "request_boot",
            "request_restart",
            "release_transport",
        ]
    );
    assert!(json["steps"]
        .as_array()
        .unwrap()
        .iter()
        .all(|record| record["outcome"]["status"] == "ok"));
}

#[test]
fn test_json_report_mailbox_and_sync_managers() {
    let json = completed_report();

    assert_eq!(json["mailbox"]["write"]["address"], 0x0080);
    assert_eq!(json["mailbox"]["write"]["length"], 0x0010);
    assert_eq!(json["mailbox"]["read"]["address"], 0x0090);
    assert_eq!(json["mailbox"]["read"]["length"], 0x0020);

    let sm = &json["sync_managers"]["descriptors"];
    assert_eq!(sm[0]["start_address"], 0x0080);
    assert_eq!(sm[0]["control_flags"], 0x0001_0026);
    assert_eq!(sm[1]["start_address"], 0x0090);
    assert_eq!(sm[1]["control_flags"], 0x0001_0022);
}

#[test]
fn test_json_report_observed_states() {
    let json = completed_report();

    assert_eq!(json["steps"][2]["observed"]["state"], "PRE_OP");
    assert_eq!(json["steps"][4]["observed"]["state"], "INIT");
    assert_eq!(json["steps"][7]["observed"]["state"], "BOOT");
    assert_eq!(json["steps"][7]["observed"]["error"], false);
}

#[test]
fn test_json_report_for_aborted_attempt() {
    let outcome = run(SimulatedMaster::new(), fast_config(), "eth0", 1);
    let json = serde_json::to_value(&outcome.report).unwrap();

    assert_eq!(json["slave_count"], 0);
    assert_eq!(json["steps"][1]["outcome"]["status"], "fatal");
    assert_eq!(json["steps"][1]["outcome"]["reason"]["kind"], "no_slaves_found");
    assert!(json["mailbox"].is_null());
    assert!(json["sync_managers"].is_null());
}

#[test]
fn test_text_report_summary() {
    let outcome = run(
        SimulatedMaster::new().with_slave(boot_slave(1)),
        fast_config(),
        "eth0",
        1,
    );
    let text = outcome.report.to_string();

    assert!(text.starts_with("quick reboot of slave 1 on eth0"));
    assert!(text.contains("SM0 A:0080 L:  16 F:00010026"));
    assert!(text.contains("SM1 A:0090 L:  32 F:00010022"));
    assert!(text.ends_with("completed with 0 advisory condition(s)"));
}
